//! Locomotive slot table
//!
//! Tracks which bus device currently controls which locomotive address.
//! A locomotive is held by at most one slot; a claim for an address held
//! elsewhere is refused so two throttles can never drive the same loco.

/// One entry per addressable device, plus slot 0 for the station itself
pub const SLOT_COUNT: usize = 32;

/// Outcome of a control claim
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Claim {
    /// The slot now controls the address
    Granted,
    /// The slot already controlled this address; nothing changed
    AlreadyHeld,
    /// Another slot controls the address; ownership unchanged
    Conflict { holder: u8 },
}

/// Slot-number → locomotive-address ownership table
#[derive(Debug, Clone)]
pub struct SlotTable {
    slots: [Option<u16>; SLOT_COUNT],
}

impl Default for SlotTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SlotTable {
    pub fn new() -> Self {
        Self {
            slots: [None; SLOT_COUNT],
        }
    }

    /// Which slot holds `address`, if any
    pub fn holder(&self, address: u16) -> Option<u8> {
        self.slots
            .iter()
            .position(|&held| held == Some(address))
            .map(|slot| slot as u8)
    }

    /// Returns true if no other slot holds a conflicting claim
    pub fn is_free_for(&self, slot: u8, address: u16) -> bool {
        match self.holder(address) {
            None => true,
            Some(holder) => holder == slot,
        }
    }

    /// Locomotive currently controlled by `slot`
    pub fn address_of(&self, slot: u8) -> Option<u16> {
        self.slots.get(usize::from(slot)).copied().flatten()
    }

    /// Try to give `slot` control of `address`
    ///
    /// Re-claiming the same address is an explicit no-op so the caller
    /// can skip redundant busy notifications. A slot controls at most
    /// one locomotive, so a granted claim releases the slot's previous
    /// one first.
    pub fn claim(&mut self, slot: u8, address: u16) -> Claim {
        let index = usize::from(slot);
        if index >= SLOT_COUNT {
            return Claim::Conflict { holder: 0 };
        }
        if self.slots[index] == Some(address) {
            return Claim::AlreadyHeld;
        }
        if let Some(holder) = self.holder(address) {
            return Claim::Conflict { holder };
        }
        self.slots[index] = Some(address);
        Claim::Granted
    }

    /// Clear the slot's claim (device disconnected or gave up control)
    pub fn release(&mut self, slot: u8) {
        if let Some(entry) = self.slots.get_mut(usize::from(slot)) {
            *entry = None;
        }
    }
}
