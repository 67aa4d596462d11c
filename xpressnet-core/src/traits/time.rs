//! Microsecond time source
//!
//! Transmission windows are a few hundred microseconds, so millisecond
//! tickers are too coarse. The counter may wrap; elapsed time is always
//! computed with wrapping subtraction.

/// Monotonic microsecond counter
pub trait Clock {
    /// Current counter value; wraps around at `u32::MAX`
    fn micros(&self) -> u32;
}

/// Wrap-safe elapsed microseconds between two counter readings
pub fn elapsed_us(start: u32, now: u32) -> u32 {
    now.wrapping_sub(start)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elapsed_wraps() {
        assert_eq!(elapsed_us(10, 510), 500);
        assert_eq!(elapsed_us(u32::MAX - 100, 400), 501);
    }
}
