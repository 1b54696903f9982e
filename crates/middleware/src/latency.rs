//! TSC clock for timing message dispatch without syscalls

use std::time::Duration;

use once_cell::sync::Lazy;
use quanta::Clock;

pub static CLOCK: Lazy<Clock> = Lazy::new(Clock::new);

/// Current TSC reading
#[inline]
pub fn now_tsc() -> u64 {
    CLOCK.raw()
}

/// Wall time elapsed since an earlier `now_tsc()` reading
#[inline]
pub fn elapsed_since(start: u64) -> Duration {
    CLOCK.delta(start, now_tsc())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_readings_are_monotonic() {
        let t1 = now_tsc();
        let t2 = now_tsc();
        assert!(t2 >= t1);
    }

    #[test]
    fn test_elapsed_is_small_for_back_to_back_reads() {
        let start = now_tsc();
        assert!(elapsed_since(start) < Duration::from_secs(1));
    }
}
