//! Monotonic clock and sleep, matching the original's `getnanosec`/`sleep`
//! command-surface entries.

use std::sync::OnceLock;
use std::time::Instant;

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Nanoseconds since an arbitrary, process-lifetime-stable epoch. Only
/// meaningful relative to other calls within the same process — exactly
/// what the engine needs for call-time deltas and RNG seeding.
pub fn monotonic_now_ns() -> u64 {
    let epoch = EPOCH.get_or_init(Instant::now);
    epoch.elapsed().as_nanos() as u64
}

/// Sleeps for `seconds`, retrying across `EINTR` on Unix the way the
/// original's `_lsleep` retries `nanosleep`. On non-Unix targets this falls
/// back to `std::thread::sleep`, which does not need EINTR handling.
pub fn sleep_seconds(seconds: f64) {
    if seconds <= 0.0 {
        return;
    }

    #[cfg(unix)]
    {
        let mut req = libc::timespec {
            tv_sec: seconds.trunc() as libc::time_t,
            tv_nsec: (seconds.fract() * 1_000_000_000.0) as libc::c_long,
        };
        loop {
            let mut rem = libc::timespec {
                tv_sec: 0,
                tv_nsec: 0,
            };
            let rc = unsafe { libc::nanosleep(&req, &mut rem) };
            if rc == 0 {
                break;
            }
            if std::io::Error::last_os_error().kind() == std::io::ErrorKind::Interrupted {
                req = rem;
                continue;
            }
            break;
        }
    }

    #[cfg(not(unix))]
    {
        std::thread::sleep(std::time::Duration::from_secs_f64(seconds));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_clock_is_nondecreasing() {
        let a = monotonic_now_ns();
        let b = monotonic_now_ns();
        assert!(b >= a);
    }

    #[test]
    fn zero_sleep_returns_immediately() {
        sleep_seconds(0.0);
    }
}
