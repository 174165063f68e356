//! Throttle percentage from device utilization and load average.

/// Linear ramp of `curr` from `low` (0%) to `high` (100%).
pub fn ratio_pct(high: i64, low: i64, curr: i64) -> i64 {
    if curr <= low {
        0
    } else if curr >= high {
        100
    } else {
        (curr - low) * 100 / (high - low)
    }
}

/// Load-average ceiling below the actual core count.
///
/// Deliberately reduced so that housekeeping waits for a truly idle host;
/// the cache side bounds the resulting starvation with a
/// max-time-with-no-evictions override.
pub fn max_load(cpus: usize) -> i64 {
    (((cpus >> 1) - (cpus >> 3)) as i64).max(1)
}

/// Integer 0..=100 gating housekeeping.
///
/// `util` is the max recent device utilization in percent; `lavg` the
/// 1-minute load average. At or above [`max_load`] the answer is always
/// 100.
pub fn throttle_pct(util: i64, lavg: f64, cpus: usize) -> i64 {
    let maxload = max_load(cpus);
    if lavg >= maxload as f64 {
        return 100;
    }
    let ru = ratio_pct(100, 2, util);
    let rl = ratio_pct(10 * maxload, 1, (10.0 * lavg) as i64);
    ru.max(rl)
}

// ----------------------------------------------------------------------------

/// Source of `(max device utilization %, 1-minute load average)`.
///
/// Device utilization accounting lives with the owner of the disks; the
/// default host probe reports utilization 0 and the real load average.
pub trait SysLoad: Send + Sync {
    fn max_util_load(&self) -> (i64, f64);

    fn num_cpus(&self) -> usize {
        std::thread::available_parallelism().map_or(1, |n| n.get())
    }
}

/// [`SysLoad`] for the local host.
#[derive(Default)]
pub struct HostLoad;

impl SysLoad for HostLoad {
    #[cfg(not(target_arch = "wasm32"))]
    fn max_util_load(&self) -> (i64, f64) {
        let lavg = sysinfo::System::load_average();
        (0, lavg.one)
    }

    #[cfg(target_arch = "wasm32")]
    fn max_util_load(&self) -> (i64, f64) {
        (0, 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratio_clamps() {
        assert_eq!(ratio_pct(100, 2, 0), 0);
        assert_eq!(ratio_pct(100, 2, 2), 0);
        assert_eq!(ratio_pct(100, 2, 100), 100);
        assert_eq!(ratio_pct(100, 2, 51), 50);
    }

    #[test]
    fn max_load_floor() {
        assert_eq!(max_load(1), 1);
        assert_eq!(max_load(2), 1);
        assert_eq!(max_load(8), 3);
        assert_eq!(max_load(16), 6);
        assert_eq!(max_load(32), 12);
    }

    #[test]
    fn saturated_load_is_100() {
        let cpus = 8;
        assert_eq!(throttle_pct(0, max_load(cpus) as f64, cpus), 100);
        assert_eq!(throttle_pct(0, 100.0, cpus), 100);
    }

    #[test]
    fn idle_host_is_0() {
        assert_eq!(throttle_pct(0, 0.0, 8), 0);
        assert_eq!(throttle_pct(2, 0.1, 8), 0);
    }

    #[test]
    fn util_dominates_when_higher() {
        let pct = throttle_pct(60, 0.0, 8);
        assert_eq!(pct, ratio_pct(100, 2, 60));
    }
}
