//! Run-time memory and host-load probes.
//!
//! The cache housekeeper consults two signals before doing any work:
//! memory pressure (drop everything when the host is close to OOM) and a
//! throttle percentage derived from device utilization and load average.

mod pressure;
mod throttle;

pub use pressure::{MemoryUse, Pressure, pressure, pressure_of};
pub use throttle::{HostLoad, SysLoad, max_load, ratio_pct, throttle_pct};
