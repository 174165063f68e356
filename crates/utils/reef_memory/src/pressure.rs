//! How much RAM is the host using, and how worried should we be?

/// Memory pressure levels, in increasing order of severity.
///
/// `High` is logged; `Extreme` and `Oom` make the cache housekeeper drop
/// every shard on every mountpath instead of scanning.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Pressure {
    Low,
    Moderate,
    High,
    Extreme,
    Oom,
}

impl std::fmt::Display for Pressure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Low => "pressure-low",
            Self::Moderate => "pressure-moderate",
            Self::High => "pressure-high",
            Self::Extreme => "pressure-extreme",
            Self::Oom => "oom",
        };
        f.write_str(s)
    }
}

/// A snapshot of memory use, both for this process and the host.
#[derive(Clone, Copy, Debug, Default)]
pub struct MemoryUse {
    /// Resident set size of this process, in bytes.
    pub resident: Option<u64>,

    /// Used memory on the host, in bytes.
    pub used: Option<u64>,

    /// Total installed memory, in bytes.
    pub total: Option<u64>,
}

impl MemoryUse {
    #[cfg(not(target_arch = "wasm32"))]
    pub fn capture() -> Self {
        let resident = memory_stats::memory_stats().map(|usage| usage.physical_mem as u64);

        let mut sys = sysinfo::System::new();
        sys.refresh_memory();
        let total = sys.total_memory();
        let used = sys.used_memory();

        Self {
            resident,
            used: (used > 0).then_some(used),
            total: (total > 0).then_some(total),
        }
    }
}

/// Classify host-wide memory use.
///
/// Unknown totals read as [`Pressure::Low`]: a probe failure must not
/// cause cache drops.
pub fn pressure_of(mem: MemoryUse) -> Pressure {
    let (Some(used), Some(total)) = (mem.used, mem.total) else {
        return Pressure::Low;
    };
    if total == 0 {
        return Pressure::Low;
    }
    let frac = used as f64 / total as f64;
    if frac >= 0.97 {
        Pressure::Oom
    } else if frac >= 0.90 {
        Pressure::Extreme
    } else if frac >= 0.80 {
        Pressure::High
    } else if frac >= 0.65 {
        Pressure::Moderate
    } else {
        Pressure::Low
    }
}

/// Capture and classify in one step.
#[cfg(not(target_arch = "wasm32"))]
pub fn pressure() -> Pressure {
    pressure_of(MemoryUse::capture())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mem(used: u64, total: u64) -> MemoryUse {
        MemoryUse {
            resident: None,
            used: Some(used),
            total: Some(total),
        }
    }

    #[test]
    fn classification() {
        assert_eq!(pressure_of(mem(10, 100)), Pressure::Low);
        assert_eq!(pressure_of(mem(70, 100)), Pressure::Moderate);
        assert_eq!(pressure_of(mem(85, 100)), Pressure::High);
        assert_eq!(pressure_of(mem(92, 100)), Pressure::Extreme);
        assert_eq!(pressure_of(mem(99, 100)), Pressure::Oom);
    }

    #[test]
    fn unknown_total_is_low() {
        assert_eq!(pressure_of(MemoryUse::default()), Pressure::Low);
    }

    #[test]
    fn ordering() {
        assert!(Pressure::Oom > Pressure::Extreme);
        assert!(Pressure::Extreme > Pressure::High);
    }
}
