// src/utils/system.rs: System functions

use log::warn;
use sysinfo::System;


/// Number of physical cores, falling back to logical cores, then 1.
pub fn detect_cores() -> usize {
    System::physical_core_count()
        .or_else(|| std::thread::available_parallelism().ok().map(|n| n.get()))
        .unwrap_or(1)
}


/// Number of lanes joined at once. The requested count is honoured; a warning
/// is logged when it exceeds the host's physical cores.
///
/// # Arguments
///
/// * `requested` - Thread hint from the command line.
/// * `cores` - Physical cores of the host.
///
/// # Returns
///
/// Permit count for the lane semaphore, at least 1.
pub fn lane_workers(requested: u32, cores: usize) -> usize {
    let requested = requested.max(1) as usize;
    if requested > cores {
        warn!(
            "Requested {} threads but only {} physical cores detected; joins may contend for CPU",
            requested, cores
        );
    }
    requested
}
