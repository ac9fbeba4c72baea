//! Virtual address allocation
//!
//! Allocation is a pure function of the range and the addresses already in
//! use. Nothing is reserved here: an address only counts as taken once its
//! provisioning record is written, so callers must serialize
//! allocate-then-write sequences.

use crate::types::NetworkRange;
use std::collections::HashSet;
use std::net::Ipv4Addr;

/// Lowest free host address in `range`, skipping the reserved tunnel address.
///
/// Returns `None` when every allocatable address is in `used`.
pub fn allocate(range: &NetworkRange, used: &HashSet<Ipv4Addr>) -> Option<Ipv4Addr> {
    range.hosts().skip(1).find(|addr| !used.contains(addr))
}

/// Number of addresses still free in `range`
pub fn free_count(range: &NetworkRange, used: &HashSet<Ipv4Addr>) -> usize {
    range.hosts().skip(1).filter(|addr| !used.contains(addr)).count()
}
