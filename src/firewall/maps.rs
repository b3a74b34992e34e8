use std::net::Ipv4Addr;

use aya::maps::{HashMap as BpfHashMap, MapData, PerCpuArray, PerCpuValues};
use aya::util::nr_cpus;

use crate::error::Result;

/// Slot indices in the `stats` array. Must match the classifier.
pub const STAT_TOTAL: u32 = 0;
pub const STAT_BLOCKED: u32 = 1;

/// Map keys are the address bytes exactly as they appear in the IP header,
/// so the classifier can compare raw header fields without a swap.
fn key(addr: Ipv4Addr) -> u32 {
    u32::from(addr).to_be()
}

/// Userspace handle to the kernel block set. The only path through which
/// user code mutates the map; converts byte order at this boundary.
pub struct BlockSet {
    map: BpfHashMap<MapData, u32, u64>,
}

impl BlockSet {
    pub(super) fn new(map: BpfHashMap<MapData, u32, u64>) -> Self {
        Self { map }
    }

    /// Insert with a zeroed drop counter. Insert-if-absent: re-inserting an
    /// address the kernel is already counting must not reset its counter.
    /// Returns whether the address was newly added.
    pub fn insert(&mut self, addr: Ipv4Addr) -> Result<bool> {
        let k = key(addr);
        if self.map.get(&k, 0).is_ok() {
            return Ok(false);
        }
        self.map.insert(k, 0, 0)?;
        Ok(true)
    }

    /// Snapshot of the drop counter for one address; 0 when absent.
    pub fn drops(&self, addr: Ipv4Addr) -> u64 {
        self.map.get(&key(addr), 0).unwrap_or(0)
    }
}

/// Userspace handle to the kernel allow set.
pub struct AllowSet {
    map: BpfHashMap<MapData, u32, u8>,
}

impl AllowSet {
    pub(super) fn new(map: BpfHashMap<MapData, u32, u8>) -> Self {
        Self { map }
    }

    /// Insert-or-overwrite; the value is only a presence marker.
    pub fn insert(&mut self, addr: Ipv4Addr) -> Result<()> {
        self.map.insert(key(addr), 1, 0)?;
        Ok(())
    }
}

/// Userspace view of the aggregate counters. The kernel bumps per-CPU
/// slots; reads sum across CPUs, so observed values only ever grow.
pub struct StatsCounters {
    map: PerCpuArray<MapData, u64>,
}

impl StatsCounters {
    pub(super) fn new(map: PerCpuArray<MapData, u64>) -> Self {
        Self { map }
    }

    /// Zero both counters on every CPU.
    pub fn reset(&mut self) -> Result<()> {
        let cpus = nr_cpus()?;
        for index in [STAT_TOTAL, STAT_BLOCKED] {
            let zeros = PerCpuValues::try_from(vec![0u64; cpus])?;
            self.map.set(index, zeros, 0)?;
        }
        Ok(())
    }

    pub fn total(&self) -> Result<u64> {
        self.read(STAT_TOTAL)
    }

    pub fn blocked(&self) -> Result<u64> {
        self.read(STAT_BLOCKED)
    }

    fn read(&self, index: u32) -> Result<u64> {
        let values = self.map.get(&index, 0)?;
        Ok(values.iter().sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_network_byte_order() {
        // 10.0.0.1 on the wire is the bytes [10, 0, 0, 1]; the map key is
        // those bytes reinterpreted as a native-endian u32.
        let k = key(Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(k.to_ne_bytes(), [10, 0, 0, 1]);
    }

    #[test]
    fn key_round_trips_octets() {
        let addr = Ipv4Addr::new(192, 168, 1, 254);
        assert_eq!(key(addr).to_ne_bytes(), addr.octets());
    }
}
