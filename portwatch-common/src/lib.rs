#![no_std]

/// Capacity of the target-port set and of the per-port stats map.
pub const MAX_TARGET_PORTS: u32 = 64;
/// Capacity of the per-connection stats map. Insertion past this bound fails
/// silently; port-level counters still advance.
pub const MAX_CONNECTIONS: u32 = 10240;

/// Cumulative per-port counters, kernel-resident. All fields only ever grow
/// (atomic fetch-add) until an explicit reset zeroes the row.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct PortStats {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub rx_packets: u64,
    pub tx_packets: u64,
    pub connections: u64,
}

#[cfg(feature = "user")]
unsafe impl aya::Pod for PortStats {}

/// Identity of a tracked TCP connection. Addresses are IPv4 in network byte
/// order as read from the socket; ports are host byte order.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[repr(C)]
pub struct ConnKey {
    pub saddr: u32,
    pub daddr: u32,
    pub sport: u16,
    pub dport: u16,
}

#[cfg(feature = "user")]
unsafe impl aya::Pod for ConnKey {}

/// Cumulative per-connection counters. `start_ns` is set on insert and never
/// modified; `last_update_ns` is monotonic per key.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct ConnStats {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub start_ns: u64,
    pub last_update_ns: u64,
}

#[cfg(feature = "user")]
unsafe impl aya::Pod for ConnStats {}
