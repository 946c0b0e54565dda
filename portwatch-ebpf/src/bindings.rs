//! Minimal views of the kernel socket structs read by the probes.
//!
//! Only the head of `struct sock_common` is used. The address and port words
//! sit at the front of `struct sock` at fixed offsets on all supported
//! kernels, so a full vmlinux binding is not required.

#![allow(non_camel_case_types)]

#[repr(C)]
pub struct sock_common {
    /// Peer IPv4 address, network byte order.
    pub skc_daddr: u32,
    /// Bound local IPv4 address, network byte order.
    pub skc_rcv_saddr: u32,
    pub skc_hash: u32,
    /// Peer port, network byte order.
    pub skc_dport: u16,
    /// Local port, host byte order.
    pub skc_num: u16,
}

#[repr(C)]
pub struct sock {
    pub __sk_common: sock_common,
}
