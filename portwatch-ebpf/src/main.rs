//! portwatch eBPF kernel program: kprobe-based per-port TCP traffic counters.
//!
//! Attaches kprobes to tcp_sendmsg and tcp_cleanup_rbuf. The rbuf hook is
//! preferred over tcp_recvmsg entry because it fires once per consumed
//! segment, which tracks bytes actually delivered to userspace.
//!
//! The program is read-only: it never modifies kernel state, packet content,
//! or socket behavior.

#![no_std]
#![no_main]

mod bindings;

use core::sync::atomic::{AtomicU64, Ordering};

use aya_ebpf::{
    bindings::BPF_NOEXIST,
    helpers::{bpf_ktime_get_ns, bpf_probe_read_kernel},
    macros::{kprobe, map},
    maps::HashMap,
    programs::ProbeContext,
};

use bindings::{sock, sock_common};
use portwatch_common::{ConnKey, ConnStats, PortStats, MAX_CONNECTIONS, MAX_TARGET_PORTS};

/// Ports under observation: port → enabled flag. Seeded and mutated only from
/// userspace; the probes never write to it.
#[map(name = "TARGET_PORTS")]
static TARGET_PORTS: HashMap<u16, u8> = HashMap::with_max_entries(MAX_TARGET_PORTS, 0);

/// Cumulative per-port counters. Rows are created lazily on first observation
/// and cleared only by an explicit userspace reset.
#[map(name = "PORT_STATS")]
static PORT_STATS: HashMap<u16, PortStats> = HashMap::with_max_entries(MAX_TARGET_PORTS, 0);

/// Cumulative per-connection counters keyed by 4-tuple. Never evicted here;
/// bounded by map capacity, at which point inserts fail silently.
#[map(name = "CONN_STATS")]
static CONN_STATS: HashMap<ConnKey, ConnStats> = HashMap::with_max_entries(MAX_CONNECTIONS, 0);

/// kprobe on tcp_sendmsg, crediting outbound bytes.
///
/// Signature: int tcp_sendmsg(struct sock *sk, struct msghdr *msg, size_t size)
#[kprobe]
pub fn tcp_sendmsg(ctx: ProbeContext) -> u32 {
    match try_tcp_sendmsg(&ctx) {
        Ok(()) => 0,
        Err(_) => 0, // never disrupt the probed function
    }
}

fn try_tcp_sendmsg(ctx: &ProbeContext) -> Result<(), i64> {
    let sk: *const sock = ctx.arg(0).ok_or(1i64)?;
    let size: usize = ctx.arg(2).ok_or(1i64)?;
    if sk.is_null() || size == 0 {
        return Ok(());
    }
    record_traffic(sk, size as u64, true)
}

/// kprobe on tcp_cleanup_rbuf, crediting inbound bytes.
///
/// Signature: void tcp_cleanup_rbuf(struct sock *sk, int copied)
#[kprobe]
pub fn tcp_cleanup_rbuf(ctx: ProbeContext) -> u32 {
    match try_tcp_cleanup_rbuf(&ctx) {
        Ok(()) => 0,
        Err(_) => 0,
    }
}

fn try_tcp_cleanup_rbuf(ctx: &ProbeContext) -> Result<(), i64> {
    let sk: *const sock = ctx.arg(0).ok_or(1i64)?;
    let copied: i32 = ctx.arg(1).ok_or(1i64)?;
    if sk.is_null() || copied <= 0 {
        return Ok(());
    }
    record_traffic(sk, copied as u64, false)
}

#[inline(always)]
fn is_target_port(port: u16) -> bool {
    unsafe { TARGET_PORTS.get(&port) }.map(|v| *v == 1).unwrap_or(false)
}

/// Get-or-create the stats row for a port. The insert races with other CPUs;
/// BPF_NOEXIST makes the loser's insert fail and both end up on the same row.
#[inline(always)]
fn port_stats_entry(port: u16) -> Option<*mut PortStats> {
    unsafe {
        if let Some(ps) = PORT_STATS.get_ptr_mut(&port) {
            return Some(ps);
        }
        let zero = PortStats::default();
        let _ = PORT_STATS.insert(&port, &zero, BPF_NOEXIST as u64);
        PORT_STATS.get_ptr_mut(&port)
    }
}

#[inline(always)]
unsafe fn atomic_add(counter: *mut u64, val: u64) {
    (*(counter as *const AtomicU64)).fetch_add(val, Ordering::Relaxed);
}

/// Credit one send or receive against the monitored port, and update the
/// per-connection row for the 4-tuple.
///
/// Selection: the local port wins if monitored, else the peer port; an event
/// touching two monitored ports is credited once, never twice.
#[inline(always)]
fn record_traffic(sk: *const sock, bytes: u64, tx: bool) -> Result<(), i64> {
    let sk_common =
        unsafe { bpf_probe_read_kernel(&(*sk).__sk_common as *const sock_common)? };

    let sport = sk_common.skc_num;
    let dport = u16::from_be(sk_common.skc_dport);

    let target = if is_target_port(sport) {
        sport
    } else if is_target_port(dport) {
        dport
    } else {
        return Ok(());
    };

    let ps = port_stats_entry(target);
    if let Some(ps) = ps {
        unsafe {
            if tx {
                atomic_add(&mut (*ps).tx_bytes, bytes);
                atomic_add(&mut (*ps).tx_packets, 1);
            } else {
                atomic_add(&mut (*ps).rx_bytes, bytes);
                atomic_add(&mut (*ps).rx_packets, 1);
            }
        }
    }

    let key = ConnKey {
        saddr: sk_common.skc_rcv_saddr,
        daddr: sk_common.skc_daddr,
        sport,
        dport,
    };
    let now = unsafe { bpf_ktime_get_ns() };

    match unsafe { CONN_STATS.get_ptr_mut(&key) } {
        Some(cs) => unsafe {
            if tx {
                atomic_add(&mut (*cs).tx_bytes, bytes);
            } else {
                atomic_add(&mut (*cs).rx_bytes, bytes);
            }
            (*cs).last_update_ns = now;
        },
        None => {
            let cs = ConnStats {
                rx_bytes: if tx { 0 } else { bytes },
                tx_bytes: if tx { bytes } else { 0 },
                start_ns: now,
                last_update_ns: now,
            };
            // Map-full insert failure is silent; port counters already moved.
            if unsafe { CONN_STATS.insert(&key, &cs, 0) }.is_ok() {
                if let Some(ps) = ps {
                    unsafe { atomic_add(&mut (*ps).connections, 1) };
                }
            }
        }
    }

    Ok(())
}

#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    unsafe { core::hint::unreachable_unchecked() }
}
