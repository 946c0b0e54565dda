//! Loading and attaching the kernel probe program, and userspace access to
//! its maps.

use std::collections::HashMap;

use aya::maps::{HashMap as KernelMap, MapData, MapError};
use aya::programs::KProbe;
use aya::{include_bytes_aligned, Bpf};
use log::info;
use parking_lot::Mutex;

use portwatch_common::{ConnKey, ConnStats, PortStats};

use crate::collector::StatsSource;
use crate::errors::LoaderError;

/// Mutation surface of the kernel target-port set, as the IPC server sees it.
pub(crate) trait PortFilter: Send + Sync {
    fn add_port(&self, port: u16) -> Result<(), LoaderError>;
    /// Removing an absent port is not an error.
    fn remove_port(&self, port: u16) -> Result<(), LoaderError>;
}

/// Owner of the attached probes and their maps. The programs stay attached
/// for as long as this value lives; dropping it detaches the kprobes and
/// releases the maps, so kernel counters never outlive the daemon.
pub(crate) struct Loader {
    inner: Mutex<Maps>,
}

struct Maps {
    _bpf: Bpf,
    target_ports: KernelMap<MapData, u16, u8>,
    port_stats: KernelMap<MapData, u16, PortStats>,
    conn_stats: KernelMap<MapData, ConnKey, ConnStats>,
}

impl Loader {
    /// Load the embedded eBPF object and attach kprobes to tcp_sendmsg and
    /// tcp_cleanup_rbuf.
    pub(crate) fn load() -> Result<Self, LoaderError> {
        #[cfg(debug_assertions)]
        let mut bpf = Bpf::load(include_bytes_aligned!(
            "../../portwatch-ebpf/target/bpfel-unknown-none/debug/portwatch"
        ))?;
        #[cfg(not(debug_assertions))]
        let mut bpf = Bpf::load(include_bytes_aligned!(
            "../../portwatch-ebpf/target/bpfel-unknown-none/release/portwatch"
        ))?;

        for name in ["tcp_sendmsg", "tcp_cleanup_rbuf"] {
            let program: &mut KProbe = bpf
                .program_mut(name)
                .ok_or(LoaderError::MissingProgram(name))?
                .try_into()?;
            program.load()?;
            program.attach(name, 0)?;
            info!("attached kprobe to {name}");
        }

        let target_ports = bpf
            .take_map("TARGET_PORTS")
            .ok_or(LoaderError::MissingMap("TARGET_PORTS"))?
            .try_into()?;
        let port_stats = bpf
            .take_map("PORT_STATS")
            .ok_or(LoaderError::MissingMap("PORT_STATS"))?
            .try_into()?;
        let conn_stats = bpf
            .take_map("CONN_STATS")
            .ok_or(LoaderError::MissingMap("CONN_STATS"))?
            .try_into()?;

        info!("eBPF programs loaded");

        Ok(Self {
            inner: Mutex::new(Maps {
                _bpf: bpf,
                target_ports,
                port_stats,
                conn_stats,
            }),
        })
    }

    /// Enable observation of a port in both directions.
    pub(crate) fn add_port(&self, port: u16) -> Result<(), LoaderError> {
        let mut inner = self.inner.lock();
        inner.target_ports.insert(port, 1u8, 0)?;
        info!("added port {port} to monitoring");
        Ok(())
    }

    /// Stop observing a port. Absent keys are ignored.
    pub(crate) fn remove_port(&self, port: u16) -> Result<(), LoaderError> {
        let mut inner = self.inner.lock();
        match inner.target_ports.remove(&port) {
            Ok(()) => {
                info!("removed port {port} from monitoring");
                Ok(())
            }
            Err(MapError::KeyNotFound) => Ok(()),
            Err(MapError::SyscallError(e))
                if std::error::Error::source(&e)
                    .and_then(|s| s.downcast_ref::<std::io::Error>())
                    .and_then(std::io::Error::raw_os_error)
                    == Some(libc::ENOENT) =>
            {
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl PortFilter for Loader {
    fn add_port(&self, port: u16) -> Result<(), LoaderError> {
        Loader::add_port(self, port)
    }

    fn remove_port(&self, port: u16) -> Result<(), LoaderError> {
        Loader::remove_port(self, port)
    }
}

impl StatsSource for Loader {
    fn port_totals(&self) -> Result<HashMap<u16, PortStats>, LoaderError> {
        let inner = self.inner.lock();
        let mut totals = HashMap::new();
        for entry in inner.port_stats.iter() {
            let (port, stats) = entry?;
            totals.insert(port, stats);
        }
        Ok(totals)
    }

    /// Count tracked connections per monitored port. A connection between two
    /// monitored ports counts once for each side.
    fn active_connections(&self) -> Result<HashMap<u16, u64>, LoaderError> {
        let inner = self.inner.lock();
        let mut counts = HashMap::new();
        for entry in inner.conn_stats.iter() {
            let (key, _) = entry?;
            if matches!(inner.target_ports.get(&key.sport, 0), Ok(1)) {
                *counts.entry(key.sport).or_insert(0) += 1;
            }
            if matches!(inner.target_ports.get(&key.dport, 0), Ok(1)) {
                *counts.entry(key.dport).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }
}
