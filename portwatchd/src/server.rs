//! IPC server: a unix stream socket speaking newline-delimited JSON
//! request/response objects. One acceptor task, one task per client.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Local};
use log::{error, info, warn};
use parking_lot::RwLock;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;

use portwatch_api::constants::{SOCK_DIR_MODE, SOCK_MODE};
use portwatch_api::protocol::{
    self as proto, AckResult, HistoricalParams, HistoricalStats, ListPortsResult, PortInfo,
    PortParams, PortSample, Request, Response, StatusResult,
};

use crate::aggregator::Aggregator;
use crate::collector::SharedSnapshot;
use crate::loader::PortFilter;
use crate::storage::StatsStore;

/// Live monitored-port list, shared between the daemon and the handlers that
/// mutate (`add_port`/`remove_port`) or read (`get_status`/`list_ports`) it.
pub(crate) struct DaemonState {
    pub ports: Vec<PortInfo>,
}

/// Fixed facts reported by `get_status`.
#[derive(Clone)]
pub(crate) struct DaemonInfo {
    pub data_dir: String,
    pub retention_days: u32,
    pub socket_path: String,
    pub started_at: DateTime<Local>,
}

pub(crate) struct IpcServer {
    socket_path: PathBuf,
    filter: Arc<dyn PortFilter>,
    snapshot: SharedSnapshot,
    store: Arc<dyn StatsStore>,
    aggregator: Aggregator,
    state: Arc<RwLock<DaemonState>>,
    info: DaemonInfo,
}

impl IpcServer {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        socket_path: PathBuf,
        filter: Arc<dyn PortFilter>,
        snapshot: SharedSnapshot,
        store: Arc<dyn StatsStore>,
        aggregator: Aggregator,
        state: Arc<RwLock<DaemonState>>,
        info: DaemonInfo,
    ) -> Self {
        Self {
            socket_path,
            filter,
            snapshot,
            store,
            aggregator,
            state,
            info,
        }
    }

    /// Bind the socket (replacing any stale file) and accept until shutdown.
    /// The socket file is removed again on the way out.
    pub(crate) async fn serve(
        self: Arc<Self>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> anyhow::Result<()> {
        if let Some(dir) = self.socket_path.parent() {
            fs::create_dir_all(dir)?;
            if let Err(e) = fs::set_permissions(dir, fs::Permissions::from_mode(SOCK_DIR_MODE)) {
                warn!("unable to set permissions on {}: {e}", dir.display());
            }
        }
        if self.socket_path.exists() {
            fs::remove_file(&self.socket_path)?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;
        // unprivileged clients must be able to connect
        if let Err(e) =
            fs::set_permissions(&self.socket_path, fs::Permissions::from_mode(SOCK_MODE))
        {
            warn!(
                "unable to set permissions on {}: {e}",
                self.socket_path.display()
            );
        }
        info!("IPC server listening on {}", self.socket_path.display());

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let server = self.clone();
                        let client_shutdown = shutdown.resubscribe();
                        tokio::spawn(async move {
                            server.handle_client(stream, client_shutdown).await;
                        });
                    }
                    Err(e) => error!("accept error: {e}"),
                }
            }
        }

        drop(listener);
        let _ = fs::remove_file(&self.socket_path);
        info!("IPC server stopped");
        Ok(())
    }

    /// Read requests line by line until the client disconnects or the daemon
    /// shuts down. A malformed line gets an error reply, not a hangup.
    async fn handle_client(&self, stream: UnixStream, mut shutdown: broadcast::Receiver<()>) {
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        loop {
            let line = tokio::select! {
                _ = shutdown.recv() => return,
                line = lines.next_line() => match line {
                    Ok(Some(line)) => line,
                    _ => return,
                },
            };

            let response = match serde_json::from_str::<Request>(&line) {
                Ok(request) => self.handle_request(request),
                Err(_) => Response::failure(0, proto::ERR_INVALID_REQUEST, "invalid JSON"),
            };

            let mut payload = match serde_json::to_vec(&response) {
                Ok(payload) => payload,
                Err(e) => {
                    error!("failed to encode response: {e}");
                    return;
                }
            };
            payload.push(b'\n');
            if write_half.write_all(&payload).await.is_err() {
                return;
            }
        }
    }

    fn handle_request(&self, req: Request) -> Response {
        match req.method.as_str() {
            proto::METHOD_GET_REALTIME_STATS => self.get_realtime_stats(req),
            proto::METHOD_GET_HISTORICAL_STATS => self.get_historical_stats(req),
            proto::METHOD_GET_STATUS => self.get_status(req),
            proto::METHOD_ADD_PORT => self.add_port(req),
            proto::METHOD_REMOVE_PORT => self.remove_port(req),
            proto::METHOD_LIST_PORTS => self.list_ports(req),
            proto::METHOD_FLUSH_STATS => self.flush_stats(req),
            _ => Response::failure(req.id, proto::ERR_METHOD_NOT_FOUND, "method not found"),
        }
    }

    fn get_realtime_stats(&self, req: Request) -> Response {
        let params: PortParams = match parse_params(req.id, req.params) {
            Ok(params) => params,
            Err(resp) => return resp,
        };

        let sample = self
            .snapshot
            .read()
            .get(&params.port)
            .copied()
            .unwrap_or(PortSample {
                port: params.port,
                ..PortSample::default()
            });

        success(req.id, &sample)
    }

    fn get_historical_stats(&self, req: Request) -> Response {
        let params: HistoricalParams = match parse_params(req.id, req.params) {
            Ok(params) => params,
            Err(resp) => return resp,
        };

        let summary =
            match self
                .store
                .period_summary(params.port, &params.start_date, &params.end_date)
            {
                Ok(summary) => summary,
                Err(e) => return Response::failure(req.id, proto::ERR_INTERNAL, e.to_string()),
            };

        let result = HistoricalStats {
            port: params.port,
            start_date: params.start_date,
            end_date: params.end_date,
            total_rx: summary.total_rx,
            total_tx: summary.total_tx,
            total_bytes: summary.total_rx + summary.total_tx,
            peak_rx_rate: summary.peak_rx_rate,
            peak_tx_rate: summary.peak_tx_rate,
            daily_stats: summary.days,
        };

        success(req.id, &result)
    }

    fn get_status(&self, req: Request) -> Response {
        let state = self.state.read();
        let uptime = Local::now().signed_duration_since(self.info.started_at);

        let result = StatusResult {
            running: true,
            uptime: format_uptime(uptime),
            start_time: self.info.started_at.to_rfc3339(),
            monitored_ports: state.ports.iter().map(|p| p.port).collect(),
            port_infos: state.ports.clone(),
            data_dir: self.info.data_dir.clone(),
            retention_days: self.info.retention_days,
            socket_path: self.info.socket_path.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        };

        success(req.id, &result)
    }

    fn add_port(&self, req: Request) -> Response {
        let params: PortParams = match parse_params(req.id, req.params) {
            Ok(params) => params,
            Err(resp) => return resp,
        };

        if let Err(e) = self.filter.add_port(params.port) {
            return Response::failure(req.id, proto::ERR_INTERNAL, e.to_string());
        }

        let mut state = self.state.write();
        if !state.ports.iter().any(|p| p.port == params.port) {
            state.ports.push(PortInfo {
                port: params.port,
                description: String::new(),
            });
        }

        success(
            req.id,
            &AckResult {
                success: true,
                message: format!("port {} added", params.port),
            },
        )
    }

    fn remove_port(&self, req: Request) -> Response {
        let params: PortParams = match parse_params(req.id, req.params) {
            Ok(params) => params,
            Err(resp) => return resp,
        };

        if let Err(e) = self.filter.remove_port(params.port) {
            return Response::failure(req.id, proto::ERR_INTERNAL, e.to_string());
        }

        self.state.write().ports.retain(|p| p.port != params.port);

        success(
            req.id,
            &AckResult {
                success: true,
                message: format!("port {} removed", params.port),
            },
        )
    }

    fn list_ports(&self, req: Request) -> Response {
        let ports = self.state.read().ports.iter().map(|p| p.port).collect();
        success(req.id, &ListPortsResult { ports })
    }

    fn flush_stats(&self, req: Request) -> Response {
        self.aggregator.flush();
        success(
            req.id,
            &AckResult {
                success: true,
                message: "stats flushed".to_string(),
            },
        )
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(id: i64, params: Value) -> Result<T, Response> {
    serde_json::from_value(params)
        .map_err(|_| Response::failure(id, proto::ERR_INVALID_PARAMS, "invalid params"))
}

fn success<T: serde::Serialize>(id: i64, result: &T) -> Response {
    match serde_json::to_value(result) {
        Ok(value) => Response::success(id, value),
        Err(e) => Response::failure(id, proto::ERR_INTERNAL, e.to_string()),
    }
}

fn format_uptime(d: chrono::Duration) -> String {
    let secs = d.num_seconds().max(0);
    let days = secs / 86400;
    let hours = (secs % 86400) / 3600;
    let mins = (secs % 3600) / 60;
    let secs = secs % 60;
    if days > 0 {
        format!("{days}d {hours:02}:{mins:02}:{secs:02}")
    } else {
        format!("{hours:02}:{mins:02}:{secs:02}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    use parking_lot::Mutex;
    use serde_json::json;

    use crate::errors::LoaderError;
    use crate::storage::memory::MemoryStore;

    /// Target-port set double that records mutations.
    #[derive(Default)]
    struct StubFilter {
        ports: Mutex<Vec<u16>>,
    }

    impl PortFilter for StubFilter {
        fn add_port(&self, port: u16) -> Result<(), LoaderError> {
            self.ports.lock().push(port);
            Ok(())
        }

        fn remove_port(&self, port: u16) -> Result<(), LoaderError> {
            self.ports.lock().retain(|p| *p != port);
            Ok(())
        }
    }

    struct Harness {
        reader: tokio::io::Lines<BufReader<tokio::net::unix::OwnedReadHalf>>,
        writer: tokio::net::unix::OwnedWriteHalf,
        shutdown: broadcast::Sender<()>,
        socket_path: PathBuf,
        _dir: tempfile::TempDir,
    }

    impl Harness {
        async fn call(&mut self, request: Value) -> Value {
            let mut line = request.to_string();
            line.push('\n');
            self.writer.write_all(line.as_bytes()).await.unwrap();
            let reply = self.reader.next_line().await.unwrap().unwrap();
            serde_json::from_str(&reply).unwrap()
        }
    }

    async fn start_server() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("portwatch.sock");

        let snapshot: SharedSnapshot = Arc::new(RwLock::new(HashMap::new()));
        let store = Arc::new(MemoryStore::default()) as Arc<dyn StatsStore>;
        let aggregator = Aggregator::new(snapshot.clone(), store.clone(), Duration::from_secs(60));
        let state = Arc::new(RwLock::new(DaemonState { ports: Vec::new() }));
        let info = DaemonInfo {
            data_dir: "/tmp".to_string(),
            retention_days: 180,
            socket_path: socket_path.display().to_string(),
            started_at: Local::now(),
        };

        let server = Arc::new(IpcServer::new(
            socket_path.clone(),
            Arc::new(StubFilter::default()),
            snapshot,
            store,
            aggregator,
            state,
            info,
        ));

        let (shutdown, _) = broadcast::channel(1);
        tokio::spawn(server.serve(shutdown.subscribe()));

        // wait for the socket file to appear
        for _ in 0..100 {
            if socket_path.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let stream = UnixStream::connect(&socket_path).await.unwrap();
        let (read_half, writer) = stream.into_split();
        Harness {
            reader: BufReader::new(read_half).lines(),
            writer,
            shutdown,
            socket_path,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn add_list_remove_round_trip() {
        let mut h = start_server().await;

        let reply = h
            .call(json!({"method": "add_port", "params": {"port": 8080}, "id": 1}))
            .await;
        assert_eq!(reply["result"]["success"], json!(true));
        assert_eq!(reply["id"], json!(1));

        let reply = h.call(json!({"method": "list_ports", "id": 2})).await;
        assert_eq!(reply["result"]["ports"], json!([8080]));

        let reply = h
            .call(json!({"method": "remove_port", "params": {"port": 8080}, "id": 3}))
            .await;
        assert_eq!(reply["result"]["success"], json!(true));

        let reply = h.call(json!({"method": "list_ports", "id": 4})).await;
        assert_eq!(reply["result"]["ports"], json!([]));
    }

    #[tokio::test]
    async fn removing_an_absent_port_succeeds() {
        let mut h = start_server().await;
        let reply = h
            .call(json!({"method": "remove_port", "params": {"port": 9999}, "id": 1}))
            .await;
        assert_eq!(reply["result"]["success"], json!(true));
        assert!(reply.get("error").is_none());
    }

    #[tokio::test]
    async fn unknown_port_yields_zero_valued_snapshot() {
        let mut h = start_server().await;
        let reply = h
            .call(json!({"method": "get_realtime_stats", "params": {"port": 4444}, "id": 7}))
            .await;
        assert_eq!(reply["result"]["port"], json!(4444));
        assert_eq!(reply["result"]["rx_bytes"], json!(0));
        assert_eq!(reply["result"]["rx_rate"], json!(0.0));
    }

    #[tokio::test]
    async fn protocol_errors_keep_the_connection_alive() {
        let mut h = start_server().await;

        let reply = h.call(json!({"method": "no_such_method", "id": 1})).await;
        assert_eq!(reply["error"]["code"], json!(proto::ERR_METHOD_NOT_FOUND));

        let reply = h
            .call(json!({"method": "add_port", "params": {"port": "nope"}, "id": 2}))
            .await;
        assert_eq!(reply["error"]["code"], json!(proto::ERR_INVALID_PARAMS));

        // malformed JSON line
        h.writer.write_all(b"{not json\n").await.unwrap();
        let reply: Value =
            serde_json::from_str(&h.reader.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(reply["error"]["code"], json!(proto::ERR_INVALID_REQUEST));

        // the connection still works afterwards
        let reply = h.call(json!({"method": "get_status", "id": 3})).await;
        assert_eq!(reply["result"]["running"], json!(true));
        assert_eq!(reply["result"]["retention_days"], json!(180));
    }

    #[tokio::test]
    async fn flush_and_historical_queries_reach_the_store() {
        let mut h = start_server().await;

        let reply = h.call(json!({"method": "flush_stats", "id": 1})).await;
        assert_eq!(reply["result"]["success"], json!(true));

        let reply = h
            .call(json!({
                "method": "get_historical_stats",
                "params": {"port": 443, "start_date": "2025-01-01", "end_date": "2025-01-31"},
                "id": 2
            }))
            .await;
        assert_eq!(reply["result"]["total_bytes"], json!(0));
        assert_eq!(reply["result"]["start_date"], json!("2025-01-01"));
    }

    #[tokio::test]
    async fn shutdown_removes_the_socket_file() {
        let h = start_server().await;
        assert!(h.socket_path.exists());

        h.shutdown.send(()).unwrap();
        for _ in 0..100 {
            if !h.socket_path.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!h.socket_path.exists());
    }
}
