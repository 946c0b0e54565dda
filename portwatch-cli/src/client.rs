//! Typed IPC client: one request per line, one response per line.

use std::path::PathBuf;

use anyhow::{anyhow, bail, Context};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;

use portwatch_api::constants::DEFAULT_SOCKET_PATH;
use portwatch_api::protocol::{
    self as proto, AckResult, HistoricalParams, HistoricalStats, ListPortsResult, PortParams,
    PortSample, Request, Response, StatusResult,
};

pub(crate) struct IpcClient {
    reader: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
    next_id: i64,
}

impl IpcClient {
    pub(crate) async fn connect(socket: Option<PathBuf>) -> anyhow::Result<Self> {
        let path = socket.unwrap_or_else(|| PathBuf::from(DEFAULT_SOCKET_PATH));
        let stream = UnixStream::connect(&path).await.with_context(|| {
            format!(
                "failed to connect to daemon at {} (is portwatchd running?)",
                path.display()
            )
        })?;
        let (read_half, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read_half).lines(),
            writer,
            next_id: 0,
        })
    }

    async fn call<R: DeserializeOwned>(&mut self, method: &str, params: Value) -> anyhow::Result<R> {
        self.next_id += 1;
        let request = Request {
            method: method.to_string(),
            params,
            id: self.next_id,
        };

        let mut line = serde_json::to_string(&request)?;
        line.push('\n');
        self.writer
            .write_all(line.as_bytes())
            .await
            .context("sending request")?;

        let reply = self
            .reader
            .next_line()
            .await
            .context("reading response")?
            .ok_or_else(|| anyhow!("connection closed by daemon"))?;
        let response: Response = serde_json::from_str(&reply).context("parsing response")?;

        if let Some(err) = response.error {
            bail!("rpc error {}: {}", err.code, err.message);
        }
        let result = response
            .result
            .ok_or_else(|| anyhow!("response carries neither result nor error"))?;
        Ok(serde_json::from_value(result)?)
    }

    pub(crate) async fn realtime_stats(&mut self, port: u16) -> anyhow::Result<PortSample> {
        let params = serde_json::to_value(PortParams { port })?;
        self.call(proto::METHOD_GET_REALTIME_STATS, params).await
    }

    pub(crate) async fn historical_stats(
        &mut self,
        port: u16,
        start_date: String,
        end_date: String,
    ) -> anyhow::Result<HistoricalStats> {
        let params = serde_json::to_value(HistoricalParams {
            port,
            start_date,
            end_date,
        })?;
        self.call(proto::METHOD_GET_HISTORICAL_STATS, params).await
    }

    pub(crate) async fn status(&mut self) -> anyhow::Result<StatusResult> {
        self.call(proto::METHOD_GET_STATUS, Value::Null).await
    }

    pub(crate) async fn add_port(&mut self, port: u16) -> anyhow::Result<()> {
        let params = serde_json::to_value(PortParams { port })?;
        let _: AckResult = self.call(proto::METHOD_ADD_PORT, params).await?;
        Ok(())
    }

    pub(crate) async fn remove_port(&mut self, port: u16) -> anyhow::Result<()> {
        let params = serde_json::to_value(PortParams { port })?;
        let _: AckResult = self.call(proto::METHOD_REMOVE_PORT, params).await?;
        Ok(())
    }

    pub(crate) async fn list_ports(&mut self) -> anyhow::Result<Vec<u16>> {
        let result: ListPortsResult = self.call(proto::METHOD_LIST_PORTS, Value::Null).await?;
        Ok(result.ports)
    }

    pub(crate) async fn flush_stats(&mut self) -> anyhow::Result<()> {
        let _: AckResult = self.call(proto::METHOD_FLUSH_STATS, Value::Null).await?;
        Ok(())
    }
}
