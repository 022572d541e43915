//! Outbound RPC client used for peer-to-peer calls.
//!
//! One connection per call, newline-delimited JSON framing, a shared
//! monotonic request id, and an overall deadline per call.

use anyhow::{bail, Context, Result};
use etb_core::wire::{Method, Request, Response, ResponseData};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

static REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Call a node and wait for its response, within `deadline`.
pub async fn call(host: &str, port: u16, method: Method, deadline: Duration) -> Result<ResponseData> {
    tokio::time::timeout(deadline, call_inner(host, port, method))
        .await
        .map_err(|_| anyhow::anyhow!("call to {}:{} timed out", host, port))?
}

async fn call_inner(host: &str, port: u16, method: Method) -> Result<ResponseData> {
    let stream = TcpStream::connect((host, port))
        .await
        .with_context(|| format!("failed to connect to {}:{}", host, port))?;
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    let id = REQUEST_ID.fetch_add(1, Ordering::SeqCst);
    let request = Request { id, method };
    let request_json = serde_json::to_string(&request)? + "\n";
    writer
        .write_all(request_json.as_bytes())
        .await
        .context("failed to send request")?;

    let mut line = String::new();
    let n = reader
        .read_line(&mut line)
        .await
        .context("failed to read response")?;
    if n == 0 {
        bail!("connection closed before response");
    }
    let response: Response = serde_json::from_str(&line).context("failed to parse response")?;
    if response.id != id {
        bail!("response id mismatch");
    }
    response.result.map_err(|e| anyhow::anyhow!("rpc fault: {}", e))
}
