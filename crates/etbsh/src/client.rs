//! RPC client for talking to an etbd node.
//!
//! Persistent connection, newline-delimited JSON framing, connect retries
//! with exponential backoff so a freshly restarted daemon is not missed.

use anyhow::{bail, Context, Result};
use etb_core::wire::{Method, Request, Response, ResponseData};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{tcp::OwnedReadHalf, tcp::OwnedWriteHalf, TcpStream};
use tokio::time::sleep;

static REQUEST_ID: AtomicU64 = AtomicU64::new(1);

pub struct RpcClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl RpcClient {
    /// Connect with retries; the daemon may still be binding its socket.
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        let max_retries = 10;
        let mut retry_delay = Duration::from_millis(50);
        for attempt in 0..max_retries {
            match tokio::time::timeout(
                Duration::from_millis(500),
                TcpStream::connect((host, port)),
            )
            .await
            {
                Ok(Ok(stream)) => {
                    let (reader, writer) = stream.into_split();
                    return Ok(RpcClient {
                        reader: BufReader::new(reader),
                        writer,
                    });
                }
                Ok(Err(e)) if attempt == max_retries - 1 => {
                    return Err(e).with_context(|| {
                        format!("failed to connect to {}:{}. Is etbd running?", host, port)
                    });
                }
                _ => {
                    sleep(retry_delay).await;
                    retry_delay = (retry_delay * 2).min(Duration::from_millis(500));
                }
            }
        }
        bail!("failed to connect to {}:{}. Is etbd running?", host, port)
    }

    /// Send one request and wait for its response.
    pub async fn call(&mut self, method: Method) -> Result<ResponseData> {
        let id = REQUEST_ID.fetch_add(1, Ordering::SeqCst);
        let request = Request { id, method };
        let json = serde_json::to_string(&request)? + "\n";
        self.writer
            .write_all(json.as_bytes())
            .await
            .context("failed to send request")?;

        let mut line = String::new();
        let n = self
            .reader
            .read_line(&mut line)
            .await
            .context("failed to read response")?;
        if n == 0 {
            bail!("daemon closed the connection");
        }
        let response: Response =
            serde_json::from_str(&line).context("failed to parse response")?;
        if response.id != id {
            bail!("response id mismatch");
        }
        response
            .result
            .map_err(|e| anyhow::anyhow!("rpc fault: {}", e))
    }
}
