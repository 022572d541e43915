//! The RPC server: the remote surface for clients and peers.
//!
//! One TCP listener; each connection gets a spawned handler reading
//! newline-delimited JSON requests. Per-goal problems never become RPC
//! faults - only transport-level and synchronous parse failures do.

use crate::node::Node;
use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use etb_core::wire::{Method, Request, Response, ResponseData, MAX_REQUEST_SIZE};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info, warn};

/// Bind and serve forever.
pub async fn run(node: Arc<Node>) -> Result<()> {
    let addr = format!("{}:{}", node.config.etb.host, node.config.etb.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("cannot bind {}", addr))?;
    info!("rpc server listening on {}", addr);
    serve(listener, node).await
}

/// Serve on an already-bound listener.
pub async fn serve(listener: TcpListener, node: Arc<Node>) -> Result<()> {
    loop {
        match listener.accept().await {
            Ok((stream, peer_addr)) => {
                let node = Arc::clone(&node);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, node).await {
                        warn!("connection from {} ended with error: {}", peer_addr, e);
                    }
                });
            }
            Err(e) => error!("accept failed: {}", e),
        }
    }
}

async fn handle_connection(stream: TcpStream, node: Arc<Node>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader).take(MAX_REQUEST_SIZE as u64);
    let mut line = String::new();
    loop {
        line.clear();
        let n = reader
            .read_line(&mut line)
            .await
            .context("failed to read request")?;
        if n == 0 {
            break;
        }
        reader.set_limit(MAX_REQUEST_SIZE as u64);
        let request: Request = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(e) => {
                warn!("invalid request json: {}", e);
                let response = Response::fault(0, format!("invalid request: {}", e));
                let json = serde_json::to_string(&response)? + "\n";
                writer.write_all(json.as_bytes()).await?;
                continue;
            }
        };
        let response = Response {
            id: request.id,
            result: dispatch(request.method, &node).await,
        };
        let json = serde_json::to_string(&response)? + "\n";
        writer
            .write_all(json.as_bytes())
            .await
            .context("failed to write response")?;
    }
    Ok(())
}

/// Handle one request. Errors returned here become RPC faults.
pub async fn dispatch(method: Method, node: &Arc<Node>) -> Result<ResponseData, String> {
    match method {
        Method::Ping => Ok(ResponseData::Ok),

        Method::PutFile { path, contents } => {
            let bytes = BASE64
                .decode(contents.as_bytes())
                .map_err(|e| format!("contents are not valid base64: {}", e))?;
            let fileref = node
                .store
                .put_bytes(&path, &bytes)
                .map_err(|e| format!("put_file failed: {}", e))?;
            Ok(ResponseData::File(fileref))
        }

        Method::GetFile { file } => {
            let local = node
                .store
                .get(&file)
                .map_err(|e| format!("get_file failed: {}", e))?;
            let bytes = match local {
                Some(bytes) => bytes,
                None => {
                    // stale blob: try to materialise it from the fabric
                    crate::filestore::ensure_local(
                        &node.store,
                        &node.fabric,
                        &file,
                        std::time::Duration::from_secs(node.config.etb.remote_timeout_secs),
                    )
                    .await
                    .map_err(|e| format!("blob {} is unreachable: {}", file.sha1, e))?;
                    node.store
                        .get(&file)
                        .map_err(|e| format!("get_file failed: {}", e))?
                        .ok_or_else(|| format!("blob {} is unreachable", file.sha1))?
                }
            };
            Ok(ResponseData::FileContents {
                contents: BASE64.encode(&bytes),
            })
        }

        Method::Ls { dir } => {
            let listing = node.store.ls(&dir).map_err(|e| format!("ls failed: {}", e))?;
            Ok(ResponseData::Listing(listing))
        }

        Method::Query { goal } => {
            let query = node.query(&goal).map_err(|e| e.to_string())?;
            Ok(ResponseData::QueryId { query })
        }

        Method::QueryWait { query } => {
            if !node.query_wait(&query).await {
                return Err(format!("unknown query {}", query));
            }
            Ok(ResponseData::Done { done: true })
        }

        Method::QueryDone { query } => node
            .query_done(&query)
            .map(|done| ResponseData::Done { done })
            .ok_or_else(|| format!("unknown query {}", query)),

        Method::QueryAnswers { query } => node
            .query_answers(&query)
            .map(|answers| ResponseData::Answers { answers })
            .ok_or_else(|| format!("unknown query {}", query)),

        Method::QueryClaims { query } => node
            .query_claims(&query)
            .map(|claims| ResponseData::Claims { claims })
            .ok_or_else(|| format!("unknown query {}", query)),

        Method::QueryErrors { query } => node
            .query_errors(&query)
            .map(|claims| ResponseData::Claims { claims })
            .ok_or_else(|| format!("unknown query {}", query)),

        Method::QueryClose { query } => {
            node.close_query(&query);
            Ok(ResponseData::Ok)
        }

        Method::GetAllClaims => Ok(ResponseData::Claims {
            claims: node.all_claims(),
        }),

        Method::ActiveQueries => Ok(ResponseData::Queries {
            queries: node.active_queries(),
        }),

        Method::DoneQueries => Ok(ResponseData::Queries {
            queries: node.done_queries(),
        }),

        Method::Connect { host, port } => {
            node.connect(&host, port, None)
                .await
                .map_err(|e| format!("connect failed: {}", e))?;
            Ok(ResponseData::Peers {
                peers: node.fabric.snapshot_with_me(),
            })
        }

        Method::Tunnel {
            local_port,
            remote_port,
        } => {
            node.connect("127.0.0.1", local_port, Some((local_port, remote_port)))
                .await
                .map_err(|e| format!("tunnel failed: {}", e))?;
            Ok(ResponseData::Peers {
                peers: node.fabric.snapshot_with_me(),
            })
        }

        // ---- peer-only surface ----
        Method::Offers { predicate } => Ok(ResponseData::Offers {
            offers: node.offers(&predicate),
        }),

        Method::FetchBlob { file } => {
            let bytes = node
                .store
                .get(&file)
                .map_err(|e| format!("fetch failed: {}", e))?
                .ok_or_else(|| format!("blob {} is not stored on this node", file.sha1))?;
            Ok(ResponseData::FileContents {
                contents: BASE64.encode(&bytes),
            })
        }

        Method::RemoteQuery {
            goal,
            correlation,
            requester,
        } => {
            node.admit_remote(goal, correlation, requester);
            Ok(ResponseData::Ok)
        }

        Method::DeliverAnswer {
            correlation,
            answer,
            claim,
        } => {
            node.deliver_answer(correlation, answer, claim);
            Ok(ResponseData::Ok)
        }

        Method::Closed { correlation } => {
            node.remote_closed(correlation);
            Ok(ResponseData::Ok)
        }

        Method::AdvertisePeers { peers } => Ok(ResponseData::Peers {
            peers: node.handle_advertise(peers),
        }),

        Method::Handshake {
            me,
            known,
            reply_port,
        } => {
            let (reply_me, reply_known) = node.handle_handshake(me, known, reply_port);
            Ok(ResponseData::Handshake {
                me: reply_me,
                known: reply_known,
            })
        }
    }
}
