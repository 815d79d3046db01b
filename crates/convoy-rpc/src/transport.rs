// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::{JsonRpcNotification, JsonRpcRequest, RpcError};

/// How long `close()` waits for the child to exit after stdin is closed
/// before terminating it.
pub const RPC_GRACE_PERIOD: Duration = Duration::from_secs(2);

/// How to launch one tool-provider subprocess.
#[derive(Debug, Clone, Default)]
pub struct SpawnSpec {
    /// Executable path or name resolved via PATH.
    pub command: String,
    pub args: Vec<String>,
    /// Environment overrides, merged over the parent environment.
    pub env: HashMap<String, String>,
}

type PendingMap = Arc<StdMutex<HashMap<u64, oneshot::Sender<Result<Value, RpcError>>>>>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Framed JSON-RPC connection to one subprocess.
///
/// The reader task owns demultiplexing: responses resolve the pending entry
/// matching their id, notifications go to the sink channel, malformed lines
/// are logged and skipped.  On EOF every in-flight request fails with
/// [`RpcError::TransportClosed`] and the closed signal fires.
pub struct StdioTransport {
    writer: Mutex<Option<BoxedWriter>>,
    pending: PendingMap,
    next_id: AtomicU64,
    closed: watch::Receiver<bool>,
    child: Mutex<Option<Child>>,
    reader_task: JoinHandle<()>,
}

impl StdioTransport {
    /// Spawn a subprocess and frame its stdio.
    ///
    /// stderr is piped into the tracing log so provider diagnostics are
    /// visible without corrupting the JSON-RPC stream.
    pub fn spawn(
        spec: &SpawnSpec,
    ) -> Result<(Self, mpsc::UnboundedReceiver<JsonRpcNotification>), RpcError> {
        let mut cmd = Command::new(&spec.command);
        cmd.args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| RpcError::Spawn(e.to_string()))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RpcError::Spawn("stdin not piped".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RpcError::Spawn("stdout not piped".into()))?;

        if let Some(stderr) = child.stderr.take() {
            let command = spec.command.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "convoy::server_stderr", %command, "{line}");
                }
            });
        }

        let (mut transport, notifications) = Self::from_streams(stdout, stdin);
        transport.child = Mutex::new(Some(child));
        Ok((transport, notifications))
    }

    /// Frame an arbitrary reader/writer pair.
    ///
    /// `spawn` builds on this; tests drive the protocol over
    /// `tokio::io::duplex` without a real process.
    pub fn from_streams<R, W>(
        reader: R,
        writer: W,
    ) -> (Self, mpsc::UnboundedReceiver<JsonRpcNotification>)
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let pending: PendingMap = Arc::new(StdMutex::new(HashMap::new()));
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = watch::channel(false);

        let reader_pending = Arc::clone(&pending);
        let reader_task = tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        dispatch_line(&line, &reader_pending, &notify_tx);
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!("rpc read error: {e}");
                        break;
                    }
                }
            }
            // EOF: every in-flight request fails, the connection is gone.
            let drained: Vec<_> = {
                let mut p = reader_pending.lock().unwrap();
                p.drain().collect()
            };
            for (_, tx) in drained {
                let _ = tx.send(Err(RpcError::TransportClosed));
            }
            let _ = closed_tx.send(true);
        });

        let transport = Self {
            writer: Mutex::new(Some(Box::new(writer))),
            pending,
            next_id: AtomicU64::new(1),
            closed: closed_rx,
            child: Mutex::new(None),
            reader_task,
        };
        (transport, notify_rx)
    }

    /// True once the peer closed its stdout and the reader wound down.
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// A watch handle that flips to `true` when the connection dies.
    pub fn closed_signal(&self) -> watch::Receiver<bool> {
        self.closed.clone()
    }

    /// Send a request and wait for its response, bounded by `timeout`.
    ///
    /// A timeout removes only this request's pending entry; concurrent
    /// requests on the same connection are unaffected, and a late response
    /// for the abandoned id is discarded by the reader.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, RpcError> {
        if self.is_closed() {
            return Err(RpcError::TransportClosed);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(id, tx);

        let frame = serde_json::to_string(&JsonRpcRequest::new(id, method, params))?;
        if let Err(e) = self.write_line(&frame).await {
            self.pending.lock().unwrap().remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            // Sender dropped without resolving: reader task is gone.
            Ok(Err(_)) => Err(RpcError::TransportClosed),
            Err(_) => {
                self.pending.lock().unwrap().remove(&id);
                Err(RpcError::Timeout {
                    ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Send a notification.  No id is allocated and no response is awaited.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), RpcError> {
        let frame = serde_json::to_string(&JsonRpcNotification::new(method, params))?;
        self.write_line(&frame).await
    }

    async fn write_line(&self, frame: &str) -> Result<(), RpcError> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(RpcError::TransportClosed)?;
        writer.write_all(frame.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok(())
    }

    /// Shut the connection down.  Idempotent; sends no RPC.
    ///
    /// Closing stdin signals EOF to the child; after [`RPC_GRACE_PERIOD`]
    /// a still-running child is killed.  The reader task winds down on its
    /// own once stdout reaches EOF.
    pub async fn close(&self) {
        {
            let mut guard = self.writer.lock().await;
            if let Some(mut writer) = guard.take() {
                let _ = writer.shutdown().await;
            }
        }

        let mut guard = self.child.lock().await;
        if let Some(mut child) = guard.take() {
            match tokio::time::timeout(RPC_GRACE_PERIOD, child.wait()).await {
                Ok(_) => {}
                Err(_) => {
                    warn!("subprocess ignored EOF; killing");
                    let _ = child.kill().await;
                    let _ = child.wait().await;
                }
            }
        }
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

/// Route one incoming line: response, notification, or noise.
fn dispatch_line(
    line: &str,
    pending: &PendingMap,
    notify_tx: &mpsc::UnboundedSender<JsonRpcNotification>,
) {
    let value: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            warn!("discarding malformed rpc line: {e}");
            return;
        }
    };

    let id = value.get("id").and_then(Value::as_u64);
    let has_method = value.get("method").is_some();

    match (id, has_method) {
        // Response: resolve the matching pending request.  An unknown id
        // means the caller already timed out; drop the late response.
        (Some(id), false) => {
            let entry = pending.lock().unwrap().remove(&id);
            match entry {
                Some(tx) => {
                    let outcome = if let Some(err) = value.get("error") {
                        match serde_json::from_value(err.clone()) {
                            Ok(remote) => Err(RpcError::Remote(remote)),
                            Err(e) => {
                                warn!("unparseable rpc error object: {e}");
                                Err(RpcError::Remote(crate::JsonRpcError {
                                    code: crate::CODE_INTERNAL_ERROR,
                                    message: format!("unparseable error object: {err}"),
                                    data: None,
                                }))
                            }
                        }
                    } else {
                        Ok(value.get("result").cloned().unwrap_or(Value::Null))
                    };
                    let _ = tx.send(outcome);
                }
                None => debug!(id, "late rpc response discarded"),
            }
        }
        // Notification: bypass the pending table entirely.
        (None, true) => match serde_json::from_value::<JsonRpcNotification>(value) {
            Ok(n) => {
                let _ = notify_tx.send(n);
            }
            Err(e) => warn!("discarding malformed notification: {e}"),
        },
        // Server-initiated request: not part of the supported method set.
        (Some(_), true) => warn!("ignoring unsupported server-initiated request"),
        (None, false) => warn!("discarding rpc frame with neither id nor method"),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
