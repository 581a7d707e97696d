//! RPC client for a single connection.
//!
//! A [`Client`] owns one TCP connection: it sends the handshake on dial,
//! then runs a receive loop that matches response headers to in-flight calls
//! by sequence number. Calls from many tasks share the connection; requests
//! go out under a writer lock and responses may come back in any order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::debug;

use wirecall_common::codec::{BodyCodec, CodecRegistry};
use wirecall_common::error::{Result, WirecallError};
use wirecall_common::protocol::{ConnectOptions, Header};
use wirecall_common::wire;

struct Pending {
    calls: HashMap<u64, oneshot::Sender<(Header, Vec<u8>)>>,
    /// Set once the receive loop has terminated; new calls fail fast with
    /// this reason.
    closed: Option<String>,
}

/// A client bound to one server connection.
pub struct Client {
    codec: BodyCodec,
    seq: AtomicU64,
    writer: Mutex<OwnedWriteHalf>,
    pending: Arc<StdMutex<Pending>>,
    recv_task: JoinHandle<()>,
}

impl Client {
    /// Connects to `addr`, bounded by the options' connect timeout when one
    /// is set, and sends the handshake.
    pub async fn dial(addr: &str, opts: ConnectOptions) -> Result<Self> {
        Self::dial_with(addr, opts, &CodecRegistry::default()).await
    }

    /// Like [`Client::dial`] with an explicit codec registry, for embedders
    /// that registered their own codecs.
    pub async fn dial_with(
        addr: &str,
        opts: ConnectOptions,
        codecs: &CodecRegistry,
    ) -> Result<Self> {
        // resolve the codec before touching the network: an unknown tag is a
        // configuration problem, not a connection problem
        let codec = codecs.lookup(&opts.codec_type)?;

        let connect = TcpStream::connect(addr);
        let mut stream = match opts.connect_timeout() {
            Some(limit) => tokio::time::timeout(limit, connect)
                .await
                .map_err(|_| WirecallError::ConnectTimeout(limit))??,
            None => connect.await?,
        };

        wire::write_frame(&mut stream, &serde_json::to_vec(&opts)?).await?;
        stream.flush().await?;

        let (reader, writer) = stream.into_split();
        let pending = Arc::new(StdMutex::new(Pending {
            calls: HashMap::new(),
            closed: None,
        }));
        let recv_task = tokio::spawn(receive_loop(reader, codec, Arc::clone(&pending)));

        Ok(Self {
            codec,
            seq: AtomicU64::new(1),
            writer: Mutex::new(writer),
            pending,
            recv_task,
        })
    }

    /// Whether the connection has terminated; calls on a closed client fail
    /// immediately.
    pub fn is_closed(&self) -> bool {
        self.pending.lock().unwrap().closed.is_some()
    }

    /// Invokes `Service.Method` and awaits the reply. A non-empty error in
    /// the response header (dispatch failure, method failure, server-side
    /// timeout) surfaces as [`WirecallError::Remote`].
    ///
    /// Waits until a response arrives or the connection terminates; wrap the
    /// call in `tokio::time::timeout` for a client-side deadline.
    pub async fn call<Args, Reply>(&self, service_method: &str, args: &Args) -> Result<Reply>
    where
        Args: Serialize,
        Reply: DeserializeOwned,
    {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let header_bytes = self
            .codec
            .encode_header(&Header::request(service_method, seq))?;
        let body_bytes = self.codec.encode(args)?;

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().unwrap();
            if let Some(reason) = &pending.closed {
                return Err(WirecallError::Connection(reason.clone()));
            }
            pending.calls.insert(seq, tx);
        }

        let written = {
            let mut writer = self.writer.lock().await;
            let result = async {
                wire::write_frame(&mut *writer, &header_bytes).await?;
                wire::write_frame(&mut *writer, &body_bytes).await?;
                writer.flush().await?;
                Ok::<_, WirecallError>(())
            }
            .await;
            result
        };
        if let Err(e) = written {
            self.pending.lock().unwrap().calls.remove(&seq);
            return Err(e);
        }

        match rx.await {
            Ok((header, body)) => {
                if header.error.is_empty() {
                    self.codec.decode(&body)
                } else {
                    Err(WirecallError::Remote(header.error))
                }
            }
            Err(_) => {
                let reason = self
                    .pending
                    .lock()
                    .unwrap()
                    .closed
                    .clone()
                    .unwrap_or_else(|| "connection closed".to_string());
                Err(WirecallError::Connection(reason))
            }
        }
    }

    /// Shuts the write half down; the server drains and closes, which ends
    /// the receive loop.
    pub async fn close(&self) {
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            debug!("client shutdown error: {}", e);
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.recv_task.abort();
    }
}

/// Reads (header, body) pairs and hands each to the pending call with the
/// matching sequence number. On any read or decode failure the loop ends and
/// every outstanding call is failed with the termination reason.
async fn receive_loop(
    mut reader: OwnedReadHalf,
    codec: BodyCodec,
    pending: Arc<StdMutex<Pending>>,
) {
    let reason = loop {
        let header = match wire::read_frame(&mut reader).await {
            Ok(frame) => match codec.decode_header(&frame) {
                Ok(header) => header,
                Err(e) => break format!("read header error: {}", e),
            },
            Err(e) => break e.to_string(),
        };
        let body = match wire::read_frame(&mut reader).await {
            Ok(body) => body,
            Err(e) => break format!("read body error: {}", e),
        };

        let sender = pending.lock().unwrap().calls.remove(&header.seq);
        match sender {
            Some(tx) => {
                let _ = tx.send((header, body));
            }
            // request write failed half-way, or the call gave up
            None => debug!(seq = header.seq, "response without a pending call"),
        }
    };

    let mut pending = pending.lock().unwrap();
    pending.closed = Some(reason);
    // dropping the senders wakes every in-flight call with an error
    pending.calls.clear();
}
