//! Connection engine.
//!
//! A connection moves through four states: read the handshake, serve the
//! request loop, drain in-flight requests, close. Within a connection the
//! read loop runs on the connection task and every decoded request is
//! dispatched to its own task, so independent requests execute concurrently;
//! responses go out in completion order, each written whole under the
//! connection's single writer lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use wirecall_common::codec::{BodyCodec, CodecRegistry};
use wirecall_common::error::{Result, WirecallError};
use wirecall_common::protocol::{split_service_method, ConnectOptions, Header, MAGIC_NUMBER};
use wirecall_common::wire;

use crate::service::Service;

/// An RPC server: a catalog of services plus the codec registry used to
/// honor each connection's negotiated body codec.
///
/// Registration is expected at startup; the service map is read on every
/// dispatch afterwards.
pub struct Server {
    services: RwLock<HashMap<String, Arc<Service>>>,
    codecs: CodecRegistry,
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

impl Server {
    pub fn new() -> Self {
        Self::with_codecs(CodecRegistry::default())
    }

    pub fn with_codecs(codecs: CodecRegistry) -> Self {
        Self {
            services: RwLock::new(HashMap::new()),
            codecs,
        }
    }

    /// Publishes a service. Registering a second service under the same name
    /// is a recoverable error, not an overwrite.
    pub fn register(&self, service: Service) -> Result<()> {
        let name = service.name().to_string();
        let mut services = self.services.write().unwrap();
        if services.contains_key(&name) {
            return Err(WirecallError::DuplicateService(name));
        }
        info!(service = %name, methods = service.method_names().len(), "registered service");
        services.insert(name, Arc::new(service));
        Ok(())
    }

    /// Accepts connections on the listener and serves each on its own task
    /// until the listener fails.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        loop {
            let (stream, peer) = listener
                .accept()
                .await
                .map_err(|e| WirecallError::Connection(format!("accept error: {}", e)))?;
            debug!(%peer, "connection established");
            let server = Arc::clone(&self);
            tokio::spawn(async move {
                server.serve_conn(stream).await;
            });
        }
    }

    /// Serves a single connection until the client hangs up, then drains
    /// in-flight requests before releasing the stream.
    ///
    /// A handshake failure (bad magic, unknown codec tag) closes the
    /// connection without a response; there is no codec to answer with.
    pub async fn serve_conn<S>(self: Arc<Self>, stream: S)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (mut reader, writer) = tokio::io::split(stream);

        let opts = match read_options(&mut reader).await {
            Ok(opts) => opts,
            Err(e) => {
                warn!("options error: {}", e);
                return;
            }
        };
        if opts.magic != MAGIC_NUMBER {
            warn!("invalid magic number {:#x}", opts.magic);
            return;
        }
        let codec = match self.codecs.lookup(&opts.codec_type) {
            Ok(codec) => codec,
            Err(e) => {
                warn!("{}", e);
                return;
            }
        };

        self.serve_codec(reader, writer, codec, opts.handle_timeout())
            .await;
    }

    async fn serve_codec<S>(
        self: Arc<Self>,
        mut reader: ReadHalf<S>,
        writer: WriteHalf<S>,
        codec: BodyCodec,
        handle_timeout: Option<Duration>,
    ) where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        // one writer lock per connection: responses may complete in any
        // order, but each header+body pair hits the wire whole
        let writer = Arc::new(Mutex::new(writer));
        let mut inflight = JoinSet::new();

        loop {
            let mut header = match read_header(&mut reader, &codec).await {
                Ok(header) => header,
                Err(WirecallError::Eof) => break,
                Err(e) => {
                    // no header to attach an error to; the stream cannot be
                    // salvaged
                    debug!("read header error: {}", e);
                    break;
                }
            };

            // the body frame always follows the header; consume it even when
            // resolution fails so the stream stays in sync
            let body = match wire::read_frame(&mut reader).await {
                Ok(body) => body,
                Err(e) => {
                    debug!("read body error: {}", e);
                    break;
                }
            };

            match self.find_service(&header.service_method) {
                Ok((service, method)) => {
                    let writer = Arc::clone(&writer);
                    inflight.spawn(handle_request(
                        service,
                        method,
                        codec,
                        header,
                        body,
                        writer,
                        handle_timeout,
                    ));
                }
                Err(e) => {
                    header.error = e.to_string();
                    let responded = AtomicBool::new(false);
                    send_response(&writer, &codec, &header, None, &responded).await;
                }
            }
        }

        // drain: every dispatched request finishes before the stream goes away
        while inflight.join_next().await.is_some() {}
        let mut writer = writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            debug!("shutdown error: {}", e);
        }
    }

    /// Resolves a dotted `Service.Method` name against the catalog.
    fn find_service(&self, service_method: &str) -> Result<(Arc<Service>, String)> {
        let (service_name, method_name) = split_service_method(service_method)?;
        let service = self
            .services
            .read()
            .unwrap()
            .get(service_name)
            .cloned()
            .ok_or_else(|| WirecallError::ServiceNotFound(service_name.to_string()))?;
        if !service.has_method(method_name) {
            return Err(WirecallError::MethodNotFound(method_name.to_string()));
        }
        Ok((service, method_name.to_string()))
    }
}

async fn read_options<R: AsyncRead + Unpin>(reader: &mut R) -> Result<ConnectOptions> {
    let frame = wire::read_frame(reader).await?;
    serde_json::from_slice(&frame).map_err(WirecallError::Json)
}

async fn read_header<R: AsyncRead + Unpin>(reader: &mut R, codec: &BodyCodec) -> Result<Header> {
    let frame = wire::read_frame(reader).await?;
    codec.decode_header(&frame)
}

/// Runs one request: the invocation proper goes to its own task, and this
/// task either waits for it (no timeout) or races it against the timer.
///
/// Whichever of {timeout, completion} wins the race sends the response; the
/// loser's write is suppressed by the per-request `responded` guard, so
/// exactly one response per request reaches the wire. A timed-out invocation
/// keeps running to completion in the background and its result is
/// discarded; there is no cooperative cancellation.
async fn handle_request<S>(
    service: Arc<Service>,
    method: String,
    codec: BodyCodec,
    mut header: Header,
    body: Vec<u8>,
    writer: Arc<Mutex<WriteHalf<S>>>,
    timeout: Option<Duration>,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let responded = Arc::new(AtomicBool::new(false));
    let (called_tx, called_rx) = oneshot::channel::<()>();
    let (sent_tx, sent_rx) = oneshot::channel::<()>();

    let invoke_writer = Arc::clone(&writer);
    let invoke_responded = Arc::clone(&responded);
    let mut invoke_header = header.clone();
    tokio::spawn(async move {
        let outcome = service.invoke(&method, &codec, &body);
        let _ = called_tx.send(());
        let reply = match outcome {
            Ok(reply) => Some(reply),
            Err(e) => {
                invoke_header.error = e.to_string();
                None
            }
        };
        send_response(
            &invoke_writer,
            &codec,
            &invoke_header,
            reply.as_deref(),
            &invoke_responded,
        )
        .await;
        let _ = sent_tx.send(());
    });

    let timeout = match timeout {
        None => {
            let _ = called_rx.await;
            let _ = sent_rx.await;
            return;
        }
        Some(timeout) => timeout,
    };

    tokio::select! {
        _ = tokio::time::sleep(timeout) => {
            header.error = format!("request handle timeout: expect within {:?}", timeout);
            send_response(&writer, &codec, &header, None, &responded).await;
        }
        _ = called_rx => {
            let _ = sent_rx.await;
        }
    }
}

/// Writes one complete response under the connection's writer lock. `body`
/// of `None` means an error response, which carries a unit placeholder.
///
/// The `responded` guard makes the response once-only: the first caller to
/// flip it owns the wire, later callers return without writing.
async fn send_response<S>(
    writer: &Mutex<WriteHalf<S>>,
    codec: &BodyCodec,
    header: &Header,
    body: Option<&[u8]>,
    responded: &AtomicBool,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    if responded.swap(true, Ordering::SeqCst) {
        return;
    }

    let header_bytes = match codec.encode_header(header) {
        Ok(bytes) => bytes,
        Err(e) => {
            error!("encode response header error: {}", e);
            return;
        }
    };
    let body_bytes = match body {
        Some(bytes) => bytes.to_vec(),
        None => match codec.encode_unit() {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("encode response body error: {}", e);
                return;
            }
        },
    };

    let mut writer = writer.lock().await;
    let result = async {
        wire::write_frame(&mut *writer, &header_bytes).await?;
        wire::write_frame(&mut *writer, &body_bytes).await?;
        writer.flush().await?;
        Ok::<_, WirecallError>(())
    }
    .await;
    if let Err(e) = result {
        error!("write response error: {}", e);
    }
}
