use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use reqwest::blocking::Client as HttpClient;
use reqwest::Url;
use serde_json::{json, Value};
use tracing::{debug, warn};
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{client_tls_with_config, Message as WsMessage, WebSocket};
use uuid::Uuid;

const SOCKET_READ_TIMEOUT: Duration = Duration::from_millis(500);
const ERROR_BODY_LIMIT: usize = 512;

/// Bidirectional request/response channel to one remote app.
pub trait AppChannel: Send {
    /// Sends `payload` and returns the handle to wait on.
    fn execute(&mut self, payload: &Value, caller_id: &str) -> Result<String>;
    fn get_response(&mut self, handle: &str) -> Result<Value>;
    fn close(&mut self);
}

/// Network access used by the registry and invoker.
pub trait AppTransport: Send + Sync {
    fn fetch_document(&self, url: &str) -> Result<Value>;
    fn fetch_resource(&self, url: &str) -> Result<Vec<u8>>;
    fn open_channel(&self, url: &str) -> Result<Box<dyn AppChannel>>;
}

/// HTTP documents and resources over reqwest; channels over a websocket.
pub struct HttpAppTransport {
    http: HttpClient,
    fetch_timeout: Duration,
    call_timeout: Duration,
}

impl HttpAppTransport {
    pub fn new(fetch_timeout: Duration, call_timeout: Duration) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(fetch_timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            fetch_timeout,
            call_timeout,
        })
    }

    fn get_ok(&self, url: &str) -> Result<reqwest::blocking::Response> {
        let response = self
            .http
            .get(url)
            .send()
            .with_context(|| format!("request failed ({url})"))?;
        if !response.status().is_success() {
            let code = response.status().as_u16();
            let body = response.text().unwrap_or_default();
            bail!(
                "request to {url} failed ({code}): {}",
                truncate_text(&body, ERROR_BODY_LIMIT)
            );
        }
        Ok(response)
    }
}

impl AppTransport for HttpAppTransport {
    fn fetch_document(&self, url: &str) -> Result<Value> {
        self.get_ok(url)?
            .json::<Value>()
            .with_context(|| format!("invalid JSON document ({url})"))
    }

    fn fetch_resource(&self, url: &str) -> Result<Vec<u8>> {
        let bytes = self
            .get_ok(url)?
            .bytes()
            .with_context(|| format!("failed reading resource bytes ({url})"))?;
        Ok(bytes.to_vec())
    }

    fn open_channel(&self, url: &str) -> Result<Box<dyn AppChannel>> {
        let channel = WebSocketChannel::open(url, self.fetch_timeout, self.call_timeout)?;
        Ok(Box::new(channel))
    }
}

pub struct WebSocketChannel {
    url: String,
    ws: WebSocket<MaybeTlsStream<TcpStream>>,
    deadline: Duration,
    closed: bool,
}

impl WebSocketChannel {
    /// Connects and completes the handshake within `connect_timeout`; replies
    /// are then awaited for at most `deadline` per request.
    pub fn open(url: &str, connect_timeout: Duration, deadline: Duration) -> Result<Self> {
        let stream = connect_stream(url, connect_timeout)?;
        stream
            .set_read_timeout(Some(connect_timeout))
            .and_then(|_| stream.set_write_timeout(Some(connect_timeout)))
            .with_context(|| format!("failed to configure channel socket {url}"))?;
        let (mut ws, _) = client_tls_with_config(url, stream, None, None)
            .map_err(|err| anyhow!("failed to connect channel {url}: {err}"))?;
        set_socket_read_timeout(&mut ws, Some(SOCKET_READ_TIMEOUT));
        debug!(url, "channel opened");
        Ok(Self {
            url: url.to_string(),
            ws,
            deadline,
            closed: false,
        })
    }

    fn send_json(&mut self, value: &Value) -> Result<()> {
        let raw = serde_json::to_string(value).context("failed to serialize channel frame")?;
        self.ws
            .send(WsMessage::Text(raw.into()))
            .context("failed to send channel frame")
    }
}

impl AppChannel for WebSocketChannel {
    fn execute(&mut self, payload: &Value, caller_id: &str) -> Result<String> {
        if self.closed {
            bail!("channel {} is closed", self.url);
        }
        let rid = Uuid::new_v4().to_string();
        self.send_json(&execute_frame(&rid, caller_id, payload))?;
        Ok(rid)
    }

    fn get_response(&mut self, handle: &str) -> Result<Value> {
        let started = Instant::now();
        loop {
            if started.elapsed() > self.deadline {
                bail!(
                    "no response for request {handle} within {}ms",
                    self.deadline.as_millis()
                );
            }

            let message = match self.ws.read() {
                Ok(message) => message,
                Err(tungstenite::Error::Io(err))
                    if matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) =>
                {
                    continue;
                }
                Err(err) => {
                    let context = if is_tungstenite_transport_error(&err) {
                        format!("channel {} dropped", self.url)
                    } else {
                        format!("channel {} read failed", self.url)
                    };
                    return Err(anyhow::Error::new(err).context(context));
                }
            };

            let raw = match message {
                WsMessage::Text(text) => text.to_string(),
                WsMessage::Binary(bytes) => String::from_utf8_lossy(&bytes).to_string(),
                WsMessage::Ping(_) | WsMessage::Pong(_) => continue,
                WsMessage::Close(_) => {
                    self.closed = true;
                    bail!("channel {} closed by remote", self.url);
                }
                _ => continue,
            };

            let frame: Value = match serde_json::from_str(&raw) {
                Ok(value) => value,
                Err(_) => {
                    debug!(url = %self.url, "skipping non-JSON frame");
                    continue;
                }
            };
            if let Some(reply) = match_reply(&frame, handle) {
                return reply;
            }
        }
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(err) = self.ws.close(None) {
            debug!(url = %self.url, error = %err, "channel close failed");
        }
        let _ = self.ws.flush();
    }
}

impl Drop for WebSocketChannel {
    fn drop(&mut self) {
        self.close();
    }
}

pub(crate) fn execute_frame(rid: &str, caller_id: &str, payload: &Value) -> Value {
    json!({
        "type": "execute",
        "rid": rid,
        "uid": caller_id,
        "payload": payload,
    })
}

/// Reply carried by `frame` for request `handle`, or `None` when the frame
/// belongs to another request or is not a reply.
pub(crate) fn match_reply(frame: &Value, handle: &str) -> Option<Result<Value>> {
    if frame.get("rid").and_then(Value::as_str) != Some(handle) {
        return None;
    }
    match frame.get("type").and_then(Value::as_str) {
        Some("response") => Some(match frame.get("payload") {
            Some(payload) => Ok(payload.clone()),
            None => Err(anyhow::anyhow!("response frame for {handle} has no payload")),
        }),
        Some("error") => {
            let message = frame
                .get("error")
                .map(|value| match value {
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                })
                .unwrap_or_else(|| "unspecified remote error".to_string());
            Some(Err(anyhow::anyhow!("remote app reported: {message}")))
        }
        Some(other) => {
            warn!(handle, frame_type = other, "ignoring unexpected frame type");
            None
        }
        None => None,
    }
}

fn connect_stream(url: &str, timeout: Duration) -> Result<TcpStream> {
    let parsed = Url::parse(url).with_context(|| format!("invalid channel url {url}"))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| anyhow!("channel url {url} has no host"))?;
    let port = parsed
        .port_or_known_default()
        .ok_or_else(|| anyhow!("channel url {url} has no port"))?;
    let addrs = (host, port)
        .to_socket_addrs()
        .with_context(|| format!("failed to resolve {host}:{port}"))?;

    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(err) => last_err = Some(err),
        }
    }
    match last_err {
        Some(err) => Err(anyhow::Error::new(err).context(format!("failed to connect channel {url}"))),
        None => bail!("no addresses resolved for {host}:{port}"),
    }
}

fn set_socket_read_timeout(ws: &mut WebSocket<MaybeTlsStream<TcpStream>>, timeout: Option<Duration>) {
    match ws.get_mut() {
        MaybeTlsStream::Plain(stream) => {
            let _ = stream.set_read_timeout(timeout);
        }
        MaybeTlsStream::Rustls(stream) => {
            let _ = stream.get_mut().set_read_timeout(timeout);
        }
        _ => {}
    }
}

fn is_tungstenite_transport_error(err: &tungstenite::Error) -> bool {
    match err {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => true,
        tungstenite::Error::Io(io_err) => matches!(
            io_err.kind(),
            io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::BrokenPipe
                | io::ErrorKind::UnexpectedEof
                | io::ErrorKind::NotConnected
        ),
        tungstenite::Error::Tls(_) => true,
        _ => false,
    }
}

pub(crate) fn truncate_text(text: &str, limit: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= limit {
        return trimmed.to_string();
    }
    let mut out: String = trimmed.chars().take(limit).collect();
    out.push_str("...");
    out
}
