//! Production hub transport: negotiate over HTTP, then WebSocket.
//!
//! # Connection sequence
//!
//! ```text
//! POST {hub}/negotiate?negotiateVersion=1      (reqwest)
//!   ← {"connectionToken": "...", ...}
//! GET  ws(s)://{hub}?id={token}                (tokio-tungstenite)
//!   → {"protocol":"json","version":1}␞
//!   ← {}␞                                      handshake ack → Opened
//!   ↔ frames                                   → Frame(..)
//! ```
//!
//! Each [`HubSession`] runs the whole sequence on its own tokio task and
//! reports progress through the [`EventCallback`] it was opened with.  The
//! owner talks back to the task over an unbounded channel, so
//! [`Session::send`] and [`Session::close`] never block.
//!
//! # Streaming decode
//!
//! A WebSocket text message is not guaranteed to carry exactly one frame:
//! the hub may batch several frames into one message or, in principle,
//! split one across messages.  Every text message is pushed through a
//! per-session [`FrameDecoder`], which buffers partial frames until their
//! record separator arrives.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use reqwest::header::CONTENT_TYPE;
use reqwest::Url;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, trace, warn};

use notify_core::{encode_frame, encode_handshake_request, FrameDecoder, ProtocolFrame};

use crate::domain::{Connector, EventCallback, Session, SessionEvent, TransportError};

/// Only the WebSocket transport is supported.
const WEBSOCKETS_TRANSPORT: &str = "WebSockets";

// ── Negotiate ─────────────────────────────────────────────────────────────────

/// One entry of `availableTransports` in the negotiate response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableTransport {
    pub transport: String,
    #[serde(default)]
    pub transfer_formats: Vec<String>,
}

/// Body of a successful negotiate response.  Unknown fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NegotiateResponse {
    pub connection_token: Option<String>,
    pub connection_id: Option<String>,
    pub negotiate_version: Option<u32>,
    #[serde(default)]
    pub available_transports: Vec<AvailableTransport>,
    /// Set by the hub when it refuses the connection outright.
    pub error: Option<String>,
}

impl NegotiateResponse {
    /// The value to pass as the socket `id` query parameter.
    ///
    /// Version 1 responses carry a separate `connectionToken`; version 0
    /// hubs only return `connectionId`, which doubles as the token.
    pub fn token(&self) -> Result<&str, TransportError> {
        if let Some(error) = &self.error {
            return Err(TransportError::Negotiate(error.clone()));
        }
        if !self.available_transports.is_empty()
            && !self
                .available_transports
                .iter()
                .any(|t| t.transport == WEBSOCKETS_TRANSPORT)
        {
            return Err(TransportError::Negotiate(
                "hub does not offer the WebSockets transport".to_string(),
            ));
        }
        self.connection_token
            .as_deref()
            .or(self.connection_id.as_deref())
            .ok_or_else(|| TransportError::Negotiate("response has no connection token".to_string()))
    }
}

fn parse_hub_url(hub_url: &str) -> Result<Url, TransportError> {
    Url::parse(hub_url).map_err(|e| TransportError::InvalidUrl {
        url: hub_url.to_string(),
        reason: e.to_string(),
    })
}

/// `{hub}/negotiate?negotiateVersion=1`, keeping any query the hub URL has.
pub fn negotiate_url(hub_url: &str) -> Result<Url, TransportError> {
    let mut url = parse_hub_url(hub_url)?;
    let path = format!("{}/negotiate", url.path().trim_end_matches('/'));
    url.set_path(&path);
    url.query_pairs_mut().append_pair("negotiateVersion", "1");
    Ok(url)
}

/// Rewrites the hub URL to its socket form: `http → ws`, `https → wss`,
/// plus `id={token}`.
pub fn socket_url(hub_url: &str, token: &str) -> Result<Url, TransportError> {
    let mut url = parse_hub_url(hub_url)?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(TransportError::InvalidUrl {
                url: hub_url.to_string(),
                reason: format!("unsupported scheme '{other}'"),
            })
        }
    };
    // http/https/ws/wss are all "special" schemes, so this swap cannot fail.
    if url.set_scheme(scheme).is_err() {
        return Err(TransportError::InvalidUrl {
            url: hub_url.to_string(),
            reason: format!("cannot switch scheme to '{scheme}'"),
        });
    }
    url.query_pairs_mut().append_pair("id", token);
    Ok(url)
}

async fn negotiate(http: &reqwest::Client, hub_url: &str) -> Result<String, TransportError> {
    let url = negotiate_url(hub_url)?;
    debug!(%url, "negotiating");

    let response = http
        .post(url)
        .header(CONTENT_TYPE, "text/plain;charset=UTF-8")
        .body("")
        .send()
        .await
        .map_err(|e| TransportError::Negotiate(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(TransportError::NegotiateStatus(status.as_u16()));
    }

    let body: NegotiateResponse = response
        .json()
        .await
        .map_err(|e| TransportError::Negotiate(format!("unreadable response: {e}")))?;
    body.token().map(str::to_string)
}

// ── Connector ─────────────────────────────────────────────────────────────────

/// Opens real hub sessions.
///
/// Cheap to clone: the inner `reqwest::Client` is reference counted and
/// reuses its connection pool across negotiate calls.
#[derive(Debug, Clone)]
pub struct HubConnector {
    http: reqwest::Client,
    handshake_timeout: Duration,
}

impl HubConnector {
    /// `handshake_timeout` bounds negotiate + socket open + handshake.
    pub fn new(handshake_timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            handshake_timeout,
        }
    }
}

impl Connector for HubConnector {
    fn open(&self, hub_url: &str, on_event: EventCallback) -> Box<dyn Session> {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let flags = Arc::new(SessionFlags::default());

        tokio::spawn(run_session(
            self.http.clone(),
            hub_url.to_string(),
            self.handshake_timeout,
            outbound_rx,
            Arc::clone(&flags),
            on_event,
        ));

        Box::new(HubSession {
            outbound: outbound_tx,
            flags,
        })
    }
}

// ── Session ───────────────────────────────────────────────────────────────────

/// Owner → session task.
#[derive(Debug)]
enum Outbound {
    /// An already encoded frame, terminator included.
    Frame(String),
    Close,
}

#[derive(Debug, Default)]
struct SessionFlags {
    /// Set once the handshake is acknowledged, cleared when the session ends.
    ready: AtomicBool,
    closed: AtomicBool,
}

/// Owner-side handle of a running hub session.
///
/// Dropping the handle closes the session: the task sees its outbound
/// channel end and shuts the socket down.
pub struct HubSession {
    outbound: mpsc::UnboundedSender<Outbound>,
    flags: Arc<SessionFlags>,
}

impl Session for HubSession {
    fn send(&self, frame: &ProtocolFrame) {
        if !self.flags.ready.load(Ordering::SeqCst) || self.flags.closed.load(Ordering::SeqCst) {
            trace!(kind = frame.kind_name(), "send suppressed: session not open");
            return;
        }
        if self.outbound.send(Outbound::Frame(encode_frame(frame))).is_err() {
            trace!(kind = frame.kind_name(), "send suppressed: session task gone");
        }
    }

    fn close(&mut self) {
        if self.flags.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.flags.ready.store(false, Ordering::SeqCst);
        // The task may already be gone; it reports Closed either way.
        let _ = self.outbound.send(Outbound::Close);
    }

    fn is_closed(&self) -> bool {
        self.flags.closed.load(Ordering::SeqCst)
    }
}

/// Drives one session from negotiate to close and reports exactly one
/// `Closed` at the end.
async fn run_session(
    http: reqwest::Client,
    hub_url: String,
    handshake_timeout: Duration,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    flags: Arc<SessionFlags>,
    on_event: EventCallback,
) {
    let result = drive_session(
        &http,
        &hub_url,
        handshake_timeout,
        &mut outbound,
        &flags,
        &on_event,
    )
    .await;

    if let Err(e) = result {
        warn!(hub = %hub_url, "hub session failed: {e}");
        on_event(SessionEvent::Error(e));
    }

    flags.ready.store(false, Ordering::SeqCst);
    flags.closed.store(true, Ordering::SeqCst);
    debug!(hub = %hub_url, "hub session closed");
    on_event(SessionEvent::Closed);
}

/// Resolves once the owner closes the session or drops its handle.
/// Frames queued before the handshake are discarded.
async fn closed_by_owner(outbound: &mut mpsc::UnboundedReceiver<Outbound>) {
    loop {
        match outbound.recv().await {
            Some(Outbound::Frame(_)) => continue,
            Some(Outbound::Close) | None => return,
        }
    }
}

async fn drive_session(
    http: &reqwest::Client,
    hub_url: &str,
    handshake_timeout: Duration,
    outbound: &mut mpsc::UnboundedReceiver<Outbound>,
    flags: &SessionFlags,
    on_event: &EventCallback,
) -> Result<(), TransportError> {
    let handshake_deadline = tokio::time::sleep(handshake_timeout);
    tokio::pin!(handshake_deadline);

    // Negotiate and open the socket.  Both race the deadline and an
    // owner-initiated close.
    let open = async {
        let token = negotiate(http, hub_url).await?;
        let url = socket_url(hub_url, &token)?;
        debug!(hub = %hub_url, "opening socket");
        let (ws, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::Socket(e.to_string()))?;
        Ok::<_, TransportError>(ws)
    };

    let ws = tokio::select! {
        opened = open => opened?,
        _ = &mut handshake_deadline => {
            return Err(TransportError::Handshake("timed out before the socket opened".to_string()));
        }
        _ = closed_by_owner(outbound) => return Ok(()),
    };

    let (mut sink, mut stream) = ws.split();
    let request = encode_handshake_request().map_err(|e| TransportError::Handshake(e.to_string()))?;
    sink.send(Message::Text(request))
        .await
        .map_err(|e| TransportError::Socket(e.to_string()))?;

    let mut decoder = FrameDecoder::new();
    let mut handshake_done = false;

    loop {
        tokio::select! {
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    for frame in decoder.push(&text) {
                        if handshake_done {
                            on_event(SessionEvent::Frame(frame));
                            continue;
                        }
                        // The first frame must be the handshake response.
                        match frame {
                            ProtocolFrame::Handshake(response) => match response.error {
                                None => {
                                    handshake_done = true;
                                    flags.ready.store(true, Ordering::SeqCst);
                                    info!(hub = %hub_url, "hub handshake complete");
                                    on_event(SessionEvent::Opened);
                                }
                                Some(error) => return Err(TransportError::Handshake(error)),
                            },
                            other => {
                                return Err(TransportError::Handshake(format!(
                                    "expected handshake response, got {}",
                                    other.kind_name()
                                )));
                            }
                        }
                    }
                }
                Some(Ok(Message::Binary(bytes))) => {
                    debug!(len = bytes.len(), "ignoring binary message");
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(hub = %hub_url, ?frame, "hub closed the socket");
                    return Ok(());
                }
                // Ping/Pong are answered by tungstenite itself.
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(TransportError::Socket(e.to_string())),
                None => return Ok(()),
            },

            command = outbound.recv() => match command {
                Some(Outbound::Frame(text)) => {
                    sink.send(Message::Text(text))
                        .await
                        .map_err(|e| TransportError::Socket(e.to_string()))?;
                }
                Some(Outbound::Close) | None => {
                    // Best effort: the socket may already be half closed.
                    let _ = sink.send(Message::Close(None)).await;
                    return Ok(());
                }
            },

            _ = &mut handshake_deadline, if !handshake_done => {
                return Err(TransportError::Handshake("timed out waiting for the handshake response".to_string()));
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_negotiate_url_appends_path_and_version() {
        let url = negotiate_url("https://example.org/hubs/notifications").unwrap();
        assert_eq!(
            url.as_str(),
            "https://example.org/hubs/notifications/negotiate?negotiateVersion=1"
        );
    }

    #[test]
    fn test_negotiate_url_handles_trailing_slash_and_existing_query() {
        let url = negotiate_url("http://localhost:5000/hub/?tenant=7").unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:5000/hub/negotiate?tenant=7&negotiateVersion=1"
        );
    }

    #[test]
    fn test_socket_url_swaps_https_for_wss() {
        let url = socket_url("https://example.org/hub", "abc").unwrap();
        assert_eq!(url.as_str(), "wss://example.org/hub?id=abc");
    }

    #[test]
    fn test_socket_url_swaps_http_for_ws() {
        let url = socket_url("http://localhost:5000/hub", "tok").unwrap();
        assert_eq!(url.as_str(), "ws://localhost:5000/hub?id=tok");
    }

    #[test]
    fn test_socket_url_escapes_token() {
        let url = socket_url("http://h/hub", "a+b/c=").unwrap();
        assert_eq!(url.query(), Some("id=a%2Bb%2Fc%3D"));
    }

    #[test]
    fn test_socket_url_rejects_unknown_scheme() {
        let err = socket_url("ftp://example.org/hub", "t").unwrap_err();
        assert!(matches!(err, TransportError::InvalidUrl { .. }));
    }

    #[test]
    fn test_unparseable_hub_url_is_invalid() {
        assert!(matches!(
            negotiate_url("not a url"),
            Err(TransportError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_negotiate_response_prefers_connection_token() {
        let body: NegotiateResponse = serde_json::from_str(
            r#"{"negotiateVersion":1,"connectionId":"cid","connectionToken":"ctok",
                "availableTransports":[{"transport":"WebSockets","transferFormats":["Text","Binary"]}]}"#,
        )
        .unwrap();
        assert_eq!(body.token().unwrap(), "ctok");
    }

    #[test]
    fn test_negotiate_response_falls_back_to_connection_id() {
        let body: NegotiateResponse =
            serde_json::from_str(r#"{"connectionId":"only-id"}"#).unwrap();
        assert_eq!(body.token().unwrap(), "only-id");
    }

    #[test]
    fn test_negotiate_response_error_field_fails() {
        let body: NegotiateResponse =
            serde_json::from_str(r#"{"error":"Negotiate rejected"}"#).unwrap();
        assert_eq!(
            body.token().unwrap_err(),
            TransportError::Negotiate("Negotiate rejected".to_string())
        );
    }

    #[test]
    fn test_negotiate_response_without_websockets_fails() {
        let body: NegotiateResponse = serde_json::from_str(
            r#"{"connectionToken":"t","availableTransports":[{"transport":"LongPolling"}]}"#,
        )
        .unwrap();
        assert!(body.token().is_err());
    }

    #[test]
    fn test_negotiate_response_without_token_fails() {
        let body: NegotiateResponse = serde_json::from_str(r#"{"negotiateVersion":1}"#).unwrap();
        assert!(body.token().is_err());
    }

    #[test]
    fn test_send_before_open_is_suppressed() {
        // Arrange: a session handle whose task never became ready.
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = HubSession {
            outbound: tx,
            flags: Arc::new(SessionFlags::default()),
        };

        // Act
        session.send(&ProtocolFrame::Ping);

        // Assert
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_close_is_idempotent_and_signals_task_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut session = HubSession {
            outbound: tx,
            flags: Arc::new(SessionFlags::default()),
        };
        session.flags.ready.store(true, Ordering::SeqCst);

        session.close();
        session.close();

        assert!(session.is_closed());
        assert!(matches!(rx.try_recv(), Ok(Outbound::Close)));
        assert!(rx.try_recv().is_err());
        // Closed sessions drop sends.
        session.send(&ProtocolFrame::Ping);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unreachable_hub_reports_error_then_closed() {
        // Port 9 (discard) on localhost is closed on any sane test host, so
        // negotiate fails fast with a connection error.
        let events: Arc<Mutex<Vec<SessionEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();
        let sink = Arc::clone(&events);
        let connector = HubConnector::new(Duration::from_secs(5));

        let _session = connector.open(
            "http://127.0.0.1:9/hub",
            Box::new(move |event| {
                let closed = event == SessionEvent::Closed;
                sink.lock().unwrap().push(event);
                if closed {
                    let _ = done_tx.send(());
                }
            }),
        );

        done_rx.recv().await.unwrap();
        let events = events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], SessionEvent::Error(TransportError::Negotiate(_))));
        assert_eq!(events[1], SessionEvent::Closed);
    }

    #[tokio::test]
    async fn test_invalid_url_reports_error_then_closed() {
        let events: Arc<Mutex<Vec<SessionEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();
        let sink = Arc::clone(&events);
        let connector = HubConnector::new(Duration::from_secs(5));

        let _session = connector.open(
            "::not-a-url::",
            Box::new(move |event| {
                let closed = event == SessionEvent::Closed;
                sink.lock().unwrap().push(event);
                if closed {
                    let _ = done_tx.send(());
                }
            }),
        );

        done_rx.recv().await.unwrap();
        let events = events.lock().unwrap();
        assert!(matches!(events[0], SessionEvent::Error(TransportError::InvalidUrl { .. })));
        assert_eq!(events.last(), Some(&SessionEvent::Closed));
    }
}
