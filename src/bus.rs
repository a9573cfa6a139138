//! Request/response bus the section codec sits behind.
//!
//! A [`Bus`] carries a [`Request`] to a single [`RequestHandler`]. The
//! handler answers through its [`Responder`] either with one plain
//! [`Response`] or with a stream of sections written through a
//! [`SectionEncoder`]; the requester gets the matching [`Reply`].
//!
//! Routing, transport and timeouts are left to the embedding application.

use crate::error::{CodecError, Result};
use crate::streaming::{decode_sections, frame_channel, FrameSender, SectionEncoder, SectionStream};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

// =============================================================================
// Request / Response
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
    Connect,
    Trace,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
            Self::Connect => "CONNECT",
            Self::Trace => "TRACE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            "HEAD" => Ok(Self::Head),
            "OPTIONS" => Ok(Self::Options),
            "CONNECT" => Ok(Self::Connect),
            "TRACE" => Ok(Self::Trace),
            _ => anyhow::bail!("Unknown HTTP method: {}", s),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub method: HttpMethod,

    pub queue_id: String,

    /// Always 0 for non-partitioned queues
    pub wsid: i64,

    /// Derived from the partition dividend, 0 for non-partitioned queues
    pub partition_number: i32,

    pub header: HashMap<String, Vec<String>>,

    /// URL part after the queue alias or partition dividend
    pub resource: String,

    /// URL query parameters
    pub query: HashMap<String, Vec<String>>,

    /// JSON request body
    pub body: Vec<u8>,

    /// Attachment name -> attachment id
    pub attachments: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub content_type: String,
    pub status: String,
    pub status_code: u16,
    pub data: Vec<u8>,
}

/// Response with the given status code and message body.
pub fn create_response(code: u16, message: &str) -> Response {
    Response {
        status_code: code,
        data: message.as_bytes().to_vec(),
        ..Default::default()
    }
}

/// Plain-text error response carrying `err`'s message.
pub fn create_error_response(code: u16, err: &dyn std::error::Error) -> Response {
    Response {
        content_type: "plain/text".to_string(),
        status_code: code,
        data: err.to_string().into_bytes(),
        ..Default::default()
    }
}

// =============================================================================
// Bus
// =============================================================================

/// What the requester receives.
pub enum Reply {
    Response(Response),
    /// Must be read to the end; check [`SectionStream::finish`] afterwards.
    Sections(SectionStream),
}

impl Reply {
    pub fn into_response(self) -> Option<Response> {
        match self {
            Self::Response(r) => Some(r),
            Self::Sections(_) => None,
        }
    }

    pub fn into_sections(self) -> Option<SectionStream> {
        match self {
            Self::Sections(s) => Some(s),
            Self::Response(_) => None,
        }
    }
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Response(r) => f.debug_tuple("Response").field(r).finish(),
            Self::Sections(_) => f.write_str("Sections(..)"),
        }
    }
}

/// Sends requests and hands back replies.
#[async_trait]
pub trait Bus: Send + Sync {
    async fn send_request(&self, request: Request) -> anyhow::Result<Reply>;

    /// Number of requests answered with a plain [`Response`].
    fn serial_request_count(&self) -> u64;

    /// Total time those requests took, from dispatch to reply.
    fn serial_request_duration(&self) -> Duration;
}

/// Application side of the bus.
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    async fn handle(&self, request: Request, responder: Responder);
}

/// One-shot reply channel handed to a [`RequestHandler`].
///
/// Consumed by whichever reply method the handler picks, so every request
/// gets at most one reply.
#[derive(Debug)]
pub struct Responder {
    reply: oneshot::Sender<Reply>,
}

impl Responder {
    pub fn channel() -> (Self, oneshot::Receiver<Reply>) {
        let (reply, rx) = oneshot::channel();
        (Self { reply }, rx)
    }

    pub fn send_response(self, response: Response) -> Result<()> {
        self.reply
            .send(Reply::Response(response))
            .map_err(|_| CodecError::Closed)
    }

    /// Switch to a sectioned reply.
    ///
    /// Elements written to the returned encoder reach the requester with
    /// backpressure; dropping the encoder ends the reply.
    pub fn send_parallel_response(self) -> Result<SectionEncoder<FrameSender>> {
        let (tx, rx) = frame_channel();
        self.reply
            .send(Reply::Sections(decode_sections(rx)))
            .map_err(|_| CodecError::Closed)?;
        Ok(SectionEncoder::new(tx))
    }
}

/// In-process bus serving every request with one injected handler.
pub struct LocalBus<H> {
    handler: Arc<H>,
    serial_count: AtomicU64,
    serial_nanos: AtomicU64,
}

impl<H: RequestHandler> LocalBus<H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler: Arc::new(handler),
            serial_count: AtomicU64::new(0),
            serial_nanos: AtomicU64::new(0),
        }
    }

    fn record_serial_request(&self, elapsed: Duration) {
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.serial_count.fetch_add(1, Ordering::Relaxed);
        self.serial_nanos.fetch_add(nanos, Ordering::Relaxed);
    }
}

#[async_trait]
impl<H: RequestHandler> Bus for LocalBus<H> {
    async fn send_request(&self, request: Request) -> anyhow::Result<Reply> {
        let (responder, reply) = Responder::channel();
        let handler = Arc::clone(&self.handler);
        let started = Instant::now();

        tracing::debug!(
            method = %request.method,
            queue_id = %request.queue_id,
            resource = %request.resource,
            "Dispatching request"
        );
        tokio::spawn(async move { handler.handle(request, responder).await });

        let reply = reply
            .await
            .map_err(|_| anyhow::anyhow!("Handler finished without sending a reply"))?;
        if let Reply::Response(_) = &reply {
            self.record_serial_request(started.elapsed());
        }
        Ok(reply)
    }

    fn serial_request_count(&self) -> u64 {
        self.serial_count.load(Ordering::Relaxed)
    }

    fn serial_request_duration(&self) -> Duration {
        Duration::from_nanos(self.serial_nanos.load(Ordering::Relaxed))
    }
}

// =============================================================================
// Tests
// =============================================================================
