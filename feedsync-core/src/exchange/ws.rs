// feedsync-core/src/exchange/ws.rs
// ====
// Stream Subscriber
// One connection per feed. The read task forwards accepted events onto a
// bounded channel and drops the sender (closing the channel) when it ends.
// ====

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::fmt;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::errors::ExchangeError;
use super::traits::StreamPayload;
use crate::service::supervisor::Supervisor;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedKind {
    Depth,
    Trade,
    Kline { interval: String },
}

impl fmt::Display for FeedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedKind::Depth => write!(f, "depth"),
            FeedKind::Trade => write!(f, "trade"),
            FeedKind::Kline { interval } => write!(f, "kline_{}", interval),
        }
    }
}

/// What to subscribe to and how much to buffer.
#[derive(Debug, Clone)]
pub struct FeedSpec {
    pub symbol: String,
    pub kind: FeedKind,
    pub capacity: usize,
}

impl FeedSpec {
    pub fn new(symbol: &str, kind: FeedKind, capacity: usize) -> Self {
        Self {
            symbol: symbol.to_uppercase(),
            kind,
            capacity: capacity.max(1),
        }
    }

    /// e.g. `btcusdt@kline_1m`
    pub fn stream_name(&self) -> String {
        format!("{}@{}", self.symbol.to_lowercase(), self.kind)
    }
}

/// Why a read task stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEnd {
    Cancelled,
    Closed,
    ConsumerGone,
    ReadError(String),
}

pub struct StreamSubscriber {
    ws_url: String,
}

impl StreamSubscriber {
    pub fn new(ws_url: &str) -> Self {
        Self {
            ws_url: ws_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn stream_url(&self, feed: &FeedSpec) -> String {
        format!("{}/ws/{}", self.ws_url, feed.stream_name())
    }

    /// Connect and start the read task under `supervisor`.
    ///
    /// A connection failure is returned here and nothing is spawned. Once this
    /// returns `Ok`, closure of the receiver means the stream is over for good.
    pub async fn subscribe<P: StreamPayload>(
        &self,
        feed: &FeedSpec,
        supervisor: &Supervisor,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<P::Event>, ExchangeError> {
        let url = self.stream_url(feed);
        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| ExchangeError::WebSocketError(format!("connect {} failed: {}", url, e)))?;
        info!(feed = %feed.kind, symbol = %feed.symbol, "stream connected");

        let (write, read) = ws_stream.split();
        let (tx, rx) = mpsc::channel(feed.capacity);
        let feed = feed.clone();
        supervisor.spawn(async move {
            let end = pump::<P, _, _>(read, write, tx, &feed, cancel).await;
            match end {
                StreamEnd::ReadError(e) => {
                    warn!(feed = %feed.kind, symbol = %feed.symbol, error = %e, "stream read failed")
                }
                other => {
                    info!(feed = %feed.kind, symbol = %feed.symbol, reason = ?other, "stream task finished")
                }
            }
        });

        Ok(rx)
    }
}

/// Decode one message; `Ok(None)` when it fails the kind/symbol predicate.
pub fn decode<P: StreamPayload>(
    payload: &[u8],
    symbol: &str,
) -> Result<Option<P::Event>, ExchangeError> {
    let msg: P = serde_json::from_slice(payload)?;
    if !msg.accepts(symbol) {
        return Ok(None);
    }
    msg.into_event().map(Some)
}

/// Read loop of one subscription.
///
/// Both the socket read and the channel send race against `cancel`, so a
/// blocked read or a full channel never delays shutdown.
pub async fn pump<P, R, W>(
    mut read: R,
    mut write: W,
    tx: mpsc::Sender<P::Event>,
    feed: &FeedSpec,
    cancel: CancellationToken,
) -> StreamEnd
where
    P: StreamPayload,
    R: Stream<Item = Result<Message, WsError>> + Unpin,
    W: Sink<Message> + Unpin,
    W::Error: fmt::Display,
{
    let end = loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break StreamEnd::Cancelled,
            frame = read.next() => frame,
        };

        let payload = match frame {
            Some(Ok(Message::Text(text))) => text.into_bytes(),
            Some(Ok(Message::Binary(bin))) => bin,
            Some(Ok(Message::Ping(payload))) => {
                if let Err(e) = write.send(Message::Pong(payload)).await {
                    break StreamEnd::ReadError(format!("pong failed: {}", e));
                }
                continue;
            }
            Some(Ok(Message::Close(_))) | None => break StreamEnd::Closed,
            Some(Ok(_)) => continue,
            Some(Err(e)) => break StreamEnd::ReadError(e.to_string()),
        };

        let event = match decode::<P>(&payload, &feed.symbol) {
            Ok(Some(event)) => event,
            Ok(None) => {
                debug!(feed = %feed.kind, "skipping message for another kind or symbol");
                continue;
            }
            Err(e) => {
                warn!(feed = %feed.kind, error = %e, "skipping undecodable message");
                continue;
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => break StreamEnd::Cancelled,
            sent = tx.send(event) => {
                if sent.is_err() {
                    break StreamEnd::ConsumerGone;
                }
            }
        }
    };

    if let Err(e) = write.close().await {
        debug!(feed = %feed.kind, error = %e, "close after stream end failed");
    }
    end
}
