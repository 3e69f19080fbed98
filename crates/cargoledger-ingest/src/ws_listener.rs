//! `EvmWsListener`: the [`LogSubscriber`] for an Ethereum JSON-RPC
//! WebSocket node, using `eth_subscribe("logs", {address})`.
//!
//! # Usage
//! ```no_run
//! use cargoledger_ingest::{config::PipelineConfig, ws_listener::EvmWsListener};
//!
//! let config = PipelineConfig::new(
//!     "wss://eth-sepolia.example/ws",
//!     "0x5FbDB2315678afecb367f032d93F642f64180aa3",
//! );
//! let listener = EvmWsListener::new(&config).expect("valid config");
//! ```

use crate::{
    config::PipelineConfig,
    listener::{LogSubscriber, LogSubscription},
};
use async_trait::async_trait;
use cargoledger_core::{
    error::{ConfigError, StreamError},
    event::RawLogEntry,
};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// JSON-RPC id of the `eth_subscribe` request.
const SUBSCRIBE_ID: u64 = 1;

/// EVM WebSocket log listener for one contract address.
///
/// Each [`open`](LogSubscriber::open) makes a fresh connection; restarts are
/// the supervisor's decision.
#[derive(Debug, Clone)]
pub struct EvmWsListener {
    url: String,
    contract_address: String,
    channel_capacity: usize,
    connect_timeout: Duration,
}

impl EvmWsListener {
    /// Validates the endpoint and contract address up front so a bad config
    /// never reaches the network.
    pub fn new(config: &PipelineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            url: config.node_url.clone(),
            contract_address: config.contract_address.clone(),
            channel_capacity: config.channel_capacity,
            connect_timeout: config.connect_timeout(),
        })
    }
}

#[async_trait]
impl LogSubscriber for EvmWsListener {
    async fn open(&self) -> Result<LogSubscription, StreamError> {
        let timeout_ms = self.connect_timeout.as_millis() as u64;
        let (ws, subscription_id) = tokio::time::timeout(self.connect_timeout, self.handshake())
            .await
            .map_err(|_| StreamError::Timeout {
                operation: "eth_subscribe".into(),
                ms: timeout_ms,
            })??;

        info!(
            url = %self.url,
            contract = %self.contract_address,
            subscription = %subscription_id,
            "log subscription confirmed"
        );

        let (entries_tx, entries_rx) = mpsc::channel(self.channel_capacity);
        let (errors_tx, errors_rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(read_loop(
            ws,
            subscription_id,
            entries_tx,
            errors_tx,
            cancel.clone(),
        ));

        Ok(LogSubscription::new(entries_rx, errors_rx, cancel, task))
    }

    fn endpoint(&self) -> &str {
        &self.url
    }
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

impl EvmWsListener {
    /// Connect, send `eth_subscribe`, and wait for the node's answer.
    async fn handshake(&self) -> Result<(WsStream, String), StreamError> {
        debug!(url = %self.url, "connecting to node");
        let (mut ws, _) = connect_async(self.url.as_str()).await.map_err(|e| {
            StreamError::ConnectionFailed {
                url: self.url.clone(),
                reason: e.to_string(),
            }
        })?;

        let request = subscribe_request(&self.contract_address);
        ws.send(Message::Text(request.to_string()))
            .await
            .map_err(|e| StreamError::Transport(format!("sending eth_subscribe: {e}")))?;

        let subscription_id = await_confirmation(&mut ws).await?;
        Ok((ws, subscription_id))
    }
}

fn subscribe_request(contract_address: &str) -> Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": SUBSCRIBE_ID,
        "method": "eth_subscribe",
        "params": ["logs", { "address": contract_address }]
    })
}

/// Read frames until the response to `eth_subscribe` arrives.
async fn await_confirmation(ws: &mut WsStream) -> Result<String, StreamError> {
    while let Some(msg) = ws.next().await {
        let msg = msg.map_err(|e| StreamError::Transport(e.to_string()))?;
        match msg {
            Message::Text(text) => {
                if let Some(answer) = parse_subscribe_response(&text) {
                    return answer;
                }
                debug!("ignoring frame before subscription confirmation");
            }
            Message::Ping(data) => {
                let _ = ws.send(Message::Pong(data)).await;
            }
            Message::Close(_) => return Err(StreamError::Closed),
            _ => {}
        }
    }
    Err(StreamError::Closed)
}

/// `Some` if `text` is the response to our subscribe request: the
/// subscription id, or the node's rejection.
fn parse_subscribe_response(text: &str) -> Option<Result<String, StreamError>> {
    let v: Value = serde_json::from_str(text).ok()?;
    if v.get("id")?.as_u64()? != SUBSCRIBE_ID {
        return None;
    }
    if let Some(err) = v.get("error") {
        return Some(Err(StreamError::Rejected {
            code: err.get("code").and_then(Value::as_i64).unwrap_or(0),
            message: err
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("subscription rejected")
                .to_string(),
        }));
    }
    match v.get("result").and_then(Value::as_str) {
        Some(id) => Some(Ok(id.to_string())),
        None => Some(Err(StreamError::Transport(
            "eth_subscribe response carries no subscription id".into(),
        ))),
    }
}

// ─── Internal WebSocket loop ──────────────────────────────────────────────────

async fn read_loop(
    ws: WsStream,
    subscription_id: String,
    entries: mpsc::Sender<RawLogEntry>,
    errors: mpsc::Sender<StreamError>,
    cancel: CancellationToken,
) {
    let (mut write, mut read) = ws.split();

    let terminal = loop {
        let msg = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("subscription cancelled; sending close frame");
                let _ = write.send(Message::Close(None)).await;
                break None;
            }
            msg = read.next() => msg,
        };

        match msg {
            None => break Some(StreamError::Closed),
            Some(Err(e)) => {
                warn!(error = %e, "websocket read error");
                break Some(StreamError::Transport(e.to_string()));
            }
            Some(Ok(Message::Text(text))) => match parse_notification(&text, &subscription_id) {
                Notification::Log(entry) => {
                    // Backpressure: wait for room, but stay responsive to shutdown.
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            let _ = write.send(Message::Close(None)).await;
                            break None;
                        }
                        sent = entries.send(entry) => {
                            if sent.is_err() {
                                debug!("entry receiver dropped; ending subscription");
                                break None;
                            }
                        }
                    }
                }
                Notification::Removed { tx_hash, log_index } => {
                    debug!(%tx_hash, log_index, "dropping removed log");
                }
                Notification::Malformed(reason) => {
                    warn!(%reason, "skipping malformed log notification");
                }
                Notification::Other => {}
            },
            Some(Ok(Message::Close(frame))) => {
                info!(?frame, "websocket closed by node");
                break Some(StreamError::Closed);
            }
            Some(Ok(Message::Ping(data))) => {
                let _ = write.send(Message::Pong(data)).await;
            }
            Some(Ok(_)) => {} // binary / pong
        }
    };

    if let Some(err) = terminal {
        error!(error = %err, "log subscription ended");
        let _ = errors.try_send(err);
    }
}

// ─── Message parsing ─────────────────────────────────────────────────────────

#[derive(Debug, PartialEq)]
enum Notification {
    Log(RawLogEntry),
    /// Reorged out; never forwarded.
    Removed { tx_hash: String, log_index: u32 },
    Malformed(String),
    /// Anything that is not a notification for our subscription.
    Other,
}

fn parse_notification(text: &str, subscription_id: &str) -> Notification {
    let v: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => return Notification::Malformed(format!("invalid JSON: {e}")),
    };
    if v.get("method").and_then(Value::as_str) != Some("eth_subscription") {
        return Notification::Other;
    }
    let Some(params) = v.get("params") else {
        return Notification::Malformed("notification without params".into());
    };
    if params.get("subscription").and_then(Value::as_str) != Some(subscription_id) {
        return Notification::Other;
    }
    let Some(result) = params.get("result") else {
        return Notification::Malformed("notification without result".into());
    };

    match parse_log(result) {
        Ok(entry) if result.get("removed").and_then(Value::as_bool).unwrap_or(false) => {
            Notification::Removed {
                tx_hash: entry.tx_hash,
                log_index: entry.log_index,
            }
        }
        Ok(entry) => Notification::Log(entry),
        Err(reason) => Notification::Malformed(reason),
    }
}

fn parse_log(result: &Value) -> Result<RawLogEntry, String> {
    let str_field = |name: &str| {
        result
            .get(name)
            .and_then(Value::as_str)
            .ok_or_else(|| format!("missing `{name}`"))
    };

    let topics = result
        .get("topics")
        .and_then(Value::as_array)
        .ok_or("missing `topics`")?
        .iter()
        .map(|t| t.as_str().map(String::from).ok_or("non-string topic"))
        .collect::<Result<Vec<_>, _>>()?;

    let data_hex = result.get("data").and_then(Value::as_str).unwrap_or("0x");
    let data = hex::decode(data_hex.strip_prefix("0x").unwrap_or(data_hex))
        .map_err(|e| format!("bad `data`: {e}"))?;

    let log_index = hex_quantity(str_field("logIndex")?)
        .and_then(|i| u32::try_from(i).ok())
        .ok_or("bad `logIndex`")?;

    Ok(RawLogEntry {
        address: str_field("address")?.to_string(),
        topics,
        data,
        block_number: hex_quantity(str_field("blockNumber")?).ok_or("bad `blockNumber`")?,
        tx_hash: str_field("transactionHash")?.to_string(),
        log_index,
    })
}

fn hex_quantity(s: &str) -> Option<u64> {
    u64::from_str_radix(s.strip_prefix("0x").unwrap_or(s), 16).ok()
}

// ─── Tests ────────────────────────────────────────────────────────────────────
