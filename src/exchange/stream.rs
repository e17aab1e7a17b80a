//! Live streaming subscription manager (C3).
//!
//! Grounded on the ground-truth `okx_websocket.py`: one persistent
//! connection, a subscription map keyed by `(channel, pair)`, and a
//! reconnection loop that re-issues every current subscription (grouped into
//! one `SUBSCRIBE` call) as soon as the connection comes back up. Per §9's
//! redesign note, the map is keyed by a typed `(ChannelKind, PairId)` pair
//! instead of grouping boxed callbacks by pointer identity, and every
//! confirmed kline is upserted through the [`CandleStore`] rather than only
//! cached in memory.

use crate::model::Bar;
use crate::pair::PairId;
use crate::store::CandleStore;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, info, warn};

const STREAM_URL: &str = "wss://stream.binance.com:9443/ws";

/// The only channel kind the gateway streams today; kept as an enum so a
/// second kind (e.g. order book deltas) can join the dispatch table later
/// without renaming the keyed-by-pair map everywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    OneMinuteKline,
}

impl ChannelKind {
    fn stream_suffix(self) -> &'static str {
        match self {
            ChannelKind::OneMinuteKline => "kline_1m",
        }
    }
}

type HandlerId = (ChannelKind, PairId);

fn stream_name(kind: ChannelKind, pair: &PairId) -> String {
    format!("{}@{}", pair.exchange_symbol().to_lowercase(), kind.stream_suffix())
}

enum Command {
    Subscribe(PairId),
    Unsubscribe(PairId),
}

/// A confirmed or in-progress bar pushed out for live consumers (e.g. the
/// `/ws/ticker` boundary), independent of what the store persists.
#[derive(Debug, Clone)]
pub struct TickerUpdate {
    pub pair: PairId,
    pub bar: Bar,
}

/// Owns the set of live kline subscriptions and the reconnect loop behind them.
pub struct StreamCollector {
    command_tx: mpsc::UnboundedSender<Command>,
    ticker_tx: broadcast::Sender<TickerUpdate>,
}

impl StreamCollector {
    pub fn new(store: Arc<CandleStore>) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (ticker_tx, _) = broadcast::channel(1024);

        let manager_ticker = ticker_tx.clone();
        tokio::spawn(async move {
            Self::run(command_rx, store, manager_ticker).await;
        });

        StreamCollector {
            command_tx,
            ticker_tx,
        }
    }

    pub fn ticker_updates(&self) -> broadcast::Receiver<TickerUpdate> {
        self.ticker_tx.subscribe()
    }

    /// Idempotent: subscribing to an already-subscribed pair is a no-op.
    pub fn subscribe(&self, pair: PairId) {
        let _ = self.command_tx.send(Command::Subscribe(pair));
    }

    pub fn unsubscribe(&self, pair: PairId) {
        let _ = self.command_tx.send(Command::Unsubscribe(pair));
    }

    /// One connection for the lifetime of the process. `subscriptions` and
    /// `by_symbol` survive reconnects so every new connection re-issues the
    /// full subscription set in one grouped `SUBSCRIBE` call instead of
    /// losing state to a dropped socket.
    async fn run(
        mut command_rx: mpsc::UnboundedReceiver<Command>,
        store: Arc<CandleStore>,
        ticker_tx: broadcast::Sender<TickerUpdate>,
    ) {
        let mut subscriptions: HashMap<HandlerId, ()> = HashMap::new();
        let mut by_symbol: HashMap<String, PairId> = HashMap::new();

        loop {
            info!(url = %STREAM_URL, "connecting to stream");
            let ws_stream = match connect_async(STREAM_URL).await {
                Ok((stream, _)) => stream,
                Err(e) => {
                    warn!(error = %e, "connect failed");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    continue;
                }
            };
            info!("connected");
            let (mut write, mut read) = ws_stream.split();

            if !subscriptions.is_empty() {
                let params: Vec<String> = subscriptions
                    .keys()
                    .map(|(kind, pair)| stream_name(*kind, pair))
                    .collect();
                let count = params.len();
                if send_subscribe(&mut write, &params, true).await.is_err() {
                    warn!("resubscribe after reconnect failed, retrying connection");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    continue;
                }
                info!(count, "resubscribed after reconnect");
            }

            'connection: loop {
                tokio::select! {
                    cmd = command_rx.recv() => {
                        match cmd {
                            Some(Command::Subscribe(pair)) => {
                                let key = (ChannelKind::OneMinuteKline, pair.clone());
                                if subscriptions.contains_key(&key) {
                                    debug!(pair = %pair, "already subscribed");
                                    continue;
                                }
                                let name = stream_name(ChannelKind::OneMinuteKline, &pair);
                                if send_subscribe(&mut write, &[name], true).await.is_ok() {
                                    by_symbol.insert(pair.exchange_symbol(), pair.clone());
                                    subscriptions.insert(key, ());
                                    info!(pair = %pair, "subscribed");
                                } else {
                                    warn!(pair = %pair, "subscribe failed, reconnecting");
                                    break 'connection;
                                }
                            }
                            Some(Command::Unsubscribe(pair)) => {
                                let key = (ChannelKind::OneMinuteKline, pair.clone());
                                if subscriptions.remove(&key).is_some() {
                                    by_symbol.remove(&pair.exchange_symbol());
                                    let name = stream_name(ChannelKind::OneMinuteKline, &pair);
                                    let _ = send_subscribe(&mut write, &[name], false).await;
                                    info!(pair = %pair, "unsubscribed");
                                }
                            }
                            None => return,
                        }
                    }
                    msg = tokio::time::timeout(Duration::from_secs(90), read.next()) => {
                        match msg {
                            Ok(Some(Ok(Message::Text(text)))) => {
                                if let Some((pair, bar)) = parse_kline_event(&text, &by_symbol) {
                                    if let Err(reason) = bar.validate() {
                                        warn!(pair = %pair, reason = %reason, "dropping invalid bar from stream");
                                    } else {
                                        if bar.confirm {
                                            if let Err(e) = store.upsert_bar(&bar) {
                                                error!(pair = %pair, error = %e, "failed to persist confirmed bar");
                                            }
                                        }
                                        let _ = ticker_tx.send(TickerUpdate { pair, bar });
                                    }
                                }
                            }
                            Ok(Some(Ok(Message::Ping(_) | Message::Pong(_)))) => continue,
                            Ok(Some(Ok(Message::Close(_)))) | Ok(None) => {
                                warn!("stream closed by peer");
                                break 'connection;
                            }
                            Ok(Some(Err(e))) => {
                                warn!(error = %e, "stream read error");
                                break 'connection;
                            }
                            Err(_) => {
                                warn!("no message within watchdog window, reconnecting");
                                break 'connection;
                            }
                            _ => {}
                        }
                    }
                }
            }
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
    }
}

type WsWrite = futures_util::stream::SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

static NEXT_REQUEST_ID: AtomicI64 = AtomicI64::new(1);

async fn send_subscribe(write: &mut WsWrite, params: &[String], subscribe: bool) -> Result<(), WsError> {
    let id = NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed);
    let method = if subscribe { "SUBSCRIBE" } else { "UNSUBSCRIBE" };
    let payload = serde_json::json!({ "method": method, "params": params, "id": id });
    write.send(Message::Text(payload.to_string())).await
}

#[derive(Debug, Deserialize)]
struct BinanceKlineEvent {
    #[serde(rename = "e")]
    event_type: String,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "k")]
    kline: BinanceKline,
}

#[derive(Debug, Deserialize)]
struct BinanceKline {
    #[serde(rename = "t")]
    start_time: i64,
    #[serde(rename = "o")]
    open: String,
    #[serde(rename = "h")]
    high: String,
    #[serde(rename = "l")]
    low: String,
    #[serde(rename = "c")]
    close: String,
    #[serde(rename = "v")]
    volume: String,
    #[serde(rename = "q")]
    quote_volume: String,
    #[serde(rename = "x")]
    is_closed: bool,
}

/// Resolves the event's wire symbol back to a [`PairId`] via the live
/// subscription index, since a multiplexed connection carries bars for every
/// subscribed pair and the event itself only names the exchange symbol.
fn parse_kline_event(text: &str, by_symbol: &HashMap<String, PairId>) -> Option<(PairId, Bar)> {
    let event: BinanceKlineEvent = serde_json::from_str(text).ok()?;
    if event.event_type != "kline" {
        return None;
    }
    let pair = by_symbol.get(&event.symbol.to_uppercase())?.clone();
    let k = event.kline;
    let bar = Bar {
        pair: pair.canonical(),
        timestamp_ms: k.start_time,
        open: k.open.parse().unwrap_or(0.0),
        high: k.high.parse().unwrap_or(0.0),
        low: k.low.parse().unwrap_or(0.0),
        close: k.close.parse().unwrap_or(0.0),
        volume: k.volume.parse().unwrap_or(0.0),
        volume_quote: k.quote_volume.parse().unwrap_or(0.0),
        volume_quote_estimated: false,
        confirm: k.is_closed,
    };
    Some((pair, bar))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_for(pair: &PairId) -> HashMap<String, PairId> {
        let mut map = HashMap::new();
        map.insert(pair.exchange_symbol(), pair.clone());
        map
    }

    #[test]
    fn parses_confirmed_kline_event() {
        let pair = PairId::from_canonical("BTC-USDT").unwrap();
        let payload = r#"{
            "e": "kline",
            "s": "BTCUSDT",
            "k": {
                "t": 1700000000000,
                "o": "100.0",
                "h": "105.0",
                "l": "95.0",
                "c": "102.0",
                "v": "10.0",
                "q": "1000.0",
                "x": true
            }
        }"#;
        let (resolved, bar) = parse_kline_event(payload, &index_for(&pair)).unwrap();
        assert_eq!(resolved, pair);
        assert_eq!(bar.pair, "BTC-USDT");
        assert_eq!(bar.timestamp_ms, 1_700_000_000_000);
        assert!(bar.confirm);
    }

    #[test]
    fn ignores_non_kline_events() {
        let pair = PairId::from_canonical("BTC-USDT").unwrap();
        assert!(parse_kline_event(r#"{"e":"trade","s":"BTCUSDT","k":{}}"#, &index_for(&pair)).is_none());
    }

    #[test]
    fn ignores_events_for_unsubscribed_symbols() {
        let pair = PairId::from_canonical("BTC-USDT").unwrap();
        let payload = r#"{
            "e": "kline",
            "s": "ETHUSDT",
            "k": {"t": 60000, "o": "1", "h": "1", "l": "1", "c": "1", "v": "1", "q": "1", "x": true}
        }"#;
        assert!(parse_kline_event(payload, &index_for(&pair)).is_none());
    }

    #[test]
    fn in_progress_kline_is_not_marked_confirmed() {
        let pair = PairId::from_canonical("BTC-USDT").unwrap();
        let payload = r#"{
            "e": "kline",
            "s": "BTCUSDT",
            "k": {"t": 60000, "o": "1", "h": "1", "l": "1", "c": "1", "v": "1", "q": "1", "x": false}
        }"#;
        let (_, bar) = parse_kline_event(payload, &index_for(&pair)).unwrap();
        assert!(!bar.confirm);
    }
}
