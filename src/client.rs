/// The client facade: public request/response operations and subscription
/// streams over a single shared connection.
///
/// Every operation follows the same shape: obtain a token for private
/// calls, allocate capacity-1 completion channels, install a
/// pending-request entry under a fresh request id, write the frame
/// (rolling the entry back on any failure up to and including the write),
/// then select over the response, the error channel, and the request
/// deadline. The dispatcher resolves entries from the read path; a
/// deadline that fires while waiting yields an interrupted error because
/// the server outcome is unknown.
use std::collections::{BTreeMap, HashMap};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::task::{Context, Poll};
use std::time::Instant;

use futures_util::SinkExt;
use log::debug;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_stream::Stream;
use tokio_tungstenite::tungstenite::Message as WsMsg;

use crate::auth::NonceSource;
use crate::config::{ClientConfig, Environment, EndpointConfig};
use crate::engine::{self, LifecycleEvent, WsSink};
use crate::errors::Error;
use crate::models::{
    AddOrder, AddOrderStatus, BookDepth, BookSnapshotEvent, BookUpdateEvent,
    CancelAllOrdersAfterRequest, CancelAllOrdersAfterStatus, CancelAllRequest, CancelAllStatus,
    CancelOrderRequest, CancelOrderStatus, EditOrder, EditOrderStatus, Heartbeat, OhlcEvent,
    OhlcInterval, OpenOrdersEvent, OrderEnvelope, OrderResponse, OwnTradesEvent, PingRequest,
    RequestStatus, SpreadEvent, SubscribeRequest, SubscriptionSpec, SystemStatus, TickerEvent,
    TradeEvent,
};
use crate::pending::{
    waiter_pair, PendingRequests, PendingTable, SubscriptionWaiter, Waiter,
};
use crate::registry::{
    BookRecord, OhlcRecord, OpenOrdersRecord, OwnTradesRecord, Registry, Sink, SpreadRecord,
    TickerRecord, TradeRecord,
};
use crate::rest::{Credentials, RestClient};
use crate::token::TokenCache;

/// Capacity of the built-in heartbeat, system-status, and lifecycle
/// channels. These are lossy by contract: a receiver that lags loses the
/// oldest entries instead of stalling the read path.
const BUILTIN_CHANNEL_CAPACITY: usize = 64;

/// Snapshot sinks get ten slots per subscribed pair so a fresh snapshot
/// after a reconnect is never dropped while updates are still draining.
const SNAPSHOT_SLOTS_PER_PAIR: usize = 10;

type ReadErrorHook = Box<dyn Fn(&Error) + Send + Sync>;
type CloseHook = Box<dyn Fn(Option<&str>) + Send + Sync>;

/// A typed stream of subscription events.
///
/// Each item is a `Result<T, Error>`:
/// - `Ok(event)` — a normal data message, in server order
/// - `Err(Error::StreamInterrupted)` — the connection was lost; delivered
///   exactly once per disconnect, before any post-reconnect event
///
/// The stream itself stays open across reconnects; it ends only after an
/// explicit unsubscribe or client teardown.
pub struct EventStream<T> {
    rx: mpsc::Receiver<Result<T, Error>>,
}

impl<T> std::fmt::Debug for EventStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream").finish_non_exhaustive()
    }
}

impl<T> EventStream<T> {
    /// Receive the next item, or `None` once the subscription is gone.
    pub async fn recv(&mut self) -> Option<Result<T, Error>> {
        self.rx.recv().await
    }
}

impl<T> Stream for EventStream<T> {
    type Item = Result<T, Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

pub(crate) struct PrivateAuth {
    pub rest: RestClient,
    pub token: TokenCache,
}

/// State shared between the facade, the dispatcher, and the engine tasks.
pub(crate) struct ClientInner {
    pub cfg: ClientConfig,
    pub ws_url: String,
    pub auth: Option<PrivateAuth>,
    pub conn: Mutex<Option<WsSink>>,
    pub connected: AtomicBool,
    pub should_run: AtomicBool,
    pub nonces: NonceSource,
    pub pending: PendingRequests,
    pub registry: Registry,
    pub heartbeat_tx: broadcast::Sender<Heartbeat>,
    pub status_tx: broadcast::Sender<SystemStatus>,
    pub lifecycle_tx: broadcast::Sender<LifecycleEvent>,
    pub last_pong: Mutex<Instant>,
    read_error_hook: StdMutex<Option<ReadErrorHook>>,
    close_hook: StdMutex<Option<CloseHook>>,
}

impl ClientInner {
    pub(crate) fn next_reqid(&self) -> u64 {
        self.nonces.next()
    }

    /// Write one text frame on the shared connection.
    pub(crate) async fn write_frame(&self, frame: String) -> Result<(), Error> {
        let mut conn = self.conn.lock().await;
        match conn.as_mut() {
            Some(sink) => sink
                .send(WsMsg::Text(frame))
                .await
                .map_err(|err| Error::Transport(err.to_string())),
            None => Err(Error::NotConnected),
        }
    }

    /// Bearer token for private operations, from the cache or a fresh
    /// REST fetch.
    pub(crate) async fn websocket_token(&self, operation: &'static str) -> Result<String, Error> {
        match &self.auth {
            Some(auth) => auth.token.get(&auth.rest, &self.nonces).await,
            None => Err(Error::PrivateOnly(operation)),
        }
    }

    pub(crate) fn notify_read_error(&self, err: &Error) {
        if let Ok(slot) = self.read_error_hook.lock() {
            if let Some(hook) = slot.as_ref() {
                hook(err);
            }
        }
    }

    pub(crate) fn notify_close(&self, reason: Option<&str>) {
        if let Ok(slot) = self.close_hook.lock() {
            if let Some(hook) = slot.as_ref() {
                hook(reason);
            }
        }
    }
}

/// Send one request frame and wait for its typed response.
///
/// The pending entry is installed before the frame is written and rolled
/// back on serialization failure, write failure, or a fired deadline, so
/// the table never outlives its waiter.
pub(crate) async fn request_roundtrip<T>(
    inner: &ClientInner,
    table: &PendingTable<Waiter<T>>,
    operation: &'static str,
    reqid: u64,
    frame: Result<String, serde_json::Error>,
) -> Result<T, Error> {
    let (waiter, mut rx, mut err_rx) = waiter_pair(operation);
    table.insert(reqid, waiter).await;

    let frame = match frame {
        Ok(frame) => frame,
        Err(err) => {
            table.remove(reqid).await;
            return Err(err.into());
        }
    };
    if let Err(err) = inner.write_frame(frame).await {
        table.remove(reqid).await;
        return Err(err);
    }

    tokio::select! {
        response = rx.recv() => match response {
            Some(response) => Ok(response),
            None => Err(err_rx
                .try_recv()
                .unwrap_or(Error::OperationInterrupted { operation })),
        },
        err = err_rx.recv() => match err {
            Some(err) => Err(err),
            None => Err(Error::OperationInterrupted { operation }),
        },
        _ = tokio::time::sleep(inner.cfg.request_timeout) => {
            table.remove(reqid).await;
            Err(Error::OperationInterrupted { operation })
        }
    }
}

/// Send one subscribe/unsubscribe frame and wait until the server has
/// served every pair. Any per-pair failure yields an aggregated
/// subscription error and leaves the registry untouched.
pub(crate) async fn subscribe_roundtrip(
    inner: &ClientInner,
    operation: &'static str,
    pairs: Option<&[String]>,
    spec: &SubscriptionSpec,
) -> Result<(), Error> {
    let reqid = inner.next_reqid();
    let (tx, mut rx) = mpsc::channel(1);
    let (err_tx, mut err_rx) = mpsc::channel(1);
    let waiter = SubscriptionWaiter {
        operation,
        pairs: pairs.map(<[String]>::to_vec).unwrap_or_default(),
        served: HashMap::new(),
        failures: BTreeMap::new(),
        tx,
        err_tx,
    };
    let table = if operation == "subscribe" {
        &inner.pending.subscribe
    } else {
        &inner.pending.unsubscribe
    };
    table.insert(reqid, waiter).await;

    let frame = match serde_json::to_string(&SubscribeRequest {
        event: operation,
        reqid,
        pair: pairs,
        subscription: spec,
    }) {
        Ok(frame) => frame,
        Err(err) => {
            table.remove(reqid).await;
            return Err(err.into());
        }
    };
    if let Err(err) = inner.write_frame(frame).await {
        table.remove(reqid).await;
        return Err(err);
    }

    let outcome = tokio::select! {
        outcome = rx.recv() => match outcome {
            Some(outcome) => outcome,
            None => {
                return Err(err_rx
                    .try_recv()
                    .unwrap_or(Error::OperationInterrupted { operation }));
            }
        },
        err = err_rx.recv() => {
            return Err(err.unwrap_or(Error::OperationInterrupted { operation }));
        }
        _ = tokio::time::sleep(inner.cfg.request_timeout) => {
            table.remove(reqid).await;
            return Err(Error::OperationInterrupted { operation });
        }
    };

    if outcome.failures.is_empty() {
        Ok(())
    } else {
        Err(Error::Subscription {
            operation,
            failures: outcome.failures,
        })
    }
}

fn owned_pairs(pairs: &[&str]) -> Result<Vec<String>, Error> {
    if pairs.is_empty() {
        return Err(Error::Validation("at least one pair is required".into()));
    }
    Ok(pairs.iter().map(|pair| (*pair).to_string()).collect())
}

fn sink_pair<T>(capacity: usize) -> (Sink<T>, EventStream<T>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (tx, EventStream { rx })
}

/// WebSocket client for the Kraken market-data and trading API.
///
/// A client owns one persistent connection and multiplexes
/// request/response operations and server-pushed streams above it. The
/// engine reconnects transparently on connection loss and re-issues the
/// live subscriptions; subscribers keep their streams and observe the gap
/// through the interruption marker.
pub struct KrakenClient {
    inner: Arc<ClientInner>,
    reader_handle: Option<tokio::task::JoinHandle<()>>,
    ping_handle: Option<tokio::task::JoinHandle<()>>,
}

impl KrakenClient {
    /// Connect to the public market-data endpoint.
    pub async fn connect(environment: Environment) -> Result<Self, Error> {
        Self::connect_with_config(environment, ClientConfig::default()).await
    }

    /// Connect to the public market-data endpoint with custom configuration.
    pub async fn connect_with_config(
        environment: Environment,
        config: ClientConfig,
    ) -> Result<Self, Error> {
        let endpoints = EndpointConfig::from_environment(environment);
        Self::establish(endpoints.public_ws_url, None, config).await
    }

    /// Connect to the private endpoint. Order operations and account
    /// streams authenticate with a token minted through the REST
    /// collaborator.
    pub async fn connect_private(
        environment: Environment,
        credentials: Credentials,
    ) -> Result<Self, Error> {
        Self::connect_private_with_config(environment, credentials, ClientConfig::default()).await
    }

    /// Connect to the private endpoint with custom configuration.
    pub async fn connect_private_with_config(
        environment: Environment,
        credentials: Credentials,
        config: ClientConfig,
    ) -> Result<Self, Error> {
        let endpoints = EndpointConfig::from_environment(environment);
        let auth = PrivateAuth {
            rest: RestClient::new(endpoints.rest_base, credentials),
            token: TokenCache::new(),
        };
        Self::establish(endpoints.private_ws_url, Some(auth), config).await
    }

    /// Connect a public client against a custom endpoint (proxies, test
    /// doubles).
    pub async fn connect_url(url: impl Into<String>, config: ClientConfig) -> Result<Self, Error> {
        Self::establish(url.into(), None, config).await
    }

    /// Connect a private client against custom WebSocket and REST
    /// endpoints (proxies, test doubles).
    pub async fn connect_private_url(
        url: impl Into<String>,
        rest_base: impl Into<String>,
        credentials: Credentials,
        config: ClientConfig,
    ) -> Result<Self, Error> {
        let auth = PrivateAuth {
            rest: RestClient::new(rest_base.into(), credentials),
            token: TokenCache::new(),
        };
        Self::establish(url.into(), Some(auth), config).await
    }

    async fn establish(
        url: String,
        auth: Option<PrivateAuth>,
        config: ClientConfig,
    ) -> Result<Self, Error> {
        let (heartbeat_tx, _) = broadcast::channel(BUILTIN_CHANNEL_CAPACITY);
        let (status_tx, _) = broadcast::channel(BUILTIN_CHANNEL_CAPACITY);
        let (lifecycle_tx, _) = broadcast::channel(BUILTIN_CHANNEL_CAPACITY);

        let inner = Arc::new(ClientInner {
            cfg: config,
            ws_url: url,
            auth,
            conn: Mutex::new(None),
            connected: AtomicBool::new(false),
            should_run: AtomicBool::new(true),
            nonces: NonceSource::new(),
            pending: PendingRequests::new(),
            registry: Registry::new(),
            heartbeat_tx,
            status_tx,
            lifecycle_tx,
            last_pong: Mutex::new(Instant::now()),
            read_error_hook: StdMutex::new(None),
            close_hook: StdMutex::new(None),
        });

        let (reader_handle, ping_handle) = engine::start(&inner).await?;
        Ok(Self {
            inner,
            reader_handle: Some(reader_handle),
            ping_handle: Some(ping_handle),
        })
    }

    // -----------------------------------------------------------------------
    // Connection state and built-in streams
    // -----------------------------------------------------------------------

    /// Whether the connection is currently established.
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Whether the client has been permanently terminated (explicit
    /// disconnect or reconnect attempts exhausted).
    pub fn is_terminated(&self) -> bool {
        !self.inner.should_run.load(Ordering::SeqCst)
    }

    /// Server heartbeats. Lossy under congestion: a lagging receiver
    /// loses the oldest entries, never the read path.
    pub fn heartbeats(&self) -> broadcast::Receiver<Heartbeat> {
        self.inner.heartbeat_tx.subscribe()
    }

    /// System-status announcements, same lossy contract as heartbeats.
    pub fn system_status(&self) -> broadcast::Receiver<SystemStatus> {
        self.inner.status_tx.subscribe()
    }

    /// Connection lifecycle events (reconnecting/reconnected/disconnected).
    pub fn lifecycle(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.inner.lifecycle_tx.subscribe()
    }

    /// Whether a recovery task is currently re-issuing the given topic
    /// (wire names: `ticker`, `ohlc`, `trade`, `spread`, `book`,
    /// `ownTrades`, `openOrders`).
    pub fn is_resubscribing(&self, topic: &str) -> bool {
        self.inner.registry.is_resubscribing(topic)
    }

    /// Install a callback invoked for every message the dispatcher could
    /// not classify or correlate.
    pub fn set_read_error_hook<F>(&self, hook: F)
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        if let Ok(mut slot) = self.inner.read_error_hook.lock() {
            *slot = Some(Box::new(hook));
        }
    }

    /// Install a callback invoked once per lost connection, after pending
    /// requests are drained and interruption markers are delivered. The
    /// argument is the server's close reason when one was sent.
    pub fn set_close_hook<F>(&self, hook: F)
    where
        F: Fn(Option<&str>) + Send + Sync + 'static,
    {
        if let Ok(mut slot) = self.inner.close_hook.lock() {
            *slot = Some(Box::new(hook));
        }
    }

    /// Close the connection and tear the client down. All subscriptions
    /// are dropped; their streams receive a final interruption marker and
    /// then end.
    pub async fn disconnect(&self) -> Result<(), Error> {
        debug!("client.disconnect");
        self.inner.should_run.store(false, Ordering::SeqCst);
        self.inner.connected.store(false, Ordering::SeqCst);

        {
            let mut conn = self.inner.conn.lock().await;
            if let Some(sink) = conn.as_mut() {
                let _ = sink.send(WsMsg::Close(None)).await;
            }
        }

        self.inner.pending.interrupt_all().await;
        self.inner.registry.interrupt_all().await;
        self.inner.registry.clear_all();
        self.inner.notify_close(None);
        *self.inner.conn.lock().await = None;
        let _ = self.inner.lifecycle_tx.send(LifecycleEvent::Disconnected {
            reason: "explicit disconnect".to_string(),
            final_: true,
        });
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Request/response operations
    // -----------------------------------------------------------------------

    /// Application-level ping; succeeds on any pong echoing the request id.
    pub async fn ping(&self) -> Result<(), Error> {
        debug!("client.ping");
        let inner = &self.inner;
        let reqid = inner.next_reqid();
        let frame = serde_json::to_string(&PingRequest {
            event: "ping",
            reqid,
        });
        request_roundtrip(inner, &inner.pending.ping, "ping", reqid, frame)
            .await
            .map(|_pong| ())
    }

    /// Submit a new order. A server-side rejection is returned as an
    /// operation error carrying the parsed response body.
    pub async fn add_order(&self, order: AddOrder) -> Result<AddOrderStatus, Error> {
        debug!(
            "client.add_order pair={} side={:?} ordertype={:?}",
            order.pair, order.side, order.order_type
        );
        let inner = &self.inner;
        let token = inner.websocket_token("addOrder").await?;
        let reqid = inner.next_reqid();
        let frame = serde_json::to_string(&OrderEnvelope {
            event: "addOrder",
            token: &token,
            reqid,
            body: &order,
        });
        let status =
            request_roundtrip(inner, &inner.pending.add_order, "addOrder", reqid, frame).await?;
        if status.status == RequestStatus::Error {
            let message = status
                .error_message
                .clone()
                .unwrap_or_else(|| "unknown server error".to_string());
            return Err(Error::Operation {
                operation: "addOrder",
                message,
                response: Some(Box::new(OrderResponse::Add(status))),
            });
        }
        Ok(status)
    }

    /// Amend price, volume, or flags of an open order.
    pub async fn edit_order(&self, edit: EditOrder) -> Result<EditOrderStatus, Error> {
        debug!(
            "client.edit_order orderid={} pair={}",
            edit.order_id, edit.pair
        );
        let inner = &self.inner;
        let token = inner.websocket_token("editOrder").await?;
        let reqid = inner.next_reqid();
        let frame = serde_json::to_string(&OrderEnvelope {
            event: "editOrder",
            token: &token,
            reqid,
            body: &edit,
        });
        let status =
            request_roundtrip(inner, &inner.pending.edit_order, "editOrder", reqid, frame).await?;
        if status.status == RequestStatus::Error {
            let message = status
                .error_message
                .clone()
                .unwrap_or_else(|| "unknown server error".to_string());
            return Err(Error::Operation {
                operation: "editOrder",
                message,
                response: Some(Box::new(OrderResponse::Edit(status))),
            });
        }
        Ok(status)
    }

    /// Cancel the orders named by server txids or user references.
    pub async fn cancel_order(&self, txids: &[&str]) -> Result<CancelOrderStatus, Error> {
        debug!("client.cancel_order txids={txids:?}");
        if txids.is_empty() {
            return Err(Error::Validation(
                "at least one transaction id is required".into(),
            ));
        }
        let inner = &self.inner;
        let token = inner.websocket_token("cancelOrder").await?;
        let reqid = inner.next_reqid();
        let txids: Vec<String> = txids.iter().map(|txid| (*txid).to_string()).collect();
        let frame = serde_json::to_string(&CancelOrderRequest {
            event: "cancelOrder",
            token: &token,
            reqid,
            txid: &txids,
        });
        let status = request_roundtrip(
            inner,
            &inner.pending.cancel_order,
            "cancelOrder",
            reqid,
            frame,
        )
        .await?;
        if status.status == RequestStatus::Error {
            let message = status
                .error_message
                .clone()
                .unwrap_or_else(|| "unknown server error".to_string());
            return Err(Error::Operation {
                operation: "cancelOrder",
                message,
                response: Some(Box::new(OrderResponse::Cancel(status))),
            });
        }
        Ok(status)
    }

    /// Cancel every open order.
    pub async fn cancel_all_orders(&self) -> Result<CancelAllStatus, Error> {
        debug!("client.cancel_all_orders");
        let inner = &self.inner;
        let token = inner.websocket_token("cancelAll").await?;
        let reqid = inner.next_reqid();
        let frame = serde_json::to_string(&CancelAllRequest {
            event: "cancelAll",
            token: &token,
            reqid,
        });
        let status = request_roundtrip(
            inner,
            &inner.pending.cancel_all,
            "cancelAll",
            reqid,
            frame,
        )
        .await?;
        if status.status == RequestStatus::Error {
            let message = status
                .error_message
                .clone()
                .unwrap_or_else(|| "unknown server error".to_string());
            return Err(Error::Operation {
                operation: "cancelAll",
                message,
                response: Some(Box::new(OrderResponse::CancelAll(status))),
            });
        }
        Ok(status)
    }

    /// Arm (or with `timeout_secs == 0` disarm) the dead-man switch that
    /// cancels every open order unless re-armed before the timeout.
    pub async fn cancel_all_orders_after(
        &self,
        timeout_secs: u64,
    ) -> Result<CancelAllOrdersAfterStatus, Error> {
        debug!("client.cancel_all_orders_after timeout={timeout_secs}");
        let inner = &self.inner;
        let token = inner.websocket_token("cancelAllOrdersAfter").await?;
        let reqid = inner.next_reqid();
        let frame = serde_json::to_string(&CancelAllOrdersAfterRequest {
            event: "cancelAllOrdersAfter",
            token: &token,
            reqid,
            timeout: timeout_secs,
        });
        let status = request_roundtrip(
            inner,
            &inner.pending.cancel_all_after,
            "cancelAllOrdersAfter",
            reqid,
            frame,
        )
        .await?;
        if status.status == RequestStatus::Error {
            let message = status
                .error_message
                .clone()
                .unwrap_or_else(|| "unknown server error".to_string());
            return Err(Error::Operation {
                operation: "cancelAllOrdersAfter",
                message,
                response: Some(Box::new(OrderResponse::CancelAllAfter(status))),
            });
        }
        Ok(status)
    }

    // -----------------------------------------------------------------------
    // Public subscriptions
    // -----------------------------------------------------------------------

    /// Subscribe to ticker updates for the given pairs.
    pub async fn subscribe_ticker(
        &self,
        pairs: &[&str],
        capacity: usize,
    ) -> Result<EventStream<TickerEvent>, Error> {
        debug!("client.subscribe_ticker pairs={pairs:?} capacity={capacity}");
        let inner = &self.inner;
        let _guard = inner.registry.ticker.guard.lock().await;
        if inner.registry.ticker.is_active() {
            return Err(Error::Validation(
                "ticker subscription already active".into(),
            ));
        }
        let pairs = owned_pairs(pairs)?;
        let (sink, stream) = sink_pair(capacity);
        let spec = SubscriptionSpec::named("ticker");
        subscribe_roundtrip(inner, "subscribe", Some(&pairs), &spec).await?;
        inner.registry.ticker.put(TickerRecord { pairs, sink });
        Ok(stream)
    }

    /// Unsubscribe from ticker updates. The stream is not closed by the
    /// client; stop reading it after this returns.
    pub async fn unsubscribe_ticker(&self) -> Result<(), Error> {
        debug!("client.unsubscribe_ticker");
        let inner = &self.inner;
        let _guard = inner.registry.ticker.guard.lock().await;
        let Some(record) = inner.registry.ticker.get() else {
            return Err(Error::Validation("no active ticker subscription".into()));
        };
        let spec = SubscriptionSpec::named("ticker");
        subscribe_roundtrip(inner, "unsubscribe", Some(&record.pairs), &spec).await?;
        inner.registry.ticker.clear();
        Ok(())
    }

    /// Subscribe to candles for the given pairs and interval.
    pub async fn subscribe_ohlc(
        &self,
        pairs: &[&str],
        interval: OhlcInterval,
        capacity: usize,
    ) -> Result<EventStream<OhlcEvent>, Error> {
        debug!("client.subscribe_ohlc pairs={pairs:?} interval={interval:?} capacity={capacity}");
        let inner = &self.inner;
        let _guard = inner.registry.ohlc.guard.lock().await;
        if inner.registry.ohlc.is_active() {
            return Err(Error::Validation("ohlc subscription already active".into()));
        }
        let pairs = owned_pairs(pairs)?;
        let (sink, stream) = sink_pair(capacity);
        let mut spec = SubscriptionSpec::named("ohlc");
        spec.interval = Some(interval);
        subscribe_roundtrip(inner, "subscribe", Some(&pairs), &spec).await?;
        inner
            .registry
            .ohlc
            .put(OhlcRecord {
                pairs,
                interval,
                sink,
            });
        Ok(stream)
    }

    /// Unsubscribe from candle updates.
    pub async fn unsubscribe_ohlc(&self) -> Result<(), Error> {
        debug!("client.unsubscribe_ohlc");
        let inner = &self.inner;
        let _guard = inner.registry.ohlc.guard.lock().await;
        let Some(record) = inner.registry.ohlc.get() else {
            return Err(Error::Validation("no active ohlc subscription".into()));
        };
        let mut spec = SubscriptionSpec::named("ohlc");
        spec.interval = Some(record.interval);
        subscribe_roundtrip(inner, "unsubscribe", Some(&record.pairs), &spec).await?;
        inner.registry.ohlc.clear();
        Ok(())
    }

    /// Subscribe to public trades for the given pairs.
    pub async fn subscribe_trade(
        &self,
        pairs: &[&str],
        capacity: usize,
    ) -> Result<EventStream<TradeEvent>, Error> {
        debug!("client.subscribe_trade pairs={pairs:?} capacity={capacity}");
        let inner = &self.inner;
        let _guard = inner.registry.trade.guard.lock().await;
        if inner.registry.trade.is_active() {
            return Err(Error::Validation(
                "trade subscription already active".into(),
            ));
        }
        let pairs = owned_pairs(pairs)?;
        let (sink, stream) = sink_pair(capacity);
        let spec = SubscriptionSpec::named("trade");
        subscribe_roundtrip(inner, "subscribe", Some(&pairs), &spec).await?;
        inner.registry.trade.put(TradeRecord { pairs, sink });
        Ok(stream)
    }

    /// Unsubscribe from public trades.
    pub async fn unsubscribe_trade(&self) -> Result<(), Error> {
        debug!("client.unsubscribe_trade");
        let inner = &self.inner;
        let _guard = inner.registry.trade.guard.lock().await;
        let Some(record) = inner.registry.trade.get() else {
            return Err(Error::Validation("no active trade subscription".into()));
        };
        let spec = SubscriptionSpec::named("trade");
        subscribe_roundtrip(inner, "unsubscribe", Some(&record.pairs), &spec).await?;
        inner.registry.trade.clear();
        Ok(())
    }

    /// Subscribe to spread updates for the given pairs.
    pub async fn subscribe_spread(
        &self,
        pairs: &[&str],
        capacity: usize,
    ) -> Result<EventStream<SpreadEvent>, Error> {
        debug!("client.subscribe_spread pairs={pairs:?} capacity={capacity}");
        let inner = &self.inner;
        let _guard = inner.registry.spread.guard.lock().await;
        if inner.registry.spread.is_active() {
            return Err(Error::Validation(
                "spread subscription already active".into(),
            ));
        }
        let pairs = owned_pairs(pairs)?;
        let (sink, stream) = sink_pair(capacity);
        let spec = SubscriptionSpec::named("spread");
        subscribe_roundtrip(inner, "subscribe", Some(&pairs), &spec).await?;
        inner.registry.spread.put(SpreadRecord { pairs, sink });
        Ok(stream)
    }

    /// Unsubscribe from spread updates.
    pub async fn unsubscribe_spread(&self) -> Result<(), Error> {
        debug!("client.unsubscribe_spread");
        let inner = &self.inner;
        let _guard = inner.registry.spread.guard.lock().await;
        let Some(record) = inner.registry.spread.get() else {
            return Err(Error::Validation("no active spread subscription".into()));
        };
        let spec = SubscriptionSpec::named("spread");
        subscribe_roundtrip(inner, "unsubscribe", Some(&record.pairs), &spec).await?;
        inner.registry.spread.clear();
        Ok(())
    }

    /// Subscribe to the order book at the given depth. Returns the
    /// snapshot stream and the update stream separately: snapshots get a
    /// fixed-size channel of ten slots per pair so a post-reconnect
    /// snapshot is never lost behind queued updates.
    pub async fn subscribe_book(
        &self,
        pairs: &[&str],
        depth: BookDepth,
        capacity: usize,
    ) -> Result<(EventStream<BookSnapshotEvent>, EventStream<BookUpdateEvent>), Error> {
        debug!("client.subscribe_book pairs={pairs:?} depth={depth:?} capacity={capacity}");
        let inner = &self.inner;
        let _guard = inner.registry.book.guard.lock().await;
        if inner.registry.book.is_active() {
            return Err(Error::Validation("book subscription already active".into()));
        }
        let pairs = owned_pairs(pairs)?;
        let (snapshot_sink, snapshots) = sink_pair(SNAPSHOT_SLOTS_PER_PAIR * pairs.len());
        let (update_sink, updates) = sink_pair(capacity);
        let mut spec = SubscriptionSpec::named("book");
        spec.depth = Some(depth);
        subscribe_roundtrip(inner, "subscribe", Some(&pairs), &spec).await?;
        inner
            .registry
            .book
            .put(BookRecord {
                pairs,
                depth,
                snapshot_sink,
                update_sink,
            });
        Ok((snapshots, updates))
    }

    /// Unsubscribe from the order book.
    pub async fn unsubscribe_book(&self) -> Result<(), Error> {
        debug!("client.unsubscribe_book");
        let inner = &self.inner;
        let _guard = inner.registry.book.guard.lock().await;
        let Some(record) = inner.registry.book.get() else {
            return Err(Error::Validation("no active book subscription".into()));
        };
        let mut spec = SubscriptionSpec::named("book");
        spec.depth = Some(record.depth);
        subscribe_roundtrip(inner, "unsubscribe", Some(&record.pairs), &spec).await?;
        inner.registry.book.clear();
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Private subscriptions
    // -----------------------------------------------------------------------

    /// Subscribe to the authenticated own-trades stream.
    pub async fn subscribe_own_trades(
        &self,
        snapshot: Option<bool>,
        consolidate_taker: Option<bool>,
        capacity: usize,
    ) -> Result<EventStream<OwnTradesEvent>, Error> {
        debug!("client.subscribe_own_trades snapshot={snapshot:?} capacity={capacity}");
        let inner = &self.inner;
        let token = inner.websocket_token("subscribe").await?;
        let _guard = inner.registry.own_trades.guard.lock().await;
        if inner.registry.own_trades.is_active() {
            return Err(Error::Validation(
                "ownTrades subscription already active".into(),
            ));
        }
        let (sink, stream) = sink_pair(capacity);
        let mut spec = SubscriptionSpec::named("ownTrades");
        spec.token = Some(token);
        spec.snapshot = snapshot;
        spec.consolidate_taker = consolidate_taker;
        subscribe_roundtrip(inner, "subscribe", None, &spec).await?;
        inner
            .registry
            .own_trades
            .put(OwnTradesRecord {
                snapshot,
                consolidate_taker,
                sink,
            });
        Ok(stream)
    }

    /// Unsubscribe from the own-trades stream.
    pub async fn unsubscribe_own_trades(&self) -> Result<(), Error> {
        debug!("client.unsubscribe_own_trades");
        let inner = &self.inner;
        let token = inner.websocket_token("unsubscribe").await?;
        let _guard = inner.registry.own_trades.guard.lock().await;
        if !inner.registry.own_trades.is_active() {
            return Err(Error::Validation(
                "no active ownTrades subscription".into(),
            ));
        }
        let mut spec = SubscriptionSpec::named("ownTrades");
        spec.token = Some(token);
        subscribe_roundtrip(inner, "unsubscribe", None, &spec).await?;
        inner.registry.own_trades.clear();
        Ok(())
    }

    /// Subscribe to the authenticated open-orders stream.
    pub async fn subscribe_open_orders(
        &self,
        rate_counter: Option<bool>,
        capacity: usize,
    ) -> Result<EventStream<OpenOrdersEvent>, Error> {
        debug!("client.subscribe_open_orders rate_counter={rate_counter:?} capacity={capacity}");
        let inner = &self.inner;
        let token = inner.websocket_token("subscribe").await?;
        let _guard = inner.registry.open_orders.guard.lock().await;
        if inner.registry.open_orders.is_active() {
            return Err(Error::Validation(
                "openOrders subscription already active".into(),
            ));
        }
        let (sink, stream) = sink_pair(capacity);
        let mut spec = SubscriptionSpec::named("openOrders");
        spec.token = Some(token);
        spec.ratecounter = rate_counter;
        subscribe_roundtrip(inner, "subscribe", None, &spec).await?;
        inner
            .registry
            .open_orders
            .put(OpenOrdersRecord { rate_counter, sink });
        Ok(stream)
    }

    /// Unsubscribe from the open-orders stream.
    pub async fn unsubscribe_open_orders(&self) -> Result<(), Error> {
        debug!("client.unsubscribe_open_orders");
        let inner = &self.inner;
        let token = inner.websocket_token("unsubscribe").await?;
        let _guard = inner.registry.open_orders.guard.lock().await;
        if !inner.registry.open_orders.is_active() {
            return Err(Error::Validation(
                "no active openOrders subscription".into(),
            ));
        }
        let mut spec = SubscriptionSpec::named("openOrders");
        spec.token = Some(token);
        subscribe_roundtrip(inner, "unsubscribe", None, &spec).await?;
        inner.registry.open_orders.clear();
        Ok(())
    }
}

impl Drop for KrakenClient {
    fn drop(&mut self) {
        self.inner.should_run.store(false, Ordering::SeqCst);
        if let Some(handle) = self.reader_handle.take() {
            handle.abort();
        }
        if let Some(handle) = self.ping_handle.take() {
            handle.abort();
        }
    }
}
