/// Connection lifecycle: the read loop, keepalive watchdog, close sweep,
/// reconnect supervision, and subscription recovery.
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use log::{error, info, warn};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMsg;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::client::{subscribe_roundtrip, ClientInner};
use crate::dispatch::dispatch_message;
use crate::errors::Error;
use crate::registry::ResubscribeIntent;

pub(crate) type WsSink = futures_util::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<TcpStream>>,
    WsMsg,
>;

type WsStream = futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

const RESUBSCRIBE_ATTEMPTS: u32 = 3;

/// Connection lifecycle events emitted out-of-band from data streams.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    Reconnecting { attempt: usize, delay: Duration },
    Reconnected { attempts: usize },
    Disconnected { reason: String, final_: bool },
}

/// Establish the first connection and spawn the supervision tasks.
pub(crate) async fn start(
    inner: &Arc<ClientInner>,
) -> Result<(tokio::task::JoinHandle<()>, tokio::task::JoinHandle<()>), Error> {
    let (ws_stream, _) = tokio_tungstenite::connect_async(&inner.ws_url).await?;
    let (sink, stream) = ws_stream.split();

    *inner.conn.lock().await = Some(sink);
    inner.connected.store(true, Ordering::SeqCst);
    *inner.last_pong.lock().await = Instant::now();

    let reader = tokio::spawn(supervise(inner.clone(), stream));
    let pinger = tokio::spawn(ping_loop(inner.clone()));
    Ok((reader, pinger))
}

/// Drive the read loop for the life of the client: read until the
/// connection drops, run the close sweep, then hand over to the
/// reconnect loop.
async fn supervise(inner: Arc<ClientInner>, stream: WsStream) {
    let close_reason = read_loop(&inner, stream).await;
    if !inner.should_run.load(Ordering::SeqCst) {
        return;
    }
    handle_disconnect(&inner, close_reason).await;
    reconnect_loop(&inner).await;
}

/// Read frames until the stream ends. Returns the server's close reason
/// when one was sent.
async fn read_loop(inner: &Arc<ClientInner>, mut stream: WsStream) -> Option<String> {
    while inner.should_run.load(Ordering::SeqCst) {
        let message = match stream.next().await {
            Some(Ok(message)) => message,
            Some(Err(err)) => {
                warn!("engine.read_loop transport error: {err}");
                return None;
            }
            None => return None,
        };

        match message {
            WsMsg::Text(text) => {
                if let Err(err) = dispatch_message(inner, &text).await {
                    warn!("engine.read_loop undispatchable message: {err}");
                    inner.notify_read_error(&err);
                }
            }
            WsMsg::Pong(_) => {
                *inner.last_pong.lock().await = Instant::now();
            }
            WsMsg::Ping(data) => {
                let mut conn = inner.conn.lock().await;
                if let Some(sink) = conn.as_mut() {
                    let _ = sink.send(WsMsg::Pong(data)).await;
                }
            }
            WsMsg::Close(frame) => {
                return frame.map(|f| f.reason.to_string());
            }
            _ => {}
        }
    }
    None
}

/// The close sweep, run exactly once per disconnect: drain every pending
/// waiter with the interruption error, deliver the interruption marker on
/// every live subscription sink, invoke the user's close hook, and clear
/// the transport handle. Pending classes are drained before topic guards
/// are taken so a recovery task blocked on a round trip is released
/// first.
pub(crate) async fn handle_disconnect(inner: &Arc<ClientInner>, reason: Option<String>) {
    inner.connected.store(false, Ordering::SeqCst);
    match &reason {
        Some(reason) => warn!("engine.disconnect server close: {reason}"),
        None => warn!("engine.disconnect connection lost"),
    }
    inner.pending.interrupt_all().await;
    inner.registry.interrupt_all().await;
    inner.notify_close(reason.as_deref());
    *inner.conn.lock().await = None;
}

/// Exponential-backoff reconnect. On success the live subscriptions are
/// re-issued by background recovery tasks while the read loop resumes
/// immediately; partial recovery is not fatal.
async fn reconnect_loop(inner: &Arc<ClientInner>) {
    let mut delay = inner.cfg.base_delay;
    let mut attempts = 0;

    while inner.should_run.load(Ordering::SeqCst) {
        if inner.cfg.max_attempts > 0 && attempts >= inner.cfg.max_attempts {
            inner.should_run.store(false, Ordering::SeqCst);
            let reason = "connection lost after max reconnect attempts".to_string();
            error!("engine.reconnect giving up: {reason}");
            let _ = inner.lifecycle_tx.send(LifecycleEvent::Disconnected {
                reason,
                final_: true,
            });
            return;
        }

        let _ = inner.lifecycle_tx.send(LifecycleEvent::Reconnecting {
            attempt: attempts + 1,
            delay,
        });
        tokio::time::sleep(delay).await;
        attempts += 1;

        match tokio_tungstenite::connect_async(&inner.ws_url).await {
            Ok((ws_stream, _)) => {
                let (sink, stream) = ws_stream.split();
                *inner.conn.lock().await = Some(sink);
                inner.connected.store(true, Ordering::SeqCst);
                *inner.last_pong.lock().await = Instant::now();
                info!("engine.reconnect established after {attempts} attempt(s)");
                let _ = inner
                    .lifecycle_tx
                    .send(LifecycleEvent::Reconnected { attempts });

                on_open(inner, true).await;

                let close_reason = read_loop(inner, stream).await;
                if inner.should_run.load(Ordering::SeqCst) {
                    handle_disconnect(inner, close_reason).await;
                    delay = inner.cfg.base_delay;
                    attempts = 0;
                    continue;
                }
                return;
            }
            Err(err) => {
                warn!("engine.reconnect attempt {attempts} failed: {err}");
                delay = (delay * 2).min(inner.cfg.max_delay);
            }
        }
    }
}

/// Open callback. On a restart, spawn one bounded-retry recovery task per
/// live subscription record. The tasks run on their own spawned futures,
/// never on this callback's context: message processing resumes
/// immediately and does not wait for recovery.
pub(crate) async fn on_open(inner: &Arc<ClientInner>, restarting: bool) {
    if !restarting {
        return;
    }
    for intent in inner.registry.resubscribe_intents() {
        let inner = inner.clone();
        tokio::spawn(resubscribe_task(inner, intent));
    }
}

/// Re-issue one subscription with up to three attempts and 1/2/4 second
/// backoff, reusing the sinks of the existing record. A reply meaning the
/// server still considers the subscription active counts as success.
async fn resubscribe_task(inner: Arc<ClientInner>, intent: ResubscribeIntent) {
    let topic = intent.topic();
    inner.registry.set_resubscribing(topic, true);
    for attempt in 1..=RESUBSCRIBE_ATTEMPTS {
        match resubscribe_once(&inner, &intent).await {
            Ok(()) => {
                info!("engine.resubscribe {topic} restored");
                inner.registry.set_resubscribing(topic, false);
                return;
            }
            Err(err) if already_subscribed(&err) => {
                info!("engine.resubscribe {topic} already active on server");
                inner.registry.set_resubscribing(topic, false);
                return;
            }
            Err(err) => {
                warn!("engine.resubscribe {topic} attempt {attempt} failed: {err}");
                if attempt < RESUBSCRIBE_ATTEMPTS {
                    tokio::time::sleep(Duration::from_secs(1 << (attempt - 1))).await;
                }
            }
        }
    }
    inner.registry.set_resubscribing(topic, false);
    error!("engine.resubscribe giving up on {topic} after {RESUBSCRIBE_ATTEMPTS} attempts");
}

async fn resubscribe_once(
    inner: &Arc<ClientInner>,
    intent: &ResubscribeIntent,
) -> Result<(), Error> {
    let Some(guard) = inner.registry.guard_for(intent.topic()) else {
        return Ok(());
    };
    let _guard = guard.lock().await;
    // The user may have unsubscribed between attempts.
    if !inner.registry.is_active(intent.topic()) {
        return Ok(());
    }
    let token = if intent.needs_token() {
        Some(inner.websocket_token("resubscribe").await?)
    } else {
        None
    };
    let spec = intent.spec(token);
    subscribe_roundtrip(inner, "subscribe", intent.pairs(), &spec).await
}

fn already_subscribed(err: &Error) -> bool {
    match err {
        Error::Subscription { failures, .. } => {
            !failures.is_empty()
                && failures
                    .values()
                    .all(|reason| reason.to_lowercase().contains("already subscribed"))
        }
        _ => false,
    }
}

/// Keepalive: send transport pings on an interval and force a reconnect
/// when the pong watchdog fires.
async fn ping_loop(inner: Arc<ClientInner>) {
    let mut interval = tokio::time::interval(inner.cfg.ping_interval);
    interval.tick().await; // skip the immediate first tick

    while inner.should_run.load(Ordering::SeqCst) {
        interval.tick().await;

        if !inner.connected.load(Ordering::SeqCst) {
            continue;
        }

        let last = *inner.last_pong.lock().await;
        if last.elapsed() > inner.cfg.pong_timeout {
            // Close the sink so the read loop observes the loss and reconnects.
            warn!("engine.ping_loop pong timeout, forcing reconnect");
            let mut conn = inner.conn.lock().await;
            if let Some(sink) = conn.as_mut() {
                let _ = sink.close().await;
            }
            inner.connected.store(false, Ordering::SeqCst);
            continue;
        }

        let mut conn = inner.conn.lock().await;
        if let Some(sink) = conn.as_mut() {
            let _ = sink.send(WsMsg::Ping(Vec::new())).await;
        }
    }
}
