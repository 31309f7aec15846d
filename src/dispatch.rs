/// Inbound message routing.
///
/// A cheap structural probe decides the message family before any full
/// deserialization: objects are event-tagged responses keyed on `event`,
/// arrays are channel data keyed on the channel-name element. Each variant
/// is then deserialized on its own and routed to a waiter, a registry
/// sink, or a built-in sink. Anything unclassifiable, and any response
/// missing a required request id, is surfaced as a read error.
use log::{debug, warn};
use serde_json::Value;

use crate::client::ClientInner;
use crate::errors::Error;
use crate::models::{
    BookMessage, ErrorMessage, Heartbeat, OhlcEvent, OpenOrdersEvent, OwnTradesEvent, Pong,
    SpreadEvent, SubscriptionStatus, SystemStatus, TickerEvent, TradeEvent,
};
use crate::pending::{PendingTable, SubscriptionOutcome, SubscriptionWaiter, Waiter};

pub(crate) async fn dispatch_message(inner: &ClientInner, raw: &str) -> Result<(), Error> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|err| Error::Protocol(format!("unparseable message: {err}")))?;

    if value.is_object() {
        dispatch_event(inner, value).await
    } else if value.is_array() {
        dispatch_channel(inner, value).await
    } else {
        Err(Error::Protocol(format!(
            "message is neither object nor array: {value}"
        )))
    }
}

async fn dispatch_event(inner: &ClientInner, value: Value) -> Result<(), Error> {
    let event = value
        .get("event")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Protocol("object message without event tag".into()))?
        .to_string();

    match event.as_str() {
        "heartbeat" => {
            let heartbeat: Heartbeat = serde_json::from_value(value)?;
            let _ = inner.heartbeat_tx.send(heartbeat);
            Ok(())
        }
        "systemStatus" => {
            let status: SystemStatus = serde_json::from_value(value)?;
            debug!(
                "dispatch.system_status status={} version={}",
                status.status, status.version
            );
            let _ = inner.status_tx.send(status);
            Ok(())
        }
        "pong" => {
            let pong: Pong = serde_json::from_value(value)?;
            let reqid = pong
                .reqid
                .ok_or_else(|| Error::Protocol("pong without reqid".into()))?;
            match inner.pending.ping.remove(reqid).await {
                Some(waiter) => {
                    let _ = waiter.tx.try_send(pong);
                }
                None => warn!("dispatch.pong no pending ping for reqid {reqid}"),
            }
            Ok(())
        }
        "subscriptionStatus" => handle_subscription_status(inner, value).await,
        "error" => handle_error_message(inner, value).await,
        "addOrderStatus" => resolve_order(&inner.pending.add_order, value, "addOrderStatus").await,
        "editOrderStatus" => {
            resolve_order(&inner.pending.edit_order, value, "editOrderStatus").await
        }
        "cancelOrderStatus" => {
            resolve_order(&inner.pending.cancel_order, value, "cancelOrderStatus").await
        }
        "cancelAllStatus" => {
            resolve_order(&inner.pending.cancel_all, value, "cancelAllStatus").await
        }
        "cancelAllOrdersAfterStatus" => {
            resolve_order(
                &inner.pending.cancel_all_after,
                value,
                "cancelAllOrdersAfterStatus",
            )
            .await
        }
        other => Err(Error::Protocol(format!("unrecognized event tag: {other}"))),
    }
}

/// Accumulate one per-pair reply into the matching pending subscribe or
/// unsubscribe record; resolve the waiter once all pairs are served.
async fn handle_subscription_status(inner: &ClientInner, value: Value) -> Result<(), Error> {
    let status: SubscriptionStatus = serde_json::from_value(value)?;
    let reqid = status
        .reqid
        .ok_or_else(|| Error::Protocol("subscriptionStatus without reqid".into()))?;

    if accumulate(&inner.pending.subscribe, reqid, &status).await {
        return Ok(());
    }
    if accumulate(&inner.pending.unsubscribe, reqid, &status).await {
        return Ok(());
    }
    warn!("dispatch.subscription_status no pending request for reqid {reqid}");
    Ok(())
}

async fn accumulate(
    table: &PendingTable<SubscriptionWaiter>,
    reqid: u64,
    status: &SubscriptionStatus,
) -> bool {
    let mut entries = table.lock().await;
    let Some(waiter) = entries.get_mut(&reqid) else {
        return false;
    };
    if waiter.record(status) {
        if let Some(waiter) = entries.remove(&reqid) {
            let _ = waiter.tx.try_send(SubscriptionOutcome {
                failures: waiter.failures.clone(),
            });
        }
    }
    true
}

/// A general `event: error` resolves the pending entry whose request id
/// matches, probing subscribe, then unsubscribe, then ping. Without a
/// request id there is no waiter to resolve; the message becomes a read
/// error rather than failing an arbitrary in-flight operation.
async fn handle_error_message(inner: &ClientInner, value: Value) -> Result<(), Error> {
    let message: ErrorMessage = serde_json::from_value(value)?;
    let Some(reqid) = message.reqid else {
        return Err(Error::Protocol(format!(
            "server error without reqid: {}",
            message.error_message
        )));
    };

    if let Some(waiter) = inner.pending.subscribe.remove(reqid).await {
        let _ = waiter.err_tx.try_send(Error::Operation {
            operation: waiter.operation,
            message: message.error_message,
            response: None,
        });
        return Ok(());
    }
    if let Some(waiter) = inner.pending.unsubscribe.remove(reqid).await {
        let _ = waiter.err_tx.try_send(Error::Operation {
            operation: waiter.operation,
            message: message.error_message,
            response: None,
        });
        return Ok(());
    }
    if let Some(waiter) = inner.pending.ping.remove(reqid).await {
        let _ = waiter.err_tx.try_send(Error::Operation {
            operation: waiter.operation,
            message: message.error_message,
            response: None,
        });
        return Ok(());
    }
    Err(Error::Protocol(format!(
        "server error for unknown reqid {reqid}: {}",
        message.error_message
    )))
}

/// Deliver an order-operation response to its waiter. The body is
/// delivered whole even when `status` is `"error"`; the facade turns it
/// into an operation error so the caller still sees the parsed response.
async fn resolve_order<T: serde::de::DeserializeOwned>(
    table: &PendingTable<Waiter<T>>,
    value: Value,
    tag: &str,
) -> Result<(), Error> {
    let reqid = value
        .get("reqid")
        .and_then(Value::as_u64)
        .ok_or_else(|| Error::Protocol(format!("{tag} without reqid")))?;
    let parsed: T = serde_json::from_value(value)?;
    match table.remove(reqid).await {
        Some(waiter) => {
            let _ = waiter.tx.try_send(parsed);
        }
        None => warn!("dispatch.{tag} no pending request for reqid {reqid}"),
    }
    Ok(())
}

async fn dispatch_channel(inner: &ClientInner, value: Value) -> Result<(), Error> {
    let items = value
        .as_array()
        .ok_or_else(|| Error::Protocol("channel message is not an array".into()))?;
    if items.len() < 3 {
        return Err(Error::Protocol(format!(
            "channel message has {} element(s), expected at least 3",
            items.len()
        )));
    }
    let name = items[items.len() - 2]
        .as_str()
        .ok_or_else(|| Error::Protocol("channel message has no channel name".into()))?;
    let base = name.split('-').next().unwrap_or(name).to_string();

    match base.as_str() {
        "ticker" => {
            let event = TickerEvent::from_message(&value)?;
            match inner.registry.ticker.get() {
                Some(record) => {
                    let _ = record.sink.send(Ok(event)).await;
                }
                None => warn!(
                    "dispatch.ticker dropping event for {} with no active subscription",
                    event.pair
                ),
            }
            Ok(())
        }
        "ohlc" => {
            let event = OhlcEvent::from_message(&value)?;
            match inner.registry.ohlc.get() {
                Some(record) => {
                    if event.interval.is_some_and(|i| i != record.interval) {
                        warn!(
                            "dispatch.ohlc dropping event for {} with mismatched interval",
                            event.pair
                        );
                    } else {
                        let _ = record.sink.send(Ok(event)).await;
                    }
                }
                None => warn!(
                    "dispatch.ohlc dropping event for {} with no active subscription",
                    event.pair
                ),
            }
            Ok(())
        }
        "trade" => {
            let event = TradeEvent::from_message(&value)?;
            match inner.registry.trade.get() {
                Some(record) => {
                    let _ = record.sink.send(Ok(event)).await;
                }
                None => warn!(
                    "dispatch.trade dropping event for {} with no active subscription",
                    event.pair
                ),
            }
            Ok(())
        }
        "spread" => {
            let event = SpreadEvent::from_message(&value)?;
            match inner.registry.spread.get() {
                Some(record) => {
                    let _ = record.sink.send(Ok(event)).await;
                }
                None => warn!(
                    "dispatch.spread dropping event for {} with no active subscription",
                    event.pair
                ),
            }
            Ok(())
        }
        "book" => {
            let message = BookMessage::from_message(&value)?;
            let Some(record) = inner.registry.book.get() else {
                warn!("dispatch.book dropping event with no active subscription");
                return Ok(());
            };
            match message {
                BookMessage::Snapshot(snapshot) => {
                    if snapshot.depth.is_some_and(|d| d != record.depth) {
                        warn!(
                            "dispatch.book dropping snapshot for {} with mismatched depth",
                            snapshot.pair
                        );
                    } else {
                        let _ = record.snapshot_sink.send(Ok(snapshot)).await;
                    }
                }
                BookMessage::Update(update) => {
                    if update.depth.is_some_and(|d| d != record.depth) {
                        warn!(
                            "dispatch.book dropping update for {} with mismatched depth",
                            update.pair
                        );
                    } else {
                        let _ = record.update_sink.send(Ok(update)).await;
                    }
                }
            }
            Ok(())
        }
        "ownTrades" => {
            let event = OwnTradesEvent::from_message(&value)?;
            match inner.registry.own_trades.get() {
                Some(record) => {
                    let _ = record.sink.send(Ok(event)).await;
                }
                None => warn!("dispatch.own_trades dropping event with no active subscription"),
            }
            Ok(())
        }
        "openOrders" => {
            let event = OpenOrdersEvent::from_message(&value)?;
            match inner.registry.open_orders.get() {
                Some(record) => {
                    let _ = record.sink.send(Ok(event)).await;
                }
                None => warn!("dispatch.open_orders dropping event with no active subscription"),
            }
            Ok(())
        }
        other => Err(Error::Protocol(format!(
            "unrecognized channel name: {other}"
        ))),
    }
}
