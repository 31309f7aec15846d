/// Subscription registry: the single source of truth for what the client
/// must maintain across reconnects.
///
/// Each topic owns a slot with two locks: a guard serializing
/// subscribe/unsubscribe/resubscribe round trips, and a record cell the
/// dispatcher reads briefly to clone a sink sender (the cell lock is never
/// held across an await). The sinks inside a record are created once at
/// subscribe time and are the stable identity the user holds; they survive
/// reconnects and are discarded only on explicit unsubscribe or teardown.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex as StdMutex, PoisonError};

use tokio::sync::{mpsc, Mutex};

use crate::errors::Error;
use crate::models::{
    BookDepth, BookSnapshotEvent, BookUpdateEvent, OhlcEvent, OhlcInterval, OpenOrdersEvent,
    OwnTradesEvent, SpreadEvent, TickerEvent, TradeEvent,
};

pub(crate) type Sink<T> = mpsc::Sender<Result<T, Error>>;

#[derive(Debug, Clone)]
pub(crate) struct TickerRecord {
    pub pairs: Vec<String>,
    pub sink: Sink<TickerEvent>,
}

#[derive(Debug, Clone)]
pub(crate) struct OhlcRecord {
    pub pairs: Vec<String>,
    pub interval: OhlcInterval,
    pub sink: Sink<OhlcEvent>,
}

#[derive(Debug, Clone)]
pub(crate) struct TradeRecord {
    pub pairs: Vec<String>,
    pub sink: Sink<TradeEvent>,
}

#[derive(Debug, Clone)]
pub(crate) struct SpreadRecord {
    pub pairs: Vec<String>,
    pub sink: Sink<SpreadEvent>,
}

#[derive(Debug, Clone)]
pub(crate) struct BookRecord {
    pub pairs: Vec<String>,
    pub depth: BookDepth,
    pub snapshot_sink: Sink<BookSnapshotEvent>,
    pub update_sink: Sink<BookUpdateEvent>,
}

#[derive(Debug, Clone)]
pub(crate) struct OwnTradesRecord {
    pub snapshot: Option<bool>,
    pub consolidate_taker: Option<bool>,
    pub sink: Sink<OwnTradesEvent>,
}

#[derive(Debug, Clone)]
pub(crate) struct OpenOrdersRecord {
    pub rate_counter: Option<bool>,
    pub sink: Sink<OpenOrdersEvent>,
}

/// One topic slot: guard, record cell, and the resubscribing tag set while
/// a bounded-retry recovery task runs.
#[derive(Debug)]
pub(crate) struct TopicSlot<R> {
    pub guard: Mutex<()>,
    resubscribing: AtomicBool,
    record: StdMutex<Option<R>>,
}

impl<R: Clone> TopicSlot<R> {
    fn new() -> Self {
        Self {
            guard: Mutex::new(()),
            resubscribing: AtomicBool::new(false),
            record: StdMutex::new(None),
        }
    }

    pub fn get(&self) -> Option<R> {
        self.record
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn put(&self, record: R) {
        *self.record.lock().unwrap_or_else(PoisonError::into_inner) = Some(record);
    }

    pub fn clear(&self) -> Option<R> {
        self.record
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub fn is_active(&self) -> bool {
        self.record
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn set_resubscribing(&self, on: bool) {
        self.resubscribing.store(on, Ordering::SeqCst);
    }

    pub fn is_resubscribing(&self) -> bool {
        self.resubscribing.load(Ordering::SeqCst)
    }
}

/// What a recovery task needs to re-issue one subscription. Built from the
/// live records at reconnect time; carries no sinks because resubscribe
/// reuses those of the existing record.
#[derive(Debug, Clone)]
pub(crate) enum ResubscribeIntent {
    Ticker {
        pairs: Vec<String>,
    },
    Ohlc {
        pairs: Vec<String>,
        interval: OhlcInterval,
    },
    Trade {
        pairs: Vec<String>,
    },
    Spread {
        pairs: Vec<String>,
    },
    Book {
        pairs: Vec<String>,
        depth: BookDepth,
    },
    OwnTrades {
        snapshot: Option<bool>,
        consolidate_taker: Option<bool>,
    },
    OpenOrders {
        rate_counter: Option<bool>,
    },
}

impl ResubscribeIntent {
    pub fn topic(&self) -> &'static str {
        match self {
            ResubscribeIntent::Ticker { .. } => "ticker",
            ResubscribeIntent::Ohlc { .. } => "ohlc",
            ResubscribeIntent::Trade { .. } => "trade",
            ResubscribeIntent::Spread { .. } => "spread",
            ResubscribeIntent::Book { .. } => "book",
            ResubscribeIntent::OwnTrades { .. } => "ownTrades",
            ResubscribeIntent::OpenOrders { .. } => "openOrders",
        }
    }

    pub fn pairs(&self) -> Option<&[String]> {
        match self {
            ResubscribeIntent::Ticker { pairs }
            | ResubscribeIntent::Ohlc { pairs, .. }
            | ResubscribeIntent::Trade { pairs }
            | ResubscribeIntent::Spread { pairs }
            | ResubscribeIntent::Book { pairs, .. } => Some(pairs),
            ResubscribeIntent::OwnTrades { .. } | ResubscribeIntent::OpenOrders { .. } => None,
        }
    }

    pub fn needs_token(&self) -> bool {
        matches!(
            self,
            ResubscribeIntent::OwnTrades { .. } | ResubscribeIntent::OpenOrders { .. }
        )
    }

    pub fn spec(&self, token: Option<String>) -> crate::models::SubscriptionSpec {
        let mut spec = crate::models::SubscriptionSpec::named(self.topic());
        spec.token = token;
        match self {
            ResubscribeIntent::Ohlc { interval, .. } => spec.interval = Some(*interval),
            ResubscribeIntent::Book { depth, .. } => spec.depth = Some(*depth),
            ResubscribeIntent::OwnTrades {
                snapshot,
                consolidate_taker,
            } => {
                spec.snapshot = *snapshot;
                spec.consolidate_taker = *consolidate_taker;
            }
            ResubscribeIntent::OpenOrders { rate_counter } => spec.ratecounter = *rate_counter,
            _ => {}
        }
        spec
    }
}

/// All topic slots. Sweeps visit the topics in declaration order; the
/// close path relies on that fixed order when taking guards.
#[derive(Debug)]
pub(crate) struct Registry {
    pub ticker: TopicSlot<TickerRecord>,
    pub ohlc: TopicSlot<OhlcRecord>,
    pub trade: TopicSlot<TradeRecord>,
    pub spread: TopicSlot<SpreadRecord>,
    pub book: TopicSlot<BookRecord>,
    pub own_trades: TopicSlot<OwnTradesRecord>,
    pub open_orders: TopicSlot<OpenOrdersRecord>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            ticker: TopicSlot::new(),
            ohlc: TopicSlot::new(),
            trade: TopicSlot::new(),
            spread: TopicSlot::new(),
            book: TopicSlot::new(),
            own_trades: TopicSlot::new(),
            open_orders: TopicSlot::new(),
        }
    }

    /// Deliver the interruption marker on every live sink, exactly once
    /// per disconnect. Writes are awaited: the user is expected to observe
    /// the interruption before the read path resumes.
    pub async fn interrupt_all(&self) {
        {
            let _guard = self.ticker.guard.lock().await;
            if let Some(record) = self.ticker.get() {
                let _ = record.sink.send(Err(Error::StreamInterrupted)).await;
            }
        }
        {
            let _guard = self.ohlc.guard.lock().await;
            if let Some(record) = self.ohlc.get() {
                let _ = record.sink.send(Err(Error::StreamInterrupted)).await;
            }
        }
        {
            let _guard = self.trade.guard.lock().await;
            if let Some(record) = self.trade.get() {
                let _ = record.sink.send(Err(Error::StreamInterrupted)).await;
            }
        }
        {
            let _guard = self.spread.guard.lock().await;
            if let Some(record) = self.spread.get() {
                let _ = record.sink.send(Err(Error::StreamInterrupted)).await;
            }
        }
        {
            let _guard = self.book.guard.lock().await;
            if let Some(record) = self.book.get() {
                let _ = record.snapshot_sink.send(Err(Error::StreamInterrupted)).await;
                let _ = record.update_sink.send(Err(Error::StreamInterrupted)).await;
            }
        }
        {
            let _guard = self.own_trades.guard.lock().await;
            if let Some(record) = self.own_trades.get() {
                let _ = record.sink.send(Err(Error::StreamInterrupted)).await;
            }
        }
        {
            let _guard = self.open_orders.guard.lock().await;
            if let Some(record) = self.open_orders.get() {
                let _ = record.sink.send(Err(Error::StreamInterrupted)).await;
            }
        }
    }

    /// Drop every record. Used on explicit teardown, where sinks are
    /// discarded for good.
    pub fn clear_all(&self) {
        self.ticker.clear();
        self.ohlc.clear();
        self.trade.clear();
        self.spread.clear();
        self.book.clear();
        self.own_trades.clear();
        self.open_orders.clear();
    }

    /// Snapshot of the live subscriptions for the recovery path.
    pub fn resubscribe_intents(&self) -> Vec<ResubscribeIntent> {
        let mut intents = Vec::new();
        if let Some(record) = self.ticker.get() {
            intents.push(ResubscribeIntent::Ticker {
                pairs: record.pairs,
            });
        }
        if let Some(record) = self.ohlc.get() {
            intents.push(ResubscribeIntent::Ohlc {
                pairs: record.pairs,
                interval: record.interval,
            });
        }
        if let Some(record) = self.trade.get() {
            intents.push(ResubscribeIntent::Trade {
                pairs: record.pairs,
            });
        }
        if let Some(record) = self.spread.get() {
            intents.push(ResubscribeIntent::Spread {
                pairs: record.pairs,
            });
        }
        if let Some(record) = self.book.get() {
            intents.push(ResubscribeIntent::Book {
                pairs: record.pairs,
                depth: record.depth,
            });
        }
        if let Some(record) = self.own_trades.get() {
            intents.push(ResubscribeIntent::OwnTrades {
                snapshot: record.snapshot,
                consolidate_taker: record.consolidate_taker,
            });
        }
        if let Some(record) = self.open_orders.get() {
            intents.push(ResubscribeIntent::OpenOrders {
                rate_counter: record.rate_counter,
            });
        }
        intents
    }

    /// Topic guard looked up by wire name, for the recovery tasks.
    pub fn guard_for(&self, topic: &str) -> Option<&Mutex<()>> {
        match topic {
            "ticker" => Some(&self.ticker.guard),
            "ohlc" => Some(&self.ohlc.guard),
            "trade" => Some(&self.trade.guard),
            "spread" => Some(&self.spread.guard),
            "book" => Some(&self.book.guard),
            "ownTrades" => Some(&self.own_trades.guard),
            "openOrders" => Some(&self.open_orders.guard),
            _ => None,
        }
    }

    pub fn is_active(&self, topic: &str) -> bool {
        match topic {
            "ticker" => self.ticker.is_active(),
            "ohlc" => self.ohlc.is_active(),
            "trade" => self.trade.is_active(),
            "spread" => self.spread.is_active(),
            "book" => self.book.is_active(),
            "ownTrades" => self.own_trades.is_active(),
            "openOrders" => self.open_orders.is_active(),
            _ => false,
        }
    }

    pub fn is_resubscribing(&self, topic: &str) -> bool {
        match topic {
            "ticker" => self.ticker.is_resubscribing(),
            "ohlc" => self.ohlc.is_resubscribing(),
            "trade" => self.trade.is_resubscribing(),
            "spread" => self.spread.is_resubscribing(),
            "book" => self.book.is_resubscribing(),
            "ownTrades" => self.own_trades.is_resubscribing(),
            "openOrders" => self.open_orders.is_resubscribing(),
            _ => false,
        }
    }

    pub fn set_resubscribing(&self, topic: &str, on: bool) {
        match topic {
            "ticker" => self.ticker.set_resubscribing(on),
            "ohlc" => self.ohlc.set_resubscribing(on),
            "trade" => self.trade.set_resubscribing(on),
            "spread" => self.spread.set_resubscribing(on),
            "book" => self.book.set_resubscribing(on),
            "ownTrades" => self.own_trades.set_resubscribing(on),
            "openOrders" => self.open_orders.set_resubscribing(on),
            _ => {}
        }
    }
}
