/// In-flight request tracking.
///
/// Each request class owns a table mapping request id to a waiter record.
/// The facade inserts a waiter immediately before writing the frame and
/// rolls it back on any failure up to and including the write; the
/// dispatcher resolves a waiter by delivering on its completion sender and
/// removing the entry. Completion and error senders are bounded to
/// capacity 1 so delivery never blocks the read path.
use std::collections::{BTreeMap, HashMap};

use tokio::sync::{mpsc, Mutex, MutexGuard};

use crate::errors::Error;
use crate::models::{SubscriptionStatus, SubscriptionStatusKind};

/// A waiter resolved by a single typed response.
#[derive(Debug)]
pub(crate) struct Waiter<T> {
    pub operation: &'static str,
    pub tx: mpsc::Sender<T>,
    pub err_tx: mpsc::Sender<Error>,
}

/// Build a waiter plus the receiving halves the facade selects over.
pub(crate) fn waiter_pair<T>(
    operation: &'static str,
) -> (Waiter<T>, mpsc::Receiver<T>, mpsc::Receiver<Error>) {
    let (tx, rx) = mpsc::channel(1);
    let (err_tx, err_rx) = mpsc::channel(1);
    (
        Waiter {
            operation,
            tx,
            err_tx,
        },
        rx,
        err_rx,
    )
}

/// Outcome of a subscribe/unsubscribe request once every pair is served.
/// Empty failures mean full success.
#[derive(Debug)]
pub(crate) struct SubscriptionOutcome {
    pub failures: BTreeMap<String, String>,
}

/// A waiter resolved by one `subscriptionStatus` reply per pair.
#[derive(Debug)]
pub(crate) struct SubscriptionWaiter {
    pub operation: &'static str,
    pub pairs: Vec<String>,
    pub served: HashMap<String, bool>,
    pub failures: BTreeMap<String, String>,
    pub tx: mpsc::Sender<SubscriptionOutcome>,
    pub err_tx: mpsc::Sender<Error>,
}

impl SubscriptionWaiter {
    /// Accumulate one per-pair reply. Returns true once every requested
    /// pair has been served (immediately for pairless private topics).
    pub fn record(&mut self, status: &SubscriptionStatus) -> bool {
        let pair = status.pair.clone().unwrap_or_default();
        if status.status == SubscriptionStatusKind::Error {
            let reason = status
                .error_message
                .clone()
                .unwrap_or_else(|| "unknown server error".to_string());
            self.failures.insert(pair.clone(), reason);
        }
        self.served.insert(pair, true);
        self.pairs.is_empty() || self.served.len() >= self.pairs.len()
    }
}

pub(crate) trait Interruptible {
    fn interrupt(&self);
}

impl<T> Interruptible for Waiter<T> {
    fn interrupt(&self) {
        let _ = self.err_tx.try_send(Error::OperationInterrupted {
            operation: self.operation,
        });
    }
}

impl Interruptible for SubscriptionWaiter {
    fn interrupt(&self) {
        let _ = self.err_tx.try_send(Error::OperationInterrupted {
            operation: self.operation,
        });
    }
}

/// One request class: request id → waiter.
#[derive(Debug)]
pub(crate) struct PendingTable<W> {
    entries: Mutex<HashMap<u64, W>>,
}

impl<W: Interruptible> PendingTable<W> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn insert(&self, reqid: u64, waiter: W) {
        self.entries.lock().await.insert(reqid, waiter);
    }

    pub async fn remove(&self, reqid: u64) -> Option<W> {
        self.entries.lock().await.remove(&reqid)
    }

    pub async fn lock(&self) -> MutexGuard<'_, HashMap<u64, W>> {
        self.entries.lock().await
    }

    /// Drain every entry, delivering the interruption error to its waiter.
    pub async fn interrupt_all(&self) {
        let mut entries = self.entries.lock().await;
        for waiter in entries.values() {
            waiter.interrupt();
        }
        entries.clear();
    }
}

/// All pending-request tables. `interrupt_all` visits the classes in
/// declaration order; the close sweep relies on that fixed order.
#[derive(Debug)]
pub(crate) struct PendingRequests {
    pub ping: PendingTable<Waiter<crate::models::Pong>>,
    pub subscribe: PendingTable<SubscriptionWaiter>,
    pub unsubscribe: PendingTable<SubscriptionWaiter>,
    pub add_order: PendingTable<Waiter<crate::models::AddOrderStatus>>,
    pub edit_order: PendingTable<Waiter<crate::models::EditOrderStatus>>,
    pub cancel_order: PendingTable<Waiter<crate::models::CancelOrderStatus>>,
    pub cancel_all: PendingTable<Waiter<crate::models::CancelAllStatus>>,
    pub cancel_all_after: PendingTable<Waiter<crate::models::CancelAllOrdersAfterStatus>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self {
            ping: PendingTable::new(),
            subscribe: PendingTable::new(),
            unsubscribe: PendingTable::new(),
            add_order: PendingTable::new(),
            edit_order: PendingTable::new(),
            cancel_order: PendingTable::new(),
            cancel_all: PendingTable::new(),
            cancel_all_after: PendingTable::new(),
        }
    }

    pub async fn interrupt_all(&self) {
        self.ping.interrupt_all().await;
        self.subscribe.interrupt_all().await;
        self.unsubscribe.interrupt_all().await;
        self.add_order.interrupt_all().await;
        self.edit_order.interrupt_all().await;
        self.cancel_order.interrupt_all().await;
        self.cancel_all.interrupt_all().await;
        self.cancel_all_after.interrupt_all().await;
    }
}
