use crate::domain::events::LedgerEvent;
use crate::domain::ports::Notifier;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Writes every event to the log. Stands in for the mail gateway.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, event: LedgerEvent) {
        match &event {
            LedgerEvent::PaymentCompleted {
                account_id,
                amount,
                kind,
            } => info!(%account_id, %amount, ?kind, "payment completed"),
            LedgerEvent::PenaltyApplied {
                credit_id,
                entry_id,
                penalty,
                outstanding,
            } => info!(%credit_id, %entry_id, %penalty, %outstanding, "overdue penalty applied"),
        }
    }
}

/// Forwards events to a bounded channel without waiting.
///
/// A full or closed channel drops the event with a warning; the committed
/// transaction that produced it is unaffected.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::Sender<LedgerEvent>,
}

impl ChannelNotifier {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<LedgerEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, event: LedgerEvent) {
        if let Err(e) = self.tx.try_send(event) {
            warn!("dropping ledger event: {}", e);
        }
    }
}
