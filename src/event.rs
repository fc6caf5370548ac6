use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Lifecycle states a swap moves through. The same set doubles as the
/// persisted record status and the payload of `swap.update` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapUpdateEvent {
    SwapCreated,
    InvoiceSet,
    TransactionMempool,
    TransactionConfirmed,
    InvoicePaid,
    InvoicePending,
    InvoiceFailedToPay,
    InvoiceSettled,
    SwapRefunded,
    SwapExpired,
}

impl SwapUpdateEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SwapCreated => "swap.created",
            Self::InvoiceSet => "invoice.set",
            Self::TransactionMempool => "transaction.mempool",
            Self::TransactionConfirmed => "transaction.confirmed",
            Self::InvoicePaid => "invoice.paid",
            Self::InvoicePending => "invoice.pending",
            Self::InvoiceFailedToPay => "invoice.failedToPay",
            Self::InvoiceSettled => "invoice.settled",
            Self::SwapRefunded => "swap.refunded",
            Self::SwapExpired => "swap.expired",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Some(match raw {
            "swap.created" => Self::SwapCreated,
            "invoice.set" => Self::InvoiceSet,
            "transaction.mempool" => Self::TransactionMempool,
            "transaction.confirmed" => Self::TransactionConfirmed,
            "invoice.paid" => Self::InvoicePaid,
            "invoice.pending" => Self::InvoicePending,
            "invoice.failedToPay" => Self::InvoiceFailedToPay,
            "invoice.settled" => Self::InvoiceSettled,
            "swap.refunded" => Self::SwapRefunded,
            "swap.expired" => Self::SwapExpired,
            _ => return None,
        })
    }

    /// Whether the state ends the swap's lifecycle.
    pub fn is_final(self) -> bool {
        matches!(
            self,
            Self::InvoiceSettled
                | Self::InvoiceFailedToPay
                | Self::SwapRefunded
                | Self::SwapExpired
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SwapUpdate {
    pub id: String,
    pub status: SwapUpdateEvent,
}

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Fan-out of swap lifecycle events. A single broadcast channel keeps
/// per-swap ordering; subscribers filter by id.
#[derive(Clone)]
pub struct EventHub {
    sender: broadcast::Sender<SwapUpdate>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn emit(&self, id: &str, status: SwapUpdateEvent) {
        tracing::debug!(swap_id = %id, status = status.as_str(), "swap update");
        // Nobody listening is fine.
        let _ = self.sender.send(SwapUpdate {
            id: id.to_string(),
            status,
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SwapUpdate> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn preserves_per_swap_ordering() {
        let hub = EventHub::new();
        let mut updates = hub.subscribe();

        hub.emit("a", SwapUpdateEvent::SwapCreated);
        hub.emit("b", SwapUpdateEvent::SwapCreated);
        hub.emit("a", SwapUpdateEvent::InvoiceSet);

        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(updates.recv().await.unwrap());
        }

        let for_a: Vec<_> = seen.iter().filter(|u| u.id == "a").collect();
        assert_eq!(for_a[0].status, SwapUpdateEvent::SwapCreated);
        assert_eq!(for_a[1].status, SwapUpdateEvent::InvoiceSet);
    }

    #[test]
    fn status_strings_round_trip() {
        for status in [
            SwapUpdateEvent::SwapCreated,
            SwapUpdateEvent::InvoiceSet,
            SwapUpdateEvent::TransactionMempool,
            SwapUpdateEvent::TransactionConfirmed,
            SwapUpdateEvent::InvoicePaid,
            SwapUpdateEvent::InvoicePending,
            SwapUpdateEvent::InvoiceFailedToPay,
            SwapUpdateEvent::InvoiceSettled,
            SwapUpdateEvent::SwapRefunded,
            SwapUpdateEvent::SwapExpired,
        ] {
            assert_eq!(SwapUpdateEvent::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn emitting_without_subscribers_is_harmless() {
        EventHub::new().emit("a", SwapUpdateEvent::SwapCreated);
    }
}
