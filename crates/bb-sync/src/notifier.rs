//! Event dispatch to listeners.

use bb_core::{Outbox, SyncEvent};
use tokio::sync::broadcast;

/// Broadcasts committed events. Listeners that fall behind by more than the
/// channel capacity miss the oldest events.
#[derive(Debug, Clone)]
pub struct Notifier {
    sender: broadcast::Sender<SyncEvent>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    /// Send every event of `outbox`, in order.
    pub fn dispatch(&self, outbox: Outbox) {
        if self.sender.receiver_count() == 0 {
            log::trace!("No listeners, dropping {} event(s)", outbox.len());
            return;
        }
        for event in outbox.into_events() {
            // Only fails once every receiver is gone.
            let _ = self.sender.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bb_core::FilterText;

    #[tokio::test]
    async fn delivers_in_order() {
        let notifier = Notifier::new(8);
        let mut events = notifier.subscribe();

        let mut outbox = Outbox::new();
        for text in ["a", "b"] {
            outbox.push(SyncEvent::UserFilterAdded {
                filter: FilterText::new(text).unwrap(),
            });
        }
        notifier.dispatch(outbox);

        for text in ["a", "b"] {
            match events.recv().await.unwrap() {
                SyncEvent::UserFilterAdded { filter } => assert_eq!(filter.as_str(), text),
                other => panic!("unexpected event {other:?}"),
            }
        }
    }

    #[test]
    fn dispatch_without_listeners_is_a_noop() {
        let notifier = Notifier::new(1);
        let mut outbox = Outbox::new();
        outbox.push(SyncEvent::UserFilterRemoved {
            filter: FilterText::new("a").unwrap(),
        });
        notifier.dispatch(outbox);
    }
}
