//! Domain events produced by sync transactions.
//!
//! Transactions never notify listeners directly. They collect events in an
//! [`Outbox`] which the caller dispatches after the commit is durable.

use serde::Serialize;

use crate::subscription::{Subscription, SubscriptionInfo};
use crate::types::FilterText;

/// Subscription field named by a change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionProperty {
    DownloadStatus,
    LastVersion,
    DownloadCount,
    Enabled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    SubscriptionAdded {
        subscription: SubscriptionInfo,
    },
    SubscriptionRemoved {
        subscription: SubscriptionInfo,
    },
    SubscriptionChanged {
        subscription: SubscriptionInfo,
        property: SubscriptionProperty,
    },
    FiltersAdded {
        subscription: SubscriptionInfo,
        filters: Vec<FilterText>,
    },
    FiltersRemoved {
        subscription: SubscriptionInfo,
        filters: Vec<FilterText>,
    },
    UserFilterAdded {
        filter: FilterText,
    },
    UserFilterRemoved {
        filter: FilterText,
    },
}

/// Events waiting for dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outbox {
    events: Vec<SyncEvent>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: SyncEvent) {
        self.events.push(event);
    }

    pub fn added(&mut self, subscription: &Subscription) {
        self.push(SyncEvent::SubscriptionAdded {
            subscription: subscription.info(),
        });
    }

    pub fn removed(&mut self, subscription: &Subscription) {
        self.push(SyncEvent::SubscriptionRemoved {
            subscription: subscription.info(),
        });
    }

    pub fn changed(&mut self, subscription: &Subscription, property: SubscriptionProperty) {
        self.push(SyncEvent::SubscriptionChanged {
            subscription: subscription.info(),
            property,
        });
    }

    pub fn filters_added(&mut self, subscription: &Subscription, filters: Vec<FilterText>) {
        if !filters.is_empty() {
            self.push(SyncEvent::FiltersAdded {
                subscription: subscription.info(),
                filters,
            });
        }
    }

    pub fn filters_removed(&mut self, subscription: &Subscription, filters: Vec<FilterText>) {
        if !filters.is_empty() {
            self.push(SyncEvent::FiltersRemoved {
                subscription: subscription.info(),
                filters,
            });
        }
    }

    pub fn append(&mut self, other: Outbox) {
        self.events.extend(other.events);
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SyncEvent> + '_ {
        self.events.iter()
    }

    pub fn into_events(self) -> Vec<SyncEvent> {
        self.events
    }
}
