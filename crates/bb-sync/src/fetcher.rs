//! Diff download seam.

use std::future::Future;

use bb_core::{Diff, SubscriptionInfo, TransportError};

/// Downloads the next diff of a subscription.
///
/// The engine holds only the subscription's sync lock while awaiting the
/// returned future, so other subscriptions keep syncing meanwhile.
pub trait DiffFetcher: Send + Sync {
    fn fetch(&self, subscription: &SubscriptionInfo) -> impl Future<Output = Result<Diff, TransportError>> + Send;
}
