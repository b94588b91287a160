//! The sync engine
//!
//! Owns the subscription store and the installed rule state behind one
//! mutex. Every operation that changes rules takes that mutex for its whole
//! stage, check, commit and persist span and never awaits while holding it.
//! Downloads happen outside it, under the subscription's scheduler lock only.

use bb_core::{
    recover_after_restart, ApplyOutcome, Diff, DiffApplier, DiffReport, FilterText, Outbox, Owner, QuotaExceeded,
    QuotaProvider, QuotaUsage, RuleCompiler, RuleState, StaticRuleIndex, Subscription, SubscriptionId,
    SubscriptionInfo, SubscriptionOptions, SubscriptionProperty, SubscriptionStore, SyncEvent, TransportError,
};
use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::config::EngineConfig;
use crate::error::{Result, SyncError};
use crate::fetcher::DiffFetcher;
use crate::notifier::Notifier;
use crate::persistence::{load_state, save_state, Persistence};
use crate::scheduler::SyncScheduler;

/// Result of syncing one subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The diff was committed
    Applied(DiffReport),
    /// The diff did not fit into the quota; nothing changed
    Rejected(QuotaExceeded),
    /// The download failed; nothing changed
    Failed(TransportError),
    /// Disabled or not diff-updatable
    Skipped,
}

#[derive(Debug, Clone)]
pub struct SyncResult {
    pub subscription: SubscriptionId,
    pub outcome: SyncOutcome,
}

#[derive(Debug, Clone)]
struct EngineState {
    store: SubscriptionStore,
    rules: RuleState,
}

pub struct SyncEngine<F> {
    state: Mutex<EngineState>,
    statics: StaticRuleIndex,
    fetcher: F,
    compiler: Box<dyn RuleCompiler + Send + Sync>,
    quota: Box<dyn QuotaProvider + Send + Sync>,
    persistence: Box<dyn Persistence>,
    scheduler: SyncScheduler,
    notifier: Notifier,
}

impl<F: DiffFetcher> SyncEngine<F> {
    /// Load persisted state and run restart recovery.
    pub fn open(
        config: &EngineConfig,
        statics: StaticRuleIndex,
        fetcher: F,
        compiler: impl RuleCompiler + Send + Sync + 'static,
        persistence: impl Persistence + 'static,
    ) -> Result<Self> {
        Self::with_quota_provider(config, statics, fetcher, compiler, config.quota, persistence)
    }

    /// Like [`SyncEngine::open`], with maxima read from `quota` at the start of
    /// every transaction instead of the fixed config values.
    pub fn with_quota_provider(
        config: &EngineConfig,
        statics: StaticRuleIndex,
        fetcher: F,
        compiler: impl RuleCompiler + Send + Sync + 'static,
        quota: impl QuotaProvider + Send + Sync + 'static,
        persistence: impl Persistence + 'static,
    ) -> Result<Self> {
        let loaded = load_state(&persistence)?;
        let mut store = loaded.subscriptions;
        let mut rules = RuleState::from_parts(quota.limits(), loaded.dynamic, loaded.disabled);
        let report = recover_after_restart(&mut store, &mut rules, &statics);
        save_state(&persistence, &store, rules.dynamic(), rules.disabled())?;

        log::info!(
            "Opened sync engine: {} subscription(s), {} reset, {} dynamic / {} disabled rules in use",
            store.len(),
            report.reset.len(),
            rules.usage().dynamic_rules,
            rules.usage().disabled_static_rules,
        );

        Ok(Self {
            state: Mutex::new(EngineState { store, rules }),
            statics,
            fetcher,
            compiler: Box::new(compiler),
            quota: Box::new(quota),
            persistence: Box::new(persistence),
            scheduler: SyncScheduler::new(),
            notifier: Notifier::new(config.event_capacity),
        })
    }

    pub fn events(&self) -> broadcast::Receiver<SyncEvent> {
        self.notifier.subscribe()
    }

    pub fn subscriptions(&self) -> Vec<SubscriptionInfo> {
        self.state.lock().store.iter().map(Subscription::info).collect()
    }

    pub fn subscription(&self, url: &str) -> Option<SubscriptionInfo> {
        self.state.lock().store.get(&SubscriptionId::new(url)).map(Subscription::info)
    }

    /// Filters currently in effect for a subscription.
    pub fn active_filters(&self, url: &str) -> Option<Vec<FilterText>> {
        self.state
            .lock()
            .store
            .get(&SubscriptionId::new(url))
            .map(|sub| sub.active_filters().iter().cloned().collect())
    }

    pub fn usage(&self) -> QuotaUsage {
        self.state.lock().rules.usage()
    }

    /// Read-only access to the subscription store and rule state.
    pub fn inspect<R>(&self, f: impl FnOnce(&SubscriptionStore, &RuleState) -> R) -> R {
        let state = self.state.lock();
        f(&state.store, &state.rules)
    }

    /// Add a subscription. Re-adding a removed diff-updatable subscription
    /// reinstalls the filter set it had when it was removed.
    ///
    /// Fails with [`SyncError::Quota`] if that set no longer fits; the saved
    /// set is kept for the next attempt.
    pub async fn add(&self, url: &str, options: SubscriptionOptions) -> Result<SubscriptionInfo> {
        let id = SubscriptionId::new(url);
        let _guard = self.scheduler.acquire(&id).await;

        self.transact(|state, outbox| {
            if state.store.contains(&id) {
                return Err(SyncError::DuplicateSubscription(id.clone()));
            }

            let enabled = options.enabled;
            let updatable = options.diff_endpoint.is_some();
            let retired = state.store.take_retired(&id);
            // A plain list only ever holds its baseline.
            let retired = match retired {
                Some(_) if !updatable => {
                    log::debug!("{}: re-added without diff updates, dropping saved filter set", id);
                    None
                }
                retired => retired,
            };
            let subscription = match (&retired, enabled) {
                // Nothing is installed for a disabled subscription; keep the
                // set for the next enable.
                (Some(filters), false) => Subscription::new(id.clone(), options, filters.clone()),
                _ => Subscription::new(id.clone(), options, self.statics.baseline(&id)),
            };
            state.store.insert(subscription);
            let subscription = state.store.get_mut(&id).ok_or_else(|| SyncError::UnknownSubscription(id.clone()))?;
            outbox.added(subscription);
            log::info!("{}: added (updatable: {}, enabled: {})", id, updatable, enabled);

            if let (Some(filters), true) = (retired, enabled) {
                state.rules.set_limits(self.quota.limits());
                let applied = self.applier().replay(&mut state.rules, subscription, &filters);
                if let ApplyOutcome::Rejected(exceeded) = applied.outcome {
                    return Err(SyncError::Quota(exceeded));
                }
                outbox.append(applied.outbox);
            }
            Ok(subscription.info())
        })
    }

    /// Remove a subscription and release every rule it holds.
    pub async fn remove(&self, url: &str) -> Result<()> {
        let id = SubscriptionId::new(url);
        let _guard = self.scheduler.acquire(&id).await;

        self.transact(|state, outbox| {
            if !state.store.contains(&id) {
                return Err(SyncError::UnknownSubscription(id.clone()));
            }
            let released = state.rules.release_subscription(&id);
            let subscription = state
                .store
                .remove(&id)
                .ok_or_else(|| SyncError::UnknownSubscription(id.clone()))?;
            outbox.removed(&subscription);
            log::info!(
                "{}: removed, freed {} dynamic rule(s), re-enabled {} static rule(s)",
                id,
                released.freed_rules,
                released.reenabled_rules
            );
            Ok(())
        })
    }

    /// Enable a subscription, reinstalling its last committed filter set.
    ///
    /// Returns false if it was already enabled. Fails with
    /// [`SyncError::Quota`] if the set no longer fits, leaving the subscription
    /// disabled with the set intact.
    pub async fn enable(&self, url: &str) -> Result<bool> {
        let id = SubscriptionId::new(url);
        let _guard = self.scheduler.acquire(&id).await;

        self.transact(|state, outbox| {
            let subscription = state
                .store
                .get_mut(&id)
                .ok_or_else(|| SyncError::UnknownSubscription(id.clone()))?;
            if !subscription.set_enabled(true) {
                return Ok(false);
            }
            outbox.changed(subscription, SubscriptionProperty::Enabled);

            if subscription.is_updatable() {
                state.rules.set_limits(self.quota.limits());
                let filters = subscription.active_filters().clone();
                let applied = self.applier().replay(&mut state.rules, subscription, &filters);
                if let ApplyOutcome::Rejected(exceeded) = applied.outcome {
                    return Err(SyncError::Quota(exceeded));
                }
                outbox.append(applied.outbox);
            }
            log::info!("{}: enabled", id);
            Ok(true)
        })
    }

    /// Disable a subscription and release its rules. Its filter set is kept
    /// for the next enable.
    ///
    /// Returns false if it was already disabled.
    pub async fn disable(&self, url: &str) -> Result<bool> {
        let id = SubscriptionId::new(url);
        let _guard = self.scheduler.acquire(&id).await;

        self.transact(|state, outbox| {
            let subscription = state
                .store
                .get_mut(&id)
                .ok_or_else(|| SyncError::UnknownSubscription(id.clone()))?;
            if !subscription.set_enabled(false) {
                return Ok(false);
            }
            outbox.changed(subscription, SubscriptionProperty::Enabled);
            let released = state.rules.release_subscription(&id);
            log::info!(
                "{}: disabled, freed {} dynamic rule(s), re-enabled {} static rule(s)",
                id,
                released.freed_rules,
                released.reenabled_rules
            );
            Ok(true)
        })
    }

    /// Download and apply the next diff of one subscription, or of every
    /// subscription in turn when `url` is `None`.
    pub async fn sync(&self, url: Option<&str>) -> Result<Vec<SyncResult>> {
        let Some(url) = url else {
            let ids = self.state.lock().store.ids();
            let mut results = Vec::with_capacity(ids.len());
            for id in ids {
                match self.sync_one(&id).await {
                    Ok(outcome) => results.push(SyncResult {
                        subscription: id,
                        outcome,
                    }),
                    // Removed while earlier subscriptions synced.
                    Err(SyncError::UnknownSubscription(_)) => {}
                    Err(err) => return Err(err),
                }
            }
            return Ok(results);
        };

        let id = SubscriptionId::new(url);
        let outcome = self.sync_one(&id).await?;
        Ok(vec![SyncResult {
            subscription: id,
            outcome,
        }])
    }

    async fn sync_one(&self, id: &SubscriptionId) -> Result<SyncOutcome> {
        let _guard = self.scheduler.acquire(id).await;

        let info = {
            let state = self.state.lock();
            let subscription = state
                .store
                .get(id)
                .ok_or_else(|| SyncError::UnknownSubscription(id.clone()))?;
            if !subscription.is_updatable() || !subscription.is_enabled() {
                log::debug!(
                    "{}: not synced (updatable: {}, enabled: {})",
                    id,
                    subscription.is_updatable(),
                    subscription.is_enabled()
                );
                return Ok(SyncOutcome::Skipped);
            }
            subscription.info()
        };

        let fetched = self.fetcher.fetch(&info).await;
        self.commit_fetched(id, fetched)
    }

    /// Record a download result and apply its diff.
    ///
    /// Only the synced subscription and the rule stores change, so a failed
    /// persist is undone through the transaction's [`bb_core::Undo`] instead of
    /// a copy of the whole engine state.
    fn commit_fetched(&self, id: &SubscriptionId, fetched: std::result::Result<Diff, TransportError>) -> Result<SyncOutcome> {
        let mut outbox = Outbox::new();
        let outcome = {
            let mut guard = self.state.lock();
            let EngineState { store, rules } = &mut *guard;
            let subscription = store
                .get_mut(id)
                .ok_or_else(|| SyncError::UnknownSubscription(id.clone()))?;
            let before = subscription.clone();

            let (outcome, undo) = match fetched {
                Ok(diff) => {
                    subscription.record_download();
                    outbox.changed(subscription, SubscriptionProperty::DownloadCount);

                    rules.set_limits(self.quota.limits());
                    let applied = self.applier().apply(rules, subscription, &diff);
                    outbox.append(applied.outbox);
                    let outcome = match applied.outcome {
                        ApplyOutcome::Applied(report) => SyncOutcome::Applied(report),
                        ApplyOutcome::Rejected(exceeded) => SyncOutcome::Rejected(exceeded),
                    };
                    (outcome, Some(applied.undo))
                }
                Err(err) => {
                    log::warn!("{}: download failed: {}", id, err);
                    if subscription.set_download_status(err.download_status()) {
                        outbox.changed(subscription, SubscriptionProperty::DownloadStatus);
                    }
                    (SyncOutcome::Failed(err), None)
                }
            };

            if let Err(err) = save_state(self.persistence.as_ref(), store, rules.dynamic(), rules.disabled()) {
                log::error!("{}: failed to persist sync, rolling back: {}", id, err);
                if let Some(subscription) = store.get_mut(id) {
                    if let Some(undo) = undo {
                        undo.restore(rules, subscription);
                    }
                    *subscription = before;
                }
                return Err(err);
            }
            outcome
        };

        self.notifier.dispatch(outbox);
        Ok(outcome)
    }

    /// Install a filter owned by the user.
    ///
    /// Returns false if the user already had it.
    pub fn add_user_filter(&self, text: &str) -> Result<bool> {
        let filter = FilterText::new(text)?;
        self.transact(|state, outbox| {
            if state
                .rules
                .dynamic()
                .get(&filter)
                .is_some_and(|record| record.is_owned_by(&Owner::User))
            {
                return Ok(false);
            }
            state.rules.set_limits(self.quota.limits());
            state.rules.add_user_filter(&filter, self.compiler.as_ref())?;
            log::info!("User filter added: {}", filter);
            outbox.push(SyncEvent::UserFilterAdded { filter: filter.clone() });
            Ok(true)
        })
    }

    /// Drop the user's reference on a filter. Subscriptions holding the same
    /// filter keep it installed.
    pub fn remove_user_filter(&self, text: &str) -> Result<()> {
        let filter = FilterText::new(text)?;
        self.transact(|state, outbox| {
            state.rules.remove_user_filter(&filter)?;
            log::info!("User filter removed: {}", filter);
            outbox.push(SyncEvent::UserFilterRemoved { filter: filter.clone() });
            Ok(())
        })
    }

    pub fn user_filters(&self) -> Vec<FilterText> {
        self.state.lock().rules.user_filters()
    }

    fn applier(&self) -> DiffApplier<'_> {
        DiffApplier::new(&self.statics, self.compiler.as_ref())
    }

    /// Run `f` inside the critical section and persist the result.
    ///
    /// If `f` fails or persisting fails, the in-memory state is restored and
    /// no event is dispatched.
    fn transact<T>(&self, f: impl FnOnce(&mut EngineState, &mut Outbox) -> Result<T>) -> Result<T> {
        let mut outbox = Outbox::new();
        let value = {
            let mut state = self.state.lock();
            let before = (*state).clone();

            let value = match f(&mut *state, &mut outbox) {
                Ok(value) => value,
                Err(err) => {
                    *state = before;
                    return Err(err);
                }
            };
            if let Err(err) = save_state(
                self.persistence.as_ref(),
                &state.store,
                state.rules.dynamic(),
                state.rules.disabled(),
            ) {
                log::error!("Failed to persist state, rolling back: {}", err);
                *state = before;
                return Err(err);
            }
            value
        };

        self.notifier.dispatch(outbox);
        Ok(value)
    }
}
