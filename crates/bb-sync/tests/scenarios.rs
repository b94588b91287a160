//! Diff application through the engine: quota, idempotence, ownership.

mod common;

use bb_core::{Diff, DownloadStatus, FilterText, Owner, QuotaUsage, SubscriptionId, SubscriptionOptions};
use bb_sync::persistence::{DYNAMIC_FILTERS_KEY, STATIC_DISABLED_KEY};
use bb_sync::{MemoryPersistence, SyncOutcome};
use common::*;

fn scenario_a_diff() -> Diff {
    Diff::new([f(1), f(2), f(3), f(4)], [S1, S2])
}

fn text(s: &str) -> FilterText {
    FilterText::new(s).unwrap()
}

#[tokio::test]
async fn scenario_a_installs_dynamic_and_disables_static() {
    let fetcher = ScriptedFetcher::new();
    let engine = engine((5, 5), &fetcher, MemoryPersistence::new());
    engine.add(EASYLIST, updatable()).await.unwrap();

    fetcher.respond(EASYLIST, Ok(scenario_a_diff()));
    let results = engine.sync(Some(EASYLIST)).await.unwrap();

    assert!(matches!(results[0].outcome, SyncOutcome::Applied(_)));
    assert_eq!(
        engine.usage(),
        QuotaUsage {
            dynamic_rules: 4,
            disabled_static_rules: 2,
        }
    );
    let info = engine.subscription(EASYLIST).unwrap();
    assert_eq!(info.download_status, Some(DownloadStatus::Ok));

    let active = engine.active_filters(EASYLIST).unwrap();
    assert_eq!(active.len(), 5);
    assert!(active.contains(&text(S3)));
    assert!(!active.contains(&text(S1)));
}

#[tokio::test]
async fn scenario_b_commits_at_exactly_the_maximum() {
    let fetcher = ScriptedFetcher::new();
    let engine = engine((5, 5), &fetcher, MemoryPersistence::new());
    engine.add(EASYLIST, updatable()).await.unwrap();
    fetcher.respond(EASYLIST, Ok(scenario_a_diff()));
    engine.sync(Some(EASYLIST)).await.unwrap();

    fetcher.respond(EASYLIST, Ok(Diff::new([f(1), f(5)], Vec::<String>::new())));
    let results = engine.sync(Some(EASYLIST)).await.unwrap();

    match &results[0].outcome {
        // F1 was already active.
        SyncOutcome::Applied(report) => assert_eq!(report.added, vec![text(&f(5))]),
        other => panic!("expected commit, got {other:?}"),
    }
    assert_eq!(engine.usage().dynamic_rules, 5);
}

#[tokio::test]
async fn scenario_b_rejects_above_the_maximum() {
    let fetcher = ScriptedFetcher::new();
    let persistence = MemoryPersistence::new();
    let engine = engine((4, 5), &fetcher, persistence.clone());
    engine.add(EASYLIST, updatable()).await.unwrap();
    fetcher.respond(EASYLIST, Ok(scenario_a_diff()));
    engine.sync(Some(EASYLIST)).await.unwrap();

    let dynamic_before = persistence.raw(DYNAMIC_FILTERS_KEY);
    let disabled_before = persistence.raw(STATIC_DISABLED_KEY);
    let active_before = engine.active_filters(EASYLIST);

    fetcher.respond(EASYLIST, Ok(Diff::new([f(1), f(5)], Vec::<String>::new())));
    let results = engine.sync(Some(EASYLIST)).await.unwrap();

    assert!(matches!(results[0].outcome, SyncOutcome::Rejected(_)));
    assert_eq!(engine.usage().dynamic_rules, 4);
    assert_eq!(
        engine.subscription(EASYLIST).unwrap().download_status,
        Some(DownloadStatus::DiffTooManyFilters)
    );
    // Rejection leaves the stores untouched.
    assert_eq!(persistence.raw(DYNAMIC_FILTERS_KEY), dynamic_before);
    assert_eq!(persistence.raw(STATIC_DISABLED_KEY), disabled_before);
    assert_eq!(engine.active_filters(EASYLIST), active_before);
}

#[tokio::test]
async fn scenario_c_and_d_remove_then_replay_without_fetching() {
    let fetcher = ScriptedFetcher::new();
    let engine = engine((5, 5), &fetcher, MemoryPersistence::new());
    engine.add(EASYLIST, updatable()).await.unwrap();
    fetcher.respond(EASYLIST, Ok(scenario_a_diff()));
    engine.sync(Some(EASYLIST)).await.unwrap();
    let active_before = engine.active_filters(EASYLIST);

    engine.remove(EASYLIST).await.unwrap();
    assert_eq!(engine.usage(), QuotaUsage::default());
    assert!(engine.subscription(EASYLIST).is_none());

    let fetches = fetcher.fetches();
    engine.add(EASYLIST, updatable()).await.unwrap();

    assert_eq!(fetcher.fetches(), fetches);
    assert_eq!(
        engine.usage(),
        QuotaUsage {
            dynamic_rules: 4,
            disabled_static_rules: 2,
        }
    );
    assert_eq!(engine.active_filters(EASYLIST), active_before);
}

#[tokio::test]
async fn applying_the_same_diff_twice_changes_nothing() {
    let fetcher = ScriptedFetcher::new();
    let persistence = MemoryPersistence::new();
    let engine = engine((10, 10), &fetcher, persistence.clone());
    engine.add(EASYLIST, updatable()).await.unwrap();
    fetcher.respond(EASYLIST, Ok(scenario_a_diff().with_version("202610160000")));

    engine.sync(Some(EASYLIST)).await.unwrap();
    let active = engine.active_filters(EASYLIST);
    let usage = engine.usage();
    let dynamic = persistence.raw(DYNAMIC_FILTERS_KEY);

    let results = engine.sync(Some(EASYLIST)).await.unwrap();
    match &results[0].outcome {
        SyncOutcome::Applied(report) => {
            assert!(report.added.is_empty());
            assert!(report.removed.is_empty());
        }
        other => panic!("expected commit, got {other:?}"),
    }
    assert_eq!(engine.active_filters(EASYLIST), active);
    assert_eq!(engine.usage(), usage);
    assert_eq!(persistence.raw(DYNAMIC_FILTERS_KEY), dynamic);
    assert_eq!(
        engine.subscription(EASYLIST).unwrap().last_version.as_deref(),
        Some("202610160000")
    );
}

#[tokio::test]
async fn usage_never_exceeds_the_quota() {
    let fetcher = ScriptedFetcher::new();
    let engine = engine((3, 1), &fetcher, MemoryPersistence::new());
    engine.add(EASYLIST, updatable()).await.unwrap();
    engine.add(PRIVACY, updatable()).await.unwrap();

    let diffs = [
        (EASYLIST, Diff::new([f(1), f(2)], [S1])),
        (PRIVACY, Diff::new([f(3), f(4)], Vec::<String>::new())),
        (EASYLIST, Diff::new([f(5)], [S2])),
        (PRIVACY, Diff::new([f(3)], Vec::<String>::new())),
        (EASYLIST, Diff::new(Vec::<String>::new(), [f(1)])),
        (PRIVACY, Diff::new([f(4)], Vec::<String>::new())),
    ];
    for (url, diff) in diffs {
        fetcher.respond(url, Ok(diff));
        engine.sync(Some(url)).await.unwrap();

        let usage = engine.usage();
        assert!(usage.dynamic_rules <= 3, "{usage:?}");
        assert!(usage.disabled_static_rules <= 1, "{usage:?}");
        assert_eq!(engine.inspect(|_, rules| rules.counted_usage()), usage);
    }
}

#[tokio::test]
async fn shared_filters_survive_removal_by_one_owner() {
    let fetcher = ScriptedFetcher::new();
    let engine = engine((10, 10), &fetcher, MemoryPersistence::new());
    engine.add(EASYLIST, updatable()).await.unwrap();
    engine.add(PRIVACY, updatable()).await.unwrap();

    fetcher.respond(EASYLIST, Ok(Diff::new([f(1)], Vec::<String>::new())));
    fetcher.respond(PRIVACY, Ok(Diff::new([f(1)], Vec::<String>::new())));
    engine.sync(None).await.unwrap();
    assert_eq!(engine.usage().dynamic_rules, 1);
    let slots = engine.inspect(|_, rules| rules.dynamic().get(&text(&f(1))).unwrap().rule_ids().to_vec());

    fetcher.respond(EASYLIST, Ok(Diff::new(Vec::<String>::new(), [f(1)])));
    engine.sync(Some(EASYLIST)).await.unwrap();

    engine.inspect(|_, rules| {
        let record = rules.dynamic().get(&text(&f(1))).unwrap();
        assert_eq!(record.rule_ids(), slots.as_slice());
        assert!(record.is_owned_by(&Owner::Subscription(SubscriptionId::new(PRIVACY))));
        assert!(!record.is_owned_by(&Owner::Subscription(SubscriptionId::new(EASYLIST))));
    });
    assert!(engine.active_filters(PRIVACY).unwrap().contains(&text(&f(1))));
    assert_eq!(engine.usage().dynamic_rules, 1);
}

#[tokio::test]
async fn user_filters_and_subscriptions_hold_independent_references() {
    let fetcher = ScriptedFetcher::new();
    let engine = engine((10, 10), &fetcher, MemoryPersistence::new());
    engine.add(PRIVACY, updatable()).await.unwrap();

    // Removed from the diff, kept for the user.
    assert!(engine.add_user_filter(&f(1)).unwrap());
    fetcher.respond(PRIVACY, Ok(Diff::new([f(1), f(2)], Vec::<String>::new())));
    engine.sync(Some(PRIVACY)).await.unwrap();
    assert_eq!(engine.usage().dynamic_rules, 2);
    fetcher.respond(PRIVACY, Ok(Diff::new(Vec::<String>::new(), [f(1)])));
    engine.sync(Some(PRIVACY)).await.unwrap();
    assert_eq!(engine.user_filters(), vec![text(&f(1))]);
    assert_eq!(engine.usage().dynamic_rules, 2);

    // Removed by the user, kept for the subscription.
    assert!(engine.add_user_filter(&f(2)).unwrap());
    assert!(!engine.add_user_filter(&f(2)).unwrap());
    engine.remove_user_filter(&f(2)).unwrap();
    assert!(engine.active_filters(PRIVACY).unwrap().contains(&text(&f(2))));
    assert_eq!(engine.usage().dynamic_rules, 2);
}

#[tokio::test]
async fn invalid_filters_are_skipped_and_the_rest_commits() {
    let fetcher = ScriptedFetcher::new();
    let engine = engine((10, 10), &fetcher, MemoryPersistence::new());
    engine.add(PRIVACY, updatable()).await.unwrap();

    fetcher.respond(
        PRIVACY,
        Ok(Diff::new(
            [f(1), "example.com##.banner".to_string(), "   ".to_string(), f(2)],
            Vec::<String>::new(),
        )),
    );
    let results = engine.sync(Some(PRIVACY)).await.unwrap();

    match &results[0].outcome {
        SyncOutcome::Applied(report) => {
            assert_eq!(report.added.len(), 2);
            assert_eq!(report.skipped.len(), 2);
        }
        other => panic!("expected commit, got {other:?}"),
    }
    assert_eq!(engine.usage().dynamic_rules, 2);
}

#[tokio::test]
async fn non_updatable_subscriptions_are_not_synced() {
    let fetcher = ScriptedFetcher::new();
    let engine = engine((10, 10), &fetcher, MemoryPersistence::new());
    engine.add(PLAIN, SubscriptionOptions::default()).await.unwrap();

    let results = engine.sync(None).await.unwrap();

    assert_eq!(results[0].outcome, SyncOutcome::Skipped);
    assert_eq!(fetcher.fetches(), 0);
    assert_eq!(engine.active_filters(PLAIN).unwrap(), vec![text("||plain.example^")]);
}
