use crate::support::{executing_operation, profile, Fleet, Registry, StaticBackplane};
use bfscope::config::PollerConfig;
use bfscope::error::PollError;
use bfscope::monitor::Monitor;
use bfscope::operation::StageKind;
use bfscope::poller::{ListingSource, OperationPoller, PollOutcome, PollReport};
use bfscope::proto::buildfarm::BackplaneStatus;
use bfscope::queue::{EntryKind, ShardedQueue};
use bfscope::status::StatusSampler;
use bfscope::store::MemoryStore;
use bfscope::workers::WorkerProber;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

fn settings(page_size: i32) -> PollerConfig {
    PollerConfig {
        page_size,
        ..Default::default()
    }
}

fn operations(count: usize) -> Vec<bfscope::proto::longrunning::Operation> {
    (0..count)
        .map(|i| executing_operation(&format!("shard/executions/{}", i), &format!("//t:{}", i)))
        .collect()
}

fn polled(outcome: PollOutcome) -> PollReport {
    match outcome {
        PollOutcome::Polled(report) => report,
        PollOutcome::Skipped { remaining } => panic!("skipped with {} remaining", remaining),
    }
}

fn registry_poller(registry: Arc<Registry>, settings: PollerConfig) -> OperationPoller {
    OperationPoller::new(
        registry,
        Arc::new(MemoryStore::new()),
        "shard",
        ListingSource::registry("executions", "status=executing"),
        settings,
    )
}

#[tokio::test]
async fn registry_listing_follows_page_tokens() {
    let registry = Arc::new(Registry::new(operations(7)));
    let mut poller = registry_poller(registry.clone(), settings(3));

    let report = polled(poller.poll().await.unwrap());

    assert_eq!(report.names.len(), 7);
    assert_eq!(report.names[6], "shard/executions/6");
    assert_eq!(report.decoded, 7);
    assert!(report.membership_changed);
    assert_eq!(report.summaries[3].request.target_id, "//t:3");
    assert_eq!(report.summaries[3].stage_kind, StageKind::Executing);

    let calls = registry.list_calls.lock();
    let tokens: Vec<&str> = calls.iter().map(|c| c.page_token.as_str()).collect();
    assert_eq!(tokens, vec!["", "3", "6"]);
    assert!(calls
        .iter()
        .all(|c| c.name == "shard/executions" && c.filter == "status=executing"));
}

#[tokio::test]
async fn unchanged_listings_back_off_exponentially() {
    let registry = Arc::new(Registry::new(operations(2)));
    let mut poller = registry_poller(registry.clone(), settings(10));

    let mut polled_ticks = Vec::new();
    for tick in 0..7 {
        if let PollOutcome::Polled(_) = poller.poll().await.unwrap() {
            polled_ticks.push(tick);
        }
    }
    assert_eq!(polled_ticks, vec![0, 1, 3, 6]);

    registry.replace(operations(3));
    let report = loop {
        if let PollOutcome::Polled(report) = poller.poll().await.unwrap() {
            break report;
        }
    };
    assert!(report.membership_changed);
    assert_eq!(report.stall_counter, 0);
}

#[tokio::test]
async fn four_unavailable_listings_are_absorbed() {
    let registry = Arc::new(Registry::new(operations(1)));
    registry.fail_next(4);
    let mut poller = registry_poller(
        registry.clone(),
        PollerConfig {
            retry_attempts: 5,
            ..settings(10)
        },
    );

    let report = polled(poller.poll().await.unwrap());

    assert_eq!(report.names, vec!["shard/executions/0"]);
    assert_eq!(registry.list_calls.lock().len(), 5);
}

#[tokio::test]
async fn five_unavailable_listings_are_fatal() {
    let registry = Arc::new(Registry::new(operations(1)));
    registry.fail_next(5);
    let mut poller = registry_poller(
        registry,
        PollerConfig {
            retry_attempts: 5,
            ..settings(10)
        },
    );

    match poller.poll().await.unwrap_err() {
        PollError::RetriesExhausted { attempts, last } => {
            assert_eq!(attempts, 5);
            assert!(last.is_transient());
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn queue_heads_are_resolved_through_get_operation() {
    let registry = Arc::new(Registry::new(operations(4)));
    let store = Arc::new(MemoryStore::new());
    store.rpush(
        "PreQueuedOperations",
        (0..3).map(|i| format!(r#"{{"operationName":"shard/executions/{}"}}"#, i)),
    );
    let queue = ShardedQueue::discover(store.as_ref(), "PreQueuedOperations")
        .await
        .unwrap();
    let mut poller = OperationPoller::new(
        registry.clone(),
        store,
        "shard",
        ListingSource::Queues {
            queues: vec![queue],
            kind: EntryKind::Prequeue,
        },
        settings(10),
    );

    let report = polled(poller.poll().await.unwrap());

    assert_eq!(report.summaries.len(), 3);
    assert_eq!(report.summaries[2].request.target_id, "//t:2");
    let mut fetched = registry.get_calls.lock().clone();
    fetched.sort();
    assert_eq!(
        fetched,
        vec!["shard/executions/0", "shard/executions/1", "shard/executions/2"]
    );
    assert!(registry.list_calls.lock().is_empty());
}

#[tokio::test]
async fn dispatched_names_missing_from_registry_are_reported() {
    let registry = Arc::new(Registry::new(operations(1)));
    let store = Arc::new(MemoryStore::new());
    store.hset("DispatchedOperations", "shard/executions/0", "{}");
    store.hset("DispatchedOperations", "shard/executions/gone", "{}");
    let mut poller = OperationPoller::new(
        registry,
        store,
        "shard",
        ListingSource::Dispatched {
            key: "DispatchedOperations".to_string(),
        },
        settings(10),
    );

    let report = polled(poller.poll().await.unwrap());

    assert_eq!(report.names.len(), 2);
    assert_eq!(report.summaries.len(), 1);
    assert_eq!(report.failed, vec!["shard/executions/gone"]);
}

#[tokio::test(start_paused = true)]
async fn monitor_runs_each_stage_per_tick() {
    let registry = Arc::new(Registry::new(operations(3)));
    let backplane = Arc::new(StaticBackplane::new(BackplaneStatus {
        dispatched_size: 3,
        active_execute_workers: vec!["w1:8981".to_string(), "w2:8981".to_string()],
        ..Default::default()
    }));
    let fleet = Fleet::default();
    fleet.add("w1:8981", profile("w1", 1, 4));
    fleet.add("w2:8981", profile("w2", 3, 4));

    let mut monitor = Monitor::new(
        StatusSampler::new(backplane, "shard"),
        registry_poller(registry, settings(10)),
        Some(WorkerProber::new(Arc::new(fleet), Duration::from_millis(30), 4)),
        Duration::from_millis(16),
    );

    let mut snapshots = Vec::new();
    let ran = monitor
        .run(Some(3), |snapshot| {
            snapshots.push(snapshot);
            ControlFlow::Continue(())
        })
        .await
        .unwrap();

    assert_eq!(ran, 3);
    assert_eq!(snapshots.len(), 3);
    let last = &snapshots[2];
    assert_eq!(last.tick, 3);
    assert_eq!(last.status.as_ref().map(|s| s.dispatched_size), Some(3));
    assert_eq!(last.workers.len(), 2);
    assert_eq!(last.operations.len(), 3);
    // Tick 2 saw the same listing and tick 3 backs off.
    assert!(snapshots[1].polled);
    assert!(!last.polled);
}

#[tokio::test]
async fn sink_can_stop_the_monitor() {
    let registry = Arc::new(Registry::new(operations(1)));
    let backplane = Arc::new(StaticBackplane::new(BackplaneStatus::default()));
    let mut monitor = Monitor::new(
        StatusSampler::new(backplane, "shard"),
        registry_poller(registry, settings(10)),
        None,
        Duration::from_millis(1),
    );

    let ran = monitor
        .run(None, |snapshot| {
            if snapshot.tick == 2 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })
        .await
        .unwrap();

    assert_eq!(ran, 2);
}
