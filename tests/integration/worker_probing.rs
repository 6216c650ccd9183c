use crate::support::{profile, Fleet};
use bfscope::proto::buildfarm::PipelineChange;
use bfscope::workers::{WorkerProber, WorkerSort, EXECUTE_ACTION_STAGE};
use std::sync::Arc;
use std::time::Duration;

fn names(workers: &[&str]) -> Vec<String> {
    workers.iter().map(|w| w.to_string()).collect()
}

fn fleet() -> Fleet {
    let fleet = Fleet::default();
    fleet.add("10.0.0.1:8981", profile("alpha", 2, 8));
    fleet.add("10.0.0.2:8981", profile("bravo", 7, 8));
    fleet.add("10.0.0.3:8981", profile("charlie", 4, 8));
    fleet
}

#[tokio::test]
async fn sorts_by_name_or_busiest_first() {
    let mut prober = WorkerProber::new(Arc::new(fleet()), Duration::from_millis(30), 8);
    prober
        .probe(&names(&["10.0.0.1:8981", "10.0.0.2:8981", "10.0.0.3:8981"]))
        .await;

    let by_name: Vec<String> = prober
        .workers(WorkerSort::Name)
        .iter()
        .map(|w| w.display_name().to_string())
        .collect();
    assert_eq!(by_name, vec!["alpha", "bravo", "charlie"]);

    let by_load: Vec<i32> = prober
        .workers(WorkerSort::Executions)
        .iter()
        .map(|w| w.executions())
        .collect();
    assert_eq!(by_load, vec![7, 4, 2]);
}

#[tokio::test]
async fn unreachable_worker_goes_stale_then_recovers() {
    let fleet = fleet();
    fleet.take_down("10.0.0.2:8981");
    let mut prober = WorkerProber::new(Arc::new(fleet.clone()), Duration::from_millis(30), 8);
    let listed = names(&["10.0.0.1:8981", "10.0.0.2:8981"]);

    prober.probe(&listed).await;
    prober.probe(&listed).await;

    let down = prober.state("10.0.0.2:8981").unwrap();
    assert_eq!(down.stale, 2);
    assert!(down.message.contains("connection refused"));
    assert_eq!(prober.state("10.0.0.1:8981").unwrap().stale, 0);

    fleet.bring_up("10.0.0.2:8981");
    prober.probe(&listed).await;

    let up = prober.state("10.0.0.2:8981").unwrap();
    assert!(!up.is_stale());
    assert!(up.message.is_empty());
    assert_eq!(up.slots(EXECUTE_ACTION_STAGE), (7, 8));
    // One channel per worker, reused across probes.
    assert_eq!(fleet.connects.lock().len(), 2);
}

#[tokio::test]
async fn delisted_workers_are_forgotten() {
    let mut prober = WorkerProber::new(Arc::new(fleet()), Duration::from_millis(30), 8);
    prober
        .probe(&names(&["10.0.0.1:8981", "10.0.0.3:8981"]))
        .await;
    prober.probe(&names(&["10.0.0.3:8981"])).await;

    assert!(prober.state("10.0.0.1:8981").is_none());
    assert_eq!(prober.workers(WorkerSort::Name).len(), 1);
}

#[tokio::test]
async fn pipeline_change_is_read_back() {
    let fleet = fleet();
    fleet.make_stuck("10.0.0.3:8981");
    let prober = WorkerProber::new(Arc::new(fleet), Duration::from_millis(30), 8);
    let widen = || {
        vec![PipelineChange {
            stage: EXECUTE_ACTION_STAGE.to_string(),
            paused: false,
            width: 12,
        }]
    };

    let applied = prober.pipeline_change("10.0.0.1:8981", widen()).await.unwrap();
    assert!(applied.unconfirmed.is_empty());
    assert_eq!(
        applied.profile.stage(EXECUTE_ACTION_STAGE).map(|s| s.slots_configured),
        Some(12)
    );

    let ignored = prober.pipeline_change("10.0.0.3:8981", widen()).await.unwrap();
    assert_eq!(ignored.unconfirmed, vec![EXECUTE_ACTION_STAGE.to_string()]);
}
