use crate::support::{executing_operation, Registry};
use bfscope::rpc::cancel;

#[tokio::test]
async fn cancelling_a_finished_operation_succeeds() {
    let mut finished = executing_operation("shard/executions/done", "//t:done");
    finished.done = true;
    let registry = Registry::new(vec![
        finished,
        executing_operation("shard/executions/live", "//t:live"),
    ]);

    cancel(&registry, "shard/executions/live").await.unwrap();
    cancel(&registry, "shard/executions/done").await.unwrap();

    assert_eq!(
        *registry.cancelled.lock(),
        vec!["shard/executions/live", "shard/executions/done"]
    );
}
