use super::*;
use crate::test_support::{
    MemoryResolver, RecordingRebuild, StaticClientFactory, block_on_for_tests, project_params,
};
use crate::{ClientFactory, ProjectResolver};
use rstest::{fixture, rstest};

const DATABASE: &str = "mapboard";

#[fixture]
fn resolver() -> Arc<MemoryResolver> {
    let mut resolver = MemoryResolver::default();
    for schema in ["proj1", "proj2", "proj3", "slow", "fast"] {
        resolver = resolver.with_project(schema, project_params(DATABASE, schema));
    }
    Arc::new(resolver)
}

#[fixture]
fn config() -> CoordinatorConfig {
    CoordinatorConfig::new(DATABASE)
        .with_poll_interval(Duration::from_millis(10))
        .with_rebuild_timeout(Duration::from_secs(5))
}

fn coordinator(
    config: CoordinatorConfig,
    resolver: &Arc<MemoryResolver>,
    rebuild: &Arc<RecordingRebuild>,
) -> (Coordinator, PendingSender) {
    let clients = ClientRegistry::new(
        Arc::clone(resolver) as Arc<dyn ProjectResolver>,
        Arc::new(StaticClientFactory) as Arc<dyn ClientFactory>,
    );
    Coordinator::new(
        config,
        clients,
        Arc::clone(rebuild) as Arc<dyn TopologyRebuild>,
    )
}

/// Queue `signals`, close the channel and run until the queue drains.
fn drain(
    config: CoordinatorConfig,
    resolver: &Arc<MemoryResolver>,
    rebuild: &Arc<RecordingRebuild>,
    signals: &[&str],
) -> CoordinatorReport {
    let (coordinator, sender) = coordinator(config, resolver, rebuild);
    for schema in signals {
        sender.insert(*schema).expect("coordinator accepts signals");
    }
    drop(sender);
    block_on_for_tests(coordinator.run(CancellationToken::new()))
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not met in time");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[rstest]
fn burst_for_one_schema_coalesces(config: CoordinatorConfig, resolver: Arc<MemoryResolver>) {
    let rebuild = Arc::new(RecordingRebuild::default());
    let report = drain(config, &resolver, &rebuild, &["proj1", "proj1", "proj1"]);

    assert_eq!(rebuild.calls(), ["proj1"]);
    assert_eq!(report.completed, ["proj1"]);
    assert!(report.failed.is_empty());
}

#[rstest]
fn distinct_schemas_rebuild_one_at_a_time(
    config: CoordinatorConfig,
    resolver: Arc<MemoryResolver>,
) {
    let rebuild = Arc::new(RecordingRebuild::default().with_delay(Duration::from_millis(20)));
    let report = drain(config, &resolver, &rebuild, &["proj1", "proj2", "proj3"]);

    assert_eq!(rebuild.calls(), ["proj1", "proj2", "proj3"]);
    assert_eq!(rebuild.max_concurrent(), 1);
    assert_eq!(report.completed, ["proj1", "proj2", "proj3"]);
}

#[rstest]
fn unregistered_schema_is_skipped(config: CoordinatorConfig, resolver: Arc<MemoryResolver>) {
    let rebuild = Arc::new(RecordingRebuild::default());
    let report = drain(config, &resolver, &rebuild, &["ghost", "proj1"]);

    assert_eq!(report.skipped, ["ghost"]);
    assert_eq!(rebuild.calls_for("ghost"), 0);
    assert_eq!(report.completed, ["proj1"]);
}

#[rstest]
fn failed_rebuild_releases_the_slot(config: CoordinatorConfig, resolver: Arc<MemoryResolver>) {
    let rebuild = Arc::new(RecordingRebuild::default().failing_for("proj1"));
    let report = drain(config, &resolver, &rebuild, &["proj1", "proj2"]);

    assert_eq!(report.failed, ["proj1"]);
    assert_eq!(report.completed, ["proj2"]);
}

#[rstest]
fn panicking_rebuild_releases_the_slot(config: CoordinatorConfig, resolver: Arc<MemoryResolver>) {
    let rebuild = Arc::new(RecordingRebuild::default().panicking_for("proj1"));
    let report = drain(config, &resolver, &rebuild, &["proj1", "proj2"]);

    assert_eq!(report.failed, ["proj1"]);
    assert_eq!(report.completed, ["proj2"]);
}

#[rstest]
fn overrunning_rebuild_finishes_before_the_next_starts(resolver: Arc<MemoryResolver>) {
    let config = CoordinatorConfig::new(DATABASE)
        .with_poll_interval(Duration::from_millis(10))
        .with_rebuild_timeout(Duration::from_millis(50));
    let rebuild = Arc::new(
        RecordingRebuild::default()
            .with_schema_delay("slow", Duration::from_millis(400))
            .with_schema_delay("fast", Duration::from_millis(100)),
    );
    let report = drain(config, &resolver, &rebuild, &["slow", "fast"]);

    assert_eq!(rebuild.max_concurrent(), 1);
    assert_eq!(rebuild.calls(), ["slow", "fast"]);
    assert_eq!(report.completed, ["slow", "fast"]);
    assert!(report.failed.is_empty());
}

#[rstest]
fn overrunning_rebuild_reports_its_own_failure(resolver: Arc<MemoryResolver>) {
    let config = CoordinatorConfig::new(DATABASE)
        .with_poll_interval(Duration::from_millis(10))
        .with_rebuild_timeout(Duration::from_millis(20));
    let rebuild = Arc::new(
        RecordingRebuild::default()
            .with_schema_delay("slow", Duration::from_millis(150))
            .failing_for("slow"),
    );
    let report = drain(config, &resolver, &rebuild, &["slow", "slow", "fast"]);

    assert_eq!(rebuild.max_concurrent(), 1);
    assert_eq!(report.failed, ["slow"]);
    assert_eq!(report.completed, ["fast"]);
}

#[rstest]
fn zero_poll_interval_is_raised_to_the_minimum() {
    let config = CoordinatorConfig::new(DATABASE).with_poll_interval(Duration::ZERO);
    assert_eq!(config.poll_interval, MIN_POLL_INTERVAL);
}

#[rstest]
fn zero_poll_interval_set_directly_still_runs(resolver: Arc<MemoryResolver>) {
    let mut config = CoordinatorConfig::new(DATABASE);
    config.poll_interval = Duration::ZERO;
    let rebuild = Arc::new(RecordingRebuild::default());
    let report = drain(config, &resolver, &rebuild, &["proj1"]);

    assert_eq!(report.completed, ["proj1"]);
}

#[rstest]
fn signal_during_rebuild_queues_the_schema_again(
    config: CoordinatorConfig,
    resolver: Arc<MemoryResolver>,
) {
    let rebuild = Arc::new(RecordingRebuild::default().with_delay(Duration::from_millis(100)));
    let (coordinator, sender) = coordinator(config, &resolver, &rebuild);

    let report = block_on_for_tests(async {
        let run = tokio::spawn(coordinator.run(CancellationToken::new()));
        sender.insert("proj1").expect("coordinator accepts signals");
        wait_until(|| rebuild.calls_for("proj1") == 1).await;
        sender.insert("proj1").expect("coordinator accepts signals");
        sender.insert("proj1").expect("coordinator accepts signals");
        drop(sender);
        run.await.expect("coordinator task completes")
    });

    assert_eq!(rebuild.calls(), ["proj1", "proj1"]);
    assert_eq!(report.completed, ["proj1", "proj1"]);
}

#[rstest]
fn signal_starts_a_rebuild_without_waiting_for_a_tick(resolver: Arc<MemoryResolver>) {
    let config = CoordinatorConfig::new(DATABASE).with_poll_interval(Duration::from_secs(60));
    let rebuild = Arc::new(RecordingRebuild::default());
    let (coordinator, sender) = coordinator(config, &resolver, &rebuild);

    block_on_for_tests(async {
        let shutdown = CancellationToken::new();
        let run = tokio::spawn(coordinator.run(shutdown.clone()));
        // Let the first, immediate tick pass.
        tokio::time::sleep(Duration::from_millis(20)).await;
        sender.insert("proj2").expect("coordinator accepts signals");
        tokio::time::timeout(
            Duration::from_secs(1),
            wait_until(|| rebuild.calls_for("proj2") == 1),
        )
        .await
        .expect("rebuild should start promptly");
        shutdown.cancel();
        run.await.expect("coordinator task completes");
    });
}

#[rstest]
fn shutdown_waits_for_the_rebuild_in_flight(
    config: CoordinatorConfig,
    resolver: Arc<MemoryResolver>,
) {
    let rebuild = Arc::new(RecordingRebuild::default().with_delay(Duration::from_millis(100)));
    let (coordinator, sender) = coordinator(config, &resolver, &rebuild);

    let report = block_on_for_tests(async {
        let shutdown = CancellationToken::new();
        let run = tokio::spawn(coordinator.run(shutdown.clone()));
        sender.insert("proj1").expect("coordinator accepts signals");
        wait_until(|| rebuild.calls_for("proj1") == 1).await;
        sender.insert("proj2").expect("coordinator accepts signals");
        shutdown.cancel();
        run.await.expect("coordinator task completes")
    });

    assert_eq!(report.completed, ["proj1"]);
    assert_eq!(rebuild.calls_for("proj2"), 0, "no rebuild starts after shutdown");
}

#[rstest]
fn fresh_coordinator_is_idle(config: CoordinatorConfig, resolver: Arc<MemoryResolver>) {
    let rebuild = Arc::new(RecordingRebuild::default());
    let (coordinator, _sender) = coordinator(config, &resolver, &rebuild);

    assert!(!coordinator.is_rebuilding());
    assert!(coordinator.pending().is_empty());
}

mod behaviour;
