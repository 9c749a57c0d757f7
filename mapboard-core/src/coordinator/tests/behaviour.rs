//! Behavioural coverage for rebuild coordination.

use std::{cell::RefCell, mem, sync::Arc, time::Duration};

use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use tokio_util::sync::CancellationToken;

use crate::test_support::{
    MemoryResolver, RecordingRebuild, StaticClientFactory, block_on_for_tests, project_params,
};
use crate::{ClientRegistry, Coordinator, CoordinatorConfig, CoordinatorReport};

const DATABASE: &str = "mapboard";

#[derive(Debug, Default)]
struct CoordinatorWorld {
    resolver: RefCell<MemoryResolver>,
    rebuild: RefCell<RecordingRebuild>,
    signals: RefCell<Vec<String>>,
    recorded: RefCell<Option<Arc<RecordingRebuild>>>,
    report: RefCell<Option<CoordinatorReport>>,
}

impl CoordinatorWorld {
    fn report(&self) -> CoordinatorReport {
        self.report
            .borrow()
            .clone()
            .unwrap_or_else(|| panic!("the coordinator must have run"))
    }

    fn recorded(&self) -> Arc<RecordingRebuild> {
        self.recorded
            .borrow()
            .clone()
            .unwrap_or_else(|| panic!("the coordinator must have run"))
    }
}

#[fixture]
fn world() -> CoordinatorWorld {
    CoordinatorWorld::default()
}

#[given("project {schema} is registered")]
fn project_registered(#[from(world)] world: &CoordinatorWorld, schema: String) {
    let resolver = mem::take(&mut *world.resolver.borrow_mut());
    *world.resolver.borrow_mut() =
        resolver.with_project(&schema, project_params(DATABASE, &schema));
}

#[given("each rebuild takes {millis} milliseconds")]
fn rebuild_delay(#[from(world)] world: &CoordinatorWorld, millis: u64) {
    let rebuild = mem::take(&mut *world.rebuild.borrow_mut());
    *world.rebuild.borrow_mut() = rebuild.with_delay(Duration::from_millis(millis));
}

#[given("rebuilds of {schema} fail")]
fn rebuild_fails(#[from(world)] world: &CoordinatorWorld, schema: String) {
    let rebuild = mem::take(&mut *world.rebuild.borrow_mut());
    *world.rebuild.borrow_mut() = rebuild.failing_for(&schema);
}

#[given("a change signal for {schema}")]
fn change_signal(#[from(world)] world: &CoordinatorWorld, schema: String) {
    world.signals.borrow_mut().push(schema);
}

#[when("the coordinator drains its signals")]
fn drain_signals(#[from(world)] world: &CoordinatorWorld) {
    let resolver = Arc::new(mem::take(&mut *world.resolver.borrow_mut()));
    let rebuild = Arc::new(mem::take(&mut *world.rebuild.borrow_mut()));
    let clients = ClientRegistry::new(resolver, Arc::new(StaticClientFactory));
    let config = CoordinatorConfig::new(DATABASE).with_poll_interval(Duration::from_millis(10));
    let (coordinator, sender) = Coordinator::new(config, clients, Arc::clone(&rebuild) as _);

    for schema in world.signals.borrow().iter() {
        if let Err(err) = sender.insert(schema.as_str()) {
            panic!("coordinator rejected a signal: {err}");
        }
    }
    drop(sender);

    let report = block_on_for_tests(coordinator.run(CancellationToken::new()));
    *world.report.borrow_mut() = Some(report);
    *world.recorded.borrow_mut() = Some(rebuild);
}

#[then("the rebuild count for {schema} is {count}")]
fn rebuild_count(#[from(world)] world: &CoordinatorWorld, schema: String, count: usize) {
    assert_eq!(world.recorded().calls_for(&schema), count);
}

#[then("no two rebuilds overlap")]
fn no_overlap(#[from(world)] world: &CoordinatorWorld) {
    assert_eq!(world.recorded().max_concurrent(), 1);
}

#[then("{schema} is reported as completed")]
fn reported_completed(#[from(world)] world: &CoordinatorWorld, schema: String) {
    assert!(world.report().completed.contains(&schema));
}

#[then("{schema} is reported as failed")]
fn reported_failed(#[from(world)] world: &CoordinatorWorld, schema: String) {
    assert!(world.report().failed.contains(&schema));
}

#[then("{schema} is reported as skipped")]
fn reported_skipped(#[from(world)] world: &CoordinatorWorld, schema: String) {
    let report = world.report();
    assert!(report.skipped.contains(&schema));
    assert!(!report.completed.contains(&schema));
}

#[scenario(path = "tests/features/coordinator.feature", index = 0)]
fn coalescing_a_burst(#[from(world)] world: CoordinatorWorld) {
    let _ = world;
}

#[scenario(path = "tests/features/coordinator.feature", index = 1)]
fn rebuilding_one_at_a_time(#[from(world)] world: CoordinatorWorld) {
    let _ = world;
}

#[scenario(path = "tests/features/coordinator.feature", index = 2)]
fn skipping_an_unregistered_schema(#[from(world)] world: CoordinatorWorld) {
    let _ = world;
}

#[scenario(path = "tests/features/coordinator.feature", index = 3)]
fn continuing_after_a_failure(#[from(world)] world: CoordinatorWorld) {
    let _ = world;
}
