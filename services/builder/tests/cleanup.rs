//! Step cleanups against the simulated cloud: what a step removes when it
//! never ran, and when its own wait was cut short after the create call.

use std::sync::Arc;
use std::time::Duration;

use kiln_builder::state::VolumePlan;
use kiln_builder::steps::{
    AllocateAddress, AttachVolumes, CreateBootVolume, CreateNetwork, LaunchInstance, SetupKeypair,
};
use kiln_builder::template::DataDiskSource;
use kiln_builder::{BuildConfig, BuildError, BuildState, MemoryUi, Pipeline, Step};
use kiln_cloud::{Cloud, Faults, ImageApi, SimulatedCloud, SimulatedDecryptor};
use kiln_testing::init_test_tracing;
use tokio::sync::watch;

const TEMPLATE: &str = r#"
name = "golden"

[access]
region = "cn-north-4"

[run]
flavor = "s6.large.2"
source_image = "img-base"

[image]
name = "golden-2026"
"#;

fn config() -> BuildConfig {
    let mut config = BuildConfig::from_toml_str(TEMPLATE).unwrap();
    config.prepare().unwrap();
    config
}

async fn build_state(
    sim: &Arc<SimulatedCloud>,
    config: BuildConfig,
    ui: &Arc<MemoryUi>,
    cancel: watch::Receiver<bool>,
) -> BuildState {
    let source_image = sim.show_image("img-base").await.unwrap();
    let mut state = BuildState::new(
        Arc::new(config),
        Cloud::from_single(sim.clone()),
        Arc::new(SimulatedDecryptor),
        ui.clone(),
        cancel,
    );
    state.availability_zone = Some("sim-1a".into());
    state.flavor_id = Some("s6.large.2".into());
    state.source_image = Some(source_image);
    state
}

fn position(calls: &[String], call: &str) -> usize {
    calls
        .iter()
        .position(|c| c == call)
        .unwrap_or_else(|| panic!("{call} not in {calls:?}"))
}

/// Sets the cancel flag once `call` shows up in the simulated cloud's log.
async fn cancel_after(sim: &SimulatedCloud, call: &str, tx: watch::Sender<bool>) {
    for _ in 0..3600 {
        if sim.calls().await.iter().any(|c| c == call) {
            tx.send(true).unwrap();
            return;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    panic!("{call} was never made");
}

#[tokio::test(start_paused = true)]
async fn cleanup_before_run_makes_no_calls() {
    let sim = Arc::new(SimulatedCloud::default());
    let ui = Arc::new(MemoryUi::new());
    let (_tx, rx) = watch::channel(false);
    let mut state = build_state(&sim, config(), &ui, rx).await;

    let mut steps: Vec<Box<dyn Step>> = vec![
        Box::new(SetupKeypair::new()),
        Box::new(CreateNetwork::new()),
        Box::new(AllocateAddress::new()),
        Box::new(CreateBootVolume::new()),
        Box::new(LaunchInstance::new()),
        Box::new(AttachVolumes::new()),
    ];
    for step in steps.iter_mut().rev() {
        step.cleanup(&mut state).await;
        step.cleanup(&mut state).await;
        assert!(step.owned().is_empty(), "{} owns something", step.name());
    }

    assert!(sim.calls().await.is_empty(), "{:?}", sim.calls().await);
    assert!(ui.errors().is_empty(), "{:?}", ui.errors());
}

#[tokio::test(start_paused = true)]
async fn cancelled_boot_volume_job_still_deletes_the_volume() {
    init_test_tracing();
    let sim = Arc::new(SimulatedCloud::default());
    let ui = Arc::new(MemoryUi::new());
    let mut config = config();
    config.run.use_blockstorage_volume = true;
    let (tx, rx) = watch::channel(false);
    let mut state = build_state(&sim, config, &ui, rx).await;

    let mut pipeline = Pipeline::new(vec![Box::new(CreateBootVolume::new())]);
    let cancel = async {
        tokio::time::sleep(Duration::from_secs(1)).await;
        tx.send(true).unwrap();
    };
    let (result, ()) = tokio::join!(pipeline.run(&mut state), cancel);

    assert!(matches!(result, Err(BuildError::Cancelled)), "{result:?}");
    let calls = sim.calls().await;
    assert!(position(&calls, "create_volume vol-1") < position(&calls, "delete_volume vol-1"));
    assert!(sim.leaked().await.is_empty(), "{:?}", sim.leaked().await);
    assert!(ui.errors().is_empty(), "{:?}", ui.errors());
}

#[tokio::test(start_paused = true)]
async fn failed_boot_volume_job_leaves_nothing_to_delete() {
    let sim = Arc::new(SimulatedCloud::default().with_faults(Faults {
        job_failure: Some("volume quota exceeded".into()),
        ..Default::default()
    }));
    let ui = Arc::new(MemoryUi::new());
    let mut config = config();
    config.run.use_blockstorage_volume = true;
    let (_tx, rx) = watch::channel(false);
    let mut state = build_state(&sim, config, &ui, rx).await;

    let mut pipeline = Pipeline::new(vec![Box::new(CreateBootVolume::new())]);
    let err = pipeline.run(&mut state).await.unwrap_err();

    assert_eq!(err.step(), Some("create-boot-volume"));
    assert!(err.to_string().contains("volume quota exceeded"), "{err}");
    assert_eq!(sim.calls().await, vec!["create_volume vol-1"]);
    assert!(sim.leaked().await.is_empty(), "{:?}", sim.leaked().await);
    assert!(ui.errors().is_empty(), "{:?}", ui.errors());
}

#[tokio::test(start_paused = true)]
async fn cancelled_data_volume_job_detaches_and_deletes_the_volume() {
    init_test_tracing();
    let sim = Arc::new(SimulatedCloud::default());
    let ui = Arc::new(MemoryUi::new());
    let (tx, rx) = watch::channel(false);
    let mut state = build_state(&sim, config(), &ui, rx).await;
    state.data_volume_plans = vec![VolumePlan {
        source: DataDiskSource::Size(100),
        size_gb: 100,
        volume_type: "SSD".into(),
    }];

    let mut pipeline = Pipeline::new(vec![
        Box::new(CreateNetwork::new()),
        Box::new(LaunchInstance::new()),
        Box::new(AttachVolumes::new()),
    ]);
    let (result, ()) = tokio::join!(
        pipeline.run(&mut state),
        cancel_after(&sim, "create_volume vol-1", tx)
    );

    assert!(matches!(result, Err(BuildError::Cancelled)), "{result:?}");
    let calls = sim.calls().await;
    let detached = position(&calls, "detach_volume vol-1 srv-1");
    let deleted = position(&calls, "delete_volume vol-1");
    assert!(detached < deleted);
    assert!(deleted < position(&calls, "delete_server srv-1"));
    assert!(sim.leaked().await.is_empty(), "{:?}", sim.leaked().await);
    assert!(ui.errors().is_empty(), "{:?}", ui.errors());
}
