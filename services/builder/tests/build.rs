//! Whole builds against the simulated cloud.
//!
//! Every test runs on a paused clock so the engine's delays and poll
//! intervals cost nothing.

use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;
use kiln_builder::steps::{AssumeReachable, CreateNetwork, LaunchInstance};
use kiln_builder::{
    BuildConfig, BuildState, Builder, ConfigError, MemoryUi, Pipeline, Step, StepError,
};
use kiln_cloud::{
    Cloud, Faults, ImageApi, ServerFault, SimulatedCloud, SimulatedDecryptor, SimulationSettings,
};
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

fn template(extra: &str) -> BuildConfig {
    let mut config = BuildConfig::from_toml_str(&format!("{TEMPLATE}\n{extra}")).unwrap();
    config.prepare().unwrap();
    config
}

fn builder(config: BuildConfig, sim: &Arc<SimulatedCloud>, ui: &Arc<MemoryUi>) -> Builder {
    Builder::new(
        config,
        Cloud::from_single(sim.clone()),
        Arc::new(SimulatedDecryptor),
        ui.clone(),
    )
    .probe(Arc::new(AssumeReachable))
}

fn position(calls: &[String], call: &str) -> usize {
    calls
        .iter()
        .position(|c| c == call)
        .unwrap_or_else(|| panic!("{call} not in {calls:?}"))
}

/// Must never run: the build halts before reaching it.
struct Unreachable;

#[async_trait]
impl Step for Unreachable {
    fn name(&self) -> &'static str {
        "unreachable"
    }

    async fn run(&mut self, _state: &mut BuildState) -> Result<(), StepError> {
        panic!("step after a failed launch was run");
    }

    async fn cleanup(&mut self, _state: &mut BuildState) {
        panic!("step after a failed launch was cleaned up");
    }
}

#[tokio::test(start_paused = true)]
async fn failed_launch_deletes_server_before_network() {
    init_test_tracing();
    let settings = SimulationSettings {
        settle_polls: 2,
        ..Default::default()
    };
    let sim = Arc::new(SimulatedCloud::new(settings).with_faults(Faults {
        server_error: Some(ServerFault {
            after_polls: 3,
            message: "No valid host was found".into(),
        }),
        ..Default::default()
    }));
    let source_image = sim.show_image("img-base").await.unwrap();

    let (_tx, rx) = watch::channel(false);
    let ui = Arc::new(MemoryUi::new());
    let mut state = BuildState::new(
        Arc::new(template("")),
        Cloud::from_single(sim.clone()),
        Arc::new(SimulatedDecryptor),
        ui.clone(),
        rx,
    );
    state.availability_zone = Some("sim-1a".into());
    state.flavor_id = Some("s6.large.2".into());
    state.source_image = Some(source_image);

    let mut pipeline = Pipeline::new(vec![
        Box::new(CreateNetwork::new()),
        Box::new(LaunchInstance::new()),
        Box::new(Unreachable),
    ]);
    let err = pipeline.run(&mut state).await.unwrap_err();

    assert_eq!(err.step(), Some("launch-instance"));
    assert!(err.to_string().contains("No valid host was found"), "{err}");

    let calls = sim.calls().await;
    let created = position(&calls, "create_server srv-1");
    assert!(position(&calls, "delete_server srv-1") < position(&calls, "delete_vpc net-1"));
    assert!(position(&calls, "delete_subnet subnet-1") < position(&calls, "delete_vpc net-1"));
    assert!(calls[created + 1..].iter().all(|c| !c.starts_with("create_")));
    assert!(sim.leaked().await.is_empty(), "{:?}", sim.leaked().await);
    assert!(ui.errors().is_empty(), "{:?}", ui.errors());
}

#[tokio::test(start_paused = true)]
async fn system_image_build_cleans_up_everything() {
    init_test_tracing();
    let sim = Arc::new(SimulatedCloud::default());
    let ui = Arc::new(MemoryUi::new());
    let mut config = template(
        r#"
        [image.tags]
        team = "platform"
        "#,
    );
    config.image.min_disk = 60;
    config.image.members = vec!["proj-b".into()];

    let (_tx, rx) = watch::channel(false);
    let artifact = builder(config, &sim, &ui).run(rx).await.unwrap();

    assert_eq!(artifact.image_ids.len(), 1);
    assert_eq!(artifact.region, "cn-north-4");
    let image_id = &artifact.image_ids[0];
    let image = sim.image(image_id).await.unwrap();
    assert_eq!(image.name, "golden-2026");
    assert_eq!(image.min_disk_gb, 60);
    assert_eq!(sim.image_members(image_id).await, vec!["proj-b".to_string()]);

    let calls = sim.calls().await;
    assert!(position(&calls, "stop_server srv-1") < position(&calls, "create_image srv-1"));
    assert!(position(&calls, "create_image srv-1") < position(&calls, "delete_server srv-1"));
    assert!(sim.leaked().await.is_empty(), "{:?}", sim.leaked().await);
    assert!(ui.errors().is_empty(), "{:?}", ui.errors());
}

#[tokio::test(start_paused = true)]
async fn data_disk_build_captures_each_disk() {
    let sim = Arc::new(SimulatedCloud::default());
    let ui = Arc::new(MemoryUi::new());
    let config = template(
        r#"
        [[run.data_disks]]
        volume_size = 100
        "#,
    );

    let (_tx, rx) = watch::channel(false);
    let artifact = builder(config, &sim, &ui).run(rx).await.unwrap();

    assert_eq!(artifact.image_ids.len(), 1);
    let image = sim.image(&artifact.image_ids[0]).await.unwrap();
    assert_eq!(image.name, "golden-2026-vdb");

    let calls = sim.calls().await;
    assert!(calls.contains(&"create_volume vol-1".to_string()));
    assert!(position(&calls, "delete_volume vol-1") < position(&calls, "delete_server srv-1"));
    assert!(sim.leaked().await.is_empty(), "{:?}", sim.leaked().await);
}

#[tokio::test(start_paused = true)]
async fn share_failure_does_not_fail_the_build() {
    let sim = Arc::new(SimulatedCloud::default().with_faults(Faults {
        fail_add_members: true,
        ..Default::default()
    }));
    let ui = Arc::new(MemoryUi::new());
    let mut config = template("");
    config.image.members = vec!["proj-b".into()];

    let (_tx, rx) = watch::channel(false);
    let artifact = builder(config, &sim, &ui).run(rx).await.unwrap();

    assert_eq!(artifact.image_ids.len(), 1);
    assert!(ui.contains("WARN: Error adding members to image"));
    assert!(sim.leaked().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn failed_image_job_rolls_back_and_reports_reason() {
    let sim = Arc::new(SimulatedCloud::default().with_faults(Faults {
        job_failure: Some("image quota exceeded".into()),
        ..Default::default()
    }));
    let ui = Arc::new(MemoryUi::new());

    let (_tx, rx) = watch::channel(false);
    let err = builder(template(""), &sim, &ui).run(rx).await.unwrap_err();

    assert_eq!(err.step(), Some("create-image"));
    assert!(err.to_string().contains("image quota exceeded"), "{err}");
    assert!(sim.leaked().await.is_empty(), "{:?}", sim.leaked().await);
}

#[tokio::test(start_paused = true)]
async fn winrm_build_retrieves_password() {
    let sim = Arc::new(SimulatedCloud::new(SimulationSettings {
        password_polls: 3,
        ..Default::default()
    }));
    let ui = Arc::new(MemoryUi::new());
    let config = template(
        r#"
        [run.communicator]
        type = "winrm"
        "#,
    );

    let (_tx, rx) = watch::channel(false);
    builder(config, &sim, &ui).run(rx).await.unwrap();

    assert!(ui.contains("Password retrieved!"));
    assert!(sim.leaked().await.is_empty(), "{:?}", sim.leaked().await);
}

#[tokio::test(start_paused = true)]
async fn cancelled_build_cleans_up() {
    let sim = Arc::new(SimulatedCloud::default());
    let ui = Arc::new(MemoryUi::new());

    let (tx, rx) = watch::channel(false);
    tx.send(true).unwrap();
    let err = builder(template(""), &sim, &ui).run(rx).await.unwrap_err();

    assert!(matches!(err, kiln_builder::BuildError::Cancelled));
    assert!(sim.calls().await.is_empty());
}

#[test]
fn template_file_round_trip() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(TEMPLATE.as_bytes()).unwrap();

    let mut config = BuildConfig::load(file.path()).unwrap();
    config.prepare().unwrap();
    assert_eq!(config.name, "golden");
    assert_eq!(config.run.instance_name, "golden-2026");
}

#[test]
fn missing_template_file_is_a_read_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = BuildConfig::load(&dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Read { .. }));
}
