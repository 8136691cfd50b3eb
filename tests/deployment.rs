//! End-to-end converge runs against an in-memory provider

use declarative::{
    Action, Address, AutoConfirm, Error, ExecuteOptions, ExecuteSummary, Executor, MemoryProvider,
    NoProgress, Plan, RecordedState, ResourceGraph, RetryConfig, StateStore, plan, plan_destroy,
};
use hostboot::{
    BootOutcome, BootState, BootstrapInjector, CommandOutput, LogObserver, ScriptedHost,
    ServiceBootstrapMachine,
};
use serde_json::json;
use std::net::Ipv4Addr;
use std::time::Duration;
use tempfile::TempDir;
use tierform::config::DeploymentConfig;
use tierform::outputs::DeploymentOutputs;
use tierform::provider::DeploymentProvider;
use tierform::provisioners::{Deployment, compute, database, security};

const CONFIG: &str = r#"
region = "eu-west-1"

[compute]
image_id = "ami-0abc1234"
key_name = "ops"

[database]
password = "db-pass"

[app]
secret_key = "k3y"
repo_url = "https://git.example.com/notes-api.git"
"#;

const CALLER: Ipv4Addr = Ipv4Addr::new(203, 0, 113, 7);

fn config(extra_app: &str) -> DeploymentConfig {
    DeploymentConfig::from_toml(&format!("{CONFIG}{extra_app}")).unwrap()
}

fn memory() -> MemoryProvider {
    MemoryProvider::new()
        .with_computed("database", "address", json!("notes-db.internal"))
        .with_computed("instance", "public_ip", json!("198.51.100.20"))
}

fn provider(inner: MemoryProvider) -> DeploymentProvider<MemoryProvider> {
    DeploymentProvider::new(inner, BootstrapInjector::new())
}

fn graph(config: &DeploymentConfig) -> ResourceGraph {
    Deployment::new(config, CALLER).graph().unwrap()
}

fn converge(
    graph: &ResourceGraph,
    provider: &DeploymentProvider<MemoryProvider>,
    store: &StateStore,
    plan: &Plan,
) -> declarative::Result<ExecuteSummary> {
    let mut lock = store.lock()?;
    Executor::new(graph, provider)
        .with_options(ExecuteOptions {
            jobs: 4,
            readiness: RetryConfig::new(3, Duration::ZERO, 1.0),
        })
        .execute(plan, &mut lock, &mut NoProgress, &mut AutoConfirm)
}

fn apply(
    config: &DeploymentConfig,
    provider: &DeploymentProvider<MemoryProvider>,
    store: &StateStore,
) -> RecordedState {
    let graph = graph(config);
    let plan = plan(&graph, &store.load().unwrap(), provider).unwrap();
    converge(&graph, provider, store, &plan).unwrap();
    store.load().unwrap()
}

#[test]
fn test_fresh_apply_reports_service_url() {
    let dir = TempDir::new().unwrap();
    let store = StateStore::new(dir.path());
    let provider = provider(memory());

    let state = apply(&config(""), &provider, &store);
    assert_eq!(state.len(), 12);

    let outputs = DeploymentOutputs::from_state(&state);
    assert_eq!(
        outputs.service_url.as_deref(),
        Some("http://198.51.100.20:8000/api")
    );
    assert_eq!(
        outputs.db_connect.as_deref(),
        Some("psql -h notes-db.internal -p 5432 -U notes_admin -d notes")
    );

    let ingress = state.get(&security::app_group()).unwrap().inputs["ingress"]
        .as_array()
        .unwrap()
        .clone();
    let admin = ingress
        .iter()
        .find(|rule| rule["from_port"] == json!(security::ADMIN_PORT))
        .unwrap();
    assert_eq!(admin["cidr_blocks"], json!(["203.0.113.7/32"]));
    assert!(
        ingress
            .iter()
            .all(|rule| rule["cidr_blocks"] != json!(["0.0.0.0/0"])
                || rule["from_port"] == json!(8000))
    );

    let payload = state.get(&compute::payload()).unwrap();
    assert_eq!(payload.inputs["db_host"], json!("notes-db.internal"));
    let rendered = payload.outputs["rendered"].as_str().unwrap();
    assert_eq!(
        state.get(&compute::instance()).unwrap().inputs["user_data"],
        json!(rendered)
    );

    let journal = provider.inner().journal();
    let position = |entry: &str| journal.iter().position(|e| e == entry).unwrap();
    assert!(position("create database.main") < position("create instance.web"));
}

#[test]
fn test_reapply_without_changes_is_noop() {
    let dir = TempDir::new().unwrap();
    let store = StateStore::new(dir.path());
    let provider = provider(memory());
    let config = config("");

    let state = apply(&config, &provider, &store);
    let again = plan(&graph(&config), &state, &provider).unwrap();
    assert!(again.is_empty());
    assert_eq!(again.unchanged.len(), 12);
}

#[test]
fn test_service_port_change_updates_in_place() {
    let dir = TempDir::new().unwrap();
    let store = StateStore::new(dir.path());
    let provider = provider(memory());
    let state = apply(&config(""), &provider, &store);

    let changed = config("service_port = 9000\n");
    let next = plan(&graph(&changed), &state, &provider).unwrap();

    let mut updated: Vec<String> = next
        .actions
        .iter()
        .map(|a| {
            assert!(matches!(a.action, Action::Update { .. }), "{} is {}", a.address, a.action);
            a.address.to_string()
        })
        .collect();
    updated.sort();
    assert_eq!(
        updated,
        ["bootstrap_payload.web", "instance.web", "security_group.app"]
    );
    assert!(next.get(&database::database()).is_none());
    assert!(next.get(&Address::new("network", "main")).is_none());

    let summary = converge(&graph(&changed), &provider, &store, &next).unwrap();
    assert_eq!(summary.modified, 3);
    assert_eq!(summary.replaced, 0);

    let state = store.load().unwrap();
    assert_eq!(
        DeploymentOutputs::from_state(&state).service_url.as_deref(),
        Some("http://198.51.100.20:9000/api")
    );
    let user_data = state.get(&compute::instance()).unwrap().inputs["user_data"]
        .as_str()
        .unwrap()
        .to_string();
    assert!(user_data.contains("service_port = 9000"));
}

#[test]
fn test_rejected_image_keeps_completed_resources() {
    let dir = TempDir::new().unwrap();
    let store = StateStore::new(dir.path());
    let provider = provider(memory().with_rejection("instance", "image_id", json!("ami-bogus")));

    let mut config = config("");
    config.compute.image_id = "ami-bogus".to_string();
    let graph = graph(&config);
    let initial = plan(&graph, &store.load().unwrap(), &provider).unwrap();
    let err = converge(&graph, &provider, &store, &initial).unwrap_err();

    assert!(matches!(err, Error::Provisioning { .. }));
    assert_eq!(err.address(), Some(&compute::instance()));

    let state = store.load().unwrap();
    assert!(state.get(&database::database()).is_some());
    assert!(state.get(&compute::instance()).is_none());
    assert!(DeploymentOutputs::from_state(&state).service_url.is_none());
}

#[test]
fn test_destroy_tears_down_instance_before_network() {
    let dir = TempDir::new().unwrap();
    let store = StateStore::new(dir.path());
    let provider = provider(memory());
    let state = apply(&config(""), &provider, &store);

    let teardown = plan_destroy(&state).unwrap();
    assert_eq!(teardown.summary().destroy, 12);
    let empty = ResourceGraph::build(Vec::new()).unwrap();
    let summary = converge(&empty, &provider, &store, &teardown).unwrap();

    assert_eq!(summary.removed, 12);
    assert!(store.load().unwrap().is_empty());
    assert_eq!(provider.inner().live_count(), 0);

    let journal = provider.inner().journal();
    let position = |entry: &str| journal.iter().position(|e| e == entry).unwrap();
    assert!(position("delete instance.web") < position("delete security_group.app"));
    assert!(position("delete database.main") < position("delete network.main"));
}

#[test]
fn test_instance_reboot_does_not_rerun_bootstrap() {
    let dir = TempDir::new().unwrap();
    let store = StateStore::new(dir.path());
    let provider = provider(memory());
    let config = config("");
    apply(&config, &provider, &store);

    let params = config.bootstrap_parameters("notes-db.internal", 5432);
    let host = ScriptedHost::new().respond(
        "create_sample_data",
        CommandOutput::failure(1, "IntegrityError: duplicate key value"),
    );

    let BootOutcome::Completed(journal) = ServiceBootstrapMachine::new(&host, &params)
        .run(&mut LogObserver)
        .unwrap()
    else {
        panic!("expected completion");
    };
    assert!(journal.reached(BootState::ServiceRunning));
    assert_eq!(journal.tolerated().count(), 1);
    let commands = host.commands().len();

    let rerun = ServiceBootstrapMachine::new(&host, &params)
        .run(&mut LogObserver)
        .unwrap();
    assert_eq!(rerun, BootOutcome::AlreadyComplete);
    assert_eq!(host.commands().len(), commands);
}
