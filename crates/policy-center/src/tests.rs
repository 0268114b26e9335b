use crate::api::{PolicyDecisionEngine, UpdateOutcome};
use crate::config::{ConfigSource, EngineConfig};
use crate::decision::DecisionContext;
use crate::errors::PolicyError;
use crate::loader::{load_config, load_config_with_options, LoadOptions};
use crate::memory::{CanonicalState, InMemoryCanonicalSource, InMemoryDirectory};
use crate::reconcile::{ReconcileOutcome, ReconcileState};
use crate::store::StorePath;
use policyd_core_types::{Accessor, IpFamily, UserId};
use serde_json::json;
use std::env;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

fn env_guard() -> &'static Mutex<()> {
    static GUARD: OnceLock<Mutex<()>> = OnceLock::new();
    GUARD.get_or_init(|| Mutex::new(()))
}

#[test]
fn default_config_matches_documented_values() {
    let config = EngineConfig::default();
    assert_eq!(config.reconcile.interval, Duration::from_secs(300));
    assert_eq!(config.reconcile.heal_backoff, Duration::from_secs(10));
    assert_eq!(config.canonical.timeout, Duration::from_secs(30));
    assert_eq!(config.notifier.publish_attempts, 3);
    assert_eq!(config.notifier.publish_backoff, Duration::from_millis(200));
    assert!(config.notifier.publish_on_mutation);
    assert_eq!(
        config.provenance.get("reconcile.interval"),
        Some(&ConfigSource::Builtin)
    );
}

#[test]
fn load_config_reads_yaml_file() {
    let _guard = env_guard().lock().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let file_path = dir.path().join("policyd.yaml");
    std::fs::write(
        &file_path,
        r#"reconcile:
  interval: 90s
  heal_backoff: 2500
notifier:
  publish_on_mutation: false
"#,
    )
    .unwrap();

    let config = load_config(Some(&file_path)).unwrap();
    assert_eq!(config.reconcile.interval, Duration::from_secs(90));
    assert_eq!(config.reconcile.heal_backoff, Duration::from_millis(2500));
    assert!(!config.notifier.publish_on_mutation);
    assert_eq!(
        config.provenance.get("reconcile.interval"),
        Some(&ConfigSource::File)
    );
    assert_eq!(
        config.provenance.get("canonical.timeout"),
        Some(&ConfigSource::Builtin)
    );
}

#[test]
fn missing_file_falls_back_to_defaults() {
    let _guard = env_guard().lock().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let config = load_config(Some(&dir.path().join("absent.yaml"))).unwrap();
    assert_eq!(config, EngineConfig::default());
}

#[test]
fn unknown_keys_are_rejected() {
    let _guard = env_guard().lock().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let file_path = dir.path().join("policyd.yaml");
    std::fs::write(&file_path, "reconcile:\n  cadence: 5m\n").unwrap();
    let err = load_config(Some(&file_path)).unwrap_err();
    assert!(matches!(err, PolicyError::Invalid(_)));
}

#[test]
fn zero_interval_is_invalid() {
    let _guard = env_guard().lock().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let file_path = dir.path().join("policyd.yaml");
    std::fs::write(&file_path, "reconcile:\n  interval: 0\n").unwrap();
    assert!(load_config(Some(&file_path)).is_err());
}

#[test]
fn env_overrides_file_and_records_provenance() {
    let _guard = env_guard().lock().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let file_path = dir.path().join("policyd.yaml");
    std::fs::write(&file_path, "canonical:\n  timeout: 5s\n").unwrap();

    let key = "POLICYD__CANONICAL__TIMEOUT";
    env::set_var(key, "12s");
    let config = load_config_with_options(&LoadOptions::with_path(file_path.clone()));
    env::remove_var(key);
    let config = config.expect("load config");
    assert_eq!(config.canonical.timeout, Duration::from_secs(12));
    assert_eq!(
        config.provenance.get("canonical.timeout"),
        Some(&ConfigSource::Env)
    );
}

#[test]
fn cli_overrides_replace_and_record_provenance() {
    let _guard = env_guard().lock().unwrap();
    env::set_var(
        "POLICYD_CONFIG_OVERRIDES",
        "notifier.publish_attempts=5,reconcile.interval=1m",
    );
    let config = load_config(None);
    env::remove_var("POLICYD_CONFIG_OVERRIDES");
    let config = config.expect("load config with cli");
    assert_eq!(config.notifier.publish_attempts, 5);
    assert_eq!(config.reconcile.interval, Duration::from_secs(60));
    assert_eq!(
        config.provenance.get("notifier.publish_attempts"),
        Some(&ConfigSource::Cli)
    );
}

#[test]
fn describe_lists_every_setting() {
    let described = EngineConfig::default().describe();
    assert_eq!(described.len(), 6);
    assert_eq!(described[0].0, "reconcile.interval");
    assert_eq!(described[0].1, "5m");
}

fn office_source(enabled: bool) -> Arc<InMemoryCanonicalSource> {
    let source = Arc::new(InMemoryCanonicalSource::new(CanonicalState {
        network_restriction_enabled: enabled,
        ..CanonicalState::default()
    }));
    source.add_network("office", IpFamily::Ipv4, &["10.1.0.0/16"]);
    source.relate(Accessor::department("eng"), "office", IpFamily::Ipv4);
    source
}

fn directory() -> Arc<InMemoryDirectory> {
    let directory = Arc::new(InMemoryDirectory::new());
    directory.set_user_paths("alice", &[&["eng", "root"]]);
    directory.set_user_paths("bob", &[&["sales", "root"]]);
    directory
}

#[tokio::test]
async fn decisions_require_initialization() {
    let engine =
        PolicyDecisionEngine::new(office_source(true), directory(), EngineConfig::default());
    let ctx = DecisionContext::new("10.1.2.3".parse().unwrap());
    let err = engine
        .network_decision(&ctx, &Accessor::user("alice"))
        .await
        .unwrap_err();
    assert!(matches!(err, PolicyError::NotInitialized));
    assert_eq!(engine.revision(), 0);
}

#[tokio::test]
async fn rebuild_expands_department_members() {
    let engine =
        PolicyDecisionEngine::new(office_source(true), directory(), EngineConfig::default())
            .start()
            .await
            .unwrap();
    let path: StorePath = "/network_info/ipv4/users".parse().unwrap();
    let users = engine.read_policy_data(&path).await.unwrap();
    assert_eq!(users, json!({"alice": {"departments": ["eng"]}}));
    assert_eq!(engine.revision(), 1);

    let ctx = DecisionContext::new("10.1.2.3".parse().unwrap());
    assert!(engine
        .network_decision(&ctx, &Accessor::user("alice"))
        .await
        .unwrap());
}

#[tokio::test]
async fn expired_deadline_fails_fast() {
    let engine =
        PolicyDecisionEngine::new(office_source(false), directory(), EngineConfig::default())
            .start()
            .await
            .unwrap();
    let ctx = DecisionContext::new("10.1.2.3".parse().unwrap()).with_timeout(Duration::ZERO);
    let err = engine.client_sign_decision(&ctx, "ios").await.unwrap_err();
    assert!(matches!(err, PolicyError::DeadlineExceeded(_)));
}

#[tokio::test]
async fn update_moves_user_between_departments() {
    let directory = directory();
    let engine = PolicyDecisionEngine::new(
        office_source(true),
        directory.clone(),
        EngineConfig::default(),
    )
    .start()
    .await
    .unwrap();

    directory.set_user_paths("bob", &[&["eng", "root"]]);
    let paths = directory.paths_of(&UserId::new("bob"));
    let outcome = engine
        .incremental_update_policy(&UserId::new("bob"), &paths)
        .await
        .unwrap();
    assert!(matches!(outcome, UpdateOutcome::Applied { patches: 1, .. }));

    let again = engine
        .incremental_update_policy(&UserId::new("bob"), &paths)
        .await
        .unwrap();
    assert_eq!(again, UpdateOutcome::Unchanged);

    let path: StorePath = "/network_info/ipv4/users/bob".parse().unwrap();
    assert_eq!(
        engine.read_policy_data(&path).await.unwrap(),
        json!({"departments": ["eng"]})
    );
}

#[tokio::test]
async fn reconcile_reports_in_sync_and_heals() {
    let source = office_source(true);
    let engine = PolicyDecisionEngine::new(source.clone(), directory(), EngineConfig::default())
        .start()
        .await
        .unwrap();
    assert_eq!(engine.reconcile_once().await, ReconcileOutcome::InSync);
    assert_eq!(engine.reconcile_state(), ReconcileState::Idle);

    source.update(|state| state.no_policy_accessor_enabled = true);
    assert!(matches!(
        engine.reconcile_once().await,
        ReconcileOutcome::Healed { .. }
    ));
    let flag: StorePath = "/network_info/no_policy_accessor_enabled".parse().unwrap();
    assert_eq!(engine.read_policy_data(&flag).await.unwrap(), json!(true));

    source.set_unavailable(Some("maintenance"));
    assert_eq!(engine.reconcile_once().await, ReconcileOutcome::Skipped);
    assert_eq!(engine.reconcile_state(), ReconcileState::Idle);
}
