use std::net::IpAddr;
use std::sync::Arc;

use policyd_core_types::{Accessor, IpFamily};
use policyd_policy_center::rules::ResultSet;
use policyd_policy_center::{
    CanonicalState, ClientRestrictionPolicy, DecisionContext, EngineConfig, ErrorKind,
    InMemoryCanonicalSource, InMemoryDirectory, PolicyDecisionEngine, PolicyError, PolicyStore,
    PreparedQuery, Program, RuleEngine, StorePath,
};
use serde_json::{json, Value};

fn ctx(addr: &str) -> DecisionContext {
    DecisionContext::new(addr.parse::<IpAddr>().unwrap())
}

fn source(enabled: bool, no_policy_allowed: bool) -> Arc<InMemoryCanonicalSource> {
    let source = Arc::new(InMemoryCanonicalSource::new(CanonicalState {
        network_restriction_enabled: enabled,
        no_policy_accessor_enabled: no_policy_allowed,
        ..CanonicalState::default()
    }));
    source.add_network("hq", IpFamily::Ipv4, &["10.0.0.0/8"]);
    source.add_network("hq6", IpFamily::Ipv6, &["fd00::/8"]);
    source.add_network("vpn", IpFamily::Ipv4, &["198.51.100.7"]);
    source.relate(Accessor::department("eng"), "hq", IpFamily::Ipv4);
    source.relate(Accessor::department("eng"), "hq6", IpFamily::Ipv6);
    source.relate(Accessor::user("erin"), "vpn", IpFamily::Ipv4);
    source
}

fn directory() -> Arc<InMemoryDirectory> {
    let directory = Arc::new(InMemoryDirectory::new());
    directory.set_user_paths("alice", &[&["backend", "eng", "root"]]);
    directory.set_user_paths("erin", &[&["sales", "root"]]);
    directory.set_user_paths("zoe", &[&["sales", "root"]]);
    directory
}

async fn start(source: Arc<InMemoryCanonicalSource>) -> Arc<PolicyDecisionEngine> {
    PolicyDecisionEngine::new(source, directory(), EngineConfig::default())
        .start()
        .await
        .unwrap()
}

#[tokio::test]
async fn disabled_restriction_allows_everyone() {
    let engine = start(source(false, false)).await;
    let info = engine
        .read_policy_data(&"/network_info".parse().unwrap())
        .await
        .unwrap();
    assert_eq!(
        info,
        json!({"is_enabled": false, "no_policy_accessor_enabled": false})
    );

    for (accessor, addr) in [
        (Accessor::user("alice"), "172.16.0.1"),
        (Accessor::user("zoe"), "10.0.0.1"),
        (Accessor::department("eng"), "fe80::1"),
    ] {
        assert!(engine.network_decision(&ctx(addr), &accessor).await.unwrap());
    }
}

#[tokio::test]
async fn accessor_without_relation_follows_the_no_policy_switch() {
    let permissive = start(source(true, true)).await;
    assert!(permissive
        .network_decision(&ctx("172.16.0.1"), &Accessor::user("zoe"))
        .await
        .unwrap());

    let strict = start(source(true, false)).await;
    assert!(!strict
        .network_decision(&ctx("172.16.0.1"), &Accessor::user("zoe"))
        .await
        .unwrap());
}

#[tokio::test]
async fn ancestor_department_relation_governs_user() {
    let engine = start(source(true, false)).await;
    let alice = Accessor::user("alice");

    assert!(engine.network_decision(&ctx("10.20.30.40"), &alice).await.unwrap());
    assert!(!engine.network_decision(&ctx("172.16.0.1"), &alice).await.unwrap());
    assert!(engine
        .network_decision(&ctx("::ffff:10.20.30.40"), &alice)
        .await
        .unwrap());
    assert!(engine.network_decision(&ctx("fd12::1"), &alice).await.unwrap());
    assert!(!engine.network_decision(&ctx("2001:db8::1"), &alice).await.unwrap());
}

#[tokio::test]
async fn direct_user_relation_is_honored() {
    let engine = start(source(true, false)).await;
    let erin = Accessor::user("erin");
    assert!(engine.network_decision(&ctx("198.51.100.7"), &erin).await.unwrap());
    assert!(!engine.network_decision(&ctx("198.51.100.8"), &erin).await.unwrap());
    // no ipv6 relation anywhere in erin's chain
    assert!(!engine.network_decision(&ctx("fd00::1"), &erin).await.unwrap());
}

#[tokio::test]
async fn department_accessor_uses_its_own_relation() {
    let engine = start(source(true, false)).await;
    let eng = Accessor::department("eng");
    assert!(engine.network_decision(&ctx("10.1.1.1"), &eng).await.unwrap());
    assert!(!engine.network_decision(&ctx("192.0.2.1"), &eng).await.unwrap());
}

#[tokio::test]
async fn department_accessor_inherits_nearest_ancestor_relation() {
    // the permissive switch must not apply to departments under a related parent
    let source = source(true, true);
    source.add_network("campus", IpFamily::Ipv4, &["172.16.0.0/12"]);
    source.relate(Accessor::department("root"), "campus", IpFamily::Ipv4);
    let directory = directory();
    directory.add_department(&["legal", "root"]);
    let engine = PolicyDecisionEngine::new(source, directory, EngineConfig::default())
        .start()
        .await
        .unwrap();

    let legal = Accessor::department("legal");
    assert!(engine.network_decision(&ctx("172.16.4.4"), &legal).await.unwrap());
    assert!(!engine.network_decision(&ctx("10.1.1.1"), &legal).await.unwrap());

    // backend sits under eng, which is nearer than root
    let backend = Accessor::department("backend");
    assert!(engine.network_decision(&ctx("10.1.1.1"), &backend).await.unwrap());
    assert!(!engine.network_decision(&ctx("172.16.4.4"), &backend).await.unwrap());

    let inherited = engine
        .read_policy_data(&"/network_info/ipv4/inherited".parse().unwrap())
        .await
        .unwrap();
    assert_eq!(
        inherited,
        json!({"backend": "hq", "legal": "campus", "sales": "campus"})
    );
    // no ipv6 relation above legal
    assert!(engine.network_decision(&ctx("2001:db8::1"), &legal).await.unwrap());
}

#[tokio::test]
async fn unknown_client_kind_is_caller_input() {
    let engine = start(source(true, false)).await;
    let err = engine
        .client_sign_decision(&ctx("10.0.0.1"), "smart_fridge")
        .await
        .unwrap_err();
    assert!(matches!(err, PolicyError::CallerInput(_)));
    assert_eq!(err.kind(), ErrorKind::CallerInput);
}

#[tokio::test]
async fn missing_client_policy_allows_every_kind() {
    let engine = start(source(true, false)).await;
    for kind in ["pc_web", "mobile_web", "windows", "mac", "android", "ios", "linux"] {
        assert!(engine
            .client_sign_decision(&ctx("10.0.0.1"), kind)
            .await
            .unwrap());
    }
}

#[tokio::test]
async fn client_policy_limits_kinds() {
    let source = source(true, false);
    source.update(|state| {
        state.client_restriction = Some(ClientRestrictionPolicy {
            allowed_clients: vec!["ios".into(), "android".into(), "toaster".into()],
        });
    });
    let engine = start(source).await;
    let ctx = ctx("10.0.0.1");
    assert!(engine.client_sign_decision(&ctx, "ios").await.unwrap());
    assert!(engine.client_sign_decision(&ctx, "android").await.unwrap());
    assert!(!engine.client_sign_decision(&ctx, "windows").await.unwrap());
}

#[tokio::test]
async fn read_policy_data_reports_missing_paths() {
    let engine = start(source(true, false)).await;
    let path: StorePath = "/sign_in_policy/client_restriction".parse().unwrap();
    assert!(engine.read_policy_data(&path).await.is_ok());
    let err = engine
        .read_policy_data(&"/sign_in_policy/nothing".parse().unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, PolicyError::NotFound(_)));
}

#[tokio::test]
async fn first_rebuild_failure_is_fatal() {
    let source = source(true, false);
    source.set_unavailable(Some("database offline"));
    let result = PolicyDecisionEngine::new(source, directory(), EngineConfig::default())
        .start()
        .await;
    let err = result.err().unwrap();
    assert_eq!(err.kind(), ErrorKind::CanonicalSource);
}

#[tokio::test]
async fn failed_rebuild_keeps_previous_snapshot() {
    let source = source(true, false);
    let engine = start(source.clone()).await;
    let revision = engine.revision();

    source.set_unavailable(Some("database offline"));
    let err = engine.init_policy_data().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CanonicalSource);
    assert_eq!(engine.revision(), revision);
    assert!(engine
        .network_decision(&ctx("10.0.0.9"), &Accessor::user("alice"))
        .await
        .unwrap());
}

/// Engine whose queries return a fixed result regardless of the store.
struct CannedEngine {
    result: ResultSet,
}

struct CannedQuery {
    program: Program,
    result: ResultSet,
}

impl PreparedQuery for CannedQuery {
    fn program(&self) -> Program {
        self.program
    }

    fn eval(&self, _input: &Value) -> Result<ResultSet, PolicyError> {
        Ok(self.result.clone())
    }
}

impl RuleEngine for CannedEngine {
    fn compile(
        &self,
        program: Program,
        _store: Arc<PolicyStore>,
    ) -> Result<Arc<dyn PreparedQuery>, PolicyError> {
        Ok(Arc::new(CannedQuery {
            program,
            result: self.result.clone(),
        }))
    }
}

async fn start_with(result: ResultSet) -> Arc<PolicyDecisionEngine> {
    PolicyDecisionEngine::new(source(true, false), directory(), EngineConfig::default())
        .with_rule_engine(Arc::new(CannedEngine { result }))
        .start()
        .await
        .unwrap()
}

#[tokio::test]
async fn empty_result_is_an_engine_error() {
    let engine = start_with(Vec::new()).await;
    let err = engine
        .network_decision(&ctx("10.0.0.1"), &Accessor::user("alice"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Evaluation);
    let err = engine
        .client_sign_decision(&ctx("10.0.0.1"), "ios")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Evaluation);
}

#[tokio::test]
async fn malformed_result_is_an_engine_error() {
    let engine = start_with(vec![json!({"windows": "yes"})]).await;
    let err = engine
        .network_decision(&ctx("10.0.0.1"), &Accessor::user("alice"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Evaluation);

    let err = engine
        .client_sign_decision(&ctx("10.0.0.1"), "windows")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Evaluation);

    let err = engine
        .client_sign_decision(&ctx("10.0.0.1"), "ios")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Evaluation);
}
