use super::*;
use crate::config::StaywatchConfig;
use crate::events::EventBus;
use crate::models::Locker;
use tempfile::TempDir;

fn create_test_config(root: &TempDir) -> StaywatchConfig {
    let mut config = StaywatchConfig::default();
    config.server.ip = "127.0.0.1".to_string();
    config.server.port = 0;
    config.transcoder.output_root = root.path().join("hls");
    config.transcoder.binary = root
        .path()
        .join("no-such-transcoder")
        .to_string_lossy()
        .to_string();
    config.lockers = vec![Locker {
        id: "locker-1".to_string(),
        number: 1,
        property_id: "prop-1".to_string(),
    }];
    config
}

#[tokio::test]
async fn test_orchestrator_creation() {
    let root = TempDir::new().unwrap();
    let orchestrator = StaywatchOrchestrator::new(create_test_config(&root))
        .await
        .unwrap();

    let states = orchestrator.get_all_component_states().await;
    assert!(states.is_empty());
    assert!(orchestrator.local_addr().is_none());
    assert!(!orchestrator.services().bridge.is_configured());
}

#[tokio::test]
async fn test_component_state_management() {
    let root = TempDir::new().unwrap();
    let orchestrator = StaywatchOrchestrator::new(create_test_config(&root))
        .await
        .unwrap();

    orchestrator
        .set_component_state("poller", ComponentState::Starting)
        .await;
    assert_eq!(
        orchestrator.get_component_state("poller").await,
        Some(ComponentState::Starting)
    );

    orchestrator
        .set_component_state("poller", ComponentState::Running)
        .await;
    orchestrator
        .set_component_state("api", ComponentState::Failed)
        .await;

    let all_states = orchestrator.get_all_component_states().await;
    assert_eq!(all_states.len(), 2);
    assert_eq!(all_states.get("poller"), Some(&ComponentState::Running));
    assert_eq!(all_states.get("api"), Some(&ComponentState::Failed));
}

#[tokio::test]
async fn test_initialize_creates_output_root() {
    let root = TempDir::new().unwrap();
    let config = create_test_config(&root);
    let output_root = config.transcoder.output_root.clone();
    let mut orchestrator = StaywatchOrchestrator::new(config).await.unwrap();

    orchestrator.initialize().await.unwrap();
    assert!(output_root.is_dir());

    let states = orchestrator.get_all_component_states().await;
    assert_eq!(states.len(), 3);
    assert!(states.values().all(|s| *s == ComponentState::Stopped));
}

#[tokio::test]
async fn test_start_serves_and_shuts_down() {
    let root = TempDir::new().unwrap();
    let config = create_test_config(&root);
    let services = Services::from_config(config.clone(), EventBus::new(16)).unwrap();
    let mut orchestrator = StaywatchOrchestrator::with_services(config, services);

    orchestrator.initialize().await.unwrap();
    orchestrator.start().await.unwrap();

    let addr = orchestrator.local_addr().expect("server bound");
    let body: serde_json::Value = reqwest::get(format!("http://{}/health", addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "healthy");

    let release: serde_json::Value = reqwest::Client::new()
        .post(format!(
            "http://{}/api/properties/prop-1/lockers/locker-1/release",
            addr
        ))
        .json(&serde_json::json!({ "requested_by": "staff-9" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(release["bridge_status"], "not_configured");

    assert_eq!(
        orchestrator.get_component_state("api").await,
        Some(ComponentState::Running)
    );

    let exit_code = orchestrator.shutdown().await.unwrap();
    assert_eq!(exit_code, 0);

    let states = orchestrator.get_all_component_states().await;
    assert!(states.values().all(|s| *s == ComponentState::Stopped));
    assert!(reqwest::get(format!("http://{}/health", addr)).await.is_err());
}

#[tokio::test]
async fn test_start_fails_when_port_taken() {
    let root = TempDir::new().unwrap();
    let blocker = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let mut config = create_test_config(&root);
    config.server.port = blocker.local_addr().unwrap().port();
    config.poller.enabled = false;

    let mut orchestrator = StaywatchOrchestrator::new(config).await.unwrap();
    orchestrator.initialize().await.unwrap();
    assert!(orchestrator.start().await.is_err());
    assert_eq!(
        orchestrator.get_component_state("api").await,
        Some(ComponentState::Failed)
    );
}

#[test]
fn test_shutdown_reason_exit_mapping() {
    assert!(!ShutdownReason::Signal("SIGTERM").is_failure());
    assert!(ShutdownReason::ServerExited.is_failure());
    assert_eq!(ComponentState::Stopping.to_string(), "stopping");
}
