use std::sync::Arc;

use actix_web::http::StatusCode;
use actix_web::{App, test, web};
use chrono::{Duration, Utc};
use serde_json::{Value, json};
use uuid::Uuid;
use vigil_service::database::{MemoryRepository, Repository};
use vigil_service::models::{HeartbeatRequest, MonitoredResource};
use vigil_service::monitoring::{CheckSpec, CheckType, CheckerRegistry};
use vigil_service::notifications::ChannelRegistry;
use vigil_service::status::hash_api_key;
use vigil_service::{Engine, EngineConfig};

use super::routes;

fn engine() -> Arc<Engine> {
    let repository: Arc<dyn Repository> = Arc::new(MemoryRepository::new());
    Arc::new(Engine::new(repository, CheckerRegistry::empty(), ChannelRegistry::empty(), EngineConfig::default()))
}

fn heartbeat_body() -> Value {
    json!({ "timestamp": Utc::now(), "system": { "hostname": "web-01", "cpu_percent": 12.0 } })
}

/// Host that went down on a missed heartbeat, leaving one open incident
async fn incident_id(engine: &Engine) -> Uuid {
    engine.provision(MonitoredResource::host("web-01", hash_api_key("agent-key"))).await.unwrap();
    let request: HeartbeatRequest = serde_json::from_value(heartbeat_body()).unwrap();
    let now = Utc::now();
    engine.ingest_heartbeat("agent-key", &request, now).await.unwrap();
    engine.sweeps().heartbeat_pass(now + Duration::minutes(10)).await.unwrap();
    engine.open_incidents().await.unwrap()[0].id
}

macro_rules! app {
    ($engine:expr) => {
        test::init_service(App::new().app_data(web::Data::from($engine.clone())).configure(routes)).await
    };
}

#[actix_web::test]
async fn test_health() {
    let engine = engine();
    let app = app!(engine);

    let response = test::call_service(&app, test::TestRequest::get().uri("/").to_request()).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[actix_web::test]
async fn test_heartbeat_requires_known_active_key() {
    let engine = engine();
    let app = app!(engine);
    let mut host = MonitoredResource::host("web-01", hash_api_key("agent-key"));
    engine.provision(host.clone()).await.unwrap();

    let request = test::TestRequest::post().uri("/heartbeat").set_json(heartbeat_body()).to_request();
    assert_eq!(test::call_service(&app, request).await.status(), StatusCode::UNAUTHORIZED);

    let request = test::TestRequest::post()
        .uri("/heartbeat")
        .insert_header(("X-Api-Key", "wrong-key"))
        .set_json(heartbeat_body())
        .to_request();
    let response = test::call_service(&app, request).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body: Value = test::read_body_json(response).await;
    assert_eq!(body["success"], false);

    let request = test::TestRequest::post()
        .uri("/heartbeat")
        .insert_header(("X-Api-Key", "agent-key"))
        .set_json(heartbeat_body())
        .to_request();
    assert_eq!(test::call_service(&app, request).await.status(), StatusCode::OK);

    host.monitoring_enabled = false;
    engine.repository().save_resource(&host).await.unwrap();
    let request = test::TestRequest::post()
        .uri("/heartbeat")
        .insert_header(("X-Api-Key", "agent-key"))
        .set_json(heartbeat_body())
        .to_request();
    assert_eq!(test::call_service(&app, request).await.status(), StatusCode::FORBIDDEN);
}

#[actix_web::test]
async fn test_unknown_resources_are_not_found() {
    let engine = engine();
    let app = app!(engine);
    let id = Uuid::new_v4();

    let requests = [
        test::TestRequest::post().uri(&format!("/checks/{}/probe", id)).to_request(),
        test::TestRequest::post().uri(&format!("/resources/{}/maintenance", id)).set_json(json!({})).to_request(),
        test::TestRequest::delete().uri(&format!("/resources/{}/maintenance", id)).to_request(),
        test::TestRequest::post()
            .uri(&format!("/hosts/{}/commands", id))
            .set_json(json!({ "command_type": "restart_agent" }))
            .to_request(),
        test::TestRequest::post().uri(&format!("/dispatches/{}/delivered", id)).to_request(),
        test::TestRequest::get().uri(&format!("/incidents/{}", id)).to_request(),
    ];
    for request in requests {
        let path = request.path().to_string();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{}", path);
    }
}

#[actix_web::test]
async fn test_bad_requests() {
    let engine = engine();
    let app = app!(engine);
    let host = engine.provision(MonitoredResource::host("web-01", hash_api_key("agent-key"))).await.unwrap();
    let check = MonitoredResource::check("api", CheckSpec::new(CheckType::Http, "https://api.example.com"), 60);
    let check = engine.provision(check).await.unwrap();

    let empty_command = test::TestRequest::post()
        .uri(&format!("/hosts/{}/commands", host.id))
        .set_json(json!({ "command_type": " " }))
        .to_request();
    assert_eq!(test::call_service(&app, empty_command).await.status(), StatusCode::BAD_REQUEST);

    // Commands only go to hosts, probes only to checks
    let command_to_check = test::TestRequest::post()
        .uri(&format!("/hosts/{}/commands", check.id))
        .set_json(json!({ "command_type": "restart_agent" }))
        .to_request();
    assert_eq!(test::call_service(&app, command_to_check).await.status(), StatusCode::BAD_REQUEST);
    let probe_host = test::TestRequest::post().uri(&format!("/checks/{}/probe", host.id)).to_request();
    assert_eq!(test::call_service(&app, probe_host).await.status(), StatusCode::BAD_REQUEST);

    let backwards = test::TestRequest::post()
        .uri(&format!("/resources/{}/maintenance", check.id))
        .set_json(json!({ "starts_at": Utc::now(), "ends_at": Utc::now() - Duration::hours(1) }))
        .to_request();
    assert_eq!(test::call_service(&app, backwards).await.status(), StatusCode::BAD_REQUEST);

    let queued = test::TestRequest::post()
        .uri(&format!("/hosts/{}/commands", host.id))
        .set_json(json!({ "command_type": "restart_agent" }))
        .to_request();
    assert_eq!(test::call_service(&app, queued).await.status(), StatusCode::ACCEPTED);
}

#[actix_web::test]
async fn test_incident_actions() {
    let engine = engine();
    let app = app!(engine);
    let id = incident_id(&engine).await;

    let unknown_action = test::TestRequest::post()
        .uri(&format!("/incidents/{}/snooze", id))
        .set_json(json!({ "actor": "alice" }))
        .to_request();
    assert_eq!(test::call_service(&app, unknown_action).await.status(), StatusCode::BAD_REQUEST);

    // New incidents must be acknowledged before they can be resolved
    let resolve = test::TestRequest::post()
        .uri(&format!("/incidents/{}/resolve", id))
        .set_json(json!({ "actor": "alice" }))
        .to_request();
    assert_eq!(test::call_service(&app, resolve).await.status(), StatusCode::CONFLICT);

    let acknowledge = test::TestRequest::post()
        .uri(&format!("/incidents/{}/acknowledge", id))
        .set_json(json!({ "actor": "alice" }))
        .to_request();
    let response = test::call_service(&app, acknowledge).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = test::read_body_json(response).await;
    assert_eq!(body["status"], "acknowledged");

    let listed = test::call_service(&app, test::TestRequest::get().uri("/incidents").to_request()).await;
    let body: Value = test::read_body_json(listed).await;
    assert_eq!(body.as_array().map(Vec::len), Some(1));
}
