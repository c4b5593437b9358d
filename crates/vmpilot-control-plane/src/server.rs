use axum::extract::rejection::JsonRejection;
use axum::extract::{MatchedPath, Path, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::features::cloud_provider::repo::InstanceDescriptor;
use crate::features::observability::controller::ObservabilityController;
use crate::features::vm_management::controller::VmController;
use crate::shared::error::{ControlPlaneError, ControlPlaneResult};
use crate::shared::types::{
    CreateVmRequest, CreateVmResponse, DeleteVmRequest, DeleteVmResponse, HealthResponse,
    VmIdResponse, VmRecord,
};

/// HTTP front of the control plane.
#[derive(Clone)]
pub struct ControlPlaneServer {
    vms: Arc<VmController>,
    observability: Arc<ObservabilityController>,
}

impl ControlPlaneServer {
    pub fn new(vms: Arc<VmController>, observability: Arc<ObservabilityController>) -> Self {
        Self { vms, observability }
    }

    pub fn router(self) -> Router {
        let api = Router::new()
            .route("/vms", post(create_vm))
            .route("/vms/:vm_id", delete(delete_vm))
            .route("/vms/detail/:vm_id", get(vm_detail))
            // Identities are public keys and may contain '/'.
            .route("/vms/status/*public_key", get(vm_status))
            .route("/vm-id/*public_key", get(vm_id_for));

        Router::new()
            .route("/health", get(health))
            .route("/metrics", get(metrics))
            .nest("/api/v1", api)
            .route_layer(middleware::from_fn_with_state(self.clone(), track_requests))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(self)
    }
}

async fn track_requests(
    State(server): State<ControlPlaneServer>,
    request: Request,
    next: Next,
) -> Response {
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let started = Instant::now();

    let response = next.run(request).await;

    server
        .observability
        .record_api_request(&endpoint, response.status().as_u16(), started.elapsed());
    response
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> ControlPlaneResult<T> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| ControlPlaneError::InvalidRequest(rejection.body_text()))
}

async fn health(
    State(server): State<ControlPlaneServer>,
) -> ControlPlaneResult<Json<HealthResponse>> {
    server.vms.health().await.map(Json)
}

async fn metrics(State(server): State<ControlPlaneServer>) -> Response {
    match server.observability.render_metrics() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(error) => (StatusCode::INTERNAL_SERVER_ERROR, error).into_response(),
    }
}

async fn create_vm(
    State(server): State<ControlPlaneServer>,
    payload: Result<Json<CreateVmRequest>, JsonRejection>,
) -> ControlPlaneResult<Json<CreateVmResponse>> {
    let request = json_body(payload)?;
    server.vms.create_vm(request).await.map(Json)
}

async fn delete_vm(
    State(server): State<ControlPlaneServer>,
    Path(vm_id): Path<String>,
    payload: Result<Json<DeleteVmRequest>, JsonRejection>,
) -> ControlPlaneResult<Json<DeleteVmResponse>> {
    let request = json_body(payload)?;
    server.vms.delete_vm(&vm_id, request).await.map(Json)
}

async fn vm_detail(
    State(server): State<ControlPlaneServer>,
    Path(vm_id): Path<String>,
) -> ControlPlaneResult<Json<Vec<InstanceDescriptor>>> {
    server.vms.vm_detail(&vm_id).await.map(Json)
}

async fn vm_status(
    State(server): State<ControlPlaneServer>,
    Path(public_key): Path<String>,
) -> ControlPlaneResult<Json<VmRecord>> {
    server.vms.vm_status(&public_key).await.map(Json)
}

async fn vm_id_for(
    State(server): State<ControlPlaneServer>,
    Path(public_key): Path<String>,
) -> ControlPlaneResult<Json<VmIdResponse>> {
    server.vms.vm_id_for(&public_key).await.map(Json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::cloud_provider::repo::{CloudProvider, MachineResources};
    use crate::features::deployment::controller::DeploymentController;
    use crate::features::deployment::service::{DeploymentOrchestrator, DeploymentSettings};
    use crate::features::vm_management::service::{MachineTemplate, VmManagementService};
    use crate::features::vm_registry::repo::InMemoryVmRegistry;
    use crate::test_support::{FakeCloudProvider, FakeShell};
    use axum::body::Body;
    use axum::http::{Method, Request as HttpRequest};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn test_router(provider: Arc<dyn CloudProvider>) -> Router {
        let registry = Arc::new(InMemoryVmRegistry::new());
        let observability = Arc::new(ObservabilityController::with_new_registry().unwrap());
        let orchestrator = Arc::new(DeploymentOrchestrator::new(
            registry.clone(),
            provider.clone(),
            Arc::new(FakeShell::new()),
            DeploymentSettings::default(),
            observability.clone(),
        ));
        let service = Arc::new(VmManagementService::new(
            registry,
            provider,
            Arc::new(DeploymentController::new(orchestrator, false)),
            MachineTemplate {
                os_image: "https://example.com/ubuntu.img".to_string(),
                resources: MachineResources {
                    cpu: 2,
                    memory: "4Gi".to_string(),
                    storage: "25Gi".to_string(),
                },
                app_port: 8000,
                ssh_public_key: "ssh-ed25519 AAAA control-plane".to_string(),
            },
            observability.clone(),
        ));
        ControlPlaneServer::new(Arc::new(VmController::new(service)), observability).router()
    }

    fn json_request(method: Method, uri: &str, body: Value) -> HttpRequest<Body> {
        HttpRequest::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_request(uri: &str) -> HttpRequest<Body> {
        HttpRequest::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_empty() {
        let app = test_router(Arc::new(FakeCloudProvider::new("vm-1")));
        let response = app.oneshot(get_request("/health")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            json!({"status": "healthy", "active_vms": 0})
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_lookup_conflict_delete() {
        let app = test_router(Arc::new(FakeCloudProvider::new("vm-1")));
        let create = json!({"public_key": "alice", "blob_id": "blob-123"});

        let response = app
            .clone()
            .oneshot(json_request(Method::POST, "/api/v1/vms", create.clone()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["vm_id"], "vm-1");
        assert_eq!(body["public_key"], "alice");
        assert_eq!(body["status"], "creating");

        let response = app
            .clone()
            .oneshot(json_request(Method::POST, "/api/v1/vms", create))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(body_json(response).await["error_code"], "VM_ALREADY_EXISTS");

        let response = app
            .clone()
            .oneshot(get_request("/api/v1/vm-id/alice"))
            .await
            .unwrap();
        assert_eq!(
            body_json(response).await,
            json!({"public_key": "alice", "vm_id": "vm-1"})
        );

        let response = app.clone().oneshot(get_request("/health")).await.unwrap();
        assert_eq!(body_json(response).await["active_vms"], 1);

        let response = app
            .clone()
            .oneshot(json_request(
                Method::DELETE,
                "/api/v1/vms/vm-1",
                json!({"public_key": "alice"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            json!({"message": "VM deleted", "vm_id": "vm-1"})
        );

        let response = app
            .oneshot(get_request("/api/v1/vm-id/alice"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_reports_deployment_progress() {
        let app = test_router(Arc::new(FakeCloudProvider::new("vm-1")));
        let key = "ssh-ed25519 AAAA/bc+de";
        let response = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/api/v1/vms",
                json!({"public_key": key, "blob_id": "blob-123"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        tokio::time::sleep(std::time::Duration::from_secs(30)).await;

        let response = app
            .oneshot(get_request("/api/v1/vms/status/ssh-ed25519%20AAAA/bc+de"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["public_key"], key);
        assert_eq!(body["status"], "model_running");
    }

    #[tokio::test]
    async fn test_malformed_body_is_bad_request() {
        let app = test_router(Arc::new(FakeCloudProvider::new("vm-1")));
        let response = app
            .oneshot(json_request(
                Method::POST,
                "/api/v1/vms",
                json!({"blob_id": "blob-123"}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error_code"], "INVALID_REQUEST");
    }

    #[tokio::test]
    async fn test_invalid_blob_id_is_bad_request() {
        let app = test_router(Arc::new(FakeCloudProvider::new("vm-1")));
        let response = app
            .oneshot(json_request(
                Method::POST,
                "/api/v1/vms",
                json!({"public_key": "alice", "blob_id": "$(reboot)"}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error_code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_provider_failure_is_bad_gateway() {
        let mut provider = FakeCloudProvider::new("vm-1");
        provider.fail_create = true;
        let app = test_router(Arc::new(provider));

        let response = app
            .oneshot(json_request(
                Method::POST,
                "/api/v1/vms",
                json!({"public_key": "alice", "blob_id": "blob-123"}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = body_json(response).await;
        assert_eq!(body["details"]["upstream"], "cloud_provider");
    }

    #[tokio::test]
    async fn test_delete_unknown_is_not_found() {
        let app = test_router(Arc::new(FakeCloudProvider::new("vm-1")));
        let response = app
            .oneshot(json_request(
                Method::DELETE,
                "/api/v1/vms/vm-1",
                json!({"public_key": "alice"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_vm_detail_proxies_descriptor() {
        let app = test_router(Arc::new(FakeCloudProvider::new("vm-1")));
        let response = app
            .oneshot(get_request("/api/v1/vms/detail/vm-1"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body[0]["status"], "Active");
        assert_eq!(body[0]["publicIp"], "203.0.113.10");
    }

    #[tokio::test]
    async fn test_metrics_endpoint_counts_requests() {
        let app = test_router(Arc::new(FakeCloudProvider::new("vm-1")));
        app.clone().oneshot(get_request("/health")).await.unwrap();

        let response = app.oneshot(get_request("/metrics")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("vmpilot_api_request_total{endpoint=\"/health\",status=\"200\"} 1"));
    }
}
