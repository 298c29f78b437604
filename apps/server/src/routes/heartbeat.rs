use actix_web::{HttpRequest, HttpResponse, post, web};
use chrono::Utc;
use vigil_service::Engine;
use vigil_service::error::HeartbeatError;
use vigil_service::models::HeartbeatRequest;

use crate::error::AppError;

const API_KEY_HEADER: &str = "X-Api-Key";

/// Agent heartbeat. The host is identified by its API key alone.
#[post("/heartbeat")]
pub async fn heartbeat_route(
    engine: web::Data<Engine>,
    request: HttpRequest,
    body: web::Json<HeartbeatRequest>,
) -> Result<HttpResponse, AppError> {
    let api_key = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .ok_or(HeartbeatError::Unauthorized)?;

    let ack = engine.ingest_heartbeat(api_key, &body, Utc::now()).await?;
    Ok(HttpResponse::Ok().json(ack))
}
