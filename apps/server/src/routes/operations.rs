use actix_web::{HttpResponse, delete, post, web};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;
use vigil_service::Engine;
use vigil_service::models::MaintenanceWindow;

use crate::error::AppError;

#[derive(Debug, Deserialize)]
pub struct CommandBody {
    command_type: String,
    #[serde(default)]
    payload: Option<String>,
}

/// Queue a command for the host's next heartbeat acknowledgement
#[post("/hosts/{id}/commands")]
pub async fn queue_command(
    engine: web::Data<Engine>,
    id: web::Path<Uuid>,
    body: web::Json<CommandBody>,
) -> Result<HttpResponse, AppError> {
    let body = body.into_inner();
    if body.command_type.trim().is_empty() {
        return Err(AppError::BadRequest("command_type is required".into()));
    }
    let command = engine.queue_command(id.into_inner(), &body.command_type, body.payload).await?;
    Ok(HttpResponse::Accepted().json(command))
}

#[derive(Debug, Deserialize)]
pub struct MaintenanceBody {
    #[serde(default)]
    starts_at: Option<DateTime<Utc>>,
    #[serde(default)]
    ends_at: Option<DateTime<Utc>>,
    #[serde(default)]
    reason: Option<String>,
}

#[post("/resources/{id}/maintenance")]
pub async fn start_maintenance(
    engine: web::Data<Engine>,
    id: web::Path<Uuid>,
    body: web::Json<MaintenanceBody>,
) -> Result<HttpResponse, AppError> {
    let body = body.into_inner();
    let starts_at = body.starts_at.unwrap_or_else(Utc::now);
    if body.ends_at.is_some_and(|ends_at| ends_at <= starts_at) {
        return Err(AppError::BadRequest("ends_at must be after starts_at".into()));
    }

    let window = MaintenanceWindow { starts_at, ends_at: body.ends_at, reason: body.reason };
    let transition = engine.start_maintenance(id.into_inner(), window).await?;
    Ok(HttpResponse::Ok().json(json!({ "success": true, "transition": transition })))
}

#[delete("/resources/{id}/maintenance")]
pub async fn end_maintenance(engine: web::Data<Engine>, id: web::Path<Uuid>) -> Result<HttpResponse, AppError> {
    let transitions = engine.end_maintenance(id.into_inner()).await?;
    Ok(HttpResponse::Ok().json(json!({ "success": true, "transitions": transitions })))
}

/// Run a check immediately and return the probe result
#[post("/checks/{id}/probe")]
pub async fn probe_now(engine: web::Data<Engine>, id: web::Path<Uuid>) -> Result<HttpResponse, AppError> {
    Ok(HttpResponse::Ok().json(engine.probe_now(id.into_inner()).await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct ReceiptBody {
    #[serde(default)]
    external_id: Option<String>,
}

/// Provider delivery receipt
#[post("/dispatches/{id}/delivered")]
pub async fn mark_delivered(
    engine: web::Data<Engine>,
    id: web::Path<Uuid>,
    body: Option<web::Json<ReceiptBody>>,
) -> Result<HttpResponse, AppError> {
    let external_id = body.and_then(|body| body.into_inner().external_id);
    Ok(HttpResponse::Ok().json(engine.mark_delivered(id.into_inner(), external_id).await?))
}
