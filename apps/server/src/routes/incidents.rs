use actix_web::{HttpResponse, get, post, web};
use serde::Deserialize;
use uuid::Uuid;
use vigil_service::Engine;
use vigil_service::incidents::{IncidentAction, OperatorRequest};

use crate::error::AppError;

#[get("/incidents")]
pub async fn list_incidents(engine: web::Data<Engine>) -> Result<HttpResponse, AppError> {
    Ok(HttpResponse::Ok().json(engine.open_incidents().await?))
}

#[get("/incidents/{id}")]
pub async fn get_incident(engine: web::Data<Engine>, id: web::Path<Uuid>) -> Result<HttpResponse, AppError> {
    Ok(HttpResponse::Ok().json(engine.incident(id.into_inner()).await?))
}

#[derive(Debug, Deserialize)]
pub struct ActionBody {
    actor: String,
    #[serde(default)]
    comment: Option<String>,
    #[serde(default)]
    assignee: Option<String>,
}

/// `POST /incidents/{id}/acknowledge|assign|escalate|resolve|close|reopen|comment`
#[post("/incidents/{id}/{action}")]
pub async fn incident_action(
    engine: web::Data<Engine>,
    path: web::Path<(Uuid, String)>,
    body: web::Json<ActionBody>,
) -> Result<HttpResponse, AppError> {
    let (id, action) = path.into_inner();
    let action: IncidentAction = action.parse().map_err(AppError::BadRequest)?;

    let body = body.into_inner();
    let mut request = OperatorRequest::new(action, body.actor);
    if let Some(comment) = body.comment {
        request = request.with_comment(comment);
    }
    if let Some(assignee) = body.assignee {
        request = request.with_assignee(assignee);
    }

    Ok(HttpResponse::Ok().json(engine.incident_action(id, request).await?))
}
