use std::sync::Arc;

use actix_web::web::Bytes;
use actix_web::{HttpResponse, get, web};
use futures::stream;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::debug;
use vigil_service::Engine;
use vigil_service::realtime::{ConnectionId, DASHBOARD_GROUP, RealtimeEvent, RealtimePublisher, is_valid_group};

use crate::error::AppError;

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    /// Comma separated group names, `dashboard` when omitted
    #[serde(default)]
    groups: Option<String>,
}

/// Leaves the publisher when the client goes away
struct Subscription {
    publisher: Arc<RealtimePublisher>,
    id: ConnectionId,
    events: mpsc::Receiver<Arc<RealtimeEvent>>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let publisher = self.publisher.clone();
        let id = self.id;
        tokio::spawn(async move { publisher.disconnect(id).await });
    }
}

fn frame(event: &RealtimeEvent) -> Bytes {
    let data = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    Bytes::from(format!("event: {}\ndata: {}\n\n", event.name(), data))
}

/// Server-sent events for the requested groups
#[get("/realtime")]
pub async fn realtime_stream(
    engine: web::Data<Engine>,
    query: web::Query<StreamQuery>,
) -> Result<HttpResponse, AppError> {
    let groups: Vec<String> = match &query.groups {
        Some(groups) => groups.split(',').map(str::trim).filter(|g| !g.is_empty()).map(String::from).collect(),
        None => vec![DASHBOARD_GROUP.to_string()],
    };
    if let Some(invalid) = groups.iter().find(|group| !is_valid_group(group)) {
        return Err(AppError::BadRequest(format!("Invalid group: {invalid}")));
    }

    let publisher = engine.publisher();
    let (id, events) = publisher.connect().await;
    for group in &groups {
        publisher.join(id, group).await;
    }
    debug!("Realtime stream {} joined {:?}", id, groups);

    let subscription = Subscription { publisher, id, events };
    let body = stream::unfold(subscription, |mut subscription| async move {
        let event = subscription.events.recv().await?;
        Some((Ok::<_, actix_web::Error>(frame(&event)), subscription))
    });

    Ok(HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header(("Cache-Control", "no-cache"))
        .streaming(body))
}
