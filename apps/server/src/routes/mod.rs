use actix_web::web;

mod health;
mod heartbeat;
mod incidents;
mod operations;
mod realtime;

#[cfg(test)]
mod tests;

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(health::health_route)
        .service(heartbeat::heartbeat_route)
        .service(incidents::list_incidents)
        .service(incidents::get_incident)
        .service(incidents::incident_action)
        .service(operations::queue_command)
        .service(operations::start_maintenance)
        .service(operations::end_maintenance)
        .service(operations::probe_now)
        .service(operations::mark_delivered)
        .service(realtime::realtime_stream);
}
