use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use kameo::actor::ActorRef;
use prometheus::{Encoder, Registry, TextEncoder};
use std::sync::Arc;

use crate::actors::{GetSystemHealth, HealthMonitorActor};

/// Start the metrics HTTP server
///
/// Serves `/metrics` in Prometheus text format and `/health` from the health
/// monitor actor. Runs until the server is stopped.
pub async fn start_metrics_server(
    registry: Arc<Registry>,
    health: ActorRef<HealthMonitorActor>,
    port: u16,
) -> std::io::Result<()> {
    tracing::info!("Starting metrics server on http://0.0.0.0:{}/metrics", port);

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(registry.clone()))
            .app_data(web::Data::new(health.clone()))
            .route("/metrics", web::get().to(metrics_handler))
            .route("/health", web::get().to(health_handler))
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}

async fn metrics_handler(registry: web::Data<Arc<Registry>>) -> impl Responder {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return HttpResponse::InternalServerError().finish();
    }

    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(buffer)
}

async fn health_handler(health: web::Data<ActorRef<HealthMonitorActor>>) -> impl Responder {
    match health.ask(GetSystemHealth).send().await {
        Ok(system) => {
            let unhealthy = system.overall_status.is_unhealthy();
            let body = serde_json::json!({
                "service": "order-events",
                "health": system,
            });
            if unhealthy {
                HttpResponse::ServiceUnavailable().json(body)
            } else {
                HttpResponse::Ok().json(body)
            }
        }
        Err(e) => {
            tracing::error!(error = ?e, "Health monitor unavailable");
            HttpResponse::ServiceUnavailable().json(serde_json::json!({
                "service": "order-events",
                "health": { "overall_status": { "status": "unhealthy", "reason": "health monitor unavailable" } },
            }))
        }
    }
}
