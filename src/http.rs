use std::sync::Arc;

use actix_web::dev::Server;
use actix_web::{App, HttpResponse, HttpServer, Responder, get, web};
use tracing::error;

use crate::metrics::PrometheusOutboxMetrics;

#[get("/health")]
async fn health_check() -> impl Responder {
    HttpResponse::Ok().body("OK")
}

#[get("/metrics")]
async fn metrics_report(registry: web::Data<PrometheusOutboxMetrics>) -> impl Responder {
    match registry.encode() {
        Ok(body) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(body),
        Err(e) => {
            error!(error = %e, "Can not encode metrics.");
            HttpResponse::InternalServerError().finish()
        }
    }
}

fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(health_check).service(metrics_report);
}

/// Binds the operational endpoints. The returned server runs once awaited.
pub fn serve(port: u16, metrics: Arc<PrometheusOutboxMetrics>) -> std::io::Result<Server> {
    let data = web::Data::from(metrics);
    let server = HttpServer::new(move || App::new().app_data(data.clone()).configure(routes))
        .bind(("0.0.0.0", port))?
        .disable_signals()
        .run();
    Ok(server)
}

#[cfg(test)]
mod tests {
    use actix_web::{test, web};

    use super::*;
    use crate::metrics::OutboxMetrics;

    #[actix_web::test]
    async fn health_returns_ok() {
        let metrics = web::Data::new(PrometheusOutboxMetrics::new().unwrap());
        let app = test::init_service(App::new().app_data(metrics).configure(routes)).await;

        let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;

        assert!(resp.status().is_success());
        assert_eq!(test::read_body(resp).await, "OK");
    }

    #[actix_web::test]
    async fn serve_binds_and_stops() {
        let collector = Arc::new(PrometheusOutboxMetrics::new().unwrap());
        let server = serve(0, collector).unwrap();
        let handle = server.handle();
        let running = actix_web::rt::spawn(server);

        handle.stop(false).await;
        running.await.unwrap().unwrap();
    }

    #[actix_web::test]
    async fn metrics_exposes_outbox_counters() {
        let metrics = PrometheusOutboxMetrics::new().unwrap();
        metrics.record_enqueued("book");
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(metrics))
                .configure(routes),
        )
        .await;

        let resp = test::call_service(&app, test::TestRequest::get().uri("/metrics").to_request()).await;
        assert!(resp.status().is_success());

        let body = test::read_body(resp).await;
        let text = std::str::from_utf8(&body).unwrap();
        assert!(text.contains("library_outbox_tasks_created_total{kind=\"book\"} 1"));
    }
}
