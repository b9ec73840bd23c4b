use actix_web::{HttpResponse, Responder, web};

use crate::middleware::RateLimiter;

pub mod groups;
pub mod messages;

async fn health() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "timestamp": chrono::Utc::now()
    }))
}

/// `limits` should be shared by every worker of the server.
pub fn configure(cfg: &mut web::ServiceConfig, limits: &RateLimiter) {
    cfg.route("/health", web::get().to(health)).service(
        web::scope("/api/v1").service(
            web::scope("/groups")
                .configure(|cfg| groups::configure(cfg, limits))
                .configure(|cfg| messages::configure(cfg, limits)),
        ),
    );
}
