use actix_web::web;

use crate::handlers::messages;
use crate::middleware::RateLimiter;

/// Mounted under `/api/v1/groups`.
pub fn configure(cfg: &mut web::ServiceConfig, limits: &RateLimiter) {
    cfg.route(
        "/{group_id}/messages/stream",
        web::get().to(messages::stream_messages),
    )
    .service(
        web::resource("/{group_id}/messages")
            .wrap(limits.chat())
            .route(web::get().to(messages::get_messages))
            .route(web::post().to(messages::send_message)),
    );
}
