use actix_web::web;

use crate::handlers::{groups, join_requests};
use crate::middleware::RateLimiter;

/// Mounted under `/api/v1/groups`.
pub fn configure(cfg: &mut web::ServiceConfig, limits: &RateLimiter) {
    cfg.route("", web::get().to(groups::list_groups))
        .route("", web::post().to(groups::create_group))
        .route("/{group_id}", web::get().to(groups::get_group))
        .route("/{group_id}", web::delete().to(groups::delete_group))
        .service(
            web::resource("/{group_id}/join-requests")
                .wrap(limits.join_requests())
                .route(web::get().to(join_requests::list_join_requests))
                .route(web::post().to(join_requests::request_to_join)),
        )
        .route(
            "/{group_id}/join-requests/{request_id}/accept",
            web::post().to(join_requests::accept_join_request),
        )
        .route(
            "/{group_id}/join-requests/{request_id}/reject",
            web::post().to(join_requests::reject_join_request),
        )
        .route(
            "/{group_id}/members/{user_id}",
            web::delete().to(join_requests::remove_member),
        );
}
