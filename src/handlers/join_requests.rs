use actix_web::{
    HttpResponse,
    web::{Data, Path},
};
use uuid::Uuid;

use crate::{
    AppState,
    database::models::ResolveAction,
    error::{AppError, AppResult},
    handlers::shared::ApiResponse,
    services::auth::Claims,
};

/// Pending requests for a group the caller owns.
pub async fn list_join_requests(
    claims: Claims,
    state: Data<AppState>,
    path: Path<Uuid>,
) -> AppResult<HttpResponse> {
    let requests = state
        .membership
        .pending_requests(path.into_inner(), claims.user_id())
        .await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(requests)))
}

/// A repeated request is not an error for the caller; it gets the same
/// "already requested" outcome the UI shows.
pub async fn request_to_join(
    claims: Claims,
    state: Data<AppState>,
    path: Path<Uuid>,
) -> AppResult<HttpResponse> {
    match state
        .membership
        .request_to_join(path.into_inner(), claims.user_id())
        .await
    {
        Ok(request) => Ok(HttpResponse::Created().json(ApiResponse::success(request))),
        Err(AppError::Conflict(message)) => {
            Ok(HttpResponse::Ok().json(ApiResponse::message(&message)))
        }
        Err(err) => Err(err),
    }
}

pub async fn accept_join_request(
    claims: Claims,
    state: Data<AppState>,
    path: Path<(Uuid, Uuid)>,
) -> AppResult<HttpResponse> {
    resolve(claims, state, path, ResolveAction::Accept).await
}

pub async fn reject_join_request(
    claims: Claims,
    state: Data<AppState>,
    path: Path<(Uuid, Uuid)>,
) -> AppResult<HttpResponse> {
    resolve(claims, state, path, ResolveAction::Reject).await
}

async fn resolve(
    claims: Claims,
    state: Data<AppState>,
    path: Path<(Uuid, Uuid)>,
    action: ResolveAction,
) -> AppResult<HttpResponse> {
    let (group_id, request_id) = path.into_inner();
    let request = state
        .membership
        .resolve_request(group_id, request_id, action, claims.user_id())
        .await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(request)))
}

pub async fn remove_member(
    claims: Claims,
    state: Data<AppState>,
    path: Path<(Uuid, Uuid)>,
) -> AppResult<HttpResponse> {
    let (group_id, user_id) = path.into_inner();
    state
        .membership
        .remove_member(group_id, user_id, claims.user_id())
        .await?;

    Ok(HttpResponse::Ok().json(ApiResponse::message("Member removed")))
}
