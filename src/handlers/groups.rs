use actix_web::{
    HttpResponse,
    web::{Data, Json, Path, Query},
};
use uuid::Uuid;

use crate::{
    AppState,
    database::models::{CreateGroupInput, GroupQuery},
    error::AppResult,
    handlers::shared::ApiResponse,
    services::auth::Claims,
};

/// Dashboard listing with the caller's relationship to each group.
pub async fn list_groups(
    claims: Claims,
    state: Data<AppState>,
    query: Query<GroupQuery>,
) -> AppResult<HttpResponse> {
    let search = query
        .search
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());

    let groups = state
        .membership
        .list_groups(claims.user_id(), search)
        .await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(groups)))
}

pub async fn create_group(
    claims: Claims,
    state: Data<AppState>,
    input: Json<CreateGroupInput>,
) -> AppResult<HttpResponse> {
    let group = state
        .membership
        .create_group(claims.user_id(), input.into_inner())
        .await?;

    Ok(HttpResponse::Created().json(ApiResponse::success(group)))
}

pub async fn get_group(
    claims: Claims,
    state: Data<AppState>,
    path: Path<Uuid>,
) -> AppResult<HttpResponse> {
    let detail = state
        .membership
        .group_detail(path.into_inner(), claims.user_id())
        .await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(detail)))
}

pub async fn delete_group(
    claims: Claims,
    state: Data<AppState>,
    path: Path<Uuid>,
) -> AppResult<HttpResponse> {
    state
        .membership
        .delete_group(path.into_inner(), claims.user_id())
        .await?;

    Ok(HttpResponse::Ok().json(ApiResponse::message("Group deleted")))
}
