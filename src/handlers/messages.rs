use actix_web::{
    HttpResponse,
    http::header,
    web::{Bytes, Data, Json, Path, Query},
};
use chrono::FixedOffset;
use futures::{StreamExt, stream};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    AppState,
    database::models::SendMessageInput,
    error::{AppError, AppResult},
    handlers::shared::ApiResponse,
    services::{auth::Claims, chat::ChatSession, chat::day_groups},
};

#[derive(Debug, Deserialize)]
pub struct MessagesQuery {
    /// Viewer's offset from UTC in minutes, used for day separators.
    pub tz_offset_minutes: Option<i32>,
}

fn viewer_offset(minutes: Option<i32>) -> AppResult<FixedOffset> {
    let seconds = minutes.unwrap_or(0).saturating_mul(60);
    FixedOffset::east_opt(seconds)
        .ok_or_else(|| AppError::BadRequest("tz_offset_minutes is out of range".to_string()))
}

/// History, oldest first, with day separators for the viewer's timezone.
pub async fn get_messages(
    claims: Claims,
    state: Data<AppState>,
    path: Path<Uuid>,
    query: Query<MessagesQuery>,
) -> AppResult<HttpResponse> {
    let offset = viewer_offset(query.tz_offset_minutes)?;
    let messages = state
        .chat
        .load(path.into_inner(), claims.user_id())
        .await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(day_groups(&messages, &offset))))
}

/// Stores the message. Clients receive it through the stream endpoint.
pub async fn send_message(
    claims: Claims,
    state: Data<AppState>,
    path: Path<Uuid>,
    input: Json<SendMessageInput>,
) -> AppResult<HttpResponse> {
    let message = state
        .chat
        .send(path.into_inner(), claims.user_id(), &input.text)
        .await?;

    Ok(HttpResponse::Created().json(ApiResponse::success(message)))
}

fn sse_event<T: Serialize>(event: &str, data: &T) -> Result<Bytes, serde_json::Error> {
    let payload = serde_json::to_string(data)?;
    Ok(Bytes::from(format!("event: {}\ndata: {}\n\n", event, payload)))
}

/// Server-sent events: one `history` event with the snapshot, then a
/// `message` event per new message until the client disconnects.
pub async fn stream_messages(
    claims: Claims,
    state: Data<AppState>,
    path: Path<Uuid>,
) -> AppResult<HttpResponse> {
    let group_id = path.into_inner();
    let mut session = ChatSession::new(group_id);
    let history = session.open(&state.chat, claims.user_id()).await?;

    let snapshot = sse_event("history", &history)
        .map_err(|e| AppError::internal_server_error_message(e.to_string()))?;

    let live = stream::unfold(session, |mut session| async move {
        let message = session.next_message().await?;
        match sse_event("message", &message) {
            Ok(bytes) => Some((Ok::<_, actix_web::Error>(bytes), session)),
            Err(err) => {
                log::error!(
                    "Failed to encode message {} for group {}: {}",
                    message.id,
                    session.group_id(),
                    err
                );
                session.close();
                None
            }
        }
    });

    log::debug!(
        "User {} opened the chat stream for group {}",
        claims.user_id(),
        group_id
    );

    Ok(HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .streaming(stream::once(async move { Ok::<_, actix_web::Error>(snapshot) }).chain(live)))
}
