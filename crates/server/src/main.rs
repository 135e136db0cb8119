use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};
use chrono::{DateTime, Duration, Utc};
use presence::PresenceHub;
use serde::Deserialize;
use server_api::{conversations, deletion, membership, messages, ApiContext};
use shared::{
    domain::{ConversationId, ConversationKind, DeleteScope, MessageId, UserId},
    error::{ApiError, ErrorCode},
    protocol::Envelope,
};
use storage::Storage;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, info};

mod config;
mod ws;

use config::{load_settings, prepare_database_url};

const MAX_BODY_BYTES: usize = 64 * 1024;

#[derive(Clone)]
struct AppState {
    api: ApiContext,
    join_history_limit: u32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let settings = load_settings();
    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;
    let mut api = ApiContext::new(storage, PresenceHub::new());
    api.everyone_delete_window = Duration::seconds(settings.delete_window_secs);

    let state = AppState {
        api,
        join_history_limit: settings.join_history_limit,
    };
    let app = build_router(Arc::new(state));

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route(
            "/conversations",
            get(http_list_conversations).post(http_create_conversation),
        )
        .route(
            "/groups/:group_id",
            get(http_get_group).put(http_update_group),
        )
        .route("/groups/:group_id/add", post(http_add_members))
        .route("/groups/:group_id/remove", post(http_remove_members))
        .route("/groups/:group_id/settings", put(http_update_settings))
        .route("/groups/:group_id/mute", put(http_mute_group))
        .route("/groups/:group_id/unmute", put(http_unmute_group))
        .route("/groups/:group_id/leave", post(http_leave_group))
        .route("/groups/:group_id/avatar", post(http_set_group_avatar))
        .route("/messages/:message_id", delete(http_delete_message))
        .route("/messages/forward", post(http_forward_message))
        .route("/ws", get(ws::ws_handler))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(state)
}

// Identity is supplied by the auth layer in front of this service.
#[derive(Debug, Deserialize)]
struct UserQuery {
    user_id: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateConversationRequest {
    kind: ConversationKind,
    other_user_id: Option<i64>,
    name: Option<String>,
    description: Option<String>,
    avatar: Option<String>,
    #[serde(default)]
    members: Vec<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateGroupRequest {
    name: Option<String>,
    description: Option<String>,
    // clients historically sent either field for the group image
    photo: Option<String>,
    avatar: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MembersRequest {
    #[serde(default)]
    members: Vec<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettingsRequest {
    only_admin_can_send: Option<bool>,
    only_admin_can_edit: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct MuteRequest {
    until: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct AvatarRequest {
    url: String,
}

#[derive(Debug, Deserialize)]
struct DeleteMessageQuery {
    user_id: i64,
    scope: Option<DeleteScope>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ForwardRequest {
    source_message_id: i64,
    target_conversation_id: i64,
}

type EnvelopeResponse = (StatusCode, Json<Envelope<serde_json::Value>>);

fn status_for(code: &ErrorCode) -> StatusCode {
    match code {
        ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorCode::Forbidden => StatusCode::FORBIDDEN,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::InvalidArgument | ErrorCode::InvalidOperation => StatusCode::BAD_REQUEST,
        ErrorCode::Conflict => StatusCode::CONFLICT,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn respond<T: serde::Serialize>(result: Result<T, ApiError>) -> EnvelopeResponse {
    match result {
        Ok(data) => match serde_json::to_value(data) {
            Ok(value) => (StatusCode::OK, Json(Envelope::ok(value))),
            Err(err) => {
                error!(%err, "response serialization failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(Envelope::err("internal error")),
                )
            }
        },
        Err(err) => (status_for(&err.code), Json(Envelope::err(err.message))),
    }
}

async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.api.storage.health_check().await {
        Ok(()) => (StatusCode::OK, "ok"),
        Err(err) => {
            error!(%err, "health check failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "degraded")
        }
    }
}

async fn http_list_conversations(
    State(state): State<Arc<AppState>>,
    Query(q): Query<UserQuery>,
) -> EnvelopeResponse {
    respond(conversations::list_conversations(&state.api, UserId(q.user_id)).await)
}

async fn http_create_conversation(
    State(state): State<Arc<AppState>>,
    Query(q): Query<UserQuery>,
    Json(req): Json<CreateConversationRequest>,
) -> EnvelopeResponse {
    let actor = UserId(q.user_id);
    let result = match req.kind {
        ConversationKind::Direct => match req.other_user_id {
            Some(other) => conversations::create_direct(&state.api, actor, UserId(other)).await,
            None => Err(ApiError::invalid_argument(
                "direct conversation needs otherUserId",
            )),
        },
        ConversationKind::Group => {
            let members: Vec<UserId> = req.members.iter().copied().map(UserId).collect();
            conversations::create_group(
                &state.api,
                actor,
                req.name.as_deref().unwrap_or(""),
                req.description.as_deref(),
                req.avatar.as_deref(),
                &members,
            )
            .await
        }
    };
    respond(result)
}

async fn http_get_group(
    State(state): State<Arc<AppState>>,
    Path(group_id): Path<i64>,
    Query(q): Query<UserQuery>,
) -> EnvelopeResponse {
    respond(
        conversations::get_conversation(&state.api, UserId(q.user_id), ConversationId(group_id))
            .await,
    )
}

async fn http_update_group(
    State(state): State<Arc<AppState>>,
    Path(group_id): Path<i64>,
    Query(q): Query<UserQuery>,
    Json(req): Json<UpdateGroupRequest>,
) -> EnvelopeResponse {
    let avatar = req.photo.or(req.avatar);
    respond(
        membership::update_metadata(
            &state.api,
            UserId(q.user_id),
            ConversationId(group_id),
            req.name,
            req.description,
            avatar,
        )
        .await,
    )
}

async fn http_add_members(
    State(state): State<Arc<AppState>>,
    Path(group_id): Path<i64>,
    Query(q): Query<UserQuery>,
    Json(req): Json<MembersRequest>,
) -> EnvelopeResponse {
    let members: Vec<UserId> = req.members.iter().copied().map(UserId).collect();
    respond(
        membership::add_members(
            &state.api,
            UserId(q.user_id),
            ConversationId(group_id),
            &members,
        )
        .await,
    )
}

async fn http_remove_members(
    State(state): State<Arc<AppState>>,
    Path(group_id): Path<i64>,
    Query(q): Query<UserQuery>,
    Json(req): Json<MembersRequest>,
) -> EnvelopeResponse {
    let members: Vec<UserId> = req.members.iter().copied().map(UserId).collect();
    respond(
        membership::remove_members(
            &state.api,
            UserId(q.user_id),
            ConversationId(group_id),
            &members,
        )
        .await,
    )
}

async fn http_update_settings(
    State(state): State<Arc<AppState>>,
    Path(group_id): Path<i64>,
    Query(q): Query<UserQuery>,
    Json(req): Json<SettingsRequest>,
) -> EnvelopeResponse {
    respond(
        membership::update_settings(
            &state.api,
            UserId(q.user_id),
            ConversationId(group_id),
            req.only_admin_can_send,
            req.only_admin_can_edit,
        )
        .await,
    )
}

async fn http_mute_group(
    State(state): State<Arc<AppState>>,
    Path(group_id): Path<i64>,
    Query(q): Query<UserQuery>,
    Json(req): Json<MuteRequest>,
) -> EnvelopeResponse {
    respond(
        membership::mute(
            &state.api,
            UserId(q.user_id),
            ConversationId(group_id),
            req.until,
        )
        .await,
    )
}

async fn http_unmute_group(
    State(state): State<Arc<AppState>>,
    Path(group_id): Path<i64>,
    Query(q): Query<UserQuery>,
) -> EnvelopeResponse {
    respond(membership::unmute(&state.api, UserId(q.user_id), ConversationId(group_id)).await)
}

async fn http_leave_group(
    State(state): State<Arc<AppState>>,
    Path(group_id): Path<i64>,
    Query(q): Query<UserQuery>,
) -> EnvelopeResponse {
    respond(
        membership::leave(&state.api, UserId(q.user_id), ConversationId(group_id))
            .await
            .map(|()| serde_json::json!({})),
    )
}

async fn http_set_group_avatar(
    State(state): State<Arc<AppState>>,
    Path(group_id): Path<i64>,
    Query(q): Query<UserQuery>,
    Json(req): Json<AvatarRequest>,
) -> EnvelopeResponse {
    respond(
        membership::update_metadata(
            &state.api,
            UserId(q.user_id),
            ConversationId(group_id),
            None,
            None,
            Some(req.url),
        )
        .await,
    )
}

async fn http_delete_message(
    State(state): State<Arc<AppState>>,
    Path(message_id): Path<i64>,
    Query(q): Query<DeleteMessageQuery>,
) -> EnvelopeResponse {
    let actor = UserId(q.user_id);
    let message_id = MessageId(message_id);
    let scope = q.scope.unwrap_or(DeleteScope::Me);
    let result = async {
        let message = state
            .api
            .storage
            .load_message(message_id)
            .await
            .map_err(|err| {
                error!(%err, "message lookup failed");
                ApiError::new(ErrorCode::Internal, "internal error")
            })?
            .ok_or_else(|| ApiError::not_found("message not found"))?;
        deletion::delete_messages(
            &state.api,
            actor,
            message.conversation_id,
            &[message_id],
            scope,
        )
        .await
        .map(|()| serde_json::json!({}))
    };
    respond(result.await)
}

async fn http_forward_message(
    State(state): State<Arc<AppState>>,
    Query(q): Query<UserQuery>,
    Json(req): Json<ForwardRequest>,
) -> EnvelopeResponse {
    respond(
        messages::forward_message(
            &state.api,
            UserId(q.user_id),
            MessageId(req.source_message_id),
            ConversationId(req.target_conversation_id),
        )
        .await,
    )
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
