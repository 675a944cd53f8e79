//! HTTP 路由

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{ConnectInfo, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use cg_core::Identity;
use cg_stream::{ChannelSink, CompletionRequest, ExecutorError, StreamExecutor};

/// 上游认证层注入的用户 ID
pub const USER_ID_HEADER: &str = "x-user-id";
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";
pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

#[derive(Clone)]
pub struct AppState {
    pub executor: Arc<StreamExecutor>,
    pub admin_token: Option<Arc<str>>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/completion", post(completion))
        .route("/api/credits", get(credits))
        .route("/api/admin/credits/reset", post(reset_credits))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// 按 `x-user-id` → `x-forwarded-for` 首项 → 对端地址 的顺序识别调用方
pub fn identify(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<Identity> {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    let user_id = header(USER_ID_HEADER);
    let ip = header(FORWARDED_FOR_HEADER)
        .and_then(|list| list.split(',').next())
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
        .or_else(|| peer.map(|addr| addr.ip().to_string()));

    Identity::resolve(user_id, ip.as_deref())
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

async fn completion(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(request): Json<CompletionRequest>,
) -> Response {
    let identity = identify(&headers, peer.map(|ConnectInfo(addr)| addr));

    let admission = match state.executor.admit(identity.as_ref(), request).await {
        Ok(admission) => admission,
        Err(ExecutorError::Unidentified) => {
            return error_response(StatusCode::UNAUTHORIZED, "Unable to identify the caller");
        }
        Err(ExecutorError::QuotaExceeded { remaining, .. }) => {
            return (
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({
                    "error": "You have reached the daily limit of requests",
                    "remaining": remaining,
                })),
            )
                .into_response();
        }
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    };

    let cancel = CancellationToken::new();
    let (sink, rx) = ChannelSink::channel();

    let executor = state.executor.clone();
    let run_cancel = cancel.clone();
    tokio::spawn(async move {
        // 失败已写出终止帧并记录
        if let Err(e) = executor.run(admission, run_cancel, Arc::new(sink)).await {
            debug!(error = %e, "Completion stream ended with error");
        }
    });

    // 响应体被丢弃 (客户端断开) 时取消会话
    let body = Body::from_stream(frame_stream(rx, cancel.drop_guard()));
    (
        [(CONTENT_TYPE, "text/event-stream"), (CACHE_CONTROL, "no-cache")],
        body,
    )
        .into_response()
}

fn frame_stream(
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    guard: DropGuard,
) -> impl futures::Stream<Item = Result<Bytes, Infallible>> {
    futures::stream::unfold((rx, guard), |(mut rx, guard)| async move {
        loop {
            match rx.recv().await {
                // 刷新标记：每段本身就会立即写出
                Some(chunk) if chunk.is_empty() => continue,
                Some(chunk) => return Some((Ok(Bytes::from(chunk)), (rx, guard))),
                None => return None,
            }
        }
    })
}

async fn credits(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Response {
    let Some(identity) = identify(&headers, peer.map(|ConnectInfo(addr)| addr)) else {
        return error_response(StatusCode::UNAUTHORIZED, "Unable to identify the caller");
    };

    let ledger = state.executor.ledger();
    let remaining = ledger.remaining(&identity).await;
    Json(json!({
        "remaining": remaining,
        "dailyQuota": ledger.daily_quota(identity.kind()),
        "kind": identity.kind().as_str(),
    }))
    .into_response()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResetRequest {
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    ip: Option<String>,
}

async fn reset_credits(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ResetRequest>,
) -> Response {
    let Some(expected) = state.admin_token.as_deref() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let provided = headers.get(ADMIN_TOKEN_HEADER).and_then(|v| v.to_str().ok());
    if provided != Some(expected) {
        warn!("Rejected admin credit reset with bad token");
        return error_response(StatusCode::UNAUTHORIZED, "Invalid admin token");
    }

    let Some(identity) = Identity::resolve(body.user_id.as_deref(), body.ip.as_deref()) else {
        return error_response(StatusCode::BAD_REQUEST, "Either userId or ip is required");
    };

    let remaining = state.executor.ledger().force_reset(&identity).await;
    info!(identity = %identity, remaining, "Credits force-reset");
    Json(json!({ "remaining": remaining })).into_response()
}
