use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tidecord_http::{HttpError, Method, RestClient, RestConfig};
use tidecord_models::message::CreateMessage;
use tidecord_models::Snowflake;

// ── Fake API ────────────────────────────────────────────────────────────────

#[derive(Default)]
struct ApiState {
    message_posts: AtomicU32,
    always_limited_hits: AtomicU32,
}

async fn create_message(
    State(state): State<Arc<ApiState>>,
    Path(channel_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    if auth != "Bot secret" {
        return (StatusCode::UNAUTHORIZED, Json(json!({"code": 0, "message": "401: Unauthorized"})))
            .into_response();
    }

    // The first post is rejected with a short route-scoped limit.
    if state.message_posts.fetch_add(1, Ordering::SeqCst) == 0 {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            [("x-ratelimit-bucket", "msg-bucket")],
            Json(json!({"message": "You are being rate limited.", "retry_after": 0.2, "global": false})),
        )
            .into_response();
    }

    (
        StatusCode::OK,
        [("x-ratelimit-bucket", "msg-bucket"), ("x-ratelimit-remaining", "4")],
        Json(json!({
            "id": "900",
            "channel_id": channel_id,
            "author": {"id": "1", "username": "bot", "bot": true},
            "content": body["content"],
        })),
    )
        .into_response()
}

async fn missing_guild() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"code": 10004, "message": "Unknown Guild"})),
    )
}

async fn always_limited(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    state.always_limited_hits.fetch_add(1, Ordering::SeqCst);
    (
        StatusCode::TOO_MANY_REQUESTS,
        [("retry-after", "0.01")],
        "",
    )
}

async fn empty_ok() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn spawn_api() -> anyhow::Result<(String, Arc<ApiState>)> {
    let state = Arc::new(ApiState::default());
    let app = Router::new()
        .route("/api/v10/channels/{channel_id}/messages", post(create_message))
        .route("/api/v10/guilds/404", get(missing_guild))
        .route("/api/v10/limited", get(always_limited))
        .route("/api/v10/empty", post(empty_ok))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let base = format!("http://{}/api/v10/", listener.local_addr()?);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok((base, state))
}

fn client(base: &str, token: &str, max_retries: u32) -> anyhow::Result<RestClient> {
    Ok(RestClient::new(
        token,
        RestConfig {
            base_url: base.to_string(),
            timeout: Duration::from_secs(5),
            max_retries,
            ..RestConfig::default()
        },
    )?)
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn rate_limited_post_is_retried_after_retry_after() -> anyhow::Result<()> {
    let (base, state) = spawn_api().await?;
    let rest = client(&base, "secret", 3)?;

    let started = Instant::now();
    let message = rest
        .create_message(
            Snowflake::new(42),
            &CreateMessage {
                content: "hello".into(),
                ..CreateMessage::default()
            },
        )
        .await?;

    assert!(started.elapsed() >= Duration::from_millis(200));
    assert_eq!(state.message_posts.load(Ordering::SeqCst), 2);
    assert_eq!(message.content, "hello");
    assert_eq!(message.channel_id, Snowflake::new(42));
    assert_eq!(
        rest.limiter().bucket_of("/channels/42/messages").as_deref(),
        Some("msg-bucket")
    );
    Ok(())
}

#[tokio::test]
async fn api_errors_carry_status_code_and_message() -> anyhow::Result<()> {
    let (base, _state) = spawn_api().await?;
    let rest = client(&base, "secret", 3)?;

    let err = rest.get_guild(Snowflake::new(404)).await.unwrap_err();
    match &err {
        HttpError::Status { status, code, message } => {
            assert_eq!(*status, 404);
            assert_eq!(*code, 10004);
            assert_eq!(message, "Unknown Guild");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.is_not_found());

    let unauthorized = client(&base, "wrong", 0)?
        .create_message(Snowflake::new(1), &CreateMessage::default())
        .await
        .unwrap_err();
    assert_eq!(unauthorized.status(), Some(401));
    Ok(())
}

#[tokio::test]
async fn retries_are_bounded() -> anyhow::Result<()> {
    let (base, state) = spawn_api().await?;
    let rest = client(&base, "secret", 2)?;

    let err = rest
        .request::<Value, ()>(Method::GET, "limited", None)
        .await
        .unwrap_err();
    assert!(matches!(err, HttpError::RateLimited { attempts: 3, .. }));
    assert_eq!(state.always_limited_hits.load(Ordering::SeqCst), 3);
    Ok(())
}

#[tokio::test]
async fn empty_response_decodes_as_unit() -> anyhow::Result<()> {
    let (base, _state) = spawn_api().await?;
    let rest = client(&base, "secret", 0)?;
    let () = rest
        .request(Method::POST, "/empty", Some(&json!({})))
        .await?;
    Ok(())
}
