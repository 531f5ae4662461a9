use axum::{
    extract::{Path, Query, State, WebSocketUpgrade},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use uuid::Uuid;

use application::{AuthenticateUserRequest, MessageDto, RegisterUserRequest, UserDto};
use domain::{User, UserId};

use crate::{error::ApiError, state::AppState, ws_connection};

#[derive(Debug, Deserialize)]
struct CredentialsPayload {
    username: String,
    password: String,
}

#[derive(Debug, Default, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// 注册 / 登录响应
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub user: UserDto,
    pub token: String,
}

pub fn router(state: AppState) -> Router {
    let cors = cors_layer(&state.settings.cors_origins);
    let uploads = ServeDir::new(&state.settings.uploads_dir);

    Router::new()
        .route("/health", get(health))
        .route("/auth/register", post(register_user))
        .route("/auth/login", post(login_user))
        .route("/auth/logout", post(logout_user))
        .route("/people", get(list_people))
        .route("/messages/{user_id}", get(get_conversation))
        .route("/ws", get(websocket_upgrade))
        .nest_service("/uploads", uploads)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!(origin = %origin, error = %err, "忽略无效的 CORS 来源");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

async fn health() -> StatusCode {
    StatusCode::OK
}

fn session_response(
    state: &AppState,
    status: StatusCode,
    user: &User,
) -> Result<Response, ApiError> {
    let token = state
        .jwt_service
        .generate_token(user.id, user.username.as_str())?;
    let cookie = state.jwt_service.session_cookie(&token);
    let body = SessionResponse {
        user: UserDto::from(user),
        token,
    };
    Ok((status, [(header::SET_COOKIE, cookie)], Json(body)).into_response())
}

async fn register_user(
    State(state): State<AppState>,
    Json(payload): Json<CredentialsPayload>,
) -> Result<Response, ApiError> {
    let user = state
        .user_service
        .register(RegisterUserRequest {
            username: payload.username,
            password: payload.password,
        })
        .await?;

    tracing::info!(user_id = %user.id, username = %user.username, "用户注册成功");
    session_response(&state, StatusCode::CREATED, &user)
}

async fn login_user(
    State(state): State<AppState>,
    Json(payload): Json<CredentialsPayload>,
) -> Result<Response, ApiError> {
    let user = state
        .user_service
        .authenticate(AuthenticateUserRequest {
            username: payload.username,
            password: payload.password,
        })
        .await?;

    tracing::info!(user_id = %user.id, "用户登录成功");
    session_response(&state, StatusCode::OK, &user)
}

async fn logout_user(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::SET_COOKIE, state.jwt_service.expired_cookie())],
        Json("ok"),
    )
}

async fn list_people(State(state): State<AppState>) -> Result<Json<Vec<UserDto>>, ApiError> {
    let people = state
        .user_service
        .directory()
        .await?
        .into_iter()
        .map(UserDto::from)
        .collect();
    Ok(Json(people))
}

async fn get_conversation(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
) -> Result<Json<Vec<MessageDto>>, ApiError> {
    let viewer = state
        .jwt_service
        .authenticate_request(&headers, query.token.as_deref())?;

    let messages = state
        .history_service
        .conversation(viewer, UserId::from(user_id))
        .await?;
    Ok(Json(messages))
}

async fn websocket_upgrade(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    // 握手阶段只提取凭证，校验在升级之后进行，失败时以关闭帧拒绝
    let credential = crate::auth::extract_credential(
        &headers,
        query.token.as_deref(),
        state.jwt_service.cookie_name(),
    );
    ws.on_upgrade(move |socket| ws_connection::handle_socket(socket, state, credential))
}
