//! HTTP 服务：创建、查询、停止会话，并通过 SSE 推送搜索进度

use crate::config::{GoalSettings, ServerSettings};
use crate::interfaces::{Interface, Message};
use crate::session::{OptimizationService, SessionSnapshot, SessionSummary, UpdateToken};
use crate::structure::Structure;
use crate::Error;
use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::{Method, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::stream::Stream;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tracing::{info, warn};
use uuid::Uuid;

/// HTTP API 响应类型
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ApiResponse<T> {
    #[serde(rename = "success")]
    Success { result: T },
    #[serde(rename = "error")]
    Error { error: String },
}

/// 把错误映射为对应的状态码
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(value: Error) -> Self {
        Self(value)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::InvalidStructure { .. }
            | Error::EmptyStructure
            | Error::InvalidGoal(_)
            | Error::SlotCountMismatch { .. }
            | Error::CountOutOfRange { .. } => StatusCode::BAD_REQUEST,
            Error::SessionNotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ApiResponse::<()>::Error {
            error: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// 应用状态
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<OptimizationService>,
    /// SSE 广播发送器
    pub messages: broadcast::Sender<Message>,
}

/// 搜索线程中的消息先进入 MPSC，再由异步任务转发到广播通道
pub struct Broadcaster {
    sender: mpsc::UnboundedSender<Message>,
}

impl Broadcaster {
    /// 创建转发器和广播通道，必须在 tokio 运行时中调用
    pub fn channel(capacity: usize) -> (Self, broadcast::Sender<Message>) {
        let (broadcast_tx, _) = broadcast::channel(capacity);
        let (sender, mut receiver) = mpsc::unbounded_channel::<Message>();
        let forward = broadcast_tx.clone();
        tokio::spawn(async move {
            while let Some(message) = receiver.recv().await {
                // 没有订阅者时丢弃
                let _ = forward.send(message);
            }
        });
        (Self { sender }, broadcast_tx)
    }
}

impl Interface for Broadcaster {
    fn post(&self, message: Message) {
        if self.sender.send(message).is_err() {
            warn!("消息转发任务已退出");
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneticRequest {
    pub structure: Structure,
    #[serde(default)]
    pub goal_settings: GoalSettings,
}

#[derive(Debug, Serialize)]
pub struct Created {
    pub id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct SinceQuery {
    pub since: Option<UpdateToken>,
}

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub session: Option<Uuid>,
}

fn success<T>(result: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse::Success { result })
}

/// HTTP API: 开始随机搜索
pub async fn start_random(
    State(state): State<AppState>,
    Json(structure): Json<Structure>,
) -> Result<Json<ApiResponse<Created>>, ApiError> {
    info!("POST /api/simulations/random");
    let id = state.service.start_random(&structure)?;
    Ok(success(Created { id }))
}

/// HTTP API: 开始遗传算法
pub async fn start_genetic(
    State(state): State<AppState>,
    Json(request): Json<GeneticRequest>,
) -> Result<Json<ApiResponse<Created>>, ApiError> {
    info!("POST /api/simulations/genetic");
    let id = state
        .service
        .start_genetic(&request.structure, request.goal_settings)?;
    Ok(success(Created { id }))
}

/// HTTP API: 列出所有会话
pub async fn list_simulations(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<SessionSummary>>>, ApiError> {
    Ok(success(state.service.list_sessions()?))
}

/// HTTP API: 查询会话；带上 since 令牌且会话没有变化时返回 304
pub async fn get_simulation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<SinceQuery>,
) -> Result<Response, ApiError> {
    let snapshot: Option<SessionSnapshot> = match query.since {
        Some(token) => state.service.get_session_since(id, token)?,
        None => Some(state.service.get_session(id)?),
    };
    Ok(match snapshot {
        Some(snapshot) => success(snapshot).into_response(),
        None => StatusCode::NOT_MODIFIED.into_response(),
    })
}

/// HTTP API: 停止会话
pub async fn stop_simulation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    info!("POST /api/simulations/{id}/stop");
    state.service.stop_session(id)?;
    Ok(success(()))
}

/// SSE 处理函数，可以用 session 参数只订阅一个会话
pub async fn sse_handler(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
) -> Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>> {
    let mut receiver = state.messages.subscribe();
    let stream = async_stream::stream! {
        info!("[SSE] 连接建立");
        let mut count = 0;
        loop {
            match receiver.recv().await {
                Ok(message) => {
                    if query.session.is_some_and(|id| id != message.session()) {
                        continue;
                    }
                    if let Ok(json) = serde_json::to_string(&message) {
                        count += 1;
                        yield Ok(Event::default().data(json));
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("[SSE] 客户端过慢，跳过 {} 条消息", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!("[SSE] 连接关闭，共发送 {} 条消息", count);
                    break;
                }
            }
        }
    };
    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// 创建应用路由
pub fn create_app(state: AppState, request_timeout: Duration) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);
    Router::new()
        .route("/api/simulations", get(list_simulations))
        .route("/api/simulations/random", post(start_random))
        .route("/api/simulations/genetic", post(start_genetic))
        .route("/api/simulations/{id}", get(get_simulation))
        .route("/api/simulations/{id}/stop", post(stop_simulation))
        .route("/sse/simulations", get(sse_handler))
        .layer(
            ServiceBuilder::new()
                .layer(DefaultBodyLimit::max(16 * 1024 * 1024))
                .layer(cors)
                .layer(TimeoutLayer::with_status_code(
                    StatusCode::REQUEST_TIMEOUT,
                    request_timeout,
                )),
        )
        .with_state(state)
}

/// 启动服务器
pub async fn start_server(
    service: Arc<OptimizationService>,
    messages: broadcast::Sender<Message>,
    settings: ServerSettings,
) -> Result<(), Error> {
    let state = AppState { service, messages };
    let app = create_app(state, Duration::from_secs(settings.request_timeout_secs));
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", settings.port)).await?;
    info!("Listening on: http://{}", listener.local_addr()?);
    info!("   POST /api/simulations/random      - 开始随机搜索");
    info!("   POST /api/simulations/genetic     - 开始遗传算法");
    info!("   GET  /api/simulations             - 会话列表");
    info!("   GET  /api/simulations/{{id}}        - 查询会话");
    info!("   POST /api/simulations/{{id}}/stop   - 停止会话");
    info!("   GET  /sse/simulations             - SSE 实时进度推送");
    axum::serve(listener, app).await?;
    Ok(())
}
