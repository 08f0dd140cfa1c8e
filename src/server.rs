//! 控制面模块 - 面向仪表盘的 HTTP API

use crate::audit::{AuditError, AuditManager};
use crate::config::Config;
use crate::discovery;
use crate::laravel::{self, PerformanceEntry};
use crate::monitor::{self, Monitor, MonitorStatus, SystemStats};
use crate::scheduler;
use crate::store::PerfStore;
use crate::watchdog::Watchdog;
use anyhow::Result;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info};

/// 内存条目存储容量
const STORE_LIMIT: usize = 100;

/// 各组件的共享持有者
///
/// 调度器是 Monitor 句柄表与 Watchdog 事件槽的唯一写者；
/// HTTP 处理器只读聚合快照，或做按路径独立的写入。
pub struct AppState {
    pub config: RwLock<Config>,
    pub monitor: Mutex<Monitor>,
    /// 调度器每次 tick 发布的统计快照
    pub latest_stats: RwLock<SystemStats>,
    pub store: PerfStore,
    pub watchdog: Watchdog,
    pub audits: AuditManager,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(config: Config) -> SharedState {
        Arc::new(Self {
            config: RwLock::new(config),
            monitor: Mutex::new(Monitor::new()),
            latest_stats: RwLock::new(SystemStats::default()),
            store: PerfStore::new(STORE_LIMIT),
            watchdog: Watchdog::new(),
            audits: AuditManager::new(),
        })
    }
}

/// 组装路由；本地仪表盘跨域访问全放行
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/projects", get(projects))
        .route("/projects/logs", get(project_logs))
        .route("/projects/performance", get(performance))
        .route("/projects/performance/clear", post(performance_clear))
        .route("/projects/deadlocks", get(project_deadlocks))
        .route("/projects/routes", get(project_routes))
        .route("/projects/ingest", post(ingest))
        .route("/audit/enable", post(audit_enable))
        .route("/audit/disable", post(audit_disable))
        .route("/audit/status", get(audit_status))
        .route("/telemetry", get(telemetry))
        .route("/alerts", get(alerts))
        .route("/config", get(get_config).post(update_config))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// 启动调度器并开始服务
pub async fn serve(state: SharedState) -> Result<()> {
    let addr = state.config.read().unwrap().listen_addr();

    tokio::spawn(scheduler::run(state.clone()));

    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    info!("Sentinel Agent 监听 http://{}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

#[derive(Deserialize)]
struct ProjectsQuery {
    #[serde(default)]
    include_ignored: bool,
}

async fn projects(
    State(state): State<SharedState>,
    Query(query): Query<ProjectsQuery>,
) -> Response {
    let (root, ignored) = {
        let cfg = state.config.read().unwrap();
        let ignored = if query.include_ignored {
            Vec::new()
        } else {
            cfg.ignored_projects.clone()
        };
        (cfg.workspace_root.clone(), ignored)
    };

    match discovery::find_projects(Path::new(&root), &ignored) {
        Ok(found) => Json(found).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

#[derive(Deserialize)]
struct PathQuery {
    path: String,
}

async fn project_logs(Query(query): Query<PathQuery>) -> Json<serde_json::Value> {
    let lines = laravel::recent_logs(Path::new(&query.path), 50);
    Json(json!({ "lines": lines }))
}

/// 文件日志解析结果与内存 Store 合并返回
async fn performance(
    State(state): State<SharedState>,
    Query(query): Query<PathQuery>,
) -> Json<Vec<PerformanceEntry>> {
    let mut metrics = laravel::performance_logs(Path::new(&query.path));
    metrics.extend(state.store.get_all());
    Json(metrics)
}

async fn performance_clear(State(state): State<SharedState>) -> StatusCode {
    state.store.clear();
    StatusCode::OK
}

async fn project_deadlocks(Query(query): Query<PathQuery>) -> Json<Vec<laravel::DeadlockEntry>> {
    Json(laravel::deadlocks(Path::new(&query.path)))
}

/// 路由表来自项目内的 artisan，执行失败按 500 上报
async fn project_routes(Query(query): Query<PathQuery>) -> Response {
    match laravel::routes(Path::new(&query.path)).await {
        Ok(routes) => Json(routes).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

/// 探针直报入口；JSON 非法时由提取器以 400 拒绝
async fn ingest(State(state): State<SharedState>, Json(entry): Json<PerformanceEntry>) -> StatusCode {
    debug!(method = %entry.method, uri = %entry.uri, duration_ms = entry.duration_ms, "收到性能条目");
    state.store.add(entry);
    StatusCode::OK
}

#[derive(Deserialize)]
struct AuditRequest {
    path: String,
}

async fn audit_enable(
    State(state): State<SharedState>,
    Json(req): Json<AuditRequest>,
) -> Response {
    info!(project = %req.path, "收到审计开启请求");
    match state.audits.enable(&req.path) {
        Ok(()) => Json(json!({ "status": "started" })).into_response(),
        Err(e @ AuditError::AlreadyActive(_)) => {
            (StatusCode::CONFLICT, e.to_string()).into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn audit_disable(
    State(state): State<SharedState>,
    Json(req): Json<AuditRequest>,
) -> Response {
    match state.audits.disable(&req.path) {
        Ok(()) => Json(json!({ "status": "stopped" })).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn audit_status(State(state): State<SharedState>) -> Response {
    Json(state.audits.status()).into_response()
}

async fn telemetry(State(state): State<SharedState>) -> Json<MonitorStatus> {
    let stats = state.latest_stats.read().unwrap().clone();
    Json(MonitorStatus {
        php_fpm: monitor::runtime_detected(&stats).await,
        system_stats: stats,
    })
}

/// 当前在期事件，无则 204
async fn alerts(State(state): State<SharedState>) -> Response {
    match state.watchdog.latest() {
        Some(incident) => Json(incident).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

async fn get_config(State(state): State<SharedState>) -> Json<Config> {
    Json(state.config.read().unwrap().clone())
}

async fn update_config(State(state): State<SharedState>, Json(new_config): Json<Config>) -> Response {
    let saved = {
        let mut cfg = state.config.write().unwrap();
        *cfg = new_config;
        cfg.clone()
    };

    // 落盘在锁外
    if let Err(e) = saved.save() {
        return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }

    Json(json!({ "status": "updated", "message": "配置已保存，重启后生效" })).into_response()
}
