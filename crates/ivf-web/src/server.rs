//! Web服务器

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use ivf_core::{IvfError, Result};
use std::net::SocketAddr;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

use crate::auth::auth_middleware;
use crate::handlers::*;
use crate::state::AppState;

pub struct WebServer {
    addr: SocketAddr,
    app: Router,
}

impl WebServer {
    pub fn new(addr: SocketAddr, state: AppState) -> Self {
        Self {
            addr,
            app: create_app(state),
        }
    }

    pub async fn run(self) -> Result<()> {
        info!("Starting web server on {}", self.addr);

        let listener = tokio::net::TcpListener::bind(self.addr)
            .await
            .map_err(|e| IvfError::Internal(format!("Failed to bind {}: {}", self.addr, e)))?;
        axum::serve(listener, self.app)
            .await
            .map_err(|e| IvfError::Internal(format!("Failed to start web server: {}", e)))?;

        Ok(())
    }
}

/// 构建完整路由
pub fn create_app(state: AppState) -> Router {
    Router::new()
        // 根路径
        .route("/", get(api_root))
        // 健康检查
        .route("/health", get(health))
        // API路由
        .nest(API_PREFIX, api_routes(state.clone()))
        // 全局中间件
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                ),
        )
        .with_state(state)
}

/// API v1 路由；每个请求先经过认证中间件
fn api_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/", get(api_root))
        // 账户
        .route("/accounts/register", post(register))
        .route("/accounts/login", post(login))
        .route("/accounts/logout", post(logout))
        .route("/accounts/set-password", post(set_password))
        .route("/accounts/me", get(get_me).delete(delete_me))
        .route("/accounts/:id/activate", post(activate_account))
        .route("/profile", get(get_profile).patch(update_profile))
        // 推荐
        .route("/referrals", get(list_referrals).post(create_referral))
        .route("/referrals/:token", get(get_referral).delete(delete_referral))
        .route("/referral-relationships", get(list_relationships))
        .route("/referral-relationships/:token", get(get_relationship))
        // 患者
        .route("/patients", get(list_patients).post(create_patient))
        .route(
            "/patients/:id",
            get(get_patient).patch(update_patient).delete(delete_patient),
        )
        // 预测
        .route("/predictions", get(list_predictions).post(create_prediction))
        .route("/predictions/:id", get(get_prediction).delete(delete_prediction))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}
