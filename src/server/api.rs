use super::AppContext;
use crate::error::ChatError;
use axum::{
    routing::get,
    Router,
    extract::State,
    response::{ Html, IntoResponse },
    http::StatusCode,
    Json,
};
use serde::Serialize;
use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{ Any, CorsLayer };
use log::{ info, error, warn };

const INDEX_HTML: &str = include_str!("../../static/index.html");

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
pub struct ConfigResponse {
    pub ws_port: u16,
    pub ollama_host: String,
    pub default_model: String,
    pub temperature: f64,
    pub context_length: u32,
    pub version: &'static str,
}

#[derive(Serialize)]
struct ModelsResponse {
    models: Vec<String>,
}

#[derive(Serialize)]
struct ErrorResponse {
    kind: &'static str,
    message: String,
}

pub fn router(context: Arc<AppContext>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(index_handler))
        .route("/api/health", get(health_handler))
        .route("/api/config", get(config_handler))
        .route("/api/models", get(models_handler))
        .layer(cors)
        .with_state(context)
}

pub async fn start_http_server(
    addr: SocketAddr,
    context: Arc<AppContext>
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Starting HTTP server on: http://{}", listener.local_addr()?);
    let app = router(context);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app.into_make_service()).await {
            error!("HTTP server error: {}", e);
        }
    });

    Ok(())
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn config_handler(State(context): State<Arc<AppContext>>) -> Json<ConfigResponse> {
    Json(ConfigResponse {
        ws_port: context.ws_port,
        ollama_host: context.client.get_base_url(),
        default_model: context.defaults.model_name().to_string(),
        temperature: context.defaults.temperature(),
        context_length: context.defaults.context_length(),
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn models_handler(State(context): State<Arc<AppContext>>) -> impl IntoResponse {
    match context.client.list_models().await {
        Ok(models) => (StatusCode::OK, Json(ModelsResponse { models })).into_response(),
        Err(e) => {
            warn!("Listing models failed: {}", e);
            let status = match e {
                ChatError::Connection { .. } | ChatError::Timeout(_) => StatusCode::BAD_GATEWAY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (status, Json(ErrorResponse { kind: e.kind(), message: e.to_string() })).into_response()
        }
    }
}
