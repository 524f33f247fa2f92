use crate::config::AppConfig;
use crate::context::AppContext;
use crate::districts::SelectorOption;
use crate::export;
use crate::types::{DistrictSelector, ALL_DISTRICTS};
use anyhow::{Context, Result};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use serde_json::Value;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

const INDEX_HTML: &str = include_str!("../static/index.html");

pub struct AppState {
    pub context: AppContext,
    pub title: String,
    pub export_path: PathBuf,
    exported: AtomicBool,
}

impl AppState {
    pub fn new(context: AppContext, config: &AppConfig) -> Self {
        AppState {
            context,
            title: config.view.title.clone(),
            export_path: config.output.export_html.clone(),
            exported: AtomicBool::new(false),
        }
    }
}

#[derive(Deserialize)]
pub struct ViewParams {
    district: Option<String>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/api/districts", get(districts_handler))
        .route("/api/view", get(view_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn start_server(config: AppConfig, context: AppContext) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", config.server.host, config.server.port))?;

    let state = Arc::new(AppState::new(context, &config));
    let app = router(state);

    info!("Starting server on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn index_handler(State(state): State<Arc<AppState>>) -> Html<String> {
    Html(INDEX_HTML.replace("{{TITLE}}", &export::escape_html(&state.title)))
}

async fn districts_handler(State(state): State<Arc<AppState>>) -> Json<Vec<SelectorOption>> {
    Json(state.context.districts.options())
}

async fn view_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ViewParams>,
) -> Response {
    let selector = DistrictSelector::parse(params.district.as_deref().unwrap_or(ALL_DISTRICTS));

    let worker = Arc::clone(&state);
    let rendered = tokio::task::spawn_blocking(move || {
        worker
            .context
            .render(&selector)
            .map(|view| view.to_figure())
    })
    .await;

    match rendered {
        Ok(Ok(figure)) => {
            export_once(&state, &figure);
            Json(figure).into_response()
        }
        Ok(Err(e)) => {
            error!("{}", e);
            (StatusCode::NOT_FOUND, e.to_string()).into_response()
        }
        Err(e) => {
            error!("View task failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

// Best effort, off the request path.
fn export_once(state: &Arc<AppState>, figure: &Value) {
    if state.exported.swap(true, Ordering::SeqCst) {
        return;
    }
    let path = state.export_path.clone();
    let title = state.title.clone();
    let figure = figure.clone();
    tokio::task::spawn_blocking(move || match export::write_if_absent(&path, &title, &figure) {
        Ok(true) => info!("Wrote static export to {:?}", path),
        Ok(false) => {}
        Err(e) => warn!("Static export skipped: {:#}", e),
    });
}
