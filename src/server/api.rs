//! api.rs — Rutas HTTP: /health, /kpis, /zones, /map/zones, /risk, /stats, /telemetry, /history

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header::CONTENT_TYPE, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, services::ServeDir};
use tracing::warn;

use crate::engine::RiskEngine;
use crate::grid::to_geojson;
use crate::history::{self, HistoryStats};
use crate::models::types::{RiskView, RiskZone, Status, TelemetrySample};
use crate::telemetry::{MemoryStream, TelemetryStream};

#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<RiskEngine>,
    pub stream: Arc<MemoryStream>,
    pub risk: watch::Receiver<Option<RiskView>>,
    pub history_limit: usize,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/kpis", get(get_kpis))
        .route("/zones", get(get_zones))
        .route("/map/zones", get(get_zones_geojson))
        .route("/risk", get(get_risk))
        .route("/stats", get(get_stats))
        .route("/telemetry", get(get_telemetry).post(post_telemetry))
        .route("/history", get(get_history))
        .fallback_service(ServeDir::new("web"))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(CompressionLayer::new())
}

async fn get_kpis(State(st): State<ApiState>) -> impl IntoResponse {
    Json(st.engine.kpis(st.stream.len().await).await)
}

#[derive(Serialize)]
struct ZonesOut {
    snapshot_ts_utc: String,
    reference: Option<[f64; 2]>,
    zones: Vec<RiskZone>,
}

async fn get_zones(State(st): State<ApiState>) -> impl IntoResponse {
    let snap = st.engine.zones().await;
    Json(ZonesOut {
        snapshot_ts_utc: snap.ts_utc,
        reference: snap.reference.map(|(a, b)| [a, b]),
        zones: snap.zones.as_ref().clone(),
    })
}

/// GeoJSON del snapshot actual; 204 si aún no hay zonas.
async fn get_zones_geojson(State(st): State<ApiState>) -> Response {
    let snap = st.engine.zones().await;
    if snap.zones.is_empty() {
        return StatusCode::NO_CONTENT.into_response();
    }
    let synthetic = st.engine.grid().await.is_synthetic();
    let fc = to_geojson(&snap.zones, synthetic);
    match serde_json::to_string(&fc) {
        Ok(body) => ([(CONTENT_TYPE, "application/geo+json; charset=utf-8")], body).into_response(),
        Err(e) => {
            warn!("map/zones: {e:?}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn get_risk(State(st): State<ApiState>) -> Response {
    let view = st.risk.borrow().clone();
    match view {
        Some(v) => Json(v).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

#[derive(Serialize)]
struct StatsOut {
    #[serde(flatten)]
    stats: HistoryStats,
    status: Status,
    alert: String,
}

/// Estadísticas de la ventana reciente y alerta de la última lectura.
async fn get_stats(State(st): State<ApiState>, Query(q): Query<LimitQuery>) -> Response {
    let limit = q.limit.unwrap_or(st.history_limit);
    let recent = match st.stream.recent(limit).await {
        Ok(r) => r,
        Err(e) => {
            warn!("stats limit={limit}: {e:?}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    let stats = HistoryStats::from_samples(&recent);
    let (status, alert) = match recent.last() {
        Some(s) => (Status::from_readings(s.temperature, s.humidity), Status::alert_message(s.temperature, s.humidity)),
        None => (Status::Normal, Status::alert_message(0.0, 0.0)),
    };
    Json(StatsOut { stats, status, alert }).into_response()
}

async fn get_telemetry(State(st): State<ApiState>, Query(q): Query<LimitQuery>) -> Response {
    let limit = q.limit.unwrap_or(st.history_limit);
    match st.stream.recent(limit).await {
        Ok(v) => Json(v).into_response(),
        Err(e) => {
            warn!("telemetry limit={limit}: {e:?}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn post_telemetry(State(st): State<ApiState>, Json(sample): Json<TelemetrySample>) -> StatusCode {
    match st.stream.publish(sample).await {
        Ok(()) => StatusCode::ACCEPTED,
        Err(e) => {
            warn!("publish: {e:?}");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

/// Rango [start, end] más nuevo primero; sin parámetros, la última hora.
async fn get_history(State(st): State<ApiState>, Query(q): Query<HistoryQuery>) -> impl IntoResponse {
    let all = st.stream.snapshot().await;
    let now = Utc::now();
    let out = match (q.start, q.end) {
        (None, None) => history::last_hour(&all, now),
        (start, end) => history::range(&all, start.unwrap_or(DateTime::<Utc>::MIN_UTC), end.unwrap_or(now)),
    };
    Json(out)
}
