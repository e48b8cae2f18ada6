//! dashboard.rs
//!
//! Lado consumidor del flujo: por cada muestra nueva se puntúa la media de
//! la ventana reciente en la última posición y se entrega al throttle, que
//! publica la vista en un canal `watch` (lo que sirve `/risk`).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, watch};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::engine::RiskEngine;
use crate::history::HistoryStats;
use crate::models::types::{RiskView, Status, TelemetrySample};
use crate::telemetry::{MemoryStream, TelemetryStream};
use crate::throttle::UpdateThrottle;

/// Contexto que acompaña al riesgo hasta el consumidor.
#[derive(Clone, Debug, PartialEq)]
pub struct RiskContext {
    pub avg_temp: f64,
    pub avg_hum: f64,
    pub lat: f64,
    pub lon: f64,
}

pub type RiskThrottle = UpdateThrottle<f64, RiskContext>;

pub fn risk_throttle(interval: Duration, tx: watch::Sender<Option<RiskView>>) -> RiskThrottle {
    UpdateThrottle::new(interval, move |risk: f64, ctx: RiskContext| {
        let view = RiskView {
            risk,
            status: Status::from_risk(risk),
            avg_temp: ctx.avg_temp,
            avg_hum: ctx.avg_hum,
            lat: ctx.lat,
            lon: ctx.lon,
            ts_utc: Utc::now().to_rfc3339(),
        };
        // sin receptores no hay nada que hacer
        let _ = tx.send(Some(view));
    })
}

pub struct Dashboard {
    pub engine: Arc<RiskEngine>,
    pub stream: Arc<MemoryStream>,
    pub throttle: Arc<RiskThrottle>,
    pub history_limit: usize,
}

impl Dashboard {
    /// Contexto de la ventana reciente terminada en `latest`: las últimas
    /// `history_limit` muestras con `timestamp <= latest.timestamp`. Si el
    /// consumidor va retrasado, las muestras posteriores no entran en la media.
    pub async fn window_context(&self, latest: &TelemetrySample) -> RiskContext {
        let mut window: Vec<TelemetrySample> = self
            .stream
            .snapshot()
            .await
            .into_iter()
            .filter(|s| s.timestamp <= latest.timestamp)
            .collect();
        let extra = window.len().saturating_sub(self.history_limit);
        window.drain(..extra);
        if window.is_empty() {
            window.push(latest.clone());
        }
        let stats = HistoryStats::from_samples(&window);
        RiskContext { avg_temp: stats.avg_temp, avg_hum: stats.avg_hum, lat: latest.latitude, lon: latest.longitude }
    }

    /// Puntúa en una tarea aparte; el ticket se toma antes para respetar el orden de llegada.
    pub async fn on_sample(&self, sample: &TelemetrySample) -> tokio::task::JoinHandle<bool> {
        let ctx = self.window_context(sample).await;
        let ticket = self.throttle.begin();
        let engine = Arc::clone(&self.engine);
        let throttle = Arc::clone(&self.throttle);
        tokio::spawn(async move {
            let risk = engine.score(ctx.avg_temp, ctx.avg_hum, Some((ctx.lat, ctx.lon))).await;
            throttle.submit_if_current(ticket, risk, ctx).await
        })
    }

    /// Bucle del consumidor hasta que se cierra el flujo.
    pub async fn run(self: Arc<Self>, mut rx: broadcast::Receiver<TelemetrySample>) {
        loop {
            match rx.recv().await {
                Ok(sample) => {
                    debug!("muestra {} ({})", sample.timestamp, sample.status.as_str());
                    let _ = self.on_sample(&sample).await;
                }
                Err(broadcast::error::RecvError::Lagged(n)) => warn!("dashboard: {n} muestras saltadas"),
                Err(broadcast::error::RecvError::Closed) => {
                    info!("dashboard: flujo cerrado");
                    break;
                }
            }
        }
    }

    /// Recalcula las zonas cada `every`, con la última posición como referencia.
    pub async fn zones_loop(self: Arc<Self>, every: Duration) {
        loop {
            let reference = match self.stream.recent(1).await {
                Ok(v) => v.last().map(|s| (s.latitude, s.longitude)),
                Err(e) => {
                    warn!("zones recent: {e:?}");
                    None
                }
            };
            let snap = self.engine.refresh_zones(reference).await;
            debug!("zonas: {} (ref {:?})", snap.zones.len(), reference);
            sleep(every).await;
        }
    }
}
