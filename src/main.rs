//! main.rs — Dashboard: carga del grid, modelo en segundo plano, consumo de telemetría y API

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use reqwest::Client;
use tokio::{signal, sync::watch};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use riskgrid::cache::FileZoneCache;
use riskgrid::config::AppCfg;
use riskgrid::dataset::{EventSource, FileSource, UrlSource};
use riskgrid::engine::RiskEngine;
use riskgrid::model::FeedForwardModel;
use riskgrid::server::{api, dashboard};
use riskgrid::telemetry::MemoryStream;

/// Muestras que guarda el histórico en memoria.
const STREAM_CAP: usize = 5_000;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = AppCfg::from_env();
    let client = Client::builder().brotli(true).gzip(true).deflate(true).build()?;

    // Grid: caché -> dataset -> sintético
    let engine = Arc::new(RiskEngine::default());
    let source: Box<dyn EventSource> = match &cfg.dataset_url {
        Some(url) => Box::new(UrlSource::new(client.clone(), url.clone())),
        None => Box::new(FileSource::new(&cfg.dataset_path)),
    };
    let cache = FileZoneCache::new(&cfg.cache_dir);
    let outcome = engine.load(Some(source.as_ref()), Some(&cache)).await;
    let snap = engine.refresh_zones(None).await;
    info!("Grid listo ({outcome:?}): {} zonas de riesgo", snap.zones.len());

    // Modelo: hasta que cargue se usa el fallback por umbrales
    {
        let engine_m = engine.clone();
        let path = cfg.model_path.clone();
        tokio::spawn(async move {
            let loaded = tokio::task::spawn_blocking(move || FeedForwardModel::from_path(&path)).await;
            match loaded {
                Ok(Ok(m)) => engine_m.install_model(Arc::new(m)).await,
                Ok(Err(e)) => warn!("modelo: {e:?}; se mantiene el fallback"),
                Err(e) => warn!("modelo (tarea): {e:?}"),
            }
        });
    }

    // Telemetría + consumidor con throttle
    let stream = Arc::new(match &cfg.telemetry_journal {
        Some(p) => MemoryStream::with_journal(STREAM_CAP, p).await?,
        None => MemoryStream::new(STREAM_CAP),
    });
    let (risk_tx, risk_rx) = watch::channel(None);
    let dash = Arc::new(dashboard::Dashboard {
        engine: engine.clone(),
        stream: stream.clone(),
        throttle: Arc::new(dashboard::risk_throttle(Duration::from_millis(cfg.throttle_ms), risk_tx)),
        history_limit: cfg.history_limit,
    });
    {
        let rx = stream.subscribe();
        let d = dash.clone();
        tokio::spawn(async move { d.run(rx).await });
    }
    {
        let d = dash.clone();
        let every = Duration::from_secs(cfg.zones_refresh_s.max(1));
        tokio::spawn(async move { d.zones_loop(every).await });
    }

    // API
    let app = api::router(api::ApiState {
        engine: engine.clone(),
        stream: stream.clone(),
        risk: risk_rx,
        history_limit: cfg.history_limit,
    });
    info!("Escuchando en http://{}", cfg.bind);
    let listener = tokio::net::TcpListener::bind(&cfg.bind)
        .await
        .with_context(|| format!("bind {}", cfg.bind))?;
    let serve = axum::serve(listener, app);
    tokio::select! {
        r = serve => { r?; },
        _ = signal::ctrl_c() => { info!("Señal de salida recibida"); }
    }

    Ok(())
}
