//! simulador.rs — Vehículo sintético: recorre zonas de riesgo, lee sensores y publica telemetría.
//!
//! Cada tick: lee temperatura/humedad (fallback 20 ºC / 50 %), avanza la
//! máquina de navegación, puntúa con el scorer analítico y hace POST al dashboard.
//! Sin modelo: las zonas son las celdas más pesadas del grid (`top_zones`).

use std::time::Duration;

use anyhow::Result;
use reqwest::Client;
use tokio::{signal, time::sleep};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use riskgrid::cache::FileZoneCache;
use riskgrid::config::AppCfg;
use riskgrid::dataset::{EventSource, FileSource, UrlSource};
use riskgrid::engine::RiskEngine;
use riskgrid::fetch;
use riskgrid::grid::GridIndex;
use riskgrid::models::types::{NavCfg, RiskZone};
use riskgrid::navigation::NavigationSimulator;
use riskgrid::scorer::AnalyticScorer;
use riskgrid::telemetry::{HttpStream, TelemetryStream};

/// Zonas que recorre el simulador.
const SIM_ZONES: usize = 50;

fn sim_zones(grid: &GridIndex) -> Vec<RiskZone> {
    grid.top_zones(SIM_ZONES)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = AppCfg::from_env();
    let client = Client::builder().brotli(true).gzip(true).deflate(true).build()?;

    // Zonas propias a partir del mismo dataset que el dashboard
    let engine = RiskEngine::default();
    let source: Box<dyn EventSource> = match &cfg.dataset_url {
        Some(url) => Box::new(UrlSource::new(client.clone(), url.clone())),
        None => Box::new(FileSource::new(&cfg.dataset_path)),
    };
    let cache = FileZoneCache::new(&cfg.cache_dir);
    let outcome = engine.load(Some(source.as_ref()), Some(&cache)).await;
    let zones = sim_zones(&*engine.grid().await);
    info!("Simulador ({outcome:?}): {} zonas, salida en {:?}", zones.len(), cfg.sim_start);

    let mut sim = NavigationSimulator::new(
        cfg.sim_start,
        zones,
        NavCfg::default(),
        AnalyticScorer::default(),
        cfg.sim_seed,
    );
    let sink = HttpStream::new(client.clone(), cfg.dashboard_url.clone());
    let tick = Duration::from_millis(cfg.t_tick_ms.max(1));

    let run = async {
        let mut n: u64 = 0;
        loop {
            n += 1;
            if let Err(e) = async {
                let (temp, hum) = fetch::read_sensors(&client, &cfg.url_temp, &cfg.url_hum).await;
                let sample = sim.tick(temp, hum);
                info!(
                    "tick {n}: ({:.5}, {:.5}) {:?} riesgo={:.3} {}",
                    sample.latitude,
                    sample.longitude,
                    sim.phase(),
                    sample.risk_score,
                    sample.status.as_str()
                );
                sink.publish(sample).await?;
                Ok::<_, anyhow::Error>(())
            }
            .await
            {
                warn!("publish: {e:?}");
            }
            sleep(tick).await;
        }
    };

    tokio::select! {
        _ = run => {},
        _ = signal::ctrl_c() => { info!("Señal de salida recibida"); }
    }
    Ok(())
}
