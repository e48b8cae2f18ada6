//! analyze_zones.rs — Informe del modelo sobre el grid: casos de prueba fijos y
//! distribución del riesgo predicho en las primeras 200 zonas.

use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use riskgrid::cache::FileZoneCache;
use riskgrid::config::AppCfg;
use riskgrid::dataset::FileSource;
use riskgrid::engine::RiskEngine;
use riskgrid::grid::GridIndex;
use riskgrid::model::FeedForwardModel;
use riskgrid::scorer::RiskScorer;

const SAMPLE_ZONES: usize = 200;

struct Probe {
    desc: &'static str,
    temp: f64,
    hum: f64,
    lat: f64,
    lon: f64,
}

const PROBES: [Probe; 7] = [
    Probe { desc: "NYC", temp: 25.0, hum: 50.0, lat: 40.75, lon: -74.00 },
    Probe { desc: "LA", temp: 25.0, hum: 50.0, lat: 34.05, lon: -118.25 },
    Probe { desc: "Houston", temp: 25.0, hum: 50.0, lat: 29.76, lon: -95.37 },
    Probe { desc: "NYC (calor)", temp: 60.0, hum: 80.0, lat: 40.75, lon: -74.00 },
    Probe { desc: "NYC (frío)", temp: 10.0, hum: 30.0, lat: 40.75, lon: -74.00 },
    Probe { desc: "Rural", temp: 25.0, hum: 50.0, lat: 35.0, lon: -100.0 },
    Probe { desc: "Poco tráfico", temp: 25.0, hum: 50.0, lat: 45.0, lon: -90.0 },
];

fn band(risk: f64) -> &'static str {
    if risk > 0.4 {
        "ALTO"
    } else if risk > 0.2 {
        "MEDIO"
    } else {
        "BAJO"
    }
}

/// Banda que cabría esperar solo por la frecuencia de accidentes de la celda.
fn expected_band(accident_risk: f64) -> &'static str {
    if accident_risk > 0.3 { "ALTO" } else { "BAJO" }
}

#[derive(Debug, Default, PartialEq, Serialize)]
struct ZoneReport {
    total: usize,
    high: usize,
    medium: usize,
    low: usize,
    max: f64,
    min: f64,
    avg: f64,
    /// zonas con muchos accidentes y riesgo predicho bajo
    underrated: usize,
    top: Vec<(String, f64, f64)>,
}

async fn zone_report(grid: &GridIndex, scorer: &RiskScorer, sample: usize) -> ZoneReport {
    let mut scored = Vec::new();
    for cell in grid.cells().take(sample) {
        let r = scorer.score(grid, 25.0, 50.0, Some((cell.lat, cell.lon))).await;
        scored.push((cell.key.clone(), r, cell.weight));
    }
    if scored.is_empty() {
        return ZoneReport::default();
    }
    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    let risks: Vec<f64> = scored.iter().map(|z| z.1).collect();
    ZoneReport {
        total: scored.len(),
        high: risks.iter().filter(|r| **r >= 0.6).count(),
        medium: risks.iter().filter(|r| (0.3..0.6).contains(*r)).count(),
        low: risks.iter().filter(|r| **r < 0.3).count(),
        max: risks.iter().copied().fold(f64::MIN, f64::max),
        min: risks.iter().copied().fold(f64::MAX, f64::min),
        avg: risks.iter().sum::<f64>() / risks.len() as f64,
        underrated: scored.iter().filter(|z| z.2 > 10.0 && z.1 < 0.3).count(),
        top: scored.into_iter().take(10).collect(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = AppCfg::from_env();
    let engine = RiskEngine::default();
    let source = FileSource::new(&cfg.dataset_path);
    let cache = FileZoneCache::new(&cfg.cache_dir);
    let outcome = engine.load(Some(&source), Some(&cache)).await;
    match FeedForwardModel::from_path(&cfg.model_path) {
        Ok(m) => engine.install_model(Arc::new(m)).await,
        Err(e) => warn!("modelo: {e:?}; el informe usa el fallback por umbrales"),
    }
    let grid = engine.grid().await;
    info!("Grid ({outcome:?}): {} celdas, peso máximo {}", grid.len(), grid.max_weight());

    info!("Casos de prueba:");
    for p in &PROBES {
        let acc = grid.normalized_risk(p.lat, p.lon);
        let r = engine.score(p.temp, p.hum, Some((p.lat, p.lon))).await;
        let danger = if grid.is_danger(p.lat, p.lon) { " [zona peligrosa]" } else { "" };
        info!(
            "  {}: T={} ºC H={} % accidentes={:.1}%{danger} -> riesgo {:.1}% ({}), esperado {}",
            p.desc, p.temp, p.hum, acc * 100.0, r * 100.0, band(r), expected_band(acc)
        );
    }

    let rep = zone_report(&grid, engine.scorer(), SAMPLE_ZONES).await;
    info!(
        "Zonas: {} (alto {}, medio {}, bajo {}) max {:.1}% min {:.1}% media {:.1}%",
        rep.total, rep.high, rep.medium, rep.low, rep.max * 100.0, rep.min * 100.0, rep.avg * 100.0
    );
    for (i, (key, r, w)) in rep.top.iter().enumerate() {
        info!("  {}. {key}: {:.1}% ({w:.0} accidentes)", i + 1, r * 100.0);
    }
    if rep.high < 5 {
        warn!("Muy pocas zonas de riesgo alto: bajar el umbral o usar selección por percentil");
    }
    if rep.max < 0.5 {
        warn!("Riesgo máximo bajo: el modelo puede ser demasiado conservador");
    }
    if rep.underrated > 5 {
        warn!("{} zonas con muchos accidentes tienen riesgo predicho bajo", rep.underrated);
    }
    println!("{}", serde_json::to_string_pretty(&rep)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use riskgrid::models::types::AccidentEvent;

    #[tokio::test]
    async fn report_without_model_is_flat() {
        let grid = GridIndex::from_events(&[AccidentEvent::new(40.0, -74.0, 20), AccidentEvent::new(41.0, -74.0, 1)]);
        let rep = zone_report(&grid, &RiskScorer::new(), SAMPLE_ZONES).await;
        assert_eq!(rep.total, 2);
        // fallback 0.2 en todas
        assert_eq!(rep.low, 2);
        assert_eq!(rep.underrated, 1);
        assert_eq!(rep.top.len(), 2);
        assert_eq!(band(0.2), "BAJO");
        assert_eq!(expected_band(grid.normalized_risk(40.0, -74.0)), "ALTO");
        assert_eq!(expected_band(grid.normalized_risk(41.0, -74.0)), "BAJO");
        assert_eq!(zone_report(&GridIndex::new(), &RiskScorer::new(), 10).await, ZoneReport::default());
    }
}
