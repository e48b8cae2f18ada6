//! engine.rs
//!
//! `RiskEngine`: estado propio del servicio (grid de accidentes, snapshot de
//! zonas, scorer). Grid y zonas se reconstruyen aparte y se sustituyen
//! enteros (`Arc` bajo `RwLock`): un lector nunca ve un índice a medias.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::cache::{self, ZoneCache};
use crate::dataset::EventSource;
use crate::grid::GridIndex;
use crate::models::types::{AccidentEvent, Kpis, RiskZone};
use crate::scorer::{Regressor, RiskScorer};
use crate::zones::ZoneRiskEvaluator;

pub const CACHE_KEY: &str = "zones_v1";

/// De dónde salió el grid cargado.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadOutcome {
    Cache,
    Source,
    Synthetic,
}

#[derive(Clone, Debug, Default)]
pub struct ZoneSnapshot {
    pub zones: Arc<Vec<RiskZone>>,
    pub reference: Option<(f64, f64)>,
    pub ts_utc: String,
}

pub struct RiskEngine {
    grid: RwLock<Arc<GridIndex>>,
    snapshot: RwLock<ZoneSnapshot>,
    scorer: RiskScorer,
    evaluator: ZoneRiskEvaluator,
}

impl Default for RiskEngine {
    fn default() -> Self {
        Self::create(ZoneRiskEvaluator::default())
    }
}

impl RiskEngine {
    pub fn create(evaluator: ZoneRiskEvaluator) -> Self {
        Self {
            grid: RwLock::new(Arc::new(GridIndex::new())),
            snapshot: RwLock::new(ZoneSnapshot::default()),
            scorer: RiskScorer::new(),
            evaluator,
        }
    }

    /// Caché -> fuente -> sintético. Nunca falla: el peor caso es el grid de demo.
    pub async fn load(&self, source: Option<&dyn EventSource>, cache: Option<&dyn ZoneCache>) -> LoadOutcome {
        if let Some(c) = cache {
            if let Some(g) = cache::load_grid(c, CACHE_KEY).await {
                info!("Grid desde caché: {} celdas", g.len());
                self.install_grid(g).await;
                return LoadOutcome::Cache;
            }
        }

        if let Some(src) = source {
            match src.load().await {
                Ok(events) if !events.is_empty() => {
                    let g = GridIndex::from_events(&events);
                    info!("Grid desde {}: {} accidentes en {} celdas", src.describe(), events.len(), g.len());
                    if let Some(c) = cache {
                        cache::store_grid(c, CACHE_KEY, &g).await;
                    }
                    self.install_grid(g).await;
                    return LoadOutcome::Source;
                }
                Ok(_) => warn!("dataset {}: sin accidentes válidos", src.describe()),
                Err(e) => warn!("dataset {}: {e:?}", src.describe()),
            }
        }

        warn!("Sin dataset: usando zonas sintéticas de demo");
        self.install_grid(GridIndex::synthetic()).await;
        LoadOutcome::Synthetic
    }

    /// Reconstruye el grid con `events` y lo sustituye.
    pub async fn ingest(&self, events: &[AccidentEvent]) {
        self.install_grid(GridIndex::from_events(events)).await;
    }

    pub async fn install_grid(&self, grid: GridIndex) {
        *self.grid.write().await = Arc::new(grid);
    }

    pub async fn grid(&self) -> Arc<GridIndex> {
        self.grid.read().await.clone()
    }

    pub fn scorer(&self) -> &RiskScorer {
        &self.scorer
    }

    pub fn evaluator(&self) -> &ZoneRiskEvaluator {
        &self.evaluator
    }

    pub async fn install_model(&self, model: Arc<dyn Regressor>) {
        self.scorer.install_model(model).await;
    }

    /// Riesgo de una lectura con el modelo (o su fallback).
    pub async fn score(&self, temp: f64, humidity: f64, coords: Option<(f64, f64)>) -> f64 {
        let grid = self.grid().await;
        self.scorer.score(&grid, temp, humidity, coords).await
    }

    /// Recalcula las zonas y sustituye el snapshot. Si el cálculo sale vacío
    /// se conserva el anterior.
    pub async fn refresh_zones(&self, reference: Option<(f64, f64)>) -> ZoneSnapshot {
        let grid = self.grid().await;
        let zones = self.evaluator.evaluate(&grid, &self.scorer, reference).await;
        let mut snap = self.snapshot.write().await;
        if zones.is_empty() && !snap.zones.is_empty() {
            warn!("refresh_zones: resultado vacío, se mantiene el snapshot anterior");
            return snap.clone();
        }
        *snap = ZoneSnapshot {
            zones: Arc::new(zones),
            reference,
            ts_utc: Utc::now().to_rfc3339(),
        };
        snap.clone()
    }

    pub async fn zones(&self) -> ZoneSnapshot {
        self.snapshot.read().await.clone()
    }

    pub async fn kpis(&self, samples: usize) -> Kpis {
        let grid = self.grid().await;
        let snap = self.zones().await;
        Kpis {
            cells: grid.len(),
            synthetic: grid.is_synthetic(),
            zones: snap.zones.len(),
            samples,
            model_ready: self.scorer.model_ready().await,
            snapshot_ts_utc: snap.ts_utc,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::FileZoneCache;
    use crate::dataset::FileSource;

    #[tokio::test]
    async fn missing_dataset_falls_back_to_synthetic() {
        let dir = tempfile::tempdir().unwrap();
        let engine = RiskEngine::default();
        let src = FileSource::new(dir.path().join("no-existe.json"));
        assert_eq!(engine.load(Some(&src), None).await, LoadOutcome::Synthetic);
        assert!(engine.grid().await.is_synthetic());
        assert_eq!(engine.load(None, None).await, LoadOutcome::Synthetic);
    }

    #[tokio::test]
    async fn source_then_cache() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("acc.json");
        std::fs::write(
            &data,
            r#"[{"Start_Lat":40.7128,"Start_Lng":-74.006,"Severity":3},{"Start_Lat":40.713,"Start_Lng":-74.006,"Severity":2}]"#,
        )
        .unwrap();
        let cache = FileZoneCache::new(dir.path().join("cache"));
        let src = FileSource::new(&data);

        let e1 = RiskEngine::default();
        assert_eq!(e1.load(Some(&src), Some(&cache)).await, LoadOutcome::Source);

        std::fs::remove_file(&data).unwrap();
        let e2 = RiskEngine::default();
        assert_eq!(e2.load(Some(&src), Some(&cache)).await, LoadOutcome::Cache);
        let g = e2.grid().await;
        assert_eq!(g.weight(40.7128, -74.006), 5.0);
        assert_eq!(g.normalized_risk(40.7128, -74.006), 1.0);
    }

    #[tokio::test]
    async fn ingest_swaps_whole_grid() {
        let engine = RiskEngine::default();
        engine.ingest(&[AccidentEvent::new(1.0, 1.0, 2)]).await;
        let before = engine.grid().await;
        engine.ingest(&[AccidentEvent::new(2.0, 2.0, 1), AccidentEvent::new(3.0, 3.0, 1)]).await;
        // el Arc antiguo sigue intacto para quien lo tenga
        assert_eq!(before.len(), 1);
        assert_eq!(engine.grid().await.len(), 2);
        assert_eq!(engine.grid().await.weight(1.0, 1.0), 0.0);
    }

    #[tokio::test]
    async fn refresh_and_kpis() {
        let engine = RiskEngine::default();
        engine.load(None, None).await;
        let snap = engine.refresh_zones(Some((40.7, -74.0))).await;
        assert!(!snap.zones.is_empty());
        assert!(!snap.ts_utc.is_empty());

        let k = engine.kpis(7).await;
        assert_eq!(k.cells, 5);
        assert!(k.synthetic);
        assert_eq!(k.zones, snap.zones.len());
        assert_eq!(k.samples, 7);
        assert!(!k.model_ready);

        // sin modelo: fallback por umbrales
        assert_eq!(engine.score(65.0, 40.0, None).await, 0.8);
    }

    #[tokio::test]
    async fn empty_evaluation_keeps_last_snapshot() {
        let engine = RiskEngine::default();
        engine.load(None, None).await;
        let first = engine.refresh_zones(None).await;
        engine.install_grid(GridIndex::new()).await;
        let second = engine.refresh_zones(None).await;
        assert_eq!(second.zones.len(), first.zones.len());
    }
}
