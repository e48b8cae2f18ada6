//! scorer.rs
//!
//! Dos scorers de riesgo, deliberadamente separados:
//! - `RiskScorer`: delega en el modelo de regresión (opaco) con el vector
//!   `[temp/100, hum/100, accident_risk]`. Mientras el modelo no está cargado,
//!   o si falla, usa `fallback_score` (umbrales de sensor).
//! - `AnalyticScorer`: fórmula sin aprendizaje que usa el simulador.
//!
//! Pueden dar valores distintos para la misma entrada; ninguno sustituye al otro.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::grid::{planar_km, GridIndex};
use crate::models::types::{RiskZone, ScoreCfg};

/// Función de regresión opaca: 3 features -> riesgo.
#[async_trait]
pub trait Regressor: Send + Sync {
    async fn predict(&self, features: [f64; 3]) -> Result<f64>;
}

#[inline]
fn clamp01(x: f64) -> f64 {
    if x.is_nan() { 0.0 } else { x.clamp(0.0, 1.0) }
}

/// Vector de entrada del modelo.
pub fn features(temp: f64, humidity: f64, accident_risk: f64) -> [f64; 3] {
    [temp / 100.0, humidity / 100.0, accident_risk]
}

/// Riesgo determinista cuando no hay modelo.
pub fn fallback_score(temp: f64, humidity: f64) -> f64 {
    if temp > 60.0 || humidity > 80.0 {
        0.8
    } else if temp > 40.0 || humidity > 70.0 {
        0.5
    } else {
        0.2
    }
}

#[derive(Default)]
pub struct RiskScorer {
    model: RwLock<Option<Arc<dyn Regressor>>>,
}

impl RiskScorer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(model: Arc<dyn Regressor>) -> Self {
        Self { model: RwLock::new(Some(model)) }
    }

    /// Instala (o reemplaza) el modelo; las llamadas siguientes lo usan.
    pub async fn install_model(&self, model: Arc<dyn Regressor>) {
        *self.model.write().await = Some(model);
        info!("Modelo de riesgo instalado");
    }

    pub async fn model_ready(&self) -> bool {
        self.model.read().await.is_some()
    }

    /// Riesgo en [0,1]. `coords` añade el riesgo espacial de la celda.
    pub async fn score(&self, grid: &GridIndex, temp: f64, humidity: f64, coords: Option<(f64, f64)>) -> f64 {
        let accident_risk = coords.map(|(lat, lon)| grid.normalized_risk(lat, lon)).unwrap_or(0.0);
        // soltamos el lock antes de esperar al modelo
        let model = self.model.read().await.clone();
        match model {
            Some(m) => match m.predict(features(temp, humidity, accident_risk)).await {
                Ok(r) if r.is_finite() => clamp01(r),
                Ok(r) => {
                    warn!("predict devolvió {r}; usando fallback (temp={temp}, hum={humidity})");
                    fallback_score(temp, humidity)
                }
                Err(e) => {
                    warn!("predict: {e:?}; usando fallback (temp={temp}, hum={humidity}, coords={coords:?})");
                    fallback_score(temp, humidity)
                }
            },
            None => fallback_score(temp, humidity),
        }
    }
}

/// Factor de proximidad por tramos (km).
pub fn proximity_factor(distance_km: f64) -> f64 {
    if distance_km < 0.5 {
        1.0
    } else if distance_km < 2.0 {
        0.7
    } else if distance_km < 5.0 {
        0.4
    } else if distance_km < 10.0 {
        0.2
    } else {
        0.05
    }
}

/// Scorer analítico del simulador.
#[derive(Clone, Debug, Default)]
pub struct AnalyticScorer {
    pub cfg: ScoreCfg,
}

impl AnalyticScorer {
    pub fn new(cfg: ScoreCfg) -> Self {
        Self { cfg }
    }

    /// Zona más cercana y su distancia en km.
    pub fn nearest<'a>(zones: &'a [RiskZone], lat: f64, lon: f64) -> Option<(&'a RiskZone, f64)> {
        zones
            .iter()
            .map(|z| (z, planar_km(lat, lon, z.lat, z.lon)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
    }

    pub fn zone_risk(&self, zones: &[RiskZone], coords: Option<(f64, f64)>) -> f64 {
        let Some((lat, lon)) = coords else { return 0.0 };
        match Self::nearest(zones, lat, lon) {
            Some((z, d)) => clamp01(z.risk()) * proximity_factor(d),
            None => 0.0,
        }
    }

    pub fn score(&self, temp: f64, humidity: f64, coords: Option<(f64, f64)>, zones: &[RiskZone]) -> f64 {
        let temp_risk = clamp01(temp / 100.0);
        let hum_risk = clamp01(humidity / 100.0);
        let zone_risk = self.zone_risk(zones, coords);
        let combined = self.cfg.w_temp * temp_risk + self.cfg.w_hum * hum_risk + self.cfg.w_zone * zone_risk;
        clamp01(combined.max(0.0).powf(self.cfg.gamma))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::types::{AccidentEvent, Status};

    struct Fixed(f64);

    #[async_trait]
    impl Regressor for Fixed {
        async fn predict(&self, _features: [f64; 3]) -> Result<f64> {
            Ok(self.0)
        }
    }

    struct Echo;

    #[async_trait]
    impl Regressor for Echo {
        async fn predict(&self, f: [f64; 3]) -> Result<f64> {
            Ok(f[2])
        }
    }

    struct Broken;

    #[async_trait]
    impl Regressor for Broken {
        async fn predict(&self, _features: [f64; 3]) -> Result<f64> {
            anyhow::bail!("modelo no disponible")
        }
    }

    fn zone(lat: f64, lon: f64, risk: f64) -> RiskZone {
        RiskZone {
            key: crate::grid::zone_key(lat, lon),
            lat,
            lon,
            weight: 1.0,
            raw_risk: risk,
            accident_risk: risk,
            adjusted_risk: None,
            distance_km: None,
        }
    }

    #[test]
    fn fallback_thresholds() {
        assert_eq!(fallback_score(61.0, 10.0), 0.8);
        assert_eq!(fallback_score(20.0, 81.0), 0.8);
        assert_eq!(fallback_score(41.0, 10.0), 0.5);
        assert_eq!(fallback_score(20.0, 71.0), 0.5);
        assert_eq!(fallback_score(25.0, 50.0), 0.2);
    }

    #[tokio::test]
    async fn score_without_model_uses_fallback() {
        let s = RiskScorer::new();
        let g = GridIndex::new();
        assert!(!s.model_ready().await);
        assert_eq!(s.score(&g, 70.0, 50.0, None).await, 0.8);
    }

    #[tokio::test]
    async fn score_feeds_accident_risk_and_clamps() {
        let g = GridIndex::from_events(&[AccidentEvent::new(40.7128, -74.006, 3)]);
        let s = RiskScorer::with_model(Arc::new(Echo));
        assert_eq!(s.score(&g, 25.0, 50.0, Some((40.7128, -74.006))).await, 1.0);
        assert_eq!(s.score(&g, 25.0, 50.0, None).await, 0.0);

        let s = RiskScorer::with_model(Arc::new(Fixed(1.7)));
        assert_eq!(s.score(&g, 25.0, 50.0, None).await, 1.0);
    }

    #[tokio::test]
    async fn broken_model_degrades_to_fallback() {
        let s = RiskScorer::new();
        s.install_model(Arc::new(Broken)).await;
        assert!(s.model_ready().await);
        assert_eq!(s.score(&GridIndex::new(), 45.0, 20.0, None).await, 0.5);
    }

    #[test]
    fn analytic_scenario_without_coordinates() {
        let a = AnalyticScorer::default();
        let r = a.score(70.0, 50.0, None, &[zone(0.0, 0.0, 1.0)]);
        // 0.3*0.7 + 0.3*0.5 = 0.36 ; 0.36^0.85
        assert!((r - 0.36f64.powf(0.85)).abs() < 1e-12);
        assert!((r - 0.4196).abs() < 1e-3);
        assert_eq!(Status::from_risk(r), Status::Warning);
    }

    #[test]
    fn analytic_uses_nearest_zone_and_steps() {
        let a = AnalyticScorer::default();
        let zones = vec![zone(40.0, -74.0, 1.0), zone(41.0, -74.0, 0.1)];
        let at_zone = a.zone_risk(&zones, Some((40.001, -74.0)));
        assert_eq!(at_zone, 1.0);
        // ~1.1 km -> 0.7
        assert!((a.zone_risk(&zones, Some((40.01, -74.0))) - 0.7).abs() < 1e-12);
        // lejos -> 0.05
        assert!((a.zone_risk(&zones, Some((30.0, -74.0))) - 0.05).abs() < 1e-12);
        assert_eq!(a.zone_risk(&[], Some((40.0, -74.0))), 0.0);
        assert_eq!(proximity_factor(4.99), 0.4);
        assert_eq!(proximity_factor(9.99), 0.2);
    }

    #[test]
    fn analytic_is_monotonic_in_temperature() {
        let a = AnalyticScorer::default();
        let zones = vec![zone(40.0, -74.0, 0.6)];
        let mut prev = -1.0;
        for t in (-20..=140).map(|t| t as f64) {
            let r = a.score(t, 55.0, Some((40.02, -74.0)), &zones);
            assert!(r >= prev, "t={t} r={r} prev={prev}");
            assert!((0.0..=1.0).contains(&r));
            prev = r;
        }
    }

    #[test]
    fn status_boundaries() {
        assert_eq!(Status::from_risk(0.7), Status::Critical);
        assert_eq!(Status::from_risk(0.4), Status::Warning);
        assert_eq!(Status::from_risk(0.39), Status::Normal);
        assert_eq!(Status::from_readings(61.0, 0.0), Status::Critical);
        assert!(Status::alert_message(20.0, 75.0).contains("Humidity"));
    }
}
