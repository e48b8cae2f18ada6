//! zones.rs
//!
//! Selección de zonas de alto riesgo para pintar en el mapa.
//!
//! Un umbral fijo dejaba el mapa casi vacío o casi lleno según el dataset,
//! así que se combinan varias estrategias:
//! - cerca del vehículo (A: < 20 km, B: 20..100 km) con umbrales bajos,
//! - umbral dinámico (percentil 30, suelo 0.15) sobre riesgo ajustado (C) y bruto (D),
//! - unión sin duplicados, orden por riesgo, tope total.
//!
//! Sin posición de referencia hay una única estrategia. En ambos casos el
//! resultado nunca está vacío si el grid tiene celdas.

use std::collections::HashMap;

use tracing::debug;

use crate::grid::{planar_km, GridIndex};
use crate::models::types::{RiskZone, ZoneCfg};
use crate::scorer::RiskScorer;

#[derive(Clone, Debug, Default)]
pub struct ZoneRiskEvaluator {
    pub cfg: ZoneCfg,
}

fn by_risk_desc(a: &RiskZone, b: &RiskZone) -> std::cmp::Ordering {
    b.risk().total_cmp(&a.risk()).then_with(|| a.key.cmp(&b.key))
}

/// Candidatos que cumplen `pred`, mejores primero, hasta `cap`.
fn pick<F>(sorted: &[RiskZone], cap: usize, pred: F) -> Vec<RiskZone>
where
    F: Fn(&RiskZone) -> bool,
{
    sorted.iter().filter(|z| pred(z)).take(cap).cloned().collect()
}

impl ZoneRiskEvaluator {
    pub fn new(cfg: ZoneCfg) -> Self {
        Self { cfg }
    }

    /// Riesgo bruto, riesgo por accidentes y (si hay referencia) distancia + boost.
    pub async fn score_cells(
        &self,
        grid: &GridIndex,
        scorer: &RiskScorer,
        reference: Option<(f64, f64)>,
    ) -> Vec<RiskZone> {
        let cfg = &self.cfg;
        // prefijo estable (orden de clave): límite de escala, no de corrección
        let mut out = Vec::with_capacity(grid.len().min(cfg.max_cells));
        for cell in grid.cells().take(cfg.max_cells) {
            let raw = scorer.score(grid, cfg.avg_temp, cfg.avg_hum, Some((cell.lat, cell.lon))).await;
            let accident = grid.normalized_risk(cell.lat, cell.lon);
            let (distance_km, adjusted_risk) = match reference {
                Some((rlat, rlon)) => {
                    let d = planar_km(rlat, rlon, cell.lat, cell.lon);
                    let boost = if d < cfg.boost_radius_km {
                        ((cfg.boost_radius_km - d) / cfg.boost_radius_km).max(0.0) * cfg.boost_max
                    } else {
                        0.0
                    };
                    (Some(d), Some((raw + boost).min(1.0)))
                }
                None => (None, None),
            };
            out.push(RiskZone {
                key: cell.key.clone(),
                lat: cell.lat,
                lon: cell.lon,
                weight: cell.weight,
                raw_risk: raw,
                accident_risk: accident,
                adjusted_risk,
                distance_km,
            });
        }
        out
    }

    /// Umbral dinámico: riesgo en el rango del percentil (orden descendente), con suelo.
    pub fn dynamic_threshold(&self, sorted: &[RiskZone]) -> f64 {
        if sorted.is_empty() {
            return self.cfg.threshold_floor;
        }
        let idx = ((sorted.len() as f64) * self.cfg.percentile).floor() as usize;
        let idx = idx.min(sorted.len() - 1);
        sorted[idx].risk().max(self.cfg.threshold_floor)
    }

    /// Aplica las estrategias sobre zonas ya puntuadas.
    pub fn select(&self, mut scored: Vec<RiskZone>, has_reference: bool) -> Vec<RiskZone> {
        let cfg = &self.cfg;
        scored.sort_by(by_risk_desc);
        let thr = self.dynamic_threshold(&scored);

        let mut selected = if has_reference {
            let dist = |z: &RiskZone| z.distance_km.unwrap_or(f64::INFINITY);
            let near = pick(&scored, cfg.near_cap, |z| dist(z) < cfg.near_km && z.raw_risk >= cfg.near_min_risk);
            let mid = pick(&scored, cfg.mid_cap, |z| {
                let d = dist(z);
                d >= cfg.near_km && d < cfg.mid_km && z.raw_risk >= cfg.mid_min_risk
            });
            let adjusted = pick(&scored, cfg.adjusted_cap, |z| z.risk() >= thr);
            let raw = pick(&scored, cfg.raw_cap, |z| z.raw_risk >= thr);
            debug!(
                "zonas: thr={thr:.3} A={} B={} C={} D={}",
                near.len(), mid.len(), adjusted.len(), raw.len()
            );

            // unión por clave, nos quedamos con el mayor riesgo ajustado
            let mut merged: HashMap<String, RiskZone> = HashMap::new();
            for z in near.into_iter().chain(mid).chain(adjusted).chain(raw) {
                match merged.get(&z.key) {
                    Some(prev) if prev.risk() >= z.risk() => {}
                    _ => { merged.insert(z.key.clone(), z); }
                }
            }
            let mut v: Vec<RiskZone> = merged.into_values().collect();
            v.sort_by(by_risk_desc);
            v.truncate(cfg.total_cap);
            v
        } else {
            let min = cfg.no_ref_floor.max(thr * cfg.no_ref_factor);
            pick(&scored, cfg.total_cap, |z| z.raw_risk >= min)
        };

        if selected.is_empty() && !scored.is_empty() {
            debug!("zonas: ninguna supera el umbral, top {}", cfg.fallback_top);
            selected = scored.iter().take(cfg.fallback_top).cloned().collect();
        }
        if selected.len() < cfg.min_zones {
            for z in &scored {
                if selected.len() >= cfg.min_zones { break; }
                if !selected.iter().any(|s| s.key == z.key) {
                    selected.push(z.clone());
                }
            }
            selected.sort_by(by_risk_desc);
        }
        selected
    }

    /// Pasada completa: nuevo snapshot de zonas (reemplaza al anterior).
    pub async fn evaluate(
        &self,
        grid: &GridIndex,
        scorer: &RiskScorer,
        reference: Option<(f64, f64)>,
    ) -> Vec<RiskZone> {
        let scored = self.score_cells(grid, scorer, reference).await;
        self.select(scored, reference.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::types::AccidentEvent;
    use crate::scorer::Regressor;
    use async_trait::async_trait;
    use std::sync::Arc;

    /// Modelo que devuelve el riesgo por accidentes tal cual.
    struct AccidentOnly;

    #[async_trait]
    impl Regressor for AccidentOnly {
        async fn predict(&self, f: [f64; 3]) -> anyhow::Result<f64> {
            Ok(f[2])
        }
    }

    fn zone(key: &str, raw: f64, adjusted: Option<f64>, d: Option<f64>) -> RiskZone {
        RiskZone {
            key: key.to_string(),
            lat: 0.0,
            lon: 0.0,
            weight: 1.0,
            raw_risk: raw,
            accident_risk: raw,
            adjusted_risk: adjusted,
            distance_km: d,
        }
    }

    fn spread_grid(n: usize) -> GridIndex {
        // celdas en una línea de latitud con pesos 1..=n
        let events: Vec<AccidentEvent> = (0..n)
            .flat_map(|i| {
                let lat = 30.0 + i as f64 * 0.5;
                std::iter::repeat(AccidentEvent::new(lat, -90.0, 1)).take(i + 1)
            })
            .collect();
        GridIndex::from_events(&events)
    }

    #[test]
    fn threshold_has_floor_and_uses_percentile_rank() {
        let ev = ZoneRiskEvaluator::default();
        let mut v: Vec<RiskZone> = (0..10).map(|i| zone(&format!("k{i}"), i as f64 / 10.0, None, None)).collect();
        v.sort_by(by_risk_desc);
        // desc: 0.9..0.0 ; idx 3 -> 0.6
        assert!((ev.dynamic_threshold(&v) - 0.6).abs() < 1e-12);
        let low: Vec<RiskZone> = (0..4).map(|i| zone(&format!("k{i}"), 0.01, None, None)).collect();
        assert_eq!(ev.dynamic_threshold(&low), 0.15);
    }

    #[test]
    fn union_dedupes_and_caps_total() {
        let scored: Vec<RiskZone> = (0..120)
            .map(|i| zone(&format!("k{i:03}"), 0.9, Some(0.95), Some(5.0 + i as f64)))
            .collect();
        // A: k000..k014, B: k015..k029, C y D repiten claves de A/B
        let out = ZoneRiskEvaluator::default().select(scored.clone(), true);
        assert_eq!(out.len(), 30);
        let mut keys: Vec<&str> = out.iter().map(|z| z.key.as_str()).collect();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), 30);

        let capped = ZoneRiskEvaluator::new(ZoneCfg { total_cap: 10, ..ZoneCfg::default() }).select(scored, true);
        assert_eq!(capped.len(), 10);
    }

    #[test]
    fn nearby_zone_survives_low_global_threshold() {
        let ev = ZoneRiskEvaluator::default();
        let mut scored: Vec<RiskZone> = (0..40).map(|i| zone(&format!("far{i:02}"), 0.9, Some(0.9), Some(500.0))).collect();
        // riesgo bajo pero a 3 km: entra por la estrategia A
        scored.push(zone("near", 0.06, Some(0.34), Some(3.0)));
        let out = ev.select(scored, true);
        assert!(out.iter().any(|z| z.key == "near"));
    }

    #[test]
    fn never_empty_and_padded() {
        let ev = ZoneRiskEvaluator::default();
        let scored: Vec<RiskZone> = (0..8).map(|i| zone(&format!("k{i}"), 0.01, None, None)).collect();
        let out = ev.select(scored, false);
        assert_eq!(out.len(), 8);

        let ev = ZoneRiskEvaluator::new(ZoneCfg { fallback_top: 2, ..ZoneCfg::default() });
        let scored: Vec<RiskZone> = (0..8).map(|i| zone(&format!("k{i}"), 0.01, None, None)).collect();
        let out = ev.select(scored, false);
        assert_eq!(out.len(), 5);

        let ev = ZoneRiskEvaluator::default();
        assert!(ev.select(Vec::new(), true).is_empty());
    }

    #[tokio::test]
    async fn evaluate_never_empty_for_non_empty_grid() {
        let ev = ZoneRiskEvaluator::default();
        let grid = GridIndex::synthetic();
        // sin modelo: fallback 0.2 para todas, con y sin referencia
        let scorer = RiskScorer::new();
        assert!(!ev.evaluate(&grid, &scorer, None).await.is_empty());
        assert!(!ev.evaluate(&grid, &scorer, Some((0.0, 0.0))).await.is_empty());

        let scorer = RiskScorer::with_model(Arc::new(AccidentOnly));
        let single = GridIndex::from_events(&[AccidentEvent::new(5.0, 5.0, 1)]);
        assert_eq!(ev.evaluate(&single, &scorer, Some((60.0, 60.0))).await.len(), 1);
    }

    #[tokio::test]
    async fn reference_boost_keeps_close_zone() {
        let ev = ZoneRiskEvaluator::default();
        let grid = spread_grid(12);
        let scorer = RiskScorer::with_model(Arc::new(AccidentOnly));
        // el vehículo está sobre la celda más ligera (30.0, -90.0)
        let zones = ev.evaluate(&grid, &scorer, Some((30.0, -90.0))).await;
        let near = zones.iter().find(|z| z.key == "30.00,-90.00").expect("zona cercana incluida");
        assert_eq!(near.distance_km, Some(0.0));
        assert!((near.adjusted_risk.unwrap() - (1.0 / 12.0 + 0.3)).abs() < 1e-9);
        // a 55 km ya no hay boost
        let next = zones.iter().find(|z| z.key == "30.50,-90.00");
        assert!(next.map_or(true, |z| z.adjusted_risk == Some(z.raw_risk)));
        for w in zones.windows(2) {
            assert!(w[0].risk() >= w[1].risk());
        }
    }

    #[tokio::test]
    async fn respects_cell_cap() {
        let ev = ZoneRiskEvaluator::new(ZoneCfg { max_cells: 4, ..ZoneCfg::default() });
        let grid = spread_grid(10);
        let scored = ev.score_cells(&grid, &RiskScorer::new(), None).await;
        assert_eq!(scored.len(), 4);
    }
}
