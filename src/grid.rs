//! grid.rs
//!
//! Grid de celdas de 0.01º sobre el que se acumulan los accidentes.
//!
//! Funcionalidad principal:
//! - `zone_key()` cuantiza lat/lon a la clave de celda ("40.71,-74.01").
//!   Es la ÚNICA función de cuantización: la usan la ingesta y las consultas.
//! - `ingest()` reconstruye el índice sumando la severidad de cada accidente.
//! - `normalized_risk()` da el peso de la celda relativo al máximo actual.
//! - `to_geojson()` pinta las zonas de riesgo como cuadrados coloreados.
//!
//! El índice no se muta mientras otros lo leen: el engine construye uno
//! nuevo y lo intercambia (ver `engine.rs`).

use std::collections::BTreeMap;

use geojson::{Feature, FeatureCollection, Geometry, JsonObject, Value as GeoValue};
use serde_json::json;
use tracing::debug;

use crate::models::types::{AccidentEvent, RiskZone};

/// Resolución del grid en grados.
pub const CELL_DEG: f64 = 0.01;
/// Km por grado en la aproximación plana.
pub const KM_PER_DEG: f64 = 111.0;
/// Peso a partir del cual una celda se considera peligrosa.
pub const DANGER_WEIGHT: f64 = 5.0;

#[derive(Clone, Debug, PartialEq)]
pub struct GeoCell {
    pub key: String,
    pub lat: f64, // centro cuantizado
    pub lon: f64,
    pub weight: f64,
}

#[derive(Clone, Debug, Default)]
pub struct GridIndex {
    cells: BTreeMap<String, GeoCell>,
    max_weight: f64,
    synthetic: bool,
}

// Math.round del dashboard original: mitades hacia +inf
#[inline]
fn quantize(x: f64) -> f64 {
    ((x * 100.0 + 0.5).floor() / 100.0) + 0.0
}

/// Clave de celda para un punto.
pub fn zone_key(lat: f64, lon: f64) -> String {
    format!("{:.2},{:.2}", quantize(lat), quantize(lon))
}

/// Distancia plana aproximada en km: sqrt(dLat² + dLon²) * 111.
#[inline]
pub fn planar_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    (dlat * dlat + dlon * dlon).sqrt() * KM_PER_DEG
}

/// Parsea una clave "lat,lon" a su centro.
pub fn parse_key(key: &str) -> Option<(f64, f64)> {
    let (a, b) = key.split_once(',')?;
    let lat: f64 = a.trim().parse().ok()?;
    let lon: f64 = b.trim().parse().ok()?;
    if lat.is_finite() && lon.is_finite() { Some((lat, lon)) } else { None }
}

impl GridIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_events(events: &[AccidentEvent]) -> Self {
        let mut g = Self::new();
        g.ingest(events);
        g
    }

    /// Reconstruye desde pares (clave, peso), p.ej. la cache persistida.
    /// Claves ilegibles o pesos negativos/no finitos se descartan.
    pub fn from_cells<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (String, f64)>,
    {
        let mut g = Self::new();
        for (key, weight) in pairs {
            let Some((lat, lon)) = parse_key(&key) else { continue };
            if !weight.is_finite() || weight < 0.0 { continue; }
            // re-cuantizamos por si la clave venía con otro formato
            let k = zone_key(lat, lon);
            let cell = g.cells.entry(k.clone()).or_insert_with(|| GeoCell {
                key: k, lat: quantize(lat), lon: quantize(lon), weight: 0.0,
            });
            cell.weight += weight;
        }
        g.refresh_max();
        g
    }

    /// Índice de demostración (5 áreas metropolitanas de EEUU).
    pub fn synthetic() -> Self {
        const DEMO: [(f64, f64, f64); 5] = [
            (40.75, -74.00, 15.0),  // NYC
            (34.05, -118.25, 12.0), // LA
            (41.88, -87.63, 10.0),  // Chicago
            (29.76, -95.37, 8.0),   // Houston
            (33.75, -84.39, 7.0),   // Atlanta
        ];
        let mut g = Self::from_cells(DEMO.iter().map(|(lat, lon, w)| (zone_key(*lat, *lon), *w)));
        g.synthetic = true;
        g
    }

    /// Limpia y acumula `severity` por celda. Coordenadas no finitas se ignoran.
    pub fn ingest(&mut self, events: &[AccidentEvent]) {
        self.cells.clear();
        self.synthetic = false;
        let mut skipped = 0usize;
        for ev in events {
            if !ev.lat.is_finite() || !ev.lon.is_finite() { skipped += 1; continue; }
            let k = zone_key(ev.lat, ev.lon);
            let cell = self.cells.entry(k.clone()).or_insert_with(|| GeoCell {
                key: k, lat: quantize(ev.lat), lon: quantize(ev.lon), weight: 0.0,
            });
            cell.weight += ev.severity.max(1) as f64;
        }
        self.refresh_max();
        debug!("grid: {} celdas, {} eventos descartados", self.cells.len(), skipped);
    }

    fn refresh_max(&mut self) {
        self.max_weight = self.cells.values().map(|c| c.weight).fold(0.0, f64::max);
    }

    pub fn weight(&self, lat: f64, lon: f64) -> f64 {
        self.cells.get(&zone_key(lat, lon)).map(|c| c.weight).unwrap_or(0.0)
    }

    /// Peso relativo al máximo actual del índice, en [0, 1].
    pub fn normalized_risk(&self, lat: f64, lon: f64) -> f64 {
        let w = self.weight(lat, lon);
        (w / self.max_weight.max(1.0)).min(1.0)
    }

    /// Celda con peso de accidentes >= `DANGER_WEIGHT`.
    pub fn is_danger(&self, lat: f64, lon: f64) -> bool {
        self.weight(lat, lon) >= DANGER_WEIGHT
    }

    pub fn is_synthetic(&self) -> bool { self.synthetic }
    pub fn len(&self) -> usize { self.cells.len() }
    pub fn is_empty(&self) -> bool { self.cells.is_empty() }
    pub fn max_weight(&self) -> f64 { self.max_weight }

    /// Celdas en orden estable (por clave).
    pub fn cells(&self) -> impl Iterator<Item = &GeoCell> {
        self.cells.values()
    }

    pub fn get(&self, key: &str) -> Option<&GeoCell> {
        self.cells.get(key)
    }

    pub fn to_cells(&self) -> Vec<(String, f64)> {
        self.cells.values().map(|c| (c.key.clone(), c.weight)).collect()
    }

    /// Las `n` celdas más pesadas como zonas, con riesgo = peso normalizado.
    /// Es la lista que recorre el simulador (no tiene acceso al modelo).
    pub fn top_zones(&self, n: usize) -> Vec<RiskZone> {
        let mut cells: Vec<&GeoCell> = self.cells.values().collect();
        cells.sort_by(|a, b| b.weight.total_cmp(&a.weight).then_with(|| a.key.cmp(&b.key)));
        cells
            .into_iter()
            .take(n)
            .map(|c| {
                let r = (c.weight / self.max_weight.max(1.0)).min(1.0);
                RiskZone {
                    key: c.key.clone(),
                    lat: c.lat,
                    lon: c.lon,
                    weight: c.weight,
                    raw_risk: r,
                    accident_risk: r,
                    adjusted_risk: None,
                    distance_km: None,
                }
            })
            .collect()
    }
}

pub fn color_from_norm(x: f64) -> &'static str {
    const RAMP: [&str; 11] = [
        "#e9f7ef", "#d4f2e3", "#bfeacc", "#a9e3b6", "#fff3b0",
        "#ffe08a", "#ffc266", "#ff9f58", "#ff7a55", "#f5544f", "#d73a49",
    ];
    let i = (x.clamp(0.0, 1.0) * ((RAMP.len() - 1) as f64)).floor() as usize;
    RAMP[i]
}

fn cell_to_geometry(lat: f64, lon: f64) -> Geometry {
    // exterior (lon, lat), celda centrada en la clave
    let h = CELL_DEG / 2.0;
    let exterior = vec![
        vec![lon - h, lat - h], vec![lon + h, lat - h], vec![lon + h, lat + h], vec![lon - h, lat + h], vec![lon - h, lat - h],
    ];
    Geometry::new(GeoValue::Polygon(vec![exterior]))
}

#[inline]
fn round2(x: f64) -> f64 { (x * 100.0).round() / 100.0 }

/// GeoJSON del mapa con una feature por zona de riesgo.
pub fn to_geojson(zones: &[RiskZone], synthetic: bool) -> FeatureCollection {
    let features = zones
        .iter()
        .map(|z| {
            let color = color_from_norm(z.risk());
            let props = json!({
                "key": z.key,
                "weight": z.weight,
                "danger": z.weight >= DANGER_WEIGHT,
                "risk": round2(z.risk()),
                "raw_risk": round2(z.raw_risk),
                "distance_km": z.distance_km.map(|d| (d * 10.0).round() / 10.0),
                "style": {
                    "fill": true,
                    "fill-color": color, "fill-opacity": 0.75,
                    "stroke": color, "stroke-opacity": 1.0, "stroke-width": 1
                }
            });
            Feature {
                bbox: None,
                geometry: Some(cell_to_geometry(z.lat, z.lon)),
                id: None,
                properties: props.as_object().cloned(),
                foreign_members: None,
            }
        })
        .collect();
    let mut extra = JsonObject::new();
    extra.insert("name".into(), json!("risk_zones"));
    extra.insert("synthetic".into(), json!(synthetic));
    FeatureCollection { bbox: None, features, foreign_members: Some(extra) }
}
