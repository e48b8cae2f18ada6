//! types.rs
//! Modelos de datos compartidos: entradas (accidentes, telemetría),
//! configuración de los cálculos (zonas, scoring, navegación) y salidas.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Accidente ya validado: coordenadas finitas y severidad >= 1.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AccidentEvent {
    pub lat: f64,
    pub lon: f64,
    pub severity: u32,
}

impl AccidentEvent {
    pub fn new(lat: f64, lon: f64, severity: u32) -> Self {
        Self { lat, lon, severity }
    }
}

/// Zona de riesgo derivada de una celda del grid.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RiskZone {
    pub key: String,
    pub lat: f64,
    pub lon: f64,
    pub weight: f64,
    /// Riesgo del modelo en condiciones representativas (25 ºC, 50 %)
    pub raw_risk: f64,
    /// Peso normalizado de la celda (0..1)
    pub accident_risk: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adjusted_risk: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance_km: Option<f64>,
}

impl RiskZone {
    /// Riesgo efectivo: el ajustado por proximidad si existe, si no el bruto.
    #[inline]
    pub fn risk(&self) -> f64 {
        self.adjusted_risk.unwrap_or(self.raw_risk)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Normal,
    Warning,
    Critical,
}

impl Status {
    /// Clasificación a partir de un score de riesgo (dashboard y simulador).
    pub fn from_risk(risk: f64) -> Self {
        if risk >= 0.7 {
            Status::Critical
        } else if risk >= 0.4 {
            Status::Warning
        } else {
            Status::Normal
        }
    }

    /// Clasificación por umbrales de sensor (alertas).
    pub fn from_readings(temp: f64, humidity: f64) -> Self {
        if temp > 60.0 || humidity > 80.0 {
            Status::Critical
        } else if temp > 40.0 || humidity > 70.0 {
            Status::Warning
        } else {
            Status::Normal
        }
    }

    /// Mensaje de alerta para mostrar junto al estado.
    pub fn alert_message(temp: f64, humidity: f64) -> String {
        match Status::from_readings(temp, humidity) {
            Status::Critical => format!(
                "CRITICAL ALERT: High {} detected!",
                if temp > 60.0 { "Temperature" } else { "Humidity" }
            ),
            Status::Warning => format!(
                "WARNING: Elevated {}. Drive with caution.",
                if temp > 40.0 { "Temperature" } else { "Humidity" }
            ),
            Status::Normal => "System operating normally. Conditions optimal.".to_string(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Normal => "NORMAL",
            Status::Warning => "WARNING",
            Status::Critical => "CRITICAL",
        }
    }
}

/// Lectura emitida por el simulador o por un sensor real.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetrySample {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub temperature: f64,
    pub humidity: f64,
    pub timestamp: DateTime<Utc>,
    pub status: Status,
    pub risk_score: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NavPhase {
    Approaching,
    Leaving,
    Traveling,
}

/// Posición del vehículo simulado (grados, metros).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
}

/// Parámetros del evaluador de zonas. Son heurísticos ajustables, no constantes físicas.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ZoneCfg {
    pub max_cells: usize,
    pub avg_temp: f64,
    pub avg_hum: f64,
    pub boost_radius_km: f64,
    pub boost_max: f64,
    pub percentile: f64,
    pub threshold_floor: f64,

    pub near_km: f64,
    pub near_min_risk: f64,
    pub near_cap: usize,
    pub mid_km: f64,
    pub mid_min_risk: f64,
    pub mid_cap: usize,
    pub adjusted_cap: usize,
    pub raw_cap: usize,
    pub total_cap: usize,

    /// Sin posición de referencia: riesgo >= max(no_ref_floor, thr * no_ref_factor)
    pub no_ref_floor: f64,
    pub no_ref_factor: f64,

    pub fallback_top: usize,
    pub min_zones: usize,
}

impl Default for ZoneCfg {
    fn default() -> Self {
        Self {
            max_cells: 500,
            avg_temp: 25.0,
            avg_hum: 50.0,
            boost_radius_km: 50.0,
            boost_max: 0.3,
            percentile: 0.30,
            threshold_floor: 0.15,
            near_km: 20.0,
            near_min_risk: 0.05,
            near_cap: 15,
            mid_km: 100.0,
            mid_min_risk: 0.10,
            mid_cap: 15,
            adjusted_cap: 25,
            raw_cap: 20,
            total_cap: 50,
            no_ref_floor: 0.1,
            no_ref_factor: 0.7,
            fallback_top: 30,
            min_zones: 5,
        }
    }
}

/// Pesos del scorer analítico (simulador).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScoreCfg {
    pub w_temp: f64,
    pub w_hum: f64,
    pub w_zone: f64,
    pub gamma: f64,
}

impl Default for ScoreCfg {
    fn default() -> Self {
        Self { w_temp: 0.3, w_hum: 0.3, w_zone: 0.4, gamma: 0.85 }
    }
}

/// Máquina de estados del simulador: presupuestos de pasos, velocidades (m/paso) y radios (km).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NavCfg {
    pub approach_steps: u32,
    pub leave_steps: u32,
    pub travel_steps: u32,
    pub step_m: f64,
    pub leave_step_m: f64,
    pub travel_factor: f64,
    pub jitter_m: f64,
    pub travel_jitter_m: f64,
    pub reached_km: f64,
    pub left_km: f64,
    pub retarget_every: u32,
    pub recent_cap: usize,
    /// Paso máximo del paseo aleatorio (grados) cuando no hay zonas
    pub walk_deg: f64,
    pub alt_jitter_m: f64,
}

impl Default for NavCfg {
    fn default() -> Self {
        Self {
            approach_steps: 50,
            leave_steps: 80,
            travel_steps: 30,
            step_m: 45.0,
            leave_step_m: 55.0,
            travel_factor: 0.7,
            jitter_m: 5.0,
            travel_jitter_m: 15.0,
            reached_km: 0.5,
            left_km: 3.0,
            retarget_every: 20,
            recent_cap: 3,
            walk_deg: 0.0002,
            alt_jitter_m: 0.5,
        }
    }
}

/// Vista del riesgo que ve el dashboard tras el throttle.
#[derive(Clone, Debug, Serialize)]
pub struct RiskView {
    pub risk: f64,
    pub status: Status,
    pub avg_temp: f64,
    pub avg_hum: f64,
    pub lat: f64,
    pub lon: f64,
    pub ts_utc: String,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct Kpis {
    pub cells: usize,
    pub synthetic: bool,
    pub zones: usize,
    pub samples: usize,
    pub model_ready: bool,
    pub snapshot_ts_utc: String,
}
