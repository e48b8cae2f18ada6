//! config.rs
//! Configuración de procesos: valores por defecto sobreescribibles por entorno.
//! Los parámetros de los algoritmos viven en `models::types` (ZoneCfg, NavCfg, ScoreCfg).

use std::env;
use std::str::FromStr;

use crate::models::types::Position;

#[derive(Clone, Debug)]
pub struct AppCfg {
    pub bind: String,
    /// Dataset local (JSON o CSV)
    pub dataset_path: String,
    /// Dataset remoto; si está, tiene prioridad sobre el fichero
    pub dataset_url: Option<String>,
    pub cache_dir: String,
    pub model_path: String,
    pub telemetry_journal: Option<String>,
    pub throttle_ms: u64,
    pub zones_refresh_s: u64,
    /// Muestras recientes que promedia el dashboard
    pub history_limit: usize,
    // simulador
    pub url_temp: String,
    pub url_hum: String,
    pub dashboard_url: String,
    pub t_tick_ms: u64,
    pub sim_start: Position,
    pub sim_seed: u64,
}

impl Default for AppCfg {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".into(),
            dataset_path: "data/us_accidents_sample.json".into(),
            dataset_url: None,
            cache_dir: "data/cache".into(),
            model_path: "data/model.json".into(),
            telemetry_journal: None,
            throttle_ms: 500,
            zones_refresh_s: 30,
            history_limit: 20,
            url_temp: "http://127.0.0.1:8090/sensors/temperature".into(),
            url_hum: "http://127.0.0.1:8090/sensors/humidity".into(),
            dashboard_url: "http://127.0.0.1:8080".into(),
            t_tick_ms: 2000,
            sim_start: Position { lat: 40.7128, lon: -74.006, alt: 35.0 },
            sim_seed: 42,
        }
    }
}

fn parse_or<T: FromStr>(v: &str, default: T) -> T {
    v.trim().parse().unwrap_or(default)
}

/// "lat,lon[,alt]"
fn parse_position(v: &str, default: Position) -> Position {
    let parts: Vec<f64> = v.split(',').filter_map(|p| p.trim().parse().ok()).collect();
    match parts.as_slice() {
        [lat, lon] => Position { lat: *lat, lon: *lon, alt: default.alt },
        [lat, lon, alt] => Position { lat: *lat, lon: *lon, alt: *alt },
        _ => default,
    }
}

impl AppCfg {
    pub fn from_env() -> Self {
        Self::from_lookup(|k| env::var(k).ok())
    }

    /// Igual que `from_env` con una fuente de variables arbitraria.
    pub fn from_lookup<F>(get: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut c = AppCfg::default();
        if let Some(v) = get("BIND") { c.bind = v; }
        if let Some(v) = get("DATASET_PATH") { c.dataset_path = v; }
        if let Some(v) = get("DATASET_URL") { c.dataset_url = Some(v).filter(|s| !s.is_empty()); }
        if let Some(v) = get("CACHE_DIR") { c.cache_dir = v; }
        if let Some(v) = get("MODEL_PATH") { c.model_path = v; }
        if let Some(v) = get("TELEMETRY_JOURNAL") { c.telemetry_journal = Some(v).filter(|s| !s.is_empty()); }
        if let Some(v) = get("THROTTLE_MS") { c.throttle_ms = parse_or(&v, c.throttle_ms); }
        if let Some(v) = get("ZONES_REFRESH_S") { c.zones_refresh_s = parse_or(&v, c.zones_refresh_s); }
        if let Some(v) = get("HISTORY_LIMIT") { c.history_limit = parse_or(&v, c.history_limit); }
        if let Some(v) = get("URL_TEMP") { c.url_temp = v; }
        if let Some(v) = get("URL_HUM") { c.url_hum = v; }
        if let Some(v) = get("DASHBOARD_URL") { c.dashboard_url = v; }
        if let Some(v) = get("T_TICK_MS") { c.t_tick_ms = parse_or(&v, c.t_tick_ms); }
        if let Some(v) = get("SIM_START") { c.sim_start = parse_position(&v, c.sim_start); }
        if let Some(v) = get("SIM_SEED") { c.sim_seed = parse_or(&v, c.sim_seed); }
        c
    }
}
