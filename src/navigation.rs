//! navigation.rs
//!
//! Máquina de estados del simulador: mueve una posición GPS sintética por
//! una secuencia de zonas peligrosas.
//!
//! APPROACHING --(d < 0.5 km | presupuesto)--> LEAVING
//! LEAVING     --(d > 3 km   | presupuesto)--> TRAVELING (marca visitada, nuevo objetivo)
//! TRAVELING   --(presupuesto)---------------> APPROACHING (re-objetivo cada 20 pasos)
//!
//! El objetivo se guarda por clave y se busca en la lista viva de zonas en
//! cada tick: si la lista se reconstruye y la zona desaparece, se elige otra.
//! Las últimas zonas visitadas (FIFO acotada) se excluyen de la selección para
//! no oscilar entre las dos más cercanas.

use std::collections::VecDeque;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use crate::grid::{planar_km, KM_PER_DEG};
use crate::models::types::{NavCfg, NavPhase, Position, RiskZone, Status, TelemetrySample};
use crate::scorer::AnalyticScorer;

const M_PER_DEG: f64 = KM_PER_DEG * 1000.0;

#[derive(Clone, Debug)]
pub struct NavigationState {
    pub target: Option<String>,
    pub recent: VecDeque<String>,
    pub phase: NavPhase,
    pub steps: u32,
}

impl NavigationState {
    fn new() -> Self {
        Self { target: None, recent: VecDeque::new(), phase: NavPhase::Approaching, steps: 0 }
    }
}

pub struct NavigationSimulator {
    pub cfg: NavCfg,
    pos: Position,
    state: NavigationState,
    zones: Vec<RiskZone>,
    scorer: AnalyticScorer,
    rng: StdRng,
}

impl NavigationSimulator {
    pub fn new(start: Position, zones: Vec<RiskZone>, cfg: NavCfg, scorer: AnalyticScorer, seed: u64) -> Self {
        let mut sim = Self {
            cfg,
            pos: start,
            state: NavigationState::new(),
            zones,
            scorer,
            rng: StdRng::seed_from_u64(seed),
        };
        sim.state.target = sim.select_target(None);
        sim
    }

    pub fn position(&self) -> Position { self.pos }
    pub fn state(&self) -> &NavigationState { &self.state }
    pub fn phase(&self) -> NavPhase { self.state.phase }
    pub fn zones(&self) -> &[RiskZone] { &self.zones }

    /// Zona objetivo actual, buscada por clave en la lista viva.
    pub fn target(&self) -> Option<&RiskZone> {
        let key = self.state.target.as_deref()?;
        self.zones.iter().find(|z| z.key == key)
    }

    pub fn target_distance_km(&self) -> Option<f64> {
        self.target().map(|z| planar_km(self.pos.lat, self.pos.lon, z.lat, z.lon))
    }

    /// Reemplaza la lista de zonas (snapshot nuevo). El objetivo se revalida en el siguiente tick.
    pub fn set_zones(&mut self, zones: Vec<RiskZone>) {
        self.zones = zones;
        if self.zones.is_empty() {
            self.state.target = None;
        }
    }

    /// Zona más cercana no visitada. Si todas están en la FIFO, se vacía y se
    /// reintenta excluyendo solo `current`.
    fn select_target(&mut self, current: Option<&str>) -> Option<String> {
        if self.zones.is_empty() {
            return None;
        }
        let (lat, lon) = (self.pos.lat, self.pos.lon);
        let nearest = |zones: &[RiskZone], skip: &dyn Fn(&RiskZone) -> bool| {
            zones
                .iter()
                .filter(|z| !skip(z))
                .map(|z| (z, planar_km(lat, lon, z.lat, z.lon)))
                .min_by(|a, b| a.1.total_cmp(&b.1))
                .map(|(z, _)| z.key.clone())
        };

        let recent = &self.state.recent;
        if let Some(k) = nearest(&self.zones, &|z: &RiskZone| recent.contains(&z.key)) {
            return Some(k);
        }
        debug!("nav: todas las zonas visitadas recientemente, se vacía la lista");
        self.state.recent.clear();
        nearest(&self.zones, &|z: &RiskZone| Some(z.key.as_str()) == current)
            .or_else(|| nearest(&self.zones, &|_: &RiskZone| false))
    }

    fn mark_visited(&mut self, key: String) {
        if self.state.recent.contains(&key) {
            return;
        }
        self.state.recent.push_back(key);
        while self.state.recent.len() > self.cfg.recent_cap {
            self.state.recent.pop_front();
        }
    }

    fn transition(&mut self, phase: NavPhase) {
        debug!("nav: {:?} -> {:?} tras {} pasos", self.state.phase, phase, self.state.steps);
        self.state.phase = phase;
        self.state.steps = 0;
    }

    fn jitter_deg(&mut self, meters: f64) -> f64 {
        if meters <= 0.0 {
            return 0.0;
        }
        self.rng.gen_range(-meters..meters) / M_PER_DEG
    }

    /// Mueve `step_m` metros hacia (sign=1) o desde (sign=-1) el punto, sin pasarse al acercarse.
    fn step_relative(&mut self, lat: f64, lon: f64, step_m: f64, jitter_m: f64, sign: f64) {
        let dlat = lat - self.pos.lat;
        let dlon = lon - self.pos.lon;
        let norm = (dlat * dlat + dlon * dlon).sqrt();
        let step_deg = step_m / M_PER_DEG;
        if norm < 1e-12 {
            if sign < 0.0 {
                // encima del objetivo: salimos en una dirección cualquiera
                let a = self.rng.gen_range(0.0..std::f64::consts::TAU);
                self.pos.lat += step_deg * a.sin();
                self.pos.lon += step_deg * a.cos();
            }
        } else if sign > 0.0 && norm <= step_deg {
            self.pos.lat = lat;
            self.pos.lon = lon;
        } else {
            self.pos.lat += sign * step_deg * dlat / norm;
            self.pos.lon += sign * step_deg * dlon / norm;
        }
        let (jlat, jlon) = (self.jitter_deg(jitter_m), self.jitter_deg(jitter_m));
        self.pos.lat += jlat;
        self.pos.lon += jlon;
    }

    fn random_walk(&mut self) {
        let w = self.cfg.walk_deg;
        if w > 0.0 {
            self.pos.lat += self.rng.gen_range(-w / 2.0..w / 2.0);
            self.pos.lon += self.rng.gen_range(-w / 2.0..w / 2.0);
        }
    }

    /// Avanza un paso de la máquina de estados (solo posición lat/lon).
    pub fn advance(&mut self) {
        if self.zones.is_empty() {
            self.state.target = None;
            self.random_walk();
            return;
        }

        // referencia débil: si la zona ya no existe, se vuelve a elegir
        let mut found = self.target().map(|z| (z.key.clone(), z.lat, z.lon));
        if found.is_none() {
            let current = self.state.target.take();
            self.state.target = self.select_target(current.as_deref());
            found = self.target().map(|z| (z.key.clone(), z.lat, z.lon));
        }
        let Some((key, tlat, tlon)) = found else {
            self.random_walk();
            return;
        };

        self.state.steps += 1;
        match self.state.phase {
            NavPhase::Approaching => {
                self.step_relative(tlat, tlon, self.cfg.step_m, self.cfg.jitter_m, 1.0);
                let d = planar_km(self.pos.lat, self.pos.lon, tlat, tlon);
                if d < self.cfg.reached_km || self.state.steps >= self.cfg.approach_steps {
                    info!("nav: zona {key} alcanzada (d={d:.2} km)");
                    self.transition(NavPhase::Leaving);
                }
            }
            NavPhase::Leaving => {
                self.step_relative(tlat, tlon, self.cfg.leave_step_m, self.cfg.jitter_m, -1.0);
                let d = planar_km(self.pos.lat, self.pos.lon, tlat, tlon);
                if d > self.cfg.left_km || self.state.steps >= self.cfg.leave_steps {
                    self.mark_visited(key.clone());
                    self.state.target = self.select_target(Some(&key));
                    info!("nav: saliendo de {key}, nuevo objetivo {:?}", self.state.target);
                    self.transition(NavPhase::Traveling);
                }
            }
            NavPhase::Traveling => {
                let speed = self.cfg.step_m * self.cfg.travel_factor;
                self.step_relative(tlat, tlon, speed, self.cfg.travel_jitter_m, 1.0);
                if self.cfg.retarget_every > 0 && self.state.steps % self.cfg.retarget_every == 0 {
                    self.retarget(&key, tlat, tlon);
                }
                if self.state.steps >= self.cfg.travel_steps {
                    self.transition(NavPhase::Approaching);
                }
            }
        }
    }

    fn retarget(&mut self, key: &str, tlat: f64, tlon: f64) {
        let current_d = planar_km(self.pos.lat, self.pos.lon, tlat, tlon);
        let Some(candidate) = self.select_target(Some(key)) else { return };
        if candidate == key {
            return;
        }
        let closer = self
            .zones
            .iter()
            .find(|z| z.key == candidate)
            .map(|z| planar_km(self.pos.lat, self.pos.lon, z.lat, z.lon) < current_d)
            .unwrap_or(false);
        if closer {
            debug!("nav: re-objetivo {key} -> {candidate}");
            self.mark_visited(key.to_string());
            self.state.target = Some(candidate);
        }
    }

    /// Tick completo: mueve, perturba altitud y emite la muestra puntuada con el scorer analítico.
    pub fn tick(&mut self, temperature: f64, humidity: f64) -> TelemetrySample {
        self.advance();
        let a = self.cfg.alt_jitter_m;
        if a > 0.0 {
            self.pos.alt += self.rng.gen_range(-a / 2.0..a / 2.0);
        }
        let risk = self.scorer.score(temperature, humidity, Some((self.pos.lat, self.pos.lon)), &self.zones);
        TelemetrySample {
            latitude: self.pos.lat,
            longitude: self.pos.lon,
            altitude: self.pos.alt,
            temperature,
            humidity,
            timestamp: Utc::now(),
            status: Status::from_risk(risk),
            risk_score: risk,
        }
    }
}
