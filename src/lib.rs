//! riskgrid: motor de zonas de riesgo para telemetría de vehículos.
//!
//! grid de accidentes -> zonas de alto riesgo / scoring de lecturas ->
//! throttle hacia el dashboard. El simulador recorre las zonas y publica
//! telemetría sintética.

pub mod cache;
pub mod config;
pub mod dataset;
pub mod engine;
pub mod fetch;
pub mod grid;
pub mod history;
pub mod model;
pub mod models;
pub mod navigation;
pub mod scorer;
pub mod server;
pub mod telemetry;
pub mod throttle;
pub mod zones;
