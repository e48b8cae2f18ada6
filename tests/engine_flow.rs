//! Flujo completo: simulador -> HTTP -> dashboard -> throttle -> API.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tokio::sync::watch;

use riskgrid::engine::{LoadOutcome, RiskEngine};
use riskgrid::grid::zone_key;
use riskgrid::models::types::{AccidentEvent, NavCfg, Position, Status, TelemetrySample};
use riskgrid::navigation::NavigationSimulator;
use riskgrid::scorer::AnalyticScorer;
use riskgrid::server::{api, dashboard};
use riskgrid::telemetry::{HttpStream, MemoryStream, TelemetryStream};

struct Running {
    base: String,
    engine: Arc<RiskEngine>,
    stream: Arc<MemoryStream>,
}

async fn start_dashboard() -> Running {
    let engine = Arc::new(RiskEngine::default());
    assert_eq!(engine.load(None, None).await, LoadOutcome::Synthetic);
    engine.refresh_zones(None).await;

    let stream = Arc::new(MemoryStream::new(100));
    let (tx, rx) = watch::channel(None);
    let dash = Arc::new(dashboard::Dashboard {
        engine: engine.clone(),
        stream: stream.clone(),
        throttle: Arc::new(dashboard::risk_throttle(Duration::from_millis(50), tx)),
        history_limit: 20,
    });
    let sub = stream.subscribe();
    tokio::spawn(dash.clone().run(sub));

    let app = api::router(api::ApiState { engine: engine.clone(), stream: stream.clone(), risk: rx, history_limit: 20 });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await });

    Running { base: format!("http://{addr}"), engine, stream }
}

fn reading(temp: f64, hum: f64) -> TelemetrySample {
    TelemetrySample {
        latitude: 40.7128,
        longitude: -74.006,
        altitude: 20.0,
        temperature: temp,
        humidity: hum,
        timestamp: Utc::now(),
        status: Status::from_readings(temp, hum),
        risk_score: 0.0,
    }
}

#[tokio::test]
async fn telemetry_flows_to_risk_view() {
    let rt = start_dashboard().await;
    let client = Client::new();
    let sink = HttpStream::new(client.clone(), format!("{}/", rt.base));

    sink.publish(reading(70.0, 50.0)).await.unwrap();
    assert_eq!(sink.recent(10).await.unwrap().len(), 1);
    assert_eq!(rt.stream.len().await, 1);

    // el consumidor es asíncrono: esperar a que el throttle publique
    let mut view = None;
    for _ in 0..100 {
        let resp = client.get(format!("{}/risk", rt.base)).send().await.unwrap();
        if resp.status() == StatusCode::OK {
            view = Some(resp.json::<Value>().await.unwrap());
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let view = view.expect("la vista de riesgo nunca llegó");
    // sin modelo: 70 ºC > 60 -> 0.8
    assert_eq!(view["risk"], 0.8);
    assert_eq!(view["status"], "CRITICAL");

    let stats: Value = client.get(format!("{}/stats", rt.base)).send().await.unwrap().json().await.unwrap();
    assert_eq!(stats["count"], 1);
    assert_eq!(stats["status"], "CRITICAL");
    assert!(stats["alert"].as_str().unwrap().contains("Temperature"));

    let hist: Value = client.get(format!("{}/history", rt.base)).send().await.unwrap().json().await.unwrap();
    assert_eq!(hist.as_array().map(|a| a.len()), Some(1));

    let kpis: Value = client.get(format!("{}/kpis", rt.base)).send().await.unwrap().json().await.unwrap();
    assert_eq!(kpis["samples"], 1);
    assert_eq!(kpis["synthetic"], true);
    assert_eq!(kpis["cells"], 5);
}

#[tokio::test]
async fn zones_endpoints_serve_snapshot() {
    let rt = start_dashboard().await;
    let client = Client::new();

    let health = client.get(format!("{}/health", rt.base)).send().await.unwrap().text().await.unwrap();
    assert_eq!(health, "ok");

    let zones: Value = client.get(format!("{}/zones", rt.base)).send().await.unwrap().json().await.unwrap();
    let n = zones["zones"].as_array().map(|a| a.len()).unwrap_or(0);
    assert!(n > 0);
    assert_eq!(n, rt.engine.zones().await.zones.len());

    let resp = client.get(format!("{}/map/zones", rt.base)).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let fc: Value = resp.json().await.unwrap();
    assert_eq!(fc["type"], "FeatureCollection");
    assert_eq!(fc["features"].as_array().map(|a| a.len()), Some(n));

    // sin muestras todavía
    let risk = client.get(format!("{}/risk", rt.base)).send().await.unwrap();
    assert_eq!(risk.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn simulator_tours_zones_from_real_grid() {
    let engine = RiskEngine::default();
    engine
        .ingest(&[
            AccidentEvent::new(40.7128, -74.0060, 3),
            AccidentEvent::new(40.713, -74.006, 2),
            AccidentEvent::new(40.75, -73.99, 1),
            AccidentEvent::new(40.69, -74.04, 2),
        ])
        .await;
    let grid = engine.grid().await;
    assert_eq!(grid.weight(40.7128, -74.006), 5.0);
    assert_eq!(grid.get(&zone_key(40.713, -74.006)).map(|c| c.weight), Some(5.0));

    let start = Position { lat: 40.70, lon: -74.02, alt: 30.0 };
    let zones = grid.top_zones(50);
    assert_eq!(zones.len(), 3);
    assert_eq!(zones[0].key, "40.71,-74.01");

    let stream = MemoryStream::new(1_000);
    let mut sim = NavigationSimulator::new(start, zones, NavCfg::default(), AnalyticScorer::default(), 7);
    let mut visited = std::collections::HashSet::new();
    for _ in 0..2_000 {
        let s = sim.tick(25.0, 50.0);
        assert!((0.0..=1.0).contains(&s.risk_score));
        assert_eq!(s.status, Status::from_risk(s.risk_score));
        stream.publish(s).await.unwrap();
        assert!(sim.state().recent.len() <= 3);
        if let Some(t) = &sim.state().target {
            visited.insert(t.clone());
        }
    }
    // con exclusión de recientes se recorren todas las zonas
    assert_eq!(visited.len(), 3);
    assert_eq!(stream.len().await, 1_000);
}
