//! history.rs
//! Consultas sobre el histórico de telemetría (entrada en orden de llegada).

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::models::types::{Status, TelemetrySample};

/// Muestras con `start <= timestamp <= end`, de la más nueva a la más antigua.
pub fn range(samples: &[TelemetrySample], start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<TelemetrySample> {
    let mut out: Vec<TelemetrySample> = samples
        .iter()
        .filter(|s| s.timestamp >= start && s.timestamp <= end)
        .cloned()
        .collect();
    out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    out
}

pub fn last_hour(samples: &[TelemetrySample], now: DateTime<Utc>) -> Vec<TelemetrySample> {
    range(samples, now - Duration::hours(1), now)
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct HistoryStats {
    pub count: usize,
    pub avg_temp: f64,
    pub avg_hum: f64,
    pub avg_risk: f64,
    pub max_risk: f64,
    pub critical: usize,
    pub warning: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last: Option<DateTime<Utc>>,
}

impl HistoryStats {
    pub fn from_samples(samples: &[TelemetrySample]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        let n = samples.len() as f64;
        let sum = |f: fn(&TelemetrySample) -> f64| samples.iter().map(f).sum::<f64>();
        let count_status = |st: Status| samples.iter().filter(|s| s.status == st).count();
        Self {
            count: samples.len(),
            avg_temp: sum(|s| s.temperature) / n,
            avg_hum: sum(|s| s.humidity) / n,
            avg_risk: sum(|s| s.risk_score) / n,
            max_risk: samples.iter().map(|s| s.risk_score).fold(0.0, f64::max),
            critical: count_status(Status::Critical),
            warning: count_status(Status::Warning),
            first: samples.iter().map(|s| s.timestamp).min(),
            last: samples.iter().map(|s| s.timestamp).max(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(min: u32, temp: f64, status: Status) -> TelemetrySample {
        TelemetrySample {
            latitude: 40.0,
            longitude: -74.0,
            altitude: 30.0,
            temperature: temp,
            humidity: 60.0,
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 10, min, 0).unwrap(),
            status,
            risk_score: if status == Status::Critical { 0.9 } else { 0.3 },
        }
    }

    #[test]
    fn range_is_inclusive_and_newest_first() {
        let h = vec![at(0, 20.0, Status::Normal), at(10, 21.0, Status::Normal), at(20, 22.0, Status::Normal)];
        let r = range(&h, h[0].timestamp, h[1].timestamp);
        let temps: Vec<f64> = r.iter().map(|s| s.temperature).collect();
        assert_eq!(temps, vec![21.0, 20.0]);
        assert!(range(&h, h[2].timestamp, h[0].timestamp).is_empty());
    }

    #[test]
    fn last_hour_window() {
        let h = vec![at(0, 20.0, Status::Normal), at(30, 21.0, Status::Normal), at(59, 22.0, Status::Normal)];
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 11, 10, 0).unwrap();
        let r = last_hour(&h, now);
        assert_eq!(r.len(), 2);
        assert_eq!(r[0].temperature, 22.0);
    }

    #[test]
    fn stats_over_window() {
        let h = vec![at(0, 20.0, Status::Normal), at(1, 30.0, Status::Critical), at(2, 70.0, Status::Critical)];
        let st = HistoryStats::from_samples(&h);
        assert_eq!(st.count, 3);
        assert!((st.avg_temp - 40.0).abs() < 1e-12);
        assert!((st.avg_hum - 60.0).abs() < 1e-12);
        assert_eq!(st.critical, 2);
        assert_eq!(st.warning, 0);
        assert_eq!(st.max_risk, 0.9);
        assert_eq!(st.first, Some(h[0].timestamp));
        assert_eq!(HistoryStats::from_samples(&[]), HistoryStats::default());
    }
}
