//! dataset.rs
//!
//! Dataset de accidentes (formato Kaggle "US Accidents"): registros
//! `{Start_Lat, Start_Lng, Severity, Start_Time}`. Los valores pueden venir
//! como número o como cadena. Registros sin coordenadas finitas se descartan
//! sin error; la severidad ausente o inválida vale 1.

use std::io::Read;
use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rand::seq::SliceRandom;
use rand::Rng;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::fetch::{self, CacheCtl};
use crate::models::types::AccidentEvent;

/// Caja continental de EEUU usada al convertir el CSV.
pub const US_LAT: (f64, f64) = (24.0, 50.0);
pub const US_LON: (f64, f64) = (-125.0, -66.0);

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AccidentRecord {
    #[serde(rename = "Start_Lat", default)]
    pub start_lat: Option<Value>,
    #[serde(rename = "Start_Lng", default)]
    pub start_lng: Option<Value>,
    #[serde(rename = "Severity", default)]
    pub severity: Option<Value>,
    #[serde(rename = "Start_Time", default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
}

fn number(v: &Option<Value>) -> Option<f64> {
    match v.as_ref()? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Parte entera de la severidad; 1 si falta, no es numérica o es < 1.
pub fn severity_or_default(v: &Option<Value>) -> u32 {
    match number(v) {
        Some(s) if s.is_finite() && s >= 1.0 => s.trunc().min(u32::MAX as f64) as u32,
        _ => 1,
    }
}

impl AccidentRecord {
    pub fn lat(&self) -> Option<f64> {
        number(&self.start_lat).filter(|x| x.is_finite())
    }

    pub fn lon(&self) -> Option<f64> {
        number(&self.start_lng).filter(|x| x.is_finite())
    }

    pub fn to_event(&self) -> Option<AccidentEvent> {
        Some(AccidentEvent::new(self.lat()?, self.lon()?, severity_or_default(&self.severity)))
    }
}

pub fn in_us_bounds(lat: f64, lon: f64) -> bool {
    (US_LAT.0..=US_LAT.1).contains(&lat) && (US_LON.0..=US_LON.1).contains(&lon)
}

fn to_events(records: &[AccidentRecord]) -> Vec<AccidentEvent> {
    let events: Vec<AccidentEvent> = records.iter().filter_map(AccidentRecord::to_event).collect();
    let skipped = records.len() - events.len();
    if skipped > 0 {
        debug!("dataset: {skipped} registros sin coordenadas válidas descartados");
    }
    events
}

/// Array JSON de registros.
pub fn parse_json(text: &str) -> Result<Vec<AccidentEvent>> {
    let records: Vec<AccidentRecord> = serde_json::from_str(text).context("dataset JSON inválido")?;
    Ok(to_events(&records))
}

/// Fila del CSV original; el resto de columnas se ignora.
#[derive(Debug, Deserialize)]
struct CsvRow {
    #[serde(rename = "Start_Lat", default)]
    start_lat: Option<String>,
    #[serde(rename = "Start_Lng", default)]
    start_lng: Option<String>,
    #[serde(rename = "Severity", default)]
    severity: Option<String>,
    #[serde(rename = "Start_Time", default)]
    start_time: Option<String>,
}

impl From<CsvRow> for AccidentRecord {
    fn from(r: CsvRow) -> Self {
        let val = |s: Option<String>| s.filter(|x| !x.trim().is_empty()).map(Value::String);
        AccidentRecord {
            start_lat: val(r.start_lat),
            start_lng: val(r.start_lng),
            severity: val(r.severity),
            start_time: r.start_time.filter(|x| !x.trim().is_empty()),
        }
    }
}

fn csv_records<R: Read>(reader: R) -> impl Iterator<Item = Result<AccidentRecord>> {
    csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(reader)
        .into_deserialize::<CsvRow>()
        .map(|r| r.map(AccidentRecord::from).map_err(anyhow::Error::from))
}

pub fn parse_csv<R: Read>(reader: R) -> Result<Vec<AccidentEvent>> {
    let records = csv_records(reader).collect::<Result<Vec<_>>>().context("dataset CSV inválido")?;
    Ok(to_events(&records))
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConvertStats {
    pub rows: usize,
    pub valid: usize,
    pub kept: usize,
}

/// Recorre el CSV en streaming y se queda con una muestra uniforme de como
/// mucho `sample_size` registros válidos dentro de EEUU (reservoir sampling),
/// normalizados (coordenadas y severidad numéricas, `Start_Time` presente) y barajados.
pub fn sample_us_records<R: Read, G: Rng>(
    reader: R,
    sample_size: usize,
    rng: &mut G,
) -> Result<(Vec<AccidentRecord>, ConvertStats)> {
    let now = Utc::now().format("%Y-%m-%d %H:%M:%S").to_string();
    let mut stats = ConvertStats::default();
    let mut sample: Vec<AccidentRecord> = Vec::with_capacity(sample_size.min(1 << 16));
    for rec in csv_records(reader) {
        let rec = rec?;
        stats.rows += 1;
        let (Some(lat), Some(lon)) = (rec.lat(), rec.lon()) else { continue };
        if !in_us_bounds(lat, lon) {
            continue;
        }
        stats.valid += 1;
        let clean = AccidentRecord {
            start_lat: Some(Value::from(lat)),
            start_lng: Some(Value::from(lon)),
            severity: Some(Value::from(severity_or_default(&rec.severity))),
            start_time: Some(rec.start_time.unwrap_or_else(|| now.clone())),
        };
        if sample.len() < sample_size {
            sample.push(clean);
        } else {
            let j = rng.gen_range(0..stats.valid);
            if j < sample_size {
                sample[j] = clean;
            }
        }
    }
    sample.shuffle(rng);
    stats.kept = sample.len();
    Ok((sample, stats))
}

// ---------------------------------------------------------------------------
// Fuentes
// ---------------------------------------------------------------------------

/// Fuente de accidentes ya materializada. Un fallo no es fatal: quien llama
/// cae al grid sintético.
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn load(&self) -> Result<Vec<AccidentEvent>>;
    fn describe(&self) -> String;
}

/// Fichero local: `.csv` como CSV original, el resto como JSON.
pub struct FileSource {
    pub path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn is_csv(&self) -> bool {
        self.path.extension().map_or(false, |e| e.eq_ignore_ascii_case("csv"))
    }
}

#[async_trait]
impl EventSource for FileSource {
    async fn load(&self) -> Result<Vec<AccidentEvent>> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .with_context(|| format!("leyendo dataset {}", self.path.display()))?;
        let events = if self.is_csv() {
            parse_csv(bytes.as_slice())?
        } else {
            parse_json(&String::from_utf8_lossy(&bytes))?
        };
        info!("dataset {}: {} accidentes", self.path.display(), events.len());
        Ok(events)
    }

    fn describe(&self) -> String {
        format!("file:{}", self.path.display())
    }
}

/// Dataset remoto (JSON). Con 304 se reutiliza la última carga.
pub struct UrlSource {
    client: Client,
    url: String,
    cache: Mutex<(CacheCtl, Option<Vec<AccidentEvent>>)>,
}

impl UrlSource {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self { client, url: url.into(), cache: Mutex::new((CacheCtl::default(), None)) }
    }
}

#[async_trait]
impl EventSource for UrlSource {
    async fn load(&self) -> Result<Vec<AccidentEvent>> {
        let mut guard = self.cache.lock().await;
        let (ctl, last) = &mut *guard;
        match fetch::get_with_cache(&self.client, &self.url, ctl).await? {
            Some(bytes) => {
                let events = parse_json(&String::from_utf8_lossy(&bytes))?;
                info!("dataset {}: {} accidentes", self.url, events.len());
                *last = Some(events.clone());
                Ok(events)
            }
            None => last.clone().with_context(|| format!("304 sin carga previa en {}", self.url)),
        }
    }

    fn describe(&self) -> String {
        format!("url:{}", self.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn json_accepts_numbers_and_strings() {
        let text = r#"[
            {"Start_Lat": 40.7128, "Start_Lng": -74.006, "Severity": 3},
            {"Start_Lat": "40.713", "Start_Lng": "-74.006", "Severity": "2"},
            {"Start_Lat": 34.05, "Start_Lng": -118.24},
            {"Start_Lat": null, "Start_Lng": -118.24, "Severity": 4},
            {"Start_Lat": "abc", "Start_Lng": 1.0},
            {"Start_Lat": 10.0, "Start_Lng": 20.0, "Severity": 0, "Start_Time": "2016-02-08 05:46:00"}
        ]"#;
        let ev = parse_json(text).unwrap();
        assert_eq!(ev.len(), 4);
        assert_eq!(ev[0].severity, 3);
        assert_eq!(ev[1], AccidentEvent::new(40.713, -74.006, 2));
        assert_eq!(ev[2].severity, 1);
        assert_eq!(ev[3].severity, 1);
        assert!(parse_json("{}").is_err());
    }

    #[test]
    fn severity_default_rules() {
        assert_eq!(severity_or_default(&Some(Value::from(3.7))), 3);
        assert_eq!(severity_or_default(&Some(Value::from("x"))), 1);
        assert_eq!(severity_or_default(&Some(Value::from(-2))), 1);
        assert_eq!(severity_or_default(&None), 1);
    }

    const CSV: &str = "ID,Severity,Start_Time,Start_Lat,Start_Lng,City\n\
        A-1,3,2016-02-08 05:46:00,39.865147,-84.058723,Dayton\n\
        A-2,2,,39.928059,-82.831184,Reynoldsburg\n\
        A-3,,2016-02-08 06:49:27,,-84.032608,Williamsburg\n\
        A-4,4,2016-02-08 07:23:34,51.5,-0.12,London\n\
        A-5,1,2016-02-08 07:39:07,39.747753,-84.205582,Dayton\n";

    #[test]
    fn csv_rows_become_events() {
        let ev = parse_csv(CSV.as_bytes()).unwrap();
        // sin latitud -> fuera; Londres sigue siendo un evento válido
        assert_eq!(ev.len(), 4);
        assert_eq!(ev[0], AccidentEvent::new(39.865147, -84.058723, 3));
    }

    #[test]
    fn conversion_filters_us_and_fills_defaults() {
        let mut rng = StdRng::seed_from_u64(42);
        let (recs, stats) = sample_us_records(CSV.as_bytes(), 50_000, &mut rng).unwrap();
        assert_eq!(stats, ConvertStats { rows: 5, valid: 3, kept: 3 });
        assert!(recs.iter().all(|r| r.start_time.is_some()));
        assert!(recs.iter().all(|r| in_us_bounds(r.lat().unwrap(), r.lon().unwrap())));

        let (small, stats) = sample_us_records(CSV.as_bytes(), 2, &mut rng).unwrap();
        assert_eq!(small.len(), 2);
        assert_eq!(stats.valid, 3);

        // la salida vuelve a cargarse con el parser JSON
        let json = serde_json::to_string(&recs).unwrap();
        assert_eq!(parse_json(&json).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn file_source_reads_json_and_csv() {
        let dir = tempfile::tempdir().unwrap();
        let json = dir.path().join("acc.json");
        std::fs::write(&json, r#"[{"Start_Lat": 40.7, "Start_Lng": -74.0, "Severity": 2}]"#).unwrap();
        let csv = dir.path().join("acc.CSV");
        std::fs::write(&csv, CSV).unwrap();

        assert_eq!(FileSource::new(&json).load().await.unwrap().len(), 1);
        assert_eq!(FileSource::new(&csv).load().await.unwrap().len(), 4);
        assert!(FileSource::new(dir.path().join("nada.json")).load().await.is_err());
    }
}
