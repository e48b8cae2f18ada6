//! telemetry.rs
//!
//! Flujo de telemetría append-only. El dashboard usa `MemoryStream`
//! (histórico acotado en memoria, opcionalmente respaldado por un journal
//! JSONL, con suscripción en vivo); el simulador publica vía `HttpStream`.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use tokio::io::AsyncWriteExt;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

use crate::models::types::TelemetrySample;

#[async_trait]
pub trait TelemetryStream: Send + Sync {
    async fn publish(&self, sample: TelemetrySample) -> Result<()>;

    /// Últimas `limit` muestras, de la más antigua a la más nueva.
    async fn recent(&self, limit: usize) -> Result<Vec<TelemetrySample>>;
}

// ---------------------------------------------------------------------------
// En memoria
// ---------------------------------------------------------------------------

pub struct MemoryStream {
    cap: usize,
    buf: RwLock<VecDeque<TelemetrySample>>,
    tx: broadcast::Sender<TelemetrySample>,
    journal: Option<PathBuf>,
}

impl MemoryStream {
    pub fn new(cap: usize) -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { cap: cap.max(1), buf: RwLock::new(VecDeque::new()), tx, journal: None }
    }

    /// Igual que `new`, pero cada muestra se añade al fichero `path` y al
    /// arrancar se recuperan las últimas `cap` líneas válidas.
    pub async fn with_journal(cap: usize, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut s = Self::new(cap);
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => {
                let mut bad = 0usize;
                let mut buf = VecDeque::new();
                for line in text.lines().filter(|l| !l.trim().is_empty()) {
                    match serde_json::from_str::<TelemetrySample>(line) {
                        Ok(sample) => {
                            buf.push_back(sample);
                            if buf.len() > s.cap {
                                buf.pop_front();
                            }
                        }
                        Err(_) => bad += 1,
                    }
                }
                if bad > 0 {
                    warn!("journal {}: {bad} líneas ilegibles ignoradas", path.display());
                }
                info!("journal {}: {} muestras recuperadas", path.display(), buf.len());
                s.buf = RwLock::new(buf);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("journal {} no existe todavía", path.display());
            }
            Err(e) => return Err(e).with_context(|| format!("leyendo journal {}", path.display())),
        }
        s.journal = Some(path);
        Ok(s)
    }

    /// Suscripción en vivo (solo muestras publicadas a partir de ahora).
    pub fn subscribe(&self) -> broadcast::Receiver<TelemetrySample> {
        self.tx.subscribe()
    }

    pub async fn len(&self) -> usize {
        self.buf.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.buf.read().await.is_empty()
    }

    /// Copia completa del histórico en memoria (antigua -> nueva).
    pub async fn snapshot(&self) -> Vec<TelemetrySample> {
        self.buf.read().await.iter().cloned().collect()
    }

    async fn append_journal(&self, sample: &TelemetrySample) -> Result<()> {
        let Some(path) = &self.journal else { return Ok(()) };
        let mut line = serde_json::to_string(sample)?;
        line.push('\n');
        let mut f = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .with_context(|| format!("abriendo journal {}", path.display()))?;
        f.write_all(line.as_bytes()).await?;
        Ok(())
    }
}

#[async_trait]
impl TelemetryStream for MemoryStream {
    async fn publish(&self, sample: TelemetrySample) -> Result<()> {
        // el journal primero: si falla, la muestra no entra en memoria
        self.append_journal(&sample).await?;
        {
            let mut buf = self.buf.write().await;
            buf.push_back(sample.clone());
            while buf.len() > self.cap {
                buf.pop_front();
            }
        }
        // sin suscriptores no es un error
        let _ = self.tx.send(sample);
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<TelemetrySample>> {
        let buf = self.buf.read().await;
        let skip = buf.len().saturating_sub(limit);
        Ok(buf.iter().skip(skip).cloned().collect())
    }
}

// ---------------------------------------------------------------------------
// HTTP (simulador -> dashboard)
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct HttpStream {
    client: Client,
    base: String,
}

impl HttpStream {
    pub fn new(client: Client, base: impl Into<String>) -> Self {
        let base = base.into().trim_end_matches('/').to_string();
        Self { client, base }
    }

    fn url(&self) -> String {
        format!("{}/telemetry", self.base)
    }
}

#[async_trait]
impl TelemetryStream for HttpStream {
    async fn publish(&self, sample: TelemetrySample) -> Result<()> {
        let url = self.url();
        self.client
            .post(&url)
            .json(&sample)
            .send()
            .await
            .with_context(|| format!("POST {url}"))?
            .error_for_status()?;
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<TelemetrySample>> {
        let url = self.url();
        let samples = self
            .client
            .get(&url)
            .query(&[("limit", limit)])
            .send()
            .await
            .with_context(|| format!("GET {url}"))?
            .error_for_status()?
            .json::<Vec<TelemetrySample>>()
            .await?;
        Ok(samples)
    }
}
