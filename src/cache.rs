//! cache.rs
//!
//! Caché persistente de zonas: evita reconstruir el grid desde el dataset en
//! cada arranque. El valor guardado es la lista `[[cellKey, weight], ..]`.
//! Una caché ausente o corrupta nunca es fatal: se reconstruye desde la fuente.

use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::grid::GridIndex;

#[async_trait]
pub trait ZoneCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn put(&self, key: &str, value: &str) -> Result<()>;
}

/// Un fichero por clave dentro de `dir`.
pub struct FileZoneCache {
    dir: PathBuf,
}

impl FileZoneCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let safe: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{safe}.json"))
    }
}

#[async_trait]
impl ZoneCache for FileZoneCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key);
        match tokio::fs::read_to_string(&path).await {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("leyendo caché {}", path.display())),
        }
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("creando {}", self.dir.display()))?;
        let path = self.path_for(key);
        // escribir aparte y renombrar: un lector nunca ve un fichero a medias
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, value).await.with_context(|| format!("escribiendo {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

/// Serializa un grid real; los sintéticos no se guardan.
pub fn encode_grid(grid: &GridIndex) -> Option<String> {
    if grid.is_synthetic() {
        return None;
    }
    serde_json::to_string(&grid.to_cells()).ok()
}

pub fn decode_grid(payload: &str) -> Result<GridIndex> {
    let cells: Vec<(String, f64)> = serde_json::from_str(payload).context("caché de zonas corrupta")?;
    Ok(GridIndex::from_cells(cells))
}

/// Lee el grid cacheado; cualquier fallo se registra y devuelve `None`.
pub async fn load_grid(cache: &dyn ZoneCache, key: &str) -> Option<GridIndex> {
    let payload = match cache.get(key).await {
        Ok(Some(p)) => p,
        Ok(None) => {
            debug!("caché {key}: vacía");
            return None;
        }
        Err(e) => {
            warn!("caché get {key}: {e:?}");
            return None;
        }
    };
    match decode_grid(&payload) {
        Ok(g) if !g.is_empty() => Some(g),
        Ok(_) => {
            warn!("caché {key}: sin celdas, se reconstruye");
            None
        }
        Err(e) => {
            warn!("caché {key}: {e:?}");
            None
        }
    }
}

pub async fn store_grid(cache: &dyn ZoneCache, key: &str, grid: &GridIndex) {
    let Some(payload) = encode_grid(grid) else {
        debug!("caché {key}: grid sintético, no se guarda");
        return;
    };
    if let Err(e) = cache.put(key, &payload).await {
        warn!("caché put {key}: {e:?}");
    }
}
