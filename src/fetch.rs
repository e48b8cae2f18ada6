//! fetch.rs
//! GET con caché condicional (ETag / Last-Modified) y lectura de sensores.

use anyhow::Result;
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::warn;

/// Lectura por defecto cuando un sensor no responde.
pub const FALLBACK_TEMP: f64 = 20.0;
pub const FALLBACK_HUM: f64 = 50.0;

#[derive(Default, Clone, Debug)]
pub struct CacheCtl {
    pub etag: Option<String>,
    pub last_mod: Option<String>,
}

/// `Ok(None)` si el servidor responde 304 (nada nuevo).
pub async fn get_with_cache(client: &Client, url: &str, cache: &mut CacheCtl) -> Result<Option<Bytes>> {
    let mut req = client.get(url);
    if let Some(et) = &cache.etag {
        req = req.header("If-None-Match", et);
    }
    if let Some(lm) = &cache.last_mod {
        req = req.header("If-Modified-Since", lm);
    }
    let resp = req.send().await?;
    match resp.status() {
        StatusCode::NOT_MODIFIED => Ok(None),
        StatusCode::OK => {
            let header = |name: &str| resp.headers().get(name).and_then(|v| v.to_str().ok()).map(str::to_string);
            cache.etag = header("etag");
            cache.last_mod = header("last-modified");
            Ok(Some(resp.bytes().await?))
        }
        s => anyhow::bail!("HTTP {} en {}", s, url),
    }
}

/// Valor de sensor: número JSON o cadena numérica. `null` u otra cosa => `None`.
pub fn sensor_value(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|x| x.is_finite())
}

pub async fn read_sensor_value(client: &Client, url: &str) -> Result<Option<f64>> {
    let v: Value = client.get(url).send().await?.error_for_status()?.json().await?;
    Ok(sensor_value(&v))
}

/// (temperatura, humedad); cualquier fallo cae a 20 ºC / 50 %.
pub async fn read_sensors(client: &Client, url_temp: &str, url_hum: &str) -> (f64, f64) {
    let (t, h) = tokio::join!(read_sensor_value(client, url_temp), read_sensor_value(client, url_hum));
    let pick = |name: &str, r: Result<Option<f64>>, fallback: f64| match r {
        Ok(Some(x)) => x,
        Ok(None) => fallback,
        Err(e) => {
            warn!("sensor {name}: {e:?}");
            fallback
        }
    };
    (pick("temperatura", t, FALLBACK_TEMP), pick("humedad", h, FALLBACK_HUM))
}
