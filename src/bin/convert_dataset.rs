//! convert_dataset.rs — CSV de Kaggle "US Accidents" -> JSON que carga el dashboard.
//!
//! Uso: convert_dataset <entrada.csv> [salida.json] [tamaño_muestra]

use std::{env, fs, io::BufReader, path::Path};

use anyhow::{Context, Result};
use rand::{rngs::StdRng, SeedableRng};
use tracing::info;
use tracing_subscriber::EnvFilter;

use riskgrid::dataset::sample_us_records;

const SAMPLE_SIZE: usize = 50_000;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let input = args.first().context("uso: convert_dataset <entrada.csv> [salida.json] [tamaño_muestra]")?;
    let output = args.get(1).map(String::as_str).unwrap_or("data/us_accidents_sample.json");
    let size = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(SAMPLE_SIZE);

    info!("Convirtiendo {input} (muestra de {size})");
    let file = fs::File::open(input).with_context(|| format!("abriendo {input}"))?;
    let mut rng = StdRng::seed_from_u64(42);
    let (records, stats) = sample_us_records(BufReader::new(file), size, &mut rng)?;
    info!("{} filas, {} válidas en EEUU, {} en la muestra", stats.rows, stats.valid, stats.kept);

    if let Some(dir) = Path::new(output).parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    let json = serde_json::to_string_pretty(&records)?;
    fs::write(output, &json).with_context(|| format!("escribiendo {output}"))?;
    info!("Escrito {output} ({:.2} MB)", json.len() as f64 / (1024.0 * 1024.0));
    Ok(())
}
