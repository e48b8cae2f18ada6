//! model.rs
//!
//! Red feed-forward pequeña (capas densas) cargada desde un JSON de pesos.
//! El entrenamiento queda fuera; aquí solo se hace inferencia.
//!
//! Formato:
//! `{"layers":[{"weights":[[..],..],"bias":[..],"activation":"relu"}, ..]}`
//! con `weights[salida][entrada]`.

use std::path::Path;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::scorer::Regressor;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    Relu,
    Sigmoid,
    Tanh,
    Linear,
}

impl Activation {
    #[inline]
    fn apply(self, x: f64) -> f64 {
        match self {
            Activation::Relu => x.max(0.0),
            Activation::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            Activation::Tanh => x.tanh(),
            Activation::Linear => x,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DenseLayer {
    pub weights: Vec<Vec<f64>>,
    pub bias: Vec<f64>,
    pub activation: Activation,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FeedForwardModel {
    pub layers: Vec<DenseLayer>,
}

impl FeedForwardModel {
    pub fn from_json(text: &str) -> Result<Self> {
        let m: FeedForwardModel = serde_json::from_str(text).context("JSON de modelo inválido")?;
        m.validate()?;
        Ok(m)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).with_context(|| format!("leyendo modelo {}", path.display()))?;
        Self::from_json(&text)
    }

    /// Comprueba dimensiones encadenadas: 3 entradas -> ... -> 1 salida.
    fn validate(&self) -> Result<()> {
        if self.layers.is_empty() { bail!("modelo sin capas"); }
        let mut inputs = 3usize;
        for (i, l) in self.layers.iter().enumerate() {
            if l.weights.is_empty() || l.weights.len() != l.bias.len() {
                bail!("capa {i}: {} filas de pesos y {} bias", l.weights.len(), l.bias.len());
            }
            if let Some(row) = l.weights.iter().find(|r| r.len() != inputs) {
                bail!("capa {i}: fila de {} pesos, se esperaban {inputs}", row.len());
            }
            inputs = l.weights.len();
        }
        if inputs != 1 { bail!("la última capa debe tener 1 salida (tiene {inputs})"); }
        Ok(())
    }

    pub fn forward(&self, input: &[f64]) -> f64 {
        let mut x = input.to_vec();
        for l in &self.layers {
            x = l
                .weights
                .iter()
                .zip(&l.bias)
                .map(|(row, b)| l.activation.apply(row.iter().zip(&x).map(|(w, v)| w * v).sum::<f64>() + b))
                .collect();
        }
        x.first().copied().unwrap_or(0.0)
    }
}

#[async_trait]
impl Regressor for FeedForwardModel {
    async fn predict(&self, features: [f64; 3]) -> Result<f64> {
        Ok(self.forward(&features))
    }
}
