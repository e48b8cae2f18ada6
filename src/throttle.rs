//! throttle.rs
//!
//! Limita cuántas veces se notifica al consumidor (el dashboard) un riesgo
//! recalculado. Como mucho una aplicación por intervalo; las llamadas que
//! llegan antes sustituyen a la pendiente (un solo temporizador, nunca una
//! cola) y solo se aplica el último valor.
//!
//! Los cálculos asíncronos (inferencia del modelo) llevan un `Ticket` de
//! generación: si al resolver ya hay uno más nuevo, el resultado se descarta.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(500);

/// Token de generación de un cálculo en curso.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ticket(u64);

struct Inner<V, C> {
    last_applied: Option<Instant>,
    pending: Option<JoinHandle<()>>,
    latest: Option<(V, C)>,
}

pub struct UpdateThrottle<V, C> {
    interval: Duration,
    inner: Arc<Mutex<Inner<V, C>>>,
    generation: AtomicU64,
    apply: Arc<dyn Fn(V, C) + Send + Sync>,
}

impl<V, C> UpdateThrottle<V, C>
where
    V: Send + 'static,
    C: Send + 'static,
{
    pub fn new<F>(interval: Duration, apply: F) -> Self
    where
        F: Fn(V, C) + Send + Sync + 'static,
    {
        Self {
            interval,
            inner: Arc::new(Mutex::new(Inner { last_applied: None, pending: None, latest: None })),
            generation: AtomicU64::new(0),
            apply: Arc::new(apply),
        }
    }

    /// Abre un cálculo nuevo; invalida los tickets anteriores.
    pub fn begin(&self) -> Ticket {
        Ticket(self.generation.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub fn is_current(&self, ticket: Ticket) -> bool {
        self.generation.load(Ordering::SeqCst) == ticket.0
    }

    /// Entrega síncrona: también deja obsoleto cualquier cálculo en vuelo.
    pub async fn submit(&self, value: V, ctx: C) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.lock().await;
        self.schedule(&mut inner, value, ctx);
    }

    /// Entrega el resultado de un cálculo solo si su ticket sigue vigente.
    pub async fn submit_if_current(&self, ticket: Ticket, value: V, ctx: C) -> bool {
        let mut inner = self.inner.lock().await;
        if !self.is_current(ticket) {
            debug!("throttle: resultado obsoleto descartado ({ticket:?})");
            return false;
        }
        self.schedule(&mut inner, value, ctx);
        true
    }

    /// Ejecuta `compute` con un ticket nuevo y entrega el resultado si nadie lo ha superado.
    pub async fn submit_async<Fut>(&self, compute: Fut, ctx: C) -> bool
    where
        Fut: Future<Output = V>,
    {
        let ticket = self.begin();
        let value = compute.await;
        self.submit_if_current(ticket, value, ctx).await
    }

    /// ¿Hay una actualización diferida esperando?
    pub async fn has_pending(&self) -> bool {
        self.inner.lock().await.latest.is_some()
    }

    /// Descarta lo pendiente sin aplicarlo.
    pub async fn cancel(&self) {
        let mut inner = self.inner.lock().await;
        if let Some(h) = inner.pending.take() {
            h.abort();
        }
        inner.latest = None;
    }

    fn schedule(&self, inner: &mut Inner<V, C>, value: V, ctx: C) {
        if let Some(h) = inner.pending.take() {
            h.abort();
        }
        let now = Instant::now();
        match inner.last_applied {
            Some(last) if now.duration_since(last) < self.interval => {
                inner.latest = Some((value, ctx));
                let deadline = last + self.interval;
                let shared = Arc::clone(&self.inner);
                let apply = Arc::clone(&self.apply);
                inner.pending = Some(tokio::spawn(async move {
                    tokio::time::sleep_until(deadline).await;
                    let mut g = shared.lock().await;
                    g.pending = None;
                    if let Some((v, c)) = g.latest.take() {
                        g.last_applied = Some(Instant::now());
                        apply(v, c);
                    }
                }));
            }
            _ => {
                inner.latest = None;
                inner.last_applied = Some(now);
                (self.apply)(value, ctx);
            }
        }
    }
}
