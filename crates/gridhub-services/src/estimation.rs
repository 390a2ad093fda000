//! Estimation client — serialized access to the estimation engine.
//!
//! The engine lives on one dedicated OS thread and takes requests from a
//! bounded queue, one at a time. Connection workers hold cheap clones of the
//! client and await a oneshot reply, so they never block each other's socket
//! I/O while an estimate runs.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};

use gridhub_core::config::{EngineConfig, EngineKind};

use crate::engine::{EngineError, EstimateParams, EstimationEngine};
use crate::process_engine::ProcessEngine;
use crate::radial_engine::RadialFlowEngine;

/// Results closer to zero than this are reported as exactly zero.
pub const DEAD_ZONE: f64 = 0.0001;

/// Decimal places kept in a reported estimate.
pub const DECIMALS: usize = 4;

/// Round to four decimals, half away from zero, then clamp the dead zone
/// to zero.
pub fn normalize_estimate(raw: f64) -> f64 {
    let rounded = round_decimal(raw, DECIMALS);
    if rounded.abs() < DEAD_ZONE {
        0.0
    } else {
        rounded
    }
}

/// Round on the shortest decimal form of `value` rather than on a scaled
/// binary value, so `0.00015` rounds as written (up) and large values
/// cannot overflow.
fn round_decimal(value: f64, places: usize) -> f64 {
    if !value.is_finite() {
        return value;
    }

    // `Display` for f64 is the shortest round-trip form, never exponential.
    let text = value.abs().to_string();
    let (whole, fraction) = text.split_once('.').unwrap_or((text.as_str(), ""));
    if fraction.len() <= places {
        return value;
    }

    let mut digits: Vec<u8> = whole
        .bytes()
        .chain(fraction.bytes().take(places))
        .map(|b| b - b'0')
        .collect();

    if fraction.as_bytes()[places] >= b'5' {
        let mut carry = true;
        for digit in digits.iter_mut().rev() {
            if *digit == 9 {
                *digit = 0;
            } else {
                *digit += 1;
                carry = false;
                break;
            }
        }
        if carry {
            digits.insert(0, 1);
        }
    }

    let point = digits.len() - places;
    let mut rounded = String::with_capacity(digits.len() + 1);
    for (i, digit) in digits.iter().enumerate() {
        if i == point {
            rounded.push('.');
        }
        rounded.push(char::from(b'0' + digit));
    }

    rounded
        .parse::<f64>()
        .map(|magnitude| magnitude.copysign(value))
        .unwrap_or(value)
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EstimationError {
    #[error("estimation engine is not running")]
    Stopped,
    #[error("estimation timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

enum Job {
    Estimate {
        params: EstimateParams,
        reply: oneshot::Sender<Result<f64, EngineError>>,
    },
    Shutdown,
}

#[derive(Clone)]
pub struct EstimationClient {
    jobs: mpsc::Sender<Job>,
    timeout: Option<Duration>,
    thread: Arc<Mutex<Option<std::thread::JoinHandle<()>>>>,
}

impl EstimationClient {
    /// Move `engine` onto its own thread and return a handle to it.
    pub fn start(
        engine: Box<dyn EstimationEngine>,
        queue_depth: usize,
        timeout: Option<Duration>,
    ) -> std::io::Result<Self> {
        let (jobs, rx) = mpsc::channel(queue_depth.max(1));
        let thread = std::thread::Builder::new()
            .name("gridhub-engine".into())
            .spawn(move || engine_loop(engine, rx))?;

        Ok(Self {
            jobs,
            timeout,
            thread: Arc::new(Mutex::new(Some(thread))),
        })
    }

    /// Build the configured engine and start it.
    pub fn from_config(config: &EngineConfig) -> Result<Self, EngineError> {
        let engine: Box<dyn EstimationEngine> = match config.kind {
            EngineKind::Radial => Box::new(RadialFlowEngine::new()),
            EngineKind::Process => Box::new(ProcessEngine::spawn(&config.command, &config.args)?),
        };
        Self::start(engine, config.queue_depth, config.timeout())
            .map_err(|e| EngineError::Unavailable(format!("failed to start engine thread: {e}")))
    }

    /// Run one estimate and normalize the result.
    pub async fn estimate(&self, params: EstimateParams) -> Result<f64, EstimationError> {
        let (reply, rx) = oneshot::channel();
        self.jobs
            .send(Job::Estimate { params, reply })
            .await
            .map_err(|_| EstimationError::Stopped)?;

        let raw = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, rx)
                .await
                .map_err(|_| EstimationError::Timeout(limit))?,
            None => rx.await,
        }
        .map_err(|_| EstimationError::Stopped)??;

        if !raw.is_finite() {
            return Err(EngineError::Failed(format!("non-finite result {raw}")).into());
        }
        let value = normalize_estimate(raw);
        if !value.is_finite() {
            return Err(EngineError::Failed(format!("result {raw} does not normalize")).into());
        }
        Ok(value)
    }

    /// Stop the engine thread and release the engine. Requests already
    /// queued are answered first; later ones fail with `Stopped`.
    pub async fn shutdown(&self) {
        let Some(thread) = self.thread.lock().await.take() else {
            return;
        };
        let _ = self.jobs.send(Job::Shutdown).await;
        match tokio::task::spawn_blocking(move || thread.join()).await {
            Ok(Ok(())) => tracing::info!("estimation engine released"),
            Ok(Err(_)) => tracing::error!("estimation engine thread panicked"),
            Err(e) => tracing::error!(error = %e, "failed to join estimation engine thread"),
        }
    }
}

fn engine_loop(mut engine: Box<dyn EstimationEngine>, mut rx: mpsc::Receiver<Job>) {
    tracing::info!(engine = engine.name(), "estimation engine ready");
    while let Some(job) = rx.blocking_recv() {
        match job {
            Job::Estimate { params, reply } => {
                let result = engine.estimate(&params);
                if let Err(e) = &result {
                    tracing::warn!(engine = engine.name(), error = %e, "estimate failed");
                }
                // Requester may have timed out and gone away.
                let _ = reply.send(result);
            }
            Job::Shutdown => break,
        }
    }
    rx.close();
    engine.shutdown();
}
