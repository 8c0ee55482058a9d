// Module: Execs
// The leaf behaviours a plan can attach to an action, plus the registry
// that maps exec names to implementations. The registry is injectable:
// the engine always receives an instance, and a lazily-built process
// default carries the built-in families (sample, dut, servo, power).

pub mod dut;
pub mod power;
pub mod sample;
pub mod servo;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::access::{Access, AccessError, Dut};

// ----------------------------------------------------------------------------
// Errors
// ----------------------------------------------------------------------------

/// Failure returned by an exec body.
///
/// `Abort` is the in-band marker the retry helpers honour: an aborted
/// error terminates a retry loop immediately instead of burning the
/// remaining attempts.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error(transparent)]
    Failure(#[from] anyhow::Error),

    #[error("abortado: {0}")]
    Abort(String),
}

impl ExecError {
    /// Plain failure from a message.
    pub fn failure(message: impl fmt::Display) -> Self {
        Self::Failure(anyhow::anyhow!("{}", message))
    }

    /// Failure carrying the abort marker.
    pub fn abort(message: impl Into<String>) -> Self {
        Self::Abort(message.into())
    }

    pub fn is_abort(&self) -> bool {
        matches!(self, Self::Abort(_))
    }
}

impl From<AccessError> for ExecError {
    fn from(err: AccessError) -> Self {
        Self::Failure(err.into())
    }
}

// ----------------------------------------------------------------------------
// Run arguments
// ----------------------------------------------------------------------------

/// Everything an exec may consume. Owned so the engine can hand it to a
/// detached task.
#[derive(Clone)]
pub struct ExecRunArgs {
    /// The only path to the device.
    pub access: Arc<dyn Access>,

    /// Resource the enclosing plan runs against.
    pub resource: String,

    /// Inventory snapshot taken at plan start, when available.
    pub dut: Option<Dut>,

    /// `exec_extra_args` of the action, in declaration order.
    pub extra_args: Vec<String>,

    /// The action's exec timeout; retries inside the exec count
    /// against this same budget.
    pub timeout: Duration,

    /// Cancelled when the engine gives up on this exec.
    pub cancel: CancellationToken,
}

impl ExecRunArgs {
    pub fn arg(&self, index: usize) -> Option<&str> {
        self.extra_args.get(index).map(String::as_str)
    }

    /// Numeric extra-arg with a fallback for absent or malformed input.
    pub fn arg_u32(&self, index: usize, default: u32) -> u32 {
        self.arg(index)
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(default)
    }

    /// Servo host adjacent to the resource: the inventory record wins,
    /// otherwise the conventional "<resource>-servo" name.
    pub fn servo_host(&self) -> String {
        self.dut
            .as_ref()
            .and_then(|d| d.servo_host.clone())
            .unwrap_or_else(|| format!("{}-servo", self.resource))
    }
}

// ----------------------------------------------------------------------------
// Exec trait and registry
// ----------------------------------------------------------------------------

/// A named leaf behaviour.
#[async_trait]
pub trait Exec: Send + Sync {
    async fn run(&self, args: &ExecRunArgs) -> Result<(), ExecError>;
}

/// Mapping from exec name to implementation.
#[derive(Clone, Default)]
pub struct ExecRegistry {
    execs: HashMap<String, Arc<dyn Exec>>,
}

impl ExecRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, exec: Arc<dyn Exec>) {
        self.execs.insert(name.to_string(), exec);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Exec>> {
        self.execs.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.execs.contains_key(name)
    }
}

/// Builds a registry with every built-in exec.
pub fn default_registry() -> ExecRegistry {
    let mut registry = ExecRegistry::new();

    sample::register(&mut registry);
    dut::register(&mut registry);
    servo::register(&mut registry);
    power::register(&mut registry);

    registry
}

static GLOBAL_REGISTRY: Lazy<Arc<ExecRegistry>> = Lazy::new(|| Arc::new(default_registry()));

/// Process-wide default registry, built on first use.
pub fn global_registry() -> Arc<ExecRegistry> {
    GLOBAL_REGISTRY.clone()
}
