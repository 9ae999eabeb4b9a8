use anyhow::{Context, Result};
use serde::Serialize;
use std::future::Future;
use tracing::warn;

use crate::baremetal::{Baremetal, BaremetalClient};
use crate::config::BaremetalConfig;

pub mod maintenance;
pub mod node;
pub mod power;
pub mod provision;

#[allow(async_fn_in_trait)]
pub trait Command {
    async fn execute(&self, baremetal: &Baremetal<BaremetalClient>) -> Result<()>;
}

/// Connect to the configured bare metal API
pub fn connect(config: &BaremetalConfig) -> Result<Baremetal<BaremetalClient>> {
    Baremetal::connect(config)
        .with_context(|| format!("Failed to connect to bare metal API at {}", config.endpoint.url))
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Run `operation` until it finishes or the user hits Ctrl-C.
///
/// Interrupting only stops waiting; the service keeps working on the node.
pub async fn until_interrupted<F, T>(operation: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        result = operation => result,
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
            warn!("Interrupted, the operation continues on the service");
            anyhow::bail!("interrupted while waiting")
        }
    }
}

fn timeout_from_secs(timeout: Option<u64>) -> Option<std::time::Duration> {
    timeout.map(std::time::Duration::from_secs)
}
