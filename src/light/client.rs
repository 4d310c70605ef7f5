use std::future::Future;

use anyhow::Result;
use log::info;

/// A remote light that can be switched on or off.
///
/// Implementations perform the network call and report only success or
/// failure. They are driven from the dispatcher worker, never from the
/// sensing loop, so they are free to block on I/O.
pub trait LightClient: Send + Sync + 'static {
    fn set_power(&self, on: bool) -> impl Future<Output = Result<()>> + Send;

    /// Device identity for log lines.
    fn describe(&self) -> String;
}

/// Accepts every command without touching the network.
#[derive(Debug, Clone, Default)]
pub struct DryRunClient;

impl LightClient for DryRunClient {
    async fn set_power(&self, on: bool) -> Result<()> {
        info!("[dry-run] would switch light {}", on_off(on));
        Ok(())
    }

    fn describe(&self) -> String {
        "dry-run light".to_string()
    }
}

pub fn on_off(on: bool) -> &'static str {
    if on {
        "ON"
    } else {
        "OFF"
    }
}
