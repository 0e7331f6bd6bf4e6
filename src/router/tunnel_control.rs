//! Tunnel service control
//!
//! Drives the host's `warp-go` service through systemd. Routing never
//! depends on this: dialing relies on the interface and policy routing
//! alone, so a missing or stopped service only shows up in health checks.

use tokio::process::Command;
use tracing::{error, info};

use crate::error::{Error, Result};

const TUNNEL_SERVICE: &str = "warp-go";

/// Enables and disables the tunnel service.
pub struct TunnelControl {
    enabled: bool,
}

impl TunnelControl {
    pub async fn new() -> Self {
        let enabled = Self::is_service_active().await;
        info!(
            "Tunnel control initialized (currently {})",
            if enabled { "enabled" } else { "disabled" }
        );
        Self { enabled }
    }

    async fn is_service_active() -> bool {
        let output = Command::new("systemctl")
            .args(["is-active", TUNNEL_SERVICE])
            .output()
            .await;
        match output {
            Ok(out) => String::from_utf8_lossy(&out.stdout).trim() == "active",
            Err(_) => false,
        }
    }

    pub async fn enable(&mut self) -> Result<()> {
        if self.enabled {
            return Ok(());
        }
        self.run_systemctl("start").await?;
        self.enabled = true;
        info!("Tunnel enabled");
        Ok(())
    }

    pub async fn disable(&mut self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        self.run_systemctl("stop").await?;
        self.enabled = false;
        info!("Tunnel disabled");
        Ok(())
    }

    async fn run_systemctl(&self, verb: &str) -> Result<()> {
        let output = Command::new("systemctl")
            .args([verb, TUNNEL_SERVICE])
            .output()
            .await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!("systemctl {} {} failed: {}", verb, TUNNEL_SERVICE, stderr.trim());
            return Err(Error::Config(format!(
                "systemctl {} {} failed",
                verb, TUNNEL_SERVICE
            )));
        }
        Ok(())
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}
