//! Launch write-through for the navigation application.
//!
//! The navigation application reads a small JSON file at startup naming the
//! vehicle identity it plans for and where to publish route plans. Starting
//! and stopping the application itself is left to the operator's launcher.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;

use range_types::Identity;
use serde::Serialize;
use tokio::fs;
use tracing::info;

use crate::identity::IdentityRegistry;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationLaunchConfig {
    pub vehicle_id: Identity,
    pub multicast_group: Ipv4Addr,
    pub port: u16,
}

pub struct NavigationBridge {
    identity: Arc<IdentityRegistry>,
    config_path: PathBuf,
    multicast_group: Ipv4Addr,
    port: u16,
}

impl NavigationBridge {
    pub fn new(
        identity: Arc<IdentityRegistry>,
        config_path: PathBuf,
        multicast_group: Ipv4Addr,
        port: u16,
    ) -> Self {
        Self {
            identity,
            config_path,
            multicast_group,
            port,
        }
    }

    /// Resolve the launch identity and write the application's config file.
    /// An existing identity is never replaced here.
    pub async fn prepare_launch(&self) -> anyhow::Result<NavigationLaunchConfig> {
        let vehicle_id = self.identity.prepare_for_external_launch().await;
        let launch = NavigationLaunchConfig {
            vehicle_id,
            multicast_group: self.multicast_group,
            port: self.port,
        };

        let json = serde_json::to_string_pretty(&launch)?;
        fs::write(&self.config_path, json).await.map_err(|e| {
            anyhow::anyhow!("failed to write {}: {e}", self.config_path.display())
        })?;
        info!(
            "Navigation launch prepared for identity {vehicle_id} ({})",
            self.config_path.display()
        );
        Ok(launch)
    }
}
