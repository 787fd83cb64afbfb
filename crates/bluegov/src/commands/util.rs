//! Shared helpers for command handlers.

use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use bluegov_config::ManagerSettings;
use bluegov_core::{BluetoothManager, MemoryTransport, RadioFixture};

use super::Context;
use crate::error::CliError;

/// Build the simulated radio from the configured fixture file.
pub fn load_transport(ctx: &Context) -> Result<Arc<MemoryTransport>, CliError> {
    let path = ctx.fixture.as_deref().ok_or_else(|| CliError::NoFixture {
        config_path: ctx.config_path.display().to_string(),
    })?;
    let fixture = read_fixture(path)?;
    let transport = MemoryTransport::from_fixture(&fixture).map_err(|e| CliError::Fixture {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    debug!(path = %path.display(), adapters = fixture.adapters.len(), "radio fixture loaded");
    Ok(Arc::new(transport))
}

fn read_fixture(path: &Path) -> Result<RadioFixture, CliError> {
    let fixture_err = |reason: String| CliError::Fixture {
        path: path.display().to_string(),
        reason,
    };
    let raw = std::fs::read_to_string(path).map_err(|e| fixture_err(e.to_string()))?;
    toml::from_str(&raw).map_err(|e| fixture_err(e.to_string()))
}

/// A stopped manager over the fixture radio, with the config file's
/// manager settings adjusted by `tweak`.
pub fn build_manager(
    ctx: &Context,
    tweak: impl FnOnce(&mut ManagerSettings),
) -> Result<BluetoothManager, CliError> {
    let mut settings = ctx.config.manager.clone();
    tweak(&mut settings);
    let config = settings.to_manager_config()?;
    let transport = load_transport(ctx)?;
    Ok(BluetoothManager::new(transport, config)?)
}

/// Two discovery cycles: the first finds the adapters, the second scans
/// behind them once their discovery has been switched on.
pub async fn discover(manager: &BluetoothManager) -> Result<(), CliError> {
    manager.discovery_cycle().await?;
    for adapter in manager.discovered_adapters()? {
        manager
            .adapter_governor(&adapter.url)?
            .set_discovering_control(true)?;
    }
    manager.discovery_cycle().await?;
    Ok(())
}
