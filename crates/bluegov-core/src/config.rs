// ── Runtime manager configuration ──
//
// Tuning for a `BluetoothManager`. The config crate builds one from files
// and environment; core never reads config files itself.

use std::time::Duration;

use crate::error::CoreError;

/// Settings applied when a [`BluetoothManager`](crate::BluetoothManager)
/// is constructed. Rates are read again on every `start()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Period of the discovery (scan) task.
    pub discovery_rate: Duration,
    /// Period of the refresh (control reconciliation) task.
    pub refresh_rate: Duration,
    /// Re-announce still-present entities on every cycle.
    pub rediscover: bool,
    /// Present all adapters as one combined adapter.
    pub combined_adapters: bool,
    /// Present same-address devices seen through several adapters as one.
    pub combined_devices: bool,
}

impl ManagerConfig {
    /// Reject settings no scheduler can run with.
    pub fn validate(&self) -> Result<(), CoreError> {
        validate_rate("discovery_rate", self.discovery_rate)?;
        validate_rate("refresh_rate", self.refresh_rate)
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            discovery_rate: Duration::from_secs(10),
            refresh_rate: Duration::from_secs(5),
            rediscover: false,
            combined_adapters: false,
            combined_devices: false,
        }
    }
}

pub(crate) fn validate_rate(name: &str, rate: Duration) -> Result<(), CoreError> {
    if rate.is_zero() {
        return Err(CoreError::Config {
            message: format!("{name} must be greater than zero"),
        });
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn zero_rates_are_rejected() {
        assert!(ManagerConfig::default().validate().is_ok());

        let config = ManagerConfig {
            refresh_rate: Duration::ZERO,
            ..ManagerConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("refresh_rate"));
    }
}
