// ── Transport event pump ──
//
// Push notifications from the transport (values, link changes, RSSI) are
// applied to governors as they arrive instead of waiting for the next
// refresh step.

use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::Engine;
use crate::model::BluetoothUrl;
use crate::transport::TransportEvent;

/// Apply transport events until cancelled or the feed closes.
pub(crate) async fn pump_events(
    engine: Arc<Engine>,
    mut events: broadcast::Receiver<TransportEvent>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = events.recv() => match event {
                Ok(event) => engine.apply_event(event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "transport event feed lagged; state catches up on next refresh");
                }
                Err(RecvError::Closed) => {
                    debug!("transport event feed closed");
                    break;
                }
            },
        }
    }
}

impl Engine {
    pub(crate) fn apply_event(&self, event: TransportEvent) {
        trace!(?event, "transport event");
        match event {
            TransportEvent::ValueChanged { url, value } => {
                if let Some(physical) = self.registry.find_characteristic(&url) {
                    physical.value_changed(value.clone());
                }
                if let Some(combined) = self.registry.find_characteristic(&url.to_combined()) {
                    if combined.route().as_deref() == Some(&url) {
                        combined.value_changed(value);
                    }
                }
            }
            TransportEvent::Connected { url } => {
                if let Some(device) = self.registry.find_device(&url) {
                    device.set_connected(true);
                }
                self.device_changed(&url);
            }
            TransportEvent::Disconnected { url } => {
                if let Some(device) = self.registry.find_device(&url) {
                    device.set_connected(false);
                }
                self.characteristics_unreachable(&url);
                self.device_changed(&url);
            }
            TransportEvent::RssiChanged { url, rssi } => {
                if let Some(device) = self.registry.find_device(&url) {
                    device.set_rssi(rssi);
                }
                self.device_changed(&url);
            }
        }
    }

    /// A device link dropped: its characteristics lose readiness now.
    fn characteristics_unreachable(&self, device: &BluetoothUrl) {
        for governor in self.registry.descendants(device) {
            if let Some(characteristic) = governor.as_characteristic() {
                characteristic.base().set_ready(false);
                characteristic.set_notifying(false);
            }
        }
    }
}
