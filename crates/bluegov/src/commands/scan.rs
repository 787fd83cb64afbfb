//! Scan handler: run the discovery task and stream presence changes.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::info;

use bluegov_core::{
    AdapterDiscoveryListener, BluetoothUrl, DeviceDiscoveryListener, DiscoveredAdapter,
    DiscoveredDevice, UrlKind,
};

use super::{Context, util};
use crate::cli::{OutputFormat, ScanArgs};
use crate::error::CliError;
use crate::output;

// ── Events ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum Change {
    Discovered,
    Lost,
}

#[derive(Debug, Serialize)]
struct ScanEvent {
    event: Change,
    kind: UrlKind,
    url: BluetoothUrl,
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    rssi: Option<i16>,
}

impl ScanEvent {
    fn adapter(event: Change, adapter: &DiscoveredAdapter) -> Self {
        Self {
            event,
            kind: UrlKind::Adapter,
            url: adapter.url.clone(),
            name: adapter.display_name(),
            rssi: None,
        }
    }

    fn device(event: Change, device: &DiscoveredDevice) -> Self {
        Self {
            event,
            kind: UrlKind::Device,
            url: device.url.clone(),
            name: device.display_name(),
            rssi: device.rssi,
        }
    }
}

/// Forwards discovery callbacks from the notification thread to the
/// command's async loop.
struct Forwarder {
    tx: mpsc::UnboundedSender<ScanEvent>,
}

impl DeviceDiscoveryListener for Forwarder {
    fn discovered(&self, device: &DiscoveredDevice) {
        let _ = self.tx.send(ScanEvent::device(Change::Discovered, device));
    }

    fn lost(&self, device: &DiscoveredDevice) {
        let _ = self.tx.send(ScanEvent::device(Change::Lost, device));
    }
}

impl AdapterDiscoveryListener for Forwarder {
    fn discovered(&self, adapter: &DiscoveredAdapter) {
        let _ = self.tx.send(ScanEvent::adapter(Change::Discovered, adapter));
    }

    fn lost(&self, adapter: &DiscoveredAdapter) {
        let _ = self.tx.send(ScanEvent::adapter(Change::Lost, adapter));
    }
}

// ── Rendering ───────────────────────────────────────────────────────

/// One event per line (NDJSON for the JSON formats).
fn render_event(event: &ScanEvent, ctx: &Context) -> Result<String, CliError> {
    match ctx.output {
        OutputFormat::Table => {
            let marker = match event.event {
                Change::Discovered => output::good("+", ctx.color),
                Change::Lost => output::bad("-", ctx.color),
            };
            let rssi = event
                .rssi
                .map(|r| output::muted(&format!("{r} dBm"), ctx.color))
                .unwrap_or_default();
            Ok(format!(
                "{marker} {:<14} {:<58} {} {rssi}",
                event.kind.to_string(),
                event.url.to_string(),
                event.name
            )
            .trim_end()
            .to_owned())
        }
        OutputFormat::Json | OutputFormat::JsonCompact => output::render_json(event, true),
        OutputFormat::Yaml => Ok(format!("---\n{}", output::render_yaml(event)?.trim_end())),
        OutputFormat::Plain => {
            let verb = match event.event {
                Change::Discovered => "discovered",
                Change::Lost => "lost",
            };
            Ok(format!("{verb} {}", event.url))
        }
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(args: ScanArgs, ctx: &Context) -> Result<(), CliError> {
    let manager = util::build_manager(ctx, |s| {
        if let Some(rate) = args.rate {
            s.discovery_rate = rate;
        }
        s.rediscover |= args.rediscover;
        s.combined_devices |= args.combine.combined_devices;
        s.combined_adapters |= args.combine.combined_adapters;
    })?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let forwarder = Arc::new(Forwarder { tx });
    manager.add_adapter_discovery_listener(forwarder.clone())?;
    manager.add_device_discovery_listener(forwarder)?;

    manager.start(true).await?;
    info!(duration_secs = args.duration, "scan started");

    let deadline = tokio::time::sleep(Duration::from_secs(args.duration));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            () = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => {
                info!("scan interrupted");
                break;
            }
            Some(event) = rx.recv() => {
                output::print_output(&render_event(&event, ctx)?, ctx.quiet);
            }
        }
    }

    manager.stop().await;
    manager.flush_notifications().await;
    while let Ok(event) = rx.try_recv() {
        output::print_output(&render_event(&event, ctx)?, ctx.quiet);
    }

    let adapters = manager.discovered_adapters()?.len();
    let devices = manager.discovered_devices()?.len();
    manager.dispose().await;

    if ctx.output == OutputFormat::Table {
        let summary = format!("{adapters} adapter(s), {devices} device(s) in range");
        output::print_output(&output::muted(&summary, ctx.color), ctx.quiet);
    }
    Ok(())
}
