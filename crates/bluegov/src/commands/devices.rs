//! Device command handler.

use tabled::Tabled;

use bluegov_core::DiscoveredDevice;

use super::{Context, util};
use crate::cli::DevicesArgs;
use crate::error::CliError;
use crate::output;

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "URL")]
    url: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "RSSI")]
    rssi: String,
    #[tabled(rename = "Class")]
    class: String,
    #[tabled(rename = "Combined")]
    combined: String,
}

impl From<&DiscoveredDevice> for DeviceRow {
    fn from(d: &DiscoveredDevice) -> Self {
        Self {
            url: d.url.to_string(),
            name: d.display_name(),
            rssi: d.rssi.map(|r| format!("{r} dBm")).unwrap_or_default(),
            class: d
                .bluetooth_class
                .map(|c| format!("{c:#08x}"))
                .unwrap_or_default(),
            combined: output::yes_no(d.combined),
        }
    }
}

pub async fn handle(args: DevicesArgs, ctx: &Context) -> Result<(), CliError> {
    let manager = util::build_manager(ctx, |s| {
        s.combined_devices |= args.combine.combined_devices;
        s.combined_adapters |= args.combine.combined_adapters;
    })?;
    util::discover(&manager).await?;
    let devices = manager.discovered_devices()?;
    manager.dispose().await;

    let out = output::render_list(
        ctx.output,
        &devices,
        |d| DeviceRow::from(d),
        |d| d.url.to_string(),
    )?;
    output::print_output(&out, ctx.quiet);
    Ok(())
}
