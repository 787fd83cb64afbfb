//! Adapter command handler.

use tabled::Tabled;

use bluegov_core::DiscoveredAdapter;

use super::{Context, util};
use crate::error::CliError;
use crate::output;

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct AdapterRow {
    #[tabled(rename = "URL")]
    url: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Powered")]
    powered: String,
    #[tabled(rename = "Discovering")]
    discovering: String,
}

impl From<&DiscoveredAdapter> for AdapterRow {
    fn from(a: &DiscoveredAdapter) -> Self {
        Self {
            url: a.url.to_string(),
            name: a.display_name(),
            powered: output::yes_no(a.powered),
            discovering: output::yes_no(a.discovering),
        }
    }
}

pub async fn handle(ctx: &Context) -> Result<(), CliError> {
    let manager = util::build_manager(ctx, |_| {})?;
    manager.discovery_cycle().await?;
    let adapters = manager.discovered_adapters()?;
    manager.dispose().await;

    let out = output::render_list(
        ctx.output,
        &adapters,
        |a| AdapterRow::from(a),
        |a| a.url.to_string(),
    )?;
    output::print_output(&out, ctx.quiet);
    Ok(())
}
