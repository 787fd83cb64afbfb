//! Characteristic read handler.

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;

use bluegov_core::{
    BluetoothManager, BluetoothUrl, CharacteristicFlag, CharacteristicGovernor, UrlKind,
};

use super::{Context, util};
use crate::cli::ReadArgs;
use crate::error::CliError;
use crate::output;

const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Serialize)]
struct ReadResult {
    url: BluetoothUrl,
    flags: Vec<CharacteristicFlag>,
    hex: String,
    bytes: Vec<u8>,
}

fn detail(r: &ReadResult) -> String {
    let flags: Vec<String> = r.flags.iter().map(ToString::to_string).collect();
    [
        format!("URL:    {}", r.url),
        format!("Flags:  {}", flags.join(", ")),
        format!("Length: {}", r.bytes.len()),
        format!("Value:  {}", r.hex),
    ]
    .join("\n")
}

pub async fn handle(args: ReadArgs, ctx: &Context) -> Result<(), CliError> {
    let url: BluetoothUrl = args.url.parse()?;
    if url.kind() != UrlKind::Characteristic {
        return Err(CliError::InvalidUrl {
            input: args.url,
            reason: format!("expected a characteristic URL, got a {} URL", url.kind()),
        });
    }

    let manager = util::build_manager(ctx, |s| {
        s.combined_devices |= url.is_combined();
    })?;
    let result = read_value(&manager, &url, args.timeout).await;
    manager.dispose().await;
    let result = result?;

    let out = output::render_single(ctx.output, &result, detail, |r| r.hex.clone())?;
    output::print_output(&out, ctx.quiet);
    Ok(())
}

async fn read_value(
    manager: &BluetoothManager,
    url: &BluetoothUrl,
    timeout: u64,
) -> Result<ReadResult, CliError> {
    util::discover(manager).await?;

    let device_url = url.device_url().ok_or_else(|| CliError::InvalidUrl {
        input: url.to_string(),
        reason: "missing device component".into(),
    })?;
    if !manager.device_governor(&device_url)?.is_ready() {
        return Err(CliError::NotFound {
            resource_type: "device".into(),
            identifier: device_url.to_string(),
            list_command: "devices".into(),
        });
    }

    let characteristic = manager.characteristic_governor_autoconnect(url)?;
    wait_ready(manager, &characteristic, &device_url, timeout).await?;

    let value = characteristic.read().await?;
    debug!(url = %url, len = value.len(), "characteristic read");
    Ok(ReadResult {
        url: url.clone(),
        flags: characteristic.flags(),
        hex: output::hex(&value),
        bytes: value.to_vec(),
    })
}

/// Drive refresh steps until the characteristic is reachable.
async fn wait_ready(
    manager: &BluetoothManager,
    characteristic: &CharacteristicGovernor,
    device_url: &BluetoothUrl,
    timeout: u64,
) -> Result<(), CliError> {
    let deadline = Instant::now() + Duration::from_secs(timeout);
    let uuid = characteristic.url().characteristic_uuid().copied();
    loop {
        manager.refresh_cycle().await?;
        if characteristic.is_ready() {
            return Ok(());
        }

        let device = manager.device_governor(device_url)?;
        let services = device.services();
        let advertised = uuid.is_some_and(|uuid| {
            services.iter().any(|s| s.characteristic(&uuid).is_some())
        });
        if device.is_connected() && !services.is_empty() && !advertised {
            return Err(CliError::NotFound {
                resource_type: "characteristic".into(),
                identifier: characteristic.url().to_string(),
                list_command: "devices".into(),
            });
        }

        if Instant::now() >= deadline {
            return Err(CliError::Timeout { seconds: timeout });
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}
