// ── Access point station statistics ──

use chrono::Utc;
use tracing::debug;

use crate::channel::{CommandChannel, paths};
use crate::convert;
use crate::error::CoreError;
use crate::model::{Device, WirelessClient, WirelessStats};

/// Read an access point's registration table, falling back to the
/// controller-managed table when the local one is unavailable.
pub async fn collect_wireless_stats(
    device: &Device,
    channel: &dyn CommandChannel,
) -> Result<WirelessStats, CoreError> {
    let target = device.command_target();
    let rows = match channel
        .execute_command(target, paths::WIRELESS_REGISTRATIONS, &[])
        .await
    {
        Ok(rows) => rows,
        Err(e) => {
            debug!(device_id = %device.id, error = %e, "local registration table unavailable");
            channel
                .execute_command(target, paths::CAPSMAN_REGISTRATIONS, &[])
                .await?
        }
    };

    let clients: Vec<WirelessClient> = rows
        .iter()
        .filter_map(|row| match convert::registration_client(row) {
            Ok(client) => Some(client),
            Err(e) => {
                debug!(device_id = %device.id, error = %e, "skipping registration row");
                None
            }
        })
        .collect();

    Ok(WirelessStats {
        device_id: device.id,
        clients,
        collected_at: Utc::now(),
    })
}
