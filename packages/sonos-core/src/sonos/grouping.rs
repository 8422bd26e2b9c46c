//! Group membership commands.
//!
//! Joining points a speaker's transport at the coordinator with the
//! `x-rincon` scheme; leaving makes it a standalone coordinator again.

use super::playback;
use super::soap::{SoapError, SoapResult, SoapTarget};

/// Builds the transport URI that follows `coordinator_uuid`.
#[must_use]
pub fn group_uri(coordinator_uuid: &str) -> String {
    format!("x-rincon:{}", coordinator_uuid)
}

/// Joins the speaker at `target` to the group coordinated by
/// `coordinator_uuid` (RINCON_xxx).
pub async fn join_group(target: SoapTarget<'_>, coordinator_uuid: &str) -> SoapResult<()> {
    let coordinator_uuid = coordinator_uuid.trim();
    if coordinator_uuid.is_empty() {
        return Err(SoapError::InvalidArgument("coordinator uuid is empty".into()));
    }
    let uri = group_uri(coordinator_uuid);
    log::info!("[Sonos] Joining {} to coordinator {} (uri: {})", target.addr, coordinator_uuid, uri);

    playback::set_av_transport_uri(target, &uri, "").await?;

    log::debug!("[Sonos] Join group succeeded for {}", target.addr);
    Ok(())
}

/// Makes the speaker leave its group. Safe on speakers that are already
/// standalone.
pub async fn leave_group(target: SoapTarget<'_>) -> SoapResult<()> {
    playback::become_coordinator_of_standalone_group(target).await?;
    log::debug!("[Sonos] Leave group succeeded for {}", target.addr);
    Ok(())
}
