//! Volume and mute control for Sonos speakers.
//!
//! Provides both group-level (GroupRenderingControl) and per-speaker
//! (RenderingControl) volume and mute operations. Group calls must target
//! the coordinator.

use super::services::SonosService;
use super::soap::{SoapError, SoapResult, SoapTarget};

fn clamp_volume(volume: i32) -> u8 {
    volume.clamp(0, 100) as u8
}

fn parse_volume(value: &str) -> SoapResult<u8> {
    value
        .trim()
        .parse::<u8>()
        .map(|v| v.min(100))
        .map_err(|_| SoapError::Parse(format!("invalid volume value: {:?}", value)))
}

fn parse_mute(value: &str) -> bool {
    matches!(value.trim(), "1" | "true" | "True")
}

// ─────────────────────────────────────────────────────────────────────────────
// Group Volume Control
// ─────────────────────────────────────────────────────────────────────────────

/// Gets the current group volume (0-100).
pub async fn get_group_volume(target: SoapTarget<'_>) -> SoapResult<u8> {
    let response = target
        .request(SonosService::GroupRenderingControl, "GetGroupVolume")
        .instance_id()
        .send()
        .await?;

    parse_volume(response.require("CurrentVolume")?)
}

/// Captures the relative member volumes so a following group volume change
/// keeps their balance.
pub async fn snapshot_group_volume(target: SoapTarget<'_>) -> SoapResult<()> {
    target
        .request(SonosService::GroupRenderingControl, "SnapshotGroupVolume")
        .instance_id()
        .send()
        .await?;
    Ok(())
}

/// Sets the group volume; values outside 0-100 are clamped.
///
/// A failed snapshot is logged and does not stop the volume change.
pub async fn set_group_volume(target: SoapTarget<'_>, volume: i32) -> SoapResult<u8> {
    let clamped = clamp_volume(volume);

    if let Err(e) = snapshot_group_volume(target).await {
        log::warn!("[Sonos] SnapshotGroupVolume failed on {}: {}", target.addr, e);
    }

    target
        .request(SonosService::GroupRenderingControl, "SetGroupVolume")
        .instance_id()
        .arg("DesiredVolume", clamped.to_string())
        .send()
        .await?;

    Ok(clamped)
}

// ─────────────────────────────────────────────────────────────────────────────
// Group Mute Control
// ─────────────────────────────────────────────────────────────────────────────

/// Gets the group mute state.
pub async fn get_group_mute(target: SoapTarget<'_>) -> SoapResult<bool> {
    let response = target
        .request(SonosService::GroupRenderingControl, "GetGroupMute")
        .instance_id()
        .send()
        .await?;

    Ok(parse_mute(response.require("CurrentMute")?))
}

/// Sets the group mute state.
pub async fn set_group_mute(target: SoapTarget<'_>, mute: bool) -> SoapResult<()> {
    target
        .request(SonosService::GroupRenderingControl, "SetGroupMute")
        .instance_id()
        .arg("DesiredMute", if mute { "1" } else { "0" })
        .send()
        .await?;

    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Per-Speaker Volume Control
// ─────────────────────────────────────────────────────────────────────────────

/// Gets the volume of an individual speaker (0-100).
pub async fn get_volume(target: SoapTarget<'_>) -> SoapResult<u8> {
    let response = target
        .request(SonosService::RenderingControl, "GetVolume")
        .instance_id()
        .arg("Channel", "Master")
        .send()
        .await?;

    parse_volume(response.require("CurrentVolume")?)
}

/// Sets the volume of an individual speaker; values outside 0-100 are
/// clamped. Returns the volume actually sent.
pub async fn set_volume(target: SoapTarget<'_>, volume: i32) -> SoapResult<u8> {
    let clamped = clamp_volume(volume);

    target
        .request(SonosService::RenderingControl, "SetVolume")
        .instance_id()
        .arg("Channel", "Master")
        .arg("DesiredVolume", clamped.to_string())
        .send()
        .await?;

    Ok(clamped)
}

/// Gets the mute state of an individual speaker.
pub async fn get_mute(target: SoapTarget<'_>) -> SoapResult<bool> {
    let response = target
        .request(SonosService::RenderingControl, "GetMute")
        .instance_id()
        .arg("Channel", "Master")
        .send()
        .await?;

    Ok(parse_mute(response.require("CurrentMute")?))
}

/// Sets the mute state of an individual speaker.
pub async fn set_mute(target: SoapTarget<'_>, mute: bool) -> SoapResult<()> {
    target
        .request(SonosService::RenderingControl, "SetMute")
        .instance_id()
        .arg("Channel", "Master")
        .arg("DesiredMute", if mute { "1" } else { "0" })
        .send()
        .await?;

    Ok(())
}
