//! AVTransport bindings: transport control, seeking, queue edits and
//! play-mode settings.
//!
//! All calls must target the group coordinator.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use super::services::SonosService;
use super::soap::{SoapError, SoapResult, SoapTarget};

/// UPnP codes Previous returns when there is no previous track to go to.
const PREVIOUS_UNAVAILABLE_CODES: &[&str] = &["701", "711"];

/// UPnP "Transition not available": the source cannot be stopped or is
/// already stopped.
const STOP_UNSUPPORTED_CODES: &[&str] = &["701"];

// ─────────────────────────────────────────────────────────────────────────────
// Types
// ─────────────────────────────────────────────────────────────────────────────

/// Result of `GetPositionInfo`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionInfo {
    pub track: u32,
    pub track_uri: String,
    pub track_meta: String,
    pub track_duration: String,
    pub rel_time: String,
}

/// Result of `GetTransportInfo`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportInfo {
    /// `PLAYING`, `PAUSED_PLAYBACK`, `STOPPED`, `TRANSITIONING`, ...
    pub state: String,
    pub status: String,
    pub speed: String,
}

/// Result of `GetTransportSettings`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportSettings {
    pub play_mode: PlayMode,
    pub rec_quality_mode: RecQualityMode,
}

/// Recording quality reported by `GetTransportSettings`; Sonos always says
/// `NOT_IMPLEMENTED`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RecQualityMode {
    NotImplemented,
    /// Any other value, as reported.
    Other(String),
}

/// Result of `GetMediaInfo`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaInfo {
    pub nr_tracks: u32,
    pub current_uri: String,
    pub current_uri_metadata: String,
}

/// Repeat component of a [`PlayMode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RepeatMode {
    Off,
    All,
    One,
}

/// AVTransport play mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlayMode {
    Normal,
    Shuffle,
    ShuffleNoRepeat,
    RepeatAll,
    RepeatOne,
}

impl PlayMode {
    /// Wire value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "NORMAL",
            Self::Shuffle => "SHUFFLE",
            Self::ShuffleNoRepeat => "SHUFFLE_NOREPEAT",
            Self::RepeatAll => "REPEAT_ALL",
            Self::RepeatOne => "REPEAT_ONE",
        }
    }

    /// Whether tracks are shuffled.
    #[must_use]
    pub fn shuffle(&self) -> bool {
        matches!(self, Self::Shuffle | Self::ShuffleNoRepeat)
    }

    /// Repeat component.
    ///
    /// Sonos has no shuffle + repeat-one mode, so `SHUFFLE` means repeat-all.
    #[must_use]
    pub fn repeat(&self) -> RepeatMode {
        match self {
            Self::Normal | Self::ShuffleNoRepeat => RepeatMode::Off,
            Self::Shuffle | Self::RepeatAll => RepeatMode::All,
            Self::RepeatOne => RepeatMode::One,
        }
    }

    /// Combines shuffle and repeat into a play mode.
    ///
    /// Shuffle with repeat-one is not representable and maps to `SHUFFLE`.
    #[must_use]
    pub fn from_parts(shuffle: bool, repeat: RepeatMode) -> Self {
        match (shuffle, repeat) {
            (false, RepeatMode::Off) => Self::Normal,
            (false, RepeatMode::All) => Self::RepeatAll,
            (false, RepeatMode::One) => Self::RepeatOne,
            (true, RepeatMode::Off) => Self::ShuffleNoRepeat,
            (true, _) => Self::Shuffle,
        }
    }
}

impl fmt::Display for PlayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlayMode {
    type Err = SoapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NORMAL" => Ok(Self::Normal),
            "SHUFFLE" => Ok(Self::Shuffle),
            "SHUFFLE_NOREPEAT" => Ok(Self::ShuffleNoRepeat),
            "REPEAT_ALL" => Ok(Self::RepeatAll),
            "REPEAT_ONE" => Ok(Self::RepeatOne),
            other => Err(SoapError::InvalidArgument(format!(
                "unknown play mode: {}",
                other
            ))),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Transport Control
// ─────────────────────────────────────────────────────────────────────────────

async fn simple(target: SoapTarget<'_>, action: &'static str) -> SoapResult<()> {
    target
        .request(SonosService::AVTransport, action)
        .instance_id()
        .send()
        .await?;
    Ok(())
}

/// Starts or resumes playback.
pub async fn play(target: SoapTarget<'_>) -> SoapResult<()> {
    log::info!("[Sonos] Sending Play command to {}", target.addr);
    target
        .request(SonosService::AVTransport, "Play")
        .instance_id()
        .arg("Speed", "1")
        .send()
        .await?;
    Ok(())
}

/// Pauses playback.
pub async fn pause(target: SoapTarget<'_>) -> SoapResult<()> {
    simple(target, "Pause").await
}

/// Stops playback.
pub async fn stop(target: SoapTarget<'_>) -> SoapResult<()> {
    simple(target, "Stop").await
}

/// Skips to the next track.
pub async fn next(target: SoapTarget<'_>) -> SoapResult<()> {
    simple(target, "Next").await
}

/// Skips to the previous track.
pub async fn previous(target: SoapTarget<'_>) -> SoapResult<()> {
    simple(target, "Previous").await
}

/// Removes the speaker from its group.
pub async fn become_coordinator_of_standalone_group(target: SoapTarget<'_>) -> SoapResult<()> {
    log::info!("[Sonos] {} leaving its group", target.addr);
    simple(target, "BecomeCoordinatorOfStandaloneGroup").await
}

/// Goes to the previous track, or restarts the current one when there is
/// no previous track.
pub async fn previous_or_restart(target: SoapTarget<'_>) -> SoapResult<()> {
    match previous(target).await {
        Err(e) if e.is_upnp_code(PREVIOUS_UNAVAILABLE_CODES) => {
            log::debug!("[Sonos] Previous unavailable on {} ({}), restarting track", target.addr, e);
            seek_rel_time(target, "0:00:00").await
        }
        other => other,
    }
}

/// Stops playback, treating sources that cannot be stopped as success.
pub async fn stop_or_noop(target: SoapTarget<'_>) -> SoapResult<()> {
    match stop(target).await {
        Err(e) if e.is_upnp_code(STOP_UNSUPPORTED_CODES) => {
            log::debug!("[Sonos] Stop not supported on {} ({}), ignoring", target.addr, e);
            Ok(())
        }
        other => other,
    }
}

/// Sets the transport source.
pub async fn set_av_transport_uri(target: SoapTarget<'_>, uri: &str, meta: &str) -> SoapResult<()> {
    log::info!("[Sonos] SetAVTransportURI: ip={}, uri={}", target.addr, uri);
    target
        .request(SonosService::AVTransport, "SetAVTransportURI")
        .instance_id()
        .arg("CurrentURI", uri)
        .arg("CurrentURIMetaData", meta)
        .send()
        .await?;
    Ok(())
}

/// Sets the transport source and starts playback.
pub async fn play_uri(target: SoapTarget<'_>, uri: &str, meta: &str) -> SoapResult<()> {
    set_av_transport_uri(target, uri, meta).await?;
    play(target).await
}

fn is_rel_time(value: &str) -> bool {
    let parts: Vec<&str> = value.split(':').collect();
    parts.len() == 3
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
}

/// Seeks within the current track to `H:MM:SS`.
pub async fn seek_rel_time(target: SoapTarget<'_>, rel_time: &str) -> SoapResult<()> {
    if !is_rel_time(rel_time) {
        return Err(SoapError::InvalidArgument(format!(
            "seek target must be H:MM:SS, got {:?}",
            rel_time
        )));
    }
    target
        .request(SonosService::AVTransport, "Seek")
        .instance_id()
        .arg("Unit", "REL_TIME")
        .arg("Target", rel_time)
        .send()
        .await?;
    Ok(())
}

/// Jumps to a 1-based queue position.
pub async fn seek_track_number(target: SoapTarget<'_>, track: u32) -> SoapResult<()> {
    if track == 0 {
        return Err(SoapError::InvalidArgument("track numbers start at 1".into()));
    }
    target
        .request(SonosService::AVTransport, "Seek")
        .instance_id()
        .arg("Unit", "TRACK_NR")
        .arg("Target", track.to_string())
        .send()
        .await?;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Queue
// ─────────────────────────────────────────────────────────────────────────────

/// Adds a URI to the queue and returns `FirstTrackNumberEnqueued` (0 if absent).
pub async fn add_uri_to_queue(
    target: SoapTarget<'_>,
    uri: &str,
    meta: &str,
    desired_first_track: u32,
    enqueue_as_next: bool,
) -> SoapResult<u32> {
    log::info!("[Sonos] AddURIToQueue: ip={}, uri={}", target.addr, uri);
    let response = target
        .request(SonosService::AVTransport, "AddURIToQueue")
        .instance_id()
        .arg("EnqueuedURI", uri)
        .arg("EnqueuedURIMetaData", meta)
        .arg("DesiredFirstTrackNumberEnqueued", desired_first_track.to_string())
        .arg("EnqueueAsNext", if enqueue_as_next { "1" } else { "0" })
        .send()
        .await?;
    Ok(response.u32_or_zero("FirstTrackNumberEnqueued"))
}

/// Clears the queue.
pub async fn remove_all_tracks_from_queue(target: SoapTarget<'_>) -> SoapResult<()> {
    simple(target, "RemoveAllTracksFromQueue").await
}

/// Removes one queue item by object id (e.g. `Q:0/3`).
pub async fn remove_track_from_queue(target: SoapTarget<'_>, object_id: &str) -> SoapResult<()> {
    if object_id.trim().is_empty() {
        return Err(SoapError::InvalidArgument("object id is empty".into()));
    }
    target
        .request(SonosService::AVTransport, "RemoveTrackFromQueue")
        .instance_id()
        .arg("ObjectID", object_id)
        .arg("UpdateID", "0")
        .send()
        .await?;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// State Queries
// ─────────────────────────────────────────────────────────────────────────────

/// Gets the current track and position.
pub async fn get_position_info(target: SoapTarget<'_>) -> SoapResult<PositionInfo> {
    let response = target
        .request(SonosService::AVTransport, "GetPositionInfo")
        .instance_id()
        .send()
        .await?;

    Ok(PositionInfo {
        track: response.u32_or_zero("Track"),
        track_uri: response.get_or_empty("TrackURI").to_string(),
        track_meta: response.get_or_empty("TrackMetaData").to_string(),
        track_duration: response.get_or_empty("TrackDuration").to_string(),
        rel_time: response.get_or_empty("RelTime").to_string(),
    })
}

/// Gets the transport state.
pub async fn get_transport_info(target: SoapTarget<'_>) -> SoapResult<TransportInfo> {
    let response = target
        .request(SonosService::AVTransport, "GetTransportInfo")
        .instance_id()
        .send()
        .await?;

    Ok(TransportInfo {
        state: response.require("CurrentTransportState")?.to_string(),
        status: response.get_or_empty("CurrentTransportStatus").to_string(),
        speed: response.get_or_empty("CurrentSpeed").to_string(),
    })
}

/// Gets the play mode and recording quality.
pub async fn get_transport_settings(target: SoapTarget<'_>) -> SoapResult<TransportSettings> {
    let response = target
        .request(SonosService::AVTransport, "GetTransportSettings")
        .instance_id()
        .send()
        .await?;

    let rec_quality_mode = match response.get_or_empty("RecQualityMode") {
        "NOT_IMPLEMENTED" | "" => RecQualityMode::NotImplemented,
        other => RecQualityMode::Other(other.to_string()),
    };
    Ok(TransportSettings {
        play_mode: response.require("PlayMode")?.parse()?,
        rec_quality_mode,
    })
}

/// Gets the current source and queue length.
pub async fn get_media_info(target: SoapTarget<'_>) -> SoapResult<MediaInfo> {
    let response = target
        .request(SonosService::AVTransport, "GetMediaInfo")
        .instance_id()
        .send()
        .await?;

    Ok(MediaInfo {
        nr_tracks: response.u32_or_zero("NrTracks"),
        current_uri: response.get_or_empty("CurrentURI").to_string(),
        current_uri_metadata: response.get_or_empty("CurrentURIMetaData").to_string(),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Play Mode
// ─────────────────────────────────────────────────────────────────────────────

/// Sets the play mode.
pub async fn set_play_mode(target: SoapTarget<'_>, mode: PlayMode) -> SoapResult<()> {
    target
        .request(SonosService::AVTransport, "SetPlayMode")
        .instance_id()
        .arg("NewPlayMode", mode.as_str())
        .send()
        .await?;
    Ok(())
}

/// Turns shuffle on or off, keeping the repeat setting.
pub async fn set_shuffle(target: SoapTarget<'_>, shuffle: bool) -> SoapResult<PlayMode> {
    let current = get_transport_settings(target).await?.play_mode;
    let mode = PlayMode::from_parts(shuffle, current.repeat());
    set_play_mode(target, mode).await?;
    Ok(mode)
}

/// Changes the repeat setting, keeping shuffle.
pub async fn set_repeat(target: SoapTarget<'_>, repeat: RepeatMode) -> SoapResult<PlayMode> {
    let current = get_transport_settings(target).await?.play_mode;
    let mode = PlayMode::from_parts(current.shuffle(), repeat);
    set_play_mode(target, mode).await?;
    Ok(mode)
}
