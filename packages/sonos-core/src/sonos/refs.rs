//! Parsing of external content references (Spotify and Apple Music).

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::protocol_constants::{
    APPLE_MUSIC_METADATA_SERVICE, APPLE_MUSIC_URI_SERVICE, SPOTIFY_SERVICE_NUMBERS,
};

/// Errors produced when a reference cannot be interpreted.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RefError {
    #[error("not a recognized {service} reference: {input}")]
    Unrecognized { service: &'static str, input: String },

    #[error("unsupported {service} kind {kind:?}")]
    UnsupportedKind { service: &'static str, kind: String },

    #[error("{service} reference has an empty id")]
    EmptyId { service: &'static str },
}

/// Percent-encodes colons the way Sonos expects in item ids (`%3a`).
#[must_use]
pub fn encode_colons(s: &str) -> String {
    s.replace(':', "%3a")
}

fn is_valid_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
}

// ─────────────────────────────────────────────────────────────────────────────
// Spotify
// ─────────────────────────────────────────────────────────────────────────────

/// Content kinds addressable by a Spotify reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SpotifyKind {
    Album,
    Episode,
    Playlist,
    Show,
    Track,
}

impl SpotifyKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Album => "album",
            Self::Episode => "episode",
            Self::Playlist => "playlist",
            Self::Show => "show",
            Self::Track => "track",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "album" => Some(Self::Album),
            "episode" => Some(Self::Episode),
            "playlist" => Some(Self::Playlist),
            "show" => Some(Self::Show),
            "track" => Some(Self::Track),
            _ => None,
        }
    }
}

impl fmt::Display for SpotifyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed Spotify reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpotifyRef {
    pub kind: SpotifyKind,
    pub id: String,
    /// `spotify:<kind>:<id>`
    pub canonical: String,
    /// Canonical form with `:` encoded as `%3a`.
    pub encoded_id: String,
}

impl SpotifyRef {
    fn new(kind: SpotifyKind, id: &str) -> Self {
        let canonical = format!("spotify:{}:{}", kind.as_str(), id);
        Self {
            kind,
            id: id.to_string(),
            encoded_id: encode_colons(&canonical),
            canonical,
        }
    }

    /// Service numbers to try, in order.
    #[must_use]
    pub fn service_numbers(&self) -> &'static [u32] {
        &SPOTIFY_SERVICE_NUMBERS
    }
}

const SPOTIFY: &str = "Spotify";

fn spotify_kind(kind: &str) -> Result<SpotifyKind, RefError> {
    SpotifyKind::parse(kind).ok_or_else(|| RefError::UnsupportedKind {
        service: SPOTIFY,
        kind: kind.to_string(),
    })
}

fn spotify_id(id: &str) -> Result<&str, RefError> {
    if id.is_empty() {
        return Err(RefError::EmptyId { service: SPOTIFY });
    }
    if !is_valid_id(id) {
        return Err(RefError::Unrecognized {
            service: SPOTIFY,
            input: id.to_string(),
        });
    }
    Ok(id)
}

/// Parses `spotify:<kind>:<id>` or a share URL such as
/// `https://open.spotify.com/intl-de/track/<id>?si=...`.
pub fn parse_spotify_ref(input: &str) -> Result<SpotifyRef, RefError> {
    let input = input.trim();
    let unrecognized = || RefError::Unrecognized {
        service: SPOTIFY,
        input: input.to_string(),
    };

    if let Some(rest) = input.strip_prefix("spotify:") {
        let (kind, id) = rest.split_once(':').ok_or_else(unrecognized)?;
        let kind = spotify_kind(kind)?;
        return Ok(SpotifyRef::new(kind, spotify_id(id)?));
    }

    let url = reqwest::Url::parse(input).map_err(|_| unrecognized())?;
    if !url.host_str().is_some_and(|h| h.contains("spotify")) {
        return Err(unrecognized());
    }
    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|p| !p.is_empty()).collect())
        .unwrap_or_default();

    // The kind is the segment before the id; leading segments are locale
    // prefixes like `intl-de` or `embed`.
    let (kind, id) = match segments.as_slice() {
        [.., kind, id] => (*kind, *id),
        _ => return Err(unrecognized()),
    };
    let kind = spotify_kind(kind)?;
    Ok(SpotifyRef::new(kind, spotify_id(id)?))
}

// ─────────────────────────────────────────────────────────────────────────────
// Apple Music
// ─────────────────────────────────────────────────────────────────────────────

/// Content kinds addressable by an Apple Music reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AppleMusicKind {
    Album,
    Song,
    Playlist,
    Station,
}

impl AppleMusicKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Album => "album",
            Self::Song => "song",
            Self::Playlist => "playlist",
            Self::Station => "station",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "album" => Some(Self::Album),
            "song" => Some(Self::Song),
            "playlist" => Some(Self::Playlist),
            "station" => Some(Self::Station),
            _ => None,
        }
    }
}

impl fmt::Display for AppleMusicKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed Apple Music reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppleMusicRef {
    pub kind: AppleMusicKind,
    pub id: String,
    /// The input as given.
    pub original: String,
}

impl AppleMusicRef {
    /// Service number used in the metadata descriptor.
    #[must_use]
    pub fn metadata_service(&self) -> u32 {
        APPLE_MUSIC_METADATA_SERVICE
    }

    /// Service number used as `sid` in enqueued URIs.
    #[must_use]
    pub fn uri_service(&self) -> u32 {
        APPLE_MUSIC_URI_SERVICE
    }

    /// `<kind>%3a<id>`
    #[must_use]
    pub fn encoded_id(&self) -> String {
        format!("{}%3a{}", self.kind.as_str(), self.id)
    }
}

const APPLE_MUSIC: &str = "Apple Music";

/// Parses `music.apple.com/<cc>/<kind>/[<slug>/]<id>[?i=<trackId>]`.
///
/// A `?i=` query selects one song of an album.
pub fn parse_apple_music_ref(input: &str) -> Result<AppleMusicRef, RefError> {
    let original = input.trim();
    let unrecognized = || RefError::Unrecognized {
        service: APPLE_MUSIC,
        input: original.to_string(),
    };

    let with_scheme = if original.contains("://") {
        original.to_string()
    } else {
        format!("https://{}", original)
    };
    let url = reqwest::Url::parse(&with_scheme).map_err(|_| unrecognized())?;
    if url.host_str() != Some("music.apple.com") {
        return Err(unrecognized());
    }

    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|p| !p.is_empty()).collect())
        .unwrap_or_default();
    // [cc, kind, slug?, id]
    let (kind_raw, id) = match segments.as_slice() {
        [_, kind, _, id] | [_, kind, id] => (*kind, *id),
        _ => return Err(unrecognized()),
    };
    let mut kind = AppleMusicKind::parse(kind_raw).ok_or_else(|| RefError::UnsupportedKind {
        service: APPLE_MUSIC,
        kind: kind_raw.to_string(),
    })?;
    let mut id = id.to_string();

    if let Some((_, track)) = url.query_pairs().find(|(k, _)| k == "i") {
        kind = AppleMusicKind::Song;
        id = track.into_owned();
    }

    if id.is_empty() {
        return Err(RefError::EmptyId { service: APPLE_MUSIC });
    }
    if !is_valid_id(&id) {
        return Err(unrecognized());
    }

    Ok(AppleMusicRef {
        kind,
        id,
        original: original.to_string(),
    })
}
