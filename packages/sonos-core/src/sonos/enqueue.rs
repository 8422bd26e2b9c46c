//! Enqueuing music-service content by external reference.
//!
//! A reference maps to a list of candidate (service number, URI) pairs.
//! Candidates are tried in order with `AddURIToQueue` until one is accepted.

use serde::Serialize;

use super::didl::share_didl;
use super::discovery::description::{description_url, fetch_device_description};
use super::playback;
use super::refs::{AppleMusicKind, AppleMusicRef, SpotifyKind, SpotifyRef};
use super::soap::{SoapError, SoapResult, SoapTarget};
use crate::error::{SonosError, SonosResult};

// ─────────────────────────────────────────────────────────────────────────────
// Encoding Table
// ─────────────────────────────────────────────────────────────────────────────

/// How one content kind is represented in queue metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct KindEncoding {
    upnp_class: &'static str,
    didl_prefix: &'static str,
    /// Prefix after `x-rincon-cpcontainer:`; None for single items.
    container_prefix: Option<&'static str>,
}

const ALBUM: KindEncoding = KindEncoding {
    upnp_class: "object.container.album.musicAlbum",
    didl_prefix: "00040000",
    container_prefix: Some("1004206c"),
};

const PLAYLIST: KindEncoding = KindEncoding {
    upnp_class: "object.container.playlistContainer",
    didl_prefix: "1006206c",
    container_prefix: Some("1006206c"),
};

const TRACK: KindEncoding = KindEncoding {
    upnp_class: "object.item.audioItem.musicTrack",
    didl_prefix: "00032020",
    container_prefix: None,
};

fn spotify_encoding(kind: SpotifyKind) -> KindEncoding {
    match kind {
        SpotifyKind::Album => ALBUM,
        SpotifyKind::Playlist | SpotifyKind::Show => PLAYLIST,
        SpotifyKind::Track | SpotifyKind::Episode => TRACK,
    }
}

fn apple_music_encoding(kind: AppleMusicKind) -> KindEncoding {
    match kind {
        AppleMusicKind::Album => ALBUM,
        AppleMusicKind::Playlist | AppleMusicKind::Station => PLAYLIST,
        AppleMusicKind::Song => TRACK,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Candidates
// ─────────────────────────────────────────────────────────────────────────────

/// One way of enqueuing an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueCandidate {
    /// Service number used in the metadata descriptor.
    pub service_number: u32,
    pub uri: String,
    pub item_id: String,
    pub upnp_class: &'static str,
}

impl EnqueueCandidate {
    /// Share-link DIDL metadata for this candidate.
    #[must_use]
    pub fn metadata(&self, title: &str) -> String {
        share_didl(&self.item_id, title, self.upnp_class, self.service_number)
    }
}

/// Candidates for a Spotify reference: every service number crossed with
/// every URI template of the kind.
#[must_use]
pub fn spotify_candidates(r: &SpotifyRef) -> Vec<EnqueueCandidate> {
    let encoding = spotify_encoding(r.kind);
    let templates: Vec<String> = match encoding.container_prefix {
        Some(prefix) => vec![format!("x-rincon-cpcontainer:{}{}", prefix, r.encoded_id)],
        None => vec![format!("x-sonos-spotify:{}", r.encoded_id), r.encoded_id.clone()],
    };
    let item_id = format!("{}{}", encoding.didl_prefix, r.encoded_id);

    r.service_numbers()
        .iter()
        .flat_map(|&service_number| {
            templates.iter().map(move |uri| (service_number, uri.clone()))
        })
        .map(|(service_number, uri)| EnqueueCandidate {
            service_number,
            uri,
            item_id: item_id.clone(),
            upnp_class: encoding.upnp_class,
        })
        .collect()
}

/// The single candidate for an Apple Music reference.
#[must_use]
pub fn apple_music_candidates(r: &AppleMusicRef) -> Vec<EnqueueCandidate> {
    let encoding = apple_music_encoding(r.kind);
    let encoded = r.encoded_id();
    let sid = r.uri_service();
    let uri = match encoding.container_prefix {
        Some(prefix) => format!(
            "x-rincon-cpcontainer:{}{}?sid={}&flags=8300&sn=10",
            prefix, encoded, sid
        ),
        None => format!("x-sonos-http:{}.mp4?sid={}&flags=8224&sn=10", encoded, sid),
    };
    vec![EnqueueCandidate {
        service_number: r.metadata_service(),
        uri,
        item_id: format!("{}{}", encoding.didl_prefix, encoded),
        upnp_class: encoding.upnp_class,
    }]
}

// ─────────────────────────────────────────────────────────────────────────────
// Enqueue
// ─────────────────────────────────────────────────────────────────────────────

/// Options shared by the enqueue entry points.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnqueueOptions {
    /// Title shown until the speaker resolves real metadata.
    pub title: String,
    /// 0 appends to the end of the queue.
    pub desired_first_track: u32,
    pub as_next: bool,
    /// Switch the transport to the queue and start at the new item.
    pub play_now: bool,
}

/// Tries each candidate until `AddURIToQueue` succeeds and returns its
/// `FirstTrackNumberEnqueued`. On total failure the last error is returned.
pub async fn enqueue_first_accepted<I>(
    target: SoapTarget<'_>,
    candidates: I,
    options: &EnqueueOptions,
) -> SoapResult<u32>
where
    I: IntoIterator<Item = EnqueueCandidate>,
{
    let mut last_error = None;
    for candidate in candidates {
        let meta = candidate.metadata(&options.title);
        match playback::add_uri_to_queue(
            target,
            &candidate.uri,
            &meta,
            options.desired_first_track,
            options.as_next,
        )
        .await
        {
            Ok(first) => {
                log::info!(
                    "[Enqueue] Accepted {} (service {}), first track {}",
                    candidate.uri,
                    candidate.service_number,
                    first
                );
                return Ok(first);
            }
            Err(e) => {
                log::debug!(
                    "[Enqueue] {} (service {}) rejected: {}",
                    candidate.uri,
                    candidate.service_number,
                    e
                );
                last_error = Some(e);
            }
        }
    }
    Err(last_error.unwrap_or_else(|| SoapError::InvalidArgument("no enqueue candidates".into())))
}

/// Switches the coordinator to its queue and starts at `first_track`.
///
/// A `first_track` of 0 skips the seek.
pub async fn play_from_queue(target: SoapTarget<'_>, first_track: u32) -> SonosResult<()> {
    let location = description_url(&target.ip().to_string(), target.addr.port());
    let description = fetch_device_description(target.http, &location, target.deadline).await?;
    if description.udn.is_empty() {
        return Err(SonosError::NotFound(format!("UDN for {}", target.addr)));
    }

    let queue_uri = format!("x-rincon-queue:{}#0", description.udn);
    playback::set_av_transport_uri(target, &queue_uri, "").await?;
    if first_track > 0 {
        playback::seek_track_number(target, first_track).await?;
    }
    playback::play(target).await?;
    Ok(())
}

async fn enqueue_with(
    target: SoapTarget<'_>,
    candidates: Vec<EnqueueCandidate>,
    options: &EnqueueOptions,
) -> SonosResult<u32> {
    let first = enqueue_first_accepted(target, candidates, options).await?;
    if options.play_now {
        play_from_queue(target, first).await?;
    }
    Ok(first)
}

/// Enqueues a Spotify item on the coordinator.
pub async fn enqueue_spotify(
    target: SoapTarget<'_>,
    reference: &SpotifyRef,
    options: &EnqueueOptions,
) -> SonosResult<u32> {
    log::info!("[Enqueue] Spotify {} on {}", reference.canonical, target.addr);
    enqueue_with(target, spotify_candidates(reference), options).await
}

/// Enqueues an Apple Music item on the coordinator.
pub async fn enqueue_apple_music(
    target: SoapTarget<'_>,
    reference: &AppleMusicRef,
    options: &EnqueueOptions,
) -> SonosResult<u32> {
    log::info!("[Enqueue] Apple Music {} {} on {}", reference.kind, reference.id, target.addr);
    enqueue_with(target, apple_music_candidates(reference), options).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol_constants::DEVICE_DESCRIPTION_PATH;
    use crate::sonos::refs::{parse_apple_music_ref, parse_spotify_ref};
    use crate::test_support::{device_description, soap_ok, upnp_fault, FakeTransport};
    use std::net::{Ipv4Addr, SocketAddrV4};

    fn target(fake: &FakeTransport) -> SoapTarget<'_> {
        SoapTarget::new(fake, SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 1400))
    }

    fn enqueued_uris(fake: &FakeTransport) -> Vec<String> {
        fake.requests_for("AddURIToQueue")
            .iter()
            .map(|r| {
                crate::sonos::utils::extract_xml_text(&r.body_text(), "EnqueuedURI").unwrap_or_default()
            })
            .collect()
    }

    #[test]
    fn spotify_track_candidates_cross_services_and_templates() {
        let r = parse_spotify_ref("spotify:track:abc").unwrap();
        let uris: Vec<(u32, String)> = spotify_candidates(&r)
            .into_iter()
            .map(|c| (c.service_number, c.uri))
            .collect();
        assert_eq!(
            uris,
            vec![
                (2311, "x-sonos-spotify:spotify%3atrack%3aabc".to_string()),
                (2311, "spotify%3atrack%3aabc".to_string()),
                (3079, "x-sonos-spotify:spotify%3atrack%3aabc".to_string()),
                (3079, "spotify%3atrack%3aabc".to_string()),
            ]
        );
    }

    #[test]
    fn spotify_album_uses_container() {
        let r = parse_spotify_ref("spotify:album:xyz").unwrap();
        let c = &spotify_candidates(&r)[0];
        assert_eq!(c.uri, "x-rincon-cpcontainer:1004206cspotify%3aalbum%3axyz");
        assert_eq!(c.item_id, "00040000spotify%3aalbum%3axyz");
        assert_eq!(c.upnp_class, "object.container.album.musicAlbum");
    }

    #[test]
    fn apple_music_templates() {
        let song = parse_apple_music_ref("https://music.apple.com/us/album/a/1?i=42").unwrap();
        let c = &apple_music_candidates(&song)[0];
        assert_eq!(c.uri, "x-sonos-http:song%3a42.mp4?sid=204&flags=8224&sn=10");
        assert_eq!(c.service_number, 52231);
        assert!(c.metadata("T").contains("SA_RINCON52231_X_#Svc52231-0-Token"));

        let playlist =
            parse_apple_music_ref("https://music.apple.com/us/playlist/mix/pl.abc").unwrap();
        assert_eq!(
            apple_music_candidates(&playlist)[0].uri,
            "x-rincon-cpcontainer:1006206cplaylist%3apl.abc?sid=204&flags=8300&sn=10"
        );
    }

    #[tokio::test]
    async fn returns_first_accepted_after_failures() {
        let fake = FakeTransport::new();
        fake.respond_to("AddURIToQueue", upnp_fault("800"));
        fake.respond_to("AddURIToQueue", upnp_fault("800"));
        fake.respond_to(
            "AddURIToQueue",
            soap_ok("AddURIToQueue", &[("FirstTrackNumberEnqueued", "7")]),
        );
        let r = parse_spotify_ref("spotify:track:abc").unwrap();
        let first = enqueue_spotify(target(&fake), &r, &EnqueueOptions::default())
            .await
            .unwrap();
        assert_eq!(first, 7);
        assert_eq!(
            enqueued_uris(&fake),
            vec![
                "x-sonos-spotify:spotify%3atrack%3aabc",
                "spotify%3atrack%3aabc",
                "x-sonos-spotify:spotify%3atrack%3aabc",
            ]
        );
    }

    #[tokio::test]
    async fn all_failures_return_last_error() {
        let fake = FakeTransport::new();
        fake.respond_to("AddURIToQueue", upnp_fault("800"));
        fake.respond_to("AddURIToQueue", upnp_fault("801"));
        let r = parse_spotify_ref("spotify:playlist:p").unwrap();
        let err = enqueue_first_accepted(target(&fake), spotify_candidates(&r), &EnqueueOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.upnp_code(), Some("801"));
        assert_eq!(fake.requests_for("AddURIToQueue").len(), 2);
    }

    #[tokio::test]
    async fn play_now_switches_to_queue() {
        let fake = FakeTransport::new();
        fake.respond_to(
            "AddURIToQueue",
            soap_ok("AddURIToQueue", &[("FirstTrackNumberEnqueued", "0")]),
        );
        fake.respond_to(DEVICE_DESCRIPTION_PATH, device_description("Bar", "RINCON_BAR"));
        fake.respond_to("SetAVTransportURI", soap_ok("SetAVTransportURI", &[]));
        fake.respond_to("Play", soap_ok("Play", &[]));

        let r = parse_spotify_ref("spotify:album:a").unwrap();
        let options = EnqueueOptions {
            title: "A".into(),
            play_now: true,
            ..Default::default()
        };
        enqueue_spotify(target(&fake), &r, &options).await.unwrap();

        assert_eq!(
            fake.keys(),
            vec!["AddURIToQueue", DEVICE_DESCRIPTION_PATH, "SetAVTransportURI", "Play"]
        );
        assert!(fake.requests()[2]
            .body_text()
            .contains("<CurrentURI>x-rincon-queue:RINCON_BAR#0</CurrentURI>"));
    }
}
