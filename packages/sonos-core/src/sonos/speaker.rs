//! Speaker handle: one address plus the transport used to reach it.
//!
//! A [`Speaker`] is immutable and cheap to clone, so it can be shared across
//! tasks. It does not track grouping; to act on "the coordinator of X",
//! fetch the topology and build a new handle with [`Speaker::coordinator`].

use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;

use tokio::time::Instant;

use super::content_directory::{self, ItemPage};
use super::didl::DidlItem;
use super::discovery::{description_url, fetch_device_description, DeviceDescription, DiscoveryResult};
use super::enqueue::{self, EnqueueOptions};
use super::gena_client::GenaResult;
use super::gena_server::{EventListener, EventSubscription};
use super::grouping;
use super::music_services::{self, MusicService};
use super::playback::{
    self, MediaInfo, PlayMode, PositionInfo, RepeatMode, TransportInfo, TransportSettings,
};
use super::properties;
use super::refs::{parse_apple_music_ref, parse_spotify_ref};
use super::services::SonosService;
use super::soap::{SoapResult, SoapTarget};
use super::topology::{fetch_topology, Topology};
use super::transport::HttpTransport;
use super::volume;
use crate::error::{SonosError, SonosResult};
use crate::protocol_constants::SONOS_PORT;
use crate::smapi::{resolve_identity, SmapiClient, SmapiResult};
use crate::store::SmapiTokenStore;

/// Handle to one zone player.
#[derive(Clone)]
pub struct Speaker {
    ip: Ipv4Addr,
    port: u16,
    http: Arc<dyn HttpTransport>,
    deadline: Option<Instant>,
}

impl std::fmt::Debug for Speaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Speaker")
            .field("ip", &self.ip)
            .field("port", &self.port)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

impl Speaker {
    #[must_use]
    pub fn new(ip: Ipv4Addr, http: Arc<dyn HttpTransport>) -> Self {
        Self {
            ip,
            port: SONOS_PORT,
            http,
            deadline: None,
        }
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Bounds every call made through this handle.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Another speaker reached through the same transport and deadline.
    #[must_use]
    pub fn at(&self, ip: Ipv4Addr) -> Self {
        Self {
            ip,
            ..self.clone()
        }
    }

    #[must_use]
    pub fn ip(&self) -> Ipv4Addr {
        self.ip
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    #[must_use]
    pub fn addr(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.ip, self.port)
    }

    #[must_use]
    pub fn http(&self) -> &Arc<dyn HttpTransport> {
        &self.http
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// The SOAP target for the free-function bindings.
    #[must_use]
    pub fn target(&self) -> SoapTarget<'_> {
        SoapTarget::new(self.http.as_ref(), self.addr()).with_deadline(self.deadline)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Identity & Topology
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn describe(&self) -> DiscoveryResult<DeviceDescription> {
        let location = description_url(&self.ip.to_string(), self.port);
        fetch_device_description(self.http.as_ref(), &location, self.deadline).await
    }

    pub async fn topology(&self) -> SoapResult<Topology> {
        fetch_topology(self.http.as_ref(), self.addr(), self.deadline).await
    }

    /// Returns a handle to the coordinator of this speaker's group.
    pub async fn coordinator(&self) -> SonosResult<Speaker> {
        let topology = self.topology().await?;
        let ip = topology
            .coordinator_ip_for(&self.ip.to_string())
            .ok_or_else(|| SonosError::NotFound(format!("group for {}", self.ip)))?;
        self.speaker_at(ip)
    }

    /// Returns a handle to the coordinator of the room matching `name`.
    pub async fn coordinator_for_room(&self, name: &str) -> SonosResult<Speaker> {
        let topology = self.topology().await?;
        let member = topology.resolve_name(name)?;
        let ip = topology
            .coordinator_ip_for(&member.ip)
            .ok_or_else(|| SonosError::NotFound(format!("group for {}", member.name)))?;
        self.speaker_at(ip)
    }

    fn speaker_at(&self, ip: &str) -> SonosResult<Speaker> {
        let ip: Ipv4Addr = ip
            .parse()
            .map_err(|_| SonosError::InvalidArgument(format!("not an IPv4 address: {:?}", ip)))?;
        Ok(self.at(ip))
    }

    pub async fn household_id(&self) -> SoapResult<String> {
        properties::get_household_id(self.target()).await
    }

    pub async fn get_string(&self, variable_name: &str) -> SoapResult<String> {
        properties::get_string(self.target(), variable_name).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Transport
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn play(&self) -> SoapResult<()> {
        playback::play(self.target()).await
    }

    pub async fn pause(&self) -> SoapResult<()> {
        playback::pause(self.target()).await
    }

    pub async fn stop(&self) -> SoapResult<()> {
        playback::stop(self.target()).await
    }

    /// Stop that succeeds on sources which cannot be stopped.
    pub async fn stop_or_noop(&self) -> SoapResult<()> {
        playback::stop_or_noop(self.target()).await
    }

    pub async fn next(&self) -> SoapResult<()> {
        playback::next(self.target()).await
    }

    pub async fn previous(&self) -> SoapResult<()> {
        playback::previous(self.target()).await
    }

    /// Previous, or restart the current track when there is none.
    pub async fn previous_or_restart(&self) -> SoapResult<()> {
        playback::previous_or_restart(self.target()).await
    }

    pub async fn set_av_transport_uri(&self, uri: &str, meta: &str) -> SoapResult<()> {
        playback::set_av_transport_uri(self.target(), uri, meta).await
    }

    pub async fn play_uri(&self, uri: &str, meta: &str) -> SoapResult<()> {
        playback::play_uri(self.target(), uri, meta).await
    }

    pub async fn seek_rel_time(&self, rel_time: &str) -> SoapResult<()> {
        playback::seek_rel_time(self.target(), rel_time).await
    }

    pub async fn seek_track(&self, track: u32) -> SoapResult<()> {
        playback::seek_track_number(self.target(), track).await
    }

    pub async fn position_info(&self) -> SoapResult<PositionInfo> {
        playback::get_position_info(self.target()).await
    }

    pub async fn transport_info(&self) -> SoapResult<TransportInfo> {
        playback::get_transport_info(self.target()).await
    }

    pub async fn transport_settings(&self) -> SoapResult<TransportSettings> {
        playback::get_transport_settings(self.target()).await
    }

    pub async fn media_info(&self) -> SoapResult<MediaInfo> {
        playback::get_media_info(self.target()).await
    }

    pub async fn set_play_mode(&self, mode: PlayMode) -> SoapResult<()> {
        playback::set_play_mode(self.target(), mode).await
    }

    pub async fn set_shuffle(&self, shuffle: bool) -> SoapResult<PlayMode> {
        playback::set_shuffle(self.target(), shuffle).await
    }

    pub async fn set_repeat(&self, repeat: RepeatMode) -> SoapResult<PlayMode> {
        playback::set_repeat(self.target(), repeat).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queue
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn add_uri_to_queue(
        &self,
        uri: &str,
        meta: &str,
        desired_first_track: u32,
        as_next: bool,
    ) -> SoapResult<u32> {
        playback::add_uri_to_queue(self.target(), uri, meta, desired_first_track, as_next).await
    }

    pub async fn clear_queue(&self) -> SoapResult<()> {
        playback::remove_all_tracks_from_queue(self.target()).await
    }

    pub async fn remove_from_queue(&self, object_id: &str) -> SoapResult<()> {
        playback::remove_track_from_queue(self.target(), object_id).await
    }

    pub async fn queue(&self, start: u32, count: u32) -> SoapResult<ItemPage> {
        content_directory::list_queue(self.target(), start, count).await
    }

    pub async fn queue_all(&self) -> SoapResult<ItemPage> {
        content_directory::list_queue_all(self.target()).await
    }

    pub async fn play_from_queue(&self, first_track: u32) -> SonosResult<()> {
        enqueue::play_from_queue(self.target(), first_track).await
    }

    /// Enqueues a Spotify URI or share link and returns the first track
    /// number assigned.
    pub async fn enqueue_spotify(&self, input: &str, options: &EnqueueOptions) -> SonosResult<u32> {
        let reference = parse_spotify_ref(input)?;
        enqueue::enqueue_spotify(self.target(), &reference, options).await
    }

    /// Enqueues an Apple Music link and returns the first track number
    /// assigned.
    pub async fn enqueue_apple_music(&self, input: &str, options: &EnqueueOptions) -> SonosResult<u32> {
        let reference = parse_apple_music_ref(input)?;
        enqueue::enqueue_apple_music(self.target(), &reference, options).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Content
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn favorites(&self, start: u32, count: u32) -> SoapResult<ItemPage> {
        content_directory::list_favorites(self.target(), start, count).await
    }

    pub async fn play_favorite(&self, item: &DidlItem) -> SoapResult<()> {
        content_directory::play_favorite(self.target(), item).await
    }

    pub async fn play_radio(&self, uri: &str, title: &str) -> SoapResult<()> {
        content_directory::play_radio(self.target(), uri, title).await
    }

    /// Makes relative album art paths absolute against this speaker.
    #[must_use]
    pub fn album_art_url(&self, art: &str) -> String {
        content_directory::album_art_url(art, Some(&self.ip.to_string()))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Volume
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn volume(&self) -> SoapResult<u8> {
        volume::get_volume(self.target()).await
    }

    /// Sets the volume, clamped to 0..=100. Returns the value sent.
    pub async fn set_volume(&self, level: i32) -> SoapResult<u8> {
        volume::set_volume(self.target(), level).await
    }

    pub async fn mute(&self) -> SoapResult<bool> {
        volume::get_mute(self.target()).await
    }

    pub async fn set_mute(&self, mute: bool) -> SoapResult<()> {
        volume::set_mute(self.target(), mute).await
    }

    pub async fn group_volume(&self) -> SoapResult<u8> {
        volume::get_group_volume(self.target()).await
    }

    pub async fn set_group_volume(&self, level: i32) -> SoapResult<u8> {
        volume::set_group_volume(self.target(), level).await
    }

    pub async fn group_mute(&self) -> SoapResult<bool> {
        volume::get_group_mute(self.target()).await
    }

    pub async fn set_group_mute(&self, mute: bool) -> SoapResult<()> {
        volume::set_group_mute(self.target(), mute).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Grouping
    // ─────────────────────────────────────────────────────────────────────────

    /// Joins the group coordinated by `coordinator_uuid`.
    pub async fn join(&self, coordinator_uuid: &str) -> SoapResult<()> {
        grouping::join_group(self.target(), coordinator_uuid).await
    }

    pub async fn leave(&self) -> SoapResult<()> {
        grouping::leave_group(self.target()).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Music Services & Events
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn music_services(&self) -> SoapResult<Vec<MusicService>> {
        music_services::list_available_services(self.target()).await
    }

    /// Builds a SMAPI client for `service` using this speaker's identity.
    pub async fn smapi_client(
        &self,
        service: MusicService,
        tokens: Arc<dyn SmapiTokenStore>,
    ) -> SmapiResult<SmapiClient> {
        let identity = resolve_identity(self.target()).await?;
        Ok(SmapiClient::new(Arc::clone(&self.http), service, identity, tokens)
            .with_deadline(self.deadline))
    }

    /// Subscribes `listener` to `service` events from this speaker.
    pub async fn subscribe(
        &self,
        listener: &Arc<EventListener>,
        service: SonosService,
    ) -> GenaResult<EventSubscription> {
        listener
            .subscribe(Arc::clone(&self.http), self.addr(), service)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{soap_ok, FakeTransport, ZONE_GROUP_STATE};

    fn speaker(fake: &Arc<FakeTransport>, ip: [u8; 4]) -> Speaker {
        Speaker::new(Ipv4Addr::from(ip), fake.clone())
    }

    #[tokio::test]
    async fn coordinator_of_member() {
        let fake = Arc::new(FakeTransport::new());
        fake.respond_to(
            "GetZoneGroupState",
            soap_ok("GetZoneGroupState", &[("ZoneGroupState", ZONE_GROUP_STATE)]),
        );
        let office = speaker(&fake, [10, 0, 0, 2]);
        let coordinator = office.coordinator().await.unwrap();
        assert_eq!(coordinator.ip(), Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(coordinator.port(), 1400);
    }

    #[tokio::test]
    async fn coordinator_for_room_name() {
        let fake = Arc::new(FakeTransport::new());
        fake.respond_to(
            "GetZoneGroupState",
            soap_ok("GetZoneGroupState", &[("ZoneGroupState", ZONE_GROUP_STATE)]),
        );
        let any = speaker(&fake, [10, 0, 0, 3]);
        let coordinator = any.coordinator_for_room("office").await.unwrap();
        assert_eq!(coordinator.ip(), Ipv4Addr::new(10, 0, 0, 1));

        let err = any.coordinator_for_room("Garage").await.unwrap_err();
        assert!(matches!(err, SonosError::Topology(_)));
    }

    #[tokio::test]
    async fn unknown_speaker_has_no_group() {
        let fake = Arc::new(FakeTransport::new());
        fake.respond_to(
            "GetZoneGroupState",
            soap_ok("GetZoneGroupState", &[("ZoneGroupState", ZONE_GROUP_STATE)]),
        );
        let stray = speaker(&fake, [10, 0, 0, 99]);
        assert!(matches!(stray.coordinator().await, Err(SonosError::NotFound(_))));
    }

    #[tokio::test]
    async fn calls_go_to_this_speaker() {
        let fake = Arc::new(FakeTransport::new());
        fake.respond_to("SetVolume", soap_ok("SetVolume", &[]));
        let sent = speaker(&fake, [10, 0, 0, 5]).set_volume(140).await.unwrap();
        assert_eq!(sent, 100);

        let req = fake.last_request().unwrap();
        assert_eq!(req.url, "http://10.0.0.5:1400/MediaRenderer/RenderingControl/Control");
        assert!(req.body_text().contains("<DesiredVolume>100</DesiredVolume>"));
    }

    #[tokio::test]
    async fn bad_spotify_input_is_rejected_before_any_call() {
        let fake = Arc::new(FakeTransport::new());
        let err = speaker(&fake, [10, 0, 0, 1])
            .enqueue_spotify("not a ref", &EnqueueOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SonosError::Ref(_)));
        assert!(fake.requests().is_empty());
    }
}
