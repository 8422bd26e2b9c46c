//! Sonos UPnP service definitions.
//!
//! Single source of truth for service URNs, control paths and event paths
//! used by both SOAP commands and GENA subscriptions.

use serde::Serialize;

/// Sonos UPnP services used for control and event subscriptions.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SonosService {
    /// Audio/Video transport control (play, pause, stop, seek, queue).
    AVTransport,
    /// Group volume and mute control (for coordinator speakers).
    GroupRenderingControl,
    /// Individual speaker volume and mute control.
    RenderingControl,
    /// Zone group topology and membership information.
    ZoneGroupTopology,
    /// Browsing of favorites, queue and library containers.
    ContentDirectory,
    /// Household identity and device-level settings.
    DeviceProperties,
    /// Persistent string variables stored on the speaker.
    SystemProperties,
    /// Music service catalog known to the household.
    MusicServices,
}

impl SonosService {
    /// All services, in declaration order.
    pub const ALL: [SonosService; 8] = [
        Self::AVTransport,
        Self::GroupRenderingControl,
        Self::RenderingControl,
        Self::ZoneGroupTopology,
        Self::ContentDirectory,
        Self::DeviceProperties,
        Self::SystemProperties,
        Self::MusicServices,
    ];

    /// Returns the UPnP service URN for SOAP requests.
    #[must_use]
    pub fn urn(&self) -> &'static str {
        match self {
            Self::AVTransport => "urn:schemas-upnp-org:service:AVTransport:1",
            Self::GroupRenderingControl => "urn:schemas-upnp-org:service:GroupRenderingControl:1",
            Self::RenderingControl => "urn:schemas-upnp-org:service:RenderingControl:1",
            Self::ZoneGroupTopology => "urn:schemas-upnp-org:service:ZoneGroupTopology:1",
            Self::ContentDirectory => "urn:schemas-upnp-org:service:ContentDirectory:1",
            Self::DeviceProperties => "urn:schemas-upnp-org:service:DeviceProperties:1",
            Self::SystemProperties => "urn:schemas-upnp-org:service:SystemProperties:1",
            Self::MusicServices => "urn:schemas-upnp-org:service:MusicServices:1",
        }
    }

    /// Returns the UPnP control endpoint path for SOAP requests.
    #[must_use]
    pub fn control_path(&self) -> &'static str {
        match self {
            Self::AVTransport => "/MediaRenderer/AVTransport/Control",
            Self::GroupRenderingControl => "/MediaRenderer/GroupRenderingControl/Control",
            Self::RenderingControl => "/MediaRenderer/RenderingControl/Control",
            Self::ZoneGroupTopology => "/ZoneGroupTopology/Control",
            Self::ContentDirectory => "/MediaServer/ContentDirectory/Control",
            Self::DeviceProperties => "/DeviceProperties/Control",
            Self::SystemProperties => "/SystemProperties/Control",
            Self::MusicServices => "/MusicServices/Control",
        }
    }

    /// Returns the UPnP event endpoint path for GENA subscriptions.
    #[must_use]
    pub fn event_path(&self) -> &'static str {
        match self {
            Self::AVTransport => "/MediaRenderer/AVTransport/Event",
            Self::GroupRenderingControl => "/MediaRenderer/GroupRenderingControl/Event",
            Self::RenderingControl => "/MediaRenderer/RenderingControl/Event",
            Self::ZoneGroupTopology => "/ZoneGroupTopology/Event",
            Self::ContentDirectory => "/MediaServer/ContentDirectory/Event",
            Self::DeviceProperties => "/DeviceProperties/Event",
            Self::SystemProperties => "/SystemProperties/Event",
            Self::MusicServices => "/MusicServices/Event",
        }
    }

    /// Returns a human-readable name for this service.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::AVTransport => "AVTransport",
            Self::GroupRenderingControl => "GroupRenderingControl",
            Self::RenderingControl => "RenderingControl",
            Self::ZoneGroupTopology => "ZoneGroupTopology",
            Self::ContentDirectory => "ContentDirectory",
            Self::DeviceProperties => "DeviceProperties",
            Self::SystemProperties => "SystemProperties",
            Self::MusicServices => "MusicServices",
        }
    }

    /// Looks up a service by its [`name`](Self::name), ignoring ASCII case.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|s| s.name().eq_ignore_ascii_case(name.trim()))
    }
}
