//! ContentDirectory browsing: favorites, the queue, album art and radio URIs.

use serde::Serialize;

use super::didl::{first_res_in_metadata, parse_didl, radio_didl, DidlItem};
use super::playback;
use super::services::SonosService;
use super::soap::{SoapError, SoapResult, SoapTarget};

/// Object id of the Sonos favorites container.
pub const FAVORITES_OBJECT_ID: &str = "FV:2";

/// Object id of the current queue.
pub const QUEUE_OBJECT_ID: &str = "Q:0";

const RADIO_SCHEME: &str = "x-rincon-mp3radio";

/// Page size used when listing the whole queue.
const QUEUE_PAGE_SIZE: u32 = 100;

// ─────────────────────────────────────────────────────────────────────────────
// Types
// ─────────────────────────────────────────────────────────────────────────────

/// Raw result of a `Browse` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BrowseResult {
    /// DIDL-Lite document (already entity-decoded once).
    pub result: String,
    pub number_returned: u32,
    pub total_matches: u32,
    pub update_id: u32,
}

/// A DIDL item with its 1-based position in the listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NumberedItem {
    pub position: u32,
    #[serde(flatten)]
    pub item: DidlItem,
}

/// One page of favorites or queue entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemPage {
    pub items: Vec<NumberedItem>,
    pub number_returned: u32,
    pub total_matches: u32,
    pub update_id: u32,
}

// ─────────────────────────────────────────────────────────────────────────────
// Browse
// ─────────────────────────────────────────────────────────────────────────────

/// Browses the direct children of `object_id`.
pub async fn browse(
    target: SoapTarget<'_>,
    object_id: &str,
    starting_index: u32,
    requested_count: u32,
) -> SoapResult<BrowseResult> {
    let response = target
        .request(SonosService::ContentDirectory, "Browse")
        .arg("ObjectID", object_id)
        .arg("BrowseFlag", "BrowseDirectChildren")
        .arg("Filter", "*")
        .arg("StartingIndex", starting_index.to_string())
        .arg("RequestedCount", requested_count.to_string())
        .arg("SortCriteria", "")
        .send()
        .await?;

    Ok(BrowseResult {
        result: response.get_or_empty("Result").to_string(),
        number_returned: response.u32_or_zero("NumberReturned"),
        total_matches: response.u32_or_zero("TotalMatches"),
        update_id: response.u32_or_zero("UpdateID"),
    })
}

async fn browse_page(
    target: SoapTarget<'_>,
    object_id: &str,
    start: u32,
    count: u32,
) -> SoapResult<ItemPage> {
    let raw = browse(target, object_id, start, count).await?;
    let items = parse_didl(&raw.result)?
        .into_iter()
        .zip(start + 1..)
        .map(|(item, position)| NumberedItem { position, item })
        .collect();

    Ok(ItemPage {
        items,
        number_returned: raw.number_returned,
        total_matches: raw.total_matches,
        update_id: raw.update_id,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Favorites
// ─────────────────────────────────────────────────────────────────────────────

/// Lists favorites, numbering entries from `start + 1`.
pub async fn list_favorites(target: SoapTarget<'_>, start: u32, count: u32) -> SoapResult<ItemPage> {
    browse_page(target, FAVORITES_OBJECT_ID, start, count).await
}

/// Returns the URI to play for a favorite: its own `<res>`, or the first
/// `<res>` of its nested metadata.
#[must_use]
pub fn favorite_uri(item: &DidlItem) -> Option<String> {
    if !item.uri.is_empty() {
        return Some(item.uri.clone());
    }
    first_res_in_metadata(&item.res_md)
}

/// Plays a favorite on the coordinator.
pub async fn play_favorite(target: SoapTarget<'_>, item: &DidlItem) -> SoapResult<()> {
    let uri = favorite_uri(item).ok_or_else(|| {
        SoapError::InvalidArgument(format!("favorite {:?} has no playable URI", item.title))
    })?;
    log::info!("[Sonos] Playing favorite {:?} on {}", item.title, target.addr);
    playback::set_av_transport_uri(target, &uri, &item.res_md).await?;
    playback::play(target).await
}

// ─────────────────────────────────────────────────────────────────────────────
// Queue
// ─────────────────────────────────────────────────────────────────────────────

/// Lists one page of the queue, numbering entries from `start + 1`.
pub async fn list_queue(target: SoapTarget<'_>, start: u32, count: u32) -> SoapResult<ItemPage> {
    browse_page(target, QUEUE_OBJECT_ID, start, count).await
}

/// Lists the whole queue, following pages until `TotalMatches` is reached.
pub async fn list_queue_all(target: SoapTarget<'_>) -> SoapResult<ItemPage> {
    let mut all = list_queue(target, 0, QUEUE_PAGE_SIZE).await?;
    loop {
        let fetched = all.items.len() as u32;
        if fetched >= all.total_matches {
            break;
        }
        let page = list_queue(target, fetched, QUEUE_PAGE_SIZE).await?;
        if page.items.is_empty() {
            break;
        }
        all.items.extend(page.items);
        all.update_id = page.update_id;
    }
    all.number_returned = all.items.len() as u32;
    Ok(all)
}

// ─────────────────────────────────────────────────────────────────────────────
// URI Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Resolves an album art reference against the speaker.
///
/// Absolute URLs pass through. Speaker-relative paths get
/// `http://<ip>:1400` when `speaker_ip` is known.
#[must_use]
pub fn album_art_url(art: &str, speaker_ip: Option<&str>) -> String {
    if art.starts_with("http://") || art.starts_with("https://") {
        return art.to_string();
    }
    match speaker_ip {
        Some(ip) if art.starts_with('/') && !ip.is_empty() => {
            format!("http://{}:{}{}", ip, crate::protocol_constants::SONOS_PORT, art)
        }
        _ => art.to_string(),
    }
}

/// Replaces the URI scheme with `x-rincon-mp3radio`.
///
/// A URI without a scheme gets one prepended.
#[must_use]
pub fn force_radio_uri(uri: &str) -> String {
    match uri.split_once(':') {
        Some((_, rest)) => format!("{}:{}", RADIO_SCHEME, rest),
        None => format!("{}:{}", RADIO_SCHEME, uri),
    }
}

/// Plays an internet radio stream with TuneIn-style metadata.
pub async fn play_radio(target: SoapTarget<'_>, uri: &str, title: &str) -> SoapResult<()> {
    if uri.trim().is_empty() {
        return Err(SoapError::InvalidArgument("radio URI is empty".into()));
    }
    let uri = force_radio_uri(uri);
    playback::play_uri(target, &uri, &radio_didl(title)).await
}
