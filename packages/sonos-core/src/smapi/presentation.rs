//! Search category discovery from a service's presentation map.

use std::collections::BTreeMap;

use quick_xml::events::Event;
use quick_xml::reader::Reader;
use serde::Deserialize;
use tokio::time::Instant;

use super::{SmapiError, SmapiResult};
use crate::sonos::music_services::MusicService;
use crate::sonos::transport::{HttpRequest, HttpTransport};
use crate::sonos::utils::{get_xml_attr, local_name};

/// Category name (e.g. `artists`) to the id passed to `search`.
pub type SearchCategories = BTreeMap<String, String>;

/// TuneIn publishes no usable presentation map.
#[must_use]
pub fn tunein_categories() -> SearchCategories {
    BTreeMap::from([
        ("stations".to_string(), "search:station".to_string()),
        ("shows".to_string(), "search:show".to_string()),
        ("hosts".to_string(), "search:host".to_string()),
    ])
}

/// Extracts `<SearchCategories>/<Category id mappedId>` entries.
#[must_use]
pub fn parse_search_categories(xml: &str) -> SearchCategories {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();
    let mut categories = SearchCategories::new();
    let mut in_categories = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) if local_name(e) == "SearchCategories" => in_categories = true,
            Ok(Event::End(ref e)) if e.local_name().as_ref() == b"SearchCategories" => {
                in_categories = false
            }
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e))
                if in_categories && local_name(e) == "Category" =>
            {
                if let (Some(id), Some(mapped)) = (get_xml_attr(e, b"id"), get_xml_attr(e, b"mappedId")) {
                    categories.entry(id).or_insert(mapped);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                log::warn!("[SMAPI] Presentation map parse stopped: {}", e);
                break;
            }
            _ => {}
        }
        buf.clear();
    }
    categories
}

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(rename = "presentationMap")]
    presentation_map: Option<ManifestResource>,
}

#[derive(Debug, Deserialize)]
struct ManifestResource {
    uri: String,
}

async fn fetch_text(http: &dyn HttpTransport, url: &str, deadline: Option<Instant>) -> SmapiResult<String> {
    let response = http
        .execute(HttpRequest::get(url).with_deadline(deadline))
        .await?;
    if response.status != 200 {
        return Err(SmapiError::HttpStatus(response.status));
    }
    Ok(response.text())
}

/// Resolves the presentation map URL, consulting the manifest if needed.
async fn presentation_map_url(
    http: &dyn HttpTransport,
    service: &MusicService,
    deadline: Option<Instant>,
) -> SmapiResult<Option<String>> {
    if let Some(uri) = service.presentation_map_uri.as_deref().filter(|u| !u.is_empty()) {
        return Ok(Some(uri.to_string()));
    }
    let Some(manifest_uri) = service.manifest_uri.as_deref().filter(|u| !u.is_empty()) else {
        return Ok(None);
    };
    let text = fetch_text(http, manifest_uri, deadline).await?;
    let manifest: Manifest =
        serde_json::from_str(&text).map_err(|e| SmapiError::Parse(format!("manifest: {}", e)))?;
    Ok(manifest
        .presentation_map
        .map(|p| p.uri)
        .filter(|u| !u.is_empty()))
}

/// Returns the searches `service` supports. Empty means none.
pub async fn fetch_search_categories(
    http: &dyn HttpTransport,
    service: &MusicService,
    deadline: Option<Instant>,
) -> SmapiResult<SearchCategories> {
    if service.name == "TuneIn" {
        return Ok(tunein_categories());
    }
    let Some(url) = presentation_map_url(http, service, deadline).await? else {
        log::debug!("[SMAPI] {} has no presentation map", service.name);
        return Ok(SearchCategories::new());
    };
    let xml = fetch_text(http, &url, deadline).await?;
    Ok(parse_search_categories(&xml))
}
