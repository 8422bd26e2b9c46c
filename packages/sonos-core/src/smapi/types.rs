//! SMAPI data shapes and their XML decoding.

use quick_xml::events::Event;
use quick_xml::reader::Reader;
use serde::{Deserialize, Serialize};

use super::{SmapiError, SmapiResult};
use crate::sonos::utils::{extract_xml_text, local_name, unescape_xml};

/// Credentials issued by a music service for one household.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TokenPair {
    pub auth_token: String,
    pub private_key: String,
    pub household_id: String,
    /// Device id presented when the pair was issued.
    pub device_id: String,
    /// Link code the pair was obtained with, if any.
    pub link_code: String,
    /// Unix milliseconds of the last save.
    pub updated_at: u64,
}

impl TokenPair {
    /// Both halves of the credential are present.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.auth_token.is_empty() && !self.private_key.is_empty()
    }
}

/// Link instructions returned when starting DeviceLink or AppLink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkCode {
    /// URL the user opens to approve the link.
    pub reg_url: String,
    pub link_code: String,
    pub link_device_id: Option<String>,
    pub show_link_code: bool,
}

/// One entry of a search or browse result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaItem {
    pub id: String,
    pub item_type: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album_art_uri: Option<String>,
    pub can_play: bool,
    pub can_enumerate: bool,
}

/// A page of search or browse results.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaList {
    pub index: u32,
    pub count: u32,
    pub total: u32,
    pub media_metadata: Vec<MediaItem>,
    pub media_collection: Vec<MediaItem>,
}

fn parse_bool(value: Option<String>) -> bool {
    value.is_some_and(|v| matches!(v.trim(), "true" | "1"))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Decodes one `mediaMetadata` or `mediaCollection` element body.
///
/// Track items nest artist and album under `trackMetadata`; lookups are by
/// local name anywhere in the item, so both layouts resolve.
fn parse_media_item(inner: &str) -> MediaItem {
    let field = |name: &str| extract_xml_text(inner, name);
    MediaItem {
        id: field("id").unwrap_or_default(),
        item_type: field("itemType").unwrap_or_default(),
        title: field("title").unwrap_or_default(),
        artist: non_empty(field("artist")),
        album: non_empty(field("album")),
        album_art_uri: non_empty(field("albumArtURI")),
        can_play: parse_bool(field("canPlay")),
        can_enumerate: parse_bool(field("canEnumerate")),
    }
}

fn parse_count(name: &str, text: &str) -> SmapiResult<u32> {
    text.trim()
        .parse()
        .map_err(|_| SmapiError::Parse(format!("<{}> is not a number: {:?}", name, text)))
}

/// Parses the `<{result_element}>` of a search or getMetadata response.
pub fn parse_media_list(xml: &str, result_element: &str) -> SmapiResult<MediaList> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();
    let mut list = MediaList::default();
    let mut in_result = false;
    let mut found = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let name = local_name(e);
                if !in_result {
                    if name == result_element {
                        in_result = true;
                        found = true;
                    }
                } else {
                    let text = reader
                        .read_text(e.name())
                        .map_err(|err| SmapiError::Parse(err.to_string()))?;
                    match name.as_str() {
                        "index" => list.index = parse_count(&name, &unescape_xml(&text))?,
                        "count" => list.count = parse_count(&name, &unescape_xml(&text))?,
                        "total" => list.total = parse_count(&name, &unescape_xml(&text))?,
                        "mediaMetadata" => list.media_metadata.push(parse_media_item(&text)),
                        "mediaCollection" => list.media_collection.push(parse_media_item(&text)),
                        _ => {}
                    }
                }
            }
            Ok(Event::Empty(ref e)) if !in_result && local_name(e) == result_element => {
                found = true;
                break;
            }
            Ok(Event::End(ref e)) if in_result && e.local_name().as_ref() == result_element.as_bytes() => break,
            Ok(Event::Eof) => break,
            Err(e) => return Err(SmapiError::Parse(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    if !found {
        return Err(SmapiError::Parse(format!("missing element <{}>", result_element)));
    }
    Ok(list)
}

/// Reads link instructions from a getDeviceLinkCode or getAppLink response.
///
/// AppLink wraps the same fields in `authorizeAccount/deviceLink`; lookups
/// by local name cover both.
pub fn parse_link_code(xml: &str) -> SmapiResult<LinkCode> {
    let reg_url = non_empty(extract_xml_text(xml, "regUrl"))
        .ok_or_else(|| SmapiError::Parse("missing element <regUrl>".into()))?;
    let link_code = non_empty(extract_xml_text(xml, "linkCode"))
        .ok_or_else(|| SmapiError::Parse("missing element <linkCode>".into()))?;
    let show_link_code = extract_xml_text(xml, "showLinkCode");
    Ok(LinkCode {
        reg_url,
        link_code,
        link_device_id: non_empty(extract_xml_text(xml, "linkDeviceId")),
        show_link_code: show_link_code.is_none() || parse_bool(show_link_code),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEARCH: &str = r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/"><soap:Body><searchResponse xmlns="http://www.sonos.com/Services/1.1"><searchResult><index>0</index><count>2</count><total>57</total><mediaCollection><id>album:1</id><itemType>album</itemType><title>Drive &amp; Ride</title><artist>Gareth Emery</artist><canPlay>true</canPlay><canEnumerate>true</canEnumerate></mediaCollection><mediaMetadata><id>track:9</id><itemType>track</itemType><title>Sanctuary</title><trackMetadata><artist>Gareth Emery</artist><album>Northern Lights</album><albumArtURI>https://art/1.jpg</albumArtURI><canPlay>true</canPlay></trackMetadata></mediaMetadata></searchResult></searchResponse></soap:Body></soap:Envelope>"#;

    #[test]
    fn parses_search_result() {
        let list = parse_media_list(SEARCH, "searchResult").unwrap();
        assert_eq!((list.index, list.count, list.total), (0, 2, 57));

        assert_eq!(list.media_collection.len(), 1);
        let album = &list.media_collection[0];
        assert_eq!(album.id, "album:1");
        assert_eq!(album.title, "Drive & Ride");
        assert!(album.can_enumerate);

        let track = &list.media_metadata[0];
        assert_eq!(track.item_type, "track");
        assert_eq!(track.album.as_deref(), Some("Northern Lights"));
        assert_eq!(track.album_art_uri.as_deref(), Some("https://art/1.jpg"));
        assert!(track.can_play);
        assert!(!track.can_enumerate);
    }

    #[test]
    fn missing_result_element_is_a_parse_error() {
        let err = parse_media_list(SEARCH, "getMetadataResult").unwrap_err();
        assert!(matches!(err, SmapiError::Parse(ref m) if m.contains("getMetadataResult")));
    }

    #[test]
    fn app_link_nesting() {
        let xml = r#"<getAppLinkResult><authorizeAccount><appUrlStringId>X</appUrlStringId><deviceLink><regUrl>https://link/?code=AB12</regUrl><linkCode>AB12</linkCode><showLinkCode>false</showLinkCode><linkDeviceId>dev-7</linkDeviceId></deviceLink></authorizeAccount></getAppLinkResult>"#;
        let link = parse_link_code(xml).unwrap();
        assert_eq!(link.reg_url, "https://link/?code=AB12");
        assert_eq!(link.link_code, "AB12");
        assert_eq!(link.link_device_id.as_deref(), Some("dev-7"));
        assert!(!link.show_link_code);
    }

    #[test]
    fn token_pair_validity() {
        let mut pair = TokenPair {
            auth_token: "t".into(),
            ..Default::default()
        };
        assert!(!pair.is_valid());
        pair.private_key = "k".into();
        assert!(pair.is_valid());
    }
}
