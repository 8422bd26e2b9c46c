//! DIDL-Lite metadata parsing and emission.
//!
//! Sonos returns DIDL-Lite inside Browse `Result` fields and nested again
//! inside favorites' `<r:resMD>`. Outgoing DIDL is used as queue and
//! transport metadata so the speaker knows which service owns an item.

use quick_xml::events::Event;
use quick_xml::reader::Reader;
use serde::Serialize;

use super::soap::{SoapError, SoapResult};
use super::utils::{escape_xml, get_xml_attr, local_name, parse_embedded, unescape_xml};
use crate::protocol_constants::TUNEIN_DESCRIPTOR;

const DIDL_OPEN: &str = r#"<DIDL-Lite xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:upnp="urn:schemas-upnp-org:metadata-1-0/upnp/" xmlns:r="urn:schemas-rinconnetworks-com:metadata-1-0/" xmlns="urn:schemas-upnp-org:metadata-1-0/DIDL-Lite/">"#;
const DIDL_CLOSE: &str = "</DIDL-Lite>";
const RINCON_METADATA_NS: &str = "urn:schemas-rinconnetworks-com:metadata-1-0/";

/// One `<item>` or `<container>` of a DIDL-Lite document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DidlItem {
    pub id: String,
    pub parent_id: String,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub album_art_uri: String,
    pub class: String,
    /// URI of the first `<res>` element.
    pub uri: String,
    /// Unescaped content of `<r:resMD>`, itself a DIDL-Lite document.
    pub res_md: String,
}

impl DidlItem {
    /// Returns true if the upnp class marks a container.
    #[must_use]
    pub fn is_container(&self) -> bool {
        self.class.starts_with("object.container")
    }
}

/// Parses a DIDL-Lite payload, escaped or not.
///
/// # Errors
/// Returns `SoapError::Parse` if the document is malformed.
pub fn parse_didl(payload: &str) -> SoapResult<Vec<DidlItem>> {
    if payload.trim().is_empty() {
        return Ok(Vec::new());
    }
    parse_embedded(payload, parse_didl_document)
}

fn parse_didl_document(xml: &str) -> SoapResult<Vec<DidlItem>> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();
    let mut items = Vec::new();
    let mut current: Option<DidlItem> = None;
    let mut creator = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = local_name(&e);
                match name.as_str() {
                    "item" | "container" => {
                        creator.clear();
                        current = Some(DidlItem {
                            id: get_xml_attr(&e, b"id").unwrap_or_default(),
                            parent_id: get_xml_attr(&e, b"parentID").unwrap_or_default(),
                            ..Default::default()
                        });
                    }
                    _ => {
                        if let Some(item) = current.as_mut() {
                            let text = reader
                                .read_text(e.name())
                                .map_err(|err| SoapError::Parse(err.to_string()))?;
                            let value = unescape_xml(text.trim());
                            let slot = match name.as_str() {
                                "title" => Some(&mut item.title),
                                "artist" => Some(&mut item.artist),
                                "creator" => Some(&mut creator),
                                "album" => Some(&mut item.album),
                                "albumArtURI" => Some(&mut item.album_art_uri),
                                "class" => Some(&mut item.class),
                                "res" => Some(&mut item.uri),
                                "resMD" => Some(&mut item.res_md),
                                _ => None,
                            };
                            // First occurrence wins.
                            if let Some(slot) = slot {
                                if slot.is_empty() {
                                    *slot = value;
                                }
                            }
                        }
                    }
                }
            }
            Ok(Event::Empty(e)) => {
                let name = local_name(&e);
                if name == "item" || name == "container" {
                    items.push(DidlItem {
                        id: get_xml_attr(&e, b"id").unwrap_or_default(),
                        parent_id: get_xml_attr(&e, b"parentID").unwrap_or_default(),
                        ..Default::default()
                    });
                }
            }
            Ok(Event::End(e)) => {
                let name = e.local_name();
                if name.as_ref() == b"item" || name.as_ref() == b"container" {
                    if let Some(mut item) = current.take() {
                        if item.artist.is_empty() {
                            item.artist = std::mem::take(&mut creator);
                        }
                        items.push(item);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(SoapError::Parse(format!("malformed DIDL-Lite: {}", e))),
            _ => {}
        }
        buf.clear();
    }

    Ok(items)
}

/// Returns the first `<res>` URI found inside a nested `resMD` document.
#[must_use]
pub fn first_res_in_metadata(res_md: &str) -> Option<String> {
    parse_didl(res_md)
        .ok()?
        .into_iter()
        .map(|item| item.uri)
        .find(|uri| !uri.is_empty())
}

// ─────────────────────────────────────────────────────────────────────────────
// Emitters
// ─────────────────────────────────────────────────────────────────────────────

/// Formats the service descriptor used in share-link metadata.
#[must_use]
pub fn service_descriptor(service_number: u32) -> String {
    format!("SA_RINCON{0}_X_#Svc{0}-0-Token", service_number)
}

/// Builds single-item DIDL-Lite metadata for enqueuing a music-service item.
///
/// `item_id` is the full DIDL id (magic prefix plus encoded id).
#[must_use]
pub fn share_didl(item_id: &str, title: &str, upnp_class: &str, service_number: u32) -> String {
    let mut didl = String::from(DIDL_OPEN);
    didl.push_str(&format!(
        r#"<item id="{}" parentID="-1" restricted="true">"#,
        escape_xml(item_id)
    ));
    didl.push_str(&format!("<dc:title>{}</dc:title>", escape_xml(title)));
    didl.push_str(&format!("<upnp:class>{}</upnp:class>", escape_xml(upnp_class)));
    didl.push_str(&format!(
        r#"<desc id="cdudn" nameSpace="{}">{}</desc>"#,
        RINCON_METADATA_NS,
        service_descriptor(service_number)
    ));
    didl.push_str("</item>");
    didl.push_str(DIDL_CLOSE);
    didl
}

/// Builds DIDL-Lite metadata for an internet radio stream.
#[must_use]
pub fn radio_didl(title: &str) -> String {
    let mut didl = String::from(DIDL_OPEN);
    didl.push_str(r#"<item id="R:0/0/0" parentID="R:0/0" restricted="true">"#);
    didl.push_str(&format!("<dc:title>{}</dc:title>", escape_xml(title)));
    didl.push_str("<upnp:class>object.item.audioItem.audioBroadcast</upnp:class>");
    didl.push_str(&format!(
        r#"<desc id="cdudn" nameSpace="{}">{}</desc>"#,
        RINCON_METADATA_NS, TUNEIN_DESCRIPTOR
    ));
    didl.push_str("</item>");
    didl.push_str(DIDL_CLOSE);
    didl
}

#[cfg(test)]
mod tests {
    use super::*;

    const FAVORITES: &str = r#"<DIDL-Lite xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:upnp="urn:schemas-upnp-org:metadata-1-0/upnp/" xmlns:r="urn:schemas-rinconnetworks-com:metadata-1-0/" xmlns="urn:schemas-upnp-org:metadata-1-0/DIDL-Lite/"><item id="FV:2/1" parentID="FV:2" restricted="false"><dc:title>Jazz &amp; Blues</dc:title><upnp:class>object.itemobject.item.sonos-favorite</upnp:class><upnp:albumArtURI>/getaa?s=1</upnp:albumArtURI><res protocolInfo="x-rincon-mp3radio:*:*:*">x-sonosapi-stream:s1?sid=254</res><r:resMD>&lt;DIDL-Lite&gt;&lt;item id="x"&gt;&lt;res&gt;inner-uri&lt;/res&gt;&lt;/item&gt;&lt;/DIDL-Lite&gt;</r:resMD></item><item id="FV:2/2" parentID="FV:2"><dc:title>Album</dc:title><dc:creator>Someone</dc:creator><albumArtURI>http://art/x.jpg</albumArtURI><r:resMD>&lt;DIDL-Lite&gt;&lt;item id="y"&gt;&lt;res&gt;from-md&lt;/res&gt;&lt;res&gt;second&lt;/res&gt;&lt;/item&gt;&lt;/DIDL-Lite&gt;</r:resMD></item></DIDL-Lite>"#;

    #[test]
    fn parses_favorite_items() {
        let items = parse_didl(FAVORITES).unwrap();
        assert_eq!(items.len(), 2);

        let first = &items[0];
        assert_eq!(first.id, "FV:2/1");
        assert_eq!(first.parent_id, "FV:2");
        assert_eq!(first.title, "Jazz & Blues");
        assert_eq!(first.album_art_uri, "/getaa?s=1");
        assert_eq!(first.uri, "x-sonosapi-stream:s1?sid=254");
        assert!(first.res_md.starts_with("<DIDL-Lite>"));

        let second = &items[1];
        assert_eq!(second.artist, "Someone");
        assert_eq!(second.album_art_uri, "http://art/x.jpg");
        assert!(second.uri.is_empty());
        assert_eq!(first_res_in_metadata(&second.res_md).as_deref(), Some("from-md"));
    }

    #[test]
    fn accepts_escaped_payload() {
        let escaped = escape_xml(FAVORITES);
        assert_eq!(parse_didl(&escaped).unwrap().len(), 2);
    }

    #[test]
    fn prefers_upnp_artist_over_creator() {
        let xml = r#"<DIDL-Lite><item id="1"><dc:creator>C</dc:creator><upnp:artist>A</upnp:artist></item></DIDL-Lite>"#;
        assert_eq!(parse_didl(xml).unwrap()[0].artist, "A");
    }

    #[test]
    fn malformed_didl_is_error() {
        assert!(parse_didl("<DIDL-Lite><item></DIDL-Lite>").is_err());
        assert!(parse_didl("").unwrap().is_empty());
    }

    #[test]
    fn share_didl_carries_service_descriptor() {
        let didl = share_didl("00032020spotify%3atrack%3aabc", "A & B", "object.item.audioItem.musicTrack", 2311);
        assert!(didl.contains(r#"<item id="00032020spotify%3atrack%3aabc""#));
        assert!(didl.contains("<dc:title>A &amp; B</dc:title>"));
        assert!(didl.contains(
            r#"<desc id="cdudn" nameSpace="urn:schemas-rinconnetworks-com:metadata-1-0/">SA_RINCON2311_X_#Svc2311-0-Token</desc>"#
        ));
        assert_eq!(parse_didl(&didl).unwrap()[0].class, "object.item.audioItem.musicTrack");
    }

    #[test]
    fn radio_didl_uses_tunein_descriptor() {
        let didl = radio_didl("Station");
        assert!(didl.contains("object.item.audioItem.audioBroadcast"));
        assert!(didl.contains(">SA_RINCON65031_</desc>"));
    }
}
