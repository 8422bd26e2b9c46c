//! Shared XML and URL helpers for the UPnP layer.
//!
//! Everything that touches escaped payloads goes through [`parse_embedded`]
//! so call sites never hand-roll entity decoding.

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

// ─────────────────────────────────────────────────────────────────────────────
// XML Parsing Utilities
// ─────────────────────────────────────────────────────────────────────────────

/// Extracts text content from the first occurrence of an XML element.
///
/// Searches for an element by its local name (ignoring namespace prefixes)
/// and returns its decoded text content. An empty element yields `""`.
///
/// # Example
/// ```ignore
/// let xml = r#"<u:CurrentVolume>42</u:CurrentVolume>"#;
/// assert_eq!(extract_xml_text(xml, "CurrentVolume"), Some("42".to_string()));
/// ```
pub fn extract_xml_text(xml: &str, element_name: &str) -> Option<String> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();
    let target_bytes = element_name.as_bytes();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) if e.local_name().as_ref() == target_bytes => {
                if let Ok(text) = reader.read_text(e.name()) {
                    return Some(unescape_xml(&text));
                }
            }
            Ok(Event::Empty(ref e)) if e.local_name().as_ref() == target_bytes => {
                return Some(String::new());
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }
    None
}

/// Returns true if an element with the given local name exists anywhere in `xml`.
pub fn contains_element(xml: &str, element_name: &str) -> bool {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();
    let target_bytes = element_name.as_bytes();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e))
                if e.local_name().as_ref() == target_bytes =>
            {
                return true;
            }
            Ok(Event::Eof) | Err(_) => return false,
            _ => {}
        }
        buf.clear();
    }
}

/// Reads an attribute value from an element, decoding XML entities.
pub fn get_xml_attr(elem: &BytesStart, attr_name: &[u8]) -> Option<String> {
    elem.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == attr_name)
        .map(|a| unescape_xml(&String::from_utf8_lossy(&a.value)))
}

/// Returns the element's local name as an owned string.
pub fn local_name(elem: &BytesStart) -> String {
    String::from_utf8_lossy(elem.local_name().as_ref()).into_owned()
}

// ─────────────────────────────────────────────────────────────────────────────
// XML Encoding
// ─────────────────────────────────────────────────────────────────────────────

/// Escapes XML special characters for embedding in XML content.
///
/// Used for SOAP arguments and DIDL-Lite metadata values.
///
/// # Example
/// ```ignore
/// assert_eq!(escape_xml("Tom & Jerry"), "Tom &amp; Jerry");
/// assert_eq!(escape_xml("<title>"), "&lt;title&gt;");
/// ```
pub fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// Decodes XML/HTML entities once.
pub fn unescape_xml(s: &str) -> String {
    html_escape::decode_html_entities(s).into_owned()
}

/// Unescapes an embedded XML payload and hands it to `parse`.
///
/// Sonos nests XML documents as escaped text in several places
/// (`ZoneGroupState`, `LastChange`, DIDL `Result`, `resMD`, service lists).
/// Text read through [`extract_xml_text`] is already decoded once; payloads
/// that arrive escaped twice are decoded again until they start with markup.
pub fn parse_embedded<T>(payload: &str, parse: impl FnOnce(&str) -> T) -> T {
    let mut current = payload.trim().to_string();
    // Two extra rounds cover every nesting depth seen in the wild.
    for _ in 0..2 {
        if current.starts_with("&lt;") {
            current = unescape_xml(&current);
        } else {
            break;
        }
    }
    parse(&current)
}

// ─────────────────────────────────────────────────────────────────────────────
// URL Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Extracts the host from a UPnP Location URL.
///
/// # Example
/// ```ignore
/// let ip = extract_ip_from_location("http://192.168.1.100:1400/xml/device_desc.xml");
/// assert_eq!(ip, Some("192.168.1.100".to_string()));
/// ```
pub fn extract_ip_from_location(location: &str) -> Option<String> {
    let url = reqwest::Url::parse(location.trim()).ok()?;
    url.host_str()
        .filter(|h| !h.is_empty())
        .map(|h| h.to_string())
}

/// Strips an optional `uuid:` prefix from a UDN.
pub fn strip_uuid_prefix(udn: &str) -> &str {
    let trimmed = udn.trim();
    trimmed.strip_prefix("uuid:").unwrap_or(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_xml_text_ignores_namespace_prefix() {
        let xml = r#"<s:Body><u:GetVolumeResponse><CurrentVolume>42</CurrentVolume></u:GetVolumeResponse></s:Body>"#;
        assert_eq!(extract_xml_text(xml, "CurrentVolume"), Some("42".into()));
        assert_eq!(extract_xml_text(xml, "Missing"), None);
    }

    #[test]
    fn extract_xml_text_decodes_entities() {
        let xml = r#"<Result>&lt;DIDL-Lite&gt;&amp;amp;&lt;/DIDL-Lite&gt;</Result>"#;
        assert_eq!(
            extract_xml_text(xml, "Result"),
            Some("<DIDL-Lite>&amp;</DIDL-Lite>".into())
        );
    }

    #[test]
    fn parse_embedded_handles_double_escaping() {
        let once = "<Event/>";
        let twice = "&amp;lt;Event/&amp;gt;";
        assert_eq!(parse_embedded(once, str::to_string), "<Event/>");
        assert_eq!(parse_embedded(&unescape_xml(twice), str::to_string), "<Event/>");
        assert_eq!(parse_embedded("&lt;Event/&gt;", str::to_string), "<Event/>");
    }

    #[test]
    fn escape_xml_covers_all_specials() {
        assert_eq!(escape_xml(r#"<a & 'b' "c">"#), "&lt;a &amp; &apos;b&apos; &quot;c&quot;&gt;");
    }

    #[test]
    fn location_host_extraction() {
        assert_eq!(
            extract_ip_from_location("http://192.168.1.100:1400/xml/device_description.xml"),
            Some("192.168.1.100".into())
        );
        assert_eq!(extract_ip_from_location("not a url"), None);
    }

    #[test]
    fn uuid_prefix_is_stripped() {
        assert_eq!(strip_uuid_prefix("uuid:RINCON_1"), "RINCON_1");
        assert_eq!(strip_uuid_prefix("RINCON_1"), "RINCON_1");
    }
}
