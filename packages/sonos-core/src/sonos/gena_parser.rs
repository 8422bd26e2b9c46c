//! GENA event XML parsing.
//!
//! Pure functions turning NOTIFY bodies into flat variable maps. A body is
//! an `<e:propertyset>` whose properties are either plain values (e.g.
//! `ZoneGroupState`) or a `LastChange` document escaped inside the property
//! text. `LastChange` is expanded into one entry per state variable.

use std::collections::BTreeMap;

use quick_xml::events::Event;
use quick_xml::reader::Reader;

use super::utils::{get_xml_attr, local_name, parse_embedded, unescape_xml};

/// Key emitted instead of variables when the payload cannot be parsed.
pub const PARSE_ERROR_KEY: &str = "parse_error";

/// Converts `CamelCase` variable names to `snake_case`.
///
/// Acronym runs stay together: `CurrentTrackURI` becomes `current_track_uri`.
#[must_use]
pub fn to_snake_case(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if c.is_ascii_uppercase() {
            let prev = i.checked_sub(1).map(|j| chars[j]);
            let next = chars.get(i + 1).copied();
            let boundary = match prev {
                Some(p) if p.is_ascii_lowercase() || p.is_ascii_digit() => true,
                Some(p) if p.is_ascii_uppercase() => next.is_some_and(|n| n.is_ascii_lowercase()),
                _ => false,
            };
            if boundary && !out.ends_with('_') {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else if c == '-' || c == ' ' {
            out.push('_');
        } else {
            out.push(c);
        }
    }
    out
}

fn error_map(message: impl Into<String>) -> BTreeMap<String, String> {
    BTreeMap::from([(PARSE_ERROR_KEY.to_string(), message.into())])
}

/// Parses the inner `LastChange` document.
///
/// Variables with a non-Master `channel` attribute get the channel as a
/// suffix (`volume_lf`); Master keeps the plain name.
pub fn parse_last_change(payload: &str) -> Result<BTreeMap<String, String>, String> {
    parse_embedded(payload, |xml| {
        let mut reader = Reader::from_str(xml);
        let mut buf = Vec::new();
        let mut vars = BTreeMap::new();
        let mut depth = 0usize;
        let mut saw_event = false;

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(ref e)) => {
                    let name = local_name(e);
                    if depth == 0 {
                        saw_event = name == "Event";
                    }
                    depth += 1;
                    if depth >= 3 {
                        insert_variable(&mut vars, &name, e);
                    }
                }
                Ok(Event::Empty(ref e)) => {
                    if depth >= 2 {
                        insert_variable(&mut vars, &local_name(e), e);
                    }
                }
                Ok(Event::End(_)) => depth = depth.saturating_sub(1),
                Ok(Event::Eof) => break,
                Err(e) => return Err(format!("LastChange: {}", e)),
                _ => {}
            }
            buf.clear();
        }

        if !saw_event {
            return Err("LastChange: missing <Event> root".to_string());
        }
        Ok(vars)
    })
}

fn insert_variable(
    vars: &mut BTreeMap<String, String>,
    name: &str,
    e: &quick_xml::events::BytesStart,
) {
    let Some(val) = get_xml_attr(e, b"val") else {
        return;
    };
    let mut key = to_snake_case(name);
    if let Some(channel) = get_xml_attr(e, b"channel") {
        if !channel.eq_ignore_ascii_case("Master") {
            key.push('_');
            key.push_str(&to_snake_case(&channel));
        }
    }
    vars.insert(key, val);
}

/// Parses a NOTIFY body into flat `snake_case` variables.
///
/// Malformed XML yields a single `parse_error` entry rather than an error,
/// so consumers still see that an event arrived.
#[must_use]
pub fn parse_notify_body(body: &str) -> BTreeMap<String, String> {
    let mut reader = Reader::from_str(body);
    let mut buf = Vec::new();
    let mut vars = BTreeMap::new();
    let mut in_property = false;
    let mut saw_propertyset = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let name = local_name(e);
                match name.as_str() {
                    "propertyset" => saw_propertyset = true,
                    "property" => in_property = true,
                    _ if in_property => {
                        let text = match reader.read_text(e.name()) {
                            Ok(t) => unescape_xml(&t),
                            Err(err) => return error_map(format!("propertyset: {}", err)),
                        };
                        if name == "LastChange" {
                            match parse_last_change(&text) {
                                Ok(inner) => vars.extend(inner),
                                Err(msg) => return error_map(msg),
                            }
                        } else {
                            vars.insert(to_snake_case(&name), text.trim().to_string());
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Empty(ref e)) if in_property => {
                vars.insert(to_snake_case(&local_name(e)), String::new());
            }
            Ok(Event::End(ref e)) if e.local_name().as_ref() == b"property" => in_property = false,
            Ok(Event::Eof) => break,
            Err(e) => return error_map(format!("propertyset: {}", e)),
            _ => {}
        }
        buf.clear();
    }

    if !saw_propertyset {
        return error_map("propertyset: missing <e:propertyset> root");
    }
    vars
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sonos::utils::escape_xml;

    fn propertyset(last_change: &str) -> String {
        format!(
            r#"<e:propertyset xmlns:e="urn:schemas-upnp-org:event-1-0"><e:property><LastChange>{}</LastChange></e:property></e:propertyset>"#,
            escape_xml(last_change)
        )
    }

    #[test]
    fn snake_case_conversion() {
        assert_eq!(to_snake_case("TransportState"), "transport_state");
        assert_eq!(to_snake_case("CurrentTrackURI"), "current_track_uri");
        assert_eq!(to_snake_case("AVTransportURIMetaData"), "av_transport_uri_meta_data");
        assert_eq!(to_snake_case("NumberOfTracks"), "number_of_tracks");
        assert_eq!(to_snake_case("LF"), "lf");
    }

    #[test]
    fn av_transport_last_change() {
        let inner = r#"<Event xmlns="urn:schemas-upnp-org:metadata-1-0/AVT/"><InstanceID val="0"><TransportState val="PLAYING"/><CurrentPlayMode val="SHUFFLE"/><CurrentTrackMetaData val="&lt;DIDL-Lite&gt;&lt;/DIDL-Lite&gt;"/></InstanceID></Event>"#;
        let vars = parse_notify_body(&propertyset(inner));
        assert_eq!(vars.get("transport_state").map(String::as_str), Some("PLAYING"));
        assert_eq!(vars.get("current_play_mode").map(String::as_str), Some("SHUFFLE"));
        assert_eq!(
            vars.get("current_track_meta_data").map(String::as_str),
            Some("<DIDL-Lite></DIDL-Lite>")
        );
        assert!(!vars.contains_key("instance_id"));
    }

    #[test]
    fn rendering_control_channels() {
        let inner = r#"<Event xmlns="urn:schemas-upnp-org:metadata-1-0/RCS/"><InstanceID val="0"><Volume channel="Master" val="25"/><Volume channel="LF" val="100"/><Mute channel="Master" val="0"/></InstanceID></Event>"#;
        let vars = parse_notify_body(&propertyset(inner));
        assert_eq!(vars.get("volume").map(String::as_str), Some("25"));
        assert_eq!(vars.get("volume_lf").map(String::as_str), Some("100"));
        assert_eq!(vars.get("mute").map(String::as_str), Some("0"));
    }

    #[test]
    fn plain_properties_are_kept() {
        let body = r#"<e:propertyset xmlns:e="urn:schemas-upnp-org:event-1-0"><e:property><GroupVolume>30</GroupVolume></e:property><e:property><GroupMute>1</GroupMute></e:property></e:propertyset>"#;
        let vars = parse_notify_body(body);
        assert_eq!(vars.get("group_volume").map(String::as_str), Some("30"));
        assert_eq!(vars.get("group_mute").map(String::as_str), Some("1"));
    }

    #[test]
    fn malformed_last_change_yields_parse_error() {
        let vars = parse_notify_body(&propertyset("<Event><InstanceID val=\"0\"></Event>"));
        assert_eq!(vars.len(), 1);
        assert!(vars.contains_key(PARSE_ERROR_KEY));
    }

    #[test]
    fn non_propertyset_yields_parse_error() {
        let vars = parse_notify_body("hello");
        assert!(vars.contains_key(PARSE_ERROR_KEY));
    }
}
