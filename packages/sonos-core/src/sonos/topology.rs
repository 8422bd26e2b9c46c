//! Zone group topology parsing and lookups.
//!
//! Parses `ZoneGroupState` XML into groups and members and answers the
//! name/ip/coordinator questions every higher-level operation starts with.
//! A [`Topology`] is a snapshot: fetch a fresh one after grouping changes.

use std::collections::HashMap;
use std::net::SocketAddrV4;

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;

use super::services::SonosService;
use super::soap::{SoapError, SoapRequestBuilder, SoapResult};
use super::transport::HttpTransport;
use super::utils::{extract_ip_from_location, get_xml_attr, parse_embedded};

// ─────────────────────────────────────────────────────────────────────────────
// Types
// ─────────────────────────────────────────────────────────────────────────────

/// A zone player as listed in the zone group state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub name: String,
    pub ip: String,
    pub uuid: String,
    pub location: String,
    /// False for bonded satellites (subs, surrounds).
    pub is_visible: bool,
    pub is_coordinator: bool,
}

/// A group of members sharing one transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: String,
    /// Display name: coordinator room first, then other rooms.
    pub name: String,
    pub coordinator: Member,
    pub members: Vec<Member>,
}

impl Group {
    /// Members that are separately controllable rooms.
    pub fn visible_members(&self) -> impl Iterator<Item = &Member> {
        self.members.iter().filter(|m| m.is_visible)
    }
}

/// Errors raised when resolving a room against a topology.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TopologyError {
    /// The topology has no groups.
    #[error("no speakers found")]
    Empty,

    /// No member matches the query.
    #[error("speaker not found: {0}")]
    NotFound(String),

    /// Several members match a substring query.
    #[error("ambiguous room name {query:?}, candidates: {}", candidates.join(", "))]
    Ambiguous {
        query: String,
        candidates: Vec<String>,
    },
}

/// A parsed snapshot of the household's grouping.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Topology {
    groups: Vec<Group>,
    #[serde(skip)]
    by_name: HashMap<String, (usize, usize)>,
    #[serde(skip)]
    by_ip: HashMap<String, (usize, usize)>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Parsing
// ─────────────────────────────────────────────────────────────────────────────

struct GroupBuilder {
    id: String,
    coordinator_uuid: String,
    members: Vec<Member>,
}

fn parse_member(e: &BytesStart, visible_default: bool) -> Option<Member> {
    let uuid = get_xml_attr(e, b"UUID").filter(|u| !u.is_empty())?;
    let location = get_xml_attr(e, b"Location").unwrap_or_default();
    let ip = extract_ip_from_location(&location).unwrap_or_default();
    let name = get_xml_attr(e, b"ZoneName").unwrap_or_default();
    let is_visible = match get_xml_attr(e, b"Invisible").as_deref() {
        Some("1") | Some("true") => false,
        Some(_) => true,
        None => visible_default,
    };
    Some(Member {
        name,
        ip,
        uuid,
        location,
        is_visible,
        is_coordinator: false,
    })
}

/// Builds a group display name from member names, coordinator first.
fn group_name(coordinator: &Member, members: &[Member]) -> String {
    let mut names: Vec<&str> = vec![coordinator.name.as_str()];
    for m in members.iter().filter(|m| m.is_visible) {
        if !names.contains(&m.name.as_str()) {
            names.push(&m.name);
        }
    }
    names.join(", ")
}

impl GroupBuilder {
    fn finish(mut self) -> Option<Group> {
        if self.members.is_empty() {
            return None;
        }
        let coordinator_index = self
            .members
            .iter()
            .position(|m| m.uuid == self.coordinator_uuid)
            .unwrap_or(0);
        self.members[coordinator_index].is_coordinator = true;
        let coordinator = self.members[coordinator_index].clone();

        Some(Group {
            id: self.id,
            name: group_name(&coordinator, &self.members),
            coordinator,
            members: self.members,
        })
    }
}

/// Parses `ZoneGroupState` XML, with or without the `<ZoneGroups>` wrapper.
///
/// Escaped payloads are decoded first. Members without a UUID are skipped.
///
/// # Errors
/// Returns `SoapError::Parse` on malformed XML.
pub fn parse_zone_group_state(payload: &str) -> SoapResult<Topology> {
    parse_embedded(payload, parse_zone_group_document)
}

fn parse_zone_group_document(xml: &str) -> SoapResult<Topology> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();
    let mut groups = Vec::new();
    let mut current: Option<GroupBuilder> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => match e.local_name().as_ref() {
                b"ZoneGroup" => {
                    current = Some(GroupBuilder {
                        id: get_xml_attr(e, b"ID").unwrap_or_default(),
                        coordinator_uuid: get_xml_attr(e, b"Coordinator").unwrap_or_default(),
                        members: Vec::new(),
                    });
                }
                b"ZoneGroupMember" => {
                    if let (Some(group), Some(member)) = (current.as_mut(), parse_member(e, true)) {
                        group.members.push(member);
                    }
                }
                b"Satellite" => {
                    if let (Some(group), Some(member)) = (current.as_mut(), parse_member(e, false)) {
                        group.members.push(member);
                    }
                }
                _ => {}
            },
            Ok(Event::End(ref e)) if e.local_name().as_ref() == b"ZoneGroup" => {
                if let Some(group) = current.take().and_then(GroupBuilder::finish) {
                    groups.push(group);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(SoapError::Parse(format!("malformed ZoneGroupState: {}", e)));
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(Topology::from_groups(groups))
}

// ─────────────────────────────────────────────────────────────────────────────
// Queries
// ─────────────────────────────────────────────────────────────────────────────

impl Topology {
    /// Builds a topology and its indexes from parsed groups.
    ///
    /// When several members share a name, a visible one wins the name index.
    #[must_use]
    pub fn from_groups(groups: Vec<Group>) -> Self {
        let mut by_name: HashMap<String, (usize, usize)> = HashMap::new();
        let mut by_ip = HashMap::new();

        for (gi, group) in groups.iter().enumerate() {
            for (mi, member) in group.members.iter().enumerate() {
                if !member.ip.is_empty() {
                    by_ip.entry(member.ip.clone()).or_insert((gi, mi));
                }
                if member.name.is_empty() {
                    continue;
                }
                match by_name.get(&member.name) {
                    Some(&(g, m)) if groups[g].members[m].is_visible || !member.is_visible => {}
                    _ => {
                        by_name.insert(member.name.clone(), (gi, mi));
                    }
                }
            }
        }

        Self {
            groups,
            by_name,
            by_ip,
        }
    }

    /// Groups in document order.
    #[must_use]
    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    /// Returns true if no group was parsed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// All members of all groups.
    pub fn members(&self) -> impl Iterator<Item = &Member> {
        self.groups.iter().flat_map(|g| g.members.iter())
    }

    /// Members that are separately controllable rooms.
    pub fn visible_members(&self) -> impl Iterator<Item = &Member> {
        self.members().filter(|m| m.is_visible)
    }

    fn at(&self, (g, m): (usize, usize)) -> &Member {
        &self.groups[g].members[m]
    }

    /// Finds a member by exact room name.
    #[must_use]
    pub fn find_by_name(&self, name: &str) -> Option<&Member> {
        self.by_name.get(name).map(|&idx| self.at(idx))
    }

    /// Finds a member by ip.
    #[must_use]
    pub fn find_by_ip(&self, ip: &str) -> Option<&Member> {
        self.by_ip.get(ip).map(|&idx| self.at(idx))
    }

    /// Finds a member by uuid.
    #[must_use]
    pub fn find_by_uuid(&self, uuid: &str) -> Option<&Member> {
        self.members().find(|m| m.uuid == uuid)
    }

    /// Returns the group containing the member at `ip`.
    #[must_use]
    pub fn group_for_ip(&self, ip: &str) -> Option<&Group> {
        self.by_ip.get(ip).map(|&(g, _)| &self.groups[g])
    }

    /// Returns the group containing the named room, falling back to a
    /// case-insensitive match.
    #[must_use]
    pub fn group_for_name(&self, name: &str) -> Option<&Group> {
        if let Some(&(g, _)) = self.by_name.get(name) {
            return Some(&self.groups[g]);
        }
        self.by_name
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(name))
            .min_by(|a, b| a.0.cmp(b.0))
            .map(|(_, &(g, _))| &self.groups[g])
    }

    /// Ip of the coordinator of the group containing `ip`.
    #[must_use]
    pub fn coordinator_ip_for(&self, ip: &str) -> Option<&str> {
        self.group_for_ip(ip).map(|g| g.coordinator.ip.as_str())
    }

    /// Ip of the coordinator of the group containing the named room.
    #[must_use]
    pub fn coordinator_ip_for_name(&self, name: &str) -> Option<&str> {
        self.group_for_name(name).map(|g| g.coordinator.ip.as_str())
    }

    /// Uuid of the coordinator of the group containing `ip`.
    #[must_use]
    pub fn coordinator_uuid_for_ip(&self, ip: &str) -> Option<&str> {
        self.group_for_ip(ip).map(|g| g.coordinator.uuid.as_str())
    }

    /// Uuid of the coordinator of the group containing the named room.
    #[must_use]
    pub fn coordinator_uuid_for_name(&self, name: &str) -> Option<&str> {
        self.group_for_name(name).map(|g| g.coordinator.uuid.as_str())
    }

    /// Resolves a user-supplied room name.
    ///
    /// Tries an exact match, then a case-insensitive match, then a unique
    /// case-insensitive substring.
    ///
    /// # Errors
    /// `Empty` for an empty topology, `NotFound` when nothing matches and
    /// `Ambiguous` (with sorted candidates) when several rooms contain the query.
    pub fn resolve_name(&self, query: &str) -> Result<&Member, TopologyError> {
        if self.is_empty() {
            return Err(TopologyError::Empty);
        }
        if let Some(member) = self.find_by_name(query) {
            return Ok(member);
        }

        let lowered = query.to_lowercase();
        let mut names: Vec<&String> = self.by_name.keys().collect();
        names.sort();

        if let Some(name) = names.iter().find(|n| n.to_lowercase() == lowered) {
            return self
                .find_by_name(name)
                .ok_or_else(|| TopologyError::NotFound(query.to_string()));
        }

        let candidates: Vec<&String> = names
            .into_iter()
            .filter(|n| n.to_lowercase().contains(&lowered))
            .collect();

        match candidates.as_slice() {
            [] => Err(TopologyError::NotFound(query.to_string())),
            [only] => self
                .find_by_name(only)
                .ok_or_else(|| TopologyError::NotFound(query.to_string())),
            many => Err(TopologyError::Ambiguous {
                query: query.to_string(),
                candidates: many.iter().map(|s| s.to_string()).collect(),
            }),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Retrieval
// ─────────────────────────────────────────────────────────────────────────────

/// Fetches the raw `ZoneGroupState` payload from any speaker.
pub async fn get_zone_group_state(
    http: &dyn HttpTransport,
    addr: SocketAddrV4,
    deadline: Option<Instant>,
) -> SoapResult<String> {
    let response = SoapRequestBuilder::new(http, addr)
        .service(SonosService::ZoneGroupTopology)
        .action("GetZoneGroupState")
        .deadline(deadline)
        .send()
        .await?;
    Ok(response.require("ZoneGroupState")?.to_string())
}

/// Fetches and parses the topology from any speaker.
pub async fn fetch_topology(
    http: &dyn HttpTransport,
    addr: SocketAddrV4,
    deadline: Option<Instant>,
) -> SoapResult<Topology> {
    let state = get_zone_group_state(http, addr, deadline).await?;
    parse_zone_group_state(&state)
}
