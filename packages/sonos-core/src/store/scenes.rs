//! Named snapshots of grouping and per-room volume.
//!
//! A scene records which rooms play together and each room's volume and
//! mute. Applying it ungroups the rooms involved, rebuilds the groups, then
//! restores audio levels. Rooms that are not visible when the scene is
//! applied are skipped and reported.

use std::collections::{BTreeMap, HashMap};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::{JsonFile, StoreError, StoreResult};
use crate::error::{SonosError, SonosResult};
use crate::sonos::speaker::Speaker;
use crate::sonos::topology::Member;

/// One group in a scene.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneGroup {
    pub coordinator_uuid: String,
    /// Visible members including the coordinator.
    pub member_uuids: Vec<String>,
}

/// Audio levels of one room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneDevice {
    pub uuid: String,
    pub name: String,
    pub volume: u8,
    pub mute: bool,
}

/// A captured household state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scene {
    pub name: String,
    pub groups: Vec<SceneGroup>,
    pub devices: Vec<SceneDevice>,
}

/// Outcome of [`apply_scene`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneReport {
    /// Scene UUIDs with no visible speaker, sorted.
    pub skipped: Vec<String>,
}

/// Named scene storage.
pub trait SceneStore: Send + Sync {
    /// Scene names, sorted.
    fn list(&self) -> StoreResult<Vec<String>>;
    fn get(&self, name: &str) -> StoreResult<Option<Scene>>;
    /// Saves under `scene.name`, replacing any scene of that name.
    fn save(&self, scene: &Scene) -> StoreResult<()>;
    /// Returns false if no such scene existed.
    fn delete(&self, name: &str) -> StoreResult<bool>;
}

/// [`SceneStore`] keeping all scenes in one JSON file.
#[derive(Debug)]
pub struct FileSceneStore {
    file: JsonFile,
}

impl FileSceneStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            file: JsonFile::new(path),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    fn all(&self) -> StoreResult<BTreeMap<String, Scene>> {
        Ok(self.file.read()?.unwrap_or_default())
    }
}

fn check_name(name: &str) -> StoreResult<()> {
    if name.trim().is_empty() {
        return Err(StoreError::InvalidName(name.to_string()));
    }
    Ok(())
}

impl SceneStore for FileSceneStore {
    fn list(&self) -> StoreResult<Vec<String>> {
        Ok(self.all()?.into_keys().collect())
    }

    fn get(&self, name: &str) -> StoreResult<Option<Scene>> {
        Ok(self.all()?.remove(name))
    }

    fn save(&self, scene: &Scene) -> StoreResult<()> {
        check_name(&scene.name)?;
        self.file.update(|all: &mut BTreeMap<String, Scene>| {
            all.insert(scene.name.clone(), scene.clone());
            true
        })
    }

    fn delete(&self, name: &str) -> StoreResult<bool> {
        let mut removed = false;
        self.file.update(|all: &mut BTreeMap<String, Scene>| {
            removed = all.remove(name).is_some();
            removed
        })?;
        Ok(removed)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Capture & Apply
// ─────────────────────────────────────────────────────────────────────────────

fn member_speaker(anchor: &Speaker, member: &Member) -> SonosResult<Speaker> {
    let ip: Ipv4Addr = member
        .ip
        .parse()
        .map_err(|_| {
            SonosError::InvalidArgument(format!("bad ip for {}: {:?}", member.name, member.ip))
        })?;
    Ok(anchor.at(ip))
}

/// Captures grouping and levels of every visible room.
pub async fn capture_scene(anchor: &Speaker, name: &str) -> SonosResult<Scene> {
    check_name(name)?;
    let topology = anchor.topology().await?;

    let groups = topology
        .groups()
        .iter()
        .map(|g| SceneGroup {
            coordinator_uuid: g.coordinator.uuid.clone(),
            member_uuids: g.visible_members().map(|m| m.uuid.clone()).collect(),
        })
        .filter(|g| !g.member_uuids.is_empty())
        .collect();

    let mut devices = Vec::new();
    for member in topology.visible_members() {
        let speaker = member_speaker(anchor, member)?;
        devices.push(SceneDevice {
            uuid: member.uuid.clone(),
            name: member.name.clone(),
            volume: speaker.volume().await?,
            mute: speaker.mute().await?,
        });
    }

    log::info!(
        "[Scene] Captured {:?}: {} groups, {} rooms",
        name,
        topology.groups().len(),
        devices.len()
    );
    Ok(Scene {
        name: name.to_string(),
        groups,
        devices,
    })
}

/// Applies `scene` to the household `anchor` belongs to.
pub async fn apply_scene(anchor: &Speaker, scene: &Scene) -> SonosResult<SceneReport> {
    let topology = anchor.topology().await?;
    let visible: HashMap<&str, &Member> = topology
        .visible_members()
        .map(|m| (m.uuid.as_str(), m))
        .collect();

    let mut involved: Vec<&str> = Vec::new();
    let scene_uuids = scene
        .groups
        .iter()
        .flat_map(|g| {
            std::iter::once(g.coordinator_uuid.as_str())
                .chain(g.member_uuids.iter().map(String::as_str))
        })
        .chain(scene.devices.iter().map(|d| d.uuid.as_str()));
    for uuid in scene_uuids {
        if !involved.contains(&uuid) {
            involved.push(uuid);
        }
    }

    let mut skipped: Vec<String> = involved
        .iter()
        .filter(|u| !visible.contains_key(*u))
        .map(|u| u.to_string())
        .collect();
    skipped.sort();
    for uuid in &skipped {
        log::warn!("[Scene] {} is not visible, skipping", uuid);
    }

    // Phase 1: make every involved room standalone.
    for uuid in &involved {
        let Some(member) = visible.get(uuid) else {
            continue;
        };
        let alone = topology
            .group_for_ip(&member.ip)
            .map_or(true, |g| g.visible_members().count() <= 1);
        if !alone {
            member_speaker(anchor, member)?.leave().await?;
        }
    }

    // Phase 2: rebuild groups around their coordinators.
    for group in &scene.groups {
        if !visible.contains_key(group.coordinator_uuid.as_str()) {
            continue;
        }
        for uuid in &group.member_uuids {
            if *uuid == group.coordinator_uuid {
                continue;
            }
            if let Some(member) = visible.get(uuid.as_str()) {
                member_speaker(anchor, member)?
                    .join(&group.coordinator_uuid)
                    .await?;
            }
        }
    }

    // Phase 3: restore mute, then volume.
    for device in &scene.devices {
        if let Some(member) = visible.get(device.uuid.as_str()) {
            let speaker = member_speaker(anchor, member)?;
            speaker.set_mute(device.mute).await?;
            speaker.set_volume(i32::from(device.volume)).await?;
        }
    }

    log::info!("[Scene] Applied {:?} ({} skipped)", scene.name, skipped.len());
    Ok(SceneReport { skipped })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{soap_ok, FakeTransport, ZONE_GROUP_STATE};
    use std::sync::Arc;

    fn fake_household() -> Arc<FakeTransport> {
        let fake = Arc::new(FakeTransport::new());
        fake.respond_to(
            "GetZoneGroupState",
            soap_ok("GetZoneGroupState", &[("ZoneGroupState", ZONE_GROUP_STATE)]),
        );
        for action in ["BecomeCoordinatorOfStandaloneGroup", "SetAVTransportURI", "SetMute", "SetVolume"] {
            fake.respond_to(action, soap_ok(action, &[]));
        }
        fake.respond_to("GetVolume", soap_ok("GetVolume", &[("CurrentVolume", "25")]));
        fake.respond_to("GetMute", soap_ok("GetMute", &[("CurrentMute", "1")]));
        fake
    }

    fn anchor(fake: &Arc<FakeTransport>) -> Speaker {
        Speaker::new(Ipv4Addr::new(10, 0, 0, 1), fake.clone())
    }

    fn device(uuid: &str, volume: u8, mute: bool) -> SceneDevice {
        SceneDevice {
            uuid: uuid.into(),
            name: uuid.into(),
            volume,
            mute,
        }
    }

    #[tokio::test]
    async fn capture_records_visible_rooms() {
        let fake = fake_household();
        let scene = capture_scene(&anchor(&fake), "evening").await.unwrap();

        assert_eq!(scene.groups.len(), 2);
        assert_eq!(scene.groups[0].member_uuids, vec!["RINCON_LR", "RINCON_OF"]);
        assert_eq!(scene.groups[1].member_uuids, vec!["RINCON_KI"]);
        assert_eq!(scene.devices.len(), 3);
        assert!(scene.devices.iter().all(|d| d.volume == 25 && d.mute));
        assert!(!scene.devices.iter().any(|d| d.uuid == "RINCON_SUB"));
    }

    #[tokio::test]
    async fn apply_runs_three_phases() {
        let fake = fake_household();
        let scene = Scene {
            name: "kitchen party".into(),
            groups: vec![
                SceneGroup {
                    coordinator_uuid: "RINCON_KI".into(),
                    member_uuids: vec!["RINCON_KI".into(), "RINCON_OF".into(), "RINCON_GONE".into()],
                },
                SceneGroup {
                    coordinator_uuid: "RINCON_LR".into(),
                    member_uuids: vec!["RINCON_LR".into()],
                },
            ],
            devices: vec![device("RINCON_KI", 20, false), device("RINCON_OF", 30, true)],
        };

        let report = apply_scene(&anchor(&fake), &scene).await.unwrap();
        assert_eq!(report.skipped, vec!["RINCON_GONE"]);

        assert_eq!(
            fake.keys(),
            vec![
                "GetZoneGroupState",
                "BecomeCoordinatorOfStandaloneGroup",
                "BecomeCoordinatorOfStandaloneGroup",
                "SetAVTransportURI",
                "SetMute",
                "SetVolume",
                "SetMute",
                "SetVolume",
            ]
        );

        let join = &fake.requests_for("SetAVTransportURI")[0];
        assert!(join.url.starts_with("http://10.0.0.2:1400/"));
        assert!(join.body_text().contains("x-rincon:RINCON_KI"));

        let volumes = fake.requests_for("SetVolume");
        assert!(volumes[0].url.starts_with("http://10.0.0.3:1400/"));
        assert!(volumes[0].body_text().contains("<DesiredVolume>20</DesiredVolume>"));
        assert!(volumes[1].body_text().contains("<DesiredVolume>30</DesiredVolume>"));
    }

    #[test]
    fn file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSceneStore::new(dir.path().join("scenes.json"));
        let scene = Scene {
            name: "morning".into(),
            groups: vec![],
            devices: vec![device("RINCON_KI", 10, false)],
        };
        store.save(&scene).unwrap();
        store
            .save(&Scene {
                name: "evening".into(),
                ..scene.clone()
            })
            .unwrap();

        assert_eq!(store.list().unwrap(), vec!["evening", "morning"]);
        assert_eq!(store.get("morning").unwrap(), Some(scene));
        assert!(store.delete("morning").unwrap());
        assert!(!store.delete("morning").unwrap());
        assert_eq!(store.list().unwrap(), vec!["evening"]);
    }

    #[test]
    fn empty_names_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSceneStore::new(dir.path().join("scenes.json"));
        let err = store
            .save(&Scene {
                name: " ".into(),
                groups: vec![],
                devices: vec![],
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidName(_)));
    }
}
