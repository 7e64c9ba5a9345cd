//! In-memory scene used by the CLI and by tests.
//!
//! Objects keep their registration order so tag lookups are deterministic.
//! A scene document is plain JSON listing tags and objects.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::ids::{ObjectId, TagId};
use crate::core::scene::{Capability, LockSink, ObjectHandle, SceneProvider};
use crate::core::tags::{Tag, TagRegistry};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneObject {
    pub id: ObjectId,
    pub name: String,
    pub tags: Vec<TagId>,
    pub capabilities: Vec<Capability>,
    pub enabled: bool,
    /// Named components and whether each is enabled.
    pub components: BTreeMap<String, bool>,
    pub grabbed: bool,
    pub touched: bool,
    pub snapped_into: Option<ObjectId>,
    pub locked: bool,
    #[serde(skip)]
    pub grab_count: u32,
}

impl Default for SceneObject {
    fn default() -> Self {
        Self {
            id: ObjectId::default(),
            name: String::new(),
            tags: Vec::new(),
            capabilities: Vec::new(),
            enabled: true,
            components: BTreeMap::new(),
            grabbed: false,
            touched: false,
            snapped_into: None,
            locked: false,
            grab_count: 0,
        }
    }
}

impl SceneObject {
    pub fn new(name: &str, capabilities: &[Capability]) -> Self {
        Self {
            id: ObjectId::new(),
            name: name.to_string(),
            capabilities: capabilities.to_vec(),
            ..Self::default()
        }
    }

    pub fn with_tag(mut self, tag: TagId) -> Self {
        self.tags.push(tag);
        self
    }

    pub fn with_component(mut self, component: &str, enabled: bool) -> Self {
        self.components.insert(component.to_string(), enabled);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulatedScene {
    objects: Vec<SceneObject>,
    lock_events: Vec<(ObjectId, bool)>,
}

impl SimulatedScene {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an object. Returns its id.
    pub fn add(&mut self, object: SceneObject) -> ObjectId {
        let id = object.id;
        self.objects.push(object);
        id
    }

    pub fn object(&self, id: ObjectId) -> Option<&SceneObject> {
        self.objects.iter().find(|o| o.id == id)
    }

    pub fn object_mut(&mut self, id: ObjectId) -> Option<&mut SceneObject> {
        self.objects.iter_mut().find(|o| o.id == id)
    }

    pub fn objects(&self) -> &[SceneObject] {
        &self.objects
    }

    pub fn is_locked(&self, id: ObjectId) -> bool {
        self.object(id).is_some_and(|o| o.locked)
    }

    /// Every lock notification received, in order.
    pub fn lock_events(&self) -> &[(ObjectId, bool)] {
        &self.lock_events
    }

    pub fn grab(&mut self, id: ObjectId) {
        if let Some(object) = self.object_mut(id) {
            object.grabbed = true;
            object.grab_count += 1;
        }
    }

    pub fn release(&mut self, id: ObjectId) {
        if let Some(object) = self.object_mut(id) {
            object.grabbed = false;
        }
    }

    pub fn touch(&mut self, id: ObjectId) {
        if let Some(object) = self.object_mut(id) {
            object.touched = true;
        }
    }

    pub fn snap(&mut self, id: ObjectId, zone: ObjectId) {
        if let Some(object) = self.object_mut(id) {
            object.snapped_into = Some(zone);
        }
    }

    pub fn unsnap(&mut self, id: ObjectId) {
        if let Some(object) = self.object_mut(id) {
            object.snapped_into = None;
        }
    }

    pub fn grab_count(&self, id: ObjectId) -> u32 {
        self.object(id).map_or(0, |o| o.grab_count)
    }
}

impl SceneProvider for SimulatedScene {
    fn resolve_by_id(&self, id: ObjectId) -> Option<ObjectHandle> {
        self.object(id).map(|o| ObjectHandle(o.id))
    }

    fn resolve_by_tag(&self, tag: TagId) -> Vec<ObjectHandle> {
        self.objects
            .iter()
            .filter(|o| o.tags.contains(&tag))
            .map(|o| ObjectHandle(o.id))
            .collect()
    }

    fn has_capability(&self, object: ObjectHandle, capability: Capability) -> bool {
        self.object(object.0)
            .is_some_and(|o| o.capabilities.contains(&capability))
    }

    fn has_component(&self, object: ObjectHandle, component: &str) -> bool {
        self.object(object.0)
            .is_some_and(|o| o.components.contains_key(component))
    }

    fn object_name(&self, object: ObjectHandle) -> String {
        self.object(object.0)
            .map_or_else(|| object.0.to_string(), |o| o.name.clone())
    }

    fn set_enabled(&mut self, object: ObjectHandle, enabled: bool) {
        if let Some(object) = self.object_mut(object.0) {
            object.enabled = enabled;
        }
    }

    fn is_enabled(&self, object: ObjectHandle) -> bool {
        self.object(object.0).is_some_and(|o| o.enabled)
    }

    fn set_component_enabled(&mut self, object: ObjectHandle, component: &str, enabled: bool) {
        if let Some(object) = self.object_mut(object.0) {
            object.components.insert(component.to_string(), enabled);
        }
    }

    fn is_grabbed(&self, object: ObjectHandle) -> bool {
        self.object(object.0).is_some_and(|o| o.grabbed)
    }

    fn fast_forward_grab(&mut self, object: ObjectHandle) {
        self.grab(object.0);
    }

    fn is_touched(&self, object: ObjectHandle) -> bool {
        self.object(object.0).is_some_and(|o| o.touched)
    }

    fn fast_forward_touch(&mut self, object: ObjectHandle) {
        self.touch(object.0);
    }

    fn snapped_zone(&self, object: ObjectHandle) -> Option<ObjectHandle> {
        self.object(object.0)?.snapped_into.map(ObjectHandle)
    }

    fn fast_forward_snap(&mut self, object: ObjectHandle, zone: ObjectHandle) {
        self.snap(object.0, zone.0);
    }
}

impl LockSink for SimulatedScene {
    fn on_lock_changed(&mut self, object: ObjectHandle, locked: bool) {
        if let Some(entry) = self.object_mut(object.0) {
            entry.locked = locked;
        }
        self.lock_events.push((object.0, locked));
    }
}

/// On-disk scene description.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneDoc {
    pub tags: Vec<Tag>,
    pub objects: Vec<SceneObject>,
}

impl SceneDoc {
    /// Build the scene and its tag registry. Tags are registered in document order.
    pub fn into_scene(self) -> Result<(SimulatedScene, TagRegistry)> {
        let mut tags = TagRegistry::new();
        for tag in &self.tags {
            if tags.create_tag(&tag.label, tag.id).is_none() {
                return Err(anyhow!(
                    "tag '{}' ({}) is empty or registered twice",
                    tag.label,
                    tag.id
                ));
            }
        }
        let mut scene = SimulatedScene::new();
        for object in self.objects {
            if object.id.is_empty() {
                return Err(anyhow!("scene object '{}' has no id", object.name));
            }
            if scene.object(object.id).is_some() {
                return Err(anyhow!("scene object id {} is used twice", object.id));
            }
            if let Some(tag) = object.tags.iter().find(|t| !tags.tag_exists(**t)) {
                return Err(anyhow!(
                    "scene object '{}' carries unregistered tag {}",
                    object.name,
                    tag
                ));
            }
            scene.add(object);
        }
        Ok((scene, tags))
    }
}

pub fn load_scene(path: &Path) -> Result<(SimulatedScene, TagRegistry)> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read scene {}", path.display()))?;
    let doc: SceneDoc = serde_json::from_str(&contents)
        .with_context(|| format!("parse scene {}", path.display()))?;
    doc.into_scene()
        .with_context(|| format!("load scene {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_lookup_follows_registration_order() {
        let tag = TagId::new();
        let mut scene = SimulatedScene::new();
        let b = scene.add(SceneObject::new("b", &[Capability::Snappable]).with_tag(tag));
        scene.add(SceneObject::new("untagged", &[]));
        let a = scene.add(SceneObject::new("a", &[Capability::Snappable]).with_tag(tag));

        assert_eq!(
            scene.resolve_by_tag(tag),
            vec![ObjectHandle(b), ObjectHandle(a)]
        );
    }

    #[test]
    fn scene_doc_rejects_unregistered_tags() {
        let json = format!(
            r#"{{"tags": [], "objects": [{{"id": "{}", "name": "x", "tags": ["{}"]}}]}}"#,
            ObjectId::new(),
            TagId::new()
        );
        let doc: SceneDoc = serde_json::from_str(&json).expect("parse");
        let err = doc.into_scene().expect_err("unregistered tag");
        assert!(err.to_string().contains("unregistered tag"));
    }

    #[test]
    fn load_scene_reads_objects_and_tags() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("scene.json");
        let tag = TagId::new();
        let lamp = ObjectId::new();
        let json = format!(
            r#"{{
  "tags": [{{"id": "{tag}", "label": "lights"}}],
  "objects": [{{"id": "{lamp}", "name": "lamp", "tags": ["{tag}"], "capabilities": ["enableable"], "enabled": false}}]
}}"#
        );
        fs::write(&path, json).expect("write");

        let (scene, tags) = load_scene(&path).expect("load");
        assert_eq!(tags.label(tag), Some("lights"));
        let object = scene.object(lamp).expect("lamp");
        assert!(!object.enabled);
        assert!(scene.has_capability(ObjectHandle(lamp), Capability::Enableable));
    }
}
