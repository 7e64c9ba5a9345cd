//! Resolution of object and tag references against the scene.
//!
//! Every lookup that can fail produces a [`ConfigurationError`] naming the
//! entity that made the reference.

use crate::core::entity::{BehaviorKind, ConditionKind, EntityKind};
use crate::core::ids::{ObjectId, TagId};
use crate::core::scene::{Capability, ObjectHandle, SceneProvider, Target};
use crate::core::tags::TagRegistry;
use crate::core::tree::ProcessTree;
use crate::error::{ConfigurationError, EntityLabel};

/// Objects a condition watches: the candidates and, for snap conditions, the zone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConditionObjects {
    pub candidates: Vec<ObjectHandle>,
    pub zone: Option<ObjectHandle>,
}

pub fn resolve_object<S: SceneProvider + ?Sized>(
    scene: &S,
    entity: &EntityLabel,
    id: ObjectId,
    capability: Option<Capability>,
) -> Result<ObjectHandle, ConfigurationError> {
    let handle = scene
        .resolve_by_id(id)
        .ok_or_else(|| ConfigurationError::MissingObject {
            entity: entity.clone(),
            object: id,
        })?;
    if let Some(capability) = capability {
        if !scene.has_capability(handle, capability) {
            return Err(ConfigurationError::MissingCapability {
                entity: entity.clone(),
                object: scene.object_name(handle),
                capability,
            });
        }
    }
    Ok(handle)
}

/// Objects carrying `tag` that expose `capability`, in registration order.
pub fn resolve_tag<S: SceneProvider + ?Sized>(
    scene: &S,
    tags: &TagRegistry,
    entity: &EntityLabel,
    tag: TagId,
    capability: Option<Capability>,
) -> Result<Vec<ObjectHandle>, ConfigurationError> {
    let Some(label) = tags.label(tag) else {
        return Err(ConfigurationError::UnknownTag {
            entity: entity.clone(),
            tag,
        });
    };
    let tagged = scene.resolve_by_tag(tag);
    let Some(first) = tagged.first().copied() else {
        return Err(ConfigurationError::EmptyTag {
            entity: entity.clone(),
            label: label.to_string(),
        });
    };
    let Some(capability) = capability else {
        return Ok(tagged);
    };
    let capable: Vec<ObjectHandle> = tagged
        .into_iter()
        .filter(|h| scene.has_capability(*h, capability))
        .collect();
    if capable.is_empty() {
        return Err(ConfigurationError::MissingCapability {
            entity: entity.clone(),
            object: scene.object_name(first),
            capability,
        });
    }
    Ok(capable)
}

pub fn resolve_target<S: SceneProvider + ?Sized>(
    scene: &S,
    tags: &TagRegistry,
    entity: &EntityLabel,
    target: Target,
    capability: Option<Capability>,
) -> Result<Vec<ObjectHandle>, ConfigurationError> {
    match target {
        Target::Object(id) => resolve_object(scene, entity, id, capability).map(|h| vec![h]),
        Target::Tag(tag) => resolve_tag(scene, tags, entity, tag, capability),
    }
}

/// Handles a behavior acts on.
pub fn resolve_behavior<S: SceneProvider + ?Sized>(
    scene: &S,
    tags: &TagRegistry,
    entity: &EntityLabel,
    kind: &BehaviorKind,
) -> Result<Vec<ObjectHandle>, ConfigurationError> {
    match kind {
        BehaviorKind::SetObjectEnabled { target, .. } => {
            resolve_target(scene, tags, entity, *target, Some(Capability::Enableable))
        }
        BehaviorKind::SetComponentEnabled {
            target, component, ..
        } => {
            let handle = resolve_object(scene, entity, *target, None)?;
            if !scene.has_component(handle, component) {
                return Err(ConfigurationError::MissingComponent {
                    entity: entity.clone(),
                    object: scene.object_name(handle),
                    component: component.clone(),
                });
            }
            Ok(vec![handle])
        }
        BehaviorKind::Delay { .. } | BehaviorKind::Group { .. } => Ok(Vec::new()),
    }
}

pub fn resolve_condition<S: SceneProvider + ?Sized>(
    scene: &S,
    tags: &TagRegistry,
    entity: &EntityLabel,
    kind: &ConditionKind,
) -> Result<ConditionObjects, ConfigurationError> {
    let objects = match kind {
        ConditionKind::Grabbed { target } => ConditionObjects {
            candidates: vec![resolve_object(
                scene,
                entity,
                *target,
                Some(Capability::Grabbable),
            )?],
            zone: None,
        },
        ConditionKind::Touched { target } => ConditionObjects {
            candidates: vec![resolve_object(
                scene,
                entity,
                *target,
                Some(Capability::Touchable),
            )?],
            zone: None,
        },
        ConditionKind::Snapped { target, zone } => ConditionObjects {
            candidates: vec![resolve_object(
                scene,
                entity,
                *target,
                Some(Capability::Snappable),
            )?],
            zone: Some(resolve_object(scene, entity, *zone, Some(Capability::SnapZone))?),
        },
        ConditionKind::SnappedWithTag { tag, zone } => ConditionObjects {
            candidates: resolve_tag(scene, tags, entity, *tag, Some(Capability::Snappable))?,
            zone: Some(resolve_object(scene, entity, *zone, Some(Capability::SnapZone))?),
        },
        ConditionKind::Timeout { .. } => ConditionObjects::default(),
    };
    Ok(objects)
}

/// Resolve every reference in the tree. Used as a pre-flight check before a
/// process starts; the engine repeats the lookups on activation.
pub fn check_references<S: SceneProvider + ?Sized>(
    tree: &ProcessTree,
    scene: &S,
    tags: &TagRegistry,
) -> Vec<ConfigurationError> {
    let mut errors = Vec::new();
    for id in tree.ids() {
        let Ok(entity) = tree.get(id) else { continue };
        let result = match entity.kind() {
            EntityKind::Behavior { data, .. } => {
                resolve_behavior(scene, tags, &entity.label(), data).map(|_| ())
            }
            EntityKind::Condition { data, .. } => {
                resolve_condition(scene, tags, &entity.label(), data).map(|_| ())
            }
            _ => Ok(()),
        };
        if let Err(error) = result {
            errors.push(error);
        }
    }
    errors
}
