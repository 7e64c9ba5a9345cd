//! Process documents on disk: JSON validated against the embedded schema,
//! converted into a [`ProcessTree`] and checked against structural invariants.
//!
//! Steps are referenced by string keys in documents and by arena ids in the
//! tree. Exported documents use each step's uid as its key.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use jsonschema::Draft;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::core::entity::{BehaviorKind, ConditionKind, StepData};
use crate::core::ids::EntityId;
use crate::core::invariants::validate_invariants;
use crate::core::tree::ProcessTree;

const PROCESS_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../schemas/process/v1.schema.json"
));

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessDoc {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<Uuid>,
    pub chapters: Vec<ChapterDoc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterDoc {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_step: Option<String>,
    pub steps: Vec<StepDoc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDoc {
    pub key: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<Uuid>,
    #[serde(flatten)]
    pub data: StepData,
    #[serde(default)]
    pub behaviors: Vec<BehaviorDoc>,
    #[serde(default)]
    pub transitions: Vec<TransitionDoc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionDoc {
    /// Key of the target step; absent ends the chapter.
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<Uuid>,
    #[serde(default)]
    pub conditions: Vec<ConditionDoc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehaviorDoc {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<Uuid>,
    #[serde(flatten)]
    pub data: BehaviorKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<BehaviorDoc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionDoc {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<Uuid>,
    #[serde(flatten)]
    pub data: ConditionKind,
}

impl ProcessDoc {
    /// Build the arena. Step keys must be unique across the document.
    pub fn into_tree(self) -> Result<ProcessTree> {
        let mut tree = ProcessTree::new(&self.name);
        if let Some(uid) = self.uid {
            tree.set_uid(tree.root(), uid)?;
        }

        let mut keys: HashMap<String, EntityId> = HashMap::new();
        let mut chapters = Vec::new();
        for chapter_doc in &self.chapters {
            let chapter = tree.add_chapter(&chapter_doc.name);
            if let Some(uid) = chapter_doc.uid {
                tree.set_uid(chapter, uid)?;
            }
            for step_doc in &chapter_doc.steps {
                let step = tree.add_step(chapter, &step_doc.name)?;
                if let Some(uid) = step_doc.uid {
                    tree.set_uid(step, uid)?;
                }
                if keys.insert(step_doc.key.clone(), step).is_some() {
                    return Err(anyhow!("duplicate step key '{}'", step_doc.key));
                }
                let data = tree.step_data_mut(step)?;
                *data = step_doc.data.clone();
                data.clean();
                for behavior in &step_doc.behaviors {
                    add_behavior(&mut tree, step, behavior)?;
                }
            }
            chapters.push(chapter);
        }

        let lookup = |key: &str| {
            keys.get(key)
                .copied()
                .ok_or_else(|| anyhow!("unknown step key '{key}'"))
        };
        for (chapter_doc, chapter) in self.chapters.iter().zip(chapters) {
            if let Some(first) = &chapter_doc.first_step {
                tree.set_first_step(chapter, lookup(first)?)?;
            }
            for step_doc in &chapter_doc.steps {
                let step = lookup(&step_doc.key)?;
                for transition_doc in &step_doc.transitions {
                    let target = transition_doc.target.as_deref().map(lookup).transpose()?;
                    let transition = tree.add_transition(step, target)?;
                    if let Some(uid) = transition_doc.uid {
                        tree.set_uid(transition, uid)?;
                    }
                    for condition in &transition_doc.conditions {
                        let id =
                            tree.add_condition(transition, &condition.name, condition.data.clone())?;
                        if let Some(uid) = condition.uid {
                            tree.set_uid(id, uid)?;
                        }
                    }
                }
            }
        }
        Ok(tree)
    }

    /// Flat document form of `tree`.
    pub fn from_tree(tree: &ProcessTree) -> Self {
        let key = |step: EntityId| tree.label(step).uid.to_string();
        let root = tree.label(tree.root());
        let chapters = tree
            .chapters()
            .into_iter()
            .map(|chapter| {
                let label = tree.label(chapter);
                let explicit_first = tree.steps(chapter).first().copied() != tree.first_step(chapter);
                ChapterDoc {
                    name: label.name,
                    uid: Some(label.uid),
                    first_step: tree
                        .first_step(chapter)
                        .filter(|_| explicit_first)
                        .map(key),
                    steps: tree
                        .steps(chapter)
                        .into_iter()
                        .map(|step| step_doc(tree, step, &key))
                        .collect(),
                }
            })
            .collect();
        Self {
            name: root.name,
            uid: Some(root.uid),
            chapters,
        }
    }
}

fn add_behavior(tree: &mut ProcessTree, owner: EntityId, doc: &BehaviorDoc) -> Result<()> {
    let id = tree.add_behavior(owner, &doc.name, doc.data.clone())?;
    if let Some(uid) = doc.uid {
        tree.set_uid(id, uid)?;
    }
    if !doc.children.is_empty() && !doc.data.is_group() {
        return Err(anyhow!("behavior '{}' has children but is not a group", doc.name));
    }
    for child in &doc.children {
        add_behavior(tree, id, child)?;
    }
    Ok(())
}

fn step_doc(tree: &ProcessTree, step: EntityId, key: &dyn Fn(EntityId) -> String) -> StepDoc {
    let label = tree.label(step);
    StepDoc {
        key: key(step),
        name: label.name,
        uid: Some(label.uid),
        data: tree.step_data(step).cloned().unwrap_or_default(),
        behaviors: tree
            .behaviors(step)
            .into_iter()
            .filter_map(|b| behavior_doc(tree, b))
            .collect(),
        transitions: tree
            .transitions(step)
            .into_iter()
            .map(|transition| TransitionDoc {
                target: tree.transition_target(transition).map(key),
                uid: Some(tree.label(transition).uid),
                conditions: tree
                    .conditions(transition)
                    .into_iter()
                    .filter_map(|c| {
                        let label = tree.label(c);
                        tree.condition_data(c).map(|data| ConditionDoc {
                            name: label.name,
                            uid: Some(label.uid),
                            data: data.clone(),
                        })
                    })
                    .collect(),
            })
            .collect(),
    }
}

fn behavior_doc(tree: &ProcessTree, behavior: EntityId) -> Option<BehaviorDoc> {
    let data = tree.behavior_data(behavior)?.clone();
    let label = tree.label(behavior);
    Some(BehaviorDoc {
        name: label.name,
        uid: Some(label.uid),
        data,
        children: tree
            .children(behavior)
            .into_iter()
            .filter_map(|c| behavior_doc(tree, c))
            .collect(),
    })
}

/// Parse and validate a process document (schema, structure, invariants).
pub fn parse_process(contents: &str) -> Result<ProcessTree> {
    let value: Value = serde_json::from_str(contents).context("parse process json")?;
    validate_schema(&value)?;
    let doc: ProcessDoc = serde_json::from_value(value).context("deserialize process")?;
    let tree = doc.into_tree()?;
    validate_tree_invariants(&tree)?;
    Ok(tree)
}

/// Load and validate a process from disk.
pub fn load_process(path: &Path) -> Result<ProcessTree> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read process {}", path.display()))?;
    parse_process(&contents).with_context(|| format!("load process {}", path.display()))
}

/// Write `tree` as a process document.
pub fn write_process(path: &Path, tree: &ProcessTree) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(&ProcessDoc::from_tree(tree))?;
    buf.push('\n');
    fs::write(path, buf).with_context(|| format!("write process {}", path.display()))
}

fn validate_schema(process: &Value) -> Result<()> {
    let schema: Value = serde_json::from_str(PROCESS_SCHEMA).context("parse process schema")?;
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .map_err(|err| anyhow!("invalid schema: {}", err))?;
    if !compiled.is_valid(process) {
        let messages = compiled
            .iter_errors(process)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(anyhow!(
            "process schema validation failed: {}",
            messages.join("; ")
        ));
    }
    Ok(())
}

fn validate_tree_invariants(tree: &ProcessTree) -> Result<()> {
    let errors = validate_invariants(tree);
    if errors.is_empty() {
        return Ok(());
    }
    Err(anyhow!("process invariants failed: {}", errors.join("; ")))
}
