//! Process-wide registry of scene-object tags.
//!
//! GUIDs are unique; labels are unique and collisions are resolved by
//! appending `_1`, `_2`, ... to the requested label.

use serde::{Deserialize, Serialize};

use crate::core::ids::TagId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: TagId,
    pub label: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagRegistry {
    tags: Vec<Tag>,
}

impl TagRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tag. Returns `None` if the GUID is already registered or
    /// the label is empty.
    pub fn create_tag(&mut self, label: &str, id: TagId) -> Option<&Tag> {
        if id.is_empty() || self.tag_exists(id) {
            return None;
        }
        let label = self.unique_label(label)?;
        self.tags.push(Tag { id, label });
        self.tags.last()
    }

    /// True if a tag with exactly this label could be created without suffixing.
    pub fn can_create_tag(&self, label: &str) -> bool {
        !label.is_empty() && !self.tags.iter().any(|tag| tag.label == label)
    }

    pub fn rename_tag(&mut self, id: TagId, label: &str) -> bool {
        if !self.tag_exists(id) {
            return false;
        }
        let current = self.label(id).map(str::to_string);
        if current.as_deref() == Some(label) {
            return true;
        }
        let Some(label) = self.unique_label(label) else {
            return false;
        };
        if let Some(tag) = self.tags.iter_mut().find(|tag| tag.id == id) {
            tag.label = label;
        }
        true
    }

    /// Remove a tag. Callers that hold references to it must react, see
    /// [`crate::core::session::Session::remove_tag`].
    pub fn remove_tag(&mut self, id: TagId) -> bool {
        let before = self.tags.len();
        self.tags.retain(|tag| tag.id != id);
        self.tags.len() != before
    }

    pub fn tag_exists(&self, id: TagId) -> bool {
        self.tags.iter().any(|tag| tag.id == id)
    }

    pub fn get(&self, id: TagId) -> Option<&Tag> {
        self.tags.iter().find(|tag| tag.id == id)
    }

    pub fn label(&self, id: TagId) -> Option<&str> {
        self.get(id).map(|tag| tag.label.as_str())
    }

    pub fn find_by_label(&self, label: &str) -> Option<&Tag> {
        self.tags.iter().find(|tag| tag.label == label)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tag> {
        self.tags.iter()
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    fn unique_label(&self, label: &str) -> Option<String> {
        if label.is_empty() {
            return None;
        }
        let mut candidate = label.to_string();
        let mut counter = 0u32;
        while self.tags.iter().any(|tag| tag.label == candidate) {
            counter += 1;
            candidate = format!("{label}_{counter}");
        }
        Some(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_labels_are_suffixed() {
        let mut tags = TagRegistry::new();
        tags.create_tag("tool", TagId::new()).expect("first");
        let second = tags.create_tag("tool", TagId::new()).expect("second");
        assert_eq!(second.label, "tool_1");
        let third = tags.create_tag("tool", TagId::new()).expect("third");
        assert_eq!(third.label, "tool_2");
        assert!(!tags.can_create_tag("tool"));
        assert!(tags.can_create_tag("screw"));
    }

    #[test]
    fn duplicate_guid_and_empty_label_are_rejected() {
        let mut tags = TagRegistry::new();
        let id = TagId::new();
        assert!(tags.create_tag("a", id).is_some());
        assert!(tags.create_tag("b", id).is_none());
        assert!(tags.create_tag("", TagId::new()).is_none());
        assert_eq!(tags.len(), 1);
    }

    #[test]
    fn rename_keeps_labels_unique_and_remove_forgets_the_tag() {
        let mut tags = TagRegistry::new();
        let a = TagId::new();
        let b = TagId::new();
        tags.create_tag("a", a);
        tags.create_tag("b", b);

        assert!(tags.rename_tag(b, "a"));
        assert_eq!(tags.label(b), Some("a_1"));
        assert!(tags.rename_tag(a, "a"));
        assert_eq!(tags.label(a), Some("a"));

        assert!(tags.remove_tag(a));
        assert!(!tags.remove_tag(a));
        assert!(!tags.tag_exists(a));
        assert_eq!(tags.label(a), None);
    }
}
