//! Structural invariants of a process tree that the builders cannot enforce
//! on their own.

use std::collections::HashSet;

use uuid::Uuid;

use crate::core::entity::EntityKind;
use crate::core::ids::EntityId;
use crate::core::tree::ProcessTree;

/// Check structural invariants:
/// - No duplicate uids
/// - Every child points back at its owner
/// - Transition targets are steps of the same chapter
/// - A chapter's first step belongs to the chapter
/// - A transition without conditions is declared last
/// - The process has at least one chapter
pub fn validate_invariants(tree: &ProcessTree) -> Vec<String> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();
    let root = tree.root();
    if tree.is_empty() {
        errors.push(format!("{}: process has no chapters", tree.node(root).name()));
    }
    validate_entity(tree, root, &mut seen, &mut errors, tree.node(root).name());
    errors
}

fn validate_entity(
    tree: &ProcessTree,
    id: EntityId,
    seen: &mut HashSet<Uuid>,
    errors: &mut Vec<String>,
    path: &str,
) {
    let entity = tree.node(id);
    if !seen.insert(entity.uid()) {
        errors.push(format!("duplicate uid '{}' at {}", entity.uid(), path));
    }

    match entity.kind() {
        EntityKind::Chapter { data, steps, .. } => {
            if let Some(first) = data.first_step {
                if !steps.contains(&first) {
                    errors.push(format!(
                        "{}: first step '{}' is not a step of this chapter",
                        path,
                        tree.label(first).name
                    ));
                }
            }
        }
        EntityKind::Step { transitions, .. } => {
            let chapter = entity.parent();
            for (index, transition) in transitions.iter().enumerate() {
                let unconditional = tree.conditions(*transition).is_empty();
                if unconditional && index + 1 < transitions.len() {
                    errors.push(format!(
                        "{}: unconditional transition '{}' must be declared last",
                        path,
                        tree.node(*transition).name()
                    ));
                }
                if let Some(target) = tree.transition_target(*transition) {
                    if chapter.is_none_or(|c| !tree.is_owned_by(target, c)) {
                        errors.push(format!(
                            "{}: transition target '{}' is outside the chapter",
                            path,
                            tree.label(target).name
                        ));
                    }
                }
            }
        }
        _ => {}
    }

    for child in entity.children() {
        let child_path = format!("{}/{}", path, tree.node(child).name());
        if tree.node(child).parent() != Some(id) {
            errors.push(format!("{child_path}: parent reference does not match owner"));
        }
        validate_entity(tree, child, seen, errors, &child_path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::entity::ConditionKind;

    #[test]
    fn valid_tree_has_no_errors() {
        let mut tree = ProcessTree::new("p");
        let chapter = tree.add_chapter("c");
        let a = tree.add_step(chapter, "a").expect("a");
        let b = tree.add_step(chapter, "b").expect("b");
        let guarded = tree.add_transition(a, None).expect("guarded");
        tree.add_condition(guarded, "wait", ConditionKind::Timeout { seconds: 1.0 })
            .expect("condition");
        tree.add_transition(a, Some(b)).expect("fallback");

        assert!(validate_invariants(&tree).is_empty());
    }

    #[test]
    fn empty_process_is_reported() {
        let tree = ProcessTree::new("p");
        let errors = validate_invariants(&tree);
        assert_eq!(errors, vec!["p: process has no chapters".to_string()]);
    }

    #[test]
    fn misordered_and_cross_chapter_transitions_are_reported() {
        let mut tree = ProcessTree::new("p");
        let first = tree.add_chapter("one");
        let second = tree.add_chapter("two");
        let a = tree.add_step(first, "a").expect("a");
        let elsewhere = tree.add_step(second, "x").expect("x");
        tree.add_transition(a, Some(elsewhere)).expect("cross");
        let guarded = tree.add_transition(a, None).expect("guarded");
        tree.add_condition(guarded, "wait", ConditionKind::Timeout { seconds: 1.0 })
            .expect("condition");

        let errors = validate_invariants(&tree);
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().any(|e| e.contains("must be declared last")));
        assert!(errors.iter().any(|e| e.contains("outside the chapter")));
    }

    #[test]
    fn duplicate_uids_are_reported() {
        let mut tree = ProcessTree::new("p");
        let chapter = tree.add_chapter("c");
        let a = tree.add_step(chapter, "a").expect("a");
        let b = tree.add_step(chapter, "b").expect("b");
        let uid = tree.node(a).uid();
        tree.set_uid(b, uid).expect("set uid");

        let errors = validate_invariants(&tree);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("duplicate uid"));
    }
}
