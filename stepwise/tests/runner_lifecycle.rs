//! End-to-end scenarios driven through `Runner` and the engine API.

use stepwise::core::entity::{BehaviorKind, Composition, ConditionKind};
use stepwise::core::ids::EntityId;
use stepwise::core::scene::{ObjectHandle, SceneProvider};
use stepwise::core::stage::{Exit, NullObserver, Stage};
use stepwise::core::tree::ProcessTree;
use stepwise::driver::{Runner, SkipPolicy, TickOutcome};
use stepwise::error::{ConfigurationError, EngineError, RunnerError};
use stepwise::io::config::EngineConfig;
use stepwise::io::scene::SimulatedScene;
use stepwise::test_support::{RecordingObserver, SceneFixture, two_step_process};

fn runner(fixture: &SceneFixture, recorder: &RecordingObserver) -> Runner<SimulatedScene> {
    Runner::new(fixture.session(), EngineConfig::default()).with_observer(Box::new(recorder.clone()))
}

fn tick_until_complete(runner: &mut Runner<SimulatedScene>, max: usize) -> usize {
    for tick in 1..=max {
        if runner.tick().expect("tick") == TickOutcome::Complete {
            return tick;
        }
    }
    panic!("process did not complete within {max} ticks");
}

/// Chapter with steps a -> b -> c; each transition waits for its own lever.
fn three_step_chain(fixture: &mut SceneFixture) -> (ProcessTree, [EntityId; 3]) {
    let mut tree = ProcessTree::new("chain");
    let chapter = tree.add_chapter("main");
    let a = tree.add_step(chapter, "a").expect("a");
    let b = tree.add_step(chapter, "b").expect("b");
    let c = tree.add_step(chapter, "c").expect("c");
    for (from, to) in [(a, Some(b)), (b, Some(c)), (c, None)] {
        let lever = fixture.grabbable(&format!("lever {}", tree.label(from).name));
        let transition = tree.add_transition(from, to).expect("transition");
        tree.add_condition(transition, "grab", ConditionKind::Grabbed { target: lever })
            .expect("condition");
    }
    (tree, [a, b, c])
}

#[test]
fn two_step_process_runs_to_completion() {
    let mut fixture = SceneFixture::new();
    let lamp = fixture.enableable("lamp", false);
    let lever = fixture.grabbable("lever");
    let (tree, steps) = two_step_process(lamp, lever);
    let recorder = RecordingObserver::new();
    let mut runner = runner(&fixture, &recorder);

    runner.activate_process(tree).expect("activate");
    assert_eq!(runner.tick().expect("tick"), TickOutcome::Running);
    assert!(runner.scene().object(lamp).is_some_and(|o| o.enabled));
    assert_eq!(runner.current_step(), Some(steps.a));
    assert!(runner.scene().is_locked(lever));

    // Nothing happens until the lever is grabbed.
    for _ in 0..5 {
        assert_eq!(runner.tick().expect("tick"), TickOutcome::Running);
    }
    assert_eq!(runner.current_step(), Some(steps.a));

    runner.scene_mut().grab(lever);
    tick_until_complete(&mut runner, 5);

    assert!(runner.is_process_complete());
    assert_eq!(recorder.activated_steps(), vec!["a", "b"]);
    assert!(!runner.scene().is_locked(lever));
    assert!(runner.session().locks.locked_objects().next().is_none());
    let tree = runner.tree().expect("tree");
    assert_eq!(
        tree.get(steps.chapter).expect("chapter").lifecycle().last_exit(),
        Some(Exit::Completed)
    );
}

#[test]
fn unconditional_chapter_completes_within_two_quanta() {
    let mut fixture = SceneFixture::new();
    let lamp = fixture.enableable("lamp", false);
    let mut tree = ProcessTree::new("p");
    let chapter = tree.add_chapter("c");
    let first = tree.add_step(chapter, "switch on").expect("first");
    let second = tree.add_step(chapter, "done").expect("second");
    tree.add_behavior(
        first,
        "enable lamp",
        BehaviorKind::SetObjectEnabled {
            target: lamp.into(),
            enabled: true,
            revert_on_deactivation: false,
        },
    )
    .expect("behavior");
    tree.add_transition(first, Some(second)).expect("transition");

    let recorder = RecordingObserver::new();
    let mut runner = runner(&fixture, &recorder);
    runner.activate_process(tree).expect("activate");

    let first_outcome = runner.tick().expect("tick 1");
    assert!(runner.scene().object(lamp).is_some_and(|o| o.enabled));
    if first_outcome != TickOutcome::Complete {
        assert_eq!(runner.tick().expect("tick 2"), TickOutcome::Complete);
    }
    assert!(runner.is_process_complete());
    assert_eq!(recorder.activated_steps(), vec!["switch on", "done"]);
}

#[test]
fn transition_fires_only_once_every_condition_completed() {
    let mut fixture = SceneFixture::new();
    let lever = fixture.grabbable("lever");
    let button = fixture.touchable("button");
    let valve = fixture.grabbable("valve");
    let mut tree = ProcessTree::new("p");
    let chapter = tree.add_chapter("c");
    let step = tree.add_step(chapter, "s").expect("step");
    let transition = tree.add_transition(step, None).expect("transition");
    let grab = tree
        .add_condition(transition, "grab", ConditionKind::Grabbed { target: lever })
        .expect("grab");
    let touch = tree
        .add_condition(transition, "touch", ConditionKind::Touched { target: button })
        .expect("touch");
    tree.add_condition(transition, "valve", ConditionKind::Grabbed { target: valve })
        .expect("valve");

    let mut session = fixture.session();
    let mut observer = NullObserver;
    let mut cx = session.context(&mut observer, 0.02);
    tree.activate(&mut cx, step).expect("activate");
    for _ in 0..3 {
        tree.update(&mut cx, step).expect("update");
    }
    assert_eq!(tree.stage(step), Stage::Active);

    assert!(tree.autocomplete(&mut cx, grab).expect("grab"));
    assert!(tree.autocomplete(&mut cx, touch).expect("touch"));
    tree.update(&mut cx, step).expect("update");
    assert!(!tree.is_completed(transition));
    assert_eq!(tree.fired_transition(step), None);
    assert_eq!(tree.stage(step), Stage::Active);

    cx.scene.fast_forward_grab(ObjectHandle(valve));
    tree.update(&mut cx, step).expect("update");
    assert!(tree.is_completed(transition));
    assert_eq!(tree.fired_transition(step), Some(transition));
    assert!(tree.get(step).expect("step").lifecycle().is_active_done());
}

#[test]
fn first_completed_transition_in_declaration_order_is_selected() {
    let mut fixture = SceneFixture::new();
    let never = fixture.grabbable("never");
    let lever = fixture.grabbable("lever");
    let mut tree = ProcessTree::new("p");
    let chapter = tree.add_chapter("c");
    let start = tree.add_step(chapter, "start").expect("start");
    let left = tree.add_step(chapter, "left").expect("left");
    let middle = tree.add_step(chapter, "middle").expect("middle");
    let right = tree.add_step(chapter, "right").expect("right");
    let t1 = tree.add_transition(start, Some(left)).expect("t1");
    tree.add_condition(t1, "never", ConditionKind::Grabbed { target: never })
        .expect("c1");
    let t2 = tree.add_transition(start, Some(middle)).expect("t2");
    tree.add_condition(t2, "lever", ConditionKind::Grabbed { target: lever })
        .expect("c2");
    tree.add_transition(start, Some(right)).expect("t3");
    for step in [left, middle, right] {
        tree.add_transition(step, None).expect("end");
    }
    fixture.scene.grab(lever);

    let recorder = RecordingObserver::new();
    let mut runner = runner(&fixture, &recorder);
    runner.activate_process(tree).expect("activate");
    tick_until_complete(&mut runner, 5);

    // T2 and T3 both complete in the same quantum; T2 is declared first.
    assert_eq!(recorder.activated_steps(), vec!["start", "middle"]);
    let tree = runner.tree().expect("tree");
    assert_eq!(tree.fired_transition(start), Some(t2));
}

#[test]
fn object_shared_by_two_steps_stays_locked_until_both_release() {
    let mut fixture = SceneFixture::new();
    let lever = fixture.grabbable("lever");
    let mut tree = ProcessTree::new("p");
    let one = tree.add_chapter("one");
    let two = tree.add_chapter("two");
    let mut steps = Vec::new();
    for chapter in [one, two] {
        let step = tree.add_step(chapter, "uses lever").expect("step");
        let transition = tree.add_transition(step, None).expect("transition");
        tree.add_condition(transition, "grab", ConditionKind::Grabbed { target: lever })
            .expect("condition");
        steps.push(step);
    }

    let mut session = fixture.session();
    let mut observer = NullObserver;
    {
        let mut cx = session.context(&mut observer, 0.02);
        tree.activate(&mut cx, steps[0]).expect("activate a");
        tree.activate(&mut cx, steps[1]).expect("activate b");
    }
    assert!(session.scene.is_locked(lever));
    assert_eq!(session.locks.holders(lever).len(), 2);

    {
        let mut cx = session.context(&mut observer, 0.02);
        tree.abort(&mut cx, steps[0]).expect("abort a");
    }
    assert!(session.scene.is_locked(lever));

    {
        let mut cx = session.context(&mut observer, 0.02);
        tree.abort(&mut cx, steps[1]).expect("abort b");
    }
    assert!(!session.scene.is_locked(lever));
    // One lock and one unlock notification: only zero crossings are reported.
    assert_eq!(session.scene.lock_events(), &[(lever, true), (lever, false)]);
}

#[test]
fn keep_unlocked_objects_are_never_reserved() {
    let mut fixture = SceneFixture::new();
    let lamp = fixture.enableable("lamp", false);
    let lever = fixture.grabbable("lever");
    let (mut tree, steps) = two_step_process(lamp, lever);
    tree.step_data_mut(steps.a)
        .expect("step data")
        .keep_unlocked(lever);

    let mut runner = runner(&fixture, &RecordingObserver::new());
    runner.activate_process(tree).expect("activate");
    runner.tick().expect("tick");
    assert_eq!(runner.current_step(), Some(steps.a));
    assert!(runner.scene().is_locked(lamp));
    assert!(!runner.scene().is_locked(lever));
}

#[test]
fn aborting_a_deep_tree_reaches_inactive_everywhere() {
    let mut fixture = SceneFixture::new();
    let lever = fixture.grabbable("lever");
    let mut tree = ProcessTree::new("p");
    let chapter = tree.add_chapter("c");
    let step = tree.add_step(chapter, "s").expect("step");
    let outer = tree
        .add_behavior(
            step,
            "outer",
            BehaviorKind::Group {
                composition: Composition::Parallel,
            },
        )
        .expect("outer");
    let inner = tree
        .add_behavior(
            outer,
            "inner",
            BehaviorKind::Group {
                composition: Composition::Sequence,
            },
        )
        .expect("inner");
    for seconds in [3.0, 4.0] {
        tree.add_behavior(inner, "wait", BehaviorKind::Delay { seconds })
            .expect("delay");
    }
    tree.add_behavior(outer, "long wait", BehaviorKind::Delay { seconds: 10.0 })
        .expect("delay");
    let transition = tree.add_transition(step, None).expect("transition");
    tree.add_condition(transition, "grab", ConditionKind::Grabbed { target: lever })
        .expect("condition");

    let recorder = RecordingObserver::new();
    let mut runner = runner(&fixture, &recorder);
    runner.activate_process(tree).expect("activate");
    for _ in 0..3 {
        runner.tick().expect("tick");
    }
    assert_eq!(runner.tree().expect("tree").stage(step), Stage::Activating);

    runner.abort_process().expect("abort");
    let tree = runner.tree().expect("tree");
    for id in tree.ids() {
        assert_eq!(tree.stage(id), Stage::Inactive, "{}", tree.label(id));
    }
    assert_eq!(
        tree.get(tree.root()).expect("root").lifecycle().last_exit(),
        Some(Exit::Aborted)
    );
    assert!(!runner.is_process_complete());
    assert_eq!(runner.tick().expect("tick"), TickOutcome::Idle);
    assert!(!runner.scene().is_locked(lever));
}

#[test]
fn degraded_condition_halts_until_a_jump() {
    let mut fixture = SceneFixture::new();
    let lamp = fixture.enableable("lamp", false);
    // The lever is referenced but never added to the scene.
    let lever = SceneFixture::new().grabbable("missing lever");
    let (tree, steps) = two_step_process(lamp, lever);

    let mut runner = runner(&fixture, &RecordingObserver::new());
    runner.activate_process(tree).expect("activate");
    assert!(
        runner
            .diagnostics()
            .iter()
            .any(|d| matches!(d, ConfigurationError::MissingObject { object, .. } if *object == lever))
    );

    let err = runner.tick().expect_err("halt");
    assert!(matches!(
        err,
        RunnerError::Halted(EngineError::InvalidTransition { ref step, .. }) if step.name == "a"
    ));
    // Stays halted without advancing.
    let quantum = runner.quantum();
    assert!(matches!(runner.tick(), Err(RunnerError::Halted(_))));
    assert_eq!(runner.quantum(), quantum);

    runner.skip_to_step(steps.b, SkipPolicy::Jump).expect("jump");
    assert!(runner.halted().is_none());
    tick_until_complete(&mut runner, 5);
}

#[test]
fn fast_forward_skip_runs_every_step_on_the_way() {
    let mut fixture = SceneFixture::new();
    let (tree, [a, b, c]) = three_step_chain(&mut fixture);
    let recorder = RecordingObserver::new();
    let mut runner = runner(&fixture, &recorder);
    runner.activate_process(tree).expect("activate");

    runner.skip_to_step(c, SkipPolicy::FastForward).expect("skip");

    assert_eq!(runner.current_step(), Some(c));
    assert_eq!(recorder.activated_steps(), vec!["a", "b", "c"]);
    let levers: Vec<_> = runner.scene().objects().iter().map(|o| o.id).collect();
    assert_eq!(runner.scene().grab_count(levers[0]), 1);
    assert_eq!(runner.scene().grab_count(levers[1]), 1);
    assert_eq!(runner.scene().grab_count(levers[2]), 0);
    let tree = runner.tree().expect("tree");
    assert_eq!(tree.stage(a), Stage::Inactive);
    assert_eq!(tree.stage(b), Stage::Inactive);
}

#[test]
fn jump_skips_intermediate_steps() {
    let mut fixture = SceneFixture::new();
    let (tree, [_, _, c]) = three_step_chain(&mut fixture);
    let recorder = RecordingObserver::new();
    let mut runner = runner(&fixture, &recorder);
    runner.activate_process(tree).expect("activate");
    runner.tick().expect("tick");

    runner.skip_to_step(c, SkipPolicy::Jump).expect("jump");
    runner.tick().expect("tick");

    assert_eq!(runner.current_step(), Some(c));
    assert_eq!(recorder.activated_steps(), vec!["a", "c"]);
    assert!(runner.scene().objects().iter().all(|o| o.grab_count == 0));
}

#[test]
fn rejected_jump_leaves_the_chapter_entry_alone() {
    let mut fixture = SceneFixture::new();
    let lamp = fixture.enableable("lamp", false);
    let lever = fixture.grabbable("lever");
    let (tree, steps) = two_step_process(lamp, lever);
    let mut runner = runner(&fixture, &RecordingObserver::new());
    runner.activate_process(tree).expect("activate");

    // The process has not run a quantum yet, so there is no chapter sequence
    // to redirect.
    let err = runner
        .skip_to_step(steps.b, SkipPolicy::Jump)
        .expect_err("not reachable yet");
    assert!(matches!(err, RunnerError::StepNotReachable { .. }));

    runner.tick().expect("tick");
    assert_eq!(runner.current_step(), Some(steps.a));
}

#[test]
fn skipping_backwards_by_fast_forward_is_rejected() {
    let mut fixture = SceneFixture::new();
    let (tree, [a, _, c]) = three_step_chain(&mut fixture);
    let mut runner = runner(&fixture, &RecordingObserver::new());
    runner.activate_process(tree).expect("activate");
    runner.skip_to_step(c, SkipPolicy::FastForward).expect("skip");

    let err = runner
        .skip_to_step(a, SkipPolicy::FastForward)
        .expect_err("a is behind c");
    assert!(matches!(err, RunnerError::StepNotReachable { .. }));
}

#[test]
fn restart_chapter_runs_it_again_from_the_first_step() {
    let mut fixture = SceneFixture::new();
    let lamp = fixture.enableable("lamp", false);
    let lever = fixture.grabbable("lever");
    let (tree, steps) = two_step_process(lamp, lever);
    let recorder = RecordingObserver::new();
    let mut runner = runner(&fixture, &recorder);
    runner.activate_process(tree).expect("activate");
    runner.tick().expect("tick");

    runner.restart_chapter().expect("restart");
    assert!(!runner.scene().is_locked(lamp));
    runner.tick().expect("tick");

    assert_eq!(runner.current_step(), Some(steps.a));
    assert_eq!(recorder.activated_steps(), vec!["a", "a"]);
    assert!(runner.scene().is_locked(lamp));
}

#[test]
fn aborted_step_halts_its_chapter_until_restart() {
    let mut fixture = SceneFixture::new();
    let lamp = fixture.enableable("lamp", false);
    let lever = fixture.grabbable("lever");
    let (tree, steps) = two_step_process(lamp, lever);
    let mut runner = runner(&fixture, &RecordingObserver::new());
    runner.activate_process(tree).expect("activate");
    runner.tick().expect("tick");

    runner.abort_current_step().expect("abort");
    for _ in 0..3 {
        assert_eq!(runner.tick().expect("tick"), TickOutcome::Running);
    }
    assert_eq!(runner.current_step(), None);
    let tree = runner.tree().expect("tree");
    assert_eq!(tree.stage(steps.chapter), Stage::Active);
    assert!(tree.sequence(steps.chapter).is_some_and(|c| c.is_halted()));

    runner.restart_chapter().expect("restart");
    runner.tick().expect("tick");
    assert_eq!(runner.current_step(), Some(steps.a));
}

#[test]
fn at_most_one_step_per_chapter_is_ever_active() {
    let mut fixture = SceneFixture::new();
    let (tree, steps) = three_step_chain(&mut fixture);
    let recorder = RecordingObserver::new();
    let mut runner = runner(&fixture, &recorder);
    runner.activate_process(tree).expect("activate");
    for _ in 0..10 {
        runner.fast_forward_current_step().expect("fast-forward");
        if runner.tick().expect("tick") == TickOutcome::Complete {
            break;
        }
        let tree = runner.tree().expect("tree");
        let running = steps
            .iter()
            .filter(|s| tree.stage(**s) != Stage::Inactive)
            .count();
        assert!(running <= 1);
    }
    assert!(runner.is_process_complete());
}

#[test]
fn activating_a_new_process_deactivates_the_previous_one() {
    let mut fixture = SceneFixture::new();
    let lamp = fixture.enableable("lamp", false);
    let lever = fixture.grabbable("lever");
    let (first, _) = two_step_process(lamp, lever);
    let (second, _) = two_step_process(lamp, lever);
    let recorder = RecordingObserver::new();
    let mut runner = runner(&fixture, &recorder);
    runner.activate_process(first).expect("first");
    runner.tick().expect("tick");
    assert!(runner.scene().is_locked(lever));

    runner.activate_process(second).expect("second");
    let aborted = recorder
        .changes()
        .iter()
        .any(|c| c.to == Stage::Aborting);
    assert!(!aborted);
    runner.tick().expect("tick");
    assert!(runner.scene().is_locked(lever));
    assert_eq!(runner.session().locks.holders(lever).len(), 1);
}
