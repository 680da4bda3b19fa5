//! Property-based tests for the navigation gate.
//!
//! Random interleavings of navigation requests, validation responses,
//! unsaved-changes toggles and visibility changes, driven through the
//! deferred-task simulator.
//!
//! 1. Every navigation request resolves to exactly one outcome.
//! 2. Once settled, the view cache holds the current view.
//!
//! # Running Tests
//!
//! ```sh
//! cargo test -p formflow-runtime --test proptest_gate
//! ```

use std::collections::BTreeSet;

use formflow_core::{
    ApplicationMetadata, BackendValidationIssue, Component, DataElement, DataType, Instance,
    Layouts, PageId, PageOrder, Severity, ValidationTrigger,
};
use formflow_runtime::{
    FormModel, FormMsg, FormState, NavigationOutcome, NavigationRequest, NavigationResult,
    ProgramSimulator, ValidationRequest,
};
use proptest::prelude::*;

// ── Helpers ─────────────────────────────────────────────────────────────

const PAGE_COUNT: usize = 4;
const INSTANCE_ID: &str = "512/prop";

#[derive(Debug, Clone)]
enum Op {
    /// Page index; `PAGE_COUNT` names a page outside the authored order.
    Navigate {
        page: usize,
        trigger: ValidationTrigger,
        allow_hidden: bool,
    },
    DeliverTask,
    Edit,
    Clean,
    Hide(BTreeSet<usize>),
}

fn page(i: usize) -> PageId {
    PageId::new(format!("p{i}"))
}

fn trigger() -> impl Strategy<Value = ValidationTrigger> {
    prop_oneof![
        Just(ValidationTrigger::None),
        Just(ValidationTrigger::Page),
        Just(ValidationTrigger::AllPages),
    ]
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0..=PAGE_COUNT, trigger(), any::<bool>()).prop_map(|(page, trigger, allow_hidden)| {
            Op::Navigate { page, trigger, allow_hidden }
        }),
        3 => Just(Op::DeliverTask),
        1 => Just(Op::Edit),
        1 => Just(Op::Clean),
        1 => proptest::collection::btree_set(0..PAGE_COUNT, 0..PAGE_COUNT).prop_map(Op::Hide),
    ]
}

/// One component per page bound to `F.{page}`; the server flags `F.1`.
fn model() -> FormModel {
    let layouts = (0..PAGE_COUNT).fold(Layouts::new(), |layouts, i| {
        layouts.with_page(
            format!("p{i}"),
            vec![Component::new(format!("c{i}")).with_binding("simpleBinding", format!("F.{i}"))],
        )
    });
    let order: Vec<PageId> = (0..PAGE_COUNT).map(page).collect();
    let state = FormState::new(layouts, PageOrder::new(order).with_hidden(Vec::<&str>::new()))
        .with_current_view("p0")
        .with_instance(Instance {
            id: INSTANCE_ID.into(),
            current_task: Some("Task_1".into()),
            data: vec![DataElement {
                id: "d-1".into(),
                data_type: "model".into(),
            }],
        })
        .with_metadata(ApplicationMetadata {
            id: "org/app".into(),
            data_types: vec![DataType::form_data("model", "Task_1")],
        });
    let client = |_: &ValidationRequest| -> NavigationResult<Vec<BackendValidationIssue>> {
        Ok(vec![BackendValidationIssue::new("F.1", Severity::Error, "bad")])
    };
    FormModel::new(state, client).without_view_restore()
}

/// Apply `ops`, then drain tasks and barriers. Returns the request count.
fn run(ops: &[Op]) -> (ProgramSimulator<FormModel>, usize) {
    let mut sim = ProgramSimulator::new(model()).defer_tasks();
    sim.init();
    let mut requests = 0;
    for op in ops {
        match op {
            Op::Navigate {
                page: target,
                trigger,
                allow_hidden,
            } => {
                requests += 1;
                let mut request = NavigationRequest::to(page(*target)).with_trigger(*trigger);
                request.allow_navigation_to_hidden = *allow_hidden;
                sim.send(FormMsg::Navigate(request));
            }
            Op::DeliverTask => {
                sim.run_next_task();
            }
            Op::Edit => sim.send(FormMsg::FieldChanged {
                path: "F.0".into(),
                value: "x".into(),
            }),
            Op::Clean => sim.send(FormMsg::UnsavedChangesChanged(false)),
            Op::Hide(hidden) => {
                sim.send(FormMsg::HiddenPagesChanged(hidden.iter().copied().map(page).collect()));
            }
        }
    }
    for _ in 0..=requests {
        if !sim.model().is_busy() && sim.pending_task_count() == 0 {
            break;
        }
        sim.send(FormMsg::UnsavedChangesChanged(false));
        sim.run_pending_tasks();
    }
    (sim, requests)
}

fn is_corrective(outcome: &NavigationOutcome) -> bool {
    matches!(outcome, NavigationOutcome::Accepted { corrective: true, .. })
}

// ═════════════════════════════════════════════════════════════════════════
// 1. One outcome per request
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn every_request_resolves_exactly_once(ops in proptest::collection::vec(op(), 0..40)) {
        let (sim, requests) = run(&ops);

        prop_assert!(!sim.model().is_busy());
        prop_assert!(sim.model().pending_request().is_none());
        let resolved = sim
            .model()
            .outcomes()
            .iter()
            .filter(|o| !is_corrective(o))
            .count();
        prop_assert_eq!(resolved, requests);
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 2. View cache follows the current view
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn cache_holds_current_view_after_settling(ops in proptest::collection::vec(op(), 0..40)) {
        let (sim, _) = run(&ops);

        let moved = sim.model().outcomes().iter().any(NavigationOutcome::is_accepted);
        let cached = sim.view_cache().get(INSTANCE_ID);
        if moved {
            prop_assert_eq!(cached.as_ref(), sim.model().current_view());
        } else {
            prop_assert_eq!(cached, None);
        }
    }
}
