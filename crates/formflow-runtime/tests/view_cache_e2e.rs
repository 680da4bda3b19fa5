//! View Cache E2E Tests
//!
//! The last viewed page survives a restart when the view cache is backed by
//! a file.
//!
//! # Running Tests
//!
//! ```sh
//! cargo test -p formflow-runtime --features state-persistence --test view_cache_e2e
//! ```

#![cfg(feature = "state-persistence")]

use std::time::Duration;

use formflow_core::{
    BackendValidationIssue, Component, Instance, Layouts, PageId, PageOrder,
};
use formflow_runtime::{
    FormModel, FormMsg, FormState, NavigationRequest, NavigationResult, Program, ProgramConfig,
    ValidationRequest,
};
use tempfile::TempDir;

fn model() -> FormModel {
    let layouts = Layouts::new()
        .with_page("intro", vec![])
        .with_page("details", vec![Component::new("name").with_binding("simpleBinding", "M.Name")])
        .with_page("summary", vec![]);
    let state = FormState::new(
        layouts,
        PageOrder::new(["intro", "details", "summary"]).with_hidden(Vec::<&str>::new()),
    )
    .with_current_view("intro")
    .with_instance(Instance {
        id: "1337/e2e".into(),
        ..Instance::default()
    });
    let client =
        |_: &ValidationRequest| -> NavigationResult<Vec<BackendValidationIssue>> { Ok(Vec::new()) };
    FormModel::new(state, client)
}

fn program(dir: &TempDir) -> Program<FormModel> {
    let config = ProgramConfig::default().with_view_cache_path(dir.path().join("views.json"));
    let mut program = Program::new(model(), config);
    program.init();
    program
}

#[test]
fn last_page_is_restored_after_restart() {
    let dir = TempDir::new().expect("tempdir");

    {
        let mut first = program(&dir);
        assert_eq!(first.model().current_view(), Some(&PageId::new("intro")));
        first.dispatch(FormMsg::Navigate(NavigationRequest::to("details")));
        assert!(first.run_until(|m| !m.outcomes().is_empty(), Duration::from_secs(5)));
        assert_eq!(first.model().current_view(), Some(&PageId::new("details")));
    }
    assert!(dir.path().join("views.json").exists());

    let second = program(&dir);
    assert_eq!(second.model().current_view(), Some(&PageId::new("details")));
    assert_eq!(
        second.view_cache().get("1337/e2e"),
        Some(PageId::new("details"))
    );
}

#[test]
fn uncached_navigation_leaves_file_untouched() {
    let dir = TempDir::new().expect("tempdir");

    let mut first = program(&dir);
    first.dispatch(FormMsg::Navigate(
        NavigationRequest::to("summary").skip_page_caching(),
    ));
    assert_eq!(first.model().current_view(), Some(&PageId::new("summary")));
    assert!(!dir.path().join("views.json").exists());

    let second = program(&dir);
    assert_eq!(second.model().current_view(), Some(&PageId::new("intro")));
}
