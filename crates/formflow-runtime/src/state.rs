#![forbid(unsafe_code)]

//! Form state read by the navigation gate, and its selectors.
//!
//! Other subsystems (rule engine, autosave, layout loading) write parts of
//! this state through messages; the gate re-reads it after every suspension
//! point instead of caching values across them.

use std::collections::BTreeSet;

use formflow_core::{
    ApplicationMetadata, FormData, Instance, LayoutNodes, Layouts, PageId, PageOrder,
    TextResources, Validations,
};

/// When form data is saved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AutoSaveBehavior {
    /// Saved by the form-data subsystem after each change.
    #[default]
    OnChangeFormData,
    /// Saved when the user leaves a page; the gate requests the save.
    OnChangePage,
}

/// UI configuration and the current view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UiConfig {
    pub auto_save_behavior: AutoSaveBehavior,
    pub page_order: PageOrder,
    /// `None` until the first page has been shown.
    pub current_view: Option<PageId>,
    /// Page to come back to after a detour (e.g. from a summary page).
    pub return_to_view: Option<PageId>,
    pub view_cache_key: Option<String>,
    /// Layout set of the current task, sent with page-order calculations.
    pub layout_set_id: Option<String>,
    pub focus_component_id: Option<String>,
    pub keep_scroll_pos: bool,
}

/// Everything the gate reads.
#[derive(Debug, Clone, Default)]
pub struct FormState {
    pub ui: UiConfig,
    pub layouts: Layouts,
    pub form_data: FormData,
    pub validations: Validations,
    pub instance: Option<Instance>,
    pub metadata: Option<ApplicationMetadata>,
    pub text_resources: TextResources,
    pub unsaved_changes: bool,
    pub hidden_components: BTreeSet<String>,
}

impl FormState {
    #[must_use]
    pub fn new(layouts: Layouts, page_order: PageOrder) -> Self {
        Self {
            layouts,
            ui: UiConfig {
                page_order,
                ..UiConfig::default()
            },
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_current_view(mut self, page: impl Into<PageId>) -> Self {
        self.ui.current_view = Some(page.into());
        self
    }

    #[must_use]
    pub fn with_instance(mut self, instance: Instance) -> Self {
        self.instance = Some(instance);
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: ApplicationMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    #[must_use]
    pub fn with_auto_save(mut self, behavior: AutoSaveBehavior) -> Self {
        self.ui.auto_save_behavior = behavior;
        self
    }

    #[must_use]
    pub fn with_text_resources(mut self, texts: TextResources) -> Self {
        self.text_resources = texts;
        self
    }

    #[must_use]
    pub fn with_form_data(mut self, data: FormData) -> Self {
        self.form_data = data;
        self
    }

    // ── Selectors ──────────────────────────────────────────────────────

    /// The visible page list; `None` while unknown.
    #[must_use]
    pub fn visible_pages(&self) -> Option<Vec<PageId>> {
        self.ui.page_order.visible()
    }

    /// Whether the current view is on the known visible list.
    ///
    /// An unknown list or unknown current view counts as not visible.
    #[must_use]
    pub fn is_current_page_visible(&self) -> bool {
        match (&self.ui.current_view, self.visible_pages()) {
            (Some(current), Some(visible)) => visible.contains(current),
            _ => false,
        }
    }

    #[must_use]
    pub fn instance_id(&self) -> Option<&str> {
        self.instance.as_ref().map(|i| i.id.as_str())
    }

    /// Data element holding form data for the instance's current task.
    #[must_use]
    pub fn current_task_data_element_id(&self) -> Option<&str> {
        let metadata = self.metadata.as_ref()?;
        self.instance.as_ref()?.current_task_data_element_id(metadata)
    }

    /// The view-cache key: the assigned key, else the instance id.
    ///
    /// `None` until an instance is loaded; nothing is cached before then.
    #[must_use]
    pub fn view_cache_key(&self) -> Option<String> {
        self.ui
            .view_cache_key
            .clone()
            .or_else(|| self.instance_id().map(str::to_owned))
    }

    /// Components on `visible` pages, minus hidden components.
    #[must_use]
    pub fn resolved_nodes<'a>(&'a self, visible: Option<&[PageId]>) -> LayoutNodes<'a> {
        LayoutNodes::resolve(&self.layouts, visible)
            .with_hidden_components(self.hidden_components.iter().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use formflow_core::{DataElement, DataType};

    fn state() -> FormState {
        FormState::new(Layouts::new(), PageOrder::new(["p1", "p2", "p3"]))
    }

    #[test]
    fn current_page_visibility_needs_known_list() {
        let mut s = state().with_current_view("p2");
        assert!(!s.is_current_page_visible());

        s.ui.page_order.set_hidden(BTreeSet::new());
        assert!(s.is_current_page_visible());

        s.ui.page_order.set_hidden(["p2".into()].into_iter().collect());
        assert!(!s.is_current_page_visible());
    }

    #[test]
    fn view_cache_key_needs_instance_or_assigned_key() {
        let mut s = state();
        assert_eq!(s.view_cache_key(), None);

        s.instance = Some(Instance {
            id: "512/abc".into(),
            ..Instance::default()
        });
        assert_eq!(s.view_cache_key().as_deref(), Some("512/abc"));

        s.ui.view_cache_key = Some("custom".into());
        assert_eq!(s.view_cache_key().as_deref(), Some("custom"));
    }

    #[test]
    fn data_element_needs_metadata_and_instance() {
        let instance = Instance {
            id: "512/abc".into(),
            current_task: Some("Task_1".into()),
            data: vec![DataElement {
                id: "d-1".into(),
                data_type: "model".into(),
            }],
        };
        let s = state().with_instance(instance);
        assert_eq!(s.current_task_data_element_id(), None);

        let s = s.with_metadata(ApplicationMetadata {
            id: "org/app".into(),
            data_types: vec![DataType::form_data("model", "Task_1")],
        });
        assert_eq!(s.current_task_data_element_id(), Some("d-1"));
    }
}
