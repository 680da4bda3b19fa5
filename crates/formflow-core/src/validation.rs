#![forbid(unsafe_code)]

//! Validation findings and the merge engine.
//!
//! Local (frontend) and server findings are concatenated, attributed to
//! components through their data bindings, and filtered by page.
//!
//! # Design Invariants
//!
//! 1. **Concatenate, never replace**: two findings for the same binding keep
//!    both message lists, in input order (frontend before server).
//! 2. **Nothing discarded silently**: a finding that matches no component is
//!    kept in the `unmapped` bucket, keyed by its field.
//! 3. **Deterministic output**: ordered maps throughout, so identical inputs
//!    produce identical output.
//! 4. **Later pages never block**: the current-and-previous filter drops
//!    pages after the current one in the visible order.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::layout::Layouts;
use crate::page::PageId;

/// Severity of a server validation issue.
///
/// Serialized as the numeric code used by the validation endpoint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum Severity {
    #[default]
    Unspecified,
    Error,
    Warning,
    Informational,
    Fixed,
    Success,
}

impl From<u8> for Severity {
    fn from(code: u8) -> Self {
        match code {
            1 => Self::Error,
            2 => Self::Warning,
            3 => Self::Informational,
            4 => Self::Fixed,
            5 => Self::Success,
            _ => Self::Unspecified,
        }
    }
}

impl From<Severity> for u8 {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Unspecified => 0,
            Severity::Error => 1,
            Severity::Warning => 2,
            Severity::Informational => 3,
            Severity::Fixed => 4,
            Severity::Success => 5,
        }
    }
}

/// Which validations a page transition asks for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValidationTrigger {
    /// No validation requested; the transition takes the fast path.
    #[default]
    #[serde(rename = "none")]
    None,
    #[serde(rename = "validatePage")]
    Page,
    #[serde(rename = "validateCurrentAndPreviousPages")]
    CurrentAndPreviousPages,
    #[serde(rename = "validateAllPages")]
    AllPages,
}

impl ValidationTrigger {
    /// Page filter to apply for display, or `None` when no validation runs.
    #[must_use]
    pub fn page_filter(self) -> Option<PageFilter> {
        match self {
            Self::None => None,
            Self::Page => Some(PageFilter::CurrentPage),
            Self::CurrentAndPreviousPages => Some(PageFilter::CurrentAndPreviousPages),
            Self::AllPages => Some(PageFilter::AllPages),
        }
    }

    #[must_use]
    pub fn is_requested(self) -> bool {
        self != Self::None
    }
}

/// Page scoping applied to merged validations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PageFilter {
    CurrentPage,
    CurrentAndPreviousPages,
    AllPages,
}

/// Ordered messages for one binding of one component.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingValidation {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub info: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub success: Vec<String>,
}

impl BindingValidation {
    #[must_use]
    pub fn from_error(message: impl Into<String>) -> Self {
        Self {
            errors: vec![message.into()],
            ..Self::default()
        }
    }

    #[must_use]
    pub fn from_warning(message: impl Into<String>) -> Self {
        Self {
            warnings: vec![message.into()],
            ..Self::default()
        }
    }

    /// Append every message of `other` after the existing ones.
    pub fn extend_from(&mut self, other: &Self) {
        self.errors.extend(other.errors.iter().cloned());
        self.warnings.extend(other.warnings.iter().cloned());
        self.info.extend(other.info.iter().cloned());
        self.success.extend(other.success.iter().cloned());
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.message_count() == 0
    }

    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Total number of messages of every severity.
    #[must_use]
    pub fn message_count(&self) -> usize {
        self.errors.len() + self.warnings.len() + self.info.len() + self.success.len()
    }
}

/// A finding from one source, keyed by data model path (or component id for
/// file uploads).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValidationFinding {
    pub field: String,
    pub messages: BindingValidation,
}

impl ValidationFinding {
    #[must_use]
    pub fn error(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            messages: BindingValidation::from_error(message),
        }
    }

    #[must_use]
    pub fn warning(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            messages: BindingValidation::from_warning(message),
        }
    }
}

/// Binding key -> messages.
pub type ComponentValidations = BTreeMap<String, BindingValidation>;

/// Component id -> bindings.
pub type LayoutValidations = BTreeMap<String, ComponentValidations>;

/// One mapped error, flattened for error reports.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlatError {
    pub page: PageId,
    pub component_id: String,
    pub message: String,
}

/// Merged validation state: page -> component -> binding -> messages, plus
/// the unmapped bucket (field -> messages).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validations {
    pages: BTreeMap<PageId, LayoutValidations>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    unmapped: ComponentValidations,
}

impl Validations {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add messages for a component binding, appending to existing ones.
    pub fn add(
        &mut self,
        page: &PageId,
        component_id: &str,
        binding_key: &str,
        messages: &BindingValidation,
    ) {
        self.pages
            .entry(page.clone())
            .or_default()
            .entry(component_id.to_owned())
            .or_default()
            .entry(binding_key.to_owned())
            .or_default()
            .extend_from(messages);
    }

    /// Add messages for an unattributed field, appending to existing ones.
    pub fn add_unmapped(&mut self, field: &str, messages: &BindingValidation) {
        self.unmapped
            .entry(field.to_owned())
            .or_default()
            .extend_from(messages);
    }

    #[must_use]
    pub fn page(&self, page: &PageId) -> Option<&LayoutValidations> {
        self.pages.get(page)
    }

    #[must_use]
    pub fn component(&self, page: &PageId, component_id: &str) -> Option<&ComponentValidations> {
        self.pages.get(page)?.get(component_id)
    }

    /// Pages that have at least one entry, in key order.
    pub fn pages(&self) -> impl Iterator<Item = &PageId> {
        self.pages.keys()
    }

    #[must_use]
    pub fn unmapped(&self) -> &ComponentValidations {
        &self.unmapped
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty() && self.unmapped.is_empty()
    }

    /// Messages of every severity, mapped and unmapped.
    #[must_use]
    pub fn message_count(&self) -> usize {
        let mapped: usize = self
            .pages
            .values()
            .flat_map(BTreeMap::values)
            .flat_map(BTreeMap::values)
            .map(BindingValidation::message_count)
            .sum();
        let unmapped: usize = self
            .unmapped
            .values()
            .map(BindingValidation::message_count)
            .sum();
        mapped + unmapped
    }

    /// Unmapped error messages in field order.
    #[must_use]
    pub fn unmapped_errors(&self) -> Vec<String> {
        self.unmapped
            .values()
            .flat_map(|b| b.errors.iter().cloned())
            .collect()
    }

    /// Mapped error messages in page, component, binding order.
    #[must_use]
    pub fn mapped_errors(&self) -> Vec<FlatError> {
        let mut out = Vec::new();
        for (page, layout) in &self.pages {
            for (component_id, bindings) in layout {
                for message in bindings.values().flat_map(|b| b.errors.iter()) {
                    out.push(FlatError {
                        page: page.clone(),
                        component_id: component_id.clone(),
                        message: message.clone(),
                    });
                }
            }
        }
        out
    }
}

/// Merge local and server findings into per-component validations.
///
/// Frontend findings come first, then server findings; both are attributed
/// through `layouts` and the result is scoped with [`filter_by_page`].
#[must_use]
pub fn merge_findings(
    frontend: &[ValidationFinding],
    server: &[ValidationFinding],
    filter: PageFilter,
    current: &PageId,
    visible: &[PageId],
    layouts: &Layouts,
) -> Validations {
    let mut merged = Validations::new();
    for finding in frontend.iter().chain(server) {
        if finding.messages.is_empty() {
            continue;
        }
        let targets = layouts.attribute(&finding.field);
        if targets.is_empty() {
            tracing::trace!(field = %finding.field, "validation finding left unmapped");
            merged.add_unmapped(&finding.field, &finding.messages);
            continue;
        }
        for target in targets {
            merged.add(
                &target.page,
                &target.component_id,
                &target.binding_key,
                &finding.messages,
            );
        }
    }
    filter_by_page(&merged, filter, current, visible)
}

/// Keep only the pages selected by `filter`.
///
/// The unmapped bucket is not page-scoped and is always kept. `AllPages`
/// keeps every visible page, or every page when `visible` is empty. The
/// current page is kept by every filter.
#[must_use]
pub fn filter_by_page(
    validations: &Validations,
    filter: PageFilter,
    current: &PageId,
    visible: &[PageId],
) -> Validations {
    let mut keep: BTreeSet<&PageId> = BTreeSet::new();
    keep.insert(current);
    match filter {
        PageFilter::CurrentPage => {}
        PageFilter::CurrentAndPreviousPages => {
            if let Some(pos) = visible.iter().position(|p| p == current) {
                keep.extend(&visible[..pos]);
            }
        }
        PageFilter::AllPages => {
            if visible.is_empty() {
                keep.extend(validations.pages.keys());
            } else {
                keep.extend(visible);
            }
        }
    }

    Validations {
        pages: validations
            .pages
            .iter()
            .filter(|(page, _)| keep.contains(page))
            .map(|(page, layout)| (page.clone(), layout.clone()))
            .collect(),
        unmapped: validations.unmapped.clone(),
    }
}

/// True iff any mapped component has at least one error.
#[must_use]
pub fn contains_errors(validations: &Validations) -> bool {
    validations
        .pages
        .values()
        .flat_map(BTreeMap::values)
        .flat_map(BTreeMap::values)
        .any(BindingValidation::has_errors)
}
