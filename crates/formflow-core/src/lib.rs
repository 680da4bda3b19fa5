#![forbid(unsafe_code)]

//! Core: page order, component bindings, validation merging, and page recovery.
//!
//! Everything in this crate is a pure function of its inputs. The runtime
//! crate owns state, suspension, and side effects; it calls into these
//! modules at each step of a page transition.
//!
//! # Key Components
//!
//! - [`resolve_visible_order`] - Authored page order filtered by visibility rules
//! - [`merge_findings`] - Local + server findings merged into per-component validations
//! - [`map_backend_issues`] - Server issues translated into findings
//! - [`recover_visible_page`] - Nearest visible page after the current one is hidden

pub mod issue_map;
pub mod layout;
pub mod metadata;
pub mod page;
pub mod recovery;
pub mod validation;

pub use issue_map::{BackendValidationIssue, TextResources, map_backend_issues};
pub use layout::{
    Component, ComponentKind, FormData, FrontendValidator, LayoutNode, LayoutNodes, Layouts,
    RequiredFieldValidator,
};
pub use metadata::{ApplicationMetadata, DataElement, DataType, Instance};
pub use page::{PageId, PageOrder, VisibilityPredicate, resolve_visible_order};
pub use recovery::{Recovery, recover_visible_page};
pub use validation::{
    BindingValidation, ComponentValidations, FlatError, LayoutValidations, PageFilter, Severity,
    ValidationFinding, ValidationTrigger, Validations, contains_errors, filter_by_page,
    merge_findings,
};
