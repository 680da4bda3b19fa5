#![forbid(unsafe_code)]

//! Form layouts, component data bindings, and the resolved node set.
//!
//! A layout is the list of components shown on one page. Components declare
//! data model bindings (binding key -> data model path); validation findings
//! are attributed to components through those paths.
//!
//! # Attribution rules
//!
//! | Component | Matches when |
//! |-----------|--------------|
//! | `FileUpload`, `FileUploadWithTag` | field equals the component id, optionally suffixed with `-N` row indices |
//! | anything else | a binding path equals the field, case-insensitively, with `[N]` indices stripped |
//!
//! Only the first matching component on each page is used. A field inside a
//! repeating group (`people[2].name`) is attributed to the row component
//! `"{id}-2"`.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::page::PageId;
use crate::validation::{BindingValidation, ValidationFinding};

/// Binding key used for findings attributed to file-upload components.
pub const SIMPLE_BINDING: &str = "simpleBinding";

/// Component type, as far as validation attribution cares.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComponentKind {
    FileUpload,
    FileUploadWithTag,
    Group,
    #[default]
    #[serde(other)]
    Other,
}

impl ComponentKind {
    /// File uploaders are matched on component id rather than data binding.
    #[must_use]
    pub fn is_file_upload(self) -> bool {
        matches!(self, Self::FileUpload | Self::FileUploadWithTag)
    }
}

/// One component of a page layout.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Component {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: ComponentKind,
    /// Binding key (e.g. `simpleBinding`) -> data model path.
    #[serde(default)]
    pub data_model_bindings: BTreeMap<String, String>,
    #[serde(default)]
    pub required: bool,
}

impl Component {
    /// Create a component with no bindings.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Add a data model binding (builder form).
    #[must_use]
    pub fn with_binding(mut self, key: impl Into<String>, path: impl Into<String>) -> Self {
        self.data_model_bindings.insert(key.into(), path.into());
        self
    }

    /// Set the component kind (builder form).
    #[must_use]
    pub fn with_kind(mut self, kind: ComponentKind) -> Self {
        self.kind = kind;
        self
    }

    /// Mark the component as required (builder form).
    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// Where a validation field landed: page, component id, and binding key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attribution {
    pub page: PageId,
    pub component_id: String,
    pub binding_key: String,
}

/// All page layouts of a form, keyed by page.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Layouts {
    pages: BTreeMap<PageId, Vec<Component>>,
}

impl Layouts {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a page layout (builder form).
    #[must_use]
    pub fn with_page(mut self, page: impl Into<PageId>, components: Vec<Component>) -> Self {
        self.pages.insert(page.into(), components);
        self
    }

    /// Add or replace a page layout.
    pub fn insert(&mut self, page: PageId, components: Vec<Component>) {
        self.pages.insert(page, components);
    }

    /// Components on `page`; empty if the page has no layout.
    #[must_use]
    pub fn components(&self, page: &PageId) -> &[Component] {
        self.pages.get(page).map_or(&[][..], Vec::as_slice)
    }

    /// Iterate pages in key order.
    pub fn pages(&self) -> impl Iterator<Item = (&PageId, &[Component])> {
        self.pages.iter().map(|(p, c)| (p, c.as_slice()))
    }

    /// Find the page that owns a component.
    #[must_use]
    pub fn page_of(&self, component_id: &str) -> Option<&PageId> {
        self.pages
            .iter()
            .find(|(_, comps)| comps.iter().any(|c| c.id == component_id))
            .map(|(page, _)| page)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Attribute a validation field to components.
    ///
    /// Returns one entry per matching binding, across every page that has a
    /// matching component. Empty when nothing matches (the finding is then
    /// unmapped).
    #[must_use]
    pub fn attribute(&self, field: &str) -> Vec<Attribution> {
        let mut found = Vec::new();
        if field.is_empty() {
            return found;
        }

        let lowered = strip_indices(&field.to_lowercase());
        let index = repeating_index(field);

        for (page, components) in &self.pages {
            for component in components {
                if component.kind.is_file_upload() {
                    if matches_component_id(field, &component.id) {
                        found.push(Attribution {
                            page: page.clone(),
                            component_id: field.to_owned(),
                            binding_key: SIMPLE_BINDING.to_owned(),
                        });
                        break;
                    }
                    continue;
                }

                let keys: Vec<&String> = component
                    .data_model_bindings
                    .iter()
                    .filter(|(_, path)| path.to_lowercase() == lowered)
                    .map(|(key, _)| key)
                    .collect();
                if keys.is_empty() {
                    continue;
                }

                let component_id = match &index {
                    Some(idx) => format!("{}-{idx}", component.id),
                    None => component.id.clone(),
                };
                found.extend(keys.into_iter().map(|key| Attribution {
                    page: page.clone(),
                    component_id: component_id.clone(),
                    binding_key: key.clone(),
                }));
                break;
            }
        }
        found
    }
}

/// Remove repeating-group indices: `a[0].b[12].c` -> `a.b.c`.
#[must_use]
pub fn strip_indices(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut depth = 0usize;
    for ch in field.chars() {
        match ch {
            '[' => depth += 1,
            ']' if depth > 0 => depth -= 1,
            _ if depth == 0 => out.push(ch),
            _ => {}
        }
    }
    out
}

/// Row indices of a repeating-group field joined by `-`: `a[0].b[12]` -> `0-12`.
#[must_use]
pub fn repeating_index(field: &str) -> Option<String> {
    let mut indices = Vec::new();
    let mut rest = field;
    while let Some(start) = rest.find('[') {
        let after = &rest[start + 1..];
        let end = after.find(']')?;
        indices.push(&after[..end]);
        rest = &after[end + 1..];
    }
    if indices.is_empty() {
        None
    } else {
        Some(indices.join("-"))
    }
}

/// `field` is `id` or `id` followed by `-N` row suffixes.
fn matches_component_id(field: &str, id: &str) -> bool {
    let Some(rest) = field.strip_prefix(id) else {
        return false;
    };
    if rest.is_empty() {
        return true;
    }
    rest.strip_prefix('-').is_some_and(|suffix| {
        suffix
            .split('-')
            .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()))
    })
}

/// Flat form data: data model path -> value.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FormData {
    values: BTreeMap<String, String>,
}

impl FormData {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a value (builder form).
    #[must_use]
    pub fn with(mut self, path: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(path.into(), value.into());
        self
    }

    pub fn set(&mut self, path: impl Into<String>, value: impl Into<String>) {
        self.values.insert(path.into(), value.into());
    }

    #[must_use]
    pub fn get(&self, path: &str) -> Option<&str> {
        self.values.get(path).map(String::as_str)
    }

    /// A path is empty when missing or whitespace-only.
    #[must_use]
    pub fn is_empty_at(&self, path: &str) -> bool {
        self.get(path).is_none_or(|v| v.trim().is_empty())
    }
}

/// A component as resolved for the current visibility state.
#[derive(Clone, Copy, Debug)]
pub struct LayoutNode<'a> {
    pub page: &'a PageId,
    pub component: &'a Component,
}

/// Per-node validation rule run against the resolved nodes.
pub trait FrontendValidator {
    /// Produce findings for one node. Fields should be data model paths so
    /// the merge engine can attribute them back to components.
    fn validate(&self, node: LayoutNode<'_>, data: &FormData) -> Vec<ValidationFinding>;
}

impl<F> FrontendValidator for F
where
    F: Fn(LayoutNode<'_>, &FormData) -> Vec<ValidationFinding>,
{
    fn validate(&self, node: LayoutNode<'_>, data: &FormData) -> Vec<ValidationFinding> {
        self(node, data)
    }
}

/// Flags required components whose bound value is empty.
#[derive(Clone, Debug)]
pub struct RequiredFieldValidator {
    message: String,
}

impl RequiredFieldValidator {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Default for RequiredFieldValidator {
    fn default() -> Self {
        Self::new("Field is required")
    }
}

impl FrontendValidator for RequiredFieldValidator {
    fn validate(&self, node: LayoutNode<'_>, data: &FormData) -> Vec<ValidationFinding> {
        let component = node.component;
        if !component.required || component.kind.is_file_upload() {
            return Vec::new();
        }
        component
            .data_model_bindings
            .values()
            .filter(|path| data.is_empty_at(path))
            .map(|path| ValidationFinding {
                field: path.clone(),
                messages: BindingValidation::from_error(self.message.clone()),
            })
            .collect()
    }
}

/// The resolved node set: components on visible pages, minus hidden components.
#[derive(Debug)]
pub struct LayoutNodes<'a> {
    layouts: &'a Layouts,
    pages: Vec<&'a PageId>,
    hidden_components: BTreeSet<String>,
}

impl<'a> LayoutNodes<'a> {
    /// Resolve nodes for the given visible pages.
    ///
    /// When `visible` is `None` (rules not evaluated yet) every page with a
    /// layout is included.
    #[must_use]
    pub fn resolve(layouts: &'a Layouts, visible: Option<&[PageId]>) -> Self {
        let pages = layouts
            .pages
            .keys()
            .filter(|page| visible.is_none_or(|v| v.contains(*page)))
            .collect();
        Self {
            layouts,
            pages,
            hidden_components: BTreeSet::new(),
        }
    }

    /// Exclude components hidden by component-level rules (builder form).
    #[must_use]
    pub fn with_hidden_components<I>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        self.hidden_components.extend(ids);
        self
    }

    /// Iterate the resolved nodes in page key order, then layout order.
    pub fn iter(&self) -> impl Iterator<Item = LayoutNode<'a>> + '_ {
        self.pages.iter().flat_map(move |page| {
            self.layouts
                .components(page)
                .iter()
                .filter(move |c| !self.hidden_components.contains(&c.id))
                .map(move |component| LayoutNode {
                    page: *page,
                    component,
                })
        })
    }

    /// Run `validator` over every node and collect the findings in node order.
    #[must_use]
    pub fn run_validations(
        &self,
        validator: &dyn FrontendValidator,
        data: &FormData,
    ) -> Vec<ValidationFinding> {
        self.iter()
            .flat_map(|node| validator.validate(node, data))
            .collect()
    }
}
