#![forbid(unsafe_code)]

//! Page identifiers, authored page order, and visible-order resolution.
//!
//! A form has an authored order of pages and a set of pages currently hidden
//! by conditional rules. Either may be unknown: the order before layout
//! settings are loaded, the hidden set before rules have run once. Unknown is
//! represented as `None` and is never conflated with an empty list.

use std::borrow::Borrow;
use std::collections::{BTreeSet, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque name of one page (layout) of a multi-page form.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageId(String);

impl PageId {
    /// Create a page identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PageId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for PageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Borrow<str> for PageId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for PageId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for PageId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Tests whether a page is currently hidden by conditional rendering rules.
pub trait VisibilityPredicate {
    /// Returns `true` if `page` must not be shown.
    fn is_hidden(&self, page: &PageId) -> bool;
}

impl<F> VisibilityPredicate for F
where
    F: Fn(&PageId) -> bool,
{
    fn is_hidden(&self, page: &PageId) -> bool {
        self(page)
    }
}

impl VisibilityPredicate for BTreeSet<PageId> {
    fn is_hidden(&self, page: &PageId) -> bool {
        self.contains(page)
    }
}

impl VisibilityPredicate for HashSet<PageId> {
    fn is_hidden(&self, page: &PageId) -> bool {
        self.contains(page)
    }
}

/// Produce the ordered list of pages that are not hidden.
///
/// Returns `None` when `config` is `None` (order not loaded yet). The result
/// is always a subsequence of `config` in the same relative order.
#[must_use]
pub fn resolve_visible_order<P>(config: Option<&[PageId]>, predicate: &P) -> Option<Vec<PageId>>
where
    P: VisibilityPredicate + ?Sized,
{
    let order = config?;
    Some(
        order
            .iter()
            .filter(|page| !predicate.is_hidden(page))
            .cloned()
            .collect(),
    )
}

/// Authored page order plus the rule engine's current hidden set.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PageOrder {
    order: Option<Vec<PageId>>,
    hidden: Option<BTreeSet<PageId>>,
}

impl PageOrder {
    /// Page order with nothing loaded.
    #[must_use]
    pub fn unloaded() -> Self {
        Self::default()
    }

    /// Page order with the authored order known and no rules evaluated yet.
    #[must_use]
    pub fn new<I, P>(order: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PageId>,
    {
        Self {
            order: Some(order.into_iter().map(Into::into).collect()),
            hidden: None,
        }
    }

    /// Set the hidden set (builder form).
    #[must_use]
    pub fn with_hidden<I, P>(mut self, hidden: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PageId>,
    {
        self.hidden = Some(hidden.into_iter().map(Into::into).collect());
        self
    }

    /// Replace the authored order.
    pub fn set_order(&mut self, order: Vec<PageId>) {
        self.order = Some(order);
    }

    /// Replace the hidden set after a rule evaluation.
    pub fn set_hidden(&mut self, hidden: BTreeSet<PageId>) {
        self.hidden = Some(hidden);
    }

    /// The authored order, or `None` if not loaded.
    #[must_use]
    pub fn all(&self) -> Option<&[PageId]> {
        self.order.as_deref()
    }

    /// The hidden set, or `None` if rules never ran.
    #[must_use]
    pub fn hidden(&self) -> Option<&BTreeSet<PageId>> {
        self.hidden.as_ref()
    }

    /// The visible page list.
    ///
    /// `None` until both the order is loaded and the rules have been evaluated
    /// at least once.
    #[must_use]
    pub fn visible(&self) -> Option<Vec<PageId>> {
        let hidden = self.hidden.as_ref()?;
        resolve_visible_order(self.all(), hidden)
    }

    /// Whether `page` is part of the authored order.
    #[must_use]
    pub fn contains(&self, page: &PageId) -> bool {
        self.order.as_ref().is_some_and(|o| o.contains(page))
    }

    /// The visible page following `current`, if any.
    #[must_use]
    pub fn next_visible(&self, current: &PageId) -> Option<PageId> {
        let visible = self.visible().or_else(|| self.order.clone())?;
        let idx = visible.iter().position(|p| p == current)?;
        visible.get(idx + 1).cloned()
    }
}
