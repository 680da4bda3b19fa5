#![forbid(unsafe_code)]

//! Visible-page recovery.
//!
//! When rules hide the page the user is on, the form moves to the next
//! visible page in authored order, wrapping around at the end.
//!
//! # Termination
//!
//! The walk keeps a set of candidates not yet tried, seeded from the authored
//! order. Each visited page is removed; the walk stops with the current page
//! unchanged as soon as the set is empty. At most `all.len()` pages are
//! visited, even when `visible` names pages that `all` does not contain.

use std::collections::BTreeSet;

use crate::page::PageId;

/// Result of a recovery walk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Recovery {
    /// The page to show.
    pub page: PageId,
    /// Candidates visited during the walk.
    pub steps: usize,
    /// `true` if `page` differs from the current page.
    pub changed: bool,
}

impl Recovery {
    fn unchanged(current: &PageId, steps: usize) -> Self {
        Self {
            page: current.clone(),
            steps,
            changed: false,
        }
    }
}

/// Find the page to show when `current` may have become hidden.
///
/// Returns `current` unchanged when either list is unknown, when `current`
/// is visible, or when no visible page is reachable through `all`.
#[must_use]
pub fn recover_visible_page(
    all: Option<&[PageId]>,
    visible: Option<&[PageId]>,
    current: &PageId,
) -> Recovery {
    let (Some(all), Some(visible)) = (all, visible) else {
        return Recovery::unchanged(current, 0);
    };
    if visible.contains(current) {
        return Recovery::unchanged(current, 0);
    }

    let mut untried: BTreeSet<&PageId> = all.iter().collect();
    let start = all.iter().position(|p| p == current).map_or(0, |i| i + 1);
    let mut steps = 0;

    for candidate in all.iter().cycle().skip(start) {
        if !untried.remove(candidate) {
            // Duplicate in the authored order; already tried.
            if untried.is_empty() {
                break;
            }
            continue;
        }
        steps += 1;
        if visible.contains(candidate) {
            tracing::debug!(from = %current, to = %candidate, steps, "recovered visible page");
            return Recovery {
                page: candidate.clone(),
                steps,
                changed: candidate != current,
            };
        }
        if untried.is_empty() {
            break;
        }
    }

    tracing::debug!(page = %current, steps, "no visible page reachable");
    Recovery::unchanged(current, steps)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pages(ids: &[&str]) -> Vec<PageId> {
        ids.iter().map(|s| PageId::from(*s)).collect()
    }

    #[test]
    fn hidden_current_moves_to_next_visible() {
        let all = pages(&["p1", "p2", "p3"]);
        let visible = pages(&["p1", "p3"]);
        let r = recover_visible_page(Some(&all), Some(&visible), &"p2".into());
        assert_eq!(r.page, "p3");
        assert!(r.changed);
        assert_eq!(r.steps, 1);
    }

    #[test]
    fn wraps_to_start() {
        let all = pages(&["p1", "p2", "p3"]);
        let visible = pages(&["p1"]);
        let r = recover_visible_page(Some(&all), Some(&visible), &"p3".into());
        assert_eq!(r.page, "p1");
        assert!(r.changed);
    }

    #[test]
    fn visible_current_is_noop() {
        let all = pages(&["p1", "p2"]);
        let r = recover_visible_page(Some(&all), Some(&all), &"p2".into());
        assert_eq!(r.page, "p2");
        assert!(!r.changed);
        assert_eq!(r.steps, 0);
    }

    #[test]
    fn unknown_lists_are_noop() {
        let all = pages(&["p1"]);
        assert!(!recover_visible_page(None, Some(&all), &"p1".into()).changed);
        assert!(!recover_visible_page(Some(&all), None, &"x".into()).changed);
    }

    #[test]
    fn disjoint_lists_terminate_unchanged() {
        let all = pages(&["p1", "p2", "p3"]);
        let visible = pages(&["q1", "q2"]);
        let r = recover_visible_page(Some(&all), Some(&visible), &"p2".into());
        assert_eq!(r.page, "p2");
        assert!(!r.changed);
        assert!(r.steps <= all.len());
    }

    #[test]
    fn empty_visible_list_terminates() {
        let all = pages(&["p1", "p2"]);
        let r = recover_visible_page(Some(&all), Some(&[][..]), &"p1".into());
        assert!(!r.changed);
        assert_eq!(r.steps, 2);
    }

    #[test]
    fn duplicates_in_authored_order_terminate() {
        let all = pages(&["p1", "p1", "p2", "p2"]);
        let visible = pages(&["zz"]);
        let r = recover_visible_page(Some(&all), Some(&visible), &"p1".into());
        assert!(!r.changed);
        assert!(r.steps <= all.len());
    }

    #[test]
    fn current_outside_authored_order_starts_at_head() {
        let all = pages(&["p1", "p2"]);
        let visible = pages(&["p2"]);
        let r = recover_visible_page(Some(&all), Some(&visible), &"gone".into());
        assert_eq!(r.page, "p2");
    }
}
