#![forbid(unsafe_code)]

//! System-failure errors raised while processing a navigation request.
//!
//! Benign rejections (hidden target, blocking validation errors, superseded
//! requests) are not errors; they carry a
//! [`RejectReason`](crate::gate::RejectReason) only.

use std::fmt;
use std::time::Duration;

use formflow_core::PageId;

/// An unexpected failure that rejects a navigation and is reported to the
/// error sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationError {
    /// Network or HTTP-level failure talking to a remote endpoint.
    Transport(String),
    /// The endpoint did not answer within the configured timeout.
    Timeout(Duration),
    /// The endpoint answered with a body that could not be decoded.
    MalformedResponse(String),
    /// State required for this step has not been loaded.
    MissingState(&'static str),
    /// The target is not part of the authored page order.
    UnknownPage(PageId),
}

impl fmt::Display for NavigationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NavigationError::Transport(msg) => write!(f, "transport error: {msg}"),
            NavigationError::Timeout(after) => {
                write!(f, "request timed out after {}ms", after.as_millis())
            }
            NavigationError::MalformedResponse(msg) => write!(f, "malformed response: {msg}"),
            NavigationError::MissingState(what) => write!(f, "missing state: {what}"),
            NavigationError::UnknownPage(page) => write!(f, "unknown page: {page}"),
        }
    }
}

impl std::error::Error for NavigationError {}

/// Result type for navigation steps that can fail.
pub type NavigationResult<T> = Result<T, NavigationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_failure() {
        assert_eq!(
            NavigationError::Timeout(Duration::from_millis(1500)).to_string(),
            "request timed out after 1500ms"
        );
        assert_eq!(
            NavigationError::UnknownPage("nope".into()).to_string(),
            "unknown page: nope"
        );
        assert_eq!(
            NavigationError::MissingState("current view").to_string(),
            "missing state: current view"
        );
    }
}
