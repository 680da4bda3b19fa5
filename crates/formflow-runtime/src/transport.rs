#![forbid(unsafe_code)]

//! Remote validation and page-order endpoints.
//!
//! The gate calls a [`ValidationClient`] from a background task. The HTTP
//! implementation (feature `http`) issues
//! `GET {base}/instances/{instanceId}/data/{dataId}/validate` and sends the
//! `LayoutId` header only when the request is scoped to one page.
//!
//! A [`PageOrderClient`] asks the app to recompute the page order before a
//! "next page" move:
//! `POST {base}/instances/{instanceId}/pages/order?currentPage=..&layoutSetId=..&dataTypeId=..`
//! with the form data as the JSON body. An app without the endpoint answers
//! 404, reported as `Ok(None)`.

use formflow_core::{BackendValidationIssue, FormData, PageId};

use crate::error::NavigationResult;

/// Parameters of one remote validation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationRequest {
    pub instance_id: String,
    pub data_element_id: String,
    /// Restricts server validation to one page.
    pub layout_id: Option<PageId>,
}

/// Fetches server validation issues. Called off the model thread.
pub trait ValidationClient: Send + Sync {
    fn fetch_validations(
        &self,
        request: &ValidationRequest,
    ) -> NavigationResult<Vec<BackendValidationIssue>>;
}

impl<F> ValidationClient for F
where
    F: Fn(&ValidationRequest) -> NavigationResult<Vec<BackendValidationIssue>> + Send + Sync,
{
    fn fetch_validations(
        &self,
        request: &ValidationRequest,
    ) -> NavigationResult<Vec<BackendValidationIssue>> {
        self(request)
    }
}

/// Parameters of one page-order calculation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageOrderRequest {
    pub instance_id: String,
    pub current_page: Option<PageId>,
    pub layout_set_id: Option<String>,
    pub data_type_id: Option<String>,
    pub form_data: FormData,
}

/// Recomputes the authored page order. Called off the model thread.
///
/// `Ok(None)` means the app does not calculate page order; the current
/// order stands.
pub trait PageOrderClient: Send + Sync {
    fn calculate_page_order(
        &self,
        request: &PageOrderRequest,
    ) -> NavigationResult<Option<Vec<PageId>>>;
}

impl<F> PageOrderClient for F
where
    F: Fn(&PageOrderRequest) -> NavigationResult<Option<Vec<PageId>>> + Send + Sync,
{
    fn calculate_page_order(
        &self,
        request: &PageOrderRequest,
    ) -> NavigationResult<Option<Vec<PageId>>> {
        self(request)
    }
}

#[cfg(feature = "http")]
mod http {
    use std::io;
    use std::time::Duration;

    use formflow_core::{BackendValidationIssue, PageId};

    use super::{PageOrderClient, PageOrderRequest, ValidationClient, ValidationRequest};
    use crate::error::{NavigationError, NavigationResult};
    use crate::program::ProgramConfig;

    /// Blocking HTTP client for the validation and page-order endpoints.
    #[derive(Debug, Clone)]
    pub struct HttpValidationClient {
        base_url: String,
        timeout: Duration,
        agent: ureq::Agent,
    }

    impl HttpValidationClient {
        #[must_use]
        pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
            let agent = ureq::AgentBuilder::new()
                .timeout_connect(timeout)
                .timeout_read(timeout)
                .timeout_write(timeout)
                .build();
            Self {
                base_url: base_url.into().trim_end_matches('/').to_owned(),
                timeout,
                agent,
            }
        }

        /// Client using the configured validation timeout.
        #[must_use]
        pub fn from_config(base_url: impl Into<String>, config: &ProgramConfig) -> Self {
            Self::new(base_url, config.validation_timeout)
        }

        #[must_use]
        pub fn url_for(&self, request: &ValidationRequest) -> String {
            format!(
                "{}/instances/{}/data/{}/validate",
                self.base_url, request.instance_id, request.data_element_id
            )
        }

        #[must_use]
        pub fn page_order_url(&self, request: &PageOrderRequest) -> String {
            format!("{}/instances/{}/pages/order", self.base_url, request.instance_id)
        }

        fn classify_transport(&self, err: &ureq::Transport) -> NavigationError {
            let timed_out = std::error::Error::source(err)
                .and_then(|s| s.downcast_ref::<io::Error>())
                .is_some_and(|e| {
                    matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock)
                });
            if timed_out {
                NavigationError::Timeout(self.timeout)
            } else {
                NavigationError::Transport(err.to_string())
            }
        }
    }

    impl ValidationClient for HttpValidationClient {
        fn fetch_validations(
            &self,
            request: &ValidationRequest,
        ) -> NavigationResult<Vec<BackendValidationIssue>> {
            let url = self.url_for(request);
            let mut call = self.agent.get(&url).set("Accept", "application/json");
            if let Some(layout) = &request.layout_id {
                call = call.set("LayoutId", layout.as_str());
            }
            tracing::debug!(%url, layout = ?request.layout_id, "fetching server validations");

            let response = match call.call() {
                Ok(resp) => resp,
                Err(ureq::Error::Status(code, _)) => {
                    return Err(NavigationError::Transport(format!("HTTP {code} from {url}")));
                }
                Err(ureq::Error::Transport(err)) => return Err(self.classify_transport(&err)),
            };
            let body = response
                .into_string()
                .map_err(|e| NavigationError::Transport(format!("failed to read body: {e}")))?;
            serde_json::from_str(&body).map_err(|e| NavigationError::MalformedResponse(e.to_string()))
        }
    }

    impl PageOrderClient for HttpValidationClient {
        fn calculate_page_order(
            &self,
            request: &PageOrderRequest,
        ) -> NavigationResult<Option<Vec<PageId>>> {
            let url = self.page_order_url(request);
            let mut call = self
                .agent
                .post(&url)
                .set("Accept", "application/json")
                .set("Content-Type", "application/json");
            if let Some(page) = &request.current_page {
                call = call.query("currentPage", page.as_str());
            }
            if let Some(layout_set) = &request.layout_set_id {
                call = call.query("layoutSetId", layout_set);
            }
            if let Some(data_type) = &request.data_type_id {
                call = call.query("dataTypeId", data_type);
            }
            let body = serde_json::to_string(&request.form_data)
                .map_err(|e| NavigationError::Transport(format!("failed to encode form data: {e}")))?;
            tracing::debug!(%url, current = ?request.current_page, "calculating page order");

            let response = match call.send_string(&body) {
                Ok(resp) => resp,
                Err(ureq::Error::Status(404, _)) => {
                    tracing::debug!(%url, "page order endpoint not implemented");
                    return Ok(None);
                }
                Err(ureq::Error::Status(code, _)) => {
                    return Err(NavigationError::Transport(format!("HTTP {code} from {url}")));
                }
                Err(ureq::Error::Transport(err)) => return Err(self.classify_transport(&err)),
            };
            let body = response
                .into_string()
                .map_err(|e| NavigationError::Transport(format!("failed to read body: {e}")))?;
            serde_json::from_str(&body)
                .map(Some)
                .map_err(|e| NavigationError::MalformedResponse(e.to_string()))
        }
    }

}

#[cfg(feature = "http")]
pub use http::HttpValidationClient;
