#![forbid(unsafe_code)]

//! Server validation issues and their translation into findings.
//!
//! The validation endpoint returns a flat list of issues. Each issue names a
//! data model field (or a file upload component id), a code, a description
//! text key, and a numeric severity.
//!
//! | Severity        | Bucket     |
//! |-----------------|------------|
//! | `Error`         | `errors`   |
//! | `Warning`       | `warnings` |
//! | `Informational` | `info`     |
//! | `Success`       | `success`  |
//! | `Fixed`, other  | dropped    |
//!
//! Issues with code `required` whose description differs from the code are
//! dropped: the required check already runs locally and would otherwise
//! report the same field twice.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::validation::{BindingValidation, Severity, ValidationFinding};

const REQUIRED_CODE: &str = "required";

/// One issue as returned by the remote validation endpoint.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendValidationIssue {
    #[serde(default, alias = "dataBindingName")]
    pub field: Option<String>,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub severity: Severity,
}

impl BackendValidationIssue {
    #[must_use]
    pub fn new(field: impl Into<String>, severity: Severity, code: impl Into<String>) -> Self {
        let code = code.into();
        Self {
            field: Some(field.into()),
            description: code.clone(),
            code,
            severity,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    fn is_duplicate_required(&self) -> bool {
        self.code == REQUIRED_CODE && self.description != self.code
    }
}

/// Text resource lookup for issue descriptions.
///
/// A description that is not a known key is shown as-is.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextResources {
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub entries: BTreeMap<String, String>,
}

impl TextResources {
    #[must_use]
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            entries: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    /// Resolve `key`, falling back to the key itself.
    #[must_use]
    pub fn resolve<'a>(&'a self, key: &'a str) -> &'a str {
        self.entries.get(key).map_or(key, String::as_str)
    }
}

/// Translate server issues into findings, preserving input order.
///
/// Issues without a field are skipped. Issues whose severity has no bucket
/// are skipped.
#[must_use]
pub fn map_backend_issues(
    issues: &[BackendValidationIssue],
    texts: &TextResources,
) -> Vec<ValidationFinding> {
    let mut findings = Vec::with_capacity(issues.len());
    for issue in issues {
        let Some(field) = issue.field.as_deref() else {
            tracing::debug!(code = %issue.code, "validation issue without field skipped");
            continue;
        };
        if issue.is_duplicate_required() {
            continue;
        }
        let message = texts.resolve(&issue.description).to_owned();
        let mut messages = BindingValidation::default();
        match issue.severity {
            Severity::Error => messages.errors.push(message),
            Severity::Warning => messages.warnings.push(message),
            Severity::Informational => messages.info.push(message),
            Severity::Success => messages.success.push(message),
            Severity::Fixed | Severity::Unspecified => continue,
        }
        findings.push(ValidationFinding {
            field: field.to_owned(),
            messages,
        });
    }
    findings
}
