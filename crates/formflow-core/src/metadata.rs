#![forbid(unsafe_code)]

//! Application metadata and instance lookups.

use serde::{Deserialize, Serialize};

/// Marker for a data type that holds form data (it has app logic attached).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppLogic {
    #[serde(default)]
    pub class_ref: Option<String>,
}

/// One data type declared by the application.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataType {
    pub id: String,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub app_logic: Option<AppLogic>,
}

impl DataType {
    #[must_use]
    pub fn form_data(id: impl Into<String>, task_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            task_id: Some(task_id.into()),
            app_logic: Some(AppLogic::default()),
        }
    }

    #[must_use]
    pub fn attachment(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            task_id: None,
            app_logic: None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationMetadata {
    pub id: String,
    #[serde(default)]
    pub data_types: Vec<DataType>,
}

impl ApplicationMetadata {
    /// Id of the form data type bound to `task_id`.
    #[must_use]
    pub fn data_type_for_task(&self, task_id: &str) -> Option<&str> {
        self.data_types
            .iter()
            .find(|dt| dt.app_logic.is_some() && dt.task_id.as_deref() == Some(task_id))
            .map(|dt| dt.id.as_str())
    }
}

/// A data element stored on an instance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataElement {
    pub id: String,
    pub data_type: String,
}

/// A running instance of the application.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    pub id: String,
    #[serde(default)]
    pub current_task: Option<String>,
    #[serde(default)]
    pub data: Vec<DataElement>,
}

impl Instance {
    /// Id of the data element holding form data for the current task.
    ///
    /// `None` when the instance has no current task, the task has no form
    /// data type, or no element of that type exists yet.
    #[must_use]
    pub fn current_task_data_element_id(&self, metadata: &ApplicationMetadata) -> Option<&str> {
        let task = self.current_task.as_deref()?;
        let data_type = metadata.data_type_for_task(task)?;
        self.data
            .iter()
            .find(|el| el.data_type == data_type)
            .map(|el| el.id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> ApplicationMetadata {
        ApplicationMetadata {
            id: "org/app".into(),
            data_types: vec![
                DataType::attachment("ref-data"),
                DataType::form_data("model", "Task_1"),
            ],
        }
    }

    #[test]
    fn resolves_current_task_element() {
        let instance = Instance {
            id: "512/abc".into(),
            current_task: Some("Task_1".into()),
            data: vec![
                DataElement {
                    id: "att".into(),
                    data_type: "ref-data".into(),
                },
                DataElement {
                    id: "d-1".into(),
                    data_type: "model".into(),
                },
            ],
        };
        assert_eq!(instance.current_task_data_element_id(&metadata()), Some("d-1"));
    }

    #[test]
    fn missing_task_or_element_is_none() {
        let mut instance = Instance {
            id: "512/abc".into(),
            current_task: None,
            data: vec![],
        };
        assert_eq!(instance.current_task_data_element_id(&metadata()), None);

        instance.current_task = Some("Task_1".into());
        assert_eq!(instance.current_task_data_element_id(&metadata()), None);

        instance.current_task = Some("Task_2".into());
        assert_eq!(instance.current_task_data_element_id(&metadata()), None);
    }

    #[test]
    fn deserializes_camel_case() {
        let json = r#"{"id":"o/a","dataTypes":[{"id":"m","taskId":"Task_1","appLogic":{}}]}"#;
        let md: ApplicationMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(md.data_type_for_task("Task_1"), Some("m"));
    }
}
