use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Key/value pairs of a submitted `application/x-www-form-urlencoded` body,
/// in the order they were sent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormData {
    pairs: Vec<(String, String)>,
}

impl FormData {
    pub fn new(pairs: Vec<(String, String)>) -> Self {
        Self { pairs }
    }

    /// Last value submitted for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Fields submitted as `FormName[field]=value`, keyed by `field`.
    /// Later duplicates win.
    pub fn scoped(&self, form_name: &str) -> BTreeMap<String, String> {
        let mut fields = BTreeMap::new();
        for (key, value) in &self.pairs {
            let Some(rest) = key.strip_prefix(form_name) else {
                continue;
            };
            let Some(field) = rest.strip_prefix('[').and_then(|r| r.strip_suffix(']')) else {
                continue;
            };
            if field.is_empty() || field.contains(['[', ']']) {
                continue;
            }
            fields.insert(field.to_string(), value.clone());
        }
        fields
    }
}

/// Snapshot of a form instance as the view and the flash store see it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormModel {
    pub name: String,
    pub fields: BTreeMap<String, String>,
    pub errors: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

impl FormModel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn has_errors(&self) -> bool {
        self.errors.values().any(|e| !e.is_empty())
    }

    pub fn first_error(&self, field: &str) -> Option<&str> {
        self.errors
            .get(field)
            .and_then(|e| e.first())
            .map(String::as_str)
    }
}

/// A request-scoped form that binds submitted data and performs a download.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DownloadForm: Send {
    /// Bind `data` and validate it. `false` when nothing for this form was
    /// submitted or validation failed; errors stay on the instance.
    fn load(&mut self, data: &FormData) -> bool;

    /// Run the download. `Ok(false)` is an ordinary failure reported on the
    /// form itself.
    async fn download(&mut self) -> Result<bool>;

    fn model(&self) -> FormModel;
}

/// Creates a fresh form for every request.
pub trait FormFactory: Send + Sync {
    fn create(&self) -> Box<dyn DownloadForm>;
}

impl<F> FormFactory for F
where
    F: Fn() -> Box<dyn DownloadForm> + Send + Sync,
{
    fn create(&self) -> Box<dyn DownloadForm> {
        self()
    }
}
