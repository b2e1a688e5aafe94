use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

/// Read-only custom-name to upstream-name model table. Built once from the
/// gateway configuration; resolution fails closed so an unmapped model never
/// reaches the upstream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelMap {
    entries: BTreeMap<String, String>,
}

impl ModelMap {
    pub fn new(entries: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    pub fn resolve(&self, model: &str) -> Result<&str, GatewayError> {
        self.entries
            .get(model)
            .map(String::as_str)
            .ok_or_else(|| GatewayError::UnknownModel(model.to_string()))
    }
}
