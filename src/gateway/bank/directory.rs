//! Business directory: ledger handle → bank account of a registered business

use std::collections::HashMap;

use super::document::document_type_label;
use crate::config::BusinessConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusinessProfile {
    pub handle: String,
    pub name: String,
    pub account: String,
    pub document: String,
    /// Single-letter client document type (`N` = NIT)
    pub document_type: String,
}

impl BusinessProfile {
    pub fn document_label(&self) -> &'static str {
        document_type_label(&self.document_type)
    }
}

impl From<&BusinessConfig> for BusinessProfile {
    fn from(config: &BusinessConfig) -> Self {
        Self {
            handle: config.handle.clone(),
            name: config.name.clone(),
            account: config.account.clone(),
            document: config.document.clone(),
            document_type: config.document_type.clone(),
        }
    }
}

/// `bs:291003695@coopcentral` → `291003695`
fn bare_handle(identifier: &str) -> &str {
    let rest = identifier
        .split_once(':')
        .map_or(identifier, |(_, rest)| rest);
    rest.split_once('@').map_or(rest, |(id, _)| id)
}

#[derive(Debug, Default)]
pub struct BusinessDirectory {
    profiles: HashMap<String, BusinessProfile>,
}

impl BusinessDirectory {
    pub fn from_config(businesses: &[BusinessConfig]) -> Self {
        Self {
            profiles: businesses
                .iter()
                .map(|b| (bare_handle(&b.handle).to_string(), BusinessProfile::from(b)))
                .collect(),
        }
    }

    /// Look up by ledger identifier: `<schema>:<id>@<wallet>`, `<id>@<wallet>` or `<id>`
    pub fn resolve(&self, identifier: &str) -> Option<&BusinessProfile> {
        self.profiles.get(bare_handle(identifier))
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}
