//! Table-level access grants for sensitive tables

use crate::config::SecurityConfig;
use std::collections::{HashMap, HashSet};

/// Lowercased view of the configured sensitive tables and per-user grants
#[derive(Debug, Clone, Default)]
pub struct AccessControl {
    sensitive_tables: HashSet<String>,
    grants: HashMap<String, HashSet<String>>,
}

impl AccessControl {
    pub fn from_config(config: &SecurityConfig) -> Self {
        Self {
            sensitive_tables: config
                .sensitive_tables
                .iter()
                .map(|t| t.to_lowercase())
                .collect(),
            grants: config
                .grants
                .iter()
                .map(|(user, tables)| {
                    (
                        user.clone(),
                        tables.iter().map(|t| t.to_lowercase()).collect(),
                    )
                })
                .collect(),
        }
    }

    pub fn is_sensitive(&self, table: &str) -> bool {
        self.sensitive_tables.contains(&table.to_lowercase())
    }

    pub fn has_grant(&self, user_id: &str, table: &str) -> bool {
        self.grants
            .get(user_id)
            .map_or(false, |tables| tables.contains(&table.to_lowercase()))
    }

    /// Sensitive tables among `tables` the user holds no grant for
    pub fn missing_grants<'a>(
        &self,
        user_id: &str,
        tables: impl IntoIterator<Item = &'a str>,
    ) -> Vec<String> {
        let mut missing: Vec<String> = tables
            .into_iter()
            .filter(|t| self.is_sensitive(t) && !self.has_grant(user_id, t))
            .map(|t| t.to_lowercase())
            .collect();
        missing.sort();
        missing.dedup();
        missing
    }

    pub fn has_sensitive_tables(&self) -> bool {
        !self.sensitive_tables.is_empty()
    }
}
