// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Key directory validation.

use crate::error::{Result, TangError};
use std::collections::BTreeSet;

const DEFAULT_FORBIDDEN: [&str; 3] = [".", "..", "lost+found"];

/// Path components that may never appear in a key directory.
///
/// Built once at startup from the defaults plus any configured extensions and
/// handed to whoever validates paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForbiddenPaths {
    entries: BTreeSet<String>,
}

impl Default for ForbiddenPaths {
    fn default() -> Self {
        Self {
            entries: DEFAULT_FORBIDDEN.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl ForbiddenPaths {
    /// Defaults extended with additional entries
    pub fn with_extra<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut paths = Self::default();
        paths.entries.extend(extra.into_iter().map(Into::into));
        paths
    }

    pub fn contains(&self, component: &str) -> bool {
        self.entries.contains(component)
    }

    /// Reject a single candidate path segment
    pub fn validate_component(&self, component: &str) -> Result<()> {
        if self.contains(component) {
            return Err(TangError::InvalidSpec(format!(
                "key path component '{}' is not allowed",
                component
            )));
        }
        Ok(())
    }

    /// Validate a key directory before it is used as a mount path.
    ///
    /// Empty paths are accepted, they select the default key directory.
    pub fn validate_key_path(&self, path: &str) -> Result<()> {
        if path.is_empty() {
            return Ok(());
        }
        if !path.starts_with('/') {
            return Err(TangError::InvalidSpec(format!(
                "key path '{}' must be absolute",
                path
            )));
        }
        if path.split('/').all(|c| c.is_empty()) {
            return Err(TangError::InvalidSpec(
                "key path must not be the filesystem root".to_string(),
            ));
        }
        path.split('/')
            .filter(|c| !c.is_empty())
            .try_for_each(|c| self.validate_component(c))
    }
}
