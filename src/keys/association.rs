// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Signing/exchange key pairs and the per-replica key status file.

use crate::constants::key_files;
use crate::error::{Result, TangError};
use serde::{Deserialize, Serialize};

/// A signing key paired with the exchange key advertised alongside it.
///
/// Thumbprints are those of the signing key's public members.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct KeyAssociation {
    pub sha1: String,
    pub sha256: String,
    pub signing_key: String,
    pub encryption_key: String,
}

impl KeyAssociation {
    /// Only associations with both files may be advertised
    pub fn is_valid(&self) -> bool {
        !self.signing_key.is_empty() && !self.encryption_key.is_empty()
    }

    /// Identity used to merge status files
    pub fn identity(&self) -> (&str, &str) {
        (&self.sha1, &self.sha256)
    }
}

/// An association together with where it is recorded
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KeyAssociationInfo {
    pub association: KeyAssociation,
    pub pod: String,
    pub namespace: String,
    pub key_dir: String,
    /// Name of the owning TangServer
    pub owner: String,
}

impl KeyAssociationInfo {
    /// Status file location of one replica, before any association is attached
    pub fn at(pod: &str, namespace: &str, key_dir: &str, owner: &str) -> Self {
        Self {
            association: KeyAssociation::default(),
            pod: pod.to_string(),
            namespace: namespace.to_string(),
            key_dir: key_dir.to_string(),
            owner: owner.to_string(),
        }
    }

    /// The same location recording the given association
    pub fn recording(&self, association: KeyAssociation) -> Self {
        Self {
            association,
            ..self.clone()
        }
    }

    pub fn status_file_path(&self) -> String {
        status_file_path(&self.key_dir)
    }

    pub fn lock_file_path(&self) -> String {
        lock_file_path(&self.key_dir)
    }
}

/// Path of the key status file inside a key directory
pub fn status_file_path(key_dir: &str) -> String {
    format!(
        "{}/{}",
        key_dir.trim_end_matches('/'),
        key_files::STATUS_FILE
    )
}

/// Path of the lock file kept beside the key status file
pub fn lock_file_path(key_dir: &str) -> String {
    format!("{}{}", status_file_path(key_dir), key_files::LOCK_SUFFIX)
}

/// Serialize associations in status file format
pub fn encode(associations: &[KeyAssociation]) -> Result<String> {
    serde_json::to_string_pretty(associations).map_err(|e| TangError::KeyStatus(e.to_string()))
}

/// Parse a status file, an empty file holds no associations
pub fn decode(content: &str) -> Result<Vec<KeyAssociation>> {
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(content).map_err(|e| TangError::KeyStatus(e.to_string()))
}

/// Union of two association lists by identity.
///
/// Entries already recorded keep their position; an incoming entry with a
/// known identity updates the file names it carries, e.g. after hiding.
pub fn merge(recorded: &[KeyAssociation], incoming: &[KeyAssociation]) -> Vec<KeyAssociation> {
    let mut merged = recorded.to_vec();
    for assoc in incoming {
        match merged
            .iter_mut()
            .find(|m| m.identity() == assoc.identity())
        {
            Some(existing) => {
                if !assoc.signing_key.is_empty() {
                    existing.signing_key = assoc.signing_key.clone();
                }
                if !assoc.encryption_key.is_empty() {
                    existing.encryption_key = assoc.encryption_key.clone();
                }
            }
            None => merged.push(assoc.clone()),
        }
    }
    merged
}
