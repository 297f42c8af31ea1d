// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Classification of discovered key pairs and the rotation/health decisions
//! derived from them.

use super::association::KeyAssociation;
use super::jwk::{parse_key, KeyRole, TangKey};
use crate::constants::{key_files, timers};
use crate::error::{Result, TangError};
use crate::types::{HiddenKey, TangServerError, TangServerKey};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::warn;

/// Which keys are advertised
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAdvertising {
    AllKeys,
    OnlyAdvertised,
    OnlyUnadvertised,
    Unknown,
}

impl KeyAdvertising {
    pub fn parse(mode: &str) -> Self {
        match mode {
            "" | "advertised" => KeyAdvertising::OnlyAdvertised,
            "all" => KeyAdvertising::AllKeys,
            "unadvertised" => KeyAdvertising::OnlyUnadvertised,
            _ => KeyAdvertising::Unknown,
        }
    }

    /// Reject modes that cannot be acted upon
    pub fn validate(mode: &str) -> Result<Self> {
        match Self::parse(mode) {
            KeyAdvertising::Unknown => Err(TangError::InvalidSpec(format!(
                "unknown key advertising mode '{}'",
                mode
            ))),
            known => Ok(known),
        }
    }
}

/// A key file as read from a replica
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyFile {
    pub name: String,
    /// Modification time in seconds since the epoch
    pub modified: i64,
    pub content: Vec<u8>,
}

/// A classified key pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEntry {
    pub association: KeyAssociation,
    pub generated: DateTime<Utc>,
    pub hidden: bool,
}

impl KeyEntry {
    pub fn is_active(&self) -> bool {
        self.association.is_valid() && !self.hidden
    }

    /// Files of this pair that are still served under their advertised name
    pub fn visible_files(&self) -> Vec<&str> {
        [
            self.association.signing_key.as_str(),
            self.association.encryption_key.as_str(),
        ]
        .into_iter()
        .filter(|f| !f.is_empty() && !is_hidden_name(f))
        .collect()
    }

    pub fn to_status_key(&self) -> TangServerKey {
        TangServerKey {
            sha1: self.association.sha1.clone(),
            sha256: self.association.sha256.clone(),
            generated: self.generated.to_rfc3339(),
            file_name: self.association.signing_key.clone(),
        }
    }
}

/// Whether a key file name marks the key as hidden
pub fn is_hidden_name(name: &str) -> bool {
    name.starts_with(key_files::HIDDEN_PREFIX)
}

/// File name a key is renamed to when it gets hidden
pub fn hidden_name(name: &str) -> String {
    if is_hidden_name(name) {
        name.to_string()
    } else {
        format!("{}{}", key_files::HIDDEN_PREFIX, name)
    }
}

fn base_name(name: &str) -> &str {
    name.trim_start_matches(key_files::HIDDEN_PREFIX)
}

struct Parsed<'a> {
    file: &'a KeyFile,
    key: TangKey,
}

/// All key pairs found in a key directory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyInventory {
    pub entries: Vec<KeyEntry>,
}

impl KeyInventory {
    /// Pair and classify key files.
    ///
    /// Pairs recorded in a status file are kept when both files still exist,
    /// possibly under their hidden name. Remaining signing and exchange keys
    /// are paired oldest first; whatever is left over becomes an invalid entry.
    pub fn classify(files: &[KeyFile], recorded: &[KeyAssociation], hidden_keys: &[HiddenKey]) -> Self {
        let mut signing = Vec::new();
        let mut exchange = Vec::new();
        for file in files {
            match parse_key(&file.name, &file.content) {
                Ok(key) => match key.role {
                    KeyRole::Signing => signing.push(Parsed { file, key }),
                    KeyRole::Exchange => exchange.push(Parsed { file, key }),
                    KeyRole::Unknown => warn!("Ignoring key {} with unknown role", file.name),
                },
                Err(e) => warn!("Ignoring key file: {}", e),
            }
        }
        signing.sort_by(|a, b| (a.file.modified, &a.file.name).cmp(&(b.file.modified, &b.file.name)));
        exchange.sort_by(|a, b| (a.file.modified, &a.file.name).cmp(&(b.file.modified, &b.file.name)));

        let mut pairs: Vec<(Option<&Parsed>, Option<&Parsed>)> = Vec::new();
        let mut used_sig = BTreeSet::new();
        let mut used_exc = BTreeSet::new();

        for assoc in recorded {
            let sig = signing
                .iter()
                .position(|p| base_name(&p.file.name) == base_name(&assoc.signing_key));
            let exc = exchange
                .iter()
                .position(|p| base_name(&p.file.name) == base_name(&assoc.encryption_key));
            if let (Some(s), Some(e)) = (sig, exc) {
                if !used_sig.contains(&s) && !used_exc.contains(&e) {
                    used_sig.insert(s);
                    used_exc.insert(e);
                    pairs.push((Some(&signing[s]), Some(&exchange[e])));
                }
            }
        }

        let mut free_sig = (0..signing.len()).filter(|i| !used_sig.contains(i));
        let mut free_exc = (0..exchange.len()).filter(|i| !used_exc.contains(i));
        loop {
            match (free_sig.next(), free_exc.next()) {
                (None, None) => break,
                (s, e) => pairs.push((s.map(|i| &signing[i]), e.map(|i| &exchange[i]))),
            }
        }

        let mut entries: Vec<KeyEntry> = pairs
            .into_iter()
            .filter_map(|(sig, exc)| entry(sig, exc, hidden_keys))
            .collect();
        entries.sort_by(|a, b| {
            (a.generated, &a.association.signing_key).cmp(&(b.generated, &b.association.signing_key))
        });

        KeyInventory { entries }
    }

    /// Valid pairs that are not hidden
    pub fn active(&self) -> impl Iterator<Item = &KeyEntry> {
        self.entries.iter().filter(|e| e.is_active())
    }

    pub fn active_count(&self) -> usize {
        self.active().count()
    }

    /// Valid pairs that are hidden
    pub fn hidden(&self) -> impl Iterator<Item = &KeyEntry> {
        self.entries
            .iter()
            .filter(|e| e.association.is_valid() && e.hidden)
    }

    /// Pairs advertised under the given mode
    pub fn advertised(&self, mode: KeyAdvertising) -> Vec<&KeyEntry> {
        self.entries
            .iter()
            .filter(|e| e.association.is_valid())
            .filter(|e| match mode {
                KeyAdvertising::AllKeys => true,
                KeyAdvertising::OnlyAdvertised => !e.hidden,
                KeyAdvertising::OnlyUnadvertised => e.hidden,
                KeyAdvertising::Unknown => false,
            })
            .collect()
    }

    pub fn associations(&self) -> Vec<KeyAssociation> {
        self.entries.iter().map(|e| e.association.clone()).collect()
    }

    /// Hidden pairs whose files still carry their advertised name
    pub fn pending_hide(&self) -> Vec<&KeyEntry> {
        self.entries
            .iter()
            .filter(|e| e.hidden && !e.visible_files().is_empty())
            .collect()
    }

    /// Active pairs older than the refresh interval, 0 disables expiry
    pub fn expired(&self, interval_secs: u64, now: DateTime<Utc>) -> Vec<&KeyEntry> {
        if interval_secs == 0 {
            return Vec::new();
        }
        self.active()
            .filter(|e| age_secs(e.generated, now) > interval_secs)
            .collect()
    }

    /// Rotation is due once the oldest active pair outlived the refresh interval
    pub fn rotation_due(&self, interval_secs: u64, now: DateTime<Utc>) -> bool {
        match self.active().map(|e| e.generated).min() {
            Some(oldest) => interval_secs > 0 && age_secs(oldest, now) > interval_secs,
            None => false,
        }
    }

    pub fn error_condition(&self) -> TangServerError {
        if self.active_count() == 0 {
            TangServerError::ActiveKeysError
        } else {
            TangServerError::NoError
        }
    }
}

fn entry(sig: Option<&Parsed>, exc: Option<&Parsed>, hidden_keys: &[HiddenKey]) -> Option<KeyEntry> {
    let identity = sig.or(exc)?;
    let thumbprints = &identity.key.thumbprints;

    let hidden_by_name = [sig, exc]
        .iter()
        .flatten()
        .any(|p| is_hidden_name(&p.file.name));
    let hidden_by_spec = sig.is_some()
        && hidden_keys
            .iter()
            .any(|h| h.matches(&thumbprints.sha1, &thumbprints.sha256));

    let modified = sig.map(|p| p.file.modified).unwrap_or(identity.file.modified);

    Some(KeyEntry {
        association: KeyAssociation {
            sha1: thumbprints.sha1.clone(),
            sha256: thumbprints.sha256.clone(),
            signing_key: sig.map(|p| p.file.name.clone()).unwrap_or_default(),
            encryption_key: exc.map(|p| p.file.name.clone()).unwrap_or_default(),
        },
        generated: DateTime::from_timestamp(modified, 0).unwrap_or_default(),
        hidden: hidden_by_name || hidden_by_spec,
    })
}

fn age_secs(generated: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    u64::try_from((now - generated).num_seconds()).unwrap_or(0)
}

/// Outcome of the periodic health check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodicOutcome {
    pub error: TangServerError,
    /// `None` waits for the next change event
    pub requeue_after: Option<Duration>,
}

/// Decide the error condition and the next periodic pass.
///
/// `active_keys` counts valid pairs that are not hidden, independent of the
/// advertising mode. Under `unadvertised` the published key list can be empty
/// while the error stays `NoError`.
///
/// A non-zero refresh interval always schedules the next pass after that
/// interval. Without one, a short timer runs only while no active key exists.
pub fn reconcile_periodic(interval_secs: u64, active_keys: usize) -> PeriodicOutcome {
    let error = if active_keys == 0 {
        TangServerError::ActiveKeysError
    } else {
        TangServerError::NoError
    };

    let requeue_after = if interval_secs > 0 {
        Some(Duration::from_secs(interval_secs))
    } else if active_keys == 0 {
        Some(Duration::from_secs(timers::NO_ACTIVE_KEYS_SECS))
    } else {
        None
    };

    PeriodicOutcome {
        error,
        requeue_after,
    }
}
