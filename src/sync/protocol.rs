// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! One synchronization pass over the ready replicas of a TangServer.
//!
//! The replica holding the most key files acts as source. Every file found on
//! any replica is propagated to every other replica, key pairs are generated
//! and hidden on the source before propagation, and finally each replica's key
//! status file is rewritten. Failures on a single replica are logged and the
//! pass continues; a later pass closes the gap.

use super::replica::{key_file_path, KeyFileInfo, Replica, ReplicaStore};
use crate::error::{Result, TangError};
use crate::keys::association::{self, status_file_path, KeyAssociation, KeyAssociationInfo};
use crate::keys::lifecycle::{hidden_name, is_hidden_name, KeyFile, KeyInventory};
use crate::types::TangServer;
use chrono::{DateTime, Utc};
use kube::ResourceExt;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, instrument, warn};

/// Outcome of a synchronization pass
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub inventory: KeyInventory,
    pub source: Option<Replica>,
    /// Key pairs generated on the source
    pub generated: usize,
    /// Files renamed to their hidden name
    pub hidden: Vec<String>,
    /// Files written to replicas that lacked them
    pub copied: usize,
    /// Replicas that failed at least one step
    pub failed_replicas: BTreeSet<String>,
    /// Associations written to each replica's key status file
    pub recorded: Vec<KeyAssociationInfo>,
}

/// A pass that stopped early, with what it had learned up to that point
#[derive(Debug)]
pub struct SyncFailure {
    pub error: TangError,
    pub report: SyncReport,
}

struct Listing {
    replica: Replica,
    files: BTreeMap<String, i64>,
}

pub struct KeySynchronizer<'a> {
    store: &'a dyn ReplicaStore,
    tang_server: &'a TangServer,
    key_dir: &'a str,
    listings: Vec<Listing>,
    contents: BTreeMap<String, KeyFile>,
    report: SyncReport,
}

impl<'a> KeySynchronizer<'a> {
    pub fn new(store: &'a dyn ReplicaStore, tang_server: &'a TangServer) -> Self {
        Self {
            store,
            tang_server,
            key_dir: tang_server.key_path(),
            listings: Vec::new(),
            contents: BTreeMap::new(),
            report: SyncReport::default(),
        }
    }

    /// Run one pass over the given ready replicas
    #[instrument(skip_all, fields(tang_server = %self.tang_server.name_any()))]
    pub async fn run(
        mut self,
        replicas: &[Replica],
        now: DateTime<Utc>,
    ) -> std::result::Result<SyncReport, SyncFailure> {
        match self.pass(replicas, now).await {
            Ok(()) => Ok(self.report),
            Err(error) => Err(SyncFailure {
                error,
                report: self.report,
            }),
        }
    }

    async fn pass(&mut self, replicas: &[Replica], now: DateTime<Utc>) -> Result<()> {
        if replicas.is_empty() {
            return Ok(());
        }

        self.take_inventory(replicas).await?;
        let Some(source) = self.select_source() else {
            return Ok(());
        };
        info!(
            "Synchronizing keys of {} replicas from {}",
            self.listings.len(),
            source.pod_name
        );
        self.report.source = Some(source.clone());

        self.resolve_hidden_duplicates().await;
        self.read_contents(&source).await;
        let recorded = self.read_status(&source).await;

        let pending: Vec<String> = self
            .classify(&recorded)
            .pending_hide()
            .iter()
            .flat_map(|e| e.visible_files())
            .map(String::from)
            .collect();
        for file in pending {
            self.hide(&file).await;
        }

        self.report.inventory = self.classify(&recorded);
        let interval = self.tang_server.spec.key_refresh_interval;
        let required = self.tang_server.required_active_key_pairs() as usize;
        let rotation = self.report.inventory.rotation_due(interval, now);
        let expired: Vec<String> = self
            .report
            .inventory
            .expired(interval, now)
            .iter()
            .flat_map(|e| e.visible_files())
            .map(String::from)
            .collect();

        let missing = required.saturating_sub(self.report.inventory.active_count());
        let to_generate = if rotation { missing.max(1) } else { missing };
        if to_generate > 0 {
            self.generate(&source, to_generate).await?;
            if rotation {
                for file in expired {
                    self.hide(&file).await;
                }
            }
            self.report.inventory = self.classify(&recorded);
        }

        self.propagate().await;
        let current = self.report.inventory.associations();
        self.write_status(&recorded, &current).await;
        Ok(())
    }

    async fn take_inventory(&mut self, replicas: &[Replica]) -> Result<()> {
        let mut sorted = replicas.to_vec();
        sorted.sort();

        let mut last_error = None;
        for replica in sorted {
            match self.store.list_key_files(&replica, self.key_dir).await {
                Ok(files) => self.listings.push(Listing {
                    files: to_map(files),
                    replica,
                }),
                Err(e) => {
                    warn!("Failed to list keys on {}: {}", replica.pod_name, e);
                    self.report.failed_replicas.insert(replica.pod_name.clone());
                    last_error = Some(e);
                }
            }
        }

        match (self.listings.is_empty(), last_error) {
            (true, Some(e)) => Err(e),
            _ => Ok(()),
        }
    }

    /// Replica holding the most key files, lowest ordinal on ties
    fn select_source(&self) -> Option<Replica> {
        self.listings
            .iter()
            .max_by(|a, b| {
                a.files
                    .len()
                    .cmp(&b.files.len())
                    .then(b.replica.ordinal.cmp(&a.replica.ordinal))
            })
            .map(|l| l.replica.clone())
    }

    fn union(&self) -> BTreeSet<String> {
        self.listings
            .iter()
            .flat_map(|l| l.files.keys().cloned())
            .collect()
    }

    /// A key hidden on one replica is hidden on all of them
    async fn resolve_hidden_duplicates(&mut self) {
        let union = self.union();
        let visible: Vec<String> = union
            .iter()
            .filter(|name| !is_hidden_name(name) && union.contains(&hidden_name(name)))
            .cloned()
            .collect();
        for name in visible {
            self.hide(&name).await;
        }
    }

    async fn read_contents(&mut self, source: &Replica) {
        for name in self.union() {
            if self.contents.contains_key(&name) {
                continue;
            }
            let holder = self
                .listings
                .iter()
                .find(|l| l.replica == *source && l.files.contains_key(&name))
                .or_else(|| self.listings.iter().find(|l| l.files.contains_key(&name)));
            let Some(holder) = holder else { continue };
            let replica = holder.replica.clone();
            let modified = holder.files[&name];

            match self
                .store
                .read_file(&replica, &key_file_path(self.key_dir, &name))
                .await
            {
                Ok(Some(content)) => {
                    self.contents.insert(
                        name.clone(),
                        KeyFile {
                            name,
                            modified,
                            content,
                        },
                    );
                }
                Ok(None) => debug!("{} vanished from {}", name, replica.pod_name),
                Err(e) => {
                    warn!("Failed to read {} from {}: {}", name, replica.pod_name, e);
                    self.report.failed_replicas.insert(replica.pod_name);
                }
            }
        }
    }

    async fn read_status(&mut self, source: &Replica) -> Vec<KeyAssociation> {
        match self
            .store
            .read_file(source, &status_file_path(self.key_dir))
            .await
            .and_then(|c| decode_status(c.as_deref()))
        {
            Ok(recorded) => recorded,
            Err(e) => {
                warn!("Ignoring key status of {}: {}", source.pod_name, e);
                Vec::new()
            }
        }
    }

    fn classify(&self, recorded: &[KeyAssociation]) -> KeyInventory {
        let files: Vec<KeyFile> = self.contents.values().cloned().collect();
        KeyInventory::classify(&files, recorded, &self.tang_server.spec.hidden_keys)
    }

    /// Rename a key file to its hidden name on every replica holding it
    async fn hide(&mut self, name: &str) {
        let hidden = hidden_name(name);
        let from = key_file_path(self.key_dir, name);
        let to = key_file_path(self.key_dir, &hidden);

        let mut renamed = false;
        for listing in self.listings.iter_mut() {
            let Some(modified) = listing.files.get(name).copied() else {
                continue;
            };
            match self.store.rename_file(&listing.replica, &from, &to).await {
                Ok(()) => {
                    listing.files.remove(name);
                    listing.files.insert(hidden.clone(), modified);
                    renamed = true;
                }
                Err(e) => {
                    warn!("Failed to hide {} on {}: {}", name, listing.replica.pod_name, e);
                    self.report
                        .failed_replicas
                        .insert(listing.replica.pod_name.clone());
                }
            }
        }

        if !renamed {
            return;
        }
        if let Some(mut file) = self.contents.remove(name) {
            file.name = hidden.clone();
            self.contents.entry(hidden.clone()).or_insert(file);
        }
        info!("Hid key {}", name);
        self.report.hidden.push(name.to_string());
    }

    async fn generate(&mut self, source: &Replica, count: usize) -> Result<()> {
        for _ in 0..count {
            info!("Generating key pair on {}", source.pod_name);
            self.store.generate_key_pair(source, self.key_dir).await?;
            self.report.generated += 1;
        }

        let files = to_map(self.store.list_key_files(source, self.key_dir).await?);
        let Some(listing) = self.listings.iter_mut().find(|l| l.replica == *source) else {
            return Ok(());
        };
        let new_files: Vec<String> = files
            .keys()
            .filter(|name| !listing.files.contains_key(*name))
            .cloned()
            .collect();
        listing.files = files;
        self.read_contents(source).await;

        let unread = new_files
            .iter()
            .filter(|name| !self.contents.contains_key(*name))
            .count();
        if unread > 0 {
            return Err(TangError::ExecFailed {
                pod: source.pod_name.clone(),
                message: format!("{} generated key files could not be read", unread),
            });
        }
        Ok(())
    }

    /// Write every known key file to the replicas lacking it
    async fn propagate(&mut self) {
        for listing in self.listings.iter_mut() {
            let missing: Vec<&KeyFile> = self
                .contents
                .values()
                .filter(|f| !listing.files.contains_key(&f.name))
                .collect();

            for file in missing {
                let path = key_file_path(self.key_dir, &file.name);
                match self
                    .store
                    .write_file(&listing.replica, &path, &file.content, Some(file.modified))
                    .await
                {
                    Ok(()) => {
                        debug!("Copied {} to {}", file.name, listing.replica.pod_name);
                        listing.files.insert(file.name.clone(), file.modified);
                        self.report.copied += 1;
                    }
                    Err(e) => {
                        warn!(
                            "Failed to copy {} to {}: {}",
                            file.name, listing.replica.pod_name, e
                        );
                        self.report
                            .failed_replicas
                            .insert(listing.replica.pod_name.clone());
                        break;
                    }
                }
            }
        }
    }

    /// Merge and rewrite the key status file of every replica
    async fn write_status(&mut self, recorded: &[KeyAssociation], current: &[KeyAssociation]) {
        let owner = self.tang_server.name_any();

        for listing in &self.listings {
            let replica = &listing.replica;
            if self.report.failed_replicas.contains(&replica.pod_name) {
                continue;
            }
            let location =
                KeyAssociationInfo::at(&replica.pod_name, &replica.namespace, self.key_dir, &owner);
            let status_path = location.status_file_path();

            let existing = match self
                .store
                .read_file(replica, &status_path)
                .await
                .and_then(|c| decode_status(c.as_deref()))
            {
                Ok(existing) => existing,
                Err(e) => {
                    debug!("Rewriting key status of {}: {}", replica.pod_name, e);
                    recorded.to_vec()
                }
            };

            let merged = association::merge(&existing, current);
            let result = match association::encode(&merged) {
                Ok(content) => {
                    self.store
                        .write_file(replica, &status_path, content.as_bytes(), None)
                        .await
                }
                Err(e) => Err(e),
            };
            let result = match result {
                Ok(()) => self.store.remove_file(replica, &location.lock_file_path()).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(()) => self
                    .report
                    .recorded
                    .extend(merged.into_iter().map(|a| location.recording(a))),
                Err(e) => {
                    warn!("Failed to write key status on {}: {}", replica.pod_name, e);
                    self.report.failed_replicas.insert(replica.pod_name.clone());
                }
            }
        }
    }
}

fn to_map(files: Vec<KeyFileInfo>) -> BTreeMap<String, i64> {
    files.into_iter().map(|f| (f.name, f.modified)).collect()
}

fn decode_status(content: Option<&[u8]>) -> Result<Vec<KeyAssociation>> {
    match content {
        Some(bytes) => association::decode(&String::from_utf8_lossy(bytes)),
        None => Ok(Vec::new()),
    }
}
