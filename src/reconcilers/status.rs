// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! TangServer status computation and persistence.

use crate::error::{Result, TangError};
use crate::keys::{KeyAdvertising, KeyInventory};
use crate::types::{TangServer, TangServerError, TangServerPhase, TangServerStatus};
use k8s_openapi::api::apps::v1::StatefulSet;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, ResourceExt};
use serde_json::json;
use tracing::debug;

/// Replica counts and address observed on the cluster
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Observed {
    pub ready: i32,
    pub running: i32,
    pub external_url: String,
}

impl Observed {
    pub fn from_statefulset(statefulset: &StatefulSet, external_url: Option<String>) -> Self {
        let status = statefulset.status.as_ref();
        Self {
            ready: status.and_then(|s| s.ready_replicas).unwrap_or(0),
            running: status.map(|s| s.replicas).unwrap_or(0),
            external_url: external_url.unwrap_or_default(),
        }
    }
}

fn previous(tang_server: &TangServer) -> TangServerStatus {
    tang_server.status.clone().unwrap_or_default()
}

/// Status while the replica set is converging, key lists are carried over
pub fn provisioning_status(tang_server: &TangServer, observed: &Observed) -> TangServerStatus {
    TangServerStatus {
        ready: observed.ready,
        running: observed.running,
        service_external_url: observed.external_url.clone(),
        phase: TangServerPhase::Provisioning,
        tang_server_error: TangServerError::NoError,
        ..previous(tang_server)
    }
}

/// Status for a spec that failed validation
pub fn validation_status(tang_server: &TangServer) -> TangServerStatus {
    TangServerStatus {
        tang_server_error: TangServerError::ValidationError,
        ..previous(tang_server)
    }
}

/// Status for a Terminating TangServer
pub fn terminating_status(tang_server: &TangServer) -> TangServerStatus {
    TangServerStatus {
        phase: TangServerPhase::Terminating,
        ..previous(tang_server)
    }
}

/// Status once the replica set is ready and keys have been synchronized
pub fn key_status(
    tang_server: &TangServer,
    observed: &Observed,
    inventory: &KeyInventory,
    mode: KeyAdvertising,
    error: TangServerError,
) -> TangServerStatus {
    let active = inventory.active_count();
    let required = tang_server.required_active_key_pairs() as usize;

    TangServerStatus {
        ready: observed.ready,
        running: observed.running,
        service_external_url: observed.external_url.clone(),
        active_keys: inventory
            .advertised(mode)
            .into_iter()
            .map(|e| e.to_status_key())
            .collect(),
        hidden_keys: inventory.hidden().map(|e| e.to_status_key()).collect(),
        tang_server_error: error,
        phase: phase(observed.ready, tang_server.desired_replicas(), active, required),
    }
}

/// Lifecycle phase from replica readiness and the number of active key pairs
pub fn phase(ready: i32, desired: u32, active: usize, required: usize) -> TangServerPhase {
    if u32::try_from(ready).ok() != Some(desired) {
        TangServerPhase::Provisioning
    } else if active >= required {
        TangServerPhase::Ready
    } else {
        TangServerPhase::Degraded
    }
}

/// Persist the status subresource, skipping the call when nothing changed
pub async fn patch_status(client: &Client, tang_server: &TangServer, status: &TangServerStatus) -> Result<()> {
    if tang_server.status.as_ref() == Some(status) {
        debug!("Status of {} unchanged", tang_server.name_any());
        return Ok(());
    }

    let namespace = tang_server
        .namespace()
        .ok_or(TangError::MissingObjectKey("namespace"))?;
    let api: Api<TangServer> = Api::namespaced(client.clone(), &namespace);
    api.patch_status(
        &tang_server.name_any(),
        &PatchParams::default(),
        &Patch::Merge(json!({ "status": status })),
    )
    .await?;
    Ok(())
}
