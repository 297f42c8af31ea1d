// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! TangServer reconciler - converges the StatefulSet and Service of each
//! TangServer and keeps key material consistent across its replicas.

use super::status::{self, Observed};
use crate::config::Config;
use crate::constants::{names, timers, FINALIZER_NAME, MAX_CLEANUP_ATTEMPTS, OPERATOR_NAME};
use crate::error::{Result, TangError};
use crate::keys::{reconcile_periodic, ForbiddenPaths, KeyAdvertising};
use crate::kubernetes::events::reasons;
use crate::kubernetes::{EventPublisher, KubeEventPublisher, KubePodExec};
use crate::resources::service::service_changed;
use crate::resources::statefulset::declared_replicas;
use crate::resources::{
    build_service, build_statefulset, claim_ordinal, external_url, image_changed, label_selector,
    resources_changed,
};
use crate::sync::{ExecReplicaStore, KeySynchronizer, Replica, ReplicaStore, SyncFailure};
use crate::types::{TangServer, TangServerError};
use chrono::Utc;
use dashmap::DashMap;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod, Service};
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::runtime::events::EventType;
use kube::runtime::finalizer::{finalizer, Error as FinalizerError, Event as FinalizerEvent};
use kube::runtime::{controller::Action, Controller};
use kube::{Api, Client, Resource, ResourceExt};
use kube_runtime::watcher::Config as WatcherConfig;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

pub struct TangServerReconciler {
    client: Client,
    config: Config,
    forbidden_paths: ForbiddenPaths,
    replicas: Arc<dyn ReplicaStore>,
    events: Arc<dyn EventPublisher>,
    /// Consecutive failures per object, drives the error backoff
    error_counts: DashMap<String, u32>,
    cleanup_attempts: DashMap<String, u32>,
}

impl TangServerReconciler {
    pub fn new(client: Client, config: Config) -> Self {
        let exec = KubePodExec::new(client.clone(), config.exec_timeout);
        let replicas = Arc::new(ExecReplicaStore::new(exec, config.keygen_command.clone()));
        let events = Arc::new(KubeEventPublisher::new(client.clone(), OPERATOR_NAME));
        Self::with_parts(client, config, replicas, events)
    }

    pub fn with_parts(
        client: Client,
        config: Config,
        replicas: Arc<dyn ReplicaStore>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        let forbidden_paths = ForbiddenPaths::with_extra(config.extra_forbidden_paths.clone());
        Self {
            client,
            config,
            forbidden_paths,
            replicas,
            events,
            error_counts: DashMap::new(),
            cleanup_attempts: DashMap::new(),
        }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let client = self.client.clone();
        let (tang_servers, statefulsets, services) = match &self.config.watch_namespace {
            Some(ns) => (
                Api::<TangServer>::namespaced(client.clone(), ns),
                Api::<StatefulSet>::namespaced(client.clone(), ns),
                Api::<Service>::namespaced(client, ns),
            ),
            None => (Api::all(client.clone()), Api::all(client.clone()), Api::all(client)),
        };
        info!(
            namespace = self.config.watch_namespace.as_deref().unwrap_or("all"),
            "Starting TangServer controller"
        );
        let context = Arc::new(self);

        Controller::new(tang_servers, WatcherConfig::default())
            .owns(statefulsets, owned_watcher_config())
            .owns(services, owned_watcher_config())
            .run(reconcile, error_policy, context)
            .for_each(|res| async move {
                match res {
                    Ok((obj, action)) => debug!("Reconciled {}: {:?}", obj, action),
                    Err(e) => warn!("Reconciliation error: {}", e),
                }
            })
            .await;

        Ok(())
    }

    async fn publish(&self, tang_server: &TangServer, type_: EventType, reason: &str, note: String) {
        self.events
            .publish(&tang_server.object_ref(&()), type_, reason, Some(note))
            .await;
    }
}

fn object_key(tang_server: &TangServer) -> String {
    format!(
        "{}/{}",
        tang_server.namespace().unwrap_or_default(),
        tang_server.name_any()
    )
}

fn namespace(tang_server: &TangServer) -> Result<String> {
    tang_server
        .namespace()
        .ok_or(TangError::MissingObjectKey("namespace"))
}

#[instrument(skip(tang_server, ctx), fields(tang_server = %object_key(&tang_server)))]
async fn reconcile(tang_server: Arc<TangServer>, ctx: Arc<TangServerReconciler>) -> Result<Action> {
    let key = object_key(&tang_server);
    let api: Api<TangServer> = Api::namespaced(ctx.client.clone(), &namespace(&tang_server)?);

    let handler = ctx.clone();
    let result = finalizer(&api, FINALIZER_NAME, tang_server, |event| async move {
        match event {
            FinalizerEvent::Apply(ts) => apply(ts, handler).await,
            FinalizerEvent::Cleanup(ts) => cleanup(ts, handler).await,
        }
    })
    .await
    .map_err(|e| match e {
        FinalizerError::ApplyFailed(e) | FinalizerError::CleanupFailed(e) => e,
        other => TangError::Finalizer(other.to_string()),
    });

    if result.is_ok() {
        ctx.error_counts.remove(&key);
    }
    result
}

fn error_policy(tang_server: Arc<TangServer>, error: &TangError, ctx: Arc<TangServerReconciler>) -> Action {
    let retries = {
        let mut entry = ctx.error_counts.entry(object_key(&tang_server)).or_insert(0);
        *entry += 1;
        *entry
    };
    let delay = backoff_delay(retries);

    if error.is_transient() {
        warn!("Reconciliation of {} failed, retrying in {:?}: {}", tang_server.name_any(), delay, error);
    } else {
        error!("Reconciliation of {} failed, retrying in {:?}: {}", tang_server.name_any(), delay, error);
    }
    Action::requeue(delay)
}

/// Watch only objects carrying the app label
fn owned_watcher_config() -> WatcherConfig {
    WatcherConfig::default().labels(names::APP_LABEL)
}

/// Exponential backoff for the given number of consecutive failures
pub(crate) fn backoff_delay(retries: u32) -> Duration {
    let factor = 2u64.saturating_pow(retries.saturating_sub(1).min(16));
    Duration::from_secs(
        timers::ERROR_BASE_SECS
            .saturating_mul(factor)
            .min(timers::ERROR_MAX_SECS),
    )
}

/// Spec checks that must pass before anything is created
fn validate(tang_server: &TangServer, forbidden_paths: &ForbiddenPaths) -> Result<KeyAdvertising> {
    forbidden_paths.validate_key_path(&tang_server.spec.key_path)?;
    KeyAdvertising::validate(&tang_server.spec.key_advertising)
}

async fn apply(tang_server: Arc<TangServer>, ctx: Arc<TangServerReconciler>) -> Result<Action> {
    let name = tang_server.name_any();

    let mode = match validate(&tang_server, &ctx.forbidden_paths) {
        Ok(mode) => mode,
        Err(e) => {
            warn!("TangServer {} is invalid: {}", name, e);
            ctx.publish(&tang_server, EventType::Warning, reasons::VALIDATION_FAILED, e.to_string())
                .await;
            status::patch_status(&ctx.client, &tang_server, &status::validation_status(&tang_server))
                .await?;
            return Ok(Action::requeue(Duration::from_secs(timers::VALIDATION_SECS)));
        }
    };

    let service = ensure_service(&ctx.client, &tang_server).await?;
    let statefulset = ensure_statefulset(&ctx.client, &tang_server).await?;
    let observed = Observed::from_statefulset(&statefulset, external_url(&tang_server, &service));

    if u32::try_from(observed.ready).ok() != Some(tang_server.desired_replicas()) {
        debug!(
            "TangServer {} has {}/{} ready replicas",
            name,
            observed.ready,
            tang_server.desired_replicas()
        );
        status::patch_status(
            &ctx.client,
            &tang_server,
            &status::provisioning_status(&tang_server, &observed),
        )
        .await?;
        return Ok(Action::requeue(Duration::from_secs(timers::PROVISIONING_SECS)));
    }

    let replicas = ready_replicas(&ctx.client, &tang_server).await?;
    let (report, failure) = match KeySynchronizer::new(ctx.replicas.as_ref(), &tang_server)
        .run(&replicas, Utc::now())
        .await
    {
        Ok(report) => (report, None),
        Err(SyncFailure { error, report }) => {
            warn!("Key synchronization of {} failed: {}", name, error);
            (report, Some(error))
        }
    };
    debug!(
        "Recorded {} key association(s) across {} replica(s)",
        report.recorded.len(),
        replicas.len()
    );

    if report.generated > 0 {
        ctx.publish(
            &tang_server,
            EventType::Normal,
            reasons::KEYS_GENERATED,
            format!("Generated {} key pair(s)", report.generated),
        )
        .await;
    }
    if !report.hidden.is_empty() {
        ctx.publish(
            &tang_server,
            EventType::Normal,
            reasons::KEYS_HIDDEN,
            format!("Hid {}", report.hidden.join(", ")),
        )
        .await;
    }

    let outcome = reconcile_periodic(
        tang_server.spec.key_refresh_interval,
        report.inventory.active_count(),
    );
    if outcome.error == TangServerError::ActiveKeysError {
        ctx.publish(
            &tang_server,
            EventType::Warning,
            reasons::NO_ACTIVE_KEYS,
            "No active key pairs available".to_string(),
        )
        .await;
    }

    let status = status::key_status(&tang_server, &observed, &report.inventory, mode, outcome.error);
    status::patch_status(&ctx.client, &tang_server, &status).await?;

    info!(
        "TangServer {} is {:?} with {} active key pair(s)",
        name,
        status.phase,
        report.inventory.active_count()
    );
    if let Some(error) = failure {
        return Err(error);
    }
    Ok(outcome
        .requeue_after
        .map(Action::requeue)
        .unwrap_or_else(Action::await_change))
}

/// Delete the key volumes left behind by the StatefulSet
async fn cleanup(tang_server: Arc<TangServer>, ctx: Arc<TangServerReconciler>) -> Result<Action> {
    let key = object_key(&tang_server);
    info!("Cleaning up TangServer {}", key);

    if let Err(e) = status::patch_status(
        &ctx.client,
        &tang_server,
        &status::terminating_status(&tang_server),
    )
    .await
    {
        debug!("Could not mark {} as terminating: {}", key, e);
    }

    match delete_key_volumes(&ctx.client, &tang_server).await {
        Ok(deleted) => {
            info!("Deleted {} key volume(s) of {}", deleted, key);
            ctx.cleanup_attempts.remove(&key);
            Ok(Action::await_change())
        }
        Err(e) => {
            let attempts = {
                let mut entry = ctx.cleanup_attempts.entry(key.clone()).or_insert(0);
                *entry += 1;
                *entry
            };
            if attempts < MAX_CLEANUP_ATTEMPTS {
                return Err(e);
            }

            error!("Giving up on cleanup of {} after {} attempts: {}", key, attempts, e);
            ctx.publish(
                &tang_server,
                EventType::Warning,
                reasons::CLEANUP_FAILED,
                format!("Key volumes were not deleted after {} attempts: {}", attempts, e),
            )
            .await;
            ctx.cleanup_attempts.remove(&key);
            Ok(Action::await_change())
        }
    }
}

/// Delete the claims created from the StatefulSet's claim template, nothing else
async fn delete_key_volumes(client: &Client, tang_server: &TangServer) -> Result<usize> {
    let pvcs: Api<PersistentVolumeClaim> = Api::namespaced(client.clone(), &namespace(tang_server)?);
    let list = pvcs
        .list(&ListParams::default().labels(&label_selector(tang_server)))
        .await?;

    let mut deleted = 0;
    for name in list
        .items
        .iter()
        .map(|pvc| pvc.name_any())
        .filter(|name| claim_ordinal(tang_server, name).is_some())
    {
        match pvcs.delete(&name, &DeleteParams::default()).await {
            Ok(_) => deleted += 1,
            Err(kube::Error::Api(e)) if e.code == 404 => debug!("Claim {} already gone", name),
            Err(e) => return Err(e.into()),
        }
    }
    Ok(deleted)
}

async fn ensure_service(client: &Client, tang_server: &TangServer) -> Result<Service> {
    let api: Api<Service> = Api::namespaced(client.clone(), &namespace(tang_server)?);
    let desired = build_service(tang_server);
    let name = tang_server.service_name();

    match api.get_opt(&name).await? {
        None => {
            info!("Creating Service {}", name);
            Ok(api.create(&PostParams::default(), &desired).await?)
        }
        Some(current) if service_changed(&current, &desired) => {
            info!("Updating Service {}", name);
            let spec = desired.spec.unwrap_or_default();
            let patch = json!({ "spec": { "type": spec.type_, "ports": spec.ports } });
            Ok(api
                .patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
                .await?)
        }
        Some(current) => Ok(current),
    }
}

async fn ensure_statefulset(client: &Client, tang_server: &TangServer) -> Result<StatefulSet> {
    let api: Api<StatefulSet> = Api::namespaced(client.clone(), &namespace(tang_server)?);
    let desired = build_statefulset(tang_server);
    let name = tang_server.statefulset_name();

    let Some(current) = api.get_opt(&name).await? else {
        info!("Creating StatefulSet {}", name);
        return Ok(api.create(&PostParams::default(), &desired).await?);
    };

    let scale = declared_replicas(&current) != declared_replicas(&desired);
    let image = image_changed(&current, &desired);
    let resources = resources_changed(&current, &desired);
    if !(scale || image || resources) {
        return Ok(current);
    }

    info!(
        "Updating StatefulSet {} (replicas: {}, image: {}, resources: {})",
        name, scale, image, resources
    );
    let spec = desired.spec.unwrap_or_default();
    let patch = json!({ "spec": { "replicas": spec.replicas, "template": spec.template } });
    Ok(api
        .patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?)
}

/// Ready pods of the StatefulSet, ordered by ordinal
async fn ready_replicas(client: &Client, tang_server: &TangServer) -> Result<Vec<Replica>> {
    let pods: Api<Pod> = Api::namespaced(client.clone(), &namespace(tang_server)?);
    let list = pods
        .list(&ListParams::default().labels(&label_selector(tang_server)))
        .await?;

    let mut replicas: Vec<Replica> = list
        .items
        .iter()
        .filter(|pod| is_ready(pod))
        .filter_map(Replica::from_pod)
        .collect();
    replicas.sort();
    Ok(replicas)
}

fn is_ready(pod: &Pod) -> bool {
    pod.metadata.deletion_timestamp.is_none()
        && pod
            .status
            .as_ref()
            .and_then(|s| s.conditions.as_ref())
            .is_some_and(|conditions| {
                conditions
                    .iter()
                    .any(|c| c.type_ == "Ready" && c.status == "True")
            })
}
