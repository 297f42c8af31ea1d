// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use crate::constants::{defaults, names};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(group = "nbde.openshift.io", version = "v1alpha1", kind = "TangServer")]
#[kube(namespaced)]
#[kube(status = "TangServerStatus")]
#[kube(shortname = "tang")]
#[serde(rename_all = "camelCase", default)]
pub struct TangServerSpec {
    pub replicas: u32,
    pub image: String,
    pub version: String,
    pub key_path: String,
    pub pod_listen_port: u32,
    pub service_listen_port: u32,
    pub service_type: String,
    pub resources_request: ResourceAmounts,
    pub resources_limit: ResourceAmounts,
    pub storage_class: String,
    pub storage_size: String,
    pub required_active_key_pairs: u32,
    /// Seconds between key rotations, 0 disables rotation
    pub key_refresh_interval: u64,
    pub hidden_keys: Vec<HiddenKey>,
    pub health_script: String,
    /// Image pull secret
    pub secret: String,
    /// One of `all`, `advertised` (default) or `unadvertised`
    pub key_advertising: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct ResourceAmounts {
    pub cpu: String,
    pub memory: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct HiddenKey {
    pub sha1: String,
    pub sha256: String,
}

impl HiddenKey {
    /// A hidden key entry matches when either of its non-empty thumbprints matches
    pub fn matches(&self, sha1: &str, sha256: &str) -> bool {
        (!self.sha1.is_empty() && self.sha1 == sha1)
            || (!self.sha256.is_empty() && self.sha256 == sha256)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct TangServerStatus {
    pub ready: i32,
    pub running: i32,
    pub service_external_url: String,
    pub active_keys: Vec<TangServerKey>,
    pub hidden_keys: Vec<TangServerKey>,
    pub tang_server_error: TangServerError,
    pub phase: TangServerPhase,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct TangServerKey {
    pub sha1: String,
    pub sha256: String,
    /// RFC 3339 generation timestamp
    pub generated: String,
    pub file_name: String,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum TangServerError {
    #[default]
    NoError,
    ActiveKeysError,
    ValidationError,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum TangServerPhase {
    #[default]
    Pending,
    Provisioning,
    Ready,
    Degraded,
    Terminating,
}

impl TangServer {
    /// Name of the StatefulSet running the replicas
    pub fn statefulset_name(&self) -> String {
        format!("{}{}", names::STATEFULSET_PREFIX, self.name_any())
    }

    /// Name of the Service exposing the replicas
    pub fn service_name(&self) -> String {
        format!("{}{}", names::SERVICE_PREFIX, self.name_any())
    }

    /// Desired replica count, never zero
    pub fn desired_replicas(&self) -> u32 {
        if self.spec.replicas == 0 {
            defaults::REPLICAS
        } else {
            self.spec.replicas
        }
    }

    /// Key directory inside each replica
    pub fn key_path(&self) -> &str {
        if self.spec.key_path.is_empty() {
            defaults::KEY_PATH
        } else {
            &self.spec.key_path
        }
    }

    pub fn required_active_key_pairs(&self) -> u32 {
        if self.spec.required_active_key_pairs == 0 {
            defaults::REQUIRED_ACTIVE_KEY_PAIRS
        } else {
            self.spec.required_active_key_pairs
        }
    }
}
