// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Desired sub-resources derived from a TangServer spec.
//!
//! Everything in here is pure: the same TangServer always produces the same
//! StatefulSet, Service and volume claim template.

pub mod service;
pub mod statefulset;
pub mod storage;

pub use service::{build_service, external_url, service_port, service_type};
pub use statefulset::{build_statefulset, image_changed, resources_changed};
pub use storage::{build_volume_claim_template, claim_ordinal};

use crate::constants::{defaults, names};
use crate::types::TangServer;
use k8s_openapi::api::core::v1::ResourceRequirements;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::ResourceExt;
use std::collections::BTreeMap;

/// Labels shared by the StatefulSet, its pods and the Service selector
pub fn labels(tang_server: &TangServer) -> BTreeMap<String, String> {
    BTreeMap::from([(names::APP_LABEL.to_string(), tang_server.name_any())])
}

/// Label selector string matching the pods of a TangServer
pub fn label_selector(tang_server: &TangServer) -> String {
    format!("{}={}", names::APP_LABEL, tang_server.name_any())
}

/// Container image reference, `image:version` unless the image already pins a tag or digest
pub fn image_reference(tang_server: &TangServer) -> String {
    let image = non_empty_or(&tang_server.spec.image, defaults::IMAGE);
    let version = non_empty_or(&tang_server.spec.version, defaults::VERSION);

    if is_pinned(image) {
        image.to_string()
    } else {
        format!("{}:{}", image, version)
    }
}

fn is_pinned(image: &str) -> bool {
    if image.contains('@') {
        return true;
    }
    // A colon before the last slash belongs to a registry port, not a tag
    image
        .rsplit('/')
        .next()
        .is_some_and(|last| last.contains(':'))
}

/// Port the Tang container listens on
pub fn pod_port(tang_server: &TangServer) -> i32 {
    port_or_default(tang_server.spec.pod_listen_port, defaults::POD_PORT)
}

pub(crate) fn port_or_default(explicit: u32, default: u32) -> i32 {
    let port = if explicit == 0 { default } else { explicit };
    i32::try_from(port).unwrap_or(default as i32)
}

/// CPU and memory requests/limits for the Tang container
pub fn resource_requirements(tang_server: &TangServer) -> ResourceRequirements {
    let request = &tang_server.spec.resources_request;
    let limit = &tang_server.spec.resources_limit;

    ResourceRequirements {
        requests: Some(cpu_memory(
            non_empty_or(&request.cpu, defaults::CPU_REQUEST),
            non_empty_or(&request.memory, defaults::MEMORY_REQUEST),
        )),
        limits: Some(cpu_memory(
            non_empty_or(&limit.cpu, defaults::CPU_LIMIT),
            non_empty_or(&limit.memory, defaults::MEMORY_LIMIT),
        )),
        ..Default::default()
    }
}

fn cpu_memory(cpu: &str, memory: &str) -> BTreeMap<String, Quantity> {
    BTreeMap::from([
        ("cpu".to_string(), Quantity(cpu.to_string())),
        ("memory".to_string(), Quantity(memory.to_string())),
    ])
}

pub(crate) fn non_empty_or<'a>(value: &'a str, default: &'a str) -> &'a str {
    if value.is_empty() {
        default
    } else {
        value
    }
}
