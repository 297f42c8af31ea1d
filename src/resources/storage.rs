// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Persistent storage claim for the key directory.

use super::{labels, non_empty_or};
use crate::constants::{defaults, names};
use crate::types::TangServer;
use k8s_openapi::api::core::v1::{
    PersistentVolumeClaim, PersistentVolumeClaimSpec, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::ObjectMeta;
use std::collections::BTreeMap;

/// Storage class for the key volume, `None` leaves the choice to the cluster default
pub fn storage_class(tang_server: &TangServer) -> Option<String> {
    Some(tang_server.spec.storage_class.clone()).filter(|c| !c.is_empty())
}

pub fn storage_size(tang_server: &TangServer) -> &str {
    non_empty_or(&tang_server.spec.storage_size, defaults::STORAGE_SIZE)
}

/// Volume claim template mounted as the key directory of every replica
pub fn build_volume_claim_template(tang_server: &TangServer) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(names::VOLUME_CLAIM.to_string()),
            labels: Some(labels(tang_server)),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec![defaults::STORAGE_ACCESS_MODE.to_string()]),
            storage_class_name: storage_class(tang_server),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(storage_size(tang_server).to_string()),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        status: None,
    }
}

/// Name of the claim the StatefulSet controller creates for the given ordinal
pub fn claim_name(tang_server: &TangServer, ordinal: u32) -> String {
    format!(
        "{}-{}-{}",
        names::VOLUME_CLAIM,
        tang_server.statefulset_name(),
        ordinal
    )
}

/// Ordinal of a claim created from this TangServer's claim template, `None` for any other claim
pub fn claim_ordinal(tang_server: &TangServer, name: &str) -> Option<u32> {
    let ordinal: u32 = name.rsplit_once('-')?.1.parse().ok()?;
    (claim_name(tang_server, ordinal) == name).then_some(ordinal)
}
