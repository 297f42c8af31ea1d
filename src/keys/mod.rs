// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Tang key material: parsing, pairing, classification and path rules.

pub mod association;
pub mod jwk;
pub mod lifecycle;
pub mod paths;

pub use association::{KeyAssociation, KeyAssociationInfo};
pub use lifecycle::{reconcile_periodic, KeyAdvertising, KeyEntry, KeyFile, KeyInventory, PeriodicOutcome};
pub use paths::ForbiddenPaths;
