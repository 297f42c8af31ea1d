// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Key file synchronization across the replicas of a TangServer.

pub mod protocol;
pub mod replica;

pub use protocol::{KeySynchronizer, SyncFailure, SyncReport};
pub use replica::{ExecReplicaStore, KeyFileInfo, Replica, ReplicaStore};
