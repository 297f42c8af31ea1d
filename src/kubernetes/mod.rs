// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Kubernetes utilities for CRD discovery, pod command execution and events.

pub mod crd;
pub mod events;
pub mod exec;

pub use crd::wait_for_tang_server_crd;
pub use events::{EventPublisher, KubeEventPublisher};
pub use exec::{ExecOutput, KubePodExec, PodExec};
