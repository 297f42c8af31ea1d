// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Custom resource types managed by the operator.

pub mod tang_server;

pub use tang_server::{
    HiddenKey, ResourceAmounts, TangServer, TangServerError, TangServerKey, TangServerPhase,
    TangServerSpec, TangServerStatus,
};
