// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TangError {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Invalid TangServer spec: {0}")]
    InvalidSpec(String),

    #[error("Command failed in pod {pod}: {message}")]
    ExecFailed { pod: String, message: String },

    #[error("Command timed out in pod {pod} after {secs}s")]
    ExecTimeout { pod: String, secs: u64 },

    #[error("Invalid key material in {file}: {message}")]
    InvalidKey { file: String, message: String },

    #[error("Key status file error: {0}")]
    KeyStatus(String),

    #[error("Finalizer error: {0}")]
    Finalizer(String),

    #[error("Missing object key: {0}")]
    MissingObjectKey(&'static str),
}

impl TangError {
    /// Whether the error is expected to clear up on its own and should be retried with backoff
    pub fn is_transient(&self) -> bool {
        match self {
            TangError::KubeError(kube::Error::Api(err)) => {
                err.code == 409 || err.code == 429 || err.code >= 500
            }
            TangError::KubeError(_) => true,
            TangError::ExecFailed { .. } | TangError::ExecTimeout { .. } => true,
            TangError::Finalizer(_) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, TangError>;
