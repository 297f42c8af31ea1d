// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Command execution inside replica pods.

use crate::error::{Result, TangError};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Status;
use kube::api::{Api, AttachParams};
use kube::Client;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, instrument};

/// Captured output of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Runs a shell command in a container of a pod.
///
/// A command that exits non-zero is reported as `TangError::ExecFailed`.
#[async_trait]
pub trait PodExec: Send + Sync {
    async fn exec(&self, command: &str, container: &str, pod: &str, namespace: &str)
        -> Result<ExecOutput>;
}

/// `PodExec` over the API server's exec subresource
pub struct KubePodExec {
    client: Client,
    timeout: Duration,
}

impl KubePodExec {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    async fn run(&self, command: &str, container: &str, pod: &str, namespace: &str) -> Result<ExecOutput> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = AttachParams::default()
            .container(container)
            .stdout(true)
            .stderr(true);

        let mut attached = pods
            .exec(pod, vec!["sh", "-c", command], &params)
            .await
            .map_err(|e| exec_failed(pod, e.to_string()))?;

        let stdout = attached.stdout();
        let stderr = attached.stderr();
        let status = attached.take_status();

        let (stdout, stderr) = tokio::join!(read_all(stdout), read_all(stderr));
        let output = ExecOutput {
            stdout: stdout.map_err(|e| exec_failed(pod, e.to_string()))?,
            stderr: stderr.map_err(|e| exec_failed(pod, e.to_string()))?,
        };

        let status = match status {
            Some(status) => status.await,
            None => None,
        };
        check_status(pod, status.as_ref(), &output)?;

        Ok(output)
    }
}

#[async_trait]
impl PodExec for KubePodExec {
    #[instrument(skip(self, command))]
    async fn exec(&self, command: &str, container: &str, pod: &str, namespace: &str) -> Result<ExecOutput> {
        debug!("Executing command in {}/{}", namespace, pod);
        tokio::time::timeout(self.timeout, self.run(command, container, pod, namespace))
            .await
            .map_err(|_| TangError::ExecTimeout {
                pod: pod.to_string(),
                secs: self.timeout.as_secs(),
            })?
    }
}

async fn read_all<R: AsyncRead + Unpin>(reader: Option<R>) -> std::io::Result<String> {
    let mut buf = Vec::new();
    if let Some(mut reader) = reader {
        reader.read_to_end(&mut buf).await?;
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

fn exec_failed(pod: &str, message: String) -> TangError {
    TangError::ExecFailed {
        pod: pod.to_string(),
        message,
    }
}

fn check_status(pod: &str, status: Option<&Status>, output: &ExecOutput) -> Result<()> {
    let Some(status) = status else {
        return Err(exec_failed(
            pod,
            "exec stream closed before the command reported its status".to_string(),
        ));
    };
    if status.status.as_deref() != Some("Failure") {
        return Ok(());
    }

    let stderr = output.stderr.trim();
    let message = if stderr.is_empty() {
        status.message.clone().unwrap_or_else(|| "command failed".to_string())
    } else {
        stderr.to_string()
    };
    Err(exec_failed(pod, message))
}
