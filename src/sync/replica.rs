// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! File access inside replica pods.

use crate::constants::{key_files, names};
use crate::error::{Result, TangError};
use crate::kubernetes::PodExec;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use tracing::debug;

/// A ready pod of the StatefulSet
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Replica {
    pub ordinal: u32,
    pub pod_name: String,
    pub namespace: String,
}

impl Replica {
    /// Replica for a StatefulSet pod, the ordinal is the numeric name suffix
    pub fn from_pod(pod: &Pod) -> Option<Self> {
        let pod_name = pod.name_any();
        let ordinal = pod_name.rsplit_once('-')?.1.parse().ok()?;
        Some(Self {
            ordinal,
            namespace: pod.namespace()?,
            pod_name,
        })
    }
}

/// A key file found in a replica's key directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyFileInfo {
    pub name: String,
    /// Modification time in seconds since the epoch
    pub modified: i64,
}

/// File operations on a replica's key directory
#[async_trait]
pub trait ReplicaStore: Send + Sync {
    /// Visible and hidden `.jwk` files in the directory
    async fn list_key_files(&self, replica: &Replica, key_dir: &str) -> Result<Vec<KeyFileInfo>>;

    /// Content of a file, `None` when it does not exist
    async fn read_file(&self, replica: &Replica, path: &str) -> Result<Option<Vec<u8>>>;

    /// Replace a file atomically, optionally setting its modification time
    async fn write_file(
        &self,
        replica: &Replica,
        path: &str,
        content: &[u8],
        modified: Option<i64>,
    ) -> Result<()>;

    async fn rename_file(&self, replica: &Replica, from: &str, to: &str) -> Result<()>;

    /// Remove a file, succeeds when it is already gone
    async fn remove_file(&self, replica: &Replica, path: &str) -> Result<()>;

    /// Run the key generator, producing one signing and one exchange key
    async fn generate_key_pair(&self, replica: &Replica, key_dir: &str) -> Result<()>;
}

/// Marker written before file content so an empty file differs from a missing one
const PRESENT_MARKER: char = '#';

/// `ReplicaStore` running shell commands in the Tang container
pub struct ExecReplicaStore<E> {
    exec: E,
    keygen_command: String,
}

impl<E: PodExec> ExecReplicaStore<E> {
    pub fn new(exec: E, keygen_command: impl Into<String>) -> Self {
        Self {
            exec,
            keygen_command: keygen_command.into(),
        }
    }

    async fn run(&self, replica: &Replica, command: &str) -> Result<String> {
        debug!(pod = %replica.pod_name, "{}", command);
        let output = self
            .exec
            .exec(command, names::CONTAINER, &replica.pod_name, &replica.namespace)
            .await?;
        Ok(output.stdout)
    }
}

#[async_trait]
impl<E: PodExec> ReplicaStore for ExecReplicaStore<E> {
    async fn list_key_files(&self, replica: &Replica, key_dir: &str) -> Result<Vec<KeyFileInfo>> {
        let ext = key_files::EXTENSION;
        let command = format!(
            "cd {} && for f in *{ext} .*{ext}; do [ -f \"$f\" ] && printf '%s %s\\n' \"$(stat -c %Y \"$f\")\" \"$f\"; done; true",
            shell_quote(key_dir)
        );
        let stdout = self.run(replica, &command).await?;
        parse_listing(&replica.pod_name, &stdout)
    }

    async fn read_file(&self, replica: &Replica, path: &str) -> Result<Option<Vec<u8>>> {
        let quoted = shell_quote(path);
        let command = format!(
            "[ -f {quoted} ] || exit 0; printf '{PRESENT_MARKER}'; base64 < {quoted} | tr -d '\\n'"
        );
        let stdout = self.run(replica, &command).await?;

        let Some(encoded) = stdout.trim().strip_prefix(PRESENT_MARKER) else {
            return Ok(None);
        };
        STANDARD
            .decode(encoded)
            .map(Some)
            .map_err(|e| TangError::ExecFailed {
                pod: replica.pod_name.clone(),
                message: format!("undecodable content of {}: {}", path, e),
            })
    }

    async fn write_file(
        &self,
        replica: &Replica,
        path: &str,
        content: &[u8],
        modified: Option<i64>,
    ) -> Result<()> {
        let target = shell_quote(path);
        let temp = shell_quote(&format!("{}{}", path, key_files::TEMP_SUFFIX));
        let mut command = format!(
            "printf '%s' {} | base64 -d > {temp} && mv -f {temp} {target}",
            shell_quote(&STANDARD.encode(content))
        );
        if let Some(modified) = modified {
            command.push_str(&format!(" && touch -d @{} {target}", modified));
        }
        self.run(replica, &command).await.map(|_| ())
    }

    async fn rename_file(&self, replica: &Replica, from: &str, to: &str) -> Result<()> {
        let command = format!("mv -f {} {}", shell_quote(from), shell_quote(to));
        self.run(replica, &command).await.map(|_| ())
    }

    async fn remove_file(&self, replica: &Replica, path: &str) -> Result<()> {
        let command = format!("rm -f {}", shell_quote(path));
        self.run(replica, &command).await.map(|_| ())
    }

    async fn generate_key_pair(&self, replica: &Replica, key_dir: &str) -> Result<()> {
        let command = format!("{} {}", self.keygen_command, shell_quote(key_dir));
        self.run(replica, &command).await.map(|_| ())
    }
}

fn parse_listing(pod: &str, stdout: &str) -> Result<Vec<KeyFileInfo>> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let malformed = || TangError::ExecFailed {
                pod: pod.to_string(),
                message: format!("unexpected listing line '{}'", line),
            };
            let (modified, name) = line.split_once(' ').ok_or_else(malformed)?;
            Ok(KeyFileInfo {
                name: name.to_string(),
                modified: modified.parse().map_err(|_| malformed())?,
            })
        })
        .collect()
}

/// Quote a value for a POSIX shell
pub(crate) fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Path of a file inside a key directory
pub fn key_file_path(key_dir: &str, name: &str) -> String {
    format!("{}/{}", key_dir.trim_end_matches('/'), name)
}
