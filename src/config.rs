// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use anyhow::{Context, Result};
use std::env;
use std::time::Duration;

const DEFAULT_EXEC_TIMEOUT_SECS: u64 = 30;
const DEFAULT_KEYGEN_COMMAND: &str = "/usr/libexec/tangd-keygen";

/// Operator configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Restrict the operator to one namespace, all namespaces when unset
    pub watch_namespace: Option<String>,
    /// Upper bound for a single command executed inside a replica
    pub exec_timeout: Duration,
    /// Key generator run inside a replica, receives the key directory as its only argument
    pub keygen_command: String,
    /// Extra key path components rejected on top of the built-in forbidden set
    pub extra_forbidden_paths: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            watch_namespace: None,
            exec_timeout: Duration::from_secs(DEFAULT_EXEC_TIMEOUT_SECS),
            keygen_command: DEFAULT_KEYGEN_COMMAND.to_string(),
            extra_forbidden_paths: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let watch_namespace = env::var("WATCH_NAMESPACE").ok().filter(|ns| !ns.is_empty());

        let exec_timeout_secs = match env::var("EXEC_TIMEOUT_SECS") {
            Ok(v) => v
                .parse::<u64>()
                .context("EXEC_TIMEOUT_SECS must be a number of seconds")?,
            Err(_) => DEFAULT_EXEC_TIMEOUT_SECS,
        };

        let keygen_command =
            env::var("KEYGEN_COMMAND").unwrap_or_else(|_| DEFAULT_KEYGEN_COMMAND.to_string());

        let extra_forbidden_paths = env::var("FORBIDDEN_KEY_PATHS")
            .map(|v| parse_list(&v))
            .unwrap_or_default();

        Ok(Config {
            watch_namespace,
            exec_timeout: Duration::from_secs(exec_timeout_secs),
            keygen_command,
            extra_forbidden_paths,
        })
    }
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
