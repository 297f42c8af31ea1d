// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

/// The operator name used for server-side apply and event reporting
pub const OPERATOR_NAME: &str = "tang-operator";

/// Finalizer protecting TangServer resources until cleanup has run
pub const FINALIZER_NAME: &str = "nbde.openshift.io/tangserver-finalizer";

/// Defaults applied when the TangServer spec leaves a field empty or zero
pub mod defaults {
    pub const REPLICAS: u32 = 1;
    pub const IMAGE: &str = "registry.redhat.io/rhel9/tang";
    pub const VERSION: &str = "latest";
    pub const KEY_PATH: &str = "/var/db/tang";
    pub const HEALTH_SCRIPT: &str = "/usr/bin/tangd-health-check";
    pub const SERVICE_PORT: u32 = 80;
    pub const POD_PORT: u32 = 8080;
    pub const REQUIRED_ACTIVE_KEY_PAIRS: u32 = 1;

    pub const CPU_REQUEST: &str = "50m";
    pub const MEMORY_REQUEST: &str = "64Mi";
    pub const CPU_LIMIT: &str = "500m";
    pub const MEMORY_LIMIT: &str = "256Mi";

    pub const STORAGE_SIZE: &str = "1Gi";
    pub const STORAGE_ACCESS_MODE: &str = "ReadWriteOnce";
}

/// Naming of the sub-resources derived from a TangServer
pub mod names {
    pub const STATEFULSET_PREFIX: &str = "tangstatefulset-";
    pub const SERVICE_PREFIX: &str = "service-";
    pub const CONTAINER: &str = "tangserver";
    pub const VOLUME_CLAIM: &str = "tang-keys";
    pub const APP_LABEL: &str = "app";
}

/// Files managed by the operator inside each replica's key directory
pub mod key_files {
    pub const EXTENSION: &str = ".jwk";
    pub const HIDDEN_PREFIX: &str = ".";
    pub const STATUS_FILE: &str = "key_status.txt";
    pub const LOCK_SUFFIX: &str = ".lock";
    pub const TEMP_SUFFIX: &str = ".tmp";
}

/// Requeue timers, in seconds
pub mod timers {
    /// Re-check interval while the active key list is empty and no refresh interval is set
    pub const NO_ACTIVE_KEYS_SECS: u64 = 5;
    /// Re-check interval while the replica set is still converging
    pub const PROVISIONING_SECS: u64 = 10;
    /// Re-check interval for a spec that failed validation
    pub const VALIDATION_SECS: u64 = 300;
    /// Base of the exponential error backoff
    pub const ERROR_BASE_SECS: u64 = 5;
    /// Cap of the exponential error backoff
    pub const ERROR_MAX_SECS: u64 = 300;
}

/// Finalizer cleanup attempts before the finalizer is released regardless
pub const MAX_CLEANUP_ATTEMPTS: u32 = 5;

/// CRD polling configuration
pub mod crd {
    pub const GROUP: &str = "nbde.openshift.io";
    pub const VERSION: &str = "v1alpha1";
    pub const KIND: &str = "TangServer";
    /// Initial polling interval in seconds when waiting for CRD
    pub const POLL_INTERVAL_SECS: u64 = 10;
    /// Maximum polling interval in seconds (exponential backoff cap)
    pub const POLL_MAX_INTERVAL_SECS: u64 = 60;
}
