// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Test utilities for mocking Kubernetes API responses and replica file systems.

use crate::error::{Result as TangResult, TangError};
use crate::sync::{KeyFileInfo, Replica, ReplicaStore};
use async_trait::async_trait;
use http::{Request, Response};
use kube::client::Body;
use kube::Client;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tower::Service;

type Responses = HashMap<(String, String), (u16, String)>;

/// A mock HTTP service that returns predefined responses based on request paths.
///
/// Every request is recorded as `(method, path)` so tests can assert which
/// calls were made. Clones share responses and recorded requests.
#[derive(Clone)]
pub struct MockService {
    responses: Arc<Mutex<Responses>>,
    requests: Arc<Mutex<Vec<(String, String)>>>,
}

impl MockService {
    pub fn new() -> Self {
        Self {
            responses: Arc::new(Mutex::new(HashMap::new())),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn on(self, method: &str, path: &str, status: u16, body: &str) -> Self {
        self.responses
            .lock()
            .unwrap()
            .insert((method.to_string(), path.to_string()), (status, body.to_string()));
        self
    }

    /// Add a response for GET requests matching the path
    pub fn on_get(self, path: &str, status: u16, body: &str) -> Self {
        self.on("GET", path, status, body)
    }

    /// Add a response for POST requests matching the path
    pub fn on_post(self, path: &str, status: u16, body: &str) -> Self {
        self.on("POST", path, status, body)
    }

    /// Add a response for PATCH requests matching the path
    pub fn on_patch(self, path: &str, status: u16, body: &str) -> Self {
        self.on("PATCH", path, status, body)
    }

    /// Add a response for DELETE requests matching the path
    pub fn on_delete(self, path: &str, status: u16, body: &str) -> Self {
        self.on("DELETE", path, status, body)
    }

    /// Requests received so far, in order
    pub fn requests(&self) -> Vec<(String, String)> {
        self.requests.lock().unwrap().clone()
    }

    /// Build a kube Client from this mock service
    pub fn into_client(self) -> Client {
        Client::new(self, "default")
    }

    fn find_response(&self, method: &str, path: &str) -> Option<(u16, String)> {
        let responses = self.responses.lock().unwrap();

        if let Some(resp) = responses.get(&(method.to_string(), path.to_string())) {
            return Some(resp.clone());
        }

        // Longest registered prefix wins
        responses
            .iter()
            .filter(|((m, p), _)| m == method && path.starts_with(p.as_str()))
            .max_by_key(|((_, p), _)| p.len())
            .map(|(_, resp)| resp.clone())
    }
}

impl Default for MockService {
    fn default() -> Self {
        Self::new()
    }
}

impl Service<Request<Body>> for MockService {
    type Response = Response<Body>;
    type Error = tower::BoxError;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let method = req.method().to_string();
        let path = req.uri().path().to_string();

        self.requests
            .lock()
            .unwrap()
            .push((method.clone(), path.clone()));
        let (status, body) = self
            .find_response(&method, &path)
            .unwrap_or_else(|| (404, not_found_json("resource", &path)));

        Box::pin(async move {
            Ok(Response::builder()
                .status(status)
                .header("content-type", "application/json")
                .body(Body::from(body.into_bytes()))
                .unwrap())
        })
    }
}

/// Create a 404 not found response
pub fn not_found_json(resource: &str, name: &str) -> String {
    status_json(404, "NotFound", &format!("{} \"{}\" not found", resource, name))
}

/// Create a failure Status response
pub fn status_json(code: u16, reason: &str, message: &str) -> String {
    serde_json::json!({
        "kind": "Status",
        "apiVersion": "v1",
        "status": "Failure",
        "message": message,
        "reason": reason,
        "code": code
    })
    .to_string()
}

/// Create a mock TangServer JSON response
pub fn tang_server_json(name: &str, namespace: &str) -> String {
    serde_json::json!({
        "apiVersion": "nbde.openshift.io/v1alpha1",
        "kind": "TangServer",
        "metadata": {
            "name": name,
            "namespace": namespace,
            "uid": "test-uid"
        },
        "spec": {}
    })
    .to_string()
}

/// Create an empty list response
pub fn empty_list_json(kind: &str) -> String {
    serde_json::json!({
        "apiVersion": "v1",
        "kind": kind,
        "metadata": {},
        "items": []
    })
    .to_string()
}

#[derive(Default)]
struct ReplicaFiles {
    files: BTreeMap<String, (Vec<u8>, i64)>,
    fail_next_write: bool,
    fail_lists: bool,
    fail_renames: bool,
}

#[derive(Default)]
struct MemoryState {
    replicas: HashMap<String, ReplicaFiles>,
    fail_keygen: bool,
    generated: u32,
}

/// In-memory `ReplicaStore` keyed by pod name
#[derive(Default)]
pub struct MemoryReplicaStore {
    state: Mutex<MemoryState>,
}

/// Modification time of the first generated key pair
const GENERATED_EPOCH: i64 = 1_800_000_000;

impl MemoryReplicaStore {
    pub fn new(replicas: &[Replica]) -> Self {
        let store = Self::default();
        {
            let mut state = store.state.lock().unwrap();
            for replica in replicas {
                state
                    .replicas
                    .insert(replica.pod_name.clone(), ReplicaFiles::default());
            }
        }
        store
    }

    pub fn put(&self, replica: &Replica, path: &str, content: &str, modified: i64) {
        self.with_replica(replica, |r| {
            r.files
                .insert(path.to_string(), (content.as_bytes().to_vec(), modified));
        });
    }

    pub fn get(&self, replica: &Replica, path: &str) -> Option<Vec<u8>> {
        let state = self.state.lock().unwrap();
        state
            .replicas
            .get(&replica.pod_name)
            .and_then(|r| r.files.get(path))
            .map(|(content, _)| content.clone())
    }

    /// All paths present on a replica
    pub fn files(&self, replica: &Replica) -> BTreeSet<String> {
        let state = self.state.lock().unwrap();
        state
            .replicas
            .get(&replica.pod_name)
            .map(|r| r.files.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Fail the next write to a replica
    pub fn fail_writes_once(&self, replica: &Replica) {
        self.with_replica(replica, |r| r.fail_next_write = true);
    }

    /// Fail every listing of a replica
    pub fn fail_lists(&self, replica: &Replica) {
        self.with_replica(replica, |r| r.fail_lists = true);
    }

    /// Fail every rename on a replica
    pub fn fail_renames(&self, replica: &Replica) {
        self.with_replica(replica, |r| r.fail_renames = true);
    }

    pub fn fail_keygen(&self) {
        self.state.lock().unwrap().fail_keygen = true;
    }

    fn with_replica<T>(&self, replica: &Replica, f: impl FnOnce(&mut ReplicaFiles) -> T) -> T {
        let mut state = self.state.lock().unwrap();
        f(state.replicas.entry(replica.pod_name.clone()).or_default())
    }

    fn failure(replica: &Replica, message: &str) -> TangError {
        TangError::ExecFailed {
            pod: replica.pod_name.clone(),
            message: message.to_string(),
        }
    }
}

fn dir_of(path: &str) -> &str {
    path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

#[async_trait]
impl ReplicaStore for MemoryReplicaStore {
    async fn list_key_files(&self, replica: &Replica, key_dir: &str) -> TangResult<Vec<KeyFileInfo>> {
        self.with_replica(replica, |r| {
            if r.fail_lists {
                return Err(Self::failure(replica, "listing failed"));
            }
            Ok(r.files
                .iter()
                .filter(|(path, _)| dir_of(path) == key_dir.trim_end_matches('/'))
                .filter(|(path, _)| path.ends_with(".jwk"))
                .map(|(path, (_, modified))| KeyFileInfo {
                    name: path.rsplit('/').next().unwrap_or_default().to_string(),
                    modified: *modified,
                })
                .collect())
        })
    }

    async fn read_file(&self, replica: &Replica, path: &str) -> TangResult<Option<Vec<u8>>> {
        Ok(self.get(replica, path))
    }

    async fn write_file(
        &self,
        replica: &Replica,
        path: &str,
        content: &[u8],
        modified: Option<i64>,
    ) -> TangResult<()> {
        self.with_replica(replica, |r| {
            if r.fail_next_write {
                r.fail_next_write = false;
                return Err(Self::failure(replica, "write failed"));
            }
            r.files
                .insert(path.to_string(), (content.to_vec(), modified.unwrap_or(GENERATED_EPOCH)));
            Ok(())
        })
    }

    async fn rename_file(&self, replica: &Replica, from: &str, to: &str) -> TangResult<()> {
        self.with_replica(replica, |r| {
            if r.fail_renames {
                return Err(Self::failure(replica, "rename failed"));
            }
            match r.files.remove(from) {
                Some(file) => {
                    r.files.insert(to.to_string(), file);
                    Ok(())
                }
                None => Err(Self::failure(replica, "no such file")),
            }
        })
    }

    async fn remove_file(&self, replica: &Replica, path: &str) -> TangResult<()> {
        self.with_replica(replica, |r| {
            r.files.remove(path);
        });
        Ok(())
    }

    async fn generate_key_pair(&self, replica: &Replica, key_dir: &str) -> TangResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_keygen {
            return Err(Self::failure(replica, "keygen failed"));
        }
        state.generated += 1;
        let n = state.generated;
        let modified = GENERATED_EPOCH + i64::from(n);

        let signing = serde_json::json!({
            "alg": "ES512", "crv": "P-521", "key_ops": ["sign", "verify"],
            "kty": "EC", "x": format!("gen-sig-x-{}", n), "y": format!("gen-sig-y-{}", n)
        });
        let exchange = serde_json::json!({
            "alg": "ECMR", "crv": "P-521", "key_ops": ["deriveKey"],
            "kty": "EC", "x": format!("gen-exc-x-{}", n), "y": format!("gen-exc-y-{}", n)
        });

        let files = &mut state
            .replicas
            .entry(replica.pod_name.clone())
            .or_default()
            .files;
        files.insert(
            format!("{}/gen-{}-sig.jwk", key_dir, n),
            (signing.to_string().into_bytes(), modified),
        );
        files.insert(
            format!("{}/gen-{}-exc.jwk", key_dir, n),
            (exchange.to_string().into_bytes(), modified),
        );
        Ok(())
    }
}
