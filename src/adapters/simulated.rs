//! In-memory collaborators for simulation mode and tests.
//!
//! `SimulatedNodes` holds nodes and addon file trees that can be changed at
//! runtime; `SimulatedFileApi` serves scripted copy responses and records
//! every call; `RecordingSignals` keeps every emitted event.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::core::file_api::{CopyRequest, CopyResponse, FileApi};
use crate::core::nodes::{Addon, FileRecord, Node, NodeAdapter, User};
use crate::core::signals::{ArchiveEvent, ArchiveSignals};
use crate::error::{ArchiverError, Result};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct NodeState {
    nodes: HashMap<String, Node>,
    addons: HashMap<(String, String), Vec<FileRecord>>,
    listing_failures: HashMap<(String, String), Value>,
}

#[derive(Default)]
pub struct SimulatedNodes {
    state: Mutex<NodeState>,
}

impl SimulatedNodes {
    pub fn new() -> Self {
        Self::default()
    }

    /// A project with two addons and its registration, for simulation mode.
    pub fn demo() -> Self {
        let nodes = Self::new();
        nodes.add_node("sim01", "Simulated Project");
        nodes.add_node("simreg", "Simulated Registration");
        nodes.add_addon(
            "sim01",
            "osfstorage",
            vec![
                FileRecord::folder("/d1/", "/data/"),
                FileRecord::file("/f1", "/data/results.csv", 2048),
                FileRecord::file("/f2", "/README.md", 512),
            ],
        );
        nodes.add_addon("sim01", "github", Vec::new());
        nodes
    }

    pub fn add_node(&self, id: &str, title: &str) {
        lock(&self.state).nodes.insert(
            id.to_string(),
            Node {
                id: id.to_string(),
                title: title.to_string(),
            },
        );
    }

    pub fn remove_node(&self, id: &str) {
        lock(&self.state).nodes.remove(id);
    }

    pub fn add_addon(&self, node_id: &str, short_name: &str, files: Vec<FileRecord>) {
        lock(&self.state)
            .addons
            .insert((node_id.to_string(), short_name.to_string()), files);
    }

    /// Make every listing of this addon fail with the given provider payload.
    pub fn fail_listing(&self, node_id: &str, short_name: &str, payload: Value) {
        lock(&self.state)
            .listing_failures
            .insert((node_id.to_string(), short_name.to_string()), payload);
    }
}

#[async_trait]
impl NodeAdapter for SimulatedNodes {
    async fn get_node(&self, node_id: &str) -> Result<Option<Node>> {
        Ok(lock(&self.state).nodes.get(node_id).cloned())
    }

    async fn get_addon(&self, node_id: &str, short_name: &str) -> Result<Option<Addon>> {
        let state = lock(&self.state);
        let key = (node_id.to_string(), short_name.to_string());
        Ok(state
            .addons
            .contains_key(&key)
            .then(|| Addon::new(node_id, short_name)))
    }

    async fn file_tree(&self, node: &Node, addon: &Addon, _user: &User) -> Result<Vec<FileRecord>> {
        let state = lock(&self.state);
        let key = (node.id.clone(), addon.short_name.clone());
        if let Some(payload) = state.listing_failures.get(&key) {
            return Err(ArchiverError::transport(Some(503), payload.clone()));
        }
        Ok(state.addons.get(&key).cloned().unwrap_or_default())
    }
}

enum Scripted {
    Respond(CopyResponse),
    Unreachable(String),
}

#[derive(Default)]
struct FileApiState {
    scripted: HashMap<String, VecDeque<Scripted>>,
    calls: Vec<(String, CopyRequest)>,
}

/// File API that answers 201 unless a response was scripted for the source
/// provider.
#[derive(Default)]
pub struct SimulatedFileApi {
    state: Mutex<FileApiState>,
}

impl SimulatedFileApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for the next copy of this source provider.
    pub fn respond(&self, provider: &str, status: u16, body: Value) {
        lock(&self.state)
            .scripted
            .entry(provider.to_string())
            .or_default()
            .push_back(Scripted::Respond(CopyResponse { status, body }));
    }

    /// Queue a connection failure for the next copy of this source provider.
    pub fn unreachable(&self, provider: &str, message: &str) {
        lock(&self.state)
            .scripted
            .entry(provider.to_string())
            .or_default()
            .push_back(Scripted::Unreachable(message.to_string()));
    }

    pub fn calls(&self) -> Vec<CopyRequest> {
        lock(&self.state)
            .calls
            .iter()
            .map(|(_, req)| req.clone())
            .collect()
    }

    pub fn call_urls(&self) -> Vec<String> {
        lock(&self.state)
            .calls
            .iter()
            .map(|(url, _)| url.clone())
            .collect()
    }

    pub fn calls_for(&self, provider: &str) -> usize {
        lock(&self.state)
            .calls
            .iter()
            .filter(|(_, req)| req.source.provider == provider)
            .count()
    }
}

#[async_trait]
impl FileApi for SimulatedFileApi {
    async fn copy(&self, url: &str, request: &CopyRequest) -> Result<CopyResponse> {
        let mut state = lock(&self.state);
        state.calls.push((url.to_string(), request.clone()));

        let next = state
            .scripted
            .get_mut(&request.source.provider)
            .and_then(|queue| queue.pop_front());

        match next {
            Some(Scripted::Respond(response)) => Ok(response),
            Some(Scripted::Unreachable(message)) => {
                Err(ArchiverError::transport(None, json!({ "error": message })))
            }
            None => Ok(CopyResponse {
                status: 201,
                body: json!({}),
            }),
        }
    }
}

/// Keeps every signal it receives.
#[derive(Default)]
pub struct RecordingSignals {
    events: Mutex<Vec<ArchiveEvent>>,
}

impl RecordingSignals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ArchiveEvent> {
        lock(&self.events).clone()
    }

    pub fn completed(&self) -> usize {
        lock(&self.events)
            .iter()
            .filter(|e| matches!(e, ArchiveEvent::ArchiveCompleted { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        lock(&self.events)
            .iter()
            .filter(|e| matches!(e, ArchiveEvent::ArchiveFailed { .. }))
            .count()
    }

    /// Error payload of the first `archive_failed` signal.
    pub fn failure_errors(&self) -> Option<Value> {
        lock(&self.events).iter().find_map(|e| match e {
            ArchiveEvent::ArchiveFailed { errors, .. } => Some(errors.clone()),
            _ => None,
        })
    }
}

#[async_trait]
impl ArchiveSignals for RecordingSignals {
    async fn send(&self, event: ArchiveEvent) -> Result<()> {
        lock(&self.events).push(event);
        Ok(())
    }
}
