//! Background builds on a tokio worker
//!
//! The worker owns its own [`NavMeshBuildCache`] and answers one
//! [`WorkerRequest`] at a time. [`WorkerClient`] tags requests with ids,
//! matches the responses and falls back to building in place whenever the
//! worker cannot deliver a result.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, warn};
use recast_common::{Error, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::config::BuildOptions;
use crate::extract::ExtractionResult;
use crate::generator::{generate, GenerateOutput};
use crate::tile_cache::NavMeshBuildCache;

/// Message sent to the worker
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WorkerRequest {
    Build {
        id: u64,
        extraction: ExtractionResult,
        options: BuildOptions,
    },
}

/// Message sent back by the worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WorkerResponse {
    Result {
        id: u64,
        result: Option<GenerateOutput>,
    },
    Error {
        id: u64,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stack: Option<String>,
    },
}

impl WorkerResponse {
    pub fn id(&self) -> u64 {
        match self {
            WorkerResponse::Result { id, .. } | WorkerResponse::Error { id, .. } => *id,
        }
    }
}

/// Both ends of a worker's channels, seen from the client
#[derive(Debug)]
pub struct WorkerHandle {
    pub requests: mpsc::UnboundedSender<WorkerRequest>,
    pub responses: mpsc::UnboundedReceiver<WorkerResponse>,
}

/// Starts a worker task on the current tokio runtime.
///
/// Panics outside a runtime, like `tokio::spawn`.
pub fn spawn_worker() -> WorkerHandle {
    let (request_tx, request_rx) = mpsc::unbounded_channel::<WorkerRequest>();
    let (response_tx, response_rx) = mpsc::unbounded_channel::<WorkerResponse>();
    tokio::spawn(worker_loop(request_rx, response_tx));
    WorkerHandle {
        requests: request_tx,
        responses: response_rx,
    }
}

async fn worker_loop(
    mut requests: mpsc::UnboundedReceiver<WorkerRequest>,
    responses: mpsc::UnboundedSender<WorkerResponse>,
) {
    let mut cache = NavMeshBuildCache::new();

    while let Some(request) = requests.recv().await {
        let WorkerRequest::Build {
            id,
            extraction,
            options,
        } = request;
        debug!("worker: build request {id}");

        let job = tokio::task::spawn_blocking(move || {
            let result = generate(&extraction, &options, &mut cache);
            (cache, result)
        });
        let response = match job.await {
            Ok((returned, result)) => {
                cache = returned;
                match result {
                    Ok(result) => WorkerResponse::Result { id, result },
                    Err(e) => WorkerResponse::Error {
                        id,
                        message: e.to_string(),
                        stack: None,
                    },
                }
            }
            Err(e) => {
                // The cache went down with the task
                cache = NavMeshBuildCache::new();
                WorkerResponse::Error {
                    id,
                    message: format!("build task failed: {e}"),
                    stack: Some(format!("{e:?}")),
                }
            }
        };

        if responses.send(response).is_err() {
            debug!("worker: client went away, stopping");
            break;
        }
    }
}

#[derive(Debug, Default)]
struct Pending {
    closed: bool,
    senders: HashMap<u64, oneshot::Sender<WorkerResponse>>,
}

fn lock(pending: &Mutex<Pending>) -> MutexGuard<'_, Pending> {
    pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn dispatch(mut responses: mpsc::UnboundedReceiver<WorkerResponse>, pending: Arc<Mutex<Pending>>) {
    while let Some(response) = responses.recv().await {
        let id = response.id();
        let sender = lock(&pending).senders.remove(&id);
        match sender {
            Some(sender) => {
                let _ = sender.send(response);
            }
            None => warn!("dropping worker response for unknown request {id}"),
        }
    }

    // Dropping the senders rejects whatever is still waiting
    let mut pending = lock(&pending);
    pending.closed = true;
    pending.senders.clear();
    debug!("worker response channel closed");
}

/// Submits builds to a worker and falls back to building in place
#[derive(Debug)]
pub struct WorkerClient {
    next_id: AtomicU64,
    requests: Option<mpsc::UnboundedSender<WorkerRequest>>,
    pending: Arc<Mutex<Pending>>,
    fallback: tokio::sync::Mutex<NavMeshBuildCache>,
}

impl WorkerClient {
    /// Spawns a worker and connects to it
    pub fn spawn() -> Self {
        Self::connect(spawn_worker())
    }

    /// Connects to an existing worker and starts the response dispatcher
    pub fn connect(handle: WorkerHandle) -> Self {
        let pending = Arc::new(Mutex::new(Pending::default()));
        tokio::spawn(dispatch(handle.responses, Arc::clone(&pending)));
        Self {
            next_id: AtomicU64::new(1),
            requests: Some(handle.requests),
            pending,
            fallback: tokio::sync::Mutex::new(NavMeshBuildCache::new()),
        }
    }

    /// A client that always builds in place
    pub fn without_worker() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            requests: None,
            pending: Arc::new(Mutex::new(Pending::default())),
            fallback: tokio::sync::Mutex::new(NavMeshBuildCache::new()),
        }
    }

    pub fn has_worker(&self) -> bool {
        self.requests.as_ref().map_or(false, |tx| !tx.is_closed()) && !lock(&self.pending).closed
    }

    /// Builds on the worker, or in place when the worker fails.
    ///
    /// The result does not depend on which path produced it.
    pub async fn generate(
        &self,
        extraction: ExtractionResult,
        options: BuildOptions,
    ) -> Result<Option<GenerateOutput>> {
        if !self.has_worker() {
            return self.generate_in_place(&extraction, &options).await;
        }

        match self.request(extraction.clone(), options.clone()).await {
            Ok(WorkerResponse::Result { result, .. }) => return Ok(result),
            Ok(WorkerResponse::Error { id, message, .. }) => {
                warn!("worker failed request {id}, building in place: {message}");
            }
            Err(e) => warn!("worker unavailable, building in place: {e}"),
        }
        self.generate_in_place(&extraction, &options).await
    }

    /// Builds on the caller's task with the client's own cache
    pub async fn generate_in_place(
        &self,
        extraction: &ExtractionResult,
        options: &BuildOptions,
    ) -> Result<Option<GenerateOutput>> {
        let mut cache = self.fallback.lock().await;
        generate(extraction, options, &mut cache)
    }

    async fn request(&self, extraction: ExtractionResult, options: BuildOptions) -> Result<WorkerResponse> {
        let requests = self
            .requests
            .as_ref()
            .ok_or_else(|| Error::Worker("no worker".to_string()))?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = lock(&self.pending);
            if pending.closed {
                return Err(Error::Worker("worker response channel closed".to_string()));
            }
            pending.senders.insert(id, tx);
        }

        let request = WorkerRequest::Build {
            id,
            extraction,
            options,
        };
        if requests.send(request).is_err() {
            lock(&self.pending).senders.remove(&id);
            return Err(Error::Worker("worker stopped".to_string()));
        }

        rx.await
            .map_err(|_| Error::Worker(format!("request {id} dropped without a reply")))
    }
}
