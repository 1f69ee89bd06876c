//! In-process transport double shared by the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use quarry::{QueryError, Transport, TransportRequest};
use serde_json::Value;
use tokio::sync::Notify;

/// Records every request and answers from a queue of canned responses.
///
/// When the queue is empty the fallback response is returned. With a gate
/// installed each call waits for `open_gate`, ignoring the request's signal,
/// to model a transport that cannot be aborted.
#[derive(Default)]
pub struct MockTransport {
    calls: AtomicUsize,
    requests: Mutex<Vec<TransportRequest>>,
    responses: Mutex<VecDeque<Result<Value, QueryError>>>,
    fallback: Mutex<Option<Result<Value, QueryError>>>,
    gate: Option<Arc<Notify>>,
    started: Arc<Notify>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn gated() -> Arc<Self> {
        Arc::new(Self {
            gate: Some(Arc::new(Notify::new())),
            ..Default::default()
        })
    }

    pub fn respond(&self, response: Result<Value, QueryError>) {
        self.responses
            .lock()
            .expect("responses lock")
            .push_back(response);
    }

    pub fn always(&self, response: Result<Value, QueryError>) {
        *self.fallback.lock().expect("fallback lock") = Some(response);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    /// Release one waiting call.
    pub fn open_gate(&self) {
        if let Some(gate) = &self.gate {
            gate.notify_one();
        }
    }

    /// Resolves once a call has entered `send`.
    pub async fn wait_started(&self) {
        self.started.notified().await;
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: TransportRequest) -> Result<Value, QueryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .expect("requests lock")
            .push(request);
        self.started.notify_one();

        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        let queued = self.responses.lock().expect("responses lock").pop_front();
        match queued {
            Some(response) => response,
            None => self
                .fallback
                .lock()
                .expect("fallback lock")
                .clone()
                .unwrap_or(Ok(Value::Null)),
        }
    }
}
