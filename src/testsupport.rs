//! Shared test fixtures for stream, stats, session and config tests.
//!
//! Scripted implementations of the I/O seams live here so each test module
//! can drive the pipeline without sockets or timers of its own.

use crate::error::ApiError;
use crate::session::{ChatRequestBody, ChatTransport, MessageSink};
use crate::stats::{StatsResponse, StatsSource};
use crate::stream::ChunkSource;
use crate::types::Message;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

static TEST_DIR_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Temporary directory fixture with best-effort cleanup.
#[derive(Debug)]
pub struct TestTempDir {
    path: PathBuf,
}

impl TestTempDir {
    /// Create a unique temporary directory with a readable prefix.
    pub fn new(prefix: &str) -> Self {
        let suffix = TEST_DIR_COUNTER.fetch_add(1, Ordering::Relaxed);
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let dir = std::env::temp_dir().join(format!("duet-{prefix}-{millis}-{suffix}"));
        fs::create_dir_all(&dir).expect("failed to create temporary fixture directory");
        Self { path: dir }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write UTF-8 text to a child path, creating parent directories as needed.
    pub fn write_text(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.path.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("failed to create parent directories for fixture");
        }
        fs::write(&path, content).expect("failed to write fixture file");
        path
    }
}

impl Drop for TestTempDir {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}

/// One `data:` frame carrying a JSON payload.
pub fn data_frame(payload: Value) -> String {
    format!("data: {payload}\n\n")
}

/// Concatenate several payloads into a single body chunk.
pub fn frames(payloads: impl IntoIterator<Item = Value>) -> Vec<u8> {
    payloads
        .into_iter()
        .map(data_frame)
        .collect::<String>()
        .into_bytes()
}

enum Tail {
    End,
    Fail(ApiError),
    Hang,
}

/// Chunk source replaying fixed chunks, then ending, failing or hanging.
pub struct ScriptedChunks {
    chunks: VecDeque<Vec<u8>>,
    tail: Option<Tail>,
}

impl ScriptedChunks {
    pub fn new(chunks: Vec<Vec<u8>>) -> Self {
        Self {
            chunks: chunks.into(),
            tail: Some(Tail::End),
        }
    }

    /// Report `err` after the last chunk instead of a clean end.
    pub fn then_fail(mut self, err: ApiError) -> Self {
        self.tail = Some(Tail::Fail(err));
        self
    }

    /// Never yield again after the last chunk.
    pub fn then_hang(mut self) -> Self {
        self.tail = Some(Tail::Hang);
        self
    }
}

#[async_trait]
impl ChunkSource for ScriptedChunks {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, ApiError> {
        if let Some(chunk) = self.chunks.pop_front() {
            return Ok(Some(chunk));
        }
        match self.tail.take() {
            Some(Tail::Fail(err)) => Err(err),
            Some(Tail::Hang) => std::future::pending().await,
            Some(Tail::End) | None => Ok(None),
        }
    }
}

/// Stats source answering from a script, then from a default.
pub struct ScriptedStats {
    script: Mutex<VecDeque<Result<StatsResponse, ApiError>>>,
    fallback: StatsResponse,
    calls: AtomicUsize,
}

impl ScriptedStats {
    pub fn new(script: Vec<Result<StatsResponse, ApiError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: StatsResponse::Pending,
            calls: AtomicUsize::new(0),
        }
    }

    /// Response returned once the script runs out (pending by default).
    pub fn with_default(mut self, response: StatsResponse) -> Self {
        self.fallback = response;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StatsSource for ScriptedStats {
    async fn fetch(
        &self,
        _root_span_id: &str,
        _conversation_id: &str,
    ) -> Result<StatsResponse, ApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .script
            .lock()
            .expect("stats script lock poisoned")
            .pop_front();
        next.unwrap_or_else(|| Ok(self.fallback.clone()))
    }
}

/// Chat transport serving one scripted stream per turn.
#[derive(Default)]
pub struct ScriptedTransport {
    turns: Mutex<VecDeque<Result<ScriptedChunks, ApiError>>>,
    requests: Mutex<Vec<ChatRequestBody>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turn(self, chunks: ScriptedChunks) -> Self {
        self.push(Ok(chunks))
    }

    pub fn failing_turn(self, err: ApiError) -> Self {
        self.push(Err(err))
    }

    fn push(self, turn: Result<ScriptedChunks, ApiError>) -> Self {
        self.turns
            .lock()
            .expect("transport script lock poisoned")
            .push_back(turn);
        self
    }

    /// Request bodies received so far.
    pub fn requests(&self) -> Vec<ChatRequestBody> {
        self.requests
            .lock()
            .expect("transport request lock poisoned")
            .clone()
    }
}

#[async_trait]
impl ChatTransport for ScriptedTransport {
    async fn open(&self, body: &ChatRequestBody) -> Result<Box<dyn ChunkSource>, ApiError> {
        self.requests
            .lock()
            .expect("transport request lock poisoned")
            .push(body.clone());
        let turn = self
            .turns
            .lock()
            .expect("transport script lock poisoned")
            .pop_front();
        match turn {
            Some(Ok(chunks)) => Ok(Box::new(chunks)),
            Some(Err(err)) => Err(err),
            None => Err(ApiError::InvalidResponse("no scripted turn left".into())),
        }
    }
}

/// Sink that records every save call.
#[derive(Default)]
pub struct RecordingSink {
    saved: Mutex<Vec<(usize, Message)>>,
}

impl RecordingSink {
    pub fn saved(&self) -> Vec<(usize, Message)> {
        self.saved.lock().expect("sink lock poisoned").clone()
    }
}

impl MessageSink for RecordingSink {
    fn save(&self, message: &Message, index: usize) {
        self.saved
            .lock()
            .expect("sink lock poisoned")
            .push((index, message.clone()));
    }
}
