//! Common test utilities for folio integration tests
//!
//! Scripted extractors and probing services so pipeline tests run
//! without touching the filesystem or a real analysis service.

#![allow(dead_code)]

use async_trait::async_trait;
use folio::analysis::JobOrchestrator;
use folio::backoff::BackoffPolicy;
use folio::rules::{ProfileLibrary, RuleDocument, RuleProfile};
use folio::service::{AnalysisRequest, AnalysisResponse, AnalysisService, MockService, ServiceError};
use folio::{ExtractionError, JobBoard, JobEvent, SourceRef, TextExtractor};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const PROFILE: &str = "house";

/// `count` pages separated by form feeds, each naming its page number.
pub fn pages(count: usize) -> String {
    (1..=count)
        .map(|n| format!("Page {} of the manuscript.", n))
        .collect::<Vec<_>>()
        .join("\x0c")
}

/// A library with one profile holding one inline rule document.
pub fn house_rules() -> Arc<ProfileLibrary> {
    Arc::new(ProfileLibrary::from_profiles([RuleProfile::new(
        PROFILE,
        "House style",
    )
    .with_document(RuleDocument::inline(
        "Numbers",
        "Use numerals for percentages.",
    ))]))
}

/// A fast retry policy for tests that do not measure time.
pub fn quick_backoff() -> BackoffPolicy {
    BackoffPolicy::new(3, Duration::from_millis(1))
}

/// Orchestrator over a fresh board with no delays.
pub fn orchestrator(
    extractor: Arc<dyn TextExtractor>,
    service: Arc<dyn AnalysisService>,
) -> JobOrchestrator {
    JobOrchestrator::new(Arc::new(JobBoard::new()), extractor, house_rules(), service)
        .with_backoff(quick_backoff())
        .with_chunk_delay(Duration::ZERO)
}

/// Collect every event already broadcast on a receiver.
pub fn drain(rx: &mut tokio::sync::broadcast::Receiver<JobEvent>) -> Vec<JobEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

// ---------------------------------------------------------------------------
// Extractors
// ---------------------------------------------------------------------------

/// Extractor answering by display name.
///
/// Documents without an entry get [`pages`]`(1)`. Scripted outcomes are
/// consumed in order before falling back to the fixed text.
#[derive(Default)]
pub struct ScriptedExtractor {
    texts: HashMap<String, String>,
    scripts: Mutex<HashMap<String, VecDeque<Result<String, ExtractionError>>>>,
    calls: AtomicUsize,
}

impl ScriptedExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_text(mut self, name: &str, text: impl Into<String>) -> Self {
        self.texts.insert(name.to_string(), text.into());
        self
    }

    pub fn with_script(
        self,
        name: &str,
        outcomes: impl IntoIterator<Item = Result<String, ExtractionError>>,
    ) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default()
            .extend(outcomes);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextExtractor for ScriptedExtractor {
    async fn extract(&self, source: &SourceRef) -> Result<String, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&source.display_name)
            .and_then(|queue| queue.pop_front());
        if let Some(outcome) = scripted {
            return outcome;
        }
        Ok(self
            .texts
            .get(&source.display_name)
            .cloned()
            .unwrap_or_else(|| pages(1)))
    }
}

// ---------------------------------------------------------------------------
// Services
// ---------------------------------------------------------------------------

/// Wraps a [`MockService`] and records how many calls overlap and how
/// many jobs the board reports as processing during each call.
pub struct ProbeService {
    inner: MockService,
    board: Mutex<Option<Arc<JobBoard>>>,
    in_call: AtomicUsize,
    max_in_call: AtomicUsize,
    max_processing: AtomicUsize,
    latency: Duration,
}

impl ProbeService {
    pub fn new(inner: MockService) -> Self {
        Self {
            inner,
            board: Mutex::new(None),
            in_call: AtomicUsize::new(0),
            max_in_call: AtomicUsize::new(0),
            max_processing: AtomicUsize::new(0),
            latency: Duration::ZERO,
        }
    }

    /// Sleep this long inside every call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn watch(&self, board: Arc<JobBoard>) {
        *self.board.lock().unwrap() = Some(board);
    }

    pub fn max_in_call(&self) -> usize {
        self.max_in_call.load(Ordering::SeqCst)
    }

    pub fn max_processing(&self) -> usize {
        self.max_processing.load(Ordering::SeqCst)
    }

    pub fn mock(&self) -> &MockService {
        &self.inner
    }
}

#[async_trait]
impl AnalysisService for ProbeService {
    async fn call(&self, request: &AnalysisRequest) -> Result<AnalysisResponse, ServiceError> {
        let now = self.in_call.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_call.fetch_max(now, Ordering::SeqCst);
        let board = self.board.lock().unwrap().clone();
        if let Some(board) = board {
            self.max_processing
                .fetch_max(board.processing_count(), Ordering::SeqCst);
        }

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let result = self.inner.call(request).await;
        self.in_call.fetch_sub(1, Ordering::SeqCst);
        result
    }
}
