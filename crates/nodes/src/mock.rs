//! Test doubles for the executor capability bundle.
//!
//! Useful in unit and integration tests where real LLM or file-store
//! collaborators are either unavailable or irrelevant.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::NodeError;
use crate::llm::{LlmClient, LlmError, LlmRequest};
use crate::traits::{FileStore, Services, StoredFile};

/// A scripted LLM double that records every request it receives.
///
/// Responses are popped from the script in order; once the script is
/// exhausted the fallback (if any) is returned for every further call.
pub struct MockLlm {
    script: Mutex<VecDeque<Result<String, LlmError>>>,
    fallback: Option<String>,
    delay: Option<Duration>,
    calls: Mutex<Vec<LlmRequest>>,
}

impl MockLlm {
    /// Always answer with the given text.
    pub fn returning(text: impl Into<String>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Some(text.into()),
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Answer with the given results in order, then fail.
    pub fn scripted(items: impl IntoIterator<Item = Result<String, LlmError>>) -> Self {
        Self {
            script: Mutex::new(items.into_iter().collect()),
            fallback: None,
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Sleep before answering, to simulate a slow provider.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Every request seen so far, in call order.
    pub fn calls(&self) -> Vec<LlmRequest> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of times `complete` has been called.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn complete(&self, request: &LlmRequest) -> Result<String, LlmError> {
        self.calls.lock().unwrap().push(request.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(item) = self.script.lock().unwrap().pop_front() {
            return item;
        }
        match &self.fallback {
            Some(text) => Ok(text.clone()),
            None => Err(LlmError::InvalidResponse("mock script exhausted".into())),
        }
    }
}

/// In-memory file store double.
#[derive(Default)]
pub struct MockFileStore {
    files: Mutex<HashMap<Uuid, StoredFile>>,
}

impl MockFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, file_id: Uuid, file: StoredFile) {
        self.files.lock().unwrap().insert(file_id, file);
    }
}

#[async_trait]
impl FileStore for MockFileStore {
    async fn load(&self, file_id: Uuid) -> Result<StoredFile, NodeError> {
        self.files
            .lock()
            .unwrap()
            .get(&file_id)
            .cloned()
            .ok_or_else(|| NodeError::NotFound(format!("File {file_id} not found")))
    }
}

/// A service bundle whose LLM answers everything with an empty string.
pub fn mock_services() -> Services {
    mock_services_with_llm(Arc::new(MockLlm::returning("")))
}

/// A service bundle around the given LLM double and an empty file store.
pub fn mock_services_with_llm(llm: Arc<MockLlm>) -> Services {
    Services {
        llm,
        files: Arc::new(MockFileStore::new()),
    }
}
