use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

use super::{GenerationRequest, LlmError, TextGenerator};

/// Deterministic backend that replays queued responses in order.
///
/// Every request is recorded. Once the queue is empty the backend reports
/// itself unavailable, which exercises the callers' fallback paths.
pub struct ScriptedTextGenerator {
    model: String,
    responses: Mutex<VecDeque<Result<String, LlmError>>>,
    requests: Mutex<Vec<GenerationRequest>>,
    available: bool,
}

impl ScriptedTextGenerator {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            responses: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            available: true,
        }
    }

    /// A backend that fails every call with `LlmError::Unavailable`.
    pub fn unavailable(model: impl Into<String>) -> Self {
        Self {
            available: false,
            ..Self::new(model)
        }
    }

    pub fn with_responses<I, S>(self, responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for response in responses {
            self.push_response(response);
        }
        self
    }

    pub fn push_response(&self, response: impl Into<String>) {
        if let Ok(mut queue) = self.responses.lock() {
            queue.push_back(Ok(response.into()));
        }
    }

    pub fn push_error(&self, error: LlmError) {
        if let Ok(mut queue) = self.responses.lock() {
            queue.push_back(Err(error));
        }
    }

    /// Number of `generate` calls so far.
    pub fn calls(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().map(|r| r.len()).unwrap_or(0)
    }
}

#[async_trait]
impl TextGenerator for ScriptedTextGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, LlmError> {
        self.requests
            .lock()
            .map_err(|_| LlmError::Backend("request log poisoned".to_string()))?
            .push(request.clone());
        if !self.available {
            return Err(LlmError::Unavailable);
        }
        let next = self
            .responses
            .lock()
            .map_err(|_| LlmError::Backend("response queue poisoned".to_string()))?
            .pop_front();
        next.unwrap_or(Err(LlmError::Unavailable))
    }
}
