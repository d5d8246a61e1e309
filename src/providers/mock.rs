//! Scripted in-memory gateway for tests

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use futures::stream;

use super::{Chunk, ChunkStream, GenerateContentRequest, Gateway, ProviderError};

/// What the gateway should do with the next streamed turn
pub enum ScriptedStream {
    /// Deliver these chunk texts, then finish
    Chunks(Vec<Option<&'static str>>),
    /// Deliver these chunk texts, then fail
    FailAfter(Vec<Option<&'static str>>),
    /// Fail before any chunk is delivered
    Reject,
}

#[derive(Default)]
pub struct MockGateway {
    fail_open: Mutex<usize>,
    streams: Mutex<VecDeque<ScriptedStream>>,
    replies: Mutex<VecDeque<Result<Option<String>, String>>>,
    pub requests: Mutex<Vec<GenerateContentRequest>>,
    pub opened: Mutex<Vec<String>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` session opens fail
    pub fn failing_opens(self, n: usize) -> Self {
        *self.fail_open.lock().unwrap() = n;
        self
    }

    pub fn with_stream(self, script: ScriptedStream) -> Self {
        self.streams.lock().unwrap().push_back(script);
        self
    }

    pub fn with_reply(self, reply: Result<Option<&str>, &str>) -> Self {
        let reply = reply
            .map(|text| text.map(str::to_string))
            .map_err(str::to_string);
        self.replies.lock().unwrap().push_back(reply);
        self
    }

    pub fn last_request(&self) -> GenerateContentRequest {
        self.requests
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no request was sent")
    }
}

fn chunk(text: Option<&str>) -> Result<Chunk, ProviderError> {
    Ok(Chunk {
        text: text.map(str::to_string),
    })
}

#[async_trait]
impl Gateway for MockGateway {
    fn model(&self) -> &str {
        "mock-model"
    }

    async fn open_session(&self, system_instruction: &str) -> Result<String, ProviderError> {
        let mut fail_open = self.fail_open.lock().unwrap();
        if *fail_open > 0 {
            *fail_open -= 1;
            return Err(ProviderError::Api {
                status: 503,
                message: "unreachable".to_string(),
            });
        }
        self.opened.lock().unwrap().push(system_instruction.to_string());
        Ok(uuid::Uuid::new_v4().to_string())
    }

    async fn stream_content(&self, request: GenerateContentRequest) -> Result<ChunkStream, ProviderError> {
        self.requests.lock().unwrap().push(request);

        let script = self
            .streams
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(ScriptedStream::Chunks(vec![]));

        let items: Vec<Result<Chunk, ProviderError>> = match script {
            ScriptedStream::Chunks(texts) => texts.into_iter().map(chunk).collect(),
            ScriptedStream::FailAfter(texts) => texts
                .into_iter()
                .map(chunk)
                .chain(std::iter::once(Err(ProviderError::InvalidResponse(
                    "connection reset".to_string(),
                ))))
                .collect(),
            ScriptedStream::Reject => {
                return Err(ProviderError::Api {
                    status: 500,
                    message: "internal".to_string(),
                })
            }
        };

        Ok(Box::pin(stream::iter(items)))
    }

    async fn generate_content(&self, request: GenerateContentRequest) -> Result<Option<String>, ProviderError> {
        self.requests.lock().unwrap().push(request);

        match self.replies.lock().unwrap().pop_front() {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => Err(ProviderError::Api { status: 500, message }),
            None => Ok(None),
        }
    }
}
