//! Deterministic chat/embeddings bindings for the test suite.
//!
//! Scripts are queues: each `stream_chat` call pops the next event list and
//! replays it over the channel; each `complete` call pops the next canned
//! response. Requests are recorded for assertions.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::LlmError;
use crate::stream::StreamEvent;
use crate::types::{ChatRequest, ChatResponse};
use crate::{ChatApi, EmbeddingsApi};

#[derive(Default)]
pub struct ScriptedChat {
    streams: Mutex<VecDeque<Vec<StreamEvent>>>,
    completions: Mutex<VecDeque<ChatResponse>>,
    requests: Mutex<Vec<ChatRequest>>,
    fail_next: Mutex<u32>,
}

impl ScriptedChat {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a scripted streaming response.
    pub fn push_stream(&self, events: Vec<StreamEvent>) {
        self.streams.lock().unwrap().push_back(events);
    }

    /// Queue a plain-text streaming response from token chunks.
    pub fn push_text_stream(&self, chunks: &[&str]) {
        let mut events: Vec<StreamEvent> = chunks
            .iter()
            .map(|c| StreamEvent::TextDelta {
                text: c.to_string(),
            })
            .collect();
        events.push(StreamEvent::Done {
            finish_reason: "stop".to_string(),
        });
        self.push_stream(events);
    }

    /// Queue a non-streaming response.
    pub fn push_completion(&self, response: ChatResponse) {
        self.completions.lock().unwrap().push_back(response);
    }

    pub fn push_text_completion(&self, content: &str) {
        self.push_completion(ChatResponse {
            content: content.to_string(),
            tool_calls: Vec::new(),
            usage: None,
            finish_reason: "stop".to_string(),
        });
    }

    /// Fail the next `n` calls with an API error.
    pub fn fail_next(&self, n: u32) {
        *self.fail_next.lock().unwrap() = n;
    }

    /// Every request seen so far, in call order.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn take_failure(&self) -> bool {
        let mut left = self.fail_next.lock().unwrap();
        if *left > 0 {
            *left -= 1;
            true
        } else {
            false
        }
    }
}

#[async_trait]
impl ChatApi for ScriptedChat {
    async fn stream_chat(
        &self,
        req: &ChatRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), LlmError> {
        self.requests.lock().unwrap().push(req.clone());
        if self.take_failure() {
            return Err(LlmError::Api {
                status: 500,
                message: "scripted failure".to_string(),
            });
        }
        let events = self
            .streams
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                vec![StreamEvent::Done {
                    finish_reason: "stop".to_string(),
                }]
            });
        for event in events {
            if tx.send(event).await.is_err() {
                break;
            }
        }
        Ok(())
    }

    async fn complete(&self, req: &ChatRequest) -> Result<ChatResponse, LlmError> {
        self.requests.lock().unwrap().push(req.clone());
        if self.take_failure() {
            return Err(LlmError::Api {
                status: 500,
                message: "scripted failure".to_string(),
            });
        }
        Ok(self
            .completions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| ChatResponse {
                content: String::new(),
                tool_calls: Vec::new(),
                usage: None,
                finish_reason: "stop".to_string(),
            }))
    }
}

/// Embeddings binding returning constant-valued vectors of a fixed
/// dimension, so documents are comparable in assertions.
pub struct ScriptedEmbeddings {
    dimension: usize,
    inputs: Mutex<Vec<Vec<String>>>,
    fail_next: Mutex<u32>,
}

impl ScriptedEmbeddings {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            inputs: Mutex::new(Vec::new()),
            fail_next: Mutex::new(0),
        }
    }

    pub fn fail_next(&self, n: u32) {
        *self.fail_next.lock().unwrap() = n;
    }

    pub fn inputs(&self) -> Vec<Vec<String>> {
        self.inputs.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmbeddingsApi for ScriptedEmbeddings {
    async fn embed(&self, input: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        self.inputs.lock().unwrap().push(input.to_vec());
        {
            let mut left = self.fail_next.lock().unwrap();
            if *left > 0 {
                *left -= 1;
                return Err(LlmError::Api {
                    status: 500,
                    message: "scripted embeddings failure".to_string(),
                });
            }
        }
        Ok(input.iter().map(|_| vec![0.25; self.dimension]).collect())
    }
}
