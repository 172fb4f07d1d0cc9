//! LLM client — integration with the external classifier/resolver/merge
//! services.
//!
//! Defines the client trait and error types for invoking an LLM-backed
//! task. Two implementations:
//! - `CommandClient`: spawns a configured external command per call
//!   (production; the command owns model choice and transport)
//! - `MockClient`: returns preconfigured responses (testing)
//!
//! The pipeline calls it for three tasks: `lookup` (classification against
//! the registry listing), `resolve` (candidate disambiguation), and `merge`
//! (content combination). One outbound call per task per entity; the task's
//! prompt is rendered by the caller before invocation.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::process::Stdio;
use std::sync::Mutex;

/// Errors from LLM client operations.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("llm backend not available: {0}")]
    Unavailable(String),
    #[error("invocation failed: {0}")]
    InvocationFailed(String),
    #[error("response read error: {0}")]
    Io(#[from] std::io::Error),
}

/// Client trait for invoking LLM tasks.
///
/// Abstracts over transport (subprocess, HTTP, mock) so the orchestrator
/// doesn't depend on how the model is reached.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Invoke a task with a rendered prompt payload, returning the raw
    /// response text. Parsing happens at the caller's boundary.
    async fn invoke(&self, task: &str, payload: &str) -> Result<String, LlmError>;
}

/// Subprocess client — runs a configured command once per invocation.
///
/// The command receives the task name as its final argument and the payload
/// on stdin; it must print the response on stdout and exit zero.
pub struct CommandClient {
    program: String,
    args: Vec<String>,
}

impl CommandClient {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }
}

#[async_trait]
impl LlmClient for CommandClient {
    async fn invoke(&self, task: &str, payload: &str) -> Result<String, LlmError> {
        use tokio::io::AsyncWriteExt;

        let mut child = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .arg(task)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| LlmError::Unavailable(format!("{}: {}", self.program, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(payload.as_bytes()).await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(LlmError::InvocationFailed(format!(
                "{} exited with {} for task '{}'",
                self.program, output.status, task
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Mock client for testing — replays preconfigured responses per task.
///
/// Responses queue up in registration order; each invocation consumes one.
/// An exhausted or unregistered task fails the invocation, which exercises
/// the caller's fallback paths.
#[derive(Default)]
pub struct MockClient {
    responses: Mutex<HashMap<String, VecDeque<Result<String, String>>>>,
    calls: Mutex<Vec<String>>,
}

impl MockClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for a task.
    pub fn with_response(self, task: impl Into<String>, response: impl Into<String>) -> Self {
        self.responses
            .lock()
            .expect("mock client lock poisoned")
            .entry(task.into())
            .or_default()
            .push_back(Ok(response.into()));
        self
    }

    /// Queue a failure for a task.
    pub fn with_failure(self, task: impl Into<String>, message: impl Into<String>) -> Self {
        self.responses
            .lock()
            .expect("mock client lock poisoned")
            .entry(task.into())
            .or_default()
            .push_back(Err(message.into()));
        self
    }

    /// Tasks invoked so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("mock client lock poisoned").clone()
    }
}

#[async_trait]
impl LlmClient for MockClient {
    async fn invoke(&self, task: &str, _payload: &str) -> Result<String, LlmError> {
        self.calls
            .lock()
            .expect("mock client lock poisoned")
            .push(task.to_string());

        let next = self
            .responses
            .lock()
            .expect("mock client lock poisoned")
            .get_mut(task)
            .and_then(|queue| queue.pop_front());

        match next {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(LlmError::InvocationFailed(message)),
            None => Err(LlmError::InvocationFailed(format!(
                "no mock response queued for task '{}'",
                task
            ))),
        }
    }
}
