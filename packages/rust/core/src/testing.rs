//! Deterministic [`LanguageModel`] fake.
//!
//! Replies are consumed in order; once the queue is empty the repeating reply
//! (if any) is returned for every further call. Every prompt is recorded.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use portfolio_shared::{PortfolioError, Result};

use crate::synthesis::LanguageModel;

#[derive(Debug, Clone)]
enum ScriptedReply {
    Text(String),
    Fail(String),
    Delayed(Duration, String),
}

/// Scripted model that replays canned completions.
#[derive(Debug, Default)]
pub struct ScriptedModel {
    queue: Mutex<VecDeque<ScriptedReply>>,
    repeating: Option<ScriptedReply>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a completion.
    pub fn with_reply(self, text: &str) -> Self {
        self.push(ScriptedReply::Text(text.to_string()))
    }

    /// Queue a model-unavailable failure.
    pub fn with_failure(self, message: &str) -> Self {
        self.push(ScriptedReply::Fail(message.to_string()))
    }

    /// Queue a completion that arrives after `delay`.
    pub fn with_delayed_reply(self, delay: Duration, text: &str) -> Self {
        self.push(ScriptedReply::Delayed(delay, text.to_string()))
    }

    /// Answer `text` whenever the queue is empty.
    pub fn repeating(mut self, text: &str) -> Self {
        self.repeating = Some(ScriptedReply::Text(text.to_string()));
        self
    }

    /// Number of `complete` calls so far.
    pub fn attempts(&self) -> usize {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Prompts received, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn push(self, reply: ScriptedReply) -> Self {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(reply);
        self
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, prompt: &str, _schema_hint: &str) -> Result<String> {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(prompt.to_string());

        let next = self
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .or_else(|| self.repeating.clone());

        match next {
            Some(ScriptedReply::Text(text)) => Ok(text),
            Some(ScriptedReply::Fail(message)) => Err(PortfolioError::model_unavailable(message)),
            Some(ScriptedReply::Delayed(delay, text)) => {
                tokio::time::sleep(delay).await;
                Ok(text)
            }
            None => Err(PortfolioError::model_unavailable("scripted replies exhausted")),
        }
    }
}
