//! Test doubles shared by the service tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::LlmError;
use crate::services::{ChatMessage, LanguageModel};

/// Replies with the first rule whose needle occurs in the last message, else the default.
#[derive(Clone)]
pub(crate) struct ScriptedModel {
    default_reply: String,
    rules: Vec<(String, String)>,
    model: String,
    calls: Arc<Mutex<Vec<Vec<ChatMessage>>>>,
}

impl ScriptedModel {
    pub fn new(default_reply: &str) -> Self {
        Self {
            default_reply: default_reply.to_string(),
            rules: Vec::new(),
            model: "scripted".to_string(),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_rule(mut self, needle: &str, reply: &str) -> Self {
        self.rules.push((needle.to_string(), reply.to_string()));
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls(&self) -> Vec<Vec<ChatMessage>> {
        self.calls.lock().unwrap().clone()
    }

    /// Last message of every call.
    pub fn prompts(&self) -> Vec<String> {
        self.calls()
            .iter()
            .filter_map(|messages| messages.last().map(|m| m.content.clone()))
            .collect()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        self.calls.lock().unwrap().push(messages.to_vec());
        let last = messages.last().map(|m| m.content.as_str()).unwrap_or_default();
        let reply = self
            .rules
            .iter()
            .find(|(needle, _)| last.contains(needle.as_str()))
            .map(|(_, reply)| reply.clone())
            .unwrap_or_else(|| self.default_reply.clone());
        Ok(reply)
    }

    fn with_model(&self, model: &str) -> Arc<dyn LanguageModel> {
        let mut clone = self.clone();
        clone.model = model.to_string();
        Arc::new(clone)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
