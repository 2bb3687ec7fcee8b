//! Scripted tool registry for unit tests

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::{ToolDescriptor, ToolError, ToolRegistry};

/// Registry whose tools return scripted outputs and record every call
#[derive(Default)]
pub struct MockToolRegistry {
    descriptors: Vec<ToolDescriptor>,
    defaults: HashMap<String, Value>,
    scripted: Mutex<HashMap<String, VecDeque<Result<Value, ToolError>>>>,
    delays: HashMap<String, Duration>,
    calls: Mutex<Vec<(String, Value)>>,
}

impl MockToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool that returns `output` unless a scripted response is queued
    pub fn with_tool(mut self, descriptor: ToolDescriptor, output: Value) -> Self {
        self.defaults.insert(descriptor.name.clone(), output);
        self.descriptors.push(descriptor);
        self
    }

    /// Queue a one-shot response for the next call to `name`
    pub fn then(self, name: &str, response: Result<Value, ToolError>) -> Self {
        self.scripted
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default()
            .push_back(response);
        self
    }

    pub fn failing(self, name: &str, times: usize, message: &str) -> Self {
        (0..times).fold(self, |registry, _| registry.then(name, Err(ToolError::failed(message))))
    }

    pub fn with_delay(mut self, name: &str, delay: Duration) -> Self {
        self.delays.insert(name.to_string(), delay);
        self
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, name: &str) -> Vec<Value> {
        self.calls()
            .into_iter()
            .filter(|(tool, _)| tool == name)
            .map(|(_, args)| args)
            .collect()
    }

    pub fn call_order(&self) -> Vec<String> {
        self.calls().into_iter().map(|(tool, _)| tool).collect()
    }
}

#[async_trait]
impl ToolRegistry for MockToolRegistry {
    async fn list_tools(&self) -> Vec<ToolDescriptor> {
        self.descriptors.clone()
    }

    async fn call(&self, name: &str, args: Value) -> Result<Value, ToolError> {
        self.calls.lock().unwrap().push((name.to_string(), args));
        if let Some(delay) = self.delays.get(name) {
            tokio::time::sleep(*delay).await;
        }
        let scripted = self.scripted.lock().unwrap().get_mut(name).and_then(VecDeque::pop_front);
        match scripted {
            Some(response) => response,
            None => self.defaults.get(name).cloned().ok_or_else(|| ToolError::UnknownTool {
                name: name.to_string(),
            }),
        }
    }
}
