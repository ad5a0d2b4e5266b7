//! Tool registry - maps tool names to handlers.
//!
//! Populated once before serving, then moved behind an `Arc` by the service
//! and only read from network tasks.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::bridge::protocol::Arguments;

/// Handler body: runs on the host thread with exclusive access to host state.
pub type HandlerFn<S> =
    dyn Fn(&mut S, Arguments) -> anyhow::Result<serde_json::Value> + Send + Sync;

/// Published metadata for one tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema for the tool's `arguments` object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<serde_json::Value>,
}

/// Cheaply cloneable handle to a registered handler.
pub struct Handler<S> {
    name: Arc<str>,
    description: Option<Arc<str>>,
    input_schema: Option<Arc<serde_json::Value>>,
    func: Arc<HandlerFn<S>>,
}

impl<S> Clone for Handler<S> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            description: self.description.clone(),
            input_schema: self.input_schema.clone(),
            func: Arc::clone(&self.func),
        }
    }
}

impl<S> std::fmt::Debug for Handler<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handler").field("name", &self.name).finish()
    }
}

impl<S> Handler<S> {
    pub fn new<F>(name: impl Into<Arc<str>>, func: F) -> Self
    where
        F: Fn(&mut S, Arguments) -> anyhow::Result<serde_json::Value> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: None,
            input_schema: None,
            func: Arc::new(func),
        }
    }

    pub fn with_description(mut self, description: impl Into<Arc<str>>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_input_schema(mut self, schema: serde_json::Value) -> Self {
        self.input_schema = Some(Arc::new(schema));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn info(&self) -> ToolInfo {
        ToolInfo {
            name: self.name.to_string(),
            description: self.description.as_deref().map(str::to_string),
            input_schema: self.input_schema.as_deref().cloned(),
        }
    }

    /// Invoke the handler. Only the host executor should call this.
    pub(crate) fn call(&self, state: &mut S, arguments: Arguments) -> anyhow::Result<serde_json::Value> {
        (self.func)(state, arguments)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown tool: {0}")]
pub struct UnknownTool(pub String);

/// Name-to-handler table.
pub struct ToolRegistry<S> {
    tools: HashMap<String, Handler<S>>,
}

impl<S> Default for ToolRegistry<S> {
    fn default() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }
}

impl<S> ToolRegistry<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under `name`.
    ///
    /// Re-registering a name replaces the earlier handler. That is almost
    /// always a wiring mistake, so it is logged at warn.
    pub fn register<F>(&mut self, name: impl Into<String>, func: F) -> &mut Self
    where
        F: Fn(&mut S, Arguments) -> anyhow::Result<serde_json::Value> + Send + Sync + 'static,
    {
        let name = name.into();
        self.insert(Handler::new(name.as_str(), func))
    }

    /// Register a prepared handler, e.g. one carrying a description and
    /// input schema.
    pub fn insert(&mut self, handler: Handler<S>) -> &mut Self {
        let name = handler.name().to_string();
        if self.tools.insert(name.clone(), handler).is_some() {
            tracing::warn!(tool = %name, "Tool registered twice, replacing earlier handler");
        } else {
            tracing::debug!(tool = %name, "Registered tool");
        }
        self
    }

    pub fn with_handler(mut self, handler: Handler<S>) -> Self {
        self.insert(handler);
        self
    }

    /// Builder-style variant of [`register`](Self::register).
    pub fn with_tool<F>(mut self, name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&mut S, Arguments) -> anyhow::Result<serde_json::Value> + Send + Sync + 'static,
    {
        self.register(name, func);
        self
    }

    /// Case-sensitive exact lookup.
    pub fn resolve(&self, name: &str) -> Result<Handler<S>, UnknownTool> {
        self.tools
            .get(name)
            .cloned()
            .ok_or_else(|| UnknownTool(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Registered tool names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Metadata for every tool, sorted by name.
    pub fn infos(&self) -> Vec<ToolInfo> {
        let mut infos: Vec<ToolInfo> = self.tools.values().map(Handler::info).collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> ToolRegistry<u32> {
        ToolRegistry::new()
            .with_tool("echo", |_, args| Ok(serde_json::Value::Object(args)))
            .with_tool("bump", |count: &mut u32, _| {
                *count += 1;
                Ok(json!(*count))
            })
    }

    #[test]
    fn resolve_registered_tool() {
        let registry = registry();
        let handler = registry.resolve("bump").unwrap();
        assert_eq!(handler.name(), "bump");

        let mut state = 0;
        assert_eq!(handler.call(&mut state, Arguments::new()).unwrap(), json!(1));
        assert_eq!(state, 1);
    }

    #[test]
    fn resolve_is_case_sensitive() {
        let registry = registry();
        assert_eq!(
            registry.resolve("Echo").unwrap_err(),
            UnknownTool("Echo".to_string())
        );
        assert!(registry.resolve("echo").is_ok());
    }

    #[test]
    fn unknown_tool_message() {
        let err = registry().resolve("nope").unwrap_err();
        assert_eq!(err.to_string(), "Unknown tool: nope");
    }

    #[test]
    fn duplicate_registration_last_wins() {
        let mut registry: ToolRegistry<()> = ToolRegistry::new();
        registry.register("tool", |_, _| Ok(json!("first")));
        registry.register("tool", |_, _| Ok(json!("second")));

        assert_eq!(registry.len(), 1);
        let handler = registry.resolve("tool").unwrap();
        assert_eq!(handler.call(&mut (), Arguments::new()).unwrap(), json!("second"));
    }

    #[test]
    fn names_are_sorted() {
        let registry = registry();
        assert_eq!(registry.names(), vec!["bump".to_string(), "echo".to_string()]);
        assert!(registry.contains("echo"));
        assert!(!registry.is_empty());
    }

    #[test]
    fn infos_carry_description_and_schema() {
        let registry = registry().with_handler(
            Handler::new("create_primitive", |_, _| Ok(json!(null)))
                .with_description("Create a primitive object in the active scene")
                .with_input_schema(json!({
                    "type": "object",
                    "properties": {"kind": {"type": "string"}},
                    "required": ["kind"]
                })),
        );

        let infos = registry.infos();
        let names: Vec<&str> = infos.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["bump", "create_primitive", "echo"]);

        insta::assert_json_snapshot!(infos[1], @r#"
        {
          "name": "create_primitive",
          "description": "Create a primitive object in the active scene",
          "input_schema": {
            "properties": {
              "kind": {
                "type": "string"
              }
            },
            "required": [
              "kind"
            ],
            "type": "object"
          }
        }
        "#);
        assert_eq!(
            serde_json::to_value(&infos[0]).unwrap(),
            json!({"name": "bump"})
        );
    }
}
