//! Tool registry: name-unique tools and prompts, append-only resources
//! and resource templates.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;

use serde_json::Value;

use bs_domain::{
    PromptArg, PromptDescriptor, ResourceDescriptor, ResourceTemplate, ServerCapabilities,
    ToolDescriptor,
};

use crate::types::{ToolContext, ToolResult};

/// Placeholder used for optional prompt arguments with no declared default.
pub const PROMPT_ARG_FALLBACK: &str = "auto";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handlers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Implement this trait to handle calls to a registered tool.
///
/// Handlers run on the Tokio runtime and may perform async I/O.
///
/// # Example
///
/// ```rust,no_run
/// use bs_server::{ToolContext, ToolHandler, ToolResult};
///
/// struct PingTool;
///
/// #[async_trait::async_trait]
/// impl ToolHandler for PingTool {
///     async fn call(&self, _ctx: ToolContext, _args: serde_json::Value) -> ToolResult {
///         Ok(serde_json::json!({ "pong": true }))
///     }
/// }
/// ```
#[async_trait::async_trait]
pub trait ToolHandler: Send + Sync + 'static {
    async fn call(&self, ctx: ToolContext, args: Value) -> ToolResult;
}

struct FnHandler<F>(F);

#[async_trait::async_trait]
impl<F, Fut> ToolHandler for FnHandler<F>
where
    F: Fn(ToolContext, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ToolResult> + Send + 'static,
{
    async fn call(&self, ctx: ToolContext, args: Value) -> ToolResult {
        (self.0)(ctx, args).await
    }
}

/// Wrap an async closure as a handler.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn ToolHandler>
where
    F: Fn(ToolContext, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ToolResult> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Definitions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A tool plus its handler.
#[derive(Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub requires_approval: bool,
    pub handler: Arc<dyn ToolHandler>,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        handler: Arc<dyn ToolHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            requires_approval: false,
            handler,
        }
    }

    /// Mark the tool as needing explicit user approval.
    pub fn requires_approval(mut self) -> Self {
        self.requires_approval = true;
        self
    }

    pub fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema.clone(),
            requires_approval: self.requires_approval,
        }
    }
}

impl std::fmt::Debug for ToolDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDefinition")
            .field("name", &self.name)
            .field("requires_approval", &self.requires_approval)
            .finish_non_exhaustive()
    }
}

/// A compiled tool: the definition plus its argument validator.
#[derive(Clone)]
pub(crate) struct RegisteredTool {
    pub(crate) definition: ToolDefinition,
    pub(crate) validator: Arc<jsonschema::Validator>,
}

fn compile_schema(tool: &str, schema: &Value) -> Result<jsonschema::Validator, RegistryError> {
    jsonschema::options()
        .with_draft(jsonschema::Draft::Draft202012)
        .should_validate_formats(true)
        .build(schema)
        .map_err(|e| RegistryError::InvalidSchema {
            tool: tool.to_string(),
            reason: e.to_string(),
        })
}

/// A prompt with a `{argument}` placeholder template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    pub name: String,
    pub description: Option<String>,
    pub arguments: Vec<PromptArg>,
    pub template: String,
}

impl PromptTemplate {
    pub fn descriptor(&self) -> PromptDescriptor {
        PromptDescriptor {
            name: self.name.clone(),
            description: self.description.clone(),
            arguments: self.arguments.clone(),
        }
    }

    /// Substitute arguments into the template.
    ///
    /// Absent optional arguments take their declared default, or `"auto"`.
    pub fn render(&self, args: &HashMap<String, String>) -> Result<String, RegistryError> {
        let mut text = self.template.clone();
        for arg in &self.arguments {
            let value = match args.get(&arg.name) {
                Some(value) => value.as_str(),
                None if arg.required => {
                    return Err(RegistryError::MissingArgument {
                        prompt: self.name.clone(),
                        argument: arg.name.clone(),
                    })
                }
                None => arg.default.as_deref().unwrap_or(PROMPT_ARG_FALLBACK),
            };
            text = text.replace(&format!("{{{}}}", arg.name), value);
        }
        Ok(text)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("tool already exists: {0}")]
    DuplicateTool(String),
    #[error("prompt already exists: {0}")]
    DuplicatePrompt(String),
    #[error("unknown prompt: {0}")]
    UnknownPrompt(String),
    #[error("prompt {prompt}: missing required argument `{argument}`")]
    MissingArgument { prompt: String, argument: String },
    #[error("tool {tool}: invalid input schema: {reason}")]
    InvalidSchema { tool: String, reason: String },
}

/// Everything one tenant server exposes.
#[derive(Clone, Default)]
pub struct Registry {
    tools: BTreeMap<String, RegisteredTool>,
    prompts: BTreeMap<String, PromptTemplate>,
    resources: Vec<ResourceDescriptor>,
    resource_templates: Vec<ResourceTemplate>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool.  Fails if the name is taken; the existing tool stays.
    pub fn add_tool(&mut self, tool: ToolDefinition) -> Result<(), RegistryError> {
        if self.tools.contains_key(&tool.name) {
            return Err(RegistryError::DuplicateTool(tool.name));
        }
        let validator = compile_schema(&tool.name, &tool.input_schema)?;
        self.tools.insert(
            tool.name.clone(),
            RegisteredTool {
                definition: tool,
                validator: Arc::new(validator),
            },
        );
        Ok(())
    }

    /// Register or overwrite a tool, returning the one it displaced.
    pub fn replace_tool(
        &mut self,
        tool: ToolDefinition,
    ) -> Result<Option<ToolDefinition>, RegistryError> {
        let validator = compile_schema(&tool.name, &tool.input_schema)?;
        let previous = self.tools.insert(
            tool.name.clone(),
            RegisteredTool {
                definition: tool,
                validator: Arc::new(validator),
            },
        );
        Ok(previous.map(|t| t.definition))
    }

    pub fn add_prompt(&mut self, prompt: PromptTemplate) -> Result<(), RegistryError> {
        if self.prompts.contains_key(&prompt.name) {
            return Err(RegistryError::DuplicatePrompt(prompt.name));
        }
        self.prompts.insert(prompt.name.clone(), prompt);
        Ok(())
    }

    pub fn add_resource(&mut self, resource: ResourceDescriptor) {
        self.resources.push(resource);
    }

    pub fn add_resource_template(&mut self, template: ResourceTemplate) {
        self.resource_templates.push(template);
    }

    pub fn tool(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.get(name).map(|t| &t.definition)
    }

    pub(crate) fn registered_tool(&self, name: &str) -> Option<&RegisteredTool> {
        self.tools.get(name)
    }

    pub fn prompt(&self, name: &str) -> Option<&PromptTemplate> {
        self.prompts.get(name)
    }

    pub fn resources(&self) -> &[ResourceDescriptor] {
        &self.resources
    }

    pub fn resource_templates(&self) -> &[ResourceTemplate] {
        &self.resource_templates
    }

    /// All registered tool names (sorted).
    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn render_prompt(
        &self,
        name: &str,
        args: &HashMap<String, String>,
    ) -> Result<String, RegistryError> {
        self.prompts
            .get(name)
            .ok_or_else(|| RegistryError::UnknownPrompt(name.to_string()))?
            .render(args)
    }

    /// Immutable view for the transport layer.
    pub fn snapshot(&self, protocol_version: &str) -> ServerCapabilities {
        ServerCapabilities {
            protocol_version: protocol_version.to_string(),
            tools: self.tools.values().map(|t| t.definition.descriptor()).collect(),
            resources: self.resources.clone(),
            resource_templates: self.resource_templates.clone(),
            prompts: self.prompts.values().map(PromptTemplate::descriptor).collect(),
        }
    }
}
