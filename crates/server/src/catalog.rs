//! Built-in catalog every tenant server is seeded with.
//!
//! The tool handlers are stubs: they acknowledge the request with a
//! generated id and tag it with the calling tenant.  Real pipelines
//! replace them through [`TenantServer::replace_tool`].

use serde_json::{json, Value};

use bs_domain::{PromptArg, ResourceDescriptor, ResourceTemplate, TemplateParameter, TenantContext};

use crate::registry::{handler_fn, PromptTemplate, RegistryError, ToolDefinition};
use crate::tenant::TenantServer;

pub const INGEST_URL: &str = "bs.ingest_url";
pub const CREATE_DATASET: &str = "bs.create_dataset";
pub const TRAIN_ENTITY: &str = "bs.train_entity";
pub const QUERY_ENTITY: &str = "bs.query_entity";

/// Register the built-in tools, resources, templates and prompts.
pub fn install(server: &TenantServer) -> Result<(), RegistryError> {
    for tool in tools() {
        server.add_tool(tool)?;
    }
    server.add_resource(manifest_resource(server.tenant()));
    for template in resource_templates() {
        server.add_resource_template(template);
    }
    for prompt in prompts() {
        server.add_prompt(prompt)?;
    }
    Ok(())
}

fn millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tools
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn tools() -> Vec<ToolDefinition> {
    vec![ingest_url(), create_dataset(), train_entity(), query_entity()]
}

pub fn ingest_url_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "url": { "type": "string", "format": "uri" },
            "rules": { "type": "object" }
        },
        "required": ["url"],
        "additionalProperties": false
    })
}

/// Stub: accepts the URL and hands back a job id.
pub fn ingest_url() -> ToolDefinition {
    ToolDefinition::new(
        INGEST_URL,
        "Ingest a URL and create sources for datasets",
        ingest_url_schema(),
        handler_fn(|ctx, _args| async move {
            Ok(json!({
                "jobId": format!("job_{}", millis()),
                "accepted": true,
                "tenantId": ctx.tenant.tenant_id(),
            }))
        }),
    )
    .requires_approval()
}

pub fn create_dataset() -> ToolDefinition {
    ToolDefinition::new(
        CREATE_DATASET,
        "Create a dataset from existing sources",
        json!({
            "type": "object",
            "properties": {
                "name": { "type": "string" },
                "sourceIds": { "type": "array", "items": { "type": "string" } }
            },
            "required": ["name"],
            "additionalProperties": false
        }),
        handler_fn(|ctx, _args| async move {
            Ok(json!({
                "datasetId": format!("ds_{}", millis()),
                "tenantId": ctx.tenant.tenant_id(),
            }))
        }),
    )
}

pub fn train_entity() -> ToolDefinition {
    ToolDefinition::new(
        TRAIN_ENTITY,
        "Train an entity on a dataset",
        json!({
            "type": "object",
            "properties": {
                "entityId": { "type": "string" },
                "datasetId": { "type": "string" },
                "strategy": { "enum": ["rag", "ft", "hybrid"] }
            },
            "required": ["entityId", "datasetId", "strategy"],
            "additionalProperties": false
        }),
        handler_fn(|ctx, _args| async move {
            Ok(json!({
                "runId": format!("run_{}", millis()),
                "status": "queued",
                "tenantId": ctx.tenant.tenant_id(),
            }))
        }),
    )
    .requires_approval()
}

pub fn query_entity() -> ToolDefinition {
    ToolDefinition::new(
        QUERY_ENTITY,
        "Query an entity using its trained context",
        json!({
            "type": "object",
            "properties": {
                "entityId": { "type": "string" },
                "query": { "type": "string" },
                "topK": { "type": "number" }
            },
            "required": ["entityId", "query"],
            "additionalProperties": false
        }),
        handler_fn(|ctx, _args| async move {
            Ok(json!({
                "answer": "(placeholder)",
                "references": [],
                "tenantId": ctx.tenant.tenant_id(),
            }))
        }),
    )
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Resources
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn manifest_resource(tenant: &TenantContext) -> ResourceDescriptor {
    ResourceDescriptor {
        uri: format!("bs://entities/{}/manifest", tenant.label()),
        mime_type: Some("application/json".into()),
        title: Some("Entity Manifest".into()),
        description: Some("Configuration and state of the entity".into()),
    }
}

fn param(name: &str, description: &str) -> TemplateParameter {
    TemplateParameter {
        name: name.into(),
        description: Some(description.into()),
        required: true,
    }
}

pub fn resource_templates() -> Vec<ResourceTemplate> {
    vec![
        ResourceTemplate {
            uri_template: "bs://datasets/{id}".into(),
            parameters: vec![param("id", "Dataset id")],
        },
        ResourceTemplate {
            uri_template: "bs://datasets/{id}/docs/{docId}".into(),
            parameters: vec![param("id", "Dataset id"), param("docId", "Document id")],
        },
        ResourceTemplate {
            uri_template: "bs://entities/{entityId}/manifest".into(),
            parameters: vec![param("entityId", "Entity id")],
        },
        ResourceTemplate {
            uri_template: "bs://runs/{id}".into(),
            parameters: vec![param("id", "Training run id")],
        },
    ]
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Prompts
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn arg(name: &str, required: bool) -> PromptArg {
    PromptArg {
        name: name.into(),
        description: None,
        required,
        default: None,
    }
}

pub fn prompts() -> Vec<PromptTemplate> {
    vec![
        PromptTemplate {
            name: "prepare-scraper-rules".into(),
            description: Some("Draft safe scraping rules for the given constraints".into()),
            arguments: vec![
                arg("destination", true),
                arg("rateLimit", false),
                arg("selectors", false),
            ],
            template: "Destination: {destination}\nRate limit: {rateLimit}\nSelectors: {selectors}"
                .into(),
        },
        PromptTemplate {
            name: "triage-ingestion-issues".into(),
            description: Some("Checklist for common ingestion failures".into()),
            arguments: vec![arg("jobId", true)],
            template: "Review the logs and normalize documents for job {jobId}".into(),
        },
    ]
}
