//! Tools backed by a running provider bridge.
//!
//! Every handler turns bridge failures into a `success: false` payload,
//! so a provider fault never surfaces as a handler error.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{json, Value};

use bs_mcp_bridge::{BridgeError, ProcessBridge};
use bs_server::catalog::{self, INGEST_URL};
use bs_server::envelope::timestamp;
use bs_server::{handler_fn, RegistryError, TenantServer, ToolDefinition};

pub const ADVANCED_CRAWL: &str = "bs.advanced_crawl";
pub const CONVERT_CURRENCY: &str = "bs.convert_currency";

const PREVIEW_CHARS: usize = 200;
const UNTITLED: &str = "Untitled Page";

/// Swap the stub `bs.ingest_url` for the provider-backed one and add the
/// provider-only tools.
pub fn install(server: &TenantServer, bridge: &ProcessBridge) -> Result<(), RegistryError> {
    let names = &bridge.config().tools;
    if let Some(caps) = bridge.capabilities() {
        for tool in [&names.crawl, &names.convert_currency] {
            if !caps.has_tool(tool) {
                tracing::warn!(
                    tenant = %bridge.tenant(),
                    provider = %bridge.provider_id(),
                    tool = %tool,
                    "provider does not advertise tool; calls will likely fail"
                );
            }
        }
    }

    server.replace_tool(ingest_url(bridge.clone()))?;
    server.add_tool(advanced_crawl(bridge.clone()))?;
    server.add_tool(convert_currency(bridge.clone()))?;
    tracing::info!(
        tenant = %bridge.tenant(),
        provider = %bridge.provider_id(),
        "provider-backed tools registered"
    );
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Crawl
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One crawled page as reported by the provider.
#[derive(Debug, Clone, PartialEq)]
pub struct CrawlOutcome {
    pub title: String,
    pub content: String,
    pub content_size: usize,
    /// False when the provider's failure marker appears in the content.
    pub success: bool,
}

impl CrawlOutcome {
    pub fn from_content(content: String, failure_marker: Option<&str>) -> Self {
        let success = !failure_marker.is_some_and(|m| !m.is_empty() && content.contains(m));
        Self {
            title: extract_title(&content),
            content_size: content.chars().count(),
            success,
            content,
        }
    }

    pub fn preview(&self) -> String {
        let mut chars = self.content.chars();
        let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
        if chars.next().is_some() {
            format!("{head}...")
        } else {
            head
        }
    }
}

async fn crawl(bridge: &ProcessBridge, url: &str) -> Result<CrawlOutcome, BridgeError> {
    let output = bridge
        .call(&bridge.config().tools.crawl, json!({ "url": url }))
        .await?;
    let content = match output {
        Value::String(text) => text,
        other => other.to_string(),
    };
    Ok(CrawlOutcome::from_content(
        content,
        bridge.config().failure_marker.as_deref(),
    ))
}

fn title_heading() -> Option<&'static Regex> {
    static HEADING: OnceLock<Option<Regex>> = OnceLock::new();
    HEADING
        .get_or_init(|| Regex::new(r"(?m)^#\s+(.+)$").ok())
        .as_ref()
}

/// First `# heading`, else the first of the first five lines that is
/// between 10 and 100 characters long.
pub fn extract_title(content: &str) -> String {
    if let Some(caps) = title_heading().and_then(|re| re.captures(content)) {
        if let Some(title) = caps.get(1) {
            return title.as_str().trim().to_string();
        }
    }
    content
        .lines()
        .take(5)
        .find(|line| {
            let len = line.chars().count();
            !line.trim().is_empty() && len > 10 && len < 100
        })
        .map(|line| line.trim().to_string())
        .unwrap_or_else(|| UNTITLED.to_string())
}

fn features_used(bridge: &ProcessBridge) -> Vec<String> {
    vec![bridge.provider_id().to_string(), "markdown-extraction".into()]
}

fn provider_source(bridge: &ProcessBridge) -> String {
    format!("provider:{}", bridge.provider_id())
}

fn millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn arg_str(args: &Value, key: &str) -> String {
    args.get(key).and_then(Value::as_str).unwrap_or_default().to_string()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tools
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn ingest_url(bridge: ProcessBridge) -> ToolDefinition {
    ToolDefinition::new(
        INGEST_URL,
        "Ingest a URL through the external crawling provider",
        catalog::ingest_url_schema(),
        handler_fn(move |ctx, args| {
            let bridge = bridge.clone();
            async move {
                let url = arg_str(&args, "url");
                let payload = match crawl(&bridge, &url).await {
                    Ok(page) => {
                        let status = if page.success { "completed" } else { "failed" };
                        json!({
                            "success": page.success,
                            "jobId": format!("job_{}", millis()),
                            "accepted": true,
                            "tenantId": ctx.tenant.tenant_id(),
                            "source": provider_source(&bridge),
                            "url": url,
                            "title": page.title,
                            "contentSize": page.content_size,
                            "contentPreview": page.preview(),
                            "featuresUsed": features_used(&bridge),
                            "status": status,
                            "providerVersion": bridge.capabilities().map(|c| c.version),
                            "timestamp": timestamp(),
                        })
                    }
                    Err(e) => {
                        tracing::warn!(tenant = %ctx.tenant, tool = INGEST_URL, error = %e, "provider crawl failed");
                        json!({
                            "success": false,
                            "status": "failed",
                            "jobId": format!("job_error_{}", millis()),
                            "accepted": false,
                            "error": e.to_string(),
                            "source": provider_source(&bridge),
                            "url": url,
                            "timestamp": timestamp(),
                        })
                    }
                };
                Ok(payload)
            }
        }),
    )
    .requires_approval()
}

pub fn advanced_crawl(bridge: ProcessBridge) -> ToolDefinition {
    ToolDefinition::new(
        ADVANCED_CRAWL,
        "Crawl a URL and return its content as markdown",
        json!({
            "type": "object",
            "properties": {
                "url": { "type": "string", "format": "uri" },
                "extractMarkdown": { "type": "boolean", "default": true },
                "wordThreshold": { "type": "integer", "minimum": 0, "default": 100 }
            },
            "required": ["url"],
            "additionalProperties": false
        }),
        handler_fn(move |ctx, args| {
            let bridge = bridge.clone();
            async move {
                let url = arg_str(&args, "url");
                let payload = match crawl(&bridge, &url).await {
                    Ok(page) => json!({
                        "success": page.success,
                        "url": url,
                        "title": page.title,
                        "content": page.content,
                        "contentSize": page.content_size,
                        "featuresUsed": features_used(&bridge),
                        "timestamp": timestamp(),
                    }),
                    Err(e) => {
                        tracing::warn!(tenant = %ctx.tenant, tool = ADVANCED_CRAWL, error = %e, "provider crawl failed");
                        json!({
                            "success": false,
                            "status": "failed",
                            "url": url,
                            "error": e.to_string(),
                            "timestamp": timestamp(),
                        })
                    }
                };
                Ok(payload)
            }
        }),
    )
}

/// The provider answers with text; numeric text becomes a number.
fn converted_amount(output: Value) -> Value {
    match output {
        Value::String(text) => match text.trim().parse::<f64>() {
            Ok(n) => json!(n),
            Err(_) => Value::String(text),
        },
        other => other,
    }
}

pub fn convert_currency(bridge: ProcessBridge) -> ToolDefinition {
    ToolDefinition::new(
        CONVERT_CURRENCY,
        "Convert an amount from USD to EUR through the provider",
        json!({
            "type": "object",
            "properties": {
                "amount": { "type": "number" }
            },
            "required": ["amount"],
            "additionalProperties": false
        }),
        handler_fn(move |ctx, args| {
            let bridge = bridge.clone();
            async move {
                let amount = args.get("amount").cloned().unwrap_or(Value::Null);
                let tool = bridge.config().tools.convert_currency.clone();
                let payload = match bridge.call(&tool, json!({ "amount": amount })).await {
                    Ok(output) => json!({
                        "success": true,
                        "originalAmount": amount,
                        "originalCurrency": "USD",
                        "convertedAmount": converted_amount(output),
                        "convertedCurrency": "EUR",
                        "timestamp": timestamp(),
                    }),
                    Err(e) => {
                        tracing::warn!(tenant = %ctx.tenant, tool = CONVERT_CURRENCY, error = %e, "provider conversion failed");
                        json!({
                            "success": false,
                            "status": "failed",
                            "originalAmount": amount,
                            "error": e.to_string(),
                            "timestamp": timestamp(),
                        })
                    }
                };
                Ok(payload)
            }
        }),
    )
}
