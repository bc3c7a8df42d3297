//! MCP (Model Context Protocol) server integration.
//!
//! Exposes golden-pattern search to coding agents as two tools,
//! `search_patterns` and `similar_to_code`, over stdio.
//!
//! Uses `rust-mcp-sdk` for protocol handling.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use hobbit_rag::{CancellationToken, Match, SearchService};
use rust_mcp_sdk::{
    McpServer, StdioTransport, ToMcpServerHandler, TransportOptions,
    mcp_server::{McpServerOptions, ServerHandler, server_runtime},
    schema::{
        CallToolRequestParams, CallToolResult, Implementation, InitializeResult,
        LATEST_PROTOCOL_VERSION, ListToolsResult, PaginatedRequestParams, RpcError,
        ServerCapabilities, ServerCapabilitiesTools, TextContent, Tool as McpTool, ToolInputSchema,
    },
};
use serde_json::{Map, Value, json};
use tracing::info;

pub const SEARCH_PATTERNS: &str = "search_patterns";
pub const SIMILAR_TO_CODE: &str = "similar_to_code";

const RULE_WIDTH: usize = 80;

// ============================================================================
// MCP Server Configuration
// ============================================================================

/// Configuration for the MCP server.
#[derive(Debug, Clone)]
pub struct McpServerConfig {
    /// Server name for identification.
    pub name: String,
    /// Server version.
    pub version: String,
    /// Collection searched by the tools.
    pub collection: String,
    /// Optional instructions for the LLM.
    pub instructions: Option<String>,
}

impl Default for McpServerConfig {
    fn default() -> Self {
        Self {
            name: "hobbit".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            collection: crate::config::DEFAULT_COLLECTION.to_string(),
            instructions: Some(
                "Use search_patterns to find reference implementations in the golden repository, \
                 and similar_to_code to find the golden counterpart of existing code."
                    .to_string(),
            ),
        }
    }
}

impl McpServerConfig {
    /// Set the collection to search.
    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }
}

// ============================================================================
// Output formatting
// ============================================================================

fn rule() -> String {
    "-".repeat(RULE_WIDTH)
}

/// Render matches for `search_patterns` and `hobbit search`.
pub fn format_search_patterns(matches: &[Match]) -> String {
    if matches.is_empty() {
        return "No matching golden patterns found.".to_string();
    }

    let mut out = String::new();
    for m in matches {
        out.push_str(&format!("Path: {}\n", m.path));
        out.push_str(&format!("Score: {:.3}\n", m.score));
        out.push_str("Snippet:\n");
        out.push_str(&m.snippet());
        out.push('\n');
        out.push_str(&rule());
        out.push('\n');
    }
    out
}

/// Render matches for `similar_to_code`.
pub fn format_similar_to_code(matches: &[Match]) -> String {
    if matches.is_empty() {
        return "No similar golden patterns found.".to_string();
    }

    let mut out = String::from("Here are similar patterns from the golden repository:\n");
    for m in matches {
        out.push_str(&format!("Path: {}\n", m.path));
        out.push_str(&m.snippet());
        out.push('\n');
        out.push_str(&rule());
        out.push('\n');
    }
    out
}

// ============================================================================
// MCP Server Handler
// ============================================================================

/// MCP server handler that bridges [`SearchService`] to the MCP protocol.
pub struct HobbitServerHandler {
    search: Arc<SearchService>,
    collection: String,
}

impl HobbitServerHandler {
    /// Create a new handler searching `collection`.
    pub fn new(search: Arc<SearchService>, collection: impl Into<String>) -> Self {
        info!("Initializing Hobbit MCP Server Handler");
        Self {
            search,
            collection: collection.into(),
        }
    }

    /// Tool definitions advertised by `tools/list`.
    pub fn tool_definitions() -> Vec<(&'static str, &'static str, Value)> {
        vec![
            (
                SEARCH_PATTERNS,
                "Search the golden repository for patterns and example code matching the description.",
                json!({
                    "type": "object",
                    "properties": {
                        "query": {
                            "type": "string",
                            "description": "Natural language description of the pattern you're looking for, e.g. 'command handler with validation and Result<T>'"
                        },
                        "max_results": { "type": "integer", "minimum": 1, "default": 5 }
                    },
                    "required": ["query"]
                }),
            ),
            (
                SIMILAR_TO_CODE,
                "Find golden-repository patterns similar to the provided code.",
                json!({
                    "type": "object",
                    "properties": {
                        "code": {
                            "type": "string",
                            "description": "Existing code you want to align with golden patterns."
                        },
                        "max_results": { "type": "integer", "minimum": 1, "default": 3 }
                    },
                    "required": ["code"]
                }),
            ),
        ]
    }

    /// Execute a tool, returning its text output or an error message.
    pub async fn call_tool(
        &self,
        name: &str,
        args: &Map<String, Value>,
    ) -> std::result::Result<String, String> {
        let (text_arg, default_max) = match name {
            SEARCH_PATTERNS => ("query", 5),
            SIMILAR_TO_CODE => ("code", 3),
            other => return Err(format!("Unknown tool: {}", other)),
        };

        let text = args
            .get(text_arg)
            .and_then(Value::as_str)
            .ok_or_else(|| format!("Missing required argument: {}", text_arg))?;
        let max_results = match args.get("max_results") {
            None | Some(Value::Null) => default_max,
            Some(v) => v
                .as_u64()
                .ok_or_else(|| "max_results must be a positive integer".to_string())?
                as usize,
        };

        let query = match name {
            SIMILAR_TO_CODE => format!("Pattern similar to this code: {}", text),
            _ => text.to_string(),
        };

        let matches = self
            .search
            .search_all(
                &self.collection,
                query.as_bytes(),
                max_results,
                &CancellationToken::new(),
            )
            .await
            .map_err(|e| e.to_string())?;

        info!(tool = name, max_results, matches = matches.len(), "Tool call complete");

        Ok(match name {
            SIMILAR_TO_CODE => format_similar_to_code(&matches),
            _ => format_search_patterns(&matches),
        })
    }
}

#[async_trait]
impl ServerHandler for HobbitServerHandler {
    async fn handle_list_tools_request(
        &self,
        _params: Option<PaginatedRequestParams>,
        _runtime: Arc<dyn McpServer>,
    ) -> std::result::Result<ListToolsResult, RpcError> {
        let tools: Vec<McpTool> = Self::tool_definitions()
            .into_iter()
            .map(|(name, description, schema)| {
                let input_schema: ToolInputSchema = serde_json::from_value(schema)
                    .unwrap_or_else(|_| ToolInputSchema::new(vec![], None, None));

                McpTool {
                    name: name.to_string(),
                    description: Some(description.to_string()),
                    input_schema,
                    annotations: None,
                    execution: None,
                    icons: vec![],
                    meta: None,
                    output_schema: None,
                    title: None,
                }
            })
            .collect();

        Ok(ListToolsResult {
            tools,
            meta: None,
            next_cursor: None,
        })
    }

    async fn handle_call_tool_request(
        &self,
        params: CallToolRequestParams,
        _runtime: Arc<dyn McpServer>,
    ) -> std::result::Result<CallToolResult, rust_mcp_sdk::schema::schema_utils::CallToolError>
    {
        let args = params.arguments.unwrap_or_default();

        let (text, is_error) = match self.call_tool(&params.name, &args).await {
            Ok(text) => (text, None),
            Err(message) => {
                tracing::warn!(tool = %params.name, error = %message, "Tool call failed");
                (message, Some(true))
            }
        };

        Ok(CallToolResult {
            content: vec![TextContent::new(text, None, None).into()],
            is_error,
            meta: None,
            structured_content: None,
        })
    }
}

// ============================================================================
// MCP Server Runner
// ============================================================================

/// Run an MCP server on stdio transport backed by `search`.
pub async fn run_mcp_server(search: Arc<SearchService>, config: McpServerConfig) -> Result<()> {
    info!("Starting MCP Server: {}", config.name);

    let server_details = InitializeResult {
        server_info: Implementation {
            name: config.name.clone(),
            version: config.version.clone(),
            title: Some(format!("{} MCP Server", config.name)),
            description: Some("Golden-pattern search exposed via MCP".to_string()),
            icons: vec![],
            website_url: None,
        },
        capabilities: ServerCapabilities {
            tools: Some(ServerCapabilitiesTools { list_changed: None }),
            ..Default::default()
        },
        meta: None,
        instructions: config.instructions,
        protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
    };

    let transport = StdioTransport::new(TransportOptions::default())
        .map_err(|e| anyhow::anyhow!("Failed to create transport: {}", e))?;

    let handler = HobbitServerHandler::new(search, config.collection).to_mcp_server_handler();

    let server = server_runtime::create_server(McpServerOptions {
        server_details,
        transport,
        handler,
        task_store: None,
        client_task_store: None,
    });

    info!("MCP Server starting on stdio transport");
    server
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("{}", e))
        .context("MCP server failed")?;

    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
