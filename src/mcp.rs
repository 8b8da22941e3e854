use std::{path::PathBuf, sync::Arc};

use rmcp::{
    ServerHandler,
    ServiceExt,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{
        CallToolResult,
        Content,
        Implementation,
        ServerCapabilities,
        ServerInfo,
    },
    tool,
    tool_handler,
    tool_router,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    data_dir::DataDir,
    embedder::Embedder,
    error,
    hybrid::{self, SearchOptions, SearchResult},
    lexical::LexicalIndex,
    store::IndexStore,
};

const DEFAULT_SEARCH_LIMIT: usize = 10;

struct NotedexState {
    store: IndexStore,
    lexical: LexicalIndex,
    embedder: Embedder,
}

#[derive(Clone)]
pub struct NotedexMcpServer {
    state: Arc<NotedexState>,
    tool_router: ToolRouter<Self>,
}

impl NotedexMcpServer {
    fn new(state: NotedexState) -> Self {
        Self {
            state: Arc::new(state),
            tool_router: Self::tool_router(),
        }
    }
}

#[tool_router(router = tool_router)]
impl NotedexMcpServer {
    /// Search indexed notes with hybrid keyword + semantic retrieval.
    #[tool(
        name = "notedex_search",
        description = "Search indexed notes. Combines keyword and semantic retrieval; degrades to keyword-only when no embedding model is installed."
    )]
    pub async fn notedex_search(
        &self,
        params: Parameters<SearchParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let params = params.0;
        let query = params.query.clone();

        let mut opts = SearchOptions {
            limit: params.limit.unwrap_or(DEFAULT_SEARCH_LIMIT),
            keyword_only: params.keyword_only.unwrap_or(false),
            fuzzy: params.fuzzy.unwrap_or(false),
            ..SearchOptions::default()
        };
        if let Some(min_score) = params.min_score {
            opts.min_score = min_score;
        }

        let results = hybrid::search(
            &params.query,
            &opts,
            &self.state.store,
            &self.state.lexical,
            &self.state.embedder,
        )
        .map_err(|e| mcp_error("search failed", e))?;

        let summary = format_search_summary(&results, &query);
        let structured = serde_json::to_value(SearchResponse {
            query,
            result_count: results.len(),
            results,
        })
        .map_err(|e| mcp_error("failed to serialize search results", e))?;

        let mut result = CallToolResult::success(vec![Content::text(summary)]);
        result.structured_content = Some(structured);
        Ok(result)
    }
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for NotedexMcpServer {
    fn get_info(&self) -> ServerInfo {
        let mut info = ServerInfo::default();
        info.capabilities =
            ServerCapabilities::builder().enable_tools().build();
        info.server_info =
            Implementation::new("notedex", env!("CARGO_PKG_VERSION"))
                .with_title("notedex MCP");
        info.instructions = Some(
            "Use notedex_search to find notes by keyword or concept."
                .to_string(),
        );
        info
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SearchParams {
    /// Search query string.
    pub query: String,
    /// Maximum number of results (default: 10).
    pub limit: Option<usize>,
    /// Minimum semantic similarity score (default: 0.3).
    pub min_score: Option<f32>,
    /// Skip the semantic arm, keyword matching only.
    pub keyword_only: Option<bool>,
    /// Allow one-typo prefix matching in the keyword arm.
    pub fuzzy: Option<bool>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    query: String,
    result_count: usize,
    results: Vec<SearchResult>,
}

fn format_search_summary(results: &[SearchResult], query: &str) -> String {
    if results.is_empty() {
        return format!("No results found for \"{query}\"");
    }

    let mut lines = Vec::with_capacity(results.len() + 1);
    let suffix = if results.len() == 1 { "" } else { "s" };
    lines.push(format!(
        "Found {} result{} for \"{query}\":",
        results.len(),
        suffix
    ));

    for result in results {
        lines.push(format!(
            "#{} {:.3} [{}] {}",
            &result.note_id[..result.note_id.len().min(6)],
            result.score,
            result.kind.as_str(),
            result.path
        ));
    }

    lines.join("\n")
}

fn mcp_error(message: &str, error: impl std::fmt::Display) -> rmcp::ErrorData {
    rmcp::ErrorData::internal_error(
        message.to_string(),
        Some(json!({ "error": error.to_string() })),
    )
}

/// Run the MCP server over stdio until the client disconnects.
pub fn run_mcp(data_dir: DataDir, model_dir: PathBuf) -> error::Result<()> {
    let store = IndexStore::open(&data_dir.index_db())?;
    let lexical = LexicalIndex::open(&data_dir.tantivy_dir()?)?;
    let embedder = Embedder::new(&model_dir);

    let server = NotedexMcpServer::new(NotedexState {
        store,
        lexical,
        embedder,
    });

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| {
            error::Error::Config(format!("failed to start tokio runtime: {e}"))
        })?;

    runtime.block_on(async move {
        let transport = rmcp::transport::stdio();
        let running = server.serve(transport).await.map_err(|e| {
            error::Error::Config(format!(
                "MCP server initialization failed: {e}"
            ))
        })?;
        running.waiting().await.map_err(|e| {
            error::Error::Config(format!("MCP server error: {e}"))
        })?;
        Ok(())
    })
}
