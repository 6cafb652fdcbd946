//! Web search tool backed by the DuckDuckGo Instant Answer API.
//!
//! No API key is needed. Results come from the abstract, direct results and
//! related topics of the answer, flattened and numbered.

use async_trait::async_trait;
use localforge_config::WebSearchToolConfig;
use localforge_core::error::ToolError;
use localforge_core::tool::Tool;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

const DEFAULT_ENDPOINT: &str = "https://api.duckduckgo.com/";

/// Upper bound regardless of what the model asks for.
const MAX_RESULTS_CEILING: usize = 10;

const SNIPPET_CHARS: usize = 200;

pub struct WebSearchTool {
    endpoint: String,
    default_max_results: usize,
    client: reqwest::Client,
}

impl WebSearchTool {
    pub fn new(default_max_results: usize) -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.into(),
            default_max_results,
            client: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &WebSearchToolConfig) -> Self {
        Self::new(config.max_results)
    }

    /// Point at a different endpoint (tests, proxies).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InstantAnswer {
    #[serde(default)]
    heading: String,
    #[serde(default)]
    abstract_text: String,
    #[serde(default, rename = "AbstractURL")]
    abstract_url: String,
    #[serde(default)]
    results: Vec<Topic>,
    #[serde(default)]
    related_topics: Vec<Topic>,
}

/// A related topic is either a leaf result or a named group of them.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Topic {
    Leaf {
        #[serde(rename = "Text")]
        text: String,
        #[serde(rename = "FirstURL")]
        first_url: String,
    },
    Group {
        #[serde(rename = "Topics")]
        topics: Vec<Topic>,
    },
}

#[derive(Debug, PartialEq)]
struct SearchResult {
    title: String,
    url: String,
    snippet: String,
}

fn flatten(topics: Vec<Topic>, out: &mut Vec<SearchResult>) {
    for topic in topics {
        match topic {
            Topic::Leaf { text, first_url } if !first_url.is_empty() => {
                let title = text.split(" - ").next().unwrap_or(&text).to_string();
                out.push(SearchResult {
                    title,
                    url: first_url,
                    snippet: text,
                });
            }
            Topic::Leaf { .. } => {}
            Topic::Group { topics } => flatten(topics, out),
        }
    }
}

fn collect_results(answer: InstantAnswer, limit: usize) -> Vec<SearchResult> {
    let mut results = Vec::new();
    if !answer.abstract_text.is_empty() {
        results.push(SearchResult {
            title: if answer.heading.is_empty() {
                answer.abstract_url.clone()
            } else {
                answer.heading.clone()
            },
            url: answer.abstract_url,
            snippet: answer.abstract_text,
        });
    }
    flatten(answer.results, &mut results);
    flatten(answer.related_topics, &mut results);
    results.truncate(limit);
    results
}

fn format_results(query: &str, results: &[SearchResult]) -> String {
    if results.is_empty() {
        return format!("No results found for: {query}");
    }
    let mut out = format!("Search results for: {query}\n");
    for (i, r) in results.iter().enumerate() {
        let snippet: String = r.snippet.chars().take(SNIPPET_CHARS).collect();
        out.push_str(&format!(
            "\n{}. {}\n   URL: {}\n   {}\n",
            i + 1,
            r.title,
            r.url,
            snippet.replace('\n', " ")
        ));
    }
    out
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web using DuckDuckGo and return results with titles, URLs, and snippets."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Search query"
                },
                "max_results": {
                    "type": "integer",
                    "description": "Maximum number of results to return (default from config, at most 10)"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, input: Value) -> Result<String, ToolError> {
        let query = input["query"]
            .as_str()
            .filter(|q| !q.trim().is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'query' argument".into()))?;

        let limit = input["max_results"]
            .as_u64()
            .map(|n| n as usize)
            .filter(|n| *n > 0)
            .unwrap_or(self.default_max_results)
            .min(MAX_RESULTS_CEILING);

        debug!(query = %query, limit, "Searching the web");

        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("q", query),
                ("format", "json"),
                ("no_html", "1"),
                ("skip_disambig", "1"),
            ])
            .send()
            .await
            .map_err(|e| ToolError::execution(self.name(), format!("search request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(ToolError::execution(
                self.name(),
                format!("search returned HTTP {}", response.status().as_u16()),
            ));
        }

        // The API sometimes answers with an empty body for unknown queries.
        let body = response
            .text()
            .await
            .map_err(|e| ToolError::execution(self.name(), e))?;
        let answer: InstantAnswer = if body.trim().is_empty() {
            InstantAnswer::default()
        } else {
            serde_json::from_str(&body)
                .map_err(|e| ToolError::execution(self.name(), format!("invalid search response: {e}")))?
        };

        Ok(format_results(query, &collect_results(answer, limit)))
    }
}
