//! Retrieval-augmented generation demo.
//!
//! A single sequential run:
//!
//! 1. Ask the LLM the question with no context (failure is only logged).
//! 2. Ensure the `Wiki` schema, whose `text_v` field the node embeds itself.
//! 3. Insert every article of a JSONL file, one mutation per line.
//! 4. Embed the question.
//! 5. Fetch the top matches above the similarity threshold.
//! 6. Ask again with the matches as context.
//!
//! The `search_document: ` / `search_query: ` prefixes follow the
//! nomic-embed-text convention for asymmetric retrieval.

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::path::Path;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::config::RagConfig;
use crate::defra::Database;
use crate::llm::{ChatMessage, LlmClient};
use crate::node::{Node, NodeOptions};
use crate::schema::{ensure_schema, WIKI_SCHEMA};

pub const DOCUMENT_PREFIX: &str = "search_document: ";
pub const QUERY_PREFIX: &str = "search_query: ";

const CREATE_WIKI: &str = r#"mutation CreateWiki($input: [WikiMutationInputArg!]!) {
  create_Wiki(input: $input) {
    _docID
  }
}"#;

const SEPARATOR: &str =
    "================================================================================";

/// One line of the knowledge-base file.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct WikiArticle {
    pub text: String,
    #[serde(default)]
    pub category: String,
}

/// A retrieved article with its similarity to the question.
#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    pub text: String,
    pub similarity: f64,
}

const BASE_PROMPT: &str = "You are a helpful assistant with access to a knowlege base, tasked with answering questions about the world and its history, people, places and other things.

Answer the question in a very concise manner. Use an unbiased and journalistic tone. Do not repeat text. Don't make anything up. If you are not sure about something, just say that you don't know.";

const CONTEXT_INSTRUCTIONS: &str = "Answer the question solely based on the provided search results from the knowledge base. If the search results from the knowledge base are not relevant to the question at hand, just say that you don't know. Don't make anything up.

Anything between the following 'context' XML blocks is retrieved from the knowledge base, not part of the conversation with the user. The bullet points are ordered by relevance, so the first one is the most relevant.";

const CLOSING_PROMPT: &str =
    "Don't mention the knowledge base, context or search results in your answer.";

/// System prompt, with a `<context>` block when `contexts` is non-empty.
pub fn system_prompt(contexts: &[String]) -> String {
    let mut prompt = String::from(BASE_PROMPT);
    if !contexts.is_empty() {
        prompt.push_str(CONTEXT_INSTRUCTIONS);
        prompt.push_str("\n\n<context>");
        for context in contexts {
            prompt.push_str("\n    - ");
            prompt.push_str(context);
        }
        prompt.push_str("\n</context>");
    }
    prompt.push_str("\n\n");
    prompt.push_str(CLOSING_PROMPT);
    prompt
}

pub async fn ask_llm(
    llm: &LlmClient,
    config: &RagConfig,
    contexts: &[String],
    question: &str,
) -> Result<String> {
    let messages = [
        ChatMessage::system(system_prompt(contexts)),
        ChatMessage::user(format!("Question: {}", question)),
    ];
    llm.chat(&config.llm_model, &messages).await
}

/// Streams `path` line by line, inserting each article with its own
/// mutation. Returns the number of articles stored.
pub async fn load_articles(db: &dyn Database, path: &Path) -> Result<usize> {
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let mut lines = BufReader::new(file).lines();

    let mut count = 0;
    let mut line_no = 0;
    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        let article: WikiArticle = serde_json::from_str(&line)
            .with_context(|| format!("Failed to decode JSON line {}", line_no))?;
        insert_article(db, &article)
            .await
            .with_context(|| format!("Failed to create document from line {}", line_no))?;
        count += 1;
    }
    Ok(count)
}

async fn insert_article(db: &dyn Database, article: &WikiArticle) -> Result<()> {
    let mut vars = Map::new();
    vars.insert(
        "input".to_string(),
        json!({
            "text": format!("{}{}", DOCUMENT_PREFIX, article.text),
            "category": article.category,
        }),
    );
    let resp = db.exec_request(CREATE_WIKI, Some(&vars)).await?;
    if !resp.is_ok() {
        for err in &resp.errors {
            tracing::error!(error = %err.message, "GraphQL error on create");
        }
        anyhow::bail!("create_Wiki failed: {}", resp.errors[0].message);
    }
    Ok(())
}

/// Similarity search over `text_v`, best match first.
pub fn similarity_query(threshold: f64, limit: usize) -> String {
    format!(
        r#"query Search($queryVector: [Float32!]!) {{
  Wiki(
    filter: {{_alias: {{sim: {{_gt: {threshold}}}}}}},
    limit: {limit},
    order: {{_alias: {{sim: DESC}}}}
  ) {{
    text
    sim: _similarity(text_v: {{vector: $queryVector}})
  }}
}}"#
    )
}

/// Extracts hits from the search result, stripping the document prefix.
pub fn parse_hits(data: &Value) -> Vec<Hit> {
    data.get("Wiki")
        .and_then(Value::as_array)
        .map(|rows| {
            rows.iter()
                .filter_map(|row| {
                    let text = row.get("text")?.as_str()?;
                    Some(Hit {
                        text: text.strip_prefix(DOCUMENT_PREFIX).unwrap_or(text).to_string(),
                        similarity: row.get("sim").and_then(Value::as_f64).unwrap_or_default(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

pub async fn search(
    db: &dyn Database,
    llm: &LlmClient,
    config: &RagConfig,
    question: &str,
) -> Result<Vec<Hit>> {
    let query_text = format!("{}{}", QUERY_PREFIX, question);
    tracing::info!("Creating embedding for the query...");
    let vector = llm
        .embed_one(&config.embedding_model, &query_text)
        .await
        .context("Failed to create query embedding")?;

    tracing::info!("Querying DefraDB for similar documents...");
    let mut vars = Map::new();
    vars.insert("queryVector".to_string(), json!(vector));
    let resp = db
        .exec_request(
            &similarity_query(config.similarity_threshold, config.top_k),
            Some(&vars),
        )
        .await?;
    if !resp.is_ok() {
        for err in &resp.errors {
            tracing::error!(error = %err.message, "GraphQL error on query");
        }
        anyhow::bail!("Failed to query documents: {}", resp.errors[0].message);
    }
    Ok(parse_hits(&resp.data))
}

/// Steps 2–6 against an open database. Returns the final reply, or `None`
/// when nothing relevant was found.
pub async fn retrieve_and_answer(
    db: &dyn Database,
    llm: &LlmClient,
    config: &RagConfig,
    question: &str,
    data_path: &Path,
) -> Result<Option<String>> {
    tracing::info!("Adding 'Wiki' collection schema...");
    ensure_schema(db, "Wiki", WIKI_SCHEMA).await?;

    tracing::info!("Reading JSON lines from {}...", data_path.display());
    let loaded = load_articles(db, data_path).await?;
    tracing::info!("Finished loading {} documents.", loaded);

    tracing::info!("{}", SEPARATOR);
    tracing::info!("Retrieving relevant documents");
    tracing::info!("{}", SEPARATOR);
    let start = Instant::now();
    let hits = search(db, llm, config, question).await?;
    tracing::info!("Search (incl. query embedding) took {:?}", start.elapsed());

    if hits.is_empty() {
        tracing::info!("No relevant documents found in the knowledge base.");
        return Ok(None);
    }

    tracing::info!("Found relevant documents:");
    for (i, hit) in hits.iter().enumerate() {
        let preview: String = hit.text.chars().take(100).collect();
        tracing::info!(
            " - Document {} (similarity: {:.4}): \"{}...\"",
            i + 1,
            hit.similarity,
            preview
        );
    }
    let contexts: Vec<String> = hits.into_iter().map(|h| h.text).collect();

    tracing::info!("{}", SEPARATOR);
    tracing::info!("Asking the LLM with retrieved knowledge (with RAG)");
    tracing::info!("{}", SEPARATOR);
    let reply = ask_llm(llm, config, &contexts, question)
        .await
        .context("Chat completion failed")?;
    tracing::info!("Reply after augmenting the question with knowledge: \"{}\"", reply);
    Ok(Some(reply))
}

/// The whole demo, including node startup and shutdown.
pub async fn run_demo(
    config: &RagConfig,
    node_options: NodeOptions,
    question: &str,
    data_path: &Path,
) -> Result<Option<String>> {
    let llm = LlmClient::new(reqwest::Client::new(), config.llm_url.clone());

    tracing::info!("{}", SEPARATOR);
    tracing::info!("Asking the LLM without providing any external knowledge (no RAG)");
    tracing::info!("{}", SEPARATOR);
    tracing::info!("Question: {}", question);
    let reply = match ask_llm(&llm, config, &[], question).await {
        Ok(reply) => reply,
        Err(e) => format!("{:#}", e),
    };
    tracing::info!("Initial reply from the LLM: \"{}\"", reply);

    tracing::info!("{}", SEPARATOR);
    tracing::info!("Set up DefraDB and load knowledge base");
    tracing::info!("{}", SEPARATOR);
    let node = Node::open(node_options)
        .await
        .context("Failed to start DefraDB node")?;
    let result = retrieve_and_answer(node.db(), &llm, config, question, data_path).await;
    node.close().await?;
    result
}
