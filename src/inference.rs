use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use ureq::Agent;

use crate::refs;
use crate::types::{DocumentMetadata, Engine, Heading, Reference};

/// Document text sent to the endpoint: head plus tail, so the reference
/// section survives truncation on long papers.
const HEAD_BUDGET: usize = 8000;
const TAIL_BUDGET: usize = 4000;

const BACKOFF_BASE: Duration = Duration::from_secs(2);
const BACKOFF_CAP: Duration = Duration::from_secs(60);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(90);

const PROMPT: &str = "Extract the metadata of the research paper below. \
Reply with a single JSON object and nothing else, using exactly these keys: \
\"title\" (string), \"authors\" (array of strings), \"headings\" (array of \
strings, the section headings in order), \"references\" (array of strings, \
one entry per bibliography item).";

/// Connection settings for the hosted inference endpoint.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub endpoint: String,
    pub token: Option<String>,
    pub max_retries: u32,
}

pub struct InferenceCache {
    conn: Connection,
}

/// The JSON object the model is asked to produce. Every field defaults so
/// a partial reply still parses.
#[derive(Debug, Serialize, Deserialize)]
struct RemotePayload {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    authors: Vec<String>,
    #[serde(default)]
    headings: Vec<String>,
    #[serde(default)]
    references: Vec<String>,
}

enum CallOutcome {
    Completed(String),
    Transient { wait: Option<Duration> },
    Fatal(anyhow::Error),
}

impl InferenceCache {
    pub fn open() -> Result<Self> {
        let cache_dir = dirs::cache_dir()
            .context("Could not determine cache directory")?
            .join("papermeta");
        std::fs::create_dir_all(&cache_dir)?;
        let db_path = cache_dir.join("inference_cache.db");
        Self::with_connection(Connection::open(&db_path)?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS inference_cache (
                key TEXT PRIMARY KEY,
                metadata TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )",
        )?;
        Ok(Self { conn })
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT metadata FROM inference_cache WHERE key = ?1")?;
        let mut rows = stmt.query(params![key])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    fn put(&self, key: &str, metadata: &str) -> Result<()> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64;
        self.conn.execute(
            "INSERT OR REPLACE INTO inference_cache (key, metadata, created_at) VALUES (?1, ?2, ?3)",
            params![key, metadata, now],
        )?;
        Ok(())
    }
}

/// Send the document text to the configured endpoint and parse the model's
/// reply into metadata. Successful extractions are cached by document hash;
/// failures never enter the cache.
pub fn extract_remote(
    doc_text: &str,
    page_count: usize,
    config: &RemoteConfig,
    cache: Option<&InferenceCache>,
) -> Result<DocumentMetadata> {
    let key = cache_key(&config.endpoint, doc_text);
    if let Some(cache) = cache {
        if let Some(meta) = cached_extraction(cache, &key, page_count) {
            eprintln!("Using cached extraction");
            return Ok(meta);
        }
    }

    let body = serde_json::json!({
        "inputs": build_prompt(doc_text),
        "parameters": {
            "max_new_tokens": 768,
            "return_full_text": false,
        },
    })
    .to_string();

    let agent = build_agent();
    let reply = fetch_with_retry(&agent, config, &body)?;
    complete_extraction(&reply, &key, cache, page_count)
}

/// Re-use a stored extraction for this document, if one is present and
/// still parses.
fn cached_extraction(
    cache: &InferenceCache,
    key: &str,
    page_count: usize,
) -> Option<DocumentMetadata> {
    let stored = cache.get(key).ok()??;
    let payload: RemotePayload = serde_json::from_str(&stored).ok()?;
    Some(payload.into_metadata(page_count))
}

/// Parse the endpoint reply and store the normalized payload. Replies that
/// fail to parse never enter the cache.
fn complete_extraction(
    reply: &str,
    key: &str,
    cache: Option<&InferenceCache>,
    page_count: usize,
) -> Result<DocumentMetadata> {
    let payload = parse_reply(reply)?;
    if let Some(cache) = cache {
        if let Ok(json) = serde_json::to_string(&payload) {
            let _ = cache.put(key, &json);
        }
    }
    Ok(payload.into_metadata(page_count))
}

fn cache_key(endpoint: &str, doc_text: &str) -> String {
    let mut hasher = DefaultHasher::new();
    doc_text.hash(&mut hasher);
    format!("{}|{:016x}", endpoint, hasher.finish())
}

fn build_prompt(doc_text: &str) -> String {
    format!("{PROMPT}\n\n{}", excerpt(doc_text))
}

fn excerpt(text: &str) -> String {
    if text.len() <= HEAD_BUDGET + TAIL_BUDGET {
        return text.to_string();
    }
    let head_end = floor_char_boundary(text, HEAD_BUDGET);
    let tail_start = floor_char_boundary(text, text.len() - TAIL_BUDGET);
    format!("{}\n[...]\n{}", &text[..head_end], &text[tail_start..])
}

fn floor_char_boundary(text: &str, index: usize) -> usize {
    let mut i = index.min(text.len());
    while !text.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn build_agent() -> Agent {
    Agent::config_builder()
        .http_status_as_error(false)
        .timeout_global(Some(REQUEST_TIMEOUT))
        .build()
        .new_agent()
}

fn fetch_with_retry(agent: &Agent, config: &RemoteConfig, body: &str) -> Result<String> {
    let mut backoff = BACKOFF_BASE;
    let mut attempt = 0;
    loop {
        match call_endpoint(agent, config, body) {
            CallOutcome::Completed(reply) => return Ok(reply),
            CallOutcome::Fatal(err) => return Err(err),
            CallOutcome::Transient { wait } => {
                attempt += 1;
                if attempt > config.max_retries {
                    return Err(anyhow::anyhow!(
                        "Inference endpoint unavailable after {attempt} attempts"
                    ));
                }
                let delay = wait.unwrap_or(backoff).min(BACKOFF_CAP);
                eprintln!(
                    "Endpoint busy, retrying in {}s (attempt {attempt}/{})",
                    delay.as_secs(),
                    config.max_retries
                );
                std::thread::sleep(delay);
                backoff = (backoff * 2).min(BACKOFF_CAP);
            }
        }
    }
}

/// One POST to the endpoint. Transient outcomes carry the server's
/// suggested wait when it sent one (Retry-After header or the
/// `estimated_time` field of a model-loading reply).
fn call_endpoint(agent: &Agent, config: &RemoteConfig, body: &str) -> CallOutcome {
    let mut req = agent
        .post(&config.endpoint)
        .header("content-type", "application/json");
    if let Some(token) = &config.token {
        req = req.header("authorization", format!("Bearer {token}"));
    }
    let resp = match req.send(body) {
        Ok(resp) => resp,
        Err(_) => return CallOutcome::Transient { wait: None },
    };

    let status = resp.status();
    let retry_after = resp
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(parse_retry_after);

    if status == 429 || status == 408 || status.is_server_error() {
        let wait = match resp.into_body().read_to_string() {
            Ok(text) => retry_after.or_else(|| parse_estimated_time(&text)),
            Err(_) => retry_after,
        };
        return CallOutcome::Transient { wait };
    }
    if status != 200 {
        return CallOutcome::Fatal(anyhow::anyhow!(
            "Inference endpoint returned HTTP {status}"
        ));
    }
    match resp.into_body().read_to_string() {
        Ok(reply) => CallOutcome::Completed(reply),
        Err(_) => CallOutcome::Transient { wait: None },
    }
}

/// Retry-After is either integer seconds or an HTTP-date; dates get a
/// conservative flat wait.
fn parse_retry_after(value: &str) -> Option<Duration> {
    if let Ok(secs) = value.trim().parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    if value.contains(',') || value.contains("GMT") {
        return Some(Duration::from_secs(5));
    }
    None
}

/// Hosted endpoints answer 503 with `{"error": "... loading", "estimated_time": N}`
/// while the model spins up.
fn parse_estimated_time(body: &str) -> Option<Duration> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let secs = value.get("estimated_time")?.as_f64()?;
    if secs.is_finite() && (0.0..=3600.0).contains(&secs) {
        Some(Duration::from_secs_f64(secs))
    } else {
        None
    }
}

fn parse_reply(body: &str) -> Result<RemotePayload> {
    let text = extract_generated_text(body);
    let object = extract_json_object(&text)
        .context("Model reply contained no JSON object")?;
    serde_json::from_str(object).context("Model reply JSON had an unexpected shape")
}

/// Unwrap the `[{"generated_text": ...}]` / `{"generated_text": ...}`
/// envelopes; anything else passes through unchanged.
fn extract_generated_text(body: &str) -> String {
    let value: serde_json::Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(_) => return body.to_string(),
    };
    let inner = match &value {
        serde_json::Value::Array(items) => items.first().and_then(|v| v.get("generated_text")),
        serde_json::Value::Object(_) => value.get("generated_text"),
        _ => None,
    };
    match inner.and_then(|v| v.as_str()) {
        Some(text) => text.to_string(),
        None => body.to_string(),
    }
}

/// First balanced `{...}` in the text. Skips markdown fences and leading
/// prose; string literals may contain braces.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in text.as_bytes().iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

impl RemotePayload {
    fn into_metadata(self, page_count: usize) -> DocumentMetadata {
        let title = self
            .title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        let authors = self
            .authors
            .into_iter()
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .collect();
        let headings = self
            .headings
            .into_iter()
            .filter_map(|h| {
                let text = h.trim().to_string();
                (!text.is_empty()).then_some(Heading { text, page: None })
            })
            .collect();
        let references = self
            .references
            .into_iter()
            .filter_map(|r| {
                let raw = r.trim();
                if raw.is_empty() {
                    return None;
                }
                let (marker, text) = refs::strip_marker(raw);
                let text = if text.is_empty() { raw.to_string() } else { text };
                Some(Reference {
                    text,
                    marker,
                    page: None,
                })
            })
            .collect();
        DocumentMetadata {
            title,
            authors,
            headings,
            references,
            pages: page_count,
            engine: Engine::Remote,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_lists_required_keys() {
        let prompt = build_prompt("A Study of Things.");
        for key in ["\"title\"", "\"authors\"", "\"headings\"", "\"references\""] {
            assert!(prompt.contains(key), "prompt missing {key}");
        }
        assert!(prompt.contains("A Study of Things."));
    }

    #[test]
    fn excerpt_keeps_short_documents_whole() {
        let text = "short document";
        assert_eq!(excerpt(text), text);
    }

    #[test]
    fn excerpt_keeps_head_and_tail_of_long_documents() {
        let text = format!("START {}END", "a".repeat(20_000));
        let cut = excerpt(&text);
        assert!(cut.starts_with("START"));
        assert!(cut.ends_with("END"));
        assert!(cut.contains("\n[...]\n"));
        assert!(cut.len() < text.len());
    }

    #[test]
    fn excerpt_respects_char_boundaries() {
        // 3-byte chars put both budget offsets mid-char.
        let text = "€".repeat(9_000);
        let cut = excerpt(&text);
        assert!(cut.contains("[...]"));
    }

    #[test]
    fn bare_object_reply_parses() {
        let body = r#"{"title":"Attention Is All You Need","authors":["Ashish Vaswani"],"headings":["Introduction"],"references":["[1] J. Ba. Layer normalization. 2016."]}"#;
        let payload = parse_reply(body).unwrap();
        assert_eq!(payload.title.as_deref(), Some("Attention Is All You Need"));
        assert_eq!(payload.authors, vec!["Ashish Vaswani"]);
        assert_eq!(payload.headings, vec!["Introduction"]);
        assert_eq!(payload.references.len(), 1);
    }

    #[test]
    fn generated_text_array_envelope_is_unwrapped() {
        let body = r#"[{"generated_text": "{\"title\": \"Deep Residual Learning\"}"}]"#;
        let payload = parse_reply(body).unwrap();
        assert_eq!(payload.title.as_deref(), Some("Deep Residual Learning"));
        assert!(payload.authors.is_empty());
    }

    #[test]
    fn generated_text_object_envelope_is_unwrapped() {
        let body = r#"{"generated_text": "{\"title\": \"A Title\", \"authors\": [\"Jane Doe\"]}"}"#;
        let payload = parse_reply(body).unwrap();
        assert_eq!(payload.title.as_deref(), Some("A Title"));
        assert_eq!(payload.authors, vec!["Jane Doe"]);
    }

    #[test]
    fn fenced_reply_with_prose_is_salvaged() {
        let body = "Sure, here is the metadata:\n```json\n{\"title\": \"Q\"}\n```\nHope this helps!";
        let payload = parse_reply(body).unwrap();
        assert_eq!(payload.title.as_deref(), Some("Q"));
    }

    #[test]
    fn partial_object_fills_defaults() {
        let payload = parse_reply(r#"{"title": "Only a Title"}"#).unwrap();
        assert_eq!(payload.title.as_deref(), Some("Only a Title"));
        assert!(payload.authors.is_empty());
        assert!(payload.headings.is_empty());
        assert!(payload.references.is_empty());
    }

    #[test]
    fn reply_without_json_is_an_error() {
        assert!(parse_reply("I could not find any metadata in this document.").is_err());
    }

    #[test]
    fn json_object_extraction_matches_braces_inside_strings() {
        let text = r#"noise {"a": "}{", "b": {"c": 1}} trailing"#;
        assert_eq!(
            extract_json_object(text),
            Some(r#"{"a": "}{", "b": {"c": 1}}"#)
        );
    }

    #[test]
    fn retry_after_integer_seconds() {
        assert_eq!(parse_retry_after("10"), Some(Duration::from_secs(10)));
        assert_eq!(parse_retry_after(" 0 "), Some(Duration::from_secs(0)));
    }

    #[test]
    fn retry_after_http_date_is_conservative() {
        let val = "Wed, 21 Oct 2015 07:28:00 GMT";
        assert_eq!(parse_retry_after(val), Some(Duration::from_secs(5)));
    }

    #[test]
    fn retry_after_garbage_is_none() {
        assert_eq!(parse_retry_after("soon"), None);
    }

    #[test]
    fn estimated_time_is_read_from_loading_reply() {
        let body = r#"{"error": "Model X is currently loading", "estimated_time": 20.5}"#;
        assert_eq!(
            parse_estimated_time(body),
            Some(Duration::from_secs_f64(20.5))
        );
    }

    #[test]
    fn estimated_time_rejects_nonsense() {
        assert_eq!(parse_estimated_time("not json"), None);
        assert_eq!(parse_estimated_time(r#"{"estimated_time": -3}"#), None);
        assert_eq!(parse_estimated_time(r#"{"estimated_time": 1e9}"#), None);
    }

    #[test]
    fn metadata_conversion_strips_reference_markers() {
        let payload = RemotePayload {
            title: Some("  Padded Title  ".to_string()),
            authors: vec!["John Smith".to_string(), "  ".to_string()],
            headings: vec!["Introduction".to_string()],
            references: vec![
                "[1] A. Author. Some paper. 2020.".to_string(),
                "Plain reference without a marker, 2019.".to_string(),
                "[2017] Networks, a retrospective.".to_string(),
            ],
        };
        let meta = payload.into_metadata(12);
        assert_eq!(meta.title.as_deref(), Some("Padded Title"));
        assert_eq!(meta.authors, vec!["John Smith"]);
        assert_eq!(meta.pages, 12);
        assert_eq!(meta.engine, Engine::Remote);
        assert_eq!(meta.references[0].marker.as_deref(), Some("1"));
        assert_eq!(meta.references[0].text, "A. Author. Some paper. 2020.");
        assert!(meta.references[1].marker.is_none());
        // A leading year is part of the text, not a marker.
        assert!(meta.references[2].marker.is_none());
        assert_eq!(meta.references[2].text, "[2017] Networks, a retrospective.");
        assert_eq!(meta.headings[0].page, None);
    }

    #[test]
    fn cache_key_is_stable_and_input_sensitive() {
        let a = cache_key("https://api.example/model", "document text");
        let b = cache_key("https://api.example/model", "document text");
        let c = cache_key("https://api.example/other", "document text");
        let d = cache_key("https://api.example/model", "different text");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    fn memory_cache() -> InferenceCache {
        InferenceCache::with_connection(Connection::open_in_memory().unwrap()).unwrap()
    }

    #[test]
    fn unparseable_reply_is_never_cached() {
        let cache = memory_cache();
        let result = complete_extraction("The model refused.", "doc-1", Some(&cache), 3);
        assert!(result.is_err());
        assert_eq!(cache.get("doc-1").unwrap(), None);
    }

    #[test]
    fn parsed_reply_round_trips_through_the_cache() {
        let cache = memory_cache();
        let reply = r#"{"title": "Cached Paper", "authors": ["Jane Doe"]}"#;
        let meta = complete_extraction(reply, "doc-1", Some(&cache), 5).unwrap();
        assert_eq!(meta.title.as_deref(), Some("Cached Paper"));

        let cached = cached_extraction(&cache, "doc-1", 5).unwrap();
        assert_eq!(cached.title.as_deref(), Some("Cached Paper"));
        assert_eq!(cached.authors, vec!["Jane Doe"]);
        assert_eq!(cached.pages, 5);
        assert_eq!(cached.engine, Engine::Remote);
    }

    #[test]
    fn newer_extraction_replaces_cached_entry() {
        let cache = memory_cache();
        complete_extraction(r#"{"title": "First"}"#, "doc-1", Some(&cache), 1).unwrap();
        complete_extraction(r#"{"title": "Second"}"#, "doc-1", Some(&cache), 1).unwrap();
        let cached = cached_extraction(&cache, "doc-1", 1).unwrap();
        assert_eq!(cached.title.as_deref(), Some("Second"));
    }
}
