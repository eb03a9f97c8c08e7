//! Search provider client and the search gate.

use std::sync::Arc;

use serde_json::Value;

use ha_domain::config::SearchConfig;
use ha_domain::error::{Error, Result};
use ha_providers::{ChatRequest, LlmClient};

use crate::complexity::{pattern_tier, ComplexityTier, QueryComplexityCache};
use crate::context::extract_context;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SearchClient
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Chat-completions client for the web-search provider.
pub struct SearchClient {
    base_url: String,
    api_key: String,
    model: String,
    http: reqwest::Client,
}

impl SearchClient {
    pub fn from_config(cfg: &SearchConfig) -> Result<Self> {
        let api_key = std::env::var(&cfg.api_key_env)
            .map_err(|_| Error::Auth(format!("env var '{}' not set", cfg.api_key_env)))?;
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(45))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: cfg.model.clone(),
            http,
        })
    }

    /// Run one web search with the tier's token budget.
    pub async fn search(&self, query: &str, max_tokens: u32) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": "Answer concisely with current information."},
                {"role": "user", "content": query},
            ],
            "max_tokens": max_tokens,
        });

        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = resp.status();
        let value: Value = resp.json().await.map_err(|e| Error::Http(e.to_string()))?;
        if !status.is_success() {
            return Err(Error::Http(format!("search returned HTTP {status}")));
        }

        value
            .pointer("/choices/0/message/content")
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .ok_or_else(|| Error::Provider {
                provider: "search".into(),
                message: "response missing choices[0].message.content".into(),
            })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Search gate
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Resolve the token tier for a query: pattern table → cache → classifier.
///
/// A freshly classified tier is cached under the query's fingerprint, so
/// structurally equal queries never hit the classifier twice.
pub async fn resolve_tier(
    llm: &Arc<dyn LlmClient>,
    cache: &QueryComplexityCache,
    query: &str,
) -> ComplexityTier {
    if let Some(tier) = pattern_tier(query) {
        return tier;
    }
    if let Some(tier) = cache.get(query) {
        return tier;
    }

    let prompt = format!(
        "How much detail does a good answer to this web query need?\n\
         Query: \"{query}\"\n\
         Answer ONLY one word: low (single fact), medium (short summary), \
         or high (multi-part synthesis)."
    );
    let request = ChatRequest::text(prompt)
        .with_temperature(0.0)
        .with_max_tokens(5);
    let tier = match llm.generate(request).await {
        Ok(resp) => ComplexityTier::from_label(&resp.content),
        Err(e) => {
            tracing::warn!(error = %e, "complexity classification failed, using medium");
            return ComplexityTier::Medium;
        }
    };
    cache.put(query, tier);
    tier
}

/// Decide whether a turn needs a web search; if yes, run it and return the
/// answer as auxiliary context.
///
/// The decision call is seeded with a context-extraction pre-step over the
/// recent history. Errors collapse to `(false, None)` — no intent.
pub async fn validate_search_need(
    llm: &Arc<dyn LlmClient>,
    client: &SearchClient,
    cache: &QueryComplexityCache,
    query: &str,
    history: &[String],
) -> (bool, Option<String>) {
    let context = extract_context(llm, query, history).await;

    let context_block = context
        .as_deref()
        .map(|c| format!("Context: {c}\n\n"))
        .unwrap_or_default();
    let prompt = format!(
        "{context_block}User said: \"{query}\"\n\n\
         Does answering this require up-to-date information from the web \
         (news, scores, prices, weather, recent events)? Answer ONLY 'Yes' or 'No'."
    );
    let request = ChatRequest::text(prompt)
        .with_temperature(0.0)
        .with_max_tokens(10);
    let needs_search = match llm.generate(request).await {
        Ok(resp) => resp.content.contains("Yes"),
        Err(e) => {
            tracing::warn!(error = %e, "search-need validation failed");
            false
        }
    };
    if !needs_search {
        return (false, None);
    }

    let full_query = match &context {
        Some(context) => format!("{query} ({context})"),
        None => query.to_string(),
    };
    let tier = resolve_tier(llm, cache, query).await;
    match client.search(&full_query, tier.max_tokens()).await {
        Ok(answer) => (true, Some(answer)),
        Err(e) => {
            tracing::warn!(error = %e, "search call failed");
            (false, None)
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use ha_providers::ChatResponse;
    use parking_lot::Mutex;

    /// Counts classifier calls and always answers "high".
    struct CountingLlm {
        calls: Mutex<u32>,
    }

    #[async_trait::async_trait]
    impl LlmClient for CountingLlm {
        async fn generate(&self, _req: ChatRequest) -> Result<ChatResponse> {
            *self.calls.lock() += 1;
            Ok(ChatResponse {
                content: "high".into(),
                model: "fake".into(),
            })
        }
        fn client_id(&self) -> &str {
            "fake"
        }
    }

    #[tokio::test]
    async fn resolve_tier_caches_by_fingerprint() {
        let dir = tempfile::tempdir().unwrap();
        let cache = QueryComplexityCache::new(dir.path()).unwrap();
        let counting = Arc::new(CountingLlm {
            calls: Mutex::new(0),
        });
        let llm: Arc<dyn LlmClient> = counting.clone();

        // Not in the pattern table; first call classifies, second hits cache.
        let t1 = resolve_tier(&llm, &cache, "restaurants open near Fenway on Friday").await;
        let t2 = resolve_tier(&llm, &cache, "restaurants open near Fenway on Monday").await;
        assert_eq!(t1, ComplexityTier::High);
        assert_eq!(t1, t2);
        assert_eq!(*counting.calls.lock(), 1, "fingerprint match must skip the LLM");
    }

    #[tokio::test]
    async fn resolve_tier_pattern_table_skips_llm_entirely() {
        let dir = tempfile::tempdir().unwrap();
        let cache = QueryComplexityCache::new(dir.path()).unwrap();
        let counting = Arc::new(CountingLlm {
            calls: Mutex::new(0),
        });
        let llm: Arc<dyn LlmClient> = counting.clone();

        let tier = resolve_tier(&llm, &cache, "what's the weather today").await;
        assert_eq!(tier, ComplexityTier::Low);
        assert_eq!(*counting.calls.lock(), 0);
    }
}
