//! Query-complexity cache.
//!
//! Search queries get a token budget tier. Structurally similar queries
//! ("Lakers score last night" / "Celtics score last night") share a
//! normalized fingerprint, so one LLM classification serves the whole
//! family. A regex pattern table shortcuts the cache entirely for shapes
//! we already know.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::OnceLock;

use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};

use ha_domain::error::Result;

/// Maximum cached fingerprints before pruning runs.
const CACHE_MAX_ENTRIES: usize = 100;

/// Share of the cache pruned (least recently used first) when full.
const PRUNE_FRACTION: usize = 10;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tiers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Token budget tier for a search call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComplexityTier {
    Low,
    Medium,
    High,
}

impl ComplexityTier {
    pub fn max_tokens(self) -> u32 {
        match self {
            ComplexityTier::Low => 600,
            ComplexityTier::Medium => 1200,
            ComplexityTier::High => 2400,
        }
    }

    /// Parse a model's one-word classification, conservatively defaulting
    /// to `Medium`.
    pub fn from_label(label: &str) -> Self {
        let lowered = label.trim().to_lowercase();
        if lowered.contains("low") {
            ComplexityTier::Low
        } else if lowered.contains("high") {
            ComplexityTier::High
        } else {
            ComplexityTier::Medium
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Fingerprinting
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn weekday_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(monday|tuesday|wednesday|thursday|friday|saturday|sunday)\b").unwrap()
    })
}

fn month_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"\b(january|february|march|april|may|june|july|august|september|october|november|december)\b",
        )
        .unwrap()
    })
}

fn team_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(concat!(
            r"\b(lakers|celtics|warriors|knicks|bulls|heat|nets|suns|bucks|nuggets|",
            r"chiefs|eagles|cowboys|packers|patriots|49ers|bills|ravens|",
            r"yankees|dodgers|mets|red sox|cubs|astros|braves)\b",
        ))
        .unwrap()
    })
}

fn digits_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+").unwrap())
}

/// Normalize a query to its structural shape.
pub fn fingerprint(query: &str) -> String {
    let mut shape = query.trim().to_lowercase();
    shape = weekday_re().replace_all(&shape, "<day>").into_owned();
    shape = month_re().replace_all(&shape, "<month>").into_owned();
    // Teams before digits so "49ers" matches as a team, not a number.
    shape = team_re().replace_all(&shape, "<team>").into_owned();
    shape = digits_re().replace_all(&shape, "<num>").into_owned();
    shape.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pattern table
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Known query shapes that skip both the cache and the classifier.
fn pattern_table() -> &'static [(Regex, ComplexityTier)] {
    static TABLE: OnceLock<Vec<(Regex, ComplexityTier)>> = OnceLock::new();
    TABLE.get_or_init(|| {
        [
            // Simple lookups: scores, weather, single facts.
            (r"\bscore\b", ComplexityTier::Low),
            (r"^(what|who|when|where)('s| is| was| are| were)\b", ComplexityTier::Low),
            (r"\bweather\b", ComplexityTier::Low),
            (r"\b(stock|price) (of|for)\b", ComplexityTier::Low),
            // Rolling-news summaries.
            (r"\b(news|latest|headlines|update)\b", ComplexityTier::Medium),
            // Open-ended synthesis.
            (r"\b(explain|compare|analyz|why does|why did|history of)\b", ComplexityTier::High),
        ]
        .into_iter()
        .map(|(pattern, tier)| (Regex::new(pattern).unwrap(), tier))
        .collect()
    })
}

/// Check the pattern table for a shortcut tier.
pub fn pattern_tier(query: &str) -> Option<ComplexityTier> {
    let lowered = query.trim().to_lowercase();
    pattern_table()
        .iter()
        .find(|(re, _)| re.is_match(&lowered))
        .map(|(_, tier)| *tier)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Cache
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    tier: ComplexityTier,
    /// Logical clock stamp of last use, for LRU pruning.
    last_used: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    clock: u64,
    entries: HashMap<String, CacheEntry>,
}

/// LRU-bounded, disk-persisted fingerprint → tier map.
pub struct QueryComplexityCache {
    path: PathBuf,
    inner: Mutex<CacheFile>,
}

impl QueryComplexityCache {
    /// Load or create the cache at `state_path/complexity_cache.json`.
    pub fn new(state_path: &std::path::Path) -> Result<Self> {
        std::fs::create_dir_all(state_path)?;
        let path = state_path.join("complexity_cache.json");
        let inner = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            CacheFile::default()
        };
        tracing::debug!(entries = inner.entries.len(), "complexity cache loaded");
        Ok(Self {
            path,
            inner: Mutex::new(inner),
        })
    }

    /// Cached tier for a query's fingerprint, refreshing its LRU stamp.
    pub fn get(&self, query: &str) -> Option<ComplexityTier> {
        let key = fingerprint(query);
        let mut inner = self.inner.lock();
        inner.clock += 1;
        let clock = inner.clock;
        inner.entries.get_mut(&key).map(|entry| {
            entry.last_used = clock;
            entry.tier
        })
    }

    /// Store a classified tier, pruning the least recently used ~10% when
    /// the cache is full, then persist.
    pub fn put(&self, query: &str, tier: ComplexityTier) {
        let key = fingerprint(query);
        let snapshot = {
            let mut inner = self.inner.lock();
            inner.clock += 1;
            let clock = inner.clock;
            inner.entries.insert(key, CacheEntry { tier, last_used: clock });

            if inner.entries.len() > CACHE_MAX_ENTRIES {
                let prune = (CACHE_MAX_ENTRIES / PRUNE_FRACTION).max(1);
                let mut by_age: Vec<(String, u64)> = inner
                    .entries
                    .iter()
                    .map(|(k, e)| (k.clone(), e.last_used))
                    .collect();
                by_age.sort_by_key(|(_, used)| *used);
                for (key, _) in by_age.into_iter().take(prune) {
                    inner.entries.remove(&key);
                }
            }
            serde_json::to_string_pretty(&*inner)
        };
        match snapshot {
            Ok(json) => {
                if let Err(e) = std::fs::write(&self.path, json) {
                    tracing::warn!(error = %e, "failed to persist complexity cache");
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to serialize complexity cache"),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_replaces_digits() {
        assert_eq!(
            fingerprint("gas prices on March 3"),
            "gas prices on <month> <num>"
        );
    }

    #[test]
    fn fingerprint_shares_shape_across_teams_and_days() {
        assert_eq!(
            fingerprint("Lakers score on Tuesday"),
            fingerprint("Celtics score on Friday")
        );
    }

    #[test]
    fn fingerprint_collapses_whitespace() {
        assert_eq!(fingerprint("  hello   world "), "hello world");
    }

    #[test]
    fn pattern_table_shortcuts() {
        assert_eq!(pattern_tier("what's the Lakers score"), Some(ComplexityTier::Low));
        assert_eq!(pattern_tier("latest news about fusion"), Some(ComplexityTier::Medium));
        assert_eq!(
            pattern_tier("explain the eurozone debt crisis"),
            Some(ComplexityTier::High)
        );
        assert_eq!(pattern_tier("directions to the airport"), None);
    }

    #[test]
    fn tier_budgets_are_ordered() {
        assert!(ComplexityTier::Low.max_tokens() < ComplexityTier::Medium.max_tokens());
        assert!(ComplexityTier::Medium.max_tokens() < ComplexityTier::High.max_tokens());
    }

    #[test]
    fn tier_from_label_defaults_medium() {
        assert_eq!(ComplexityTier::from_label("LOW"), ComplexityTier::Low);
        assert_eq!(ComplexityTier::from_label("high complexity"), ComplexityTier::High);
        assert_eq!(ComplexityTier::from_label("gibberish"), ComplexityTier::Medium);
    }

    #[test]
    fn cache_round_trip_shares_fingerprint() {
        let dir = tempfile::tempdir().unwrap();
        let cache = QueryComplexityCache::new(dir.path()).unwrap();

        assert!(cache.get("Knicks score on Monday").is_none());
        cache.put("Knicks score on Monday", ComplexityTier::Low);
        // Different surface text, same shape.
        assert_eq!(
            cache.get("Bulls score on Thursday"),
            Some(ComplexityTier::Low)
        );
    }

    #[test]
    fn cache_persists_across_reload() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cache = QueryComplexityCache::new(dir.path()).unwrap();
            cache.put("weather in Paris", ComplexityTier::Low);
        }
        let cache = QueryComplexityCache::new(dir.path()).unwrap();
        assert_eq!(cache.get("weather in Lyon"), Some(ComplexityTier::Low));
    }

    #[test]
    fn numbered_variants_collapse_to_one_entry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = QueryComplexityCache::new(dir.path()).unwrap();
        for i in 0..50 {
            cache.put(&format!("unique query shape number {i} x"), ComplexityTier::Medium);
        }
        assert_eq!(cache.len(), 1, "digit normalization collapses numbered shapes");
    }

    #[test]
    fn cache_prunes_least_recently_used() {
        let dir = tempfile::tempdir().unwrap();
        let cache = QueryComplexityCache::new(dir.path()).unwrap();

        // Distinct word-shapes (no digits, so nothing collapses).
        for i in 0..=CACHE_MAX_ENTRIES {
            cache.put(&format!("shape {} about {}", word(i), word(i + 7)), ComplexityTier::High);
        }

        // Crossing the cap prunes ~10% of the oldest entries.
        assert_eq!(cache.len(), CACHE_MAX_ENTRIES + 1 - 10);
        assert!(
            cache
                .get(&format!("shape {} about {}", word(0), word(7)))
                .is_none(),
            "oldest entry must be evicted"
        );
        assert!(cache
            .get(&format!(
                "shape {} about {}",
                word(CACHE_MAX_ENTRIES),
                word(CACHE_MAX_ENTRIES + 7)
            ))
            .is_some());
    }

    fn word(i: usize) -> String {
        // Deterministic distinct words without digits.
        let letters = ['a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j'];
        format!(
            "{}{}{}",
            letters[i % 10],
            letters[(i / 10) % 10],
            letters[(i / 100) % 10]
        )
    }
}
