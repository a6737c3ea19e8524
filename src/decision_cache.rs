use std::collections::HashMap;
use std::sync::Mutex;

use crate::{Decision, normalize_whitespace};

#[derive(Debug, Clone)]
struct CacheEntry {
    inserted_at: i64,
    value: Decision,
}

/// In-memory planner memo. Entries older than the TTL are evicted when read.
pub(crate) struct DecisionCache {
    ttl_secs: i64,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

/// Inputs that identify one planning call.
#[derive(Debug, Clone, Copy)]
pub(crate) struct DecisionKey<'a> {
    pub(crate) prompt: &'a str,
    pub(crate) catalog: &'a str,
    pub(crate) tools: &'a str,
    pub(crate) provider: &'a str,
    pub(crate) model: &'a str,
    pub(crate) base_url: &'a str,
}

impl DecisionKey<'_> {
    /// blake3 over whitespace-normalised text and case-folded provider fields.
    pub(crate) fn digest(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for part in [self.prompt, self.catalog, self.tools] {
            hasher.update(normalize_whitespace(part).as_bytes());
            hasher.update(&[0x1f]);
        }
        for part in [self.provider, self.model, self.base_url] {
            let folded = part.trim().to_ascii_lowercase();
            hasher.update(folded.trim_end_matches('/').as_bytes());
            hasher.update(&[0x1f]);
        }
        hasher.finalize().to_hex().to_string()
    }
}

impl DecisionCache {
    pub(crate) fn new(ttl_secs: u64) -> Self {
        Self {
            ttl_secs: ttl_secs.min(i64::MAX as u64) as i64,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn get(&self, key: &str, now: i64) -> Option<Decision> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let entry = entries.get(key)?;
        if now - entry.inserted_at > self.ttl_secs {
            entries.remove(key);
            tracing::debug!(key, "decision cache expired");
            return None;
        }
        tracing::debug!(key, "decision cache hit");
        Some(entry.value.clone())
    }

    pub(crate) fn set(&self, key: &str, value: Decision, now: i64) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            key.to_string(),
            CacheEntry {
                inserted_at: now,
                value,
            },
        );
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Action;

    fn key<'a>(prompt: &'a str, provider: &'a str, base_url: &'a str) -> DecisionKey<'a> {
        DecisionKey {
            prompt,
            catalog: "## net\n- net_ping",
            tools: "search",
            provider,
            model: "llama3.1",
            base_url,
        }
    }

    fn decision(answer: &str) -> Decision {
        Decision {
            action: Action::Answer,
            answer: answer.to_string(),
            ..Decision::default()
        }
    }

    #[test]
    fn get_is_idempotent_before_expiry() {
        let cache = DecisionCache::new(600);
        cache.set("k", decision("hi"), 1_000);
        let first = cache.get("k", 1_300).unwrap();
        let second = cache.get("k", 1_600).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.answer, "hi");
    }

    #[test]
    fn expired_entries_are_evicted_on_read() {
        let cache = DecisionCache::new(600);
        cache.set("k", decision("hi"), 1_000);
        assert!(cache.get("k", 1_601).is_none());
        assert_eq!(cache.len(), 0);
        assert!(cache.get("k", 1_000).is_none());
    }

    #[test]
    fn cosmetic_differences_collide() {
        let a = key("list   my\nfiles", "Ollama ", "http://localhost:11434/").digest();
        let b = key("list my files", "ollama", "HTTP://LOCALHOST:11434").digest();
        assert_eq!(a, b);
        let c = key("list my files", "openai", "http://localhost:11434").digest();
        assert_ne!(a, c);
    }
}
