//! Process-global phrase cache for synthesized audio.
//!
//! Read-mostly after initialization: the hot phrases are preloaded once at
//! startup and per-call lookups vastly outnumber inserts. A `RwLock` over
//! a plain map is enough; there is no eviction because the key space is
//! the small set of phrases a voice agent actually repeats.

use std::collections::HashMap;
use std::sync::RwLock;

use bytes::Bytes;

use crate::text::normalize_for_cache;

/// Cache of synthesized phrases, keyed by normalized text plus the voice
/// parameters that shaped the audio.
#[derive(Debug, Default)]
pub struct PhraseCache {
    entries: RwLock<HashMap<String, Bytes>>,
}

impl PhraseCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Deterministic cache key: the same `(text, voice, rate, sample_rate)`
    /// tuple always yields the same key.
    #[must_use]
    pub fn key(text: &str, voice: &str, speaking_rate: f32, sample_rate: u32) -> String {
        format!(
            "{voice}|{speaking_rate}|{sample_rate}|{}",
            normalize_for_cache(text)
        )
    }

    /// Look up a phrase, counting the hit or miss.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Bytes> {
        let hit = self
            .entries
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(key)
            .cloned();
        if hit.is_some() {
            metrics::counter!("voxline_tts_cache_hits_total").increment(1);
        } else {
            metrics::counter!("voxline_tts_cache_misses_total").increment(1);
        }
        hit
    }

    /// Insert synthesized audio. First write wins so repeat lookups stay
    /// byte-identical even if two calls synthesized the same phrase
    /// concurrently.
    pub fn insert(&self, key: String, audio: Bytes) {
        self.entries
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .entry(key)
            .or_insert(audio);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_deterministic_and_whitespace_insensitive() {
        let a = PhraseCache::key("Good  day!", "uk-UA-Standard-A", 1.0, 16_000);
        let b = PhraseCache::key("good day!", "uk-UA-Standard-A", 1.0, 16_000);
        assert_eq!(a, b);
    }

    #[test]
    fn key_separates_voice_parameters() {
        let a = PhraseCache::key("hello", "voice-a", 1.0, 16_000);
        let b = PhraseCache::key("hello", "voice-b", 1.0, 16_000);
        let c = PhraseCache::key("hello", "voice-a", 1.25, 16_000);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn repeat_lookups_are_byte_identical() {
        let cache = PhraseCache::new();
        let key = PhraseCache::key("hello", "v", 1.0, 16_000);
        cache.insert(key.clone(), Bytes::from_static(b"\x01\x02\x03"));

        let first = cache.get(&key).unwrap();
        let second = cache.get(&key).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn first_insert_wins_on_races() {
        let cache = PhraseCache::new();
        let key = PhraseCache::key("hello", "v", 1.0, 16_000);
        cache.insert(key.clone(), Bytes::from_static(b"first"));
        cache.insert(key.clone(), Bytes::from_static(b"second"));
        assert_eq!(cache.get(&key).unwrap(), Bytes::from_static(b"first"));
    }

    #[test]
    fn miss_returns_none() {
        let cache = PhraseCache::new();
        assert!(cache.get("absent").is_none());
        assert!(cache.is_empty());
    }
}
