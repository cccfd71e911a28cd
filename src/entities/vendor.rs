// 🏪 Vendor Entity - Shared vendor names + fuzzy matching
//
// "Lulu Hypermarket", "LULU HYPERMARKET W.L.L" and "The Lulu Hypermarket"
// should all land on the same vendor row. Matching is two-staged:
// - token-sort similarity above `direct_threshold` → same vendor
// - similarity inside the verify band → ask the categorizer, cache the answer

use crate::categorize::Categorizer;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::{debug, warn};

// ============================================================================
// VENDOR ENTITY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vendor {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl Vendor {
    pub fn new(name: &str) -> Self {
        Vendor {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.trim().to_string(),
            created_at: Utc::now(),
        }
    }
}

// ============================================================================
// VENDOR MATCHER
// ============================================================================

pub struct VendorMatcher {
    /// Similarity strictly above this is an automatic match (default: 85)
    pub direct_threshold: u8,

    /// Similarity at or above this (up to `direct_threshold`) needs verification (default: 70)
    pub verify_threshold: u8,

    /// Verification answers keyed by (candidate, existing)
    verified: RwLock<HashMap<(String, String), bool>>,
}

impl VendorMatcher {
    pub fn new() -> Self {
        VendorMatcher {
            direct_threshold: 85,
            verify_threshold: 70,
            verified: RwLock::new(HashMap::new()),
        }
    }

    /// Find the existing vendor that `name` refers to, if any.
    pub async fn find_match(
        &self,
        name: &str,
        existing: &[Vendor],
        verifier: &dyn Categorizer,
    ) -> Option<Vendor> {
        let normalized = normalize_vendor_name(name);
        if normalized.is_empty() {
            return None;
        }

        let mut scored: Vec<(u8, &Vendor)> = existing
            .iter()
            .map(|vendor| (token_sort_ratio(&normalized, &normalize_vendor_name(&vendor.name)), vendor))
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));

        for (ratio, vendor) in &scored {
            if *ratio > self.direct_threshold {
                debug!(candidate = name, vendor = %vendor.name, ratio, "Direct vendor match");
                return Some((*vendor).clone());
            }

            if *ratio < self.verify_threshold {
                break;
            }

            if self.verify(name, &vendor.name, verifier).await {
                debug!(candidate = name, vendor = %vendor.name, ratio, "Verified vendor match");
                return Some((*vendor).clone());
            }
        }

        None
    }

    async fn verify(&self, candidate: &str, existing: &str, verifier: &dyn Categorizer) -> bool {
        let key = (candidate.to_string(), existing.to_string());

        if let Some(answer) = self
            .verified
            .read()
            .ok()
            .and_then(|cache| cache.get(&key).copied())
        {
            return answer;
        }

        let answer = match verifier.same_vendor(candidate, existing).await {
            Ok(answer) => answer,
            Err(e) => {
                warn!(candidate, existing, error = %e, "Vendor verification failed");
                false
            }
        };

        if let Ok(mut cache) = self.verified.write() {
            cache.insert(key, answer);
        }

        answer
    }

    /// Number of cached verification answers
    pub fn cached_answers(&self) -> usize {
        self.verified.read().map(|cache| cache.len()).unwrap_or(0)
    }
}

impl Default for VendorMatcher {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

const STOP_WORDS: [&str; 7] = ["the", "and", "or", "ltd", "limited", "inc", "incorporated"];

/// Normalize a vendor name for comparison
///
/// - Lowercase
/// - Strip punctuation
/// - Drop stop words (the, and, ltd, inc, ...)
pub fn normalize_vendor_name(name: &str) -> String {
    let cleaned: String = name
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || *c == '_')
        .collect();

    cleaned
        .split_whitespace()
        .filter(|word| !STOP_WORDS.contains(word))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Similarity of two names in 0..=100 after sorting their tokens
///
/// Example:
/// - token_sort_ratio("coffee starbucks", "starbucks coffee") = 100
/// - token_sort_ratio("alpha store", "alpha shop") = 76
pub fn token_sort_ratio(a: &str, b: &str) -> u8 {
    let a = sorted_tokens(a);
    let b = sorted_tokens(b);

    if a.is_empty() || b.is_empty() {
        return 0;
    }

    let total = a.chars().count() + b.chars().count();

    let common = longest_common_subsequence(&a, &b);
    ((200 * common) as f64 / total as f64).round() as u8
}

fn sorted_tokens(s: &str) -> String {
    let lowered = s.to_lowercase();
    let mut tokens: Vec<&str> = lowered.split_whitespace().collect();
    tokens.sort_unstable();
    tokens.join(" ")
}

/// Length of the longest common subsequence (character based)
fn longest_common_subsequence(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    if a.is_empty() || b.is_empty() {
        return 0;
    }

    let mut previous = vec![0usize; b.len() + 1];
    let mut current = vec![0usize; b.len() + 1];

    for ca in &a {
        for (j, cb) in b.iter().enumerate() {
            current[j + 1] = if ca == cb {
                previous[j] + 1
            } else {
                current[j].max(previous[j + 1])
            };
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[b.len()]
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::categorize::{CategorizationOutcome, CategorizationRequest, CategorizeError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Verifier that always answers the same and counts calls
    struct FixedVerifier {
        answer: bool,
        calls: AtomicUsize,
    }

    impl FixedVerifier {
        fn new(answer: bool) -> Self {
            FixedVerifier {
                answer,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Categorizer for FixedVerifier {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn categorize(
            &self,
            _request: &CategorizationRequest,
        ) -> Result<CategorizationOutcome, CategorizeError> {
            Err(CategorizeError::Format("not used".to_string()))
        }

        async fn same_vendor(&self, _candidate: &str, _existing: &str) -> Result<bool, CategorizeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.answer)
        }
    }

    #[test]
    fn test_normalize_strips_punctuation_and_stop_words() {
        assert_eq!(normalize_vendor_name("The Starbucks Coffee, Ltd."), "starbucks coffee");
        assert_eq!(normalize_vendor_name("  LULU   Hypermarket "), "lulu hypermarket");
        assert_eq!(normalize_vendor_name("Marks & Spencer"), "marks spencer");
    }

    #[test]
    fn test_token_sort_ratio() {
        assert_eq!(token_sort_ratio("coffee starbucks", "starbucks coffee"), 100);
        assert_eq!(token_sort_ratio("alpha store", "alpha shop"), 76);
        assert_eq!(token_sort_ratio("", ""), 0);
        assert_eq!(token_sort_ratio("abc", ""), 0);
        assert!(token_sort_ratio("carrefour", "amazon") < 50);
    }

    #[tokio::test]
    async fn test_direct_match_skips_verification() {
        let matcher = VendorMatcher::new();
        let verifier = FixedVerifier::new(false);
        let existing = vec![Vendor::new("Lulu Markets"), Vendor::new("Carrefour")];

        let found = matcher.find_match("LULU MARKET", &existing, &verifier).await;

        assert_eq!(found.map(|v| v.name), Some("Lulu Markets".to_string()));
        assert_eq!(verifier.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_ambiguous_match_is_verified_and_cached() {
        let matcher = VendorMatcher::new();
        let verifier = FixedVerifier::new(true);
        let existing = vec![Vendor::new("Alpha Shop")];

        let first = matcher.find_match("Alpha Store", &existing, &verifier).await;
        let second = matcher.find_match("Alpha Store", &existing, &verifier).await;

        assert!(first.is_some());
        assert!(second.is_some());
        assert_eq!(verifier.calls.load(Ordering::SeqCst), 1);
        assert_eq!(matcher.cached_answers(), 1);
    }

    #[tokio::test]
    async fn test_rejected_verification_creates_new_vendor() {
        let matcher = VendorMatcher::new();
        let verifier = FixedVerifier::new(false);
        let existing = vec![Vendor::new("Alpha Shop")];

        let found = matcher.find_match("Alpha Store", &existing, &verifier).await;

        assert!(found.is_none());
        assert_eq!(verifier.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stop_word_only_names_never_match() {
        let matcher = VendorMatcher::new();
        let verifier = FixedVerifier::new(true);
        let existing = vec![Vendor::new("Inc."), Vendor::new("Ltd")];

        let found = matcher.find_match("The Ltd", &existing, &verifier).await;
        assert!(found.is_none());

        // An empty existing name never matches a real one either
        let found = matcher.find_match("Alpha Shop", &existing, &verifier).await;
        assert!(found.is_none());
        assert_eq!(verifier.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_dissimilar_names_never_verified() {
        let matcher = VendorMatcher::new();
        let verifier = FixedVerifier::new(true);
        let existing = vec![Vendor::new("Carrefour")];

        let found = matcher.find_match("Batelco", &existing, &verifier).await;

        assert!(found.is_none());
        assert_eq!(verifier.calls.load(Ordering::SeqCst), 0);
    }
}
