use async_trait::async_trait;
use std::collections::HashSet;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SemanticError {
    #[error("Similarity backend unavailable: {0}")]
    Unavailable(String),

    #[error("Similarity backend returned an invalid score: {0}")]
    InvalidScore(f64),
}

/// Injected semantic-similarity collaborator.
///
/// Given two (already normalized) labels, return a similarity in `[0, 1]`.
/// Calls may be slow; the cascade bounds their concurrency and duration and
/// treats errors as "no match" for the pair.
#[async_trait]
pub trait SemanticSimilarity: Send + Sync {
    async fn similarity(&self, text1: &str, text2: &str) -> Result<f64, SemanticError>;
}

/// Adapter for a plain `(text, text) -> score` function
pub struct FnSimilarity<F>(pub F);

#[async_trait]
impl<F> SemanticSimilarity for FnSimilarity<F>
where
    F: Fn(&str, &str) -> f64 + Send + Sync,
{
    async fn similarity(&self, text1: &str, text2: &str) -> Result<f64, SemanticError> {
        let score = (self.0)(text1, text2);
        if (0.0..=1.0).contains(&score) {
            Ok(score)
        } else {
            Err(SemanticError::InvalidScore(score))
        }
    }
}

/// Token-set Jaccard similarity.
///
/// A dependency-free stand-in for an embedding model, good enough to catch
/// reordered or partially overlapping labels ("assembly of pcb" / "pcb assembly").
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenOverlapSimilarity;

#[async_trait]
impl SemanticSimilarity for TokenOverlapSimilarity {
    async fn similarity(&self, text1: &str, text2: &str) -> Result<f64, SemanticError> {
        Ok(token_jaccard(text1, text2))
    }
}

/// |A ∩ B| / |A ∪ B| over whitespace-separated lower-cased tokens; 0.0 if both are empty
#[must_use]
pub fn token_jaccard(text1: &str, text2: &str) -> f64 {
    let tokens = |text: &str| -> HashSet<String> {
        text.split_whitespace().map(str::to_lowercase).collect()
    };
    let a = tokens(text1);
    let b = tokens(text2);

    let union = a.union(&b).count();
    if union == 0 {
        return 0.0;
    }
    crate::utils::count_to_f64(a.intersection(&b).count()) / crate::utils::count_to_f64(union)
}
