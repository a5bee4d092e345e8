//! Token counting using tiktoken

use std::sync::Arc;
use tiktoken_rs::{cl100k_base, CoreBPE};

/// Tokenizer errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum TokenizerError {
    #[error("Encoding initialization failed: {0}")]
    Initialization(String),

    #[error("Encoding failed: {0}")]
    Encoding(String),
}

/// Token counting capability
///
/// Implementations must be deterministic for identical input within one
/// process lifetime. Errors are propagated to the caller and never read as
/// zero tokens.
pub trait Tokenizer: Send + Sync {
    /// Count the tokens in the given text
    fn count(&self, text: &str) -> Result<usize, TokenizerError>;

    /// Count tokens for multiple texts
    fn count_batch(&self, texts: &[&str]) -> Result<Vec<usize>, TokenizerError> {
        texts.iter().map(|t| self.count(t)).collect()
    }
}

/// Tiktoken-based tokenizer using cl100k_base
pub struct TiktokenTokenizer {
    bpe: Arc<CoreBPE>,
}

impl TiktokenTokenizer {
    /// Create a new tiktoken tokenizer with cl100k_base encoding
    pub fn new() -> Result<Self, TokenizerError> {
        let bpe = cl100k_base().map_err(|e| TokenizerError::Initialization(e.to_string()))?;
        Ok(Self { bpe: Arc::new(bpe) })
    }
}

impl Tokenizer for TiktokenTokenizer {
    fn count(&self, text: &str) -> Result<usize, TokenizerError> {
        Ok(self.bpe.encode_with_special_tokens(text).len())
    }
}

/// Word-based tokenizer (~1.3 tokens per word)
pub struct WordBasedTokenizer {
    tokens_per_word: f64,
}

impl WordBasedTokenizer {
    pub fn new(tokens_per_word: f64) -> Self {
        Self { tokens_per_word }
    }
}

impl Default for WordBasedTokenizer {
    fn default() -> Self {
        Self::new(1.3)
    }
}

impl Tokenizer for WordBasedTokenizer {
    fn count(&self, text: &str) -> Result<usize, TokenizerError> {
        let word_count = text.split_whitespace().count();
        Ok((word_count as f64 * self.tokens_per_word).ceil() as usize)
    }
}

/// Byte-ratio tokenizer, used when no BPE vocabulary is available
pub struct CharRatioTokenizer {
    bytes_per_token: usize,
}

impl CharRatioTokenizer {
    pub fn new(bytes_per_token: usize) -> Self {
        Self {
            bytes_per_token: bytes_per_token.max(1),
        }
    }
}

impl Default for CharRatioTokenizer {
    fn default() -> Self {
        Self::new(4)
    }
}

impl Tokenizer for CharRatioTokenizer {
    fn count(&self, text: &str) -> Result<usize, TokenizerError> {
        Ok(text.len() / self.bytes_per_token)
    }
}

/// Longest char-prefix of `text` whose token count fits in `budget`
///
/// Binary search over char boundaries; the tokenizer is called O(log n) times.
pub fn fit_to_budget(
    text: &str,
    budget: usize,
    tokenizer: &dyn Tokenizer,
) -> Result<String, TokenizerError> {
    if tokenizer.count(text)? <= budget {
        return Ok(text.to_string());
    }

    let boundaries: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();

    // boundaries[lo] always fits (the empty prefix counts as zero for any sane
    // tokenizer); boundaries[hi] never fits
    let mut lo = 0;
    let mut hi = boundaries.len() - 1;
    while hi - lo > 1 {
        let mid = lo + (hi - lo) / 2;
        if tokenizer.count(&text[..boundaries[mid]])? <= budget {
            lo = mid;
        } else {
            hi = mid;
        }
    }

    Ok(text[..boundaries[lo]].to_string())
}
