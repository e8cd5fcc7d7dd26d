//! Tokenizer capability
//!
//! The harness only needs one probe sentence encoded into ids and an
//! attention mask. Pretrained runs use the real tokenizer file; config-only
//! runs have no tokenizer file to load, so a deterministic byte-level
//! fallback stands in.

use parigate_types::{ParigateError, Result};
use std::path::Path;

/// One encoded probe: ids and attention mask, same length
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedProbe {
    pub input_ids: Vec<u32>,
    pub attention_mask: Vec<u32>,
}

/// Capability: turn a probe text into model inputs
pub trait TextTokenizer: Send + Sync {
    fn encode(&self, text: &str) -> Result<EncodedProbe>;

    /// Token id used to right-pad the sequence dimension
    fn pad_token_id(&self) -> u32;
}

/// Tokenizer backed by a `tokenizer.json` file
pub struct HfTokenizer {
    inner: tokenizers::Tokenizer,
    pad_token_id: u32,
}

impl HfTokenizer {
    pub fn from_file(path: &Path, pad_token_id: u32) -> Result<Self> {
        let inner = tokenizers::Tokenizer::from_file(path).map_err(|e| {
            ParigateError::tokenizer(format!("load {} failed: {}", path.display(), e))
        })?;
        Ok(Self {
            inner,
            pad_token_id,
        })
    }
}

impl TextTokenizer for HfTokenizer {
    fn encode(&self, text: &str) -> Result<EncodedProbe> {
        let encoding = self
            .inner
            .encode(text, true)
            .map_err(|e| ParigateError::tokenizer(format!("encode failed: {}", e)))?;
        Ok(EncodedProbe {
            input_ids: encoding.get_ids().to_vec(),
            attention_mask: encoding.get_attention_mask().to_vec(),
        })
    }

    fn pad_token_id(&self) -> u32 {
        self.pad_token_id
    }
}

/// Deterministic byte-level fallback for config-only runs.
///
/// Maps each input byte into `1..vocab_size` so the pad id (0) never occurs
/// in real content.
pub struct ByteFallbackTokenizer {
    vocab_size: u32,
}

impl ByteFallbackTokenizer {
    pub fn new(vocab_size: usize) -> Result<Self> {
        if vocab_size < 2 {
            return Err(ParigateError::tokenizer(
                "byte fallback needs a vocab of at least 2",
            ));
        }
        Ok(Self {
            vocab_size: vocab_size as u32,
        })
    }
}

impl TextTokenizer for ByteFallbackTokenizer {
    fn encode(&self, text: &str) -> Result<EncodedProbe> {
        let input_ids: Vec<u32> = text
            .bytes()
            .map(|b| 1 + (b as u32) % (self.vocab_size - 1))
            .collect();
        if input_ids.is_empty() {
            return Err(ParigateError::tokenizer("probe text is empty"));
        }
        let attention_mask = vec![1; input_ids.len()];
        Ok(EncodedProbe {
            input_ids,
            attention_mask,
        })
    }

    fn pad_token_id(&self) -> u32 {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_fallback_is_deterministic_and_avoids_pad() {
        let tok = ByteFallbackTokenizer::new(256).unwrap();
        let a = tok.encode("This is a test").unwrap();
        let b = tok.encode("This is a test").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.input_ids.len(), a.attention_mask.len());
        assert!(a.input_ids.iter().all(|&id| id != tok.pad_token_id()));
        assert!(a.input_ids.iter().all(|&id| id < 256));
        assert!(a.attention_mask.iter().all(|&m| m == 1));
    }

    #[test]
    fn byte_fallback_rejects_empty_probe() {
        let tok = ByteFallbackTokenizer::new(256).unwrap();
        assert!(tok.encode("").is_err());
    }
}
