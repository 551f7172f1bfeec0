use crate::error::Result;

/// Trait for tokenizers used by the runner
///
/// Converts prompt text into the token ids a backend consumes and turns its
/// output ids back into text.
pub trait Tokenizer: Send + Sync {
    /// Encode text to token IDs
    fn tokenize(&self, text: &str) -> Result<Vec<u32>>;

    /// Decode token IDs to text
    fn detokenize(&self, ids: &[u32]) -> Result<String>;
}

/// UTF-8 byte tokenizer
///
/// Every byte of the input is one token id in `0..=255`. Decoding is lossy:
/// ids above 255 and invalid UTF-8 sequences render as U+FFFD.
#[derive(Debug, Clone, Copy, Default)]
pub struct ByteTokenizer;

impl ByteTokenizer {
    pub fn new() -> Self {
        Self
    }
}

impl Tokenizer for ByteTokenizer {
    fn tokenize(&self, text: &str) -> Result<Vec<u32>> {
        Ok(text.bytes().map(u32::from).collect())
    }

    fn detokenize(&self, ids: &[u32]) -> Result<String> {
        let mut text = String::with_capacity(ids.len());
        let mut pending = Vec::new();

        for &id in ids {
            match u8::try_from(id) {
                Ok(byte) => pending.push(byte),
                Err(_) => {
                    text.push_str(&String::from_utf8_lossy(&pending));
                    pending.clear();
                    text.push(char::REPLACEMENT_CHARACTER);
                }
            }
        }
        text.push_str(&String::from_utf8_lossy(&pending));

        Ok(text)
    }
}
