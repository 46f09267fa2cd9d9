//! Text <-> token id conversion.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::error::TokenizerError;

/// Paragraph break; generation stops after a fragment equal to this.
pub const PARAGRAPH_BREAK: &str = "\n\n";

/// Converts between text and token ids over a fixed vocabulary.
pub trait Tokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>, TokenizerError>;
    fn decode(&self, ids: &[u32]) -> Result<String, TokenizerError>;
    fn vocab_size(&self) -> usize;
}

impl<T: Tokenizer + ?Sized> Tokenizer for &T {
    fn encode(&self, text: &str) -> Result<Vec<u32>, TokenizerError> {
        (**self).encode(text)
    }
    fn decode(&self, ids: &[u32]) -> Result<String, TokenizerError> {
        (**self).decode(ids)
    }
    fn vocab_size(&self) -> usize {
        (**self).vocab_size()
    }
}

impl<T: Tokenizer + ?Sized> Tokenizer for Arc<T> {
    fn encode(&self, text: &str) -> Result<Vec<u32>, TokenizerError> {
        (**self).encode(text)
    }
    fn decode(&self, ids: &[u32]) -> Result<String, TokenizerError> {
        (**self).decode(ids)
    }
    fn vocab_size(&self) -> usize {
        (**self).vocab_size()
    }
}

/// Greedy longest-match tokenizer backed by a list of string pieces.
///
/// Decoding concatenates pieces, so decoding tokens one at a time and joining
/// the fragments gives the same text as decoding them all at once.
#[derive(Debug, Clone)]
pub struct VocabTokenizer {
    vocab: HashMap<String, u32>,
    inv_vocab: Vec<String>,
    max_piece_len: usize,
}

impl VocabTokenizer {
    /// Build a tokenizer from a list of pieces. Piece `i` gets id `i`.
    pub fn new(pieces: Vec<String>) -> Result<Self, TokenizerError> {
        if pieces.is_empty() {
            return Err(TokenizerError::InvalidVocabulary("no pieces".into()));
        }
        if pieces.len() > u32::MAX as usize {
            return Err(TokenizerError::InvalidVocabulary(format!(
                "{} pieces do not fit in u32 ids",
                pieces.len()
            )));
        }
        let mut vocab = HashMap::with_capacity(pieces.len());
        let mut max_piece_len = 0;
        for (i, piece) in pieces.iter().enumerate() {
            if piece.is_empty() {
                return Err(TokenizerError::InvalidVocabulary(format!(
                    "piece {i} is empty"
                )));
            }
            if vocab.insert(piece.clone(), i as u32).is_some() {
                return Err(TokenizerError::InvalidVocabulary(format!(
                    "duplicate piece {piece:?}"
                )));
            }
            max_piece_len = max_piece_len.max(piece.len());
        }
        Ok(Self {
            vocab,
            inv_vocab: pieces,
            max_piece_len,
        })
    }

    /// Printable ASCII, tab, newline and the paragraph break.
    pub fn ascii() -> Self {
        let mut pieces: Vec<String> = (0x20u8..=0x7e).map(|b| (b as char).to_string()).collect();
        pieces.push("\t".into());
        pieces.push("\n".into());
        pieces.push(PARAGRAPH_BREAK.into());
        Self::new(pieces).expect("ASCII vocabulary is valid")
    }

    /// Load pieces from a JSON array of strings.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, TokenizerError> {
        let json = std::fs::read_to_string(path)?;
        let pieces: Vec<String> = serde_json::from_str(&json)?;
        Self::new(pieces)
    }

    pub fn pieces(&self) -> &[String] {
        &self.inv_vocab
    }

    pub fn id_of(&self, piece: &str) -> Option<u32> {
        self.vocab.get(piece).copied()
    }

    pub fn contains(&self, piece: &str) -> bool {
        self.vocab.contains_key(piece)
    }
}

impl Tokenizer for VocabTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>, TokenizerError> {
        let mut ids = Vec::new();
        let mut offset = 0;
        while offset < text.len() {
            let rest = &text[offset..];
            let mut end = rest.len().min(self.max_piece_len);
            let matched = loop {
                while !rest.is_char_boundary(end) {
                    end -= 1;
                }
                if end == 0 {
                    break None;
                }
                if let Some(&id) = self.vocab.get(&rest[..end]) {
                    break Some((id, end));
                }
                end -= 1;
            };
            match matched {
                Some((id, len)) => {
                    ids.push(id);
                    offset += len;
                }
                None => {
                    let ch = rest.chars().next().unwrap_or_default();
                    return Err(TokenizerError::Unencodable { offset, ch });
                }
            }
        }
        Ok(ids)
    }

    fn decode(&self, ids: &[u32]) -> Result<String, TokenizerError> {
        let mut out = String::new();
        for &id in ids {
            let piece = self
                .inv_vocab
                .get(id as usize)
                .ok_or(TokenizerError::UnknownId {
                    id,
                    vocab_size: self.inv_vocab.len(),
                })?;
            out.push_str(piece);
        }
        Ok(out)
    }

    fn vocab_size(&self) -> usize {
        self.inv_vocab.len()
    }
}
