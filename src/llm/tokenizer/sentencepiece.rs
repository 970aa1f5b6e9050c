use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::error::Error;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

use super::proto::ProtoReader;
use super::Tokenizer;
use crate::llm::error::InferenceError;

/// Marker SentencePiece uses in place of spaces
const SPACE: char = '\u{2581}';

/// Piece categories from `sentencepiece_model.proto`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PieceType {
    Normal,
    Unknown,
    Control,
    UserDefined,
    Unused,
    Byte,
}

impl PieceType {
    fn from_proto(value: u64) -> Result<Self, InferenceError> {
        match value {
            1 => Ok(PieceType::Normal),
            2 => Ok(PieceType::Unknown),
            3 => Ok(PieceType::Control),
            4 => Ok(PieceType::UserDefined),
            5 => Ok(PieceType::Unused),
            6 => Ok(PieceType::Byte),
            other => Err(InferenceError::Tokenizer(format!("unknown piece type {}", other))),
        }
    }
}

#[derive(Debug, Clone)]
struct Piece {
    text: String,
    score: f32,
    kind: PieceType,
}

/// A run of the normalized text; empty once merged into its left neighbour
#[derive(Debug, Clone, Copy)]
struct Symbol {
    start: usize,
    end: usize,
    prev: Option<usize>,
    next: Option<usize>,
}

impl Symbol {
    fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// A mergeable adjacent pair, ordered by score then by position
#[derive(Debug, PartialEq)]
struct Candidate {
    score: f32,
    left: usize,
    right: usize,
    /// Byte length of the merged text when scored
    len: usize,
}

impl Eq for Candidate {}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score.total_cmp(&other.score).then_with(|| other.left.cmp(&self.left))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Special ids and switches read from the trainer and normalizer specs
struct Specials {
    unk_id: i32,
    bos_id: i32,
    eos_id: i32,
    pad_id: i32,
    byte_fallback: bool,
    add_dummy_prefix: bool,
}

impl Default for Specials {
    fn default() -> Self {
        Self {
            unk_id: 0,
            bos_id: 1,
            eos_id: 2,
            pad_id: -1,
            byte_fallback: false,
            add_dummy_prefix: true,
        }
    }
}

/// BPE tokenizer backed by a SentencePiece `tokenizer.model` file.
pub struct SentencePieceTokenizer {
    pieces: Vec<Piece>,
    /// Pieces that may be produced from raw text
    index: HashMap<String, u32>,
    byte_ids: [Option<u32>; 256],
    unk_id: u32,
    bos_id: u32,
    eos_id: u32,
    pad_id: Option<u32>,
    byte_fallback: bool,
    add_dummy_prefix: bool,
}

impl SentencePieceTokenizer {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let path = path.as_ref();
        let bytes = fs::read(path)?;
        let tokenizer = Self::from_bytes(&bytes)?;
        info!(
            "Loaded SentencePiece model from {} ({} pieces, bos {}, eos {})",
            path.display(),
            tokenizer.n_words(),
            tokenizer.bos_id,
            tokenizer.eos_id
        );
        Ok(tokenizer)
    }

    /// Decodes a serialized `ModelProto`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, InferenceError> {
        let mut pieces = Vec::new();
        let mut specials = Specials::default();

        let mut reader = ProtoReader::new(bytes);
        while let Some((field, value)) = reader.next_field()? {
            match field {
                1 => pieces.push(parse_piece(value.as_bytes()?)?),
                2 => parse_trainer_spec(value.as_bytes()?, &mut specials)?,
                3 => parse_normalizer_spec(value.as_bytes()?, &mut specials)?,
                _ => {}
            }
        }

        if pieces.is_empty() {
            return Err(InferenceError::Tokenizer("model contains no pieces".to_string()));
        }

        let n = pieces.len();
        let required = |name: &str, id: i32| -> Result<u32, InferenceError> {
            if id < 0 || id as usize >= n {
                return Err(InferenceError::Tokenizer(format!(
                    "{} id {} outside vocabulary of {} pieces",
                    name, id, n
                )));
            }
            Ok(id as u32)
        };
        let unk_id = required("unk", specials.unk_id)?;
        let bos_id = required("bos", specials.bos_id)?;
        let eos_id = required("eos", specials.eos_id)?;
        let pad_id = if specials.pad_id < 0 { None } else { Some(required("pad", specials.pad_id)?) };

        let mut index = HashMap::with_capacity(n);
        let mut byte_ids = [None; 256];
        for (id, piece) in pieces.iter().enumerate() {
            match piece.kind {
                PieceType::Normal | PieceType::UserDefined => {
                    index.entry(piece.text.clone()).or_insert(id as u32);
                }
                PieceType::Byte => {
                    let byte = parse_byte_piece(&piece.text).ok_or_else(|| {
                        InferenceError::Tokenizer(format!("malformed byte piece '{}'", piece.text))
                    })?;
                    byte_ids[byte as usize] = Some(id as u32);
                }
                _ => {}
            }
        }

        debug!(
            "SentencePiece specials: unk {}, pad {:?}, byte_fallback {}, add_dummy_prefix {}",
            unk_id, pad_id, specials.byte_fallback, specials.add_dummy_prefix
        );

        Ok(Self {
            pieces,
            index,
            byte_ids,
            unk_id,
            bos_id,
            eos_id,
            pad_id,
            byte_fallback: specials.byte_fallback,
            add_dummy_prefix: specials.add_dummy_prefix,
        })
    }

    pub fn unk_id(&self) -> u32 {
        self.unk_id
    }

    pub fn piece(&self, id: u32) -> Option<&str> {
        self.pieces.get(id as usize).map(|p| p.text.as_str())
    }

    fn score(&self, text: &str) -> Option<f32> {
        self.index.get(text).map(|&id| self.pieces[id as usize].score)
    }

    fn push_candidate(&self, text: &str, symbols: &[Symbol], left: usize, right: usize, queue: &mut BinaryHeap<Candidate>) {
        let span = &text[symbols[left].start..symbols[right].end];
        if let Some(score) = self.score(span) {
            queue.push(Candidate { score, left, right, len: span.len() });
        }
    }

    /// Greedily merges the adjacent pair whose union has the highest score,
    /// leftmost first on ties. Returns the surviving pieces of `text` in order.
    fn merge<'t>(&self, text: &'t str) -> Vec<&'t str> {
        let mut symbols: Vec<Symbol> = text
            .char_indices()
            .enumerate()
            .map(|(i, (start, c))| Symbol { start, end: start + c.len_utf8(), prev: i.checked_sub(1), next: None })
            .collect();
        let n = symbols.len();
        for i in 1..n {
            symbols[i - 1].next = Some(i);
        }

        let mut queue = BinaryHeap::new();
        for i in 1..n {
            self.push_candidate(text, &symbols, i - 1, i, &mut queue);
        }

        while let Some(best) = queue.pop() {
            let (left, right) = (symbols[best.left], symbols[best.right]);
            // Either side merged since this pair was scored
            if left.is_empty() || right.is_empty() || left.next != Some(best.right) || right.end - left.start != best.len {
                continue;
            }
            symbols[best.left].end = right.end;
            symbols[best.left].next = right.next;
            symbols[best.right].end = right.start;
            if let Some(next) = right.next {
                symbols[next].prev = Some(best.left);
                self.push_candidate(text, &symbols, best.left, next, &mut queue);
            }
            if let Some(prev) = left.prev {
                self.push_candidate(text, &symbols, prev, best.left, &mut queue);
            }
        }

        let mut pieces = Vec::new();
        let mut cursor = if n > 0 { Some(0) } else { None };
        while let Some(i) = cursor {
            pieces.push(&text[symbols[i].start..symbols[i].end]);
            cursor = symbols[i].next;
        }
        pieces
    }

    fn push_symbol(&self, symbol: &str, out: &mut Vec<u32>) {
        if let Some(&id) = self.index.get(symbol) {
            out.push(id);
            return;
        }
        if self.byte_fallback {
            for byte in symbol.bytes() {
                out.push(self.byte_ids[byte as usize].unwrap_or(self.unk_id));
            }
        } else {
            out.push(self.unk_id);
        }
    }
}

impl Tokenizer for SentencePieceTokenizer {
    fn n_words(&self) -> usize {
        self.pieces.len()
    }

    fn bos_id(&self) -> u32 {
        self.bos_id
    }

    fn eos_id(&self) -> u32 {
        self.eos_id
    }

    fn pad_id(&self) -> Option<u32> {
        self.pad_id
    }

    fn encode(&self, text: &str, bos: bool, eos: bool) -> Result<Vec<u32>, Box<dyn Error + Send + Sync>> {
        let mut tokens = Vec::new();
        if bos {
            tokens.push(self.bos_id);
        }

        if !text.is_empty() {
            let mut normalized = String::with_capacity(text.len() + 3);
            if self.add_dummy_prefix {
                normalized.push(SPACE);
            }
            normalized.extend(text.chars().map(|c| if c == ' ' { SPACE } else { c }));

            for piece in self.merge(&normalized) {
                self.push_symbol(piece, &mut tokens);
            }
        }

        if eos {
            tokens.push(self.eos_id);
        }
        Ok(tokens)
    }

    fn decode(&self, tokens: &[u32]) -> Result<String, Box<dyn Error + Send + Sync>> {
        let mut text = String::new();
        let mut pending: Vec<u8> = Vec::new();

        for &id in tokens {
            let piece = self.pieces.get(id as usize).ok_or_else(|| {
                InferenceError::Tokenizer(format!("token id {} outside vocabulary of {}", id, self.pieces.len()))
            })?;
            if piece.kind == PieceType::Byte {
                if let Some(byte) = parse_byte_piece(&piece.text) {
                    pending.push(byte);
                }
                continue;
            }
            if !pending.is_empty() {
                text.push_str(&String::from_utf8_lossy(&pending));
                pending.clear();
            }
            match piece.kind {
                PieceType::Control | PieceType::Unused => {}
                PieceType::Unknown => text.push_str(" \u{2047} "),
                _ => text.extend(piece.text.chars().map(|c| if c == SPACE { ' ' } else { c })),
            }
        }
        if !pending.is_empty() {
            text.push_str(&String::from_utf8_lossy(&pending));
        }

        if self.add_dummy_prefix && text.starts_with(' ') {
            text.remove(0);
        }
        Ok(text)
    }
}

fn parse_piece(bytes: &[u8]) -> Result<Piece, InferenceError> {
    let mut piece = Piece { text: String::new(), score: 0.0, kind: PieceType::Normal };
    let mut reader = ProtoReader::new(bytes);
    while let Some((field, value)) = reader.next_field()? {
        match field {
            1 => {
                piece.text = String::from_utf8(value.as_bytes()?.to_vec())
                    .map_err(|e| InferenceError::Tokenizer(format!("piece is not UTF-8: {}", e)))?
            }
            2 => piece.score = value.as_f32()?,
            3 => piece.kind = PieceType::from_proto(value.as_varint()?)?,
            _ => {}
        }
    }
    Ok(piece)
}

fn parse_trainer_spec(bytes: &[u8], specials: &mut Specials) -> Result<(), InferenceError> {
    let mut reader = ProtoReader::new(bytes);
    while let Some((field, value)) = reader.next_field()? {
        match field {
            3 => {
                // model_type: 1 = UNIGRAM, 2 = BPE
                let model_type = value.as_varint()?;
                if model_type != 2 {
                    debug!("SentencePiece model type {} decoded with BPE merging", model_type);
                }
            }
            35 => specials.byte_fallback = value.as_varint()? != 0,
            40 => specials.unk_id = value.as_i32()?,
            41 => specials.bos_id = value.as_i32()?,
            42 => specials.eos_id = value.as_i32()?,
            43 => specials.pad_id = value.as_i32()?,
            _ => {}
        }
    }
    Ok(())
}

fn parse_normalizer_spec(bytes: &[u8], specials: &mut Specials) -> Result<(), InferenceError> {
    let mut reader = ProtoReader::new(bytes);
    while let Some((field, value)) = reader.next_field()? {
        if field == 3 {
            specials.add_dummy_prefix = value.as_varint()? != 0;
        }
    }
    Ok(())
}

/// Parses `<0xAB>` into its byte value
fn parse_byte_piece(text: &str) -> Option<u8> {
    let hex = text.strip_prefix("<0x")?.strip_suffix('>')?;
    u8::from_str_radix(hex, 16).ok()
}

/// Builders for serialized tokenizer models used across the crate's tests.
#[cfg(test)]
pub(crate) mod fixtures {
    use crate::llm::tokenizer::proto::ProtoWriter;

    pub const NORMAL: u64 = 1;
    pub const UNKNOWN: u64 = 2;
    pub const CONTROL: u64 = 3;
    pub const BYTE: u64 = 6;

    /// Serializes a `ModelProto` with the given pieces and default special ids.
    pub fn model_bytes(pieces: &[(&str, f32, u64)], byte_fallback: bool) -> Vec<u8> {
        let mut model = ProtoWriter::default();
        for (text, score, kind) in pieces {
            let mut piece = ProtoWriter::default();
            piece.bytes(1, text.as_bytes()).float(2, *score).varint(3, *kind);
            model.bytes(1, &piece.buf);
        }

        let mut trainer = ProtoWriter::default();
        trainer
            .varint(3, 2)
            .varint(35, byte_fallback as u64)
            .int32(40, 0)
            .int32(41, 1)
            .int32(42, 2)
            .int32(43, -1);
        model.bytes(2, &trainer.buf);

        let mut normalizer = ProtoWriter::default();
        normalizer.varint(3, 1);
        model.bytes(3, &normalizer.buf);
        model.buf
    }

    /// A small vocabulary that spells "hello" in one piece and falls back to bytes.
    pub fn hello_model() -> Vec<u8> {
        model_bytes(
            &[
                ("<unk>", 0.0, UNKNOWN),
                ("<s>", 0.0, CONTROL),
                ("</s>", 0.0, CONTROL),
                ("\u{2581}", 0.0, NORMAL),
                ("h", 0.0, NORMAL),
                ("e", 0.0, NORMAL),
                ("l", 0.0, NORMAL),
                ("o", 0.0, NORMAL),
                ("ll", -1.0, NORMAL),
                ("\u{2581}h", -2.0, NORMAL),
                ("\u{2581}he", -3.0, NORMAL),
                ("llo", -4.0, NORMAL),
                ("\u{2581}hello", -5.0, NORMAL),
                ("<0x21>", 0.0, BYTE),
                ("<0xC3>", 0.0, BYTE),
                ("<0xA9>", 0.0, BYTE),
            ],
            true,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    fn tokenizer() -> SentencePieceTokenizer {
        SentencePieceTokenizer::from_bytes(&hello_model()).unwrap()
    }

    #[test]
    fn test_special_ids() {
        let tok = tokenizer();
        assert_eq!(tok.n_words(), 16);
        assert_eq!(tok.unk_id(), 0);
        assert_eq!(tok.bos_id(), 1);
        assert_eq!(tok.eos_id(), 2);
        assert_eq!(tok.pad_id(), None);
    }

    #[test]
    fn test_encode_merges_by_score() {
        let tok = tokenizer();
        assert_eq!(tok.encode("hello", true, false).unwrap(), vec![1, 12]);
        assert_eq!(tok.encode("hello", false, true).unwrap(), vec![12, 2]);
        assert_eq!(tok.piece(11), Some("llo"));
    }

    #[test]
    fn test_byte_fallback() {
        let tok = tokenizer();
        let ids = tok.encode("hello é!", false, false).unwrap();
        assert_eq!(ids, vec![12, 3, 14, 15, 13]);
        assert_eq!(tok.decode(&ids).unwrap(), "hello é!");
    }

    #[test]
    fn test_unknown_without_byte_piece() {
        let tok = tokenizer();
        // 'x' has neither a piece nor a byte piece
        assert_eq!(tok.encode("x", false, false).unwrap(), vec![3, 0]);
    }

    #[test]
    fn test_decode_drops_control() {
        let tok = tokenizer();
        assert_eq!(tok.decode(&[1, 12, 2]).unwrap(), "hello");
        assert!(tok.decode(&[99]).is_err());
    }

    #[test]
    fn test_ties_merge_leftmost_first() {
        let bytes = model_bytes(
            &[
                ("<unk>", 0.0, UNKNOWN),
                ("<s>", 0.0, CONTROL),
                ("</s>", 0.0, CONTROL),
                ("a", 0.0, NORMAL),
                ("aa", -1.0, NORMAL),
            ],
            false,
        );
        let mut tok = SentencePieceTokenizer::from_bytes(&bytes).unwrap();
        tok.add_dummy_prefix = false;
        assert_eq!(tok.encode("aaa", false, false).unwrap(), vec![4, 3]);
        assert_eq!(tok.encode("aaaa", false, false).unwrap(), vec![4, 4]);
    }

    #[test]
    fn test_long_text_encodes_every_word() {
        let tok = tokenizer();
        let words = 4000;
        let text = vec!["hello"; words].join(" ");

        let ids = tok.encode(&text, false, false).unwrap();
        assert_eq!(ids.len(), words);
        assert!(ids.iter().all(|&id| id == 12));
    }

    #[test]
    fn test_empty_text() {
        let tok = tokenizer();
        assert_eq!(tok.encode("", true, false).unwrap(), vec![1]);
    }

    #[test]
    fn test_rejects_empty_model() {
        assert!(SentencePieceTokenizer::from_bytes(&[]).is_err());
    }
}
