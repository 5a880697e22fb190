//! Code → word dictionary.
//!
//! An ordered multimap from input codes to the words they can produce.
//! Lookup is exact-match over a full code; the decoder enumerates the
//! substrings it wants resolved. Entries are immutable once loaded and
//! outlive every lattice that references them.

mod entry;

pub use entry::Word;

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum DictError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub struct Dictionary {
    data: BTreeMap<String, Vec<Word>>,
    /// Entries with a longer code are dropped on load.
    code_len_limit: usize,
    /// Entries with a longer text are dropped on load.
    text_len_limit: usize,
    max_code_len: usize,
    max_text_len: usize,
}

impl Default for Dictionary {
    fn default() -> Self {
        Self::new()
    }
}

impl Dictionary {
    pub fn new() -> Self {
        Self::with_limits(usize::MAX, usize::MAX)
    }

    pub fn with_limits(code_len_limit: usize, text_len_limit: usize) -> Self {
        Self {
            data: BTreeMap::new(),
            code_len_limit,
            text_len_limit,
            max_code_len: 0,
            max_text_len: 0,
        }
    }

    pub fn open(path: &Path) -> Result<Self, DictError> {
        Self::open_with_limits(path, usize::MAX, usize::MAX)
    }

    pub fn open_with_limits(
        path: &Path,
        code_len_limit: usize,
        text_len_limit: usize,
    ) -> Result<Self, DictError> {
        let mut dict = Self::with_limits(code_len_limit, text_len_limit);
        dict.load(BufReader::new(File::open(path)?))?;
        Ok(dict)
    }

    /// Replace the contents with entries parsed from `code<TAB>text` lines.
    ///
    /// Lines missing either field are skipped; entries exceeding the length
    /// limits are dropped with a log line. Returns the number of entries
    /// loaded.
    pub fn load<R: BufRead>(&mut self, reader: R) -> Result<usize, DictError> {
        self.data.clear();
        self.max_code_len = 0;
        self.max_text_len = 0;

        let mut loaded = 0usize;
        let mut dropped = 0usize;
        for line in reader.lines() {
            let line = line?;
            let mut fields = line.split_whitespace();
            let (Some(code), Some(text)) = (fields.next(), fields.next()) else {
                continue;
            };
            if code.len() > self.code_len_limit || text.len() > self.text_len_limit {
                warn!(code, text, "dictionary entry exceeds length limits, dropped");
                dropped += 1;
                continue;
            }
            self.max_code_len = self.max_code_len.max(code.len());
            self.max_text_len = self.max_text_len.max(text.len());
            self.data
                .entry(code.to_string())
                .or_default()
                .push(Word::new(code, text));
            loaded += 1;
        }

        info!(loaded, dropped, "dictionary loaded");
        Ok(loaded)
    }

    /// Build a dictionary from `(code, text)` pairs, in order.
    pub fn from_entries<C, T>(entries: impl IntoIterator<Item = (C, T)>) -> Self
    where
        C: Into<String>,
        T: Into<String>,
    {
        let mut dict = Self::new();
        for (code, text) in entries {
            let word = Word::new(code, text);
            dict.max_code_len = dict.max_code_len.max(word.code.len());
            dict.max_text_len = dict.max_text_len.max(word.text.len());
            dict.data.entry(word.code.clone()).or_default().push(word);
        }
        dict
    }

    /// All entries whose code equals `code` exactly.
    pub fn find(&self, code: &str) -> &[Word] {
        self.data.get(code).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Byte length of the longest loaded code.
    pub fn max_code_len(&self) -> usize {
        self.max_code_len
    }

    /// Byte length of the longest loaded text.
    pub fn max_text_len(&self) -> usize {
        self.max_text_len
    }

    pub fn len(&self) -> usize {
        self.data.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
