//! Human-readable dumps of ranked paths and their score breakdowns.
//!
//! Diagnostics only; nothing here feeds back into search or training.

use std::fmt::Write;

use crate::model::Model;

use super::features::PathFeatures;
use super::lattice::Lattice;
use super::Decoder;

/// Render up to `num` ranked paths for `code`, one line each: rank, score,
/// the emitted `text(code)` segments, any unmatched code tail, and the
/// per-feature `key:value * weight` breakdown.
pub fn explain_paths(decoder: &Decoder<'_>, code: &str, num: usize) -> Option<String> {
    let lattice = decoder.decode(code, "")?;
    Some(render_paths(&lattice, decoder.model(), code, code.len(), num))
}

pub(crate) fn render_paths(
    lattice: &Lattice<'_>,
    model: &Model,
    code: &str,
    pos: usize,
    num: usize,
) -> String {
    let mut out = String::new();
    for (rank, path) in lattice.paths(num).iter().enumerate() {
        let _ = write!(out, "#{rank}: {} ", path.score());

        for id in path.forward_ids() {
            if let Some(word) = lattice.node(id).word {
                if !word.text.is_empty() {
                    let _ = write!(out, "{word} ");
                }
            }
        }

        let rear = path.rear();
        if rear.code_pos < pos {
            let _ = write!(out, "...{} ", &code[rear.code_pos..pos]);
        }

        let _ = write!(out, "[");
        for (i, (key, value)) in PathFeatures::new(lattice, path.rear_id()).enumerate() {
            if i > 0 {
                let _ = write!(out, " + ");
            }
            let _ = write!(out, "{key}:{value} * {}", model.weight(key));
        }
        let _ = writeln!(out, "]");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::testutil::single_entry_dict;

    #[test]
    fn test_explain_lists_ranked_paths() {
        let dict = single_entry_dict();
        let decoder = Decoder::new(&dict);
        let out = explain_paths(&decoder, "ceshi", 5).unwrap();
        assert!(out.starts_with("#0: "));
        assert!(out.contains("测试(ceshi)"));
        assert!(out.contains("unigram:测试"));
    }

    #[test]
    fn test_explain_undecodable_code() {
        let dict = single_entry_dict();
        let decoder = Decoder::new(&dict);
        assert!(explain_paths(&decoder, "zzz", 5).is_none());
    }
}
