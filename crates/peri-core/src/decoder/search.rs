//! The shift/reduce search over one code string.
//!
//! One step per code position. At each step every surviving predecessor
//! either shifts (extends its unread code span) or reduces (emits a
//! dictionary word matching the span). A final step marks paths that
//! consumed the whole code with an end-of-sentence node.

use tracing::debug;

use super::lattice::{Lattice, NodeId};
use super::{boundary, Decoder};

impl<'d> Decoder<'d> {
    /// Run the full search. A non-empty `text` constrains every reduction
    /// to spell out exactly that target. Returns `None` when the beam runs
    /// dry before the code is consumed.
    pub fn decode(&self, code: &str, text: &str) -> Option<Lattice<'d>> {
        let mut lattice = Lattice::new();
        self.decode_into(code, text, self.beam_size(), &mut lattice)
            .then_some(lattice)
    }

    /// `decode` with an explicit beam width, reusing the caller's lattice
    /// arena. On failure the lattice is left mid-search and must be
    /// re-initialized by the next decode.
    pub fn decode_into(
        &self,
        code: &str,
        text: &str,
        beam_size: usize,
        lattice: &mut Lattice<'d>,
    ) -> bool {
        debug!(code, text, beam_size, "decode");

        lattice.init(code.len(), beam_size);
        self.begin_decode(lattice);

        let mut ok = true;
        for pos in 1..=code.len() {
            if !self.advance(code, text, pos, lattice) {
                ok = false;
                break;
            }
        }
        let ok = ok && self.end_decode(code, text, lattice);

        if !ok {
            debug!(code, text, "cannot decode");
        }
        ok
    }

    /// Step 0: a single root carrying the boundary sentinel, so the first
    /// emitted word picks up a begin-of-sentence bigram.
    pub(super) fn begin_decode(&self, lattice: &mut Lattice<'d>) {
        lattice.begin_step();
        let root = lattice.emplace_root(Some(boundary()));
        lattice.topk(root);
        lattice.end_step();
    }

    /// One step of the search: extend every predecessor by a shift and by
    /// every reduction the dictionary allows for `code[prev.code_pos..pos]`.
    pub(super) fn advance(
        &self,
        code: &str,
        text: &str,
        pos: usize,
        lattice: &mut Lattice<'d>,
    ) -> bool {
        let prev_ids = lattice.back_ids();
        debug_assert!(!prev_ids.is_empty(), "advancing from an empty beam");
        lattice.begin_step();

        for prev in prev_ids {
            let (prev_code_pos, prev_text_pos) = {
                let node = lattice.node(prev);
                (node.code_pos, node.text_pos)
            };

            // A shift is only worth keeping while some reduction could still
            // consume the span; spans longer than any dictionary code are
            // dead ends, as is shifting at the last position.
            if pos < code.len() && pos - prev_code_pos < self.dict().max_code_len() {
                let id = lattice.emplace_successor(prev, None);
                self.finish_node(lattice, id, pos);
            }

            // Codes are Latin letters; a span that happens to split a
            // multi-byte character cannot match any dictionary entry.
            let Some(subcode) = code.get(prev_code_pos..pos) else {
                continue;
            };
            for word in self.dict().find(subcode) {
                if !text.is_empty() && !text[prev_text_pos..].starts_with(word.text.as_str()) {
                    continue;
                }
                let id =
                    lattice.emplace_reduce(prev, pos, prev_text_pos + word.text.len(), word);
                self.finish_node(lattice, id, pos);
            }
        }

        lattice.end_step();
        !lattice.back().is_empty()
    }

    /// Final step: one end-of-sentence successor per predecessor that
    /// consumed the whole code (and the whole text when constrained), so
    /// complete paths pick up an end-of-sentence bigram.
    pub(super) fn end_decode(&self, code: &str, text: &str, lattice: &mut Lattice<'d>) -> bool {
        let prev_ids = lattice.back_ids();
        lattice.begin_step();

        for prev in prev_ids {
            let (prev_code_pos, prev_text_pos) = {
                let node = lattice.node(prev);
                (node.code_pos, node.text_pos)
            };
            if prev_code_pos == code.len() && (text.is_empty() || prev_text_pos == text.len()) {
                let id = lattice.emplace_successor(prev, Some(boundary()));
                self.finish_node(lattice, id, code.len());
            }
        }

        lattice.end_step();
        !lattice.back().is_empty()
    }

    /// Attach features to a freshly emplaced node, score it, and submit it
    /// to beam selection.
    fn finish_node(&self, lattice: &mut Lattice<'d>, id: NodeId, pos: usize) {
        self.make_features(lattice, id, pos);
        let prev_local_score = lattice
            .node(id)
            .prev
            .map(|prev| lattice.node(prev).local_score)
            .unwrap_or(0.0);
        self.model()
            .compute_score(prev_local_score, lattice.node_mut(id));
        lattice.topk(id);
    }

    /// Build the node's features for decoder position `pos`:
    /// - `unigram:<text>` when the node emits a word with non-empty text;
    /// - `bigram:<prev>_<cur>` when the node emits a word and an earlier
    ///   word exists (the boundary sentinel contributes an empty side);
    /// - global `code_len:<k>` when `k = pos - code_pos` code bytes remain
    ///   unreduced on this path.
    fn make_features(&self, lattice: &mut Lattice<'d>, id: NodeId, pos: usize) {
        let (unigram, bigram, unmatched) = {
            let node = lattice.node(id);
            let unigram = node
                .word
                .filter(|word| !word.text.is_empty())
                .map(|word| format!("unigram:{}", word.text));
            let bigram = match (node.word, node.prev_word) {
                (Some(word), Some(prev_word)) => {
                    let prev_text = &lattice
                        .node(prev_word)
                        .word
                        .expect("prev_word references a word-bearing node")
                        .text;
                    Some(format!("bigram:{}_{}", prev_text, word.text))
                }
                _ => None,
            };
            let unmatched =
                (node.code_pos < pos).then(|| format!("code_len:{}", pos - node.code_pos));
            (unigram, bigram, unmatched)
        };

        let node = lattice.node_mut(id);
        if let Some(key) = unigram {
            node.local_features.push((key, 1.0));
        }
        if let Some(key) = bigram {
            node.local_features.push((key, 1.0));
        }
        if let Some(key) = unmatched {
            node.global_features.push((key, 1.0));
        }
    }

    /// Decode unconstrained and return up to `num` candidate texts with
    /// softmax probabilities over the final beam.
    pub fn predict(&self, code: &str, num: usize) -> Option<Vec<(String, f64)>> {
        let lattice = self.decode(code, "")?;
        let sum: f64 = lattice.back().iter().map(|node| node.score.exp()).sum();
        Some(
            lattice
                .paths(num)
                .iter()
                .map(|path| (path.text(), path.score().exp() / sum))
                .collect(),
        )
    }

    /// Rank and probability of `text` among the predictions for `code`.
    ///
    /// When `text` falls outside the beam, a constrained decode supplies its
    /// score `s*` and the result is `(beam_size, exp(s*) / (Σ exp(s_j) +
    /// exp(s*)))`. `None` when `code` cannot be decoded at all, or `text`
    /// cannot be produced even by a constrained decode.
    pub fn predict_target(&self, code: &str, text: &str) -> Option<(usize, f64)> {
        let lattice = self.decode(code, "")?;
        let beam = lattice.back();
        let sum: f64 = beam.iter().map(|node| node.score.exp()).sum();

        for (rank, path) in lattice.paths(beam.len()).iter().enumerate() {
            if path.text() == text {
                return Some((rank, beam[rank].score.exp() / sum));
            }
        }

        debug!(code, text, "target text not in beam");
        let constrained = self.decode(code, text)?;
        let best = constrained.back().first()?.score.exp();
        Some((self.beam_size(), best / (sum + best)))
    }
}
