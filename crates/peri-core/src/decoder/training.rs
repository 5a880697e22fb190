//! Early-update training and batched evaluation.
//!
//! One sample is trained in two passes: a constrained decode collects the
//! reference paths for the target text, then an unconstrained decode is
//! re-run while tracking every reference against the beam. The pass stops
//! at the first step where no reference survives (re-inserting one fallen
//! reference so a gradient still exists), and a softmax over the last beam
//! yields max-entropy-style deltas for the model update.

use std::io::{self, BufRead};
use std::thread;

use tracing::{debug, info};

use crate::dict::Word;

use super::features::PathFeatures;
use super::lattice::{Lattice, Node};
use super::metrics::{EvalReport, TrainReport};
use super::Decoder;

/// Marks a reference whose ancestor fell out of the beam.
const OUT_OF_BEAM: usize = usize::MAX;

/// Result of one training sample whose gradient was applied.
#[derive(Debug, Clone, Copy)]
pub struct TrainOutcome {
    /// Step at which reference tracking stopped; `code.len() + 2` means the
    /// search agreed with a reference all the way to the end.
    pub pos: usize,
    /// Rank of the best surviving reference within the last beam.
    pub label: usize,
    /// Softmax probability assigned to the labeled reference.
    pub prob: f64,
    /// Whether tracking stopped before the end-of-sentence step.
    pub early: bool,
}

/// Gradient of one sample, computed without touching the model.
struct SampleUpdate<'d> {
    lattice: Lattice<'d>,
    deltas: Vec<f64>,
    label: usize,
    prob: f64,
    pos: usize,
}

fn same_word(a: Option<&Word>, b: Option<&Word>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => std::ptr::eq(a, b),
        _ => false,
    }
}

impl<'d> Decoder<'d> {
    /// Train on one `(code, text)` sample and apply the model update.
    ///
    /// `None` when the text cannot be decoded from the code even at doubled
    /// beam width; the model is left untouched in that case.
    pub fn update(&mut self, code: &str, text: &str) -> Option<TrainOutcome> {
        let update = self.early_update(code, text)?;
        Some(self.apply_update(code, update))
    }

    /// Train on a batch: gradients are computed per sample in parallel
    /// (each sample owns its lattice and deltas; model and dictionary are
    /// read-shared), then applied serially in input order.
    pub fn update_batch(
        &mut self,
        samples: &[(String, String)],
        threads: usize,
    ) -> Vec<Option<TrainOutcome>> {
        let updates = self.batch_gradients(samples, threads);
        updates
            .into_iter()
            .zip(samples)
            .map(|(update, (code, _))| update.map(|u| self.apply_update(code, u)))
            .collect()
    }

    fn batch_gradients(
        &self,
        samples: &[(String, String)],
        threads: usize,
    ) -> Vec<Option<SampleUpdate<'d>>> {
        let threads = threads.clamp(1, samples.len().max(1));
        if threads == 1 {
            return samples
                .iter()
                .map(|(code, text)| self.early_update(code, text))
                .collect();
        }

        let chunk_len = samples.len().div_ceil(threads);
        thread::scope(|scope| {
            let handles: Vec<_> = samples
                .chunks(chunk_len)
                .map(|chunk| {
                    scope.spawn(move || {
                        chunk
                            .iter()
                            .map(|(code, text)| self.early_update(code, text))
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|handle| handle.join().expect("gradient worker panicked"))
                .collect()
        })
    }

    fn apply_update(&mut self, code: &str, update: SampleUpdate<'d>) -> TrainOutcome {
        let SampleUpdate {
            lattice,
            deltas,
            label,
            prob,
            pos,
        } = update;

        let start = lattice.back_start();
        debug_assert_eq!(lattice.back().len(), deltas.len());
        for (offset, &delta) in deltas.iter().enumerate() {
            self.model_mut()
                .update(PathFeatures::new(&lattice, start + offset), delta);
        }

        TrainOutcome {
            pos,
            label,
            prob,
            early: pos < code.len() + 2,
        }
    }

    /// Compute one sample's gradient: reference pass, tracking pass, then
    /// softmax deltas over the last beam.
    fn early_update(&self, code: &str, text: &str) -> Option<SampleUpdate<'d>> {
        // Reference pass; a dry beam gets one retry at doubled width.
        let refs = match self.decode(code, text) {
            Some(lattice) => lattice,
            None => {
                let mut lattice = Lattice::new();
                if !self.decode_into(code, text, self.beam_size() * 2, &mut lattice) {
                    debug!(code, text, "no reference path, sample dropped");
                    return None;
                }
                lattice
            }
        };
        let paths: Vec<Vec<&Node<'d>>> = refs
            .paths(refs.back().len())
            .iter()
            .map(|path| {
                let mut nodes: Vec<&Node<'d>> = path.iter().collect();
                nodes.reverse();
                nodes
            })
            .collect();
        debug_assert!(paths.iter().all(|p| p.len() == code.len() + 2));

        // Tracking pass: unconstrained decode, matching references per step.
        let mut lattice = Lattice::new();
        lattice.init(code.len(), self.beam_size());
        self.begin_decode(&mut lattice);

        let mut indeces = vec![0usize; paths.len()];
        let mut pos = 1;
        let mut tracked = true;
        while tracked && pos <= code.len() {
            self.advance(code, "", pos, &mut lattice);
            tracked = self.match_references(&mut lattice, &paths, pos, &mut indeces);
            pos += 1;
        }
        if tracked {
            self.end_decode(code, "", &mut lattice);
            tracked = self.match_references(&mut lattice, &paths, pos, &mut indeces);
            if tracked {
                pos += 1;
            } else {
                debug!(code, pos, "early update");
            }
        } else {
            debug!(code, pos, "early update");
        }

        // The best-ranked reference still inside the last beam is the target.
        let back_len = lattice.back().len();
        let label = indeces
            .iter()
            .copied()
            .filter(|&index| index < back_len)
            .min()
            .expect("a reference survives every matching step");

        let beam = lattice.back();
        let sum: f64 = beam.iter().map(|node| node.score.exp()).sum();
        let mut prob = 0.0;
        let deltas: Vec<f64> = beam
            .iter()
            .enumerate()
            .map(|(index, node)| {
                let p = node.score.exp() / sum;
                if index == label {
                    prob = p;
                    1.0 - p
                } else {
                    -p
                }
            })
            .collect();

        Some(SampleUpdate {
            lattice,
            deltas,
            label,
            prob,
            pos,
        })
    }

    /// Advance every reference one step through the freshly closed beam.
    ///
    /// A reference advances when some beam node continues it exactly: same
    /// predecessor (by id) and same emitted word (by identity). When none
    /// advances, the first reference whose ancestor is still in the beam is
    /// copied in behind that ancestor so the gradient can see it, and
    /// tracking reports failure.
    fn match_references(
        &self,
        lattice: &mut Lattice<'d>,
        paths: &[Vec<&Node<'d>>],
        pos: usize,
        indeces: &mut Vec<usize>,
    ) -> bool {
        debug_assert!(!paths.is_empty());
        debug_assert_eq!(indeces.len(), paths.len());

        let prev_indeces = std::mem::replace(indeces, vec![OUT_OF_BEAM; paths.len()]);
        let prev_len = lattice.step_len(pos - 1);
        let mut found = false;

        for (i, path) in paths.iter().enumerate() {
            if prev_indeces[i] >= prev_len {
                continue;
            }
            let want_prev = lattice.id_at(pos - 1, prev_indeces[i]);
            for j in 0..lattice.step_len(pos) {
                let node = lattice.node(lattice.id_at(pos, j));
                if node.prev == Some(want_prev) && same_word(node.word, path[pos].word) {
                    indeces[i] = j;
                    found = true;
                    break;
                }
            }
        }

        if !found {
            let i = prev_indeces
                .iter()
                .position(|&index| index < prev_len)
                .expect("a reference ancestor remains in the beam");
            let prev = lattice.id_at(pos - 1, prev_indeces[i]);
            lattice.force_emplace(paths[i][pos], prev);
            indeces[i] = lattice.step_len(pos) - 1;
        }

        found
    }

    /// Train over a `code<TAB>text` stream, one epoch, returning whole-epoch
    /// metrics. Blank lines and lines missing either field are skipped.
    pub fn train<R: BufRead>(
        &mut self,
        reader: R,
        batch_size: usize,
        threads: usize,
    ) -> io::Result<TrainReport> {
        let batch_size = batch_size.max(1);
        let mut tally = TrainTally::default();
        let mut batches = 0usize;
        let mut batch: Vec<(String, String)> = Vec::with_capacity(batch_size);

        for line in reader.lines() {
            let line = line?;
            let mut fields = line.split_whitespace();
            let (Some(code), Some(text)) = (fields.next(), fields.next()) else {
                continue;
            };
            batch.push((code.to_string(), text.to_string()));
            if batch.len() >= batch_size {
                tally.absorb(&batch, self.update_batch(&batch, threads));
                batch.clear();
                batches += 1;
                if batches % 100 == 0 {
                    info!(
                        batches,
                        count = tally.count,
                        success_rate = tally.success_rate(),
                        precision = tally.precision(),
                        loss = tally.loss(),
                        "training progress"
                    );
                }
            }
        }
        if !batch.is_empty() {
            tally.absorb(&batch, self.update_batch(&batch, threads));
        }

        let report = tally.report();
        info!(?report, "training epoch finished");
        Ok(report)
    }

    /// Evaluate over a `code<TAB>text` stream, fanning predictions out per
    /// batch and accumulating serially.
    pub fn evaluate<R: BufRead>(
        &self,
        reader: R,
        batch_size: usize,
        threads: usize,
    ) -> io::Result<EvalReport> {
        let batch_size = batch_size.max(1);
        let mut count = 0usize;
        let mut decoded = 0usize;
        let mut in_beam = 0usize;
        let mut correct = 0usize;
        let mut loss = 0.0;
        let mut batch: Vec<(String, String)> = Vec::with_capacity(batch_size);

        let mut flush = |batch: &mut Vec<(String, String)>| {
            count += batch.len();
            for result in self.predict_batch(batch, threads) {
                let Some((rank, prob)) = result else { continue };
                decoded += 1;
                loss -= prob.ln();
                if rank < self.beam_size() {
                    in_beam += 1;
                    if rank == 0 {
                        correct += 1;
                    }
                }
            }
            batch.clear();
        };

        for line in reader.lines() {
            let line = line?;
            let mut fields = line.split_whitespace();
            let (Some(code), Some(text)) = (fields.next(), fields.next()) else {
                continue;
            };
            batch.push((code.to_string(), text.to_string()));
            if batch.len() >= batch_size {
                flush(&mut batch);
            }
        }
        if !batch.is_empty() {
            flush(&mut batch);
        }

        let report = EvalReport {
            count,
            success_rate: decoded as f64 / count as f64,
            precision: correct as f64 / decoded as f64,
            p_at_beam: in_beam as f64 / decoded as f64,
            loss: loss / decoded as f64,
            beam_size: self.beam_size(),
        };
        info!(?report, "evaluation finished");
        Ok(report)
    }

    fn predict_batch(
        &self,
        samples: &[(String, String)],
        threads: usize,
    ) -> Vec<Option<(usize, f64)>> {
        let threads = threads.clamp(1, samples.len().max(1));
        if threads == 1 {
            return samples
                .iter()
                .map(|(code, text)| self.predict_target(code, text))
                .collect();
        }

        let chunk_len = samples.len().div_ceil(threads);
        thread::scope(|scope| {
            let handles: Vec<_> = samples
                .chunks(chunk_len)
                .map(|chunk| {
                    scope.spawn(move || {
                        chunk
                            .iter()
                            .map(|(code, text)| self.predict_target(code, text))
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|handle| handle.join().expect("prediction worker panicked"))
                .collect()
        })
    }
}

/// Whole-epoch training counters.
#[derive(Default)]
struct TrainTally {
    count: usize,
    decoded: usize,
    correct: usize,
    early: usize,
    loss: f64,
}

impl TrainTally {
    fn absorb(&mut self, batch: &[(String, String)], outcomes: Vec<Option<TrainOutcome>>) {
        self.count += batch.len();
        for outcome in outcomes.into_iter().flatten() {
            self.decoded += 1;
            if outcome.early {
                self.early += 1;
            }
            if outcome.label == 0 {
                self.correct += 1;
            }
            self.loss -= outcome.prob.ln();
        }
    }

    fn success_rate(&self) -> f64 {
        self.decoded as f64 / self.count as f64
    }

    fn precision(&self) -> f64 {
        self.correct as f64 / self.decoded as f64
    }

    fn loss(&self) -> f64 {
        self.loss / self.decoded as f64
    }

    fn report(&self) -> TrainReport {
        TrainReport {
            count: self.count,
            success_rate: self.success_rate(),
            precision: self.precision(),
            loss: self.loss(),
            early_update_rate: self.early as f64 / self.decoded as f64,
        }
    }
}
