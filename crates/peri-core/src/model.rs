//! Sparse linear model over string-keyed features.
//!
//! Plain SGD updates only; the decoder owns the training loop and hands the
//! model `(feature, value)` iterators together with a per-path delta.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use tracing::{debug, info, warn};

use crate::decoder::Node;

pub const DEFAULT_LEARNING_RATE: f64 = 0.01;

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone)]
pub struct Model {
    weights: HashMap<String, f64>,
    learning_rate: f64,
}

impl Default for Model {
    fn default() -> Self {
        Self::new(DEFAULT_LEARNING_RATE)
    }
}

impl Model {
    pub fn new(learning_rate: f64) -> Self {
        Self {
            weights: HashMap::new(),
            learning_rate,
        }
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    /// Weight of a feature; unknown keys score zero.
    pub fn weight(&self, key: &str) -> f64 {
        self.weights.get(key).copied().unwrap_or(0.0)
    }

    /// All `(feature, weight)` pairs, in no particular order.
    pub fn weights(&self) -> impl Iterator<Item = (&str, f64)> {
        self.weights.iter().map(|(key, weight)| (key.as_str(), *weight))
    }

    /// Dot product of the weights with a feature vector.
    pub fn score<'a, I>(&self, features: I) -> f64
    where
        I: IntoIterator<Item = &'a (String, f64)>,
    {
        features
            .into_iter()
            .map(|(key, value)| value * self.weight(key))
            .sum()
    }

    /// Score a freshly emplaced node from its predecessor's running score.
    ///
    /// Valid because features are append-only along a path and the model is
    /// linear: the chain's local score is the predecessor's plus this
    /// node's own local features.
    pub fn compute_score(&self, prev_local_score: f64, node: &mut Node<'_>) {
        node.local_score = prev_local_score + self.score(&node.local_features);
        node.score = node.local_score + self.score(&node.global_features);
    }

    /// SGD step: `weights[k] += v * delta * learning_rate` for each feature.
    pub fn update<'a, I>(&mut self, features: I, delta: f64)
    where
        I: IntoIterator<Item = &'a (String, f64)>,
    {
        for (key, value) in features {
            let weight = self.weights.entry(key.clone()).or_insert(0.0);
            *weight += value * delta * self.learning_rate;
            debug!(key = %key, weight = *weight, delta, "weight updated");
        }
    }

    /// Apply `(features, delta)` pairs in order.
    pub fn update_many<'a, I, F>(&mut self, pairs: I)
    where
        I: IntoIterator<Item = (F, f64)>,
        F: IntoIterator<Item = &'a (String, f64)>,
    {
        for (features, delta) in pairs {
            self.update(features, delta);
        }
    }

    /// Write one `key<TAB>weight` line per feature. Returns the count.
    pub fn save<W: Write>(&self, writer: &mut W) -> Result<usize, ModelError> {
        for (key, weight) in &self.weights {
            writeln!(writer, "{key}\t{weight}")?;
        }
        info!(features = self.weights.len(), "model saved");
        Ok(self.weights.len())
    }

    /// Replace the weights with `key<TAB>weight` lines. Unparsable lines are
    /// skipped; duplicate keys are last-write-wins. Returns the count.
    pub fn load<R: BufRead>(&mut self, reader: R) -> Result<usize, ModelError> {
        self.weights.clear();
        for line in reader.lines() {
            let line = line?;
            let mut fields = line.split_whitespace();
            let (Some(key), Some(weight)) = (fields.next(), fields.next()) else {
                continue;
            };
            match weight.parse::<f64>() {
                Ok(weight) => {
                    self.weights.insert(key.to_string(), weight);
                }
                Err(_) => warn!(key, weight, "unparsable model line skipped"),
            }
        }
        info!(features = self.weights.len(), "model loaded");
        Ok(self.weights.len())
    }

    pub fn open(path: &Path) -> Result<Self, ModelError> {
        Self::open_with_rate(path, DEFAULT_LEARNING_RATE)
    }

    pub fn open_with_rate(path: &Path, learning_rate: f64) -> Result<Self, ModelError> {
        let mut model = Self::new(learning_rate);
        model.load(BufReader::new(File::open(path)?))?;
        Ok(model)
    }

    pub fn save_to(&self, path: &Path) -> Result<usize, ModelError> {
        let mut writer = BufWriter::new(File::create(path)?);
        let count = self.save(&mut writer)?;
        writer.flush()?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feats(pairs: &[(&str, f64)]) -> Vec<(String, f64)> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_score_unknown_keys_are_zero() {
        let model = Model::default();
        let features = feats(&[("unigram:测试", 1.0)]);
        assert_eq!(model.score(&features), 0.0);
    }

    #[test]
    fn test_update_auto_vivifies() {
        let mut model = Model::new(0.5);
        let features = feats(&[("unigram:测", 1.0), ("bigram:_测", 2.0)]);
        model.update(&features, 1.0);
        assert_eq!(model.weight("unigram:测"), 0.5);
        assert_eq!(model.weight("bigram:_测"), 2.0 * 0.5);

        model.update(&features, -1.0);
        assert_eq!(model.weight("unigram:测"), 0.0);
    }

    #[test]
    fn test_update_many_applies_pairwise() {
        let mut model = Model::new(1.0);
        let a = feats(&[("a", 1.0)]);
        let b = feats(&[("b", 1.0)]);
        model.update_many([(&a, 1.0), (&b, -2.0)]);
        assert_eq!(model.weight("a"), 1.0);
        assert_eq!(model.weight("b"), -2.0);
    }

    #[test]
    fn test_save_load_round_trip() {
        let mut model = Model::new(0.1);
        model.update(&feats(&[("unigram:测试", 1.0), ("code_len:3", 1.0)]), 2.0);

        let mut buf = Vec::new();
        model.save(&mut buf).unwrap();

        let mut loaded = Model::default();
        let count = loaded.load(buf.as_slice()).unwrap();
        assert_eq!(count, 2);
        assert_eq!(loaded.weight("unigram:测试"), model.weight("unigram:测试"));
        assert_eq!(loaded.weight("code_len:3"), model.weight("code_len:3"));
    }

    #[test]
    fn test_load_clears_and_last_write_wins() {
        let mut model = Model::default();
        model.update(&feats(&[("stale", 1.0)]), 1.0);

        let text = "a\t1.5\nnot-a-pair\na\t2.5\nb\tnan-ish\n";
        model.load(text.as_bytes()).unwrap();
        assert_eq!(model.weight("stale"), 0.0);
        assert_eq!(model.weight("a"), 2.5);
        // "nan-ish" fails to parse, so "b" is skipped entirely.
        assert_eq!(model.weight("b"), 0.0);
        assert_eq!(model.len(), 1);
    }
}
