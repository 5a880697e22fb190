//! Shift/reduce beam-search decoder with early-update training.
//!
//! `decode` runs the search over one code string; `update`/`train` drive
//! online learning; `predict`/`evaluate` rank candidates and measure the
//! model. Search and training internals live in sibling modules.

pub mod explain;
mod features;
mod lattice;
mod metrics;
mod search;
mod training;

#[cfg(test)]
mod testutil;
#[cfg(test)]
mod tests;

pub use features::PathFeatures;
pub use lattice::{Lattice, Node, NodeId, ReversePath};
pub use metrics::{EvalReport, TrainReport};
pub use training::TrainOutcome;

use std::sync::OnceLock;

use crate::dict::{Dictionary, Word};
use crate::model::Model;

pub const DEFAULT_BEAM_SIZE: usize = 20;

/// Sentence-boundary sentinel: anchors bigram features at both ends of a
/// path and is never emitted into output text.
pub(crate) fn boundary() -> &'static Word {
    static BOUNDARY: OnceLock<Word> = OnceLock::new();
    BOUNDARY.get_or_init(|| Word::new("", ""))
}

pub struct Decoder<'d> {
    dict: &'d Dictionary,
    beam_size: usize,
    model: Model,
}

impl<'d> Decoder<'d> {
    pub fn new(dict: &'d Dictionary) -> Self {
        Self::with_beam_size(dict, DEFAULT_BEAM_SIZE)
    }

    pub fn with_beam_size(dict: &'d Dictionary, beam_size: usize) -> Self {
        Self::with_model(dict, beam_size, Model::default())
    }

    pub fn with_model(dict: &'d Dictionary, beam_size: usize, model: Model) -> Self {
        assert!(beam_size > 0, "beam size must be positive");
        Self {
            dict,
            beam_size,
            model,
        }
    }

    pub fn dict(&self) -> &'d Dictionary {
        self.dict
    }

    pub fn beam_size(&self) -> usize {
        self.beam_size
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut Model {
        &mut self.model
    }
}
