//! Whole-epoch training and evaluation reports.
//!
//! Ratios over zero denominators are NaN (e.g. `precision` when nothing
//! decoded); consumers should treat NaN as "undefined", not zero.

use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, Serialize)]
pub struct TrainReport {
    /// Samples seen, decodable or not.
    pub count: usize,
    /// Fraction of samples whose reference text was decodable.
    pub success_rate: f64,
    /// Fraction of decodable samples whose labeled reference ranked first.
    pub precision: f64,
    /// Mean negative log probability of the labeled reference.
    pub loss: f64,
    /// Fraction of decodable samples whose tracking stopped early.
    pub early_update_rate: f64,
}

impl fmt::Display for TrainReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "count = {}, success rate = {}, precision = {}, loss = {}, early update rate = {}",
            self.count, self.success_rate, self.precision, self.loss, self.early_update_rate
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct EvalReport {
    /// Samples seen, decodable or not.
    pub count: usize,
    /// Fraction of samples whose code decoded and whose text was producible.
    pub success_rate: f64,
    /// Fraction of decoded samples whose target ranked first.
    pub precision: f64,
    /// Fraction of decoded samples whose target ranked within the beam.
    pub p_at_beam: f64,
    /// Mean negative log probability of the target text.
    pub loss: f64,
    /// Beam size the evaluation ran with (names the `p@N` column).
    pub beam_size: usize,
}

impl fmt::Display for EvalReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "count = {}, success rate = {}, precision = {}, p@{} = {}, loss = {}",
            self.count, self.success_rate, self.precision, self.beam_size, self.p_at_beam, self.loss
        )
    }
}
