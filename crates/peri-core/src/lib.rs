//! Code-to-text conversion via structured-perceptron beam search.
//!
//! A [`Dictionary`](dict::Dictionary) maps short Latin-letter codes to
//! candidate texts; the [`Decoder`](decoder::Decoder) runs a shift/reduce
//! beam search over an input code string, scoring paths with a sparse
//! linear [`Model`](model::Model) that is trained online by early-update
//! perceptron-style gradients.

pub mod decoder;
pub mod dict;
pub mod model;
