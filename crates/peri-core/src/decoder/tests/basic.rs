//! Decode and predict behavior on small hand-built dictionaries.

use crate::decoder::testutil::{phrase_dict, single_entry_dict, split_dict};
use crate::decoder::{Decoder, Lattice};
use crate::dict::Dictionary;

/// Number of real words (non-sentinel) emitted along a path.
fn emitted_words(path: &crate::decoder::ReversePath<'_, '_>) -> usize {
    path.iter()
        .filter(|node| node.word.is_some_and(|w| !w.text.is_empty()))
        .count()
}

#[test]
fn test_single_entry_decodes_with_probability_one() {
    let dict = single_entry_dict();
    let decoder = Decoder::new(&dict);

    let predictions = decoder.predict("ceshi", 10).unwrap();
    assert_eq!(predictions.len(), 1);
    assert_eq!(predictions[0].0, "测试");
    assert!((predictions[0].1 - 1.0).abs() < 1e-9);

    let lattice = decoder.decode("ceshi", "").unwrap();
    assert_eq!(lattice.paths(10)[0].score(), 0.0);
}

#[test]
fn test_split_dict_produces_both_segmentations() {
    let dict = split_dict();
    let decoder = Decoder::new(&dict);

    let lattice = decoder.decode("ceshi", "").unwrap();
    let paths = lattice.paths(10);
    assert_eq!(paths.len(), 2);
    // Both segmentations spell the same text.
    assert_eq!(paths[0].text(), "测试");
    assert_eq!(paths[1].text(), "测试");
    let words: Vec<usize> = paths.iter().map(emitted_words).collect();
    assert!(words.contains(&1) && words.contains(&2));
}

#[test]
fn test_shift_and_reduce_reach_one_terminal_path() {
    let dict = Dictionary::from_entries([("a", "A"), ("b", "B")]);
    let decoder = Decoder::new(&dict);

    let predictions = decoder.predict("ab", 10).unwrap();
    assert_eq!(predictions.len(), 1);
    assert_eq!(predictions[0].0, "AB");
    assert!((predictions[0].1 - 1.0).abs() < 1e-9);
}

#[test]
fn test_beam_one_tie_break_keeps_first_entry() {
    let dict = Dictionary::from_entries([("a", "甲"), ("a", "乙")]);
    let decoder = Decoder::with_beam_size(&dict, 1);

    let predictions = decoder.predict("a", 10).unwrap();
    assert_eq!(predictions.len(), 1);
    assert_eq!(predictions[0].0, "甲");
}

#[test]
fn test_boundary_bigrams_anchor_both_ends() {
    let dict = single_entry_dict();
    let decoder = Decoder::new(&dict);

    let lattice = decoder.decode("ceshi", "").unwrap();
    let paths = lattice.paths(1);
    let nodes: Vec<_> = paths[0].iter().collect();

    // Rear node is the end-of-sentence marker: bigram only, empty right side.
    let eos = nodes[0];
    let eos_keys: Vec<&str> = eos.local_features.iter().map(|(k, _)| k.as_str()).collect();
    assert_eq!(eos_keys, vec!["bigram:测试_"]);
    assert!(eos.global_features.is_empty());

    // The word node carries its unigram and a begin-of-sentence bigram.
    let word = nodes[1];
    let word_keys: Vec<&str> = word
        .local_features
        .iter()
        .map(|(k, _)| k.as_str())
        .collect();
    assert_eq!(word_keys, vec!["unigram:测试", "bigram:_测试"]);

    // Shift nodes carry only the unmatched-tail feature.
    let shift = nodes[2];
    assert!(shift.local_features.is_empty());
    let shift_keys: Vec<&str> = shift
        .global_features
        .iter()
        .map(|(k, _)| k.as_str())
        .collect();
    assert_eq!(shift_keys, vec!["code_len:4"]);
}

#[test]
fn test_undecodable_code_fails_cleanly() {
    let dict = Dictionary::from_entries([("b", "B")]);
    let decoder = Decoder::new(&dict);

    assert!(decoder.decode("x", "").is_none());
    assert!(decoder.predict("x", 10).is_none());

    // A reused lattice is fully re-initialized by the next decode.
    let mut lattice = Lattice::new();
    assert!(!decoder.decode_into("x", "", 4, &mut lattice));
    assert!(decoder.decode_into("b", "", 4, &mut lattice));
    assert_eq!(lattice.paths(10)[0].text(), "B");
}

#[test]
fn test_empty_dictionary_never_decodes() {
    let dict = Dictionary::from_entries(Vec::<(&str, &str)>::new());
    let decoder = Decoder::new(&dict);
    assert!(decoder.decode("a", "").is_none());
}

#[test]
fn test_empty_code_yields_empty_text() {
    let dict = single_entry_dict();
    let decoder = Decoder::new(&dict);
    let predictions = decoder.predict("", 10).unwrap();
    assert_eq!(predictions.len(), 1);
    assert_eq!(predictions[0].0, "");
}

#[test]
fn test_constrained_decode_filters_reductions() {
    let dict = Dictionary::from_entries([("a", "甲"), ("a", "乙")]);
    let decoder = Decoder::new(&dict);

    let lattice = decoder.decode("a", "乙").unwrap();
    let paths = lattice.paths(10);
    assert_eq!(paths.len(), 1);
    assert_eq!(paths[0].text(), "乙");
}

#[test]
fn test_shift_never_outruns_longest_code() {
    // Longest code is one byte, so no shift may survive; "ab" must reduce
    // at every position.
    let dict = Dictionary::from_entries([("a", "A"), ("b", "B")]);
    let decoder = Decoder::new(&dict);
    let lattice = decoder.decode("ab", "").unwrap();
    for step in 0..lattice.steps() {
        for node in lattice.step(step) {
            assert!(node.word.is_some() || node.prev.is_none());
        }
    }
}

#[test]
fn test_predict_target_in_beam() {
    let dict = split_dict();
    let decoder = Decoder::new(&dict);

    let (rank, prob) = decoder.predict_target("ceshi", "测试").unwrap();
    assert_eq!(rank, 0);
    assert!((prob - 0.5).abs() < 1e-9);
}

#[test]
fn test_predict_target_out_of_beam_uses_constrained_score() {
    let dict = Dictionary::from_entries([("a", "甲"), ("a", "乙")]);
    let decoder = Decoder::with_beam_size(&dict, 1);

    // "乙" is evicted from the one-wide beam; its probability comes from a
    // constrained decode: exp(0) / (exp(0) + exp(0)).
    let (rank, prob) = decoder.predict_target("a", "乙").unwrap();
    assert_eq!(rank, 1);
    assert!((prob - 0.5).abs() < 1e-9);
}

#[test]
fn test_predict_target_unproducible_text() {
    let dict = Dictionary::from_entries([("a", "甲")]);
    let decoder = Decoder::new(&dict);
    assert!(decoder.predict_target("a", "丙").is_none());
}

#[test]
fn test_phrase_decoding_ranks_all_paths() {
    let dict = phrase_dict();
    let decoder = Decoder::new(&dict);

    let predictions = decoder.predict("nihao", 10).unwrap();
    assert!(predictions.len() >= 2);
    let total: f64 = predictions.iter().map(|(_, p)| p).sum();
    assert!((total - 1.0).abs() < 1e-9);
    for (text, _) in &predictions {
        assert_eq!(text, "你好");
    }
}
