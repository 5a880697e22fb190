//! Shared dictionary fixtures for decoder tests.

use crate::dict::Dictionary;

/// One entry: the whole code reduces in a single step.
pub(crate) fn single_entry_dict() -> Dictionary {
    Dictionary::from_entries([("ceshi", "测试")])
}

/// The compound word plus its two halves, so "ceshi" decodes along two
/// paths producing the same text.
pub(crate) fn split_dict() -> Dictionary {
    Dictionary::from_entries([("ce", "测"), ("shi", "试"), ("ceshi", "测试")])
}

/// A small phrase dictionary for multi-word decoding and training runs.
pub(crate) fn phrase_dict() -> Dictionary {
    Dictionary::from_entries([
        ("ni", "你"),
        ("hao", "好"),
        ("nihao", "你好"),
        ("ma", "吗"),
        ("ceshi", "测试"),
        ("ce", "测"),
        ("shi", "试"),
        ("shi", "是"),
    ])
}
