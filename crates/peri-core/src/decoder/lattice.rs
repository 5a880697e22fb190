//! Beam lattice for the shift/reduce search.
//!
//! Nodes live in one arena (`Vec<Node>`) and reference predecessors by
//! arena offset, so predecessor identity is index equality. Each decoding
//! step closes over a beam of at most `beam_size` nodes. While a step is
//! open, candidates are kept in a rank-ordered list; an eviction recycles
//! the loser's arena slot for the next emplacement, so a step never
//! occupies more than `beam_size + 1` slots. Closed beams are compacted to
//! rank order: a node's index within its beam is its rank.

use crate::dict::Word;

pub type NodeId = usize;

/// A vertex in the search lattice, also a node of an output path.
#[derive(Debug, Default, Clone)]
pub struct Node<'d> {
    /// Predecessor on the path, `None` for the root.
    pub prev: Option<NodeId>,
    /// Code bytes consumed by completed reductions on this path.
    pub code_pos: usize,
    /// Byte offset into the target text reached by this path.
    pub text_pos: usize,
    /// Word emitted at this node; `None` for shift nodes and the root.
    pub word: Option<&'d Word>,
    /// Nearest node on the path (self excluded) whose `word` is set.
    pub prev_word: Option<NodeId>,
    /// Features contributed by this node alone.
    pub local_features: Vec<(String, f64)>,
    /// Features that apply only when this node terminates a path.
    pub global_features: Vec<(String, f64)>,
    /// Running sum of local-feature scores over root..=self.
    pub local_score: f64,
    /// Path score: `local_score` plus this node's global features.
    pub score: f64,
}

impl<'d> Node<'d> {
    fn successor(prev_id: NodeId, prev: &Node<'d>, word: Option<&'d Word>) -> Self {
        Node {
            prev: Some(prev_id),
            code_pos: prev.code_pos,
            text_pos: prev.text_pos,
            word,
            prev_word: if prev.word.is_some() {
                Some(prev_id)
            } else {
                prev.prev_word
            },
            ..Node::default()
        }
    }
}

pub struct Lattice<'d> {
    nodes: Vec<Node<'d>>,
    /// Arena offset where each step starts; the last step ends at
    /// `nodes.len()`.
    starts: Vec<usize>,
    /// Candidate ids of the open step, best first.
    order: Vec<NodeId>,
    /// Slot freed by the last eviction, reused by the next emplacement.
    spare: Option<NodeId>,
    beam_size: usize,
    capacity: usize,
}

impl<'d> Default for Lattice<'d> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'d> Lattice<'d> {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            starts: Vec::new(),
            order: Vec::new(),
            spare: None,
            beam_size: 0,
            capacity: 0,
        }
    }

    /// Reset for a new decode, keeping the arena allocation when possible.
    pub fn init(&mut self, code_len: usize, beam_size: usize) {
        assert!(beam_size > 0, "beam size must be positive");
        self.nodes.clear();
        self.starts.clear();
        self.order.clear();
        self.spare = None;
        self.beam_size = beam_size;
        // Beams for steps 1..=len+1, the root, and one transient spare slot.
        self.capacity = (code_len + 1) * beam_size + 2;
        self.nodes.reserve(self.capacity);
    }

    pub fn beam_size(&self) -> usize {
        self.beam_size
    }

    /// Open a new step.
    pub fn begin_step(&mut self) {
        debug_assert!(self.spare.is_none(), "spare slot leaked past end_step");
        self.starts.push(self.nodes.len());
        self.order.clear();
    }

    fn alloc(&mut self, node: Node<'d>) -> NodeId {
        match self.spare.take() {
            Some(slot) => {
                self.nodes[slot] = node;
                slot
            }
            None => {
                debug_assert!(self.nodes.len() < self.capacity, "lattice arena overflow");
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    /// Emplace the root node of step 0.
    pub fn emplace_root(&mut self, word: Option<&'d Word>) -> NodeId {
        debug_assert!(self.nodes.is_empty(), "root must be the first node");
        self.alloc(Node {
            word,
            ..Node::default()
        })
    }

    /// Emplace a successor keeping the predecessor's cursors (a shift, or an
    /// end-of-sentence marker when `word` is the boundary sentinel).
    pub fn emplace_successor(&mut self, prev: NodeId, word: Option<&'d Word>) -> NodeId {
        let node = Node::successor(prev, &self.nodes[prev], word);
        self.alloc(node)
    }

    /// Emplace a reduction consuming code up to `code_pos` and emitting `word`.
    pub fn emplace_reduce(
        &mut self,
        prev: NodeId,
        code_pos: usize,
        text_pos: usize,
        word: &'d Word,
    ) -> NodeId {
        let mut node = Node::successor(prev, &self.nodes[prev], Some(word));
        node.code_pos = code_pos;
        node.text_pos = text_pos;
        self.alloc(node)
    }

    /// Keep the candidate if it ranks within the beam; otherwise evict the
    /// worst candidate (possibly the new one) and recycle its slot.
    ///
    /// The candidate list stays ordered by score descending; a tie ranks
    /// after existing candidates, so the earlier emplacement wins.
    pub fn topk(&mut self, id: NodeId) {
        let score = self.nodes[id].score;
        let at = self
            .order
            .partition_point(|&c| self.nodes[c].score >= score);
        self.order.insert(at, id);
        if self.order.len() > self.beam_size {
            let evicted = self.order.pop().expect("overflowing beam is non-empty");
            self.spare = Some(evicted);
        }
    }

    /// Close the open step, compacting it to the surviving candidates in
    /// rank order. Node ids within the step are final from here on.
    pub fn end_step(&mut self) {
        let start = *self.starts.last().expect("no open step");
        let kept: Vec<Node<'d>> = self
            .order
            .drain(..)
            .map(|id| std::mem::take(&mut self.nodes[id]))
            .collect();
        self.nodes.truncate(start);
        self.nodes.extend(kept);
        self.spare = None;
    }

    /// Append a copy of a node from another lattice to the last closed step,
    /// rewiring its predecessor to `prev` in this lattice. Bypasses beam
    /// selection; used to re-insert a reference path that fell out.
    pub fn force_emplace(&mut self, src: &Node<'d>, prev: NodeId) -> NodeId {
        let mut node = src.clone();
        node.prev = Some(prev);
        node.prev_word = if self.nodes[prev].word.is_some() {
            Some(prev)
        } else {
            self.nodes[prev].prev_word
        };
        debug_assert!(self.nodes.len() < self.capacity, "lattice arena overflow");
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    pub fn node(&self, id: NodeId) -> &Node<'d> {
        &self.nodes[id]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node<'d> {
        &mut self.nodes[id]
    }

    pub fn nodes(&self) -> &[Node<'d>] {
        &self.nodes
    }

    /// Number of steps, open step included.
    pub fn steps(&self) -> usize {
        self.starts.len()
    }

    fn step_end(&self, step: usize) -> usize {
        self.starts
            .get(step + 1)
            .copied()
            .unwrap_or(self.nodes.len())
    }

    pub fn step(&self, step: usize) -> &[Node<'d>] {
        &self.nodes[self.starts[step]..self.step_end(step)]
    }

    pub fn step_len(&self, step: usize) -> usize {
        self.step_end(step) - self.starts[step]
    }

    /// Arena id of the node ranked `index` within `step`.
    pub fn id_at(&self, step: usize, index: usize) -> NodeId {
        debug_assert!(index < self.step_len(step));
        self.starts[step] + index
    }

    /// Step containing the given node.
    pub fn step_of(&self, id: NodeId) -> usize {
        debug_assert!(id < self.nodes.len());
        self.starts.partition_point(|&s| s <= id) - 1
    }

    /// Ids of the last step's nodes.
    pub fn back_ids(&self) -> std::ops::Range<NodeId> {
        self.back_start()..self.nodes.len()
    }

    /// The last step as a beam slice. Rank-ordered once the step is closed.
    pub fn back(&self) -> &[Node<'d>] {
        self.step(self.starts.len() - 1)
    }

    /// Arena id of the first node of the last step.
    pub fn back_start(&self) -> NodeId {
        *self.starts.last().expect("empty lattice")
    }

    /// Up to `max` best paths, ranked best-first.
    pub fn paths(&self, max: usize) -> Vec<ReversePath<'_, 'd>> {
        let start = self.back_start();
        (0..self.back().len().min(max))
            .map(|i| ReversePath::new(self, start + i))
            .collect()
    }
}

/// A path handle that walks from a rear node back to the root.
#[derive(Clone, Copy)]
pub struct ReversePath<'l, 'd> {
    lattice: &'l Lattice<'d>,
    rear: NodeId,
}

impl<'l, 'd> ReversePath<'l, 'd> {
    pub fn new(lattice: &'l Lattice<'d>, rear: NodeId) -> Self {
        Self { lattice, rear }
    }

    pub fn rear(&self) -> &'l Node<'d> {
        self.lattice.node(self.rear)
    }

    pub fn rear_id(&self) -> NodeId {
        self.rear
    }

    pub fn score(&self) -> f64 {
        self.rear().score
    }

    /// Nodes from the rear back to the root.
    pub fn iter(&self) -> impl Iterator<Item = &'l Node<'d>> {
        let lattice = self.lattice;
        std::iter::successors(Some(self.rear()), move |node| {
            node.prev.map(|id| lattice.node(id))
        })
    }

    /// Arena ids from the root to the rear, in path order.
    pub fn forward_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> =
            std::iter::successors(Some(self.rear), |id| self.lattice.node(*id).prev).collect();
        ids.reverse();
        ids
    }

    /// Concatenation of the emitted word texts, in path order.
    pub fn text(&self) -> String {
        let mut parts: Vec<&str> = self
            .iter()
            .filter_map(|node| node.word.map(|w| w.text.as_str()))
            .collect();
        parts.reverse();
        parts.concat()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dict::Word;

    fn push_scored(lattice: &mut Lattice<'_>, prev: NodeId, score: f64) -> NodeId {
        let id = lattice.emplace_successor(prev, None);
        lattice.node_mut(id).score = score;
        lattice.topk(id);
        id
    }

    fn root_step(lattice: &mut Lattice<'_>) {
        lattice.begin_step();
        let root = lattice.emplace_root(None);
        lattice.topk(root);
        lattice.end_step();
    }

    #[test]
    fn test_beam_keeps_top_candidates_in_rank_order() {
        let mut lattice = Lattice::new();
        lattice.init(4, 2);
        root_step(&mut lattice);

        lattice.begin_step();
        push_scored(&mut lattice, 0, 1.0);
        push_scored(&mut lattice, 0, 3.0);
        push_scored(&mut lattice, 0, 2.0);
        lattice.end_step();

        let scores: Vec<f64> = lattice.back().iter().map(|n| n.score).collect();
        assert_eq!(scores, vec![3.0, 2.0]);
    }

    #[test]
    fn test_tie_keeps_earlier_emplacement() {
        let word_a = Word::new("a", "甲");
        let word_b = Word::new("a", "乙");
        let mut lattice = Lattice::new();
        lattice.init(1, 1);
        root_step(&mut lattice);

        lattice.begin_step();
        let a = lattice.emplace_reduce(0, 1, word_a.text.len(), &word_a);
        lattice.topk(a);
        let b = lattice.emplace_reduce(0, 1, word_b.text.len(), &word_b);
        lattice.topk(b);
        lattice.end_step();

        assert_eq!(lattice.back().len(), 1);
        assert_eq!(lattice.back()[0].word.unwrap().text, "甲");
    }

    #[test]
    fn test_eviction_recycles_arena_slot() {
        let mut lattice = Lattice::new();
        lattice.init(8, 2);
        root_step(&mut lattice);

        lattice.begin_step();
        // Five candidates through a two-wide beam never need more than
        // three slots for this step.
        for score in [1.0, 2.0, 3.0, 4.0, 5.0] {
            push_scored(&mut lattice, 0, score);
        }
        assert!(lattice.nodes().len() <= 1 + 3);
        lattice.end_step();

        let scores: Vec<f64> = lattice.back().iter().map(|n| n.score).collect();
        assert_eq!(scores, vec![5.0, 4.0]);
    }

    #[test]
    fn test_prev_word_skips_wordless_nodes() {
        let word = Word::new("ab", "文");
        let mut lattice = Lattice::new();
        lattice.init(2, 4);

        lattice.begin_step();
        let root = lattice.emplace_root(Some(&word));
        lattice.topk(root);
        lattice.end_step();

        lattice.begin_step();
        let shift = lattice.emplace_successor(0, None);
        lattice.topk(shift);
        lattice.end_step();

        lattice.begin_step();
        let reduce = lattice.emplace_reduce(1, 2, word.text.len(), &word);
        lattice.topk(reduce);
        lattice.end_step();

        let shift_node = lattice.node(1);
        assert_eq!(shift_node.prev_word, Some(0));
        let reduce_node = lattice.node(2);
        assert_eq!(reduce_node.prev, Some(1));
        // The shift carries no word, so the bigram anchor reaches past it.
        assert_eq!(reduce_node.prev_word, Some(0));
    }

    #[test]
    fn test_paths_walk_back_to_root() {
        let word = Word::new("ab", "文");
        let mut lattice = Lattice::new();
        lattice.init(2, 2);
        root_step(&mut lattice);

        lattice.begin_step();
        let shift = lattice.emplace_successor(0, None);
        lattice.topk(shift);
        lattice.end_step();

        lattice.begin_step();
        let reduce = lattice.emplace_reduce(shift, 2, word.text.len(), &word);
        lattice.topk(reduce);
        lattice.end_step();

        let paths = lattice.paths(10);
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].text(), "文");
        assert_eq!(paths[0].forward_ids(), vec![0, shift, reduce]);
    }

    #[test]
    fn test_step_of_locates_nodes() {
        let mut lattice = Lattice::new();
        lattice.init(3, 2);
        root_step(&mut lattice);
        lattice.begin_step();
        push_scored(&mut lattice, 0, 1.0);
        push_scored(&mut lattice, 0, 2.0);
        lattice.end_step();

        assert_eq!(lattice.step_of(0), 0);
        assert_eq!(lattice.step_of(1), 1);
        assert_eq!(lattice.step_of(2), 1);
        assert_eq!(lattice.id_at(1, 0), 1);
    }

    #[test]
    fn test_init_resets_previous_decode() {
        let mut lattice = Lattice::new();
        lattice.init(2, 2);
        root_step(&mut lattice);
        lattice.begin_step();
        push_scored(&mut lattice, 0, 1.0);
        lattice.end_step();

        lattice.init(4, 3);
        assert_eq!(lattice.steps(), 0);
        assert!(lattice.nodes().is_empty());
        assert_eq!(lattice.beam_size(), 3);
    }
}
