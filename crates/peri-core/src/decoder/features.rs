//! Lazy iteration over every feature that scores a path.

use super::lattice::{Lattice, NodeId};

/// Iterator over the features of the path ending at a rear node: the rear's
/// global features first, then each node's local features walking the
/// predecessor chain back to the root.
///
/// Features are append-only along a path, so this walk visits each exactly
/// once; the iterator is read-only and can be recreated cheaply.
pub struct PathFeatures<'l, 'd> {
    lattice: &'l Lattice<'d>,
    current: std::slice::Iter<'l, (String, f64)>,
    /// Next node whose local features follow the current slice.
    pending: Option<NodeId>,
}

impl<'l, 'd> PathFeatures<'l, 'd> {
    pub fn new(lattice: &'l Lattice<'d>, rear: NodeId) -> Self {
        Self {
            lattice,
            current: lattice.node(rear).global_features.iter(),
            pending: Some(rear),
        }
    }
}

impl<'l, 'd> Iterator for PathFeatures<'l, 'd> {
    type Item = &'l (String, f64);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(feature) = self.current.next() {
                return Some(feature);
            }
            let id = self.pending.take()?;
            let node = self.lattice.node(id);
            self.current = node.local_features.iter();
            self.pending = node.prev;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::lattice::Lattice;

    #[test]
    fn test_yields_globals_then_locals_backward() {
        let mut lattice = Lattice::new();
        lattice.init(2, 4);

        lattice.begin_step();
        let root = lattice.emplace_root(None);
        lattice.node_mut(root).local_features.push(("root".into(), 1.0));
        lattice.topk(root);
        lattice.end_step();

        lattice.begin_step();
        let mid = lattice.emplace_successor(root, None);
        lattice.node_mut(mid).local_features.push(("mid".into(), 1.0));
        lattice.topk(mid);
        lattice.end_step();

        lattice.begin_step();
        let rear = lattice.emplace_successor(mid, None);
        {
            let node = lattice.node_mut(rear);
            node.local_features.push(("rear".into(), 1.0));
            node.global_features.push(("tail".into(), 1.0));
        }
        lattice.topk(rear);
        lattice.end_step();

        let keys: Vec<&str> = PathFeatures::new(&lattice, rear)
            .map(|(k, _)| k.as_str())
            .collect();
        assert_eq!(keys, vec!["tail", "rear", "mid", "root"]);
    }

    #[test]
    fn test_empty_feature_lists() {
        let mut lattice = Lattice::new();
        lattice.init(1, 2);
        lattice.begin_step();
        let root = lattice.emplace_root(None);
        lattice.topk(root);
        lattice.end_step();

        assert_eq!(PathFeatures::new(&lattice, root).count(), 0);
    }
}
