//! Detection of true write/read cycles.
//!
//! Order inversions are recovered silently: when a listener W writes a
//! subject that some listener R already read earlier in the same pass, R
//! is promoted strictly above W, the pass is partially rolled back to the
//! point just before R first ran, and both re-run in the corrected order.
//! Each such recovery records a promotion edge W -> R in a per-pass graph.
//!
//! If recoveries ever close a cycle in that graph, the listeners involved
//! are invalidating each other's reads no matter which order they run in:
//! there is no consistent schedule, and iterating further would diverge.
//! That is the `Circularity` error, which names the participants and
//! aborts the transaction.
//!
//! A promotion that would push a listener's layer past [`MAX_LAYER`] is
//! treated the same way; like a fixpoint iteration limit, it should only
//! be reachable through a defect in the rules being scheduled.

use smallvec::SmallVec;

use crate::graph::ListenerId;

/// Ceiling on finite layers. Promotion chains within a pass are bounded
/// by the number of participating listeners, so an ordinary program stays
/// far below this; hitting it means runaway mutual invalidation.
pub const MAX_LAYER: u32 = 1 << 20;

/// The per-pass promotion graph. Edges are only recorded for promotions
/// forced by inversion recovery; forward scheduling promotions cannot
/// contribute to a cycle and are left out to keep the graph small.
#[derive(Default)]
pub(crate) struct Promotions {
    edges: Vec<(ListenerId, ListenerId)>,
}

impl Promotions {
    /// Records the promotion edge `from -> to`. Returns the participants
    /// of the cycle this edge closes, if any, ordered from `to` back
    /// around to `from`.
    pub(crate) fn record(
        &mut self,
        from: ListenerId,
        to: ListenerId,
    ) -> Option<Vec<ListenerId>> {
        if from == to {
            return Some(vec![from]);
        }
        if let Some(path) = self.path(to, from) {
            return Some(path);
        }
        self.edges.push((from, to));
        None
    }

    /// Depth-first search for a path `start -> .. -> goal` along recorded
    /// edges. The graph holds at most a handful of recovery edges per
    /// pass, so no visited-set bookkeeping is warranted beyond the path
    /// itself.
    fn path(&self, start: ListenerId, goal: ListenerId) -> Option<Vec<ListenerId>> {
        let mut stack: SmallVec<[ListenerId; 8]> = SmallVec::new();
        self.search(start, goal, &mut stack)
            .then(|| stack.to_vec())
    }

    fn search(
        &self,
        node: ListenerId,
        goal: ListenerId,
        stack: &mut SmallVec<[ListenerId; 8]>,
    ) -> bool {
        if stack.contains(&node) {
            return false;
        }
        stack.push(node);
        if node == goal {
            return true;
        }
        for &(from, to) in &self.edges {
            if from == node && self.search(to, goal, stack) {
                return true;
            }
        }
        stack.pop();
        false
    }

    pub(crate) fn clear(&mut self) {
        self.edges.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listener(n: u32) -> ListenerId {
        // Mirrors the controller's id allocation closely enough for graph
        // tests: ids are opaque non-zero integers.
        let mut counter = n - 1;
        ListenerId::from_counter(&mut counter)
    }

    #[test]
    fn two_party_cycle() {
        let (a, b) = (listener(1), listener(2));
        let mut promotions = Promotions::default();
        assert_eq!(promotions.record(a, b), None);
        let cycle = promotions.record(b, a).expect("closing edge must report");
        assert!(cycle.contains(&a) && cycle.contains(&b));
    }

    #[test]
    fn self_edge_is_a_cycle() {
        let a = listener(7);
        let mut promotions = Promotions::default();
        assert_eq!(promotions.record(a, a), Some(vec![a]));
    }

    #[test]
    fn chains_are_not_cycles() {
        let (a, b, c) = (listener(1), listener(2), listener(3));
        let mut promotions = Promotions::default();
        assert_eq!(promotions.record(a, b), None);
        assert_eq!(promotions.record(b, c), None);
        assert_eq!(promotions.record(a, c), None);
    }
}
