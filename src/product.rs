//! Lazy parallel composition and the binary reduction tree.

use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::automaton::Automaton;
use crate::events::{Event, EventSet};
use crate::{StateId, TransitionSystem};

/// Virtual parallel composition of two operands.
///
/// A `Product` answers the full [`TransitionSystem`] contract on the composed
/// state space without storing any transitions: every query is dispatched to
/// the two operands. State `q` encodes the pair `(qx, qy)` as
/// `q = qy * left.n_states() + qx`.
///
/// On a shared event both operands must move and do so together; an event
/// private to one operand moves that operand alone. A shared event enabled on
/// only one side does not fire.
///
/// Operands are held by shared reference and may themselves be products, so
/// compositions nest to arbitrary depth. They must not be mutated for the
/// life of the product, except through the inverse-index calls which are
/// forwarded to both sides.
pub struct Product {
    left: Rc<dyn TransitionSystem>,
    right: Rc<dyn TransitionSystem>,
    n_states: StateId,
    init: StateId,
    alphabet: EventSet,
    shared: EventSet,
    only_left: EventSet,
    only_right: EventSet,
}

impl Product {
    pub fn new(left: Rc<dyn TransitionSystem>, right: Rc<dyn TransitionSystem>) -> Self {
        assert!(
            left.n_states() > 0 && right.n_states() > 0,
            "Cannot compose an empty system"
        );
        let n_states = left
            .n_states()
            .checked_mul(right.n_states())
            .expect("Product state space exceeds the id range");
        let shared = left.alphabet() & right.alphabet();
        let only_left = left.alphabet() ^ shared;
        let only_right = right.alphabet() ^ shared;
        let init = right.init() * left.n_states() + left.init();
        let alphabet = left.alphabet() | right.alphabet();
        Product {
            left,
            right,
            n_states,
            init,
            alphabet,
            shared,
            only_left,
            only_right,
        }
    }

    // q = (qx, qy)
    #[inline]
    fn split(&self, q: StateId) -> (StateId, StateId) {
        (q % self.left.n_states(), q / self.left.n_states())
    }

    #[inline]
    fn pair(&self, qx: StateId, qy: StateId) -> StateId {
        qy * self.left.n_states() + qx
    }
}

impl TransitionSystem for Product {
    fn n_states(&self) -> StateId {
        self.n_states
    }

    fn init(&self) -> StateId {
        self.init
    }

    fn alphabet(&self) -> EventSet {
        self.alphabet
    }

    fn is_marked(&self, q: StateId) -> bool {
        let (qx, qy) = self.split(q);
        self.left.is_marked(qx) && self.right.is_marked(qy)
    }

    fn state_events(&self, q: StateId) -> EventSet {
        let (qx, qy) = self.split(q);
        let left = self.left.state_events(qx);
        let right = self.right.state_events(qy);
        (left & right) | (left & self.only_left) | (right & self.only_right)
    }

    fn trans(&self, q: StateId, event: Event) -> Option<StateId> {
        if !self.alphabet.test(event) {
            return None;
        }
        let (qx, qy) = self.split(q);
        if self.shared.test(event) {
            if self.left.contains_trans(qx, event) && self.right.contains_trans(qy, event) {
                let tx = self.left.trans(qx, event)?;
                let ty = self.right.trans(qy, event)?;
                Some(self.pair(tx, ty))
            } else {
                None
            }
        } else if self.only_left.test(event) {
            Some(self.pair(self.left.trans(qx, event)?, qy))
        } else {
            Some(self.pair(qx, self.right.trans(qy, event)?))
        }
    }

    fn inv_state_events(&self, q: StateId) -> EventSet {
        let (qx, qy) = self.split(q);
        let left = self.left.inv_state_events(qx);
        let right = self.right.inv_state_events(qy);
        (left & right) | (left & self.only_left) | (right & self.only_right)
    }

    fn inv_trans(&self, q: StateId, event: Event) -> Vec<StateId> {
        if !self.alphabet.test(event) {
            return Vec::new();
        }
        let (qx, qy) = self.split(q);
        if self.shared.test(event) {
            if self.left.contains_inv_trans(qx, event) && self.right.contains_inv_trans(qy, event)
            {
                let left_preds = self.left.inv_trans(qx, event);
                let right_preds = self.right.inv_trans(qy, event);
                let mut preds = Vec::with_capacity(left_preds.len() * right_preds.len());
                for &py in &right_preds {
                    for &px in &left_preds {
                        preds.push(self.pair(px, py));
                    }
                }
                preds
            } else {
                Vec::new()
            }
        } else if self.only_left.test(event) {
            self.left
                .inv_trans(qx, event)
                .into_iter()
                .map(|px| self.pair(px, qy))
                .collect()
        } else {
            self.right
                .inv_trans(qy, event)
                .into_iter()
                .map(|py| self.pair(qx, py))
                .collect()
        }
    }

    fn allocate_inverse(&self) {
        self.left.allocate_inverse();
        self.right.allocate_inverse();
    }

    fn clear_inverse(&self) {
        self.left.clear_inverse();
        self.right.clear_inverse();
    }
}

/// Compose two systems without materialising anything.
pub fn parallel_compose(
    left: Rc<dyn TransitionSystem>,
    right: Rc<dyn TransitionSystem>,
) -> Rc<Product> {
    Rc::new(Product::new(left, right))
}

/// Reduce a list of systems to a single one by stacking virtual products
/// pairwise, bottom-up.
///
/// Adjacent entries are paired per round; an odd leftover is carried through
/// unpaired. The tree is balanced to within one level and the same input
/// list always produces the same tree. Intermediate nodes stay alive through
/// shared ownership for as long as the root is used.
///
/// # Panics
///
/// Panics on an empty list.
pub fn reduce_tree(systems: Vec<Rc<dyn TransitionSystem>>) -> Rc<dyn TransitionSystem> {
    assert!(!systems.is_empty(), "Cannot reduce an empty list of systems");
    let mut level = systems;
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| match pair {
                [left, right] => {
                    Rc::new(Product::new(Rc::clone(left), Rc::clone(right))) as Rc<dyn TransitionSystem>
                }
                [carry] => Rc::clone(carry),
                _ => unreachable!(),
            })
            .collect();
    }
    level.pop().expect("Reduced list cannot be empty")
}

/// Turn a set of reached virtual states with their recorded outgoing
/// transitions into a concrete automaton.
///
/// Virtual ids are renumbered densely in ascending order. Transitions whose
/// target is not part of `states` are dropped. Returns the empty automaton
/// when the initial state is absent.
pub(crate) fn materialise(
    sync: &dyn TransitionSystem,
    states: &FxHashMap<StateId, Vec<(StateId, Event)>>,
) -> Automaton {
    if !states.contains_key(&sync.init()) {
        return Automaton::empty();
    }
    let mut virtual_ids: Vec<StateId> = states.keys().copied().collect();
    virtual_ids.sort_unstable();
    let rank: FxHashMap<StateId, StateId> = virtual_ids
        .iter()
        .enumerate()
        .map(|(i, &q)| (q, i as StateId))
        .collect();

    let marked: Vec<StateId> = virtual_ids
        .iter()
        .filter(|&&q| sync.is_marked(q))
        .map(|q| rank[q])
        .collect();
    let mut sys = Automaton::new(virtual_ids.len() as StateId, rank[&sync.init()], marked);
    for &q in &virtual_ids {
        for &(succ, event) in &states[&q] {
            if let Some(&to) = rank.get(&succ) {
                sys.set_transition(rank[&q], to, event);
            }
        }
    }
    sys
}

/// Eager parallel composition: walk the reachable part of the virtual
/// product and store it as a concrete automaton.
pub fn synchronize(
    left: Rc<dyn TransitionSystem>,
    right: Rc<dyn TransitionSystem>,
) -> Automaton {
    let sync = Product::new(left, right);
    let mut reached: FxHashMap<StateId, Vec<(StateId, Event)>> = FxHashMap::default();
    let mut frontier = vec![sync.init()];
    while let Some(q) = frontier.pop() {
        if reached.contains_key(&q) {
            continue;
        }
        reached.insert(q, Vec::new());
        let mut out = Vec::new();
        for event in sync.state_events(q) {
            let succ = sync
                .trans(q, event)
                .expect("enabled event must have a successor");
            if !reached.contains_key(&succ) {
                frontier.push(succ);
            }
            out.push((succ, event));
        }
        reached.insert(q, out);
    }
    materialise(&sync, &reached)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_set;

    // 0 --0--> 1, 1 --1--> 0, marked {0}
    fn machine(start: Event, finish: Event) -> Rc<dyn TransitionSystem> {
        let mut sys = Automaton::new(2, 0, [0]);
        sys.set_transition(0, 1, start);
        sys.set_transition(1, 0, finish);
        Rc::new(sys)
    }

    #[test]
    fn test_composition_rule() {
        // Shared event 1, private events 0 (left) and 2 (right)
        let sync = Product::new(machine(0, 1), machine(1, 2));
        assert_eq!(sync.n_states(), 4);
        assert_eq!(sync.init(), 0);
        assert_eq!(sync.alphabet(), event_set![0, 1, 2]);

        // (0, 0): left may start alone; shared 1 needs both sides
        assert_eq!(sync.state_events(0), event_set![0]);
        assert_eq!(sync.trans(0, 0), Some(1), "Private event moves left alone");
        assert_eq!(sync.trans(0, 1), None, "Shared event enabled on one side only");
        assert_eq!(sync.trans(0, 2), None);
        assert_eq!(sync.trans(0, 3), None, "Event outside the alphabet");

        // (1, 0): shared event 1 enabled on both sides, moves both to (0, 1)
        assert_eq!(sync.state_events(1), event_set![1]);
        assert_eq!(sync.trans(1, 1), Some(2));

        // (0, 1): right may finish alone on its private event 2
        assert_eq!(sync.state_events(2), event_set![0, 2]);
        assert_eq!(sync.trans(2, 2), Some(0));
        assert_eq!(sync.trans(2, 0), Some(3), "Left starts while right waits");

        // Product determinism and successor projection
        for q in 0..4 {
            for event in sync.state_events(q) {
                let succ = sync.trans(q, event).unwrap();
                let (qx, qy) = (q % 2, q / 2);
                if event == 1 {
                    assert_eq!(succ % 2, sync.left.trans(qx, event).unwrap());
                    assert_eq!(succ / 2, sync.right.trans(qy, event).unwrap());
                }
            }
        }
    }

    #[test]
    fn test_marked_pairs() {
        let sync = Product::new(machine(0, 1), machine(1, 2));
        assert!(sync.is_marked(0), "Both operands marked");
        assert!(!sync.is_marked(1));
        assert!(!sync.is_marked(2));
        assert!(!sync.is_marked(3));
    }

    #[test]
    fn test_inverse_through_product() {
        let sync = Product::new(machine(0, 1), machine(1, 2));
        sync.allocate_inverse();

        // Every reachable forward edge is found by the inverse queries
        let mut frontier = vec![sync.init()];
        let mut seen = vec![sync.init()];
        while let Some(q) = frontier.pop() {
            for event in sync.state_events(q) {
                let succ = sync.trans(q, event).unwrap();
                assert!(sync.contains_inv_trans(succ, event));
                assert!(sync.inv_trans(succ, event).contains(&q));
                if !seen.contains(&succ) {
                    seen.push(succ);
                    frontier.push(succ);
                }
            }
        }
        sync.clear_inverse();
    }

    #[test]
    fn test_nested_products() {
        let inner = parallel_compose(machine(0, 1), machine(2, 3));
        let sync = Product::new(inner, machine(4, 5));
        assert_eq!(sync.n_states(), 8);
        // All alphabets disjoint: everything interleaves freely
        assert_eq!(sync.state_events(0), event_set![0, 2, 4]);
        assert_eq!(sync.trans(0, 4), Some(4));
        assert_eq!(sync.trans(0, 2), Some(2));
        assert_eq!(sync.trans(2, 0), Some(3));
    }

    #[test]
    fn test_reduce_tree_deterministic() {
        let systems = || -> Vec<Rc<dyn TransitionSystem>> {
            vec![machine(0, 1), machine(2, 3), machine(4, 5)]
        };
        let a = reduce_tree(systems());
        let b = reduce_tree(systems());
        assert_eq!(a.n_states(), 8);
        assert_eq!(a.n_states(), b.n_states());
        assert_eq!(a.alphabet(), event_set![0, 1, 2, 3, 4, 5]);
        // Odd tail is carried through: ids encode ((m0 ‖ m1) ‖ m2)
        assert_eq!(a.trans(0, 4), Some(4));
        assert_eq!(b.trans(0, 4), Some(4));
    }

    #[test]
    fn test_reduce_tree_single() {
        let sys = reduce_tree(vec![machine(0, 1)]);
        assert_eq!(sys.n_states(), 2);
        assert_eq!(sys.trans(0, 0), Some(1));
    }

    #[test]
    fn test_synchronize_reachable_only() {
        // Identical operands move in lockstep: only the diagonal pairs
        // (0, 0) and (1, 1) of the four are reachable and materialised
        let sync = synchronize(machine(0, 1), machine(0, 1));
        assert_eq!(sync.n_states(), 2);
        assert_eq!(sync.trans(0, 0), Some(1), "Shared start moves both");
        assert_eq!(sync.trans(1, 1), Some(0), "Shared finish moves both");
        assert_eq!(sync.marked_states(), vec![0]);
    }

    #[test]
    fn test_synchronize_blocked_product() {
        // The right operand declares event 0 but never enables it, which
        // makes it shared and blocks the left machine from starting.
        let left = machine(0, 1);
        let mut right = Automaton::new(1, 0, [0]);
        right.insert_events(event_set![0]);
        let sync = synchronize(left, Rc::new(right));
        assert_eq!(sync.n_states(), 1);
        assert_eq!(sync.n_transitions(), 0);
        assert_eq!(sync.marked_states(), vec![0]);
    }
}
