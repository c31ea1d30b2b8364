//! Concrete finite automata with sparse transition storage.

use std::cell::RefCell;
use std::collections::VecDeque;

use log::debug;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::events::{Event, EventSet};
use crate::{StateId, TransitionSystem};

#[cfg(feature = "serde")]
#[derive(serde::Serialize, serde::Deserialize)]
struct SerdeAutomaton {
    n_states: StateId,
    init: StateId,
    marked: Vec<StateId>,
    alphabet: EventSet,
    transitions: Vec<(StateId, StateId, EventSet)>,
}

#[cfg(feature = "serde")]
impl From<Automaton> for SerdeAutomaton {
    fn from(sys: Automaton) -> Self {
        let mut transitions: Vec<_> = sys.transitions().collect();
        transitions.sort_unstable_by_key(|&(from, to, _)| (from, to));
        let mut marked: Vec<StateId> = sys.marked.iter().copied().collect();
        marked.sort_unstable();
        Self {
            n_states: sys.n_states,
            init: sys.init,
            marked,
            alphabet: sys.alphabet,
            transitions,
        }
    }
}

#[cfg(feature = "serde")]
impl TryFrom<SerdeAutomaton> for Automaton {
    type Error = &'static str;

    fn try_from(de: SerdeAutomaton) -> Result<Self, Self::Error> {
        if de.n_states == 0 {
            if !de.marked.is_empty() || !de.transitions.is_empty() {
                return Err("empty automaton with marked states or transitions");
            }
            return Ok(Automaton::empty());
        }
        if de.init >= de.n_states {
            return Err("initial state out of range");
        }
        if de.marked.iter().any(|&q| q >= de.n_states) {
            return Err("marked state out of range");
        }
        let mut state_events = vec![EventSet::empty(); de.n_states as usize];
        for &(from, to, events) in &de.transitions {
            if from >= de.n_states || to >= de.n_states {
                return Err("transition endpoint out of range");
            }
            if events.is_empty() {
                return Err("transition with empty event set");
            }
            if (state_events[from as usize] & events).any() {
                return Err("nondeterministic transitions");
            }
            state_events[from as usize] |= events;
        }
        let enabled = state_events
            .iter()
            .fold(EventSet::empty(), |acc, &events| acc | events);
        if enabled & de.alphabet != enabled {
            return Err("alphabet is missing transition events");
        }

        let mut sys = Automaton::new(de.n_states, de.init, de.marked);
        for (from, to, events) in de.transitions {
            for event in events.iter() {
                sys.set_transition(from, to, event);
            }
        }
        sys.insert_events(de.alphabet);
        Ok(sys)
    }
}

// Transpose of the forward transition relation, built on demand.
#[derive(Debug, Clone)]
struct Inverse {
    // to -> (from -> events)
    backward: Vec<FxHashMap<StateId, EventSet>>,
    // Events on which each state is entered
    state_events: Vec<EventSet>,
}

/// A stored finite automaton over a bitset-encoded event alphabet.
///
/// Transitions are kept as a sparse row map `from -> (to -> EventSet)`
/// together with a cached per-state enabled-event set. The transpose of the
/// relation is built on demand by [`allocate_inverse`](Self::allocate_inverse)
/// and dropped again by [`clear_inverse`](Self::clear_inverse); any mutation
/// invalidates it.
///
/// The alphabet accumulates from inserted transitions and may be extended
/// beyond them with [`insert_events`](Self::insert_events), e.g. for a
/// specification that knows an event but never enables it.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "SerdeAutomaton", into = "SerdeAutomaton"))]
pub struct Automaton {
    n_states: StateId,
    init: StateId,
    marked: FxHashSet<StateId>,
    alphabet: EventSet,
    // from -> (to -> events); empty event sets are never stored
    forward: Vec<FxHashMap<StateId, EventSet>>,
    state_events: Vec<EventSet>,
    inverse: RefCell<Option<Inverse>>,
}

impl Automaton {
    /// Create an automaton with `n_states` states and no transitions.
    ///
    /// # Panics
    ///
    /// Panics if `init` or a marked state is not below `n_states`.
    pub fn new(
        n_states: StateId,
        init: StateId,
        marked: impl IntoIterator<Item = StateId>,
    ) -> Self {
        assert!(init < n_states, "Initial state out of range");
        let marked: FxHashSet<StateId> = marked.into_iter().collect();
        assert!(
            marked.iter().all(|&q| q < n_states),
            "Marked state out of range"
        );
        Automaton {
            n_states,
            init,
            marked,
            alphabet: EventSet::empty(),
            forward: vec![FxHashMap::default(); n_states as usize],
            state_events: vec![EventSet::empty(); n_states as usize],
            inverse: RefCell::new(None),
        }
    }

    /// The automaton with no states at all. This is the result of a
    /// synthesis whose initial state does not survive; it has no valid
    /// initial state and accepts nothing.
    pub fn empty() -> Self {
        Automaton {
            n_states: 0,
            init: 0,
            marked: FxHashSet::default(),
            alphabet: EventSet::empty(),
            forward: Vec::new(),
            state_events: Vec::new(),
            inverse: RefCell::new(None),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.n_states == 0
    }

    /// Add the transition `from --event--> to`.
    ///
    /// Repeating an existing transition is a no-op.
    ///
    /// # Panics
    ///
    /// Panics if a state id is out of range or if `from` already leaves on
    /// `event` towards a different state.
    pub fn set_transition(&mut self, from: StateId, to: StateId, event: Event) {
        assert!(from < self.n_states, "Source state out of range");
        assert!(to < self.n_states, "Target state out of range");
        if self.state_events[from as usize].test(event) {
            let existing = self
                .trans(from, event)
                .expect("enabled event must have a successor");
            assert!(
                existing == to,
                "Nondeterministic transition: state {from} already leaves on event {event}"
            );
            return;
        }
        self.forward[from as usize]
            .entry(to)
            .or_default()
            .insert(event);
        self.state_events[from as usize].insert(event);
        self.alphabet.insert(event);
        *self.inverse.borrow_mut() = None;
    }

    /// Extend the alphabet beyond the events appearing on transitions.
    pub fn insert_events(&mut self, events: EventSet) {
        self.alphabet |= events;
        *self.inverse.borrow_mut() = None;
    }

    /// Marked states in ascending order.
    pub fn marked_states(&self) -> Vec<StateId> {
        let mut marked: Vec<StateId> = self.marked.iter().copied().collect();
        marked.sort_unstable();
        marked
    }

    /// All transitions as `(from, to, events)` entries, one per connected
    /// state pair.
    pub fn transitions(&self) -> impl Iterator<Item = (StateId, StateId, EventSet)> + '_ {
        self.forward.iter().enumerate().flat_map(|(from, row)| {
            row.iter()
                .map(move |(&to, &events)| (from as StateId, to, events))
        })
    }

    /// Number of connected state pairs.
    pub fn n_transitions(&self) -> usize {
        self.forward.iter().map(|row| row.len()).sum()
    }

    /// States reachable from the initial state (forward search).
    pub fn accessible(&self) -> FxHashSet<StateId> {
        let mut visited = FxHashSet::default();
        if self.is_empty() {
            return visited;
        }
        let mut frontier = VecDeque::from([self.init]);
        visited.insert(self.init);
        while let Some(q) = frontier.pop_front() {
            for &to in self.forward[q as usize].keys() {
                if visited.insert(to) {
                    frontier.push_back(to);
                }
            }
        }
        visited
    }

    /// States from which a marked state is reachable (backward search).
    pub fn coaccessible(&self) -> FxHashSet<StateId> {
        let mut reverse = vec![Vec::new(); self.n_states as usize];
        for (from, row) in self.forward.iter().enumerate() {
            for &to in row.keys() {
                reverse[to as usize].push(from as StateId);
            }
        }

        let mut visited: FxHashSet<StateId> = self.marked.iter().copied().collect();
        let mut frontier: VecDeque<StateId> = self.marked.iter().copied().collect();
        while let Some(q) = frontier.pop_front() {
            for &from in &reverse[q as usize] {
                if visited.insert(from) {
                    frontier.push_back(from);
                }
            }
        }
        visited
    }

    /// The accessible and coaccessible states, ascending.
    pub fn trim_states(&self) -> Vec<StateId> {
        let accessible = self.accessible();
        let coaccessible = self.coaccessible();
        let mut keep: Vec<StateId> = accessible.intersection(&coaccessible).copied().collect();
        keep.sort_unstable();
        keep
    }

    /// Restrict to the trim part, renumbering states to stay contiguous.
    ///
    /// Returns the automaton unchanged when every state is already trim. If
    /// the initial state is not coaccessible the result is the empty
    /// automaton.
    pub fn trim(self) -> Automaton {
        let keep = self.trim_states();
        if keep.len() as StateId == self.n_states {
            return self;
        }
        debug!(
            "trim keeps {}/{} states",
            keep.len(),
            self.n_states
        );
        if keep.binary_search(&self.init).is_err() {
            return Automaton::empty();
        }

        let rank: FxHashMap<StateId, StateId> = keep
            .iter()
            .enumerate()
            .map(|(i, &q)| (q, i as StateId))
            .collect();
        let marked = keep
            .iter()
            .filter(|q| self.marked.contains(*q))
            .map(|q| rank[q]);
        let mut sys = Automaton::new(keep.len() as StateId, rank[&self.init], marked);
        for &from in &keep {
            for (&to, &events) in &self.forward[from as usize] {
                if let Some(&to_mapped) = rank.get(&to) {
                    for event in events.iter() {
                        sys.set_transition(rank[&from], to_mapped, event);
                    }
                }
            }
        }
        sys.insert_events(self.alphabet);
        sys
    }
}

// The inverse index is a cache, not part of the automaton's identity.
impl PartialEq for Automaton {
    fn eq(&self, other: &Self) -> bool {
        self.n_states == other.n_states
            && self.init == other.init
            && self.marked == other.marked
            && self.alphabet == other.alphabet
            && self.forward == other.forward
    }
}

impl Eq for Automaton {}

impl TransitionSystem for Automaton {
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
        self.marked.contains(&q)
    }

    fn state_events(&self, q: StateId) -> EventSet {
        self.state_events[q as usize]
    }

    fn trans(&self, q: StateId, event: Event) -> Option<StateId> {
        if !self.alphabet.test(event) {
            return None;
        }
        self.forward[q as usize]
            .iter()
            .find(|(_, events)| events.test(event))
            .map(|(&to, _)| to)
    }

    fn inv_state_events(&self, q: StateId) -> EventSet {
        self.inverse
            .borrow()
            .as_ref()
            .expect("inverse index not allocated")
            .state_events[q as usize]
    }

    fn inv_trans(&self, q: StateId, event: Event) -> Vec<StateId> {
        if !self.alphabet.test(event) {
            return Vec::new();
        }
        let inverse = self.inverse.borrow();
        let inverse = inverse.as_ref().expect("inverse index not allocated");
        let mut preds: Vec<StateId> = inverse.backward[q as usize]
            .iter()
            .filter(|(_, events)| events.test(event))
            .map(|(&from, _)| from)
            .collect();
        preds.sort_unstable();
        preds
    }

    fn allocate_inverse(&self) {
        let mut inverse = self.inverse.borrow_mut();
        if inverse.is_some() {
            return;
        }
        let mut backward = vec![FxHashMap::default(); self.n_states as usize];
        let mut state_events = vec![EventSet::empty(); self.n_states as usize];
        for (from, row) in self.forward.iter().enumerate() {
            for (&to, &events) in row {
                *backward[to as usize].entry(from as StateId).or_default() |= events;
                state_events[to as usize] |= events;
            }
        }
        *inverse = Some(Inverse {
            backward,
            state_events,
        });
    }

    fn clear_inverse(&self) {
        *self.inverse.borrow_mut() = None;
    }
}
