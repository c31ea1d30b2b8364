//! Monolithic supervisor synthesis for Discrete-Event Systems.
//!
//! A DES is a finite automaton over an alphabet of discrete events, split
//! into controllable and uncontrollable events. Given a plant and a
//! specification, [`supervisor_synth`] computes the largest sub-automaton of
//! their parallel composition that never lets the specification disable an
//! uncontrollable plant event and in which every state reaches a marked
//! state.
//!
//! The composition is never materialised: [`Product`] exposes the transition
//! function of `P‖E` by querying its two operands on demand, so the synthesis
//! only ever touches reachable states. [`reduce_tree`] stacks products
//! pairwise to compose whole lists of plants and specifications.
//!
//! This follows the monolithic synthesis approach described by
//! Ramadge and Wonham in "The control of discrete event systems", 1989.

pub mod automaton;
pub mod events;
pub mod product;
pub mod synthesis;

pub use automaton::Automaton;
pub use events::{Event, EventSet, MAX_EVENTS};
pub use product::{parallel_compose, reduce_tree, synchronize, Product};
pub use synthesis::{supervisor_synth, supervisor_synth_many};

/// A state identifier. Virtual product ids multiply the operand state
/// counts, so they get the full 64 bits.
pub type StateId = u64;

/// Common transition query contract of concrete automata and virtual
/// products.
///
/// Deterministic on `(state, event)`: at most one successor exists for any
/// pair. The inverse direction is not deterministic. All queries return
/// `false`/`None`/empty for events outside [`alphabet`](Self::alphabet).
///
/// The inverse queries ([`inv_trans`](Self::inv_trans),
/// [`inv_state_events`](Self::inv_state_events)) require the inverse index,
/// a scoped resource: callers bracket their use with
/// [`allocate_inverse`](Self::allocate_inverse) and
/// [`clear_inverse`](Self::clear_inverse). Virtual products forward both
/// calls to their operands.
pub trait TransitionSystem {
    /// Number of states. States are ids in `[0, n_states)`.
    fn n_states(&self) -> StateId;

    /// The initial state.
    fn init(&self) -> StateId;

    /// All events of this system.
    fn alphabet(&self) -> EventSet;

    /// Whether `q` is a marked (accepting) state.
    fn is_marked(&self, q: StateId) -> bool;

    /// Events enabled at `q`.
    fn state_events(&self, q: StateId) -> EventSet;

    /// The unique successor of `q` on `event`, if any.
    fn trans(&self, q: StateId, event: Event) -> Option<StateId>;

    /// Events on which some state has a transition into `q`.
    ///
    /// # Panics
    ///
    /// Panics if the inverse index is not allocated.
    fn inv_state_events(&self, q: StateId) -> EventSet;

    /// All predecessors of `q` on `event`. May be empty.
    ///
    /// # Panics
    ///
    /// Panics if the inverse index is not allocated.
    fn inv_trans(&self, q: StateId, event: Event) -> Vec<StateId>;

    /// Build the inverse index. Idempotent.
    fn allocate_inverse(&self);

    /// Release the inverse index.
    fn clear_inverse(&self);

    /// Whether a transition `q --event--> q'` exists.
    fn contains_trans(&self, q: StateId, event: Event) -> bool {
        self.state_events(q).test(event)
    }

    /// Whether some state has a transition into `q` on `event`.
    ///
    /// # Panics
    ///
    /// Panics if the inverse index is not allocated.
    fn contains_inv_trans(&self, q: StateId, event: Event) -> bool {
        self.inv_state_events(q).test(event)
    }
}
