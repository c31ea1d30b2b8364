use std::rc::Rc;

use log::{debug, trace};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::automaton::Automaton;
use crate::events::{Event, EventSet};
use crate::product::{materialise, reduce_tree, Product};
use crate::{StateId, TransitionSystem};

/// Compute the monolithic supervisor of `plant` under `spec`.
///
/// Walks the virtual composition `plant ‖ spec` depth-first from its initial
/// state. A state where the specification disables an uncontrollable event
/// demanded by the plant is *bad*: it is removed together with its closure
/// under uncontrollable predecessors, since no supervisor can prevent an
/// uncontrollable step into a bad state. Surviving states and transitions
/// are then materialised into a concrete automaton and trimmed to the
/// accessible, coaccessible part.
///
/// `non_contr` is the set of uncontrollable event ids. Events in it that do
/// not occur in the plant alphabet are ignored.
///
/// Returns the empty automaton when the initial state itself is bad or
/// cannot reach a marked state; callers must handle this outcome.
pub fn supervisor_synth(
    plant: Rc<dyn TransitionSystem>,
    spec: Rc<dyn TransitionSystem>,
    non_contr: EventSet,
) -> Automaton {
    let plant_ref = Rc::clone(&plant);
    let n_plant = plant_ref.n_states();
    let sync = Product::new(plant, spec);

    // Uncontrollable events that actually occur in the plant, and of those,
    // the ones visible in the composition.
    let ncbit_plant = non_contr & plant_ref.alphabet();
    let ncbit_sync = ncbit_plant & sync.alphabet();

    // Inverse transitions drive the bad-state propagation
    sync.allocate_inverse();

    let mut survivors: FxHashMap<StateId, Vec<(StateId, Event)>> = FxHashMap::default();
    let mut killed: FxHashSet<StateId> = FxHashSet::default();
    let mut frontier = vec![sync.init()];

    while let Some(q) = frontier.pop() {
        if killed.contains(&q) || survivors.contains_key(&q) {
            continue;
        }

        let qx = q % n_plant;
        let required = ncbit_plant & plant_ref.state_events(qx);
        let q_events = sync.state_events(q);

        if required & q_events != required {
            // The spec disables an uncontrollable plant event here
            trace!("bad state {q}: plant demands {:?}, composition allows {:?}",
                required, required & q_events);
            kill(&sync, q, ncbit_sync, &mut survivors, &mut killed);
            continue;
        }

        survivors.insert(q, Vec::new());
        let mut out = Vec::new();
        for event in q_events {
            let succ = sync
                .trans(q, event)
                .expect("enabled event must have a successor");
            if !killed.contains(&succ) && !survivors.contains_key(&succ) {
                frontier.push(succ);
            }
            // Recorded even if the target is already killed; the
            // materialiser filters dangling entries
            out.push((succ, event));
        }
        survivors.insert(q, out);
    }

    sync.clear_inverse();
    debug!(
        "synthesis visited {} surviving and {} killed states of {} virtual ones",
        survivors.len(),
        killed.len(),
        sync.n_states()
    );

    materialise(&sync, &survivors).trim()
}

// Remove `q0` and every state that can reach it through uncontrollable
// events alone. Such predecessors cannot be kept: the supervisor has no way
// to disable the offending step.
fn kill(
    sync: &Product,
    q0: StateId,
    ncbit: EventSet,
    survivors: &mut FxHashMap<StateId, Vec<(StateId, Event)>>,
    killed: &mut FxHashSet<StateId>,
) {
    let mut stack = vec![q0];
    killed.insert(q0);

    while let Some(x) = stack.pop() {
        let back_events = sync.inv_state_events(x) & ncbit;
        for event in back_events {
            for pred in sync.inv_trans(x, event) {
                if killed.insert(pred) {
                    stack.push(pred);
                    survivors.remove(&pred);
                }
            }
        }
    }
}

/// Synthesize the supervisor for whole lists of plants and specifications.
///
/// Both lists are folded into one virtual system each with
/// [`reduce_tree`], then handed to [`supervisor_synth`]. Nothing is
/// materialised before the synthesis itself.
///
/// # Panics
///
/// Panics if either list is empty.
pub fn supervisor_synth_many(
    plants: Vec<Rc<dyn TransitionSystem>>,
    specs: Vec<Rc<dyn TransitionSystem>>,
    non_contr: EventSet,
) -> Automaton {
    let plant = reduce_tree(plants);
    let spec = reduce_tree(specs);
    supervisor_synth(plant, spec, non_contr)
}
