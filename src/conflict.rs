//! Reduce-reduce repair by lane tracing and state splitting.
//!
//! A lane walks backward from the state where reduces collide to the
//! kernel items whose lookahead originated the collision.  A conflict
//! groups the colliding reduces with one lane per reduce; conflicts are
//! duplicated once per distinct ancestor while walking back, and resolved
//! conflicts with mutually compatible lane lookaheads share one copy of
//! the split interior states.

use tracing::{info, warn};

use crate::grammar::Grammar;
use crate::lr0::{Collection, Target};
use crate::sets::IntSet;
use crate::sets::SymbolSet;

/// One step of a lane: a state and the items contributing lookahead.
#[derive(Debug, Clone)]
pub struct Lane {
    pub state: usize,
    pub items: IntSet,
}

/// A full lane with its accumulated spontaneous follow.
#[derive(Debug, Clone)]
pub struct TraceLane {
    pub complete: bool,
    pub lane: Vec<Lane>,
    pub follow: SymbolSet,
}

/// A reduce-reduce collision: one lane per involved reduce.
#[derive(Debug, Clone)]
pub struct Collision {
    pub lanes: Vec<TraceLane>,
    pub success: bool,
}

/// Finds all reduces in `state` whose lookahead sets intersect and seeds
/// the initial conflict with one lane per involved reduce.
fn find_conflict(grammar: &Grammar, collection: &Collection, state: usize) -> Collision {
    let items = &collection.states[state].items;
    let mut matches = IntSet::new();
    for i in 0..items.len() {
        if items[i].dot < grammar.productions[items[i].prod].length {
            continue;
        }
        for j in i + 1..items.len() {
            if items[j].dot < grammar.productions[items[j].prod].length {
                continue;
            }
            if items[i].lookahead.intersects(&items[j].lookahead) {
                warn!(
                    state,
                    "Reduce-Reduce conflict between {} and {}",
                    grammar.production_text(items[i].prod),
                    grammar.production_text(items[j].prod),
                );
                matches.insert(i);
                matches.insert(j);
            }
        }
    }

    let lanes = matches
        .iter()
        .map(|item| TraceLane {
            complete: false,
            lane: vec![Lane {
                state,
                items: IntSet::from_iter([item]),
            }],
            follow: items[item].follow.clone(),
        })
        .collect();
    Collision {
        lanes,
        success: false,
    }
}

/// True if the conflict's spontaneous follows alone already intersect
/// across lanes; such a collision cannot be repaired by splitting.
fn spontaneous_conflict(conflict: &Collision) -> bool {
    for i in 0..conflict.lanes.len() {
        for j in i + 1..conflict.lanes.len() {
            if conflict.lanes[i].follow.intersects(&conflict.lanes[j].follow) {
                return true;
            }
        }
    }
    false
}

/// Replaces the closure items at each lane head by the kernel items that
/// propagate lookahead to them; a head nothing propagates to completes
/// the lane.
fn kernel_items(collection: &Collection, conflict: &mut Collision) {
    for lane in &mut conflict.lanes {
        if lane.complete {
            continue;
        }
        let head = lane.lane.last().expect("lane is never empty");
        let state = head.state;
        let kernel_count = collection.states[state].kernel;

        let mut kernel = IntSet::new();
        for item in head.items.iter() {
            if item < kernel_count {
                kernel.insert(item);
                continue;
            }
            for k in 0..kernel_count {
                if collection.states[state].items[k]
                    .update
                    .iter()
                    .any(|t| t.state == state && t.item == item)
                {
                    kernel.insert(k);
                }
            }
        }

        if kernel.is_empty() {
            lane.complete = true;
        } else if kernel != head.items {
            lane.lane.push(Lane { state, items: kernel });
        }
    }
}

/// Walks every incomplete lane back to the previous states, duplicating
/// the enclosing conflict once per distinct ancestor.  A lane that
/// revisits a state is complete.
fn previous_states(collection: &Collection, conflicts: &mut Vec<Collision>) {
    let mut i = 0;
    while i < conflicts.len() {
        if conflicts[i].success {
            i += 1;
            continue;
        }

        // Every kernel item of a state has the same number of ancestors,
        // so any incomplete lane head will do for the count.
        let mut count = 0;
        for lane in &conflicts[i].lanes {
            if lane.complete {
                continue;
            }
            let head = lane.lane.last().expect("lane is never empty");
            let item = head.items.first().expect("lane head holds an item");
            count = collection.states[head.state].items[item].ancestors.len();
            break;
        }

        if count == 0 {
            for lane in &mut conflicts[i].lanes {
                lane.complete = true;
            }
            i += 1;
            continue;
        }

        // One duplicate conflict per additional ancestor, inserted after
        // the current one.
        for k in 1..count {
            let copy = conflicts[i].clone();
            conflicts.insert(i + k, copy);
        }

        let lane_count = conflicts[i].lanes.len();
        for j in 0..lane_count {
            if conflicts[i].lanes[j].complete {
                continue;
            }
            let (state, items) = {
                let head = conflicts[i].lanes[j].lane.last().unwrap();
                (head.state, head.items.clone())
            };
            for k in 0..count {
                let mut next_state = 0;
                let mut next_items = IntSet::new();
                let mut merged = conflicts[i + k].lanes[j].follow.clone();
                for item in items.iter() {
                    let ancestor = collection.states[state].items[item].ancestors[k];
                    next_state = ancestor.state;
                    next_items.insert(ancestor.item);
                    merged.union_with(
                        &collection.states[ancestor.state].items[ancestor.item].follow,
                    );
                }
                let lane = &mut conflicts[i + k].lanes[j];
                lane.follow = merged;
                // A previously visited state means the lane looped.
                if lane.lane.iter().any(|entry| entry.state == next_state) {
                    lane.complete = true;
                }
                lane.lane.push(Lane {
                    state: next_state,
                    items: next_items,
                });
            }
        }
        i += count;
    }
}

/// A lane's effective lookahead: accumulated spontaneous follow plus, for
/// an incomplete lane, the propagated lookahead of its head items.
fn lane_lookahead(collection: &Collection, lane: &TraceLane) -> SymbolSet {
    let mut lookahead = lane.follow.clone();
    if !lane.complete {
        let head = lane.lane.last().expect("lane is never empty");
        for item in head.items.iter() {
            lookahead.union_with(&collection.states[head.state].items[item].lookahead);
        }
    }
    lookahead
}

/// Marks conflicts whose lane lookaheads are now pairwise disjoint as
/// resolved.  Returns true while any conflict remains unresolved.
fn check_conflicts(collection: &Collection, conflicts: &mut [Collision]) -> bool {
    for conflict in conflicts.iter_mut() {
        if conflict.success {
            continue;
        }
        let lookaheads: Vec<SymbolSet> = conflict
            .lanes
            .iter()
            .map(|lane| lane_lookahead(collection, lane))
            .collect();
        let mut failure = false;
        'pairs: for i in 0..lookaheads.len() {
            for j in i + 1..lookaheads.len() {
                if lookaheads[i].intersects(&lookaheads[j]) {
                    failure = true;
                    break 'pairs;
                }
            }
        }
        if !failure {
            conflict.success = true;
        }
    }
    conflicts.iter().any(|c| !c.success)
}

/// Greedily merges conflicts whose per-lane lookaheads stay pairwise
/// disjoint when combined.  Returns the groups as sets of conflict
/// indices; enumeration order keeps the first-visited group on the
/// original states.
fn group_conflicts(collection: &Collection, conflicts: &[Collision]) -> Vec<IntSet> {
    let mut groups: Vec<IntSet> = (0..conflicts.len())
        .map(|i| IntSet::from_iter([i]))
        .collect();

    // All conflicts are duplicates of the initial one, so every conflict
    // has the same number of lanes.
    let count = conflicts[0].lanes.len();
    let mut lookaheads: Vec<Vec<SymbolSet>> = conflicts
        .iter()
        .map(|conflict| {
            conflict
                .lanes
                .iter()
                .map(|lane| lane_lookahead(collection, lane))
                .collect()
        })
        .collect();

    let mut changed = true;
    while changed {
        changed = false;
        'merge: for i in 0..groups.len() {
            for j in i + 1..groups.len() {
                let combined: Vec<SymbolSet> = (0..count)
                    .map(|k| lookaheads[i][k].union(&lookaheads[j][k]))
                    .collect();
                let mut failure = false;
                'pairs: for k in 0..count {
                    for l in k + 1..count {
                        if combined[k].intersects(&combined[l]) {
                            failure = true;
                            break 'pairs;
                        }
                    }
                }
                if failure {
                    continue;
                }
                let other = groups.remove(j);
                groups[i].union_with(&other);
                lookaheads[i] = combined;
                lookaheads.remove(j);
                changed = true;
                break 'merge;
            }
        }
    }
    groups
}

fn map_state(map: &[(usize, usize)], state: usize) -> usize {
    map.iter()
        .find(|&&(old, _)| old == state)
        .map(|&(_, new)| new)
        .unwrap_or(state)
}

/// Duplicates the shared interior states of each group's lanes and
/// retargets descendants, ancestors, updates, and gotos into the copies.
/// The first group to touch a state keeps the original.
fn copy_states(collection: &mut Collection, conflicts: &[Collision], groups: &[IntSet]) {
    let mut used = IntSet::new();
    let mut maps: Vec<Vec<(usize, usize)>> = vec![Vec::new(); groups.len()];

    for (g, group) in groups.iter().enumerate() {
        // All the interior states this group's lanes pass through; the
        // deepest lane entry is shared and never copied.
        let mut list = IntSet::new();
        for conflict in group.iter() {
            for lane in &conflicts[conflict].lanes {
                for entry in lane.lane.iter().rev().skip(1) {
                    list.insert(entry.state);
                }
            }
        }

        for state in list.iter() {
            if !used.insert(state) {
                // A previous group owns the original; this one copies it.
                let copy = clone_state(collection, state);
                maps[g].push((state, copy));
            }
        }
    }

    for (g, group) in groups.iter().enumerate() {
        if maps[g].is_empty() {
            continue;
        }
        for conflict in group.iter() {
            for lane in &conflicts[conflict].lanes {
                // The state at the end of the lane is shared; its edges
                // into copied states move to the copies, and the originals
                // lose the corresponding ancestor back-edges.
                let shared = lane.lane.last().expect("lane is never empty").state;
                retarget_state(collection, &maps[g], shared, true);

                let mut l = lane.lane.len() as isize - 2;
                while l >= 0 {
                    let state = map_state(&maps[g], lane.lane[l as usize].state);
                    retarget_state(collection, &maps[g], state, false);
                    // Consecutive identical lane states retarget once.
                    if l > 0 && map_state(&maps[g], lane.lane[l as usize - 1].state) == state {
                        l -= 1;
                    }
                    l -= 1;
                }
            }
        }
    }
}

/// Appends a copy of `state` with its own item storage.  The copy starts
/// with no ancestors and empty lookahead; propagation is rerun afterward.
fn clone_state(collection: &mut Collection, state: usize) -> usize {
    let mut copy = collection.states[state].clone();
    for item in &mut copy.items {
        item.ancestors.clear();
        item.lookahead.clear();
    }
    collection.states.push(copy);
    collection.states.len() - 1
}

/// Remaps the descendant, update, and goto targets of `state` through the
/// group's old-to-new map, moving ancestor back-edges with them.  When
/// `detach` is set the old target also loses its back-edge; copies were
/// never registered as ancestors, so deeper states skip the removal.
fn retarget_state(
    collection: &mut Collection,
    map: &[(usize, usize)],
    state: usize,
    detach: bool,
) {
    for l in 0..collection.states[state].items.len() {
        let old = collection.states[state].items[l].descendant;
        if !old.is_none() {
            let new = map_state(map, old.state);
            if new != old.state {
                collection.states[state].items[l].descendant = Target {
                    state: new,
                    item: old.item,
                };
                collection.states[new].items[old.item]
                    .ancestors
                    .push(Target { state, item: l });
                if detach {
                    collection.states[old.state].items[old.item]
                        .ancestors
                        .retain(|a| !(a.state == state && a.item == l));
                }
            }
        }
        if l < collection.states[state].kernel {
            for target in &mut collection.states[state].items[l].update {
                target.state = map_state(map, target.state);
            }
        }
    }
    for entry in &mut collection.states[state].gotos {
        entry.state = map_state(map, entry.state);
    }
}

/// Attempts to repair the reduce-reduce conflict in `state` by splitting
/// states.  Returns true when the machine was altered and lookahead
/// propagation must rerun.
pub fn split_states(grammar: &Grammar, collection: &mut Collection, state: usize) -> bool {
    let mut conflicts = vec![find_conflict(grammar, collection, state)];

    if !grammar.options.split_states {
        return false;
    }

    let mut failure = false;
    loop {
        for conflict in conflicts.iter().filter(|c| !c.success) {
            if spontaneous_conflict(conflict) {
                failure = true;
                break;
            }
        }
        if failure {
            break;
        }
        for conflict in conflicts.iter_mut().filter(|c| !c.success) {
            kernel_items(collection, conflict);
        }
        previous_states(collection, &mut conflicts);
        if !check_conflicts(collection, &mut conflicts) {
            break;
        }
    }

    if failure {
        warn!(state, "Reduce-Reduce conflict cannot be resolved");
        return false;
    }

    let groups = group_conflicts(collection, &conflicts);
    for (index, group) in groups.iter().enumerate() {
        if group.len() > 1 {
            info!(
                "conflict resolutions {:?} are compatible and share group {}",
                group.iter().map(|i| i + 1).collect::<Vec<_>>(),
                index + 1
            );
        }
    }
    let before = collection.states.len();
    copy_states(collection, &conflicts, &groups);
    if collection.states.len() == before {
        // Splitting made no progress; the conflict cannot be repaired.
        warn!(state, "state splitting made no progress");
        return false;
    }
    info!(state, "Reduce-Reduce conflict has been resolved");
    true
}
