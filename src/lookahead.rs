//! LALR(1) lookahead computation.
//!
//! The standard two-pass scheme: phase A seeds each kernel item's follow
//! set with a unique marker symbol, runs spontaneous FIRST-of-remainder
//! generation to a fixed point inside each state, and reads the surviving
//! markers back off to discover the propagation graph.  Phase B initializes
//! lookaheads from the spontaneous follows and iterates the propagation
//! edges to a fixed point.

use crate::grammar::{FirstSets, Grammar};
use crate::lr0::{Collection, Target};
use crate::sets::SymbolSet;

/// Phase A: spontaneous follow generation and update-edge discovery.
pub fn setup_lookahead(grammar: &mut Grammar, collection: &mut Collection, first: &FirstSets) {
    for state in 1..collection.states.len() {
        let saved = grammar.symbols.len();
        let kernel = collection.states[state].kernel;

        // Give each kernel item a unique follow marker to identify it.
        let mut markers = Vec::with_capacity(kernel);
        for j in 0..kernel {
            let marker = grammar.symbols.alloc_marker();
            collection.states[state].items[j].follow.insert(marker);
            markers.push(marker);
        }

        // Propagate spontaneous follow sets throughout this item set.
        let mut changed = true;
        while changed {
            changed = false;
            for j in 0..collection.states[state].items.len() {
                let (prod, dot) = {
                    let item = &collection.states[state].items[j];
                    (item.prod, item.dot)
                };
                if dot >= grammar.productions[prod].length {
                    continue;
                }
                let next = grammar.productions[prod].rhs[dot];
                if !grammar.symbols.is_nonterminal(next) {
                    continue;
                }

                // FIRST of the remainder of the right hand side, chaining
                // through nullable tokens; a fully nullable remainder pulls
                // in the item's own follow (markers included).
                let mut follow = SymbolSet::new();
                let mut k = dot + 1;
                while k < grammar.productions[prod].length {
                    let token = grammar.token(grammar.productions[prod].rhs[k]);
                    if token != 0 {
                        follow.union_with(first.first(token));
                        if !first.nullable(token) {
                            break;
                        }
                    }
                    k += 1;
                }
                if k >= grammar.productions[prod].length {
                    follow.union_with(&collection.states[state].items[j].follow);
                }

                let next_token = grammar.token(next);
                for k in kernel..collection.states[state].items.len() {
                    let target_prod = collection.states[state].items[k].prod;
                    if grammar.token(grammar.productions[target_prod].lhs) == next_token
                        && collection.states[state].items[k].follow.union_with(&follow)
                    {
                        changed = true;
                    }
                }
            }
        }

        // Read the markers back off: every closure item holding kernel
        // item j's marker receives propagated lookahead from j.
        for j in 0..kernel {
            let descendant = collection.states[state].items[j].descendant;
            if !descendant.is_none() {
                collection.states[state].items[j].update.push(descendant);
            }
            for k in kernel..collection.states[state].items.len() {
                if !collection.states[state].items[k].follow.remove(markers[j]) {
                    continue;
                }
                collection.states[state].items[j]
                    .update
                    .push(Target { state, item: k });

                // A marked closure item with a goto receives its lookahead
                // through the kernel item as well.
                let target = collection.states[state].items[k].descendant;
                if !target.is_none()
                    && !(target.state == state && target.item == j)
                    && !collection.states[state].items[j].update.contains(&target)
                {
                    collection.states[state].items[j].update.push(target);
                }
            }
            collection.states[state].items[j].follow.remove(markers[j]);
        }
        grammar.symbols.truncate(saved);
    }
}

/// Phase B: fixed-point lookahead propagation.  Also run standalone after
/// state splitting alters the machine.
pub fn propagate_lookahead(grammar: &Grammar, collection: &mut Collection) {
    for state in 1..collection.states.len() {
        for item in &mut collection.states[state].items {
            item.lookahead.clear();
        }
    }

    // Every item starts from its spontaneous follow set, which also flows
    // across the descendant edge into the goto state.
    for state in 1..collection.states.len() {
        for j in 0..collection.states[state].items.len() {
            if collection.states[state].items[j].follow.is_empty() {
                continue;
            }
            let follow = collection.states[state].items[j].follow.clone();
            collection.states[state].items[j].lookahead.union_with(&follow);
            let descendant = collection.states[state].items[j].descendant;
            if !descendant.is_none() {
                collection.states[descendant.state].items[descendant.item]
                    .lookahead
                    .union_with(&follow);
            }
        }
    }

    // The start state's initial item is followed by end of file.
    collection.states[1].items[0]
        .lookahead
        .insert(grammar.sentinel);

    // Collect the propagation edges once; they are stable during phase B.
    let mut edges = Vec::new();
    for state in 1..collection.states.len() {
        for j in 0..collection.states[state].kernel {
            for &target in &collection.states[state].items[j].update {
                edges.push((Target { state, item: j }, target));
            }
        }
    }

    let mut changed = true;
    while changed {
        changed = false;
        for &(source, target) in &edges {
            let lookahead = collection.states[source.state].items[source.item]
                .lookahead
                .clone();
            if collection.states[target.state].items[target.item]
                .lookahead
                .union_with(&lookahead)
            {
                changed = true;
            }
        }
    }
}
