//! Canonical LR(0) collection and goto graph.
//!
//! States and the items inside them are addressed by index; every
//! cross-edge between items is a `(state, item)` pair so states can be
//! duplicated cheaply when reduce-reduce repair splits them.  State 0 is
//! reserved as "no state" and state 1 holds the augmented start item.

use crate::grammar::Grammar;
use crate::sets::SymbolSet;

/// A `(state, item)` cross-reference.  `state == 0` means none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Target {
    pub state: usize,
    pub item: usize,
}

impl Target {
    #[inline]
    pub const fn is_none(self) -> bool {
        self.state == 0
    }
}

/// An LR(0) item plus the bookkeeping the LALR phases hang off it.
/// `ancestors` and `update` are populated for kernel items only.
#[derive(Debug, Clone, Default)]
pub struct Item {
    pub prod: usize,
    pub dot: usize,
    /// Kernel item in the goto state this item creates by shifting.
    pub descendant: Target,
    /// Spontaneously generated follow set.
    pub follow: SymbolSet,
    /// Spontaneous plus propagated lookahead.
    pub lookahead: SymbolSet,
    /// Items in other states which created this kernel item by shift.
    pub ancestors: Vec<Target>,
    /// Items to which this kernel item propagates lookahead.
    pub update: Vec<Target>,
}

/// A goto edge out of a state.
#[derive(Debug, Clone, Copy)]
pub struct GotoEntry {
    pub token: i32,
    pub state: usize,
}

/// One state of the characteristic finite state machine.  The first
/// `kernel` entries of `items` are the kernel; their order matters when
/// error repair tables are requested.
#[derive(Debug, Clone, Default)]
pub struct State {
    pub items: Vec<Item>,
    pub kernel: usize,
    pub gotos: Vec<GotoEntry>,
}

/// The canonical collection.  `states[0]` is a reserved placeholder.
#[derive(Debug, Default)]
pub struct Collection {
    pub states: Vec<State>,
}

impl Collection {
    #[inline]
    pub fn len(&self) -> usize {
        self.states.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.states.len() <= 1
    }

    /// Builds the LR(0) collection and goto graph for a grammar.
    pub fn build(grammar: &Grammar) -> Collection {
        let mut collection = Collection {
            states: vec![State::default()],
        };

        // State 1 has one kernel item: the augmented production with the
        // dot on the left.
        let mut start = State::default();
        start.items.push(Item {
            prod: 1,
            dot: 0,
            ..Item::default()
        });
        start.kernel = 1;
        collection.states.push(start);
        apply_closure(grammar, &mut collection, 1, 0);

        // Create the goto states for every itemset in the collection.
        // The collection grows while this loop runs.
        let mut state = 1;
        while state < collection.states.len() {
            for token in 1..=(grammar.term_count + grammar.nonterm_count) as i32 {
                let mut count = 0;
                let mut found = 0;
                for (index, item) in collection.states[state].items.iter().enumerate() {
                    if item.dot < grammar.productions[item.prod].length
                        && grammar.token(grammar.productions[item.prod].rhs[item.dot]) == token
                    {
                        found = index;
                        count += 1;
                    }
                }
                if count == 0 {
                    continue;
                }
                // A lone dot before the final token collapses into a
                // shiftreduce action and needs no goto state.
                let item = &collection.states[state].items[found];
                if grammar.options.default_reduce
                    && count == 1
                    && item.dot == grammar.productions[item.prod].length - 1
                {
                    continue;
                }
                let target = lookup_goto(grammar, &mut collection, state, token);
                collection.states[state].gotos.push(GotoEntry {
                    token,
                    state: target,
                });
            }
            state += 1;
        }
        collection
    }
}

/// Advances the dot past `position`, skipping epsilon terminals.
fn skip_empties(grammar: &Grammar, prod: usize, mut dot: usize) -> usize {
    let rhs = &grammar.productions[prod].rhs;
    while dot < rhs.len() && grammar.symbols.is_empty_terminal(rhs[dot]) {
        dot += 1;
    }
    dot
}

/// Closes the itemset of `state` starting at item `index`.  When error
/// repair tables are requested closure is depth first: each freshly added
/// item is closed before its siblings, which pins down the first item of
/// every state for continuation-token selection.
pub fn apply_closure(grammar: &Grammar, collection: &mut Collection, state: usize, index: usize) {
    let mut i = index;
    while i < collection.states[state].items.len() {
        let prod = collection.states[state].items[i].prod;
        let dot = collection.states[state].items[i].dot;

        if dot < grammar.productions[prod].length {
            let sym = grammar.productions[prod].rhs[dot];
            if grammar.symbols.is_nonterminal(sym) {
                for j in grammar.alternatives(sym) {
                    let kernel = collection.states[state].kernel;
                    let present = collection.states[state].items[kernel..]
                        .iter()
                        .any(|item| item.prod == j);
                    if present {
                        continue;
                    }
                    let start = skip_empties(grammar, j, 0);
                    collection.states[state].items.push(Item {
                        prod: j,
                        dot: start,
                        ..Item::default()
                    });
                    if grammar.options.error_repair {
                        let last = collection.states[state].items.len() - 1;
                        apply_closure(grammar, collection, state, last);
                    }
                }
            }
        }
        i += 1;
    }
}

/// Kernel equality for goto lookup.  With error repair requested the items
/// must match positionally; otherwise the kernels compare as sets.
fn itemset_equal(
    grammar: &Grammar,
    existing: &[Item],
    kernel: usize,
    candidate: &[(usize, usize)],
) -> bool {
    if kernel != candidate.len() {
        return false;
    }
    if grammar.options.error_repair {
        existing[..kernel]
            .iter()
            .zip(candidate)
            .all(|(item, &(prod, dot))| item.prod == prod && item.dot == dot)
    } else {
        candidate.iter().all(|&(prod, dot)| {
            existing[..kernel]
                .iter()
                .any(|item| item.prod == prod && item.dot == dot)
        })
    }
}

/// Finds or creates the goto state of `state` on `token`, recording
/// descendant and ancestor cross-edges on the way.
fn lookup_goto(
    grammar: &Grammar,
    collection: &mut Collection,
    state: usize,
    token: i32,
) -> usize {
    // Build the candidate kernel by advancing the dot over the token.
    let mut candidate = Vec::new();
    for item in &collection.states[state].items {
        let prod = item.prod;
        if item.dot < grammar.productions[prod].length
            && grammar.token(grammar.productions[prod].rhs[item.dot]) == token
        {
            candidate.push((prod, skip_empties(grammar, prod, item.dot + 1)));
        }
    }

    // Reuse a matching state if one exists.
    let mut target = 0;
    for i in 2..collection.states.len() {
        if itemset_equal(
            grammar,
            &collection.states[i].items,
            collection.states[i].kernel,
            &candidate,
        ) {
            target = i;
            break;
        }
    }
    if target == 0 {
        let mut fresh = State::default();
        for &(prod, dot) in &candidate {
            fresh.items.push(Item {
                prod,
                dot,
                ..Item::default()
            });
        }
        fresh.kernel = fresh.items.len();
        collection.states.push(fresh);
        target = collection.states.len() - 1;
        apply_closure(grammar, collection, target, 0);
    }

    // Link descendants and ancestors between the two states.
    for j in 0..collection.states[state].items.len() {
        let (prod, dot) = {
            let item = &collection.states[state].items[j];
            (item.prod, item.dot)
        };
        if dot < grammar.productions[prod].length
            && grammar.token(grammar.productions[prod].rhs[dot]) == token
        {
            let advanced = skip_empties(grammar, prod, dot + 1);
            let kernel = collection.states[target].kernel;
            let k = collection.states[target].items[..kernel]
                .iter()
                .position(|item| item.prod == prod && item.dot == advanced)
                .unwrap_or(0);
            collection.states[state].items[j].descendant = Target { state: target, item: k };
            collection.states[target].items[k]
                .ancestors
                .push(Target { state, item: j });
        }
    }
    target
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::GrammarBuilder;

    fn expr_grammar(error_repair: bool) -> Grammar {
        // S -> S "+" T | T ; T -> T "*" F | F ; F -> "(" S ")" | "i"
        let mut builder = GrammarBuilder::new();
        let plus = builder.terminal("+");
        let star = builder.terminal("*");
        let lp = builder.terminal("(");
        let rp = builder.terminal(")");
        let i = builder.terminal("i");
        let s = builder.nonterminal("S");
        let t = builder.nonterminal("T");
        let f = builder.nonterminal("F");
        builder.production(s, &[s, plus, t], 0);
        builder.production(s, &[t], 0);
        builder.production(t, &[t, star, f], 0);
        builder.production(t, &[f], 0);
        builder.production(f, &[lp, s, rp], 0);
        builder.production(f, &[i], 0);
        builder.start(s);
        builder.options().error_repair = error_repair;
        builder.finish().unwrap()
    }

    #[test]
    fn start_state_is_one() {
        let grammar = expr_grammar(false);
        let collection = Collection::build(&grammar);
        assert!(collection.len() > 2);
        assert_eq!(collection.states[1].kernel, 1);
        assert_eq!(collection.states[1].items[0].prod, 1);
        assert_eq!(collection.states[1].items[0].dot, 0);
    }

    #[test]
    fn goto_kernels_match_closure_of_advance() {
        let grammar = expr_grammar(false);
        let collection = Collection::build(&grammar);
        for state in 1..collection.len() {
            for entry in &collection.states[state].gotos {
                // Every goto target kernel holds exactly the items of the
                // source advanced over the edge token.
                let advanced: Vec<(usize, usize)> = collection.states[state]
                    .items
                    .iter()
                    .filter(|item| {
                        item.dot < grammar.productions[item.prod].length
                            && grammar.token(grammar.productions[item.prod].rhs[item.dot])
                                == entry.token
                    })
                    .map(|item| (item.prod, skip_empties(&grammar, item.prod, item.dot + 1)))
                    .collect();
                let target = &collection.states[entry.state];
                assert_eq!(target.kernel, advanced.len());
                for (prod, dot) in advanced {
                    assert!(
                        target.items[..target.kernel]
                            .iter()
                            .any(|item| item.prod == prod && item.dot == dot)
                    );
                }
            }
        }
    }

    #[test]
    fn ancestors_mirror_descendants() {
        let grammar = expr_grammar(true);
        let collection = Collection::build(&grammar);
        for state in 1..collection.len() {
            for (index, item) in collection.states[state].items.iter().enumerate() {
                if item.descendant.is_none() {
                    continue;
                }
                let target = &collection.states[item.descendant.state];
                assert!(
                    target.items[item.descendant.item]
                        .ancestors
                        .iter()
                        .any(|a| a.state == state && a.item == index)
                );
            }
        }
    }

    #[test]
    fn state_count_invariant_under_alternative_order() {
        // Without error repair the number of states does not depend on the
        // order alternatives are written in.
        let count = |swap: bool| {
            let mut builder = GrammarBuilder::new();
            let x = builder.terminal("x");
            let l = builder.nonterminal("L");
            let e = builder.nonterminal("e");
            if swap {
                builder.production(l, &[e, l], 0);
                builder.production(l, &[e], 0);
            } else {
                builder.production(l, &[e], 0);
                builder.production(l, &[e, l], 0);
            }
            builder.production(e, &[x], 0);
            builder.start(l);
            let grammar = builder.finish().unwrap();
            Collection::build(&grammar).len()
        };
        assert_eq!(count(false), count(true));
    }
}
