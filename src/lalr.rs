//! LALR(1) table construction.
//!
//! Drives the full pipeline: production sort for error repair, LR(0)
//! collection, lookahead analysis, encoded action rows with conflict
//! resolution (precedence for shift/reduce, state splitting for
//! reduce/reduce), and continuation-token selection.

use std::io::Write;

use tracing::{error, info, warn};

use crate::conflict::split_states;
use crate::error::{Result, SdtError};
use crate::grammar::{FirstSets, Grammar};
use crate::lookahead::{propagate_lookahead, setup_lookahead};
use crate::lr0::Collection;
use crate::symbol::Assoc;

/// Shift state numbers are encoded as `SHIFT_OFFSET` plus the state.
/// Shiftreduce production numbers are encoded directly and must stay at or
/// below `SHIFT_OFFSET`.  Reduces are negative production numbers above
/// `ACCEPT_OFFSET`, the accept entry is `ACCEPT_OFFSET`, and errors are 0.
pub const SHIFT_OFFSET: i32 = 10000;
pub const ACCEPT_OFFSET: i32 = -10000;

const NO_ERROR: u32 = 0;
const SHIFT_REDUCE_ERROR: u32 = 0x0001;
const REDUCE_REDUCE_ERROR: u32 = 0x0002;

/// Output of table construction, kept until the tables are encoded.
#[derive(Debug)]
pub struct LalrTables {
    pub collection: Collection,
    /// Encoded action rows indexed `[state][token]`; row 0 is unused.
    pub lrstates: Vec<Vec<i32>>,
    /// Continuation value per state: a terminal token number for a shift,
    /// the negative production number for a reduce, 0 when absent.
    pub errortoken: Vec<i32>,
}

/// Generates the complete LALR(1) machine for a grammar.
pub fn generate(grammar: &mut Grammar) -> Result<LalrTables> {
    // Error repair wants each nonterminal's cheapest alternative first.
    if grammar.options.error_repair {
        grammar.compute_sortkeys();
        grammar.sort_productions();
    }

    let mut collection = Collection::build(grammar);
    let first = FirstSets::compute(grammar);
    setup_lookahead(grammar, &mut collection, &first);
    propagate_lookahead(grammar, &mut collection);

    let mut process = true;
    let lrstates = build_table(grammar, &mut collection, &mut process)?;

    let errortoken = build_repair(grammar, &collection, &mut process);

    if !process {
        return Err(SdtError::UnresolvedConflict);
    }
    Ok(LalrTables {
        collection,
        lrstates,
        errortoken,
    })
}

/// Stores an encoded action, classifying any collision.
fn set_action(row: &mut [i32], token: i32, action: i32) -> u32 {
    let cell = &mut row[token as usize];
    if *cell != 0 && *cell != action {
        if *cell > 0 || action > 0 {
            return SHIFT_REDUCE_ERROR;
        }
        return REDUCE_REDUCE_ERROR;
    }
    *cell = action;
    NO_ERROR
}

/// Fills the encoded action rows, splitting states on repairable
/// reduce-reduce collisions and resolving shift-reduce collisions by
/// precedence.  Restarts from scratch whenever the machine changes.
fn build_table(
    grammar: &Grammar,
    collection: &mut Collection,
    process: &mut bool,
) -> Result<Vec<Vec<i32>>> {
    let columns = grammar.term_count + grammar.nonterm_count + 1;
    let goal_token = grammar.token(grammar.goal);
    loop {
        let mut lrstates = vec![vec![0i32; columns]; collection.len()];
        let mut changed = false;

        for state in 1..collection.len() {
            let row = &mut lrstates[state];

            // State 1 accepts on the augmented grammar goal.
            if state == 1 {
                set_action(row, goal_token, ACCEPT_OFFSET);
            }

            // Shift and shiftreduce actions.
            for item in &collection.states[state].items {
                if !item.descendant.is_none() {
                    let token =
                        grammar.token(grammar.productions[item.prod].rhs[item.dot]);
                    set_action(row, token, SHIFT_OFFSET + item.descendant.state as i32);
                } else if item.dot < grammar.productions[item.prod].length {
                    let token =
                        grammar.token(grammar.productions[item.prod].rhs[item.dot]);
                    set_action(row, token, item.prod as i32);
                }
            }

            // Reduce actions on every lookahead symbol, watching for
            // collisions.
            let mut result = NO_ERROR;
            for item in &collection.states[state].items {
                if item.dot < grammar.productions[item.prod].length {
                    continue;
                }
                for symbol in item.lookahead.iter() {
                    result |= set_action(
                        row,
                        grammar.symbols.token(symbol),
                        -(item.prod as i32),
                    );
                }
            }

            // A repairable reduce-reduce collision alters the machine;
            // recompute lookaheads and start table generation over.
            if result & REDUCE_REDUCE_ERROR != 0 {
                if split_states(grammar, collection, state) {
                    propagate_lookahead(grammar, collection);
                    changed = true;
                    break;
                }
                error!(state, "unresolved Reduce-Reduce conflict");
                *process = false;
            }

            if result & SHIFT_REDUCE_ERROR != 0 {
                resolve_ambiguity(grammar, collection, state, row, process);
            }
        }

        if !changed {
            return Ok(lrstates);
        }
    }
}

/// Resolves the shift-reduce collisions of one state by precedence and
/// associativity.  Without the AMBIGUOUS option any collision is fatal.
fn resolve_ambiguity(
    grammar: &Grammar,
    collection: &Collection,
    state: usize,
    row: &mut [i32],
    process: &mut bool,
) {
    if !grammar.options.ambiguous {
        error!(state, "unresolved Shift-Reduce conflict");
        *process = false;
        return;
    }

    let items = &collection.states[state].items;
    let mut failure = false;
    for i in 0..items.len() {
        if items[i].dot < grammar.productions[items[i].prod].length {
            continue;
        }
        // Find the lookahead symbols of this reduce that collide with a
        // shift or shiftreduce already stored in the row.
        let colliding: Vec<_> = items[i]
            .lookahead
            .iter()
            .filter(|&sym| row[grammar.symbols.token(sym) as usize] > 0)
            .collect();
        if colliding.is_empty() {
            continue;
        }

        // The reduce's precedence comes from the rightmost terminal on its
        // right hand side; none means the collision cannot be resolved.
        let mut reduce_prec = -1;
        for &sym in &grammar.productions[items[i].prod].rhs {
            if grammar.symbols.is_terminal(sym) {
                reduce_prec = grammar.symbols.get(sym).precedence;
            }
        }
        if reduce_prec < 0 {
            warn!(
                state,
                "reduce by {} has no precedence",
                grammar.production_text(items[i].prod)
            );
            failure = true;
            continue;
        }

        for symbol in colliding {
            let token = grammar.symbols.token(symbol);
            // The shift's precedence and associativity come from the
            // terminal's own declaration; warn when colliding shift items
            // disagree (aliases may).
            let mut shift_prec = -1;
            let mut assoc = None;
            for item in items {
                if item.dot >= grammar.productions[item.prod].length {
                    continue;
                }
                let dotted = grammar.productions[item.prod].rhs[item.dot];
                if grammar.symbols.token(dotted) != token {
                    continue;
                }
                let entry = grammar.symbols.get(dotted);
                if shift_prec >= 0 && entry.precedence != shift_prec {
                    warn!(
                        state,
                        "shift precedence {} is not equal to the earlier precedence {}",
                        entry.precedence,
                        shift_prec
                    );
                }
                if let Some(seen) = assoc
                    && seen != entry.assoc
                {
                    warn!(
                        state,
                        "shift associativity {} is not equal to the earlier \
                         associativity {}",
                        entry.assoc,
                        seen
                    );
                }
                if shift_prec < 0 {
                    shift_prec = entry.precedence;
                }
                if assoc.is_none() {
                    assoc = Some(entry.assoc);
                }
            }
            let assoc = assoc.unwrap_or(Assoc::None);

            if shift_prec < 0 {
                warn!(state, "shift on {} has no precedence", grammar.symbols.name(symbol));
                failure = true;
            } else if shift_prec > reduce_prec {
                info!(
                    state,
                    "shift precedence {shift_prec} is higher than reduce \
                     precedence {reduce_prec}; action will be shift"
                );
            } else if reduce_prec > shift_prec {
                info!(
                    state,
                    "reduce precedence {reduce_prec} is higher than shift \
                     precedence {shift_prec}; action will be reduce"
                );
                row[token as usize] = -(items[i].prod as i32);
            } else {
                match assoc {
                    Assoc::Left => {
                        info!(
                            state,
                            "equal precedence {shift_prec} and LEFT \
                             associativity; action will be reduce"
                        );
                        row[token as usize] = -(items[i].prod as i32);
                    }
                    Assoc::Right => {
                        info!(
                            state,
                            "equal precedence {shift_prec} and RIGHT \
                             associativity; action will be shift"
                        );
                    }
                    Assoc::None => {
                        warn!(
                            state,
                            "equal precedence {shift_prec} and no associativity \
                             on {}",
                            grammar.symbols.name(symbol)
                        );
                        failure = true;
                    }
                }
            }
        }
    }

    if failure {
        error!(state, "Shift-Reduce conflict cannot be resolved");
        *process = false;
    } else {
        info!(state, "Shift-Reduce conflict has been resolved");
    }
}

/// Selects the continuation value for every state.  The production sort
/// plus depth-first closure guarantee the first item names the cheapest
/// terminal-producing continuation.
fn build_repair(grammar: &Grammar, collection: &Collection, process: &mut bool) -> Vec<i32> {
    let mut errortoken = vec![0i32; collection.len()];
    if !grammar.options.error_repair {
        return errortoken;
    }
    for state in 1..collection.len() {
        let items = &collection.states[state].items;
        let first = &items[0];
        if first.dot >= grammar.productions[first.prod].length {
            errortoken[state] = -(first.prod as i32);
            continue;
        }
        let dotted = grammar.productions[first.prod].rhs[first.dot];
        if grammar.symbols.is_terminal(dotted) {
            errortoken[state] = grammar.symbols.token(dotted);
            continue;
        }
        // Dot before a nonterminal: the first closure item that reduces or
        // shifts a terminal carries the continuation.
        let kernel = collection.states[state].kernel;
        let mut found = false;
        for item in &items[kernel..] {
            if item.dot >= grammar.productions[item.prod].length {
                errortoken[state] = -(item.prod as i32);
                found = true;
                break;
            }
            let dotted = grammar.productions[item.prod].rhs[item.dot];
            if grammar.symbols.is_terminal(dotted) {
                errortoken[state] = grammar.symbols.token(dotted);
                found = true;
                break;
            }
        }
        if !found {
            error!(state, "no valid error repair value");
            *process = false;
        }
    }
    errortoken
}

/// Writes the grammar productions the way the listing options expect.
pub fn display_productions(grammar: &Grammar, out: &mut dyn Write) -> Result<()> {
    writeln!(out, "{}\tProductions", grammar.name)?;
    for i in 1..grammar.productions.len() {
        writeln!(out, "{:4}.  {}", i, grammar.production_text(i))?;
    }
    writeln!(out)?;
    Ok(())
}

/// Writes a cross-reference of every symbol to the productions using it.
pub fn display_crossref(grammar: &Grammar, out: &mut dyn Write) -> Result<()> {
    writeln!(out, "{}\tCross Reference", grammar.name)?;
    for token in 1..=(grammar.term_count + grammar.nonterm_count) as i32 {
        let id = grammar.symbol_for_token(token);
        let mut uses = Vec::new();
        for prod in 1..grammar.productions.len() {
            if grammar.productions[prod].lhs == id
                || grammar.productions[prod].rhs.contains(&id)
            {
                uses.push(prod.to_string());
            }
        }
        writeln!(
            out,
            "{:4}.  {}  {}",
            token,
            grammar.symbols.name(id),
            uses.join(" ")
        )?;
    }
    writeln!(out)?;
    Ok(())
}

/// Writes the nonterminal first sets.
pub fn display_first(grammar: &Grammar, first: &FirstSets, out: &mut dyn Write) -> Result<()> {
    writeln!(out, "{}\tFirst Sets", grammar.name)?;
    for ordinal in 1..=grammar.nonterm_count {
        let id = grammar.nonterm_table[ordinal];
        let token = grammar.token(id);
        let names: Vec<&str> = first
            .first(token)
            .iter()
            .map(|sym| grammar.symbols.name(sym))
            .collect();
        writeln!(
            out,
            "{:4}.  {} [{}]{}",
            ordinal,
            grammar.symbols.name(id),
            names.join(" "),
            if first.nullable(token) { " (nullable)" } else { "" }
        )?;
    }
    writeln!(out)?;
    Ok(())
}

/// Writes the canonical collection with lookahead sets.
pub fn display_collection(
    grammar: &Grammar,
    tables: &LalrTables,
    out: &mut dyn Write,
) -> Result<()> {
    writeln!(out, "{}\tCanonical Collection", grammar.name)?;
    for state in 1..tables.collection.len() {
        writeln!(out, "{:4}.", state)?;
        let entry = &tables.collection.states[state];
        for (index, item) in entry.items.iter().enumerate() {
            let p = &grammar.productions[item.prod];
            let mut text = format!("{} ->", grammar.symbols.name(p.lhs));
            for (pos, &sym) in p.rhs.iter().enumerate() {
                if pos == item.dot {
                    text.push_str(" .");
                }
                text.push(' ');
                text.push_str(grammar.symbols.name(sym));
            }
            if item.dot >= p.rhs.len() {
                text.push_str(" .");
            }
            let lookahead: Vec<&str> = item
                .lookahead
                .iter()
                .map(|sym| grammar.symbols.name(sym))
                .collect();
            if lookahead.is_empty() {
                writeln!(out, "       {text}")?;
            } else {
                writeln!(out, "       {text}, [{}]", lookahead.join(" "))?;
            }
            if index + 1 == entry.kernel && entry.items.len() > entry.kernel {
                writeln!(out, "       ---")?;
            }
        }
        for edge in &entry.gotos {
            let name = grammar.symbols.name(grammar.symbol_for_token(edge.token));
            writeln!(out, "       Goto state {} on {}", edge.state, name)?;
        }
    }
    writeln!(out)?;
    Ok(())
}

/// Writes each state's ancestors and the goto symbol that led to it.
pub fn display_ancestors(
    grammar: &Grammar,
    tables: &LalrTables,
    out: &mut dyn Write,
) -> Result<()> {
    let count = tables.collection.len();
    let mut ancestors = vec![Vec::new(); count];
    let mut token = vec![0i32; count];
    for state in 1..count {
        for edge in &tables.collection.states[state].gotos {
            ancestors[edge.state].push(state);
            token[edge.state] = edge.token;
        }
    }
    writeln!(out, "{}\tAncestor States", grammar.name)?;
    writeln!(out, "State.  Symbol  Ancestors")?;
    for state in 1..count {
        let name = if token[state] != 0 {
            grammar.symbols.name(grammar.symbol_for_token(token[state]))
        } else {
            ""
        };
        let list: Vec<String> = ancestors[state].iter().map(|s| s.to_string()).collect();
        writeln!(out, "{:4}.  {:8}  {}", state, name, list.join(" "))?;
    }
    writeln!(out)?;
    Ok(())
}

/// Writes the error repair value chosen for each state.
pub fn display_repair(grammar: &Grammar, tables: &LalrTables, out: &mut dyn Write) -> Result<()> {
    writeln!(out, "{}\tError Repair Values", grammar.name)?;
    for state in 1..tables.collection.len() {
        let value = tables.errortoken[state];
        if value < 0 {
            writeln!(
                out,
                "{:4}.  reduce {}",
                state,
                grammar.production_text((-value) as usize)
            )?;
        } else if value > 0 {
            writeln!(
                out,
                "{:4}.  shift {}",
                state,
                grammar.symbols.name(grammar.symbol_for_token(value))
            )?;
        } else {
            writeln!(out, "{:4}.  none", state)?;
        }
    }
    writeln!(out)?;
    Ok(())
}

/// Writes the encoded parsing table rows.
pub fn display_table(grammar: &Grammar, tables: &LalrTables, out: &mut dyn Write) -> Result<()> {
    writeln!(out, "{}\tParsing Tables", grammar.name)?;
    for state in 1..tables.lrstates.len() {
        writeln!(out, "{:4}.", state)?;
        for token in 1..tables.lrstates[state].len() {
            let action = tables.lrstates[state][token];
            if action == 0 {
                continue;
            }
            let name = grammar.symbols.name(grammar.symbol_for_token(token as i32));
            if action > SHIFT_OFFSET {
                writeln!(out, "       shift {} on {}", action - SHIFT_OFFSET, name)?;
            } else if action > 0 {
                writeln!(out, "       shiftreduce {} on {}", action, name)?;
            } else if action <= ACCEPT_OFFSET {
                writeln!(out, "       accept on {}", name)?;
            } else {
                writeln!(out, "       reduce {} on {}", -action, name)?;
            }
        }
    }
    writeln!(out)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::GrammarBuilder;

    fn list_tables(error_repair: bool) -> (Grammar, LalrTables) {
        let mut builder = GrammarBuilder::new();
        let x = builder.terminal("x");
        let l = builder.nonterminal("L");
        let e = builder.nonterminal("e");
        builder.production(l, &[e], 0);
        builder.production(l, &[e, l], 0);
        builder.production(e, &[x], 0);
        builder.start(l);
        builder.options().error_repair = error_repair;
        let mut grammar = builder.finish().unwrap();
        let tables = generate(&mut grammar).unwrap();
        (grammar, tables)
    }

    #[test]
    fn rows_have_consistent_actions() {
        let (_, tables) = list_tables(false);
        for state in 1..tables.lrstates.len() {
            for &action in &tables.lrstates[state] {
                assert!(
                    action == 0
                        || action <= ACCEPT_OFFSET
                        || action < 0
                        || action <= SHIFT_OFFSET + tables.lrstates.len() as i32
                );
            }
        }
    }

    #[test]
    fn accept_sits_on_the_goal_column() {
        let (grammar, tables) = list_tables(false);
        let goal = grammar.token(grammar.goal) as usize;
        assert_eq!(tables.lrstates[1][goal], ACCEPT_OFFSET);
    }

    #[test]
    fn every_state_has_a_continuation() {
        let (_, tables) = list_tables(true);
        for state in 1..tables.errortoken.len() {
            assert_ne!(tables.errortoken[state], 0, "state {state}");
        }
    }

    #[test]
    fn precedence_resolves_shift_reduce() {
        // E -> E "+" E | E "*" E | "a" with * binding tighter than +.
        let mut builder = GrammarBuilder::new();
        let plus = builder.terminal("+");
        let star = builder.terminal("*");
        let a = builder.terminal("a");
        builder.set_precedence(plus, 1, Assoc::Left);
        builder.set_precedence(star, 2, Assoc::Left);
        builder.set_precedence(a, 3, Assoc::None);
        let e = builder.nonterminal("E");
        builder.production(e, &[e, plus, e], 0);
        builder.production(e, &[e, star, e], 0);
        builder.production(e, &[a], 0);
        builder.start(e);
        builder.options().ambiguous = true;
        let mut grammar = builder.finish().unwrap();
        let tables = generate(&mut grammar).unwrap();

        // No row carries both a shift and a reduce on one terminal, and
        // after E + E the action on "*" is a shift while on "+" it is a
        // reduce (left associativity).
        let plus_tok = grammar.token(plus) as usize;
        let star_tok = grammar.token(star) as usize;
        let mut checked = false;
        for state in 1..tables.collection.len() {
            let has_plus_reduce = tables.collection.states[state].items.iter().any(|item| {
                item.dot >= grammar.productions[item.prod].length
                    && grammar.productions[item.prod].rhs.len() == 3
                    && grammar.productions[item.prod].rhs[1] == plus
            });
            if has_plus_reduce {
                assert!(tables.lrstates[state][star_tok] > 0, "state {state}");
                assert!(tables.lrstates[state][plus_tok] < 0, "state {state}");
                checked = true;
            }
        }
        assert!(checked);
    }

    #[test]
    fn shift_reduce_without_ambiguous_is_fatal() {
        let mut builder = GrammarBuilder::new();
        let plus = builder.terminal("+");
        let a = builder.terminal("a");
        let e = builder.nonterminal("E");
        builder.production(e, &[e, plus, e], 0);
        builder.production(e, &[a], 0);
        builder.start(e);
        let mut grammar = builder.finish().unwrap();
        assert!(generate(&mut grammar).is_err());
    }
}
