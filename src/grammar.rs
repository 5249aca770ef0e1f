//! Grammar model for LALR table generation.
//!
//! A [`Grammar`] owns the symbol table and the fully expanded production
//! list.  Productions are numbered from 1 and grouped by left hand side in
//! nonterminal token order; production 1 is always the augmentation
//! `<Goal> -> start sentinel`.  Index 0 is reserved so that a reduce action
//! can be encoded as the negative production number.

use crate::error::{Result, SdtError};
use crate::sets::SymbolSet;
use crate::symbol::{Assoc, MAXCOST, Symbol, SymbolFlags, SymbolId, SymbolKind, SymbolTable};

/// Grammar option flags selected in the input description.
#[derive(Debug, Clone, Copy, Default)]
pub struct Options {
    /// Construct error repair tables.
    pub error_repair: bool,
    /// Use shiftreduce actions to reduce table size.
    pub default_reduce: bool,
    /// Use precedence and associativity to resolve shift-reduce conflicts.
    pub ambiguous: bool,
    /// Split states to resolve reduce-reduce conflicts.
    pub split_states: bool,
}

/// A production rule.  `length` indexes one past the last non-epsilon
/// position, so trailing epsilon terminals never hold the dot.
#[derive(Debug, Clone)]
pub struct Production {
    pub lhs: SymbolId,
    pub rhs: Vec<SymbolId>,
    pub length: usize,
    /// Semantic routine number fired when this production is reduced.
    pub semantic: i32,
    /// Minimum number of derivation steps to reach all terminals.
    pub steps: u32,
    /// Minimum insertion cost of a terminal string derivable from this rule.
    pub insert: u32,
}

/// A context-free grammar with token numbering finalized.
#[derive(Debug)]
pub struct Grammar {
    pub symbols: SymbolTable,
    /// Productions, 1-based; entry 0 is a reserved placeholder.
    pub productions: Vec<Production>,
    /// Nonterminal ordinal (1-based) to first production index.  Ordinals
    /// with no productions map to `productions.len()`.
    pub lhs_index: Vec<usize>,
    pub term_count: usize,
    pub nonterm_count: usize,
    /// Token number to symbol, terminals; index 0 unused.
    pub term_table: Vec<SymbolId>,
    /// Nonterminal ordinal to symbol; index 0 unused.
    pub nonterm_table: Vec<SymbolId>,
    pub goal: SymbolId,
    pub sentinel: SymbolId,
    pub start: SymbolId,
    pub options: Options,
    /// Table identity written to the output header.
    pub name: String,
    /// Error repair context window.
    pub context: i32,
    /// Default repair cost used to discount context lookahead.
    pub defcost: i32,
}

impl Grammar {
    #[inline]
    pub fn production_count(&self) -> usize {
        self.productions.len()
    }

    #[inline]
    pub fn token(&self, id: SymbolId) -> i32 {
        self.symbols.token(id)
    }

    /// Productions with the given nonterminal on the left hand side.
    pub fn alternatives(&self, nonterminal: SymbolId) -> std::ops::Range<usize> {
        let ordinal = (self.symbols.token(nonterminal) as usize) - self.term_count;
        let first = self.lhs_index[ordinal];
        let mut last = first;
        while last < self.productions.len() && self.productions[last].lhs == nonterminal {
            last += 1;
        }
        first..last
    }

    /// Symbol carrying the given token number.
    pub fn symbol_for_token(&self, token: i32) -> SymbolId {
        let t = token as usize;
        if t <= self.term_count {
            self.term_table[t]
        } else {
            self.nonterm_table[t - self.term_count]
        }
    }

    /// Number of non-epsilon symbols on a production's right hand side.
    /// This is the amount the runtime pops when reducing.
    pub fn rhs_nonempty_len(&self, prod: usize) -> usize {
        self.productions[prod].rhs[..self.productions[prod].length]
            .iter()
            .filter(|&&id| !self.symbols.is_empty_terminal(id))
            .count()
    }

    /// Renders a production for listings and conflict reports.
    pub fn production_text(&self, prod: usize) -> String {
        let p = &self.productions[prod];
        let mut text = format!("{} ->", self.symbols.name(p.lhs));
        for &id in &p.rhs {
            text.push(' ');
            text.push_str(self.symbols.name(id));
        }
        text
    }

    /// Computes the minimum derivation steps and insertion cost of every
    /// production by fixed-point relaxation.
    pub fn compute_sortkeys(&mut self) {
        let mut changed = true;
        while changed {
            changed = false;
            for i in 1..self.productions.len() {
                let mut steps: u32 = 0;
                let mut insert: u32 = 0;
                for j in 0..self.productions[i].length {
                    let sym = self.productions[i].rhs[j];
                    if self.symbols.is_nonterminal(sym) {
                        let mut min_steps = u32::MAX;
                        let mut min_insert = u32::MAX;
                        for k in self.alternatives(sym) {
                            min_steps = min_steps.min(self.productions[k].steps);
                            min_insert = min_insert.min(self.productions[k].insert);
                        }
                        steps = add_saturating(steps, min_steps);
                        insert = add_saturating(insert, min_insert);
                    } else if !self.symbols.is_empty_terminal(sym) {
                        insert =
                            add_saturating(insert, self.symbols.get(sym).insert_cost as u32);
                    }
                }
                if steps < u32::MAX && steps + 1 < self.productions[i].steps {
                    self.productions[i].steps = steps + 1;
                    changed = true;
                }
                if insert < self.productions[i].insert {
                    self.productions[i].insert = insert;
                    changed = true;
                }
            }
        }
    }

    /// Orders each nonterminal's alternatives by nondecreasing
    /// `(steps, insert)` so the first alternative in every closure is the
    /// cheapest continuation.
    pub fn sort_productions(&mut self) {
        for ordinal in 1..=self.nonterm_count {
            let first = self.lhs_index[ordinal];
            let mut last = first;
            while last < self.productions.len()
                && self.productions[last].lhs == self.nonterm_table[ordinal]
            {
                last += 1;
            }
            for j in first..last {
                let mut min = j;
                for k in j + 1..last {
                    if self.productions[k].steps < self.productions[min].steps
                        || (self.productions[k].steps == self.productions[min].steps
                            && self.productions[k].insert < self.productions[min].insert)
                    {
                        min = k;
                    }
                }
                if min != j {
                    self.productions.swap(j, min);
                }
            }
        }
    }
}

fn add_saturating(a: u32, b: u32) -> u32 {
    if a == u32::MAX || b == u32::MAX {
        u32::MAX
    } else {
        a.saturating_add(b)
    }
}

/// FIRST sets for every token, with nullability.
#[derive(Debug)]
pub struct FirstSets {
    sets: Vec<SymbolSet>,
    nullable: Vec<bool>,
}

impl FirstSets {
    /// Computes FIRST sets for all terminals and nonterminals by
    /// fixed-point iteration.
    pub fn compute(grammar: &Grammar) -> FirstSets {
        let total = grammar.term_count + grammar.nonterm_count;
        let mut sets = vec![SymbolSet::new(); total + 1];
        let mut nullable = vec![false; total + 1];

        // Each terminal is its own first set; epsilon terminals have token
        // number 0 and never appear here.
        for token in 1..=grammar.term_count {
            sets[token].insert(grammar.term_table[token]);
        }

        let mut changed = true;
        while changed {
            changed = false;
            for i in 1..grammar.productions.len() {
                let lhs_token = grammar.token(grammar.productions[i].lhs) as usize;
                let mut k = 0;
                while k < grammar.productions[i].length {
                    let sym = grammar.productions[i].rhs[k];
                    let token = grammar.token(sym) as usize;
                    if token != 0 {
                        let merged = sets[lhs_token].union(&sets[token]);
                        if merged != sets[lhs_token] {
                            sets[lhs_token] = merged;
                            changed = true;
                        }
                        if !nullable[token] {
                            break;
                        }
                    }
                    k += 1;
                }
                if k >= grammar.productions[i].length && !nullable[lhs_token] {
                    nullable[lhs_token] = true;
                    changed = true;
                }
            }
        }
        FirstSets { sets, nullable }
    }

    #[inline]
    pub fn first(&self, token: i32) -> &SymbolSet {
        &self.sets[token as usize]
    }

    #[inline]
    pub fn nullable(&self, token: i32) -> bool {
        self.nullable[token as usize]
    }
}

/// Incremental construction of a [`Grammar`] from the front-end contract.
#[derive(Debug, Default)]
pub struct GrammarBuilder {
    symbols: SymbolTable,
    terminals: Vec<SymbolId>,
    nonterminals: Vec<SymbolId>,
    rules: Vec<(SymbolId, Vec<SymbolId>, i32)>,
    start: Option<SymbolId>,
    options: Options,
    name: String,
    context: i32,
    defcost: i32,
}

impl GrammarBuilder {
    pub fn new() -> Self {
        GrammarBuilder {
            name: "sdtgen".to_string(),
            context: 3,
            defcost: 5,
            ..Default::default()
        }
    }

    pub fn name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    pub fn context(&mut self, context: i32) {
        self.context = context;
    }

    pub fn defcost(&mut self, defcost: i32) {
        self.defcost = defcost;
    }

    pub fn options(&mut self) -> &mut Options {
        &mut self.options
    }

    /// Declares a terminal with default costs; returns the existing entry
    /// when already declared.
    pub fn terminal(&mut self, name: &str) -> SymbolId {
        let before = self.symbols.len();
        let id = self.symbols.intern(name, SymbolKind::Terminal);
        if self.symbols.len() != before {
            self.terminals.push(id);
        }
        id
    }

    pub fn set_precedence(&mut self, id: SymbolId, precedence: i32, assoc: Assoc) {
        let symbol = self.symbols.get_mut(id);
        symbol.precedence = precedence;
        symbol.assoc = assoc;
    }

    pub fn set_costs(&mut self, id: SymbolId, insert_cost: i32, delete_cost: i32) {
        let symbol = self.symbols.get_mut(id);
        symbol.insert_cost = insert_cost;
        symbol.delete_cost = delete_cost;
    }

    pub fn set_install(&mut self, id: SymbolId) {
        self.symbols.get_mut(id).flags.install = true;
    }

    pub fn set_case(&mut self, id: SymbolId) {
        self.symbols.get_mut(id).flags.case = true;
    }

    pub fn set_empty(&mut self, id: SymbolId) {
        let symbol = self.symbols.get_mut(id);
        symbol.flags.empty = true;
        symbol.insert_cost = 0;
        symbol.delete_cost = 0;
    }

    /// Declares `name` as an alias of `of`.  The alias shares the base
    /// token's number and inherits its install, case, and empty flags, but
    /// keeps its own precedence, associativity, and costs.  An alias may
    /// not itself alias another alias.
    pub fn alias(&mut self, name: &str, of: SymbolId) -> Result<SymbolId> {
        if self.symbols.get(of).flags.alias {
            return Err(SdtError::InvalidFormat(
                "Cannot define an alias for an alias".to_string(),
            ));
        }
        let id = self.terminal(name);
        self.symbols.get_mut(id).flags.alias = true;
        // Chain the new alias onto the end of the base token's alias list.
        let mut tail = of;
        while let Some(next) = self.symbols.get(tail).alias {
            tail = next;
        }
        self.symbols.get_mut(tail).alias = Some(id);
        Ok(id)
    }

    pub fn nonterminal(&mut self, name: &str) -> SymbolId {
        let before = self.symbols.len();
        let id = self.symbols.intern(name, SymbolKind::Nonterminal);
        if self.symbols.len() != before {
            self.nonterminals.push(id);
        }
        id
    }

    pub fn production(&mut self, lhs: SymbolId, rhs: &[SymbolId], semantic: i32) {
        self.rules.push((lhs, rhs.to_vec(), semantic));
    }

    pub fn start(&mut self, id: SymbolId) {
        self.start = Some(id);
    }

    pub fn lookup_terminal(&self, name: &str) -> Option<SymbolId> {
        self.symbols.lookup(name, SymbolKind::Terminal)
    }

    pub fn symbol(&self, id: SymbolId) -> &Symbol {
        self.symbols.get(id)
    }

    /// Finalizes token numbering, adds the end-of-file sentinel and the
    /// `<Goal>` augmentation, and builds the grouped production list.
    pub fn finish(mut self) -> Result<Grammar> {
        if self.rules.is_empty() {
            return Err(SdtError::EmptyInput);
        }
        let start = match self.start {
            Some(id) => id,
            // Default to the left hand side of the first rule.
            None => self.rules[0].0,
        };
        if !self.rules.iter().any(|(lhs, _, _)| *lhs == start) {
            return Err(SdtError::UndefinedStart(
                self.symbols.name(start).to_string(),
            ));
        }

        // The sentinel is the highest-numbered terminal.  Its costs make
        // end of file all but impossible to repair away.
        let sentinel = self.terminal("'$'");
        {
            let symbol = self.symbols.get_mut(sentinel);
            symbol.insert_cost = (MAXCOST + 1) / 2 - 1;
            symbol.delete_cost = MAXCOST;
        }

        // Number terminals in declaration order.  Epsilon terminals stay
        // at token 0; aliases take their base token's number afterwards.
        let mut term_table = vec![SymbolId(0)];
        for &id in &self.terminals {
            let flags = self.symbols.get(id).flags;
            if flags.empty || flags.alias {
                continue;
            }
            self.symbols.get_mut(id).token = term_table.len() as i32;
            term_table.push(id);
        }
        let term_count = term_table.len() - 1;
        for &id in &self.terminals {
            let mut alias = self.symbols.get(id).alias;
            let SymbolFlags { install, case, empty, .. } = self.symbols.get(id).flags;
            let token = self.symbols.get(id).token;
            while let Some(next) = alias {
                let entry = self.symbols.get_mut(next);
                entry.token = token;
                entry.flags.install = install;
                entry.flags.case = case;
                entry.flags.empty = empty;
                alias = entry.alias;
            }
        }

        // The goal takes the first nonterminal number so its production is
        // production 1; the rest follow in declaration order.
        let goal = {
            let before = self.symbols.len();
            let id = self.symbols.intern("<Goal>", SymbolKind::Nonterminal);
            if self.symbols.len() != before {
                self.nonterminals.push(id);
            }
            id
        };
        let mut nonterm_table = vec![SymbolId(0), goal];
        for &id in &self.nonterminals {
            if id != goal {
                nonterm_table.push(id);
            }
        }
        let nonterm_count = nonterm_table.len() - 1;
        for (ordinal, &id) in nonterm_table.iter().enumerate().skip(1) {
            self.symbols.get_mut(id).token = (term_count + ordinal) as i32;
        }

        self.rules.insert(0, (goal, vec![start, sentinel], 0));

        // Group productions by nonterminal token order, placeholder first.
        let mut productions = vec![Production {
            lhs: goal,
            rhs: Vec::new(),
            length: 0,
            semantic: 0,
            steps: 0,
            insert: 0,
        }];
        let mut lhs_index = vec![0usize; nonterm_count + 1];
        for ordinal in 1..=nonterm_count {
            let lhs = nonterm_table[ordinal];
            let mut first = 0;
            for (rule_lhs, rhs, semantic) in &self.rules {
                if *rule_lhs != lhs {
                    continue;
                }
                if first == 0 {
                    first = productions.len();
                }
                // Effective length excludes trailing epsilon terminals.
                let mut length = 0;
                for (pos, &sym) in rhs.iter().enumerate() {
                    if !self.symbols.is_empty_terminal(sym) {
                        length = pos + 1;
                    }
                }
                productions.push(Production {
                    lhs,
                    rhs: rhs.clone(),
                    length,
                    semantic: *semantic,
                    steps: u32::MAX,
                    insert: u32::MAX,
                });
            }
            lhs_index[ordinal] = first;
        }
        let count = productions.len();
        for index in lhs_index.iter_mut().skip(1) {
            // Undefined nonterminals derive nothing; lowering continues.
            if *index == 0 {
                *index = count;
            }
        }

        Ok(Grammar {
            symbols: self.symbols,
            productions,
            lhs_index,
            term_count,
            nonterm_count,
            term_table,
            nonterm_table,
            goal,
            sentinel,
            start,
            options: self.options,
            name: self.name,
            context: self.context,
            defcost: self.defcost,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list_grammar() -> Grammar {
        // L -> e | e L ; e -> "x"
        let mut builder = GrammarBuilder::new();
        let x = builder.terminal("x");
        let l = builder.nonterminal("L");
        let e = builder.nonterminal("e");
        builder.production(l, &[e], 0);
        builder.production(l, &[e, l], 0);
        builder.production(e, &[x], 0);
        builder.start(l);
        builder.finish().unwrap()
    }

    #[test]
    fn goal_production_is_first() {
        let grammar = list_grammar();
        assert_eq!(grammar.productions[1].lhs, grammar.goal);
        assert_eq!(grammar.productions[1].rhs.len(), 2);
        assert_eq!(grammar.productions[1].rhs[1], grammar.sentinel);
        assert_eq!(grammar.token(grammar.goal) as usize, grammar.term_count + 1);
    }

    #[test]
    fn sentinel_is_last_terminal() {
        let grammar = list_grammar();
        assert_eq!(
            grammar.token(grammar.sentinel) as usize,
            grammar.term_count
        );
        assert_eq!(grammar.symbols.get(grammar.sentinel).delete_cost, MAXCOST);
        assert_eq!(
            grammar.symbols.get(grammar.sentinel).insert_cost,
            (MAXCOST + 1) / 2 - 1
        );
    }

    #[test]
    fn first_sets_reach_through_nonterminals() {
        let grammar = list_grammar();
        let first = FirstSets::compute(&grammar);
        let x = grammar.term_table[1];
        let l_token = grammar.token(grammar.start);
        assert!(first.first(l_token).contains(x));
        assert!(!first.nullable(l_token));
    }

    #[test]
    fn sortkeys_prefer_shortest_derivation() {
        let mut grammar = list_grammar();
        grammar.compute_sortkeys();
        grammar.sort_productions();
        // L -> e sorts before L -> e L: fewer steps, lower insert cost.
        let range = grammar.alternatives(grammar.start);
        let first = &grammar.productions[range.start];
        assert_eq!(first.rhs.len(), 1);
        for i in range.clone().skip(1) {
            let (a, b) = (&grammar.productions[i - 1], &grammar.productions[i]);
            assert!(a.steps < b.steps || (a.steps == b.steps && a.insert <= b.insert));
        }
    }

    #[test]
    fn empty_terminals_do_not_count_toward_length() {
        let mut builder = GrammarBuilder::new();
        let x = builder.terminal("x");
        let eps = builder.terminal("nil");
        builder.set_empty(eps);
        let a = builder.nonterminal("A");
        builder.production(a, &[x, eps], 0);
        builder.start(a);
        let grammar = builder.finish().unwrap();
        let range = grammar.alternatives(a);
        let prod = &grammar.productions[range.start];
        assert_eq!(prod.rhs.len(), 2);
        assert_eq!(prod.length, 1);
        assert_eq!(grammar.token(eps), 0);
    }

    #[test]
    fn alias_shares_token_number_keeps_costs() {
        let mut builder = GrammarBuilder::new();
        let base = builder.terminal("<");
        builder.set_costs(base, 2, 3);
        let alias = builder.alias("lt", base).unwrap();
        builder.set_costs(alias, 7, 8);
        let a = builder.nonterminal("A");
        builder.production(a, &[base], 0);
        builder.start(a);
        assert!(builder.alias("le", alias).is_err());
        let grammar = builder.finish().unwrap();
        assert_eq!(grammar.token(alias), grammar.token(base));
        assert_eq!(grammar.symbols.get(alias).insert_cost, 7);
        assert_eq!(grammar.symbols.get(base).insert_cost, 2);
    }
}
