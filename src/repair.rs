//! Locally least-cost syntax error repair.
//!
//! On an error action the parser snapshots its state stack, walks the
//! continuation automaton to learn which terminals become admissible
//! after each continuation prefix, and then searches over token
//! insertions and deletions for the cheapest repair, scoring candidates
//! with a context-bounded lookahead parse discounted by the default
//! repair cost.

use crate::error::{Result, SdtError};
use crate::parser::{Action, Callbacks, InsertEntry, ParseContext, TokenEntry};
use crate::symbol::MAXCOST;

/// A candidate repair: a single admissible-token insertion or a
/// continuation-prefix insertion, with its cost.
#[derive(Debug, Clone, Copy)]
struct Repair {
    token: i32,
    prefix: i32,
    cost: i32,
}

impl ParseContext<'_> {
    /// Reads the continuation value for the state on top of the local
    /// stack, recording the admissible set for the current prefix the
    /// first time that prefix is seen.  A state without a continuation is
    /// a fatal syntax error.
    fn error_value(&mut self) -> Result<i32> {
        let state = *self.lclstack.last().expect("local stack is never empty");
        let value = self.tables.repair[state];
        if value == 0 {
            let front = &self.tknqueue[0];
            let (point, locus) = (front.location, front.locus);
            self.record_error(point, "Syntax error".to_string());
            while self.lines.unwritten <= locus {
                let ParseContext {
                    chain,
                    lines,
                    queue,
                    out,
                    ..
                } = self;
                lines.write_line(chain, queue, out)?;
            }
            self.out.flush()?;
            return Err(SdtError::FatalSyntax);
        }

        // Reduce actions revisit continuation prefixes; the admissible
        // set of a prefix is computed once.
        if !self.insertion.last().expect("insertion seeded").known {
            let prefix = (self.insertion.len() - 1) as i32;
            for token in 1..=self.tables.tnumber as i32 {
                if self.followset[token as usize] >= 0 {
                    continue;
                }
                match self.decode_action(state, token) {
                    Action::Shift(_) | Action::ShiftReduce(_) => {
                        // The current state shifts the token directly.
                        self.followset[token as usize] = prefix;
                    }
                    Action::Reduce(prod) => {
                        // Admissible only if reducing forward eventually
                        // shifts the token or accepts.
                        if self.reduces_to_shift(prod, token) {
                            self.followset[token as usize] = prefix;
                        }
                    }
                    _ => {}
                }
            }
            self.insertion.last_mut().expect("insertion seeded").known = true;
        }

        if value > 0 {
            // The value is a terminal and extends the continuation.
            let cost =
                self.insertion.last().expect("insertion seeded").cost + self.tables.inscost[value as usize];
            self.insertion.push(InsertEntry {
                token: value,
                symbol: None,
                cost,
                known: false,
            });
        }
        Ok(value)
    }

    /// Simulates reduce chains from the local stack until `token` can be
    /// shifted or the parse accepts.
    fn reduces_to_shift(&mut self, prod: usize, token: i32) -> bool {
        self.stastack.clear();
        self.stastack.extend_from_slice(&self.lclstack);
        let mut prod = prod;
        loop {
            let action = loop {
                let depth = self.stastack.len() - self.tables.rhslength[prod];
                self.stastack.truncate(depth);
                let state = *self.stastack.last().expect("stack bottoms at state 1");
                let action = self.decode_goto(state, self.tables.lhsymbol[prod]);
                self.stastack.push(match action {
                    Action::Shift(next) => next,
                    Action::ShiftReduce(next) => {
                        prod = next;
                        next
                    }
                    _ => 0,
                });
                if !matches!(action, Action::ShiftReduce(_)) {
                    break action;
                }
            };
            if matches!(action, Action::Accept) {
                return true;
            }
            let state = *self.stastack.last().expect("stack is nonempty");
            match self.decode_action(state, token) {
                Action::Shift(_) | Action::ShiftReduce(_) => return true,
                Action::Reduce(next) => prod = next,
                _ => return false,
            }
        }
    }

    /// Builds the continuation string from the error stack by parsing to
    /// acceptance with the per-state continuation values, recording each
    /// prefix's admissible terminals along the way.
    fn build_continuation(&mut self) -> Result<()> {
        self.lclstack.clear();
        self.lclstack.extend_from_slice(&self.errstack);

        self.insertion.clear();
        self.insertion.push(InsertEntry::default());
        for entry in self.followset.iter_mut() {
            *entry = -1;
        }

        loop {
            let value = self.error_value()?;
            let action = if value < 0 {
                Action::Reduce((-value) as usize)
            } else {
                let state = *self.lclstack.last().expect("local stack is never empty");
                self.decode_action(state, value)
            };

            match action {
                Action::Shift(next) => {
                    self.lclstack.push(next);
                }
                Action::ShiftReduce(prod) | Action::Reduce(prod) => {
                    // A shiftreduce pushes a placeholder consumed by the
                    // first pop of the reduce chain.
                    if matches!(action, Action::ShiftReduce(_)) {
                        self.lclstack.push(0);
                    }
                    let mut prod = prod;
                    loop {
                        let depth = self.lclstack.len() - self.tables.rhslength[prod];
                        self.lclstack.truncate(depth);
                        let state = *self.lclstack.last().expect("stack bottoms at state 1");
                        let goto = self.decode_goto(state, self.tables.lhsymbol[prod]);
                        match goto {
                            Action::Shift(next) => {
                                self.lclstack.push(next);
                                break;
                            }
                            Action::ShiftReduce(next) => {
                                self.lclstack.push(0);
                                prod = next;
                            }
                            _ => return Ok(()),
                        }
                    }
                }
                // The continuation values only decode to shifts and
                // reduces; anything else ends the simulation.
                _ => return Ok(()),
            }
        }
    }

    /// Parses forward from the error stack with `token` (when positive)
    /// or `count` continuation tokens, followed by `number` input tokens.
    /// Returns how many queued tokens remained when an error stopped the
    /// parse, or 0 when everything was consumed.
    fn look_ahead(
        &mut self,
        callbacks: &mut dyn Callbacks,
        token: i32,
        count: usize,
        number: usize,
    ) -> Result<usize> {
        self.chkqueue.clear();
        if token > 0 {
            self.chkqueue.push(token);
        }
        for i in 1..=count {
            self.chkqueue.push(self.insertion[i].token);
        }
        while self.tknqueue.len() < number {
            self.input_token(callbacks)?;
        }
        for i in 0..number {
            self.chkqueue.push(self.tknqueue[i].token);
        }

        self.stastack.clear();
        self.stastack.extend_from_slice(&self.errstack);

        let mut index = 0usize;
        loop {
            let state = *self.stastack.last().expect("stack is nonempty");
            match self.decode_action(state, self.chkqueue[index]) {
                action @ (Action::Shift(_) | Action::ShiftReduce(_)) => {
                    let mut prod = match action {
                        Action::Shift(next) => {
                            self.stastack.push(next);
                            0
                        }
                        Action::ShiftReduce(next) => {
                            self.stastack.push(0);
                            next
                        }
                        _ => unreachable!(),
                    };
                    index += 1;
                    if index >= self.chkqueue.len() {
                        return Ok(0);
                    }
                    while prod != 0 {
                        let depth = self.stastack.len() - self.tables.rhslength[prod];
                        self.stastack.truncate(depth);
                        let state = *self.stastack.last().expect("stack bottoms at state 1");
                        match self.decode_goto(state, self.tables.lhsymbol[prod]) {
                            Action::Shift(next) => {
                                self.stastack.push(next);
                                prod = 0;
                            }
                            Action::ShiftReduce(next) => {
                                self.stastack.push(0);
                                prod = next;
                            }
                            _ => return Ok(0),
                        }
                    }
                }
                Action::Reduce(mut prod) => loop {
                    let depth = self.stastack.len() - self.tables.rhslength[prod];
                    self.stastack.truncate(depth);
                    let state = *self.stastack.last().expect("stack bottoms at state 1");
                    match self.decode_goto(state, self.tables.lhsymbol[prod]) {
                        Action::Shift(next) => {
                            self.stastack.push(next);
                            break;
                        }
                        Action::ShiftReduce(next) => {
                            self.stastack.push(0);
                            prod = next;
                        }
                        _ => return Ok(0),
                    }
                },
                Action::Error => return Ok(self.chkqueue.len() - index),
                Action::Accept => return Ok(0),
            }
        }
    }

    /// Reports the chosen repair as deletion, insertion, or replacement
    /// diagnostics, transferring deleted symbol text onto matching
    /// insertions so a replacement reads naturally.
    fn record_repair(&mut self, insert: i32) {
        let mut message = String::new();
        let mut location = self.tknqueue[0].location;

        let mut i = 0;
        while i < self.deletion.len() {
            location = self.deletion[i].location;
            // Deletions are grouped by line; only the last group of a
            // repair with an insertion reads as a replacement.
            let mut j = i + 1;
            while j < self.deletion.len() && self.deletion[j].locus == self.deletion[j - 1].locus {
                j += 1;
            }

            message.clear();
            message.push_str(if j < self.deletion.len() || insert == 0 {
                "Deleted:"
            } else {
                "Replaced:"
            });
            while i < j {
                message.push(' ');
                match &self.deletion[i].symbol {
                    Some(symbol) => message.push_str(symbol),
                    None => message.push_str(self.tables.token_name(self.deletion[i].token)),
                }
                i += 1;
            }

            if i < self.deletion.len() || insert == 0 {
                self.record_error(location, message.clone());
            }
        }

        if insert != 0 {
            if self.deletion.is_empty() {
                location = self.tknqueue[0].location;
                message.clear();
                message.push_str("Inserted:");
            } else {
                message.push_str("  with ");
                // Inserted tokens matching a deleted one inherit its
                // symbol text so the message reads as a replacement.
                for i in 1..=insert.max(0) as usize {
                    for j in 0..self.deletion.len() {
                        if self.deletion[j].token == self.insertion[i].token
                            && self.deletion[j].symbol.is_some()
                        {
                            self.insertion[i].symbol = self.deletion[j].symbol.take();
                            break;
                        }
                    }
                }
            }

            for i in 1..=insert.max(0) as usize {
                message.push(' ');
                match &self.insertion[i].symbol {
                    Some(symbol) => message.push_str(symbol),
                    None => message.push_str(self.tables.token_name(self.insertion[i].token)),
                }
            }
            self.record_error(location, message);
        }
    }

    /// Determines and applies the locally least-cost repair for the
    /// current syntax error, then leaves the repaired tokens at the head
    /// of the input so the driver resumes normally.
    pub(crate) fn repair_error(&mut self, callbacks: &mut dyn Callbacks) -> Result<()> {
        // Snapshot the state column of the parse stack, then apply queued
        // reduces symbolically until the top is a real state; shiftreduce
        // placeholders carry no state of their own.
        self.errstack.clear();
        for entry in &self.parstack {
            self.errstack.push(entry.state);
        }
        let mut i = 0;
        while *self.errstack.last().expect("stack is nonempty") == 0 {
            self.errstack.truncate(self.redqueue[i].pointer);
            self.errstack.push(self.redqueue[i].state);
            i += 1;
        }

        self.build_continuation()?;

        let mut choice = Repair {
            token: -1,
            prefix: -1,
            cost: MAXCOST,
        };
        let mut delete = 0i32;
        self.scnstack.clear();
        self.deletion.clear();

        loop {
            // The cheapest admissible terminal whose insertion makes the
            // next input token legal within one further step.
            let mut insert = Repair {
                token: -1,
                prefix: -1,
                cost: MAXCOST,
            };
            for token in 1..=self.tables.tnumber as i32 {
                if self.followset[token as usize] != 0
                    || token == self.insertion[1].token
                    || self.look_ahead(callbacks, token, 0, 1)? != 0
                {
                    continue;
                }
                let mut cost = delete + self.tables.inscost[token as usize];
                if self.tables.context > 1 {
                    let consumed =
                        self.look_ahead(callbacks, token, 0, self.tables.context as usize)?;
                    cost += (consumed as i32 * self.tables.defcost) / self.tables.context;
                }
                if cost < insert.cost {
                    insert.token = token;
                    insert.cost = cost;
                }
            }

            if self.tknqueue.is_empty() {
                self.input_token(callbacks)?;
            }
            let token = self.tknqueue[0].token;

            // Inserting the continuation prefix that makes the current
            // input token admissible.
            let mut prefix = Repair {
                token: -1,
                prefix: 0,
                cost: MAXCOST,
            };
            if self.followset[token as usize] >= 0 {
                let known = self.followset[token as usize];
                let mut cost = delete + self.insertion[known as usize].cost;
                if self.tables.context > 0 {
                    let consumed = self.look_ahead(
                        callbacks,
                        0,
                        known as usize,
                        self.tables.context as usize,
                    )?;
                    cost += (consumed as i32 * self.tables.defcost) / self.tables.context;
                }
                prefix.prefix = known;
                prefix.cost = cost;
            }

            if insert.cost < choice.cost || prefix.cost < choice.cost {
                choice = if insert.cost <= prefix.cost { insert } else { prefix };
                // A new least-cost repair commits everything scanned over
                // so far as deletions.
                self.deletion.append(&mut self.scnstack);
            }

            // Keep scanning while deleting up to the next token still
            // undercuts the best repair found.
            if delete + self.tables.delcost[token as usize] < choice.cost {
                let front = self.tknqueue.pop_front().expect("token queued");
                self.scnstack.push(front);
                delete += self.tables.delcost[token as usize];
            } else {
                break;
            }
        }

        // Scanned but undeleted tokens return to the head of the input.
        for entry in self.scnstack.drain(..).rev() {
            self.tknqueue.push_front(entry);
        }

        // A plain token insertion is reported and applied as a length-one
        // continuation prefix.
        let token = self.tknqueue[0].token as usize;
        if choice.token > 0 {
            self.insertion[1].token = choice.token;
            self.insertion[1].symbol = None;
            self.followset[token] = 1;
        }

        self.record_repair(self.followset[token]);
        self.deletion.clear();

        // The inserted tokens go in front of the input, carrying the
        // position of the token they precede.
        if self.followset[token] > 0 {
            let count = self.followset[token] as usize;
            let (locus, location) = {
                let front = &self.tknqueue[0];
                (front.locus, front.location)
            };
            for i in (1..=count).rev() {
                self.tknqueue.push_front(TokenEntry {
                    token: self.insertion[i].token,
                    symbol: self.insertion[i].symbol.take(),
                    locus,
                    location,
                });
            }
        }
        self.insertion.clear();
        Ok(())
    }
}
