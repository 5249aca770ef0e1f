//! Streaming LR parse driver.
//!
//! Reductions are queued rather than executed when decoded; their semantic
//! actions fire only when the next terminal shift commits.  This keeps
//! semantic side effects from happening before an error repair might
//! retroactively replace the triggering reduction.

use std::collections::VecDeque;
use std::io::{Read, Write};

use crate::diag::{LineWriter, MessageQueue};
use crate::error::Result;
use crate::input::{Cursor, InputChain, Location};
use crate::lalr::{ACCEPT_OFFSET, SHIFT_OFFSET};
use crate::tables::ParseTables;

/// One scanned token.
#[derive(Debug, Clone, Default)]
pub struct TokenEntry {
    pub token: i32,
    /// Token text, recorded when the token's install flag is set.
    pub symbol: Option<String>,
    /// Start of the containing line.
    pub locus: Location,
    /// Token start position.
    pub location: Location,
}

/// One entry on the parse stack.
#[derive(Debug, Clone, Default)]
pub struct ParseEntry {
    pub state: usize,
    pub location: Location,
    pub token: i32,
    pub symbol: Option<String>,
}

/// One delayed reduce.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReduceEntry {
    /// Production number.
    pub number: usize,
    /// Stack pointer after the right hand side is popped and the left
    /// hand side pushed.
    pub pointer: usize,
    /// State for the left hand side shift, 0 under a shiftreduce.
    pub state: usize,
}

/// One entry in the repair continuation string.
#[derive(Debug, Clone, Default)]
pub(crate) struct InsertEntry {
    pub token: i32,
    pub symbol: Option<String>,
    /// Accumulated insertion cost up to this token.
    pub cost: i32,
    /// True once the admissible set for this prefix is recorded.
    pub known: bool,
}

/// Application callbacks fired by the driver.
pub trait Callbacks {
    /// Fires per reduction carrying a nonzero semantic number.
    fn perform_action(&mut self, _semantic: i32) {}
    /// Fires per lexed token whose token carries the install flag; the
    /// callback may intern the text and override the token number.
    fn install_token(&mut self, _token: &mut TokenEntry) {}
}

/// No-op callbacks for recognition-only parses.
#[derive(Debug, Default)]
pub struct NoCallbacks;

impl Callbacks for NoCallbacks {}

/// A decoded parser action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Action {
    Error,
    Shift(usize),
    ShiftReduce(usize),
    Reduce(usize),
    Accept,
}

/// Everything owned by one parse: tables, input, stacks, queues, and the
/// error repair scratch areas.  Resources live for the whole context and
/// drop together on every exit path.
pub struct ParseContext<'t> {
    pub(crate) tables: &'t ParseTables,
    pub(crate) chain: InputChain,
    pub(crate) cursor: Cursor,
    pub(crate) lines: LineWriter,
    pub(crate) queue: MessageQueue,
    pub(crate) out: Box<dyn Write>,

    /// End-of-token resume positions indexed by token number.
    tokenend: Vec<Location>,
    pub(crate) tknqueue: VecDeque<TokenEntry>,
    pub(crate) parstack: Vec<ParseEntry>,
    pub(crate) redqueue: Vec<ReduceEntry>,

    pub(crate) errstack: Vec<usize>,
    pub(crate) lclstack: Vec<usize>,
    pub(crate) stastack: Vec<usize>,
    pub(crate) chkqueue: Vec<i32>,
    pub(crate) scnstack: Vec<TokenEntry>,
    pub(crate) deletion: Vec<TokenEntry>,
    pub(crate) insertion: Vec<InsertEntry>,
    /// Shortest continuation prefix after which each terminal becomes
    /// admissible; -1 when not yet known.
    pub(crate) followset: Vec<i32>,

    /// Reduce trace for tests and tools: production numbers in the order
    /// their reductions were committed.
    pub reductions: Vec<usize>,
}

impl<'t> ParseContext<'t> {
    /// Builds a context over loaded tables, an input reader, and an
    /// output stream for the listing and diagnostics.
    pub fn new(
        tables: &'t ParseTables,
        reader: Box<dyn Read>,
        out: Box<dyn Write>,
        listing: bool,
    ) -> ParseContext<'t> {
        ParseContext {
            tables,
            chain: InputChain::new(reader),
            cursor: Cursor::default(),
            lines: LineWriter {
                listing,
                ..LineWriter::default()
            },
            queue: MessageQueue::new(),
            out,
            tokenend: vec![Location::default(); tables.ntokens + 2],
            tknqueue: VecDeque::new(),
            parstack: Vec::new(),
            redqueue: Vec::new(),
            errstack: Vec::new(),
            lclstack: Vec::new(),
            stastack: Vec::new(),
            chkqueue: Vec::new(),
            scnstack: Vec::new(),
            deletion: Vec::new(),
            insertion: Vec::new(),
            followset: vec![-1; tables.tnumber + 1],
            reductions: Vec::new(),
        }
    }

    /// Records a syntax or semantic diagnostic at a position.
    pub fn record_error(&mut self, point: Location, message: String) {
        self.queue.record(&self.chain, point, Some(message));
    }

    pub(crate) fn decode_action(&self, state: usize, token: i32) -> Action {
        let value = self.tables.action(state, token);
        if value == 0 {
            Action::Error
        } else if value <= ACCEPT_OFFSET {
            Action::Accept
        } else if value < 0 {
            Action::Reduce((-value) as usize)
        } else if value > SHIFT_OFFSET {
            Action::Shift((value - SHIFT_OFFSET) as usize)
        } else {
            Action::ShiftReduce(value as usize)
        }
    }

    /// Decodes the goto cell for a nonterminal produced by a reduce; a
    /// missing or non-positive cell is the accept action.
    pub(crate) fn decode_goto(&self, state: usize, token: i32) -> Action {
        let value = self.tables.action(state, token);
        if value > SHIFT_OFFSET {
            Action::Shift((value - SHIFT_OFFSET) as usize)
        } else if value > 0 {
            Action::ShiftReduce(value as usize)
        } else {
            Action::Accept
        }
    }

    /// Scans the next language token onto the token queue, skipping
    /// ignored tokens and recovering from lexical errors by dropping one
    /// byte at a time.
    pub(crate) fn input_token(&mut self, callbacks: &mut dyn Callbacks) -> Result<()> {
        let mut entry = TokenEntry::default();
        let mut final_state;
        loop {
            let (mut ch, mut location) = self.cursor.next_char(&mut self.chain)?;
            entry.locus = self.cursor.beginning;
            entry.location = location;

            final_state = 0;
            let mut state = 1usize;
            loop {
                // Record the resume position for tokens that may end here
                // and remember the last final state passed through.
                for i in self.tables.tokenindex[state]..self.tables.tokenindex[state + 1] {
                    self.tokenend[self.tables.tokentable[i]] = location;
                }
                if self.tables.finals[state] != 0 {
                    final_state = state;
                }
                let next = self.tables.scan_next(state, ch);
                if next == 0 {
                    break;
                }
                state = next;
                (ch, location) = self.cursor.next_char(&mut self.chain)?;
            }

            if final_state == 0 {
                // No final state seen: a lexical error.  Report it, skip
                // one byte, and scan again.
                self.queue.record(&self.chain, entry.location, None);
                self.cursor.position = entry.location;
                self.cursor.position.offset += 1;
                continue;
            }

            // Back up to the end of the longest token found.
            let token = self.tables.finals[final_state];
            self.cursor.position = self.tokenend[token];
            if token <= self.tables.tnumber {
                entry.token = token as i32;
                break;
            }
            // An ignored token; keep scanning.
        }

        if self.tables.install[final_state] {
            // Copy the token text into a contiguous buffer and let the
            // application inspect it.
            let mut text = Vec::new();
            let mut location = entry.location;
            while location < self.cursor.position {
                text.push(self.chain.byte_at(location));
                self.chain.advance(&mut location);
            }
            entry.symbol = Some(String::from_utf8_lossy(&text).into_owned());
            callbacks.install_token(&mut entry);
        }

        self.tknqueue.push_back(entry);
        Ok(())
    }

    /// Fires the delayed reduces: semantic actions run, right hand sides
    /// pop off the real stack, and left hand side entries push.
    pub(crate) fn perform_reduces(
        &mut self,
        callbacks: &mut dyn Callbacks,
        location: Location,
    ) -> Result<()> {
        for i in 0..self.redqueue.len() {
            let entry = self.redqueue[i];
            self.reductions.push(entry.number);
            if self.tables.semantics[entry.number] != 0 {
                callbacks.perform_action(self.tables.semantics[entry.number]);
            }
            self.parstack.truncate(entry.pointer);
            self.parstack.push(ParseEntry {
                state: entry.state,
                location,
                token: self.tables.lhsymbol[entry.number],
                symbol: None,
            });
        }
        self.redqueue.clear();
        Ok(())
    }

    /// Queues the reduce chain starting at `prod`, simulating the stack
    /// pops without touching the real stack.  Returns true on accept.
    fn queue_reduces(
        &mut self,
        mut prod: usize,
        state: &mut usize,
        pointer: &mut usize,
        knownptr: &mut usize,
    ) -> bool {
        loop {
            *pointer -= self.tables.rhslength[prod];
            if *pointer < *knownptr {
                *knownptr = *pointer;
            }
            if *pointer > *knownptr {
                // Inside the region delayed reduces have reshaped: the
                // most recent reduce that popped to this depth names the
                // state; none means an epsilon reduce left it unchanged.
                for i in (0..self.redqueue.len()).rev() {
                    if self.redqueue[i].pointer <= *pointer {
                        if self.redqueue[i].pointer == *pointer {
                            *state = self.redqueue[i].state;
                        }
                        break;
                    }
                }
            } else {
                // Below the reshaped region the real stack is authoritative.
                *state = self.parstack[*pointer].state;
            }

            let action = self.decode_goto(*state, self.tables.lhsymbol[prod]);
            *state = match action {
                Action::Shift(next) => next,
                _ => 0,
            };
            *pointer += 1;
            self.redqueue.push(ReduceEntry {
                number: prod,
                pointer: *pointer,
                state: *state,
            });

            match action {
                Action::ShiftReduce(next) => prod = next,
                Action::Accept => return true,
                _ => return false,
            }
        }
    }

    /// The driver loop: decode, shift with delayed-reduce commit, queue
    /// reduces, repair on error, accept.
    pub fn parse(&mut self, callbacks: &mut dyn Callbacks) -> Result<()> {
        self.parstack.push(ParseEntry {
            state: 1,
            ..ParseEntry::default()
        });

        let mut state = 1usize;
        let mut pointer = 0usize;
        let mut knownptr = 0usize;
        let mut last_location = Location::default();

        loop {
            if self.tknqueue.is_empty() {
                self.input_token(callbacks)?;
            }
            let token = self.tknqueue[0].token;

            match self.decode_action(state, token) {
                action @ (Action::Shift(_) | Action::ShiftReduce(_)) => {
                    // Committing to a terminal shift fires the queued
                    // reduces first.
                    last_location = self.parstack[self.parstack.len() - 1].location;
                    self.perform_reduces(callbacks, last_location)?;

                    state = match action {
                        Action::Shift(next) => next,
                        _ => 0,
                    };
                    pointer = self.parstack.len();
                    knownptr = pointer;
                    let mut front = self.tknqueue.pop_front().expect("token queued");
                    self.parstack.push(ParseEntry {
                        state,
                        location: front.location,
                        token: front.token,
                        symbol: front.symbol.take(),
                    });

                    // All lines before the shifted terminal are complete.
                    while self.lines.unwritten < front.locus {
                        let ParseContext {
                            chain,
                            lines,
                            queue,
                            out,
                            ..
                        } = self;
                        lines.write_line(chain, queue, out)?;
                    }

                    if let Action::ShiftReduce(prod) = action
                        && self.queue_reduces(prod, &mut state, &mut pointer, &mut knownptr)
                    {
                        break;
                    }
                }
                Action::Reduce(prod) => {
                    if self.queue_reduces(prod, &mut state, &mut pointer, &mut knownptr) {
                        break;
                    }
                }
                Action::Error => {
                    self.repair_error(callbacks)?;
                }
                Action::Accept => break,
            }
        }

        // Finish off reduces postponed past the accept, then flush the
        // remaining lines and diagnostics.
        self.perform_reduces(callbacks, last_location)?;
        while !self.queue.is_empty() {
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
        Ok(())
    }
}
