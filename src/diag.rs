//! Diagnostic queue and listing output.
//!
//! Diagnostics are queued in source order and printed only when their
//! containing line is flushed, so message order is strictly positional.
//! Scanner errors carry no message; byte-adjacent ones merge into a
//! single skipped-characters report.

use std::io::Write;

use crate::error::Result;
use crate::input::{InputChain, Location};

/// A queued diagnostic.  `message` is `None` for scanner errors, whose
/// skipped characters run from `point` through `last`.
#[derive(Debug, Clone)]
pub struct ErrorEntry {
    pub point: Location,
    pub last: Location,
    pub message: Option<String>,
}

/// Diagnostics ordered by source position, stable for equal positions.
#[derive(Debug, Default)]
pub struct MessageQueue {
    entries: Vec<ErrorEntry>,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn first_point(&self) -> Option<Location> {
        self.entries.first().map(|e| e.point)
    }

    /// Queues a diagnostic at `point`.  A scanner error adjacent to the
    /// most recent queued scanner error extends it instead.
    pub fn record(&mut self, chain: &InputChain, point: Location, message: Option<String>) {
        if message.is_none()
            && let Some(last) = self.entries.last_mut()
            && last.message.is_none()
        {
            let mut next = last.last;
            chain.advance(&mut next);
            if next == point {
                last.last = point;
                return;
            }
        }

        // Insert in source order; equal positions keep insertion order.
        let mut index = self.entries.len();
        while index > 0 && self.entries[index - 1].point > point {
            index -= 1;
        }
        self.entries.insert(
            index,
            ErrorEntry {
                point,
                last: point,
                message,
            },
        );
    }

    fn pop_front(&mut self) -> ErrorEntry {
        self.entries.remove(0)
    }
}

/// Column advance of one character; tabs snap to 8-column stops.
fn char_width(ch: u8, column: usize) -> usize {
    if ch == b'\t' { 8 - column % 8 } else { 1 }
}

/// Listing state: the first unwritten line and line numbering.
#[derive(Debug, Default)]
pub struct LineWriter {
    pub unwritten: Location,
    pub lineno: usize,
    pub msgwritten: bool,
    /// Print every line, not just lines carrying diagnostics.
    pub listing: bool,
}

impl LineWriter {
    /// Skips over or writes the line beginning at `unwritten`, emitting
    /// caret-positioned messages for every diagnostic within it, then
    /// releases input buffers that precede the next line.
    pub fn write_line(
        &mut self,
        chain: &mut InputChain,
        queue: &mut MessageQueue,
        out: &mut dyn Write,
    ) -> Result<()> {
        // Find the start of the next line, pretending end of file is one
        // past the last byte so trailing diagnostics flush.
        let mut nextline = self.unwritten;
        let mut probe = nextline;
        if !chain.make_readable(&mut probe)? {
            nextline.offset = chain.count(nextline.order) + 1;
        } else {
            nextline = probe;
            loop {
                let mut ahead = nextline;
                if !chain.make_readable(&mut ahead)? {
                    nextline = ahead;
                    break;
                }
                nextline = ahead;
                let ch = chain.byte_at(nextline);
                nextline.offset += 1;
                if ch == b'\n' {
                    let mut past = nextline;
                    if chain.make_readable(&mut past)? {
                        nextline = past;
                    }
                    break;
                }
            }
        }

        self.lineno += 1;

        let has_message = queue.first_point().is_some_and(|p| p < nextline);
        if self.listing || has_message {
            if self.msgwritten {
                writeln!(out)?;
                self.msgwritten = false;
            }

            let mut where_ = self.unwritten;
            if where_.offset < chain.count(where_.order) {
                write!(out, "{:6}: ", self.lineno)?;
                while where_ < nextline {
                    let ch = chain.byte_at(where_);
                    chain.advance(&mut where_);
                    if ch == b'\n' {
                        break;
                    }
                    out.write_all(&[ch])?;
                }
            } else {
                // An implicit line at end of file, for insertions there.
                write!(out, " <EOF>:")?;
                nextline.offset += 1;
            }
            writeln!(out)?;

            // Caret and message for each diagnostic on the line.
            let mut where_ = self.unwritten;
            let mut column = 0usize;
            while queue.first_point().is_some_and(|p| p < nextline) {
                let entry = queue.pop_front();
                while where_ < entry.point {
                    column += char_width(chain.byte_at(where_), column);
                    chain.advance(&mut where_);
                }

                write!(out, "\t")?;
                let mut indent = column;
                while indent >= 8 {
                    write!(out, "\t")?;
                    indent -= 8;
                }
                writeln!(out, "{:>1$}", '^', indent + 1)?;

                match entry.message {
                    Some(message) => writeln!(out, " *****\t{message}")?,
                    None => {
                        // Scanner errors report the skipped characters.
                        write!(out, " *****\tDeleted: ")?;
                        loop {
                            let ch = chain.byte_at(where_);
                            out.write_all(&[ch])?;
                            column += char_width(ch, column);
                            let past = where_;
                            chain.advance(&mut where_);
                            if past >= entry.last {
                                break;
                            }
                        }
                        writeln!(out)?;
                    }
                }
                self.msgwritten = true;
            }
        }

        self.unwritten = nextline;
        chain.release_before(nextline);
        Ok(())
    }
}
