//! Position-addressable chunked input.
//!
//! Input is a chain of fixed-size buffers, each with a monotone sequence
//! number.  A [`Location`] is a `(buffer order, offset)` pair and the pair
//! ordering is the total order over positions.  Reads extend the chain on
//! demand; buffers preceding the first unwritten listing line are freed.

use std::io::Read;

use crate::error::Result;
use crate::tables::ENDFILE;

/// Amount of data read from the input in one read.
pub const MAXBUFFER: usize = 8192;

/// A position within the input stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Location {
    pub order: usize,
    pub offset: usize,
}

#[derive(Debug)]
struct Buffer {
    order: usize,
    data: Vec<u8>,
}

/// The buffer chain and its reader.
pub struct InputChain {
    buffers: Vec<Buffer>,
    reader: Box<dyn Read>,
    endfile: bool,
}

impl std::fmt::Debug for InputChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputChain")
            .field("buffers", &self.buffers.len())
            .field("endfile", &self.endfile)
            .finish()
    }
}

impl InputChain {
    pub fn new(reader: Box<dyn Read>) -> InputChain {
        InputChain {
            buffers: vec![Buffer {
                order: 0,
                data: Vec::with_capacity(MAXBUFFER),
            }],
            reader,
            endfile: false,
        }
    }

    fn index_of(&self, order: usize) -> Option<usize> {
        let first = self.buffers.first()?.order;
        order.checked_sub(first).filter(|&i| i < self.buffers.len())
    }

    /// Bytes currently held by the buffer with the given order.
    pub fn count(&self, order: usize) -> usize {
        self.index_of(order)
            .map(|i| self.buffers[i].data.len())
            .unwrap_or(0)
    }

    /// The byte at a location that is known to be filled.
    pub fn byte_at(&self, location: Location) -> u8 {
        let index = self.index_of(location.order).expect("location is live");
        self.buffers[index].data[location.offset]
    }

    /// Ensures a readable byte exists at `location`, advancing it across
    /// a buffer boundary or reading more data as needed.  Returns false
    /// at end of file.
    pub fn make_readable(&mut self, location: &mut Location) -> Result<bool> {
        loop {
            if location.offset < self.count(location.order) {
                return Ok(true);
            }
            let last_order = self.buffers.last().map(|b| b.order).unwrap_or(0);
            if location.order < last_order {
                *location = Location {
                    order: location.order + 1,
                    offset: 0,
                };
                continue;
            }
            if self.endfile {
                return Ok(false);
            }
            // Append to the last buffer, or chain a fresh one when full.
            if self.count(last_order) >= MAXBUFFER {
                self.buffers.push(Buffer {
                    order: last_order + 1,
                    data: Vec::with_capacity(MAXBUFFER),
                });
                continue;
            }
            let index = self.buffers.len() - 1;
            let buffer = &mut self.buffers[index];
            let filled = buffer.data.len();
            buffer.data.resize(MAXBUFFER, 0);
            let count = self.reader.read(&mut buffer.data[filled..])?;
            buffer.data.truncate(filled + count);
            if count == 0 {
                self.endfile = true;
            }
        }
    }

    /// Advances a location one byte, crossing buffer boundaries between
    /// already-read data.
    pub fn advance(&self, location: &mut Location) {
        location.offset += 1;
        if location.offset >= self.count(location.order) {
            if let Some(index) = self.index_of(location.order)
                && index + 1 < self.buffers.len()
            {
                *location = Location {
                    order: location.order + 1,
                    offset: 0,
                };
            }
        }
    }

    /// Releases buffers wholly before `location`.
    pub fn release_before(&mut self, location: Location) {
        while self.buffers.len() > 1 && self.buffers[0].order < location.order {
            self.buffers.remove(0);
        }
    }
}

/// Cursor state for reading characters off a chain.
#[derive(Debug, Clone, Copy)]
pub struct Cursor {
    pub position: Location,
    /// True when the next character starts a new line.
    pub newline: bool,
    /// Beginning of the current input line.
    pub beginning: Location,
}

impl Default for Cursor {
    fn default() -> Self {
        Cursor {
            position: Location::default(),
            newline: true,
            beginning: Location::default(),
        }
    }
}

impl Cursor {
    /// Reads the next character, returning it with its position.  End of
    /// file reads as [`ENDFILE`] and counts as the start of the next line.
    pub fn next_char(&mut self, chain: &mut InputChain) -> Result<(i32, Location)> {
        let mut position = self.position;
        if !chain.make_readable(&mut position)? {
            self.position = position;
            self.beginning = position;
            return Ok((ENDFILE, position));
        }
        self.position = position;
        let where_ = self.position;
        if self.newline {
            self.beginning = self.position;
            self.newline = false;
        }
        let ch = chain.byte_at(self.position);
        self.position.offset += 1;
        if ch == b'\n' {
            self.newline = true;
        }
        Ok((ch as i32, where_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(text: &str) -> InputChain {
        InputChain::new(Box::new(std::io::Cursor::new(text.as_bytes().to_vec())))
    }

    #[test]
    fn characters_come_back_in_order_with_positions() {
        let mut input = chain("ab\nc");
        let mut cursor = Cursor::default();
        let (a, at_a) = cursor.next_char(&mut input).unwrap();
        assert_eq!(a, i32::from(b'a'));
        assert_eq!(at_a, Location { order: 0, offset: 0 });
        let (b, _) = cursor.next_char(&mut input).unwrap();
        assert_eq!(b, i32::from(b'b'));
        let (nl, _) = cursor.next_char(&mut input).unwrap();
        assert_eq!(nl, i32::from(b'\n'));
        let (c, at_c) = cursor.next_char(&mut input).unwrap();
        assert_eq!(c, i32::from(b'c'));
        // The newline marked c as the beginning of its line.
        assert_eq!(cursor.beginning, at_c);
    }

    #[test]
    fn end_of_file_repeats() {
        let mut input = chain("x");
        let mut cursor = Cursor::default();
        cursor.next_char(&mut input).unwrap();
        let (first, _) = cursor.next_char(&mut input).unwrap();
        let (second, _) = cursor.next_char(&mut input).unwrap();
        assert_eq!(first, ENDFILE);
        assert_eq!(second, ENDFILE);
    }

    #[test]
    fn locations_order_across_buffers() {
        let early = Location { order: 0, offset: 500 };
        let late = Location { order: 1, offset: 0 };
        assert!(early < late);
    }

    #[test]
    fn long_input_crosses_buffer_boundaries() {
        let text = "a".repeat(MAXBUFFER + 10);
        let mut input = chain(&text);
        let mut cursor = Cursor::default();
        let mut count = 0;
        loop {
            let (ch, _) = cursor.next_char(&mut input).unwrap();
            if ch == ENDFILE {
                break;
            }
            assert_eq!(ch, i32::from(b'a'));
            count += 1;
        }
        assert_eq!(count, MAXBUFFER + 10);
    }
}
