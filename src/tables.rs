//! The scanner and parser table contract, serialization, and packing.
//!
//! A [`ParseTables`] value is everything the runtime needs: the compressed
//! scanner transition tables, the packed parser action tables, per-terminal
//! repair costs, per-production metadata, the per-state continuation
//! values, and the token name blob used by diagnostics.
//!
//! The table file is text.  The header line is
//! `type tnumber ntokens snumber ntnumber gnumber pnumber context defcost
//! name`; type 0 carries uncompressed transition and action sections, type
//! 1 the packed `base`/`check`/`next` triples.  Table lines wrap at 80
//! columns.

use std::io::Write;

use crate::error::{Result, SdtError};
use crate::grammar::Grammar;
use crate::lalr::LalrTables;
use crate::scanner::ScanTables;

/// Number of scanner transition columns: one per byte plus the synthetic
/// end-of-file column.
pub const MAPCOUNT: usize = 257;

/// Synthetic character representing end of file.
pub const ENDFILE: i32 = 256;

/// Maximum table line length in the serialized file.
pub const MAXLINE: usize = 80;

/// Complete scanner and parser tables for one language.
#[derive(Debug, Clone, Default)]
pub struct ParseTables {
    pub name: String,
    /// Number of terminal symbols in the language.
    pub tnumber: usize,
    /// Number of scanner tokens including ignored ones.
    pub ntokens: usize,
    /// Number of scanner states.
    pub snumber: usize,
    /// Number of nonterminal symbols.
    pub ntnumber: usize,
    /// Number of productions.
    pub gnumber: usize,
    /// Number of parser states.
    pub pnumber: usize,
    /// Error repair context window.
    pub context: i32,
    /// Assumed default cost of an error repair.
    pub defcost: i32,

    /// Per scanner state, the range of `tokentable` recording token ends;
    /// `tokenindex[s]..tokenindex[s + 1]` for states `1..=snumber`.
    pub tokenindex: Vec<usize>,
    pub tokentable: Vec<usize>,
    /// Final token for each scanner state, 0 when not final.
    pub finals: Vec<usize>,
    /// Token text is recorded and handed to the install callback.
    pub install: Vec<bool>,
    pub sdefault: Vec<usize>,
    pub sbase: Vec<usize>,
    pub scheck: Vec<usize>,
    pub snext: Vec<usize>,

    /// Insertion cost per terminal, `1..=tnumber`.
    pub inscost: Vec<i32>,
    /// Deletion cost per terminal.
    pub delcost: Vec<i32>,
    /// Left hand side token per production, `1..=gnumber`.
    pub lhsymbol: Vec<i32>,
    /// Non-epsilon right hand side length per production.
    pub rhslength: Vec<usize>,
    /// Semantic routine number per production.
    pub semantics: Vec<i32>,
    /// Continuation value per parser state.
    pub repair: Vec<i32>,
    /// Token names, `1..=tnumber + ntnumber`; entry 0 is empty.
    pub names: Vec<String>,
    pub pbase: Vec<usize>,
    pub pcheck: Vec<i32>,
    pub pnext: Vec<i32>,
}

impl ParseTables {
    /// Assembles runtime tables from a generated machine and scanner.
    pub fn build(grammar: &Grammar, lalr: &LalrTables, scan: &ScanTables) -> Result<ParseTables> {
        let tnumber = grammar.term_count;
        let ntnumber = grammar.nonterm_count;
        let gnumber = grammar.productions.len() - 1;
        let pnumber = lalr.collection.len() - 1;

        let mut inscost = vec![0i32; tnumber + 1];
        let mut delcost = vec![0i32; tnumber + 1];
        for token in 1..=tnumber {
            let symbol = grammar.symbols.get(grammar.term_table[token]);
            inscost[token] = symbol.insert_cost;
            delcost[token] = symbol.delete_cost;
        }

        let mut lhsymbol = vec![0i32; gnumber + 1];
        let mut rhslength = vec![0usize; gnumber + 1];
        let mut semantics = vec![0i32; gnumber + 1];
        for prod in 1..=gnumber {
            lhsymbol[prod] = grammar.token(grammar.productions[prod].lhs);
            rhslength[prod] = grammar.rhs_nonempty_len(prod);
            semantics[prod] = grammar.productions[prod].semantic;
        }

        let mut names = vec![String::new()];
        for token in 1..=tnumber {
            names.push(grammar.symbols.name(grammar.term_table[token]).to_string());
        }
        for ordinal in 1..=ntnumber {
            names.push(
                grammar
                    .symbols
                    .name(grammar.nonterm_table[ordinal])
                    .to_string(),
            );
        }

        // Pack the action rows: states with the most actions are placed
        // first so the dense rows claim low bases.
        let columns = tnumber + ntnumber + 1;
        let mut rows = vec![vec![0i32; columns]];
        for state in 1..=pnumber {
            rows.push(lalr.lrstates[state].clone());
        }
        let order = pack_order(&rows);
        let (pbase, pcheck, pnext) = first_fit_pack(&rows, &order)?;

        Ok(ParseTables {
            name: grammar.name.clone(),
            tnumber,
            ntokens: scan.ntokens,
            snumber: scan.snumber,
            ntnumber,
            gnumber,
            pnumber,
            context: grammar.context,
            defcost: grammar.defcost,
            tokenindex: scan.tokenindex.clone(),
            tokentable: scan.tokentable.clone(),
            finals: scan.finals.clone(),
            install: scan.install.clone(),
            sdefault: scan.sdefault.clone(),
            sbase: scan.sbase.clone(),
            scheck: scan.scheck.clone(),
            snext: scan.snext.clone(),
            inscost,
            delcost,
            lhsymbol,
            rhslength,
            semantics,
            repair: lalr.errortoken.clone(),
            names,
            pbase,
            pcheck,
            pnext,
        })
    }

    /// Decodes the parser action cell for a state and token; 0 is error.
    #[inline]
    pub fn action(&self, state: usize, token: i32) -> i32 {
        let index = self.pbase[state] + token as usize;
        if index < self.pcheck.len() && self.pcheck[index] == state as i32 {
            self.pnext[index]
        } else {
            0
        }
    }

    /// Next scanner state from `state` on `ch`, chasing the default chain.
    pub fn scan_next(&self, mut state: usize, ch: i32) -> usize {
        loop {
            let index = self.sbase[state] + ch as usize;
            if index < self.scheck.len() && self.scheck[index] == state {
                return self.snext[index];
            }
            state = self.sdefault[state];
            if state == 0 {
                return 0;
            }
        }
    }

    #[inline]
    pub fn token_name(&self, token: i32) -> &str {
        &self.names[token as usize]
    }

    /// Writes the tables; `packed` selects type 1 output.
    pub fn write(&self, out: &mut dyn Write, packed: bool) -> Result<()> {
        writeln!(
            out,
            "{} {} {} {} {} {} {} {} {} {}",
            if packed { 1 } else { 0 },
            self.tnumber,
            self.ntokens,
            self.snumber,
            self.ntnumber,
            self.gnumber,
            self.pnumber,
            self.context,
            self.defcost,
            self.name
        )?;

        // Scanner sections.
        let index: Vec<i32> = (1..=self.snumber + 1)
            .map(|s| self.tokenindex[s] as i32)
            .collect();
        write_table(&index, out)?;
        let table: Vec<i32> = self.tokentable.iter().map(|&t| t as i32).collect();
        write_table(&table, out)?;
        let finals: Vec<i32> = (1..=self.snumber).map(|s| self.finals[s] as i32).collect();
        write_table(&finals, out)?;
        let install: Vec<i32> = (1..=self.snumber)
            .map(|s| self.install[s] as i32)
            .collect();
        write_table(&install, out)?;
        if packed {
            let sdefault: Vec<i32> = (1..=self.snumber)
                .map(|s| self.sdefault[s] as i32)
                .collect();
            write_table(&sdefault, out)?;
            let sbase: Vec<i32> = (1..=self.snumber).map(|s| self.sbase[s] as i32).collect();
            write_table(&sbase, out)?;
            writeln!(out, "{}", self.scheck.len())?;
            let scheck: Vec<i32> = self.scheck.iter().map(|&v| v as i32).collect();
            write_table(&scheck, out)?;
            let snext: Vec<i32> = self.snext.iter().map(|&v| v as i32).collect();
            write_table(&snext, out)?;
        } else {
            let mut dense = Vec::with_capacity(self.snumber * MAPCOUNT);
            for state in 1..=self.snumber {
                for ch in 0..MAPCOUNT {
                    dense.push(self.scan_next(state, ch as i32) as i32);
                }
            }
            write_table(&dense, out)?;
        }

        // Parser sections.
        write_table(&self.inscost[1..], out)?;
        write_table(&self.delcost[1..], out)?;
        write_table(&self.lhsymbol[1..], out)?;
        let rhs: Vec<i32> = self.rhslength[1..].iter().map(|&v| v as i32).collect();
        write_table(&rhs, out)?;
        write_table(&self.semantics[1..], out)?;
        write_table(&self.repair[1..], out)?;

        // Token name index and concatenated blob.
        let mut offsets = Vec::with_capacity(self.names.len());
        let mut size = 0usize;
        for name in &self.names[1..] {
            offsets.push(size as i32);
            size += name.len();
        }
        offsets.push(size as i32);
        write_table(&offsets, out)?;
        writeln!(out, "{MAXLINE}")?;
        let blob: String = self.names[1..].concat();
        let mut written = 0;
        while written < blob.len() {
            let end = (written + MAXLINE).min(blob.len());
            writeln!(out, "{}", &blob[written..end])?;
            written = end;
        }

        // Action tables.
        if packed {
            let pbase: Vec<i32> = (1..=self.pnumber).map(|s| self.pbase[s] as i32).collect();
            write_table(&pbase, out)?;
            writeln!(out, "{}", self.pcheck.len())?;
            write_table(&self.pcheck, out)?;
            write_table(&self.pnext, out)?;
        } else {
            let columns = (self.tnumber + self.ntnumber) as i32;
            for state in 1..=self.pnumber {
                let mut pairs = Vec::new();
                for token in 1..=columns {
                    let action = self.action(state, token);
                    if action != 0 {
                        pairs.push(token);
                        pairs.push(action);
                    }
                }
                writeln!(out, "{}", pairs.len() / 2)?;
                write_table(&pairs, out)?;
            }
        }
        Ok(())
    }

    /// Reads a table file of either type.  Type 0 input is packed in
    /// memory with the same first-fit used by the writer, so both forms
    /// drive identical parses.
    pub fn read(text: &str) -> Result<ParseTables> {
        let mut reader = TableReader::new(text);
        let kind = reader.next_int()?;
        if kind != 0 && kind != 1 {
            return Err(SdtError::BadTableFile(format!("unknown type {kind}")));
        }
        let packed = kind == 1;
        let tnumber = reader.next_int()? as usize;
        let ntokens = reader.next_int()? as usize;
        let snumber = reader.next_int()? as usize;
        let ntnumber = reader.next_int()? as usize;
        let gnumber = reader.next_int()? as usize;
        let pnumber = reader.next_int()? as usize;
        let context = reader.next_int()? as i32;
        let defcost = reader.next_int()? as i32;
        let name = reader.rest_of_line();

        let mut tables = ParseTables {
            name,
            tnumber,
            ntokens,
            snumber,
            ntnumber,
            gnumber,
            pnumber,
            context,
            defcost,
            ..ParseTables::default()
        };

        // Scanner sections.
        tables.tokenindex = vec![0];
        for _ in 0..=snumber {
            tables.tokenindex.push(reader.next_int()? as usize);
        }
        let length = *tables.tokenindex.last().unwrap();
        for _ in 0..length {
            tables.tokentable.push(reader.next_int()? as usize);
        }
        tables.finals = reader.padded_vec(snumber, |v| v as usize)?;
        tables.install = reader.padded_vec(snumber, |v| v != 0)?;
        if packed {
            tables.sdefault = reader.padded_vec(snumber, |v| v as usize)?;
            tables.sbase = reader.padded_vec(snumber, |v| v as usize)?;
            let count = reader.next_int()? as usize;
            for _ in 0..count {
                tables.scheck.push(reader.next_int()? as usize);
            }
            for _ in 0..count {
                tables.snext.push(reader.next_int()? as usize);
            }
        } else {
            let mut rows = vec![vec![0i32; MAPCOUNT]];
            for _ in 1..=snumber {
                let mut row = Vec::with_capacity(MAPCOUNT);
                for _ in 0..MAPCOUNT {
                    row.push(reader.next_int()? as i32);
                }
                rows.push(row);
            }
            let order = pack_order(&rows);
            let (base, check, next) = first_fit_pack(&rows, &order)?;
            tables.sdefault = vec![0; snumber + 1];
            tables.sbase = base;
            tables.scheck = check.iter().map(|&v| v as usize).collect();
            tables.snext = next.iter().map(|&v| v as usize).collect();
        }

        // Parser sections.
        tables.inscost = reader.padded_vec(tnumber, |v| v as i32)?;
        tables.delcost = reader.padded_vec(tnumber, |v| v as i32)?;
        tables.lhsymbol = reader.padded_vec(gnumber, |v| v as i32)?;
        tables.rhslength = reader.padded_vec(gnumber, |v| v as usize)?;
        tables.semantics = reader.padded_vec(gnumber, |v| v as i32)?;
        tables.repair = reader.padded_vec(pnumber, |v| v as i32)?;

        let total = tnumber + ntnumber;
        let mut offsets = Vec::with_capacity(total + 1);
        for _ in 0..=total {
            offsets.push(reader.next_int()? as usize);
        }
        let _width = reader.next_int()?;
        let blob = reader.read_blob(offsets[total])?;
        tables.names = vec![String::new()];
        for token in 0..total {
            tables.names.push(blob[offsets[token]..offsets[token + 1]].to_string());
        }

        if packed {
            tables.pbase = reader.padded_vec(pnumber, |v| v as usize)?;
            let count = reader.next_int()? as usize;
            for _ in 0..count {
                tables.pcheck.push(reader.next_int()? as i32);
            }
            for _ in 0..count {
                tables.pnext.push(reader.next_int()? as i32);
            }
        } else {
            let columns = tnumber + ntnumber + 1;
            let mut rows = vec![vec![0i32; columns]];
            for _ in 1..=pnumber {
                let mut row = vec![0i32; columns];
                let count = reader.next_int()? as usize;
                for _ in 0..count {
                    let token = reader.next_int()? as usize;
                    let action = reader.next_int()? as i32;
                    if token >= columns {
                        return Err(SdtError::BadTableFile(format!(
                            "action token {token} out of range"
                        )));
                    }
                    row[token] = action;
                }
                rows.push(row);
            }
            let order = pack_order(&rows);
            let (pbase, pcheck, pnext) = first_fit_pack(&rows, &order)?;
            tables.pbase = pbase;
            tables.pcheck = pcheck;
            tables.pnext = pnext;
        }
        Ok(tables)
    }
}

/// Packing order: states with the most nonzero cells first, state number
/// breaking ties, so packing is deterministic.
pub(crate) fn pack_order(rows: &[Vec<i32>]) -> Vec<usize> {
    let mut order: Vec<usize> = (1..rows.len()).collect();
    order.sort_by_key(|&s| {
        let count = rows[s].iter().filter(|&&v| v != 0).count();
        (std::cmp::Reverse(count), s)
    });
    order
}

/// First-fit packs sparse rows into `base`/`check`/`next`.  `check` holds
/// the owning row number so a probe can validate its cell.
pub(crate) fn first_fit_pack(
    rows: &[Vec<i32>],
    order: &[usize],
) -> Result<(Vec<usize>, Vec<i32>, Vec<i32>)> {
    let mut base = vec![0usize; rows.len()];
    let mut check: Vec<i32> = Vec::new();
    let mut next: Vec<i32> = Vec::new();
    for &state in order {
        let occupied: Vec<usize> = rows[state]
            .iter()
            .enumerate()
            .filter(|&(_, &v)| v != 0)
            .map(|(t, _)| t)
            .collect();
        if occupied.is_empty() {
            continue;
        }
        let mut slot = 0usize;
        'fit: loop {
            for &t in &occupied {
                let index = slot + t;
                if index < check.len() && check[index] != 0 {
                    slot += 1;
                    continue 'fit;
                }
            }
            break;
        }
        base[state] = slot;
        let limit = slot + occupied.last().unwrap() + 1;
        if check.len() < limit {
            check.resize(limit, 0);
            next.resize(limit, 0);
        }
        for &t in &occupied {
            check[slot + t] = state as i32;
            next[slot + t] = rows[state][t];
        }
    }
    if check.len() != next.len() {
        return Err(SdtError::Internal(
            "check/next table length mismatch during packing".to_string(),
        ));
    }
    Ok((base, check, next))
}

fn digit_count(mut value: i64) -> usize {
    if value == 0 {
        return 1;
    }
    let mut digits = 0;
    while value > 0 {
        digits += 1;
        value /= 10;
    }
    digits
}

/// Writes integer values wrapped at [`MAXLINE`] columns.  Negative values
/// widen the column by one position for the sign.
fn write_table<T: Into<i64> + Copy>(values: &[T], out: &mut dyn Write) -> Result<()> {
    let mut width = 0i64;
    for &value in values {
        let value: i64 = value.into();
        let magnitude = if value < 0 { -value * 10 } else { value };
        width = width.max(magnitude);
    }
    let width = digit_count(width);

    let mut full = false;
    let mut length = 0usize;
    for (index, &value) in values.iter().enumerate() {
        let value: i64 = value.into();
        if length + width > MAXLINE || full {
            writeln!(out)?;
            full = false;
            length = 0;
        }
        write!(out, "{value:>width$}")?;
        length += width;
        if index + 1 < values.len() && length + 1 + width <= MAXLINE {
            write!(out, " ")?;
            length += 1;
        } else {
            full = true;
        }
    }
    if length > 0 {
        writeln!(out)?;
    }
    Ok(())
}

/// Streaming reader over the text table format.
struct TableReader<'a> {
    text: &'a str,
    position: usize,
}

impl<'a> TableReader<'a> {
    fn new(text: &'a str) -> Self {
        TableReader { text, position: 0 }
    }

    fn next_int(&mut self) -> Result<i64> {
        let bytes = self.text.as_bytes();
        while self.position < bytes.len() && bytes[self.position].is_ascii_whitespace() {
            self.position += 1;
        }
        let start = self.position;
        if self.position < bytes.len() && (bytes[self.position] == b'-') {
            self.position += 1;
        }
        while self.position < bytes.len() && bytes[self.position].is_ascii_digit() {
            self.position += 1;
        }
        self.text[start..self.position]
            .parse()
            .map_err(|_| SdtError::BadTableFile(format!("expected integer at byte {start}")))
    }

    /// Reads `count` values and returns them 1-based with a zero pad.
    fn padded_vec<T: Default + Clone>(
        &mut self,
        count: usize,
        convert: impl Fn(i64) -> T,
    ) -> Result<Vec<T>> {
        let mut values = vec![T::default()];
        for _ in 0..count {
            values.push(convert(self.next_int()?));
        }
        Ok(values)
    }

    fn rest_of_line(&mut self) -> String {
        let bytes = self.text.as_bytes();
        let start = self.position;
        while self.position < bytes.len() && bytes[self.position] != b'\n' {
            self.position += 1;
        }
        let line = self.text[start..self.position].trim().to_string();
        if self.position < bytes.len() {
            self.position += 1;
        }
        line
    }

    /// Reads a raw character blob of `count` bytes, skipping line breaks.
    fn read_blob(&mut self, count: usize) -> Result<String> {
        // Skip the rest of the width line.
        self.rest_of_line();
        let bytes = self.text.as_bytes();
        let mut blob = String::with_capacity(count);
        while blob.len() < count {
            if self.position >= bytes.len() {
                return Err(SdtError::BadTableFile("truncated name blob".to_string()));
            }
            let ch = bytes[self.position];
            self.position += 1;
            if ch != b'\n' && ch != b'\r' {
                blob.push(ch as char);
            }
        }
        Ok(blob)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_fit_round_trips_rows() {
        let rows = vec![
            vec![0, 0, 0, 0],
            vec![0, 5, 0, -2],
            vec![0, 0, 7, 0],
            vec![0, 3, 2, 1],
        ];
        let order = pack_order(&rows);
        let (base, check, next) = first_fit_pack(&rows, &order).unwrap();
        for state in 1..rows.len() {
            for token in 0..rows[state].len() {
                let index = base[state] + token;
                let value = if index < check.len() && check[index] == state as i32 {
                    next[index]
                } else {
                    0
                };
                assert_eq!(value, rows[state][token], "state {state} token {token}");
            }
        }
    }

    #[test]
    fn write_table_wraps_at_line_limit() {
        let values: Vec<i32> = (0..200).map(|v| v % 10).collect();
        let mut out = Vec::new();
        write_table(&values, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        for line in text.lines() {
            assert!(line.len() <= MAXLINE);
        }
        let parsed: Vec<i32> = text.split_whitespace().map(|t| t.parse().unwrap()).collect();
        assert_eq!(parsed, values);
    }

    #[test]
    fn negative_values_widen_the_column() {
        let values = vec![-7i32, 42];
        let mut out = Vec::new();
        write_table(&values, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "-7 42\n");
    }
}
