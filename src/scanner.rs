//! Scanner transition tables.
//!
//! The runtime interprets compressed tables: from state `s` on byte `b`
//! the next state is `next[base[s] + b]` iff `check[base[s] + b] == s`,
//! otherwise the `default[s]` chain is chased.  Regular-expression DFA
//! construction belongs to an external collaborator; this module builds
//! the same tables directly from literal tokens, the two built-in lexeme
//! classes, and an implicit ignored-whitespace token, which is all the
//! declarative front-end needs.

use crate::error::Result;
use crate::tables::{ENDFILE, MAPCOUNT, first_fit_pack, pack_order};

/// How a terminal is spelled in the input stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lexeme {
    /// The exact bytes of the literal.
    Literal(String),
    /// `[A-Za-z_][A-Za-z0-9_]*`, losing to any literal it extends.
    Identifier,
    /// `[0-9]+`.
    Number,
}

/// One terminal the scanner must recognize.
#[derive(Debug, Clone)]
pub struct TokenSpec {
    pub token: usize,
    pub lexeme: Lexeme,
    pub install: bool,
    /// Case-insensitive literal.
    pub case: bool,
}

/// Compressed scanner tables plus the per-state token metadata.
#[derive(Debug, Clone, Default)]
pub struct ScanTables {
    pub snumber: usize,
    /// Total scanner tokens including ignored ones.
    pub ntokens: usize,
    pub tokenindex: Vec<usize>,
    pub tokentable: Vec<usize>,
    pub finals: Vec<usize>,
    pub install: Vec<bool>,
    pub sdefault: Vec<usize>,
    pub sbase: Vec<usize>,
    pub scheck: Vec<usize>,
    pub snext: Vec<usize>,
}

const fn is_id_start(ch: u8) -> bool {
    ch.is_ascii_alphabetic() || ch == b'_'
}

const fn is_id_part(ch: u8) -> bool {
    ch.is_ascii_alphanumeric() || ch == b'_'
}

/// Dense construction state, packed at the end.
struct DenseState {
    row: [usize; MAPCOUNT],
    token: usize,
    install: bool,
    /// The byte string spelling the path to this state.
    path: Vec<u8>,
}

impl DenseState {
    fn new(path: Vec<u8>) -> Self {
        DenseState {
            row: [0; MAPCOUNT],
            token: 0,
            install: false,
            path,
        }
    }
}

/// Builds scanner tables for a set of token specs.  `sentinel` is the
/// token number matched at end of file.  The returned tables include one
/// ignored whitespace token numbered past the terminals.
pub fn build_tables(specs: &[TokenSpec], tnumber: usize, sentinel: usize) -> Result<ScanTables> {
    // State 1 is the start state.
    let mut states = vec![DenseState::new(Vec::new()), DenseState::new(Vec::new())];
    let has_identifier = specs.iter().any(|s| s.lexeme == Lexeme::Identifier);

    // Literals form a byte trie from the start state.
    for spec in specs {
        let Lexeme::Literal(text) = &spec.lexeme else {
            continue;
        };
        let mut state = 1;
        for &byte in text.as_bytes() {
            let mut bytes = vec![byte];
            if spec.case && byte.is_ascii_alphabetic() {
                bytes.push(byte ^ 0x20);
            }
            let next = if states[state].row[bytes[0] as usize] != 0 {
                states[state].row[bytes[0] as usize]
            } else {
                let mut path = states[state].path.clone();
                path.push(bytes[0].to_ascii_lowercase());
                states.push(DenseState::new(path));
                states.len() - 1
            };
            for byte in bytes {
                states[state].row[byte as usize] = next;
            }
            state = next;
        }
        states[state].token = spec.token;
        states[state].install = spec.install;
    }

    // The identifier class: a generic loop state, plus identifier
    // behavior on every trie state whose path reads as an identifier
    // prefix, so keywords lose to the longer identifiers extending them.
    if has_identifier {
        let id_spec = specs
            .iter()
            .find(|s| s.lexeme == Lexeme::Identifier)
            .expect("identifier spec present");
        states.push(DenseState::new(Vec::new()));
        let id_state = states.len() - 1;
        states[id_state].token = id_spec.token;
        states[id_state].install = id_spec.install;
        for ch in 0..=255u8 {
            if is_id_part(ch) {
                states[id_state].row[ch as usize] = id_state;
            }
        }

        for state in 1..states.len() {
            let path = states[state].path.clone();
            let id_prefix = if state == 1 {
                true
            } else {
                is_id_start(path[0]) && path.iter().all(|&c| is_id_part(c))
            };
            if !id_prefix {
                continue;
            }
            for ch in 0..=255u8 {
                let part = if state == 1 {
                    is_id_start(ch)
                } else {
                    is_id_part(ch)
                };
                if part && states[state].row[ch as usize] == 0 {
                    states[state].row[ch as usize] = id_state;
                }
            }
            if state != 1 && states[state].token == 0 {
                states[state].token = id_spec.token;
                states[state].install = id_spec.install;
            }
        }
    }

    // The number class.
    if let Some(spec) = specs.iter().find(|s| s.lexeme == Lexeme::Number) {
        states.push(DenseState::new(Vec::new()));
        let num_state = states.len() - 1;
        states[num_state].token = spec.token;
        states[num_state].install = spec.install;
        for ch in b'0'..=b'9' {
            states[num_state].row[ch as usize] = num_state;
            if states[1].row[ch as usize] == 0 {
                states[1].row[ch as usize] = num_state;
            }
        }
    }

    // Ignored whitespace, numbered past the language terminals.
    let whitespace = tnumber + 1;
    states.push(DenseState::new(Vec::new()));
    let ws_state = states.len() - 1;
    states[ws_state].token = whitespace;
    for ch in [b' ', b'\t', b'\n', b'\r'] {
        states[1].row[ch as usize] = ws_state;
        states[ws_state].row[ch as usize] = ws_state;
    }

    // End of file scans as the sentinel.
    states.push(DenseState::new(Vec::new()));
    let eof_state = states.len() - 1;
    states[eof_state].token = sentinel;
    states[1].row[ENDFILE as usize] = eof_state;

    // Pack the transition rows and collect the per-state metadata.
    let snumber = states.len() - 1;
    let rows: Vec<Vec<i32>> = states
        .iter()
        .map(|s| s.row.iter().map(|&v| v as i32).collect())
        .collect();
    let order = pack_order(&rows);
    let (sbase, check, next) = first_fit_pack(&rows, &order)?;

    let mut tables = ScanTables {
        snumber,
        ntokens: whitespace,
        tokenindex: vec![0; 2],
        tokentable: Vec::new(),
        finals: vec![0; snumber + 1],
        install: vec![false; snumber + 1],
        sdefault: vec![0; snumber + 1],
        sbase,
        scheck: check.iter().map(|&v| v as usize).collect(),
        snext: next.iter().map(|&v| v as usize).collect(),
    };
    for state in 1..=snumber {
        tables.finals[state] = states[state].token;
        tables.install[state] = states[state].install;
        if states[state].token != 0 {
            tables.tokentable.push(states[state].token);
        }
        tables.tokenindex.push(tables.tokentable.len());
    }
    Ok(tables)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn next(tables: &ScanTables, state: usize, ch: i32) -> usize {
        let mut state = state;
        loop {
            let index = tables.sbase[state] + ch as usize;
            if index < tables.scheck.len() && tables.scheck[index] == state {
                return tables.snext[index];
            }
            state = tables.sdefault[state];
            if state == 0 {
                return 0;
            }
        }
    }

    fn scan(tables: &ScanTables, text: &str) -> Vec<usize> {
        // A miniature driver: maximal munch with final-state backtrack.
        let bytes: Vec<i32> = text
            .bytes()
            .map(|b| b as i32)
            .chain(std::iter::once(ENDFILE))
            .collect();
        let mut tokens = Vec::new();
        let mut position = 0;
        while position < bytes.len() {
            let mut state = 1;
            let mut last_final = 0;
            let mut last_end = position;
            let mut cursor = position;
            while cursor < bytes.len() {
                state = next(tables, state, bytes[cursor]);
                if state == 0 {
                    break;
                }
                cursor += 1;
                if tables.finals[state] != 0 {
                    last_final = tables.finals[state];
                    last_end = cursor;
                }
            }
            assert_ne!(last_final, 0, "lexical error at byte {position}");
            tokens.push(last_final);
            position = last_end;
        }
        tokens
    }

    fn specs() -> Vec<TokenSpec> {
        vec![
            TokenSpec {
                token: 1,
                lexeme: Lexeme::Literal("if".to_string()),
                install: false,
                case: false,
            },
            TokenSpec {
                token: 2,
                lexeme: Lexeme::Literal("+".to_string()),
                install: false,
                case: false,
            },
            TokenSpec {
                token: 3,
                lexeme: Lexeme::Identifier,
                install: true,
                case: false,
            },
            TokenSpec {
                token: 4,
                lexeme: Lexeme::Number,
                install: true,
                case: false,
            },
        ]
    }

    #[test]
    fn keywords_beat_identifiers_exactly() {
        let tables = build_tables(&specs(), 5, 5).unwrap();
        assert_eq!(scan(&tables, "if"), vec![1, 5]);
        assert_eq!(scan(&tables, "iffy"), vec![3, 5]);
        assert_eq!(scan(&tables, "i"), vec![3, 5]);
    }

    #[test]
    fn classes_and_literals_mix() {
        let tables = build_tables(&specs(), 5, 5).unwrap();
        // whitespace is token 6 (ignored, past the 5 terminals).
        assert_eq!(scan(&tables, "a+12"), vec![3, 2, 4, 5]);
        assert_eq!(scan(&tables, "a + 12"), vec![3, 6, 2, 6, 4, 5]);
    }

    #[test]
    fn eof_scans_as_the_sentinel() {
        let tables = build_tables(&specs(), 5, 5).unwrap();
        assert_eq!(scan(&tables, ""), vec![5]);
    }

    #[test]
    fn case_insensitive_literals_accept_both_cases() {
        let specs = vec![TokenSpec {
            token: 1,
            lexeme: Lexeme::Literal("do".to_string()),
            install: false,
            case: true,
        }];
        let tables = build_tables(&specs, 2, 2).unwrap();
        assert_eq!(scan(&tables, "DO"), vec![1, 2]);
        assert_eq!(scan(&tables, "dO"), vec![1, 2]);
    }
}
