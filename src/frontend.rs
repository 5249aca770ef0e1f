//! Declarative grammar-description reader.
//!
//! Produces the front-end contract for table generation: a symbol table,
//! an ordered production list with semantic numbers, per-terminal
//! precedence, associativity, repair costs, and flags, the start symbol,
//! the repair parameters, and the scanner token specs.
//!
//! # Format
//!
//! ```text
//! NAME expr
//! OPTIONS AMBIGUOUS ERRORREPAIR SHIFTREDUCE SPLITSTATES
//! CONTEXT 3
//! DEFCOST 5
//! TOKEN "+" LEFT PREC 1 INSCOST 1 DELCOST 1
//! TOKEN id INSTALL
//! START E
//! E -> E "+" T =1 | T
//! ```
//!
//! Terminals are quoted literals or the built-in classes `id` and
//! `number`; bare names in rule bodies are nonterminals unless declared
//! as tokens.  `#` starts a comment and alternatives may carry a
//! trailing `=n` semantic number.

use std::collections::HashMap;

use crate::error::{Result, SdtError};
use crate::grammar::{Grammar, GrammarBuilder};
use crate::scanner::{Lexeme, ScanTables, TokenSpec, build_tables};
use crate::symbol::{Assoc, SymbolId};

/// The front-end output: the grammar, the scanner tables for its
/// terminals, and any recoverable diagnostics.
#[derive(Debug)]
pub struct FrontEnd {
    pub grammar: Grammar,
    pub scan: ScanTables,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone)]
struct Declared {
    lexeme: Option<Lexeme>,
    install: bool,
    case: bool,
}

/// Parses a grammar description into the generation contract.
pub fn parse_grammar(text: &str) -> Result<FrontEnd> {
    let mut builder = GrammarBuilder::new();
    let mut warnings = Vec::new();
    let mut declared: HashMap<SymbolId, Declared> = HashMap::new();

    for (number, raw) in text.lines().enumerate() {
        let line = match raw.find('#') {
            Some(at) => &raw[..at],
            None => raw,
        };
        let words: Vec<&str> = line.split_whitespace().collect();
        if words.is_empty() {
            continue;
        }

        match words[0] {
            "NAME" => {
                if words.len() != 2 {
                    return Err(SdtError::InvalidFormat(format!(
                        "line {}: NAME takes one identifier",
                        number + 1
                    )));
                }
                builder.name(words[1]);
            }
            "OPTIONS" => {
                for &word in &words[1..] {
                    match word {
                        "AMBIGUOUS" => builder.options().ambiguous = true,
                        "ERRORREPAIR" => builder.options().error_repair = true,
                        "SHIFTREDUCE" => builder.options().default_reduce = true,
                        "SPLITSTATES" => builder.options().split_states = true,
                        _ => warnings
                            .push(format!("line {}: Unknown parser option ignored", number + 1)),
                    }
                }
            }
            "CONTEXT" => builder.context(parse_number(&words, number)?),
            "DEFCOST" => builder.defcost(parse_number(&words, number)?),
            "TOKEN" => {
                parse_token(&mut builder, &mut declared, &words, number, &mut warnings)?;
            }
            "START" => {
                if words.len() != 2 {
                    return Err(SdtError::InvalidFormat(format!(
                        "line {}: START takes one nonterminal",
                        number + 1
                    )));
                }
                let start = builder.nonterminal(words[1]);
                builder.start(start);
            }
            _ if line.contains("->") => {
                parse_rule(&mut builder, &mut declared, line, number, &mut warnings)?;
            }
            _ => {
                return Err(SdtError::InvalidFormat(format!(
                    "line {}: unrecognized directive {}",
                    number + 1,
                    words[0]
                )));
            }
        }
    }

    let grammar = builder.finish()?;

    // Undefined nonterminals derive nothing; lowering continues but the
    // condition is worth a diagnostic.
    for ordinal in 2..=grammar.nonterm_count {
        let id = grammar.nonterm_table[ordinal];
        if grammar.alternatives(id).is_empty() {
            warnings.push(format!(
                "Undefined nonterminal {}",
                grammar.symbols.name(id)
            ));
        }
    }

    // Scanner specs for every numbered terminal except the sentinel,
    // which matches end of file directly.
    let mut specs = Vec::new();
    for token in 1..grammar.term_count {
        let id = grammar.term_table[token];
        if let Some(decl) = declared.get(&id)
            && let Some(lexeme) = &decl.lexeme
        {
            specs.push(TokenSpec {
                token,
                lexeme: lexeme.clone(),
                install: decl.install,
                case: decl.case,
            });
        }
        // Aliases spell the same token differently.
        let mut alias = grammar.symbols.get(id).alias;
        while let Some(next) = alias {
            if let Some(decl) = declared.get(&next)
                && let Some(lexeme) = &decl.lexeme
            {
                specs.push(TokenSpec {
                    token,
                    lexeme: lexeme.clone(),
                    install: decl.install,
                    case: decl.case,
                });
            }
            alias = grammar.symbols.get(next).alias;
        }
    }
    let scan = build_tables(&specs, grammar.term_count, grammar.term_count)?;

    Ok(FrontEnd {
        grammar,
        scan,
        warnings,
    })
}

fn parse_number(words: &[&str], number: usize) -> Result<i32> {
    if words.len() != 2 {
        return Err(SdtError::InvalidFormat(format!(
            "line {}: {} takes one number",
            number + 1,
            words[0]
        )));
    }
    words[1].parse().map_err(|_| {
        SdtError::InvalidFormat(format!("line {}: invalid number {}", number + 1, words[1]))
    })
}

/// Unquotes a literal, reporting a missing close quote as recoverable.
fn unquote(word: &str, number: usize, warnings: &mut Vec<String>) -> Option<String> {
    if !word.starts_with('"') {
        return None;
    }
    if word.len() < 3 || !word.ends_with('"') {
        warnings.push(format!("line {}: Missing close quote", number + 1));
        return Some(word.trim_matches('"').to_string());
    }
    Some(word[1..word.len() - 1].to_string())
}

fn parse_token(
    builder: &mut GrammarBuilder,
    declared: &mut HashMap<SymbolId, Declared>,
    words: &[&str],
    number: usize,
    warnings: &mut Vec<String>,
) -> Result<()> {
    if words.len() < 2 {
        return Err(SdtError::InvalidFormat(format!(
            "line {}: TOKEN takes a lexeme",
            number + 1
        )));
    }
    let (name, lexeme) = match unquote(words[1], number, warnings) {
        Some(text) => (text.clone(), Some(Lexeme::Literal(text))),
        None => match words[1] {
            "id" => ("id".to_string(), Some(Lexeme::Identifier)),
            "number" => ("number".to_string(), Some(Lexeme::Number)),
            bare => (bare.to_string(), None),
        },
    };

    if builder.lookup_terminal(&name).is_some() {
        return Err(SdtError::InvalidFormat(format!(
            "line {}: Duplicate token definition {}",
            number + 1,
            name
        )));
    }

    // An alias is declared against its base and chains onto it.
    let alias_of = words.iter().position(|&w| w == "ALIAS");
    let id = if let Some(at) = alias_of {
        let base_name = words.get(at + 1).copied().ok_or_else(|| {
            SdtError::InvalidFormat(format!("line {}: ALIAS takes a token", number + 1))
        })?;
        let base_name = unquote(base_name, number, warnings)
            .unwrap_or_else(|| base_name.to_string());
        let base = builder.lookup_terminal(&base_name).ok_or_else(|| {
            SdtError::InvalidFormat(format!(
                "line {}: Undefined alias definition {}",
                number + 1,
                base_name
            ))
        })?;
        match builder.alias(&name, base) {
            Ok(id) => id,
            Err(error) => {
                warnings.push(format!("line {}: {}", number + 1, error));
                return Ok(());
            }
        }
    } else {
        builder.terminal(&name)
    };

    let mut decl = Declared {
        lexeme,
        install: false,
        case: false,
    };
    let mut index = 2;
    while index < words.len() {
        match words[index] {
            "LEFT" | "RIGHT" | "NONE" => {
                let assoc = match words[index] {
                    "LEFT" => Assoc::Left,
                    "RIGHT" => Assoc::Right,
                    _ => Assoc::None,
                };
                let precedence = builder.symbol(id).precedence;
                builder.set_precedence(id, precedence, assoc);
            }
            "PREC" => {
                index += 1;
                let value: i32 = next_value(words, index, number)?;
                let assoc = builder.symbol(id).assoc;
                builder.set_precedence(id, value, assoc);
            }
            "INSCOST" => {
                index += 1;
                let value: i32 = next_value(words, index, number)?;
                let delete = builder.symbol(id).delete_cost;
                builder.set_costs(id, value, delete);
            }
            "DELCOST" => {
                index += 1;
                let value: i32 = next_value(words, index, number)?;
                let insert = builder.symbol(id).insert_cost;
                builder.set_costs(id, insert, value);
            }
            "INSTALL" => {
                builder.set_install(id);
                decl.install = true;
            }
            "CASE" => {
                builder.set_case(id);
                decl.case = true;
            }
            "EMPTY" => {
                builder.set_empty(id);
                decl.lexeme = None;
            }
            "ALIAS" => {
                index += 1;
            }
            other => {
                warnings.push(format!(
                    "line {}: unknown token attribute {} ignored",
                    number + 1,
                    other
                ));
            }
        }
        index += 1;
    }
    declared.insert(id, decl);
    Ok(())
}

fn next_value(words: &[&str], index: usize, number: usize) -> Result<i32> {
    words
        .get(index)
        .and_then(|w| w.parse().ok())
        .ok_or_else(|| {
            SdtError::InvalidFormat(format!("line {}: expected a number", number + 1))
        })
}

fn parse_rule(
    builder: &mut GrammarBuilder,
    declared: &mut HashMap<SymbolId, Declared>,
    line: &str,
    number: usize,
    warnings: &mut Vec<String>,
) -> Result<()> {
    let (head, body) = line.split_once("->").expect("caller checked for an arrow");
    let head = head.trim();
    if head.is_empty() || head.split_whitespace().count() != 1 {
        return Err(SdtError::InvalidProduction(format!(
            "line {}: {}",
            number + 1,
            line.trim()
        )));
    }
    let lhs = builder.nonterminal(head);

    for alternative in body.split('|') {
        let mut rhs = Vec::new();
        let mut semantic = 0;
        for word in alternative.split_whitespace() {
            if let Some(value) = word.strip_prefix('=') {
                semantic = value.parse().map_err(|_| {
                    SdtError::InvalidProduction(format!(
                        "line {}: bad semantic number {}",
                        number + 1,
                        word
                    ))
                })?;
                continue;
            }
            if let Some(text) = unquote(word, number, warnings) {
                // A literal used in a rule body is declared on first use.
                let id = match builder.lookup_terminal(&text) {
                    Some(id) => id,
                    None => {
                        let id = builder.terminal(&text);
                        declared.insert(
                            id,
                            Declared {
                                lexeme: Some(Lexeme::Literal(text)),
                                install: false,
                                case: false,
                            },
                        );
                        id
                    }
                };
                rhs.push(id);
            } else if let Some(id) = builder.lookup_terminal(word) {
                rhs.push(id);
            } else {
                rhs.push(builder.nonterminal(word));
            }
        }
        builder.production(lhs, &rhs, semantic);
    }
    Ok(())
}
