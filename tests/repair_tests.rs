//! Unit tests for locally least-cost error repair.

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

use pretty_assertions::assert_eq;
use sdtgen::error::SdtError;
use sdtgen::lalr::generate;
use sdtgen::parse_grammar;
use sdtgen::parser::ParseContext;
use sdtgen::tables::ParseTables;
use sdtgen::{Grammar, NoCallbacks};

#[derive(Clone, Default)]
struct Sink(Rc<RefCell<Vec<u8>>>);

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn compile(text: &str) -> (Grammar, ParseTables) {
    let front = parse_grammar(text).unwrap();
    let mut grammar = front.grammar;
    let tables = generate(&mut grammar).unwrap();
    let parse = ParseTables::build(&grammar, &tables, &front.scan).unwrap();
    (grammar, parse)
}

fn run(tables: &ParseTables, input: &str) -> (Result<Vec<usize>, SdtError>, String) {
    let sink = Sink::default();
    let mut context = ParseContext::new(
        tables,
        Box::new(std::io::Cursor::new(input.as_bytes().to_vec())),
        Box::new(sink.clone()),
        false,
    );
    let result = context
        .parse(&mut NoCallbacks)
        .map(|_| context.reductions.clone());
    drop(context);
    let output = String::from_utf8(sink.0.borrow().clone()).unwrap();
    (result, output)
}

const ASSIGN: &str = "\
NAME assign
OPTIONS ERRORREPAIR
CONTEXT 3
DEFCOST 5
TOKEN \"=\" INSCOST 1 DELCOST 1
TOKEN id INSCOST 2 DELCOST 2
START A
A -> id \"=\" id
";

#[test]
fn test_least_cost_insertion() {
    let (_, tables) = compile(ASSIGN);
    let (result, output) = run(&tables, "a b");
    let reductions = result.unwrap();
    assert!(output.contains("Inserted: ="), "output: {output:?}");
    // The repaired parse reduces the assignment and the goal.
    assert_eq!(reductions.len(), 2);
}

#[test]
fn test_least_cost_deletion() {
    let (_, tables) = compile(ASSIGN);
    let (result, output) = run(&tables, "a = = b");
    let reductions = result.unwrap();
    assert!(output.contains("Deleted: ="), "output: {output:?}");
    assert!(!output.contains("Inserted"), "output: {output:?}");
    assert_eq!(reductions.len(), 2);
}

#[test]
fn test_replacement_reads_as_one_diagnostic() {
    let (_, tables) = compile(
        "\
NAME assign
OPTIONS ERRORREPAIR
CONTEXT 3
DEFCOST 5
TOKEN \"=\" INSCOST 1 DELCOST 1
TOKEN \"!\" INSCOST 9 DELCOST 1
TOKEN id INSCOST 2 DELCOST 2
START A
A -> id \"=\" id
",
    );
    // The bad token deletes and the insertion lands in its place.
    let (result, output) = run(&tables, "a ! b");
    result.unwrap();
    assert!(
        output.contains("Replaced: !  with ="),
        "output: {output:?}"
    );
}

#[test]
fn test_valid_input_repairs_nothing() {
    let (_, tables) = compile(ASSIGN);
    let (result, output) = run(&tables, "a = b");
    result.unwrap();
    assert!(output.is_empty());
}

#[test]
fn test_repair_idempotence_against_plain_tables() {
    // A valid sentence drives the repair-enabled tables through exactly
    // the derivation the repair-free tables produce.
    let with_repair = compile(ASSIGN);
    let plain = compile(
        "\
NAME assign
TOKEN \"=\"
TOKEN id
START A
A -> id \"=\" id
",
    );
    let (result_a, _) = run(&with_repair.1, "a = b");
    let (result_b, _) = run(&plain.1, "a = b");
    let shape = |tables: &ParseTables, reductions: Vec<usize>| {
        reductions
            .into_iter()
            .map(|p| (tables.lhsymbol[p], tables.rhslength[p]))
            .collect::<Vec<_>>()
    };
    assert_eq!(
        shape(&with_repair.1, result_a.unwrap()),
        shape(&plain.1, result_b.unwrap())
    );
}

#[test]
fn test_missing_continuation_is_fatal() {
    let (_, tables) = compile(ASSIGN);
    // A state with no continuation value cannot start a repair; the
    // parser reports a plain syntax error and gives up.
    let mut crippled = tables.clone();
    for entry in crippled.repair.iter_mut() {
        *entry = 0;
    }
    let (result, output) = run(&crippled, "a b");
    assert!(matches!(result, Err(SdtError::FatalSyntax)));
    assert!(output.contains("Syntax error"), "output: {output:?}");
    // The offending line flushes before the parser exits.
    assert!(output.contains("a b"), "output: {output:?}");
}

#[test]
fn test_repair_resumes_across_multiple_errors() {
    let (_, tables) = compile(
        "\
NAME list
OPTIONS ERRORREPAIR
CONTEXT 3
DEFCOST 5
TOKEN \",\" INSCOST 1 DELCOST 1
TOKEN id INSCOST 2 DELCOST 2
START L
L -> id | L \",\" id
",
    );
    let (result, output) = run(&tables, "a b c");
    result.unwrap();
    // Both missing separators are inserted independently.
    assert_eq!(output.matches("Inserted: ,").count(), 2, "output: {output:?}");
}
