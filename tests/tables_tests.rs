//! Unit tests for table serialization.

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

use pretty_assertions::assert_eq;
use sdtgen::NoCallbacks;
use sdtgen::lalr::generate;
use sdtgen::parse_grammar;
use sdtgen::parser::ParseContext;
use sdtgen::tables::ParseTables;

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

const CALC: &str = "\
NAME calc
OPTIONS AMBIGUOUS ERRORREPAIR
CONTEXT 3
DEFCOST 5
TOKEN \"+\" LEFT PREC 1 INSCOST 1 DELCOST 1
TOKEN \"*\" LEFT PREC 2 INSCOST 1 DELCOST 1
TOKEN id INSTALL INSCOST 2 DELCOST 2
START E
E -> E \"+\" E =1 | E \"*\" E =2 | id =3
";

fn compile() -> ParseTables {
    let front = parse_grammar(CALC).unwrap();
    let mut grammar = front.grammar;
    let tables = generate(&mut grammar).unwrap();
    ParseTables::build(&grammar, &tables, &front.scan).unwrap()
}

fn reductions(tables: &ParseTables, input: &str) -> Vec<usize> {
    let mut context = ParseContext::new(
        tables,
        Box::new(std::io::Cursor::new(input.as_bytes().to_vec())),
        Box::new(Sink::default()),
        false,
    );
    context.parse(&mut NoCallbacks).unwrap();
    context.reductions.clone()
}

#[test]
fn test_header_carries_the_language_shape() {
    let tables = compile();
    let mut out = Vec::new();
    tables.write(&mut out, false).unwrap();
    let text = String::from_utf8(out).unwrap();
    let header = text.lines().next().unwrap();
    let words: Vec<&str> = header.split_whitespace().collect();
    assert_eq!(words[0], "0");
    assert_eq!(words[1], tables.tnumber.to_string());
    assert_eq!(words[2], tables.ntokens.to_string());
    assert_eq!(words[3], tables.snumber.to_string());
    assert_eq!(words[4], tables.ntnumber.to_string());
    assert_eq!(words[5], tables.gnumber.to_string());
    assert_eq!(words[6], tables.pnumber.to_string());
    assert_eq!(words[9], "calc");
}

#[test]
fn test_lines_wrap_at_eighty_columns() {
    let tables = compile();
    for packed in [false, true] {
        let mut out = Vec::new();
        tables.write(&mut out, packed).unwrap();
        let text = String::from_utf8(out).unwrap();
        for line in text.lines().skip(1) {
            assert!(line.len() <= 80, "line too long: {line:?}");
        }
    }
}

#[test]
fn test_uncompressed_tables_round_trip() {
    let tables = compile();
    let mut out = Vec::new();
    tables.write(&mut out, false).unwrap();
    let loaded = ParseTables::read(&String::from_utf8(out).unwrap()).unwrap();

    assert_eq!(loaded.tnumber, tables.tnumber);
    assert_eq!(loaded.gnumber, tables.gnumber);
    assert_eq!(loaded.pnumber, tables.pnumber);
    assert_eq!(loaded.names, tables.names);
    assert_eq!(loaded.inscost, tables.inscost);
    assert_eq!(loaded.delcost, tables.delcost);
    assert_eq!(loaded.repair, tables.repair);
    assert_eq!(
        reductions(&loaded, "a + b * c"),
        reductions(&tables, "a + b * c")
    );
}

#[test]
fn test_packed_tables_parse_identically() {
    let tables = compile();
    let mut packed = Vec::new();
    tables.write(&mut packed, true).unwrap();
    let loaded = ParseTables::read(&String::from_utf8(packed).unwrap()).unwrap();

    for input in ["a", "a + b", "a + b * c", "a * a * a + b"] {
        assert_eq!(reductions(&loaded, input), reductions(&tables, input));
    }
}

#[test]
fn test_packed_tables_repair_identically() {
    let tables = compile();
    let mut packed = Vec::new();
    tables.write(&mut packed, true).unwrap();
    let loaded = ParseTables::read(&String::from_utf8(packed).unwrap()).unwrap();

    let diagnose = |tables: &ParseTables, input: &str| {
        let sink = Sink::default();
        let mut context = ParseContext::new(
            tables,
            Box::new(std::io::Cursor::new(input.as_bytes().to_vec())),
            Box::new(sink.clone()),
            false,
        );
        context.parse(&mut NoCallbacks).unwrap();
        drop(context);
        String::from_utf8(sink.0.borrow().clone()).unwrap()
    };
    for input in ["a b", "a + + b", "a *"] {
        assert_eq!(diagnose(&loaded, input), diagnose(&tables, input));
    }
}

#[test]
fn test_every_action_survives_packing() {
    let tables = compile();
    let mut out = Vec::new();
    tables.write(&mut out, true).unwrap();
    let loaded = ParseTables::read(&String::from_utf8(out).unwrap()).unwrap();
    for state in 1..=tables.pnumber {
        for token in 1..=(tables.tnumber + tables.ntnumber) as i32 {
            assert_eq!(
                loaded.action(state, token),
                tables.action(state, token),
                "state {state} token {token}"
            );
        }
    }
}
