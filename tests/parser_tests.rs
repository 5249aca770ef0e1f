//! Unit tests for the runtime parser.

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

use pretty_assertions::assert_eq;
use sdtgen::lalr::generate;
use sdtgen::parse_grammar;
use sdtgen::parser::{Callbacks, ParseContext};
use sdtgen::tables::ParseTables;
use sdtgen::{Grammar, NoCallbacks};

/// Output sink shared with the parse context.
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

/// Records the semantic numbers handed to `perform_action`.
#[derive(Default)]
struct Recorder {
    semantics: Vec<i32>,
}

impl Callbacks for Recorder {
    fn perform_action(&mut self, semantic: i32) {
        self.semantics.push(semantic);
    }
}

fn compile(text: &str) -> (Grammar, ParseTables) {
    let front = parse_grammar(text).unwrap();
    let mut grammar = front.grammar;
    let tables = generate(&mut grammar).unwrap();
    let parse = ParseTables::build(&grammar, &tables, &front.scan).unwrap();
    (grammar, parse)
}

fn run(tables: &ParseTables, input: &str, callbacks: &mut dyn Callbacks) -> (Vec<usize>, String) {
    let sink = Sink::default();
    let mut context = ParseContext::new(
        tables,
        Box::new(std::io::Cursor::new(input.as_bytes().to_vec())),
        Box::new(sink.clone()),
        false,
    );
    context.parse(callbacks).unwrap();
    let reductions = context.reductions.clone();
    drop(context);
    let output = String::from_utf8(sink.0.borrow().clone()).unwrap();
    (reductions, output)
}

#[test]
fn test_right_recursive_list() {
    let (grammar, tables) = compile(
        "\
NAME list
TOKEN \"x\"
START L
L -> e | e L
e -> \"x\"
",
    );
    let (reductions, output) = run(&tables, "x x x", &mut NoCallbacks);
    assert!(output.is_empty());

    // Three element reductions, one single-element list, two conses,
    // then the goal production accepts.
    let mut shapes: Vec<(i32, usize)> = reductions
        .iter()
        .map(|&p| (tables.lhsymbol[p], tables.rhslength[p]))
        .collect();
    let goal = grammar.token(grammar.goal);
    assert_eq!(shapes.pop(), Some((goal, 2)));
    let l = grammar.token(grammar.start);
    let e = grammar.token(
        grammar
            .symbols
            .lookup("e", sdtgen::symbol::SymbolKind::Nonterminal)
            .unwrap(),
    );
    assert_eq!(
        shapes,
        vec![(e, 1), (e, 1), (e, 1), (l, 1), (l, 2), (l, 2)],
        "elements reduce as they are passed, lists fold up at the end"
    );
}

#[test]
fn test_precedence_binds_star_below_plus() {
    let (_, tables) = compile(
        "\
NAME calc
OPTIONS AMBIGUOUS
TOKEN \"+\" LEFT PREC 1
TOKEN \"*\" LEFT PREC 2
TOKEN id
START E
E -> E \"+\" E =1 | E \"*\" E =2 | id =3
",
    );
    let mut recorder = Recorder::default();
    let (_, output) = run(&tables, "a + b * c", &mut recorder);
    assert!(output.is_empty());
    // b * c reduces before the addition does.
    assert_eq!(recorder.semantics, vec![3, 3, 3, 2, 1]);

    let mut recorder = Recorder::default();
    run(&tables, "a * b + c", &mut recorder);
    assert_eq!(recorder.semantics, vec![3, 3, 2, 3, 1]);

    // LEFT associativity groups a + b first.
    let mut recorder = Recorder::default();
    run(&tables, "a + b + c", &mut recorder);
    assert_eq!(recorder.semantics, vec![3, 3, 1, 3, 1]);
}

#[test]
fn test_dangling_else_binds_inner_if() {
    let (_, tables) = compile(
        "\
NAME cond
OPTIONS AMBIGUOUS
TOKEN \"then\" RIGHT PREC 1
TOKEN \"else\" RIGHT PREC 2
START S
S -> \"if\" E \"then\" S =1 | \"if\" E \"then\" S \"else\" S =2 | \"s\" =3
E -> \"e\" =4
",
    );
    let mut recorder = Recorder::default();
    let (_, output) = run(&tables, "if e then if e then s else s", &mut recorder);
    assert!(output.is_empty());
    // The else clause attaches to the inner if: the two-armed production
    // reduces inside the one-armed one.
    assert_eq!(recorder.semantics, vec![4, 4, 3, 3, 2, 1]);
}

#[test]
fn test_install_tokens_carry_their_text() {
    #[derive(Default)]
    struct Catcher {
        texts: Vec<String>,
    }
    impl Callbacks for Catcher {
        fn install_token(&mut self, token: &mut sdtgen::TokenEntry) {
            self.texts.push(token.symbol.clone().unwrap_or_default());
        }
    }

    let (_, tables) = compile(
        "\
NAME ids
TOKEN id INSTALL
TOKEN \",\"
START L
L -> id | L \",\" id
",
    );
    let mut catcher = Catcher::default();
    run(&tables, "alpha, beta, gamma", &mut catcher);
    assert_eq!(catcher.texts, vec!["alpha", "beta", "gamma"]);
}

#[test]
fn test_lexical_errors_skip_bytes_and_report() {
    let (_, tables) = compile(
        "\
NAME list
TOKEN \"x\"
START L
L -> \"x\" | \"x\" L
",
    );
    let (_, output) = run(&tables, "x @@ x", &mut NoCallbacks);
    // The undefined bytes are reported once, merged, on their line.
    assert!(output.contains("Deleted: @@"), "output: {output:?}");
}

#[test]
fn test_shiftreduce_option_shrinks_the_machine() {
    let plain = compile(
        "\
NAME list
TOKEN \"x\"
START L
L -> \"x\" | \"x\" L
",
    );
    let collapsed = compile(
        "\
NAME list
OPTIONS SHIFTREDUCE
TOKEN \"x\"
START L
L -> \"x\" | \"x\" L
",
    );
    assert!(collapsed.1.pnumber < plain.1.pnumber);

    // Both machines accept the same sentences.
    let (reductions_a, _) = run(&plain.1, "x x", &mut NoCallbacks);
    let (reductions_b, _) = run(&collapsed.1, "x x", &mut NoCallbacks);
    assert_eq!(reductions_a.len(), reductions_b.len());
}

#[test]
fn test_split_states_parse_by_context() {
    let (grammar, tables) = compile(
        "\
NAME merge
OPTIONS SPLITSTATES
START S
S -> \"a\" A \"d\" | \"b\" B \"d\" | \"a\" B \"e\" | \"b\" A \"e\"
A -> \"c\"
B -> \"c\"
",
    );
    let a = grammar
        .symbols
        .lookup("A", sdtgen::symbol::SymbolKind::Nonterminal)
        .unwrap();
    let b = grammar
        .symbols
        .lookup("B", sdtgen::symbol::SymbolKind::Nonterminal)
        .unwrap();

    let (reductions, _) = run(&tables, "a c d", &mut NoCallbacks);
    assert_eq!(tables.lhsymbol[reductions[0]], grammar.token(a));

    let (reductions, _) = run(&tables, "b c d", &mut NoCallbacks);
    assert_eq!(tables.lhsymbol[reductions[0]], grammar.token(b));

    let (reductions, _) = run(&tables, "a c e", &mut NoCallbacks);
    assert_eq!(tables.lhsymbol[reductions[0]], grammar.token(b));

    let (reductions, _) = run(&tables, "b c e", &mut NoCallbacks);
    assert_eq!(tables.lhsymbol[reductions[0]], grammar.token(a));
}
