use emug_core::assembler::Assembler;
use emug_core::ast::{Grammar, NtDef};
use emug_core::builder::{EmugBuilder, Fragment};
use emug_core::error::{EmugError, GrammarError};
use emug_core::lexer::Lexer;
use emug_core::meta;
use miette::{NamedSource, Report};
use std::collections::BTreeSet;

fn reduce(source: &str) -> (Vec<NtDef>, NamedSource<String>) {
    let src = NamedSource::new("test.emug", source.to_string());
    let tokens = Lexer::new(source).lex().unwrap();
    let cst = meta::parse(&tokens, &src).unwrap();
    let mut builder = EmugBuilder::new(src.clone());
    match meta::reduce(cst, &mut builder) {
        Ok(Fragment::Definitions(defs)) => (defs, src),
        Ok(other) => panic!("Expected definitions, got {other:?}"),
        Err(err) => panic!("{:#}", Report::new(err)),
    }
}

fn assemble_ok(source: &str, goals: &[&str]) -> Grammar {
    let (defs, src) = reduce(source);
    let goals = goals.iter().map(|g| g.to_string()).collect::<BTreeSet<_>>();
    match Assembler::new(src).assemble(defs, goals) {
        Ok(grammar) => grammar,
        Err(err) => {
            let report = Report::from(EmugError::from(err));
            panic!("{:#}", report);
        }
    }
}

fn assemble_err(source: &str) -> GrammarError {
    let (defs, src) = reduce(source);
    match Assembler::new(src).assemble(defs, BTreeSet::new()) {
        Ok(_) => panic!("Expected a GrammarError, but got Ok"),
        Err(err) => err,
    }
}

#[test]
fn test_definitions_are_keyed_by_name() {
    let grammar = assemble_ok("A :\n  B\n\nB :\n  `b`\n\nC[X] :\n  [+X] A\n", &[]);
    let names: Vec<_> = grammar.nonterminals.keys().map(String::as_str).collect();
    assert_eq!(names, vec!["A", "B", "C"]);
}

#[test]
fn test_separator_length_classifies_variable_terminals() {
    let grammar = assemble_ok("A :\n  `a`\n\nB ::\n  `b`\n\nC :::\n  `c`\n", &[]);
    assert_eq!(
        grammar.variable_terminals,
        BTreeSet::from(["B".to_string(), "C".to_string()])
    );
    assert!(grammar.get("A").is_some());
    assert!(grammar.get("B").is_none());
    assert!(grammar.get("C").is_none());
}

#[test]
fn test_parameterized_multi_colon_definition_is_stored() {
    let grammar = assemble_ok("Template[Tagged] ::\n  `x`\n", &[]);
    assert!(grammar.is_variable_terminal("Template"));
    assert_eq!(grammar.get("Template").unwrap().params(), ["Tagged".to_string()]);
}

#[test]
fn test_terminals_of_variable_terminals_count_for_collisions() {
    let err = assemble_err("Word ::\n  `Name`\n\nName :\n  `n`\n");
    assert!(matches!(err, GrammarError::NameCollision { ref name, .. } if name == "Name"));
}

#[test]
fn test_terminals_of_parameterized_definitions_are_ignored() {
    let grammar = assemble_ok("A[X] :\n  `B`\n\nB :\n  `b`\n", &[]);
    assert_eq!(grammar.nonterminals.len(), 2);
}

#[test]
fn test_lookahead_and_exclusion_terms_are_not_terminals() {
    let grammar = assemble_ok(
        "A :\n  [lookahead != `B`] C but not `B`\n\nB :\n  `b`\n",
        &[],
    );
    assert!(grammar.get("B").is_some());
}

#[test]
fn test_goals_need_not_be_defined() {
    let grammar = assemble_ok("A :\n  `a`\n", &["A", "Undefined"]);
    assert_eq!(grammar.goals.len(), 2);
}
