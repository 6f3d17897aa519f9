// Syntax error paths
// Each of these breaks the notation in one place

use emug_core::compile;
use emug_core::error::{EmugError, ParserError};

fn expected_for(source: &str) -> String {
    match compile(source, None, None) {
        Err(EmugError::Parser(ParserError::UnexpectedToken { expected, .. }))
        | Err(EmugError::Parser(ParserError::UnexpectedEof { expected, .. })) => expected,
        other => panic!("Expected a syntax error, got {other:?}"),
    }
}

#[test]
fn test_parser_error_missing_separator() {
    let source = "A\n  B\n";
    let result = compile(source, None, None);
    assert!(result.is_err(), "Should fail without a colon");
}

#[test]
fn test_parser_error_definition_without_productions() {
    let source = "A :\n\nB :\n  C\n";
    let result = compile(source, None, None);
    assert!(result.is_err(), "Should fail with no production lines");
}

#[test]
fn test_parser_error_unexpected_eof() {
    let source = "A :";
    let result = compile(source, None, None);
    assert!(matches!(
        result,
        Err(EmugError::Parser(ParserError::UnexpectedEof { .. }))
    ));
}

#[test]
fn test_parser_error_unclosed_arguments() {
    let expected = expected_for("A :\n  B[+In\n");
    assert!(expected.contains("`]`"), "got {expected}");
}

#[test]
fn test_parser_error_bad_sigil() {
    let source = "A :\n  B[In]\n";
    let result = compile(source, None, None);
    assert!(result.is_err(), "Arguments need a sigil");
}

#[test]
fn test_parser_error_pass_through_guard() {
    // a guard needs a definite value
    let source = "A[In] :\n  [?In] B\n";
    let result = compile(source, None, None);
    assert!(result.is_err());
}

#[test]
fn test_parser_error_unknown_lookahead_operator() {
    let source = "A :\n  [lookahead `x`] B\n";
    let result = compile(source, None, None);
    assert!(result.is_err());
}

#[test]
fn test_parser_error_no_other_terminator() {
    let source = "A :\n  `return` [no Semicolon here] B\n";
    let expected = expected_for(source);
    assert_eq!(expected, "`LineTerminator`");
}

#[test]
fn test_parser_error_one_of_without_terminals() {
    let source = "A :: one of\n  B C\n";
    let result = compile(source, None, None);
    assert!(result.is_err(), "one of lists only take terminals");
}

#[test]
fn test_parser_error_empty_with_symbols() {
    let source = "A :\n  [empty] B\n";
    let result = compile(source, None, None);
    assert!(result.is_err());
}
