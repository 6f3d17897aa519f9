use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

#[derive(Error, Debug, Diagnostic)]
pub enum EmugError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Lexer(#[from] LexerError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Parser(#[from] ParserError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Grammar(#[from] GrammarError),

    #[error("Failed to read grammar file `{path}`")]
    #[diagnostic(code(emug::io), help("Check that the file exists and is readable."))]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug, Diagnostic, Clone)]
#[error("Lexer Error")]
pub enum LexerError {
    #[error("No token matches `{found}` at line {line}, column {column}")]
    #[diagnostic(
        code(lexer::unexpected_character),
        help("Terminals are quoted with backticks, nonterminals start with an uppercase letter.")
    )]
    UnexpectedCharacter {
        #[source_code]
        src: NamedSource<String>,
        #[label("unrecognized input starts here")]
        span: SourceSpan,
        found: char,
        line: usize,
        column: usize,
    },
}

#[derive(Error, Debug, Diagnostic, Clone)]
#[error("Parser Error")]
pub enum ParserError {
    #[error("Unexpected token")]
    #[diagnostic(
        code(parser::unexpected_token),
        help("The notation does not allow this token in this position.")
    )]
    UnexpectedToken {
        #[source_code]
        src: NamedSource<String>,
        #[label("Expected {expected}, but found this")]
        span: SourceSpan,
        expected: String,
    },

    #[error("Unexpected end of file")]
    #[diagnostic(
        code(parser::unexpected_eof),
        help("The grammar ended in the middle of a definition.")
    )]
    UnexpectedEof {
        #[source_code]
        src: NamedSource<String>,
        #[label("Expected {expected} here")]
        span: SourceSpan,
        expected: String,
    },

    #[error("Syntax tree for `{production}` has an unexpected shape: expected {expected}")]
    #[diagnostic(
        code(parser::malformed_tree),
        help("The built-in meta-grammar and the reducer disagree. This is a bug.")
    )]
    MalformedTree {
        #[source_code]
        src: NamedSource<String>,
        #[label("while reducing this")]
        span: SourceSpan,
        production: String,
        expected: String,
    },
}

#[derive(Error, Debug, Diagnostic, Clone)]
#[error("Grammar Error")]
pub enum GrammarError {
    #[error("Nonterminal `{name}` is defined more than once")]
    #[diagnostic(
        code(grammar::duplicate_definition),
        help("Merge the productions into a single definition of `{name}`.")
    )]
    DuplicateDefinition {
        name: String,
        #[source_code]
        src: NamedSource<String>,
        #[label("redefined here")]
        span: SourceSpan,
        #[label("first defined here")]
        first: SourceSpan,
    },

    #[error("Grammar contains both a terminal `{name}` and a nonterminal {name}")]
    #[diagnostic(
        code(grammar::name_collision),
        help("Rename the nonterminal or the terminal so the two can be told apart.")
    )]
    NameCollision {
        name: String,
        #[source_code]
        src: NamedSource<String>,
        #[label("used as a terminal here")]
        span: SourceSpan,
        #[label("defined as a nonterminal here")]
        definition: SourceSpan,
    },

    #[error("Parameter `{name}` is passed more than once to `{callee}`")]
    #[diagnostic(code(grammar::duplicate_argument))]
    DuplicateArgument {
        name: String,
        callee: String,
        #[source_code]
        src: NamedSource<String>,
        #[label("repeated here")]
        span: SourceSpan,
    },

    #[error("Malformed terminal {token}")]
    #[diagnostic(
        code(grammar::malformed_terminal),
        help("Terminals must be wrapped in a matching pair of backticks.")
    )]
    MalformedTerminal {
        token: String,
        #[source_code]
        src: NamedSource<String>,
        #[label("here")]
        span: SourceSpan,
    },

    #[error("Unsupported lookahead: more than one token in {sequence}")]
    #[diagnostic(
        code(grammar::unsupported_lookahead),
        help("Negative lookahead sets may only list single terminals.")
    )]
    UnsupportedLookahead {
        sequence: String,
        #[source_code]
        src: NamedSource<String>,
        #[label("this element is not a single terminal")]
        span: SourceSpan,
    },

    #[error("Conditional production `[{sigil}{param}]` in non-parameterized nonterminal `{name}`")]
    #[diagnostic(
        code(grammar::invalid_conditional_context),
        help("Declare `{param}` as a parameter, e.g. `{name}[{param}]`.")
    )]
    InvalidConditionalContext {
        name: String,
        param: String,
        sigil: char,
        #[source_code]
        src: NamedSource<String>,
        #[label("guarded production")]
        span: SourceSpan,
    },
}
