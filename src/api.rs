use crate::assembler::Assembler;
use crate::ast::Grammar;
use crate::builder::{EmugBuilder, Fragment};
use crate::error::{EmugError, ParserError};
use crate::lexer::Lexer;
use crate::meta;
use log::debug;
use miette::NamedSource;
use std::collections::BTreeSet;
use std::path::Path;

/// Name used in diagnostics when the caller gives none.
pub const DEFAULT_FILENAME: &str = "grammar.emug";

/// Options for [`compile_with`].
#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    /// Shown in diagnostics. Defaults to [`DEFAULT_FILENAME`].
    pub filename: Option<String>,
    pub goals: BTreeSet<String>,
}

impl CompileOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    #[must_use]
    pub fn goals<I, S>(mut self, goals: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.goals = goals.into_iter().map(Into::into).collect();
        self
    }
}

/// Compiles grammar notation into a [`Grammar`].
///
/// `filename` only names the source in diagnostics. `goals` is passed through
/// into the result unchanged.
///
/// # Errors
/// Returns an `EmugError` if the text cannot be tokenized, does not follow the
/// notation, or describes an inconsistent grammar.
pub fn compile(
    text: &str,
    filename: Option<&str>,
    goals: Option<&[&str]>,
) -> Result<Grammar, EmugError> {
    let mut options = CompileOptions::new();
    if let Some(filename) = filename {
        options = options.filename(filename);
    }
    if let Some(goals) = goals {
        options = options.goals(goals.iter().copied());
    }
    compile_with(text, &options)
}

/// Like [`compile`], with the arguments bundled into [`CompileOptions`].
///
/// # Errors
/// See [`compile`].
pub fn compile_with(text: &str, options: &CompileOptions) -> Result<Grammar, EmugError> {
    let filename = options.filename.as_deref().unwrap_or(DEFAULT_FILENAME);
    let src = NamedSource::new(filename, text.to_string());

    let tokens = Lexer::new_with_name(text, filename.to_string()).lex()?;
    debug!("{filename}: {} tokens", tokens.len());

    let cst = meta::parse(&tokens, &src)?;
    debug!("{filename}: syntax tree built");

    let mut builder = EmugBuilder::new(src.clone());
    let definitions = match meta::reduce(cst, &mut builder)? {
        Fragment::Definitions(definitions) => definitions,
        _ => {
            return Err(ParserError::MalformedTree {
                src,
                span: (0, 0).into(),
                production: "grammar".to_string(),
                expected: "a list of definitions".to_string(),
            }
            .into())
        }
    };
    debug!("{filename}: {} definitions reduced", definitions.len());

    let grammar = Assembler::new(src).assemble(definitions, options.goals.clone())?;
    Ok(grammar)
}

/// Reads and compiles a grammar file. The path names the source in diagnostics.
///
/// # Errors
/// Returns `EmugError::Io` if the file cannot be read, or any error of [`compile`].
pub fn compile_file(path: impl AsRef<Path>, goals: Option<&[&str]>) -> Result<Grammar, EmugError> {
    let path = path.as_ref();
    let name = path.to_string_lossy().to_string();
    let text = std::fs::read_to_string(path).map_err(|source| EmugError::Io {
        path: name.clone(),
        source,
    })?;
    compile(&text, Some(&name), goals)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Rhs, Symbol};
    use crate::error::{GrammarError, LexerError};

    #[test]
    fn test_compile_minimal() {
        let grammar = compile("Digit :\n  `0`\n  `1`\n", None, None).unwrap();
        let digit = grammar.get("Digit").unwrap();
        assert_eq!(
            digit.alternatives(),
            [
                Rhs::symbols(vec![Symbol::terminal("0")]),
                Rhs::symbols(vec![Symbol::terminal("1")]),
            ]
        );
        assert!(grammar.goals.is_empty());
    }

    #[test]
    fn test_compile_empty_input() {
        let grammar = compile("", None, None).unwrap();
        assert!(grammar.nonterminals.is_empty());
    }

    #[test]
    fn test_goals_are_passed_through() {
        let grammar = compile("Script :\n  `x`\n", None, Some(&["Script", "Module"])).unwrap();
        assert_eq!(
            grammar.goals,
            BTreeSet::from(["Module".to_string(), "Script".to_string()])
        );
    }

    #[test]
    fn test_filename_names_the_diagnostic_source() {
        let err = compile("A :\n  @\n", Some("es.emug"), None).unwrap_err();
        match err {
            EmugError::Lexer(LexerError::UnexpectedCharacter { src, .. }) => {
                assert_eq!(src.name(), "es.emug");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_default_filename() {
        let err = compile("A :\n  `x`\n\nA :\n  `y`\n", None, None).unwrap_err();
        match err {
            EmugError::Grammar(GrammarError::DuplicateDefinition { src, .. }) => {
                assert_eq!(src.name(), DEFAULT_FILENAME);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_compile_with_options() {
        let options = CompileOptions::new().filename("opts.emug").goals(["A"]);
        let grammar = compile_with("A :\n  B\n", &options).unwrap();
        assert!(grammar.goals.contains("A"));
    }
}
