//! The notation's own grammar, and the engine that parses token streams with it.
//!
//! The meta-grammar is written in a small BNF dialect (see [`META_GRAMMAR`]) and
//! compiled once per process into a [`MetaGrammar`]. Parsing produces a generic
//! concrete syntax tree ([`Cst`]); turning that tree into anything useful is the
//! job of a [`Builder`], driven bottom-up by [`reduce`].
//!
//! Description syntax, one rule per `::=` with further alternatives on lines
//! starting with `|`:
//!
//! ```text
//! rule ::= item item ...
//!       |  item ...
//! ```
//!
//! An item is a rule name (`lower_case`), a token kind (`UPPER`, see
//! [`TokenKind::name`]) or a quoted reserved word (`"but"`). Items may carry a
//! `?`, `*` or `+` suffix, or an `&` prefix, which matches without consuming.
//! Alternatives are tried in order and the first one that matches wins.

use crate::error::{EmugError, ParserError};
use crate::lexer::{Token, TokenKind, TokenType, RESERVED};
use crate::utils::span;
use miette::NamedSource;
use once_cell::sync::Lazy;
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;

/// The grammar of the grammar notation.
pub const META_GRAMMAR: &str = r#"
grammar ::= block* EOF
block ::= NL
       |  nt_def
nt_def ::= nt_lhs EQ "one" "of" NL t_list_line+ block_end
        |  nt_lhs EQ NL rhs_line+ block_end
block_end ::= NL
           |  &EOF
nt_lhs ::= NTCALL "[" param param_tail* "]"
        |  NT
param_tail ::= "," param
param ::= NT
line_end ::= NL
          |  &EOF
t_list_line ::= terminal+ line_end
terminal ::= T
          |  CHR
rhs_line ::= PROSE line_end
          |  WPROSE line_end
          |  ifdef? rhs PRODID? line_end
ifdef ::= "[" definite_sigil NT "]"
rhs ::= "[" "empty" "]"
     |  symbol+
symbol ::= nonterminal "but" "not" "one" "of" exclusion exclusion_tail*
        |  nonterminal "but" "not" exclusion
        |  nonterminal "?"
        |  nonterminal
        |  terminal "?"
        |  terminal
        |  "[" "lookahead" lookahead_assertion "]"
        |  no_line_terminator_here
no_line_terminator_here ::= "[" "no" NT "here" "]"
nonterminal ::= NTCALL "[" arg arg_tail* "]"
             |  NT
             |  NTALT
arg_tail ::= "," arg
arg ::= sigil NT
sigil ::= definite_sigil
       |  "?"
definite_sigil ::= "~"
                |  "+"
exclusion ::= CHR "through" CHR
           |  terminal
           |  NT
exclusion_tail ::= "," "or" exclusion
                |  "or" exclusion
                |  "," exclusion
lookahead_assertion ::= "==" terminal
                     |  "!=" terminal
                     |  "<!" "{" lookahead_exclusion lookahead_exclusion_tail* "}"
                     |  "<!" NT
lookahead_exclusion_tail ::= "," lookahead_exclusion
lookahead_exclusion ::= lookahead_exclusion_element+
lookahead_exclusion_element ::= terminal
                             |  no_line_terminator_here
"#;

/// Every rule of [`META_GRAMMAR`]. A builder dispatches on these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Production {
    Grammar,
    Block,
    NtDef,
    BlockEnd,
    NtLhs,
    ParamTail,
    Param,
    LineEnd,
    TListLine,
    Terminal,
    RhsLine,
    Ifdef,
    Rhs,
    Symbol,
    NoLineTerminatorHere,
    Nonterminal,
    ArgTail,
    Arg,
    Sigil,
    DefiniteSigil,
    Exclusion,
    ExclusionTail,
    LookaheadAssertion,
    LookaheadExclusionTail,
    LookaheadExclusion,
    LookaheadExclusionElement,
}

impl Production {
    pub const ALL: [Production; 26] = [
        Production::Grammar,
        Production::Block,
        Production::NtDef,
        Production::BlockEnd,
        Production::NtLhs,
        Production::ParamTail,
        Production::Param,
        Production::LineEnd,
        Production::TListLine,
        Production::Terminal,
        Production::RhsLine,
        Production::Ifdef,
        Production::Rhs,
        Production::Symbol,
        Production::NoLineTerminatorHere,
        Production::Nonterminal,
        Production::ArgTail,
        Production::Arg,
        Production::Sigil,
        Production::DefiniteSigil,
        Production::Exclusion,
        Production::ExclusionTail,
        Production::LookaheadAssertion,
        Production::LookaheadExclusionTail,
        Production::LookaheadExclusion,
        Production::LookaheadExclusionElement,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Production::Grammar => "grammar",
            Production::Block => "block",
            Production::NtDef => "nt_def",
            Production::BlockEnd => "block_end",
            Production::NtLhs => "nt_lhs",
            Production::ParamTail => "param_tail",
            Production::Param => "param",
            Production::LineEnd => "line_end",
            Production::TListLine => "t_list_line",
            Production::Terminal => "terminal",
            Production::RhsLine => "rhs_line",
            Production::Ifdef => "ifdef",
            Production::Rhs => "rhs",
            Production::Symbol => "symbol",
            Production::NoLineTerminatorHere => "no_line_terminator_here",
            Production::Nonterminal => "nonterminal",
            Production::ArgTail => "arg_tail",
            Production::Arg => "arg",
            Production::Sigil => "sigil",
            Production::DefiniteSigil => "definite_sigil",
            Production::Exclusion => "exclusion",
            Production::ExclusionTail => "exclusion_tail",
            Production::LookaheadAssertion => "lookahead_assertion",
            Production::LookaheadExclusionTail => "lookahead_exclusion_tail",
            Production::LookaheadExclusion => "lookahead_exclusion",
            Production::LookaheadExclusionElement => "lookahead_exclusion_element",
        }
    }

    pub fn from_name(name: &str) -> Option<Production> {
        Production::ALL.into_iter().find(|p| p.name() == name)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MetaGrammarError {
    #[error("line {line}: expected `name ::= ...` or `| ...`, found `{text}`")]
    Malformed { line: usize, text: String },
    #[error("line {line}: unknown rule `{name}`")]
    UnknownProduction { line: usize, name: String },
    #[error("line {line}: unknown token kind `{name}`")]
    UnknownToken { line: usize, name: String },
    #[error("line {line}: `{word}` is not a reserved word")]
    UnknownWord { line: usize, word: String },
    #[error("rule `{0}` is defined more than once")]
    DuplicateRule(String),
    #[error("rule `{0}` is referenced but never defined")]
    MissingRule(String),
    #[error("the description defines no rules")]
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
enum Matcher {
    Token(TokenKind),
    Word(&'static str),
    Rule(Production),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Repeat {
    One,
    Optional,
    ZeroOrMore,
    OneOrMore,
    /// Matches without consuming and adds no child.
    Peek,
}

#[derive(Debug, Clone, PartialEq)]
struct Item {
    matcher: Matcher,
    repeat: Repeat,
}

/// A compiled meta-grammar, ready to parse token streams.
#[derive(Debug)]
pub struct MetaGrammar {
    rules: HashMap<Production, Vec<Vec<Item>>>,
    start: Production,
}

static COMPILED: Lazy<MetaGrammar> = Lazy::new(|| {
    MetaGrammar::compile(META_GRAMMAR).expect("built-in meta-grammar is well-formed")
});

/// Parses a token stream with the notation's meta-grammar.
pub fn parse(tokens: &[Token], src: &NamedSource<String>) -> Result<Cst, ParserError> {
    MetaGrammar::get().parse(tokens, src)
}

impl MetaGrammar {
    /// The meta-grammar of the notation, compiled on first use and shared
    /// for the rest of the process.
    pub fn get() -> &'static MetaGrammar {
        &COMPILED
    }

    /// Compiles a description. The first rule is the start rule.
    pub fn compile(description: &str) -> Result<MetaGrammar, MetaGrammarError> {
        let mut rules: HashMap<Production, Vec<Vec<Item>>> = HashMap::new();
        let mut referenced: Vec<Production> = Vec::new();
        let mut start = None;
        let mut current = None;

        for (index, raw) in description.lines().enumerate() {
            let line = index + 1;
            let text = raw.trim();
            if text.is_empty() {
                continue;
            }

            let alternative = if let Some((name, body)) = text.split_once("::=") {
                let name = name.trim();
                let production = Production::from_name(name).ok_or_else(|| {
                    MetaGrammarError::UnknownProduction {
                        line,
                        name: name.to_string(),
                    }
                })?;
                if rules.contains_key(&production) {
                    return Err(MetaGrammarError::DuplicateRule(name.to_string()));
                }
                rules.insert(production, Vec::new());
                start.get_or_insert(production);
                current = Some(production);
                body
            } else if let Some(body) = text.strip_prefix('|') {
                body
            } else {
                return Err(MetaGrammarError::Malformed {
                    line,
                    text: text.to_string(),
                });
            };

            let Some(production) = current else {
                return Err(MetaGrammarError::Malformed {
                    line,
                    text: text.to_string(),
                });
            };

            let items = alternative
                .split_whitespace()
                .map(|word| Self::compile_item(word, line))
                .collect::<Result<Vec<_>, _>>()?;
            for item in &items {
                if let Matcher::Rule(p) = item.matcher {
                    referenced.push(p);
                }
            }
            rules.entry(production).or_default().push(items);
        }

        if let Some(missing) = referenced.iter().find(|p| !rules.contains_key(p)) {
            return Err(MetaGrammarError::MissingRule(missing.name().to_string()));
        }

        let start = start.ok_or(MetaGrammarError::Empty)?;
        Ok(MetaGrammar { rules, start })
    }

    fn compile_item(word: &str, line: usize) -> Result<Item, MetaGrammarError> {
        let (word, peek) = match word.strip_prefix('&') {
            Some(rest) => (rest, true),
            None => (word, false),
        };

        // a quoted `"?"` ends in a quote, so it never loses its `?` here
        let (body, repeat) = match word.char_indices().last() {
            Some((i, '?')) if i > 0 => (&word[..i], Repeat::Optional),
            Some((i, '*')) if i > 0 => (&word[..i], Repeat::ZeroOrMore),
            Some((i, '+')) if i > 0 => (&word[..i], Repeat::OneOrMore),
            _ => (word, Repeat::One),
        };
        let repeat = if peek { Repeat::Peek } else { repeat };

        let matcher = if let Some(quoted) = body.strip_prefix('"').and_then(|b| b.strip_suffix('"')) {
            let word = RESERVED
                .split_whitespace()
                .find(|w| *w == quoted)
                .ok_or_else(|| MetaGrammarError::UnknownWord {
                    line,
                    word: quoted.to_string(),
                })?;
            Matcher::Word(word)
        } else if body.chars().all(|c| c.is_ascii_uppercase()) {
            Matcher::Token(TokenKind::from_name(body).ok_or_else(|| {
                MetaGrammarError::UnknownToken {
                    line,
                    name: body.to_string(),
                }
            })?)
        } else {
            Matcher::Rule(Production::from_name(body).ok_or_else(|| {
                MetaGrammarError::UnknownProduction {
                    line,
                    name: body.to_string(),
                }
            })?)
        };

        Ok(Item { matcher, repeat })
    }

    /// Parses a complete token stream, which must end with an `Eof` token.
    pub fn parse(&self, tokens: &[Token], src: &NamedSource<String>) -> Result<Cst, ParserError> {
        let mut engine = Engine {
            grammar: self,
            tokens,
            furthest: 0,
            expected: BTreeSet::new(),
        };
        match engine.production(self.start, 0) {
            Some((node, end)) if end >= tokens.len() || tokens[end].ttype == TokenType::Eof => {
                Ok(Cst::Node(node))
            }
            _ => Err(engine.error(src)),
        }
    }
}

/// A generic concrete syntax tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Cst {
    Token(Token),
    Node(Node),
    /// An optional item that did not match.
    Absent,
    /// The matches of a `*` or `+` item, in order.
    Repeated(Vec<Cst>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub info: NodeInfo,
    pub children: Vec<Cst>,
}

/// Which rule and alternative produced a node, and the source range it covers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeInfo {
    pub production: Production,
    pub alternative: usize,
    pub pos_start: usize,
    pub pos_end: usize,
}

struct Engine<'g, 't> {
    grammar: &'g MetaGrammar,
    tokens: &'t [Token],
    furthest: usize,
    expected: BTreeSet<String>,
}

impl Engine<'_, '_> {
    fn production(&mut self, production: Production, pos: usize) -> Option<(Node, usize)> {
        let grammar = self.grammar;
        let alternatives = grammar.rules.get(&production)?;
        for (alternative, items) in alternatives.iter().enumerate() {
            if let Some((children, end)) = self.sequence(items, pos) {
                let pos_start = self.start_of(pos);
                let pos_end = if end > pos {
                    self.tokens[end - 1].pos_end
                } else {
                    pos_start
                };
                let info = NodeInfo {
                    production,
                    alternative,
                    pos_start,
                    pos_end,
                };
                return Some((Node { info, children }, end));
            }
        }
        None
    }

    fn sequence(&mut self, items: &[Item], mut pos: usize) -> Option<(Vec<Cst>, usize)> {
        let mut children = Vec::with_capacity(items.len());
        for item in items {
            match item.repeat {
                Repeat::One => {
                    let (child, end) = self.item(&item.matcher, pos)?;
                    children.push(child);
                    pos = end;
                }
                Repeat::Optional => match self.item(&item.matcher, pos) {
                    Some((child, end)) => {
                        children.push(child);
                        pos = end;
                    }
                    None => children.push(Cst::Absent),
                },
                Repeat::ZeroOrMore | Repeat::OneOrMore => {
                    let mut matches = Vec::new();
                    while let Some((child, end)) = self.item(&item.matcher, pos) {
                        matches.push(child);
                        if end == pos {
                            break;
                        }
                        pos = end;
                    }
                    if item.repeat == Repeat::OneOrMore && matches.is_empty() {
                        return None;
                    }
                    children.push(Cst::Repeated(matches));
                }
                Repeat::Peek => {
                    self.item(&item.matcher, pos)?;
                }
            }
        }
        Some((children, pos))
    }

    fn item(&mut self, matcher: &Matcher, pos: usize) -> Option<(Cst, usize)> {
        match matcher {
            Matcher::Rule(p) => self
                .production(*p, pos)
                .map(|(node, end)| (Cst::Node(node), end)),
            Matcher::Token(kind) => match self.tokens.get(pos) {
                Some(token) if token.kind() == *kind => Some((Cst::Token(token.clone()), pos + 1)),
                _ => {
                    self.fail(pos, kind.describe().to_string());
                    None
                }
            },
            Matcher::Word(word) => match self.tokens.get(pos) {
                Some(token) if token.ttype == TokenType::Reserved(*word) => {
                    Some((Cst::Token(token.clone()), pos + 1))
                }
                _ => {
                    self.fail(pos, format!("`{word}`"));
                    None
                }
            },
        }
    }

    fn fail(&mut self, pos: usize, expected: String) {
        if pos > self.furthest {
            self.furthest = pos;
            self.expected.clear();
        }
        if pos == self.furthest {
            self.expected.insert(expected);
        }
    }

    fn start_of(&self, pos: usize) -> usize {
        match self.tokens.get(pos) {
            Some(token) => token.pos_start,
            None => self.tokens.last().map_or(0, |t| t.pos_end),
        }
    }

    fn error(&self, src: &NamedSource<String>) -> ParserError {
        let expected = match self.expected.len() {
            0 => "nothing more".to_string(),
            1 => self.expected.iter().next().cloned().unwrap_or_default(),
            _ => format!(
                "one of {}",
                self.expected.iter().cloned().collect::<Vec<_>>().join(", ")
            ),
        };
        match self.tokens.get(self.furthest) {
            Some(token) if token.ttype != TokenType::Eof => ParserError::UnexpectedToken {
                src: src.clone(),
                span: span(token.pos_start, token.pos_end.max(token.pos_start + 1)),
                expected,
            },
            _ => {
                let pos = self.start_of(self.furthest);
                ParserError::UnexpectedEof {
                    src: src.clone(),
                    span: (pos, 0).into(),
                    expected,
                }
            }
        }
    }
}

/// Reduces a concrete syntax tree bottom-up, one production at a time.
///
/// Children are always reduced before their parent, in source order.
pub trait Builder {
    type Output;

    fn token(&mut self, token: Token) -> Self::Output;

    fn absent(&mut self) -> Self::Output;

    fn repeated(&mut self, items: Vec<Self::Output>) -> Self::Output;

    fn reduce(
        &mut self,
        info: NodeInfo,
        children: Vec<Self::Output>,
    ) -> Result<Self::Output, EmugError>;
}

pub fn reduce<B: Builder>(cst: Cst, builder: &mut B) -> Result<B::Output, EmugError> {
    match cst {
        Cst::Token(token) => Ok(builder.token(token)),
        Cst::Absent => Ok(builder.absent()),
        Cst::Repeated(items) => {
            let items = items
                .into_iter()
                .map(|item| reduce(item, builder))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(builder.repeated(items))
        }
        Cst::Node(node) => {
            let children = node
                .children
                .into_iter()
                .map(|child| reduce(child, builder))
                .collect::<Result<Vec<_>, _>>()?;
            builder.reduce(node.info, children)
        }
    }
}
