use crate::ast::{Argument, Definition, ExclusionTerm, LookaheadRule, NtDef, Parameterized, Rhs, Symbol};
use crate::error::{EmugError, GrammarError, ParserError};
use crate::lexer::{Token, TokenType};
use crate::meta::{Builder, NodeInfo, Production};
use crate::utils::span;
use log::trace;
use miette::NamedSource;
use std::collections::BTreeSet;
use std::sync::Arc;

/// A partially reduced piece of a grammar, as passed between reductions.
#[derive(Debug, Clone, PartialEq)]
pub enum Fragment {
    Token(Token),
    Absent,
    Repeated(Vec<Fragment>),
    Definitions(Vec<NtDef>),
    Block(Option<NtDef>),
    Definition(NtDef),
    BlockEnd,
    LineEnd,
    Lhs(Lhs),
    Name(String),
    Terminals(Vec<String>),
    Terminal { spelling: String, span: (usize, usize) },
    Rhs(Rhs),
    Guard { param: String, value: bool },
    Symbols(Vec<Symbol>),
    Symbol(Symbol),
    Arg(Arg),
    Sigil(Sigil),
    Exclusion(ExclusionTerm),
    Lookahead(LookaheadRule),
    Sequence(LookaheadSequence),
    Element(LookaheadElement),
}

/// The left-hand side of a definition.
#[derive(Debug, Clone, PartialEq)]
pub struct Lhs {
    pub name: String,
    /// `Some` when the name carries a parameter list, even an empty one.
    pub params: Option<Vec<String>>,
    pub span: (usize, usize),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Arg {
    pub name: String,
    pub value: Argument,
    pub span: (usize, usize),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sigil {
    Fixed(bool),
    /// `?`: pass the caller's binding through.
    Pass,
}

/// One comma-separated entry of a `<! { ... }` set.
#[derive(Debug, Clone, PartialEq)]
pub struct LookaheadSequence {
    pub elements: Vec<LookaheadElement>,
    pub span: (usize, usize),
}

#[derive(Debug, Clone, PartialEq)]
pub enum LookaheadElement {
    Terminal(String),
    NoLineTerminatorHere,
}

impl LookaheadSequence {
    fn single_terminal(&self) -> Option<&str> {
        match self.elements.as_slice() {
            [LookaheadElement::Terminal(t)] => Some(t.as_str()),
            _ => None,
        }
    }

    fn describe(&self) -> String {
        self.elements
            .iter()
            .map(|e| match e {
                LookaheadElement::Terminal(t) => format!("`{t}`"),
                LookaheadElement::NoLineTerminatorHere => "[no LineTerminator here]".to_string(),
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Removes the backtick quoting from a terminal token.
pub fn unwrap_terminal(text: &str) -> Option<&str> {
    if text.len() < 3 {
        return None;
    }
    text.strip_prefix('`')?.strip_suffix('`')
}

/// Turns the notation's syntax tree into definitions, one production at a time.
pub struct EmugBuilder {
    src: Arc<NamedSource<String>>,
    // Spans gathered while reducing the current definition block.
    terminal_spans: Vec<(String, (usize, usize))>,
    rhs_spans: Vec<(usize, usize)>,
}

impl EmugBuilder {
    pub fn new(src: NamedSource<String>) -> Self {
        Self {
            src: Arc::new(src),
            terminal_spans: Vec::new(),
            rhs_spans: Vec::new(),
        }
    }

    fn source(&self) -> NamedSource<String> {
        self.src.as_ref().clone()
    }

    // === Definitions ===

    /// grammar ::= block* EOF
    fn grammar(&mut self, mut c: Children) -> Result<Fragment, EmugError> {
        let mut definitions = Vec::new();
        for block in c.repeated()? {
            if let Fragment::Block(Some(def)) = block {
                definitions.push(def);
            }
        }
        c.token()?;
        Ok(Fragment::Definitions(definitions))
    }

    /// block ::= NL | nt_def
    fn block(&mut self, mut c: Children) -> Result<Fragment, EmugError> {
        match c.alternative() {
            0 => Ok(Fragment::Block(None)),
            _ => {
                let def = c.take("a definition", |f| match f {
                    Fragment::Definition(def) => Some(def),
                    _ => None,
                })?;
                Ok(Fragment::Block(Some(def)))
            }
        }
    }

    /// nt_def ::= nt_lhs EQ "one" "of" NL t_list_line+ block_end
    ///         |  nt_lhs EQ NL rhs_line+ block_end
    fn nt_def(&mut self, mut c: Children) -> Result<Fragment, EmugError> {
        let lhs = c.take("a left-hand side", |f| match f {
            Fragment::Lhs(lhs) => Some(lhs),
            _ => None,
        })?;
        let separator = c.token()?.text().to_string();

        let rhs_list = if c.alternative() == 0 {
            c.skip(3)?;
            let mut rhs_list = Vec::new();
            for line in c.repeated()? {
                let Fragment::Terminals(terminals) = line else {
                    return Err(c.malformed("a line of terminals"));
                };
                rhs_list.extend(
                    terminals
                        .into_iter()
                        .map(|t| Rhs::symbols(vec![Symbol::terminal(t)])),
                );
            }
            rhs_list
        } else {
            c.skip(1)?;
            c.repeated()?
                .into_iter()
                .map(|line| match line {
                    Fragment::Rhs(rhs) => Ok(rhs),
                    _ => Err(c.malformed("a production")),
                })
                .collect::<Result<Vec<_>, _>>()?
        };

        Ok(Fragment::Definition(self.make_nt_def(lhs, separator, rhs_list, c.info)))
    }

    /// Both definition shapes end up here; the left-hand side decides which
    /// kind of definition is made.
    fn make_nt_def(&mut self, lhs: Lhs, separator: String, rhs: Vec<Rhs>, info: NodeInfo) -> NtDef {
        let definition = match lhs.params {
            Some(params) => Definition::Parameterized(Parameterized { params, rhs }),
            None => Definition::Alternatives { rhs },
        };
        trace!("reduced definition of {} ({separator})", lhs.name);
        NtDef {
            name: lhs.name,
            separator,
            definition,
            name_span: lhs.span,
            pos_start: info.pos_start,
            pos_end: info.pos_end,
            terminal_spans: std::mem::take(&mut self.terminal_spans),
            rhs_spans: std::mem::take(&mut self.rhs_spans),
        }
    }

    /// nt_lhs ::= NTCALL "[" param param_tail* "]" | NT
    fn nt_lhs(&mut self, mut c: Children) -> Result<Fragment, EmugError> {
        let name_token = c.token()?;
        let params = if c.alternative() == 0 {
            c.skip(1)?;
            let mut params = vec![c.name()?];
            for tail in c.repeated()? {
                let Fragment::Name(param) = tail else {
                    return Err(c.malformed("a parameter name"));
                };
                params.push(param);
            }
            Some(params)
        } else {
            None
        };
        Ok(Fragment::Lhs(Lhs {
            name: name_token.text().to_string(),
            params,
            span: (name_token.pos_start, name_token.pos_end),
        }))
    }

    /// param_tail ::= "," param
    /// param ::= NT
    fn param(&mut self, mut c: Children) -> Result<Fragment, EmugError> {
        if c.info.production == Production::ParamTail {
            c.skip(1)?;
            return Ok(Fragment::Name(c.name()?));
        }
        Ok(Fragment::Name(c.token()?.text().to_string()))
    }

    /// t_list_line ::= terminal+ line_end
    fn t_list_line(&mut self, mut c: Children) -> Result<Fragment, EmugError> {
        let mut terminals = Vec::new();
        for f in c.repeated()? {
            let Fragment::Terminal { spelling, span } = f else {
                return Err(c.malformed("a terminal"));
            };
            self.terminal_spans.push((spelling.clone(), span));
            terminals.push(spelling);
        }
        Ok(Fragment::Terminals(terminals))
    }

    /// terminal ::= T | CHR
    fn terminal(&mut self, mut c: Children) -> Result<Fragment, EmugError> {
        let token = c.token()?;
        let spelling = match &token.ttype {
            TokenType::Terminal(quoted) => unwrap_terminal(quoted)
                .ok_or_else(|| GrammarError::MalformedTerminal {
                    token: quoted.clone(),
                    src: self.source(),
                    span: span(token.pos_start, token.pos_end),
                })?
                .to_string(),
            other => other.text().to_string(),
        };
        Ok(Fragment::Terminal {
            spelling,
            span: (token.pos_start, token.pos_end),
        })
    }

    // === Productions ===

    /// rhs_line ::= PROSE line_end | WPROSE line_end | ifdef? rhs PRODID? line_end
    fn rhs_line(&mut self, mut c: Children) -> Result<Fragment, EmugError> {
        let rhs = match c.alternative() {
            0 => {
                let prose = c.token()?;
                let text = prose.text();
                let text = text.strip_prefix('>').unwrap_or(text).trim();
                Rhs::Prose {
                    text: text.to_string(),
                }
            }
            1 => {
                let prose = c.token()?;
                let text = prose.text();
                let text = text
                    .strip_prefix("[>")
                    .and_then(|t| t.strip_suffix(']'))
                    .unwrap_or(text)
                    .trim();
                Rhs::Prose {
                    text: text.to_string(),
                }
            }
            _ => {
                let guard = c.next();
                let symbols = c.symbols()?;
                let rhs = Rhs::symbols(symbols);
                match guard {
                    Fragment::Guard { param, value } => Rhs::Conditional {
                        param,
                        value,
                        rhs: Box::new(rhs),
                    },
                    Fragment::Absent => rhs,
                    _ => return Err(c.malformed("a `[+Param]` or `[~Param]` guard")),
                }
            }
        };
        self.rhs_spans.push((c.info.pos_start, c.info.pos_end));
        Ok(Fragment::Rhs(rhs))
    }

    /// ifdef ::= "[" definite_sigil NT "]"
    fn ifdef(&mut self, mut c: Children) -> Result<Fragment, EmugError> {
        c.skip(1)?;
        let Sigil::Fixed(value) = c.sigil()? else {
            return Err(c.malformed("`+` or `~`"));
        };
        let param = c.token()?.text().to_string();
        Ok(Fragment::Guard { param, value })
    }

    /// rhs ::= "[" "empty" "]" | symbol+
    fn rhs(&mut self, mut c: Children) -> Result<Fragment, EmugError> {
        if c.alternative() == 0 {
            return Ok(Fragment::Symbols(Vec::new()));
        }
        let symbols = c
            .repeated()?
            .into_iter()
            .map(|f| match f {
                Fragment::Symbol(s) => Ok(s),
                _ => Err(c.malformed("a symbol")),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Fragment::Symbols(symbols))
    }

    // === Symbols ===

    fn symbol(&mut self, mut c: Children) -> Result<Fragment, EmugError> {
        let symbol = match c.alternative() {
            // nonterminal "but" "not" "one" "of" exclusion exclusion_tail*
            0 => {
                let base = c.symbol()?;
                c.skip(4)?;
                let mut exclusions = vec![c.exclusion()?];
                for tail in c.repeated()? {
                    let Fragment::Exclusion(term) = tail else {
                        return Err(c.malformed("an exclusion"));
                    };
                    exclusions.push(term);
                }
                Symbol::Exclusion {
                    base: Box::new(base),
                    exclusions,
                }
            }
            // nonterminal "but" "not" exclusion
            1 => {
                let base = c.symbol()?;
                c.skip(2)?;
                Symbol::Exclusion {
                    base: Box::new(base),
                    exclusions: vec![c.exclusion()?],
                }
            }
            // nonterminal "?"
            2 => Symbol::Optional {
                inner: Box::new(c.symbol()?),
            },
            // terminal "?"
            4 => Symbol::Optional {
                inner: Box::new(Symbol::terminal(self.grammar_terminal(&mut c)?)),
            },
            5 => Symbol::terminal(self.grammar_terminal(&mut c)?),
            // "[" "lookahead" lookahead_assertion "]"
            6 => {
                c.skip(2)?;
                let rule = c.take("a lookahead assertion", |f| match f {
                    Fragment::Lookahead(rule) => Some(rule),
                    _ => None,
                })?;
                Symbol::Lookahead { rule }
            }
            // nonterminal | no_line_terminator_here
            _ => c.symbol()?,
        };
        Ok(Fragment::Symbol(symbol))
    }

    /// Takes a terminal that stands as a symbol of the grammar, as opposed to
    /// one inside a lookahead or an exclusion, and records where it was used.
    fn grammar_terminal(&mut self, c: &mut Children) -> Result<String, EmugError> {
        let (spelling, at) = c.located_terminal()?;
        self.terminal_spans.push((spelling.clone(), at));
        Ok(spelling)
    }

    /// no_line_terminator_here ::= "[" "no" NT "here" "]"
    fn no_line_terminator_here(&mut self, mut c: Children) -> Result<Fragment, EmugError> {
        c.skip(2)?;
        let name = c.token()?;
        if name.text() != "LineTerminator" {
            return Err(ParserError::UnexpectedToken {
                src: self.source(),
                span: span(name.pos_start, name.pos_end),
                expected: "`LineTerminator`".to_string(),
            }
            .into());
        }
        Ok(Fragment::Symbol(Symbol::NoLineTerminatorHere))
    }

    /// nonterminal ::= NTCALL "[" arg arg_tail* "]" | NT | NTALT
    fn nonterminal(&mut self, mut c: Children) -> Result<Fragment, EmugError> {
        let name = c.token()?.text().to_string();
        let symbol = match c.alternative() {
            0 => {
                c.skip(1)?;
                let mut args: Vec<Arg> = vec![c.arg()?];
                for tail in c.repeated()? {
                    let Fragment::Arg(arg) = tail else {
                        return Err(c.malformed("an argument"));
                    };
                    args.push(arg);
                }

                let mut seen = BTreeSet::new();
                for arg in &args {
                    if !seen.insert(arg.name.as_str()) {
                        return Err(GrammarError::DuplicateArgument {
                            name: arg.name.clone(),
                            callee: name,
                            src: self.source(),
                            span: span(arg.span.0, arg.span.1),
                        }
                        .into());
                    }
                }

                Symbol::Apply {
                    name,
                    args: args.into_iter().map(|a| (a.name, a.value)).collect(),
                }
            }
            1 => Symbol::Nonterminal { name },
            _ => Symbol::Nonterminal {
                name: name.trim_matches('|').to_string(),
            },
        };
        Ok(Fragment::Symbol(symbol))
    }

    /// arg_tail ::= "," arg
    /// arg ::= sigil NT
    fn arg(&mut self, mut c: Children) -> Result<Fragment, EmugError> {
        if c.info.production == Production::ArgTail {
            c.skip(1)?;
            return Ok(Fragment::Arg(c.arg()?));
        }
        let sigil = c.sigil()?;
        let name = c.token()?.text().to_string();
        let value = match sigil {
            Sigil::Fixed(value) => Argument::Fixed(value),
            Sigil::Pass => Argument::Var(name.clone()),
        };
        Ok(Fragment::Arg(Arg {
            name,
            value,
            span: (c.info.pos_start, c.info.pos_end),
        }))
    }

    /// sigil ::= definite_sigil | "?"
    /// definite_sigil ::= "~" | "+"
    fn sigil(&mut self, mut c: Children) -> Result<Fragment, EmugError> {
        let sigil = match (c.info.production, c.alternative()) {
            (Production::Sigil, 0) => c.sigil()?,
            (Production::Sigil, _) => Sigil::Pass,
            (_, 0) => Sigil::Fixed(false),
            _ => Sigil::Fixed(true),
        };
        Ok(Fragment::Sigil(sigil))
    }

    // === Exclusions ===

    /// exclusion ::= CHR "through" CHR | terminal | NT
    fn exclusion(&mut self, mut c: Children) -> Result<Fragment, EmugError> {
        let term = match c.alternative() {
            0 => {
                let low = c.token()?.text().to_string();
                c.skip(1)?;
                let high = c.token()?.text().to_string();
                ExclusionTerm::Range { low, high }
            }
            1 => ExclusionTerm::Terminal {
                spelling: c.terminal()?,
            },
            _ => ExclusionTerm::Nonterminal {
                name: c.token()?.text().to_string(),
            },
        };
        Ok(Fragment::Exclusion(term))
    }

    /// exclusion_tail ::= "," "or" exclusion | "or" exclusion | "," exclusion
    fn exclusion_tail(&mut self, mut c: Children) -> Result<Fragment, EmugError> {
        c.skip(if c.alternative() == 0 { 2 } else { 1 })?;
        Ok(Fragment::Exclusion(c.exclusion()?))
    }

    // === Lookahead ===

    fn lookahead_assertion(&mut self, mut c: Children) -> Result<Fragment, EmugError> {
        let rule = match c.alternative() {
            // "==" terminal | "!=" terminal
            alt @ (0 | 1) => {
                c.skip(1)?;
                LookaheadRule::TokenSet {
                    tokens: BTreeSet::from([c.terminal()?]),
                    positive: alt == 0,
                }
            }
            // "<!" "{" lookahead_exclusion lookahead_exclusion_tail* "}"
            2 => {
                c.skip(2)?;
                let mut sequences = vec![c.sequence()?];
                for tail in c.repeated()? {
                    let Fragment::Sequence(seq) = tail else {
                        return Err(c.malformed("a lookahead sequence"));
                    };
                    sequences.push(seq);
                }

                let mut tokens = BTreeSet::new();
                for seq in &sequences {
                    let Some(terminal) = seq.single_terminal() else {
                        return Err(GrammarError::UnsupportedLookahead {
                            sequence: seq.describe(),
                            src: self.source(),
                            span: span(seq.span.0, seq.span.1),
                        }
                        .into());
                    };
                    tokens.insert(terminal.to_string());
                }
                LookaheadRule::TokenSet {
                    tokens,
                    positive: false,
                }
            }
            // "<!" NT
            _ => {
                c.skip(1)?;
                LookaheadRule::NotNonterminal {
                    name: c.token()?.text().to_string(),
                }
            }
        };
        Ok(Fragment::Lookahead(rule))
    }

    /// lookahead_exclusion_tail ::= "," lookahead_exclusion
    /// lookahead_exclusion ::= lookahead_exclusion_element+
    fn lookahead_exclusion(&mut self, mut c: Children) -> Result<Fragment, EmugError> {
        if c.info.production == Production::LookaheadExclusionTail {
            c.skip(1)?;
            return Ok(Fragment::Sequence(c.sequence()?));
        }
        let elements = c
            .repeated()?
            .into_iter()
            .map(|f| match f {
                Fragment::Element(e) => Ok(e),
                _ => Err(c.malformed("a lookahead element")),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Fragment::Sequence(LookaheadSequence {
            elements,
            span: (c.info.pos_start, c.info.pos_end),
        }))
    }

    /// lookahead_exclusion_element ::= terminal | no_line_terminator_here
    fn lookahead_exclusion_element(&mut self, mut c: Children) -> Result<Fragment, EmugError> {
        let element = match c.alternative() {
            0 => LookaheadElement::Terminal(c.terminal()?),
            _ => {
                c.symbol()?;
                LookaheadElement::NoLineTerminatorHere
            }
        };
        Ok(Fragment::Element(element))
    }
}

impl Builder for EmugBuilder {
    type Output = Fragment;

    fn token(&mut self, token: Token) -> Fragment {
        Fragment::Token(token)
    }

    fn absent(&mut self) -> Fragment {
        Fragment::Absent
    }

    fn repeated(&mut self, items: Vec<Fragment>) -> Fragment {
        Fragment::Repeated(items)
    }

    fn reduce(&mut self, info: NodeInfo, children: Vec<Fragment>) -> Result<Fragment, EmugError> {
        trace!(
            "reduce {}/{} at {}..{}",
            info.production.name(),
            info.alternative,
            info.pos_start,
            info.pos_end
        );
        let c = Children::new(info, children, &self.src);
        match info.production {
            Production::Grammar => self.grammar(c),
            Production::Block => self.block(c),
            Production::NtDef => self.nt_def(c),
            Production::BlockEnd => Ok(Fragment::BlockEnd),
            Production::LineEnd => Ok(Fragment::LineEnd),
            Production::NtLhs => self.nt_lhs(c),
            Production::ParamTail | Production::Param => self.param(c),
            Production::TListLine => self.t_list_line(c),
            Production::Terminal => self.terminal(c),
            Production::RhsLine => self.rhs_line(c),
            Production::Ifdef => self.ifdef(c),
            Production::Rhs => self.rhs(c),
            Production::Symbol => self.symbol(c),
            Production::NoLineTerminatorHere => self.no_line_terminator_here(c),
            Production::Nonterminal => self.nonterminal(c),
            Production::ArgTail | Production::Arg => self.arg(c),
            Production::Sigil | Production::DefiniteSigil => self.sigil(c),
            Production::Exclusion => self.exclusion(c),
            Production::ExclusionTail => self.exclusion_tail(c),
            Production::LookaheadAssertion => self.lookahead_assertion(c),
            Production::LookaheadExclusionTail | Production::LookaheadExclusion => {
                self.lookahead_exclusion(c)
            }
            Production::LookaheadExclusionElement => self.lookahead_exclusion_element(c),
        }
    }
}

/// The reduced children of one node, consumed left to right.
struct Children {
    info: NodeInfo,
    items: std::vec::IntoIter<Fragment>,
    src: Arc<NamedSource<String>>,
}

impl Children {
    fn new(info: NodeInfo, children: Vec<Fragment>, src: &Arc<NamedSource<String>>) -> Self {
        Self {
            info,
            items: children.into_iter(),
            src: Arc::clone(src),
        }
    }

    fn alternative(&self) -> usize {
        self.info.alternative
    }

    fn next(&mut self) -> Fragment {
        self.items.next().unwrap_or(Fragment::Absent)
    }

    fn malformed(&self, expected: &str) -> EmugError {
        ParserError::MalformedTree {
            src: self.src.as_ref().clone(),
            span: span(self.info.pos_start, self.info.pos_end),
            production: self.info.production.name().to_string(),
            expected: expected.to_string(),
        }
        .into()
    }

    fn take<T>(
        &mut self,
        expected: &str,
        pick: impl FnOnce(Fragment) -> Option<T>,
    ) -> Result<T, EmugError> {
        let fragment = self.next();
        pick(fragment).ok_or_else(|| self.malformed(expected))
    }

    /// Drops `n` tokens, such as reserved words whose presence is all that matters.
    fn skip(&mut self, n: usize) -> Result<(), EmugError> {
        for _ in 0..n {
            self.token()?;
        }
        Ok(())
    }

    fn token(&mut self) -> Result<Token, EmugError> {
        self.take("a token", |f| match f {
            Fragment::Token(t) => Some(t),
            _ => None,
        })
    }

    fn repeated(&mut self) -> Result<Vec<Fragment>, EmugError> {
        self.take("a repetition", |f| match f {
            Fragment::Repeated(items) => Some(items),
            _ => None,
        })
    }

    fn name(&mut self) -> Result<String, EmugError> {
        self.take("a name", |f| match f {
            Fragment::Name(name) => Some(name),
            _ => None,
        })
    }

    fn terminal(&mut self) -> Result<String, EmugError> {
        self.located_terminal().map(|(spelling, _)| spelling)
    }

    fn located_terminal(&mut self) -> Result<(String, (usize, usize)), EmugError> {
        self.take("a terminal", |f| match f {
            Fragment::Terminal { spelling, span } => Some((spelling, span)),
            _ => None,
        })
    }

    fn symbol(&mut self) -> Result<Symbol, EmugError> {
        self.take("a symbol", |f| match f {
            Fragment::Symbol(s) => Some(s),
            _ => None,
        })
    }

    fn symbols(&mut self) -> Result<Vec<Symbol>, EmugError> {
        self.take("a production", |f| match f {
            Fragment::Symbols(s) => Some(s),
            _ => None,
        })
    }

    fn arg(&mut self) -> Result<Arg, EmugError> {
        self.take("an argument", |f| match f {
            Fragment::Arg(a) => Some(a),
            _ => None,
        })
    }

    fn sigil(&mut self) -> Result<Sigil, EmugError> {
        self.take("a sigil", |f| match f {
            Fragment::Sigil(s) => Some(s),
            _ => None,
        })
    }

    fn exclusion(&mut self) -> Result<ExclusionTerm, EmugError> {
        self.take("an exclusion", |f| match f {
            Fragment::Exclusion(e) => Some(e),
            _ => None,
        })
    }

    fn sequence(&mut self) -> Result<LookaheadSequence, EmugError> {
        self.take("a lookahead sequence", |f| match f {
            Fragment::Sequence(s) => Some(s),
            _ => None,
        })
    }
}
