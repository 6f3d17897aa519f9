use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Display};

/// The compiled grammar: every stored definition, the goal symbols, and the
/// names whose definitions describe lexical (variable terminal) categories.
#[derive(Debug, PartialEq, Clone, Default, Serialize)]
pub struct Grammar {
    pub nonterminals: BTreeMap<String, Definition>,
    pub goals: BTreeSet<String>,
    pub variable_terminals: BTreeSet<String>,
}

impl Grammar {
    pub fn get(&self, name: &str) -> Option<&Definition> {
        self.nonterminals.get(name)
    }

    pub fn is_variable_terminal(&self, name: &str) -> bool {
        self.variable_terminals.contains(name)
    }

    /// Serializes the grammar into a pretty-printed JSON string.
    ///
    /// # Errors
    /// Returns a `serde_json::Error` if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Serializes the grammar into a YAML string.
    ///
    /// # Errors
    /// Returns a `serde_yaml::Error` if serialization fails.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

#[derive(Debug, PartialEq, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Definition {
    /// Ordered alternatives of a nonterminal without parameters.
    Alternatives { rhs: Vec<Rhs> },
    Parameterized(Parameterized),
}

impl Definition {
    pub fn alternatives(&self) -> &[Rhs] {
        match self {
            Definition::Alternatives { rhs } => rhs,
            Definition::Parameterized(p) => &p.rhs,
        }
    }

    pub fn params(&self) -> &[String] {
        match self {
            Definition::Alternatives { .. } => &[],
            Definition::Parameterized(p) => &p.params,
        }
    }
}

/// A nonterminal whose productions depend on boolean parameters.
#[derive(Debug, PartialEq, Clone, Serialize)]
pub struct Parameterized {
    pub params: Vec<String>,
    pub rhs: Vec<Rhs>,
}

#[derive(Debug, PartialEq, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Rhs {
    Symbols {
        symbols: Vec<Symbol>,
    },
    /// Present only when `param` is instantiated as `value`.
    Conditional {
        param: String,
        value: bool,
        rhs: Box<Rhs>,
    },
    /// A production given in prose rather than notation.
    Prose {
        text: String,
    },
}

impl Rhs {
    pub fn symbols(symbols: Vec<Symbol>) -> Rhs {
        Rhs::Symbols { symbols }
    }
}

#[derive(Debug, PartialEq, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Symbol {
    /// A literal token, quoting removed.
    Terminal { spelling: String },
    Nonterminal { name: String },
    /// A parameterized nonterminal with its arguments, in call-site order.
    Apply {
        name: String,
        args: Vec<(String, Argument)>,
    },
    Optional { inner: Box<Symbol> },
    /// Matches `base` except where one of `exclusions` also matches.
    Exclusion {
        base: Box<Symbol>,
        exclusions: Vec<ExclusionTerm>,
    },
    Lookahead { rule: LookaheadRule },
    NoLineTerminatorHere,
}

impl Symbol {
    pub fn terminal(spelling: impl Into<String>) -> Symbol {
        Symbol::Terminal {
            spelling: spelling.into(),
        }
    }

    pub fn nonterminal(name: impl Into<String>) -> Symbol {
        Symbol::Nonterminal { name: name.into() }
    }
}

/// The value bound to a formal parameter at a call site.
#[derive(Debug, PartialEq, Eq, Clone, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Argument {
    Fixed(bool),
    /// Passes through the caller's binding of the parameter with this name.
    Var(String),
}

#[derive(Debug, PartialEq, Eq, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExclusionTerm {
    Terminal { spelling: String },
    Nonterminal { name: String },
    /// An inclusive range of characters, each bound a control-character literal.
    Range { low: String, high: String },
}

#[derive(Debug, PartialEq, Eq, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LookaheadRule {
    /// `positive`: the next token is one of `tokens`; otherwise it is none of them.
    TokenSet {
        tokens: BTreeSet<String>,
        positive: bool,
    },
    /// The upcoming input must not be derivable from `name`.
    NotNonterminal { name: String },
}

/// One reduced definition block, before assembly.
#[derive(Debug, PartialEq, Clone)]
pub struct NtDef {
    pub name: String,
    /// The run of colons after the name; its length is significant.
    pub separator: String,
    pub definition: Definition,
    /// Byte range of the defined name.
    pub name_span: (usize, usize),
    pub pos_start: usize,
    pub pos_end: usize,
    /// Byte range of every terminal in the block, keyed by spelling.
    pub terminal_spans: Vec<(String, (usize, usize))>,
    /// Byte range of each production line, parallel to the definition's alternatives.
    pub rhs_spans: Vec<(usize, usize)>,
}

impl Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Symbol::Terminal { spelling } => write!(f, "`{spelling}`"),
            Symbol::Nonterminal { name } => write!(f, "{name}"),
            Symbol::Apply { name, args } => {
                write!(f, "{name}[")?;
                for (i, (param, arg)) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    match arg {
                        Argument::Fixed(true) => write!(f, "+{param}")?,
                        Argument::Fixed(false) => write!(f, "~{param}")?,
                        Argument::Var(_) => write!(f, "?{param}")?,
                    }
                }
                write!(f, "]")
            }
            Symbol::Optional { inner } => write!(f, "{inner}?"),
            Symbol::Exclusion { base, exclusions } => {
                write!(f, "{base} but not ")?;
                if exclusions.len() > 1 {
                    write!(f, "one of ")?;
                }
                for (i, term) in exclusions.iter().enumerate() {
                    if i > 0 {
                        write!(f, " or ")?;
                    }
                    write!(f, "{term}")?;
                }
                Ok(())
            }
            Symbol::Lookahead { rule } => write!(f, "[lookahead {rule}]"),
            Symbol::NoLineTerminatorHere => write!(f, "[no LineTerminator here]"),
        }
    }
}

impl Display for ExclusionTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExclusionTerm::Terminal { spelling } => write!(f, "`{spelling}`"),
            ExclusionTerm::Nonterminal { name } => write!(f, "{name}"),
            ExclusionTerm::Range { low, high } => write!(f, "{low} through {high}"),
        }
    }
}

impl Display for LookaheadRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LookaheadRule::TokenSet { tokens, positive } if tokens.len() == 1 => {
                let op = if *positive { "==" } else { "!=" };
                let token = tokens.iter().next().map(String::as_str).unwrap_or_default();
                write!(f, "{op} `{token}`")
            }
            LookaheadRule::TokenSet { tokens, positive } => {
                write!(f, "{} {{", if *positive { "∈" } else { "<!" })?;
                for (i, token) in tokens.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "`{token}`")?;
                }
                write!(f, "}}")
            }
            LookaheadRule::NotNonterminal { name } => write!(f, "<! {name}"),
        }
    }
}

impl Display for Rhs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rhs::Symbols { symbols } if symbols.is_empty() => write!(f, "[empty]"),
            Rhs::Symbols { symbols } => {
                for (i, symbol) in symbols.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{symbol}")?;
                }
                Ok(())
            }
            Rhs::Conditional { param, value, rhs } => {
                write!(f, "[{}{param}] {rhs}", if *value { '+' } else { '~' })
            }
            Rhs::Prose { text } => write!(f, "> {text}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_apply_and_optional() {
        let symbol = Symbol::Optional {
            inner: Box::new(Symbol::Apply {
                name: "Expression".to_string(),
                args: vec![
                    ("In".to_string(), Argument::Fixed(true)),
                    ("Yield".to_string(), Argument::Var("Yield".to_string())),
                ],
            }),
        };
        assert_eq!(symbol.to_string(), "Expression[+In, ?Yield]?");
    }

    #[test]
    fn test_display_conditional_rhs() {
        let rhs = Rhs::Conditional {
            param: "Await".to_string(),
            value: false,
            rhs: Box::new(Rhs::symbols(vec![Symbol::terminal("await")])),
        };
        assert_eq!(rhs.to_string(), "[~Await] `await`");
    }

    #[test]
    fn test_display_lookahead() {
        let rule = LookaheadRule::TokenSet {
            tokens: ["let".to_string(), "{".to_string()].into_iter().collect(),
            positive: false,
        };
        assert_eq!(rule.to_string(), "<! {`let`, `{`}");
    }

    #[test]
    fn test_display_positive_lookahead_set() {
        let rule = LookaheadRule::TokenSet {
            tokens: ["a".to_string(), "b".to_string()].into_iter().collect(),
            positive: true,
        };
        assert_eq!(rule.to_string(), "∈ {`a`, `b`}");
    }

    #[test]
    fn test_definition_accessors() {
        let def = Definition::Parameterized(Parameterized {
            params: vec!["In".to_string()],
            rhs: vec![Rhs::symbols(vec![])],
        });
        assert_eq!(def.params(), ["In".to_string()]);
        assert_eq!(def.alternatives().len(), 1);
    }

    #[test]
    fn test_grammar_to_json() {
        let mut grammar = Grammar::default();
        grammar.nonterminals.insert(
            "Digit".to_string(),
            Definition::Alternatives {
                rhs: vec![Rhs::symbols(vec![Symbol::terminal("0")])],
            },
        );
        let json: serde_json::Value = serde_json::from_str(&grammar.to_json().unwrap()).unwrap();
        assert_eq!(
            json["nonterminals"]["Digit"]["rhs"][0]["symbols"][0]["spelling"],
            "0"
        );
        assert_eq!(json["nonterminals"]["Digit"]["kind"], "alternatives");
    }
}
