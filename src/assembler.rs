use crate::ast::{Definition, Grammar, NtDef, Rhs, Symbol};
use crate::error::GrammarError;
use crate::utils::span;
use log::{debug, warn};
use miette::NamedSource;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Collects reduced definitions into a [`Grammar`], checking the rules that
/// span more than one definition.
pub struct Assembler {
    src: NamedSource<String>,
    grammar: Grammar,
    // Name span of every stored definition
    defined_at: HashMap<String, (usize, usize)>,
    // Every terminal spelling used by a plain definition, with its first use
    terminals: BTreeMap<String, (usize, usize)>,
}

impl Assembler {
    pub fn new(src: NamedSource<String>) -> Self {
        Assembler {
            src,
            grammar: Grammar::default(),
            defined_at: HashMap::new(),
            terminals: BTreeMap::new(),
        }
    }

    /// Assembles definitions, in source order, into a grammar with the given goals.
    ///
    /// # Errors
    /// Returns the first `GrammarError` found. No grammar is returned in that case.
    pub fn assemble(
        mut self,
        definitions: Vec<NtDef>,
        goals: BTreeSet<String>,
    ) -> Result<Grammar, GrammarError> {
        for def in definitions {
            self.add_definition(def)?;
        }
        self.check_collisions()?;

        for goal in &goals {
            if !self.grammar.nonterminals.contains_key(goal) {
                warn!("goal `{goal}` names no stored definition");
            }
        }
        self.grammar.goals = goals;

        debug!(
            "assembled {} nonterminals, {} variable terminals, {} terminal spellings",
            self.grammar.nonterminals.len(),
            self.grammar.variable_terminals.len(),
            self.terminals.len()
        );
        Ok(self.grammar)
    }

    fn add_definition(&mut self, def: NtDef) -> Result<(), GrammarError> {
        if def.separator.len() > 1 {
            self.grammar.variable_terminals.insert(def.name.clone());
        }

        // Parameterized definitions replace any earlier definition of the
        // same name and take no part in terminal collection.
        if let Definition::Parameterized(_) = def.definition {
            debug!("storing parameterized definition of {}", def.name);
            self.defined_at.insert(def.name.clone(), def.name_span);
            self.grammar.nonterminals.insert(def.name, def.definition);
            return Ok(());
        }

        for (i, rhs) in def.definition.alternatives().iter().enumerate() {
            if let Rhs::Conditional { param, value, .. } = rhs {
                let (start, end) = def
                    .rhs_spans
                    .get(i)
                    .copied()
                    .unwrap_or((def.pos_start, def.pos_end));
                return Err(GrammarError::InvalidConditionalContext {
                    name: def.name.clone(),
                    param: param.clone(),
                    sigil: if *value { '+' } else { '~' },
                    src: self.src.clone(),
                    span: span(start, end),
                });
            }
            let mut spellings = Vec::new();
            collect_terminals(rhs, &mut spellings);
            for spelling in spellings {
                if !self.terminals.contains_key(spelling) {
                    let used_at = def
                        .terminal_spans
                        .iter()
                        .find(|(t, _)| t == spelling)
                        .map_or(def.name_span, |(_, s)| *s);
                    self.terminals.insert(spelling.to_string(), used_at);
                }
            }
        }

        if def.separator != ":" {
            debug!(
                "{} ({}) is recorded as a variable terminal only",
                def.name, def.separator
            );
            return Ok(());
        }

        if let Some(first) = self.defined_at.get(&def.name) {
            return Err(GrammarError::DuplicateDefinition {
                name: def.name.clone(),
                src: self.src.clone(),
                span: span(def.name_span.0, def.name_span.1),
                first: span(first.0, first.1),
            });
        }
        self.defined_at.insert(def.name.clone(), def.name_span);
        self.grammar.nonterminals.insert(def.name, def.definition);
        Ok(())
    }

    fn check_collisions(&self) -> Result<(), GrammarError> {
        for (terminal, used_at) in &self.terminals {
            if self.grammar.nonterminals.contains_key(terminal) {
                let definition = self
                    .defined_at
                    .get(terminal)
                    .map_or_else(|| span(0, 0), |s| span(s.0, s.1));
                return Err(GrammarError::NameCollision {
                    name: terminal.clone(),
                    src: self.src.clone(),
                    span: span(used_at.0, used_at.1),
                    definition,
                });
            }
        }
        Ok(())
    }
}

/// Appends the spelling of every terminal symbol in `rhs`, including those
/// under an optional marker or the base of an exclusion.
pub fn collect_terminals<'a>(rhs: &'a Rhs, out: &mut Vec<&'a str>) {
    fn visit<'a>(symbol: &'a Symbol, out: &mut Vec<&'a str>) {
        match symbol {
            Symbol::Terminal { spelling } => out.push(spelling),
            Symbol::Optional { inner } => visit(inner, out),
            Symbol::Exclusion { base, .. } => visit(base, out),
            _ => {}
        }
    }

    match rhs {
        Rhs::Symbols { symbols } => symbols.iter().for_each(|s| visit(s, out)),
        Rhs::Conditional { rhs, .. } => collect_terminals(rhs, out),
        Rhs::Prose { .. } => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{ExclusionTerm, Parameterized};

    fn src() -> NamedSource<String> {
        NamedSource::new("test.emug", String::new())
    }

    fn plain(name: &str, separator: &str, rhs: Vec<Rhs>) -> NtDef {
        NtDef {
            name: name.to_string(),
            separator: separator.to_string(),
            definition: Definition::Alternatives { rhs },
            name_span: (0, name.len()),
            pos_start: 0,
            pos_end: 0,
            terminal_spans: vec![],
            rhs_spans: vec![],
        }
    }

    fn parameterized(name: &str, params: &[&str], rhs: Vec<Rhs>) -> NtDef {
        NtDef {
            definition: Definition::Parameterized(Parameterized {
                params: params.iter().map(|p| p.to_string()).collect(),
                rhs,
            }),
            ..plain(name, ":", vec![])
        }
    }

    fn assemble(defs: Vec<NtDef>) -> Result<Grammar, GrammarError> {
        Assembler::new(src()).assemble(defs, BTreeSet::new())
    }

    #[test]
    fn test_plain_definitions_are_stored() {
        let grammar = assemble(vec![
            plain("A", ":", vec![Rhs::symbols(vec![Symbol::nonterminal("B")])]),
            plain("B", ":", vec![Rhs::symbols(vec![Symbol::terminal("b")])]),
        ])
        .unwrap();
        assert_eq!(grammar.nonterminals.len(), 2);
        assert!(grammar.variable_terminals.is_empty());
    }

    #[test]
    fn test_multi_colon_definitions_are_variable_terminals_only() {
        let grammar = assemble(vec![
            plain("Keyword", "::", vec![Rhs::symbols(vec![Symbol::terminal("if")])]),
            plain("Digits", ":::", vec![Rhs::symbols(vec![Symbol::terminal("0")])]),
        ])
        .unwrap();
        assert!(grammar.is_variable_terminal("Keyword"));
        assert!(grammar.is_variable_terminal("Digits"));
        assert!(grammar.get("Keyword").is_none());
    }

    #[test]
    fn test_duplicate_plain_definition() {
        let err = assemble(vec![
            plain("A", ":", vec![Rhs::symbols(vec![])]),
            plain("A", ":", vec![Rhs::symbols(vec![])]),
        ])
        .unwrap_err();
        assert!(matches!(err, GrammarError::DuplicateDefinition { ref name, .. } if name == "A"));
    }

    #[test]
    fn test_parameterized_definition_replaces_without_check() {
        let grammar = assemble(vec![
            parameterized("A", &["In"], vec![Rhs::symbols(vec![])]),
            parameterized("A", &["Yield"], vec![Rhs::symbols(vec![])]),
        ])
        .unwrap();
        assert_eq!(grammar.get("A").unwrap().params(), ["Yield".to_string()]);
    }

    #[test]
    fn test_terminal_that_is_also_a_nonterminal() {
        let err = assemble(vec![
            plain("A", ":", vec![Rhs::symbols(vec![Symbol::terminal("B")])]),
            plain("B", ":", vec![Rhs::symbols(vec![])]),
        ])
        .unwrap_err();
        assert!(matches!(err, GrammarError::NameCollision { ref name, .. } if name == "B"));
    }

    #[test]
    fn test_collision_with_variable_terminal_name_is_allowed() {
        // `Keyword` is not stored as a definition, so using it as a terminal is fine
        let grammar = assemble(vec![
            plain("Keyword", "::", vec![Rhs::symbols(vec![])]),
            plain("A", ":", vec![Rhs::symbols(vec![Symbol::terminal("Keyword")])]),
        ]);
        assert!(grammar.is_ok());
    }

    #[test]
    fn test_conditional_in_plain_definition() {
        let err = assemble(vec![plain(
            "A",
            ":",
            vec![Rhs::Conditional {
                param: "In".to_string(),
                value: false,
                rhs: Box::new(Rhs::symbols(vec![])),
            }],
        )])
        .unwrap_err();
        match err {
            GrammarError::InvalidConditionalContext { name, param, sigil, .. } => {
                assert_eq!(name, "A");
                assert_eq!(param, "In");
                assert_eq!(sigil, '~');
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_goals_pass_through() {
        let goals = BTreeSet::from(["Script".to_string(), "Module".to_string()]);
        let grammar = Assembler::new(src())
            .assemble(vec![plain("Script", ":", vec![Rhs::symbols(vec![])])], goals.clone())
            .unwrap();
        assert_eq!(grammar.goals, goals);
    }

    #[test]
    fn test_collect_terminals_looks_inside_optional_and_exclusion_base() {
        let rhs = Rhs::symbols(vec![
            Symbol::terminal("a"),
            Symbol::Optional {
                inner: Box::new(Symbol::terminal("b")),
            },
            Symbol::Exclusion {
                base: Box::new(Symbol::terminal("c")),
                exclusions: vec![ExclusionTerm::Terminal {
                    spelling: "d".to_string(),
                }],
            },
            Symbol::nonterminal("E"),
        ]);
        let mut out = Vec::new();
        collect_terminals(&rhs, &mut out);
        assert_eq!(out, vec!["a", "b", "c"]);
    }
}
