use crate::error::LexerError;
use crate::utils::{get_line_and_column, span};
use miette::NamedSource;
use once_cell::sync::Lazy;
use regex::Regex;

/// Operators and reserved words of the notation, separated by spaces.
pub const RESERVED: &str =
    "[ ] { } , ~ + ? <! == != but empty here lookahead no not of one or through";

/// The payload-free category of a token.
/// This is what the meta-grammar refers to when it names a token class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Eof,
    Newline,
    Reserved,
    Colons,
    Terminal,
    ControlChar,
    NonterminalCall,
    Nonterminal,
    NonterminalAlt,
    ProductionId,
    Prose,
    WrappedProse,
}

impl TokenKind {
    /// The name used for this kind in the meta-grammar description.
    pub fn name(self) -> &'static str {
        match self {
            TokenKind::Eof => "EOF",
            TokenKind::Newline => "NL",
            TokenKind::Reserved => "RESERVED",
            TokenKind::Colons => "EQ",
            TokenKind::Terminal => "T",
            TokenKind::ControlChar => "CHR",
            TokenKind::NonterminalCall => "NTCALL",
            TokenKind::Nonterminal => "NT",
            TokenKind::NonterminalAlt => "NTALT",
            TokenKind::ProductionId => "PRODID",
            TokenKind::Prose => "PROSE",
            TokenKind::WrappedProse => "WPROSE",
        }
    }

    /// A human-readable description for diagnostics.
    pub fn describe(self) -> &'static str {
        match self {
            TokenKind::Eof => "end of input",
            TokenKind::Newline => "a newline",
            TokenKind::Reserved => "a reserved word",
            TokenKind::Colons => "`:`",
            TokenKind::Terminal => "a terminal",
            TokenKind::ControlChar => "a control character",
            TokenKind::NonterminalCall => "a parameterized nonterminal",
            TokenKind::Nonterminal => "a nonterminal",
            TokenKind::NonterminalAlt => "a |nonterminal|",
            TokenKind::ProductionId => "a production label",
            TokenKind::Prose => "a prose line",
            TokenKind::WrappedProse => "bracketed prose",
        }
    }

    pub fn from_name(name: &str) -> Option<TokenKind> {
        let kind = match name {
            "EOF" => TokenKind::Eof,
            "NL" => TokenKind::Newline,
            "EQ" => TokenKind::Colons,
            "T" => TokenKind::Terminal,
            "CHR" => TokenKind::ControlChar,
            "NTCALL" => TokenKind::NonterminalCall,
            "NT" => TokenKind::Nonterminal,
            "NTALT" => TokenKind::NonterminalAlt,
            "PRODID" => TokenKind::ProductionId,
            "PROSE" => TokenKind::Prose,
            "WPROSE" => TokenKind::WrappedProse,
            _ => return None,
        };
        Some(kind)
    }
}

/// Represents the different kinds of tokens that the lexer can produce.
/// Payloads hold the matched source text verbatim; unwrapping of quoting
/// happens later, in the builder.
#[derive(Debug, PartialEq, Clone)]
pub enum TokenType {
    // == Special Tokens ==
    /// Represents the end of the input.
    Eof,
    /// A line break. Blank lines separate definitions, so newlines are never skipped.
    Newline,

    // == Structure ==
    /// An operator or reserved word from [`RESERVED`], e.g. `[`, `<!`, `lookahead`.
    Reserved(&'static str),
    /// A run of one or more colons separating a definition's name from its productions.
    Colons(String),

    // == Terminals ==
    /// A backtick-quoted terminal, quotes included: `` `if` ``.
    Terminal(String),
    /// A control-character name or code point: `<LF>`, `U+00A0`.
    ControlChar(String),

    // == Nonterminals ==
    /// A nonterminal name immediately followed by `[`.
    NonterminalCall(String),
    /// A plain nonterminal name. Parameter names are lexed as this too.
    Nonterminal(String),
    /// A nonterminal wrapped in vertical bars, bars included: `|Name|`.
    NonterminalAlt(String),

    // == Annotations ==
    /// A production label such as `#sec-foo`.
    ProductionId(String),
    /// Prose to the end of the line, including the leading `>`.
    Prose(String),
    /// Prose wrapped in square brackets, including `[>` and `]`.
    WrappedProse(String),
}

impl TokenType {
    pub fn kind(&self) -> TokenKind {
        match self {
            TokenType::Eof => TokenKind::Eof,
            TokenType::Newline => TokenKind::Newline,
            TokenType::Reserved(_) => TokenKind::Reserved,
            TokenType::Colons(_) => TokenKind::Colons,
            TokenType::Terminal(_) => TokenKind::Terminal,
            TokenType::ControlChar(_) => TokenKind::ControlChar,
            TokenType::NonterminalCall(_) => TokenKind::NonterminalCall,
            TokenType::Nonterminal(_) => TokenKind::Nonterminal,
            TokenType::NonterminalAlt(_) => TokenKind::NonterminalAlt,
            TokenType::ProductionId(_) => TokenKind::ProductionId,
            TokenType::Prose(_) => TokenKind::Prose,
            TokenType::WrappedProse(_) => TokenKind::WrappedProse,
        }
    }

    /// The source text of the token.
    pub fn text(&self) -> &str {
        match self {
            TokenType::Eof => "",
            TokenType::Newline => "\n",
            TokenType::Reserved(word) => word,
            TokenType::Colons(s)
            | TokenType::Terminal(s)
            | TokenType::ControlChar(s)
            | TokenType::NonterminalCall(s)
            | TokenType::Nonterminal(s)
            | TokenType::NonterminalAlt(s)
            | TokenType::ProductionId(s)
            | TokenType::Prose(s)
            | TokenType::WrappedProse(s) => s,
        }
    }

    fn from_match(kind: TokenKind, text: &str) -> TokenType {
        match kind {
            TokenKind::Eof => TokenType::Eof,
            TokenKind::Newline => TokenType::Newline,
            TokenKind::Reserved => TokenType::Reserved(
                RESERVED
                    .split_whitespace()
                    .find(|word| *word == text)
                    .unwrap_or("?"),
            ),
            TokenKind::Colons => TokenType::Colons(text.to_string()),
            TokenKind::Terminal => TokenType::Terminal(text.to_string()),
            TokenKind::ControlChar => TokenType::ControlChar(text.to_string()),
            TokenKind::NonterminalCall => TokenType::NonterminalCall(text.to_string()),
            TokenKind::Nonterminal => TokenType::Nonterminal(text.to_string()),
            TokenKind::NonterminalAlt => TokenType::NonterminalAlt(text.to_string()),
            TokenKind::ProductionId => TokenType::ProductionId(text.to_string()),
            TokenKind::Prose => TokenType::Prose(text.to_string()),
            TokenKind::WrappedProse => TokenType::WrappedProse(text.to_string()),
        }
    }
}

/// A token with its type and position
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub ttype: TokenType,
    pub pos_start: usize,
    pub pos_end: usize,
}

impl Token {
    pub fn new(ttype: TokenType, pos_start: usize, pos_end: usize) -> Token {
        Token {
            ttype,
            pos_start,
            pos_end,
        }
    }

    pub fn kind(&self) -> TokenKind {
        self.ttype.kind()
    }

    pub fn text(&self) -> &str {
        self.ttype.text()
    }
}

struct TokenPattern {
    kind: TokenKind,
    regex: Regex,
    /// Only matches when the next character is this one (it is not consumed).
    followed_by: Option<char>,
}

/// The table of named token patterns that drives the [`Lexer`].
///
/// Patterns are tried at every position; the longest match wins and ties go
/// to the pattern listed first.
pub struct Lexicon {
    patterns: Vec<TokenPattern>,
    whitespace: Regex,
}

static LEXICON: Lazy<Lexicon> = Lazy::new(Lexicon::build);

impl Lexicon {
    /// The lexicon of the grammar notation, compiled on first use.
    pub fn get() -> &'static Lexicon {
        &LEXICON
    }

    fn build() -> Lexicon {
        let mut words: Vec<&str> = RESERVED.split_whitespace().collect();
        // leftmost-first alternation, so longer words must come first
        words.sort_by_key(|w| std::cmp::Reverse(w.len()));
        let reserved = words
            .iter()
            .map(|w| regex::escape(w))
            .collect::<Vec<_>>()
            .join("|");

        let table: [(TokenKind, String, Option<char>); 11] = [
            (TokenKind::Newline, r"\n".to_string(), None),
            (TokenKind::Reserved, reserved, None),
            (TokenKind::Colons, r":+".to_string(), None),
            (TokenKind::Terminal, r"`[^` \n]+`|```".to_string(), None),
            (
                TokenKind::ControlChar,
                r"<[A-Z]+>|U\+[0-9A-Fa-f]{4}".to_string(),
                None,
            ),
            (
                TokenKind::NonterminalCall,
                r"(?:uri|[A-Z])\w*".to_string(),
                Some('['),
            ),
            (TokenKind::Nonterminal, r"(?:uri|[A-Z])\w*".to_string(), None),
            (TokenKind::NonterminalAlt, r"\|[A-Z]\w+\|".to_string(), None),
            (TokenKind::ProductionId, r"#[A-Za-z]\w*".to_string(), None),
            (TokenKind::Prose, r">.*".to_string(), None),
            (TokenKind::WrappedProse, r"\[>[^\]]*\]".to_string(), None),
        ];

        let patterns = table
            .into_iter()
            .map(|(kind, pattern, followed_by)| TokenPattern {
                kind,
                regex: Regex::new(&format!("^(?:{pattern})"))
                    .expect("built-in token pattern is a valid regex"),
                followed_by,
            })
            .collect();

        Lexicon {
            patterns,
            whitespace: Regex::new(r"^[ \t\r]+").expect("whitespace pattern is a valid regex"),
        }
    }

    /// Length of leading insignificant whitespace in `rest`.
    fn skip(&self, rest: &str) -> usize {
        self.whitespace.find(rest).map_or(0, |m| m.end())
    }

    /// Finds the best token at the start of `rest`, returning its kind and length.
    pub fn match_at(&self, rest: &str) -> Option<(TokenKind, usize)> {
        let mut best: Option<(TokenKind, usize)> = None;
        for pattern in &self.patterns {
            let Some(m) = pattern.regex.find(rest) else {
                continue;
            };
            let len = m.end();
            if len == 0 {
                continue;
            }
            if let Some(next) = pattern.followed_by {
                if !rest[len..].starts_with(next) {
                    continue;
                }
            }
            if best.map_or(true, |(_, best_len)| len > best_len) {
                best = Some((pattern.kind, len));
            }
        }
        best
    }
}

/// Turns grammar text into a lazy, single-pass stream of tokens.
///
/// The stream always ends with a single [`TokenType::Eof`] token, or with the
/// first error; after either, the iterator is exhausted.
pub struct Lexer<'a> {
    input: &'a str,
    name: String,
    position: usize,
    finished: bool,
    lexicon: &'static Lexicon,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self::new_with_name(input, "grammar.emug".to_string())
    }

    pub fn new_with_name(input: &'a str, name: String) -> Self {
        Self {
            input,
            name,
            position: 0,
            finished: false,
            lexicon: Lexicon::get(),
        }
    }

    /// Collects the whole token stream.
    pub fn lex(&mut self) -> Result<Vec<Token>, LexerError> {
        self.collect()
    }

    pub fn next_token(&mut self) -> Result<Token, LexerError> {
        self.position += self.lexicon.skip(&self.input[self.position..]);
        let start_pos = self.position;
        let rest = &self.input[start_pos..];

        if rest.is_empty() {
            return Ok(Token::new(TokenType::Eof, start_pos, start_pos));
        }

        match self.lexicon.match_at(rest) {
            Some((kind, len)) => {
                self.position += len;
                let ttype = TokenType::from_match(kind, &rest[..len]);
                Ok(Token::new(ttype, start_pos, self.position))
            }
            None => {
                let found = rest.chars().next().unwrap_or('\0');
                let (line, column) = get_line_and_column(self.input, start_pos);
                Err(LexerError::UnexpectedCharacter {
                    src: NamedSource::new(&self.name, self.input.to_string()),
                    span: span(start_pos, start_pos + found.len_utf8()),
                    found,
                    line,
                    column,
                })
            }
        }
    }
}

impl Iterator for Lexer<'_> {
    type Item = Result<Token, LexerError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let result = self.next_token();
        if !matches!(&result, Ok(token) if token.ttype != TokenType::Eof) {
            self.finished = true;
        }
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_tokens(input: &str, expected: Vec<TokenType>) {
        let mut lexer = Lexer::new(input);
        let tokens = lexer.lex().unwrap();
        let token_types: Vec<TokenType> = tokens.into_iter().map(|t| t.ttype).collect();
        assert_eq!(token_types, expected);
    }

    #[test]
    fn test_eof() {
        assert_tokens("", vec![TokenType::Eof]);
    }

    #[test]
    fn test_definition_header() {
        assert_tokens(
            "Digit ::\n",
            vec![
                TokenType::Nonterminal("Digit".to_string()),
                TokenType::Colons("::".to_string()),
                TokenType::Newline,
                TokenType::Eof,
            ],
        );
    }

    #[test]
    fn test_colon_runs_are_one_token() {
        assert_tokens(
            "A : B ::: C",
            vec![
                TokenType::Nonterminal("A".to_string()),
                TokenType::Colons(":".to_string()),
                TokenType::Nonterminal("B".to_string()),
                TokenType::Colons(":::".to_string()),
                TokenType::Nonterminal("C".to_string()),
                TokenType::Eof,
            ],
        );
    }

    #[test]
    fn test_terminals() {
        assert_tokens(
            "`if` ``` <LF> U+00A0",
            vec![
                TokenType::Terminal("`if`".to_string()),
                TokenType::Terminal("```".to_string()),
                TokenType::ControlChar("<LF>".to_string()),
                TokenType::ControlChar("U+00A0".to_string()),
                TokenType::Eof,
            ],
        );
    }

    #[test]
    fn test_nonterminal_call_needs_adjacent_bracket() {
        assert_tokens(
            "Stmt[Yield] Stmt [",
            vec![
                TokenType::NonterminalCall("Stmt".to_string()),
                TokenType::Reserved("["),
                TokenType::Nonterminal("Yield".to_string()),
                TokenType::Reserved("]"),
                TokenType::Nonterminal("Stmt".to_string()),
                TokenType::Reserved("["),
                TokenType::Eof,
            ],
        );
    }

    #[test]
    fn test_reserved_words_prefer_longest() {
        assert_tokens(
            "no not one of <! == !=",
            vec![
                TokenType::Reserved("no"),
                TokenType::Reserved("not"),
                TokenType::Reserved("one"),
                TokenType::Reserved("of"),
                TokenType::Reserved("<!"),
                TokenType::Reserved("=="),
                TokenType::Reserved("!="),
                TokenType::Eof,
            ],
        );
    }

    #[test]
    fn test_annotations_and_prose() {
        assert_tokens(
            "|Alt| #label [> wrapped prose]\n> free prose here\n",
            vec![
                TokenType::NonterminalAlt("|Alt|".to_string()),
                TokenType::ProductionId("#label".to_string()),
                TokenType::WrappedProse("[> wrapped prose]".to_string()),
                TokenType::Newline,
                TokenType::Prose("> free prose here".to_string()),
                TokenType::Newline,
                TokenType::Eof,
            ],
        );
    }

    #[test]
    fn test_uri_prefix_is_a_nonterminal() {
        assert_tokens(
            "uriCharacters",
            vec![
                TokenType::Nonterminal("uriCharacters".to_string()),
                TokenType::Eof,
            ],
        );
    }

    #[test]
    fn test_positions() {
        let tokens = Lexer::new("  A :").lex().unwrap();
        assert_eq!((tokens[0].pos_start, tokens[0].pos_end), (2, 3));
        assert_eq!((tokens[1].pos_start, tokens[1].pos_end), (4, 5));
    }

    #[test]
    fn test_unknown_character_is_an_error() {
        let mut lexer = Lexer::new("A :\n  @\n");
        let err = lexer.lex().unwrap_err();
        match err {
            LexerError::UnexpectedCharacter {
                found,
                line,
                column,
                ..
            } => {
                assert_eq!(found, '@');
                assert_eq!((line, column), (2, 3));
            }
        }
    }

    #[test]
    fn test_stream_stops_after_eof() {
        let mut lexer = Lexer::new("A");
        assert!(lexer.next().is_some());
        assert!(matches!(lexer.next(), Some(Ok(Token { ttype: TokenType::Eof, .. }))));
        assert!(lexer.next().is_none());
    }

    #[test]
    fn test_stream_stops_after_error() {
        let mut lexer = Lexer::new("@ A");
        assert!(matches!(lexer.next(), Some(Err(_))));
        assert!(lexer.next().is_none());
    }
}
