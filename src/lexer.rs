// Lexer: character stream to spanned token stream
//
// Offsets are character offsets into the program text. String literals that
// contain `\( ... )` interpolations carry the interpolated expression as an
// already-tokenised sub-stream.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LexErrorKind {
    #[error("Unterminated string literal.")]
    UnterminatedString,

    #[error("Invalid escape sequence {0}.")]
    InvalidEscape(String),

    #[error("Unexpected character '{0}'.")]
    UnexpectedCharacter(char),

    #[error("Unterminated string interpolation.")]
    UnterminatedInterpolation,
}

/// A lexing failure with the offset it happened at and a caret excerpt of the
/// offending line.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind}")]
pub struct LexError {
    pub kind: LexErrorKind,
    pub offset: usize,
    pub highlight: String,
}

/// One piece of a string literal.
#[derive(Debug, Clone, PartialEq)]
pub enum StrPart {
    Literal(String),
    Interpolation(Vec<Spanned>),
}

/// Token types for the lexer
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Literals
    Number(f64),
    Str(Vec<StrPart>),

    // Names
    Ident(String),
    Field(String),
    Variable(String),
    Format(String),

    // Keywords
    Def,
    As,
    If,
    Then,
    Elif,
    Else,
    End,
    And,
    Or,
    Try,
    Catch,
    Reduce,
    Foreach,
    Label,

    // Operators
    Dot,
    DotDot,
    Pipe,
    Comma,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Alternative,
    Assign,
    UpdateAssign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    PercentAssign,
    AlternativeAssign,
    Question,
    QuestionAlternative,

    // Delimiters
    LeftParen,
    RightParen,
    LeftBracket,
    RightBracket,
    LeftBrace,
    RightBrace,
    Colon,
    Semicolon,
}

impl Token {
    /// Keyword spelling, for keywords that may double as object keys.
    pub fn keyword_text(&self) -> Option<&'static str> {
        Some(match self {
            Token::Def => "def",
            Token::As => "as",
            Token::If => "if",
            Token::Then => "then",
            Token::Elif => "elif",
            Token::Else => "else",
            Token::End => "end",
            Token::And => "and",
            Token::Or => "or",
            Token::Try => "try",
            Token::Catch => "catch",
            Token::Reduce => "reduce",
            Token::Foreach => "foreach",
            Token::Label => "label",
            _ => return None,
        })
    }

    /// Short human-readable description used in parse errors.
    pub fn describe(&self) -> String {
        if let Some(kw) = self.keyword_text() {
            return format!("'{}'", kw);
        }
        match self {
            Token::Number(n) => format!("number {}", crate::value::format_number(*n)),
            Token::Str(_) => "string".to_string(),
            Token::Ident(name) => format!("identifier '{}'", name),
            Token::Field(name) => format!("field '.{}'", name),
            Token::Variable(name) => format!("variable '${}'", name),
            Token::Format(name) => format!("format '@{}'", name),
            other => format!("'{}'", other.symbol()),
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            Token::Dot => ".",
            Token::DotDot => "..",
            Token::Pipe => "|",
            Token::Comma => ",",
            Token::Plus => "+",
            Token::Minus => "-",
            Token::Star => "*",
            Token::Slash => "/",
            Token::Percent => "%",
            Token::Equal => "==",
            Token::NotEqual => "!=",
            Token::Less => "<",
            Token::LessEqual => "<=",
            Token::Greater => ">",
            Token::GreaterEqual => ">=",
            Token::Alternative => "//",
            Token::Assign => "=",
            Token::UpdateAssign => "|=",
            Token::PlusAssign => "+=",
            Token::MinusAssign => "-=",
            Token::StarAssign => "*=",
            Token::SlashAssign => "/=",
            Token::PercentAssign => "%=",
            Token::AlternativeAssign => "//=",
            Token::Question => "?",
            Token::QuestionAlternative => "?//",
            Token::LeftParen => "(",
            Token::RightParen => ")",
            Token::LeftBracket => "[",
            Token::RightBracket => "]",
            Token::LeftBrace => "{",
            Token::RightBrace => "}",
            Token::Colon => ":",
            Token::Semicolon => ";",
            _ => "?",
        }
    }
}

/// A token with its half-open character span.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub start: usize,
    pub end: usize,
}

/// Lexer for tokenizing programs. It holds cursor state and is consumed as an
/// iterator; it stops after the first error.
pub struct Lexer {
    input: Vec<char>,
    position: usize,
    failed: bool,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        Lexer {
            input: input.chars().collect(),
            position: 0,
            failed: false,
        }
    }

    fn current(&self) -> Option<char> {
        self.input.get(self.position).copied()
    }

    fn peek(&self, offset: usize) -> Option<char> {
        self.input.get(self.position + offset).copied()
    }

    fn advance(&mut self) {
        if self.position < self.input.len() {
            self.position += 1;
        }
    }

    fn error(&self, kind: LexErrorKind, offset: usize) -> LexError {
        let text: String = self.input.iter().collect();
        LexError {
            kind,
            offset,
            highlight: highlight_offset(&text, offset),
        }
    }

    fn skip_whitespace_and_comments(&mut self) {
        while let Some(ch) = self.current() {
            if ch.is_whitespace() {
                self.advance();
            } else if ch == '#' {
                while let Some(c) = self.current() {
                    if c == '\n' {
                        break;
                    }
                    self.advance();
                }
            } else {
                break;
            }
        }
    }

    fn is_ident_start(ch: char) -> bool {
        ch.is_ascii_alphabetic() || ch == '_'
    }

    fn is_ident_continue(ch: char) -> bool {
        ch.is_ascii_alphanumeric() || ch == '_'
    }

    fn read_identifier(&mut self) -> String {
        let start = self.position;
        while let Some(ch) = self.current() {
            if Self::is_ident_continue(ch) {
                self.advance();
            } else if ch == ':' && self.peek(1) == Some(':') && self.peek(2).map_or(false, Self::is_ident_start) {
                // module-qualified names such as `mod::fn`
                self.advance();
                self.advance();
            } else {
                break;
            }
        }
        self.input[start..self.position].iter().collect()
    }

    fn read_number(&mut self) -> f64 {
        let start = self.position;
        while self.current().map_or(false, |c| c.is_ascii_digit()) {
            self.advance();
        }
        if self.current() == Some('.') && self.peek(1).map_or(false, |c| c.is_ascii_digit()) {
            self.advance();
            while self.current().map_or(false, |c| c.is_ascii_digit()) {
                self.advance();
            }
        }
        if matches!(self.current(), Some('e') | Some('E')) {
            let has_sign = matches!(self.peek(1), Some('+') | Some('-'));
            let digit_at = if has_sign { 2 } else { 1 };
            if self.peek(digit_at).map_or(false, |c| c.is_ascii_digit()) {
                for _ in 0..digit_at {
                    self.advance();
                }
                while self.current().map_or(false, |c| c.is_ascii_digit()) {
                    self.advance();
                }
            }
        }
        let text: String = self.input[start..self.position].iter().collect();
        // The scanned text is always a valid float literal.
        text.parse().unwrap_or(0.0)
    }

    fn read_hex4(&mut self, escape_start: usize) -> Result<u32, LexError> {
        let mut hex = String::new();
        for _ in 0..4 {
            match self.current() {
                Some(h) if h.is_ascii_hexdigit() => {
                    hex.push(h);
                    self.advance();
                }
                _ => {
                    return Err(self.error(
                        LexErrorKind::InvalidEscape(format!("\\u{}", hex)),
                        escape_start,
                    ))
                }
            }
        }
        u32::from_str_radix(&hex, 16)
            .map_err(|_| self.error(LexErrorKind::InvalidEscape(format!("\\u{}", hex)), escape_start))
    }

    fn read_string(&mut self) -> Result<Vec<StrPart>, LexError> {
        let open = self.position;
        self.advance(); // skip opening quote

        let mut parts = Vec::new();
        let mut literal = String::new();

        loop {
            match self.current() {
                None => return Err(self.error(LexErrorKind::UnterminatedString, open)),
                Some('"') => {
                    self.advance();
                    if !literal.is_empty() || parts.is_empty() {
                        parts.push(StrPart::Literal(literal));
                    }
                    return Ok(parts);
                }
                Some('\\') => {
                    let escape_start = self.position;
                    self.advance();
                    match self.current() {
                        None => return Err(self.error(LexErrorKind::UnterminatedString, open)),
                        Some('"') => literal.push('"'),
                        Some('\\') => literal.push('\\'),
                        Some('/') => literal.push('/'),
                        Some('b') => literal.push('\u{0008}'),
                        Some('f') => literal.push('\u{000C}'),
                        Some('n') => literal.push('\n'),
                        Some('r') => literal.push('\r'),
                        Some('t') => literal.push('\t'),
                        Some('u') => {
                            self.advance();
                            let code = self.read_hex4(escape_start)?;
                            let ch = if (0xD800..0xDC00).contains(&code)
                                && self.current() == Some('\\')
                                && self.peek(1) == Some('u')
                            {
                                self.advance();
                                self.advance();
                                let low = self.read_hex4(escape_start)?;
                                let combined = 0x10000 + ((code - 0xD800) << 10) + (low.wrapping_sub(0xDC00) & 0x3FF);
                                char::from_u32(combined)
                            } else {
                                char::from_u32(code)
                            };
                            literal.push(ch.unwrap_or('\u{FFFD}'));
                            continue; // already past the hex digits
                        }
                        Some('(') => {
                            self.advance();
                            if !literal.is_empty() {
                                parts.push(StrPart::Literal(std::mem::take(&mut literal)));
                            }
                            parts.push(StrPart::Interpolation(self.read_interpolation(escape_start)?));
                            continue;
                        }
                        Some(ch) => {
                            return Err(self.error(
                                LexErrorKind::InvalidEscape(format!("\\{}", ch)),
                                escape_start,
                            ))
                        }
                    }
                    self.advance();
                }
                Some(ch) => {
                    literal.push(ch);
                    self.advance();
                }
            }
        }
    }

    /// Tokenise up to the parenthesis closing a `\(` interpolation.
    fn read_interpolation(&mut self, escape_start: usize) -> Result<Vec<Spanned>, LexError> {
        let mut tokens = Vec::new();
        let mut depth = 0usize;
        loop {
            match self.next_token()? {
                None => return Err(self.error(LexErrorKind::UnterminatedInterpolation, escape_start)),
                Some(spanned) => match spanned.token {
                    Token::LeftParen => {
                        depth += 1;
                        tokens.push(spanned);
                    }
                    Token::RightParen if depth == 0 => return Ok(tokens),
                    Token::RightParen => {
                        depth -= 1;
                        tokens.push(spanned);
                    }
                    _ => tokens.push(spanned),
                },
            }
        }
    }

    /// Pick the longest operator among the candidates that match here.
    fn operator(&mut self, candidates: &[(&str, Token)]) -> Option<Token> {
        for (text, token) in candidates {
            let matches = text
                .chars()
                .enumerate()
                .all(|(i, c)| self.peek(i) == Some(c));
            if matches {
                for _ in 0..text.chars().count() {
                    self.advance();
                }
                return Some(token.clone());
            }
        }
        None
    }

    pub fn next_token(&mut self) -> Result<Option<Spanned>, LexError> {
        self.skip_whitespace_and_comments();
        let start = self.position;

        let ch = match self.current() {
            None => return Ok(None),
            Some(ch) => ch,
        };

        let token = match ch {
            '"' => Token::Str(self.read_string()?),
            c if c.is_ascii_digit() => Token::Number(self.read_number()),
            '$' if self.peek(1).map_or(false, Self::is_ident_start) => {
                self.advance();
                Token::Variable(self.read_identifier())
            }
            '@' if self.peek(1).map_or(false, Self::is_ident_start) => {
                self.advance();
                Token::Format(self.read_identifier())
            }
            '.' if self.peek(1).map_or(false, Self::is_ident_start) => {
                self.advance();
                Token::Field(self.read_identifier())
            }
            c if Self::is_ident_start(c) => {
                let ident = self.read_identifier();
                match ident.as_str() {
                    "def" => Token::Def,
                    "as" => Token::As,
                    "if" => Token::If,
                    "then" => Token::Then,
                    "elif" => Token::Elif,
                    "else" => Token::Else,
                    "end" => Token::End,
                    "and" => Token::And,
                    "or" => Token::Or,
                    "try" => Token::Try,
                    "catch" => Token::Catch,
                    "reduce" => Token::Reduce,
                    "foreach" => Token::Foreach,
                    "label" => Token::Label,
                    _ => Token::Ident(ident),
                }
            }
            _ => {
                let candidates: &[(&str, Token)] = match ch {
                    '.' => &[("..", Token::DotDot), (".", Token::Dot)],
                    '|' => &[("|=", Token::UpdateAssign), ("|", Token::Pipe)],
                    ',' => &[(",", Token::Comma)],
                    '+' => &[("+=", Token::PlusAssign), ("+", Token::Plus)],
                    '-' => &[("-=", Token::MinusAssign), ("-", Token::Minus)],
                    '*' => &[("*=", Token::StarAssign), ("*", Token::Star)],
                    '/' => &[
                        ("//=", Token::AlternativeAssign),
                        ("//", Token::Alternative),
                        ("/=", Token::SlashAssign),
                        ("/", Token::Slash),
                    ],
                    '%' => &[("%=", Token::PercentAssign), ("%", Token::Percent)],
                    '=' => &[("==", Token::Equal), ("=", Token::Assign)],
                    '!' => &[("!=", Token::NotEqual)],
                    '<' => &[("<=", Token::LessEqual), ("<", Token::Less)],
                    '>' => &[(">=", Token::GreaterEqual), (">", Token::Greater)],
                    '?' => &[("?//", Token::QuestionAlternative), ("?", Token::Question)],
                    '(' => &[("(", Token::LeftParen)],
                    ')' => &[(")", Token::RightParen)],
                    '[' => &[("[", Token::LeftBracket)],
                    ']' => &[("]", Token::RightBracket)],
                    '{' => &[("{", Token::LeftBrace)],
                    '}' => &[("}", Token::RightBrace)],
                    ':' => &[(":", Token::Colon)],
                    ';' => &[(";", Token::Semicolon)],
                    _ => &[],
                };
                match self.operator(candidates) {
                    Some(token) => token,
                    None => return Err(self.error(LexErrorKind::UnexpectedCharacter(ch), start)),
                }
            }
        };

        Ok(Some(Spanned {
            token,
            start,
            end: self.position,
        }))
    }
}

impl Iterator for Lexer {
    type Item = Result<Spanned, LexError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_token() {
            Ok(Some(spanned)) => Some(Ok(spanned)),
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Tokenize a whole program.
pub fn tokenize(text: &str) -> Result<Vec<Spanned>, LexError> {
    Lexer::new(text).collect()
}

/// The line containing `offset` with a caret under that character.
fn highlight_offset(text: &str, offset: usize) -> String {
    let mut line_start = 0;
    for (i, ch) in text.chars().enumerate() {
        if i >= offset {
            break;
        }
        if ch == '\n' {
            line_start = i + 1;
        }
    }
    let line: String = text.chars().skip(line_start).take_while(|c| *c != '\n').collect();
    format!("{}\n{}^", line, " ".repeat(offset - line_start))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(text: &str) -> Vec<Token> {
        tokenize(text).unwrap().into_iter().map(|s| s.token).collect()
    }

    fn literal(s: &str) -> Token {
        Token::Str(vec![StrPart::Literal(s.to_string())])
    }

    #[test]
    fn test_lexer_numbers() {
        assert_eq!(
            tokens("42 3.14 2.5e10 1E-5"),
            vec![
                Token::Number(42.0),
                Token::Number(3.14),
                Token::Number(2.5e10),
                Token::Number(1e-5)
            ]
        );
    }

    #[test]
    fn test_lexer_minus_is_an_operator() {
        assert_eq!(
            tokens("1-1"),
            vec![Token::Number(1.0), Token::Minus, Token::Number(1.0)]
        );
    }

    #[test]
    fn test_lexer_strings_and_escapes() {
        assert_eq!(tokens(r#""hello""#), vec![literal("hello")]);
        assert_eq!(tokens(r#""a\"b\\c\/d""#), vec![literal("a\"b\\c/d")]);
        assert_eq!(tokens(r#""é""#), vec![literal("é")]);
        assert_eq!(tokens(r#""😀""#), vec![literal("😀")]);
        assert_eq!(tokens(r#""""#), vec![literal("")]);
    }

    #[test]
    fn test_lexer_interpolation() {
        let toks = tokens(r#""a\(.x + 1)b""#);
        match &toks[0] {
            Token::Str(parts) => {
                assert_eq!(parts.len(), 3);
                assert_eq!(parts[0], StrPart::Literal("a".to_string()));
                match &parts[1] {
                    StrPart::Interpolation(inner) => {
                        let kinds: Vec<&Token> = inner.iter().map(|s| &s.token).collect();
                        assert_eq!(
                            kinds,
                            vec![&Token::Field("x".to_string()), &Token::Plus, &Token::Number(1.0)]
                        );
                    }
                    other => panic!("expected interpolation, got {:?}", other),
                }
                assert_eq!(parts[2], StrPart::Literal("b".to_string()));
            }
            other => panic!("expected string, got {:?}", other),
        }
    }

    #[test]
    fn test_lexer_keywords_and_names() {
        assert_eq!(
            tokens("def as if reduce foo $bar .baz @base64"),
            vec![
                Token::Def,
                Token::As,
                Token::If,
                Token::Reduce,
                Token::Ident("foo".to_string()),
                Token::Variable("bar".to_string()),
                Token::Field("baz".to_string()),
                Token::Format("base64".to_string()),
            ]
        );
    }

    #[test]
    fn test_lexer_operators_longest_match() {
        assert_eq!(
            tokens(".. . |= | //= // ?// ? == = != <= >="),
            vec![
                Token::DotDot,
                Token::Dot,
                Token::UpdateAssign,
                Token::Pipe,
                Token::AlternativeAssign,
                Token::Alternative,
                Token::QuestionAlternative,
                Token::Question,
                Token::Equal,
                Token::Assign,
                Token::NotEqual,
                Token::LessEqual,
                Token::GreaterEqual,
            ]
        );
    }

    #[test]
    fn test_lexer_comments() {
        assert_eq!(tokens(". # ignore me\n| 1"), vec![Token::Dot, Token::Pipe, Token::Number(1.0)]);
    }

    #[test]
    fn test_lexer_spans() {
        let spanned = tokenize("  .foo | 10").unwrap();
        assert_eq!((spanned[0].start, spanned[0].end), (2, 6));
        assert_eq!((spanned[2].start, spanned[2].end), (9, 11));
    }

    #[test]
    fn test_lexer_errors() {
        let err = tokenize("\"abc").unwrap_err();
        assert_eq!(err.kind, LexErrorKind::UnterminatedString);
        assert_eq!(err.offset, 0);

        let err = tokenize(r#""\q""#).unwrap_err();
        assert_eq!(err.kind, LexErrorKind::InvalidEscape("\\q".to_string()));

        let err = tokenize(". ^ 1").unwrap_err();
        assert_eq!(err.kind, LexErrorKind::UnexpectedCharacter('^'));
        assert_eq!(err.highlight, ". ^ 1\n  ^");
    }

    #[test]
    fn test_lexer_stops_after_error() {
        let mut lexer = Lexer::new("! 1");
        assert!(matches!(lexer.next(), Some(Err(_))));
        assert!(lexer.next().is_none());
    }
}
