use indexmap::IndexMap;

use crate::{
    config::LanguageConfig,
    diagnostics::{Diagnostic, DiagnosticKind, SourcePos},
};

/// Keyword roles. Concrete spellings come from the configuration table, so
/// the lexer never hard-codes surface syntax.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Var,
    Function,
    Async,
    Class,
    Extends,
    New,
    This,
    If,
    Else,
    While,
    For,
    In,
    Try,
    Catch,
    Finally,
    Throw,
    Return,
    Break,
    Continue,
    Import,
    Await,
    Lambda,
    True,
    False,
    Null,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Identifier,
    Number,
    String,
    Keyword(Keyword),
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Colon,
    Semicolon,
    Assign,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    BangEqual,
    EqualEqual,
    // Always a plain less-than token; the parser decides whether it opens a
    // generic argument list based on the grammar position.
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    AndAnd,
    OrOr,
    Eof,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub pos: SourcePos,
}

pub struct Lexer<'a> {
    chars: std::str::Chars<'a>,
    peeked: Option<char>,
    line: u32,
    column: u32,
    keywords: IndexMap<String, Keyword>,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str, config: &LanguageConfig) -> Self {
        Self {
            chars: source.chars(),
            peeked: None,
            line: 1,
            column: 1,
            keywords: keyword_table(config),
        }
    }

    fn bump(&mut self) -> Option<char> {
        let next = self.peeked.take().or_else(|| self.chars.next());
        if let Some(ch) = next {
            if ch == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
        next
    }

    fn peek(&mut self) -> Option<char> {
        if self.peeked.is_none() {
            self.peeked = self.chars.next();
        }
        self.peeked
    }

    fn match_next(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn pos(&self) -> SourcePos {
        SourcePos::new(self.line, self.column)
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            match self.peek() {
                Some(ch) if ch.is_whitespace() => {
                    self.bump();
                }
                Some('#') => {
                    while let Some(ch) = self.peek() {
                        if ch == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                _ => break,
            }
        }
    }

    fn identifier_or_keyword(&mut self, first: char, pos: SourcePos) -> Token {
        let mut lexeme = String::new();
        lexeme.push(first);
        while let Some(ch) = self.peek() {
            if ch.is_alphanumeric() || ch == '_' {
                lexeme.push(ch);
                self.bump();
            } else {
                break;
            }
        }
        let kind = match self.keywords.get(&lexeme) {
            Some(keyword) => TokenKind::Keyword(*keyword),
            None => TokenKind::Identifier,
        };
        Token { kind, lexeme, pos }
    }

    fn number_literal(&mut self, first: char, pos: SourcePos) -> Token {
        let mut lexeme = String::new();
        lexeme.push(first);
        let mut seen_dot = false;
        while let Some(ch) = self.peek() {
            match ch {
                '0'..='9' | '_' => {
                    lexeme.push(ch);
                    self.bump();
                }
                '.' if !seen_dot => {
                    seen_dot = true;
                    lexeme.push(ch);
                    self.bump();
                }
                _ => break,
            }
        }
        Token {
            kind: TokenKind::Number,
            lexeme,
            pos,
        }
    }

    fn string_literal(&mut self, quote: char, pos: SourcePos) -> Result<Token, Diagnostic> {
        let mut value = String::new();
        while let Some(ch) = self.bump() {
            match ch {
                c if c == quote => {
                    return Ok(Token {
                        kind: TokenKind::String,
                        lexeme: value,
                        pos,
                    });
                }
                '\\' => match self.bump() {
                    Some('n') => value.push('\n'),
                    Some('r') => value.push('\r'),
                    Some('t') => value.push('\t'),
                    Some('\\') => value.push('\\'),
                    Some(other) => value.push(other),
                    None => break,
                },
                _ => value.push(ch),
            }
        }
        Err(
            Diagnostic::new(DiagnosticKind::Lexer, "unterminated string literal")
                .with_pos(pos),
        )
    }

    fn simple_token(&self, lexeme: &str, kind: TokenKind, pos: SourcePos) -> Token {
        Token {
            kind,
            lexeme: lexeme.to_string(),
            pos,
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, Diagnostic> {
        let mut tokens = Vec::new();
        loop {
            self.skip_whitespace_and_comments();
            let pos = self.pos();
            let ch = match self.bump() {
                Some(ch) => ch,
                None => {
                    tokens.push(Token {
                        kind: TokenKind::Eof,
                        lexeme: String::new(),
                        pos,
                    });
                    break;
                }
            };

            let token = match ch {
                c if c.is_alphabetic() || c == '_' => self.identifier_or_keyword(c, pos),
                '0'..='9' => self.number_literal(ch, pos),
                '"' | '\'' => self.string_literal(ch, pos)?,
                '(' => self.simple_token("(", TokenKind::LParen, pos),
                ')' => self.simple_token(")", TokenKind::RParen, pos),
                '{' => self.simple_token("{", TokenKind::LBrace, pos),
                '}' => self.simple_token("}", TokenKind::RBrace, pos),
                '[' => self.simple_token("[", TokenKind::LBracket, pos),
                ']' => self.simple_token("]", TokenKind::RBracket, pos),
                ',' => self.simple_token(",", TokenKind::Comma, pos),
                '.' => self.simple_token(".", TokenKind::Dot, pos),
                ':' => self.simple_token(":", TokenKind::Colon, pos),
                ';' => self.simple_token(";", TokenKind::Semicolon, pos),
                '+' => self.simple_token("+", TokenKind::Plus, pos),
                '-' => self.simple_token("-", TokenKind::Minus, pos),
                '*' => self.simple_token("*", TokenKind::Star, pos),
                '/' => self.simple_token("/", TokenKind::Slash, pos),
                '%' => self.simple_token("%", TokenKind::Percent, pos),
                '=' => {
                    if self.match_next('=') {
                        self.simple_token("==", TokenKind::EqualEqual, pos)
                    } else {
                        self.simple_token("=", TokenKind::Assign, pos)
                    }
                }
                '!' => {
                    if self.match_next('=') {
                        self.simple_token("!=", TokenKind::BangEqual, pos)
                    } else {
                        self.simple_token("!", TokenKind::Bang, pos)
                    }
                }
                '<' => {
                    if self.match_next('=') {
                        self.simple_token("<=", TokenKind::LessEqual, pos)
                    } else {
                        self.simple_token("<", TokenKind::Less, pos)
                    }
                }
                '>' => {
                    if self.match_next('=') {
                        self.simple_token(">=", TokenKind::GreaterEqual, pos)
                    } else {
                        self.simple_token(">", TokenKind::Greater, pos)
                    }
                }
                '&' => {
                    if self.match_next('&') {
                        self.simple_token("&&", TokenKind::AndAnd, pos)
                    } else {
                        return Err(Diagnostic::new(
                            DiagnosticKind::Lexer,
                            "expected `&&`, found single `&`",
                        )
                        .with_pos(pos));
                    }
                }
                '|' => {
                    if self.match_next('|') {
                        self.simple_token("||", TokenKind::OrOr, pos)
                    } else {
                        return Err(Diagnostic::new(
                            DiagnosticKind::Lexer,
                            "expected `||`, found single `|`",
                        )
                        .with_pos(pos));
                    }
                }
                other => {
                    return Err(Diagnostic::new(
                        DiagnosticKind::Lexer,
                        format!("unexpected character `{other}`"),
                    )
                    .with_pos(pos));
                }
            };
            tokens.push(token);
        }
        Ok(tokens)
    }
}

fn keyword_table(config: &LanguageConfig) -> IndexMap<String, Keyword> {
    use self::Keyword as Kw;
    let kw = &config.keywords;
    let mut table = IndexMap::new();
    for (spelling, keyword) in [
        (&kw.var, Kw::Var),
        (&kw.function, Kw::Function),
        (&kw.async_, Kw::Async),
        (&kw.class, Kw::Class),
        (&kw.extends, Kw::Extends),
        (&kw.new, Kw::New),
        (&kw.this, Kw::This),
        (&kw.if_, Kw::If),
        (&kw.else_, Kw::Else),
        (&kw.while_, Kw::While),
        (&kw.for_, Kw::For),
        (&kw.in_, Kw::In),
        (&kw.try_, Kw::Try),
        (&kw.catch, Kw::Catch),
        (&kw.finally, Kw::Finally),
        (&kw.throw, Kw::Throw),
        (&kw.return_, Kw::Return),
        (&kw.break_, Kw::Break),
        (&kw.continue_, Kw::Continue),
        (&kw.import, Kw::Import),
        (&kw.await_, Kw::Await),
        (&kw.lambda, Kw::Lambda),
        (&kw.true_, Kw::True),
        (&kw.false_, Kw::False),
        (&kw.null, Kw::Null),
    ] {
        table.insert(spelling.clone(), keyword);
    }
    table
}
