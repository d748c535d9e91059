use super::AsmError;
use crate::vm::Word;

/// Token kinds for yvm assembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    /// Mnemonic or label name.
    Ident(String),
    /// `.name`, stored without the dot and lower-cased.
    Directive(String),
    Int(Word),
    Str(Vec<u8>),

    Colon,
    Comma,
    Plus,
    Minus,

    Newline,
    Eof,
}

/// Source location information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Span {
    pub line: usize,
    pub column: usize,
}

impl Span {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

/// A token with its kind and location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, span: Span) -> Self {
        Self { kind, span }
    }
}

/// The lexer for yvm assembly listings.
///
/// Line structure is significant, so newlines are tokens. `;` and `#` start
/// a comment that runs to the end of the line.
pub struct Lexer<'a> {
    source: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.char_indices().peekable(),
            line: 1,
            column: 1,
        }
    }

    pub fn scan_tokens(&mut self) -> Result<Vec<Token>, AsmError> {
        let mut tokens = Vec::new();

        loop {
            self.skip_whitespace_and_comments();

            let span = Span::new(self.line, self.column);

            let Some((_, ch)) = self.peek() else {
                tokens.push(Token::new(TokenKind::Eof, span));
                break;
            };

            let kind = match ch {
                '\n' => {
                    self.advance();
                    TokenKind::Newline
                }
                ':' => {
                    self.advance();
                    TokenKind::Colon
                }
                ',' => {
                    self.advance();
                    TokenKind::Comma
                }
                '+' => {
                    self.advance();
                    TokenKind::Plus
                }
                '-' => {
                    self.advance();
                    TokenKind::Minus
                }
                '.' => {
                    self.advance();
                    match self.peek() {
                        Some((_, c)) if is_ident_start(c) => {
                            TokenKind::Directive(self.scan_word().to_ascii_lowercase())
                        }
                        _ => return Err(self.error("expected directive name after '.'")),
                    }
                }
                '"' => self.scan_string()?,
                '\'' => self.scan_char()?,
                '0'..='9' => self.scan_number()?,
                c if is_ident_start(c) => TokenKind::Ident(self.scan_word()),
                _ => return Err(self.error(&format!("unexpected character '{}'", ch))),
            };

            tokens.push(Token::new(kind, span));
        }

        Ok(tokens)
    }

    fn peek(&mut self) -> Option<(usize, char)> {
        self.chars.peek().copied()
    }

    fn advance(&mut self) -> Option<(usize, char)> {
        let result = self.chars.next();
        if let Some((_, ch)) = result {
            if ch == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
        result
    }

    fn offset(&mut self) -> usize {
        self.peek().map(|(i, _)| i).unwrap_or(self.source.len())
    }

    fn skip_whitespace_and_comments(&mut self) {
        while let Some((_, ch)) = self.peek() {
            match ch {
                ' ' | '\t' | '\r' => {
                    self.advance();
                }
                ';' | '#' => {
                    while let Some((_, ch)) = self.peek() {
                        if ch == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                _ => break,
            }
        }
    }

    fn scan_word(&mut self) -> String {
        let start = self.offset();
        while let Some((_, ch)) = self.peek() {
            if is_ident_continue(ch) {
                self.advance();
            } else {
                break;
            }
        }
        let end = self.offset();
        self.source[start..end].to_string()
    }

    fn scan_number(&mut self) -> Result<TokenKind, AsmError> {
        let text = self.scan_word();
        let (digits, radix) = match text.get(..2) {
            Some("0x" | "0X") => (&text[2..], 16),
            Some("0b" | "0B") => (&text[2..], 2),
            _ => (text.as_str(), 10),
        };
        let digits = digits.replace('_', "");
        // Parsed unsigned so full-width bit patterns like 0xffff... are accepted.
        let value = u64::from_str_radix(&digits, radix)
            .map_err(|_| self.error(&format!("invalid number '{}'", text)))?;
        Ok(TokenKind::Int(value as i64 as Word))
    }

    fn scan_escape(&mut self) -> Result<u8, AsmError> {
        let Some((_, ch)) = self.advance() else {
            return Err(self.error("unterminated escape sequence"));
        };
        let byte = match ch {
            'n' => b'\n',
            't' => b'\t',
            'r' => b'\r',
            '0' => 0,
            '\\' => b'\\',
            '"' => b'"',
            '\'' => b'\'',
            'x' => {
                let mut value = 0u8;
                for _ in 0..2 {
                    let digit = self
                        .advance()
                        .and_then(|(_, c)| c.to_digit(16))
                        .ok_or_else(|| self.error("expected two hex digits after '\\x'"))?;
                    value = value * 16 + digit as u8;
                }
                value
            }
            _ => return Err(self.error(&format!("invalid escape sequence '\\{}'", ch))),
        };
        Ok(byte)
    }

    fn scan_string(&mut self) -> Result<TokenKind, AsmError> {
        self.advance(); // consume opening quote

        let mut value = Vec::new();
        loop {
            match self.peek() {
                None | Some((_, '\n')) => return Err(self.error("unterminated string")),
                Some((_, '"')) => {
                    self.advance();
                    break;
                }
                Some((_, '\\')) => {
                    self.advance();
                    value.push(self.scan_escape()?);
                }
                Some((_, ch)) => {
                    self.advance();
                    let mut buf = [0u8; 4];
                    value.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
                }
            }
        }
        Ok(TokenKind::Str(value))
    }

    fn scan_char(&mut self) -> Result<TokenKind, AsmError> {
        self.advance(); // consume opening quote

        let byte = match self.advance() {
            Some((_, '\\')) => self.scan_escape()?,
            Some((_, ch)) if ch.is_ascii() && ch != '\'' && ch != '\n' => ch as u8,
            _ => return Err(self.error("invalid character literal")),
        };
        match self.advance() {
            Some((_, '\'')) => Ok(TokenKind::Int(byte as Word)),
            _ => Err(self.error("unterminated character literal")),
        }
    }

    fn error(&self, message: &str) -> AsmError {
        AsmError::new(message, Span::new(self.line, self.column))
    }
}

fn is_ident_start(ch: char) -> bool {
    ch.is_ascii_alphabetic() || ch == '_'
}

fn is_ident_continue(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_' || ch == '.'
}
