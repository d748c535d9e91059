use std::str::FromStr;

use super::AsmError;
use super::lexer::{Span, Token, TokenKind};
use crate::vm::{Op, Word};

/// Which region a statement assembles into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Text,
    Data,
}

/// An instruction operand or `.word` value before label resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    Int(Word),
    /// `name`, `name+offset` or `name-offset`.
    Label { name: String, offset: Word },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementKind {
    Label(String),
    Section(Section),
    Entry(String),
    Instruction { op: Op, operand: Option<Operand> },
    Bytes(Vec<u8>),
    Words(Vec<Operand>),
    Zero(usize),
    Align(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub kind: StatementKind,
    pub span: Span,
}

/// A line-oriented parser for yvm assembly.
pub struct Parser {
    tokens: Vec<Token>,
    current: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, current: 0 }
    }

    pub fn parse(&mut self) -> Result<Vec<Statement>, AsmError> {
        let mut statements = Vec::new();

        while !self.is_at_end() {
            if self.match_token(&TokenKind::Newline) {
                continue;
            }
            self.line(&mut statements)?;
        }

        Ok(statements)
    }

    /// One source line: any number of labels, then at most one instruction
    /// or directive.
    fn line(&mut self, out: &mut Vec<Statement>) -> Result<(), AsmError> {
        loop {
            let span = self.current_span();
            match self.peek_kind().clone() {
                TokenKind::Ident(name) if self.peek_next_kind() == Some(&TokenKind::Colon) => {
                    self.advance();
                    self.advance();
                    out.push(Statement {
                        kind: StatementKind::Label(name),
                        span,
                    });
                }
                TokenKind::Ident(mnemonic) => {
                    self.advance();
                    out.push(Statement {
                        kind: self.instruction(&mnemonic, span)?,
                        span,
                    });
                    break;
                }
                TokenKind::Directive(name) => {
                    self.advance();
                    out.push(Statement {
                        kind: self.directive(&name, span)?,
                        span,
                    });
                    break;
                }
                TokenKind::Newline | TokenKind::Eof => break,
                other => return Err(self.error(&format!("unexpected {}", describe(&other)), span)),
            }
        }
        self.end_of_line()
    }

    fn instruction(&mut self, mnemonic: &str, span: Span) -> Result<StatementKind, AsmError> {
        let op = Op::from_str(mnemonic)
            .map_err(|_| self.error(&format!("unknown mnemonic '{}'", mnemonic), span))?;

        let operand = if self.at_line_end() {
            None
        } else {
            Some(self.operand()?)
        };

        match (op.has_operand(), &operand) {
            (true, None) => Err(self.error(&format!("{} requires an operand", op), span)),
            (false, Some(_)) => Err(self.error(&format!("{} takes no operand", op), span)),
            _ => Ok(StatementKind::Instruction { op, operand }),
        }
    }

    fn directive(&mut self, name: &str, span: Span) -> Result<StatementKind, AsmError> {
        let kind = match name {
            "text" => StatementKind::Section(Section::Text),
            "data" => StatementKind::Section(Section::Data),
            "entry" => StatementKind::Entry(self.expect_ident()?),
            "byte" => {
                let mut bytes = Vec::new();
                for value in self.int_list()? {
                    if !(-128..=255).contains(&value) {
                        return Err(self.error(&format!("byte value {} out of range", value), span));
                    }
                    bytes.push(value as u8);
                }
                StatementKind::Bytes(bytes)
            }
            "word" => {
                let mut words = vec![self.operand()?];
                while self.match_token(&TokenKind::Comma) {
                    words.push(self.operand()?);
                }
                StatementKind::Words(words)
            }
            "ascii" | "asciz" => {
                let mut bytes = self.expect_string()?;
                if name == "asciz" {
                    bytes.push(0);
                }
                StatementKind::Bytes(bytes)
            }
            "zero" => StatementKind::Zero(self.expect_count(".zero")?),
            "align" => {
                let n = self.expect_count(".align")?;
                if n == 0 {
                    return Err(self.error(".align requires a positive value", span));
                }
                StatementKind::Align(n)
            }
            _ => return Err(self.error(&format!("unknown directive '.{}'", name), span)),
        };
        Ok(kind)
    }

    fn operand(&mut self) -> Result<Operand, AsmError> {
        let span = self.current_span();
        match self.peek_kind().clone() {
            TokenKind::Minus | TokenKind::Int(_) => Ok(Operand::Int(self.signed_int()?)),
            TokenKind::Ident(name) => {
                self.advance();
                let offset = if self.match_token(&TokenKind::Plus) {
                    self.expect_int()?
                } else if self.match_token(&TokenKind::Minus) {
                    self.expect_int()?.wrapping_neg()
                } else {
                    0
                };
                Ok(Operand::Label { name, offset })
            }
            other => Err(self.error(&format!("expected operand, found {}", describe(&other)), span)),
        }
    }

    fn int_list(&mut self) -> Result<Vec<Word>, AsmError> {
        let mut values = vec![self.signed_int()?];
        while self.match_token(&TokenKind::Comma) {
            values.push(self.signed_int()?);
        }
        Ok(values)
    }

    fn signed_int(&mut self) -> Result<Word, AsmError> {
        if self.match_token(&TokenKind::Minus) {
            Ok(self.expect_int()?.wrapping_neg())
        } else {
            self.expect_int()
        }
    }

    fn expect_count(&mut self, directive: &str) -> Result<usize, AsmError> {
        let span = self.current_span();
        let value = self.signed_int()?;
        usize::try_from(value)
            .map_err(|_| self.error(&format!("{} requires a non-negative value", directive), span))
    }

    fn expect_int(&mut self) -> Result<Word, AsmError> {
        let span = self.current_span();
        match self.peek_kind().clone() {
            TokenKind::Int(value) => {
                self.advance();
                Ok(value)
            }
            other => Err(self.error(&format!("expected number, found {}", describe(&other)), span)),
        }
    }

    fn expect_ident(&mut self) -> Result<String, AsmError> {
        let span = self.current_span();
        match self.peek_kind().clone() {
            TokenKind::Ident(name) => {
                self.advance();
                Ok(name)
            }
            other => Err(self.error(&format!("expected label, found {}", describe(&other)), span)),
        }
    }

    fn expect_string(&mut self) -> Result<Vec<u8>, AsmError> {
        let span = self.current_span();
        match self.peek_kind().clone() {
            TokenKind::Str(bytes) => {
                self.advance();
                Ok(bytes)
            }
            other => Err(self.error(&format!("expected string, found {}", describe(&other)), span)),
        }
    }

    fn end_of_line(&mut self) -> Result<(), AsmError> {
        if self.match_token(&TokenKind::Newline) || self.is_at_end() {
            Ok(())
        } else {
            let span = self.current_span();
            let found = describe(self.peek_kind());
            Err(self.error(&format!("expected end of line, found {}", found), span))
        }
    }

    // Helper methods

    fn at_line_end(&self) -> bool {
        matches!(self.peek_kind(), TokenKind::Newline | TokenKind::Eof)
    }

    fn is_at_end(&self) -> bool {
        matches!(self.peek_kind(), TokenKind::Eof)
    }

    fn peek_kind(&self) -> &TokenKind {
        self.tokens
            .get(self.current)
            .map(|t| &t.kind)
            .unwrap_or(&TokenKind::Eof)
    }

    fn peek_next_kind(&self) -> Option<&TokenKind> {
        self.tokens.get(self.current + 1).map(|t| &t.kind)
    }

    fn current_span(&self) -> Span {
        self.tokens
            .get(self.current)
            .or_else(|| self.tokens.last())
            .map(|t| t.span)
            .unwrap_or(Span::new(1, 1))
    }

    fn advance(&mut self) {
        if self.current < self.tokens.len() {
            self.current += 1;
        }
    }

    fn match_token(&mut self, kind: &TokenKind) -> bool {
        if self.peek_kind() == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error(&self, message: &str, span: Span) -> AsmError {
        AsmError::new(message, span)
    }
}

fn describe(kind: &TokenKind) -> String {
    match kind {
        TokenKind::Ident(name) => format!("'{}'", name),
        TokenKind::Directive(name) => format!("'.{}'", name),
        TokenKind::Int(value) => format!("number {}", value),
        TokenKind::Str(_) => "string".to_string(),
        TokenKind::Colon => "':'".to_string(),
        TokenKind::Comma => "','".to_string(),
        TokenKind::Plus => "'+'".to_string(),
        TokenKind::Minus => "'-'".to_string(),
        TokenKind::Newline => "end of line".to_string(),
        TokenKind::Eof => "end of file".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::lexer::Lexer;

    fn parse(source: &str) -> Result<Vec<StatementKind>, AsmError> {
        let tokens = Lexer::new(source).scan_tokens()?;
        let statements = Parser::new(tokens).parse()?;
        Ok(statements.into_iter().map(|s| s.kind).collect())
    }

    #[test]
    fn test_labels_and_instructions() {
        let kinds = parse("main: IMM 10\n  push\nloop: done: JMP loop\n").unwrap();
        assert_eq!(
            kinds,
            vec![
                StatementKind::Label("main".into()),
                StatementKind::Instruction {
                    op: Op::Imm,
                    operand: Some(Operand::Int(10)),
                },
                StatementKind::Instruction {
                    op: Op::Push,
                    operand: None,
                },
                StatementKind::Label("loop".into()),
                StatementKind::Label("done".into()),
                StatementKind::Instruction {
                    op: Op::Jmp,
                    operand: Some(Operand::Label {
                        name: "loop".into(),
                        offset: 0,
                    }),
                },
            ]
        );
    }

    #[test]
    fn test_operands() {
        let kinds = parse("LEA -2\nIMM msg+3\nIMM msg-1\nIMM 'A'").unwrap();
        let operands: Vec<_> = kinds
            .into_iter()
            .map(|k| match k {
                StatementKind::Instruction { operand, .. } => operand.unwrap(),
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert_eq!(
            operands,
            vec![
                Operand::Int(-2),
                Operand::Label { name: "msg".into(), offset: 3 },
                Operand::Label { name: "msg".into(), offset: -1 },
                Operand::Int(65),
            ]
        );
    }

    #[test]
    fn test_directives() {
        let kinds = parse(
            ".data\nmsg: .asciz \"hi\"\n.byte 1, -1, 255\n.word 7, msg\n.zero 3\n.align 8\n.text\n.entry main\n",
        )
        .unwrap();
        assert_eq!(
            kinds,
            vec![
                StatementKind::Section(Section::Data),
                StatementKind::Label("msg".into()),
                StatementKind::Bytes(b"hi\0".to_vec()),
                StatementKind::Bytes(vec![1, 255, 255]),
                StatementKind::Words(vec![
                    Operand::Int(7),
                    Operand::Label { name: "msg".into(), offset: 0 },
                ]),
                StatementKind::Zero(3),
                StatementKind::Align(8),
                StatementKind::Section(Section::Text),
                StatementKind::Entry("main".into()),
            ]
        );
    }

    #[test]
    fn test_operand_arity() {
        let err = parse("ADJ").unwrap_err();
        assert_eq!(err.message, "ADJ requires an operand");
        let err = parse("\n  PUSH 3").unwrap_err();
        assert_eq!(err.message, "PUSH takes no operand");
        assert_eq!(err.span, Span::new(2, 3));
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse("FOO 1").unwrap_err().message.contains("unknown mnemonic"));
        assert!(parse(".byte 256").unwrap_err().message.contains("out of range"));
        assert!(parse(".bogus").unwrap_err().message.contains("unknown directive"));
        assert!(parse("IMM 1 2").unwrap_err().message.contains("expected end of line"));
        assert!(parse(".align 0").is_err());
        assert!(parse(".zero -1").is_err());
    }
}
