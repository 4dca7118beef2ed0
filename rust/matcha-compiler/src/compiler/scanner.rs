//! Character-level scanner for `.mtc` source files.

use crate::compiler::tokens::{keyword_kind, SourceLocation, Token, TokenKind};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("{location}: unexpected char {ch:?}")]
    UnexpectedChar { location: SourceLocation, ch: char },
    #[error("{location}: unterminated string literal")]
    UnterminatedString { location: SourceLocation },
    #[error("{location}: end of file")]
    EndOfFile { location: SourceLocation },
}

pub struct Scanner {
    source: Vec<char>,
    pos: usize,
    file_name: String,
    short_file_name: String,
    file_offset: i64,
    line_number: u32,
    column_number: u32,
}

impl Scanner {
    pub fn new(source: &str, file_name: &str, short_file_name: &str) -> Self {
        Self {
            source: source.chars().collect(),
            pos: 0,
            file_name: file_name.to_string(),
            short_file_name: short_file_name.to_string(),
            file_offset: 0,
            line_number: 1,
            column_number: 1,
        }
    }

    pub fn location(&self) -> SourceLocation {
        SourceLocation {
            file_name: self.file_name.clone(),
            short_file_name: self.short_file_name.clone(),
            file_offset: self.file_offset,
            line_number: self.line_number,
            column_number: self.column_number,
        }
    }

    fn peek(&self, ahead: usize) -> Option<char> {
        self.source.get(self.pos + ahead).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.source.get(self.pos).copied()?;
        self.pos += 1;
        self.file_offset += 1;
        if ch == '\n' {
            self.line_number += 1;
            self.column_number = 1;
        } else {
            self.column_number += 1;
        }
        Some(ch)
    }

    fn advance_or_eof(&mut self) -> Result<char, ScanError> {
        self.advance().ok_or_else(|| ScanError::EndOfFile {
            location: self.location(),
        })
    }

    /// Produces the next raw token, including whitespace and comments.
    /// Returns `None` once the input is exhausted.
    pub fn get_token(&mut self) -> Result<Option<Token>, ScanError> {
        let location = self.location();
        let Some(c) = self.advance() else {
            return Ok(None);
        };

        let token = match c {
            '(' => Token::new(TokenKind::OpenParen, "(", location),
            ')' => Token::new(TokenKind::CloseParen, ")", location),
            '{' => Token::new(TokenKind::OpenBrace, "{", location),
            '}' => Token::new(TokenKind::CloseBrace, "}", location),
            '+' => Token::new(TokenKind::Plus, "+", location),
            ',' => Token::new(TokenKind::Comma, ",", location),
            ':' => Token::new(TokenKind::Colon, ":", location),
            '!' => Token::new(TokenKind::LogicalNot, "!", location),
            '"' => {
                let data = self.scan_single_line_string(c)?;
                Token::new(TokenKind::StringLiteral, data, location)
            }
            '`' => {
                let data = self.scan_multi_line_string(c)?;
                Token::new(TokenKind::StringLiteral, data, location)
            }
            '&' if self.peek(0) == Some('&') => {
                self.advance();
                Token::new(TokenKind::LogicalAnd, "&&", location)
            }
            '|' if self.peek(0) == Some('|') => {
                self.advance();
                Token::new(TokenKind::LogicalOr, "||", location)
            }
            '/' if self.peek(0) == Some('/') => {
                self.advance();
                let data = self.scan_comment();
                Token::new(TokenKind::Comment, data, location)
            }
            _ if c.is_whitespace() => {
                let data = self.scan_whitespace(c);
                Token::new(TokenKind::Whitespace, data, location)
            }
            _ if is_first_identifier_char(c) => {
                let data = self.scan_identifier(c);
                let kind = keyword_kind(&data).unwrap_or(TokenKind::Identifier);
                Token::new(kind, data, location)
            }
            _ => return Err(ScanError::UnexpectedChar { location, ch: c }),
        };
        Ok(Some(token))
    }

    fn scan_single_line_string(&mut self, opening: char) -> Result<String, ScanError> {
        let mut data = String::from(opening);
        let mut prev = '\0';

        loop {
            let c = self.advance_or_eof()?;
            if c == '\n' {
                return Err(ScanError::UnterminatedString {
                    location: self.location(),
                });
            }
            data.push(c);
            if prev != '\\' && c == '"' {
                return Ok(data);
            }
            prev = c;
        }
    }

    fn scan_multi_line_string(&mut self, opening: char) -> Result<String, ScanError> {
        let mut data = String::from(opening);
        loop {
            let c = self.advance_or_eof()?;
            data.push(c);
            if c == '`' {
                return Ok(data);
            }
        }
    }

    fn scan_whitespace(&mut self, first: char) -> String {
        let mut data = String::from(first);
        while let Some(c) = self.peek(0) {
            if !c.is_whitespace() {
                break;
            }
            self.advance();
            data.push(c);
        }
        data
    }

    fn scan_identifier(&mut self, first: char) -> String {
        let mut data = String::from(first);
        while let Some(c) = self.peek(0) {
            if !is_following_identifier_char(c) {
                break;
            }
            self.advance();
            data.push(c);
        }
        data
    }

    fn scan_comment(&mut self) -> String {
        let mut data = String::from("//");
        while let Some(c) = self.advance() {
            if c == '\n' {
                break;
            }
            data.push(c);
        }
        data
    }
}

fn is_first_identifier_char(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_following_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}
