use serde::{Deserialize, Serialize};
use std::fmt;

/// Position of a token or node in the original `.mtc` file.
///
/// `file_offset` counts characters from the start of the file and is unique
/// per syntactic occurrence within a unit; downstream ordering relies on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file_name: String,
    pub short_file_name: String,
    pub file_offset: i64,
    pub line_number: u32,
    pub column_number: u32,
}

impl SourceLocation {
    /// Location of the synthetic default-fallthrough return point.
    pub fn dummy() -> Self {
        Self {
            file_name: String::new(),
            short_file_name: String::new(),
            file_offset: -1,
            line_number: 0,
            column_number: 0,
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.short_file_name, self.line_number, self.column_number
        )
    }
}

/// Token types for the matcha DSL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenKind {
    Whitespace,
    Comment, // //...
    OpenParen,
    CloseParen,
    OpenBrace,
    CloseBrace,
    Plus,
    Comma,
    Colon,
    LogicalNot, // !
    LogicalAnd, // &&
    LogicalOr,  // ||
    StringLiteral,

    ComponentKw,
    ImportKw,
    BundleKw,
    UnitKw,
    ReturnKw,
    GotoKw,
    TransformKw,
    AsKw,
    SwitchKw,
    GetKw,
    CaseKw,
    DefaultKw,
    IfKw,
    ElseKw,
    TrueKw,
    FalseKw,
    TestKw,

    Identifier,

    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TokenKind::Whitespace => "<whitespace>",
            TokenKind::Comment => "<comment>",
            TokenKind::OpenParen => "`(`",
            TokenKind::CloseParen => "`)`",
            TokenKind::OpenBrace => "`{`",
            TokenKind::CloseBrace => "`}`",
            TokenKind::Plus => "`+`",
            TokenKind::Comma => "`,`",
            TokenKind::Colon => "`:`",
            TokenKind::LogicalNot => "`!`",
            TokenKind::LogicalAnd => "`&&`",
            TokenKind::LogicalOr => "`||`",
            TokenKind::StringLiteral => "<string>",
            TokenKind::ComponentKw => "`component`",
            TokenKind::ImportKw => "`import`",
            TokenKind::BundleKw => "`bundle`",
            TokenKind::UnitKw => "`unit`",
            TokenKind::ReturnKw => "`return`",
            TokenKind::GotoKw => "`goto`",
            TokenKind::TransformKw => "`transform`",
            TokenKind::AsKw => "`as`",
            TokenKind::SwitchKw => "`switch`",
            TokenKind::GetKw => "`get`",
            TokenKind::CaseKw => "`case`",
            TokenKind::DefaultKw => "`default`",
            TokenKind::IfKw => "`if`",
            TokenKind::ElseKw => "`else`",
            TokenKind::TrueKw => "`true`",
            TokenKind::FalseKw => "`false`",
            TokenKind::TestKw => "`test`",
            TokenKind::Identifier => "<identifier>",
            TokenKind::Eof => "<end of file>",
        };
        f.write_str(s)
    }
}

pub fn keyword_kind(word: &str) -> Option<TokenKind> {
    let kind = match word {
        "component" => TokenKind::ComponentKw,
        "import" => TokenKind::ImportKw,
        "bundle" => TokenKind::BundleKw,
        "unit" => TokenKind::UnitKw,
        "return" => TokenKind::ReturnKw,
        "goto" => TokenKind::GotoKw,
        "transform" => TokenKind::TransformKw,
        "as" => TokenKind::AsKw,
        "switch" => TokenKind::SwitchKw,
        "get" => TokenKind::GetKw,
        "case" => TokenKind::CaseKw,
        "default" => TokenKind::DefaultKw,
        "if" => TokenKind::IfKw,
        "else" => TokenKind::ElseKw,
        "true" => TokenKind::TrueKw,
        "false" => TokenKind::FalseKw,
        "test" => TokenKind::TestKw,
        _ => return None,
    };
    Some(kind)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub kind: TokenKind,
    /// Raw text of the token; string literals keep their quotes.
    pub data: String,
    pub source_location: SourceLocation,
}

impl Token {
    pub fn new(kind: TokenKind, data: impl Into<String>, source_location: SourceLocation) -> Self {
        Self {
            kind,
            data: data.into(),
            source_location,
        }
    }

    /// Placeholder token returned when looking past the end of input.
    pub fn eof(source_location: SourceLocation) -> Self {
        Self::new(TokenKind::Eof, "", source_location)
    }
}
