//! Split script text into field and structure tokens using PEST.

use crate::codec::Endianness;
use crate::compiler::CompileError;
use pest::error::InputLocation;
use pest::Parser;
use pest_derive::Parser as PestParser;

#[derive(PestParser)]
#[grammar = "grammar.pest"]
struct ScriptParser;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Field,
    StructStart,
    StructEnd,
}

/// One statement of the script, with the raw text of each part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    /// Byte offset of the statement in the source.
    pub position: usize,
    pub byte_order: Option<Endianness>,
    pub type_name: Option<String>,
    /// Text after `:`; parenthesised for expressions.
    pub extra: Option<String>,
    /// Trimmed text between `[` and `]`.
    pub array: Option<String>,
    pub name: Option<String>,
}

impl Token {
    fn new(kind: TokenKind, position: usize) -> Self {
        Token {
            kind,
            position,
            byte_order: None,
            type_name: None,
            extra: None,
            array: None,
            name: None,
        }
    }
}

pub fn tokenize(source: &str) -> Result<Vec<Token>, CompileError> {
    let mut pairs = ScriptParser::parse(Rule::script, source).map_err(syntax_error)?;
    let script = pairs.next().ok_or(CompileError::Syntax {
        position: 0,
        message: "empty parse".to_string(),
    })?;
    let mut tokens = Vec::new();
    for pair in script.into_inner() {
        let kind = match pair.as_rule() {
            Rule::struct_end => TokenKind::StructEnd,
            Rule::struct_start => TokenKind::StructStart,
            Rule::field => TokenKind::Field,
            _ => continue,
        };
        tokens.push(build_token(pair, kind));
    }
    Ok(tokens)
}

fn build_token(pair: pest::iterators::Pair<Rule>, kind: TokenKind) -> Token {
    let mut token = Token::new(kind, pair.as_span().start());
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::byte_order => {
                token.byte_order = Some(if inner.as_str() == "<" {
                    Endianness::Little
                } else {
                    Endianness::Big
                });
            }
            Rule::type_name => token.type_name = Some(inner.as_str().to_string()),
            Rule::extra => token.extra = inner.into_inner().next().map(|p| p.as_str().to_string()),
            Rule::array_spec => {
                token.array = inner.into_inner().next().map(|p| p.as_str().trim().to_string())
            }
            Rule::name => token.name = Some(inner.as_str().to_string()),
            _ => {}
        }
    }
    token
}

fn syntax_error(e: pest::error::Error<Rule>) -> CompileError {
    let position = match e.location {
        InputLocation::Pos(p) => p,
        InputLocation::Span((start, _)) => start,
    };
    CompileError::Syntax {
        position,
        message: e.variant.message().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_parts() {
        let t = tokenize("<bit:3 [n*2] flags;").unwrap();
        assert_eq!(t.len(), 1);
        assert_eq!(t[0].kind, TokenKind::Field);
        assert_eq!(t[0].byte_order, Some(Endianness::Little));
        assert_eq!(t[0].type_name.as_deref(), Some("bit"));
        assert_eq!(t[0].extra.as_deref(), Some("3"));
        assert_eq!(t[0].array.as_deref(), Some("n*2"));
        assert_eq!(t[0].name.as_deref(), Some("flags"));
    }

    #[test]
    fn structs_and_comments() {
        let src = "// header\nhdr { ubyte n; } // trailing\nitems [hdr.n] {\n byte v;\n}\n";
        let kinds: Vec<TokenKind> = tokenize(src).unwrap().iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::StructStart,
                TokenKind::Field,
                TokenKind::StructEnd,
                TokenKind::StructStart,
                TokenKind::Field,
                TokenKind::StructEnd,
            ]
        );
    }

    #[test]
    fn anonymous_items() {
        let t = tokenize("int; { byte; } skip:(a+1);").unwrap();
        assert_eq!(t[0].name, None);
        assert_eq!(t[1].kind, TokenKind::StructStart);
        assert_eq!(t[1].name, None);
        assert_eq!(t[4].extra.as_deref(), Some("(a+1)"));
    }

    #[test]
    fn missing_terminator_is_syntax_error() {
        assert!(matches!(tokenize("int a"), Err(CompileError::Syntax { .. })));
    }
}
