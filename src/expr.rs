//! Integer expressions for data-dependent lengths and extra parameters.
//!
//! An expression is compiled once into a postfix token list and evaluated on demand with
//! 32-bit wrapping arithmetic. Operands are decimal literals, named fields parsed earlier
//! (bare identifiers or dotted paths), external values (`$name`, resolved through an
//! [`ExternalValueProvider`]) and `$$`, the stream's current byte counter.
//!
//! Precedence, high to low: unary `+ - ~`; `* / %`; `+ -`; `<< >> >>>`; `&`; `^`; `|`.
//! Operators of equal precedence associate left to right.

use crate::compiler::CompiledBlock;
use crate::value::NamedValueMap;
use std::fmt;
use std::num::ParseIntError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvalError {
    #[error("empty expression")]
    Empty,
    #[error("unexpected character '{0}'")]
    UnexpectedChar(char),
    #[error("unmatched parenthesis")]
    UnmatchedParenthesis,
    #[error("operator '{0}' has no left operand")]
    MissingLeftOperand(&'static str),
    #[error("missing operator before '{0}'")]
    MissingOperator(String),
    #[error("operator '{0}' is missing an operand")]
    MissingOperand(&'static str),
    #[error("invalid integer literal '{literal}': {source}")]
    InvalidLiteral {
        literal: String,
        #[source]
        source: ParseIntError,
    },
    #[error("field '{0}' can't be used in an expression")]
    NotNumeric(String),
    #[error("value of field '{0}' is not available")]
    UnresolvedField(String),
    #[error("no value provided for external '{0}'")]
    UnknownExternal(String),
    #[error("division by zero")]
    DivisionByZero,
}

/// Supplies values for names no parsed field matches.
pub trait ExternalValueProvider: Send + Sync {
    fn provide_value(&self, name: &str, values: &NamedValueMap, block: &CompiledBlock) -> Option<i32>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Or,
    Xor,
    And,
    Shl,
    Shr,
    UShr,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Neg,
    Plus,
    Not,
}

impl Operator {
    fn precedence(self) -> u8 {
        match self {
            Operator::Or => 1,
            Operator::Xor => 2,
            Operator::And => 3,
            Operator::Shl | Operator::Shr | Operator::UShr => 4,
            Operator::Add | Operator::Sub => 5,
            Operator::Mul | Operator::Div | Operator::Rem => 6,
            Operator::Neg | Operator::Plus | Operator::Not => 7,
        }
    }

    pub fn is_unary(self) -> bool {
        matches!(self, Operator::Neg | Operator::Plus | Operator::Not)
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Operator::Or => "|",
            Operator::Xor => "^",
            Operator::And => "&",
            Operator::Shl => "<<",
            Operator::Shr => ">>",
            Operator::UShr => ">>>",
            Operator::Add | Operator::Plus => "+",
            Operator::Sub | Operator::Neg => "-",
            Operator::Mul => "*",
            Operator::Div => "/",
            Operator::Rem => "%",
            Operator::Not => "~",
        }
    }

    fn binary_from_symbol(s: &str) -> Option<Self> {
        Some(match s {
            "|" => Operator::Or,
            "^" => Operator::Xor,
            "&" => Operator::And,
            "<<" => Operator::Shl,
            ">>" => Operator::Shr,
            ">>>" => Operator::UShr,
            "+" => Operator::Add,
            "-" => Operator::Sub,
            "*" => Operator::Mul,
            "/" => Operator::Div,
            "%" => Operator::Rem,
            _ => return None,
        })
    }

    fn unary_from_symbol(s: &str) -> Option<Self> {
        Some(match s {
            "-" => Operator::Neg,
            "+" => Operator::Plus,
            "~" => Operator::Not,
            _ => return None,
        })
    }

    fn apply_unary(self, a: i32) -> i32 {
        match self {
            Operator::Neg => a.wrapping_neg(),
            Operator::Not => !a,
            _ => a,
        }
    }

    fn apply_binary(self, a: i32, b: i32) -> Result<i32, EvalError> {
        Ok(match self {
            Operator::Or => a | b,
            Operator::Xor => a ^ b,
            Operator::And => a & b,
            Operator::Shl => a.wrapping_shl(b as u32),
            Operator::Shr => a.wrapping_shr(b as u32),
            Operator::UShr => (a as u32).wrapping_shr(b as u32) as i32,
            Operator::Add => a.wrapping_add(b),
            Operator::Sub => a.wrapping_sub(b),
            Operator::Mul => a.wrapping_mul(b),
            Operator::Div if b == 0 => return Err(EvalError::DivisionByZero),
            Operator::Div => a.wrapping_div(b),
            Operator::Rem if b == 0 => return Err(EvalError::DivisionByZero),
            Operator::Rem => a.wrapping_rem(b),
            Operator::Neg | Operator::Plus | Operator::Not => self.apply_unary(b),
        })
    }
}

/// One item of the compiled postfix program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExprToken {
    Literal(i32),
    /// Named field, by bytecode offset; the path is kept for diagnostics.
    Field { offset: usize, path: String },
    External(String),
    StreamOffset,
    Operator(Operator),
}

/// Everything evaluation may look at. Evaluation never touches the stream itself.
pub struct EvalContext<'a> {
    pub stream_offset: u64,
    pub block: &'a CompiledBlock,
    pub values: &'a NamedValueMap,
    pub external: Option<&'a dyn ExternalValueProvider>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expression {
    text: String,
    tokens: Vec<ExprToken>,
    max_stack_depth: usize,
}

#[derive(Debug, Clone, PartialEq)]
enum Lexeme<'s> {
    Number(&'s str),
    Ident(&'s str),
    External(&'s str),
    StreamOffset,
    Op(&'s str),
    LParen,
    RParen,
}

fn lex(text: &str) -> Result<Vec<Lexeme<'_>>, EvalError> {
    let bytes = text.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    let ident_char = |c: u8| c.is_ascii_alphanumeric() || c == b'_' || c == b'.';
    while i < bytes.len() {
        let c = bytes[i];
        match c {
            b' ' | b'\t' | b'\r' | b'\n' => i += 1,
            b'(' => {
                out.push(Lexeme::LParen);
                i += 1;
            }
            b')' => {
                out.push(Lexeme::RParen);
                i += 1;
            }
            b'0'..=b'9' => {
                let start = i;
                while i < bytes.len() && bytes[i].is_ascii_alphanumeric() {
                    i += 1;
                }
                out.push(Lexeme::Number(&text[start..i]));
            }
            b'$' if bytes.get(i + 1) == Some(&b'$') => {
                out.push(Lexeme::StreamOffset);
                i += 2;
            }
            b'$' => {
                let start = i + 1;
                i = start;
                while i < bytes.len() && ident_char(bytes[i]) {
                    i += 1;
                }
                if i == start {
                    return Err(EvalError::UnexpectedChar('$'));
                }
                out.push(Lexeme::External(&text[start..i]));
            }
            c if c.is_ascii_alphabetic() || c == b'_' => {
                let start = i;
                while i < bytes.len() && ident_char(bytes[i]) {
                    i += 1;
                }
                out.push(Lexeme::Ident(&text[start..i]));
            }
            b'>' if text[i..].starts_with(">>>") => {
                out.push(Lexeme::Op(">>>"));
                i += 3;
            }
            b'>' if text[i..].starts_with(">>") => {
                out.push(Lexeme::Op(">>"));
                i += 2;
            }
            b'<' if text[i..].starts_with("<<") => {
                out.push(Lexeme::Op("<<"));
                i += 2;
            }
            b'+' | b'-' | b'*' | b'/' | b'%' | b'&' | b'|' | b'^' | b'~' => {
                out.push(Lexeme::Op(&text[i..i + 1]));
                i += 1;
            }
            _ => {
                let ch = text[i..].chars().next().unwrap_or('?');
                return Err(EvalError::UnexpectedChar(ch));
            }
        }
    }
    Ok(out)
}

enum Pending {
    Op(Operator),
    Paren,
}

impl Expression {
    /// Compile `text`. `resolve_field` maps an identifier to the bytecode offset and path of
    /// an already declared named field, or `None` to treat it as an external value.
    pub fn compile<F>(text: &str, resolve_field: F) -> Result<Self, EvalError>
    where
        F: Fn(&str) -> Result<Option<(usize, String)>, EvalError>,
    {
        let lexemes = lex(text)?;
        if lexemes.is_empty() {
            return Err(EvalError::Empty);
        }
        let mut output: Vec<ExprToken> = Vec::with_capacity(lexemes.len());
        let mut stack: Vec<Pending> = Vec::new();
        let mut expect_operand = true;

        for lexeme in lexemes {
            match lexeme {
                Lexeme::Number(_) | Lexeme::Ident(_) | Lexeme::External(_) | Lexeme::StreamOffset => {
                    if !expect_operand {
                        return Err(EvalError::MissingOperator(lexeme_text(&lexeme)));
                    }
                    output.push(match lexeme {
                        Lexeme::Number(s) => ExprToken::Literal(s.parse::<i32>().map_err(|e| {
                            EvalError::InvalidLiteral { literal: s.to_string(), source: e }
                        })?),
                        Lexeme::Ident(name) => {
                            let normalized = name.to_ascii_lowercase();
                            match resolve_field(&normalized)? {
                                Some((offset, path)) => ExprToken::Field { offset, path },
                                None => ExprToken::External(normalized),
                            }
                        }
                        Lexeme::External(name) => ExprToken::External(name.to_ascii_lowercase()),
                        _ => ExprToken::StreamOffset,
                    });
                    expect_operand = false;
                }
                Lexeme::LParen => {
                    if !expect_operand {
                        return Err(EvalError::MissingOperator("(".to_string()));
                    }
                    stack.push(Pending::Paren);
                }
                Lexeme::RParen => {
                    if expect_operand {
                        return Err(match stack.last() {
                            Some(Pending::Op(op)) => EvalError::MissingOperand(op.symbol()),
                            _ => EvalError::Empty,
                        });
                    }
                    loop {
                        match stack.pop() {
                            Some(Pending::Op(op)) => output.push(ExprToken::Operator(op)),
                            Some(Pending::Paren) => break,
                            None => return Err(EvalError::UnmatchedParenthesis),
                        }
                    }
                }
                Lexeme::Op(symbol) => {
                    if expect_operand {
                        let op = Operator::unary_from_symbol(symbol).ok_or_else(|| {
                            EvalError::MissingLeftOperand(
                                Operator::binary_from_symbol(symbol).map_or("?", Operator::symbol),
                            )
                        })?;
                        stack.push(Pending::Op(op));
                    } else {
                        let op = Operator::binary_from_symbol(symbol)
                            .ok_or_else(|| EvalError::MissingOperator(symbol.to_string()))?;
                        while let Some(Pending::Op(top)) = stack.last() {
                            if top.precedence() >= op.precedence() {
                                output.push(ExprToken::Operator(*top));
                                stack.pop();
                            } else {
                                break;
                            }
                        }
                        stack.push(Pending::Op(op));
                        expect_operand = true;
                    }
                }
            }
        }

        while let Some(pending) = stack.pop() {
            match pending {
                Pending::Op(op) => output.push(ExprToken::Operator(op)),
                Pending::Paren => return Err(EvalError::UnmatchedParenthesis),
            }
        }

        let max_stack_depth = stack_depth(&output);
        Ok(Expression {
            text: text.trim().to_string(),
            tokens: output,
            max_stack_depth,
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Postfix program, for re-visiting (e.g. by a code generator).
    pub fn tokens(&self) -> &[ExprToken] {
        &self.tokens
    }

    /// Deepest operand stack reached while evaluating.
    pub fn max_stack_depth(&self) -> usize {
        self.max_stack_depth
    }

    /// True if the expression reads neither fields, externals nor the stream offset.
    pub fn is_constant(&self) -> bool {
        self.tokens
            .iter()
            .all(|t| matches!(t, ExprToken::Literal(_) | ExprToken::Operator(_)))
    }

    pub fn eval(&self, ctx: &EvalContext<'_>) -> Result<i32, EvalError> {
        let mut stack: Vec<i32> = Vec::with_capacity(self.max_stack_depth);
        for token in &self.tokens {
            match token {
                ExprToken::Literal(v) => stack.push(*v),
                ExprToken::Field { offset, path } => {
                    let v = ctx
                        .values
                        .get(*offset)
                        .ok_or_else(|| EvalError::UnresolvedField(path.clone()))?;
                    stack.push(v);
                }
                ExprToken::External(name) => {
                    let v = ctx
                        .external
                        .and_then(|p| p.provide_value(name, ctx.values, ctx.block))
                        .ok_or_else(|| EvalError::UnknownExternal(name.clone()))?;
                    stack.push(v);
                }
                ExprToken::StreamOffset => stack.push(ctx.stream_offset as i32),
                ExprToken::Operator(op) if op.is_unary() => {
                    let a = stack.pop().ok_or(EvalError::MissingOperand(op.symbol()))?;
                    stack.push(op.apply_unary(a));
                }
                ExprToken::Operator(op) => {
                    let b = stack.pop().ok_or(EvalError::MissingOperand(op.symbol()))?;
                    let a = stack.pop().ok_or(EvalError::MissingOperand(op.symbol()))?;
                    stack.push(op.apply_binary(a, b)?);
                }
            }
        }
        match (stack.pop(), stack.is_empty()) {
            (Some(v), true) => Ok(v),
            _ => Err(EvalError::MissingOperand("?")),
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

fn lexeme_text(l: &Lexeme<'_>) -> String {
    match l {
        Lexeme::Number(s) | Lexeme::Ident(s) | Lexeme::Op(s) => s.to_string(),
        Lexeme::External(s) => format!("${}", s),
        Lexeme::StreamOffset => "$$".to_string(),
        Lexeme::LParen => "(".to_string(),
        Lexeme::RParen => ")".to_string(),
    }
}

fn stack_depth(tokens: &[ExprToken]) -> usize {
    let mut depth = 0usize;
    let mut max = 0usize;
    for token in tokens {
        match token {
            ExprToken::Operator(op) if op.is_unary() => {}
            ExprToken::Operator(_) => depth = depth.saturating_sub(1),
            _ => {
                depth += 1;
                max = max.max(depth);
            }
        }
    }
    max
}
