//! Expression parser
//!
//! Hand-rolled lexer and recursive-descent parser for the small
//! expression language the evaluator supports: literals, identifiers,
//! calls, indexing, member access, arithmetic, comparison, logical
//! operators and the conditional operator. Precedence follows the
//! source language the targets are written in.

use crate::eval::ast::{BinaryOp, Expr, Literal, UnaryOp};
use crate::eval::EvalError;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Literal(Literal),
    // Punctuation and operators.
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Question,
    Colon,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    EqEq,
    NotEq,
    Lt,
    Gt,
    Le,
    Ge,
    AndAnd,
    OrOr,
}

fn lex(source: &str) -> Result<Vec<Token>, EvalError> {
    let mut tokens = Vec::new();
    let mut chars = source.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '[' => {
                chars.next();
                tokens.push(Token::LBracket);
            }
            ']' => {
                chars.next();
                tokens.push(Token::RBracket);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            '.' => {
                chars.next();
                tokens.push(Token::Dot);
            }
            '?' => {
                chars.next();
                tokens.push(Token::Question);
            }
            ':' => {
                chars.next();
                tokens.push(Token::Colon);
            }
            '+' => {
                chars.next();
                tokens.push(Token::Plus);
            }
            '-' => {
                chars.next();
                tokens.push(Token::Minus);
            }
            '*' => {
                chars.next();
                tokens.push(Token::Star);
            }
            '/' => {
                chars.next();
                tokens.push(Token::Slash);
            }
            '%' => {
                chars.next();
                tokens.push(Token::Percent);
            }
            '!' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::NotEq);
                } else {
                    tokens.push(Token::Bang);
                }
            }
            '=' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::EqEq);
                } else {
                    return Err(EvalError::Parse("assignment is not supported".into()));
                }
            }
            '<' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Le);
                } else {
                    tokens.push(Token::Lt);
                }
            }
            '>' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Ge);
                } else {
                    tokens.push(Token::Gt);
                }
            }
            '&' => {
                chars.next();
                if chars.peek() == Some(&'&') {
                    chars.next();
                    tokens.push(Token::AndAnd);
                } else {
                    return Err(EvalError::Parse("bitwise & is not supported".into()));
                }
            }
            '|' => {
                chars.next();
                if chars.peek() == Some(&'|') {
                    chars.next();
                    tokens.push(Token::OrOr);
                } else {
                    return Err(EvalError::Parse("bitwise | is not supported".into()));
                }
            }
            '\'' => {
                chars.next();
                let c = chars
                    .next()
                    .ok_or_else(|| EvalError::Parse("unterminated char literal".into()))?;
                let c = if c == '\\' {
                    let escaped = chars
                        .next()
                        .ok_or_else(|| EvalError::Parse("unterminated char literal".into()))?;
                    unescape(escaped)?
                } else {
                    c
                };
                if chars.next() != Some('\'') {
                    return Err(EvalError::Parse("unterminated char literal".into()));
                }
                tokens.push(Token::Literal(Literal::Char(c)));
            }
            '"' => {
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => {
                            let escaped = chars.next().ok_or_else(|| {
                                EvalError::Parse("unterminated string literal".into())
                            })?;
                            s.push(unescape(escaped)?);
                        }
                        Some(c) => s.push(c),
                        None => {
                            return Err(EvalError::Parse(
                                "unterminated string literal".into(),
                            ))
                        }
                    }
                }
                tokens.push(Token::Literal(Literal::Str(s)));
            }
            c if c.is_ascii_digit() => {
                tokens.push(Token::Literal(lex_number(&mut chars)?));
            }
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_alphanumeric() || c == '_' || c == '$' {
                        word.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(match word.as_str() {
                    "null" => Token::Literal(Literal::Null),
                    "true" => Token::Literal(Literal::Bool(true)),
                    "false" => Token::Literal(Literal::Bool(false)),
                    _ => Token::Ident(word),
                });
            }
            other => {
                return Err(EvalError::Parse(format!("unexpected character '{other}'")));
            }
        }
    }
    Ok(tokens)
}

fn unescape(c: char) -> Result<char, EvalError> {
    match c {
        'n' => Ok('\n'),
        't' => Ok('\t'),
        'r' => Ok('\r'),
        '0' => Ok('\0'),
        '\\' => Ok('\\'),
        '\'' => Ok('\''),
        '"' => Ok('"'),
        other => Err(EvalError::Parse(format!("unknown escape '\\{other}'"))),
    }
}

fn lex_number(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
) -> Result<Literal, EvalError> {
    let mut text = String::new();
    let mut is_float = false;
    while let Some(&c) = chars.peek() {
        if c.is_ascii_digit() {
            text.push(c);
            chars.next();
        } else if c == '.' {
            // A dot only continues the number when a digit follows;
            // otherwise it is member access on a literal.
            let mut lookahead = chars.clone();
            lookahead.next();
            match lookahead.peek() {
                Some(d) if d.is_ascii_digit() => {
                    is_float = true;
                    text.push(c);
                    chars.next();
                }
                _ => break,
            }
        } else {
            break;
        }
    }

    // Type suffix.
    match chars.peek() {
        Some('l') | Some('L') => {
            chars.next();
            let v = text
                .parse::<i64>()
                .map_err(|_| EvalError::Parse(format!("bad long literal {text}")))?;
            Ok(Literal::Long(v))
        }
        Some('f') | Some('F') => {
            chars.next();
            let v = text
                .parse::<f32>()
                .map_err(|_| EvalError::Parse(format!("bad float literal {text}")))?;
            Ok(Literal::Float(v))
        }
        Some('d') | Some('D') => {
            chars.next();
            let v = text
                .parse::<f64>()
                .map_err(|_| EvalError::Parse(format!("bad double literal {text}")))?;
            Ok(Literal::Double(v))
        }
        _ if is_float => {
            let v = text
                .parse::<f64>()
                .map_err(|_| EvalError::Parse(format!("bad double literal {text}")))?;
            Ok(Literal::Double(v))
        }
        _ => match text.parse::<i32>() {
            Ok(v) => Ok(Literal::Int(v)),
            // Out of int range; widen.
            Err(_) => text
                .parse::<i64>()
                .map(Literal::Long)
                .map_err(|_| EvalError::Parse(format!("bad integer literal {text}"))),
        },
    }
}

pub fn parse(source: &str) -> Result<Expr, EvalError> {
    let tokens = lex(source)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.ternary()?;
    match parser.peek() {
        None => Ok(expr),
        Some(t) => Err(EvalError::Parse(format!("unexpected trailing {t:?}"))),
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn eat(&mut self, expected: &Token) -> Result<(), EvalError> {
        match self.advance() {
            Some(ref t) if t == expected => Ok(()),
            Some(t) => Err(EvalError::Parse(format!(
                "expected {expected:?}, found {t:?}"
            ))),
            None => Err(EvalError::Parse(format!(
                "expected {expected:?}, found end of input"
            ))),
        }
    }

    fn ternary(&mut self) -> Result<Expr, EvalError> {
        let cond = self.or()?;
        if self.peek() == Some(&Token::Question) {
            self.advance();
            let then_branch = self.ternary()?;
            self.eat(&Token::Colon)?;
            let else_branch = self.ternary()?;
            return Ok(Expr::Ternary {
                cond: Box::new(cond),
                then_branch: Box::new(then_branch),
                else_branch: Box::new(else_branch),
            });
        }
        Ok(cond)
    }

    fn or(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.and()?;
        while self.peek() == Some(&Token::OrOr) {
            self.advance();
            let rhs = self.and()?;
            lhs = binary(BinaryOp::Or, lhs, rhs);
        }
        Ok(lhs)
    }

    fn and(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.equality()?;
        while self.peek() == Some(&Token::AndAnd) {
            self.advance();
            let rhs = self.equality()?;
            lhs = binary(BinaryOp::And, lhs, rhs);
        }
        Ok(lhs)
    }

    fn equality(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.relational()?;
        loop {
            let op = match self.peek() {
                Some(Token::EqEq) => BinaryOp::Eq,
                Some(Token::NotEq) => BinaryOp::Ne,
                _ => break,
            };
            self.advance();
            let rhs = self.relational()?;
            lhs = binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn relational(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.additive()?;
        loop {
            let op = match self.peek() {
                Some(Token::Lt) => BinaryOp::Lt,
                Some(Token::Gt) => BinaryOp::Gt,
                Some(Token::Le) => BinaryOp::Le,
                Some(Token::Ge) => BinaryOp::Ge,
                _ => break,
            };
            self.advance();
            let rhs = self.additive()?;
            lhs = binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn additive(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.multiplicative()?;
            lhs = binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn multiplicative(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Rem,
                _ => break,
            };
            self.advance();
            let rhs = self.unary()?;
            lhs = binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, EvalError> {
        match self.peek() {
            Some(Token::Bang) => {
                self.advance();
                let operand = self.unary()?;
                Ok(Expr::Unary { op: UnaryOp::Not, operand: Box::new(operand) })
            }
            Some(Token::Minus) => {
                self.advance();
                let operand = self.unary()?;
                Ok(Expr::Unary { op: UnaryOp::Neg, operand: Box::new(operand) })
            }
            _ => self.postfix(),
        }
    }

    fn postfix(&mut self) -> Result<Expr, EvalError> {
        let mut expr = self.primary()?;
        loop {
            match self.peek() {
                Some(Token::LBracket) => {
                    self.advance();
                    let index = self.ternary()?;
                    self.eat(&Token::RBracket)?;
                    expr = Expr::Index { array: Box::new(expr), index: Box::new(index) };
                }
                Some(Token::Dot) => {
                    self.advance();
                    let member = self.postfix_member()?;
                    expr = Expr::Member { base: Box::new(expr), member: Box::new(member) };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    /// The thing to the right of a dot: an identifier or a call.
    fn postfix_member(&mut self) -> Result<Expr, EvalError> {
        let name = match self.advance() {
            Some(Token::Ident(name)) => name,
            other => {
                return Err(EvalError::Parse(format!(
                    "expected member name, found {other:?}"
                )))
            }
        };
        if self.peek() == Some(&Token::LParen) {
            let args = self.call_args()?;
            Ok(Expr::Call { name, args })
        } else {
            Ok(Expr::Ident(name))
        }
    }

    fn primary(&mut self) -> Result<Expr, EvalError> {
        match self.advance() {
            Some(Token::Literal(lit)) => Ok(Expr::Literal(lit)),
            Some(Token::Ident(name)) => {
                if self.peek() == Some(&Token::LParen) {
                    let args = self.call_args()?;
                    Ok(Expr::Call { name, args })
                } else {
                    Ok(Expr::Ident(name))
                }
            }
            Some(Token::LParen) => {
                let expr = self.ternary()?;
                self.eat(&Token::RParen)?;
                Ok(expr)
            }
            Some(t) => Err(EvalError::Parse(format!("unexpected {t:?}"))),
            None => Err(EvalError::Parse("unexpected end of input".into())),
        }
    }

    fn call_args(&mut self) -> Result<Vec<Expr>, EvalError> {
        self.eat(&Token::LParen)?;
        let mut args = Vec::new();
        if self.peek() == Some(&Token::RParen) {
            self.advance();
            return Ok(args);
        }
        loop {
            args.push(self.ternary()?);
            match self.advance() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => break,
                other => {
                    return Err(EvalError::Parse(format!(
                        "expected ',' or ')', found {other:?}"
                    )))
                }
            }
        }
        Ok(args)
    }
}

fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precedence_puts_multiplication_under_addition() {
        let expr = parse("1 + 2 * 3").unwrap();
        match expr {
            Expr::Binary { op: BinaryOp::Add, rhs, .. } => {
                assert!(matches!(*rhs, Expr::Binary { op: BinaryOp::Mul, .. }));
            }
            other => panic!("unexpected tree: {other:?}"),
        }
    }

    #[test]
    fn numeric_literal_suffixes() {
        assert_eq!(parse("5").unwrap(), Expr::Literal(Literal::Int(5)));
        assert_eq!(parse("5L").unwrap(), Expr::Literal(Literal::Long(5)));
        assert_eq!(parse("5f").unwrap(), Expr::Literal(Literal::Float(5.0)));
        assert_eq!(parse("5d").unwrap(), Expr::Literal(Literal::Double(5.0)));
        assert_eq!(parse("2.5").unwrap(), Expr::Literal(Literal::Double(2.5)));
        assert_eq!(
            parse("3000000000").unwrap(),
            Expr::Literal(Literal::Long(3_000_000_000))
        );
    }

    #[test]
    fn string_and_char_literals() {
        assert_eq!(
            parse("\"a\\nb\"").unwrap(),
            Expr::Literal(Literal::Str("a\nb".into()))
        );
        assert_eq!(parse("'x'").unwrap(), Expr::Literal(Literal::Char('x')));
        assert!(parse("\"open").is_err());
    }

    #[test]
    fn postfix_chain() {
        let expr = parse("list.get(0).name").unwrap();
        // Outermost node is the .name member access.
        assert!(matches!(expr, Expr::Member { .. }));
    }

    #[test]
    fn ternary_nests_rightward() {
        let expr = parse("a ? 1 : b ? 2 : 3").unwrap();
        match expr {
            Expr::Ternary { else_branch, .. } => {
                assert!(matches!(*else_branch, Expr::Ternary { .. }));
            }
            other => panic!("unexpected tree: {other:?}"),
        }
    }

    #[test]
    fn index_and_call() {
        let expr = parse("xs[i + 1]").unwrap();
        assert!(matches!(expr, Expr::Index { .. }));
        let expr = parse("max(a, b)").unwrap();
        match expr {
            Expr::Call { name, args } => {
                assert_eq!(name, "max");
                assert_eq!(args.len(), 2);
            }
            other => panic!("unexpected tree: {other:?}"),
        }
    }

    #[test]
    fn rejects_unsupported_operators() {
        assert!(parse("a = 1").is_err());
        assert!(parse("a & b").is_err());
        assert!(parse("a |").is_err());
        assert!(parse("1 +").is_err());
        assert!(parse("(1").is_err());
    }
}
