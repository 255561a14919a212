//! Boolean expression language over query-config aliases.
//!
//! Expressions combine alias tokens with `&&`, `||`, parentheses, and the
//! constants `true`/`false`; `&&` binds tighter than `||`. Aliases
//! evaluate through the three-valued [`Truth`] alphabet, where `NoData`
//! behaves like `Normal` so an absent alias never forces an expression
//! true.

use oxcorr_common::types::Truth;
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, thiserror::Error)]
pub enum ExprError {
    #[error("unexpected character '{0}' at offset {1}")]
    UnexpectedChar(char, usize),
    #[error("unexpected token at offset {0}")]
    UnexpectedToken(usize),
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("unbalanced parenthesis at offset {0}")]
    UnbalancedParen(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Alias(String),
    Const(bool),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

impl Expr {
    /// Evaluates against an alias-to-truth context. Aliases missing from
    /// the context read as [`Truth::NoData`].
    pub fn eval(&self, ctx: &HashMap<String, Truth>) -> bool {
        match self {
            Expr::Alias(alias) => ctx.get(alias).copied().unwrap_or(Truth::NoData).as_bool(),
            Expr::Const(value) => *value,
            Expr::And(left, right) => left.eval(ctx) && right.eval(ctx),
            Expr::Or(left, right) => left.eval(ctx) || right.eval(ctx),
        }
    }

    /// Collects every alias referenced by the expression.
    pub fn aliases(&self, out: &mut BTreeSet<String>) {
        match self {
            Expr::Alias(alias) => {
                out.insert(alias.clone());
            }
            Expr::Const(_) => {}
            Expr::And(left, right) | Expr::Or(left, right) => {
                left.aliases(out);
                right.aliases(out);
            }
        }
    }

    /// Renders the expression with aliases substituted through `names`,
    /// preserving grouping.
    pub fn render(&self, names: &HashMap<String, String>) -> String {
        match self {
            Expr::Alias(alias) => names.get(alias).cloned().unwrap_or_else(|| alias.clone()),
            Expr::Const(value) => value.to_string(),
            Expr::And(left, right) => format!(
                "{} && {}",
                render_and_operand(left, names),
                render_and_operand(right, names)
            ),
            Expr::Or(left, right) => {
                format!("{} || {}", left.render(names), right.render(names))
            }
        }
    }
}

fn render_and_operand(expr: &Expr, names: &HashMap<String, String>) -> String {
    match expr {
        Expr::Or(..) => format!("({})", expr.render(names)),
        other => other.render(names),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    AndAnd,
    OrOr,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<(Token, usize)>, ExprError> {
    let mut tokens = Vec::new();
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        match c {
            ' ' | '\t' | '\r' | '\n' => i += 1,
            '(' => {
                tokens.push((Token::LParen, i));
                i += 1;
            }
            ')' => {
                tokens.push((Token::RParen, i));
                i += 1;
            }
            '&' => {
                if bytes.get(i + 1) == Some(&b'&') {
                    tokens.push((Token::AndAnd, i));
                    i += 2;
                } else {
                    return Err(ExprError::UnexpectedChar('&', i));
                }
            }
            '|' => {
                if bytes.get(i + 1) == Some(&b'|') {
                    tokens.push((Token::OrOr, i));
                    i += 2;
                } else {
                    return Err(ExprError::UnexpectedChar('|', i));
                }
            }
            c if c.is_ascii_alphanumeric() || c == '_' => {
                let start = i;
                while i < bytes.len() {
                    let c = bytes[i] as char;
                    if c.is_ascii_alphanumeric() || c == '_' {
                        i += 1;
                    } else {
                        break;
                    }
                }
                tokens.push((Token::Ident(input[start..i].to_string()), start));
            }
            other => return Err(ExprError::UnexpectedChar(other, i)),
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map_or(0, |(_, at)| *at)
    }

    fn bump(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        self.pos += 1;
        token
    }

    // expr := term ('||' term)*
    fn expr(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.term()?;
        while self.peek() == Some(&Token::OrOr) {
            self.bump();
            let right = self.term()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    // term := factor ('&&' factor)*
    fn term(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.factor()?;
        while self.peek() == Some(&Token::AndAnd) {
            self.bump();
            let right = self.factor()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    // factor := IDENT | 'true' | 'false' | '(' expr ')'
    fn factor(&mut self) -> Result<Expr, ExprError> {
        let offset = self.offset();
        match self.bump() {
            Some(Token::Ident(name)) => {
                if name.eq_ignore_ascii_case("true") {
                    Ok(Expr::Const(true))
                } else if name.eq_ignore_ascii_case("false") {
                    Ok(Expr::Const(false))
                } else {
                    Ok(Expr::Alias(name))
                }
            }
            Some(Token::LParen) => {
                let inner = self.expr()?;
                match self.bump() {
                    Some(Token::RParen) => Ok(inner),
                    Some(_) => Err(ExprError::UnbalancedParen(offset)),
                    None => Err(ExprError::UnexpectedEnd),
                }
            }
            Some(_) => Err(ExprError::UnexpectedToken(offset)),
            None => Err(ExprError::UnexpectedEnd),
        }
    }
}

/// Compiles an expression string into its AST.
pub fn parse(input: &str) -> Result<Expr, ExprError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(ExprError::UnexpectedEnd);
    }
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.expr()?;
    if parser.pos < parser.tokens.len() {
        return Err(ExprError::UnexpectedToken(parser.offset()));
    }
    Ok(expr)
}
