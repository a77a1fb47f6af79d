//! # Formula Parsing
//!
//! Turns a regression formula such as
//!
//! ```text
//! rt ~ scale_by(freq ~ subject) + log(dur) + cond * group + (1 + cond | subject)
//! ```
//!
//! into an explicit expression tree and an ordered list of typed [`Term`]s.
//!
//! - The parser is a plain recursive descent over a token stream. Nothing is
//!   evaluated here; function calls are kept as `Call` nodes and recognized by
//!   name afterwards.
//! - Recognized wrappers are `log(x)`, `scale_by(x ~ g)`, `poly(x, d)` and
//!   `offset(x)`, plus random-effect groups `(effects | g)`. Any other call is
//!   an opaque expression that is later resolved against a column carrying
//!   its exact text.
//! - Supported operators are `~`, `+`, `:` and `*`, and `|` inside a
//!   parenthesized random-effect term. Everything else is rejected with a
//!   [`FormulaError`].

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors raised while parsing a formula.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FormulaError {
    #[error("The formula is empty.")]
    Empty,

    #[error("The formula '{0}' has no '~' separating the response from the predictors.")]
    MissingTilde(String),

    #[error("The formula has no response on the left-hand side of '~'.")]
    MissingResponse,

    #[error("The formula has no predictors on the right-hand side of '~'.")]
    MissingPredictors,

    #[error("Unbalanced parentheses at position {0}.")]
    UnbalancedParentheses(usize),

    #[error(
        "Unsupported operator '{operator}' at position {position}. Supported operators are '~', '+', ':', '*', and '|' inside random-effect terms."
    )]
    UnsupportedOperator { operator: String, position: usize },

    #[error("Unexpected character '{character}' at position {position}.")]
    UnexpectedCharacter { character: char, position: usize },

    #[error("Unexpected {found} at position {position}; expected {expected}.")]
    UnexpectedToken {
        found: String,
        expected: &'static str,
        position: usize,
    },

    #[error("Unterminated backtick-quoted name starting at position {0}.")]
    UnterminatedName(usize),

    #[error("Invalid use of {function}(): {reason}")]
    InvalidWrapper {
        function: &'static str,
        reason: String,
    },

    #[error("Random-effect term '{term}' is not supported: {reason}")]
    InvalidRandomEffect { term: String, reason: String },

    #[error("Only one offset is allowed, but '{0}' is a second one.")]
    MultipleOffsets(String),

    #[error("The response '{0}' also appears among the predictors.")]
    ResponseAmongPredictors(String),

    #[error("The term '{term}' cannot appear here: {reason}")]
    MisplacedTerm { term: String, reason: &'static str },
}

/// Parsed formula syntax. Calls are kept as data and pattern-matched by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Variable(String),
    Literal(String),
    Call { name: String, args: Vec<Expr> },
    Formula { lhs: Box<Expr>, rhs: Box<Expr> },
    Sum(Vec<Expr>),
    Interaction(Vec<Expr>),
    Cross(Vec<Expr>),
    Random { effects: Box<Expr>, group: Box<Expr> },
    Paren(Box<Expr>),
}

impl Expr {
    /// Builds a `log(x)` call over a variable.
    pub fn log_of(name: &str) -> Expr {
        Expr::Call {
            name: "log".to_string(),
            args: vec![Expr::Variable(name.to_string())],
        }
    }

    /// Names of the variables referenced anywhere in the expression.
    pub fn variables(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_variables(&mut out);
        out
    }

    fn collect_variables<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Variable(name) => {
                if !out.contains(&name.as_str()) {
                    out.push(name);
                }
            }
            Expr::Literal(_) => {}
            Expr::Call { args, .. } => args.iter().for_each(|a| a.collect_variables(out)),
            Expr::Formula { lhs, rhs } => {
                lhs.collect_variables(out);
                rhs.collect_variables(out);
            }
            Expr::Sum(items) | Expr::Interaction(items) | Expr::Cross(items) => {
                items.iter().for_each(|i| i.collect_variables(out))
            }
            Expr::Random { effects, group } => {
                effects.collect_variables(out);
                group.collect_variables(out);
            }
            Expr::Paren(inner) => inner.collect_variables(out),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Variable(name) if is_syntactic_name(name) => write!(f, "{name}"),
            Expr::Variable(name) => write!(f, "`{name}`"),
            Expr::Literal(text) => write!(f, "{text}"),
            Expr::Call { name, args } => {
                write!(f, "{name}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ")")
            }
            Expr::Formula { lhs, rhs } => write!(f, "{lhs} ~ {rhs}"),
            Expr::Sum(items) => write_joined(f, items, " + "),
            Expr::Interaction(items) => write_joined(f, items, ":"),
            Expr::Cross(items) => write_joined(f, items, " * "),
            Expr::Random { effects, group } => write!(f, "({effects} | {group})"),
            Expr::Paren(inner) => write!(f, "({inner})"),
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, items: &[Expr], separator: &str) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, "{separator}")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

/// True when `name` can be written without backticks.
pub fn is_syntactic_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '.' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_' || c == '.')
}

/// Where a term sits in the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Response,
    Fixed,
    /// The grouping variable of a random-effect term.
    RandomGroup,
    /// A variable on the left of `|` in a random-effect term.
    RandomSlope,
    Offset,
}

/// The recognized function wrapping a term, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Wrapper {
    None,
    GroupedScale,
    Log,
    Polynomial { degree: usize },
}

/// One variable-bearing term of the formula.
#[derive(Debug, Clone, PartialEq)]
pub struct Term {
    /// Canonical text of the whole term, e.g. `scale_by(x ~ g)`.
    pub raw: String,
    pub role: Role,
    pub wrapper: Wrapper,
    /// Expression producing the values to transform: `x` or `log(x)`, or the
    /// opaque call itself.
    pub inner: Expr,
    /// The underlying column name (the raw text for opaque calls).
    pub variable: String,
    /// Grouping variables of a `scale_by` term.
    pub grouping: Option<Vec<String>>,
}

/// The result of [`parse_formula`].
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFormula {
    pub response: Expr,
    pub rhs: Expr,
    /// Terms in formula order, response first. A variable used in several
    /// places appears once per use.
    pub terms: Vec<Term>,
}

impl ParsedFormula {
    pub fn response_term(&self) -> &Term {
        &self.terms[0]
    }

    pub fn offset_term(&self) -> Option<&Term> {
        self.terms.iter().find(|t| t.role == Role::Offset)
    }
}

/// Parses `response ~ predictors` into an expression tree and typed terms.
pub fn parse_formula(text: &str) -> Result<ParsedFormula, FormulaError> {
    if text.trim().is_empty() {
        return Err(FormulaError::Empty);
    }
    let tokens = internal::tokenize(text)?;
    let mut parser = internal::Parser::new(tokens);
    let (response, rhs) = parser.parse_top(text)?;

    let mut terms = vec![internal::response_term(&response)?];
    internal::collect_rhs(&rhs, Role::Fixed, true, &mut terms)?;

    let response_variable = terms[0].variable.clone();
    if terms[1..]
        .iter()
        .any(|t| t.inner.variables().contains(&response_variable.as_str()))
    {
        return Err(FormulaError::ResponseAmongPredictors(response_variable));
    }

    let offsets: Vec<&Term> = terms.iter().filter(|t| t.role == Role::Offset).collect();
    if offsets.len() > 1 {
        return Err(FormulaError::MultipleOffsets(offsets[1].raw.clone()));
    }

    Ok(ParsedFormula {
        response,
        rhs,
        terms,
    })
}

mod internal {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    pub(super) enum TokenKind {
        Ident(String),
        Number(String),
        Tilde,
        Plus,
        Star,
        Colon,
        Bar,
        LParen,
        RParen,
        Comma,
        End,
    }

    impl TokenKind {
        fn describe(&self) -> String {
            match self {
                TokenKind::Ident(name) => format!("name '{name}'"),
                TokenKind::Number(text) => format!("number '{text}'"),
                TokenKind::Tilde => "'~'".to_string(),
                TokenKind::Plus => "'+'".to_string(),
                TokenKind::Star => "'*'".to_string(),
                TokenKind::Colon => "':'".to_string(),
                TokenKind::Bar => "'|'".to_string(),
                TokenKind::LParen => "'('".to_string(),
                TokenKind::RParen => "')'".to_string(),
                TokenKind::Comma => "','".to_string(),
                TokenKind::End => "end of formula".to_string(),
            }
        }
    }

    #[derive(Debug, Clone)]
    pub(super) struct Token {
        kind: TokenKind,
        position: usize,
    }

    pub(super) fn tokenize(text: &str) -> Result<Vec<Token>, FormulaError> {
        let chars: Vec<(usize, char)> = text.char_indices().collect();
        let mut tokens = Vec::new();
        let mut i = 0;

        while i < chars.len() {
            let (position, c) = chars[i];
            let simple = match c {
                '~' => Some(TokenKind::Tilde),
                '+' => Some(TokenKind::Plus),
                '*' => Some(TokenKind::Star),
                ':' => Some(TokenKind::Colon),
                '(' => Some(TokenKind::LParen),
                ')' => Some(TokenKind::RParen),
                ',' => Some(TokenKind::Comma),
                _ => None,
            };
            if let Some(kind) = simple {
                tokens.push(Token { kind, position });
                i += 1;
                continue;
            }

            if c.is_whitespace() {
                i += 1;
            } else if c == '|' {
                if chars.get(i + 1).is_some_and(|&(_, next)| next == '|') {
                    return Err(FormulaError::UnsupportedOperator {
                        operator: "||".to_string(),
                        position,
                    });
                }
                tokens.push(Token {
                    kind: TokenKind::Bar,
                    position,
                });
                i += 1;
            } else if matches!(c, '-' | '/' | '^' | '=' | '!' | '&' | '$' | '@' | '<' | '>') {
                return Err(FormulaError::UnsupportedOperator {
                    operator: c.to_string(),
                    position,
                });
            } else if c == '%' {
                let mut end = i + 1;
                while end < chars.len() && chars[end].1 != '%' {
                    end += 1;
                }
                let operator: String = chars[i..(end + 1).min(chars.len())]
                    .iter()
                    .map(|&(_, ch)| ch)
                    .collect();
                return Err(FormulaError::UnsupportedOperator { operator, position });
            } else if c == '`' {
                let mut end = i + 1;
                while end < chars.len() && chars[end].1 != '`' {
                    end += 1;
                }
                if end >= chars.len() {
                    return Err(FormulaError::UnterminatedName(position));
                }
                let name: String = chars[i + 1..end].iter().map(|&(_, ch)| ch).collect();
                tokens.push(Token {
                    kind: TokenKind::Ident(name),
                    position,
                });
                i = end + 1;
            } else if c.is_ascii_digit()
                || (c == '.' && chars.get(i + 1).is_some_and(|&(_, n)| n.is_ascii_digit()))
            {
                let mut end = i;
                while end < chars.len() && (chars[end].1.is_ascii_digit() || chars[end].1 == '.') {
                    end += 1;
                }
                let number: String = chars[i..end].iter().map(|&(_, ch)| ch).collect();
                tokens.push(Token {
                    kind: TokenKind::Number(number),
                    position,
                });
                i = end;
            } else if c.is_alphabetic() || c == '.' || c == '_' {
                let mut end = i;
                while end < chars.len()
                    && (chars[end].1.is_alphanumeric() || chars[end].1 == '.' || chars[end].1 == '_')
                {
                    end += 1;
                }
                let name: String = chars[i..end].iter().map(|&(_, ch)| ch).collect();
                tokens.push(Token {
                    kind: TokenKind::Ident(name),
                    position,
                });
                i = end;
            } else {
                return Err(FormulaError::UnexpectedCharacter {
                    character: c,
                    position,
                });
            }
        }

        tokens.push(Token {
            kind: TokenKind::End,
            position: text.len(),
        });
        Ok(tokens)
    }

    pub(super) struct Parser {
        tokens: Vec<Token>,
        pos: usize,
    }

    impl Parser {
        pub(super) fn new(tokens: Vec<Token>) -> Self {
            Self { tokens, pos: 0 }
        }

        fn peek(&self) -> &TokenKind {
            &self.tokens[self.pos].kind
        }

        fn position(&self) -> usize {
            self.tokens[self.pos].position
        }

        fn advance(&mut self) -> Token {
            let token = self.tokens[self.pos].clone();
            if self.pos + 1 < self.tokens.len() {
                self.pos += 1;
            }
            token
        }

        fn unexpected(&self, expected: &'static str) -> FormulaError {
            match self.peek() {
                TokenKind::RParen => FormulaError::UnbalancedParentheses(self.position()),
                other => FormulaError::UnexpectedToken {
                    found: other.describe(),
                    expected,
                    position: self.position(),
                },
            }
        }

        /// `sum '~' sum <end>`
        pub(super) fn parse_top(&mut self, text: &str) -> Result<(Expr, Expr), FormulaError> {
            if !self.tokens.iter().any(|t| t.kind == TokenKind::Tilde) {
                return Err(FormulaError::MissingTilde(text.trim().to_string()));
            }
            if *self.peek() == TokenKind::Tilde {
                return Err(FormulaError::MissingResponse);
            }
            let lhs = self.parse_sum()?;
            if *self.peek() != TokenKind::Tilde {
                return Err(self.unexpected("'~'"));
            }
            self.advance();
            if *self.peek() == TokenKind::End {
                return Err(FormulaError::MissingPredictors);
            }
            let rhs = self.parse_sum()?;
            match self.peek() {
                TokenKind::End => Ok((lhs, rhs)),
                TokenKind::Tilde => Err(FormulaError::UnsupportedOperator {
                    operator: "~".to_string(),
                    position: self.position(),
                }),
                _ => Err(self.unexpected("'+' or end of formula")),
            }
        }

        /// `product ('+' product)*`
        fn parse_sum(&mut self) -> Result<Expr, FormulaError> {
            let mut items = vec![self.parse_product()?];
            while *self.peek() == TokenKind::Plus {
                self.advance();
                items.push(self.parse_product()?);
            }
            Ok(collapse(items, Expr::Sum))
        }

        /// `interaction ('*' interaction)*`
        fn parse_product(&mut self) -> Result<Expr, FormulaError> {
            let mut items = vec![self.parse_interaction()?];
            while *self.peek() == TokenKind::Star {
                self.advance();
                items.push(self.parse_interaction()?);
            }
            Ok(collapse(items, Expr::Cross))
        }

        /// `atom (':' atom)*`
        fn parse_interaction(&mut self) -> Result<Expr, FormulaError> {
            let mut items = vec![self.parse_atom()?];
            while *self.peek() == TokenKind::Colon {
                self.advance();
                items.push(self.parse_atom()?);
            }
            Ok(collapse(items, Expr::Interaction))
        }

        fn parse_atom(&mut self) -> Result<Expr, FormulaError> {
            match self.peek().clone() {
                TokenKind::Number(text) => {
                    self.advance();
                    Ok(Expr::Literal(text))
                }
                TokenKind::Ident(name) => {
                    self.advance();
                    if *self.peek() == TokenKind::LParen {
                        let open = self.advance().position;
                        let args = self.parse_arguments(open)?;
                        Ok(Expr::Call { name, args })
                    } else {
                        Ok(Expr::Variable(name))
                    }
                }
                TokenKind::LParen => {
                    let open = self.advance().position;
                    let inner = self.parse_sum()?;
                    let expr = if *self.peek() == TokenKind::Bar {
                        self.advance();
                        let group = self.parse_sum()?;
                        Expr::Random {
                            effects: Box::new(inner),
                            group: Box::new(group),
                        }
                    } else {
                        Expr::Paren(Box::new(inner))
                    };
                    self.expect_close(open)?;
                    Ok(expr)
                }
                TokenKind::RParen => Err(FormulaError::UnbalancedParentheses(self.position())),
                _ => Err(self.unexpected("a variable, number or '('")),
            }
        }

        /// Arguments of a call; each may itself be a `lhs ~ rhs` formula.
        fn parse_arguments(&mut self, open: usize) -> Result<Vec<Expr>, FormulaError> {
            let mut args = Vec::new();
            if *self.peek() == TokenKind::RParen {
                self.advance();
                return Ok(args);
            }
            loop {
                let lhs = self.parse_sum()?;
                let arg = if *self.peek() == TokenKind::Tilde {
                    self.advance();
                    let rhs = self.parse_sum()?;
                    Expr::Formula {
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    }
                } else {
                    lhs
                };
                args.push(arg);
                if *self.peek() == TokenKind::Comma {
                    self.advance();
                } else {
                    break;
                }
            }
            self.expect_close(open)?;
            Ok(args)
        }

        fn expect_close(&mut self, open: usize) -> Result<(), FormulaError> {
            match self.peek() {
                TokenKind::RParen => {
                    self.advance();
                    Ok(())
                }
                TokenKind::End => Err(FormulaError::UnbalancedParentheses(open)),
                _ => Err(self.unexpected("')'")),
            }
        }
    }

    fn collapse(mut items: Vec<Expr>, wrap: fn(Vec<Expr>) -> Expr) -> Expr {
        if items.len() == 1 {
            items.remove(0)
        } else {
            wrap(items)
        }
    }

    fn plain_term(expr: &Expr, role: Role, wrapper: Wrapper, inner: Expr, variable: String) -> Term {
        Term {
            raw: expr.to_string(),
            role,
            wrapper,
            inner,
            variable,
            grouping: None,
        }
    }

    pub(super) fn response_term(expr: &Expr) -> Result<Term, FormulaError> {
        match expr {
            Expr::Paren(inner) => response_term(inner),
            Expr::Variable(_) | Expr::Call { .. } => {
                let term = component_term(expr, Role::Response)?;
                if matches!(term.wrapper, Wrapper::Polynomial { .. }) {
                    return Err(FormulaError::MisplacedTerm {
                        term: term.raw,
                        reason: "poly() cannot be used as the response",
                    });
                }
                Ok(term)
            }
            other => Err(FormulaError::MisplacedTerm {
                term: other.to_string(),
                reason: "the response must be a single variable or wrapped variable",
            }),
        }
    }

    /// Walks the right-hand side, emitting one term per variable use.
    pub(super) fn collect_rhs(
        expr: &Expr,
        role: Role,
        top_level: bool,
        out: &mut Vec<Term>,
    ) -> Result<(), FormulaError> {
        match expr {
            Expr::Sum(items) => {
                for item in items {
                    collect_rhs(item, role, top_level, out)?;
                }
                Ok(())
            }
            Expr::Literal(text) if text == "0" || text == "1" => Ok(()),
            Expr::Literal(text) => Err(FormulaError::MisplacedTerm {
                term: text.clone(),
                reason: "only the intercept markers 0 and 1 may appear as constants",
            }),
            Expr::Random { effects, group } => {
                if role != Role::Fixed {
                    return Err(FormulaError::InvalidRandomEffect {
                        term: expr.to_string(),
                        reason: "random-effect terms cannot be nested".to_string(),
                    });
                }
                collect_rhs(effects, Role::RandomSlope, false, out)?;
                for name in grouping_variables(group, expr)? {
                    out.push(plain_term(
                        &Expr::Variable(name.clone()),
                        Role::RandomGroup,
                        Wrapper::None,
                        Expr::Variable(name.clone()),
                        name,
                    ));
                }
                Ok(())
            }
            Expr::Interaction(items) | Expr::Cross(items) => {
                for item in items {
                    collect_rhs(item, role, false, out)?;
                }
                Ok(())
            }
            Expr::Paren(inner) => collect_rhs(inner, role, top_level, out),
            Expr::Call { name, .. } if name == "offset" => {
                if !(top_level && role == Role::Fixed) {
                    return Err(FormulaError::MisplacedTerm {
                        term: expr.to_string(),
                        reason: "offset() may only appear as a top-level fixed term",
                    });
                }
                out.push(component_term(expr, Role::Offset)?);
                Ok(())
            }
            Expr::Variable(_) | Expr::Call { .. } => {
                out.push(component_term(expr, role)?);
                Ok(())
            }
            Expr::Formula { .. } => Err(FormulaError::MisplacedTerm {
                term: expr.to_string(),
                reason: "'~' is only allowed inside scale_by()",
            }),
        }
    }

    fn grouping_variables(group: &Expr, term: &Expr) -> Result<Vec<String>, FormulaError> {
        match group {
            Expr::Variable(name) => Ok(vec![name.clone()]),
            Expr::Interaction(items) => items
                .iter()
                .map(|item| match item {
                    Expr::Variable(name) => Ok(name.clone()),
                    other => Err(FormulaError::InvalidRandomEffect {
                        term: term.to_string(),
                        reason: format!("grouping component '{other}' is not a plain variable"),
                    }),
                })
                .collect(),
            other => Err(FormulaError::InvalidRandomEffect {
                term: term.to_string(),
                reason: format!(
                    "the grouping '{other}' must be a variable or an interaction of variables"
                ),
            }),
        }
    }

    /// A single variable, wrapped variable or opaque call.
    fn component_term(expr: &Expr, role: Role) -> Result<Term, FormulaError> {
        match expr {
            Expr::Variable(name) => Ok(plain_term(
                expr,
                role,
                Wrapper::None,
                expr.clone(),
                name.clone(),
            )),
            Expr::Call { name, args } => match name.as_str() {
                "log" => {
                    let variable = single_variable_argument("log", args)?;
                    Ok(plain_term(expr, role, Wrapper::Log, expr.clone(), variable))
                }
                "offset" => {
                    let variable = single_variable_argument("offset", args)?;
                    Ok(plain_term(
                        expr,
                        role,
                        Wrapper::None,
                        args[0].clone(),
                        variable,
                    ))
                }
                "poly" => polynomial_term(expr, role, args),
                "scale_by" => grouped_scale_term(expr, role, args),
                _ => Ok(plain_term(
                    expr,
                    role,
                    Wrapper::None,
                    expr.clone(),
                    expr.to_string(),
                )),
            },
            other => Err(FormulaError::MisplacedTerm {
                term: other.to_string(),
                reason: "expected a variable or a function call",
            }),
        }
    }

    fn single_variable_argument(function: &'static str, args: &[Expr]) -> Result<String, FormulaError> {
        match args {
            [Expr::Variable(name)] => Ok(name.clone()),
            _ => Err(FormulaError::InvalidWrapper {
                function,
                reason: "expected exactly one plain variable argument".to_string(),
            }),
        }
    }

    fn polynomial_term(expr: &Expr, role: Role, args: &[Expr]) -> Result<Term, FormulaError> {
        let (variable, degree_text) = match args {
            [Expr::Variable(name), Expr::Literal(degree)] => (name.clone(), degree.clone()),
            _ => {
                return Err(FormulaError::InvalidWrapper {
                    function: "poly",
                    reason: "expected poly(variable, degree)".to_string(),
                });
            }
        };
        let degree = degree_text
            .parse::<usize>()
            .ok()
            .filter(|&d| d >= 1)
            .ok_or_else(|| FormulaError::InvalidWrapper {
                function: "poly",
                reason: format!("degree '{degree_text}' must be a positive integer"),
            })?;
        Ok(plain_term(
            expr,
            role,
            Wrapper::Polynomial { degree },
            args[0].clone(),
            variable,
        ))
    }

    fn grouped_scale_term(expr: &Expr, role: Role, args: &[Expr]) -> Result<Term, FormulaError> {
        let (lhs, rhs) = match args {
            [Expr::Formula { lhs, rhs }] => (lhs.as_ref(), rhs.as_ref()),
            _ => {
                return Err(FormulaError::InvalidWrapper {
                    function: "scale_by",
                    reason: "expected a single 'variable ~ grouping' argument".to_string(),
                });
            }
        };

        let (inner, variable) = match lhs {
            Expr::Variable(name) => (lhs.clone(), name.clone()),
            Expr::Call { name, args } if name == "log" => {
                let variable = single_variable_argument("log", args)?;
                (lhs.clone(), variable)
            }
            other => {
                return Err(FormulaError::InvalidWrapper {
                    function: "scale_by",
                    reason: format!("'{other}' must be a variable or log(variable)"),
                });
            }
        };

        let grouping = match rhs {
            Expr::Variable(name) => vec![name.clone()],
            Expr::Interaction(items) => items
                .iter()
                .map(|item| match item {
                    Expr::Variable(name) => Ok(name.clone()),
                    other => Err(FormulaError::InvalidWrapper {
                        function: "scale_by",
                        reason: format!("grouping component '{other}' is not a plain variable"),
                    }),
                })
                .collect::<Result<Vec<_>, _>>()?,
            other => {
                return Err(FormulaError::InvalidWrapper {
                    function: "scale_by",
                    reason: format!(
                        "the grouping '{other}' must be a variable or an interaction of variables"
                    ),
                });
            }
        };

        Ok(Term {
            raw: expr.to_string(),
            role,
            wrapper: Wrapper::GroupedScale,
            inner,
            variable,
            grouping: Some(grouping),
        })
    }
}
