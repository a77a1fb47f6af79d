//! Identifiers for computed columns and the rewritten formula.
//!
//! Every transformed variable gets a plain identifier derived from the text of
//! the expression it came from (`log(dur)` becomes `log_dur`). The formula is
//! then re-rendered from its expression tree with each term replaced by that
//! identifier, so it can be handed to a fitting routine together with the
//! standardized table.

use crate::formula::{Expr, ParsedFormula};
use ahash::{AHashMap, AHashSet};

/// Turns arbitrary expression text into an identifier.
///
/// Each run of characters outside `[A-Za-z0-9_]` becomes a single `_`,
/// leading and trailing underscores are trimmed, and an `x` is prefixed when
/// the result is empty or starts with a digit.
pub fn sanitize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_run = false;
    for c in text.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            out.push(c);
            in_run = false;
        } else if !in_run {
            out.push('_');
            in_run = true;
        }
    }
    let trimmed = out.trim_matches('_');
    match trimmed.chars().next() {
        None => "x".to_string(),
        Some(c) if c.is_ascii_digit() => format!("x{trimmed}"),
        Some(_) => trimmed.to_string(),
    }
}

/// Hands out unique identifiers. The first claimant of a name keeps it bare;
/// later ones get `_1`, `_2`, ...
#[derive(Debug, Default)]
pub struct NameRegistry {
    taken: AHashSet<String>,
}

impl NameRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn claim(&mut self, text: &str) -> String {
        let base = sanitize(text);
        let mut candidate = base.clone();
        let mut suffix = 1;
        while self.taken.contains(&candidate) {
            candidate = format!("{base}_{suffix}");
            suffix += 1;
        }
        self.taken.insert(candidate.clone());
        candidate
    }
}

/// Renders the formula with every replaced term swapped for its rendering.
///
/// `replacements` maps the canonical text of a term (as in
/// [`crate::formula::Term::raw`]) to the text that should stand in its place.
/// Terms without a replacement are kept as written, as are intercept markers,
/// interaction structure and random-effect bars.
pub fn rewrite_formula(parsed: &ParsedFormula, replacements: &AHashMap<String, String>) -> String {
    let response = substitute(&parsed.response, replacements);
    let rhs = substitute(&parsed.rhs, replacements);
    format!("{response} ~ {rhs}")
}

fn substitute(expr: &Expr, replacements: &AHashMap<String, String>) -> Expr {
    if matches!(expr, Expr::Variable(_) | Expr::Call { .. }) {
        if let Some(text) = replacements.get(&expr.to_string()) {
            return Expr::Literal(text.clone());
        }
    }
    let all = |items: &[Expr]| -> Vec<Expr> { items.iter().map(|e| substitute(e, replacements)).collect() };
    match expr {
        Expr::Variable(_) | Expr::Literal(_) | Expr::Call { .. } | Expr::Formula { .. } => expr.clone(),
        Expr::Sum(items) => Expr::Sum(all(items)),
        Expr::Interaction(items) => Expr::Interaction(all(items)),
        Expr::Cross(items) => Expr::Cross(all(items)),
        Expr::Random { effects, group } => Expr::Random {
            effects: Box::new(substitute(effects, replacements)),
            group: Box::new(substitute(group, replacements)),
        },
        Expr::Paren(inner) => Expr::Paren(Box::new(substitute(inner, replacements))),
    }
}
