//! Derived metrics evaluated over the scrape's metric cache
//!
//! Calculations are small arithmetic expressions referencing other metrics by
//! name, e.g. `max(0, envoy_pv_power_watts - envoy_load_power_watts)`. Each
//! expression is tokenized and parsed once at startup into an expression tree
//! (number, metric reference, unary minus, binary op, call); per scrape the
//! tree is evaluated against the cache. Resolving references against the
//! parsed identifier set means metric names that are substrings of other
//! metric names can never corrupt one another.
//!
//! NaN is the local failure value throughout: an unknown metric reference, a
//! division by zero, or a malformed expression all evaluate to NaN, which
//! suppresses that one calculated metric and nothing else.

use std::fmt::Write;

use thiserror::Error;
use tracing::warn;

use crate::config::CalculatedMetricDef;
use crate::engine::MetricCache;

/// Cache key consulted by the `pv_producing` condition
const PV_POWER_METRIC: &str = "envoy_pv_power_watts";
/// Cache key consulted by the `load_present` condition
const LOAD_POWER_METRIC: &str = "envoy_load_power_watts";
/// Cache key consulted by the `storage_present` condition
const STORAGE_POWER_METRIC: &str = "envoy_storage_power_watts";

/// Expression parse errors. These surface once at startup; a metric with an
/// unparseable calculation is kept and simply never emits.
#[derive(Error, Debug, PartialEq)]
pub enum ExprError {
    /// Unexpected character in the expression
    #[error("Unexpected character '{0}' in calculation")]
    UnexpectedChar(char),

    /// Unexpected token or end of input
    #[error("Unexpected token at position {0}")]
    UnexpectedToken(usize),

    /// Call to a function outside the fixed set
    #[error("Unknown function '{0}'")]
    UnknownFunction(String),

    /// Wrong number of arguments for a function
    #[error("Function '{name}' takes {expected} arguments, got {got}")]
    WrongArity {
        name: String,
        expected: usize,
        got: usize,
    },
}

/// The fixed function set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Func {
    Max,
    Clamp,
    Coalesce,
}

impl Func {
    fn from_name(name: &str) -> Option<(Self, usize)> {
        match name {
            "max" => Some((Func::Max, 2)),
            "clamp" => Some((Func::Clamp, 3)),
            "coalesce" => Some((Func::Coalesce, 2)),
            _ => None,
        }
    }
}

/// Binary arithmetic operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// A parsed calculation expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    MetricRef(String),
    Neg(Box<Expr>),
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call {
        func: Func,
        args: Vec<Expr>,
    },
}

impl Expr {
    /// Parse a calculation string into an expression tree.
    pub fn parse(input: &str) -> Result<Self, ExprError> {
        let tokens = tokenize(input)?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.expression()?;
        if parser.pos != parser.tokens.len() {
            return Err(ExprError::UnexpectedToken(parser.pos));
        }
        Ok(expr)
    }

    /// Evaluate against the metric cache. Any failure yields NaN.
    pub fn evaluate(&self, cache: &MetricCache) -> f64 {
        match self {
            Expr::Number(n) => *n,
            Expr::MetricRef(name) => cache.get(name).unwrap_or(f64::NAN),
            Expr::Neg(inner) => -inner.evaluate(cache),
            Expr::Binary { op, lhs, rhs } => {
                let l = lhs.evaluate(cache);
                let r = rhs.evaluate(cache);
                match op {
                    BinOp::Add => l + r,
                    BinOp::Sub => l - r,
                    BinOp::Mul => l * r,
                    // Division by a zero denominator poisons the whole
                    // calculation rather than producing infinity.
                    BinOp::Div => {
                        if r == 0.0 {
                            f64::NAN
                        } else {
                            l / r
                        }
                    }
                }
            }
            Expr::Call { func, args } => {
                let vals: Vec<f64> = args.iter().map(|a| a.evaluate(cache)).collect();
                match func {
                    Func::Max => nan_propagating(&vals, |v| v[0].max(v[1])),
                    Func::Clamp => nan_propagating(&vals, |v| v[0].max(v[2].min(v[1]))),
                    // coalesce treats NaN and exact zero as "missing"
                    Func::Coalesce => {
                        if vals[0].is_nan() || vals[0] == 0.0 {
                            vals[1]
                        } else {
                            vals[0]
                        }
                    }
                }
            }
        }
    }
}

/// Rust's `f64::max`/`min` silently drop NaN operands; these functions must
/// instead poison the result so a failed sub-expression suppresses emission.
fn nan_propagating(vals: &[f64], f: impl Fn(&[f64]) -> f64) -> f64 {
    if vals.iter().any(|v| v.is_nan()) {
        f64::NAN
    } else {
        f(vals)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
    Comma,
}

fn tokenize(input: &str) -> Result<Vec<Token>, ExprError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\n' => {
                chars.next();
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
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            '0'..='9' | '.' => {
                let mut literal = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        literal.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let number = literal
                    .parse::<f64>()
                    .map_err(|_| ExprError::UnexpectedChar('.'))?;
                tokens.push(Token::Number(number));
            }
            'a'..='z' | 'A'..='Z' | '_' => {
                let mut ident = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_alphanumeric() || d == '_' {
                        ident.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            other => return Err(ExprError::UnexpectedChar(other)),
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, wanted: Token) -> Result<(), ExprError> {
        match self.next() {
            Some(token) if token == wanted => Ok(()),
            _ => Err(ExprError::UnexpectedToken(self.pos)),
        }
    }

    // expression := term (('+'|'-') term)*
    fn expression(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => break,
            };
            self.next();
            let rhs = self.term()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    // term := factor (('*'|'/') factor)*
    fn term(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.factor()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                _ => break,
            };
            self.next();
            let rhs = self.factor()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    // factor := '-' factor | NUMBER | IDENT ['(' args ')'] | '(' expression ')'
    fn factor(&mut self) -> Result<Expr, ExprError> {
        match self.next() {
            Some(Token::Minus) => Ok(Expr::Neg(Box::new(self.factor()?))),
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::LParen) => {
                let inner = self.expression()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => {
                if self.peek() == Some(&Token::LParen) {
                    self.next();
                    let args = self.arguments()?;
                    let (func, arity) = Func::from_name(&name)
                        .ok_or_else(|| ExprError::UnknownFunction(name.clone()))?;
                    if args.len() != arity {
                        return Err(ExprError::WrongArity {
                            name,
                            expected: arity,
                            got: args.len(),
                        });
                    }
                    Ok(Expr::Call { func, args })
                } else {
                    Ok(Expr::MetricRef(name))
                }
            }
            _ => Err(ExprError::UnexpectedToken(self.pos)),
        }
    }

    fn arguments(&mut self) -> Result<Vec<Expr>, ExprError> {
        let mut args = Vec::new();
        if self.peek() == Some(&Token::RParen) {
            self.next();
            return Ok(args);
        }
        loop {
            args.push(self.expression()?);
            match self.next() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => break,
                _ => return Err(ExprError::UnexpectedToken(self.pos)),
            }
        }
        Ok(args)
    }
}

/// A calculated metric with its pre-parsed expression.
#[derive(Debug, Clone)]
pub struct CalculatedMetric {
    def: CalculatedMetricDef,
    expr: Option<Expr>,
}

/// The compiled set of calculated metrics.
#[derive(Debug, Clone, Default)]
pub struct CalculatedSet {
    metrics: Vec<CalculatedMetric>,
}

impl CalculatedSet {
    /// Compile every configured calculation, keeping unparseable ones as
    /// permanently-suppressed entries.
    pub fn from_config(defs: &[CalculatedMetricDef]) -> Self {
        let metrics = defs
            .iter()
            .map(|def| {
                let expr = match Expr::parse(&def.calculation) {
                    Ok(expr) => Some(expr),
                    Err(e) => {
                        warn!(
                            metric = %def.name,
                            calculation = %def.calculation,
                            error = %e,
                            "Unparseable calculation, metric will never emit"
                        );
                        None
                    }
                };
                CalculatedMetric {
                    def: def.clone(),
                    expr,
                }
            })
            .collect();
        Self { metrics }
    }

    /// Number of configured calculated metrics.
    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    /// True when no calculated metrics are configured.
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// Evaluate and render every calculated metric against the cache.
    ///
    /// Must run only after all query rendering for the scrape has completed,
    /// since the cache is read-only here.
    pub fn render(&self, cache: &MetricCache, out: &mut String) {
        for metric in &self.metrics {
            if !condition_met(&metric.def.condition, cache) {
                continue;
            }

            let Some(expr) = &metric.expr else {
                continue;
            };

            let value = expr.evaluate(cache);
            if value.is_nan() {
                continue;
            }

            let _ = writeln!(out, "# HELP {} {}", metric.def.name, metric.def.help);
            let _ = writeln!(out, "# TYPE {} {}", metric.def.name, metric.def.kind);
            let _ = writeln!(out, "{} {:.2}", metric.def.name, value);
        }
    }
}

/// The fixed, non-extensible condition vocabulary for calculated metrics.
/// Anything unrecognized (including the empty string) passes.
fn condition_met(condition: &str, cache: &MetricCache) -> bool {
    match condition {
        "pv_producing" => cache.get(PV_POWER_METRIC).unwrap_or(0.0) > 0.0,
        "load_present" => cache.get(LOAD_POWER_METRIC).unwrap_or(0.0) > 0.0,
        "storage_present" => cache.contains(STORAGE_POWER_METRIC),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MetricKind;

    fn cache(entries: &[(&str, f64)]) -> MetricCache {
        let mut cache = MetricCache::new();
        for (name, value) in entries {
            cache.insert(name, *value);
        }
        cache
    }

    fn calc_def(name: &str, condition: &str, calculation: &str) -> CalculatedMetricDef {
        CalculatedMetricDef {
            name: name.to_string(),
            kind: MetricKind::Gauge,
            help: "derived".to_string(),
            condition: condition.to_string(),
            calculation: calculation.to_string(),
        }
    }

    #[test]
    fn test_max_over_difference() {
        let expr = Expr::parse("max(0, envoy_pv_power_watts - envoy_load_power_watts)")
            .expect("parse failed");
        let cache = cache(&[
            ("envoy_pv_power_watts", 1000.0),
            ("envoy_load_power_watts", 800.0),
        ]);
        assert_eq!(expr.evaluate(&cache), 200.0);
    }

    #[test]
    fn test_max_clamps_negative() {
        let expr = Expr::parse("max(0, envoy_pv_power_watts - envoy_load_power_watts)")
            .expect("parse failed");
        let cache = cache(&[
            ("envoy_pv_power_watts", 500.0),
            ("envoy_load_power_watts", 800.0),
        ]);
        assert_eq!(expr.evaluate(&cache), 0.0);
    }

    #[test]
    fn test_division_by_zero_is_nan() {
        let expr = Expr::parse("envoy_pv_power_watts / envoy_zero_metric").expect("parse failed");
        let cache = cache(&[
            ("envoy_pv_power_watts", 1000.0),
            ("envoy_zero_metric", 0.0),
        ]);
        assert!(expr.evaluate(&cache).is_nan());
    }

    #[test]
    fn test_unknown_metric_is_nan() {
        let expr = Expr::parse("envoy_not_emitted * 2").expect("parse failed");
        assert!(expr.evaluate(&cache(&[])).is_nan());
    }

    #[test]
    fn test_substring_metric_names_do_not_collide() {
        // "envoy_pv_power" is a prefix of "envoy_pv_power_watts"; reference
        // resolution is by whole identifier, so each gets its own value.
        let cache = cache(&[
            ("envoy_pv_power", 7.0),
            ("envoy_pv_power_watts", 1000.0),
        ]);
        let expr = Expr::parse("envoy_pv_power_watts + envoy_pv_power").expect("parse failed");
        assert_eq!(expr.evaluate(&cache), 1007.0);
    }

    #[test]
    fn test_clamp() {
        let c = cache(&[("envoy_soc", 120.0)]);
        let expr = Expr::parse("clamp(0, 100, envoy_soc)").expect("parse failed");
        assert_eq!(expr.evaluate(&c), 100.0);

        let c = cache(&[("envoy_soc", -5.0)]);
        assert_eq!(expr.evaluate(&c), 0.0);

        let c = cache(&[("envoy_soc", 55.0)]);
        assert_eq!(expr.evaluate(&c), 55.0);
    }

    #[test]
    fn test_coalesce_zero_and_nan_take_fallback() {
        let expr = Expr::parse("coalesce(envoy_primary, envoy_fallback)").expect("parse failed");

        let c = cache(&[("envoy_primary", 0.0), ("envoy_fallback", 42.0)]);
        assert_eq!(expr.evaluate(&c), 42.0);

        let c = cache(&[("envoy_fallback", 42.0)]);
        assert_eq!(expr.evaluate(&c), 42.0);

        let c = cache(&[("envoy_primary", 7.0), ("envoy_fallback", 42.0)]);
        assert_eq!(expr.evaluate(&c), 7.0);
    }

    #[test]
    fn test_operator_precedence_and_parens() {
        let c = cache(&[]);
        assert_eq!(Expr::parse("2 + 3 * 4").unwrap().evaluate(&c), 14.0);
        assert_eq!(Expr::parse("(2 + 3) * 4").unwrap().evaluate(&c), 20.0);
        assert_eq!(Expr::parse("10 - 4 - 3").unwrap().evaluate(&c), 3.0);
        assert_eq!(Expr::parse("-3 + 5").unwrap().evaluate(&c), 2.0);
    }

    #[test]
    fn test_nested_function_calls() {
        let c = cache(&[("envoy_a", 50.0), ("envoy_b", 200.0)]);
        let expr =
            Expr::parse("clamp(0, 100, max(envoy_a, envoy_b) / 2)").expect("parse failed");
        assert_eq!(expr.evaluate(&c), 100.0);
    }

    #[test]
    fn test_parse_errors() {
        assert!(Expr::parse("").is_err());
        assert!(Expr::parse("1 +").is_err());
        assert!(Expr::parse("foo(1, 2)").is_err());
        assert!(Expr::parse("max(1)").is_err());
        assert!(Expr::parse("max(1, 2").is_err());
        assert!(Expr::parse("a @ b").is_err());
    }

    #[test]
    fn test_render_emits_two_decimals() {
        let set = CalculatedSet::from_config(&[calc_def(
            "envoy_surplus_watts",
            "",
            "max(0, envoy_pv_power_watts - envoy_load_power_watts)",
        )]);
        let cache = cache(&[
            ("envoy_pv_power_watts", 1000.0),
            ("envoy_load_power_watts", 800.0),
        ]);
        let mut out = String::new();
        set.render(&cache, &mut out);

        assert!(out.contains("# HELP envoy_surplus_watts derived\n"));
        assert!(out.contains("# TYPE envoy_surplus_watts gauge\n"));
        assert!(out.contains("envoy_surplus_watts 200.00\n"));
    }

    #[test]
    fn test_render_suppresses_nan() {
        let set = CalculatedSet::from_config(&[calc_def(
            "envoy_ratio",
            "",
            "envoy_pv_power_watts / envoy_zero_metric",
        )]);
        let cache = cache(&[
            ("envoy_pv_power_watts", 1000.0),
            ("envoy_zero_metric", 0.0),
        ]);
        let mut out = String::new();
        set.render(&cache, &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn test_render_skips_unparseable_calculation() {
        let set = CalculatedSet::from_config(&[calc_def("envoy_bad", "", "max(1,")]);
        let mut out = String::new();
        set.render(&cache(&[("envoy_pv_power_watts", 1.0)]), &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn test_conditions_over_cache() {
        let producing = cache(&[("envoy_pv_power_watts", 10.0)]);
        let idle = cache(&[("envoy_pv_power_watts", 0.0)]);

        assert!(condition_met("pv_producing", &producing));
        assert!(!condition_met("pv_producing", &idle));
        assert!(!condition_met("load_present", &producing));

        let with_storage = cache(&[("envoy_storage_power_watts", 0.0)]);
        assert!(condition_met("storage_present", &with_storage));
        assert!(!condition_met("storage_present", &idle));

        // Unknown and empty conditions pass
        assert!(condition_met("", &idle));
        assert!(condition_met("moon_is_full", &idle));
    }

    #[test]
    fn test_condition_gates_render() {
        let set = CalculatedSet::from_config(&[calc_def(
            "envoy_surplus_watts",
            "pv_producing",
            "envoy_pv_power_watts - envoy_load_power_watts",
        )]);
        let mut out = String::new();
        set.render(
            &cache(&[
                ("envoy_pv_power_watts", 0.0),
                ("envoy_load_power_watts", 100.0),
            ]),
            &mut out,
        );
        assert!(out.is_empty());
    }
}
