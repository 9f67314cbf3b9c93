//! Parsing for the `${{ ... }}` expression language used by
//! GitHub Actions workflows.
//!
//! The parser produces a small AST ([`Expr`]) that borrows from the
//! source text. Analyses live alongside it: [`Expr::dataflow_contexts`]
//! answers "which context values can end up in the expanded string",
//! while [`Expr::contexts`] answers "which contexts does this expression
//! touch at all".

#![forbid(unsafe_code)]
#![deny(missing_docs)]

use itertools::Itertools as _;
use pest::{
    Parser as _,
    iterators::{Pair, Pairs},
};

use self::parser::{ExprParser, Rule};

pub use crate::context::{Context, ContextPattern};

pub mod context;

// pest_derive generates undocumented items, so keep them out of the
// public surface.
mod parser {
    use pest_derive::Parser;

    /// Parser for the expression grammar.
    #[derive(Parser)]
    #[grammar = "expr.pest"]
    pub struct ExprParser;
}

/// An error produced while parsing an expression.
#[derive(Debug, thiserror::Error)]
#[error("malformed expression: {0}")]
pub struct ParseError(String);

/// A function name, e.g. `contains` in `contains(a, b)`.
///
/// Function names compare case-insensitively.
#[derive(Debug, Clone, Copy)]
pub struct Function<'src>(pub(crate) &'src str);

impl Function<'_> {
    /// The name as written in the source.
    pub fn as_str(&self) -> &str {
        self.0
    }
}

impl PartialEq for Function<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(other.0)
    }
}

impl PartialEq<str> for Function<'_> {
    fn eq(&self, other: &str) -> bool {
        self.0.eq_ignore_ascii_case(other)
    }
}

/// A single dotted component of a context, e.g. `event` in `github.event`.
///
/// Identifiers compare case-insensitively.
#[derive(Debug, Clone, Copy)]
pub struct Identifier<'src>(pub(crate) &'src str);

impl Identifier<'_> {
    /// The identifier as written in the source.
    pub fn as_str(&self) -> &str {
        self.0
    }
}

impl PartialEq for Identifier<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(other.0)
    }
}

impl PartialEq<str> for Identifier<'_> {
    fn eq(&self, other: &str) -> bool {
        self.0.eq_ignore_ascii_case(other)
    }
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    /// `&&`
    And,
    /// `||`
    Or,
    /// `==`
    Eq,
    /// `!=`
    Neq,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `<`
    Lt,
    /// `<=`
    Le,
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    /// `!`
    Not,
}

/// A parsed expression.
#[derive(Debug, PartialEq)]
pub enum Expr<'src> {
    /// A number literal.
    Number(f64),
    /// A single-quoted string literal, with `''` escapes resolved.
    String(String),
    /// `true` or `false`.
    Boolean(bool),
    /// `null`.
    Null,
    /// `*`, either as a context component or as an index.
    Star,
    /// A function call.
    Call {
        /// The called function.
        func: Function<'src>,
        /// The call's arguments, in order.
        args: Vec<Expr<'src>>,
    },
    /// One identifier component inside a [`Context`].
    Identifier(Identifier<'src>),
    /// One index component inside a [`Context`], e.g. `['foo']`.
    Index(Box<Expr<'src>>),
    /// A context reference such as `github.event.issue.title`.
    Context(Context<'src>),
    /// A binary operation.
    BinOp {
        /// Left operand.
        lhs: Box<Expr<'src>>,
        /// Operator.
        op: BinOp,
        /// Right operand.
        rhs: Box<Expr<'src>>,
    },
    /// A unary operation.
    UnOp {
        /// Operator.
        op: UnOp,
        /// Operand.
        expr: Box<Expr<'src>>,
    },
}

impl<'src> Expr<'src> {
    /// Parses a bare expression, i.e. the text between `${{` and `}}`.
    pub fn parse(source: &'src str) -> Result<Self, ParseError> {
        let mut top = ExprParser::parse(Rule::expression, source)
            .map_err(|e| ParseError(e.to_string()))?;
        let expression = next(&mut top)?;
        let mut inner = expression.into_inner();

        build(next(&mut inner)?)
    }

    /// Returns the literal string if this is a string literal.
    pub fn as_string(&self) -> Option<&str> {
        match self {
            Expr::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the context if this expression is a bare context reference.
    pub fn as_context(&self) -> Option<&Context<'src>> {
        match self {
            Expr::Context(ctx) => Some(ctx),
            _ => None,
        }
    }

    /// Returns the contexts whose values can flow into this expression's
    /// expanded result.
    ///
    /// `${{ github.head_ref }}` expands to the branch name, so the context
    /// flows. `${{ github.head_ref == 'main' }}` expands to a boolean, so it
    /// doesn't. `a && b` can only ever produce `b` (or a falsy `a`), while
    /// `a || b` can produce either operand.
    pub fn dataflow_contexts(&self) -> Vec<&Context<'src>> {
        let mut out = vec![];
        self.collect_dataflow(&mut out);
        out
    }

    fn collect_dataflow<'a>(&'a self, out: &mut Vec<&'a Context<'src>>) {
        match self {
            Expr::Call { func, args } => {
                if func == "format" || func == "join" || func == "toJSON" {
                    for arg in args {
                        arg.collect_dataflow(out);
                    }
                }
            }
            Expr::Context(ctx) => {
                out.push(ctx);
                // `fromJSON(x).foo` carries data out of `x`.
                if let Some(Expr::Call { func, args }) = ctx.parts.first()
                    && func == "fromJSON"
                {
                    for arg in args {
                        arg.collect_dataflow(out);
                    }
                }
            }
            Expr::BinOp { lhs, op, rhs } => match op {
                BinOp::And => rhs.collect_dataflow(out),
                BinOp::Or => {
                    lhs.collect_dataflow(out);
                    rhs.collect_dataflow(out);
                }
                _ => {}
            },
            _ => {}
        }
    }

    /// Returns every context referenced anywhere in this expression,
    /// including inside call arguments, operands and index expressions.
    pub fn contexts(&self) -> Vec<&Context<'src>> {
        let mut out = vec![];
        self.collect_contexts(&mut out);
        out
    }

    fn collect_contexts<'a>(&'a self, out: &mut Vec<&'a Context<'src>>) {
        match self {
            Expr::Context(ctx) => {
                out.push(ctx);
                for part in &ctx.parts {
                    part.collect_contexts(out);
                }
            }
            Expr::Call { args, .. } => args.iter().for_each(|a| a.collect_contexts(out)),
            Expr::Index(idx) => idx.collect_contexts(out),
            Expr::BinOp { lhs, rhs, .. } => {
                lhs.collect_contexts(out);
                rhs.collect_contexts(out);
            }
            Expr::UnOp { expr, .. } => expr.collect_contexts(out),
            _ => {}
        }
    }
}

fn next<'i>(pairs: &mut Pairs<'i, Rule>) -> Result<Pair<'i, Rule>, ParseError> {
    pairs
        .next()
        .ok_or_else(|| ParseError("unexpected end of parse tree".into()))
}

/// Folds a left-associative chain like `a || b || c` into nested binops.
fn fold_chain<'src>(
    mut pairs: Pairs<'src, Rule>,
    op: BinOp,
) -> Result<Expr<'src>, ParseError> {
    let first = build(next(&mut pairs)?)?;
    pairs.try_fold(first, |lhs, pair| {
        Ok(Expr::BinOp {
            lhs: lhs.into(),
            op,
            rhs: build(pair)?.into(),
        })
    })
}

/// Like [`fold_chain`], but the operator is captured between operands.
fn fold_operator_chain<'src>(mut pairs: Pairs<'src, Rule>) -> Result<Expr<'src>, ParseError> {
    let first = build(next(&mut pairs)?)?;
    let chunks = pairs.chunks(2);

    chunks.into_iter().try_fold(first, |lhs, mut chunk| {
        let (Some(op), Some(operand)) = (chunk.next(), chunk.next()) else {
            return Err(ParseError("dangling operator".into()));
        };

        let op = match op.as_str() {
            "==" => BinOp::Eq,
            "!=" => BinOp::Neq,
            ">" => BinOp::Gt,
            ">=" => BinOp::Ge,
            "<" => BinOp::Lt,
            "<=" => BinOp::Le,
            other => return Err(ParseError(format!("unknown operator {other}"))),
        };

        Ok(Expr::BinOp {
            lhs: lhs.into(),
            op,
            rhs: build(operand)?.into(),
        })
    })
}

fn build(pair: Pair<'_, Rule>) -> Result<Expr<'_>, ParseError> {
    match pair.as_rule() {
        Rule::or_expr => fold_chain(pair.into_inner(), BinOp::Or),
        Rule::and_expr => fold_chain(pair.into_inner(), BinOp::And),
        Rule::eq_expr | Rule::comp_expr => fold_operator_chain(pair.into_inner()),
        Rule::unary_expr => {
            let mut inner = pair.into_inner();
            let head = next(&mut inner)?;
            match head.as_rule() {
                Rule::unary_op => Ok(Expr::UnOp {
                    op: UnOp::Not,
                    expr: build(next(&mut inner)?)?.into(),
                }),
                _ => build(head),
            }
        }
        Rule::primary_expr => build(next(&mut pair.into_inner())?),
        Rule::number => pair
            .as_str()
            .parse()
            .map(Expr::Number)
            .map_err(|_| ParseError(format!("bad number: {}", pair.as_str()))),
        Rule::string => {
            let inner = next(&mut pair.into_inner())?;
            Ok(Expr::String(inner.as_str().replace("''", "'")))
        }
        Rule::boolean => Ok(Expr::Boolean(pair.as_str() == "true")),
        Rule::null => Ok(Expr::Null),
        Rule::star => Ok(Expr::Star),
        Rule::identifier => Ok(Expr::Identifier(Identifier(pair.as_str()))),
        Rule::index => Ok(Expr::Index(build(next(&mut pair.into_inner())?)?.into())),
        Rule::function_call => {
            let mut inner = pair.into_inner();
            let name = next(&mut inner)?;
            let args = inner.map(build).collect::<Result<_, _>>()?;

            Ok(Expr::Call {
                func: Function(name.as_str()),
                args,
            })
        }
        Rule::context => {
            let raw = pair.as_str();
            let mut parts = pair
                .into_inner()
                .map(build)
                .collect::<Result<Vec<_>, _>>()?;

            // A lone call is parsed through `context`; unwrap it.
            if parts.len() == 1 && matches!(parts[0], Expr::Call { .. }) {
                Ok(parts.remove(0))
            } else {
                Ok(Expr::Context(Context::new(raw, parts)))
            }
        }
        rule => Err(ParseError(format!("unexpected rule: {rule:?}"))),
    }
}
