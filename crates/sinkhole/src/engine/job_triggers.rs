//! Per-job effective trigger sets.
//!
//! A job's `if:` guard is partially evaluated against the one free
//! variable we can reason about statically, `github.event_name`. The
//! result is the subset of the workflow's triggers that can reach the job.

use std::collections::BTreeSet;

use actions_expressions::{BinOp, Expr, UnOp};
use actions_models::common::If;

use super::triggers::{EffectiveTriggerSet, WorkflowTriggerSet};
use crate::utils::ExtractedExpr;

type Names = BTreeSet<String>;

/// What a (sub)guard tells us about the triggers that satisfy it.
#[derive(Debug, Clone, PartialEq)]
enum Reach {
    /// Exactly these triggers satisfy the guard.
    Exact(Names),
    /// At most these triggers satisfy the guard; some other part of
    /// the guard couldn't be evaluated.
    Upper(Names),
    /// Nothing is known.
    Unknown,
}

impl Reach {
    fn and(self, other: Reach) -> Reach {
        match (self, other) {
            (Reach::Exact(a), Reach::Exact(b)) => Reach::Exact(&a & &b),
            (Reach::Exact(a) | Reach::Upper(a), Reach::Exact(b) | Reach::Upper(b)) => {
                Reach::Upper(&a & &b)
            }
            // A conjunction can't be satisfied by more than either side.
            (Reach::Unknown, Reach::Exact(known) | Reach::Upper(known))
            | (Reach::Exact(known) | Reach::Upper(known), Reach::Unknown) => Reach::Upper(known),
            (Reach::Unknown, Reach::Unknown) => Reach::Unknown,
        }
    }

    fn or(self, other: Reach) -> Reach {
        match (self, other) {
            (Reach::Exact(a), Reach::Exact(b)) => Reach::Exact(&a | &b),
            (Reach::Exact(a) | Reach::Upper(a), Reach::Exact(b) | Reach::Upper(b)) => {
                Reach::Upper(&a | &b)
            }
            _ => Reach::Unknown,
        }
    }

    fn not(self, universe: &Names) -> Reach {
        match self {
            Reach::Exact(names) => Reach::Exact(universe - &names),
            // The complement of an upper bound is a lower bound, which
            // tells us nothing useful.
            Reach::Upper(_) | Reach::Unknown => Reach::Unknown,
        }
    }
}

fn is_event_name(expr: &Expr) -> bool {
    expr.as_context()
        .and_then(|ctx| ctx.as_pattern())
        .is_some_and(|p| p == "github.event_name")
}

/// Matches `github.event_name <op> 'literal'`, in either order.
fn event_name_comparison<'a>(lhs: &'a Expr, rhs: &'a Expr) -> Option<&'a str> {
    match (lhs, rhs) {
        (ctx, Expr::String(lit)) | (Expr::String(lit), ctx) if is_event_name(ctx) => Some(lit.as_str()),
        _ => None,
    }
}

/// Matches `contains(fromJSON('[...]'), github.event_name)`.
fn event_name_membership(func: &str, args: &[Expr]) -> Option<Names> {
    if !func.eq_ignore_ascii_case("contains") {
        return None;
    }

    let [Expr::Call { func, args: inner }, needle] = args else {
        return None;
    };
    if func != "fromJSON" || !is_event_name(needle) {
        return None;
    }

    let [Expr::String(json)] = inner.as_slice() else {
        return None;
    };

    match serde_json::from_str::<Vec<String>>(json) {
        Ok(names) => Some(names.iter().map(|n| n.to_ascii_lowercase()).collect()),
        Err(e) => {
            tracing::debug!("fromJSON argument isn't a list of strings: {e}");
            None
        }
    }
}

fn eval(expr: &Expr, universe: &Names) -> Reach {
    match expr {
        Expr::Boolean(true) => Reach::Exact(universe.clone()),
        Expr::Boolean(false) => Reach::Exact(Names::new()),
        Expr::BinOp { lhs, op, rhs } => match op {
            BinOp::And => eval(lhs, universe).and(eval(rhs, universe)),
            BinOp::Or => eval(lhs, universe).or(eval(rhs, universe)),
            BinOp::Eq | BinOp::Neq => match event_name_comparison(lhs, rhs) {
                Some(lit) => {
                    let lit = lit.to_ascii_lowercase();
                    let names = universe.iter().filter(|n| (**n == lit) == (*op == BinOp::Eq));
                    Reach::Exact(names.cloned().collect())
                }
                None => Reach::Unknown,
            },
            _ => Reach::Unknown,
        },
        Expr::UnOp {
            op: UnOp::Not,
            expr,
        } => eval(expr, universe).not(universe),
        Expr::Call { func, args } => match event_name_membership(func.as_str(), args) {
            Some(names) => Reach::Exact(universe & &names),
            None => Reach::Unknown,
        },
        _ => Reach::Unknown,
    }
}

/// Computes the triggers that can reach a job guarded by `guard`.
///
/// Anything the evaluator can't reduce is assumed to be satisfiable by
/// every trigger, so an unrecognized guard never hides a privileged
/// trigger. Malformed guards are treated the same way.
pub(crate) fn analyze_job_triggers<'doc>(
    triggers: &WorkflowTriggerSet<'doc>,
    guard: Option<&If>,
) -> EffectiveTriggerSet<'doc> {
    let universe = triggers.names().map(str::to_string).collect::<Names>();

    let reach = match guard {
        None => return triggers.all(),
        Some(If::Bool(true)) => Reach::Exact(universe.clone()),
        Some(If::Bool(false)) => Reach::Exact(Names::new()),
        Some(If::Expr(raw)) => match ExtractedExpr::new(raw).parse() {
            Some(expr) => eval(&expr, &universe),
            None => Reach::Unknown,
        },
    };

    match reach {
        Reach::Exact(names) | Reach::Upper(names) => triggers.restrict(|t| names.contains(t)),
        Reach::Unknown => {
            tracing::debug!("unrecognized job guard, assuming every trigger reaches the job");
            triggers.all()
        }
    }
}
