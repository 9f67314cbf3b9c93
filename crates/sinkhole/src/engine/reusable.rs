//! Taint crossing reusable workflow boundaries.
//!
//! On the caller's side, untrusted values flow into a reusable workflow
//! through `with:`. On the callee's side, every `inputs.<name>` is as
//! trustworthy as the least trustworthy caller, which we can't see.

use std::ops::Range;

use actions_models::common::Env;

use crate::utils::{ExtractedExpr, extract_expressions, normalize_expr};

/// A reference to `inputs.<name>` inside a `${{ ... }}` expression.
#[derive(Clone, Debug)]
pub(crate) struct InputRef<'doc> {
    /// The input context as written, e.g. `inputs.title`.
    pub(crate) input: &'doc str,
    /// The enclosing expression.
    pub(crate) expr: ExtractedExpr<'doc>,
    /// The span of the enclosing expression.
    pub(crate) span: Range<usize>,
}

/// Collects every `inputs.*` reference in `text`, wherever it appears in
/// an expression: `${{ inputs.a }}`, `${{ format('{0}', inputs.a) }}`,
/// `${{ inputs.a == 'x' && inputs.b }}` and `${{ fromJSON(inputs.a).b }}`
/// all count.
pub(crate) fn input_refs(text: &str) -> Vec<InputRef<'_>> {
    let mut refs = vec![];

    for (expr, span) in extract_expressions(text) {
        let Some(parsed) = expr.parse() else {
            continue;
        };

        let mut seen = vec![];
        for ctx in parsed.contexts() {
            let is_input = ctx
                .segment(0)
                .is_some_and(|head| head.eq_ignore_ascii_case("inputs"))
                && ctx.parts.len() > 1;

            if is_input && !seen.iter().any(|s: &&str| ctx == *s) {
                seen.push(ctx.as_str());
                refs.push(InputRef {
                    input: ctx.as_str(),
                    expr,
                    span: span.clone(),
                });
            }
        }
    }

    refs
}

/// Whether `env` binds the expression behind `input_ref`, which makes the
/// reference in the script redundant with the bound variable.
///
/// Both the whole expression and the bare input are accepted, so
/// `TITLE: ${{ inputs.title }}` covers `${{ inputs.title }}` as well as
/// `${{ format('{0}', inputs.title) }}`.
pub(crate) fn env_binds(env: &Env, input_ref: &InputRef) -> bool {
    let whole = normalize_expr(input_ref.expr.as_raw());
    let bare = normalize_expr(input_ref.input);

    env.values()
        .filter_map(|v| v.as_str())
        .map(normalize_expr)
        .any(|v| v == whole || v == bare)
}
