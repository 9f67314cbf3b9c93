//! Helper routines.

use std::ops::Range;

use actions_expressions::{Expr, context::Context};

/// Represents an expression that has been extracted from some surrounding
/// text, but has not been parsed yet.
///
/// Depending on the context, this may be a "bare" expression or a "fenced"
/// expression internally.
#[derive(Clone, Copy, Debug)]
pub(crate) struct ExtractedExpr<'a> {
    inner: &'a str,
    fenced: bool,
}

impl<'a> ExtractedExpr<'a> {
    /// Creates a new [`ExtractedExpr`] from the given expression,
    /// which may be either fenced or bare.
    pub(crate) fn new(expr: &'a str) -> Self {
        let trimmed = expr.trim();
        Self::from_fenced(trimmed).unwrap_or(ExtractedExpr {
            inner: trimmed,
            fenced: false,
        })
    }

    /// Creates a new [`ExtractedExpr`] from a fenced expression.
    fn from_fenced(expr: &'a str) -> Option<Self> {
        expr.strip_prefix("${{")
            .and_then(|e| e.strip_suffix("}}"))
            .map(|_| ExtractedExpr {
                inner: expr,
                fenced: true,
            })
    }

    /// Returns the extracted expression as a "bare" expression,
    /// i.e. without any fencing.
    pub(crate) fn as_bare(&self) -> &'a str {
        if self.fenced {
            self.inner
                .strip_prefix("${{")
                .and_then(|e| e.strip_suffix("}}"))
                .unwrap_or(self.inner)
        } else {
            self.inner
        }
    }

    // Returns the extracted expression exactly as it was extracted,
    // including any fencing.
    pub(crate) fn as_raw(&self) -> &'a str {
        self.inner
    }

    /// Parses the expression, logging (rather than failing) when it
    /// isn't valid.
    pub(crate) fn parse(&self) -> Option<Expr<'a>> {
        match Expr::parse(self.as_bare()) {
            Ok(expr) => Some(expr),
            Err(err) => {
                tracing::warn!("skipping unparsable expression {raw:?}: {err}", raw = self.inner);
                None
            }
        }
    }
}

/// Parse an expression from the given free-form text, starting
/// at the given offset. The returned span is absolute.
///
/// Returns `None` if no complete expression is found.
fn extract_expression(text: &str, offset: usize) -> Option<(ExtractedExpr<'_>, Range<usize>)> {
    let view = text.get(offset..)?;
    let start = view.find("${{")?;

    let bytes = view.as_bytes();
    let mut in_string = false;
    let mut end = None;

    for idx in (start + 3)..bytes.len() {
        match bytes[idx] {
            b'\'' => in_string = !in_string,
            b'}' if !in_string && bytes[idx - 1] == b'}' => {
                end = Some(idx);
                break;
            }
            _ => {}
        }
    }

    let end = end?;
    let expr = ExtractedExpr::from_fenced(view.get(start..=end)?)?;

    Some((expr, start + offset..end + offset + 1))
}

/// Extract zero or more expressions from the given free-form text.
pub(crate) fn extract_expressions(text: &str) -> Vec<(ExtractedExpr<'_>, Range<usize>)> {
    let mut exprs = vec![];
    let mut offset = 0;

    while let Some((expr, span)) = extract_expression(text, offset) {
        offset = span.end;
        exprs.push((expr, span));

        if offset >= text.len() {
            break;
        }
    }

    exprs
}

/// Normalizes an expression for equality checks: fences are dropped,
/// whitespace is removed and the rest is lowercased, so that
/// `${{ inputs.Title }}` and `${{inputs.title}}` compare equal.
pub(crate) fn normalize_expr(expr: &str) -> String {
    ExtractedExpr::new(expr)
        .as_bare()
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Derives an environment variable name for a context, for use in
/// suggested fixes: `github.event.pull_request.title` becomes
/// `GITHUB_EVENT_PULL_REQUEST_TITLE`.
///
/// Returns `None` for contexts that don't flatten into a name, such as
/// ones indexed by a computed value or containing a wildcard.
pub(crate) fn env_var_name(ctx: &Context) -> Option<String> {
    let pattern = ctx.as_pattern()?;
    if pattern.contains('*') {
        return None;
    }

    Some(
        pattern
            .chars()
            .map(|c| match c {
                '.' | '-' => '_',
                c => c.to_ascii_uppercase(),
            })
            .collect(),
    )
}

/// Returns whether the script line containing `offset` is a shell comment.
pub(crate) fn offset_in_comment_line(script: &str, offset: usize) -> bool {
    let line_start = script
        .get(..offset)
        .and_then(|before| before.rfind('\n'))
        .map_or(0, |nl| nl + 1);

    script
        .get(line_start..)
        .is_some_and(|line| line.trim_start().starts_with('#'))
}
