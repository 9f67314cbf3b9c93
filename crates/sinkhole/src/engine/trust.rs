//! Classification of context references as attacker-controlled.

use actions_expressions::{
    Expr,
    context::{Context, ContextPattern},
};

/// Context paths whose values an outside contributor can set.
///
/// Wildcards match exactly one component, so
/// `github.event.commits.*.message` also covers
/// `github.event.commits[0].message`. Anything nested beneath a listed
/// path is untrusted too.
const UNTRUSTED_PATTERNS: &[&str] = &[
    "github.head_ref",
    "github.event.issue.title",
    "github.event.issue.body",
    "github.event.pull_request.title",
    "github.event.pull_request.body",
    "github.event.pull_request.head.ref",
    "github.event.pull_request.head.label",
    "github.event.pull_request.head.repo.default_branch",
    "github.event.pull_request.head.repo.description",
    "github.event.pull_request.head.repo.homepage",
    "github.event.comment.body",
    "github.event.review.body",
    "github.event.review_comment.body",
    "github.event.discussion.title",
    "github.event.discussion.body",
    "github.event.pages.*.page_name",
    "github.event.commits.*.message",
    "github.event.commits.*.author.email",
    "github.event.commits.*.author.name",
    "github.event.head_commit.message",
    "github.event.head_commit.author.email",
    "github.event.head_commit.author.name",
    "github.event.head_commit.committer.email",
    "github.event.head_commit.committer.name",
    "github.event.workflow_run.head_branch",
    "github.event.workflow_run.display_title",
    "github.event.workflow_run.head_commit.message",
    "github.event.workflow_run.head_commit.author.email",
    "github.event.workflow_run.head_commit.author.name",
    "github.event.workflow_run.head_repository.description",
    "github.event.workflow_run.pull_requests.*.head.ref",
];

/// Returns whether `ctx` may expand to attacker-controlled data.
pub(crate) fn is_untrusted(ctx: &Context) -> bool {
    if UNTRUSTED_PATTERNS
        .iter()
        .filter_map(|p| ContextPattern::new(p))
        .any(|p| p.parent_of(ctx))
    {
        return true;
    }

    let in_event_payload = ctx.segment(0).is_some_and(|s| s.eq_ignore_ascii_case("github"))
        && ctx.segment(1).is_some_and(|s| s.eq_ignore_ascii_case("event"));

    match ctx.as_pattern() {
        // An object that contains untrusted fields, e.g. `toJSON(github.event.pull_request)`.
        Some(pattern) => {
            in_event_payload
                && UNTRUSTED_PATTERNS.iter().any(|p| {
                    p.strip_prefix(pattern.as_str())
                        .is_some_and(|rest| rest.starts_with('.'))
                })
        }
        // A computed index into the event payload could select anything.
        None => in_event_payload,
    }
}

/// Returns the untrusted paths whose values can flow into `expr`'s
/// expansion, as written.
pub(crate) fn untrusted_paths<'src>(expr: &Expr<'src>) -> Vec<&'src str> {
    expr.dataflow_contexts()
        .into_iter()
        .filter(|ctx| is_untrusted(ctx))
        .map(|ctx| ctx.as_str())
        .collect()
}

#[cfg(test)]
mod tests {
    use actions_expressions::Expr;

    use super::{is_untrusted, untrusted_paths};

    #[test]
    fn test_is_untrusted() {
        for (ctx, expected) in &[
            ("github.event.pull_request.title", true),
            ("github.event.pull_request.head.ref", true),
            ("github.event.pull_request.head.ref.foo", true),
            ("GITHUB.EVENT.PULL_REQUEST.TITLE", true),
            ("github.event['pull_request']['title']", true),
            ("github.event.commits[0].message", true),
            ("github.event.commits.*.author.name", true),
            ("github.head_ref", true),
            ("github.event.pull_request", true),
            ("github.event", true),
            ("github.event.pages[inputs.idx].page_name", true),
            ("github.sha", false),
            ("github.ref", false),
            ("github.repository", false),
            ("github.event_name", false),
            ("github.event.pull_request.number", false),
            ("github.event.pull_request.head.sha", false),
            ("github.event.issue.number", false),
            ("inputs.title", false),
            ("steps.meta.outputs.tag", false),
            ("env.TITLE", false),
            ("secrets.GITHUB_TOKEN", false),
        ] {
            let expr = Expr::parse(ctx).unwrap();
            let ctx_ref = expr.as_context().unwrap();
            assert_eq!(is_untrusted(ctx_ref), *expected, "{ctx}");
        }
    }

    #[test]
    fn test_untrusted_paths() {
        for (expr, expected) in &[
            ("github.event.issue.title", &["github.event.issue.title"][..]),
            (
                "format('{0} {1}', github.event.issue.title, github.sha)",
                &["github.event.issue.title"][..],
            ),
            (
                "github.event.issue.body || github.head_ref",
                &["github.event.issue.body", "github.head_ref"][..],
            ),
            ("toJSON(github.event.pull_request)", &["github.event.pull_request"][..]),
            // Comparisons expand to booleans.
            ("github.event.issue.title == 'x'", &[][..]),
            ("contains(github.event.issue.body, 'x')", &[][..]),
            ("github.sha", &[][..]),
        ] {
            let parsed = Expr::parse(expr).unwrap();
            assert_eq!(untrusted_paths(&parsed), *expected, "{expr}");
        }
    }
}
