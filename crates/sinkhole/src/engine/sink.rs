//! Judging whether a script position is a dangerous sink.

use std::{fmt, ops::Range};

use itertools::Itertools as _;

use super::shell::{ShellFacts, Usage};
use crate::{finding::Confidence, utils::offset_in_comment_line};

/// Commands whose arguments are parsed as options when they begin with `-`.
pub(crate) const ARGUMENT_SENSITIVE_COMMANDS: &[&str] = &[
    "git", "curl", "wget", "tar", "zip", "unzip", "npm", "npx", "yarn", "pnpm", "pip", "pip3",
    "docker", "kubectl", "helm", "aws", "gcloud", "az", "gh", "rsync", "scp", "ssh", "make",
    "python", "python3", "node", "ruby", "go", "cargo", "sed", "grep", "find", "xargs",
];

/// Why a usage is unsafe.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Reason {
    Unquoted,
    Eval,
    NestedShell,
    CommandSubstitution,
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Reason::Unquoted => "unquoted",
            Reason::Eval => "inside eval",
            Reason::NestedShell => "inside a nested shell invocation",
            Reason::CommandSubstitution => "inside command substitution",
        })
    }
}

/// A position in a script where a tainted value is used unsafely.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct UnsafeUsage {
    pub(crate) span: Range<usize>,
    pub(crate) reasons: Vec<Reason>,
}

impl UnsafeUsage {
    /// Every triggered condition, e.g. `unquoted, inside eval`.
    pub(crate) fn reason(&self) -> String {
        self.reasons.iter().join(", ")
    }

    /// Word splitting alone is usually a nuisance rather than a way in;
    /// anything that re-parses the value is.
    pub(crate) fn confidence(&self) -> Confidence {
        if self.reasons == [Reason::Unquoted] {
            Confidence::Medium
        } else {
            Confidence::High
        }
    }
}

fn reparse_reasons(usage: &Usage) -> impl Iterator<Item = Reason> {
    [
        (usage.in_eval, Reason::Eval),
        (usage.in_shell_cmd, Reason::NestedShell),
        (usage.in_cmd_subst, Reason::CommandSubstitution),
    ]
    .into_iter()
    .filter_map(|(hit, reason)| hit.then_some(reason))
}

/// Returns the reasons a variable usage is unsafe. Quoting only rules out
/// [`Reason::Unquoted`]: `eval`, nested shells and command substitutions
/// re-parse the expanded value regardless.
pub(crate) fn usage_reasons(usage: &Usage) -> Vec<Reason> {
    (!usage.quoted)
        .then_some(Reason::Unquoted)
        .into_iter()
        .chain(reparse_reasons(usage))
        .collect()
}

/// Returns every unsafe usage of `$name` at or after `from`.
pub(crate) fn unsafe_usages(facts: &ShellFacts, name: &str, from: usize) -> Vec<UnsafeUsage> {
    facts
        .find_usages(name)
        .into_iter()
        .filter(|u| u.span.start >= from)
        .filter_map(|usage| {
            let reasons = usage_reasons(&usage);
            (!reasons.is_empty()).then_some(UnsafeUsage {
                span: usage.span,
                reasons,
            })
        })
        .collect()
}

/// Returns the constructs that re-parse an expression interpolated at
/// `span`. Quoting is irrelevant here: the expression is substituted into
/// the script text before the shell ever runs.
pub(crate) fn interpolation_reasons(facts: &ShellFacts, span: &Range<usize>) -> Vec<Reason> {
    facts
        .interpolation(span)
        .map(|usage| reparse_reasons(&usage).collect())
        .unwrap_or_default()
}

/// Returns the name of the argument-sensitive command that an expression
/// interpolated at `span` lands in as a bare argument, if any.
///
/// An `--` end-of-options marker before the argument makes it safe, as does
/// the argument not starting with the expression (`refs/${{ ... }}` can't
/// begin with `-`).
pub(crate) fn argument_sink<'a>(facts: &'a ShellFacts, span: &Range<usize>) -> Option<&'a str> {
    if offset_in_comment_line(facts.script(), span.start) {
        return None;
    }

    let command = facts.command_at(span.start)?;
    if !ARGUMENT_SENSITIVE_COMMANDS.contains(&command.name) {
        return None;
    }

    command.arg_starting_at(span.start)?;
    if command.ends_options_before(span.start) {
        tracing::debug!("`--` protects {name} argument", name = command.name);
        return None;
    }

    Some(command.name)
}

#[cfg(test)]
mod tests {
    use super::{Reason, argument_sink, interpolation_reasons, unsafe_usages};
    use crate::{engine::shell::ShellFacts, finding::Confidence};

    #[test]
    fn test_unsafe_usages() {
        for (script, expected) in &[
            ("echo \"$PR_REF\"", &[][..]),
            ("git diff \"$PR_REF\"", &[][..]),
            ("echo $PR_REF", &[Reason::Unquoted][..]),
            ("eval \"$PR_REF\"", &[Reason::Eval][..]),
            ("eval $PR_REF", &[Reason::Unquoted, Reason::Eval][..]),
            ("bash -c \"echo $PR_REF\"", &[Reason::NestedShell][..]),
            ("echo \"$(echo $PR_REF)\"", &[Reason::Unquoted, Reason::CommandSubstitution][..]),
            ("echo \"$(echo \"$PR_REF\")\"", &[Reason::CommandSubstitution][..]),
            ("cat <<EOF\n$PR_REF\nEOF\n", &[][..]),
            ("X=$PR_REF", &[][..]),
        ] {
            let facts = ShellFacts::parse(script).unwrap();
            let usages = unsafe_usages(&facts, "PR_REF", 0);
            let reasons = usages
                .first()
                .map(|u| u.reasons.clone())
                .unwrap_or_default();

            assert!(usages.len() <= 1, "{script}");
            assert_eq!(reasons, *expected, "{script}");
        }
    }

    #[test]
    fn test_quoting_keeps_reparse_findings() {
        let facts = ShellFacts::parse("echo \"$V\"\neval \"$V\"\nbash -c \"$V\"").unwrap();
        let usages = unsafe_usages(&facts, "V", 0);

        assert_eq!(usages.len(), 2);
        assert_eq!(usages[0].reason(), "inside eval");
        assert_eq!(usages[1].reason(), "inside a nested shell invocation");
        assert_eq!(usages[0].confidence(), Confidence::High);
    }

    #[test]
    fn test_reason_lists_every_condition() {
        let facts = ShellFacts::parse("eval $V").unwrap();
        let usages = unsafe_usages(&facts, "V", 0);
        assert_eq!(usages[0].reason(), "unquoted, inside eval");

        let facts = ShellFacts::parse("echo $V").unwrap();
        let usages = unsafe_usages(&facts, "V", 0);
        assert_eq!(usages[0].confidence(), Confidence::Medium);
    }

    #[test]
    fn test_unsafe_usages_from() {
        let script = "echo $V\nV=safe\necho $V";
        let facts = ShellFacts::parse(script).unwrap();
        assert_eq!(unsafe_usages(&facts, "V", 0).len(), 2);
        assert_eq!(unsafe_usages(&facts, "V", script.find("V=").unwrap()).len(), 1);
    }

    #[test]
    fn test_interpolation_reasons() {
        for (script, expected) in &[
            ("echo \"${{ github.head_ref }}\"", &[][..]),
            ("eval \"${{ github.head_ref }}\"", &[Reason::Eval][..]),
            ("sh -c 'echo ${{ github.head_ref }}'", &[Reason::NestedShell][..]),
            ("echo $(echo ${{ github.head_ref }})", &[Reason::CommandSubstitution][..]),
        ] {
            let facts = ShellFacts::parse(script).unwrap();
            let start = script.find("${{").unwrap();
            let end = script.find("}}").unwrap() + 2;
            assert_eq!(interpolation_reasons(&facts, &(start..end)), *expected, "{script}");
        }
    }

    #[test]
    fn test_argument_sink() {
        for (script, expected) in &[
            ("git diff ${{ github.head_ref }}", Some("git")),
            ("git diff -- ${{ github.head_ref }}", None),
            ("git diff \"${{ github.head_ref }}\"", Some("git")),
            ("git checkout refs/${{ github.head_ref }}", None),
            ("curl -sSL ${{ github.head_ref }}", Some("curl")),
            ("sudo docker pull ${{ github.head_ref }}", Some("docker")),
            ("echo ${{ github.head_ref }}", None),
            ("# git diff ${{ github.head_ref }}", None),
            ("echo hi\n  # git diff ${{ github.head_ref }}", None),
            ("echo $(git log ${{ github.head_ref }})", Some("git")),
        ] {
            let facts = ShellFacts::parse(script).unwrap();
            let start = script.find("${{").unwrap();
            let end = script.find("}}").unwrap() + 2;
            assert_eq!(argument_sink(&facts, &(start..end)), *expected, "{script}");
        }
    }

    #[test]
    fn test_end_of_options_restores_exactly_one() {
        let with = "git diff -- ${{ github.event.pull_request.head.ref }}";
        let without = "git diff ${{ github.event.pull_request.head.ref }}";

        let count = |script: &str| {
            let facts = ShellFacts::parse(script).unwrap();
            crate::utils::extract_expressions(script)
                .into_iter()
                .filter(|(_, span)| argument_sink(&facts, span).is_some())
                .count()
        };

        assert_eq!(count(with), 0);
        assert_eq!(count(without), 1);
    }
}
