//! Taint tables for values persisted across steps and jobs.
//!
//! A step taints one of its outputs by writing attacker-controlled data
//! to `$GITHUB_OUTPUT`; later steps in the same job then read it back as
//! `steps.<id>.outputs.<name>`. Jobs re-export step outputs through their
//! `outputs:` block, which dependent jobs read as `needs.<job>.outputs.<name>`.
//!
//! Both tables are append-only for the duration of a workflow visit, and
//! absence from a table means "not tainted".

use std::{
    collections::{BTreeMap, BTreeSet},
    ops::Range,
    sync::LazyLock,
};

use regex::Regex;

use super::shell::{EmittedLine, EnvFile};
use crate::{finding::location::SymbolicLocation, utils::ExtractedExpr};

/// The untrusted context paths a value was derived from.
pub(crate) type Sources = BTreeSet<String>;

static DIRECT_WRITE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z_][A-Za-z0-9_.-]*)=(.*)$").unwrap());

static HEREDOC_WRITE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z_][A-Za-z0-9_.-]*)<<\s*(\S+)\s*$").unwrap());

/// A variable whose value is derived from untrusted data.
#[derive(Clone, Debug)]
pub(crate) struct TaintedVariable<'doc> {
    pub(crate) name: String,
    pub(crate) sources: Sources,
    /// Where the variable is bound, for variables bound in YAML.
    pub(crate) location: Option<SymbolicLocation<'doc>>,
}

/// How a value is written to an environment file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum WriteForm {
    /// `name=value`. A value containing a newline can smuggle in extra
    /// `name=value` lines.
    Direct,
    /// `name<<DELIM`, the body, then `DELIM`.
    Heredoc,
}

/// A single `name` written to an environment file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct EnvFileWrite {
    pub(crate) file: EnvFile,
    pub(crate) name: String,
    pub(crate) form: WriteForm,
    /// The script span the written value comes from.
    pub(crate) span: Range<usize>,
}

/// Reassembles the lines a script emits into the writes GitHub will read
/// back out of each environment file.
pub(crate) fn env_file_writes(lines: &[EmittedLine]) -> Vec<EnvFileWrite> {
    let mut writes = vec![];

    for file in [EnvFile::Output, EnvFile::Env] {
        let mut heredoc: Option<(String, String, Option<Range<usize>>)> = None;

        for line in lines.iter().filter(|l| l.file == file) {
            let text = line.text.trim_end();

            if let Some((name, delim, body)) = heredoc.as_mut() {
                if text.trim() == delim.as_str() {
                    writes.push(EnvFileWrite {
                        file,
                        name: std::mem::take(name),
                        form: WriteForm::Heredoc,
                        span: body.take().unwrap_or(line.span.start..line.span.start),
                    });
                    heredoc = None;
                } else {
                    let span = match body.take() {
                        Some(body) => body.start..line.span.end,
                        None => line.span.clone(),
                    };
                    *body = Some(span);
                }
                continue;
            }

            if let Some(caps) = HEREDOC_WRITE.captures(text) {
                heredoc = Some((caps[1].into(), caps[2].into(), None));
            } else if let Some(caps) = DIRECT_WRITE.captures(text) {
                if caps[2].is_empty() {
                    continue;
                }

                writes.push(EnvFileWrite {
                    file,
                    name: caps[1].into(),
                    form: WriteForm::Direct,
                    span: line.span.clone(),
                });
            }
        }

        // An unterminated heredoc is an error at runtime; its body still
        // reaches the file, so count it.
        if let Some((name, _, Some(body))) = heredoc {
            writes.push(EnvFileWrite {
                file,
                name,
                form: WriteForm::Heredoc,
                span: body,
            });
        }
    }

    writes.sort_by_key(|w| w.span.start);
    writes
}

/// `job -> step id -> output name -> sources`.
///
/// Step IDs are only unique within a job, so lookups are always scoped to
/// one. Keys are stored lowercased, matching GitHub's case-insensitive
/// context lookups.
#[derive(Debug, Default)]
pub(crate) struct StepOutputTaint {
    pub(super) table: BTreeMap<String, BTreeMap<String, BTreeMap<String, Sources>>>,
}

impl StepOutputTaint {
    /// Records a tainted output. Recording the same output twice unions
    /// the sources.
    pub(crate) fn record(&mut self, job: &str, step: &str, output: &str, sources: Sources) {
        if sources.is_empty() {
            return;
        }

        self.table
            .entry(job.to_ascii_lowercase())
            .or_default()
            .entry(step.to_ascii_lowercase())
            .or_default()
            .entry(output.to_ascii_lowercase())
            .or_default()
            .extend(sources);
    }

    pub(crate) fn lookup(&self, job: &str, step: &str, output: &str) -> Option<&Sources> {
        self.table
            .get(&job.to_ascii_lowercase())?
            .get(&step.to_ascii_lowercase())?
            .get(&output.to_ascii_lowercase())
    }

    /// Resolves a `steps.<id>.outputs.<name>` expression against the
    /// outputs recorded so far in `job`.
    ///
    /// Anything else, including `github.*` contexts, is never tainted as
    /// far as this table is concerned.
    pub(crate) fn is_tainted_expr(&self, job: &str, expr: &str) -> Option<&Sources> {
        let expr = ExtractedExpr::new(expr).parse()?;
        let ctx = expr.as_context()?;

        if ctx.parts.len() != 4
            || !ctx.segment(0)?.eq_ignore_ascii_case("steps")
            || !ctx.segment(2)?.eq_ignore_ascii_case("outputs")
        {
            return None;
        }

        self.lookup(job, ctx.segment(1)?, ctx.segment(3)?)
    }
}

/// `job -> output name -> sources`, for `needs.<job>.outputs.<name>`.
#[derive(Debug, Default)]
pub(crate) struct JobOutputTaint {
    table: BTreeMap<String, BTreeMap<String, Sources>>,
}

impl JobOutputTaint {
    pub(crate) fn record(&mut self, job: &str, output: &str, sources: Sources) {
        if sources.is_empty() {
            return;
        }

        self.table
            .entry(job.to_ascii_lowercase())
            .or_default()
            .entry(output.to_ascii_lowercase())
            .or_default()
            .extend(sources);
    }

    pub(crate) fn lookup(&self, job: &str, output: &str) -> Option<&Sources> {
        self.table
            .get(&job.to_ascii_lowercase())?
            .get(&output.to_ascii_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::{EnvFileWrite, JobOutputTaint, Sources, StepOutputTaint, WriteForm, env_file_writes};
    use crate::engine::shell::{EnvFile, ShellFacts};

    fn sources(paths: &[&str]) -> Sources {
        paths.iter().map(|p| p.to_string()).collect()
    }

    fn writes(script: &str) -> Vec<EnvFileWrite> {
        let facts = ShellFacts::parse(script).unwrap();
        env_file_writes(&facts.emitted_lines())
    }

    #[test]
    fn test_env_file_writes_direct() {
        let script = "echo \"title=${{ github.event.issue.title }}\" >> \"$GITHUB_OUTPUT\"\necho \"EMPTY=\" >> $GITHUB_ENV";
        let writes = writes(script);

        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].name, "title");
        assert_eq!(writes[0].form, WriteForm::Direct);
        assert_eq!(writes[0].file, EnvFile::Output);
        assert!(script[writes[0].span.clone()].contains("${{ github.event.issue.title }}"));
    }

    #[test]
    fn test_env_file_writes_heredoc() {
        let script = r#"{
  echo "title<<EOF"
  echo "${{ github.event.issue.title }}"
  echo "EOF"
} >> "$GITHUB_OUTPUT"
echo "after=1" >> "$GITHUB_OUTPUT"
"#;
        let writes = writes(script);

        assert_eq!(
            writes
                .iter()
                .map(|w| (w.name.as_str(), w.form))
                .collect::<Vec<_>>(),
            [("title", WriteForm::Heredoc), ("after", WriteForm::Direct)]
        );
        assert_eq!(
            &script[writes[0].span.clone()],
            "${{ github.event.issue.title }}"
        );
    }

    #[test]
    fn test_env_file_writes_cat_heredoc() {
        let script = "cat <<EOF >> \"$GITHUB_OUTPUT\"\nbody<<DELIM\n${{ github.event.issue.body }}\nDELIM\nEOF\n";
        let writes = writes(script);

        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].name, "body");
        assert_eq!(writes[0].form, WriteForm::Heredoc);
    }

    #[test]
    fn test_step_output_taint() {
        let mut table = StepOutputTaint::default();
        assert!(table.lookup("build", "meta", "title").is_none());

        table.record("build", "meta", "title", sources(&["github.event.issue.title"]));
        table.record("build", "meta", "clean", Sources::new());
        table.record("build", "meta", "title", sources(&["github.head_ref"]));

        assert_eq!(
            table.lookup("build", "meta", "title"),
            Some(&sources(&["github.event.issue.title", "github.head_ref"]))
        );
        assert!(table.lookup("build", "meta", "clean").is_none());

        for (job, expr, tainted) in &[
            ("build", "steps.meta.outputs.title", true),
            ("build", "${{ steps.META.outputs.title }}", true),
            ("build", "steps.meta.outputs.clean", false),
            ("build", "steps.other.outputs.title", false),
            ("build", "steps.meta.outputs", false),
            ("build", "github.event.issue.title", false),
            ("test", "steps.meta.outputs.title", false),
        ] {
            assert_eq!(table.is_tainted_expr(job, expr).is_some(), *tainted, "{job}: {expr}");
        }
    }

    #[test]
    fn test_job_output_taint() {
        let mut table = JobOutputTaint::default();
        table.record("setup", "title", sources(&["github.event.issue.title"]));
        table.record("setup", "sha", Sources::new());

        assert!(table.lookup("setup", "title").is_some());
        assert!(table.lookup("SETUP", "Title").is_some());
        assert!(table.lookup("setup", "sha").is_none());
        assert!(table.lookup("other", "title").is_none());
    }
}
