//! Detects untrusted data written to `$GITHUB_OUTPUT` as a single
//! `name=value` line, which lets the data overwrite other outputs of the
//! same step.

use std::marker::PhantomData;

use super::{Audit, AuditError, Tier, direct_env_file_writes, tiered_audit_meta};
use crate::{
    engine::{context::AnalysisContext, shell::EnvFile},
    finding::Finding,
    models::workflow::Step,
};

#[derive(Default)]
pub(crate) struct OutputClobbering<T>(PhantomData<T>);

tiered_audit_meta!(
    OutputClobbering,
    "output-clobbering",
    "step outputs clobbered by untrusted data"
);

impl<T: Tier> Audit for OutputClobbering<T> {
    fn audit_step<'doc>(
        &self,
        step: &Step<'doc>,
        cx: &AnalysisContext<'doc>,
    ) -> Result<Vec<Finding<'doc>>, AuditError> {
        direct_env_file_writes::<Self, T>(step, cx, EnvFile::Output)
    }
}

#[cfg(test)]
mod tests {
    use super::OutputClobbering;
    use crate::audit::{Critical, Medium, test_support};

    fn workflow(run: &str) -> String {
        let run = run.replace('\n', "\n          ");
        format!(
            "on: pull_request_target\njobs:\n  build:\n    runs-on: ubuntu-latest\n    steps:\n      - id: meta\n        run: |\n          {run}\n"
        )
    }

    #[test]
    fn test_output_clobbering() {
        let title = "${{ github.event.pull_request.title }}";

        for (run, expected) in &[
            (format!("echo \"title={title}\" >> \"$GITHUB_OUTPUT\""), 1),
            (format!("echo title={title} >> $GITHUB_OUTPUT"), 1),
            (format!("echo \"title={title}\" >> \"${{GITHUB_OUTPUT}}\""), 1),
            (format!("printf 'title=%s\\n' \"{title}\" >> \"$GITHUB_OUTPUT\""), 1),
            (format!("printf '%s\\n' \"title={title}\" >> \"$GITHUB_OUTPUT\""), 1),
            (format!("echo \"title={title}\" | tee -a \"$GITHUB_OUTPUT\""), 1),
            (
                format!("TITLE=\"{title}\"\necho \"title=$TITLE\" >> \"$GITHUB_OUTPUT\""),
                1,
            ),
            (
                format!("{{\n  echo \"title<<EOF\"\n  echo \"{title}\"\n  echo \"EOF\"\n}} >> \"$GITHUB_OUTPUT\""),
                0,
            ),
            (
                format!("cat <<EOF >> \"$GITHUB_OUTPUT\"\ntitle<<DELIM\n{title}\nDELIM\nEOF"),
                0,
            ),
            ("echo \"sha=${{ github.sha }}\" >> \"$GITHUB_OUTPUT\"".into(), 0),
            (format!("echo \"title={title}\" >> \"$GITHUB_ENV\""), 0),
            (format!("echo \"title={title}\""), 0),
        ] {
            let src = workflow(run);
            assert_eq!(
                test_support::run::<OutputClobbering<Critical>>(&src).len(),
                *expected,
                "{run}"
            );
            assert!(test_support::run::<OutputClobbering<Medium>>(&src).is_empty());
        }
    }

    #[test]
    fn test_primary_location() {
        let src = workflow("echo \"title=${{ github.event.pull_request.title }}\" >> \"$GITHUB_OUTPUT\"");
        assert_eq!(
            test_support::run::<OutputClobbering<Critical>>(&src),
            [(
                "output-clobbering-critical",
                "title=${{ github.event.pull_request.title }}".to_string()
            )]
        );
    }
}
