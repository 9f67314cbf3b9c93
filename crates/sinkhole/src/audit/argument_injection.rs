//! Detects untrusted data interpolated as a bare argument to commands
//! that parse options out of their arguments.
//!
//! A branch named `--upload-pack=touch${IFS}pwned` is a perfectly valid
//! git ref, and `git fetch origin ${{ github.head_ref }}` hands it straight
//! to git as an option.

use std::marker::PhantomData;

use itertools::Itertools as _;

use super::{Audit, AuditError, Tier, tiered_audit_meta};
use crate::{
    engine::{context::AnalysisContext, sink::argument_sink},
    finding::{Confidence, Finding, location::Locatable as _},
    models::workflow::Step,
};

#[derive(Default)]
pub(crate) struct ArgumentInjection<T>(PhantomData<T>);

tiered_audit_meta!(
    ArgumentInjection,
    "argument-injection",
    "untrusted data used as a command-line option"
);

impl<T: Tier> Audit for ArgumentInjection<T> {
    fn audit_step<'doc>(
        &self,
        step: &Step<'doc>,
        cx: &AnalysisContext<'doc>,
    ) -> Result<Vec<Finding<'doc>>, AuditError> {
        let mut findings = vec![];

        if !T::admits(cx) {
            return Ok(findings);
        }
        let Some(facts) = cx.step() else {
            return Ok(findings);
        };
        let Some(shell) = &facts.shell else {
            return Ok(findings);
        };

        for tainted in &facts.exprs {
            let Some(command) = argument_sink(shell, &tainted.span) else {
                continue;
            };
            let Some(location) = facts.fragment(&tainted.span) else {
                continue;
            };

            findings.push(
                T::finding::<Self>(cx)
                    .confidence(Confidence::High)
                    .message(format!(
                        "{expr} expands attacker-controlled {sources} as an argument to `{command}` with no `--` before it",
                        expr = tainted.expr.as_raw(),
                        sources = tainted.sources.iter().join(", "),
                    ))
                    .add_location(step.location_with_name())
                    .add_location(
                        location
                            .primary()
                            .annotated(format!("may be parsed as an option by {command}")),
                    )
                    .build(step.workflow().document())
                    .map_err(Self::err)?,
            );
        }

        Ok(findings)
    }
}
