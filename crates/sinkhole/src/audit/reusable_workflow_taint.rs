//! Detects untrusted data crossing a reusable workflow boundary.
//!
//! On the caller's side, a `with:` value carrying untrusted data hands
//! that data to a workflow we can't see into. On the callee's side,
//! `inputs.*` can be anything any caller passed, so interpolating it
//! into a script is as dangerous as interpolating the caller's
//! untrusted context directly.

use itertools::Itertools as _;

use super::{Audit, AuditError, audit_meta};
use crate::{
    engine::{
        context::AnalysisContext,
        reusable::{env_binds, input_refs},
        sink::unsafe_usages,
    },
    finding::{
        Confidence, Finding, Severity,
        location::{Fragment, Locatable as _},
    },
    models::workflow::{JobExt as _, ReusableWorkflowCallJob, Step},
};

#[derive(Default)]
pub(crate) struct ReusableWorkflowTaint;

audit_meta!(
    ReusableWorkflowTaint,
    "reusable-workflow-taint",
    "untrusted data crosses a reusable workflow boundary"
);

impl ReusableWorkflowTaint {
    /// Flags the untrusted `with:` values of a reusable workflow call.
    fn caller_findings<'doc>(
        job: &ReusableWorkflowCallJob<'doc>,
        cx: &AnalysisContext<'doc>,
    ) -> Result<Vec<Finding<'doc>>, AuditError> {
        let mut findings = vec![];

        if cx.effective().is_empty() {
            return Ok(findings);
        }

        let (severity, trigger) = if cx.has_privileged_trigger() {
            (Severity::Critical, cx.effective().first_privileged())
        } else {
            (Severity::Medium, cx.effective().first_unsafe())
        };

        for (name, value) in &job.model().with {
            let Some(value) = value.as_str() else {
                continue;
            };

            for (expr, span, sources) in cx.tainted_exprs(value) {
                let nth = value
                    .match_indices(expr.as_raw())
                    .position(|(idx, _)| idx == span.start)
                    .unwrap_or(0);

                findings.push(
                    Self::finding()
                        .severity(severity)
                        .confidence(Confidence::High)
                        .message(format!(
                            "{expr} passes attacker-controlled {sources} to {callee} as the `{name}` input",
                            expr = expr.as_raw(),
                            sources = sources.iter().join(", "),
                            callee = job.model().uses.raw(),
                        ))
                        .add_location(job.location_with_name())
                        .add_locations(trigger.map(|t| t.location.clone()))
                        .add_location(
                            job.location()
                                .with_keys(&["with".into(), name.as_str().into()])
                                .fragment(Fragment::new(expr.as_raw(), nth))
                                .primary()
                                .annotated("untrusted data passed to a reusable workflow"),
                        )
                        .build(job.parent().document())
                        .map_err(Self::err)?,
                );
            }
        }

        Ok(findings)
    }

    /// Flags `inputs.*` reaching a script inside a reusable workflow,
    /// either interpolated directly or through an unsafely expanded
    /// environment variable.
    fn callee_findings<'doc>(
        step: &Step<'doc>,
        cx: &AnalysisContext<'doc>,
    ) -> Result<Vec<Finding<'doc>>, AuditError> {
        let mut findings = vec![];

        if !cx.is_reusable() || !cx.has_unsafe_trigger() {
            return Ok(findings);
        }
        let Some(facts) = cx.step() else {
            return Ok(findings);
        };
        let Some(script) = &facts.script else {
            return Ok(findings);
        };
        let trigger = cx.effective().first_unsafe();

        for input_ref in input_refs(script.body) {
            if env_binds(step.env(), &input_ref) {
                continue;
            }
            let Some(location) = facts.fragment(&input_ref.span) else {
                continue;
            };

            findings.push(
                Self::finding()
                    .severity(Severity::Medium)
                    .confidence(Confidence::Medium)
                    .message(format!(
                        "{expr} expands the caller-controlled {input} directly into a script",
                        expr = input_ref.expr.as_raw(),
                        input = input_ref.input,
                    ))
                    .add_location(step.location_with_name())
                    .add_locations(trigger.map(|t| t.location.clone()))
                    .add_location(
                        location
                            .primary()
                            .annotated("callers may pass untrusted data here"),
                    )
                    .build(step.workflow().document())
                    .map_err(Self::err)?,
            );
        }

        let Some(shell) = &facts.shell else {
            return Ok(findings);
        };

        for var in &facts.input_env {
            for usage in unsafe_usages(shell, &var.name, 0) {
                let Some(location) = facts.fragment(&usage.span) else {
                    continue;
                };

                findings.push(
                    Self::finding()
                        .severity(Severity::Medium)
                        .confidence(usage.confidence())
                        .message(format!(
                            "${name} carries caller-controlled {sources} and is expanded {reason}",
                            name = var.name,
                            sources = var.sources.iter().join(", "),
                            reason = usage.reason(),
                        ))
                        .add_location(step.location_with_name())
                        .add_locations(
                            var.location
                                .clone()
                                .map(|l| l.annotated("bound to a workflow input here")),
                        )
                        .add_location(location.primary().annotated(usage.reason()))
                        .build(step.workflow().document())
                        .map_err(Self::err)?,
                );
            }
        }

        Ok(findings)
    }
}

impl Audit for ReusableWorkflowTaint {
    fn audit_reusable_job<'doc>(
        &self,
        job: &ReusableWorkflowCallJob<'doc>,
        cx: &AnalysisContext<'doc>,
    ) -> Result<Vec<Finding<'doc>>, AuditError> {
        Self::caller_findings(job, cx)
    }

    fn audit_step<'doc>(
        &self,
        step: &Step<'doc>,
        cx: &AnalysisContext<'doc>,
    ) -> Result<Vec<Finding<'doc>>, AuditError> {
        Self::callee_findings(step, cx)
    }
}
