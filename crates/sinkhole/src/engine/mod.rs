//! The taint analysis engine.
//!
//! Each workflow is visited exactly once, top-down: the workflow itself,
//! then each job in declaration order, then each job's steps in
//! declaration order. Audits see an [`AnalysisContext`] that reflects
//! everything visited so far, so a step can see the outputs of the steps
//! before it but never the ones after.

use tracing::instrument;

use self::context::AnalysisContext;
use crate::{
    audit::{Audit, AuditError},
    finding::Finding,
    models::workflow::{Job, Workflow},
};

pub(crate) mod context;
pub(crate) mod job_triggers;
pub(crate) mod reusable;
pub(crate) mod shell;
pub(crate) mod sink;
pub(crate) mod taint;
pub(crate) mod triggers;
pub(crate) mod trust;

/// Visits `workflow`, offering every job and step to each of `audits`.
#[instrument(skip_all, fields(input = %workflow.key))]
pub(crate) fn visit<'doc>(
    workflow: &'doc Workflow,
    audits: &[&(dyn Audit + Send + Sync)],
) -> Result<Vec<Finding<'doc>>, AuditError> {
    let mut cx = AnalysisContext::new(workflow);
    let mut findings = vec![];

    for audit in audits {
        findings.extend(audit.audit_workflow(workflow, &cx)?);
    }

    for job in workflow.jobs() {
        cx.enter_job(&job);

        match &job {
            Job::NormalJob(normal) => {
                for audit in audits {
                    findings.extend(audit.audit_normal_job(normal, &cx)?);
                }

                for step in normal.steps() {
                    cx.enter_step(&step);
                    for audit in audits {
                        findings.extend(audit.audit_step(&step, &cx)?);
                    }
                    cx.record_step(&step);
                }
            }
            Job::ReusableWorkflowCallJob(reusable) => {
                for audit in audits {
                    findings.extend(audit.audit_reusable_job(reusable, &cx)?);
                }
            }
        }

        for audit in audits {
            findings.extend(audit.audit_job_exit(&job, &cx)?);
        }

        if let Job::NormalJob(normal) = &job {
            cx.record_job_outputs(normal);
        }
    }

    Ok(findings)
}
