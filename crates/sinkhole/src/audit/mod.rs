//! Core namespace for sinkhole's audits.

use itertools::Itertools as _;
use thiserror::Error;

use crate::{
    engine::{
        context::AnalysisContext,
        shell::EnvFile,
        taint::WriteForm,
        triggers::TriggerDecl,
    },
    finding::{Confidence, Finding, FindingBuilder, Severity, location::Locatable as _},
    models::workflow::{Job, NormalJob, ReusableWorkflowCallJob, Step, Workflow},
};

pub(crate) mod argument_injection;
pub(crate) mod code_injection;
pub(crate) mod envvar_injection;
pub(crate) mod output_clobbering;
pub(crate) mod reusable_workflow_taint;
pub(crate) mod untrusted_cache_key;

/// A supertrait for all audits.
///
/// Audits must derive this trait, either manually or via the
/// [`audit_meta`] or [`tiered_audit_meta`] macros.
pub(crate) trait AuditCore {
    fn ident() -> &'static str
    where
        Self: Sized;

    fn desc() -> &'static str
    where
        Self: Sized;

    fn url() -> &'static str
    where
        Self: Sized;

    fn finding<'doc>() -> FindingBuilder<'doc>
    where
        Self: Sized,
    {
        FindingBuilder::new(Self::ident(), Self::desc(), Self::url())
    }

    fn err(error: impl Into<anyhow::Error>) -> AuditError
    where
        Self: Sized,
    {
        AuditError {
            ident: Self::ident(),
            source: error.into(),
        }
    }
}

/// A convenience macro for implementing [`AuditCore`] on a type.
///
/// Example use:
///
/// ```no_run
/// struct SomeAudit;
///
/// audit_meta!(SomeAudit, "some-audit", "brief description");
/// ```
macro_rules! audit_meta {
    ($t:ty, $id:literal, $desc:expr_2021) => {
        use crate::audit::AuditCore;

        impl AuditCore for $t {
            fn ident() -> &'static str {
                $id
            }

            fn desc() -> &'static str
            where
                Self: Sized,
            {
                $desc
            }

            fn url() -> &'static str {
                concat!("https://sinkhole.dev/rules/#", $id)
            }
        }
    };
}

pub(crate) use audit_meta;

/// Like [`audit_meta`], but for an audit that's generic over a [`Tier`].
///
/// The audit's identifier is suffixed with `-critical` or `-medium`
/// depending on the tier.
macro_rules! tiered_audit_meta {
    ($t:ident, $id:literal, $desc:expr_2021) => {
        use crate::audit::AuditCore;

        impl<T: crate::audit::Tier> AuditCore for $t<T> {
            fn ident() -> &'static str {
                T::pick(concat!($id, "-critical"), concat!($id, "-medium"))
            }

            fn desc() -> &'static str
            where
                Self: Sized,
            {
                $desc
            }

            fn url() -> &'static str {
                concat!("https://sinkhole.dev/rules/#", $id)
            }
        }
    };
}

pub(crate) use tiered_audit_meta;

/// One half of a critical/medium rule pair.
///
/// The tier decides which jobs the rule looks at and how severe its
/// findings are: a taint path into a job that a privileged trigger can
/// reach is critical, the same path anywhere else is medium.
pub(crate) trait Tier: Default + Send + Sync + 'static {
    const SEVERITY: Severity;

    /// Selects this tier's value out of a critical/medium pair.
    fn pick<V>(critical: V, medium: V) -> V;

    /// Whether the current job belongs to this tier.
    fn admits(cx: &AnalysisContext) -> bool;

    /// The trigger that puts the current job in this tier, if any.
    fn trigger<'a, 'doc>(cx: &'a AnalysisContext<'doc>) -> Option<&'a TriggerDecl<'doc>>;

    /// Starts a finding for `A`, with this tier's severity and the
    /// responsible trigger as a related location.
    fn finding<'doc, A: AuditCore>(cx: &AnalysisContext<'doc>) -> FindingBuilder<'doc> {
        let builder = A::finding().severity(Self::SEVERITY);

        match Self::trigger(cx) {
            Some(trigger) => builder.add_location(trigger.location.clone()),
            None => builder,
        }
    }
}

/// Jobs reachable from a privileged trigger.
#[derive(Default)]
pub(crate) struct Critical;

impl Tier for Critical {
    const SEVERITY: Severity = Severity::Critical;

    fn pick<V>(critical: V, _medium: V) -> V {
        critical
    }

    fn admits(cx: &AnalysisContext) -> bool {
        cx.has_privileged_trigger()
    }

    fn trigger<'a, 'doc>(cx: &'a AnalysisContext<'doc>) -> Option<&'a TriggerDecl<'doc>> {
        cx.effective().first_privileged()
    }
}

/// Jobs that no privileged trigger can reach, but that run at all.
#[derive(Default)]
pub(crate) struct Medium;

impl Tier for Medium {
    const SEVERITY: Severity = Severity::Medium;

    fn pick<V>(_critical: V, medium: V) -> V {
        medium
    }

    fn admits(cx: &AnalysisContext) -> bool {
        !cx.effective().is_empty() && !cx.has_privileged_trigger()
    }

    fn trigger<'a, 'doc>(cx: &'a AnalysisContext<'doc>) -> Option<&'a TriggerDecl<'doc>> {
        cx.effective().first_unsafe()
    }
}

/// Flags `name=value` lines carrying untrusted data into `file`.
///
/// A value containing a newline ends its line early, and whatever follows
/// becomes another `name=value` pair of the attacker's choosing. The
/// heredoc form is immune, since the value can't forge the delimiter.
fn direct_env_file_writes<'doc, A: AuditCore, T: Tier>(
    step: &Step<'doc>,
    cx: &AnalysisContext<'doc>,
    file: EnvFile,
) -> Result<Vec<Finding<'doc>>, AuditError> {
    let mut findings = vec![];

    if !T::admits(cx) {
        return Ok(findings);
    }
    let Some(facts) = cx.step() else {
        return Ok(findings);
    };

    for (write, sources) in facts.env_file_writes() {
        if write.file != file || write.form != WriteForm::Direct || sources.is_empty() {
            continue;
        }
        let Some(location) = facts.fragment(&write.span) else {
            continue;
        };

        findings.push(
            T::finding::<A>(cx)
                .confidence(Confidence::High)
                .message(format!(
                    "{name}= is written to ${file} from attacker-controlled {sources} without a heredoc delimiter",
                    name = write.name,
                    file = file.as_str(),
                    sources = sources.iter().join(", "),
                ))
                .add_location(step.location_with_name())
                .add_location(
                    location
                        .primary()
                        .annotated("a newline in this value can inject more lines"),
                )
                .build(step.workflow().document())
                .map_err(A::err)?,
        );
    }

    Ok(findings)
}

#[derive(Error, Debug)]
#[error("error in '{ident}' audit")]
pub(crate) struct AuditError {
    ident: &'static str,
    source: anyhow::Error,
}

/// Auditing trait.
///
/// The engine drives every audit through a single visit of each workflow
/// and calls these hooks as it goes:
///
/// 1. [`Audit::audit_workflow`]: once, at the top of the workflow
/// 1. [`Audit::audit_normal_job`] or [`Audit::audit_reusable_job`]: on
///    entry to each job, once its effective triggers are known
/// 1. [`Audit::audit_step`]: on each step within a normal job, before
///    the step's outputs are recorded
/// 1. [`Audit::audit_job_exit`]: after the job's last step
///
/// Every hook defaults to producing no findings.
pub(crate) trait Audit: AuditCore {
    fn audit_workflow<'doc>(
        &self,
        _workflow: &'doc Workflow,
        _cx: &AnalysisContext<'doc>,
    ) -> Result<Vec<Finding<'doc>>, AuditError> {
        Ok(vec![])
    }

    fn audit_normal_job<'doc>(
        &self,
        _job: &NormalJob<'doc>,
        _cx: &AnalysisContext<'doc>,
    ) -> Result<Vec<Finding<'doc>>, AuditError> {
        Ok(vec![])
    }

    fn audit_reusable_job<'doc>(
        &self,
        _job: &ReusableWorkflowCallJob<'doc>,
        _cx: &AnalysisContext<'doc>,
    ) -> Result<Vec<Finding<'doc>>, AuditError> {
        Ok(vec![])
    }

    fn audit_step<'doc>(
        &self,
        _step: &Step<'doc>,
        _cx: &AnalysisContext<'doc>,
    ) -> Result<Vec<Finding<'doc>>, AuditError> {
        Ok(vec![])
    }

    fn audit_job_exit<'doc>(
        &self,
        _job: &Job<'doc>,
        _cx: &AnalysisContext<'doc>,
    ) -> Result<Vec<Finding<'doc>>, AuditError> {
        Ok(vec![])
    }
}
