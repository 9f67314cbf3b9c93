//! Detects untrusted data reaching code that a shell or `github-script`
//! executes.
//!
//! Two shapes are flagged:
//!
//! 1. An untrusted `${{ ... }}` interpolated directly into a `run:` block
//!    or a `github-script` `script:`. The expression is expanded into the
//!    script text before anything runs, so quoting doesn't help.
//! 2. A tainted environment variable (or a shell variable copied from one)
//!    expanded somewhere the shell will word-split or re-parse it.

use std::marker::PhantomData;

use itertools::Itertools as _;

use super::{Audit, AuditError, Tier, tiered_audit_meta};
use crate::{
    engine::{
        context::{AnalysisContext, StepFacts, TaintedExpr},
        sink::{interpolation_reasons, unsafe_usages},
    },
    finding::{Confidence, Finding, Fix, FixOp, location::Locatable as _},
    models::workflow::{Script, ScriptKind, Step},
    utils::env_var_name,
};

#[derive(Default)]
pub(crate) struct CodeInjection<T>(PhantomData<T>);

tiered_audit_meta!(
    CodeInjection,
    "code-injection",
    "code injection via template expansion"
);

impl<T: Tier> CodeInjection<T> {
    /// Suggests moving a bare context into the step's `env:` and
    /// expanding the variable instead.
    fn fix<'doc>(
        step: &Step<'doc>,
        script: &Script<'doc>,
        facts: &StepFacts<'doc>,
        tainted: &TaintedExpr<'doc>,
    ) -> Option<Fix<'doc>> {
        let expr = tainted.expr.parse()?;
        let name = env_var_name(expr.as_context()?)?;

        let replacement = match script.kind {
            ScriptKind::Shell => {
                let quoted = facts
                    .shell
                    .as_ref()
                    .and_then(|shell| shell.interpolation(&tainted.span))
                    .is_some_and(|usage| usage.quoted);
                if quoted {
                    format!("${{{name}}}")
                } else {
                    format!("\"${{{name}}}\"")
                }
            }
            ScriptKind::GithubScript => format!("process.env.{name}"),
        };

        Some(Fix {
            title: format!("replace the expression with the {name} environment variable"),
            key: &step.workflow().key,
            ops: vec![
                FixOp::ReplaceExpression {
                    route: script.location.route.clone(),
                    from: tainted.expr.as_raw().into(),
                    to: replacement,
                },
                FixOp::AddEnv {
                    route: step.location().route,
                    name,
                    value: tainted.expr.as_raw().into(),
                },
            ],
        })
    }
}

impl<T: Tier> Audit for CodeInjection<T> {
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
        let Some(script) = &facts.script else {
            return Ok(findings);
        };

        let executor = match script.kind {
            ScriptKind::Shell => "a shell",
            ScriptKind::GithubScript => "github-script",
        };

        for tainted in &facts.exprs {
            let Some(location) = facts.fragment(&tainted.span) else {
                continue;
            };

            let mut message = format!(
                "{expr} expands attacker-controlled {sources} into code run by {executor}",
                expr = tainted.expr.as_raw(),
                sources = tainted.sources.iter().join(", "),
            );

            if let Some(shell) = &facts.shell {
                let reasons = interpolation_reasons(shell, &tainted.span);
                if !reasons.is_empty() {
                    message = format!("{message}, {}", reasons.iter().join(", "));
                }
            }

            let mut builder = T::finding::<Self>(cx)
                .confidence(Confidence::High)
                .message(message)
                .add_location(step.location_with_name())
                .add_location(location.primary().annotated("may expand into attacker-controllable code"));

            if let Some(fix) = Self::fix(step, script, facts, tainted) {
                builder = builder.fix(fix);
            }

            findings.push(builder.build(step.workflow().document()).map_err(Self::err)?);
        }

        let Some(shell) = &facts.shell else {
            return Ok(findings);
        };

        let env = facts
            .env
            .iter()
            .map(|var| (var.name.as_str(), &var.sources, 0, var.location.clone()));
        let locals = facts
            .locals
            .iter()
            .filter(|local| local.via_env)
            .map(|local| (local.name.as_str(), &local.sources, local.from, None));

        for (name, sources, from, binding) in env.chain(locals) {
            // A later assignment to the same name takes over reporting from there.
            let until = facts
                .locals
                .iter()
                .filter(|local| local.name == name && local.from > from)
                .map(|local| local.from)
                .min()
                .unwrap_or(usize::MAX);

            for usage in unsafe_usages(shell, name, from) {
                if usage.span.start >= until {
                    continue;
                }
                let Some(location) = facts.fragment(&usage.span) else {
                    continue;
                };

                findings.push(
                    T::finding::<Self>(cx)
                        .confidence(usage.confidence())
                        .message(format!(
                            "${name} carries attacker-controlled {sources} and is expanded {reason}",
                            sources = sources.iter().join(", "),
                            reason = usage.reason(),
                        ))
                        .add_location(step.location_with_name())
                        .add_locations(binding.clone().map(|b| b.annotated("bound to untrusted data here")))
                        .add_location(location.primary().annotated(usage.reason()))
                        .build(step.workflow().document())
                        .map_err(Self::err)?,
                );
            }
        }

        Ok(findings)
    }
}
