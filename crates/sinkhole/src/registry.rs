//! Functionality for registering and managing the lifecycles of
//! audits.

use std::process::ExitCode;

use indexmap::IndexMap;

use crate::{
    audit::{
        Audit, AuditError, Critical, Medium, argument_injection::ArgumentInjection,
        code_injection::CodeInjection, envvar_injection::EnvvarInjection,
        output_clobbering::OutputClobbering, reusable_workflow_taint::ReusableWorkflowTaint,
        untrusted_cache_key::UntrustedCacheKey,
    },
    config::Config,
    engine,
    finding::{Confidence, Finding, Severity},
    models::workflow::Workflow,
};

pub(crate) mod input;

pub(crate) struct AuditRegistry {
    pub(crate) audits: IndexMap<&'static str, Box<dyn Audit + Send + Sync>>,
}

impl AuditRegistry {
    fn empty() -> Self {
        Self {
            audits: Default::default(),
        }
    }

    /// Every audit identifier sinkhole knows about, whether or not it's
    /// enabled in a given registry.
    pub(crate) fn known_idents() -> Vec<&'static str> {
        Self::default_audits(&Config::default())
            .audits
            .keys()
            .copied()
            .collect()
    }

    /// Constructs a new [`AuditRegistry`] with every audit that `config`
    /// doesn't disable.
    pub(crate) fn default_audits(config: &Config) -> Self {
        let mut registry = Self::empty();

        macro_rules! register_audit {
            ($rule:ty) => {{
                use crate::audit::AuditCore as _;

                let ident = <$rule>::ident();
                if config.disables(ident) {
                    tracing::debug!("skipping {ident}: disabled by configuration");
                } else {
                    registry.register_audit(ident, Box::new(<$rule>::default()));
                }
            }};
        }

        // Both tiers of a pair are independent rules, so either can be
        // disabled on its own.
        macro_rules! register_tiered_audit {
            ($rule:ident) => {{
                register_audit!($rule<Critical>);
                register_audit!($rule<Medium>);
            }};
        }

        register_tiered_audit!(CodeInjection);
        register_tiered_audit!(ArgumentInjection);
        register_tiered_audit!(OutputClobbering);
        register_tiered_audit!(EnvvarInjection);
        register_tiered_audit!(UntrustedCacheKey);
        register_audit!(ReusableWorkflowTaint);

        registry
    }

    pub(crate) fn len(&self) -> usize {
        self.audits.len()
    }

    pub(crate) fn register_audit(
        &mut self,
        ident: &'static str,
        audit: Box<dyn Audit + Send + Sync>,
    ) {
        self.audits.insert(ident, audit);
    }

    /// Runs every registered audit over `workflow` in a single visit.
    pub(crate) fn audit<'doc>(
        &self,
        workflow: &'doc Workflow,
    ) -> Result<Vec<Finding<'doc>>, AuditError> {
        let audits = self
            .audits
            .values()
            .map(|audit| audit.as_ref())
            .collect::<Vec<&(dyn Audit + Send + Sync)>>();

        engine::visit(workflow, &audits)
    }
}

impl std::fmt::Debug for AuditRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditRegistry")
            .field("audits", &self.audits.len())
            .finish()
    }
}

/// A registry of all findings discovered during a `sinkhole` run.
pub(crate) struct FindingRegistry<'a> {
    config: &'a Config,
    minimum_severity: Option<Severity>,
    minimum_confidence: Option<Confidence>,
    ignored: Vec<Finding<'a>>,
    findings: Vec<Finding<'a>>,
    highest_seen_severity: Option<Severity>,
}

impl<'a> FindingRegistry<'a> {
    pub(crate) fn new(
        minimum_severity: Option<Severity>,
        minimum_confidence: Option<Confidence>,
        config: &'a Config,
    ) -> Self {
        Self {
            config,
            minimum_severity,
            minimum_confidence,
            ignored: Default::default(),
            findings: Default::default(),
            highest_seen_severity: None,
        }
    }

    /// Adds one or more findings to the current findings set,
    /// filtering with the configuration in the process.
    pub(crate) fn extend(&mut self, results: Vec<Finding<'a>>) {
        for mut finding in results {
            if self
                .minimum_severity
                .is_some_and(|min| min > finding.determinations.severity)
                || self
                    .minimum_confidence
                    .is_some_and(|min| min > finding.determinations.confidence)
                || self.config.ignores(&finding)
            {
                finding.ignored = true;
                self.ignored.push(finding);
            } else {
                if self
                    .highest_seen_severity
                    .is_none_or(|s| finding.determinations.severity > s)
                {
                    self.highest_seen_severity = Some(finding.determinations.severity);
                }

                self.findings.push(finding);
            }
        }
    }

    /// The total count of all findings, regardless of status.
    pub(crate) fn count(&self) -> usize {
        self.findings.len() + self.ignored.len()
    }

    /// All non-ignored findings.
    pub(crate) fn findings(&self) -> &[Finding<'a>] {
        &self.findings
    }

    /// Findings from [`FindingRegistry::findings`] that carry a fix.
    pub(crate) fn fixable_findings(&self) -> impl Iterator<Item = &Finding<'a>> {
        self.findings.iter().filter(|f| !f.fixes.is_empty())
    }

    /// All ignored findings.
    pub(crate) fn ignored(&self) -> &[Finding<'a>] {
        &self.ignored
    }

    /// Returns an appropriate exit code based on the registry's
    /// highest-seen severity.
    pub(crate) fn exit_code(&self) -> ExitCode {
        match self.highest_seen_severity {
            Some(sev) => match sev {
                Severity::Informational => ExitCode::from(11),
                Severity::Low => ExitCode::from(12),
                Severity::Medium => ExitCode::from(13),
                Severity::High => ExitCode::from(14),
                Severity::Critical => ExitCode::from(15),
            },
            None => ExitCode::SUCCESS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{AuditRegistry, FindingRegistry};
    use crate::{
        audit::test_support,
        config::Config,
        finding::{Confidence, Severity},
    };

    const WORKFLOW: &str = r#"on: pull_request_target
jobs:
  build:
    runs-on: ubuntu-latest
    steps:
      - env:
          TITLE: ${{ github.event.pull_request.title }}
        run: |
          echo "${{ github.event.pull_request.title }}"
          echo $TITLE
"#;

    #[test]
    fn test_default_audits() {
        let registry = AuditRegistry::default_audits(&Config::default());
        assert_eq!(registry.len(), 11);
        assert_eq!(
            AuditRegistry::known_idents(),
            [
                "code-injection-critical",
                "code-injection-medium",
                "argument-injection-critical",
                "argument-injection-medium",
                "output-clobbering-critical",
                "output-clobbering-medium",
                "envvar-injection-critical",
                "envvar-injection-medium",
                "untrusted-cache-key-critical",
                "untrusted-cache-key-medium",
                "reusable-workflow-taint",
            ]
        );
    }

    #[test]
    fn test_filters() {
        let wf = test_support::workflow(WORKFLOW);
        let config = Config::default();
        let registry = AuditRegistry::default_audits(&config);

        // One high-confidence interpolation, one medium-confidence
        // unquoted expansion.
        let mut all = FindingRegistry::new(None, None, &config);
        all.extend(registry.audit(&wf).unwrap());
        assert_eq!(all.findings().len(), 2);
        assert_eq!(all.fixable_findings().count(), 1);
        assert_eq!(all.exit_code(), std::process::ExitCode::from(15));

        let mut confident = FindingRegistry::new(None, Some(Confidence::High), &config);
        confident.extend(registry.audit(&wf).unwrap());
        assert_eq!(confident.findings().len(), 1);
        assert_eq!(confident.ignored().len(), 1);
        assert!(confident.ignored()[0].ignored);
        assert_eq!(confident.count(), 2);

        let mut none = FindingRegistry::new(Some(Severity::Critical), Some(Confidence::High), &config);
        none.extend(vec![]);
        assert_eq!(none.exit_code(), std::process::ExitCode::SUCCESS);
    }
}
