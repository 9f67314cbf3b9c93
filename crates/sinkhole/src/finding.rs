//! Models and APIs for handling findings and their locations.

use anyhow::{Result, anyhow};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use yamlspan::Route;

use self::location::{Location, SymbolicLocation};
use crate::registry::input::InputKey;

pub(crate) mod location;

#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    Eq,
    Hash,
    Ord,
    PartialOrd,
    PartialEq,
    Serialize,
    Deserialize,
    ValueEnum,
)]
pub(crate) enum Confidence {
    #[default]
    Unknown,
    Low,
    Medium,
    High,
}

impl Confidence {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Confidence::Unknown => "unknown",
            Confidence::Low => "low",
            Confidence::Medium => "medium",
            Confidence::High => "high",
        }
    }
}

/// How bad a finding is.
///
/// Taint rules come in pairs: the `-critical` half fires when a privileged
/// trigger can reach the job, the `-medium` half when none can.
#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    Eq,
    Hash,
    Ord,
    PartialOrd,
    PartialEq,
    Serialize,
    Deserialize,
    ValueEnum,
)]
pub(crate) enum Severity {
    #[default]
    Informational,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Severity::Informational => "informational",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

/// A finding's "determination," i.e. its various classifications.
#[derive(Serialize)]
pub(crate) struct Determinations {
    pub(crate) confidence: Confidence,
    pub(crate) severity: Severity,
}

/// A single edit within a [`Fix`].
///
/// Fixes are declarative: sinkhole never rewrites inputs itself, it only
/// describes the rewrite for an external tool to apply.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub(crate) enum FixOp<'doc> {
    /// Replace the text `from` with `to` inside the value at `route`.
    ReplaceExpression {
        route: Route<'doc>,
        from: String,
        to: String,
    },
    /// Add `name: value` to the `env:` mapping at `route`, creating the
    /// mapping if it doesn't exist.
    AddEnv {
        route: Route<'doc>,
        name: String,
        value: String,
    },
}

/// Represents a suggested fix for a finding.
#[derive(Serialize, Debug)]
pub(crate) struct Fix<'doc> {
    /// A short title describing the fix.
    pub(crate) title: String,
    /// The key back into the input registry that this fix applies to.
    pub(crate) key: &'doc InputKey,
    pub(crate) ops: Vec<FixOp<'doc>>,
}

#[derive(Serialize)]
pub(crate) struct Finding<'doc> {
    pub(crate) ident: &'static str,
    pub(crate) desc: &'static str,
    pub(crate) url: &'static str,
    /// What makes this particular finding dangerous, e.g. the offending
    /// context and the sink it reaches.
    pub(crate) message: String,
    pub(crate) determinations: Determinations,
    pub(crate) locations: Vec<Location<'doc>>,
    pub(crate) ignored: bool,
    pub(crate) fixes: Vec<Fix<'doc>>,
}

impl Finding<'_> {
    /// Every finding has a primary location, see [`FindingBuilder::build`].
    pub(crate) fn primary_location(&self) -> Option<&Location<'_>> {
        self.locations.iter().find(|l| l.symbolic.is_primary())
    }
}

pub(crate) struct FindingBuilder<'doc> {
    ident: &'static str,
    desc: &'static str,
    url: &'static str,
    message: String,
    severity: Severity,
    confidence: Confidence,
    locations: Vec<SymbolicLocation<'doc>>,
    fixes: Vec<Fix<'doc>>,
}

impl<'doc> FindingBuilder<'doc> {
    pub(crate) fn new(ident: &'static str, desc: &'static str, url: &'static str) -> Self {
        Self {
            ident,
            desc,
            url,
            message: String::new(),
            severity: Default::default(),
            confidence: Default::default(),
            locations: vec![],
            fixes: vec![],
        }
    }

    pub(crate) fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub(crate) fn severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub(crate) fn confidence(mut self, confidence: Confidence) -> Self {
        self.confidence = confidence;
        self
    }

    pub(crate) fn add_location(mut self, location: SymbolicLocation<'doc>) -> Self {
        self.locations.push(location);
        self
    }

    pub(crate) fn add_locations(
        mut self,
        locations: impl IntoIterator<Item = SymbolicLocation<'doc>>,
    ) -> Self {
        self.locations.extend(locations);
        self
    }

    pub(crate) fn fix(mut self, fix: Fix<'doc>) -> Self {
        self.fixes.push(fix);
        self
    }

    pub(crate) fn build(self, document: &'doc yamlspan::Document) -> Result<Finding<'doc>> {
        let locations = self
            .locations
            .into_iter()
            .map(|l| l.concretize(document))
            .collect::<Result<Vec<_>>>()?;

        if !locations.iter().any(|l| l.symbolic.is_primary()) {
            return Err(anyhow!(
                "API misuse: at least one location must be marked with primary()"
            ));
        }

        Ok(Finding {
            ident: self.ident,
            desc: self.desc,
            url: self.url,
            message: self.message,
            determinations: Determinations {
                confidence: self.confidence,
                severity: self.severity,
            },
            locations,
            ignored: false,
            fixes: self.fixes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{FindingBuilder, Severity};
    use crate::{finding::location::SymbolicLocation, registry::input::InputKey};

    #[test]
    fn test_severity_order() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::Medium > Severity::Low);
        assert_eq!(Severity::default(), Severity::Informational);
        assert_eq!(Severity::Critical.as_str(), "critical");
    }

    #[test]
    fn test_build_requires_primary() {
        let doc = yamlspan::Document::new("on: push\njobs: {}\n").unwrap();
        let key = InputKey::local("ci.yml", None).unwrap();
        let loc = SymbolicLocation::new(&key).with_keys(&["on".into()]);

        let builder = || FindingBuilder::new("demo", "demo finding", "https://example.com");

        assert!(builder().add_location(loc.clone()).build(&doc).is_err());

        let finding = builder()
            .severity(Severity::High)
            .add_location(loc.primary())
            .build(&doc)
            .unwrap();
        assert_eq!(finding.determinations.severity, Severity::High);
        assert_eq!(
            finding.primary_location().unwrap().concrete.feature,
            "on: push"
        );
    }
}
