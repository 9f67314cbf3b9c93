//! "plain" (i.e. cargo-style) output.

use annotate_snippets::{Annotation, AnnotationKind, Group, Level, Renderer, Snippet};
use anstream::println;
use indexmap::IndexMap;
use itertools::Itertools as _;
use owo_colors::OwoColorize;

use crate::{
    finding::{
        Finding, Severity,
        location::{Location, LocationKind},
    },
    registry::{
        FindingRegistry,
        input::{InputKey, InputRegistry},
    },
};

impl From<LocationKind> for AnnotationKind {
    fn from(kind: LocationKind) -> Self {
        match kind {
            LocationKind::Primary => AnnotationKind::Primary,
            LocationKind::Related => AnnotationKind::Context,
        }
    }
}

impl From<&Severity> for Level<'_> {
    fn from(sev: &Severity) -> Self {
        match sev {
            Severity::Informational => Level::INFO,
            Severity::Low => Level::HELP,
            Severity::Medium => Level::WARNING,
            Severity::High | Severity::Critical => Level::ERROR,
        }
    }
}

pub(crate) fn finding_snippets<'doc>(
    registry: &'doc InputRegistry,
    finding: &'doc Finding<'doc>,
) -> Vec<Snippet<'doc, Annotation<'doc>>> {
    // Findings only ever span one workflow today, but nothing in the
    // model requires that.
    let mut locations_by_input: IndexMap<&InputKey, Vec<&Location<'doc>>> = IndexMap::new();
    for location in &finding.locations {
        locations_by_input
            .entry(location.symbolic.key)
            .or_default()
            .push(location);
    }

    let mut snippets = vec![];
    for (input_key, locations) in locations_by_input {
        let Some(input) = registry.get_input(input_key) else {
            tracing::warn!("finding refers to unregistered input {input_key}");
            continue;
        };

        snippets.push(
            Snippet::source(input.document().source())
                .fold(true)
                .line_start(1)
                .path(input_key.presentation_path())
                .annotations(locations.iter().map(|loc| {
                    AnnotationKind::from(loc.symbolic.kind)
                        .span(loc.concrete.location.offset_span.clone())
                        .label(loc.symbolic.annotation.as_str())
                })),
        );
    }

    snippets
}

pub(crate) fn render_findings(registry: &InputRegistry, findings: &FindingRegistry) {
    for finding in findings.findings() {
        render_finding(registry, finding);
        println!();
    }

    println!("{}", summary(findings));
}

/// The closing line: findings per severity, plus how many were ignored
/// or carry a fix.
fn summary(findings: &FindingRegistry) -> String {
    let nignored = findings.ignored().len();
    let nfixable = findings.fixable_findings().count();

    let qualifiers = [
        (nignored > 0).then(|| format!("{} ignored", nignored.bright_yellow())),
        (nfixable > 0).then(|| format!("{} fixable", nfixable.bright_green())),
    ]
    .into_iter()
    .flatten()
    .join(", ");
    let qualifiers = if qualifiers.is_empty() {
        qualifiers
    } else {
        format!(" ({})", qualifiers.bold())
    };

    if findings.findings().is_empty() {
        return format!("{}{qualifiers}", "No findings to report. Good job!".green());
    }

    let by_severity = findings
        .findings()
        .iter()
        .map(|f| f.determinations.severity)
        .counts();
    let count = |sev| by_severity.get(&sev).copied().unwrap_or(0);
    let nfindings = findings.count();

    format!(
        "{n} finding{s}{qualifiers}: {ninformational} informational, {nlow} low, {nmedium} medium, {nhigh} high, {ncritical} critical",
        n = nfindings.green(),
        s = if nfindings == 1 { "" } else { "s" },
        ninformational = count(Severity::Informational).purple(),
        nlow = count(Severity::Low).cyan(),
        nmedium = count(Severity::Medium).yellow(),
        nhigh = count(Severity::High).red(),
        ncritical = count(Severity::Critical).red().bold(),
    )
}

fn render_finding(registry: &InputRegistry, finding: &Finding) {
    let level = Level::from(&finding.determinations.severity);
    let confidence = finding.determinations.confidence.as_str();

    let notes = [
        Level::NOTE.message(finding.message.as_str()),
        Level::NOTE.message(format!("audit confidence → {confidence}")),
    ]
    .into_iter()
    .chain(
        finding
            .fixes
            .iter()
            .map(|fix| Level::HELP.message(format!("fix available: {}", fix.title))),
    );

    let group = Group::with_title(
        level
            .primary_title(finding.desc)
            .id(finding.ident)
            .id_url(finding.url),
    )
    .elements(finding_snippets(registry, finding))
    .elements(notes);

    println!("{}", Renderer::styled().render(&[group]));
}
