//! sinkhole's JSON output format.
//!
//! The format is a flat array of findings, each represented as an object.
//! Fixes are included as declarative edit operations, for an external
//! rewriter to apply.

use std::io;

use crate::finding;

#[derive(serde::Serialize)]
struct JsonFinding<'a> {
    ident: &'a str,
    desc: &'a str,
    url: &'a str,
    message: &'a str,
    determinations: &'a finding::Determinations,
    locations: &'a [finding::location::Location<'a>],
    ignored: bool,
    fixes: &'a [finding::Fix<'a>],
}

impl<'a> From<&'a finding::Finding<'a>> for JsonFinding<'a> {
    fn from(finding: &'a finding::Finding<'a>) -> Self {
        Self {
            ident: finding.ident,
            desc: finding.desc,
            url: finding.url,
            message: &finding.message,
            determinations: &finding.determinations,
            locations: &finding.locations,
            ignored: finding.ignored,
            fixes: &finding.fixes,
        }
    }
}

pub(crate) fn output<'a>(
    sink: impl io::Write,
    findings: &[finding::Finding<'a>],
) -> anyhow::Result<()> {
    serde_json::to_writer_pretty(
        sink,
        &findings.iter().map(JsonFinding::from).collect::<Vec<_>>(),
    )?;
    Ok(())
}
