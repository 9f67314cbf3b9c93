//! Detects untrusted data in the cache keys of `actions/cache`.
//!
//! Caches are shared between the base repository's workflows and
//! whatever a pull request runs. An attacker who controls part of a key
//! can poison an entry that a privileged workflow later restores.

use std::marker::PhantomData;

use itertools::Itertools as _;

use super::{Audit, AuditError, Tier, tiered_audit_meta};
use crate::{
    engine::context::AnalysisContext,
    finding::{
        Confidence, Finding,
        location::{Fragment, Locatable as _},
    },
    models::workflow::Step,
};

const CACHE_ACTIONS: &[&str] = &["actions/cache", "actions/cache/restore", "actions/cache/save"];
const KEY_INPUTS: &[&str] = &["key", "restore-keys"];

#[derive(Default)]
pub(crate) struct UntrustedCacheKey<T>(PhantomData<T>);

tiered_audit_meta!(
    UntrustedCacheKey,
    "untrusted-cache-key",
    "cache key derived from untrusted data"
);

impl<T: Tier> Audit for UntrustedCacheKey<T> {
    fn audit_step<'doc>(
        &self,
        step: &Step<'doc>,
        cx: &AnalysisContext<'doc>,
    ) -> Result<Vec<Finding<'doc>>, AuditError> {
        let mut findings = vec![];

        if !T::admits(cx) {
            return Ok(findings);
        }
        let Some(uses) = step.uses() else {
            return Ok(findings);
        };
        let Some(action) = CACHE_ACTIONS.iter().find(|pattern| uses.is(pattern)) else {
            return Ok(findings);
        };

        for input in KEY_INPUTS {
            let Some(value) = step.input(input) else {
                continue;
            };

            for (expr, span, sources) in cx.tainted_exprs(value) {
                let nth = value
                    .match_indices(expr.as_raw())
                    .position(|(idx, _)| idx == span.start)
                    .unwrap_or(0);

                findings.push(
                    T::finding::<Self>(cx)
                        .confidence(Confidence::High)
                        .message(format!(
                            "{expr} puts attacker-controlled {sources} into the `{input}` of {action}",
                            expr = expr.as_raw(),
                            sources = sources.iter().join(", "),
                        ))
                        .add_location(step.location_with_name())
                        .add_location(
                            step.location()
                                .with_keys(&["with".into(), (*input).into()])
                                .fragment(Fragment::new(expr.as_raw(), nth))
                                .primary()
                                .annotated("cache key may be chosen by an attacker"),
                        )
                        .build(step.workflow().document())
                        .map_err(Self::err)?,
                );
            }
        }

        Ok(findings)
    }
}

#[cfg(test)]
mod tests {
    use super::UntrustedCacheKey;
    use crate::audit::{Critical, Medium, test_support};

    #[test]
    fn test_untrusted_cache_key() {
        let src = r#"on: pull_request_target
jobs:
  build:
    runs-on: ubuntu-latest
    steps:
      - uses: actions/cache@v4
        with:
          path: ~/.cache
          key: deps-${{ github.event.pull_request.head.ref }}-${{ hashFiles('**/lockfile') }}
          restore-keys: |
            deps-${{ github.head_ref }}-
            deps-
      - uses: actions/cache/restore@v4
        with:
          path: ~/.cache
          key: deps-${{ github.sha }}
      - uses: actions/setup-node@v4
        with:
          cache-dependency-path: ${{ github.head_ref }}
"#;
        assert_eq!(
            test_support::run::<UntrustedCacheKey<Critical>>(src),
            [
                (
                    "untrusted-cache-key-critical",
                    "${{ github.event.pull_request.head.ref }}".to_string()
                ),
                ("untrusted-cache-key-critical", "${{ github.head_ref }}".to_string()),
            ]
        );
        assert!(test_support::run::<UntrustedCacheKey<Medium>>(src).is_empty());
    }

    #[test]
    fn test_cache_save_medium() {
        let src = r#"on: pull_request
jobs:
  build:
    runs-on: ubuntu-latest
    steps:
      - uses: actions/cache/save@v4
        with:
          path: dist
          key: build-${{ github.event.pull_request.title }}
"#;
        assert_eq!(test_support::run::<UntrustedCacheKey<Medium>>(src).len(), 1);
        assert!(test_support::run::<UntrustedCacheKey<Critical>>(src).is_empty());
    }
}
