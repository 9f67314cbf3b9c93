//! Detects untrusted data written to `$GITHUB_ENV` as a single
//! `name=value` line, which lets the data set arbitrary environment
//! variables (`LD_PRELOAD`, `NODE_OPTIONS`, `BASH_ENV`, ...) for every
//! later step in the job.

use std::marker::PhantomData;

use super::{Audit, AuditError, Tier, direct_env_file_writes, tiered_audit_meta};
use crate::{
    engine::{context::AnalysisContext, shell::EnvFile},
    finding::Finding,
    models::workflow::Step,
};

#[derive(Default)]
pub(crate) struct EnvvarInjection<T>(PhantomData<T>);

tiered_audit_meta!(
    EnvvarInjection,
    "envvar-injection",
    "environment variable injection via $GITHUB_ENV"
);

impl<T: Tier> Audit for EnvvarInjection<T> {
    fn audit_step<'doc>(
        &self,
        step: &Step<'doc>,
        cx: &AnalysisContext<'doc>,
    ) -> Result<Vec<Finding<'doc>>, AuditError> {
        direct_env_file_writes::<Self, T>(step, cx, EnvFile::Env)
    }
}

#[cfg(test)]
mod tests {
    use super::EnvvarInjection;
    use crate::audit::{Critical, Medium, test_support};

    #[test]
    fn test_envvar_injection() {
        let src = r#"on: issue_comment
jobs:
  build:
    runs-on: ubuntu-latest
    steps:
      - env:
          BODY: ${{ github.event.comment.body }}
        run: |
          echo "COMMENT=$BODY" >> "$GITHUB_ENV"
          echo "SAFE=static" >> "$GITHUB_ENV"
          {
            echo "MULTI<<EOF"
            echo "$BODY"
            echo "EOF"
          } >> "$GITHUB_ENV"
"#;
        assert_eq!(
            test_support::run::<EnvvarInjection<Critical>>(src),
            [("envvar-injection-critical", "COMMENT=$BODY".to_string())]
        );
        assert!(test_support::run::<EnvvarInjection<Medium>>(src).is_empty());
    }

    #[test]
    fn test_medium_tier() {
        let src = r#"on: push
jobs:
  build:
    runs-on: ubuntu-latest
    steps:
      - run: echo "MSG=${{ github.event.head_commit.message }}" >> $GITHUB_ENV
"#;
        assert_eq!(test_support::run::<EnvvarInjection<Medium>>(src).len(), 1);
        assert!(test_support::run::<EnvvarInjection<Critical>>(src).is_empty());
    }
}
