use anyhow::Result;

use crate::common::{input_under_test, sinkhole};

#[test]
fn test_code_injection_guarded_job() -> Result<()> {
    // The job's `if:` rules out `pull_request_target`, so only the
    // unprivileged tier fires.
    insta::assert_snapshot!(
        sinkhole()
            .input(input_under_test("code-injection/guarded-job.yml"))
            .findings()?,
        @"code-injection-medium 8:20 ${{ github.event.pull_request.title }}"
    );

    Ok(())
}

#[test]
fn test_code_injection_env_quoted() -> Result<()> {
    insta::assert_snapshot!(
        sinkhole()
            .input(input_under_test("code-injection/env-quoted.yml"))
            .findings()?,
        @""
    );

    Ok(())
}

#[test]
fn test_code_injection_through_job_outputs() -> Result<()> {
    // The issue title travels through a step output and a job output
    // before it's interpolated in a downstream job.
    insta::assert_snapshot!(
        sinkhole()
            .input(input_under_test("code-injection/step-output-flow.yml"))
            .findings()?,
        @"code-injection-critical 22:20 ${{ needs.triage.outputs.title }}"
    );

    Ok(())
}
