use anyhow::Result;

use crate::common::{input_under_test, sinkhole};

#[test]
fn test_reusable_workflow_taint_caller() -> Result<()> {
    insta::assert_snapshot!(
        sinkhole()
            .input(input_under_test("reusable-workflow-taint/reusable-caller.yml"))
            .findings()?,
        @"reusable-workflow-taint 7:14 ${{ github.event.pull_request.title }}"
    );

    Ok(())
}

#[test]
fn test_reusable_workflow_taint_callee() -> Result<()> {
    // The second step binds the input to an environment variable and
    // quotes it, so only the direct interpolation is flagged.
    insta::assert_snapshot!(
        sinkhole()
            .input(input_under_test("reusable-workflow-taint/reusable-callee.yml"))
            .findings()?,
        @"reusable-workflow-taint 11:20 ${{ inputs.title }}"
    );

    Ok(())
}

#[test]
fn test_reusable_workflow_taint_callee_exit_code() -> Result<()> {
    let run = sinkhole()
        .input(input_under_test("reusable-workflow-taint/reusable-callee.yml"))
        .output()?;

    assert_eq!(run.code, Some(13));
    assert!(run.stdout.contains("1 medium, 0 high, 0 critical"));

    Ok(())
}
