use anyhow::Result;

use crate::common::{input_under_test, sinkhole};

#[test]
fn test_argument_injection() -> Result<()> {
    // Only the first step lacks a `--`; both steps still interpolate
    // the branch name into a script.
    insta::assert_snapshot!(
        sinkhole()
            .input(input_under_test("argument-injection/argument-injection.yml"))
            .findings()?,
        @r"
    code-injection-critical 8:23 ${{ github.event.pull_request.head.ref }}
    argument-injection-critical 8:23 ${{ github.event.pull_request.head.ref }}
    code-injection-critical 10:26 ${{ github.event.pull_request.head.ref }}
    "
    );

    Ok(())
}

#[test]
fn test_argument_injection_plain() -> Result<()> {
    let output = sinkhole()
        .input(input_under_test("argument-injection/argument-injection.yml"))
        .run()?;

    assert!(output.contains("argument-injection-critical"));
    assert!(output.contains("may be parsed as an option by git"));
    assert!(output.contains("0 high, 3 critical"));

    Ok(())
}
