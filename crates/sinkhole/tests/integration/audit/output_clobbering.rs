use anyhow::Result;

use crate::common::{input_under_test, sinkhole};

#[test]
fn test_output_clobbering() -> Result<()> {
    // The heredoc step is still a code injection, but its write to
    // `$GITHUB_OUTPUT` can't smuggle in extra outputs.
    insta::assert_snapshot!(
        sinkhole()
            .input(input_under_test("output-clobbering/output-clobbering.yml"))
            .findings()?,
        @r"
    code-injection-critical 9:23 ${{ github.event.pull_request.title }}
    output-clobbering-critical 9:17 title=${{ github.event.pull_request.title }}
    code-injection-critical 14:19 ${{ github.event.pull_request.title }}
    "
    );

    Ok(())
}
