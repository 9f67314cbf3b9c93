use anyhow::Result;

use crate::common::{input_under_test, sinkhole};

#[test]
fn test_envvar_injection() -> Result<()> {
    insta::assert_snapshot!(
        sinkhole()
            .input(input_under_test("envvar-injection/envvar-injection.yml"))
            .findings()?,
        @"envvar-injection-critical 10:17 COMMENT=$BODY"
    );

    Ok(())
}
