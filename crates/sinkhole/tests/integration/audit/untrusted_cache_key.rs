use anyhow::Result;

use crate::common::{input_under_test, sinkhole};

#[test]
fn test_untrusted_cache_key() -> Result<()> {
    insta::assert_snapshot!(
        sinkhole()
            .input(input_under_test("untrusted-cache-key/untrusted-cache-key.yml"))
            .findings()?,
        @"untrusted-cache-key-critical 10:20 ${{ github.head_ref }}"
    );

    Ok(())
}
