#![no_main]

use dte_core::{AuthorityKeyring, FolioAuthorization};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(caf) = FolioAuthorization::load(data) {
        let (low, high) = caf.range();
        assert!(low <= high);
        assert!(caf.in_range(low));
        assert!(caf.in_range(high));

        // Validation may fail but must not panic
        let _ = caf.validate(&AuthorityKeyring::new());
        let _ = caf.expiry();
    }
});
