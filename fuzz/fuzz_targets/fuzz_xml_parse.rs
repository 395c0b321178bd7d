#![no_main]

use dte_core::{canonicalize, C14nMethod, XmlDocument};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Should never panic, whatever the encoding declaration says
    if let Ok(document) = XmlDocument::from_bytes(data) {
        let exclusive = canonicalize(&document.root, C14nMethod::Exclusive);
        let inclusive = canonicalize(&document.root, C14nMethod::Inclusive);

        // Canonical output is a pure function of the tree
        assert_eq!(exclusive, canonicalize(&document.root, C14nMethod::Exclusive));
        assert_eq!(inclusive, canonicalize(&document.root, C14nMethod::Inclusive));

        let _ = document.to_bytes();
    }
});
