#![no_main]

use dte_core::Rut;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    if let Ok(rut) = data.parse::<Rut>() {
        // Anything accepted prints back in canonical form
        let printed = rut.to_string();
        assert_eq!(printed.parse::<Rut>().ok(), Some(rut));
        assert_eq!(rut.check_digit(), Rut::compute_check_digit(rut.number()));
    }
});
