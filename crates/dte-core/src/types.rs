//! Taxpayer identifiers and document type codes

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Chilean taxpayer id (RUT): body number plus modulo-11 check digit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Rut {
    number: u32,
    check_digit: char,
}

impl Rut {
    /// Build from the body number, computing the check digit
    pub fn new(number: u32) -> Self {
        Self {
            number,
            check_digit: Self::compute_check_digit(number),
        }
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn check_digit(&self) -> char {
        self.check_digit
    }

    /// Modulo-11 check digit: weights 2..=7 cycling from the rightmost digit
    pub fn compute_check_digit(number: u32) -> char {
        let mut n = number;
        let mut sum = 0u32;
        let mut weight = 2u32;
        while n > 0 {
            sum += (n % 10) * weight;
            n /= 10;
            weight = if weight == 7 { 2 } else { weight + 1 };
        }
        match 11 - (sum % 11) {
            11 => '0',
            10 => 'K',
            d => char::from_digit(d, 10).unwrap_or('0'),
        }
    }
}

impl FromStr for Rut {
    type Err = Error;

    /// Accepts `12345678-5`, `12.345.678-5` and lowercase `k`
    fn from_str(s: &str) -> Result<Self> {
        let cleaned: String = s.trim().chars().filter(|c| *c != '.').collect();
        let (body, dv) = cleaned
            .split_once('-')
            .ok_or_else(|| Error::InvalidRut(format!("{}: missing check digit", s)))?;
        let number: u32 = body
            .parse()
            .map_err(|_| Error::InvalidRut(format!("{}: bad number", s)))?;
        let mut dv_chars = dv.chars();
        let check_digit = match (dv_chars.next(), dv_chars.next()) {
            (Some(c), None) => c.to_ascii_uppercase(),
            _ => return Err(Error::InvalidRut(format!("{}: bad check digit", s))),
        };
        if check_digit != Self::compute_check_digit(number) {
            return Err(Error::InvalidRut(format!("{}: check digit mismatch", s)));
        }
        Ok(Self {
            number,
            check_digit,
        })
    }
}

impl TryFrom<String> for Rut {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Rut> for String {
    fn from(rut: Rut) -> String {
        rut.to_string()
    }
}

impl fmt::Display for Rut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.number, self.check_digit)
    }
}

/// Human name of a document type code, when known
pub fn document_type_name(code: u16) -> Option<&'static str> {
    Some(match code {
        33 => "Factura electrónica",
        34 => "Factura no afecta o exenta electrónica",
        39 => "Boleta electrónica",
        41 => "Boleta no afecta o exenta electrónica",
        43 => "Liquidación factura electrónica",
        46 => "Factura de compra electrónica",
        52 => "Guía de despacho electrónica",
        56 => "Nota de débito electrónica",
        61 => "Nota de crédito electrónica",
        110 => "Factura de exportación electrónica",
        111 => "Nota de débito de exportación electrónica",
        112 => "Nota de crédito de exportación electrónica",
        _ => return None,
    })
}
