//! Commodity code normalisation.
//!
//! Codes are compared as integers after stripping separators and padding to
//! twelve digits, so `01.01` and `0101000000` land on the same value.

use crate::utils::error::{HelpdeskError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const NORMALISED_LENGTH: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum HsLevel {
    Chapter,
    Heading,
    SubHeading,
    Commodity,
}

impl HsLevel {
    pub fn from_digits(digits: usize) -> Self {
        match digits {
            0..=2 => HsLevel::Chapter,
            3..=4 => HsLevel::Heading,
            5..=6 => HsLevel::SubHeading,
            _ => HsLevel::Commodity,
        }
    }
}

/// A validated, separator-free commodity code of 1 to 12 digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommodityCode {
    digits: String,
}

impl CommodityCode {
    pub fn parse(raw: &str) -> Result<Self> {
        let digits = strip_separators(raw);

        if digits.is_empty() {
            return Err(invalid(raw, "code is empty"));
        }
        if !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid(raw, "code must contain only digits"));
        }
        if digits.len() > NORMALISED_LENGTH {
            return Err(invalid(
                raw,
                &format!("code is longer than {} digits", NORMALISED_LENGTH),
            ));
        }

        Ok(Self { digits })
    }

    pub fn digits(&self) -> &str {
        &self.digits
    }

    pub fn level(&self) -> HsLevel {
        HsLevel::from_digits(self.digits.len())
    }

    pub fn normalised(&self) -> String {
        format!("{:0<width$}", self.digits, width = NORMALISED_LENGTH)
    }

    pub fn value(&self) -> u64 {
        pad_value(&self.digits, '0')
    }

    /// Last code nested under this one (`02` -> `029999999999`).
    pub fn upper_bound(&self) -> u64 {
        pad_value(&self.digits, '9')
    }

    /// Successive 2-digit prefixes, broadest first, as normalised values.
    pub fn hierarchy_values(&self) -> Vec<u64> {
        let len = self.digits.len();
        let mut ends: Vec<usize> = (2..=len).step_by(2).collect();
        if len % 2 == 1 {
            ends.push(len);
        }

        let mut values: Vec<u64> = Vec::with_capacity(ends.len());
        for end in ends {
            let value = pad_value(&self.digits[..end], '0');
            if !values.contains(&value) {
                values.push(value);
            }
        }
        values
    }

    /// Zero-padded to the 10 digits used by the nomenclature tables.
    pub fn to_nomenclature_code(&self) -> String {
        let ten: String = self.digits.chars().take(10).collect();
        format!("{:0<10}", ten)
    }
}

impl fmt::Display for CommodityCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.digits)
    }
}

pub fn strip_separators(code: &str) -> String {
    code.chars()
        .filter(|c| *c != '.' && !c.is_whitespace())
        .collect()
}

pub fn normalise(code: &str) -> Result<String> {
    Ok(CommodityCode::parse(code)?.normalised())
}

pub fn hierarchy_codes(code: &str) -> Result<Vec<String>> {
    Ok(CommodityCode::parse(code)?
        .hierarchy_values()
        .into_iter()
        .map(|value| format!("{:0width$}", value, width = NORMALISED_LENGTH))
        .collect())
}

fn pad_value(digits: &str, fill: char) -> u64 {
    digits
        .chars()
        .chain(std::iter::repeat(fill))
        .take(NORMALISED_LENGTH)
        .fold(0u64, |acc, c| acc * 10 + u64::from(c.to_digit(10).unwrap_or(0)))
}

fn invalid(code: &str, reason: &str) -> HelpdeskError {
    HelpdeskError::InvalidCommodityCode {
        code: code.to_string(),
        reason: reason.to_string(),
    }
}
