//! Kubernetes resource quantities.
//!
//! Quantities stay in their serialized string form (`"500m"`, `"2"`,
//! `"10Gi"`) and are parsed on demand. Parsing follows the Kubernetes
//! grammar: an optionally signed decimal number followed by a decimal SI
//! suffix (`n`, `u`, `m`, `k`, `M`, `G`, `T`, `P`, `E`), a binary suffix
//! (`Ki` through `Ei`), or a base-ten exponent (`e3`). Values finer than
//! one nano-unit round up, matching the apimachinery behavior.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const NANOS_PER_UNIT: i128 = 1_000_000_000;
const NANOS_PER_MILLI: i128 = 1_000_000;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QuantityError {
    #[error("invalid quantity {0:?}")]
    Invalid(String),

    #[error("quantity {0:?} out of range")]
    OutOfRange(String),
}

/// A resource quantity in Kubernetes canonical string form.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Quantity(pub String);

impl Quantity {
    /// Quantity of whole units, e.g. `from_units(2)` is `"2"`.
    pub fn from_units(v: i64) -> Self {
        Quantity(v.to_string())
    }

    /// Quantity of milli-units, rendered in whole units when exact,
    /// e.g. `from_millis(1500)` is `"1500m"` and `from_millis(2000)` is `"2"`.
    pub fn from_millis(v: i64) -> Self {
        if v % 1000 == 0 {
            Quantity((v / 1000).to_string())
        } else {
            Quantity(format!("{v}m"))
        }
    }

    /// Value in whole units, rounded up, saturating at `i64` bounds.
    pub fn value(&self) -> Result<i64, QuantityError> {
        Ok(saturate(div_round_up(self.nanos()?, NANOS_PER_UNIT)))
    }

    /// Value in milli-units, rounded up, saturating at `i64` bounds.
    pub fn milli_value(&self) -> Result<i64, QuantityError> {
        Ok(saturate(div_round_up(self.nanos()?, NANOS_PER_MILLI)))
    }

    /// Semantic comparison; `"1"` and `"1000m"` compare equal.
    pub fn cmp_value(&self, other: &Quantity) -> Result<Ordering, QuantityError> {
        Ok(self.nanos()?.cmp(&other.nanos()?))
    }

    /// The exact value in nano-units.
    fn nanos(&self) -> Result<i128, QuantityError> {
        let invalid = || QuantityError::Invalid(self.0.clone());
        let out_of_range = || QuantityError::OutOfRange(self.0.clone());

        let s = self.0.trim();
        let (negative, s) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s.strip_prefix('+').unwrap_or(s)),
        };

        let mantissa_end = s
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .unwrap_or(s.len());
        let (mantissa, suffix) = s.split_at(mantissa_end);

        let (int_part, frac_part) = match mantissa.split_once('.') {
            Some((i, f)) => (i, f),
            None => (mantissa, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(invalid());
        }
        if frac_part.contains('.') {
            return Err(invalid());
        }
        if int_part.len() + frac_part.len() > 24 {
            return Err(out_of_range());
        }

        let mut scaled: i128 = 0;
        for c in int_part.chars().chain(frac_part.chars()) {
            let digit = c.to_digit(10).ok_or_else(invalid)? as i128;
            scaled = scaled * 10 + digit;
        }

        // Suffix resolves to a power of ten relative to whole units, with
        // binary suffixes contributing an extra power-of-two multiplier.
        let (pow10, mult): (i32, i128) = match suffix {
            "" => (0, 1),
            "n" => (-9, 1),
            "u" => (-6, 1),
            "m" => (-3, 1),
            "k" => (3, 1),
            "M" => (6, 1),
            "G" => (9, 1),
            "T" => (12, 1),
            "P" => (15, 1),
            "E" => (18, 1),
            "Ki" => (0, 1 << 10),
            "Mi" => (0, 1 << 20),
            "Gi" => (0, 1 << 30),
            "Ti" => (0, 1 << 40),
            "Pi" => (0, 1 << 50),
            "Ei" => (0, 1 << 60),
            exp if exp.starts_with('e') || exp.starts_with('E') => {
                let exp: i32 = exp[1..].parse().map_err(|_| invalid())?;
                if !(-27..=27).contains(&exp) {
                    return Err(out_of_range());
                }
                (exp, 1)
            }
            _ => return Err(invalid()),
        };

        let mut nanos = scaled.checked_mul(mult).ok_or_else(out_of_range)?;
        let exp = 9 + pow10 - frac_part.len() as i32;
        if exp >= 0 {
            let pow = 10i128.checked_pow(exp as u32).ok_or_else(out_of_range)?;
            nanos = nanos.checked_mul(pow).ok_or_else(out_of_range)?;
        } else {
            let pow = 10i128
                .checked_pow(exp.unsigned_abs())
                .ok_or_else(out_of_range)?;
            nanos = div_round_up(nanos, pow);
        }

        Ok(if negative { -nanos } else { nanos })
    }
}

impl Default for Quantity {
    fn default() -> Self {
        Quantity("0".to_string())
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Equality is semantic when both sides parse, string-wise otherwise.
impl PartialEq for Quantity {
    fn eq(&self, other: &Self) -> bool {
        match (self.nanos(), other.nanos()) {
            (Ok(a), Ok(b)) => a == b,
            _ => self.0 == other.0,
        }
    }
}

impl schemars::JsonSchema for Quantity {
    fn schema_name() -> String {
        "Quantity".to_string()
    }

    fn json_schema(gen: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
        String::json_schema(gen)
    }
}

fn div_round_up(n: i128, d: i128) -> i128 {
    let q = n.div_euclid(d);
    if n.rem_euclid(d) != 0 { q + 1 } else { q }
}

fn saturate(n: i128) -> i64 {
    if n > i64::MAX as i128 {
        i64::MAX
    } else if n < i64::MIN as i128 {
        i64::MIN
    } else {
        n as i64
    }
}
