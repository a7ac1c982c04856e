// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Data sizes as they appear in blueprints: either a plain byte count or a
//! human-friendly string such as `"10 GiB"`.

use anyhow::Result;
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

use crate::error::invalid_blueprint;

pub const KILOBYTE: u64 = 1000;
pub const MEGABYTE: u64 = 1000 * KILOBYTE;
pub const GIGABYTE: u64 = 1000 * MEGABYTE;
pub const TERABYTE: u64 = 1000 * GIGABYTE;
pub const KIB: u64 = 1024;
pub const MIB: u64 = 1024 * KIB;
pub const GIB: u64 = 1024 * MIB;
pub const TIB: u64 = 1024 * GIB;

static UNITS: phf::Map<&'static str, u64> = phf::phf_map! {
    "" => 1,
    "B" => 1,
    "kB" => KILOBYTE,
    "KB" => KILOBYTE,
    "MB" => MEGABYTE,
    "GB" => GIGABYTE,
    "TB" => TERABYTE,
    "KiB" => KIB,
    "MiB" => MIB,
    "GiB" => GIB,
    "TiB" => TIB,
};

/// A size in bytes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Size(pub u64);

impl Size {
    pub fn bytes(self) -> u64 {
        self.0
    }
}

impl From<u64> for Size {
    fn from(v: u64) -> Self {
        Size(v)
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} B", self.0)
    }
}

/// Parse a size string like `"512 MiB"`, `"1.5GB"` or `"1024"`.
///
/// Whitespace anywhere in the string is ignored.  A fractional number is
/// multiplied by the unit and then truncated.
pub fn parse(s: &str) -> Result<u64> {
    let compact: String = s.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.starts_with('-') {
        return Err(invalid_blueprint(format!(
            "invalid size {:?}: must be non-negative",
            s
        )));
    }
    let numlen = compact
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(compact.len());
    let (num, unit) = compact.split_at(numlen);
    if num.is_empty() || !num.starts_with(|c: char| c.is_ascii_digit()) {
        return Err(invalid_blueprint(format!(
            "invalid size {:?}: the size string doesn't start with a number",
            s
        )));
    }
    let multiplier = UNITS.get(unit).copied().ok_or_else(|| {
        invalid_blueprint(format!("invalid size {:?}: unknown unit {:?}", s, unit))
    })?;
    match num.split_once('.') {
        None => {
            let n: u64 = num
                .parse()
                .map_err(|e| invalid_blueprint(format!("invalid size {:?}: {}", s, e)))?;
            Ok(n.wrapping_mul(multiplier))
        }
        Some((int, frac)) => {
            if frac.contains('.') {
                return Err(invalid_blueprint(format!("invalid size {:?}", s)));
            }
            let v: f64 = format!("{}.{}0", int, frac)
                .parse()
                .map_err(|e| invalid_blueprint(format!("invalid size {:?}: {}", s, e)))?;
            Ok((v * multiplier as f64) as u64)
        }
    }
}

/// Convert a float as found in TOML/JSON documents into a size.
fn from_f64(v: f64) -> Result<u64> {
    if !v.is_finite() || v < 0.0 {
        return Err(invalid_blueprint(format!(
            "invalid size {}: must be a non-negative number",
            v
        )));
    }
    Ok(v.trunc() as u64)
}

impl Serialize for Size {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.0)
    }
}

struct SizeVisitor;

impl<'de> Visitor<'de> for SizeVisitor {
    type Value = Size;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a size as a non-negative number or a string such as \"10 GiB\"")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Size, E> {
        Ok(Size(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Size, E> {
        u64::try_from(v)
            .map(Size)
            .map_err(|_| E::custom(format!("invalid size {}: must be non-negative", v)))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Size, E> {
        from_f64(v).map(Size).map_err(E::custom)
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Size, E> {
        parse(v).map(Size).map_err(E::custom)
    }
}

impl<'de> Deserialize<'de> for Size {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(SizeVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ImageError;

    #[test]
    fn test_parse() {
        let cases = [
            ("0", 0),
            ("1024", 1024),
            ("10 GiB", 10 * GIB),
            ("10GiB", 10 * GIB),
            ("  5 MB ", 5 * MEGABYTE),
            ("1 kB", 1000),
            ("1 KiB", 1024),
            ("2 TiB", 2 * TIB),
            ("3 TB", 3 * TERABYTE),
            ("7B", 7),
            ("1.5 GiB", 1536 * MIB),
            ("500 MiB", 500 * MIB),
        ];
        for (input, expected) in cases {
            assert_eq!(parse(input).unwrap(), expected, "{}", input);
        }
    }

    #[test]
    fn test_parse_invalid() {
        for input in ["", "GiB", "-1", "-1 GiB", "10 XB", "10 gib", "1.2.3 MiB", ".5"] {
            let e = parse(input).unwrap_err();
            assert!(
                matches!(ImageError::kind_of(&e), Some(ImageError::InvalidBlueprint(_))),
                "{}",
                input
            );
        }
    }

    #[derive(Deserialize)]
    struct Holder {
        size: Size,
    }

    #[test]
    fn test_deserialize_forms() {
        let h: Holder = serde_json::from_str(r#"{"size": "10 GiB"}"#).unwrap();
        assert_eq!(h.size, Size(10 * GIB));
        let h: Holder = serde_json::from_str(r#"{"size": 10737418240}"#).unwrap();
        assert_eq!(h.size, Size(10 * GIB));
        let h: Holder = serde_json::from_str(r#"{"size": 10.0e9}"#).unwrap();
        assert_eq!(h.size, Size(10_000_000_000));
        let h: Holder = toml::from_str("size = 2048").unwrap();
        assert_eq!(h.size, Size(2048));
        let h: Holder = toml::from_str("size = \"2 MiB\"").unwrap();
        assert_eq!(h.size, Size(2 * MIB));
        assert!(serde_json::from_str::<Holder>(r#"{"size": -5}"#).is_err());
        assert!(serde_json::from_str::<Holder>(r#"{"size": -5.5}"#).is_err());
        assert!(serde_json::from_str::<Holder>(r#"{"size": true}"#).is_err());
    }

    #[test]
    fn test_serialize() {
        assert_eq!(serde_json::to_string(&Size(MIB)).unwrap(), "1048576");
    }
}
