// SPDX-License-Identifier: Apache-2.0 OR MIT

use anyhow::{anyhow, Result};
use camino::Utf8Path;
use serde::de::DeserializeOwned;
use std::io;

use crate::error::invalid_blueprint;

/// The textual encodings accepted for blueprints and other inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    TOML,
    JSON,
}

impl InputFormat {
    pub fn detect_from_filename<P: AsRef<Utf8Path>>(filename: P) -> Result<Self> {
        let filename = filename.as_ref();
        match filename.extension() {
            Some("toml") => Ok(InputFormat::TOML),
            Some("json") => Ok(InputFormat::JSON),
            _ => Err(anyhow!(
                "Unrecognized file extension in '{}', expected .toml or .json",
                filename
            )),
        }
    }
}

/// Parse a TOML or JSON stream.  Decoding failures are reported as invalid
/// blueprint errors.
pub fn parse_stream<T, R>(fmt: InputFormat, input: &mut R) -> Result<T>
where
    T: DeserializeOwned,
    R: io::Read,
{
    let parsed = match fmt {
        InputFormat::JSON => serde_json::from_reader(input)
            .map_err(|e| invalid_blueprint(format!("JSON unmarshal: {}", e)))?,
        InputFormat::TOML => {
            let mut buf = String::new();
            input.read_to_string(&mut buf)?;
            toml::from_str(&buf).map_err(|e| invalid_blueprint(format!("TOML unmarshal: {}", e)))?
        }
    };
    Ok(parsed)
}

/// Parse a TOML or JSON document held in memory.
pub fn parse_str<T: DeserializeOwned>(fmt: InputFormat, s: &str) -> Result<T> {
    parse_stream(fmt, &mut s.as_bytes())
}

/// Render a value in the given format.
pub fn to_string<T: serde::Serialize>(fmt: InputFormat, v: &T) -> Result<String> {
    Ok(match fmt {
        InputFormat::JSON => serde_json::to_string_pretty(v)?,
        InputFormat::TOML => toml::to_string(v)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ImageError;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Sample {
        name: String,
    }

    #[test]
    fn test_detect() {
        assert_eq!(
            InputFormat::detect_from_filename("bp.toml").unwrap(),
            InputFormat::TOML
        );
        assert_eq!(
            InputFormat::detect_from_filename("/tmp/bp.json").unwrap(),
            InputFormat::JSON
        );
        assert!(InputFormat::detect_from_filename("bp.yaml").is_err());
        assert!(InputFormat::detect_from_filename("bp").is_err());
    }

    #[test]
    fn test_parse() {
        let a: Sample = parse_str(InputFormat::TOML, "name = \"x\"").unwrap();
        let b: Sample = parse_str(InputFormat::JSON, r#"{"name": "x"}"#).unwrap();
        assert_eq!(a, b);
        let e = parse_str::<Sample>(InputFormat::JSON, "{").unwrap_err();
        assert!(matches!(
            ImageError::kind_of(&e),
            Some(ImageError::InvalidBlueprint(_))
        ));
    }
}
