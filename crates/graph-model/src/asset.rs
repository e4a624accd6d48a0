//! Media kinds, storage classes, and the asset URI scheme.
//!
//! An [`AssetUri`] is the opaque locator the rest of the system passes
//! around for a produced or staged media file. Its textual form must stay
//! bit-compatible with the render engine's `/view` endpoint:
//!
//! ```text
//! /view?filename=<f>&subfolder=<s>&type=<input|output>&_cache_buster=<t>
//! ```
//!
//! `type` distinguishes staged-input from rendered-output storage and
//! determines the filesystem lookup path on the engine side.

use std::fmt;
use std::str::FromStr;

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use medley_common::MedleyError;

/// Everything except `ALPHA / DIGIT / "_" / "." / "-" / "~"` is escaped;
/// spaces are handled separately so they render as `+`.
const QUERY_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'_')
    .remove(b'.')
    .remove(b'-')
    .remove(b'~')
    .remove(b' ');

/// Kind of media a node consumes or produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
}

impl MediaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
        }
    }

}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Storage class of an asset on the render engine: staged input vs
/// rendered output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageClass {
    Input,
    Output,
}

impl StorageClass {
    pub fn as_str(self) -> &'static str {
        match self {
            StorageClass::Input => "input",
            StorageClass::Output => "output",
        }
    }
}

impl FromStr for StorageClass {
    type Err = MedleyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "input" => Ok(StorageClass::Input),
            "output" => Ok(StorageClass::Output),
            other => Err(MedleyError::parse(format!(
                "unknown storage class '{other}'"
            ))),
        }
    }
}

/// Opaque locator for a produced or staged media file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetUri {
    pub filename: String,
    pub subfolder: String,
    pub class: StorageClass,
    pub cache_token: u64,
}

impl AssetUri {
    pub fn output(filename: impl Into<String>, subfolder: impl Into<String>, token: u64) -> Self {
        Self {
            filename: filename.into(),
            subfolder: subfolder.into(),
            class: StorageClass::Output,
            cache_token: token,
        }
    }

    pub fn input(filename: impl Into<String>, token: u64) -> Self {
        Self {
            filename: filename.into(),
            subfolder: String::new(),
            class: StorageClass::Input,
            cache_token: token,
        }
    }

    /// Parse a `/view?...` locator. Missing `filename` is a parse error;
    /// `subfolder` defaults to empty, `type` to output, and the cache token
    /// to zero.
    pub fn parse(uri: &str) -> Result<Self, MedleyError> {
        let query = uri
            .split_once('?')
            .map(|(_, q)| q)
            .ok_or_else(|| MedleyError::parse(format!("asset uri has no query: '{uri}'")))?;

        let mut filename = None;
        let mut subfolder = String::new();
        let mut class = StorageClass::Output;
        let mut cache_token = 0u64;

        for pair in query.split('&') {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let value = decode_component(value)?;
            match key {
                "filename" => filename = Some(value),
                "subfolder" => subfolder = value,
                "type" => class = value.parse()?,
                "_cache_buster" => {
                    cache_token = value.parse().map_err(|_| {
                        MedleyError::parse(format!("bad cache token '{value}' in '{uri}'"))
                    })?;
                }
                _ => {}
            }
        }

        let filename = filename
            .filter(|f| !f.is_empty())
            .ok_or_else(|| MedleyError::parse(format!("asset uri missing filename: '{uri}'")))?;

        Ok(Self {
            filename,
            subfolder,
            class,
            cache_token,
        })
    }
}

fn encode_component(value: &str) -> String {
    utf8_percent_encode(value, QUERY_SET)
        .to_string()
        .replace(' ', "+")
}

fn decode_component(value: &str) -> Result<String, MedleyError> {
    let spaced = value.replace('+', " ");
    percent_decode_str(&spaced)
        .decode_utf8()
        .map(|cow| cow.into_owned())
        .map_err(|e| MedleyError::parse(format!("bad percent-encoding '{value}': {e}")))
}

impl fmt::Display for AssetUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "/view?filename={}&subfolder={}&type={}&_cache_buster={}",
            encode_component(&self.filename),
            encode_component(&self.subfolder),
            self.class.as_str(),
            self.cache_token
        )
    }
}

impl FromStr for AssetUri {
    type Err = MedleyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for AssetUri {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for AssetUri {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        AssetUri::parse(&raw).map_err(serde::de::Error::custom)
    }
}
