use crate::error::ParseError;
use crc32fast::Hasher;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as Json;

pub const MAGIC_BYTES: [u8; 8] = [71, 82, 69, 68, 66, 73, 78, 0]; // "GREDBIN\0"

/// Bytes before the JSON header: magic plus the u32 header length.
pub const PREAMBLE_LEN: usize = 12;

static CRC_RE: Lazy<Regex> = Lazy::new(|| {
    // "header_crc32_hex" <ws> : <ws> "DEADBEEF", capturing the whitespace around ':'
    Regex::new(r#""header_crc32_hex"(\s*:\s*)"([0-9A-Fa-f]{8})""#).expect("regex")
});
static CRC_FALLBACK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""header_crc32_hex"\s*:\s*"[^"]+""#).expect("regex"));

fn json_to_u64(v: &Json) -> u64 {
    match v {
        Json::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().map(|f| f.round().max(0.0) as u64))
            .unwrap_or(0),
        Json::String(s) => s.trim().parse::<u64>().unwrap_or(0),
        _ => 0,
    }
}

fn de_u64<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(json_to_u64(&Json::deserialize(deserializer)?))
}

fn de_u32<'de, D>(deserializer: D) -> std::result::Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(json_to_u64(&Json::deserialize(deserializer)?).min(u32::MAX as u64) as u32)
}

fn de_vec_u64<'de, D>(deserializer: D) -> std::result::Result<Vec<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Json::deserialize(deserializer)? {
        Json::Array(arr) => Ok(arr.iter().map(json_to_u64).collect()),
        _ => Ok(Vec::new()),
    }
}

/// Header entry describing one payload chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldMeta {
    pub name: String,

    #[serde(default)]
    pub kind: String,

    #[serde(rename = "class", default)]
    pub class_name: String,

    #[serde(default, deserialize_with = "de_vec_u64")]
    pub shape: Vec<u64>,

    #[serde(default)]
    pub complex: bool,

    #[serde(default)]
    pub encoding: String,

    #[serde(default)]
    pub compression: String,

    #[serde(default, deserialize_with = "de_u64")]
    pub offset: u64,

    #[serde(default, deserialize_with = "de_u64")]
    pub csize: u64,

    #[serde(default, deserialize_with = "de_u64")]
    pub usize: u64,

    #[serde(default, deserialize_with = "de_u32")]
    pub crc32: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Header {
    #[serde(default)]
    pub format: String,

    #[serde(default)]
    pub magic: String,

    #[serde(default, deserialize_with = "de_u32")]
    pub version: u32,

    #[serde(default)]
    pub root: String,

    #[serde(default)]
    pub created_utc: String,

    #[serde(default)]
    pub fields: Vec<FieldMeta>,

    #[serde(default, deserialize_with = "de_u64")]
    pub payload_start: u64,

    #[serde(default, deserialize_with = "de_u64")]
    pub file_size: u64,

    #[serde(default)]
    pub header_crc32_hex: String,
}

impl Header {
    /// Absolute offset of the first payload byte. Older writers leave
    /// `payload_start` at zero; the payload then follows the header directly.
    pub fn payload_start(&self, header_len: usize) -> usize {
        match self.payload_start {
            0 => PREAMBLE_LEN + header_len,
            p => p as usize,
        }
    }
}

pub fn parse_header(json: &str) -> Result<Header, ParseError> {
    serde_json::from_str(json).map_err(|e| ParseError::Decode(format!("header JSON: {e}")))
}

pub fn compute_crc32(bytes: &[u8]) -> u32 {
    let mut h = Hasher::new();
    h.update(bytes);
    h.finalize()
}

/// Header text with its own CRC value zeroed, keeping the original spacing.
pub fn header_json_with_placeholder_crc(header_json: &str) -> String {
    let replaced = CRC_RE.replace(header_json, r#""header_crc32_hex"$1"00000000""#);
    if replaced.as_ref() == header_json {
        CRC_FALLBACK_RE
            .replace(header_json, r#""header_crc32_hex":"00000000""#)
            .to_string()
    } else {
        replaced.to_string()
    }
}

pub fn compute_header_crc32_hex(header_json: &str) -> String {
    let for_crc = header_json_with_placeholder_crc(header_json);
    format!("{:08X}", compute_crc32(for_crc.as_bytes()))
}

/// `None` when the header carries no CRC.
pub fn header_crc_ok(header: &Header, header_json: &str) -> Option<bool> {
    let expected = header.header_crc32_hex.trim();
    if expected.is_empty() {
        return None;
    }
    Some(expected.eq_ignore_ascii_case(&compute_header_crc32_hex(header_json)))
}
