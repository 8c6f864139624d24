//! GSTIN (Indian GST identification number) structure and checksum.
//!
//! Layout of the 15 characters:
//!
//! | pos    | meaning                               |
//! |--------|---------------------------------------|
//! | 0..2   | state code (01-38, 97, 99)            |
//! | 2..12  | PAN: 5 letters, 4 digits, 1 letter    |
//! | 12     | entity number, `[1-9A-Z]`             |
//! | 13     | always `Z`                            |
//! | 14     | check character                       |

use std::fmt;

use thiserror::Error;

const ALPHABET: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const GSTIN_LEN: usize = 15;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GstinError {
    #[error("expected 15 characters, got {0}")]
    Length(usize),
    #[error("unexpected character {0:?}")]
    Charset(char),
    #[error("unknown state code {0}")]
    StateCode(String),
    #[error("malformed PAN segment {0}")]
    Pan(String),
    #[error("entity number must be 1-9 or A-Z, got {0:?}")]
    Entity(char),
    #[error("14th character must be 'Z', got {0:?}")]
    MissingZ(char),
    #[error("checksum mismatch: expected {expected}, found {found}")]
    Checksum { expected: char, found: char },
}

/// A GSTIN that passed structural and checksum validation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Gstin(String);

impl Gstin {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn state_code(&self) -> &str {
        &self.0[..2]
    }

    pub fn pan(&self) -> &str {
        &self.0[2..12]
    }
}

impl fmt::Display for Gstin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Uppercase and drop all whitespace (OCR output often splits the number).
pub fn normalize(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_uppercase)
        .collect()
}

pub fn validate(raw: &str) -> Result<Gstin, GstinError> {
    let gstin = normalize(raw);
    let chars: Vec<char> = gstin.chars().collect();
    if chars.len() != GSTIN_LEN {
        return Err(GstinError::Length(chars.len()));
    }
    if let Some(&bad) = chars.iter().find(|c| !c.is_ascii_alphanumeric()) {
        return Err(GstinError::Charset(bad));
    }

    let state = &gstin[..2];
    let state_ok = state
        .parse::<u8>()
        .is_ok_and(|n| (1..=38).contains(&n) || n == 97 || n == 99);
    if !state_ok {
        return Err(GstinError::StateCode(state.to_string()));
    }

    let pan = &chars[2..12];
    let pan_ok = pan[..5].iter().all(char::is_ascii_uppercase)
        && pan[5..9].iter().all(char::is_ascii_digit)
        && pan[9].is_ascii_uppercase();
    if !pan_ok {
        return Err(GstinError::Pan(gstin[2..12].to_string()));
    }

    if chars[12] == '0' {
        return Err(GstinError::Entity(chars[12]));
    }
    if chars[13] != 'Z' {
        return Err(GstinError::MissingZ(chars[13]));
    }

    let expected = check_char(&gstin[..14]);
    if chars[14] != expected {
        return Err(GstinError::Checksum {
            expected,
            found: chars[14],
        });
    }

    Ok(Gstin(gstin))
}

/// Check character for the first 14 characters of a GSTIN.
///
/// Callers must pass uppercase ASCII alphanumerics only.
fn check_char(body: &str) -> char {
    let sum: usize = body
        .bytes()
        .enumerate()
        .map(|(i, b)| {
            let value = ALPHABET.iter().position(|&a| a == b).unwrap_or(0);
            let product = value * if i % 2 == 0 { 1 } else { 2 };
            product / 36 + product % 36
        })
        .sum();
    ALPHABET[(36 - sum % 36) % 36] as char
}

pub fn is_placeholder(value: &str, placeholders: &[String]) -> bool {
    let value = value.trim();
    placeholders
        .iter()
        .any(|p| p.trim().eq_ignore_ascii_case(value))
}

/// An invoice "has no GST" when the list is empty or holds only placeholders.
pub fn is_missing(gst_numbers: &[String], placeholders: &[String]) -> bool {
    gst_numbers.iter().all(|g| is_placeholder(g, placeholders))
}

/// Normalized, non-placeholder GSTINs in first-seen order, each once.
pub fn distinct(gst_numbers: &[String], placeholders: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(gst_numbers.len());
    for raw in gst_numbers.iter().filter(|g| !is_placeholder(g, placeholders)) {
        let number = normalize(raw);
        if !out.contains(&number) {
            out.push(number);
        }
    }
    out
}
