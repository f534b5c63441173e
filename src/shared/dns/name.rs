use crate::shared::dns::bytes::*;
use crate::shared::dns::errors::*;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// A wrapper for domain names in their canonical form: ascii lowercase,
/// no trailing dot. The empty string represents the dns root. Names decoded
/// from the wire are canonicalized on the way in, so trie and cache keys
/// derived from a [`Name`] always compare consistently with the patterns
/// loaded from configuration. [`Name`] implements `AsRef<str>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Name(String);

impl AsRef<str> for Name {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Display for Name {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Name {
    const POINTER_BITS: u8 = 0b1100_0000;
    const MAX_JUMPS: u16 = 16;
    const MAX_NAME_LEN: usize = 255;
    const MAX_LABEL_LEN: u8 = 63;

    /// Canonicalize the passed text form: the trailing dot is stripped and
    /// ascii characters are lowercased. No further validation is performed,
    /// callers ingesting untrusted patterns go through [validate_domain].
    pub fn from_text(s: &str) -> Self {
        let s = s.strip_suffix('.').unwrap_or(s);
        Name(s.to_ascii_lowercase())
    }

    /// Decode a [`Name`] from its wire representation (a series of labels,
    /// each preceded by a length byte). Compression pointers are followed,
    /// with a cap on the number of jumps for safety.
    pub fn from_wire(reader: &mut Reader) -> Result<Self, WireErr> {
        let mut name = String::new();
        let mut pos_after_jump: usize = 0;
        let mut n_jumps: u16 = 0;

        loop {
            let len_byte = check_end(reader.read_u8())?;
            match len_byte & Self::POINTER_BITS {
                // Pointer: re-position the cursor to the referenced offset.
                // The position after the first jump must be restored at the end.
                0b1100_0000 => {
                    if n_jumps >= Self::MAX_JUMPS {
                        return Err(WireErr::MaxRedirections);
                    }
                    let second_byte = check_end(reader.read_u8())? as u16;
                    let offset = ((len_byte & !Self::POINTER_BITS) as u16) << 8 | second_byte;
                    if n_jumps == 0 {
                        pos_after_jump = reader.pos();
                    }
                    reader.seek(offset as usize);
                    n_jumps += 1;
                }
                // Plain label, possibly the terminating empty one.
                0b0000_0000 => {
                    if len_byte == 0 {
                        break;
                    }
                    if len_byte > Self::MAX_LABEL_LEN {
                        return Err(WireErr::LongLabel);
                    }
                    let label = check_end(reader.read_bytes(len_byte as usize))?;
                    if !label.is_ascii() {
                        return Err(WireErr::NotAscii);
                    }
                    if !name.is_empty() {
                        name.push('.');
                    }
                    for byte in label {
                        name.push(byte.to_ascii_lowercase() as char);
                    }
                    if name.len() > Self::MAX_NAME_LEN {
                        return Err(WireErr::LongName);
                    }
                }
                // Starting bits 10 and 01 are reserved.
                _ => return Err(WireErr::MalformedLabel),
            }
        }

        if pos_after_jump > 0 {
            reader.seek(pos_after_jump);
        }
        Ok(Name(name))
    }

    /// Encode the [`Name`] to its wire representation, uncompressed. Only
    /// messages synthesized by the engine go through this path.
    pub fn to_wire(&self, writer: &mut Writer) {
        if !self.0.is_empty() {
            for label in self.0.split('.') {
                writer.write_u8(label.len() as u8);
                writer.write_bytes(label.as_bytes());
            }
        }
        writer.write_u8(0);
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }
}

/// Errors returned validating domain patterns ingested from the
/// configuration files or the rules REST API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainErr {
    Empty,
    TooLong,
    EmptyLabel,
    LongLabel,
    BadChar(char),
    EdgeHyphen,
}

impl Display for DomainErr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            DomainErr::Empty => write!(f, "empty domain"),
            DomainErr::TooLong => write!(f, "domain longer than 253 characters"),
            DomainErr::EmptyLabel => write!(f, "empty label"),
            DomainErr::LongLabel => write!(f, "label longer than 63 characters"),
            DomainErr::BadChar(ch) => write!(f, "invalid character '{}'", ch),
            DomainErr::EdgeHyphen => write!(f, "label starts or ends with '-'"),
        }
    }
}

/// Validate a domain pattern: total length up to 253 characters, labels up
/// to 63 characters of alphanumerics and hyphens with no hyphen at either
/// edge. When `allow_wildcard` is set the pattern may begin with `*.`.
pub fn validate_domain(pattern: &str, allow_wildcard: bool) -> Result<(), DomainErr> {
    if pattern.is_empty() {
        return Err(DomainErr::Empty);
    }
    if pattern.len() > 253 {
        return Err(DomainErr::TooLong);
    }
    let domain = match allow_wildcard {
        true => pattern.strip_prefix("*.").unwrap_or(pattern),
        false => pattern,
    };
    if domain.is_empty() {
        return Err(DomainErr::EmptyLabel);
    }
    for label in domain.split('.') {
        validate_label(label)?;
    }
    Ok(())
}

fn validate_label(label: &str) -> Result<(), DomainErr> {
    if label.is_empty() {
        return Err(DomainErr::EmptyLabel);
    }
    if label.len() > 63 {
        return Err(DomainErr::LongLabel);
    }
    if let Some(ch) = label.chars().find(|ch| !ch.is_ascii_alphanumeric() && *ch != '-') {
        return Err(DomainErr::BadChar(ch));
    }
    if label.starts_with('-') || label.ends_with('-') {
        return Err(DomainErr::EdgeHyphen);
    }
    Ok(())
}
