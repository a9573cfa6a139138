//! Frame protocol for section streaming.
//!
//! Frames are opaque byte sequences with no length prefix; meaning comes
//! entirely from position in the stream.
//!
//! ```text
//! Map/Array section:  marker | type | seg* | 0x00 | (Element | [name] | value)*
//! Object section:     marker | type | seg* | 0x00 | value
//! ```
//!
//! The type frame is always present, including for Object sections.
//! Zero-length frames between packets are keep-alives and are skipped.

use crate::error::{CodecError, Result};
use bytes::Bytes;
use std::fmt;

/// Single-byte frame that ends a section path.
pub const PATH_TERMINATOR: u8 = 0x00;

static PATH_TERMINATOR_FRAME: [u8; 1] = [PATH_TERMINATOR];

// =============================================================================
// Packet Types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    SectionMap = 0x01,
    SectionArray = 0x02,
    SectionObject = 0x03,
    Element = 0x04,
}

impl PacketType {
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(Self::SectionMap),
            0x02 => Some(Self::SectionArray),
            0x03 => Some(Self::SectionObject),
            0x04 => Some(Self::Element),
            _ => None,
        }
    }

    /// Parse a marker frame. Markers are exactly one byte long.
    pub fn from_frame(frame: &[u8]) -> Option<Self> {
        match frame {
            [b] => Self::from_u8(*b),
            _ => None,
        }
    }

    /// Section kind opened by this marker, `None` for `Element`.
    pub fn section_kind(self) -> Option<SectionKind> {
        match self {
            Self::SectionMap => Some(SectionKind::Map),
            Self::SectionArray => Some(SectionKind::Array),
            Self::SectionObject => Some(SectionKind::Object),
            Self::Element => None,
        }
    }

    pub fn frame(self) -> Bytes {
        Bytes::copy_from_slice(&[self as u8])
    }
}

// =============================================================================
// Section Kinds
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SectionKind {
    Map,
    Array,
    Object,
}

impl SectionKind {
    pub fn marker(self) -> PacketType {
        match self {
            Self::Map => PacketType::SectionMap,
            Self::Array => PacketType::SectionArray,
            Self::Object => PacketType::SectionObject,
        }
    }

    /// Whether elements of this kind carry a name frame.
    pub fn has_element_names(self) -> bool {
        self == Self::Map
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Map => "map",
            Self::Array => "array",
            Self::Object => "object",
        }
    }
}

impl fmt::Display for SectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Path frames
// =============================================================================

pub fn path_terminator() -> Bytes {
    Bytes::from_static(&PATH_TERMINATOR_FRAME)
}

/// A frame whose first byte is 0 ends the path.
pub fn is_path_terminator(frame: &[u8]) -> bool {
    frame.first() == Some(&PATH_TERMINATOR)
}

/// Reject segments that start or end with a NUL byte.
///
/// A leading NUL would read back as the path terminator. A trailing NUL is
/// reserved as well; NUL bytes inside a segment are fine.
pub fn validate_path_segment(segment: &str) -> Result<()> {
    let bytes = segment.as_bytes();
    if bytes.first() == Some(&PATH_TERMINATOR) || bytes.last() == Some(&PATH_TERMINATOR) {
        return Err(CodecError::InvalidPath(format!(
            "segment {:?} starts or ends with a NUL byte",
            segment
        )));
    }
    Ok(())
}

pub fn check_frame_size(size: usize, max: usize) -> Result<()> {
    if size > max {
        return Err(CodecError::FrameTooLarge { size, max });
    }
    Ok(())
}

// =============================================================================
// Section header
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionHeader {
    pub kind: SectionKind,
    pub section_type: String,
    pub path: Vec<String>,
}

impl SectionHeader {
    pub fn new(kind: SectionKind, section_type: &str, path: &[&str]) -> Self {
        Self {
            kind,
            section_type: section_type.to_string(),
            path: path.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Check the header can be written and read back unambiguously.
    pub fn validate(&self, max_frame_size: usize, max_path_depth: usize) -> Result<()> {
        if self.path.len() > max_path_depth {
            return Err(CodecError::InvalidPath(format!(
                "path has {} segments, maximum is {}",
                self.path.len(),
                max_path_depth
            )));
        }
        check_frame_size(self.section_type.len(), max_frame_size)?;
        for segment in &self.path {
            validate_path_segment(segment)?;
            check_frame_size(segment.len(), max_frame_size)?;
        }
        Ok(())
    }

    /// Marker, type, path segments and terminator, in wire order.
    pub fn encode(&self) -> Vec<Bytes> {
        let mut frames = Vec::with_capacity(3 + self.path.len());
        frames.push(self.kind.marker().frame());
        frames.push(Bytes::copy_from_slice(self.section_type.as_bytes()));
        for segment in &self.path {
            frames.push(Bytes::copy_from_slice(segment.as_bytes()));
        }
        frames.push(path_terminator());
        frames
    }
}

// =============================================================================
// Elements
// =============================================================================

/// Frames for one element of a section of the given kind.
///
/// Object values follow the header directly and carry no marker; Array
/// elements drop the name.
pub fn encode_element(kind: SectionKind, name: &str, value: Bytes) -> Vec<Bytes> {
    match kind {
        SectionKind::Object => vec![value],
        SectionKind::Array => vec![PacketType::Element.frame(), value],
        SectionKind::Map => vec![
            PacketType::Element.frame(),
            Bytes::copy_from_slice(name.as_bytes()),
            value,
        ],
    }
}

/// Decode a UTF-8 string frame (type, path segment or element name).
pub fn decode_string(frame: Bytes, what: &str) -> Result<String> {
    String::from_utf8(frame.to_vec())
        .map_err(|_| CodecError::protocol(format!("Invalid UTF-8 in {}", what)))
}

// =============================================================================
// Tests
// =============================================================================
