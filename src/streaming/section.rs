//! Decoded sections.
//!
//! A [`Section`] is handed to the consumer as soon as its header is known.
//! Map and Array sections then stream their elements lazily, one handoff at
//! a time, until the decoder sees the next section marker or the frame
//! source ends.

use crate::error::Result;
use crate::streaming::channel::HandoffReceiver;
use crate::streaming::protocol::SectionKind;
use bytes::Bytes;

/// A single element travelling from the decoder to a section consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    /// Empty for Array sections
    pub name: String,
    pub value: Bytes,
}

#[derive(Debug)]
pub enum Section {
    Map(MapSection),
    Array(ArraySection),
    Object(ObjectSection),
}

#[derive(Debug)]
pub struct MapSection {
    section_type: String,
    path: Vec<String>,
    elements: HandoffReceiver<Element>,
}

#[derive(Debug)]
pub struct ArraySection {
    section_type: String,
    path: Vec<String>,
    elements: HandoffReceiver<Element>,
}

#[derive(Debug)]
pub struct ObjectSection {
    section_type: String,
    path: Vec<String>,
    value: Option<Bytes>,
}

impl MapSection {
    pub(crate) fn new(
        section_type: String,
        path: Vec<String>,
        elements: HandoffReceiver<Element>,
    ) -> Self {
        Self {
            section_type,
            path,
            elements,
        }
    }

    pub fn section_type(&self) -> &str {
        &self.section_type
    }

    pub fn path(&self) -> &[String] {
        &self.path
    }

    /// Next `(name, value)` pair, `None` once the section is closed.
    pub async fn next(&mut self) -> Option<(String, Bytes)> {
        self.elements.recv().await.map(|e| (e.name, e.value))
    }
}

impl ArraySection {
    pub(crate) fn new(
        section_type: String,
        path: Vec<String>,
        elements: HandoffReceiver<Element>,
    ) -> Self {
        Self {
            section_type,
            path,
            elements,
        }
    }

    pub fn section_type(&self) -> &str {
        &self.section_type
    }

    pub fn path(&self) -> &[String] {
        &self.path
    }

    /// Next value, `None` once the section is closed.
    pub async fn next(&mut self) -> Option<Bytes> {
        self.elements.recv().await.map(|e| e.value)
    }
}

impl ObjectSection {
    pub(crate) fn new(section_type: String, path: Vec<String>, value: Bytes) -> Self {
        Self {
            section_type,
            path,
            value: Some(value),
        }
    }

    pub fn section_type(&self) -> &str {
        &self.section_type
    }

    pub fn path(&self) -> &[String] {
        &self.path
    }

    /// The section's value. Returned once; later calls yield `None`.
    pub fn value(&mut self) -> Option<Bytes> {
        self.value.take()
    }
}

impl Section {
    pub fn kind(&self) -> SectionKind {
        match self {
            Self::Map(_) => SectionKind::Map,
            Self::Array(_) => SectionKind::Array,
            Self::Object(_) => SectionKind::Object,
        }
    }

    pub fn section_type(&self) -> &str {
        match self {
            Self::Map(s) => s.section_type(),
            Self::Array(s) => s.section_type(),
            Self::Object(s) => s.section_type(),
        }
    }

    pub fn path(&self) -> &[String] {
        match self {
            Self::Map(s) => s.path(),
            Self::Array(s) => s.path(),
            Self::Object(s) => s.path(),
        }
    }

    pub fn as_map(&mut self) -> Option<&mut MapSection> {
        match self {
            Self::Map(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&mut self) -> Option<&mut ArraySection> {
        match self {
            Self::Array(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&mut self) -> Option<&mut ObjectSection> {
        match self {
            Self::Object(s) => Some(s),
            _ => None,
        }
    }

    /// Render as `{"type":…,"path":[…],"elements":…}`.
    ///
    /// Consumes whatever elements have not been read yet. `type` and `path`
    /// are left out when empty, `elements` when there are none. Element
    /// payloads are copied byte for byte, so they must already be JSON.
    pub async fn to_json_bytes(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        out.push(b'{');
        let mut first = true;
        let mut field = |out: &mut Vec<u8>, name: &str| {
            if !std::mem::take(&mut first) {
                out.push(b',');
            }
            out.extend_from_slice(b"\"");
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b"\":");
        };

        if !self.section_type().is_empty() {
            field(&mut out, "type");
            serde_json::to_writer(&mut out, self.section_type())?;
        }
        if !self.path().is_empty() {
            field(&mut out, "path");
            serde_json::to_writer(&mut out, self.path())?;
        }

        match self {
            Self::Map(s) => {
                let mut count = 0;
                while let Some((name, value)) = s.next().await {
                    if count == 0 {
                        field(&mut out, "elements");
                        out.push(b'{');
                    } else {
                        out.push(b',');
                    }
                    serde_json::to_writer(&mut out, &name)?;
                    out.push(b':');
                    out.extend_from_slice(&value);
                    count += 1;
                }
                if count > 0 {
                    out.push(b'}');
                }
            }
            Self::Array(s) => {
                let mut count = 0;
                while let Some(value) = s.next().await {
                    if count == 0 {
                        field(&mut out, "elements");
                        out.push(b'[');
                    } else {
                        out.push(b',');
                    }
                    out.extend_from_slice(&value);
                    count += 1;
                }
                if count > 0 {
                    out.push(b']');
                }
            }
            Self::Object(s) => {
                if let Some(value) = s.value() {
                    field(&mut out, "elements");
                    out.extend_from_slice(&value);
                }
            }
        }

        out.push(b'}');
        Ok(out)
    }

    /// [`to_json_bytes`](Self::to_json_bytes) as a `String`. Payload bytes
    /// that are not valid UTF-8 are replaced with U+FFFD.
    pub async fn to_json(&mut self) -> Result<String> {
        let bytes = self.to_json_bytes().await?;
        Ok(match String::from_utf8(bytes) {
            Ok(json) => json,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
