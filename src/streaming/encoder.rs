//! Section encoder.
//!
//! Turns "start section" / "send element" calls into frames pushed onto a
//! [`FrameSink`]. Sections are never closed explicitly: starting the next
//! section, or dropping the encoder, ends the current one.

use crate::config::CodecConfig;
use crate::error::{CodecError, Result};
use crate::streaming::channel::FrameSink;
use crate::streaming::protocol::{check_frame_size, encode_element, SectionHeader, SectionKind};
use bytes::Bytes;
use serde::Serialize;

/// Converts element and object values into payload bytes.
pub trait Marshaler: Send + Sync {
    fn marshal<T: Serialize + ?Sized>(&self, value: &T) -> Result<Bytes>;
}

/// Default marshaler: compact JSON via serde_json.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonMarshaler;

impl Marshaler for JsonMarshaler {
    fn marshal<T: Serialize + ?Sized>(&self, value: &T) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(value)?))
    }
}

/// Encoder state
pub struct SectionEncoder<S, M = JsonMarshaler> {
    sink: S,
    marshaler: M,
    config: CodecConfig,
    active: Option<SectionKind>,
}

impl<S: FrameSink> SectionEncoder<S> {
    pub fn new(sink: S) -> Self {
        Self::with_marshaler(sink, JsonMarshaler)
    }
}

impl<S: FrameSink, M: Marshaler> SectionEncoder<S, M> {
    pub fn with_marshaler(sink: S, marshaler: M) -> Self {
        Self {
            sink,
            marshaler,
            config: CodecConfig::default(),
            active: None,
        }
    }

    pub fn with_config(mut self, config: CodecConfig) -> Self {
        self.config = config;
        self
    }

    /// Kind of the section currently accepting elements, if any.
    /// Object sections close themselves, so this is never `Object`.
    pub fn active_kind(&self) -> Option<SectionKind> {
        self.active
    }

    pub async fn start_array_section(&mut self, section_type: &str, path: &[&str]) -> Result<()> {
        self.start_section(SectionKind::Array, section_type, path)
            .await
    }

    pub async fn start_map_section(&mut self, section_type: &str, path: &[&str]) -> Result<()> {
        self.start_section(SectionKind::Map, section_type, path)
            .await
    }

    /// Emit a complete Object section: header plus its single value.
    ///
    /// The value is marshaled first; if that fails nothing is written and
    /// the previously open section (if any) stays open.
    pub async fn object_section<T: Serialize + ?Sized>(
        &mut self,
        section_type: &str,
        path: &[&str],
        value: &T,
    ) -> Result<()> {
        let value = self.marshaler.marshal(value)?;
        self.raw_object_section(section_type, path, value).await
    }

    /// Like [`object_section`](Self::object_section) for pre-encoded bytes,
    /// which are forwarded unchanged.
    pub async fn raw_object_section(
        &mut self,
        section_type: &str,
        path: &[&str],
        value: impl Into<Bytes>,
    ) -> Result<()> {
        let value = value.into();
        let header = SectionHeader::new(SectionKind::Object, section_type, path);
        header.validate(self.config.max_frame_size, self.config.max_path_depth)?;
        check_frame_size(value.len(), self.config.max_frame_size)?;

        self.active = None;
        let mut frames = header.encode();
        frames.extend(encode_element(SectionKind::Object, "", value));
        tracing::debug!(section_type, "Encoding object section");
        self.write_frames(frames).await
    }

    /// Append an element to the open section. `name` is dropped for Array
    /// sections.
    ///
    /// On a marshal failure nothing is written and the section stays open.
    pub async fn send_element<T: Serialize + ?Sized>(&mut self, name: &str, value: &T) -> Result<()> {
        let kind = self.active.ok_or(CodecError::NoOpenSection)?;
        let value = self.marshaler.marshal(value)?;
        self.write_element(kind, name, value).await
    }

    /// Append pre-encoded bytes as an element, forwarded unchanged.
    pub async fn send_raw_element(&mut self, name: &str, value: impl Into<Bytes>) -> Result<()> {
        let kind = self.active.ok_or(CodecError::NoOpenSection)?;
        self.write_element(kind, name, value.into()).await
    }

    /// Give the sink back. Dropping it signals end of stream.
    pub fn into_sink(self) -> S {
        self.sink
    }

    async fn start_section(
        &mut self,
        kind: SectionKind,
        section_type: &str,
        path: &[&str],
    ) -> Result<()> {
        let header = SectionHeader::new(kind, section_type, path);
        header.validate(self.config.max_frame_size, self.config.max_path_depth)?;

        self.active = None;
        tracing::debug!(%kind, section_type, "Encoding section header");
        self.write_frames(header.encode()).await?;
        self.active = Some(kind);
        Ok(())
    }

    async fn write_element(&mut self, kind: SectionKind, name: &str, value: Bytes) -> Result<()> {
        check_frame_size(value.len(), self.config.max_frame_size)?;
        if kind.has_element_names() {
            check_frame_size(name.len(), self.config.max_frame_size)?;
        }
        self.write_frames(encode_element(kind, name, value)).await
    }

    async fn write_frames(&mut self, frames: Vec<Bytes>) -> Result<()> {
        for frame in frames {
            tracing::trace!(len = frame.len(), "Sending frame");
            self.sink.send_frame(frame).await?;
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
