//! Section decoder.
//!
//! Pulls frames off a [`FrameSource`] and publishes [`Section`]s as soon as
//! their headers are complete. Elements of the open Map/Array section are
//! pushed one at a time into that section's own handoff queue, so memory
//! stays bounded to the section in flight and backpressure reaches all the
//! way back to the encoder.
//!
//! ```text
//! Idle --marker--> AwaitingHeader --terminator--> SectionOpen(kind)
//!   ^                                                  |
//!   +------------- Object value / next marker ---------+
//! any state --source ends / protocol error--> Closed
//! ```

use crate::config::CodecConfig;
use crate::error::{CodecError, Result};
use crate::streaming::channel::{handoff, FrameSource, HandoffReceiver, HandoffSender};
use crate::streaming::protocol::{
    check_frame_size, decode_string, is_path_terminator, PacketType, SectionHeader, SectionKind,
};
use crate::streaming::section::{ArraySection, Element, MapSection, ObjectSection, Section};
use bytes::Bytes;
use futures::{FutureExt, Stream};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::task::JoinHandle;

/// Decode sections from `source` on a background task.
///
/// Must be called from within a tokio runtime.
pub fn decode_sections<R>(source: R) -> SectionStream
where
    R: FrameSource + 'static,
{
    decode_sections_with(source, CodecConfig::default())
}

pub fn decode_sections_with<R>(source: R, config: CodecConfig) -> SectionStream
where
    R: FrameSource + 'static,
{
    let (tx, rx) = handoff();
    let decoder = SectionDecoder::new(config, tx);
    let task = tokio::spawn(decoder.run(source));
    SectionStream { sections: rx, task }
}

// =============================================================================
// Section stream
// =============================================================================

/// Lazy, single-pass sequence of decoded sections.
///
/// Each Map/Array section must be read to the end or dropped before the
/// next section can be published.
pub struct SectionStream {
    sections: HandoffReceiver<Section>,
    task: JoinHandle<Result<()>>,
}

impl SectionStream {
    pub async fn next(&mut self) -> Option<Section> {
        self.sections.recv().await
    }

    /// Wait for the decoder to terminate and return its outcome.
    ///
    /// Meant to be called once the sequence is exhausted. Calling it early
    /// discards the remaining sections; the decoder keeps draining the
    /// frame source until the producer closes it. Sections still held by
    /// the caller must be read to the end or dropped first.
    pub async fn finish(self) -> Result<()> {
        let Self { sections, task } = self;
        drop(sections);
        match task.await {
            Ok(result) => result,
            Err(e) => Err(CodecError::protocol(format!("Decoder task failed: {}", e))),
        }
    }
}

impl Stream for SectionStream {
    type Item = Section;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Section>> {
        self.get_mut().sections.poll_recv(cx)
    }
}

// =============================================================================
// Decoder
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    /// Waiting for a marker, no section open
    Idle,
    /// Reading type and path frames
    AwaitingHeader,
    /// Map or Array section receiving elements
    SectionOpen(SectionKind),
    /// Terminal
    Closed,
}

/// Whether the decode loop should keep reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

struct OpenSection {
    kind: SectionKind,
    elements: HandoffSender<Element>,
}

/// Decoder state
pub struct SectionDecoder {
    config: CodecConfig,
    output: HandoffSender<Section>,
    current: Option<OpenSection>,
    state: DecoderState,
}

impl SectionDecoder {
    pub fn new(config: CodecConfig, output: HandoffSender<Section>) -> Self {
        Self {
            config,
            output,
            current: None,
            state: DecoderState::Idle,
        }
    }

    pub fn state(&self) -> DecoderState {
        self.state
    }

    /// Decode until the source ends or a protocol violation occurs.
    ///
    /// On a violation (or any panic inside the decode loop) the remaining
    /// frames are drained so the producer is never left blocked, and the
    /// error is returned.
    pub async fn run<R: FrameSource>(mut self, mut source: R) -> Result<()> {
        let outcome = AssertUnwindSafe(self.decode(&mut source))
            .catch_unwind()
            .await;
        let result = match outcome {
            Ok(result) => result,
            Err(panic) => Err(CodecError::protocol(format!(
                "Decoder fault: {}",
                panic_message(&*panic)
            ))),
        };

        self.close_current();
        self.set_state(DecoderState::Closed);
        // Ends the section sequence before draining
        drop(self);

        if let Err(e) = &result {
            tracing::error!("Section decoding aborted: {}", e);
        }
        if result.is_err() {
            let discarded = drain(&mut source).await;
            tracing::debug!(discarded, "Drained frame source after protocol error");
        }
        result
    }

    async fn decode<R: FrameSource>(&mut self, source: &mut R) -> Result<()> {
        loop {
            let Some(frame) = source.next_frame().await else {
                tracing::debug!("Frame source closed");
                return Ok(());
            };

            // Keep-alive
            if frame.is_empty() {
                tracing::trace!("Skipping empty frame");
                continue;
            }

            let packet = match PacketType::from_frame(&frame) {
                Some(packet) => packet,
                None if frame.len() == 1 => {
                    return Err(CodecError::protocol(format!(
                        "Unknown packet marker 0x{:02x}",
                        frame[0]
                    )));
                }
                None => {
                    return Err(CodecError::protocol(format!(
                        "Expected a 1-byte marker frame, got {} bytes",
                        frame.len()
                    )));
                }
            };

            let flow = match packet.section_kind() {
                Some(kind) => self.open_section(kind, source).await?,
                None => self.read_element(source).await?,
            };
            if flow == Flow::Stop {
                return Ok(());
            }
        }
    }

    async fn open_section<R: FrameSource>(
        &mut self,
        kind: SectionKind,
        source: &mut R,
    ) -> Result<Flow> {
        self.close_current();
        self.set_state(DecoderState::AwaitingHeader);

        let Some(header) = self.read_header(kind, source).await? else {
            tracing::debug!(%kind, "Frame source closed inside section header");
            return Ok(Flow::Stop);
        };

        match kind {
            SectionKind::Object => {
                let Some(value) = self.read_frame(source).await? else {
                    tracing::debug!("Frame source closed before object value");
                    return Ok(Flow::Stop);
                };
                let section =
                    Section::Object(ObjectSection::new(header.section_type, header.path, value));
                let flow = self.publish(section, source).await;
                self.set_state(DecoderState::Idle);
                Ok(flow)
            }
            SectionKind::Map | SectionKind::Array => {
                let (tx, rx) = handoff();
                let section = if kind == SectionKind::Map {
                    Section::Map(MapSection::new(header.section_type, header.path, rx))
                } else {
                    Section::Array(ArraySection::new(header.section_type, header.path, rx))
                };
                // Published before any of its elements are known
                let flow = self.publish(section, source).await;
                self.current = Some(OpenSection { kind, elements: tx });
                self.set_state(DecoderState::SectionOpen(kind));
                Ok(flow)
            }
        }
    }

    async fn read_header<R: FrameSource>(
        &mut self,
        kind: SectionKind,
        source: &mut R,
    ) -> Result<Option<SectionHeader>> {
        let Some(frame) = self.read_frame(source).await? else {
            return Ok(None);
        };
        let section_type = decode_string(frame, "section type")?;

        let mut path = Vec::new();
        loop {
            let Some(frame) = self.read_frame(source).await? else {
                return Ok(None);
            };
            if is_path_terminator(&frame) {
                break;
            }
            if path.len() >= self.config.max_path_depth {
                return Err(CodecError::protocol(format!(
                    "Section path exceeds {} segments",
                    self.config.max_path_depth
                )));
            }
            path.push(decode_string(frame, "path segment")?);
        }

        Ok(Some(SectionHeader {
            kind,
            section_type,
            path,
        }))
    }

    async fn read_element<R: FrameSource>(&mut self, source: &mut R) -> Result<Flow> {
        // Without a section the packet length is unknown, so only the marker
        // is dropped and whatever follows is read as the next marker
        let Some(kind) = self.current.as_ref().map(|c| c.kind) else {
            tracing::warn!("Element marker without an open section, discarding");
            return Ok(Flow::Continue);
        };

        let name = if kind.has_element_names() {
            match self.read_frame(source).await? {
                Some(frame) => decode_string(frame, "element name")?,
                None => return Ok(Flow::Stop),
            }
        } else {
            String::new()
        };
        let Some(value) = self.read_frame(source).await? else {
            return Ok(Flow::Stop);
        };

        if let Some(current) = &self.current {
            if current.elements.send(Element { name, value }).await.is_err() {
                tracing::debug!(%kind, "Section dropped by consumer, discarding element");
            }
        }
        Ok(Flow::Continue)
    }

    /// Next frame inside a packet. Empty frames are legitimate here.
    async fn read_frame<R: FrameSource>(&self, source: &mut R) -> Result<Option<Bytes>> {
        match source.next_frame().await {
            Some(frame) => {
                check_frame_size(frame.len(), self.config.max_frame_size)
                    .map_err(|e| CodecError::protocol(e.to_string()))?;
                Ok(Some(frame))
            }
            None => Ok(None),
        }
    }

    async fn publish<R: FrameSource>(&mut self, section: Section, source: &mut R) -> Flow {
        tracing::debug!(
            kind = %section.kind(),
            section_type = section.section_type(),
            "Section decoded"
        );
        if self.output.send(section).await.is_err() {
            tracing::debug!("Section consumer gone, draining frame source");
            drain(source).await;
            return Flow::Stop;
        }
        Flow::Continue
    }

    /// Dropping the element sender ends the section for its consumer.
    fn close_current(&mut self) {
        if let Some(section) = self.current.take() {
            tracing::trace!(kind = %section.kind, "Closing section");
        }
    }

    fn set_state(&mut self, state: DecoderState) {
        tracing::trace!(from = ?self.state, to = ?state, "Decoder state");
        self.state = state;
    }
}

/// Read and discard everything left in the source.
async fn drain<R: FrameSource>(source: &mut R) -> usize {
    let mut discarded = 0;
    while source.next_frame().await.is_some() {
        discarded += 1;
    }
    discarded
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::channel::frame_channel;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(1);

    fn frames(raw: &[&[u8]]) -> std::vec::IntoIter<Bytes> {
        raw.iter()
            .map(|f| Bytes::copy_from_slice(f))
            .collect::<Vec<_>>()
            .into_iter()
    }

    const MAP: &[u8] = &[PacketType::SectionMap as u8];
    const ARRAY: &[u8] = &[PacketType::SectionArray as u8];
    const OBJECT: &[u8] = &[PacketType::SectionObject as u8];
    const ELEMENT: &[u8] = &[PacketType::Element as u8];
    const END: &[u8] = &[0];

    #[tokio::test]
    async fn test_decode_map_and_object() {
        let mut stream = decode_sections(frames(&[
            MAP, b"m", b"p", END, ELEMENT, b"k", b"1", OBJECT, b"o", END, b"2",
        ]));

        let mut section = timeout(WAIT, stream.next()).await.unwrap().unwrap();
        let map = section.as_map().unwrap();
        assert_eq!(map.section_type(), "m");
        assert_eq!(map.path(), &["p".to_string()]);
        let (name, value) = map.next().await.unwrap();
        assert_eq!(name, "k");
        assert_eq!(value.as_ref(), b"1");
        assert!(map.next().await.is_none());

        let mut section = stream.next().await.unwrap();
        let object = section.as_object().unwrap();
        assert_eq!(object.section_type(), "o");
        assert!(object.path().is_empty());
        assert_eq!(object.value().unwrap().as_ref(), b"2");

        assert!(stream.next().await.is_none());
        stream.finish().await.unwrap();
    }

    #[tokio::test]
    async fn test_keepalive_frames_skipped_between_packets() {
        let mut stream = decode_sections(frames(&[
            b"", ARRAY, b"a", END, b"", ELEMENT, b"x", b"", b"",
        ]));

        let mut section = stream.next().await.unwrap();
        let array = section.as_array().unwrap();
        assert_eq!(array.next().await.unwrap().as_ref(), b"x");
        assert!(array.next().await.is_none());
        assert!(stream.next().await.is_none());
        stream.finish().await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_frames_inside_packet_are_values() {
        let mut stream = decode_sections(frames(&[MAP, b"", b"", END, ELEMENT, b"", b""]));

        let mut section = stream.next().await.unwrap();
        assert_eq!(section.section_type(), "");
        assert_eq!(section.path(), &[String::new()]);
        let (name, value) = section.as_map().unwrap().next().await.unwrap();
        assert!(name.is_empty());
        assert!(value.is_empty());
        stream.finish().await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_marker_is_protocol_error() {
        let (mut tx, rx) = frame_channel();
        let producer = tokio::spawn(async move {
            use crate::streaming::channel::FrameSink;
            tx.send_frame(Bytes::from_static(&[255])).await.unwrap();
            // Must still be accepted: the decoder drains after the error
            tx.send_frame(Bytes::from_static(&[0])).await.unwrap();
        });

        let mut stream = decode_sections(rx);
        assert!(timeout(WAIT, stream.next()).await.unwrap().is_none());
        let err = timeout(WAIT, stream.finish()).await.unwrap().unwrap_err();
        assert!(err.is_protocol());
        assert!(err.to_string().contains("0xff"));
        producer.await.unwrap();
    }

    #[tokio::test]
    async fn test_multibyte_marker_is_protocol_error() {
        let mut stream = decode_sections(frames(&[b"\x01\x01"]));
        assert!(stream.next().await.is_none());
        assert!(stream.finish().await.unwrap_err().is_protocol());
    }

    #[tokio::test]
    async fn test_truncated_header_ends_quietly() {
        let cases: [&[&[u8]]; 4] = [
            &[MAP],
            &[MAP, b"t"],
            &[OBJECT, b"t", b"p"],
            &[OBJECT, b"t", END],
        ];
        for raw in cases {
            let mut stream = decode_sections(frames(raw));
            assert!(timeout(WAIT, stream.next()).await.unwrap().is_none());
            timeout(WAIT, stream.finish()).await.unwrap().unwrap();
        }
    }

    #[tokio::test]
    async fn test_truncated_element_closes_section() {
        let mut stream = decode_sections(frames(&[MAP, b"m", END, ELEMENT, b"name-only"]));
        let mut section = stream.next().await.unwrap();
        assert!(timeout(WAIT, section.as_map().unwrap().next())
            .await
            .unwrap()
            .is_none());
        stream.finish().await.unwrap();
    }

    #[tokio::test]
    async fn test_element_without_section_discarded() {
        let mut stream = decode_sections(frames(&[ELEMENT, ARRAY, b"a", END, ELEMENT, b"1"]));
        let mut section = stream.next().await.unwrap();
        let array = section.as_array().unwrap();
        assert_eq!(array.next().await.unwrap().as_ref(), b"1");
        assert!(array.next().await.is_none());
        stream.finish().await.unwrap();
    }

    #[tokio::test]
    async fn test_element_after_object_is_protocol_error() {
        // Only the marker is dropped; the name frame is then read as a marker
        let mut stream = decode_sections(frames(&[
            OBJECT, b"t", END, b"v", ELEMENT, b"name", b"value",
        ]));

        let mut section = timeout(WAIT, stream.next()).await.unwrap().unwrap();
        assert_eq!(section.as_object().unwrap().value().unwrap().as_ref(), b"v");
        assert!(timeout(WAIT, stream.next()).await.unwrap().is_none());

        let err = timeout(WAIT, stream.finish()).await.unwrap().unwrap_err();
        assert!(err.is_protocol());
        assert!(err.to_string().contains("1-byte marker"));
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let config = CodecConfig {
            max_frame_size: 4,
            ..CodecConfig::default()
        };
        let mut stream = decode_sections_with(frames(&[ARRAY, b"too-long-type", END]), config);
        assert!(stream.next().await.is_none());
        assert!(stream.finish().await.unwrap_err().is_protocol());
    }

    #[tokio::test]
    async fn test_path_depth_limit() {
        let config = CodecConfig {
            max_path_depth: 1,
            ..CodecConfig::default()
        };
        let mut stream = decode_sections_with(frames(&[MAP, b"m", b"a", b"b", END]), config);
        assert!(stream.next().await.is_none());
        assert!(stream.finish().await.unwrap_err().is_protocol());
    }

    #[tokio::test]
    async fn test_invalid_utf8_type() {
        let mut stream = decode_sections(frames(&[MAP, &[0xC3, 0x28], END]));
        assert!(stream.next().await.is_none());
        assert!(stream.finish().await.unwrap_err().is_protocol());
    }

    #[tokio::test]
    async fn test_dropped_section_discards_elements() {
        let mut stream = decode_sections(frames(&[
            ARRAY, b"a", END, ELEMENT, b"1", ELEMENT, b"2", MAP, b"m", END,
        ]));

        let first = stream.next().await.unwrap();
        drop(first);

        let second = timeout(WAIT, stream.next()).await.unwrap().unwrap();
        assert_eq!(second.section_type(), "m");
        stream.finish().await.unwrap();
    }

    #[tokio::test]
    async fn test_dropped_stream_does_not_block_producer() {
        let (mut tx, rx) = frame_channel();
        let stream = decode_sections(rx);
        drop(stream);

        let producer = tokio::spawn(async move {
            use crate::streaming::channel::FrameSink;
            let script: [&[u8]; 10] = [MAP, b"m", END, ELEMENT, b"k", b"v", OBJECT, b"o", END, b"1"];
            for frame in script {
                tx.send_frame(Bytes::copy_from_slice(frame)).await?;
            }
            Ok::<_, CodecError>(())
        });
        timeout(WAIT, producer).await.unwrap().unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_finish_early_drains_source() {
        let mut stream = decode_sections(frames(&[
            MAP, b"m", END, ELEMENT, b"k", b"v", ARRAY, b"a", END,
        ]));
        let first = stream.next().await.unwrap();
        drop(first);
        timeout(WAIT, stream.finish()).await.unwrap().unwrap();
    }

    struct FaultySource {
        calls: usize,
    }

    #[async_trait]
    impl FrameSource for FaultySource {
        async fn next_frame(&mut self) -> Option<Bytes> {
            self.calls += 1;
            match self.calls {
                1 => Some(Bytes::from_static(MAP)),
                2 => panic!("transport fault"),
                _ => None,
            }
        }
    }

    #[tokio::test]
    async fn test_panic_becomes_protocol_error() {
        let mut stream = decode_sections(FaultySource { calls: 0 });
        assert!(stream.next().await.is_none());
        let err = stream.finish().await.unwrap_err();
        assert!(err.is_protocol());
        assert!(err.to_string().contains("transport fault"));
    }

    #[test]
    fn test_initial_state() {
        let (tx, _rx) = handoff();
        let decoder = SectionDecoder::new(CodecConfig::default(), tx);
        assert_eq!(decoder.state(), DecoderState::Idle);
    }
}
