//! Section streaming codec.
//!
//! Carries a sequence of named sections over a flat channel of opaque
//! frames. Two tasks cooperate through an unbuffered frame queue:
//!
//! ```text
//! +--------------+  frames  +--------------+  sections  +------------+
//! |   Encoder    | -------> |   Decoder    | ---------> |  Consumer  |
//! | (producer)   | handoff  | (decode task)|  handoff   |            |
//! +--------------+          +--------------+            +------------+
//!                                  |  elements (one handoff per open section)
//!                                  +-----------------------------^
//! ```
//!
//! Every hop is a rendezvous, so the producer can never run ahead of the
//! consumer and memory stays bounded to one section in flight.

pub mod channel;
pub mod decoder;
pub mod encoder;
pub mod protocol;
pub mod section;

pub use channel::{
    frame_channel, handoff, FrameReceiver, FrameSender, FrameSink, FrameSource, HandoffReceiver,
    HandoffSender,
};
pub use decoder::{
    decode_sections, decode_sections_with, DecoderState, SectionDecoder, SectionStream,
};
pub use encoder::{JsonMarshaler, Marshaler, SectionEncoder};
pub use protocol::{PacketType, SectionHeader, SectionKind, PATH_TERMINATOR};
pub use section::{ArraySection, Element, MapSection, ObjectSection, Section};
