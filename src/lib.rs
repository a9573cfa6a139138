//! # sectionwire
//!
//! Streams a hierarchical result (a sequence of Map, Array and Object
//! sections) over an ordered channel of opaque binary frames, and rebuilds
//! it on the other side without buffering the whole result.
//!
//! ## Crate layout
//! - `streaming`: frame protocol, handoff channels, encoder and decoder
//! - `bus`: request/response types and the `Bus` trait the codec sits behind
//! - `config`: TOML-loadable codec limits
//! - `error`: `CodecError` and the crate `Result`
//!
//! ## Quick start
//!
//! ```
//! use sectionwire::streaming::{decode_sections, frame_channel, SectionEncoder};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> sectionwire::Result<()> {
//! let (tx, rx) = frame_channel();
//!
//! let producer = tokio::spawn(async move {
//!     let mut enc = SectionEncoder::new(tx);
//!     enc.start_map_section("users", &["active"]).await?;
//!     enc.send_element("id1", &serde_json::json!({"name": "Ann"})).await?;
//!     Ok::<(), sectionwire::CodecError>(())
//! });
//!
//! let mut sections = decode_sections(rx);
//! while let Some(mut section) = sections.next().await {
//!     println!("{}", section.to_json().await?);
//! }
//! sections.finish().await?;
//! producer.await.expect("producer task")?;
//! # Ok(())
//! # }
//! ```

pub mod bus;
pub mod config;
pub mod error;
pub mod streaming;

pub use config::CodecConfig;
pub use error::{CodecError, Result};
pub use streaming::{
    decode_sections, frame_channel, Section, SectionEncoder, SectionKind, SectionStream,
};
