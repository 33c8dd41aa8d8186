//! Rivet byte codec
//!
//! This crate provides the streaming layer of the Rivet marshalling engine:
//! - **Transports**: [`ByteInput`] / [`ByteOutput`] and their adapters
//! - **Codec**: buffered [`DataInput`] / [`DataOutput`] with modified UTF-8 strings
//! - **Limits**: [`LimitedByteInput`] / [`LimitedByteOutput`]
//! - **Push input**: [`push_channel`] for producer-fed streams
//! - **Headers**: [`StreamHeader`] preambles

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod byte_io;
pub mod error;
pub mod header;
pub mod input;
pub mod limited;
pub mod output;
pub mod push;
pub mod utf;

pub use byte_io::{ByteArrayInput, ByteInput, ByteOutput, ReaderInput, SharedByteOutput, WriterOutput};
pub use error::StreamError;
pub use header::{StaticStreamHeader, StreamHeader};
pub use input::DataInput;
pub use limited::{LimitedByteInput, LimitedByteOutput};
pub use output::{DataOutput, DEFAULT_BUFFER_SIZE};
pub use push::{push_channel, ConsumedCallback, PushByteInput, PushSender};
