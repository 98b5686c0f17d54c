//! Transport framing for streamed responses.

pub mod chunked;
pub mod source;

pub use chunked::{ChunkedBodyReader, TransportTimeouts};
pub use source::ChannelSource;
