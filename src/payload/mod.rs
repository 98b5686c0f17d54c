//! Response payload extraction: JSON base64 field → raw container bytes.

pub mod base64_stream;
pub mod field_scanner;

pub use base64_stream::Base64StreamDecoder;
pub use field_scanner::{FieldScanner, ScanState};
