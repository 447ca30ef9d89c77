//! VCDIFF (RFC 3284) delta encoding and decoding.
//!
//! The decoder is frame-fed and memory-bounded: it accepts input in
//! arbitrary chunks, holds at most one window of patch data plus one
//! source block, and streams reconstructed bytes to a sink. Only the
//! plain VCDIFF profile is handled (default code table, no secondary
//! compression, no copies from earlier target windows).
//!
//! The encoder side produces streams the decoder accepts and exists for
//! the companion sender and for tests.

pub mod address_cache;
pub mod code_table;
pub mod decoder;
pub mod encoder;
pub mod source;
pub mod varint;
pub mod window;

pub use decoder::{DecodeError, PatchDecoder};
pub use encoder::{WindowEncoder, encode_delta};
pub use source::{Adler32, BlockCache, FileBlockSource, PatchSource, adler32, adler32_reader};
pub use window::MAX_WINDOW_SIZE;
