//! Wire protocol shared by the relay server and its clients.
//!
//! Every record on the wire is one JSON envelope followed by a single `\n`.
//! [`codec`] turns envelopes into records and back, [`framing`] recovers
//! records from an arbitrarily chunked byte stream.

pub mod codec;
pub mod framing;

pub use codec::{
    decode, encode, encode_record, DecodeError, EncodeError, Envelope, MessageType, UserState,
    Vec3,
};
pub use framing::{FramingError, Reassembler};

/// Well-known relay port.
pub const DEFAULT_PORT: u16 = 7777;

/// Byte terminating every record. Never appears inside a compact JSON record.
pub const RECORD_DELIMITER: u8 = b'\n';

/// Longest record either end will buffer while waiting for its delimiter.
pub const MAX_RECORD_LEN: usize = 64 * 1024;

/// Size of the per-connection read buffer on both ends.
pub const READ_BUFFER_SIZE: usize = 4096;

/// How often a client transmits its latest pose.
pub const DEFAULT_SEND_INTERVAL_MS: u64 = 100;
