//! Protocol module containing frame types and the text codec.

pub mod codec;
pub mod frames;

pub use codec::{decode_frame, encode_frame, encode_handshake_request, FrameDecoder};
pub use frames::*;
