//! Protocol module containing message types and the JSON codec.

pub mod codec;
pub mod messages;

pub use codec::{
    decode_client_message, encode_hub_message, wrap_binary_frame, ProtocolError,
    MAX_MESSAGE_BYTES,
};
pub use messages::*;
