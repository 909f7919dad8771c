//! Wire-level protocol types.
//!
//! This module defines the KRPC message model, the transaction id type and
//! its generator, and the boundary to the bencode codec.
mod codec;
mod message;
mod transaction_id;

pub use codec::{byte_string, decode, dict, encode, Dict, Value};
pub use message::{
    build_error, build_query, build_response, ErrorCode, Message, MessageKind, PeerError,
};
pub use transaction_id::{TransactionId, TransactionIdGenerator};

pub(crate) use message::{
    KEY_ARGUMENTS, KEY_ERROR, KEY_KIND, KEY_QUERY_NAME, KEY_RESULT, KEY_TRANSACTION_ID,
};
