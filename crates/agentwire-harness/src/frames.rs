//! Frame builders for injecting inbound traffic

use alloc::vec::Vec;
use agentwire_core::{ChannelResult, Envelope, Message, MessageSigner};

/// Encode `message` without a signature
pub fn unsigned_frame(message: Message) -> ChannelResult<Vec<u8>> {
    Ok(Envelope::unsigned(message).encode()?)
}

/// Sign `message` with `signer` and encode it
pub fn signed_frame(signer: &MessageSigner, message: Message) -> ChannelResult<Vec<u8>> {
    Ok(signer.seal(message)?.encode()?)
}
