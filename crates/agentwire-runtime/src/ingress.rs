//! Inbound frame processing
//!
//! decode -> verify signature (when the transport needs it) -> validate schema.
//! Any failure rejects the frame; the caller logs and drops it.

use agentwire_core::{ChannelResult, Envelope, Message, MessageSigner, MessageValidator};

pub(crate) struct Ingress {
    signer: Option<MessageSigner>,
    validator: MessageValidator,
}

impl Ingress {
    pub(crate) fn new(signer: Option<MessageSigner>, validator: MessageValidator) -> Self {
        Self { signer, validator }
    }

    pub(crate) fn accept(&self, frame: &[u8]) -> ChannelResult<Message> {
        let envelope = Envelope::decode(frame)?;
        if let Some(signer) = &self.signer {
            signer.verify(&envelope)?;
        }
        self.validator.validate(&envelope.message)?;
        Ok(envelope.message)
    }
}
