//! Message signing for transports without native access control
//!
//! The signature is an HMAC-SHA256 keyed with the channel token over
//! `{message_type}|{sender_id}|{timestamp}`, hex encoded.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::config::AuthToken;
use crate::errors::AuthError;
use crate::message::{Envelope, Message};

type HmacSha256 = Hmac<Sha256>;

/// Signs outbound and verifies inbound envelopes with a shared token
#[derive(Clone)]
pub struct MessageSigner {
    token: AuthToken,
}

impl MessageSigner {
    pub fn new(token: AuthToken) -> Self {
        Self { token }
    }

    fn mac_for(&self, message: &Message) -> Result<HmacSha256, AuthError> {
        let mut mac = HmacSha256::new_from_slice(self.token.expose_secret().as_bytes())
            .map_err(|_| AuthError::InvalidKey)?;
        mac.update(signing_input(message).as_bytes());
        Ok(mac)
    }

    /// Hex signature for `message`
    pub fn sign(&self, message: &Message) -> Result<String, AuthError> {
        Ok(hex::encode(self.mac_for(message)?.finalize().into_bytes()))
    }

    /// Wrap `message` in a signed envelope
    pub fn seal(&self, message: Message) -> Result<Envelope, AuthError> {
        let signature = self.sign(&message)?;
        Ok(Envelope {
            message,
            signature: Some(signature),
        })
    }

    /// Check an envelope's signature in constant time
    pub fn verify(&self, envelope: &Envelope) -> Result<(), AuthError> {
        let signature = envelope
            .signature
            .as_deref()
            .ok_or(AuthError::MissingSignature)?;
        let expected = hex::decode(signature).map_err(|_| AuthError::MalformedSignature)?;
        self.mac_for(&envelope.message)?
            .verify_slice(&expected)
            .map_err(|_| AuthError::InvalidSignature)
    }
}

impl core::fmt::Debug for MessageSigner {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MessageSigner")
            .field("token", &self.token)
            .finish()
    }
}

fn signing_input(message: &Message) -> String {
    format!(
        "{}|{}|{}",
        message.message_type.as_tag(),
        message.sender_id,
        message.timestamp.as_millis()
    )
}
