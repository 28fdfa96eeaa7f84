//! Message Router
//!
//! Recipient presence alone decides the delivery path: no recipient goes to
//! the driver's broadcast path, a recipient goes to its unicast path.

use std::sync::Arc;

use agentwire_core::{
    AgentId, ChannelError, ChannelResult, Envelope, Message, MessageSigner, TransportDriver,
};

/// Delivery path of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route<'a> {
    Broadcast,
    Unicast(&'a AgentId),
}

impl<'a> Route<'a> {
    pub fn of(message: &'a Message) -> Self {
        match &message.recipient_id {
            None => Route::Broadcast,
            Some(recipient) => Route::Unicast(recipient),
        }
    }
}

/// Frames outbound messages and hands them to the driver
pub(crate) struct MessageRouter {
    driver: Arc<dyn TransportDriver>,
    signer: Option<MessageSigner>,
}

impl MessageRouter {
    pub(crate) fn new(driver: Arc<dyn TransportDriver>, signer: Option<MessageSigner>) -> Self {
        Self { driver, signer }
    }

    fn frame(&self, message: &Message) -> ChannelResult<Vec<u8>> {
        let envelope = match &self.signer {
            Some(signer) => signer.seal(message.clone())?,
            None => Envelope::unsigned(message.clone()),
        };
        Ok(envelope.encode()?)
    }

    /// Deliver `message` and return the number of bytes handed to the driver
    pub(crate) async fn deliver(&self, message: &Message) -> ChannelResult<usize> {
        let frame = self.frame(message)?;
        let size = frame.len();
        match Route::of(message) {
            Route::Broadcast => self.driver.broadcast(frame).await,
            Route::Unicast(recipient) => self.driver.send_to(recipient, frame).await,
        }
        .map_err(ChannelError::from)?;
        Ok(size)
    }
}
