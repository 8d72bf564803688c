//! Message bus relay
//!
//! Mbus traffic bypasses the fan-out registry: every `SubscribeMbus` call
//! opens its own upstream stream and relays it to exactly one caller.

use crate::error::Result;
use crate::message::{Mbus, MbusMsg, MbusStatus, Response};
use crate::upstream::{MessageStream, Upstream};

use super::{DownstreamSink, ProxyService};

impl<U: Upstream> ProxyService<U> {
    pub async fn create_mbus(&self, mbus: Mbus) -> Result<Mbus> {
        Ok(self.upstream.create_mbus(mbus).await?)
    }

    pub async fn send_mbus_msg(&self, msg: MbusMsg) -> Result<Response> {
        Ok(self.upstream.send_mbus_msg(msg).await?)
    }

    /// `SendMsg`: alias of [`send_mbus_msg`](Self::send_mbus_msg)
    pub async fn send_msg(&self, msg: MbusMsg) -> Result<Response> {
        self.send_mbus_msg(msg).await
    }

    pub async fn get_mbus_state(&self, mbus: Mbus) -> Result<MbusStatus> {
        Ok(self.upstream.get_mbus_state(mbus).await?)
    }

    pub async fn close_mbus(&self, mbus: Mbus) -> Result<Response> {
        Ok(self.upstream.close_mbus(mbus).await?)
    }

    /// `SubscribeMbus`: relay one upstream Mbus stream to `sink`
    ///
    /// Runs until the bus is closed upstream (`Ok`), the upstream stream
    /// fails, or `sink` rejects a message.
    pub async fn subscribe_mbus<S>(&self, mbus: Mbus, sink: &mut S) -> Result<()>
    where
        S: DownstreamSink<MbusMsg>,
    {
        let mbus_id = mbus.mbus_id;
        let mut stream = self.upstream.subscribe_mbus(mbus).await?;
        tracing::debug!(mbus_id = mbus_id, "Mbus relay started");

        let mut relayed = 0u64;
        while let Some(msg) = stream.recv().await? {
            if let Err(e) = sink.send(msg).await {
                tracing::debug!(mbus_id = mbus_id, relayed = relayed, error = %e, "Mbus relay stopped");
                return Err(e.into());
            }
            relayed += 1;
        }

        tracing::debug!(mbus_id = mbus_id, relayed = relayed, "Mbus closed upstream");
        Ok(())
    }
}
