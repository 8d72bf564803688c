//! Downstream stream abstraction

use std::future::Future;

use tokio::sync::mpsc;

use crate::error::SendError;

/// Write half of a server-streaming response to one local subscriber
///
/// The transport implements this over its response stream; a failed send
/// means the subscriber is gone.
pub trait DownstreamSink<M>: Send {
    fn send(&mut self, message: M) -> impl Future<Output = Result<(), SendError>> + Send;
}

impl<M: Send + 'static> DownstreamSink<M> for mpsc::Sender<M> {
    async fn send(&mut self, message: M) -> Result<(), SendError> {
        mpsc::Sender::send(self, message)
            .await
            .map_err(|_| SendError::disconnected())
    }
}

impl<M: Send + 'static> DownstreamSink<M> for mpsc::UnboundedSender<M> {
    async fn send(&mut self, message: M) -> Result<(), SendError> {
        mpsc::UnboundedSender::send(self, message).map_err(|_| SendError::disconnected())
    }
}
