//! Gateway-to-gateway forwarding (not supported)

use crate::error::{Error, Result};
use crate::message::{GatewayInfo, GatewayMsg, Response};
use crate::upstream::Upstream;

use super::{DownstreamSink, ProxyService};

impl<U: Upstream> ProxyService<U> {
    /// `SubscribeGateway`: always fails with [`Error::Unimplemented`]
    pub async fn subscribe_gateway<S>(&self, info: GatewayInfo, _sink: &mut S) -> Result<()>
    where
        S: DownstreamSink<GatewayMsg>,
    {
        tracing::warn!(gateway_id = info.gateway_id, "SubscribeGateway called on proxy");
        Err(Error::Unimplemented("SubscribeGateway"))
    }

    /// `ForwardToGateway`: always fails with [`Error::Unimplemented`]
    pub async fn forward_to_gateway(&self, msg: GatewayMsg) -> Result<Response> {
        tracing::warn!(src_id = msg.src_id, "ForwardToGateway called on proxy");
        Err(Error::Unimplemented("ForwardToGateway"))
    }
}
