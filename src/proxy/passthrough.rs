//! Stateless unary forwarding

use crate::error::Result;
use crate::message::{ConfirmResponse, Demand, ProviderId, Response, RoutedMessage, Supply, Target};
use crate::upstream::Upstream;

use super::ProxyService;

impl<U: Upstream> ProxyService<U> {
    /// `NotifyDemand`: publish a demand, stamping it if the sender left the
    /// timestamp empty
    pub async fn notify_demand(&self, mut demand: Demand) -> Result<Response> {
        if demand.stamp_if_unset() {
            tracing::trace!(id = demand.id, "Stamped demand timestamp");
        }
        Ok(self.upstream.notify_demand(demand).await?)
    }

    /// `NotifySupply`: publish a supply, stamping it if the sender left the
    /// timestamp empty
    pub async fn notify_supply(&self, mut supply: Supply) -> Result<Response> {
        if supply.stamp_if_unset() {
            tracing::trace!(id = supply.id, "Stamped supply timestamp");
        }
        Ok(self.upstream.notify_supply(supply).await?)
    }

    pub async fn propose_demand(&self, demand: Demand) -> Result<Response> {
        Ok(self.upstream.propose_demand(demand).await?)
    }

    pub async fn propose_supply(&self, supply: Supply) -> Result<Response> {
        Ok(self.upstream.propose_supply(supply).await?)
    }

    pub async fn select_supply(&self, target: Target) -> Result<ConfirmResponse> {
        Ok(self.upstream.select_supply(target).await?)
    }

    pub async fn select_demand(&self, target: Target) -> Result<ConfirmResponse> {
        Ok(self.upstream.select_demand(target).await?)
    }

    pub async fn confirm(&self, target: Target) -> Result<Response> {
        Ok(self.upstream.confirm(target).await?)
    }

    /// `CloseAllChannels`: forwarded verbatim
    ///
    /// Local subscribers are not touched here. Only a request naming the
    /// proxy's own client id makes the broker end the proxy's upstream
    /// streams, and the fan-out tasks then end the local subscribers.
    pub async fn close_all_channels(&self, provider: ProviderId) -> Result<Response> {
        Ok(self.upstream.close_all_channels(provider).await?)
    }
}
