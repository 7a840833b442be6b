//! Delta discovery subscription loop: opens the stream, feeds each
//! response through the processor, and sends the acks back.

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use waymesh_api::discovery::{
    DeltaDiscoveryRequest, DiscoveryClient, ADDRESS_TYPE, AUTHORIZATION_TYPE,
};
use waymesh_common::tables::{
    BackendKey, BackendValue, EndpointKey, EndpointValue, FrontendKey, FrontendValue, ServiceKey,
    ServiceValue,
};

use crate::rbac::PolicyHandler;
use crate::tables::TableMap;
use crate::workload::processor::Processor;
use crate::{Error, Result};

pub async fn run<F, S, E, B, P>(
    address: String,
    mut processor: Processor<F, S, E, B>,
    mut policies: P,
    cancel: CancellationToken,
) -> Result<()>
where
    F: TableMap<Key = FrontendKey, Value = FrontendValue>,
    S: TableMap<Key = ServiceKey, Value = ServiceValue>,
    E: TableMap<Key = EndpointKey, Value = EndpointValue>,
    B: TableMap<Key = BackendKey, Value = BackendValue>,
    P: PolicyHandler,
{
    info!(address = %address, "connecting to discovery server");
    let mut client = DiscoveryClient::connect(address).await?;

    let (requests, receiver) = mpsc::channel(16);
    for type_url in [ADDRESS_TYPE, AUTHORIZATION_TYPE] {
        requests
            .send(DeltaDiscoveryRequest::subscribe(
                type_url,
                processor.node_id(),
            ))
            .await
            .map_err(|_| Error::ChannelError)?;
    }

    let mut responses = client
        .delta_aggregated_resources(ReceiverStream::new(receiver))
        .await?
        .into_inner();
    info!("subscribed to workload discovery");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("discovery loop cancelled");
                return Ok(());
            }
            message = responses.message() => {
                let Some(response) = message? else {
                    warn!("discovery stream closed by server");
                    return Ok(());
                };
                let ack = processor.process_delta(&response, &mut policies);
                if requests.send(ack).await.is_err() {
                    return Err(Error::ChannelError);
                }
            }
        }
    }
}
