//! Delta discovery envelope and the streaming client for it. The client
//! mirrors what tonic would generate for the aggregated discovery
//! service's delta method.

use std::collections::HashMap;

use http::uri::PathAndQuery;
use tonic::codec::{ProstCodec, Streaming};
use tonic::transport::{Channel, Endpoint};

/// Type-URL carried by workload and service resources.
pub const ADDRESS_TYPE: &str = "type.googleapis.com/istio.workload.Address";

/// Type-URL carried by authorization policy resources.
pub const AUTHORIZATION_TYPE: &str = "type.googleapis.com/istio.security.Authorization";

const DELTA_METHOD_PATH: &str =
    "/envoy.service.discovery.v3.AggregatedDiscoveryService/DeltaAggregatedResources";

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeltaDiscoveryRequest {
    #[prost(message, optional, tag = "1")]
    pub node: Option<Node>,
    #[prost(string, tag = "2")]
    pub type_url: String,
    #[prost(string, repeated, tag = "3")]
    pub resource_names_subscribe: Vec<String>,
    #[prost(string, repeated, tag = "4")]
    pub resource_names_unsubscribe: Vec<String>,
    #[prost(map = "string, string", tag = "5")]
    pub initial_resource_versions: HashMap<String, String>,
    #[prost(string, tag = "6")]
    pub response_nonce: String,
    #[prost(message, optional, tag = "7")]
    pub error_detail: Option<Status>,
}

impl DeltaDiscoveryRequest {
    /// Initial request opening a subscription for one type-URL. The empty
    /// subscribe list is a wildcard.
    pub fn subscribe(type_url: &str, node_id: &str) -> Self {
        Self {
            node: Some(Node {
                id: node_id.to_string(),
            }),
            type_url: type_url.to_string(),
            ..Default::default()
        }
    }

    /// Acknowledgment for a received response, echoing its nonce.
    pub fn ack(response: &DeltaDiscoveryResponse, node_id: &str) -> Self {
        Self {
            node: Some(Node {
                id: node_id.to_string(),
            }),
            type_url: response.type_url.clone(),
            response_nonce: response.nonce.clone(),
            ..Default::default()
        }
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeltaDiscoveryResponse {
    #[prost(string, tag = "1")]
    pub system_version_info: String,
    #[prost(message, repeated, tag = "2")]
    pub resources: Vec<Resource>,
    #[prost(string, tag = "4")]
    pub type_url: String,
    #[prost(string, tag = "5")]
    pub nonce: String,
    #[prost(string, repeated, tag = "6")]
    pub removed_resources: Vec<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Resource {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub version: String,
    #[prost(message, optional, tag = "3")]
    pub resource: Option<prost_types::Any>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Node {
    #[prost(string, tag = "1")]
    pub id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Status {
    #[prost(int32, tag = "1")]
    pub code: i32,
    #[prost(string, tag = "2")]
    pub message: String,
}

/// Bidirectional streaming client for the delta discovery channel.
#[derive(Debug, Clone)]
pub struct DiscoveryClient {
    inner: tonic::client::Grpc<Channel>,
}

impl DiscoveryClient {
    pub async fn connect<D>(dst: D) -> Result<Self, tonic::transport::Error>
    where
        D: TryInto<Endpoint>,
        D::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let conn = Endpoint::new(dst)?.connect().await?;
        Ok(Self {
            inner: tonic::client::Grpc::new(conn),
        })
    }

    pub async fn delta_aggregated_resources(
        &mut self,
        request: impl tonic::IntoStreamingRequest<Message = DeltaDiscoveryRequest>,
    ) -> Result<tonic::Response<Streaming<DeltaDiscoveryResponse>>, tonic::Status> {
        self.inner.ready().await.map_err(|e| {
            tonic::Status::unknown(format!("Service was not ready: {e}"))
        })?;
        let codec: ProstCodec<DeltaDiscoveryRequest, DeltaDiscoveryResponse> =
            ProstCodec::default();
        let path = PathAndQuery::from_static(DELTA_METHOD_PATH);
        self.inner
            .streaming(request.into_streaming_request(), path, codec)
            .await
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ack_echoes_nonce_and_type_url() {
        let response = DeltaDiscoveryResponse {
            type_url: ADDRESS_TYPE.to_string(),
            nonce: "n-42".to_string(),
            ..Default::default()
        };
        let ack = DeltaDiscoveryRequest::ack(&response, "node-a");
        assert_eq!(ack.type_url, ADDRESS_TYPE);
        assert_eq!(ack.response_nonce, "n-42");
        assert_eq!(ack.node.unwrap().id, "node-a");
        assert!(ack.resource_names_subscribe.is_empty());
        assert!(ack.error_detail.is_none());
    }

    #[test]
    fn subscribe_starts_with_empty_nonce() {
        let request = DeltaDiscoveryRequest::subscribe(AUTHORIZATION_TYPE, "node-a");
        assert_eq!(request.type_url, AUTHORIZATION_TYPE);
        assert!(request.response_nonce.is_empty());
        assert!(request.initial_resource_versions.is_empty());
    }
}
