//! Workload and service resources as delivered by the discovery server.
//! Both resource kinds share the `Address` envelope and type-URL.

/// Wrapper around either a workload or a service resource.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Address {
    #[prost(oneof = "address::Type", tags = "1, 2")]
    pub r#type: Option<address::Type>,
}

pub mod address {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Type {
        #[prost(message, tag = "1")]
        Workload(super::Workload),
        #[prost(message, tag = "2")]
        Service(super::Service),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Workload {
    /// Globally unique identifier, `<cluster>/<group>/<kind>/<namespace>/<name>`.
    #[prost(string, tag = "1")]
    pub uid: String,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(string, tag = "3")]
    pub namespace: String,
    /// Raw workload addresses, 4 bytes for IPv4 or 16 for IPv6.
    #[prost(bytes = "vec", repeated, tag = "4")]
    pub addresses: Vec<Vec<u8>>,
    /// Resource names (`namespace/hostname`) of the services this
    /// workload is a member of.
    #[prost(string, repeated, tag = "5")]
    pub services: Vec<String>,
    #[prost(message, optional, tag = "6")]
    pub waypoint: Option<GatewayAddress>,
    #[prost(enumeration = "NetworkMode", tag = "7")]
    pub network_mode: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Service {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub namespace: String,
    #[prost(string, tag = "3")]
    pub hostname: String,
    #[prost(message, repeated, tag = "4")]
    pub addresses: Vec<NetworkAddress>,
    #[prost(message, repeated, tag = "5")]
    pub ports: Vec<Port>,
    #[prost(message, optional, tag = "6")]
    pub waypoint: Option<GatewayAddress>,
}

impl Service {
    /// The name services are keyed by everywhere else in the system.
    pub fn resource_name(&self) -> String {
        format!("{}/{}", self.namespace, self.hostname)
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NetworkAddress {
    #[prost(string, tag = "1")]
    pub network: String,
    #[prost(bytes = "vec", tag = "2")]
    pub address: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Port {
    #[prost(uint32, tag = "1")]
    pub service_port: u32,
    #[prost(uint32, tag = "2")]
    pub target_port: u32,
}

/// A waypoint proxy traffic must be routed through before reaching its
/// destination.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GatewayAddress {
    #[prost(message, optional, tag = "1")]
    pub address: Option<NetworkAddress>,
    #[prost(uint32, tag = "2")]
    pub hbone_mtls_port: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum NetworkMode {
    /// The workload owns its own addresses.
    Standard = 0,
    /// The workload shares the node's addresses; those must never be
    /// rewritten by the packet path.
    HostNetwork = 1,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn resource_name_joins_namespace_and_hostname() {
        let service = Service {
            namespace: "default".into(),
            hostname: "echo.default.svc.cluster.local".into(),
            ..Default::default()
        };
        assert_eq!(
            service.resource_name(),
            "default/echo.default.svc.cluster.local"
        );
    }

    #[test]
    fn unknown_network_mode_falls_back_to_standard() {
        let workload = Workload {
            network_mode: 42,
            ..Default::default()
        };
        assert_eq!(workload.network_mode(), NetworkMode::Standard);
    }
}
