//! Key/value layouts of the four lookup tables the packet path reads on
//! each outbound connect. The layouts are part of the kernel ABI: every
//! field is fixed-size, ports are big-endian, and IPv4 addresses sit in
//! the low four bytes of the 16-byte IP fields.

use crate::{MAX_PORT_NUM, MAX_SERVICE_NUM};

/// A virtual IP the packet path rewrites from: either a pod address or a
/// service address.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub struct FrontendKey {
    pub ip: [u8; 16],
}

#[cfg(feature = "user")]
unsafe impl aya::Pod for FrontendKey {}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub struct FrontendValue {
    /// Backend uid for pod addresses, service id for service addresses.
    pub upstream_id: u32,
}

#[cfg(feature = "user")]
unsafe impl aya::Pod for FrontendValue {}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub struct ServiceKey {
    pub service_id: u32,
}

#[cfg(feature = "user")]
unsafe impl aya::Pod for ServiceKey {}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub struct ServiceValue {
    /// Endpoint rows for this service occupy indexes `1..=endpoint_count`.
    pub endpoint_count: u32,
    pub lb_policy: u32,
    pub service_port: [u32; MAX_PORT_NUM],
    pub target_port: [u32; MAX_PORT_NUM],
    pub waypoint_addr: [u8; 16],
    pub waypoint_port: u32,
}

#[cfg(feature = "user")]
unsafe impl aya::Pod for ServiceValue {}

/// One slot binding a backend to a service.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub struct EndpointKey {
    pub service_id: u32,
    pub backend_index: u32,
}

#[cfg(feature = "user")]
unsafe impl aya::Pod for EndpointKey {}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub struct EndpointValue {
    pub backend_uid: u32,
}

#[cfg(feature = "user")]
unsafe impl aya::Pod for EndpointValue {}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub struct BackendKey {
    pub backend_uid: u32,
}

#[cfg(feature = "user")]
unsafe impl aya::Pod for BackendKey {}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub struct BackendValue {
    pub ip: [u8; 16],
    pub service_count: u32,
    pub services: [u32; MAX_SERVICE_NUM],
    pub waypoint_addr: [u8; 16],
    pub waypoint_port: u32,
}

#[cfg(feature = "user")]
unsafe impl aya::Pod for BackendValue {}
