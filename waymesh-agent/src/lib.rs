pub mod config;
pub mod rbac;
pub mod tables;
pub mod workload;
pub mod xds;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("map error: {0}")]
    MapError(#[from] aya::maps::MapError),

    #[error("decode error: {0}")]
    DecodeError(#[from] prost::DecodeError),

    #[error("transport error: {0}")]
    TransportError(#[from] tonic::transport::Error),

    #[error("stream error: {0}")]
    StreamError(#[from] tonic::Status),

    #[error("unsupported type url {0}")]
    UnsupportedTypeUrl(String),

    #[error("policy rejected: {0}")]
    PolicyRejected(String),

    #[error("unable to send discovery request due to channel error")]
    ChannelError,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
