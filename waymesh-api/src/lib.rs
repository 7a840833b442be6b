//! Message types for the delta discovery channel and the workload
//! resource model carried over it. Maintained by hand as prost derives
//! (mirroring the generated form) so the build needs no protoc.

pub mod discovery;
pub mod security;
pub mod workload;
