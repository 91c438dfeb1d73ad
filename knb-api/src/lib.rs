//! kubenetbench monitor gRPC API
//!
//! This crate defines the protocol between the benchmark controller and the
//! per-node monitor agents. The protobuf definitions are in `proto/monitor.proto`
//! and code-generated via `tonic-build`.
//!
//! The server half is generated as well so that tests can stand up in-process
//! monitors.

pub mod monitor {
    tonic::include_proto!("api");
}
