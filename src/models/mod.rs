//! Data models for the ingress proxy agent

pub mod desired;

pub use desired::*;
