//! Voxline call handler service.
//!
//! Ties the workspace together: the per-call [`pipeline`], the TCP
//! [`server`] that accepts PBX connections and spawns pipelines, the
//! [`admin`] HTTP surface (health + metrics), and the [`bootstrap`]
//! composition root that wires concrete engines into the ports.

pub mod admin;
pub mod bootstrap;
pub mod pipeline;
pub mod registry;
pub mod server;

pub use pipeline::{CallEnd, CallEvent, CallPipeline, PipelineConfig, PipelineDeps};
pub use registry::CallRegistry;
pub use server::{CallServer, ServerConfig};
