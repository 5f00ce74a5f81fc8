//! Data-mesh join engine: relationship registry, join record store, and the
//! per-request orchestrator that stitches cross-service records together.

pub mod aggregate;
pub mod entity;
pub mod error;
pub mod migrations;
pub mod orchestrator;
pub mod pk;
pub mod registry;
pub mod seed;
pub mod store;

pub use error::DataMeshError;
pub use orchestrator::{
    BackendCall, BackendReply, CallContext, MeshOrchestrator, MeshOutcome, MeshRequest,
    ModeFlags, RelatedServiceClient,
};
pub use pk::{classify, PkKind, RecordPk};
pub use registry::{NewLogicModule, NewModel, RelationshipBinding, ServiceRegistry};
pub use store::{JoinOutcome, JoinStore, JoinWriteCtx};
