//! Data models for fieldsync

mod operation;
mod snapshot;

pub use operation::{
    resource_key_from_payload, NewOperation, Operation, OperationId, OperationKind,
    OperationPatch, OperationStatus,
};
pub use snapshot::{entity_resource_key, EntitySnapshot};
