//! Policy packages and the active-policy store
//!
//! - `package`: the versioned bundle format and its validation
//! - `layout`: where a stage keeps its pointer, packages, snapshots and state
//! - `store`: loads the active stage, serves it lock-free, hot-reloads it and
//!   persists learned bandit state

pub mod layout;
pub mod package;
mod store;

pub use layout::{ActivePointer, Stage, StageLayout, POINTER_FILE};
pub use package::{
    check_required_fields, AdapterRef, CachePolicy, FieldKind, PackageMetadata, PolicyComponent,
    PolicyPackage, PolicySet, RoutingPolicy, ToolPolicy, ValidationResult,
};
pub use store::{ActivePolicy, PolicyListener, PolicyStore, PolicyStoreConfig};
