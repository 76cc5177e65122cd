//! Trait surfaces shared between `cryolive-core` and `cryolive-server`:
//! stage builders, the persistence stores, the command executor, and the
//! opaque per-stage result adapter.

pub mod executor;
pub mod result_adapter;
pub mod stage_builder;
pub mod stores;

pub use executor::{CommandExecutor, ExecError, ExecOutput};
pub use result_adapter::{ResultAdapter, ResultAdapterError};
pub use stage_builder::{BuilderError, ResolvedInputs, StageBuildOutput, StageBuilder};
pub use stores::{ActivityStore, JobStore, SessionStore, StoreError, UserStore};
