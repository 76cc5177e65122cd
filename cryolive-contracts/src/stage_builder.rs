use std::path::PathBuf;

use cryolive_model::session::StageParams;
use cryolive_model::StageKey;

/// The set of input files resolved for a stage invocation, typically the
/// output of the preceding stage's Job.
#[derive(Debug, Clone, Default)]
pub struct ResolvedInputs {
    pub files: Vec<PathBuf>,
    /// Stage-specific extra inputs keyed by a logical name (e.g. a particle
    /// star file accumulated across passes for Class2D).
    pub named: std::collections::HashMap<String, PathBuf>,
}

/// The pure output of a stage builder: everything the Command Executor and
/// Job Store need, and nothing else.
#[derive(Debug, Clone)]
pub struct StageBuildOutput {
    pub argv: Vec<String>,
    pub script: String,
    pub supports_gpu: bool,
    pub supports_mpi: bool,
    pub output_dir: PathBuf,
    /// Set when the `additional_arguments` free-form string was dropped
    /// wholesale for containing a shell metacharacter or a malformed
    /// flag-shaped token (§4.2, scenario 6): the rest of the argv is still
    /// built and submitted, but the caller should record a warning.
    pub dropped_additional_arguments: Option<String>,
}

/// Errors a stage builder can return. Never panics; invalid or dangerous
/// input always yields `BuilderError`, never a partially built argv.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BuilderError {
    #[error("unknown parameter key: {0}")]
    UnknownKey(String),
    #[error("missing required parameter: {0}")]
    MissingParam(String),
    #[error("invalid parameter value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
    #[error("additional argument rejected: {0}")]
    DangerousArgument(String),
}

/// Implemented once per entry in the closed `StageKey` enum. Pure: the same
/// `(params, resolved_inputs)` pair always produces the same output, and a
/// builder never touches the filesystem beyond creating its own output
/// directory.
pub trait StageBuilder: Send + Sync {
    fn stage_key(&self) -> StageKey;

    fn build(
        &self,
        project_root: &std::path::Path,
        job_index: u32,
        params: &StageParams,
        resolved_inputs: &ResolvedInputs,
    ) -> Result<StageBuildOutput, BuilderError>;
}
