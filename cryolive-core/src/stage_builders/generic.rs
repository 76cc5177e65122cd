use std::path::PathBuf;

use cryolive_contracts::{BuilderError, ResolvedInputs, StageBuildOutput, StageBuilder};
use cryolive_model::session::StageParams;
use cryolive_model::StageKey;

use super::common::{derive_output_dir, parse_additional_arguments};

/// A builder for the stage keys the live session orchestrator never
/// submits itself (Class3D, InitialModel, AutoRefine, and the rest of the
/// closed enum). It honors the same sanitization contract as the live
/// stages so the Job Store and Command Executor can treat every Job
/// uniformly regardless of which pipeline produced it.
pub struct GenericBuilder {
    stage: StageKey,
}

impl GenericBuilder {
    pub fn new(stage: StageKey) -> Self {
        Self { stage }
    }
}

impl StageBuilder for GenericBuilder {
    fn stage_key(&self) -> StageKey {
        self.stage
    }

    fn build(
        &self,
        project_root: &std::path::Path,
        job_index: u32,
        params: &StageParams,
        resolved_inputs: &ResolvedInputs,
    ) -> Result<StageBuildOutput, BuilderError> {
        let output_dir = derive_output_dir(project_root, self.stage.as_str(), job_index)
            .map_err(|e| BuilderError::InvalidValue {
                key: "output_dir".to_string(),
                reason: e.to_string(),
            })?;

        let mut argv = vec![self.stage.as_str().to_lowercase()];
        for file in &resolved_inputs.files {
            argv.push(file.to_string_lossy().into_owned());
        }
        let mut dropped_additional_arguments = None;
        if let Some(extra) = &params.additional_arguments {
            let (tokens, dropped) = parse_additional_arguments(extra);
            argv.extend(tokens);
            dropped_additional_arguments = dropped;
        }

        let script = render_script(&self.stage, &output_dir, &argv);

        Ok(StageBuildOutput {
            argv,
            script,
            supports_gpu: false,
            supports_mpi: false,
            output_dir,
            dropped_additional_arguments,
        })
    }
}

pub(super) fn render_script(stage: &StageKey, output_dir: &PathBuf, argv: &[String]) -> String {
    format!(
        "#!/bin/bash\n#SBATCH --job-name={stage}\n#SBATCH --output={dir}/slurm-%j.out\n#SBATCH --error={dir}/slurm-%j.err\ncd {dir}\n{cmd}\n",
        stage = stage,
        dir = output_dir.display(),
        cmd = argv.join(" "),
    )
}
