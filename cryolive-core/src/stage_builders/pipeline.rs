use cryolive_contracts::{BuilderError, ResolvedInputs, StageBuildOutput, StageBuilder};
use cryolive_model::session::StageParams;
use cryolive_model::StageKey;

use super::common::parse_additional_arguments;
use super::generic::render_script;

fn number_param(params: &StageParams, key: &str) -> Result<Option<f64>, BuilderError> {
    match params.values.get(key) {
        None => Ok(None),
        Some(v) => v.as_f64().map(Some).ok_or_else(|| BuilderError::InvalidValue {
            key: key.to_string(),
            reason: "expected a number".to_string(),
        }),
    }
}

fn bool_param(params: &StageParams, key: &str) -> Result<bool, BuilderError> {
    match params.values.get(key) {
        None => Ok(false),
        Some(v) => v.as_bool().ok_or_else(|| BuilderError::InvalidValue {
            key: key.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}

fn check_unknown_keys(params: &StageParams, allowed: &[&str]) -> Result<(), BuilderError> {
    for key in params.values.keys() {
        if !allowed.contains(&key.as_str()) {
            return Err(BuilderError::UnknownKey(key.clone()));
        }
    }
    Ok(())
}

/// Builds the argv and, if the free-form `additional_arguments` string was
/// dangerous, the original string that was dropped (scenario 6).
fn build_argv(
    binary: &str,
    resolved_inputs: &ResolvedInputs,
    params: &StageParams,
    flags: Vec<String>,
) -> (Vec<String>, Option<String>) {
    let mut argv = vec![binary.to_string()];
    argv.extend(flags);
    for file in &resolved_inputs.files {
        argv.push(file.to_string_lossy().into_owned());
    }
    let mut dropped = None;
    if let Some(extra) = &params.additional_arguments {
        let (tokens, was_dropped) = parse_additional_arguments(extra);
        argv.extend(tokens);
        dropped = was_dropped;
    }
    (argv, dropped)
}

macro_rules! stage_builder {
    ($name:ident, $key:expr, $binary:expr, $allowed:expr, $flags_fn:expr) => {
        pub struct $name;

        impl StageBuilder for $name {
            fn stage_key(&self) -> StageKey {
                $key
            }

            fn build(
                &self,
                project_root: &std::path::Path,
                job_index: u32,
                params: &StageParams,
                resolved_inputs: &ResolvedInputs,
            ) -> Result<StageBuildOutput, BuilderError> {
                check_unknown_keys(params, $allowed)?;
                let output_dir = derive_output_dir($key.as_str(), project_root, job_index)?;
                let flags = $flags_fn(params)?;
                let (argv, dropped_additional_arguments) =
                    build_argv($binary, resolved_inputs, params, flags);
                let script = render_script(&$key, &output_dir, &argv);
                Ok(StageBuildOutput {
                    argv,
                    script,
                    supports_gpu: supports_gpu_for($key),
                    supports_mpi: supports_mpi_for($key),
                    output_dir,
                    dropped_additional_arguments,
                })
            }
        }
    };
}

fn derive_output_dir(
    stage_name: &str,
    project_root: &std::path::Path,
    job_index: u32,
) -> Result<std::path::PathBuf, BuilderError> {
    super::common::derive_output_dir(project_root, stage_name, job_index).map_err(|e| {
        BuilderError::InvalidValue {
            key: "output_dir".to_string(),
            reason: e.to_string(),
        }
    })
}

fn supports_gpu_for(key: StageKey) -> bool {
    matches!(
        key,
        StageKey::MotionCorr | StageKey::CtfFind | StageKey::AutoPick | StageKey::Class2D
    )
}

fn supports_mpi_for(key: StageKey) -> bool {
    matches!(key, StageKey::CtfFind | StageKey::AutoPick | StageKey::Class2D)
}

stage_builder!(
    ImportBuilder,
    StageKey::Import,
    "relion_import",
    &["movie_suffix"],
    |_params: &StageParams| -> Result<Vec<String>, BuilderError> { Ok(vec![]) }
);

stage_builder!(
    MotionCorrBuilder,
    StageKey::MotionCorr,
    "relion_run_motioncorr",
    &["bin_factor", "dose_per_frame", "use_gpu"],
    |params: &StageParams| -> Result<Vec<String>, BuilderError> {
        let mut flags = Vec::new();
        if let Some(bin) = number_param(params, "bin_factor")? {
            flags.push("--bin_factor".to_string());
            flags.push(bin.to_string());
        }
        if let Some(dose) = number_param(params, "dose_per_frame")? {
            flags.push("--dose_per_frame".to_string());
            flags.push(dose.to_string());
        }
        if bool_param(params, "use_gpu")? {
            flags.push("--gpu".to_string());
        }
        Ok(flags)
    }
);

stage_builder!(
    CtfFindBuilder,
    StageKey::CtfFind,
    "relion_run_ctffind",
    &["box_size", "min_res", "max_res", "use_gpu"],
    |params: &StageParams| -> Result<Vec<String>, BuilderError> {
        let mut flags = Vec::new();
        if let Some(box_size) = number_param(params, "box_size")? {
            flags.push("--box_size".to_string());
            flags.push(box_size.to_string());
        }
        if let Some(min_res) = number_param(params, "min_res")? {
            flags.push("--min_res".to_string());
            flags.push(min_res.to_string());
        }
        if let Some(max_res) = number_param(params, "max_res")? {
            flags.push("--max_res".to_string());
            flags.push(max_res.to_string());
        }
        if bool_param(params, "use_gpu")? {
            flags.push("--gpu".to_string());
        }
        Ok(flags)
    }
);

stage_builder!(
    ManualPickBuilder,
    StageKey::ManualPick,
    "relion_manualpick",
    &["particle_diameter"],
    |params: &StageParams| -> Result<Vec<String>, BuilderError> {
        let mut flags = Vec::new();
        if let Some(d) = number_param(params, "particle_diameter")? {
            flags.push("--particle_diameter".to_string());
            flags.push(d.to_string());
        }
        Ok(flags)
    }
);

stage_builder!(
    AutoPickBuilder,
    StageKey::AutoPick,
    "relion_autopick",
    &["particle_diameter", "threshold", "use_gpu"],
    |params: &StageParams| -> Result<Vec<String>, BuilderError> {
        let mut flags = Vec::new();
        if let Some(d) = number_param(params, "particle_diameter")? {
            flags.push("--particle_diameter".to_string());
            flags.push(d.to_string());
        }
        if let Some(t) = number_param(params, "threshold")? {
            flags.push("--threshold".to_string());
            flags.push(t.to_string());
        }
        if bool_param(params, "use_gpu")? {
            flags.push("--gpu".to_string());
        }
        Ok(flags)
    }
);

stage_builder!(
    ExtractBuilder,
    StageKey::Extract,
    "relion_preprocess",
    &["box_size", "bg_radius"],
    |params: &StageParams| -> Result<Vec<String>, BuilderError> {
        let mut flags = Vec::new();
        if let Some(box_size) = number_param(params, "box_size")? {
            flags.push("--extract_size".to_string());
            flags.push(box_size.to_string());
        }
        if let Some(r) = number_param(params, "bg_radius")? {
            flags.push("--bg_radius".to_string());
            flags.push(r.to_string());
        }
        Ok(flags)
    }
);

stage_builder!(
    Class2DBuilder,
    StageKey::Class2D,
    "relion_refine",
    &["particle_diameter", "num_classes", "iterations", "use_gpu"],
    |params: &StageParams| -> Result<Vec<String>, BuilderError> {
        let mut flags = vec!["--2d".to_string()];
        if let Some(d) = number_param(params, "particle_diameter")? {
            flags.push("--particle_diameter".to_string());
            flags.push(d.to_string());
        }
        if let Some(k) = number_param(params, "num_classes")? {
            flags.push("--K".to_string());
            flags.push((k as u32).to_string());
        }
        if let Some(iter) = number_param(params, "iterations")? {
            flags.push("--iter".to_string());
            flags.push((iter as u32).to_string());
        }
        if bool_param(params, "use_gpu")? {
            flags.push("--gpu".to_string());
        }
        Ok(flags)
    }
);

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn extract_builder_drops_dangerous_additional_argument_but_submits_the_rest() {
        let mut params = StageParams::default();
        params.values.insert("box_size".to_string(), serde_json::json!(256));
        params.additional_arguments = Some("--foo; rm -rf /".to_string());
        let tmp = tempfile::tempdir().unwrap();
        let builder = ExtractBuilder;
        let output = builder
            .build(tmp.path(), 1, &params, &ResolvedInputs::default())
            .unwrap();
        assert_eq!(
            output.dropped_additional_arguments.as_deref(),
            Some("--foo; rm -rf /")
        );
        assert!(output.argv.contains(&"--extract_size".to_string()));
        assert!(!output.argv.iter().any(|a| a.contains(';')));
    }

    #[test]
    fn motion_corr_builder_rejects_unknown_key() {
        let mut values = HashMap::new();
        values.insert("bogus".to_string(), serde_json::json!(1));
        let params = StageParams {
            values,
            additional_arguments: None,
        };
        let tmp = tempfile::tempdir().unwrap();
        let builder = MotionCorrBuilder;
        let err = builder
            .build(tmp.path(), 1, &params, &ResolvedInputs::default())
            .unwrap_err();
        assert!(matches!(err, BuilderError::UnknownKey(_)));
    }

    #[test]
    fn extract_builder_produces_output_dir_with_job_index() {
        let tmp = tempfile::tempdir().unwrap();
        let builder = ExtractBuilder;
        let output = builder
            .build(tmp.path(), 7, &StageParams::default(), &ResolvedInputs::default())
            .unwrap();
        assert!(output.output_dir.ends_with("Extract/Job007"));
        assert!(!output.supports_gpu);
    }
}
