mod common;
mod generic;
mod pipeline;

pub use common::{derive_output_dir, parse_additional_arguments, tokenize};
pub use generic::GenericBuilder;
pub use pipeline::{
    AutoPickBuilder, Class2DBuilder, CtfFindBuilder, ExtractBuilder, ImportBuilder,
    ManualPickBuilder, MotionCorrBuilder,
};

use cryolive_contracts::StageBuilder;
use cryolive_model::StageKey;

/// Returns the builder implementation registered for `key`. Every entry in
/// the closed `StageKey` enum has one, even the stages the live orchestrator
/// never submits itself, since the Job Store and stage-builder contract are
/// shared with the wider (out-of-scope) batch pipeline.
pub fn builder_for(key: StageKey) -> Box<dyn StageBuilder> {
    match key {
        StageKey::Import => Box::new(ImportBuilder),
        StageKey::MotionCorr => Box::new(MotionCorrBuilder),
        StageKey::CtfFind => Box::new(CtfFindBuilder),
        StageKey::ManualPick => Box::new(ManualPickBuilder),
        StageKey::AutoPick => Box::new(AutoPickBuilder),
        StageKey::Extract => Box::new(ExtractBuilder),
        StageKey::Class2D => Box::new(Class2DBuilder),
        other => Box::new(GenericBuilder::new(other)),
    }
}
