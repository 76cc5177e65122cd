use std::fmt;
use std::str::FromStr;

/// The closed set of pipeline stage keys. The live orchestrator only ever
/// submits the first seven; the remainder exist because the scheduling and
/// persistence surface (Job Store, activity log) is shared with the wider
/// processing pipeline and must be able to name any of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "PascalCase"))]
pub enum StageKey {
    Import,
    MotionCorr,
    CtfFind,
    ManualPick,
    AutoPick,
    Extract,
    Class2D,
    Class3D,
    InitialModel,
    AutoRefine,
    MaskCreate,
    PostProcess,
    LocalRes,
    CtfRefine,
    Polish,
    ModelAngelo,
    Dynamight,
    ManualSelect,
    Subset,
    Subtract,
    JoinStar,
}

impl StageKey {
    pub const ALL: [StageKey; 21] = [
        StageKey::Import,
        StageKey::MotionCorr,
        StageKey::CtfFind,
        StageKey::ManualPick,
        StageKey::AutoPick,
        StageKey::Extract,
        StageKey::Class2D,
        StageKey::Class3D,
        StageKey::InitialModel,
        StageKey::AutoRefine,
        StageKey::MaskCreate,
        StageKey::PostProcess,
        StageKey::LocalRes,
        StageKey::CtfRefine,
        StageKey::Polish,
        StageKey::ModelAngelo,
        StageKey::Dynamight,
        StageKey::ManualSelect,
        StageKey::Subset,
        StageKey::Subtract,
        StageKey::JoinStar,
    ];

    /// The stages the live session pass algorithm drives, in pipeline order.
    pub const LIVE_PIPELINE: [StageKey; 6] = [
        StageKey::Import,
        StageKey::MotionCorr,
        StageKey::CtfFind,
        StageKey::ManualPick,
        StageKey::AutoPick,
        StageKey::Extract,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageKey::Import => "Import",
            StageKey::MotionCorr => "MotionCorr",
            StageKey::CtfFind => "CtfFind",
            StageKey::ManualPick => "ManualPick",
            StageKey::AutoPick => "AutoPick",
            StageKey::Extract => "Extract",
            StageKey::Class2D => "Class2D",
            StageKey::Class3D => "Class3D",
            StageKey::InitialModel => "InitialModel",
            StageKey::AutoRefine => "AutoRefine",
            StageKey::MaskCreate => "MaskCreate",
            StageKey::PostProcess => "PostProcess",
            StageKey::LocalRes => "LocalRes",
            StageKey::CtfRefine => "CtfRefine",
            StageKey::Polish => "Polish",
            StageKey::ModelAngelo => "ModelAngelo",
            StageKey::Dynamight => "Dynamight",
            StageKey::ManualSelect => "ManualSelect",
            StageKey::Subset => "Subset",
            StageKey::Subtract => "Subtract",
            StageKey::JoinStar => "JoinStar",
        }
    }
}

impl fmt::Display for StageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown stage key: {0}")]
pub struct ParseStageKeyError(pub String);

impl FromStr for StageKey {
    type Err = ParseStageKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StageKey::ALL
            .iter()
            .find(|k| k.as_str() == s)
            .copied()
            .ok_or_else(|| ParseStageKeyError(s.to_string()))
    }
}

#[cfg(feature = "sqlx")]
impl sqlx::Type<sqlx::Postgres> for StageKey {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <String as sqlx::Type<sqlx::Postgres>>::type_info()
    }
}

#[cfg(feature = "sqlx")]
impl<'r> sqlx::Decode<'r, sqlx::Postgres> for StageKey {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let raw = <String as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        Ok(raw.parse()?)
    }
}

#[cfg(feature = "sqlx")]
impl<'q> sqlx::Encode<'q, sqlx::Postgres> for StageKey {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
        <String as sqlx::Encode<sqlx::Postgres>>::encode_by_ref(&self.as_str().to_string(), buf)
    }
}
