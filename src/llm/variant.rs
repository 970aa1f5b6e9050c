use std::fmt;
use std::str::FromStr;
use clap::builder::PossibleValue;
use super::error::InferenceError;

/// Supported LLaMA model sizes.
///
/// Each variant names a subdirectory of the model root holding that size's
/// checkpoint and parameter file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelVariant {
    Llama7B,
    Llama13B,
    Llama30B,
    Llama65B,
}

impl ModelVariant {
    pub const ALL: [ModelVariant; 4] = [
        ModelVariant::Llama7B,
        ModelVariant::Llama13B,
        ModelVariant::Llama30B,
        ModelVariant::Llama65B,
    ];

    /// Directory name used on disk (e.g. "7B")
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelVariant::Llama7B => "7B",
            ModelVariant::Llama13B => "13B",
            ModelVariant::Llama30B => "30B",
            ModelVariant::Llama65B => "65B",
        }
    }
}

impl fmt::Display for ModelVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelVariant {
    type Err = InferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ModelVariant::ALL
            .iter()
            .copied()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| InferenceError::UnsupportedVariant(s.to_string()))
    }
}

impl clap::ValueEnum for ModelVariant {
    fn value_variants<'a>() -> &'a [Self] {
        &[
            ModelVariant::Llama7B,
            ModelVariant::Llama13B,
            ModelVariant::Llama30B,
            ModelVariant::Llama65B,
        ]
    }

    fn to_possible_value(&self) -> Option<PossibleValue> {
        Some(PossibleValue::new(self.as_str()))
    }
}
