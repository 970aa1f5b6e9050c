use std::path::{Path, PathBuf};
use tracing::debug;

use crate::llm::error::InferenceError;
use crate::llm::variant::ModelVariant;

pub const CHECKPOINT_FILE: &str = "state_dict.pth";
pub const PARAMS_FILE: &str = "params.json";
/// Shared by every variant, lives directly under the root
pub const TOKENIZER_FILE: &str = "tokenizer.model";

/// The files a variant needs, resolved and checked to exist
#[derive(Debug, Clone, PartialEq)]
pub struct ModelFiles {
    pub root: PathBuf,
    pub variant_dir: PathBuf,
    pub checkpoint: PathBuf,
    pub params: PathBuf,
    pub tokenizer: PathBuf,
}

impl ModelFiles {
    /// Checks root, variant directory, checkpoint, params and tokenizer in that order,
    /// failing on the first one that is missing. Nothing is opened.
    pub fn resolve(root: &Path, variant: ModelVariant) -> Result<Self, InferenceError> {
        let variant_dir = root.join(variant.as_str());
        let files = Self {
            root: root.to_path_buf(),
            checkpoint: variant_dir.join(CHECKPOINT_FILE),
            params: variant_dir.join(PARAMS_FILE),
            tokenizer: root.join(TOKENIZER_FILE),
            variant_dir,
        };

        let checks: [(&'static str, &Path, bool); 5] = [
            ("model root directory", &files.root, files.root.is_dir()),
            ("variant directory", &files.variant_dir, files.variant_dir.is_dir()),
            ("weight checkpoint", &files.checkpoint, files.checkpoint.is_file()),
            ("parameter file", &files.params, files.params.is_file()),
            ("tokenizer model", &files.tokenizer, files.tokenizer.is_file()),
        ];
        for (what, path, present) in checks {
            if !present {
                return Err(InferenceError::MissingPath { what, path: path.to_path_buf() });
            }
        }

        debug!("Resolved {} files under {}", variant, files.variant_dir.display());
        Ok(files)
    }
}
