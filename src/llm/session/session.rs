use std::error::Error;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use super::paths::ModelFiles;
use crate::llm::backend::DeviceSet;
use crate::llm::checkpoint::{TensorSource, TorchCheckpoint};
use crate::llm::dispatch::load_checkpoint_and_dispatch;
use crate::llm::engine::{GenerationEngine, LlamaGenerator, SamplingParams};
use crate::llm::model::Transformer;
use crate::llm::params::{ModelArgs, ParamsFile};
use crate::llm::placement::{AutoPlacement, DeviceMap, PlacementPolicy};
use crate::llm::tensor::DType;
use crate::llm::tokenizer::{SentencePieceTokenizer, Tokenizer};
use crate::llm::variant::ModelVariant;

/// Builds the tokenizer from the shared `tokenizer.model` path
pub type TokenizerLoader =
    Box<dyn Fn(&Path) -> Result<Arc<dyn Tokenizer>, Box<dyn Error + Send + Sync>> + Send + Sync>;

/// Opens the variant's weight checkpoint
pub type CheckpointLoader =
    Box<dyn Fn(&Path) -> Result<Box<dyn TensorSource>, Box<dyn Error + Send + Sync>> + Send + Sync>;

/// Wraps a dispatched model and its tokenizer into a generation engine
pub type EngineFactory = Box<
    dyn Fn(Transformer, Arc<dyn Tokenizer>, DeviceSet) -> Result<Box<dyn GenerationEngine>, Box<dyn Error + Send + Sync>>
        + Send
        + Sync,
>;

fn load_sentencepiece(path: &Path) -> Result<Arc<dyn Tokenizer>, Box<dyn Error + Send + Sync>> {
    Ok(Arc::new(SentencePieceTokenizer::from_file(path)?))
}

fn open_torch_checkpoint(path: &Path) -> Result<Box<dyn TensorSource>, Box<dyn Error + Send + Sync>> {
    Ok(Box::new(TorchCheckpoint::open(path)?))
}

fn build_generator(
    model: Transformer,
    tokenizer: Arc<dyn Tokenizer>,
    devices: DeviceSet,
) -> Result<Box<dyn GenerationEngine>, Box<dyn Error + Send + Sync>> {
    Ok(Box::new(LlamaGenerator::new(model, tokenizer, devices)?))
}

/// Configures and loads a [`LlamaInference`] session.
pub struct LlamaInferenceBuilder {
    root: PathBuf,
    variant: ModelVariant,
    placement: Box<dyn PlacementPolicy>,
    devices: DeviceSet,
    dtype: DType,
    tokenizer_loader: TokenizerLoader,
    checkpoint_loader: CheckpointLoader,
    engine_factory: EngineFactory,
}

impl LlamaInferenceBuilder {
    fn new(root: PathBuf, variant: ModelVariant) -> Self {
        Self {
            root,
            variant,
            placement: Box::new(AutoPlacement),
            devices: DeviceSet::cpu(),
            dtype: DType::F16,
            tokenizer_loader: Box::new(load_sentencepiece),
            checkpoint_loader: Box::new(open_torch_checkpoint),
            engine_factory: Box::new(build_generator),
        }
    }

    pub fn placement(mut self, policy: Box<dyn PlacementPolicy>) -> Self {
        self.placement = policy;
        self
    }

    pub fn devices(mut self, devices: DeviceSet) -> Self {
        self.devices = devices;
        self
    }

    /// Element type the weights are stored in once dispatched
    pub fn dtype(mut self, dtype: DType) -> Self {
        self.dtype = dtype;
        self
    }

    pub fn tokenizer_loader<F>(mut self, loader: F) -> Self
    where
        F: Fn(&Path) -> Result<Arc<dyn Tokenizer>, Box<dyn Error + Send + Sync>> + Send + Sync + 'static,
    {
        self.tokenizer_loader = Box::new(loader);
        self
    }

    pub fn checkpoint_loader<F>(mut self, loader: F) -> Self
    where
        F: Fn(&Path) -> Result<Box<dyn TensorSource>, Box<dyn Error + Send + Sync>> + Send + Sync + 'static,
    {
        self.checkpoint_loader = Box::new(loader);
        self
    }

    pub fn engine_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(Transformer, Arc<dyn Tokenizer>, DeviceSet) -> Result<Box<dyn GenerationEngine>, Box<dyn Error + Send + Sync>>
            + Send
            + Sync
            + 'static,
    {
        self.engine_factory = Box::new(factory);
        self
    }

    /// Validates the files, loads parameters and tokenizer, dispatches the
    /// weights and builds the engine.
    pub fn build(self) -> Result<LlamaInference, Box<dyn Error + Send + Sync>> {
        let files = ModelFiles::resolve(&self.root, self.variant)?;
        info!("Loading LLaMA {} from {}", self.variant, files.variant_dir.display());

        let params = ParamsFile::load(&files.params)?;
        let args = ModelArgs::from_params(params);

        let tokenizer = (self.tokenizer_loader)(&files.tokenizer)?;
        let args = args.with_vocab_size(tokenizer.n_words());
        args.validate()?;
        debug!("Model arguments: {:?}", args);

        let mut model = Transformer::empty(&args, self.dtype)?;
        let device_map = {
            let source = (self.checkpoint_loader)(&files.checkpoint)?;
            load_checkpoint_and_dispatch(&mut model, source.as_ref(), &self.devices, self.placement.as_ref())?
        };

        let engine = (self.engine_factory)(model, Arc::clone(&tokenizer), self.devices.clone())?;

        let session = LlamaInference {
            id: Uuid::new_v4(),
            variant: self.variant,
            files,
            args,
            dtype: self.dtype,
            tokenizer,
            device_map,
            devices: self.devices,
            engine,
            loaded_at: Utc::now(),
        };
        info!(
            "Session {} ready: {} bytes across {} device(s)",
            session.id,
            session.allocated_bytes(),
            session.devices.len()
        );
        Ok(session)
    }
}

/// A loaded LLaMA model ready to generate text.
pub struct LlamaInference {
    id: Uuid,
    variant: ModelVariant,
    files: ModelFiles,
    args: ModelArgs,
    dtype: DType,
    tokenizer: Arc<dyn Tokenizer>,
    device_map: DeviceMap,
    devices: DeviceSet,
    engine: Box<dyn GenerationEngine>,
    loaded_at: DateTime<Utc>,
}

impl LlamaInference {
    pub fn builder<P: AsRef<Path>>(root: P, variant: ModelVariant) -> LlamaInferenceBuilder {
        LlamaInferenceBuilder::new(root.as_ref().to_path_buf(), variant)
    }

    /// Loads `variant` (e.g. "7B") from `root` with the default collaborators.
    pub fn open<P: AsRef<Path>>(root: P, variant: &str) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let variant: ModelVariant = variant.parse()?;
        Self::builder(root, variant).build()
    }

    /// Generates one continuation per prompt, in input order.
    pub fn generate(&self, prompts: &[String], params: &SamplingParams) -> Result<Vec<String>, Box<dyn Error + Send + Sync>> {
        if prompts.is_empty() {
            return Ok(Vec::new());
        }
        params.validate()?;
        debug!("Session {} generating for {} prompt(s)", self.id, prompts.len());
        self.engine.generate(prompts, params)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn variant(&self) -> ModelVariant {
        self.variant
    }

    pub fn files(&self) -> &ModelFiles {
        &self.files
    }

    pub fn args(&self) -> &ModelArgs {
        &self.args
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn tokenizer(&self) -> &dyn Tokenizer {
        self.tokenizer.as_ref()
    }

    pub fn device_map(&self) -> &DeviceMap {
        &self.device_map
    }

    pub fn devices(&self) -> &DeviceSet {
        &self.devices
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    /// Bytes currently charged across every device
    pub fn allocated_bytes(&self) -> u64 {
        self.devices.total_allocated()
    }
}

impl fmt::Debug for LlamaInference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlamaInference")
            .field("id", &self.id)
            .field("variant", &self.variant)
            .field("args", &self.args)
            .field("dtype", &self.dtype)
            .field("loaded_at", &self.loaded_at)
            .finish()
    }
}
