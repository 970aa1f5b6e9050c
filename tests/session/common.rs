use std::error::Error;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use llama_inference::llm::backend::DeviceSet;
use llama_inference::llm::checkpoint::{TensorInfo, TensorSource};
use llama_inference::llm::engine::{GenerationEngine, SamplingParams};
use llama_inference::llm::model::Transformer;
use llama_inference::llm::params::{ModelArgs, ParamsFile};
use llama_inference::llm::session::{LlamaInferenceBuilder, CHECKPOINT_FILE, PARAMS_FILE, TOKENIZER_FILE};
use llama_inference::llm::tensor::{DType, TensorData};
use llama_inference::llm::tokenizer::Tokenizer;
use llama_inference::{LlamaInference, ModelVariant};

pub const N_WORDS: usize = 32;

pub const TINY_PARAMS: &str =
    r#"{"dim": 16, "multiple_of": 8, "n_heads": 2, "n_layers": 3, "norm_eps": 1e-06, "vocab_size": -1}"#;

/// Writes params.json plus placeholder checkpoint and tokenizer files for `variant`.
pub fn write_variant(root: &Path, variant: ModelVariant) {
    let dir = root.join(variant.as_str());
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(PARAMS_FILE), TINY_PARAMS).unwrap();
    fs::write(dir.join(CHECKPOINT_FILE), b"").unwrap();
    fs::write(root.join(TOKENIZER_FILE), b"").unwrap();
}

/// Byte-level tokenizer with a fixed vocabulary size
pub struct FakeTokenizer;

impl Tokenizer for FakeTokenizer {
    fn n_words(&self) -> usize {
        N_WORDS
    }

    fn bos_id(&self) -> u32 {
        1
    }

    fn eos_id(&self) -> u32 {
        2
    }

    fn pad_id(&self) -> Option<u32> {
        None
    }

    fn encode(&self, text: &str, bos: bool, eos: bool) -> Result<Vec<u32>, Box<dyn Error + Send + Sync>> {
        let mut ids: Vec<u32> = bos.then_some(1).into_iter().collect();
        ids.extend(text.bytes().map(|b| b as u32 % N_WORDS as u32));
        if eos {
            ids.push(2);
        }
        Ok(ids)
    }

    fn decode(&self, tokens: &[u32]) -> Result<String, Box<dyn Error + Send + Sync>> {
        Ok(tokens.iter().map(|t| t.to_string()).collect::<Vec<_>>().join(" "))
    }
}

/// Checkpoint of f32 zeros matching the model built from `args`
pub struct ZeroSource {
    tensors: Vec<(TensorInfo, usize)>,
}

impl ZeroSource {
    pub fn for_args(args: &ModelArgs) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let skeleton = Transformer::empty(args, DType::F16)?;
        let tensors = skeleton
            .slots()
            .iter()
            .map(|slot| {
                let info = TensorInfo { name: slot.name.clone(), dtype: DType::F32, shape: slot.shape.clone() };
                (info, slot.numel())
            })
            .collect();
        Ok(Self { tensors })
    }
}

impl TensorSource for ZeroSource {
    fn tensor_infos(&self) -> Vec<TensorInfo> {
        self.tensors.iter().map(|(info, _)| info.clone()).collect()
    }

    fn read_tensor(&self, name: &str) -> Result<TensorData, Box<dyn Error + Send + Sync>> {
        let (_, numel) = self
            .tensors
            .iter()
            .find(|(info, _)| info.name == name)
            .ok_or_else(|| format!("no tensor named {}", name))?;
        Ok(TensorData::F32(vec![0.0; *numel]))
    }
}

/// Echoes each prompt back with a marker
pub struct StubEngine {
    calls: Arc<AtomicUsize>,
}

impl GenerationEngine for StubEngine {
    fn generate(&self, prompts: &[String], params: &SamplingParams) -> Result<Vec<String>, Box<dyn Error + Send + Sync>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(prompts.iter().map(|p| format!("{} [{} tokens max]", p, params.max_gen_len)).collect())
    }
}

/// Observes what the session did with its collaborators
#[derive(Clone, Default)]
pub struct Probe {
    pub checkpoint_opened: Arc<AtomicBool>,
    pub engine_calls: Arc<AtomicUsize>,
}

impl Probe {
    pub fn checkpoint_opened(&self) -> bool {
        self.checkpoint_opened.load(Ordering::SeqCst)
    }

    pub fn engine_calls(&self) -> usize {
        self.engine_calls.load(Ordering::SeqCst)
    }
}

/// A builder wired to the fake tokenizer, zero checkpoint and stub engine.
pub fn fake_builder(root: &Path, variant: ModelVariant, probe: &Probe, devices: DeviceSet) -> LlamaInferenceBuilder {
    let opened = Arc::clone(&probe.checkpoint_opened);
    let calls = Arc::clone(&probe.engine_calls);
    LlamaInference::builder(root, variant)
        .devices(devices)
        .tokenizer_loader(|_path| Ok(Arc::new(FakeTokenizer) as Arc<dyn Tokenizer>))
        .checkpoint_loader(move |path| {
            opened.store(true, Ordering::SeqCst);
            let params = ParamsFile::load(path.with_file_name(PARAMS_FILE))?;
            let args = ModelArgs::from_params(params).with_vocab_size(N_WORDS);
            Ok(Box::new(ZeroSource::for_args(&args)?) as Box<dyn TensorSource>)
        })
        .engine_factory(move |_model, _tokenizer, _devices| {
            Ok(Box::new(StubEngine { calls: Arc::clone(&calls) }) as Box<dyn GenerationEngine>)
        })
}
