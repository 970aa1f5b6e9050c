use std::error::Error;
use std::sync::Arc;
use std::time::Instant;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info};

use super::engine::{GenerationEngine, SamplingParams};
use super::forward::{forward, Buffers, KvCache, Rope};
use super::sampler::sample_top_p;
use crate::llm::backend::DeviceSet;
use crate::llm::error::InferenceError;
use crate::llm::model::Transformer;
use crate::llm::tokenizer::Tokenizer;

/// SentencePiece's default upper bound on piece length, in characters
const MAX_PIECE_CHARS: usize = 16;

/// CPU text generator over a dispatched LLaMA transformer.
pub struct LlamaGenerator {
    model: Transformer,
    tokenizer: Arc<dyn Tokenizer>,
    devices: DeviceSet,
    rope: Rope,
}

impl LlamaGenerator {
    pub fn new(
        model: Transformer,
        tokenizer: Arc<dyn Tokenizer>,
        devices: DeviceSet,
    ) -> Result<Self, Box<dyn Error + Send + Sync>> {
        if !model.is_materialized() {
            return Err(Box::new(InferenceError::Checkpoint(format!(
                "cannot generate with {} unloaded weight(s)",
                model.missing().len()
            ))));
        }
        if model.args().vocab() != tokenizer.n_words() {
            return Err(Box::new(InferenceError::InvalidParams(format!(
                "model vocabulary {} does not match tokenizer's {}",
                model.args().vocab(),
                tokenizer.n_words()
            ))));
        }
        let rope = Rope::new(model.args().head_dim(), model.args().max_seq_len);
        Ok(Self { model, tokenizer, devices, rope })
    }

    pub fn model(&self) -> &Transformer {
        &self.model
    }

    fn complete(&self, prompt: &str, params: &SamplingParams, rng: &mut StdRng) -> Result<String, Box<dyn Error + Send + Sync>> {
        let args = self.model.args();
        // No piece spans more than MAX_PIECE_CHARS, so longer prompts cannot fit
        let chars = prompt.chars().count();
        if chars > args.max_seq_len * MAX_PIECE_CHARS {
            return Err(Box::new(InferenceError::InvalidArgument(format!(
                "prompt of {} characters cannot fit within max_seq_len {}",
                chars, args.max_seq_len
            ))));
        }
        let mut tokens = self.tokenizer.encode(prompt, true, false)?;
        let prompt_len = tokens.len();
        if prompt_len >= args.max_seq_len {
            return Err(Box::new(InferenceError::InvalidArgument(format!(
                "prompt of {} tokens leaves no room within max_seq_len {}",
                prompt_len, args.max_seq_len
            ))));
        }
        let total_len = args.max_seq_len.min(prompt_len + params.max_gen_len);

        let start = Instant::now();
        let mut cache = KvCache::new(&self.model, &self.devices, total_len)?;
        let mut buffers = Buffers::new(args);
        let mut logits = vec![0.0f32; args.vocab()];
        for (pos, &token) in tokens.iter().enumerate() {
            forward(&self.model, &self.devices, &self.rope, &mut cache, &mut buffers, token, pos, &mut logits)?;
        }

        let output = self.devices.get(self.model.output()?.device())?;
        let eos = self.tokenizer.eos_id();
        while tokens.len() < total_len {
            for l in logits.iter_mut() {
                *l /= params.temperature;
            }
            output.softmax(&mut logits)?;
            let next = sample_top_p(&logits, params.top_p, rng) as u32;
            if next == eos {
                break;
            }
            tokens.push(next);
            if tokens.len() == total_len {
                break;
            }
            forward(
                &self.model,
                &self.devices,
                &self.rope,
                &mut cache,
                &mut buffers,
                next,
                tokens.len() - 1,
                &mut logits,
            )?;
        }

        let generated = tokens.len() - prompt_len;
        let elapsed = start.elapsed();
        debug!(
            "Generated {} token(s) after a {}-token prompt in {:.2?} ({:.1} tok/s)",
            generated,
            prompt_len,
            elapsed,
            generated as f64 / elapsed.as_secs_f64().max(1e-9)
        );
        self.tokenizer.decode(&tokens)
    }
}

impl GenerationEngine for LlamaGenerator {
    fn generate(&self, prompts: &[String], params: &SamplingParams) -> Result<Vec<String>, Box<dyn Error + Send + Sync>> {
        params.validate()?;
        let seed = params.seed.unwrap_or_else(rand::random);
        let mut rng = StdRng::seed_from_u64(seed);
        info!("Generating for {} prompt(s) with seed {}", prompts.len(), seed);

        let mut outputs = Vec::with_capacity(prompts.len());
        for batch in prompts.chunks(self.model.args().max_batch_size) {
            for prompt in batch {
                outputs.push(self.complete(prompt, params, &mut rng)?);
            }
        }
        Ok(outputs)
    }
}
