use std::error::Error;
use tempfile::tempdir;

use llama_inference::llm::backend::DeviceSet;
use llama_inference::llm::engine::{GenerationEngine, SamplingParams};
use llama_inference::llm::{ErrorKind, InferenceError};
use llama_inference::{LlamaInference, ModelVariant};

use crate::common::{fake_builder, write_variant, Probe};

fn session(probe: &Probe) -> (tempfile::TempDir, LlamaInference) {
    let dir = tempdir().unwrap();
    write_variant(dir.path(), ModelVariant::Llama7B);
    let session = fake_builder(dir.path(), ModelVariant::Llama7B, probe, DeviceSet::cpu())
        .build()
        .unwrap();
    (dir, session)
}

#[test]
fn test_single_prompt_single_output() {
    let probe = Probe::default();
    let (_dir, session) = session(&probe);
    let params = SamplingParams { max_gen_len: 256, ..SamplingParams::default() };

    let outputs = session.generate(&["My name is Kyle".to_string()], &params).unwrap();

    assert_eq!(outputs, vec!["My name is Kyle [256 tokens max]".to_string()]);
    assert_eq!(probe.engine_calls(), 1);
}

#[test]
fn test_outputs_follow_prompt_order() {
    let probe = Probe::default();
    let (_dir, session) = session(&probe);
    let prompts: Vec<String> = ["first", "second", "third"].iter().map(|p| p.to_string()).collect();

    let outputs = session.generate(&prompts, &SamplingParams::default()).unwrap();

    assert_eq!(outputs.len(), 3);
    for (prompt, output) in prompts.iter().zip(&outputs) {
        assert!(output.starts_with(prompt.as_str()));
    }
}

#[test]
fn test_empty_prompt_list() {
    let probe = Probe::default();
    let (_dir, session) = session(&probe);

    let outputs = session.generate(&[], &SamplingParams::default()).unwrap();

    assert!(outputs.is_empty());
    assert_eq!(probe.engine_calls(), 0);
}

#[test]
fn test_invalid_sampling_params() {
    let probe = Probe::default();
    let (_dir, session) = session(&probe);
    let params = SamplingParams { top_p: 1.5, ..SamplingParams::default() };

    let err = session.generate(&["hi".to_string()], &params).unwrap_err();

    assert!(matches!(err.downcast_ref::<InferenceError>(), Some(InferenceError::InvalidArgument(_))));
    assert_eq!(InferenceError::kind_of(err.as_ref()), Some(ErrorKind::Configuration));
    assert_eq!(probe.engine_calls(), 0);
}

struct FailingEngine;

impl GenerationEngine for FailingEngine {
    fn generate(&self, _prompts: &[String], _params: &SamplingParams) -> Result<Vec<String>, Box<dyn Error + Send + Sync>> {
        Err("device lost".into())
    }
}

#[test]
fn test_engine_errors_pass_through() {
    let dir = tempdir().unwrap();
    write_variant(dir.path(), ModelVariant::Llama7B);
    let probe = Probe::default();
    let session = fake_builder(dir.path(), ModelVariant::Llama7B, &probe, DeviceSet::cpu())
        .engine_factory(|_model, _tokenizer, _devices| Ok(Box::new(FailingEngine) as Box<dyn GenerationEngine>))
        .build()
        .unwrap();

    let err = session.generate(&["hi".to_string()], &SamplingParams::default()).unwrap_err();

    assert_eq!(err.to_string(), "device lost");
    assert_eq!(InferenceError::kind_of(err.as_ref()), None);
}
