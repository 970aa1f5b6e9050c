use std::fs;
use std::sync::Arc;
use tempfile::tempdir;

use llama_inference::llm::backend::{Backend, CpuBackend, DeviceId, DeviceSet};
use llama_inference::llm::session::{CHECKPOINT_FILE, PARAMS_FILE, TOKENIZER_FILE};
use llama_inference::llm::{ErrorKind, InferenceError};
use llama_inference::{LlamaInference, ModelVariant};

use crate::common::{fake_builder, write_variant, Probe, N_WORDS};

#[test]
fn test_every_variant_initialises() {
    let dir = tempdir().unwrap();
    for variant in ModelVariant::ALL {
        write_variant(dir.path(), variant);
        let probe = Probe::default();

        let session = fake_builder(dir.path(), variant, &probe, DeviceSet::cpu()).build().unwrap();

        assert_eq!(session.variant(), variant);
        assert_eq!(session.args().vocab_size, N_WORDS as i64);
        assert_eq!(session.args().vocab_size as usize, session.tokenizer().n_words());
        assert_eq!(session.args().max_seq_len, 2048);
        assert_eq!(session.args().max_batch_size, 1);
        assert!(probe.checkpoint_opened());
        // embeddings, three layers, final norm and output
        assert_eq!(session.device_map().len(), 6);
    }
}

#[test]
fn test_unsupported_variant_rejected_before_file_access() {
    let err = "1B".parse::<ModelVariant>().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);

    // The root does not exist, yet the variant is what gets reported
    let err = LlamaInference::open("/nonexistent/llama", "1B").unwrap_err();
    assert!(matches!(
        err.downcast_ref::<InferenceError>(),
        Some(InferenceError::UnsupportedVariant(v)) if v == "1B"
    ));
}

fn assert_missing(remove: &str, what: &str) {
    let dir = tempdir().unwrap();
    write_variant(dir.path(), ModelVariant::Llama7B);
    let target = if remove == TOKENIZER_FILE {
        dir.path().join(remove)
    } else {
        dir.path().join("7B").join(remove)
    };
    fs::remove_file(&target).unwrap();

    let probe = Probe::default();
    let devices = DeviceSet::cpu();
    let err = fake_builder(dir.path(), ModelVariant::Llama7B, &probe, devices.clone())
        .build()
        .unwrap_err();

    match err.downcast_ref::<InferenceError>() {
        Some(InferenceError::MissingPath { what: reported, path }) => {
            assert_eq!(*reported, what);
            assert_eq!(path, &target);
        }
        other => panic!("expected a missing path error, got {:?}", other),
    }
    assert_eq!(InferenceError::kind_of(err.as_ref()), Some(ErrorKind::Configuration));
    assert!(!probe.checkpoint_opened());
    assert_eq!(devices.total_allocated(), 0);
}

#[test]
fn test_missing_checkpoint() {
    assert_missing(CHECKPOINT_FILE, "weight checkpoint");
}

#[test]
fn test_missing_params() {
    assert_missing(PARAMS_FILE, "parameter file");
}

#[test]
fn test_missing_tokenizer() {
    assert_missing(TOKENIZER_FILE, "tokenizer model");
}

#[test]
fn test_missing_variant_directory() {
    let dir = tempdir().unwrap();
    write_variant(dir.path(), ModelVariant::Llama7B);
    let probe = Probe::default();

    let err = fake_builder(dir.path(), ModelVariant::Llama13B, &probe, DeviceSet::cpu())
        .build()
        .unwrap_err();

    assert_eq!(InferenceError::kind_of(err.as_ref()), Some(ErrorKind::Configuration));
    assert!(err.to_string().contains("13B"));
    assert!(!probe.checkpoint_opened());
}

#[test]
fn test_malformed_params_rejected() {
    let dir = tempdir().unwrap();
    write_variant(dir.path(), ModelVariant::Llama7B);
    fs::write(dir.path().join("7B").join(PARAMS_FILE), r#"{"dim": 16, "n_heads": 2, "max_seq_len": 4096}"#).unwrap();
    let probe = Probe::default();

    let err = fake_builder(dir.path(), ModelVariant::Llama7B, &probe, DeviceSet::cpu())
        .build()
        .unwrap_err();

    assert!(matches!(err.downcast_ref::<InferenceError>(), Some(InferenceError::InvalidParams(_))));
    assert!(!probe.checkpoint_opened());
}

#[test]
fn test_exhausted_budget_is_resource_error() {
    let dir = tempdir().unwrap();
    write_variant(dir.path(), ModelVariant::Llama7B);
    let probe = Probe::default();
    let tiny: Arc<dyn Backend> = Arc::new(CpuBackend::new(DeviceId(0), "tiny", Some(1024)));
    let devices = DeviceSet::new(vec![tiny]);

    let err = fake_builder(dir.path(), ModelVariant::Llama7B, &probe, devices.clone())
        .build()
        .unwrap_err();

    assert_eq!(InferenceError::kind_of(err.as_ref()), Some(ErrorKind::Resource));
    assert_eq!(devices.total_allocated(), 0);
}

#[test]
fn test_loader_errors_pass_through() {
    let dir = tempdir().unwrap();
    write_variant(dir.path(), ModelVariant::Llama7B);
    let probe = Probe::default();

    let err = fake_builder(dir.path(), ModelVariant::Llama7B, &probe, DeviceSet::cpu())
        .tokenizer_loader(|_path| Err("tokenizer exploded".into()))
        .build()
        .unwrap_err();

    assert_eq!(err.to_string(), "tokenizer exploded");
    assert_eq!(InferenceError::kind_of(err.as_ref()), None);
    assert!(!probe.checkpoint_opened());
}
