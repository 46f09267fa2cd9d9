use textgen::error::CheckpointError;
use textgen::model::ModelArgs;
use textgen::quant::QTransformer;
use textgen::Scorer;
use textgen_mobile::quantize_to;
use tempfile::TempDir;

fn small_args() -> ModelArgs {
    ModelArgs {
        n_layers: 1,
        dim: 32,
        hidden_dim: 64,
        seed: 3,
        ..ModelArgs::default()
    }
}

#[test]
fn quantize_save_and_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("model.q8");
    let q = quantize_to(&small_args(), &path).unwrap();

    let loaded = QTransformer::load(&path).unwrap();
    let mapped = QTransformer::load_mmap(&path).unwrap();
    let tokens = [1u32, 2, 3];
    let expected = q.score(&tokens).unwrap();
    assert_eq!(expected.len(), 98);
    assert_eq!(loaded.score(&tokens).unwrap(), expected);
    assert_eq!(mapped.score(&tokens).unwrap(), expected);
    assert_eq!(loaded.forward(&tokens).nrows(), tokens.len());
}

#[test]
fn same_seed_writes_same_checkpoint() {
    let dir = TempDir::new().unwrap();
    let a = dir.path().join("a.q8");
    let b = dir.path().join("b.q8");
    quantize_to(&small_args(), &a).unwrap();
    quantize_to(&small_args(), &b).unwrap();
    assert_eq!(std::fs::read(a).unwrap(), std::fs::read(b).unwrap());
}

#[test]
fn missing_checkpoint_is_not_found() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("absent.q8");
    assert!(matches!(QTransformer::load(&path), Err(CheckpointError::NotFound(_))));
    assert!(matches!(QTransformer::load_mmap(&path), Err(CheckpointError::NotFound(_))));
}

#[test]
fn truncated_checkpoint_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("model.q8");
    quantize_to(&small_args(), &path).unwrap();
    let bytes = std::fs::read(&path).unwrap();
    std::fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();
    assert!(matches!(
        QTransformer::load(&path),
        Err(CheckpointError::Truncated { .. })
    ));
}

#[test]
fn invalid_args_are_reported() {
    let dir = TempDir::new().unwrap();
    let args = ModelArgs {
        n_heads: 3,
        ..small_args()
    };
    assert!(quantize_to(&args, &dir.path().join("bad.q8")).is_err());
}
