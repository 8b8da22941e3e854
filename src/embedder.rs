//! Embedding engine wrapping an externally provisioned ONNX text encoder.
//!
//! The engine consumes two append-only artifacts: the serialized encoder
//! model (`model.onnx`) and a line-oriented vocabulary (`vocab.txt`). It
//! tokenizes with [`WordPieceTokenizer`], runs the encoder through tract,
//! mean-pools the hidden states under the attention mask, and L2-normalizes
//! the result so similarity reduces to a dot product.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use ndarray::Array2;
use parking_lot::Mutex;
use tract_onnx::prelude::*;

use crate::{
    error::{Error, Result},
    tokenizer::{Vocabulary, WordPieceTokenizer},
};

/// Embedding dimension of the default encoder (all-MiniLM-class models).
pub const EMBEDDING_DIM: usize = 384;

/// Maximum token sequence length fed to the encoder.
pub const MAX_SEQUENCE_LENGTH: usize = 256;

/// Encoder model file name inside the model directory.
pub const MODEL_FILE: &str = "model.onnx";

/// Vocabulary file name inside the model directory.
pub const VOCAB_FILE: &str = "vocab.txt";

/// How long callers wait for the session slot before reporting the engine
/// unavailable. A hung load holds the lock; waiters time out instead of
/// wedging, and a later call can retry the load.
const SESSION_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

struct EncoderSession {
    plan: TypedSimplePlan<TypedModel>,
    tokenizer: WordPieceTokenizer,
    input_count: usize,
}

/// Lazily-initialized, shared text encoder.
///
/// Initialization is idempotent: concurrent first calls serialize on the
/// session lock and collapse to a single load. The same lock makes the
/// session the unit of backpressure for parallel indexing workers.
pub struct Embedder {
    model_path: PathBuf,
    vocab_path: PathBuf,
    session: Mutex<Option<EncoderSession>>,
}

impl Embedder {
    pub fn new(model_dir: &Path) -> Self {
        Self {
            model_path: model_dir.join(MODEL_FILE),
            vocab_path: model_dir.join(VOCAB_FILE),
            session: Mutex::new(None),
        }
    }

    /// Whether both model artifacts exist on disk.
    pub fn artifacts_present(&self) -> bool {
        self.model_path.is_file() && self.vocab_path.is_file()
    }

    /// Whether the engine can be expected to produce embeddings.
    pub fn is_ready(&self) -> bool {
        if let Some(guard) = self.session.try_lock()
            && guard.is_some()
        {
            return true;
        }
        self.artifacts_present()
    }

    /// Embed text into a unit-norm vector.
    ///
    /// Fails with [`Error::EmbeddingUnavailable`] when the artifacts are
    /// missing, loading fails, or the session cannot be acquired in time.
    pub fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut guard = self
            .session
            .try_lock_for(SESSION_LOCK_TIMEOUT)
            .ok_or_else(|| {
                Error::EmbeddingUnavailable(
                    "timed out waiting for the encoder session".into(),
                )
            })?;

        if guard.is_none() {
            match self.load_session() {
                Ok(session) => *guard = Some(session),
                Err(e) => {
                    return Err(Error::EmbeddingUnavailable(e.to_string()));
                }
            }
        }

        let Some(session) = guard.as_mut() else {
            return Err(Error::EmbeddingUnavailable(
                "encoder session failed to initialize".into(),
            ));
        };

        session.infer(text)
    }

    fn load_session(&self) -> Result<EncoderSession> {
        if !self.artifacts_present() {
            return Err(Error::EmbeddingUnavailable(format!(
                "model artifacts missing: expected {} and {}",
                self.model_path.display(),
                self.vocab_path.display()
            )));
        }

        let vocab = Vocabulary::from_file(&self.vocab_path)?;
        let tokenizer = WordPieceTokenizer::new(Arc::new(vocab));

        let plan = tract_onnx::onnx()
            .model_for_path(&self.model_path)
            .map_err(model_err)?
            .into_optimized()
            .map_err(model_err)?
            .into_runnable()
            .map_err(model_err)?;
        let input_count = plan.model().inputs.len();

        tracing::info!(
            model = %self.model_path.display(),
            inputs = input_count,
            "encoder session loaded"
        );

        Ok(EncoderSession {
            plan,
            tokenizer,
            input_count,
        })
    }
}

impl std::fmt::Debug for Embedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Embedder")
            .field("model_path", &self.model_path)
            .finish_non_exhaustive()
    }
}

impl EncoderSession {
    fn infer(&mut self, text: &str) -> Result<Vec<f32>> {
        let encoding = self.tokenizer.encode(text, MAX_SEQUENCE_LENGTH);

        let ids = to_tensor(&encoding.ids)?;
        let mask = to_tensor(&encoding.attention_mask)?;
        let mut inputs: TVec<TValue> = tvec!(ids.into(), mask.into());
        if self.input_count >= 3 {
            let type_ids = to_tensor(&encoding.type_ids)?;
            inputs.push(type_ids.into());
        }

        let outputs = self.plan.run(inputs).map_err(model_err)?;
        let output = outputs.into_iter().next().ok_or_else(|| {
            Error::Model("encoder produced no output".into())
        })?;
        let view = output.to_array_view::<f32>().map_err(model_err)?;
        let shape = view.shape().to_vec();

        let pooled = match shape.len() {
            // Already pooled: [batch, dim]
            2 => view.iter().copied().collect(),
            // Hidden states: [batch, seq_len, dim]
            3 => {
                let flat: Vec<f32> = view.iter().copied().collect();
                mean_pool(&flat, &encoding.attention_mask, shape[2])
            }
            _ => {
                return Err(Error::Model(format!(
                    "unexpected encoder output shape: {shape:?}"
                )));
            }
        };

        Ok(normalize_l2(pooled))
    }
}

fn to_tensor(values: &[i64]) -> Result<Tensor> {
    let array = Array2::from_shape_vec((1, values.len()), values.to_vec())
        .map_err(|e| Error::Model(e.to_string()))?;
    Ok(array.into())
}

fn model_err(e: impl std::fmt::Display) -> Error {
    Error::Model(e.to_string())
}

/// Mean-pool per-token hidden vectors over positions with mask 1.
///
/// `hidden` is row-major `[seq_len, dim]`. Zero contributing positions
/// yield a zero vector.
pub fn mean_pool(hidden: &[f32], attention_mask: &[i64], dim: usize) -> Vec<f32> {
    let mut pooled = vec![0f32; dim];
    if dim == 0 {
        return pooled;
    }

    let rows = (hidden.len() / dim).min(attention_mask.len());
    let mut count = 0f32;

    for row in 0..rows {
        if attention_mask[row] != 1 {
            continue;
        }
        for (k, value) in hidden[row * dim..(row + 1) * dim].iter().enumerate()
        {
            pooled[k] += value;
        }
        count += 1.0;
    }

    if count > 0.0 {
        for value in &mut pooled {
            *value /= count;
        }
    }

    pooled
}

/// Scale a vector to unit L2 norm. A near-zero norm leaves it unchanged.
pub fn normalize_l2(mut v: Vec<f32>) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 1e-9 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

/// Serialize a vector as fixed-width little-endian f32 bytes.
pub fn vector_to_bytes(vector: &[f32]) -> Vec<u8> {
    bytemuck::cast_slice(vector).to_vec()
}

/// Reconstruct a vector from little-endian f32 bytes.
///
/// Returns `None` when the byte length is not a multiple of four; callers
/// treat that as a missing embedding.
pub fn vector_from_bytes(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|chunk| {
                f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]])
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embed_without_artifacts_is_unavailable() {
        let tmp = tempfile::tempdir().unwrap();
        let embedder = Embedder::new(tmp.path());

        assert!(!embedder.artifacts_present());
        assert!(!embedder.is_ready());

        let err = embedder.embed("hello").unwrap_err();
        assert!(matches!(err, Error::EmbeddingUnavailable(_)));
    }

    #[test]
    fn corrupt_model_is_unavailable_and_retryable() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join(MODEL_FILE), b"not an onnx file")
            .unwrap();
        std::fs::write(
            tmp.path().join(VOCAB_FILE),
            "[PAD]\n[UNK]\n[CLS]\n[SEP]\nhello\n",
        )
        .unwrap();

        let embedder = Embedder::new(tmp.path());
        assert!(embedder.artifacts_present());

        let err = embedder.embed("hello").unwrap_err();
        assert!(matches!(err, Error::EmbeddingUnavailable(_)));

        // The failed load must not wedge the guard.
        let err = embedder.embed("hello").unwrap_err();
        assert!(matches!(err, Error::EmbeddingUnavailable(_)));
    }

    #[test]
    fn mean_pool_averages_masked_rows() {
        // Two rows of dim 3, only the first contributes.
        let hidden = [1.0, 2.0, 3.0, 10.0, 10.0, 10.0];
        let mask = [1, 0];
        assert_eq!(mean_pool(&hidden, &mask, 3), vec![1.0, 2.0, 3.0]);

        // Both rows contribute.
        let mask = [1, 1];
        assert_eq!(mean_pool(&hidden, &mask, 3), vec![5.5, 6.0, 6.5]);
    }

    #[test]
    fn mean_pool_zero_mask_is_zero_vector() {
        let hidden = [1.0, 2.0, 3.0, 4.0];
        let mask = [0, 0];
        assert_eq!(mean_pool(&hidden, &mask, 2), vec![0.0, 0.0]);
    }

    #[test]
    fn normalize_produces_unit_norm() {
        let v = normalize_l2(vec![3.0, 4.0]);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn normalize_zero_vector_is_noop() {
        assert_eq!(normalize_l2(vec![0.0, 0.0, 0.0]), vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn vector_bytes_roundtrip_bit_identical() {
        let v = vec![
            1.5f32,
            -2.25,
            0.0,
            -0.0,
            f32::MAX,
            f32::MIN_POSITIVE,
            std::f32::consts::PI,
        ];
        let bytes = vector_to_bytes(&v);
        assert_eq!(bytes.len(), v.len() * 4);

        let restored = vector_from_bytes(&bytes).unwrap();
        let original_bits: Vec<u32> = v.iter().map(|f| f.to_bits()).collect();
        let restored_bits: Vec<u32> =
            restored.iter().map(|f| f.to_bits()).collect();
        assert_eq!(original_bits, restored_bits);
    }

    #[test]
    fn truncated_bytes_are_rejected() {
        let bytes = vector_to_bytes(&[1.0, 2.0]);
        assert!(vector_from_bytes(&bytes[..7]).is_none());
        assert!(vector_from_bytes(&[]).is_some_and(|v| v.is_empty()));
    }
}
