//! Dense retrieval: encode papers and queries with a sentence encoder,
//! score by dot product on unit-normalized vectors.
//!
//! The encoder is generic over an [`EmbeddingBackend`] so a Supabase
//! `match_by_embedding` RPC can stand in for local inference when the mirror
//! supplies one and dimensions match (§4.4); local inference itself is
//! feature-gated behind `local-embeddings` since it pulls in the `candle`
//! stack, following the same optional-feature precedent used elsewhere in
//! this corpus for cross-encoder/embedding backends.

use async_trait::async_trait;

use crate::error::Result;
use crate::paper::{Paper, RankedList};
use crate::subscription::PlanQuery;

/// A sentence-encoding backend: produces a unit-L2-normalized vector for a
/// batch of texts.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    async fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Dimension of vectors this backend produces, if known up front.
    fn dim(&self) -> Option<usize> {
        None
    }
}

fn normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
    v
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Encodes every paper's `title + ". " + abstract` once per run (skipping
/// papers that already carry a mirror-supplied embedding of matching
/// dimension), in mini-batches of `batch_size`.
pub async fn encode_corpus(
    backend: &dyn EmbeddingBackend,
    papers: &[Paper],
    batch_size: usize,
) -> Result<Vec<(String, Vec<f32>)>> {
    let mut out = Vec::with_capacity(papers.len());
    let mut pending_idx = Vec::new();
    let mut pending_text = Vec::new();

    for paper in papers {
        if let Some(existing) = &paper.embedding {
            if backend.dim().map(|d| d == existing.len()).unwrap_or(true) {
                out.push((paper.id.clone(), normalize(existing.clone())));
                continue;
            }
        }
        pending_idx.push(paper.id.clone());
        pending_text.push(paper.embedding_text());
    }

    for (ids_chunk, text_chunk) in pending_idx.chunks(batch_size).zip(pending_text.chunks(batch_size)) {
        let vectors = backend.encode_batch(text_chunk).await?;
        for (id, vec) in ids_chunk.iter().zip(vectors.into_iter()) {
            out.push((id.clone(), normalize(vec)));
        }
    }

    Ok(out)
}

/// Runs dense retrieval for a single query against a pre-encoded corpus and
/// truncates to `top_k`. Query text is encoded identically to documents.
pub async fn retrieve(
    backend: &dyn EmbeddingBackend,
    corpus: &[(String, Vec<f32>)],
    query: &PlanQuery,
    top_k: usize,
) -> Result<RankedList> {
    let query_vec = backend
        .encode_batch(std::slice::from_ref(&query.query_text))
        .await?
        .into_iter()
        .next()
        .map(normalize)
        .unwrap_or_default();

    let scored: Vec<(String, f32)> = corpus
        .iter()
        .map(|(id, vec)| (id.clone(), dot(&query_vec, vec)))
        .collect();

    Ok(RankedList::from_scores(scored).truncate(top_k))
}

/// Delegates to a Supabase `match_arxiv_papers` RPC instead of local scoring,
/// used when the mirror supplies embeddings and `use_vector_rpc` is set.
pub mod supabase_backend {
    use super::*;
    use crate::fetch::supabase::SupabaseClient;

    /// Calls the configured vector RPC and returns `{paper_id, similarity}`
    /// pairs re-filtered to the active time window by the caller.
    pub async fn match_by_embedding(
        client: &SupabaseClient,
        query_embedding: &[f32],
        match_count: u32,
    ) -> Result<Vec<(String, f32)>> {
        client.match_arxiv_papers(query_embedding, match_count).await
    }
}

#[cfg(feature = "local-embeddings")]
pub mod local {
    //! Local sentence-encoder backend using `candle` + `tokenizers` + `hf-hub`.
    //!
    //! Model weights are fetched lazily from the Hugging Face Hub on first
    //! use and cached on disk by `hf-hub`; device selection (CPU/GPU) and the
    //! Hub model id come from [`LocalEmbeddingConfig`].

    use candle_core::{Device, Tensor};
    use candle_nn::VarBuilder;
    use candle_transformers::models::bert::{BertModel, Config as BertConfig};
    use tokenizers::Tokenizer;

    use super::EmbeddingBackend;
    use crate::error::{DprError, Result};

    pub struct LocalEmbeddingConfig {
        pub model_id: String,
        pub device: Device,
    }

    impl Default for LocalEmbeddingConfig {
        fn default() -> Self {
            Self {
                // A small multilingual GIST-family sentence encoder, as described
                // in the component design for EmbeddingRetriever.
                model_id: "avsolatorio/GIST-small-Embedding-v0".to_string(),
                device: Device::Cpu,
            }
        }
    }

    /// A `candle`-backed BERT encoder loaded once per process.
    pub struct CandleEmbeddingBackend {
        model: BertModel,
        tokenizer: Tokenizer,
        device: Device,
        dim: usize,
    }

    impl CandleEmbeddingBackend {
        pub async fn load(config: LocalEmbeddingConfig) -> Result<Self> {
            let api = hf_hub::api::tokio::Api::new()
                .map_err(|e| DprError::Config(format!("hf-hub init failed: {e}")))?;
            let repo = api.model(config.model_id.clone());

            let tokenizer_path = repo
                .get("tokenizer.json")
                .await
                .map_err(|e| DprError::Config(format!("failed to fetch tokenizer: {e}")))?;
            let tokenizer = Tokenizer::from_file(&tokenizer_path)
                .map_err(|e| DprError::Config(format!("failed to load tokenizer: {e}")))?;

            let config_path = repo
                .get("config.json")
                .await
                .map_err(|e| DprError::Config(format!("failed to fetch model config: {e}")))?;
            let bert_config: BertConfig = serde_json::from_str(&std::fs::read_to_string(config_path)?)?;

            let weights_path = repo
                .get("model.safetensors")
                .await
                .map_err(|e| DprError::Config(format!("failed to fetch model weights: {e}")))?;
            let vb = unsafe {
                VarBuilder::from_mmaped_safetensors(&[weights_path], candle_core::DType::F32, &config.device)
                    .map_err(|e| DprError::Config(format!("failed to map model weights: {e}")))?
            };
            let model = BertModel::load(vb, &bert_config)
                .map_err(|e| DprError::Config(format!("failed to build model: {e}")))?;

            Ok(Self {
                dim: bert_config.hidden_size,
                model,
                tokenizer,
                device: config.device,
            })
        }

        fn mean_pool(hidden: &Tensor, mask: &Tensor) -> candle_core::Result<Tensor> {
            let mask = mask.to_dtype(candle_core::DType::F32)?.unsqueeze(2)?;
            let summed = (hidden.broadcast_mul(&mask))?.sum(1)?;
            let counts = mask.sum(1)?.clamp(1e-9, f64::MAX)?;
            summed.broadcast_div(&counts)
        }
    }

    #[async_trait::async_trait]
    impl EmbeddingBackend for CandleEmbeddingBackend {
        async fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let encodings = self
                .tokenizer
                .encode_batch(texts.to_vec(), true)
                .map_err(|e| DprError::Parse(format!("tokenization failed: {e}")))?;

            let ids: Vec<Vec<u32>> = encodings.iter().map(|e| e.get_ids().to_vec()).collect();
            let mask: Vec<Vec<u32>> = encodings.iter().map(|e| e.get_attention_mask().to_vec()).collect();

            let ids = Tensor::new(ids, &self.device).map_err(|e| DprError::Fatal(e.to_string()))?;
            let mask_t = Tensor::new(mask, &self.device).map_err(|e| DprError::Fatal(e.to_string()))?;

            let hidden = self
                .model
                .forward(&ids, &mask_t, None)
                .map_err(|e| DprError::Fatal(format!("encoder forward pass failed: {e}")))?;
            let pooled =
                Self::mean_pool(&hidden, &mask_t).map_err(|e| DprError::Fatal(format!("pooling failed: {e}")))?;

            pooled
                .to_vec2::<f32>()
                .map_err(|e| DprError::Fatal(format!("tensor extraction failed: {e}")))
        }

        fn dim(&self) -> Option<usize> {
            Some(self.dim)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedBackend;

    #[async_trait]
    impl EmbeddingBackend for FixedBackend {
        async fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| if t.contains("match") { vec![1.0, 0.0] } else { vec![0.0, 1.0] })
                .collect())
        }
    }

    #[tokio::test]
    async fn ranks_by_dot_product_on_unit_vectors() {
        let backend = FixedBackend;
        let corpus = vec![
            ("p1".to_string(), normalize(vec![1.0, 0.0])),
            ("p2".to_string(), normalize(vec![0.0, 1.0])),
        ];
        let query = crate::subscription::PlanQuery {
            query_type: "keyword".to_string(),
            tag: "T".to_string(),
            paper_tag: "keyword:T".to_string(),
            query_text: "match this".to_string(),
            query_terms: vec![],
            boolean_expr: String::new(),
            logic_cn: String::new(),
            must_have: vec![],
            optional: vec![],
            exclude: vec![],
            source_profile_id: "p".to_string(),
            source_rule_id: None,
            source_query_id: None,
            source: "manual".to_string(),
            or_soft_weight: None,
        };
        let list = retrieve(&backend, &corpus, &query, 10).await.unwrap();
        assert_eq!(list.entries[0].paper_id, "p1");
    }
}
