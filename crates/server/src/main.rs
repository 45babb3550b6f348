//! Guideline RAG server entry point
//!
//! Composition root: configuration, tracing, metrics, persistence,
//! retrieval, and the generation backend are constructed once here and
//! handed to the router as shared state.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use guideline_rag_config::{load_settings, Settings};
use guideline_rag_llm::{GenerationConfig, LlmBackend, OllamaBackend, PromptBuilder, StreamingGenerator};
use guideline_rag_persistence::{InMemoryInteractionStore, InteractionStore, ScyllaConfig};
use guideline_rag_retrieval::{
    Bm25Index, ChunkCorpus, Embedder, HashEmbedder, HttpCrossEncoder, HttpEmbedder,
    HybridRetriever, QdrantStore, RetrieverConfig, VectorStoreConfig,
};
use guideline_rag_server::{create_router, init_metrics, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Priority: env vars > config/{env}.yaml > config/default.yaml > defaults
    let env = std::env::var("GUIDELINE_RAG_ENV").ok();
    let config = match load_settings(env.as_deref()) {
        Ok(settings) => {
            // Tracing not yet initialized, use eprintln for early logging
            eprintln!(
                "Loaded configuration (env: {})",
                env.as_deref().unwrap_or("default")
            );
            settings
        }
        Err(e) => {
            eprintln!("Warning: Failed to load config: {}. Using defaults.", e);
            Settings::default()
        }
    };
    config.validate()?;

    init_tracing(&config);
    tracing::info!("Starting guideline RAG server v{}", env!("CARGO_PKG_VERSION"));

    let metrics_handle = if config.observability.metrics_enabled {
        let handle = init_metrics();
        if handle.is_some() {
            tracing::info!("Initialized Prometheus metrics at /metrics");
        }
        handle
    } else {
        None
    };

    let interactions: Arc<dyn InteractionStore> = if config.persistence.enabled {
        let scylla_config = ScyllaConfig {
            hosts: config.persistence.scylla_hosts.clone(),
            keyspace: config.persistence.keyspace.clone(),
            replication_factor: config.persistence.replication_factor,
        };
        match guideline_rag_persistence::init(scylla_config).await {
            Ok(store) => {
                tracing::info!(
                    hosts = ?config.persistence.scylla_hosts,
                    keyspace = %config.persistence.keyspace,
                    "ScyllaDB persistence initialized"
                );
                Arc::new(store)
            }
            Err(e) => {
                tracing::error!(
                    "Failed to initialize ScyllaDB: {}. Falling back to in-memory.",
                    e
                );
                Arc::new(InMemoryInteractionStore::new())
            }
        }
    } else {
        tracing::info!("Persistence disabled, using in-memory interaction store");
        Arc::new(InMemoryInteractionStore::new())
    };

    let backend: Arc<dyn LlmBackend> =
        Arc::new(OllamaBackend::new(GenerationConfig::from(&config.generation))?);
    let generator = Arc::new(StreamingGenerator::new(
        backend,
        PromptBuilder::new(),
        config.generation.apply_chat_template,
    ));

    let mut state = AppState::new(Arc::new(config.clone()), generator, interactions);
    if let Some(handle) = metrics_handle {
        state = state.with_metrics_handle(handle);
    }

    if config.retrieval.enabled {
        match init_retriever(&config).await {
            Ok(retriever) => {
                tracing::info!(
                    collection = %config.retrieval.qdrant_collection,
                    "Hybrid retrieval initialized"
                );
                state = state.with_retriever(Arc::new(retriever));
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to initialize retrieval: {}. Generation will run without context.",
                    e
                );
            }
        }
    } else {
        tracing::info!("Retrieval disabled");
    }

    let _cleanup = state.sessions.start_cleanup_task();

    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}

fn init_tracing(config: &Settings) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &config.observability.log_level;
        format!("guideline_rag={},tower_http=info", level).into()
    });

    let subscriber = tracing_subscriber::registry().with(env_filter);
    let fmt_layer = if config.observability.log_json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };
    subscriber.with(fmt_layer).init();
}

/// Build the hybrid retriever: corpus, BM25 index, embedder, Qdrant
/// dense index, and the optional cross-encoder client.
async fn init_retriever(config: &Settings) -> Result<HybridRetriever, Box<dyn std::error::Error>> {
    let retrieval = &config.retrieval;

    let corpus = Arc::new(ChunkCorpus::load(&retrieval.chunks_path)?);
    tracing::info!(chunks = corpus.len(), path = %retrieval.chunks_path, "Corpus loaded");

    let sparse = Arc::new(Bm25Index::build(
        corpus.chunks().iter().map(|c| c.content.as_str()),
        retrieval.bm25_k1,
        retrieval.bm25_b,
    ));

    let dim = retrieval.vector_dim as usize;
    let embedder: Arc<dyn Embedder> = match &retrieval.embedding_endpoint {
        Some(endpoint) => {
            tracing::info!(endpoint = %endpoint, "Using remote embedder");
            Arc::new(HttpEmbedder::new(endpoint, dim)?)
        }
        None => {
            tracing::warn!("No embedding endpoint configured, using hash embedder");
            Arc::new(HashEmbedder::new(dim))
        }
    };

    let mut retriever = HybridRetriever::new(
        RetrieverConfig::from(retrieval),
        Arc::clone(&corpus),
        Arc::clone(&embedder),
        sparse,
    );

    let store_config = VectorStoreConfig {
        endpoint: retrieval.qdrant_endpoint.clone(),
        collection: retrieval.qdrant_collection.clone(),
        vector_dim: retrieval.vector_dim,
        api_key: retrieval.qdrant_api_key.clone(),
    };
    match QdrantStore::new(store_config) {
        Ok(store) => match store.ensure_collection().await {
            Ok(()) => {
                bootstrap_dense_index(&store, &corpus, embedder.as_ref()).await;
                retriever = retriever.with_dense_index(Arc::new(store));
            }
            Err(e) => {
                tracing::warn!(
                    "Qdrant unavailable: {}. Degrading to sparse-only retrieval.",
                    e
                );
            }
        },
        Err(e) => {
            tracing::warn!(
                "Failed to build Qdrant client: {}. Degrading to sparse-only retrieval.",
                e
            );
        }
    }

    if let Some(endpoint) = &retrieval.reranker_endpoint {
        tracing::info!(endpoint = %endpoint, "Using remote cross-encoder");
        retriever = retriever.with_cross_encoder(Arc::new(HttpCrossEncoder::new(endpoint)?));
    }

    Ok(retriever)
}

/// Index the corpus into Qdrant when the collection is behind it.
/// Failures degrade dense retrieval rather than aborting startup.
async fn bootstrap_dense_index(store: &QdrantStore, corpus: &ChunkCorpus, embedder: &dyn Embedder) {
    let points = match store.point_count().await {
        Ok(count) => count,
        Err(e) => {
            tracing::warn!("Could not read Qdrant point count: {}", e);
            return;
        }
    };
    if points as usize >= corpus.len() {
        return;
    }

    tracing::info!(
        points,
        chunks = corpus.len(),
        "Dense index behind corpus, embedding chunks"
    );
    let mut embeddings = Vec::with_capacity(corpus.len());
    for chunk in corpus.chunks() {
        match embedder.embed(&chunk.content).await {
            Ok(embedding) => embeddings.push(embedding),
            Err(e) => {
                tracing::warn!(
                    chunk_index = chunk.chunk_index,
                    "Embedding failed: {}. Skipping dense bootstrap.",
                    e
                );
                return;
            }
        }
    }

    if let Err(e) = store.index_chunks(corpus.chunks(), &embeddings).await {
        tracing::warn!("Dense bootstrap indexing failed: {}", e);
    }
}
