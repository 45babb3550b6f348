//! Application state
//!
//! Read-mostly singletons constructed once in the composition root and
//! shared by every request handler.

use std::sync::Arc;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusHandle;

use guideline_rag_config::Settings;
use guideline_rag_llm::StreamingGenerator;
use guideline_rag_persistence::InteractionStore;
use guideline_rag_retrieval::HybridRetriever;

use crate::session::SessionManager;

/// Application state
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub sessions: Arc<SessionManager>,
    /// None when retrieval is disabled; generation then runs without
    /// context.
    pub retriever: Option<Arc<HybridRetriever>>,
    pub generator: Arc<StreamingGenerator>,
    pub interactions: Arc<dyn InteractionStore>,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(
        settings: Arc<Settings>,
        generator: Arc<StreamingGenerator>,
        interactions: Arc<dyn InteractionStore>,
    ) -> Self {
        let sessions = Arc::new(SessionManager::new(
            settings.server.max_sessions,
            Duration::from_secs(settings.server.session_ttl_secs),
            settings.generation.max_history_length,
        ));
        Self {
            settings,
            sessions,
            retriever: None,
            generator,
            interactions,
            metrics: None,
        }
    }

    pub fn with_retriever(mut self, retriever: Arc<HybridRetriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    pub fn with_metrics_handle(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}
