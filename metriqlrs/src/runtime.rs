use std::path::Path;
use std::sync::Arc;

use futures::future::join_all;

use crate::cache::{cache_key, PlanCache};
use crate::config::MetriqlConfig;
use crate::dialect::DialectKind;
use crate::error::Result;
use crate::graph::SemanticGraph;
use crate::query_builder::CompiledQuery;
use crate::request::QueryRequest;

/// Shared compiler state for async callers: one graph, one config and an
/// optional compiled query cache.
#[derive(Debug, Clone)]
pub struct MetriqlRuntime {
    graph: Arc<SemanticGraph>,
    config: Arc<MetriqlConfig>,
    cache: Option<Arc<PlanCache>>,
}

impl MetriqlRuntime {
    pub fn new(graph: SemanticGraph, config: MetriqlConfig) -> Self {
        let cache = config
            .cache
            .enabled
            .then(|| Arc::new(PlanCache::with_config(&config.cache)));
        Self {
            graph: Arc::new(graph),
            config: Arc::new(config),
            cache,
        }
    }

    /// Load models from `root` and configuration from the default locations.
    pub fn from_dir<P: AsRef<Path>>(root: P) -> Result<Self> {
        let graph = SemanticGraph::load_from_dir(root)?;
        Ok(Self::new(graph, MetriqlConfig::load_default()))
    }

    pub fn graph(&self) -> &SemanticGraph {
        &self.graph
    }

    pub fn config(&self) -> &MetriqlConfig {
        &self.config
    }

    /// Compile for the configured dialect.
    pub async fn compile(&self, request: &QueryRequest) -> Result<Arc<CompiledQuery>> {
        self.compile_for(request, self.config.render.dialect).await
    }

    pub async fn compile_for(
        &self,
        request: &QueryRequest,
        dialect: DialectKind,
    ) -> Result<Arc<CompiledQuery>> {
        let build = || async {
            self.config
                .render
                .builder()
                .compile(&self.graph, request, dialect.dialect())
        };
        match &self.cache {
            Some(cache) => {
                let key = cache_key(dialect, request)?;
                cache.get_or_try_init(&key, build).await
            }
            None => build().await.map(Arc::new),
        }
    }

    /// Compile independent requests concurrently; results keep request order.
    pub async fn compile_batch(&self, requests: &[QueryRequest]) -> Vec<Result<Arc<CompiledQuery>>> {
        tracing::debug!(requests = requests.len(), "compiling batch");
        join_all(requests.iter().map(|r| self.compile(r))).await
    }
}
