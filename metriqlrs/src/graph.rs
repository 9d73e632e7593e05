//! In-memory semantic graph: sources, metrics and the entity join edges
//! between sources.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};

use glob::glob;
use serde::Serialize;

use crate::error::{MetriqlError, Result};
use crate::models::{EntityType, Metric, Source};

/// Cardinality of a join edge, read left (from) to right (to).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Cardinality {
    OneToOne,
    ManyToOne,
    OneToMany,
}

impl Cardinality {
    fn between(from: EntityType, to: EntityType) -> Option<Self> {
        match (from.is_unique(), to.is_unique()) {
            (true, true) => Some(Cardinality::OneToOne),
            (false, true) => Some(Cardinality::ManyToOne),
            (true, false) => Some(Cardinality::OneToMany),
            (false, false) => None,
        }
    }

    /// Joining along this edge never duplicates rows of the left side.
    pub fn is_fanout_safe(self) -> bool {
        matches!(self, Cardinality::OneToOne | Cardinality::ManyToOne)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JoinEdge {
    pub from_source: String,
    pub to_source: String,
    pub entity: String,
    pub cardinality: Cardinality,
}

/// Which edges a path search may traverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeFilter {
    /// Only edges that cannot fan out the left side.
    FanoutSafe,
    Any,
}

impl EdgeFilter {
    fn allows(self, edge: &JoinEdge) -> bool {
        match self {
            EdgeFilter::FanoutSafe => edge.cardinality.is_fanout_safe(),
            EdgeFilter::Any => true,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct SemanticGraph {
    sources: BTreeMap<String, Source>,
    metrics: BTreeMap<String, Metric>,
    measure_owner: HashMap<String, String>,
    /// Outgoing edges per source, sorted by (to_source, entity).
    edges: BTreeMap<String, Vec<JoinEdge>>,
}

impl SemanticGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_parts(sources: Vec<Source>, metrics: Vec<Metric>) -> Result<Self> {
        let mut graph = SemanticGraph::new();
        for source in sources {
            if graph.sources.contains_key(&source.name) {
                return Err(MetriqlError::Model(format!(
                    "duplicate source {}",
                    source.name
                )));
            }
            for measure in source.measures.keys() {
                if let Some(owner) = graph.measure_owner.get(measure) {
                    return Err(MetriqlError::Model(format!(
                        "measure {measure} defined on both {owner} and {}",
                        source.name
                    )));
                }
                graph
                    .measure_owner
                    .insert(measure.clone(), source.name.clone());
            }
            graph.sources.insert(source.name.clone(), source);
        }
        for metric in metrics {
            if graph.metrics.contains_key(&metric.name) {
                return Err(MetriqlError::Model(format!(
                    "duplicate metric {}",
                    metric.name
                )));
            }
            graph.metrics.insert(metric.name.clone(), metric);
        }
        graph.build_edges();
        tracing::debug!(
            sources = graph.sources.len(),
            metrics = graph.metrics.len(),
            "semantic graph built"
        );
        Ok(graph)
    }

    pub fn load_from_dir<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref();
        let sources_dir = root.join("sources");
        if !sources_dir.exists() {
            return Err(MetriqlError::Model(format!(
                "sources directory not found: {}",
                sources_dir.display()
            )));
        }
        let mut sources = Vec::new();
        for path in yaml_files(&sources_dir)? {
            let contents = fs::read_to_string(&path)?;
            let source: Source = serde_yaml::from_str(&contents)?;
            sources.push(source);
        }
        let mut metrics = Vec::new();
        let metrics_dir = root.join("metrics");
        if metrics_dir.exists() {
            for path in yaml_files(&metrics_dir)? {
                let contents = fs::read_to_string(&path)?;
                let metric: Metric = serde_yaml::from_str(&contents)?;
                metrics.push(metric);
            }
        }
        Self::from_parts(sources, metrics)
    }

    fn build_edges(&mut self) {
        let mut edges: BTreeMap<String, Vec<JoinEdge>> = BTreeMap::new();
        for (from_name, from) in &self.sources {
            let out = edges.entry(from_name.clone()).or_default();
            for (to_name, to) in &self.sources {
                if from_name == to_name {
                    continue;
                }
                for (entity_name, from_entity) in &from.entities {
                    let Some(to_entity) = to.entities.get(entity_name) else {
                        continue;
                    };
                    if let Some(cardinality) =
                        Cardinality::between(from_entity.entity_type, to_entity.entity_type)
                    {
                        out.push(JoinEdge {
                            from_source: from_name.clone(),
                            to_source: to_name.clone(),
                            entity: entity_name.clone(),
                            cardinality,
                        });
                    }
                }
            }
        }
        self.edges = edges;
    }

    pub fn get_source(&self, name: &str) -> Option<&Source> {
        self.sources.get(name)
    }

    pub fn get_metric(&self, name: &str) -> Option<&Metric> {
        self.metrics.get(name)
    }

    pub fn sources(&self) -> impl Iterator<Item = &Source> {
        self.sources.values()
    }

    pub fn metrics(&self) -> impl Iterator<Item = &Metric> {
        self.metrics.values()
    }

    /// Source owning a measure.
    pub fn measure_owner(&self, measure: &str) -> Option<&Source> {
        self.measure_owner
            .get(measure)
            .and_then(|s| self.sources.get(s))
    }

    /// Direct edges leaving `source`, ordered by target source then entity.
    pub fn edges_from(&self, source: &str) -> &[JoinEdge] {
        self.edges.get(source).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Direct edges from `from` to `to`.
    pub fn edges_between(&self, from: &str, to: &str) -> Vec<&JoinEdge> {
        self.edges_from(from)
            .iter()
            .filter(|e| e.to_source == to)
            .collect()
    }

    /// Shortest join path by edge count. Ties resolve to the path whose
    /// hops come first lexically (target source, then entity).
    pub fn join_path(&self, from: &str, to: &str, filter: EdgeFilter) -> Option<Vec<JoinEdge>> {
        if from == to {
            return self.sources.contains_key(from).then(Vec::new);
        }
        self.reachable(from, filter).remove(to)
    }

    /// Shortest join path to every source reachable from `from`, including
    /// `from` itself with an empty path.
    pub fn reachable(&self, from: &str, filter: EdgeFilter) -> BTreeMap<String, Vec<JoinEdge>> {
        let mut paths: BTreeMap<String, Vec<JoinEdge>> = BTreeMap::new();
        if !self.sources.contains_key(from) {
            return paths;
        }
        let mut visited: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        visited.insert(from);
        queue.push_back(from);
        paths.insert(from.to_string(), Vec::new());
        while let Some(current) = queue.pop_front() {
            let base = paths.get(current).cloned().unwrap_or_default();
            for edge in self.edges_from(current) {
                if !filter.allows(edge) || !visited.insert(edge.to_source.as_str()) {
                    continue;
                }
                let mut path = base.clone();
                path.push(edge.clone());
                paths.insert(edge.to_source.clone(), path);
                queue.push_back(edge.to_source.as_str());
            }
        }
        paths
    }
}

fn yaml_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for pattern in ["*.yml", "*.yaml"] {
        for entry in glob(&format!("{}/{pattern}", dir.display()))
            .map_err(|e| MetriqlError::Other(e.into()))?
            .flatten()
        {
            files.push(entry);
        }
    }
    files.sort();
    Ok(files)
}
