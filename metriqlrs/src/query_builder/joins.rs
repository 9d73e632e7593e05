//! Join sites: every distinct entity path from the primary source that a
//! query needs is one site, scanned and joined once.

use crate::error::{MetriqlError, Result};
use crate::graph::{Cardinality, JoinEdge, SemanticGraph};
use crate::models::Source;
use crate::request::QUALIFIER_SEP;

use super::plan::JoinKind;

#[derive(Debug, Clone)]
pub(crate) struct JoinSite<'g> {
    pub source: &'g Source,
    /// Edges from the primary source to this site.
    pub edges: Vec<JoinEdge>,
    pub parent: Option<usize>,
    /// True when a value filter applies to this site.
    pub filtered: bool,
}

impl JoinSite<'_> {
    /// Entity this site is joined to its parent on.
    pub fn entity(&self) -> Option<&str> {
        self.edges.last().map(|e| e.entity.as_str())
    }

    pub fn cardinality(&self) -> Option<Cardinality> {
        self.edges.last().map(|e| e.cardinality)
    }

    pub fn entity_path(&self) -> Vec<&str> {
        self.edges.iter().map(|e| e.entity.as_str()).collect()
    }

    /// Optional lookups keep every left row; a filtered site must match.
    pub fn join_kind(&self) -> JoinKind {
        if self.filtered {
            JoinKind::Inner
        } else {
            JoinKind::LeftOuter
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct SiteTable<'g> {
    sites: Vec<JoinSite<'g>>,
}

impl<'g> SiteTable<'g> {
    pub fn new(primary: &'g Source) -> Self {
        Self {
            sites: vec![JoinSite {
                source: primary,
                edges: Vec::new(),
                parent: None,
                filtered: false,
            }],
        }
    }

    pub fn primary(&self) -> &'g Source {
        self.sites[0].source
    }

    pub fn get(&self, idx: usize) -> &JoinSite<'g> {
        &self.sites[idx]
    }

    pub fn iter(&self) -> impl Iterator<Item = &JoinSite<'g>> {
        self.sites.iter()
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn mark_filtered(&mut self, idx: usize) {
        self.sites[idx].filtered = true;
    }

    /// Register every prefix of `path` as a site and return the index of the
    /// full path. An entity path already bound to a different source is an
    /// ambiguity the request has to resolve.
    pub fn register(&mut self, path: &[JoinEdge], graph: &'g SemanticGraph) -> Result<usize> {
        let mut current = 0;
        for depth in 1..=path.len() {
            let prefix = &path[..depth];
            let hop = &prefix[depth - 1];
            if let Some(existing) = self.find(prefix) {
                let bound = self.sites[existing].source;
                if bound.name != hop.to_source {
                    let mut sources = vec![bound.name.clone(), hop.to_source.clone()];
                    sources.sort();
                    return Err(MetriqlError::AmbiguousDimension {
                        name: prefix
                            .iter()
                            .map(|e| e.entity.as_str())
                            .collect::<Vec<_>>()
                            .join(QUALIFIER_SEP),
                        sources,
                    });
                }
                current = existing;
                continue;
            }
            let source = graph.get_source(&hop.to_source).ok_or_else(|| {
                MetriqlError::Model(format!("join edge targets unknown source {}", hop.to_source))
            })?;
            self.sites.push(JoinSite {
                source,
                edges: prefix.to_vec(),
                parent: Some(current),
                filtered: false,
            });
            current = self.sites.len() - 1;
            tracing::debug!(
                site = current,
                source = %source.name,
                path = %self.qualifier(current),
                "registered join site"
            );
        }
        Ok(current)
    }

    fn find(&self, prefix: &[JoinEdge]) -> Option<usize> {
        self.sites.iter().position(|site| {
            site.edges.len() == prefix.len()
                && site
                    .edges
                    .iter()
                    .zip(prefix)
                    .all(|(a, b)| a.entity == b.entity)
        })
    }

    /// Entity path of a site joined with `__`; empty for the primary source.
    pub fn qualifier(&self, idx: usize) -> String {
        self.sites[idx].entity_path().join(QUALIFIER_SEP)
    }

    /// Name of a site-local column once the site is joined onto the primary.
    pub fn qualify(&self, idx: usize, column: &str) -> String {
        if idx == 0 {
            column.to_string()
        } else {
            format!("{}{QUALIFIER_SEP}{column}", self.qualifier(idx))
        }
    }
}
