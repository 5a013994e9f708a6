//! Graph cache
//!
//! Persists one assembled graph per matrix as a JSON blob under a configured
//! directory, named `<matrix><affix>`. Writes go to a temp file in the same
//! directory and are renamed into place, so a reader never observes a
//! partially written cache entry. A missing or corrupt entry loads as
//! absent; the caller decides whether to rebuild.

use crate::{Graph, GraphSet};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

/// Default cache file affix.
pub const DEFAULT_AFFIX: &str = ".cache.json";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache IO error: {0}")]
    Io(#[from] io::Error),
    #[error("cache encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Where cache entries live and how they are named.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub dir: PathBuf,
    pub affix: String,
}

impl CacheConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            affix: DEFAULT_AFFIX.to_string(),
        }
    }

    pub fn with_affix(mut self, affix: impl Into<String>) -> Self {
        self.affix = affix.into();
        self
    }
}

/// Store/load adapter for per-matrix graph blobs.
pub struct MatrixCache {
    config: CacheConfig,
}

impl MatrixCache {
    pub fn new(config: CacheConfig) -> Self {
        Self { config }
    }

    /// Cache file path for a matrix name.
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.config.dir.join(format!("{}{}", name, self.config.affix))
    }

    /// Persist one graph, atomically replacing any previous entry.
    pub fn store(&self, graph: &Graph) -> Result<PathBuf, CacheError> {
        std::fs::create_dir_all(&self.config.dir)?;
        let path = self.path_for(&graph.name);
        let tmp = path.with_extension("tmp");
        let bytes = serde_json::to_vec(graph)?;
        std::fs::write(&tmp, &bytes)?;
        // Same-directory rename; readers see either the old or the new blob.
        std::fs::rename(&tmp, &path)?;
        info!(matrix = %graph.name, path = %path.display(), "graph cached");
        Ok(path)
    }

    /// Load one graph. Absent and corrupt entries both yield `Ok(None)`.
    pub fn load(&self, name: &str) -> Result<Option<Graph>, CacheError> {
        let path = self.path_for(name);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_slice(&bytes) {
            Ok(graph) => Ok(Some(graph)),
            Err(e) => {
                warn!(matrix = name, path = %path.display(), error = %e, "corrupt cache entry ignored");
                Ok(None)
            }
        }
    }

    /// Load every cached matrix into one snapshot keyed by matrix name.
    /// A missing cache directory yields an empty set.
    pub fn load_all(&self) -> Result<GraphSet, CacheError> {
        let mut graphs = GraphSet::new();
        let entries = match std::fs::read_dir(&self.config.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(graphs),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(name) = file_name
                .to_str()
                .and_then(|f| f.strip_suffix(self.config.affix.as_str()))
            else {
                continue;
            };
            if let Some(graph) = self.load(name)? {
                graphs.insert(graph.name.clone(), graph);
            }
        }
        Ok(graphs)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Entity, EntityKind, EntityName};

    fn temp_cache(tag: &str) -> (MatrixCache, PathBuf) {
        let dir = std::env::temp_dir().join(format!("attackmatrix-{}-{}", tag, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        (MatrixCache::new(CacheConfig::new(&dir)), dir)
    }

    fn sample_graph(name: &str) -> Graph {
        let mut graph = Graph::new(name);
        let mut actor = Entity::new(
            EntityKind::Actor,
            EntityName::Many(vec!["APT12".to_string(), "IXESHE".to_string()]),
            "A threat group.".to_string(),
        );
        actor
            .relation_mut(EntityKind::Technique)
            .unwrap()
            .insert("T1059".to_string());
        graph.actors.insert("G0005".to_string(), actor);
        graph.tactics.insert(
            "TA0002".to_string(),
            Entity::new(EntityKind::Tactic, "Execution".into(), "Run code.".to_string()),
        );
        graph
    }

    #[test]
    fn test_store_load_round_trip() {
        let (cache, dir) = temp_cache("roundtrip");
        let graph = sample_graph("Enterprise");
        cache.store(&graph).unwrap();

        let loaded = cache.load("Enterprise").unwrap().unwrap();
        assert_eq!(loaded, graph);
        // Name shape survives: actor stays a list, tactic stays scalar.
        assert!(matches!(loaded.actors["G0005"].name, EntityName::Many(_)));
        assert!(matches!(loaded.tactics["TA0002"].name, EntityName::One(_)));

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_absent_entry_loads_as_none() {
        let (cache, dir) = temp_cache("absent");
        assert!(cache.load("Enterprise").unwrap().is_none());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_corrupt_entry_loads_as_none() {
        let (cache, dir) = temp_cache("corrupt");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(cache.path_for("Enterprise"), b"{not json").unwrap();
        assert!(cache.load("Enterprise").unwrap().is_none());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_store_overwrites_and_leaves_no_temp_file() {
        let (cache, dir) = temp_cache("overwrite");
        let mut graph = sample_graph("Enterprise");
        cache.store(&graph).unwrap();

        graph.tools.insert(
            "S0002".to_string(),
            Entity::new(
                EntityKind::Tool,
                EntityName::Many(vec!["Mimikatz".to_string()]),
                "A credential dumper.".to_string(),
            ),
        );
        cache.store(&graph).unwrap();

        let loaded = cache.load("Enterprise").unwrap().unwrap();
        assert!(loaded.tools.contains_key("S0002"));

        let leftovers: Vec<_> = std::fs::read_dir(&dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "tmp"))
            .collect();
        assert!(leftovers.is_empty());

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_load_all_collects_every_matrix() {
        let (cache, dir) = temp_cache("loadall");
        cache.store(&sample_graph("Enterprise")).unwrap();
        cache.store(&sample_graph("ICS")).unwrap();
        // Unrelated files are ignored.
        std::fs::write(dir.join("enterprise-attack.json"), b"{}").unwrap();

        let graphs = cache.load_all().unwrap();
        assert_eq!(graphs.len(), 2);
        assert!(graphs.contains_key("Enterprise"));
        assert!(graphs.contains_key("ICS"));

        let _ = std::fs::remove_dir_all(dir);
    }
}
