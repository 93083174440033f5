//! Depth- and strength-bounded traversal of the entity relationship graph.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::debug;

use coderag_core::{
    repo_allowed, EdgeDirection, Entity, EntityKey, RagError, ReachedEntity, RelationKind,
    Relationship, RepoFilter, Result, Store, TraversedEdge,
};

/// Which edges a traversal follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraversalMode {
    /// What the roots depend on.
    Outgoing,
    /// Dependencies and dependents.
    Both,
}

/// Result of a traversal.
#[derive(Debug, Clone, Default)]
pub struct Traversal {
    /// Entities reached, roots excluded, ordered by depth then path strength.
    pub reached: Vec<ReachedEntity>,

    /// Every distinct edge followed, in discovery order.
    pub edges: Vec<TraversedEdge>,
}

type EdgeId = (EntityKey, EntityKey, RelationKind);

/// Graph expansion over a store.
pub struct GraphExpander<S> {
    store: Arc<S>,
}

impl<S> Clone for GraphExpander<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: Store> GraphExpander<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Resolve a name to entities.
    ///
    /// Tries a `repo:entity_id` key, then exact id / name / qualified name
    /// (case-insensitive), then the last segment of a qualified name.
    pub async fn resolve(
        &self,
        name: &str,
        repos: Option<&RepoFilter>,
        limit: usize,
    ) -> Result<Vec<Entity>> {
        let name = name.trim();
        if name.is_empty() {
            return Ok(Vec::new());
        }

        if let Some((repo, id)) = name.split_once(':') {
            if !repo.is_empty() && !id.is_empty() && !id.starts_with(':') && repo_allowed(repos, repo) {
                if let Some(entity) = self.store.get_entity(&EntityKey::new(repo, id)).await? {
                    return Ok(vec![entity]);
                }
            }
        }

        let found = self.store.find_entities(name, repos, limit).await?;
        if !found.is_empty() {
            return Ok(found);
        }

        match last_segment(name) {
            Some(segment) => self.store.find_entities(segment, repos, limit).await,
            None => Ok(Vec::new()),
        }
    }

    /// Breadth-first traversal from `roots`, at most `depth` hops, following
    /// edges with `strength >= min_strength`.
    ///
    /// No entity is reached twice. When several paths reach an entity at the
    /// same hop, the strongest product of edge strengths wins.
    pub async fn traverse(
        &self,
        roots: &[Entity],
        depth: u32,
        min_strength: f32,
        mode: TraversalMode,
    ) -> Result<Traversal> {
        let mut visited: BTreeSet<EntityKey> = roots.iter().map(Entity::key).collect();
        let mut frontier: Vec<(EntityKey, f32)> = visited.iter().map(|k| (k.clone(), 1.0)).collect();
        let mut seen_edges: BTreeSet<EdgeId> = BTreeSet::new();
        let mut traversal = Traversal::default();

        for level in 1..=depth {
            if frontier.is_empty() {
                break;
            }

            let mut next: BTreeMap<EntityKey, f32> = BTreeMap::new();

            for (key, strength) in &frontier {
                let mut hops: Vec<(Relationship, EdgeDirection)> = self
                    .store
                    .get_outgoing_edges(key, min_strength)
                    .await?
                    .into_iter()
                    .map(|e| (e, EdgeDirection::Outgoing))
                    .collect();

                if mode == TraversalMode::Both {
                    hops.extend(
                        self.store
                            .get_incoming_edges(key, min_strength)
                            .await?
                            .into_iter()
                            .map(|e| (e, EdgeDirection::Incoming)),
                    );
                }

                for (edge, direction) in hops {
                    let neighbour = match direction {
                        EdgeDirection::Outgoing => edge.to.clone(),
                        EdgeDirection::Incoming => edge.from.clone(),
                    };
                    let path_strength = strength * edge.strength;

                    if seen_edges.insert((edge.from.clone(), edge.to.clone(), edge.kind)) {
                        traversal.edges.push(TraversedEdge {
                            edge,
                            depth: level,
                            direction,
                        });
                    }

                    if visited.contains(&neighbour) {
                        continue;
                    }

                    let best = next.entry(neighbour).or_insert(path_strength);
                    *best = best.max(path_strength);
                }
            }

            let mut reached_level = Vec::with_capacity(next.len());
            for (key, path_strength) in &next {
                let entity = self.store.get_entity(key).await?.ok_or_else(|| {
                    RagError::integrity(format!("Relationship references missing entity {}", key))
                })?;
                visited.insert(key.clone());
                reached_level.push(ReachedEntity {
                    entity,
                    depth: level,
                    path_strength: *path_strength,
                });
            }

            reached_level.sort_by(|a, b| {
                b.path_strength
                    .total_cmp(&a.path_strength)
                    .then_with(|| a.entity.key().cmp(&b.entity.key()))
            });
            traversal.reached.extend(reached_level);

            frontier = next.into_iter().collect();
        }

        debug!(
            "Traversal from {} root(s): {} reached, {} edges",
            roots.len(),
            traversal.reached.len(),
            traversal.edges.len()
        );

        Ok(traversal)
    }
}

/// Last segment of a qualified name, if the name has more than one.
fn last_segment(name: &str) -> Option<&str> {
    let idx = ["::", ".", "/", "#"]
        .iter()
        .filter_map(|sep| name.rfind(sep).map(|i| i + sep.len()))
        .max()?;
    let segment = &name[idx..];
    (!segment.is_empty()).then_some(segment)
}
