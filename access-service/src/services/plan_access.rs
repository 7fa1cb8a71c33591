//! Plan access resolution.
//!
//! Computes, for an institution, the closure of licensed modules and the
//! closure of licensed permission keys from the plan's explicit grants.
//! Absence of an institution or plan yields empty sets (fail-closed); lookup
//! failures propagate, because an empty result here is indistinguishable from
//! "no access" while actually meaning "resolution broke".

use async_trait::async_trait;
use dashmap::DashMap;
use service_core::error::AppError;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use uuid::Uuid;

use crate::models::Plan;
use crate::services::Database;

/// The resolved license scope of one institution's plan.
#[derive(Debug, Clone, Default)]
pub struct PlanAccess {
    pub module_ids: HashSet<Uuid>,
    pub permission_keys: HashSet<String>,
}

impl PlanAccess {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.module_ids.is_empty() && self.permission_keys.is_empty()
    }
}

#[derive(Debug, Error)]
pub enum ModuleGraphError {
    #[error("module graph contains a parent cycle involving module {0}")]
    ParentCycle(Uuid),
}

/// In-memory module adjacency, loaded once per resolution.
///
/// Keeping the graph explicit makes the closure a pure worklist pass instead
/// of repeated round trips, and makes termination testable in isolation.
#[derive(Debug, Default)]
pub struct ModuleGraph {
    parents: HashMap<Uuid, Uuid>,
    children: HashMap<Uuid, Vec<Uuid>>,
}

impl ModuleGraph {
    pub fn from_edges(edges: impl IntoIterator<Item = (Uuid, Option<Uuid>)>) -> Self {
        let mut graph = Self::default();
        for (module_id, parent_id) in edges {
            if let Some(parent_id) = parent_id {
                graph.parents.insert(module_id, parent_id);
                graph.children.entry(parent_id).or_default().push(module_id);
            }
        }
        graph
    }

    /// The smallest set containing `start` and closed under BOTH parent and
    /// child edges: a license on a submodule licenses its parent group for
    /// display, and a license on a parent licenses its children.
    ///
    /// A `parent_id` cycle is a configuration error and is surfaced rather
    /// than silently truncated.
    pub fn closure(
        &self,
        start: impl IntoIterator<Item = Uuid>,
    ) -> Result<HashSet<Uuid>, ModuleGraphError> {
        if let Some(module_id) = self.find_parent_cycle() {
            return Err(ModuleGraphError::ParentCycle(module_id));
        }

        let mut closed: HashSet<Uuid> = HashSet::new();
        let mut work: Vec<Uuid> = Vec::new();

        for id in start {
            if closed.insert(id) {
                work.push(id);
            }
        }

        while let Some(id) = work.pop() {
            if let Some(&parent_id) = self.parents.get(&id) {
                if closed.insert(parent_id) {
                    work.push(parent_id);
                }
            }
            if let Some(child_ids) = self.children.get(&id) {
                for &child_id in child_ids {
                    if closed.insert(child_id) {
                        work.push(child_id);
                    }
                }
            }
        }

        Ok(closed)
    }

    /// Walk every parent chain once; a module revisited within its own chain
    /// means the configuration is cyclic.
    fn find_parent_cycle(&self) -> Option<Uuid> {
        let mut acyclic: HashSet<Uuid> = HashSet::new();

        for &node in self.parents.keys() {
            let mut path: HashSet<Uuid> = HashSet::new();
            let mut current = node;

            loop {
                if acyclic.contains(&current) {
                    break;
                }
                if !path.insert(current) {
                    return Some(current);
                }
                match self.parents.get(&current) {
                    Some(&parent_id) => current = parent_id,
                    None => break,
                }
            }

            acyclic.extend(path);
        }

        None
    }
}

/// Source of plan/module configuration, implemented by [`Database`].
#[async_trait]
pub trait PlanSource: Send + Sync {
    async fn active_plan(&self, institution_id: Uuid) -> Result<Option<Plan>, AppError>;
    async fn plan_module_ids(&self, plan_id: Uuid) -> Result<Vec<Uuid>, AppError>;
    async fn plan_permission_keys(&self, plan_id: Uuid) -> Result<Vec<String>, AppError>;
    async fn module_edges(&self) -> Result<Vec<(Uuid, Option<Uuid>)>, AppError>;
    async fn permission_keys_for_modules(
        &self,
        module_ids: &[Uuid],
    ) -> Result<Vec<String>, AppError>;
}

#[async_trait]
impl PlanSource for Database {
    async fn active_plan(&self, institution_id: Uuid) -> Result<Option<Plan>, AppError> {
        self.find_active_plan_for_institution(institution_id).await
    }

    async fn plan_module_ids(&self, plan_id: Uuid) -> Result<Vec<Uuid>, AppError> {
        Database::plan_module_ids(self, plan_id).await
    }

    async fn plan_permission_keys(&self, plan_id: Uuid) -> Result<Vec<String>, AppError> {
        Database::plan_permission_keys(self, plan_id).await
    }

    async fn module_edges(&self) -> Result<Vec<(Uuid, Option<Uuid>)>, AppError> {
        Database::module_edges(self).await
    }

    async fn permission_keys_for_modules(
        &self,
        module_ids: &[Uuid],
    ) -> Result<Vec<String>, AppError> {
        Database::permission_keys_for_modules(self, module_ids).await
    }
}

/// TTL cache for resolved plan access, keyed by institution id.
///
/// Staleness up to the TTL is an accepted tradeoff; the invalidation hooks
/// are the correctness backstop for plan changes.
pub struct PlanAccessCache {
    entries: DashMap<Uuid, (Arc<PlanAccess>, Instant)>,
    ttl: Duration,
}

impl PlanAccessCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn get(&self, institution_id: Uuid) -> Option<Arc<PlanAccess>> {
        if let Some(entry) = self.entries.get(&institution_id) {
            let (access, cached_at) = entry.value();
            if cached_at.elapsed() < self.ttl {
                return Some(access.clone());
            }
        }
        self.entries.remove(&institution_id);
        None
    }

    pub fn insert(&self, institution_id: Uuid, access: Arc<PlanAccess>) {
        self.entries
            .insert(institution_id, (access, Instant::now()));
    }

    pub fn invalidate(&self, institution_id: Uuid) {
        self.entries.remove(&institution_id);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

/// Resolves an institution's plan into module and permission key closures.
#[derive(Clone)]
pub struct PlanAccessResolver {
    source: Arc<dyn PlanSource>,
    cache: Arc<PlanAccessCache>,
}

impl PlanAccessResolver {
    pub fn new(source: Arc<dyn PlanSource>, cache: Arc<PlanAccessCache>) -> Self {
        Self { source, cache }
    }

    pub fn cache(&self) -> &PlanAccessCache {
        &self.cache
    }

    /// Resolve the licensed module id set and permission key set.
    ///
    /// No institution, no plan, or an inactive plan all yield empty sets;
    /// callers must treat that as "no access", never as "full access".
    pub async fn resolve(
        &self,
        institution_id: Option<Uuid>,
    ) -> Result<Arc<PlanAccess>, AppError> {
        let Some(institution_id) = institution_id else {
            return Ok(Arc::new(PlanAccess::empty()));
        };

        if let Some(cached) = self.cache.get(institution_id) {
            return Ok(cached);
        }

        let access = Arc::new(self.resolve_uncached(institution_id).await?);
        self.cache.insert(institution_id, access.clone());
        Ok(access)
    }

    async fn resolve_uncached(&self, institution_id: Uuid) -> Result<PlanAccess, AppError> {
        let Some(plan) = self.source.active_plan(institution_id).await? else {
            tracing::debug!(%institution_id, "No active plan; resolving to empty access");
            return Ok(PlanAccess::empty());
        };

        let direct_module_ids = self.source.plan_module_ids(plan.plan_id).await?;
        let graph = ModuleGraph::from_edges(self.source.module_edges().await?);

        let module_ids = graph
            .closure(direct_module_ids)
            .map_err(|e| AppError::BadRequest(anyhow::anyhow!(e)))?;

        let mut permission_keys: HashSet<String> = self
            .source
            .plan_permission_keys(plan.plan_id)
            .await?
            .into_iter()
            .collect();

        let module_id_list: Vec<Uuid> = module_ids.iter().copied().collect();
        permission_keys.extend(
            self.source
                .permission_keys_for_modules(&module_id_list)
                .await?,
        );

        tracing::debug!(
            %institution_id,
            plan = %plan.plan_name,
            modules = module_ids.len(),
            permissions = permission_keys.len(),
            "Resolved plan access"
        );

        Ok(PlanAccess {
            module_ids,
            permission_keys,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn id(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    /// Forest: 1 -> {2, 3}, 2 -> {4}, 5 standalone.
    fn sample_graph() -> ModuleGraph {
        ModuleGraph::from_edges(vec![
            (id(1), None),
            (id(2), Some(id(1))),
            (id(3), Some(id(1))),
            (id(4), Some(id(2))),
            (id(5), None),
        ])
    }

    #[test]
    fn test_closure_pulls_in_ancestors_and_descendants() {
        let graph = sample_graph();
        let closed = graph.closure(vec![id(2)]).unwrap();

        // Parent of 2, and then every descendant reachable from the result.
        assert!(closed.contains(&id(1)));
        assert!(closed.contains(&id(3)));
        assert!(closed.contains(&id(4)));
        assert!(!closed.contains(&id(5)));
    }

    #[test]
    fn test_closure_is_a_fixed_point() {
        let graph = sample_graph();
        let once = graph.closure(vec![id(4)]).unwrap();
        let twice = graph.closure(once.iter().copied()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_closure_of_empty_start_is_empty() {
        let graph = sample_graph();
        assert!(graph.closure(vec![]).unwrap().is_empty());
    }

    #[test]
    fn test_parent_cycle_is_a_configuration_error() {
        let graph = ModuleGraph::from_edges(vec![
            (id(1), Some(id(2))),
            (id(2), Some(id(3))),
            (id(3), Some(id(1))),
        ]);
        let result = graph.closure(vec![id(1)]);
        assert!(matches!(result, Err(ModuleGraphError::ParentCycle(_))));
    }

    struct StaticPlanSource {
        plan: Option<Plan>,
        module_ids: Vec<Uuid>,
        permission_keys: Vec<String>,
        edges: Vec<(Uuid, Option<Uuid>)>,
        module_permission_keys: Vec<(Uuid, String)>,
        fail_lookups: bool,
        calls: AtomicUsize,
    }

    impl StaticPlanSource {
        fn with_plan() -> Self {
            Self {
                plan: Some(Plan {
                    plan_id: id(100),
                    plan_name: "standard".to_string(),
                    active_flag: true,
                    created_utc: Utc::now(),
                }),
                module_ids: vec![id(2)],
                permission_keys: vec!["reports:view".to_string()],
                edges: vec![(id(1), None), (id(2), Some(id(1))), (id(3), Some(id(1)))],
                module_permission_keys: vec![(id(3), "admissions:view".to_string())],
                fail_lookups: false,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl PlanSource for StaticPlanSource {
        async fn active_plan(&self, _institution_id: Uuid) -> Result<Option<Plan>, AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_lookups {
                return Err(AppError::DatabaseError(anyhow::anyhow!("boom")));
            }
            Ok(self.plan.clone())
        }

        async fn plan_module_ids(&self, _plan_id: Uuid) -> Result<Vec<Uuid>, AppError> {
            Ok(self.module_ids.clone())
        }

        async fn plan_permission_keys(&self, _plan_id: Uuid) -> Result<Vec<String>, AppError> {
            Ok(self.permission_keys.clone())
        }

        async fn module_edges(&self) -> Result<Vec<(Uuid, Option<Uuid>)>, AppError> {
            Ok(self.edges.clone())
        }

        async fn permission_keys_for_modules(
            &self,
            module_ids: &[Uuid],
        ) -> Result<Vec<String>, AppError> {
            Ok(self
                .module_permission_keys
                .iter()
                .filter(|(m, _)| module_ids.contains(m))
                .map(|(_, k)| k.clone())
                .collect())
        }
    }

    fn resolver(source: StaticPlanSource) -> PlanAccessResolver {
        PlanAccessResolver::new(
            Arc::new(source),
            Arc::new(PlanAccessCache::new(Duration::from_secs(300))),
        )
    }

    #[tokio::test]
    async fn test_no_institution_resolves_to_empty_access() {
        let resolver = resolver(StaticPlanSource::with_plan());
        let access = resolver.resolve(None).await.unwrap();
        assert!(access.is_empty());
    }

    #[tokio::test]
    async fn test_no_plan_resolves_to_empty_access() {
        let mut source = StaticPlanSource::with_plan();
        source.plan = None;
        let resolver = resolver(source);
        let access = resolver.resolve(Some(id(9))).await.unwrap();
        assert!(access.is_empty());
    }

    #[tokio::test]
    async fn test_resolution_combines_both_closures() {
        let resolver = resolver(StaticPlanSource::with_plan());
        let access = resolver.resolve(Some(id(9))).await.unwrap();

        // Module closure: granted {2}, parent {1}, sibling subtree {3}.
        assert_eq!(
            access.module_ids,
            [id(1), id(2), id(3)].into_iter().collect()
        );
        // Permission closure: explicit grant plus keys owned via module 3.
        assert!(access.permission_keys.contains("reports:view"));
        assert!(access.permission_keys.contains("admissions:view"));
    }

    #[tokio::test]
    async fn test_lookup_failures_propagate() {
        let mut source = StaticPlanSource::with_plan();
        source.fail_lookups = true;
        let resolver = resolver(source);
        assert!(resolver.resolve(Some(id(9))).await.is_err());
    }

    #[tokio::test]
    async fn test_cache_hit_skips_the_source() {
        let source = Arc::new(StaticPlanSource::with_plan());
        let resolver = PlanAccessResolver::new(
            source.clone(),
            Arc::new(PlanAccessCache::new(Duration::from_secs(300))),
        );

        resolver.resolve(Some(id(9))).await.unwrap();
        resolver.resolve(Some(id(9))).await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        resolver.cache().invalidate(id(9));
        resolver.resolve(Some(id(9))).await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }
}
