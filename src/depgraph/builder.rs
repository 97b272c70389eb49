//! Concurrent, depth-bounded dependency graph crawler.
//!
//! [`GraphBuilder::add_subgraph`] normalizes a root package, then expands it
//! level by level: the children of every node are processed concurrently,
//! each child being normalized, deduplicated against the packages already
//! seen in this crawl, and expanded in turn while the depth budget lasts.
//!
//! Version constraints are ignored entirely; every distinct
//! (name, source, condition) triple is its own node.

use super::filters::FilterSet;
use super::graph::DependencyGraph;
use crate::config::{ConfigError, CrawlOptions};
use crate::executor::ProviderRegistry;
use crate::model::{DepthBudget, NodeStatus, Package};
use crate::traits::{CrawlError, ProviderError};
use futures::future::{try_join_all, BoxFuture};
use futures::FutureExt;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, instrument, warn};

/// Mutable crawl state. Visitation checks and claims happen under one lock so
/// that a package reachable through two concurrent branches is expanded once.
#[derive(Debug, Default)]
struct CrawlState {
    graph: DependencyGraph,
    /// Packages added to the graph or rejected as invalid.
    visited: HashSet<Package>,
}

/// What a child task does after consulting the crawl state.
enum Decision {
    Expand,
    Stop,
}

/// Dependency graph builder.
///
/// One builder accumulates one graph; several roots may be added to it.
pub struct GraphBuilder {
    registry: Arc<ProviderRegistry>,
    max_depth: DepthBudget,
    filters: FilterSet,
    state: Mutex<CrawlState>,
}

impl GraphBuilder {
    /// Creates a builder with no depth limit and no package filter.
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self {
            registry,
            max_depth: DepthBudget::Unbounded,
            filters: FilterSet::new(),
            state: Mutex::new(CrawlState::default()),
        }
    }

    pub fn from_options(registry: Arc<ProviderRegistry>, options: &CrawlOptions) -> Result<Self, ConfigError> {
        options.validate()?;
        Ok(Self::new(registry)
            .with_max_depth(options.depth_budget())
            .with_filters(options.package_filter()?))
    }

    /// Sets the maximum depth level. The root sits at level one.
    pub fn with_max_depth(mut self, max_depth: DepthBudget) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_filters(mut self, filters: FilterSet) -> Self {
        self.filters = filters;
        self
    }

    /// Read-only snapshot of the graph built so far.
    pub fn graph(&self) -> DependencyGraph {
        self.lock().graph.clone()
    }

    pub fn into_graph(self) -> DependencyGraph {
        self.state.into_inner().unwrap_or_else(PoisonError::into_inner).graph
    }

    /// Number of packages processed so far, including invalid ones.
    pub fn visited_count(&self) -> usize {
        self.lock().visited.len()
    }

    fn lock(&self) -> MutexGuard<'_, CrawlState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a package and its dependencies to the graph.
    ///
    /// A root that was already processed, by an earlier call or as somebody's
    /// dependency, is left untouched.
    ///
    /// # Errors
    ///
    /// Fails if the root itself cannot be normalized, if no provider claims a
    /// package, or if a provider reports an unexpected error. Invalid
    /// children and unfetchable dependency lists are recorded in the graph
    /// instead.
    #[instrument(skip(self, root), fields(root = %root))]
    pub async fn add_subgraph(&self, root: &Package) -> Result<(), CrawlError> {
        let root = self.registry.normalize(root).await?;

        {
            let mut state = self.lock();
            if !state.visited.insert(root.clone()) {
                debug!(package = %root, "Root already processed");
                return Ok(());
            }
            state.graph.add_node(&root);
        }

        info!(package = %root, "Starting crawl");
        self.expand(root, self.max_depth.descend()).await?;

        let state = self.lock();
        info!(
            nodes = state.graph.node_count(),
            edges = state.graph.edge_count(),
            "Finished crawl"
        );
        Ok(())
    }

    /// Processes every child of an already claimed `node` concurrently.
    fn expand(&self, node: Package, depth: DepthBudget) -> BoxFuture<'_, Result<(), CrawlError>> {
        async move {
            debug!(package = %node, ?depth, "Expanding");

            let children = match self.registry.children(&node).await {
                Ok(children) => children,
                Err(CrawlError::Provider(ProviderError::DependenciesFetch { reason, .. })) => {
                    warn!(package = %node, %reason, "Dependencies unavailable, marking incomplete");
                    self.lock().graph.mark(&node, NodeStatus::Incomplete);
                    return Ok(());
                }
                Err(e) => return Err(e),
            };

            // The first unexpected failure drops the remaining siblings.
            try_join_all(
                children
                    .into_iter()
                    .map(|child| self.process_child(&node, child, depth)),
            )
            .await?;
            Ok(())
        }
        .boxed()
    }

    async fn process_child(&self, parent: &Package, child: Package, depth: DepthBudget) -> Result<(), CrawlError> {
        if !self.filters.allows(&child) {
            debug!(package = %child, "Filtered out");
            return Ok(());
        }

        let child = match self.registry.normalize(&child).await {
            Ok(normalized) => normalized,
            Err(CrawlError::Provider(ProviderError::Validation { reason, .. })) => {
                debug!(package = %child, %reason, "Invalid package");
                let mut state = self.lock();
                state.visited.insert(child.clone());
                state.graph.add_edge(parent, &child);
                state.graph.mark(&child, NodeStatus::Invalid);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let decision = {
            let mut state = self.lock();
            if state.visited.contains(&child) {
                // Already-processed nodes still get linked.
                if state.graph.contains(&child) {
                    state.graph.add_edge(parent, &child);
                }
                Decision::Stop
            } else if !depth.is_exhausted() {
                state.visited.insert(child.clone());
                state.graph.add_edge(parent, &child);
                Decision::Expand
            } else {
                // The parent stays visited, so this status sticks.
                state.graph.mark(parent, NodeStatus::Incomplete);
                Decision::Stop
            }
        };

        match decision {
            Decision::Expand => self.expand(child, depth.descend()).await,
            Decision::Stop => Ok(()),
        }
    }
}
