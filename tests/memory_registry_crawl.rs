use depgraph_harvester::providers::{MemoryProvider, RecordCache};
use depgraph_harvester::{
    CrawlOptions, GraphBuilder, MetadataProvider, NodeStatus, Package, ProviderRegistry,
};
use std::sync::Arc;
use std::time::Duration;

const REGISTRY: &str = r#"[
    {"name": "poetry-core"},
    {"name": "cffi", "requires": [{"name": "pycparser"}]},
    {"name": "pycparser"},
    {"name": "requests", "requires": [
        {"name": "charset-normalizer"},
        {"name": "idna"},
        {"name": "urllib3"},
        {"name": "certifi"},
        {"name": "PySocks", "condition": "feature == 'socks'"},
        {"name": "pytest", "condition": "feature == 'testing'"}
    ]},
    {"name": "charset-normalizer"},
    {"name": "idna"},
    {"name": "urllib3", "requires": [
        {"name": "brotli", "condition": "feature == 'brotli'"},
        {"name": "ghost-package"}
    ]},
    {"name": "certifi"},
    {"name": "PySocks"},
    {"name": "pytest", "requires": [{"name": "pluggy"}]},
    {"name": "pluggy"},
    {"name": "brotli"}
]"#;

fn pypi(name: &str) -> Package {
    Package::new(name, "pypi")
}

fn setup(options: &CrawlOptions) -> (Arc<MemoryProvider>, GraphBuilder) {
    let cache = Arc::new(RecordCache::new(options.cache_capacity()));
    let provider = Arc::new(
        MemoryProvider::from_json("pypi", REGISTRY, cache)
            .unwrap()
            .with_latency(Duration::from_millis(2)),
    );
    let registry = ProviderRegistry::new(options.concurrency_limit)
        .with_provider(Arc::clone(&provider) as Arc<dyn MetadataProvider>);
    let builder = GraphBuilder::from_options(Arc::new(registry), options).unwrap();
    (provider, builder)
}

#[tokio::test]
async fn test_depgraph_nodeps() {
    let (_, builder) = setup(&CrawlOptions::default());

    builder.add_subgraph(&pypi("Poetry_Core")).await.unwrap();

    let graph = builder.graph();
    assert_eq!(graph.node_count(), 1);
    assert_eq!(graph.edge_count(), 0);
    assert_eq!(graph.status(&pypi("poetry-core")), None);
}

#[tokio::test]
async fn test_depgraph_nocond() {
    let (_, builder) = setup(&CrawlOptions::default());

    builder.add_subgraph(&pypi("cffi")).await.unwrap();

    assert!(builder.graph().has_edge(&pypi("cffi"), &pypi("pycparser")));
}

#[tokio::test]
async fn test_depgraph_maxdepth() {
    let options = CrawlOptions::from_json(r#"{"max_depth": 2}"#).unwrap();
    let (_, builder) = setup(&options);

    builder.add_subgraph(&pypi("requests")).await.unwrap();

    let graph = builder.graph();
    assert!(graph.contains(&pypi("urllib3")));
    assert_eq!(graph.status(&pypi("urllib3")), Some(NodeStatus::Incomplete));
    assert!(!graph.contains(&pypi("PySocks")));
}

#[tokio::test]
async fn test_depgraph_full() {
    let (provider, builder) = setup(&CrawlOptions::default());

    builder.add_subgraph(&pypi("requests")).await.unwrap();

    let graph = builder.graph();
    let socks = pypi("requests").with_condition("feature == \"socks\"");
    assert!(graph.has_edge(&pypi("requests"), &socks));
    assert!(graph.has_edge(&socks, &pypi("PySocks")));

    let brotli = pypi("urllib3").with_condition("feature == \"brotli\"");
    assert!(graph.has_edge(&brotli, &pypi("brotli")));

    let ghost = pypi("ghost-package");
    assert_eq!(graph.status(&ghost), Some(NodeStatus::Invalid));
    assert!(graph.dependencies(&ghost).is_empty());

    assert!(graph.nodes().all(|node| node.status != Some(NodeStatus::Incomplete)));
    // Nine projects plus the failed lookup of "ghost-package".
    assert_eq!(provider.fetch_count(), 10);
}

#[tokio::test]
async fn test_depgraph_exclude_features() {
    let options = CrawlOptions::from_json(r#"{"exclude_features": ["test*"]}"#).unwrap();
    let (_, builder) = setup(&options);

    builder.add_subgraph(&pypi("requests")).await.unwrap();

    let graph = builder.graph();
    assert!(!graph.contains(&pypi("requests").with_condition("feature == \"testing\"")));
    assert!(!graph.contains(&pypi("pytest")));
    assert!(graph.contains(&pypi("PySocks")));
}

#[tokio::test]
async fn test_overlapping_crawls_share_cache() {
    let options = CrawlOptions::default();
    let (provider, first) = setup(&options);
    let registry = Arc::new(
        ProviderRegistry::new(options.concurrency_limit)
            .with_provider(Arc::clone(&provider) as Arc<dyn MetadataProvider>),
    );
    let second = GraphBuilder::new(registry);

    let root = pypi("requests");
    let (a, b) = tokio::join!(first.add_subgraph(&root), second.add_subgraph(&root));
    a.unwrap();
    b.unwrap();

    let (first, second) = (first.into_graph(), second.into_graph());
    assert_eq!(first.node_count(), second.node_count());
    assert_eq!(first.edge_count(), second.edge_count());
    // Found projects are fetched once in total. The missing one is only
    // coalesced when both crawls reach it at the same moment.
    assert!((10..=11).contains(&provider.fetch_count()));
}

#[tokio::test]
async fn test_single_permit_full_crawl() {
    let options = CrawlOptions::from_json(r#"{"concurrency_limit": 1}"#).unwrap();
    let (_, builder) = setup(&options);

    tokio::time::timeout(Duration::from_secs(10), builder.add_subgraph(&pypi("requests")))
        .await
        .expect("crawl stalled with one permit")
        .unwrap();

    let (_, unbounded) = setup(&CrawlOptions::default());
    unbounded.add_subgraph(&pypi("requests")).await.unwrap();

    let (graph, expected) = (builder.graph(), unbounded.graph());
    assert_eq!(graph.node_count(), expected.node_count());
    assert_eq!(graph.edge_count(), expected.edge_count());
}
