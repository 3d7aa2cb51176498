//! Integration tests for the search service.
//!
//! Every test runs the full service (translator, index manager, bulk
//! executor, codec) against the in-memory cluster and data store, so no
//! external Elasticsearch is needed.
//!
//! # Running Tests
//! ```bash
//! cargo test --test integration
//!
//! # Only happy-path tests
//! cargo test --test integration happy
//!
//! # Only failure scenario tests
//! cargo test --test integration failure
//! ```
//!
//! # Test Organization
//! - `happy_*` - Normal operation: lifecycle, writes, queries, paging, rebuilds
//! - `failure_*` - Failure scenarios: cluster down, store down, rejected writes

use std::collections::HashSet;
use std::sync::Arc;

use search_sync::{
    App, DomainObject, InMemoryCluster, InMemoryDataStore, Pager, PropertyValue, SearchConfig,
    SearchError, SearchService, ServiceState, Terms,
};

// =============================================================================
// Helpers
// =============================================================================

fn service_with(config: SearchConfig) -> (Arc<InMemoryCluster>, Arc<InMemoryDataStore>, SearchService) {
    let cluster = Arc::new(InMemoryCluster::new());
    let store = Arc::new(InMemoryDataStore::new());
    let service = SearchService::new(config, cluster.clone(), store.clone());
    (cluster, store, service)
}

async fn started(config: SearchConfig) -> (Arc<InMemoryCluster>, Arc<InMemoryDataStore>, SearchService) {
    let (cluster, store, service) = service_with(config);
    service.start().await;
    (cluster, store, service)
}

fn book(id: &str, name: &str, pages: i64) -> DomainObject {
    DomainObject::new(id, "book", "app").with_name(name).with_property("pages", pages)
}

fn ids(objects: &[DomainObject]) -> HashSet<String> {
    objects.iter().map(|o| o.id.clone()).collect()
}

fn id_set(expected: &[&str]) -> HashSet<String> {
    expected.iter().map(|s| s.to_string()).collect()
}

async fn index_library(service: &SearchService) {
    let books = [
        book("b1", "Dune Messiah", 256).with_property("genre", "scifi").with_tags(["scifi", "classic"]),
        book("b2", "Children of Dune", 444).with_property("genre", "scifi").with_tags(["scifi"]),
        book("b3", "Neuromancer", 412).with_property("genre", "cyberpunk").with_tags(["classic"]),
        DomainObject::new("u1", "user", "app").with_name("Alice"),
    ];
    service.index_all_root(&books).await.unwrap();
}

// =============================================================================
// Happy Path Tests
// =============================================================================

#[tokio::test]
async fn happy_start_creates_root_index() {
    let (cluster, _, service) = service_with(SearchConfig::default());
    assert_eq!(service.state(), ServiceState::Created);

    service.start().await;
    assert_eq!(service.state(), ServiceState::Running);
    assert!(service.is_running());
    assert_eq!(cluster.indices(), vec!["app_1".to_string()]);
    assert_eq!(cluster.aliases_of("app_1"), vec!["app".to_string()]);
    assert_eq!(cluster.shard_count("app_1"), Some(5));

    // starting again changes nothing
    service.start().await;
    assert_eq!(cluster.indices(), vec!["app_1".to_string()]);

    assert!(service.shutdown().await);
    assert_eq!(service.state(), ServiceState::Stopped);
}

#[tokio::test]
async fn happy_index_find_and_count() {
    let (_, _, service) = started(SearchConfig::default()).await;
    let dune = book("b1", "Dune", 412).with_property("genre", "scifi").with_tags(["scifi"]);
    service.index_root(&dune).await.unwrap();

    assert_eq!(service.find_by_id_root("b1").await, Some(dune.clone()));
    assert_eq!(service.find_by_id_root("missing").await, None);
    assert_eq!(service.find_by_id("", "b1").await, None);
    assert_eq!(service.get_count_root(Some("book")).await, 1);
    assert_eq!(service.get_count_root(Some("user")).await, 0);

    service.unindex_root(&dune).await.unwrap();
    assert_eq!(service.get_count_root(None).await, 0);
}

#[tokio::test]
async fn happy_blank_input_is_a_no_op() {
    let (cluster, _, service) = started(SearchConfig::default()).await;
    service.index(" ", &book("b1", "Dune", 1)).await.unwrap();
    service.index_root(&book(" ", "Dune", 1)).await.unwrap();
    service.index_all_root(&[]).await.unwrap();
    assert_eq!(cluster.bulk_request_count(), 0);

    assert!(service.find_query_root(None, " ", None).await.is_empty());
    assert!(service.find_prefix("app", None, "", "du", None).await.is_empty());
    assert!(service.find_terms("app", None, &Terms::new(), true, None).await.is_empty());
    assert_eq!(service.get_count(" ", None).await, 0);
}

#[tokio::test]
async fn happy_nested_property_queries() {
    let (_, _, service) = started(SearchConfig::default()).await;
    index_library(&service).await;

    let long_books = service.find_query_root(Some("book"), "properties.pages:[400 TO *]", None).await;
    assert_eq!(ids(&long_books), id_set(&["b2", "b3"]));

    let scifi = service.find_query_root(None, "properties.genre:scifi", None).await;
    assert_eq!(ids(&scifi), id_set(&["b1", "b2"]));

    let combined = service
        .find_query_root(Some("book"), "properties.genre:scifi AND properties.pages:[400 TO *]", None)
        .await;
    assert_eq!(ids(&combined), id_set(&["b2"]));

    // key and value must come from the same property entry
    let crossed = service.find_query_root(None, "properties.genre:412", None).await;
    assert!(crossed.is_empty());
}

#[tokio::test]
async fn happy_find_terms_with_range_suffix() {
    let (_, _, service) = started(SearchConfig::default()).await;
    index_library(&service).await;

    let terms = Terms::from([("properties.pages >=".to_string(), PropertyValue::from(412))]);
    let found = service.find_terms("app", Some("book"), &terms, true, None).await;
    assert_eq!(ids(&found), id_set(&["b2", "b3"]));

    let terms = Terms::from([
        ("properties.genre".to_string(), PropertyValue::from("scifi")),
        ("properties.pages <".to_string(), PropertyValue::from(300)),
    ]);
    let all = service.find_terms("app", Some("book"), &terms, true, None).await;
    assert_eq!(ids(&all), id_set(&["b1"]));
    let any = service.find_terms("app", Some("book"), &terms, false, None).await;
    assert_eq!(ids(&any), id_set(&["b1", "b2"]));

    assert_eq!(service.get_count_terms("app", Some("book"), &terms).await, 1);
}

#[tokio::test]
async fn happy_field_queries() {
    let (_, _, service) = started(SearchConfig::default()).await;
    index_library(&service).await;

    let prefixed = service.find_prefix("app", Some("book"), "name", "neu", None).await;
    assert_eq!(ids(&prefixed), id_set(&["b3"]));

    let wildcard = service.find_wildcard("app", None, "name", "*mancer", None).await;
    assert_eq!(ids(&wildcard), id_set(&["b3"]));

    let listed = service
        .find_term_in_list("app", None, "id", &["b1".to_string(), "u1".to_string()], None)
        .await;
    assert_eq!(ids(&listed), id_set(&["b1", "u1"]));

    let by_ids = service.find_by_ids("app", &["b2".to_string(), "b3".to_string()]).await;
    assert_eq!(ids(&by_ids), id_set(&["b2", "b3"]));

    let tagged = service
        .find_tagged("app", Some("book"), &["scifi".to_string(), "classic".to_string()], None)
        .await;
    assert_eq!(ids(&tagged), id_set(&["b1"]));
    assert!(service.find_tagged("app", None, &[" ".to_string()], None).await.is_empty());
}

#[tokio::test]
async fn happy_find_similar_excludes_source_object() {
    let (_, _, service) = started(SearchConfig::default()).await;
    index_library(&service).await;

    let similar = service
        .find_similar("app", Some("book"), Some("b1"), &["name".to_string()], "Dune", None)
        .await;
    assert_eq!(ids(&similar), id_set(&["b2"]));

    let on_properties = service
        .find_similar("app", Some("book"), None, &["properties.genre".to_string()], "cyberpunk", None)
        .await;
    assert_eq!(ids(&on_properties), id_set(&["b3"]));
}

#[tokio::test]
async fn happy_find_tags_by_prefix() {
    let (_, _, service) = started(SearchConfig::default()).await;
    let tags: Vec<DomainObject> = ["rust", "ruby", "go"]
        .iter()
        .map(|t| DomainObject::new(format!("tag:{t}"), "tag", "app").with_field("tag", *t))
        .collect();
    service.index_all_root(&tags).await.unwrap();

    let found = service.find_tags("app", "ru", None).await;
    assert_eq!(ids(&found), id_set(&["tag:rust", "tag:ruby"]));
    assert!(service.find_tags("app", "", None).await.is_empty());
}

#[tokio::test]
async fn happy_find_nearby() {
    let (_, _, service) = started(SearchConfig::default()).await;
    let objects = [
        DomainObject::new("shop1", "shop", "app").with_name("Corner shop"),
        DomainObject::new("shop2", "shop", "app").with_name("Harbour shop"),
        DomainObject::new("a1", "address", "app").with_parent("shop1").with_latlng("40.7128,-74.0060"),
        DomainObject::new("a2", "address", "app").with_parent("shop2").with_latlng("51.5072,-0.1276"),
    ];
    service.index_all_root(&objects).await.unwrap();

    let shops = service.find_nearby("app", "shop", "*", 10.0, 40.73, -73.99, None).await;
    assert_eq!(ids(&shops), id_set(&["shop1"]));

    let filtered = service.find_nearby("app", "shop", "harbour", 10.0, 40.73, -73.99, None).await;
    assert!(filtered.is_empty());

    let addresses = service.find_nearby("app", "address", "", 10.0, 51.5, -0.12, None).await;
    assert_eq!(ids(&addresses), id_set(&["a2"]));
}

#[tokio::test]
async fn happy_search_after_paging() {
    let (_, _, service) = started(SearchConfig::default()).await;
    for i in 1..=5 {
        service
            .index_root(&DomainObject::new(format!("n{i}"), "note", "app"))
            .await
            .unwrap();
    }

    let mut pager = Pager::new(2).with_sort("_docid", true);
    let mut pages = Vec::new();
    loop {
        let page = service.find_query_root(Some("note"), "*", Some(&mut pager)).await;
        if page.is_empty() {
            break;
        }
        pages.push(page.into_iter().map(|o| o.id).collect::<Vec<_>>());
    }
    assert_eq!(pages, vec![vec!["n5", "n4"], vec!["n3", "n2"], vec!["n1"]]);
    assert_eq!(pager.count, 5);
    assert!(pager.last_key.is_some());

    let mut offset = Pager::new(2).with_page(2).with_sort("_docid", false);
    let page = service.find_query_root(Some("note"), "*", Some(&mut offset)).await;
    assert_eq!(page.into_iter().map(|o| o.id).collect::<Vec<_>>(), vec!["n3", "n4"]);
}

#[tokio::test]
async fn happy_read_from_store() {
    let config = SearchConfig { read_from_index: false, ..Default::default() };
    let (_, store, service) = started(config).await;

    store.put(DomainObject::new("b1", "book", "app").with_name("Stored name"));
    service
        .index_all_root(&[
            DomainObject::new("b1", "book", "app").with_name("Indexed name"),
            DomainObject::new("b2", "book", "app").with_name("Only indexed"),
        ])
        .await
        .unwrap();

    let mut pager = Pager::new(10).with_sort("_docid", false);
    let found = service.find_query_root(Some("book"), "*", Some(&mut pager)).await;
    let names: Vec<_> = found.iter().map(|o| o.name.clone().unwrap_or_default()).collect();
    assert_eq!(names, vec!["Stored name", "Only indexed"]);
}

#[tokio::test]
async fn happy_async_mode_batches_in_background() {
    let config = SearchConfig { async_enabled: true, ..Default::default() };
    let (cluster, _, service) = service_with(config);

    let err = service.index_root(&book("b1", "Dune", 1)).await.unwrap_err();
    assert!(matches!(err, SearchError::NotStarted));

    service.start().await;
    let books: Vec<_> = (0..3).map(|i| book(&format!("b{i}"), "Dune", i)).collect();
    service.index_all_root(&books).await.unwrap();
    assert!(service.refresh("app").await);
    assert_eq!(service.get_count_root(Some("book")).await, 3);
    assert_eq!(service.bulk_stats().operations_sent, 3);
    assert!(cluster.bulk_request_count() >= 1);

    assert!(service.shutdown().await);
    let err = service.index_root(&book("b9", "Dune", 1)).await.unwrap_err();
    assert!(matches!(err, SearchError::NotStarted));
}

#[tokio::test]
async fn happy_shared_app_lifecycle() {
    let (cluster, _, service) = started(SearchConfig::default()).await;

    assert!(service.on_app_created(&App::shared("tenant")).await);
    assert_eq!(cluster.indices(), vec!["app_1".to_string()]);
    assert!(cluster.aliases_of("app_1").contains(&"tenant".to_string()));

    service
        .index("tenant", &DomainObject::new("t1", "book", "tenant").with_name("Tenant book"))
        .await
        .unwrap();
    service.index_root(&book("r1", "Root book", 10)).await.unwrap();
    assert_eq!(service.get_count("tenant", None).await, 1);
    assert_eq!(service.get_count_root(None).await, 2);
    assert_eq!(service.find_by_id("tenant", "t1").await.map(|o| o.appid), Some("tenant".to_string()));

    assert!(service.on_app_deleted(&App::shared("tenant")).await);
    assert_eq!(cluster.doc_count("app_1"), 1);
    assert!(!cluster.aliases_of("app_1").contains(&"tenant".to_string()));
    assert_eq!(service.find_by_id_root("r1").await.map(|o| o.id), Some("r1".to_string()));
}

#[tokio::test]
async fn happy_child_app_lifecycle() {
    let (cluster, _, service) = started(SearchConfig::default()).await;

    assert!(service.on_app_created(&App::new("child")).await);
    assert!(cluster.indices().contains(&"child_1".to_string()));
    assert_eq!(cluster.shard_count("child_1"), Some(2));
    assert!(!service.on_app_created(&App::new(" ")).await);

    service
        .index("child", &DomainObject::new("c1", "note", "child"))
        .await
        .unwrap();
    assert_eq!(service.get_count("child", None).await, 1);
    assert_eq!(service.get_count_root(None).await, 0);

    assert!(service.on_app_deleted(&App::new("child")).await);
    assert_eq!(cluster.indices(), vec!["app_1".to_string()]);
}

#[tokio::test]
async fn happy_rebuild_from_store() {
    let config = SearchConfig { reindex_batch_size: 2, ..Default::default() };
    let (cluster, store, service) = started(config).await;
    store.put_all((0..5).map(|i| book(&format!("s{i}"), "Stored", i)));

    let mut pager = Pager::new(2);
    assert!(service.rebuild_index(&App::new("app"), Some(&mut pager)).await);
    assert_eq!(pager.count, 5);

    let current = service.index_manager().index_name_for_alias("app").await;
    assert_ne!(current, "app_1");
    assert_eq!(cluster.indices(), vec![current]);
    assert_eq!(service.get_count_root(Some("book")).await, 5);
}

#[tokio::test]
async fn happy_unindex_all_by_terms() {
    let config = SearchConfig { unindex_batch_size: 1, ..Default::default() };
    let (_, _, service) = started(config).await;
    index_library(&service).await;

    let terms = Terms::from([("properties.genre".to_string(), PropertyValue::from("scifi"))]);
    assert_eq!(service.unindex_all_by_terms("app", &terms, true).await.unwrap(), 2);
    assert_eq!(service.get_count_root(None).await, 2);

    // empty terms remove everything
    assert_eq!(service.unindex_all_by_terms_root(&Terms::new(), true).await.unwrap(), 2);
    assert_eq!(service.get_count_root(None).await, 0);
}

#[tokio::test]
async fn happy_query_validation() {
    let (_, _, service) = started(SearchConfig::default()).await;
    index_library(&service).await;

    assert!(service.is_valid_query_string("name:dune AND type:book"));
    assert!(service.is_valid_query_string("*"));
    assert!(!service.is_valid_query_string("name:(broken"));
    assert!(!service.is_valid_query_string(" "));

    // malformed input matches everything
    let all = service.find_query_root(None, "name:(broken", None).await;
    assert_eq!(all.len(), 4);

    // too deep to rewrite gives nothing
    let deep = format!("{}properties.pages:1{}", "(x OR ".repeat(12), ")".repeat(12));
    assert!(service.find_query_root(None, &deep, None).await.is_empty());
}

// =============================================================================
// Failure Scenario Tests
// =============================================================================

#[tokio::test]
async fn failure_cluster_unavailable_degrades_reads() {
    let (cluster, _, service) = started(SearchConfig::default()).await;
    index_library(&service).await;
    cluster.set_unavailable(true);

    assert!(!service.is_cluster_ok().await);
    assert!(service.find_query_root(None, "*", None).await.is_empty());
    assert_eq!(service.find_by_id_root("b1").await, None);
    assert_eq!(service.get_count_root(None).await, 0);
    // writes are logged, not surfaced
    service.index_root(&book("b9", "Lost", 1)).await.unwrap();
    assert_eq!(service.unindex_all_by_terms_root(&Terms::new(), true).await.unwrap(), 0);
    assert_eq!(service.bulk_stats().requests_failed, 1);

    cluster.set_unavailable(false);
    assert!(service.is_cluster_ok().await);
    assert_eq!(service.get_count_root(None).await, 4);
}

#[tokio::test]
async fn failure_start_with_cluster_down_still_runs() {
    let (cluster, _, service) = service_with(SearchConfig::default());
    cluster.set_unavailable(true);
    service.start().await;
    assert_eq!(service.state(), ServiceState::Running);
    assert!(cluster.indices().is_empty());
}

#[tokio::test]
async fn failure_indexing_errors_surface_when_configured() {
    let config = SearchConfig { fail_on_indexing_errors: true, ..Default::default() };
    let (cluster, _, service) = started(config).await;

    cluster.reject_items([400]);
    let err = service.index_root(&book("b1", "Dune", 1)).await.unwrap_err();
    assert!(matches!(err, SearchError::IndexingFailed(_)));

    cluster.fail_bulk_requests(1);
    let err = service.index_root(&book("b1", "Dune", 1)).await.unwrap_err();
    assert!(matches!(err, SearchError::IndexingFailed(_)));

    service.index_root(&book("b1", "Dune", 1)).await.unwrap();
    assert_eq!(service.get_count_root(None).await, 1);

    // removing something never indexed is a no-op, not an error
    service.unindex_root(&book("b9", "Never", 9)).await.unwrap();
    assert_eq!(service.bulk_stats().documents_failed, 2);
}

#[tokio::test]
async fn failure_indexing_errors_are_counted_by_default() {
    let (cluster, _, service) = started(SearchConfig::default()).await;

    cluster.reject_items([400]);
    service
        .index_all_root(&[book("b1", "Dune", 1), book("b2", "Emma", 2)])
        .await
        .unwrap();
    assert_eq!(service.bulk_stats().documents_failed, 1);
    assert_eq!(service.get_count_root(None).await, 1);
}

#[tokio::test]
async fn failure_store_unavailable_serves_index_documents() {
    let config = SearchConfig { read_from_index: false, ..Default::default() };
    let (_, store, service) = started(config).await;
    store.put(DomainObject::new("b1", "book", "app").with_name("Stored name"));
    service
        .index_root(&DomainObject::new("b1", "book", "app").with_name("Indexed name"))
        .await
        .unwrap();
    store.set_unavailable(true);

    let found = service.find_query_root(Some("book"), "*", None).await;
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].name.as_deref(), Some("Indexed name"));

    // rebuilds need the store
    assert!(!service.rebuild_index(&App::new("app"), None).await);
}

#[tokio::test]
async fn failure_unknown_app_gives_empty_results() {
    let (_, _, service) = started(SearchConfig::default()).await;
    assert!(service.find_query("nobody", None, "*", None).await.is_empty());
    assert_eq!(service.find_by_id("nobody", "1").await, None);
    assert_eq!(service.get_count("nobody", None).await, 0);
    assert!(!service.refresh("nobody").await);
}
