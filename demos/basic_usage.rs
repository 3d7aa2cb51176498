// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Basic search-sync usage example.
//!
//! Demonstrates:
//! 1. Starting the service (root index created on start)
//! 2. Indexing a few objects with custom properties through the async bulk worker
//! 3. Query strings over nested properties, term maps, search-after paging
//! 4. Rebuilding the index from the data store behind the alias
//! 5. Displaying bulk stats and raw metrics
//! 6. Clean shutdown
//!
//! Runs entirely in memory; swap `InMemoryCluster` for `HttpCluster` to talk
//! to a real Elasticsearch.
//!
//! # Run
//!
//! ```bash
//! RUST_LOG=search_sync=debug cargo run --example basic_usage
//! ```

use std::sync::Arc;

use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use search_sync::{
    App, DomainObject, InMemoryCluster, InMemoryDataStore, Pager, PropertyValue, SearchConfig,
    SearchService, Terms,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .init();

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║           search-sync: Basic Usage Example                    ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Configure and start the service
    // ─────────────────────────────────────────────────────────────────────────
    println!("📦 Configuring search-sync...");

    let config = SearchConfig {
        async_enabled: true,
        reindex_batch_size: 2,
        ..Default::default()
    };
    let cluster = Arc::new(InMemoryCluster::new());
    let store = Arc::new(InMemoryDataStore::new());
    let service = SearchService::new(config, cluster.clone(), store.clone());
    println!("   State: {}", service.state());

    service.start().await;
    println!("   ✅ Service running! Indices: {:?}", cluster.indices());

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Index a small library
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📝 Indexing 4 books...");
    let books = vec![
        DomainObject::new("b1", "book", "app")
            .with_name("Dune")
            .with_property("pages", 412)
            .with_property("genre", "scifi"),
        DomainObject::new("b2", "book", "app")
            .with_name("Children of Dune")
            .with_property("pages", 444)
            .with_property("genre", "scifi"),
        DomainObject::new("b3", "book", "app")
            .with_name("Emma")
            .with_property("pages", 320)
            .with_property("genre", "classic"),
        DomainObject::new("b4", "book", "app")
            .with_name("Neuromancer")
            .with_property("pages", 271)
            .with_property("genre", "cyberpunk"),
    ];
    store.put_all(books.clone());
    service.index_all_root(&books).await?;
    service.refresh("app").await;
    println!("   ✅ Indexed {} books", service.get_count_root(Some("book")).await);

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Queries
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🔍 Query: properties.pages:[400 TO *]");
    for book in service.find_query_root(Some("book"), "properties.pages:[400 TO *]", None).await {
        println!("   └─ {} {:?}", book.id, book.name);
    }

    println!("\n🔍 Terms: genre = scifi OR pages < 300");
    let terms = Terms::from([
        ("properties.genre".to_string(), PropertyValue::from("scifi")),
        ("properties.pages <".to_string(), PropertyValue::from(300)),
    ]);
    for book in service.find_terms("app", Some("book"), &terms, false, None).await {
        println!("   └─ {} {:?}", book.id, book.name);
    }

    println!("\n📖 Paging 2 at a time (search-after on _docid)...");
    let mut pager = Pager::new(2).with_sort("_docid", true);
    loop {
        let page = service.find_query_root(Some("book"), "*", Some(&mut pager)).await;
        if page.is_empty() {
            break;
        }
        let ids: Vec<_> = page.iter().map(|b| b.id.as_str()).collect();
        println!("   └─ {:?} (cursor {:?}, total {})", ids, pager.last_key, pager.count);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Rebuild from the data store
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🔁 Rebuilding 'app' from the data store...");
    let before = service.index_manager().index_name_for_alias("app").await;
    let rebuilt = service.rebuild_index(&App::new("app"), None).await;
    let after = service.index_manager().index_name_for_alias("app").await;
    println!("   └─ Rebuilt: {rebuilt}, alias moved {before} → {after}");
    println!("   └─ Books after rebuild: {}", service.get_count_root(Some("book")).await);

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Stats and raw metrics
    // ─────────────────────────────────────────────────────────────────────────
    let stats = service.bulk_stats();
    println!("\n📊 Bulk Stats:");
    println!("   └─ Operations sent: {}", stats.operations_sent);
    println!("   └─ Documents failed: {}", stats.documents_failed);
    println!("   └─ Requests failed: {}", stats.requests_failed);

    println!("\n📈 Raw Metrics:");
    dump_metrics(&snapshotter);

    // ─────────────────────────────────────────────────────────────────────────
    // 6. Clean shutdown
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🛑 Shutting down...");
    let drained = service.shutdown().await;
    println!("   ✅ Shutdown complete! Drained: {drained}, state: {}", service.state());

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║                    Example complete!                          ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    Ok(())
}

/// Print captured counters, gauges and histogram summaries, sorted by name.
fn dump_metrics(snapshotter: &Snapshotter) {
    let mut lines = Vec::new();
    for (composite_key, _, _, value) in snapshotter.snapshot().into_vec() {
        let (_, key) = composite_key.into_parts();
        let labels: Vec<_> = key.labels().map(|l| format!("{}={}", l.key(), l.value())).collect();
        let label_str = if labels.is_empty() { String::new() } else { format!("{{{}}}", labels.join(",")) };
        let rendered = match value {
            DebugValue::Counter(v) => format!("{v}"),
            DebugValue::Gauge(v) => format!("{:.2}", v.into_inner()),
            DebugValue::Histogram(samples) => {
                let count = samples.len();
                let sum: f64 = samples.iter().map(|v| v.into_inner()).sum();
                format!("count={count} sum={sum:.4}")
            }
        };
        lines.push(format!("{}{} = {}", key.name(), label_str, rendered));
    }
    lines.sort();
    for line in lines {
        println!("   └─ {line}");
    }
}
