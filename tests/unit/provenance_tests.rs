// Provenance resolution tests over the in-memory content store

use bytes::Bytes;
use std::sync::Arc;

use shirushi::config::ProvenanceConfig;
use shirushi::model::{generate_watermark_id, WatermarkContent};
use shirushi::provenance::*;
use shirushi::storage::{content_hash, FetchedFile};
use shirushi::store::{MemoryContentStore, WatermarkContentStore};

async fn seeded() -> (Arc<MemoryContentStore>, WatermarkContent) {
    let store = Arc::new(MemoryContentStore::new());
    let content = WatermarkContent::new(
        generate_watermark_id("WM"),
        "CONFIDENTIAL".to_string(),
        "biz-1".to_string(),
        content_hash(b"original bytes"),
        Some("standard-office".to_string()),
    );
    store.insert(content.clone()).await.unwrap();
    store
        .set_watermark_file_hash(&content.watermark_id, &content_hash(b"marked bytes"))
        .await
        .unwrap();
    (store, content)
}

#[tokio::test]
async fn test_filename_fragment_wins_over_hash() {
    let (store, content) = seeded().await;
    let resolver = ProvenanceResolver::with_defaults(store);
    let name = FilenameTag::default().tag("report.docx", &content.watermark_id);

    // Bytes also match by hash; the filename strategy runs first
    let file = FetchedFile::new(name, Bytes::from_static(b"marked bytes"));
    let found = resolver.resolve(&file).await.unwrap();

    assert_eq!(found.strategy, Some(MatchStrategy::FilenameFragment));
    assert_eq!(found.watermark_id.as_deref(), Some(content.watermark_id.as_str()));
    assert_eq!(found.confidence, 0.95);
}

#[tokio::test]
async fn test_fragment_without_record_falls_through_to_hash() {
    let (store, content) = seeded().await;
    let resolver = ProvenanceResolver::with_defaults(store);

    let file = FetchedFile::new("report_WMffffffff.docx", Bytes::from_static(b"marked bytes"));
    let found = resolver.resolve(&file).await.unwrap();

    assert_eq!(found.strategy, Some(MatchStrategy::ContentHash));
    assert_eq!(found.content.as_deref(), Some(content.content.as_str()));
    assert_eq!(found.confidence, 0.88);
}

#[tokio::test]
async fn test_original_hash_matches_too() {
    let (store, _) = seeded().await;
    let resolver = ProvenanceResolver::with_defaults(store);

    let file = FetchedFile::new("anything.bin", Bytes::from_static(b"original bytes"));
    assert!(resolver.resolve(&file).await.unwrap().is_match());
}

#[tokio::test]
async fn test_no_evidence_is_zero_confidence() {
    let (store, _) = seeded().await;
    let resolver = ProvenanceResolver::with_defaults(store);

    let file = FetchedFile::new("other.docx", Bytes::from_static(b"unrelated"));
    let found = resolver.resolve(&file).await.unwrap();

    assert_eq!(found, ProvenanceMatch::none());
}

#[tokio::test]
async fn test_configured_resolver_uses_custom_tag_and_confidence() {
    let store = Arc::new(MemoryContentStore::new());
    let config: ProvenanceConfig = serde_yaml::from_str(
        "namespace: ACME\nfilename_marker: \"~\"\nfilename_confidence: 0.7\n",
    )
    .unwrap();

    let content = WatermarkContent::new(
        generate_watermark_id("ACME"),
        "owner: legal".to_string(),
        "biz".to_string(),
        content_hash(b"x"),
        None,
    );
    store.insert(content.clone()).await.unwrap();

    let tag = config.to_filename_tag().unwrap();
    let resolver = config.to_resolver(store).unwrap();
    let file = FetchedFile::new(
        tag.tag("brief.pdf", &content.watermark_id),
        Bytes::from_static(b"y"),
    );
    let found = resolver.resolve(&file).await.unwrap();

    assert_eq!(found.content.as_deref(), Some("owner: legal"));
    assert_eq!(found.confidence, 0.7);
}

#[test]
fn test_tag_without_extension() {
    let tag = FilenameTag::default();
    let tagged = tag.tag("Makefile", "WMabcdef0123456789");
    assert_eq!(tagged, "Makefile_WMabcdef01");
    assert_eq!(tag.fragment(&tagged).as_deref(), Some("abcdef01"));
    assert_eq!(tag.id_prefix("abcdef01"), "WMabcdef01");
}
