//! Behavior every [`IndexStore`] backend must satisfy, run against each one.

use super::IndexStore;
use crate::error::FailureKind;
use crate::models::{
    ChunkRecord, Failure, FileFilter, FileRecord, FileStatus, Fingerprint, Manifest, Metric,
    SearchFilter, Span,
};

pub fn fp(path: &str, hash: &str, mtime: i64) -> Fingerprint {
    Fingerprint {
        path: path.to_string(),
        hash: hash.to_string(),
        size: 10,
        mtime,
    }
}

pub fn chunk(path: &str, seq: usize, text: &str, vector: Vec<f32>, model: &str) -> ChunkRecord {
    ChunkRecord {
        file_path: path.to_string(),
        seq,
        text: text.to_string(),
        span: Span {
            start: seq * 10,
            end: seq * 10 + text.len(),
        },
        vector,
        model_id: model.to_string(),
    }
}

pub async fn run_contract(store: &dyn IndexStore) {
    // No manifest: search matches nothing.
    assert!(store.manifest().await.unwrap().is_none());
    assert!(store
        .search(&[1.0, 0.0], 5, &SearchFilter::default(), Metric::Cosine)
        .await
        .unwrap()
        .is_empty());

    let manifest = Manifest::new("model-a", 2);
    store.set_manifest(&manifest).await.unwrap();
    assert_eq!(store.manifest().await.unwrap(), Some(manifest.clone()));

    // Upsert and read back, chunks in sequence order.
    let a = FileRecord::indexed(
        &fp("/root/docs/a.txt", "ha", 100),
        "text/plain",
        "model-a",
        1000,
    );
    store
        .upsert_file(
            &a,
            &[
                chunk(&a.path, 1, "second", vec![0.0, 1.0], "model-a"),
                chunk(&a.path, 0, "first", vec![1.0, 0.0], "model-a"),
            ],
        )
        .await
        .unwrap();
    assert_eq!(store.get_file(&a.path).await.unwrap(), Some(a.clone()));
    let chunks = store.chunks_for(&a.path).await.unwrap();
    assert_eq!(chunks.iter().map(|c| c.seq).collect::<Vec<_>>(), vec![0, 1]);
    assert_eq!(chunks[0].vector, vec![1.0, 0.0]);

    // Replace wholesale.
    let a2 = FileRecord::indexed(
        &fp("/root/docs/a.txt", "ha2", 200),
        "text/plain",
        "model-a",
        2000,
    );
    store
        .upsert_file(&a2, &[chunk(&a2.path, 0, "only", vec![1.0, 0.0], "model-a")])
        .await
        .unwrap();
    let chunks = store.chunks_for(&a.path).await.unwrap();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].text, "only");

    // A newer file with an identical vector wins the tie; a foreign model never shows up.
    let b = FileRecord::indexed(
        &fp("/root/docs/b.md", "hb", 300),
        "text/markdown",
        "model-a",
        3000,
    );
    store
        .upsert_file(
            &b,
            &[
                chunk(&b.path, 0, "b-first", vec![1.0, 0.0], "model-a"),
                chunk(&b.path, 1, "b-foreign", vec![1.0, 0.0], "model-b"),
            ],
        )
        .await
        .unwrap();
    let hits = store
        .search(&[1.0, 0.0], 10, &SearchFilter::default(), Metric::Cosine)
        .await
        .unwrap();
    assert_eq!(
        hits.iter().map(|h| h.text.as_str()).collect::<Vec<_>>(),
        vec!["b-first", "only"]
    );
    assert_eq!(hits[0].media_type.as_deref(), Some("text/markdown"));

    // k and filters.
    let top1 = store
        .search(&[1.0, 0.0], 1, &SearchFilter::default(), Metric::Dot)
        .await
        .unwrap();
    assert_eq!(top1.len(), 1);
    let by_type = SearchFilter {
        media_type: Some("text/plain".into()),
        ..Default::default()
    };
    let hits = store
        .search(&[1.0, 0.0], 10, &by_type, Metric::Cosine)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].file_path, a.path);
    let by_prefix = SearchFilter {
        path_prefix: Some("/root/doc".into()),
        ..Default::default()
    };
    assert!(store
        .search(&[1.0, 0.0], 10, &by_prefix, Metric::Cosine)
        .await
        .unwrap()
        .is_empty());
    let recent = SearchFilter {
        indexed_after: Some(2500),
        ..Default::default()
    };
    let hits = store
        .search(&[1.0, 0.0], 10, &recent, Metric::Euclidean)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].file_path, b.path);

    // Failed records keep their reason and have no chunks.
    let c_fp = fp("/root/other/c.pdf", "hb", 50);
    let c = FileRecord::failed(
        &c_fp,
        Some("application/pdf".into()),
        Failure::new(FailureKind::CorruptFile, "bad xref"),
    );
    store.upsert_file(&c, &[]).await.unwrap();
    let stored = store.get_file(&c.path).await.unwrap().unwrap();
    assert_eq!(stored.failure, c.failure);
    assert!(store.chunks_for(&c.path).await.unwrap().is_empty());

    // Listing and duplicate lookup.
    let failed = store
        .list_files(&FileFilter {
            roots: vec![],
            status: Some(FileStatus::Failed),
        })
        .await
        .unwrap();
    assert_eq!(failed.len(), 1);
    let under_docs = store
        .list_files(&FileFilter {
            roots: vec!["/root/docs".into()],
            status: None,
        })
        .await
        .unwrap();
    assert_eq!(
        under_docs.iter().map(|r| r.path.as_str()).collect::<Vec<_>>(),
        vec!["/root/docs/a.txt", "/root/docs/b.md"]
    );
    assert_eq!(store.files_with_hash("hb").await.unwrap().len(), 2);

    // Touch refreshes mtime only.
    store.touch_file(&a.path, 999).await.unwrap();
    let touched = store.get_file(&a.path).await.unwrap().unwrap();
    assert_eq!(touched.mtime, 999);
    assert_eq!(touched.hash, "ha2");

    let stats = store.stats().await.unwrap();
    assert_eq!((stats.indexed, stats.failed, stats.chunks), (2, 1, 3));

    // Tombstone purges chunks immediately, gc purges the record later.
    store.mark_deleted(&b.path, 5000).await.unwrap();
    let tomb = store.get_file(&b.path).await.unwrap().unwrap();
    assert_eq!(tomb.status, FileStatus::Deleted);
    assert_eq!(tomb.deleted_at, Some(5000));
    assert!(tomb.model_id.is_none());
    assert!(store.chunks_for(&b.path).await.unwrap().is_empty());
    assert!(store
        .search(&[1.0, 0.0], 10, &SearchFilter::default(), Metric::Cosine)
        .await
        .unwrap()
        .iter()
        .all(|h| h.file_path != b.path));
    assert_eq!(store.files_with_hash("hb").await.unwrap().len(), 1);
    assert_eq!(store.gc_deleted(5000).await.unwrap(), 0);
    assert_eq!(store.gc_deleted(5001).await.unwrap(), 1);
    assert!(store.get_file(&b.path).await.unwrap().is_none());

    // Hard delete cascades.
    assert!(store.delete_file(&a.path).await.unwrap());
    assert!(!store.delete_file(&a.path).await.unwrap());
    assert!(store.chunks_for(&a.path).await.unwrap().is_empty());

    let stats = store.stats().await.unwrap();
    assert_eq!((stats.files(), stats.chunks), (1, 0));
}
