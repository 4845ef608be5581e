//! Cross-operation vault behavior not covered by `src/vault.rs`'s in-module
//! unit tests: dedup via `contains`, and `clear` reclaiming bytes for
//! multiple hashes at once.

use lifearch_core::vault::Vault;
use tempfile::tempdir;
use tokio::io::AsyncWriteExt;

async fn write_temp_file(dir: &std::path::Path, name: &str, contents: &[u8]) -> std::path::PathBuf {
    let path = dir.join(name);
    let mut file = tokio::fs::File::create(&path).await.unwrap();
    file.write_all(contents).await.unwrap();
    path
}

#[tokio::test]
async fn contains_reflects_put_without_copying_again() {
    let root = tempdir().unwrap();
    let vault = Vault::new(root.path());
    vault.initialize().await.unwrap();

    let source_dir = tempdir().unwrap();
    let source = write_temp_file(source_dir.path(), "note.txt", b"hello archive").await;

    let result = vault.put(&source, None).await.unwrap();
    assert!(!result.existed);
    assert!(vault.contains(&result.hash).await);

    // Re-ingesting the same bytes under a fresh source file should be
    // recognised as already present.
    let source2 = write_temp_file(source_dir.path(), "note-copy.txt", b"hello archive").await;
    let second = vault.put(&source2, None).await.unwrap();
    assert_eq!(second.hash, result.hash);
    assert!(second.existed);
}

#[tokio::test]
async fn clear_reclaims_bytes_for_multiple_hashes() {
    let root = tempdir().unwrap();
    let vault = Vault::new(root.path());
    vault.initialize().await.unwrap();

    let source_dir = tempdir().unwrap();
    let a = write_temp_file(source_dir.path(), "a.txt", b"first document body").await;
    let b = write_temp_file(source_dir.path(), "b.txt", b"second, unrelated document").await;

    let put_a = vault.put(&a, None).await.unwrap();
    let put_b = vault.put(&b, None).await.unwrap();

    let stats_before = vault.stats().await;
    assert_eq!(stats_before.content.files, 2);

    let result = vault.clear(&[put_a.hash.clone(), put_b.hash.clone()]).await.unwrap();
    assert_eq!(result.files_deleted, 2);
    assert!(result.bytes_reclaimed > 0);
    assert!(result.errors.is_empty());

    assert!(!vault.contains(&put_a.hash).await);
    assert!(!vault.contains(&put_b.hash).await);
}
