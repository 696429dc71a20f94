//! Incremental change detection
//!
//! Hashes candidate files and drops the ones whose stored fingerprint is
//! unchanged, so re-ingesting a repository only pays for what changed.

use crate::error::Result;
use crate::meta::MetaDb;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::debug;

/// A file that passed change detection and is ready for ingestion
#[derive(Debug, Clone)]
pub struct PendingFile {
    pub relative_path: PathBuf,
    pub text: String,
    pub digest: String,
    pub bytes: u64,
}

/// SHA-256 hex digest of already-decoded text
pub fn fingerprint_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Read and hash candidates, dropping unchanged and unreadable files.
///
/// Returns the files still needing ingestion plus the number skipped. A read
/// failure is not an error here; the file is counted as skipped and the scan
/// continues. Each surviving file is read exactly once and its decoded text
/// travels with it.
pub async fn detect_changes(
    db: &MetaDb,
    project_id: &str,
    root: &Path,
    candidates: &[PathBuf],
) -> Result<(Vec<PendingFile>, usize)> {
    let mut pending = Vec::new();
    let mut skipped = 0usize;

    for rel in candidates {
        let absolute = root.join(rel);
        let raw = match std::fs::read(&absolute) {
            Ok(raw) => raw,
            Err(err) => {
                debug!("Skipping unreadable file {:?}: {}", absolute, err);
                skipped += 1;
                continue;
            }
        };

        let text = String::from_utf8_lossy(&raw).into_owned();
        let digest = fingerprint_text(&text);
        let rel_str = rel.to_string_lossy();

        if let Some(stored) = db.get_fingerprint(project_id, rel_str.as_ref()).await? {
            if stored.content_hash == digest {
                debug!("Skipping unchanged file {:?}", rel);
                skipped += 1;
                continue;
            }
        }

        pending.push(PendingFile {
            relative_path: rel.clone(),
            text,
            digest,
            bytes: raw.len() as u64,
        });
    }

    Ok((pending, skipped))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::FileFingerprint;
    use tempfile::TempDir;

    async fn setup() -> (MetaDb, TempDir) {
        let tmp = TempDir::new().unwrap();
        let db = MetaDb::new(&tmp.path().join("test.db")).await.unwrap();
        (db, tmp)
    }

    #[test]
    fn test_fingerprint_is_stable_hex() {
        assert_eq!(
            fingerprint_text("hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!(fingerprint_text("hello"), fingerprint_text("hello"));
        assert_ne!(fingerprint_text("hello"), fingerprint_text("hello!"));
    }

    #[tokio::test]
    async fn test_detect_changes_skips_unchanged_files() {
        let (db, tmp) = setup().await;
        let root = tmp.path().join("repo");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("a.txt"), "stable content").unwrap();

        let candidates = vec![PathBuf::from("a.txt")];

        // first pass sees the file as new
        let (pending, skipped) = detect_changes(&db, "proj", &root, &candidates)
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(skipped, 0);
        assert_eq!(pending[0].text, "stable content");
        assert_eq!(pending[0].bytes, 14);

        // record the fingerprint, as a committed ingestion would
        let fp = FileFingerprint::new(
            "proj".to_string(),
            "a.txt".to_string(),
            pending[0].digest.clone(),
        );
        let mut tx = db.begin().await.unwrap();
        MetaDb::upsert_fingerprint_tx(&mut tx, &fp).await.unwrap();
        tx.commit().await.unwrap();

        // unchanged content is now skipped
        let (pending, skipped) = detect_changes(&db, "proj", &root, &candidates)
            .await
            .unwrap();
        assert!(pending.is_empty());
        assert_eq!(skipped, 1);

        // edited content passes again
        std::fs::write(root.join("a.txt"), "edited content").unwrap();
        let (pending, skipped) = detect_changes(&db, "proj", &root, &candidates)
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(skipped, 0);
        assert_ne!(pending[0].digest, fp.content_hash);
    }

    #[tokio::test]
    async fn test_detect_changes_counts_unreadable_silently() {
        let (db, tmp) = setup().await;
        let root = tmp.path().join("repo");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("ok.txt"), "fine").unwrap();

        let candidates = vec![PathBuf::from("missing.txt"), PathBuf::from("ok.txt")];
        let (pending, skipped) = detect_changes(&db, "proj", &root, &candidates)
            .await
            .unwrap();

        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].relative_path, PathBuf::from("ok.txt"));
        assert_eq!(skipped, 1);
    }

    #[tokio::test]
    async fn test_detect_changes_decodes_lossily() {
        let (db, tmp) = setup().await;
        let root = tmp.path().join("repo");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("bin.txt"), [0xff, 0xfe, b'h', b'i']).unwrap();

        let candidates = vec![PathBuf::from("bin.txt")];
        let (pending, _) = detect_changes(&db, "proj", &root, &candidates)
            .await
            .unwrap();

        assert_eq!(pending.len(), 1);
        assert!(pending[0].text.contains('\u{FFFD}'));
        assert!(pending[0].text.ends_with("hi"));
        // byte size reflects the raw file, not the decoded text
        assert_eq!(pending[0].bytes, 4);
        assert_eq!(pending[0].digest, fingerprint_text(&pending[0].text));
    }
}
