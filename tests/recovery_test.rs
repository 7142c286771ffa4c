use anyhow::Result;
use snapdb::concurrency::CommitSequence;
use snapdb::storage::wal::wal_path;
use snapdb::{Config, Database, Error, PageNumber, StorageError};
use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tempfile::tempdir;

const PAGE_SIZE: usize = 512;
const WAL_HEADER: u64 = 32;
/// Page number, sequence, payload, checksum.
const FRAME: u64 = 4 + 8 + PAGE_SIZE as u64 + 4;
/// Frame count and commit checksum after the last frame.
const TRAILER: u64 = 8;

fn config() -> Config {
    Config::builder().page_size(PAGE_SIZE).build().unwrap()
}

/// Commit 1 allocates page 1 ("first"), commit 2 rewrites it ("second").
/// Returns the database path and the WAL offset where commit 2 starts.
fn two_commits(dir: &Path) -> Result<(PathBuf, u64)> {
    let path = dir.join("test.db");
    let db = Database::create(&path, config())?;

    let mut writer = db.begin_write()?;
    let page = writer.allocate()?;
    writer.write(page, b"first")?;
    writer.commit()?;

    let mut writer = db.begin_write()?;
    writer.write(page, b"second")?;
    writer.commit()?;

    let commit_two = WAL_HEADER + 2 * FRAME + TRAILER;
    assert_eq!(std::fs::metadata(wal_path(&path))?.len(), commit_two + FRAME + TRAILER);
    Ok((path, commit_two))
}

fn page_text(db: &Database, page: u32) -> Result<Vec<u8>> {
    let data = db.begin_read().read(PageNumber(page))?;
    let end = data.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    Ok(data[..end].to_vec())
}

#[test]
fn test_clean_reopen_replays_everything() -> Result<()> {
    let dir = tempdir()?;
    let (path, _) = two_commits(dir.path())?;

    let db = Database::open(&path, config())?;
    let report = db.recovery_report();
    assert_eq!(report.commits, 2);
    assert_eq!(report.frames, 3);
    assert_eq!(report.truncated_bytes, 0);
    assert!(report.corruption.is_none());
    assert_eq!(db.read_mark(), CommitSequence::new(2));
    assert_eq!(page_text(&db, 1)?, b"second");
    Ok(())
}

#[test]
fn test_truncated_mid_frame() -> Result<()> {
    let dir = tempdir()?;
    let (path, commit_two) = two_commits(dir.path())?;

    let cut = commit_two + 100;
    OpenOptions::new()
        .write(true)
        .open(wal_path(&path))?
        .set_len(cut)?;

    let db = Database::open(&path, config())?;
    let report = db.recovery_report();
    assert_eq!(report.commits, 1);
    assert_eq!(report.frames, 2);
    assert_eq!(report.truncated_bytes, 100);
    assert_eq!(db.read_mark(), CommitSequence::new(1));
    assert_eq!(page_text(&db, 1)?, b"first");
    assert_eq!(std::fs::metadata(wal_path(&path))?.len(), commit_two);

    // The torn commit never happened, so its sequence is handed out again.
    let mut writer = db.begin_write()?;
    writer.write(PageNumber(1), b"retry")?;
    assert_eq!(writer.commit()?, Some(CommitSequence::new(2)));
    Ok(())
}

#[test]
fn test_missing_commit_trailer() -> Result<()> {
    let dir = tempdir()?;
    let (path, commit_two) = two_commits(dir.path())?;

    // Every frame of commit 2 is intact, only the trailer is gone.
    OpenOptions::new()
        .write(true)
        .open(wal_path(&path))?
        .set_len(commit_two + FRAME)?;

    let db = Database::open(&path, config())?;
    assert_eq!(db.recovery_report().commits, 1);
    assert_eq!(db.recovery_report().truncated_bytes, FRAME);
    assert_eq!(page_text(&db, 1)?, b"first");
    Ok(())
}

#[test]
fn test_corrupt_frame_checksum() -> Result<()> {
    let dir = tempdir()?;
    let (path, commit_two) = two_commits(dir.path())?;

    let mut file = OpenOptions::new().write(true).open(wal_path(&path))?;
    file.seek(SeekFrom::Start(commit_two + 12 + 3))?;
    file.write_all(b"X")?;
    drop(file);

    let db = Database::open(&path, config())?;
    let report = db.recovery_report();
    assert_eq!(report.commits, 1);
    assert_eq!(report.truncated_bytes, FRAME + TRAILER);
    assert!(report.corruption.is_some());
    assert_eq!(page_text(&db, 1)?, b"first");
    Ok(())
}

#[test]
fn test_corrupt_header_resets_log() -> Result<()> {
    let dir = tempdir()?;
    let (path, _) = two_commits(dir.path())?;

    let mut file = OpenOptions::new().write(true).open(wal_path(&path))?;
    file.write_all(&[0u8; 4])?;
    drop(file);

    // Base file is intact, so open succeeds with an empty log.
    let db = Database::open(&path, config())?;
    assert!(db.recovery_report().corruption.is_some());
    assert_eq!(db.read_mark(), CommitSequence::ZERO);
    assert!(matches!(
        db.begin_read().read(PageNumber(1)),
        Err(Error::Storage(StorageError::PageNotFound(_)))
    ));
    Ok(())
}

#[test]
fn test_checkpointed_data_survives_lost_log() -> Result<()> {
    let dir = tempdir()?;
    let (path, _) = two_commits(dir.path())?;
    {
        let db = Database::open(&path, config())?;
        db.checkpoint()?;
    }
    std::fs::remove_file(wal_path(&path))?;

    let db = Database::open(&path, config())?;
    assert_eq!(page_text(&db, 1)?, b"second");
    Ok(())
}

#[test]
fn test_lost_log_never_reuses_checkpointed_sequences() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("test.db");
    let token = {
        let db = Database::create(&path, config())?;
        let mut writer = db.begin_write()?;
        let page = writer.allocate()?;
        writer.write(page, b"first")?;
        writer.commit()?;
        let token = db.capture().token();

        let mut writer = db.begin_write()?;
        writer.write(page, b"second")?;
        writer.commit()?;
        db.checkpoint()?;
        token
    };
    std::fs::remove_file(wal_path(&path))?;

    let db = Database::open(&path, config())?;
    assert_eq!(db.read_mark(), CommitSequence::new(2));
    assert!(matches!(db.open_at(&token), Err(Error::InvalidToken(_))));

    let mut writer = db.begin_write()?;
    writer.write(PageNumber(1), b"third")?;
    assert_eq!(writer.commit()?, Some(CommitSequence::new(3)));
    assert_eq!(page_text(&db, 1)?, b"third");
    Ok(())
}

#[test]
fn test_interrupted_checkpoint_rejects_merged_boundaries() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("test.db");
    let (token, stale_log) = {
        let db = Database::create(&path, config())?;
        let mut writer = db.begin_write()?;
        let page = writer.allocate()?;
        writer.write(page, b"A")?;
        writer.commit()?;
        let token = db.capture().token();
        db.checkpoint()?;

        let mut writer = db.begin_write()?;
        writer.write(page, b"B")?;
        writer.commit()?;
        let stale_log = std::fs::read(wal_path(&path))?;

        // Base file now holds "B"; the token's boundary is gone.
        db.checkpoint()?;
        (token, stale_log)
    };

    // Crash after the base file was written, before the new log replaced
    // the old one.
    std::fs::write(wal_path(&path), &stale_log)?;

    let db = Database::open(&path, config())?;
    assert_eq!(db.read_mark(), CommitSequence::new(2));
    assert!(matches!(db.open_at(&token), Err(Error::InvalidToken(_))));
    assert_eq!(page_text(&db, 1)?, b"B");
    assert_eq!(db.recover_snapshots()?.oldest, CommitSequence::new(2));
    Ok(())
}

#[test]
fn test_unreadable_base_file_is_fatal() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("test.db");
    std::fs::write(&path, b"not a store")?;

    assert!(Database::open(&path, config()).is_err());
    Ok(())
}
