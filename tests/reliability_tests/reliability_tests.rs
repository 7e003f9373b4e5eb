//! Reliability Consensus Tests
//!
//! These tests verify:
//! - Versions are stored only once enough uploads agree
//! - A trusted version never changes
//! - Disagreeing uploads make a version permanently unreliable
//! - Repeat uploads from one client can be ignored
//! - Entries and rejected uploads are kept on disk

use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;

use artifactcache::config::ReliabilityConfig;
use artifactcache::reliability::{ReliabilityManager, ReliabilityState};
use artifactcache::storage::PutTransaction;
use artifactcache::{Config, Engine, FileType, TransactionOutcome, VersionKey};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn client(n: u8) -> Option<IpAddr> {
    Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, n)))
}

fn version() -> VersionKey {
    VersionKey::new([0x11; 16], [0x22; 16])
}

fn engine_with(dir: &Path, threshold: u32, multi_client: bool, save_unreliable: bool) -> Engine {
    let config = Config::builder()
        .data_dir(dir)
        .persistence(false)
        .page_size(64 * 1024)
        .max_page_count(4)
        .reliability_threshold(threshold)
        .multi_client(multi_client)
        .save_unreliable(save_unreliable)
        .build();
    Engine::open(config).unwrap()
}

fn engine(dir: &Path, threshold: u32) -> Engine {
    engine_with(dir, threshold, false, false)
}

fn upload(
    engine: &Engine,
    from: Option<IpAddr>,
    asset: &[u8],
    info: &[u8],
) -> TransactionOutcome {
    let mut trx = engine.begin_transaction(version(), from);
    for (file_type, data) in [(FileType::Asset, asset), (FileType::Metadata, info)] {
        trx.open_sink(file_type, data.len() as u64).unwrap();
        trx.write(file_type, data).unwrap();
    }
    engine.end_transaction(trx).unwrap()
}

fn stored_asset(engine: &Engine) -> Option<Vec<u8>> {
    engine
        .get_file_info(FileType::Asset, &version())
        .unwrap()
        .map(|_| engine.get_file(FileType::Asset, &version()).unwrap().to_vec())
}

fn state(engine: &Engine) -> Option<ReliabilityState> {
    engine
        .reliability()
        .and_then(|r| r.get_entry(&version()))
        .map(|e| e.state)
}

fn finalized(files: &[(FileType, &[u8])], from: Option<IpAddr>) -> PutTransaction {
    let mut trx = PutTransaction::new(version(), from);
    for (file_type, data) in files {
        trx.open_sink(*file_type, data.len() as u64).unwrap();
        trx.write(*file_type, data).unwrap();
    }
    trx.finalize().unwrap();
    trx
}

// =============================================================================
// Threshold Tests
// =============================================================================

#[test]
fn test_version_is_stored_once_threshold_is_reached() {
    let dir = TempDir::new().unwrap();
    let engine = engine(dir.path(), 2);

    let first = upload(&engine, client(1), b"content A", b"info");
    assert!(!first.committed);
    assert_eq!(first.reliability, Some(ReliabilityState::Pending));
    assert_eq!(stored_asset(&engine), None);

    let second = upload(&engine, client(2), b"content A", b"info");
    assert!(second.committed);
    assert_eq!(second.reliability, Some(ReliabilityState::ReliableNew));
    assert_eq!(stored_asset(&engine), Some(b"content A".to_vec()));
    assert_eq!(state(&engine), Some(ReliabilityState::Reliable));
}

#[test]
fn test_trusted_version_never_changes() {
    let dir = TempDir::new().unwrap();
    let engine = engine(dir.path(), 2);

    upload(&engine, client(1), b"content A", b"info");
    upload(&engine, client(2), b"content A", b"info");

    let third = upload(&engine, client(3), b"content B", b"info");
    assert!(!third.committed);
    assert_eq!(third.reliability, Some(ReliabilityState::Reliable));

    let fourth = upload(&engine, client(4), b"content A", b"info");
    assert!(!fourth.committed);

    assert_eq!(stored_asset(&engine), Some(b"content A".to_vec()));
}

#[test]
fn test_threshold_of_one_trusts_first_upload() {
    for threshold in [0, 1] {
        let dir = TempDir::new().unwrap();
        let engine = engine(dir.path(), threshold);

        let outcome = upload(&engine, client(1), b"content A", b"info");
        assert!(outcome.committed, "threshold {}", threshold);
        assert_eq!(outcome.reliability, Some(ReliabilityState::ReliableNew));
        assert_eq!(state(&engine), Some(ReliabilityState::Reliable));
    }
}

#[test]
fn test_higher_threshold_counts_every_agreeing_upload() {
    let dir = TempDir::new().unwrap();
    let engine = engine(dir.path(), 3);

    for n in 1..=2 {
        let outcome = upload(&engine, client(n), b"content A", b"info");
        assert!(!outcome.committed);
        let entry = engine.reliability().unwrap().get_entry(&version()).unwrap();
        assert_eq!(entry.factor, u32::from(n));
    }

    assert!(upload(&engine, client(3), b"content A", b"info").committed);
}

#[test]
fn test_metadata_does_not_take_part_in_the_vote() {
    let dir = TempDir::new().unwrap();
    let engine = engine(dir.path(), 2);

    upload(&engine, client(1), b"content A", b"built at 10:00");
    let second = upload(&engine, client(2), b"content A", b"built at 10:05");

    assert!(second.committed);
    let info = engine.get_file(FileType::Metadata, &version()).unwrap();
    assert_eq!(&info[..], b"built at 10:05");
}

// =============================================================================
// Mismatch Tests
// =============================================================================

#[test]
fn test_mismatch_makes_version_unreliable() {
    let dir = TempDir::new().unwrap();
    let engine = engine(dir.path(), 2);

    upload(&engine, client(1), b"content A", b"info");
    let second = upload(&engine, client(2), b"content B", b"info");

    assert!(!second.committed);
    assert_eq!(second.reliability, Some(ReliabilityState::Unreliable));

    // No later upload can rescue it
    for n in 3..6 {
        let outcome = upload(&engine, client(n), b"content A", b"info");
        assert!(!outcome.committed);
        assert_eq!(outcome.reliability, Some(ReliabilityState::Unreliable));
    }
    assert_eq!(stored_asset(&engine), None);
}

#[test]
fn test_unreliable_upload_is_quarantined() {
    let dir = TempDir::new().unwrap();
    let engine = engine_with(dir.path(), 2, false, true);

    upload(&engine, client(1), b"content A", b"info");
    upload(&engine, client(2), b"content B", b"info B");

    let version_dir = engine
        .reliability()
        .unwrap()
        .quarantine_dir()
        .join(version().to_string());
    let attempts: Vec<_> = fs::read_dir(&version_dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(attempts.len(), 1);

    let asset = attempts[0].join(format!("{}.bin", version()));
    let info = attempts[0].join(format!("{}.info", version()));
    assert_eq!(fs::read(asset).unwrap(), b"content B");
    assert_eq!(fs::read(info).unwrap(), b"info B");
}

#[test]
fn test_nothing_is_quarantined_by_default() {
    let dir = TempDir::new().unwrap();
    let engine = engine(dir.path(), 2);

    upload(&engine, client(1), b"content A", b"info");
    upload(&engine, client(2), b"content B", b"info");

    assert!(!engine.reliability().unwrap().quarantine_dir().exists());
}

// =============================================================================
// Multi-Client Tests
// =============================================================================

#[test]
fn test_repeat_uploads_count_without_multi_client() {
    let dir = TempDir::new().unwrap();
    let engine = engine(dir.path(), 2);

    upload(&engine, client(1), b"content A", b"info");
    assert!(upload(&engine, client(1), b"content A", b"info").committed);
}

#[test]
fn test_multi_client_ignores_repeat_uploads() {
    let dir = TempDir::new().unwrap();
    let engine = engine_with(dir.path(), 2, true, false);

    upload(&engine, client(1), b"content A", b"info");
    let repeat = upload(&engine, client(1), b"content A", b"info");
    assert!(!repeat.committed);
    assert_eq!(repeat.reliability, Some(ReliabilityState::Pending));
    let entry = engine.reliability().unwrap().get_entry(&version()).unwrap();
    assert_eq!(entry.factor, 1);

    // A repeat that disagrees is ignored as well
    let mismatch = upload(&engine, client(1), b"content B", b"info");
    assert_eq!(mismatch.reliability, Some(ReliabilityState::Pending));

    let other = upload(&engine, client(2), b"content A", b"info");
    assert!(other.committed);
}

// =============================================================================
// Eligibility Tests
// =============================================================================

#[test]
fn test_consensus_disabled_by_default() {
    let dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(dir.path())
        .persistence(false)
        .page_size(64 * 1024)
        .build();
    let engine = Engine::open(config).unwrap();

    let outcome = upload(&engine, client(1), b"content A", b"info");
    assert!(outcome.committed);
    assert_eq!(outcome.reliability, None);
    assert!(engine.reliability().is_none());
}

#[test]
fn test_rejected_writer_does_not_vote() {
    let dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(dir.path())
        .persistence(false)
        .page_size(64 * 1024)
        .reliability_threshold(1)
        .put_whitelist(vec![IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))])
        .build();
    let engine = Engine::open(config).unwrap();

    let outcome = upload(&engine, client(2), b"content A", b"info");
    assert!(!outcome.committed);
    assert_eq!(outcome.reliability, None);
    assert_eq!(engine.reliability().unwrap().entry_count(), 0);

    assert!(upload(&engine, client(1), b"content A", b"info").committed);
}

#[test]
fn test_zero_hash_does_not_vote() {
    let dir = TempDir::new().unwrap();
    let engine = engine(dir.path(), 1);
    let key = VersionKey::new([0x11; 16], [0u8; 16]);

    let mut trx = engine.begin_transaction(key, client(1));
    trx.open_sink(FileType::Asset, 3).unwrap();
    trx.write(FileType::Asset, b"abc").unwrap();
    let outcome = engine.end_transaction(trx).unwrap();

    assert!(!outcome.committed);
    assert_eq!(outcome.reliability, None);
    assert_eq!(engine.get_file_info(FileType::Asset, &key).unwrap(), None);
}

// =============================================================================
// Manager Tests
// =============================================================================

#[test]
fn test_unconfirmed_trust_lets_next_upload_through() {
    let dir = TempDir::new().unwrap();
    let config = ReliabilityConfig {
        enabled: true,
        threshold: 1,
        multi_client: false,
        save_unreliable: false,
    };
    let manager = ReliabilityManager::open(config, dir.path()).unwrap();
    let files: &[(FileType, &[u8])] = &[(FileType::Asset, &b"content A"[..])];

    let mut first = finalized(files, client(1));
    assert_eq!(
        manager.process_transaction(&mut first).unwrap(),
        ReliabilityState::ReliableNew
    );
    assert!(first.is_valid());

    // The first commit never happened; the next upload replaces it
    let mut second = finalized(files, client(2));
    assert_eq!(
        manager.process_transaction(&mut second).unwrap(),
        ReliabilityState::Reliable
    );
    assert!(second.is_valid());

    let mut third = finalized(files, client(3));
    manager.process_transaction(&mut third).unwrap();
    assert!(!third.is_valid());
}

#[test]
fn test_confirm_only_promotes_new_trust() {
    let dir = TempDir::new().unwrap();
    let config = ReliabilityConfig {
        enabled: true,
        threshold: 2,
        multi_client: false,
        save_unreliable: false,
    };
    let manager = ReliabilityManager::open(config, dir.path()).unwrap();

    let mut trx = finalized(&[(FileType::Asset, &b"content A"[..])], client(1));
    manager.process_transaction(&mut trx).unwrap();
    manager.confirm(&version());

    let entry = manager.get_entry(&version()).unwrap();
    assert_eq!(entry.state, ReliabilityState::Pending);
    assert_eq!(entry.last_client, client(1));
}

#[test]
fn test_entries_survive_restart() {
    let dir = TempDir::new().unwrap();
    let make = || {
        let config = Config::builder()
            .data_dir(dir.path())
            .page_size(64 * 1024)
            .save_interval_ms(0)
            .reliability_threshold(2)
            .build();
        Engine::open(config).unwrap()
    };

    {
        let engine = make();
        upload(&engine, client(1), b"content A", b"info");
        engine.shutdown().unwrap();
    }

    let engine = make();
    let entry = engine.reliability().unwrap().get_entry(&version()).unwrap();
    assert_eq!(entry.state, ReliabilityState::Pending);
    assert_eq!(entry.factor, 1);

    assert!(upload(&engine, client(2), b"content A", b"info").committed);
    engine.shutdown().unwrap();

    let engine = make();
    assert_eq!(state(&engine), Some(ReliabilityState::Reliable));
    assert_eq!(stored_asset(&engine), Some(b"content A".to_vec()));
}
