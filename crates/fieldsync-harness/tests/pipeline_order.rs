//! Ordering guarantees of the pipelined flash read.
//!
//! The session file must receive bytes in strictly increasing offset order
//! for every pipeline depth, even when the FC delivers replies permuted
//! within the window, truncates a reply, or serves compressed chunks.

use fieldsync_agent::{Orchestrator, SyncOutcome};
use fieldsync_core::{AgentConfig, SessionStore};
use fieldsync_harness::{SimFc, find_session_dir, test_flash};
use tempfile::TempDir;

const CHUNK: u32 = 16 * 1024;

fn config_for(storage: &TempDir, depth: u8) -> AgentConfig {
    AgentConfig {
        storage_path: storage.path().to_path_buf(),
        pipeline_depth: depth,
        erase_after_sync: false,
        ..AgentConfig::default()
    }
}

async fn run_and_read_back(fc: SimFc, config: AgentConfig, storage: &TempDir) -> Vec<u8> {
    let (orchestrator, _events, _cancel) =
        Orchestrator::new(fc, SessionStore::new(storage.path()), config, false);
    let outcome = orchestrator.run().await.expect("sync succeeds");
    assert!(matches!(outcome, SyncOutcome::Completed { .. }));

    let dir = find_session_dir(storage.path()).expect("session directory");
    std::fs::read(dir.join("raw_flash.bbl")).expect("flash file")
}

#[tokio::test(start_paused = true)]
async fn every_depth_writes_in_offset_order_under_permuted_delivery() {
    // 16 chunks of 16 KiB; each depth gets its own worst-case permutation.
    let flash = test_flash(16 * CHUNK as usize);

    for depth in 1..=8u8 {
        let fc = SimFc::new(flash.clone()).with_permuted_window(usize::from(depth));
        let storage = TempDir::new().unwrap();
        let on_disk = run_and_read_back(fc, config_for(&storage, depth), &storage).await;
        assert_eq!(on_disk, flash, "depth {depth} produced a misordered file");
    }
}

#[tokio::test(start_paused = true)]
async fn permuted_compressed_stream_still_lands_in_order() {
    let flash = test_flash(16 * CHUNK as usize);
    let fc = SimFc::new(flash.clone()).with_compression().with_permuted_window(4);
    let storage = TempDir::new().unwrap();
    let on_disk = run_and_read_back(fc, config_for(&storage, 4), &storage).await;
    assert_eq!(on_disk, flash);
}

#[tokio::test(start_paused = true)]
async fn short_reply_rebases_the_window_without_losing_bytes() {
    let flash = test_flash(16 * CHUNK as usize);
    // The fifth chunk comes back 1000 bytes short of the 16 KiB asked for.
    let fc = SimFc::new(flash.clone()).with_short_read_at(4 * CHUNK, (CHUNK - 1000) as u16);
    let storage = TempDir::new().unwrap();
    let on_disk = run_and_read_back(fc, config_for(&storage, 3), &storage).await;
    assert_eq!(on_disk, flash);
}

#[tokio::test(start_paused = true)]
async fn uneven_tail_chunk_is_read_exactly() {
    // Not a multiple of the chunk size: the final read is a partial chunk.
    let flash = test_flash((5 * CHUNK + 777) as usize);
    let fc = SimFc::new(flash.clone());
    let storage = TempDir::new().unwrap();
    let on_disk = run_and_read_back(fc, config_for(&storage, 2), &storage).await;
    assert_eq!(on_disk, flash);
}
