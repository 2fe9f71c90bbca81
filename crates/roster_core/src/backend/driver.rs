//! Synchronous pump between an engine and a backend.
//!
//! Hosts with their own I/O loop drive `RosterEngine` directly; these helpers
//! cover the blocking case used by tests and single-process demos.

use super::{BackendError, BackendResult, StorageBackend};
use crate::engine::RosterEngine;
use crate::service::MutationOutcome;
use log::{debug, warn};
use std::time::Instant;

/// Sends every outstanding request, completing each with the backend result.
///
/// A call that returns after the request timeout is completed as a timeout
/// even if the backend committed it. Requests released by earlier
/// completions are sent in the same flush.
pub fn flush(
    engine: &mut RosterEngine,
    backend: &mut impl StorageBackend,
) -> Vec<MutationOutcome> {
    let timeout = engine.settings().request_timeout();
    let mut outcomes = Vec::new();
    loop {
        let requests = engine.take_requests();
        if requests.is_empty() {
            return outcomes;
        }
        for request in requests {
            let started_at = Instant::now();
            let mut result = backend.execute(&request);
            let elapsed = started_at.elapsed();
            if elapsed > timeout {
                warn!(
                    "event=driver_flush module=backend status=timeout request={} elapsed_ms={}",
                    request.id,
                    elapsed.as_millis()
                );
                result = Err(BackendError::Timeout {
                    elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                });
            }
            outcomes.extend(engine.complete(request.id, result));
        }
    }
}

/// Reads the change feed from the engine's cursor and ingests every event.
///
/// Returns the number of events read. Rows the feed adapter rejects are
/// logged and skipped so one bad row cannot stall the feed.
pub fn pull(
    engine: &mut RosterEngine,
    backend: &mut impl StorageBackend,
) -> BackendResult<usize> {
    let limit = engine.settings().feed_batch_size;
    let mut read = 0;
    loop {
        let batch = backend.changes_since(engine.feed_cursor(), limit)?;
        let count = batch.events.len();
        for event in &batch.events {
            if let Err(err) = engine.ingest(event) {
                warn!(
                    "event=driver_pull module=backend status=skipped table={} server_ts={} error={}",
                    event.table, event.server_ts, err
                );
            }
        }
        engine.advance_feed_cursor(batch.next_cursor);
        read += count;
        if count < limit {
            debug!(
                "event=driver_pull module=backend status=ok events={} cursor={}",
                read,
                engine.feed_cursor()
            );
            return Ok(read);
        }
    }
}
