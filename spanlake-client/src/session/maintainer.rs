//! Background upkeep of the session pool.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::id::HandleId;
use super::pool::{IdleSession, PoolInner};
use super::Session;

pub(super) fn spawn(pool: &Arc<PoolInner>) {
    let weak = Arc::downgrade(pool);
    let shutdown = pool.shutdown.clone();
    let period = Duration::from_millis(pool.config.maintenance_interval_ms);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;
        let mut last_inactive_check = Instant::now();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let Some(pool) = weak.upgrade() else { break };
            maintain(&pool, &mut last_inactive_check).await;
        }
        debug!("session pool maintainer stopped");
    });
}

async fn maintain(pool: &Arc<PoolInner>, last_inactive_check: &mut Instant) {
    pool.replenish();
    keep_alive(pool).await;
    shrink(pool);
    prepare_write_sessions(pool).await;

    let removal = &pool.config.inactive_transaction_removal;
    let frequency = Duration::from_millis(removal.execution_frequency_ms);
    let enabled = removal.action.warns() || removal.action.closes();
    if enabled && last_inactive_check.elapsed() >= frequency {
        *last_inactive_check = Instant::now();
        remove_long_running(pool);
    }
}

/// Pings idle sessions neither used nor pinged within the health check
/// interval. Sessions the server no longer knows are dropped.
async fn keep_alive(pool: &Arc<PoolInner>) {
    let threshold = Duration::from_millis(pool.config.health_check_interval_ms);
    let stale: Vec<IdleSession> = {
        let mut guard = pool.lock();
        let state = &mut *guard;
        let mut stale = Vec::new();
        for list in [&mut state.idle, &mut state.idle_write] {
            let (keep, old): (Vec<_>, Vec<_>) = list
                .drain(..)
                .partition(|idle| idle.pinged.elapsed() < threshold);
            list.extend(keep);
            stale.extend(old);
        }
        stale
    };
    if stale.is_empty() {
        return;
    }
    debug!(sessions = stale.len(), "pinging idle sessions");
    futures::stream::iter(stale)
        .for_each_concurrent(pool.config.health_check_workers, |idle| async move {
            let result = idle.session.ping().await;
            let mut state = pool.lock();
            match result {
                Err(err) if err.is_session_not_found() => {
                    debug!(session = %idle.session.name(), "dropping expired session");
                    pool.discard(&mut state, idle.session);
                }
                _ if state.closed => pool.discard(&mut state, idle.session),
                // Transient ping failures keep the session; the next
                // checkout surfaces a real problem.
                _ => pool.deliver(&mut state, idle.mark_pinged()),
            }
        })
        .await;
}

/// Deletes sessions idle past `idle_session_timeout_ms` beyond `max_idle`,
/// least recently used first, never going below `min_opened`.
fn shrink(pool: &Arc<PoolInner>) {
    let timeout = Duration::from_millis(pool.config.idle_session_timeout_ms);
    let mut guard = pool.lock();
    let state = &mut *guard;
    let surplus_idle = (state.idle_len() as u64).saturating_sub(pool.config.max_idle);
    let surplus_open = state.num_opened.saturating_sub(pool.config.min_opened);
    let mut removable = surplus_idle.min(surplus_open);
    let mut expired: Vec<Arc<Session>> = Vec::new();
    while removable > 0 {
        let read_since = state.idle.back().map(|idle| idle.since);
        let write_since = state.idle_write.back().map(|idle| idle.since);
        let list = match (read_since, write_since) {
            (Some(read), Some(write)) if write < read => &mut state.idle_write,
            (Some(_), _) => &mut state.idle,
            (None, Some(_)) => &mut state.idle_write,
            (None, None) => break,
        };
        match list.back() {
            Some(oldest) if oldest.since.elapsed() >= timeout => {}
            _ => break,
        }
        if let Some(idle) = list.pop_back() {
            expired.push(idle.session);
        }
        removable -= 1;
    }
    if !expired.is_empty() {
        debug!(sessions = expired.len(), "shrinking session pool");
    }
    for session in expired {
        pool.discard(state, session);
    }
}

/// Keeps roughly `write_sessions` of the idle sessions prepared with a
/// read-write transaction.
async fn prepare_write_sessions(pool: &Arc<PoolInner>) {
    if pool.config.write_sessions <= 0.0 {
        return;
    }
    let batch: Vec<IdleSession> = {
        let mut state = pool.lock();
        let idle = state.idle_len() as f64;
        let target = (idle * pool.config.write_sessions).round() as usize;
        let need = target.saturating_sub(state.idle_write.len());
        let take = need.min(state.idle.len());
        let at = state.idle.len() - take;
        state.idle.split_off(at).into_iter().collect()
    };
    if batch.is_empty() {
        return;
    }
    let route = pool.client.route_to_leader();
    let options = crate::options::TransactionOptions::default().read_write_options();
    futures::stream::iter(batch)
        .for_each_concurrent(pool.config.health_check_workers, |idle| {
            let options = options.clone();
            async move {
                let result = idle.session.begin_transaction(options, None, route).await;
                let mut state = pool.lock();
                match result {
                    _ if state.closed => pool.discard(&mut state, idle.session),
                    Ok(tx) => pool.deliver(&mut state, idle.with_transaction(tx.id)),
                    Err(err) if err.is_session_not_found() => pool.discard(&mut state, idle.session),
                    Err(err) => {
                        debug!(session = %idle.session.name(), error = %err, "failed to prepare write session");
                        pool.deliver(&mut state, idle);
                    }
                }
            }
        })
        .await;
}

/// Finds checkouts held past the idle time threshold by callers that did
/// not declare long-running work, oldest first, and warns about or
/// reclaims them.
fn remove_long_running(pool: &Arc<PoolInner>) {
    let removal = &pool.config.inactive_transaction_removal;
    let threshold = Duration::from_millis(removal.idle_time_threshold_ms);
    let mut guard = pool.lock();
    let state = &mut *guard;
    let ratio = state.in_use.len() as f64 / pool.config.max_opened as f64;
    if ratio < removal.used_sessions_ratio_threshold {
        return;
    }
    let leaked = overdue(
        state
            .in_use
            .iter()
            .map(|(id, c)| (*id, c.checked_out_at, c.long_running)),
        threshold,
    );
    for (checked_out_at, id) in leaked {
        if removal.action.warns() {
            if let Some(checkout) = state.in_use.get(&id) {
                warn!(
                    session = %checkout.session.name(),
                    held_secs = checked_out_at.elapsed().as_secs(),
                    backtrace = checkout.backtrace.as_deref().unwrap_or("<enable track_session_handles to capture>"),
                    "transaction has been running longer than the inactive transaction threshold"
                );
            }
        }
        if removal.action.closes() {
            if let Some(checkout) = state.in_use.remove(&id) {
                pool.metrics.record_session_released();
                pool.discard(state, checkout.session);
            }
        }
    }
}

/// Checkouts held at least `threshold` without being marked long-running,
/// oldest checkout first.
fn overdue(
    checkouts: impl Iterator<Item = (HandleId, Instant, bool)>,
    threshold: Duration,
) -> Vec<(Instant, HandleId)> {
    let mut leaked: Vec<_> = checkouts
        .filter(|(_, at, long_running)| !long_running && at.elapsed() >= threshold)
        .map(|(id, at, _)| (at, id))
        .collect();
    leaked.sort();
    leaked
}
