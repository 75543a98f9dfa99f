use async_trait::async_trait;
use clickhouse::Client;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::config::BufferConfig;
use crate::models::event::TrackingEvent;
use crate::store;

/// Destination of a flush batch. The production sink bulk-inserts into the
/// workspace's events table; tests substitute an in-memory sink.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn insert_events(
        &self,
        workspace_id: &str,
        events: &[TrackingEvent],
    ) -> anyhow::Result<()>;
}

pub struct ClickHouseSink {
    ch: Client,
}

impl ClickHouseSink {
    pub fn new(ch: Client) -> Self {
        Self { ch }
    }
}

#[async_trait]
impl EventSink for ClickHouseSink {
    async fn insert_events(
        &self,
        workspace_id: &str,
        events: &[TrackingEvent],
    ) -> anyhow::Result<()> {
        store::insert_events(&self.ch, workspace_id, events).await?;
        Ok(())
    }
}

#[derive(Default)]
struct WorkspaceBuffer {
    queue: Vec<TrackingEvent>,
    flush_timer: Option<JoinHandle<()>>,
    flushing: bool,
}

/// Coalesces enrichment output into bulk inserts, one queue per workspace.
/// A queue flushes when it reaches `max_buffer_size` or when its one-shot
/// timer (started on the first event) fires. Per workspace at most one
/// flush is in flight; flushes for different workspaces run concurrently.
#[derive(Clone)]
pub struct EventBuffer {
    sink: Arc<dyn EventSink>,
    config: BufferConfig,
    inner: Arc<Mutex<HashMap<String, WorkspaceBuffer>>>,
}

impl EventBuffer {
    pub fn new(sink: Arc<dyn EventSink>, config: BufferConfig) -> Self {
        Self {
            sink,
            config,
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Append one event. Starts the flush timer when the queue goes
    /// non-empty and flushes inline when the size threshold is crossed.
    pub async fn add(&self, event: TrackingEvent) -> anyhow::Result<()> {
        let workspace_id = event.workspace_id.clone();
        self.enqueue(&workspace_id, vec![event]).await
    }

    /// Append a batch, grouped per workspace. Timer-start and
    /// size-threshold semantics match element-wise `add`.
    pub async fn add_batch(&self, events: Vec<TrackingEvent>) -> anyhow::Result<()> {
        let mut grouped: HashMap<String, Vec<TrackingEvent>> = HashMap::new();
        let mut order: Vec<String> = Vec::new();
        for event in events {
            if !grouped.contains_key(&event.workspace_id) {
                order.push(event.workspace_id.clone());
            }
            grouped.entry(event.workspace_id.clone()).or_default().push(event);
        }
        for workspace_id in order {
            if let Some(batch) = grouped.remove(&workspace_id) {
                self.enqueue(&workspace_id, batch).await?;
            }
        }
        Ok(())
    }

    async fn enqueue(&self, workspace_id: &str, events: Vec<TrackingEvent>) -> anyhow::Result<()> {
        let should_flush = {
            let mut map = self.inner.lock().await;
            let buf = map.entry(workspace_id.to_string()).or_default();
            let was_empty = buf.queue.is_empty();
            buf.queue.extend(events);
            if was_empty && !buf.queue.is_empty() {
                buf.flush_timer = Some(self.spawn_flush_timer(workspace_id));
            }
            buf.queue.len() >= self.config.max_buffer_size
        };
        if should_flush {
            self.flush(workspace_id).await?;
        }
        Ok(())
    }

    fn spawn_flush_timer(&self, workspace_id: &str) -> JoinHandle<()> {
        let buffer = self.clone();
        let workspace_id = workspace_id.to_string();
        let interval = Duration::from_millis(self.config.flush_interval_ms);
        tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            if let Err(e) = buffer.flush(&workspace_id).await {
                tracing::warn!("timed flush for {workspace_id} failed: {e}");
            }
        })
    }

    /// Flush one workspace queue. Single-flight: a flush that finds another
    /// in progress returns immediately (the in-flight one owns the data).
    /// On insert failure the snapshot is prepended back in front of
    /// whatever arrived meanwhile and the error propagates to the caller.
    pub async fn flush(&self, workspace_id: &str) -> anyhow::Result<()> {
        let batch = {
            let mut map = self.inner.lock().await;
            let Some(buf) = map.get_mut(workspace_id) else {
                return Ok(());
            };
            if buf.flushing {
                return Ok(());
            }
            if let Some(timer) = buf.flush_timer.take() {
                timer.abort();
            }
            if buf.queue.is_empty() {
                return Ok(());
            }
            buf.flushing = true;
            std::mem::take(&mut buf.queue)
        };

        let result = self.sink.insert_events(workspace_id, &batch).await;

        let mut map = self.inner.lock().await;
        let buf = map.entry(workspace_id.to_string()).or_default();
        buf.flushing = false;
        match result {
            Ok(()) => {
                tracing::debug!("flushed {} event(s) for {workspace_id}", batch.len());
                Ok(())
            }
            Err(e) => {
                // Requeued events must precede anything added after the
                // failure was detected.
                let mut requeued = batch;
                requeued.append(&mut buf.queue);
                buf.queue = requeued;
                if buf.flush_timer.is_none() {
                    buf.flush_timer = Some(self.spawn_flush_timer(workspace_id));
                }
                Err(e)
            }
        }
    }

    /// Flush every workspace queue concurrently. Failures are logged and do
    /// not stop the sweep.
    pub async fn flush_all(&self) {
        let ids: Vec<String> = {
            let map = self.inner.lock().await;
            map.keys().cloned().collect()
        };
        let flushes = ids.iter().map(|id| self.flush(id));
        for (id, result) in ids.iter().zip(futures_util::future::join_all(flushes).await) {
            if let Err(e) = result {
                tracing::warn!("flush_all: workspace {id} failed: {e}");
            }
        }
    }

    /// Stop all timers, wait out in-flight flushes, then drain every
    /// remaining queue once.
    pub async fn shutdown(&self) {
        {
            let mut map = self.inner.lock().await;
            for buf in map.values_mut() {
                if let Some(timer) = buf.flush_timer.take() {
                    timer.abort();
                }
            }
        }

        // In-flight flushes clear their flag on completion either way.
        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        loop {
            let in_flight = {
                let map = self.inner.lock().await;
                map.values().any(|b| b.flushing)
            };
            if !in_flight || std::time::Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        self.flush_all().await;
    }

    #[cfg(test)]
    async fn queue_len(&self, workspace_id: &str) -> usize {
        let map = self.inner.lock().await;
        map.get(workspace_id).map(|b| b.queue.len()).unwrap_or(0)
    }
}

/// In-memory sink shared by the buffer and session-ingest unit tests.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    pub struct MemorySink {
        pub batches: std::sync::Mutex<Vec<(String, Vec<TrackingEvent>)>>,
        pub fail: AtomicBool,
        pub in_flight: AtomicUsize,
        pub max_in_flight: AtomicUsize,
        pub delay_ms: u64,
    }

    impl MemorySink {
        pub fn with_delay(delay_ms: u64) -> Self {
            Self {
                delay_ms,
                ..Default::default()
            }
        }

        pub fn batch_count(&self) -> usize {
            self.batches.lock().unwrap().len()
        }

        pub fn all_events(&self, workspace_id: &str) -> Vec<TrackingEvent> {
            self.batches
                .lock()
                .unwrap()
                .iter()
                .filter(|(w, _)| w == workspace_id)
                .flat_map(|(_, evs)| evs.clone())
                .collect()
        }
    }

    #[async_trait]
    impl EventSink for MemorySink {
        async fn insert_events(
            &self,
            workspace_id: &str,
            events: &[TrackingEvent],
        ) -> anyhow::Result<()> {
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(current, Ordering::SeqCst);
            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("simulated insert failure");
            }
            self.batches
                .lock()
                .unwrap()
                .push((workspace_id.to_string(), events.to_vec()));
            Ok(())
        }
    }
}
