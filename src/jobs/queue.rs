//! Work queue between the job runner and its worker
//!
//! Items cross the boundary as serialized JSON so a work item carries
//! everything the worker needs and nothing else.

use crate::document::DocumentHandle;
use crate::models::JobPriority;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, error};
use uuid::Uuid;

/// Self-contained unit of async work.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkItem {
    pub job_id: Uuid,
    pub priority: JobPriority,
    pub document: DocumentHandle,
    pub query: Option<String>,
    pub enqueued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueDepth {
    pub high: usize,
    pub normal: usize,
    pub low: usize,
}

impl QueueDepth {
    pub fn total(&self) -> usize {
        self.high + self.normal + self.low
    }
}

#[derive(Default)]
struct Lanes {
    high: VecDeque<String>,
    normal: VecDeque<String>,
    low: VecDeque<String>,
}

impl Lanes {
    fn lane(&mut self, priority: JobPriority) -> &mut VecDeque<String> {
        match priority {
            JobPriority::High => &mut self.high,
            JobPriority::Normal => &mut self.normal,
            JobPriority::Low => &mut self.low,
        }
    }

    fn in_order(&mut self) -> [&mut VecDeque<String>; 3] {
        [&mut self.high, &mut self.normal, &mut self.low]
    }
}

/// Three-lane FIFO queue; higher lanes always drain first.
#[derive(Default)]
pub struct JobQueue {
    lanes: Mutex<Lanes>,
    notify: Notify,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push(&self, item: &WorkItem) -> Result<()> {
        let payload = serde_json::to_string(item)?;
        self.lanes.lock().await.lane(item.priority).push_back(payload);
        self.notify.notify_one();
        debug!(job_id = %item.job_id, priority = ?item.priority, "Work item enqueued");
        Ok(())
    }

    /// Next item without waiting.
    pub async fn try_pop(&self) -> Option<WorkItem> {
        let mut lanes = self.lanes.lock().await;
        for lane in lanes.in_order() {
            while let Some(payload) = lane.pop_front() {
                match serde_json::from_str::<WorkItem>(&payload) {
                    Ok(item) => return Some(item),
                    Err(e) => error!(error = %e, "Dropping unreadable work item"),
                }
            }
        }
        None
    }

    /// Wait for the next item. Cancel-safe: no item is lost if the future
    /// is dropped.
    pub async fn recv(&self) -> WorkItem {
        loop {
            if let Some(item) = self.try_pop().await {
                return item;
            }
            self.notify.notified().await;
        }
    }

    /// Take a specific job out of the queue.
    pub async fn remove(&self, job_id: Uuid) -> Option<WorkItem> {
        let mut lanes = self.lanes.lock().await;
        for lane in lanes.in_order() {
            let position = lane.iter().position(|payload| {
                serde_json::from_str::<WorkItem>(payload)
                    .map(|item| item.job_id == job_id)
                    .unwrap_or(false)
            });
            if let Some(idx) = position {
                return lane
                    .remove(idx)
                    .and_then(|payload| serde_json::from_str(&payload).ok());
            }
        }
        None
    }

    pub async fn depth(&self) -> QueueDepth {
        let lanes = self.lanes.lock().await;
        QueueDepth {
            high: lanes.high.len(),
            normal: lanes.normal.len(),
            low: lanes.low.len(),
        }
    }
}
