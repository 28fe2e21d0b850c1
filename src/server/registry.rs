// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Tracks the worker threads currently handling connections so
//! shutdown can wait for them to finish. Workers run detached; the
//! registry is the only record of their existence.

use std::{
    sync::Mutex,
    thread::{self, ThreadId},
    time::{Duration, SystemTime},
};

use tracing::{info, warn};

struct WorkerRecord {
    thread: ThreadId,
    #[allow(dead_code)] // kept for the _status command and debugging
    started_at: SystemTime,
}

/// Invariant: `count` always equals `workers.len()`; both are only
/// mutated with their mutexes held, count after list.
pub struct WorkerRegistry {
    workers: Mutex<Vec<WorkerRecord>>,
    count: Mutex<u64>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        WorkerRegistry { workers: Mutex::new(vec![]), count: Mutex::new(0) }
    }

    /// Register the calling thread.
    pub fn register(&self) {
        let mut workers = self.workers.lock().unwrap();
        let mut count = self.count.lock().unwrap();
        workers.push(WorkerRecord {
            thread: thread::current().id(),
            started_at: SystemTime::now(),
        });
        *count += 1;
    }

    /// Unregister the calling thread.
    pub fn unregister(&self) {
        let mut workers = self.workers.lock().unwrap();
        let self_id = thread::current().id();
        if let Some(pos) = workers.iter().position(|w| w.thread == self_id) {
            workers.remove(pos);
            let mut count = self.count.lock().unwrap();
            *count -= 1;
        }
    }

    pub fn count(&self) -> u64 {
        *self.count.lock().unwrap()
    }

    /// Give the running workers some time to finish. Requires that no
    /// new workers are spawned once this is called.
    pub fn shutdown(&self) {
        for _ in 0..30 {
            if self.count() == 0 {
                info!("all workers finished");
                return;
            }
            thread::sleep(Duration::from_millis(333));
        }
        warn!("shutting down with {} workers still running", self.count());
    }
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        WorkerRegistry::new()
    }
}
