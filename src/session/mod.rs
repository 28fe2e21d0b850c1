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

//! The session store. Sessions are identified by a 24 character sid:
//! 16 hex digits carrying an opaque handle id followed by 8 decimal
//! digits carrying a secret. Expired sessions are reclaimed in two
//! phases: a sweep first moves them from the live list onto a
//! tombstone list with a grace period, so that a late lookup fails
//! cleanly instead of aliasing a fresh allocation, and only frees them
//! once the grace period has also passed.

mod rwlock;

use std::{
    any::Any,
    sync::{
        atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::{SystemTime, UNIX_EPOCH},
};

use rand::Rng;
use tracing::debug;

use self::rwlock::BoundedRwLock;

/// Bound on concurrent readers of the live session list.
const MAX_SESSION_READERS: usize = 20;

/// Extra seconds a swept session lives on the tombstone list.
const TOMBSTONE_GRACE_SECS: i64 = 1200;

/// Sweep at the latest after this many session starts, even if no
/// expired entry was spotted on the way.
const CLEANUP_EVERY_STARTS: u32 = 1024;

/// Attachment id under which the script host keeps its session
/// variables.
pub const SESSION_VARS_DATA_ID: i32 = 5;

pub type DataValue = Arc<dyn Any + Send + Sync>;

struct DataItem {
    id: i32,
    value: DataValue,
}

struct SessionInner {
    handle: u64,
    secret: u32,
    /// Unix seconds. Updated under a read hold on a session refresh,
    /// hence atomic.
    valid_until: AtomicI64,
    data: Mutex<Vec<DataItem>>,
}

/// A handle to a live session as returned by `SessionStore::start`.
/// Cheap to clone; dropping it does not end the session.
#[derive(Clone)]
pub struct Session {
    sid: String,
    inner: Arc<SessionInner>,
}

impl Session {
    pub fn sid(&self) -> &str {
        &self.sid
    }

    /// Attach a typed value under the given id. Fails (returning None)
    /// when the id is already taken. On success a handle to the stored
    /// value is returned.
    pub fn register_data(&self, id: i32, value: DataValue) -> Option<DataValue> {
        let mut data = self.inner.data.lock().unwrap();
        if data.iter().any(|it| it.id == id) {
            return None;
        }
        // new attachments go in front
        data.insert(0, DataItem { id, value: Arc::clone(&value) });
        Some(value)
    }

    pub fn get_data(&self, id: i32) -> Option<DataValue> {
        let data = self.inner.data.lock().unwrap();
        data.iter().find(|it| it.id == id).map(|it| Arc::clone(&it.value))
    }

    /// Detach the value registered under the given id. Its destructor
    /// runs once the last outstanding handle is gone.
    pub fn unregister_data(&self, id: i32) {
        let mut data = self.inner.data.lock().unwrap();
        if let Some(pos) = data.iter().position(|it| it.id == id) {
            data.remove(pos);
        }
    }
}

pub struct SessionStore {
    live: BoundedRwLock<Vec<Arc<SessionInner>>>,
    tombstones: Mutex<Vec<Arc<SessionInner>>>,
    cleanup_counter: AtomicU32,
    next_handle: AtomicU64,
}

impl SessionStore {
    pub fn new() -> Self {
        SessionStore {
            live: BoundedRwLock::new(vec![], MAX_SESSION_READERS),
            tombstones: Mutex::new(vec![]),
            cleanup_counter: AtomicU32::new(0),
            // an arbitrary non-zero starting point so fresh sids do
            // not look all-zero
            next_handle: AtomicU64::new(0x1000),
        }
    }

    /// Resume the session a sid refers to, or start a fresh one. A
    /// resumed session gets its expiry pushed out to `now + ttl`; a
    /// fresh session is allocated when the sid is absent, unparsable,
    /// or refers to a session that is gone, expired or has a
    /// mismatched secret.
    pub fn start(&self, sid: Option<&str>, ttl_secs: i64) -> Session {
        let now = unix_now();
        let wanted = sid.and_then(parse_sid);

        let mut found = None;
        let mut invalid_count = 0u32;
        {
            let live = self.live.read();
            for entry in live.iter() {
                if entry.valid_until.load(Ordering::SeqCst) >= now {
                    if let Some((handle, secret)) = wanted {
                        if entry.handle == handle && entry.secret == secret {
                            entry.valid_until.store(now + ttl_secs, Ordering::SeqCst);
                            found = Some(Arc::clone(entry));
                            break;
                        }
                    }
                } else {
                    invalid_count += 1;
                }
            }
        }

        // force a sweep every so many session starts, or as soon as an
        // expired entry was seen during the scan
        if invalid_count > 0
            || self.cleanup_counter.fetch_add(1, Ordering::SeqCst) + 1 > CLEANUP_EVERY_STARTS
        {
            self.cleanup(now);
            self.cleanup_counter.store(0, Ordering::SeqCst);
        }

        let inner = match found {
            Some(inner) => inner,
            None => {
                let inner = Arc::new(SessionInner {
                    handle: self.next_handle.fetch_add(1, Ordering::SeqCst),
                    secret: rand::thread_rng().gen_range(1..=99999998),
                    valid_until: AtomicI64::new(now + ttl_secs),
                    data: Mutex::new(vec![]),
                });
                let mut live = self.live.write();
                live.insert(0, Arc::clone(&inner));
                inner
            }
        };

        Session { sid: encode_sid(inner.handle, inner.secret), inner }
    }

    /// Invalidate a session. Verifies the handle still refers to a
    /// member of the live list before zeroing its expiry; the next
    /// sweep moves it to the tombstone list.
    pub fn destroy(&self, session: &Session) -> bool {
        let member = {
            let live = self.live.read();
            live.iter().any(|entry| Arc::ptr_eq(entry, &session.inner))
        };
        if !member {
            return false;
        }
        let live = self.live.write();
        session.inner.valid_until.store(0, Ordering::SeqCst);
        drop(live);
        true
    }

    /// Number of sessions currently on the live list, expired or not.
    pub fn live_count(&self) -> usize {
        self.live.read().len()
    }

    /// Move expired live sessions to the tombstone list with a grace
    /// period, then free tombstones whose grace period has also
    /// passed.
    fn cleanup(&self, now: i64) {
        let mut swept = vec![];
        {
            let mut live = self.live.write();
            live.retain(|entry| {
                if entry.valid_until.load(Ordering::SeqCst) < now {
                    swept.push(Arc::clone(entry));
                    false
                } else {
                    true
                }
            });
        }

        let mut tombstones = self.tombstones.lock().unwrap();
        for entry in swept.drain(..) {
            let until = entry.valid_until.load(Ordering::SeqCst);
            entry.valid_until.store(until + TOMBSTONE_GRACE_SECS, Ordering::SeqCst);
            tombstones.insert(0, entry);
        }
        let before = tombstones.len();
        tombstones.retain(|entry| entry.valid_until.load(Ordering::SeqCst) >= now);
        if before != tombstones.len() {
            debug!("freed {} tombstoned sessions", before - tombstones.len());
        }
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        SessionStore::new()
    }
}

fn unix_now() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
}

fn encode_sid(handle: u64, secret: u32) -> String {
    format!("{handle:016X}{secret:08}")
}

/// Split a sid into handle and secret. The handle is never
/// dereferenced; it only becomes meaningful if a live list member
/// carries the same handle and secret.
fn parse_sid(sid: &str) -> Option<(u64, u32)> {
    if sid.len() < 24 || !sid.is_ascii() {
        return None;
    }
    let handle = u64::from_str_radix(&sid[..16], 16).ok()?;
    let secret = sid[16..24].parse::<u32>().ok()?;
    Some((handle, secret))
}
