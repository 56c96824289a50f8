//! In-memory object store
//!
//! A complete [`ObjectStore`] kept in a `BTreeMap`, with multipart sessions,
//! token paging, call recording and fault injection. The test suites drive
//! the transfer engine against it; it is also handy for dry runs.
//!
//! # Example
//!
//! ```
//! use conveyor::store::{InMemoryStore, ObjectStore, StoreError, StoreOp};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let store = InMemoryStore::new();
//! store.fail_next(StoreOp::Put, 1, StoreError::Network("reset".into()));
//!
//! assert!(store.put_object("a.txt", "hi".into(), None).await.is_err());
//! assert!(store.put_object("a.txt", "hi".into(), None).await.is_ok());
//! assert_eq!(store.count(StoreOp::Put), 2);
//! # }
//! ```

use super::{
    ByteStream, CompletedPart, DeleteFailure, ListPage, ListRequest, ObjectMetadata,
    ObjectStore, ObjectSummary, PresignMethod, PutReceipt, StoreError, StoreResult,
};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::{self, StreamExt};
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::hash::{Hash, Hasher};
use std::ops::Range;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

/// Default number of entries per listed page
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Size of the pieces a streamed get is split into
const STREAM_PIECE_SIZE: usize = 64 * 1024;

/// Store operation kinds, used for call recording and fault injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Put,
    Get,
    GetStream,
    Head,
    Delete,
    DeleteBatch,
    Copy,
    List,
    CreateMultipart,
    UploadPart,
    CompleteMultipart,
    AbortMultipart,
    Presign,
}

/// A recorded store call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreCall {
    /// Operation kind
    pub op: StoreOp,
    /// Key (or prefix, for list calls) the call targeted
    pub key: String,
    /// Part number, for part uploads
    pub part_number: Option<u32>,
    /// Body length, for puts and part uploads
    pub body_len: Option<usize>,
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    content_type: Option<String>,
    etag: String,
    modified: SystemTime,
}

#[derive(Debug)]
struct Session {
    key: String,
    content_type: Option<String>,
    parts: BTreeMap<u32, (Bytes, String)>,
}

#[derive(Debug)]
struct Fault {
    op: StoreOp,
    key: Option<String>,
    /// `None` fails forever
    remaining: Option<u32>,
    error: StoreError,
}

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<String, StoredObject>,
    sessions: HashMap<String, Session>,
    calls: Vec<StoreCall>,
    faults: Vec<Fault>,
    latency: HashMap<StoreOp, Duration>,
    body_latency: Option<Duration>,
    active: HashMap<StoreOp, usize>,
    peak: HashMap<StoreOp, usize>,
    next_session: u64,
}

/// In-memory [`ObjectStore`]
#[derive(Debug, Clone)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
    page_size: usize,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn etag_of(data: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    data.hash(&mut hasher);
    format!("\"{:016x}\"", hasher.finish())
}

impl InMemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Set how many entries each listed page holds
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seed an object
    pub fn insert(&self, key: impl Into<String>, data: impl Into<Bytes>) {
        let data = data.into();
        let object = StoredObject {
            etag: etag_of(&data),
            data,
            content_type: None,
            modified: SystemTime::now(),
        };
        self.lock().objects.insert(key.into(), object);
    }

    /// Contents of an object
    pub fn object(&self, key: &str) -> Option<Bytes> {
        self.lock().objects.get(key).map(|o| o.data.clone())
    }

    /// Stored content type of an object
    pub fn content_type(&self, key: &str) -> Option<String> {
        self.lock()
            .objects
            .get(key)
            .and_then(|o| o.content_type.clone())
    }

    /// All keys, sorted
    pub fn keys(&self) -> Vec<String> {
        self.lock().objects.keys().cloned().collect()
    }

    /// Multipart sessions that were opened and neither completed nor aborted
    pub fn open_sessions(&self) -> usize {
        self.lock().sessions.len()
    }

    /// Every call made so far, in order
    pub fn calls(&self) -> Vec<StoreCall> {
        self.lock().calls.clone()
    }

    /// Number of calls of one kind (including failed ones)
    pub fn count(&self, op: StoreOp) -> usize {
        self.lock().calls.iter().filter(|c| c.op == op).count()
    }

    /// Forget recorded calls
    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Fail the next `times` calls of `op` with `error`
    pub fn fail_next(&self, op: StoreOp, times: u32, error: StoreError) {
        self.lock().faults.push(Fault {
            op,
            key: None,
            remaining: Some(times),
            error,
        });
    }

    /// Fail every call of `op` on `key` with `error`
    pub fn fail_always(&self, op: StoreOp, key: impl Into<String>, error: StoreError) {
        self.lock().faults.push(Fault {
            op,
            key: Some(key.into()),
            remaining: None,
            error,
        });
    }

    /// Fail one specific part upload `times` times
    pub fn fail_part(&self, part_number: u32, times: u32, error: StoreError) {
        self.lock().faults.push(Fault {
            op: StoreOp::UploadPart,
            key: Some(format!("#{}", part_number)),
            remaining: Some(times),
            error,
        });
    }

    /// Delay every call of `op`
    pub fn set_latency(&self, op: StoreOp, latency: Duration) {
        self.lock().latency.insert(op, latency);
    }

    /// Delay every piece of a streamed body; the stream itself opens at once
    pub fn set_body_latency(&self, latency: Duration) {
        self.lock().body_latency = Some(latency);
    }

    /// Drop all injected faults and latencies
    pub fn heal(&self) {
        let mut state = self.lock();
        state.faults.clear();
        state.latency.clear();
        state.body_latency = None;
    }

    /// Highest number of `op` calls seen in progress at once. Calls only
    /// overlap while they sit in a [`set_latency`](Self::set_latency) delay.
    pub fn peak_in_flight(&self, op: StoreOp) -> usize {
        self.lock().peak.get(&op).copied().unwrap_or(0)
    }

    /// Record the call, apply latency and any matching fault
    async fn enter(&self, call: StoreCall) -> StoreResult<()> {
        let latency = {
            let mut state = self.lock();
            state.calls.push(call.clone());
            let active = state.active.entry(call.op).or_insert(0);
            *active += 1;
            let now = *active;
            let peak = state.peak.entry(call.op).or_insert(0);
            *peak = (*peak).max(now);
            state.latency.get(&call.op).copied()
        };
        let in_flight = InFlight { store: self, op: call.op };

        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        drop(in_flight);

        let mut state = self.lock();
        let part_tag = call.part_number.map(|n| format!("#{}", n));
        let hit = state.faults.iter_mut().find(|f| {
            f.op == call.op
                && f.remaining != Some(0)
                && match &f.key {
                    None => true,
                    Some(k) => *k == call.key || Some(k) == part_tag.as_ref(),
                }
        });

        match hit {
            Some(fault) => {
                if let Some(remaining) = fault.remaining.as_mut() {
                    *remaining -= 1;
                }
                Err(fault.error.clone())
            }
            None => Ok(()),
        }
    }

    fn call(op: StoreOp, key: &str) -> StoreCall {
        StoreCall {
            op,
            key: key.to_string(),
            part_number: None,
            body_len: None,
        }
    }
}

/// Counts a call as in progress until dropped, so cancelled calls are
/// released too
struct InFlight<'a> {
    store: &'a InMemoryStore,
    op: StoreOp,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Some(active) = self.store.lock().active.get_mut(&self.op) {
            *active = active.saturating_sub(1);
        }
    }
}

#[async_trait]
impl ObjectStore for InMemoryStore {
    async fn put_object(
        &self,
        key: &str,
        body: Bytes,
        content_type: Option<&str>,
    ) -> StoreResult<PutReceipt> {
        self.enter(StoreCall {
            body_len: Some(body.len()),
            ..Self::call(StoreOp::Put, key)
        })
        .await?;

        let etag = etag_of(&body);
        self.lock().objects.insert(
            key.to_string(),
            StoredObject {
                data: body,
                content_type: content_type.map(str::to_string),
                etag: etag.clone(),
                modified: SystemTime::now(),
            },
        );
        Ok(PutReceipt { etag: Some(etag) })
    }

    async fn get_object(&self, key: &str, range: Option<Range<u64>>) -> StoreResult<Bytes> {
        self.enter(Self::call(StoreOp::Get, key)).await?;

        let data = self
            .object(key)
            .ok_or_else(|| StoreError::not_found(key))?;

        match range {
            None => Ok(data),
            Some(range) => {
                let len = data.len() as u64;
                if range.start > range.end || range.start >= len {
                    return Err(StoreError::Service {
                        code: "InvalidRange".to_string(),
                        message: format!("{:?} outside object of {} bytes", range, len),
                    });
                }
                let end = range.end.min(len);
                Ok(data.slice(range.start as usize..end as usize))
            }
        }
    }

    async fn get_stream(&self, key: &str) -> StoreResult<ByteStream> {
        self.enter(Self::call(StoreOp::GetStream, key)).await?;

        let data = self
            .object(key)
            .ok_or_else(|| StoreError::not_found(key))?;

        let pieces: Vec<StoreResult<Bytes>> = (0..data.len())
            .step_by(STREAM_PIECE_SIZE)
            .map(|start| Ok(data.slice(start..(start + STREAM_PIECE_SIZE).min(data.len()))))
            .collect();
        let pieces = stream::iter(pieces);
        let body_latency = self.lock().body_latency;

        Ok(match body_latency {
            None => pieces.boxed(),
            Some(delay) => pieces
                .then(move |piece| async move {
                    tokio::time::sleep(delay).await;
                    piece
                })
                .boxed(),
        })
    }

    async fn head_object(&self, key: &str) -> StoreResult<ObjectMetadata> {
        self.enter(Self::call(StoreOp::Head, key)).await?;

        self.lock()
            .objects
            .get(key)
            .map(|o| ObjectMetadata {
                key: key.to_string(),
                size: o.data.len() as u64,
                content_type: o.content_type.clone(),
                etag: Some(o.etag.clone()),
                last_modified: Some(o.modified),
            })
            .ok_or_else(|| StoreError::not_found(key))
    }

    async fn delete_object(&self, key: &str) -> StoreResult<()> {
        self.enter(Self::call(StoreOp::Delete, key)).await?;

        self.lock()
            .objects
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found(key))
    }

    async fn delete_objects(&self, keys: &[String]) -> StoreResult<Vec<DeleteFailure>> {
        let label = keys.first().cloned().unwrap_or_default();
        self.enter(Self::call(StoreOp::DeleteBatch, &label)).await?;

        let mut state = self.lock();
        let mut failures = Vec::new();
        for key in keys {
            let refused = state
                .faults
                .iter()
                .any(|f| f.op == StoreOp::Delete && f.key.as_deref() == Some(key.as_str()));
            if refused {
                failures.push(DeleteFailure {
                    key: key.clone(),
                    message: "AccessDenied".to_string(),
                });
            } else {
                // batch delete of a missing key is a success, like S3
                state.objects.remove(key);
            }
        }
        Ok(failures)
    }

    async fn copy_object(&self, source_key: &str, dest_key: &str) -> StoreResult<()> {
        self.enter(Self::call(StoreOp::Copy, source_key)).await?;

        let mut state = self.lock();
        let mut object = state
            .objects
            .get(source_key)
            .cloned()
            .ok_or_else(|| StoreError::not_found(source_key))?;
        object.modified = SystemTime::now();
        state.objects.insert(dest_key.to_string(), object);
        Ok(())
    }

    async fn list_page(&self, request: &ListRequest) -> StoreResult<ListPage> {
        self.enter(Self::call(StoreOp::List, &request.prefix)).await?;

        enum Entry {
            Object(ObjectSummary),
            Prefix(String),
        }

        let state = self.lock();
        let mut prefixes = BTreeSet::new();
        let mut entries: Vec<(String, Entry)> = Vec::new();

        for (key, object) in state.objects.range(request.prefix.clone()..) {
            let Some(rest) = key.strip_prefix(request.prefix.as_str()) else {
                break;
            };
            let grouped = request
                .delimiter
                .as_deref()
                .filter(|d| !d.is_empty())
                .and_then(|d| rest.find(d).map(|idx| idx + d.len()));
            match grouped {
                Some(end) => {
                    let prefix = format!("{}{}", request.prefix, &rest[..end]);
                    if prefixes.insert(prefix.clone()) {
                        entries.push((prefix.clone(), Entry::Prefix(prefix)));
                    }
                }
                None => entries.push((
                    key.clone(),
                    Entry::Object(ObjectSummary {
                        key: key.clone(),
                        size: object.data.len() as u64,
                    }),
                )),
            }
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let offset = match &request.continuation_token {
            None => 0,
            Some(token) => token.parse::<usize>().map_err(|_| StoreError::Service {
                code: "InvalidArgument".to_string(),
                message: format!("bad continuation token {}", token),
            })?,
        };
        let page_size = request
            .max_keys
            .map(|m| (m as usize).clamp(1, self.page_size))
            .unwrap_or(self.page_size);
        let end = (offset + page_size).min(entries.len());

        let mut page = ListPage {
            next_token: (end < entries.len()).then(|| end.to_string()),
            ..Default::default()
        };
        for (_, entry) in entries.into_iter().skip(offset).take(end.saturating_sub(offset)) {
            match entry {
                Entry::Object(summary) => page.objects.push(summary),
                Entry::Prefix(prefix) => page.common_prefixes.push(prefix),
            }
        }
        Ok(page)
    }

    async fn create_multipart(
        &self,
        key: &str,
        content_type: Option<&str>,
    ) -> StoreResult<String> {
        self.enter(Self::call(StoreOp::CreateMultipart, key)).await?;

        let mut state = self.lock();
        state.next_session += 1;
        let session_id = format!("upload-{}", state.next_session);
        state.sessions.insert(
            session_id.clone(),
            Session {
                key: key.to_string(),
                content_type: content_type.map(str::to_string),
                parts: BTreeMap::new(),
            },
        );
        Ok(session_id)
    }

    async fn upload_part(
        &self,
        key: &str,
        session_id: &str,
        part_number: u32,
        body: Bytes,
    ) -> StoreResult<String> {
        self.enter(StoreCall {
            part_number: Some(part_number),
            body_len: Some(body.len()),
            ..Self::call(StoreOp::UploadPart, key)
        })
        .await?;

        let mut state = self.lock();
        let session = state
            .sessions
            .get_mut(session_id)
            .filter(|s| s.key == key)
            .ok_or_else(|| StoreError::Service {
                code: "NoSuchUpload".to_string(),
                message: session_id.to_string(),
            })?;
        let etag = etag_of(&body);
        session.parts.insert(part_number, (body, etag.clone()));
        Ok(etag)
    }

    async fn complete_multipart(
        &self,
        key: &str,
        session_id: &str,
        parts: &[CompletedPart],
    ) -> StoreResult<PutReceipt> {
        self.enter(Self::call(StoreOp::CompleteMultipart, key)).await?;

        let mut state = self.lock();
        let session = state
            .sessions
            .get(session_id)
            .filter(|s| s.key == key)
            .ok_or_else(|| StoreError::Service {
                code: "NoSuchUpload".to_string(),
                message: session_id.to_string(),
            })?;

        if parts.is_empty() || parts.windows(2).any(|w| w[0].part_number >= w[1].part_number) {
            return Err(StoreError::Service {
                code: "InvalidPartOrder".to_string(),
                message: "parts must be listed in ascending order".to_string(),
            });
        }

        let mut data = BytesMut::new();
        for part in parts {
            match session.parts.get(&part.part_number) {
                Some((body, etag)) if *etag == part.etag => data.extend_from_slice(body),
                _ => {
                    return Err(StoreError::Service {
                        code: "InvalidPart".to_string(),
                        message: format!("part {} missing or tag mismatch", part.part_number),
                    })
                }
            }
        }

        let content_type = session.content_type.clone();
        state.sessions.remove(session_id);

        let data = data.freeze();
        let etag = format!("{}-{}", etag_of(&data).trim_matches('"'), parts.len());
        state.objects.insert(
            key.to_string(),
            StoredObject {
                data,
                content_type,
                etag: etag.clone(),
                modified: SystemTime::now(),
            },
        );
        Ok(PutReceipt { etag: Some(etag) })
    }

    async fn abort_multipart(&self, key: &str, session_id: &str) -> StoreResult<()> {
        self.enter(Self::call(StoreOp::AbortMultipart, key)).await?;

        self.lock()
            .sessions
            .remove(session_id)
            .map(|_| ())
            .ok_or_else(|| StoreError::Service {
                code: "NoSuchUpload".to_string(),
                message: session_id.to_string(),
            })
    }

    async fn presign(
        &self,
        key: &str,
        method: PresignMethod,
        expires_in: Duration,
    ) -> StoreResult<String> {
        self.enter(Self::call(StoreOp::Presign, key)).await?;

        let method = match method {
            PresignMethod::Get => "GET",
            PresignMethod::Put => "PUT",
        };
        Ok(format!(
            "memory://{}?method={}&expires={}",
            key,
            method,
            expires_in.as_secs()
        ))
    }
}
