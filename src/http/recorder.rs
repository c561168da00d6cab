//! Response recording and the first-writer-wins latch.
//!
//! # Responsibilities
//! - Buffer the response a handler produces for one request
//! - Record the first status code and the total bytes written
//! - Guarantee that only one writer origin produces the response
//!
//! # Design Decisions
//! - A handler-side and an enforcer-side writer share one sink; the latch
//!   decides which origin commits the response, not which one wrote first
//! - Handler writes stay buffered until the handler completes and commits
//! - The enforcer claims the latch before writing and discards whatever
//!   the handler had buffered
//! - Writes from the losing origin fail with [`WriteError::Superseded`]
//! - Once the response is handed to the transport the sink is sealed and
//!   every later write fails with [`WriteError::Closed`]

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use axum::body::Body;
use axum::http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use serde::Serialize;

const UNCLAIMED: u8 = 0;

/// Which side of the pipeline a writer belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WriterOrigin {
    /// The business handler.
    Handler = 1,
    /// The timeout enforcer writing its own response.
    Enforcer = 2,
}

impl WriterOrigin {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(WriterOrigin::Handler),
            2 => Some(WriterOrigin::Enforcer),
            _ => None,
        }
    }
}

/// Errors returned when writing to a [`ResponseWriter`].
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("response already claimed by the {owner:?} writer")]
    Superseded { owner: WriterOrigin },

    #[error("response already sent")]
    Closed,

    #[error("failed to encode response body: {0}")]
    Encode(#[from] serde_json::Error),
}

/// What the handler actually produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseRecord {
    /// First status written, 200 if the handler never set one.
    pub status: StatusCode,
    /// Total body bytes accepted.
    pub bytes_written: u64,
}

#[derive(Debug, Default)]
struct Buffered {
    status: Option<StatusCode>,
    headers: HeaderMap,
    body: Vec<u8>,
    bytes_written: u64,
    sealed: bool,
}

impl Buffered {
    fn discard(&mut self) {
        self.status = None;
        self.headers.clear();
        self.body.clear();
        self.bytes_written = 0;
    }
}

#[derive(Debug)]
struct Sink {
    owner: AtomicU8,
    buffered: Mutex<Buffered>,
}

/// Output sink handed to handlers.
///
/// Cloning yields another writer of the same origin over the same sink.
#[derive(Debug, Clone)]
pub struct ResponseWriter {
    sink: Arc<Sink>,
    origin: WriterOrigin,
}

impl Default for ResponseWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseWriter {
    /// Create a fresh sink with a handler-origin writer.
    pub fn new() -> Self {
        Self {
            sink: Arc::new(Sink {
                owner: AtomicU8::new(UNCLAIMED),
                buffered: Mutex::new(Buffered::default()),
            }),
            origin: WriterOrigin::Handler,
        }
    }

    /// A writer over the same sink for the timeout enforcer.
    pub(crate) fn enforcer(&self) -> Self {
        Self {
            sink: Arc::clone(&self.sink),
            origin: WriterOrigin::Enforcer,
        }
    }

    pub fn origin(&self) -> WriterOrigin {
        self.origin
    }

    /// The origin that claimed the response, if any did yet.
    pub fn owner(&self) -> Option<WriterOrigin> {
        WriterOrigin::from_u8(self.sink.owner.load(Ordering::Acquire))
    }

    /// Claim the latch for this writer's origin while the sink is locked.
    fn claim(&self, buffered: &mut Buffered) -> Result<(), WriteError> {
        let origin = self.origin as u8;
        match self
            .sink
            .owner
            .compare_exchange(UNCLAIMED, origin, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                if self.origin == WriterOrigin::Enforcer {
                    buffered.discard();
                }
                Ok(())
            }
            Err(current) if current == origin => Ok(()),
            Err(current) => Err(WriteError::Superseded {
                owner: WriterOrigin::from_u8(current).unwrap_or(self.origin),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Buffered> {
        self.sink
            .buffered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock the sink for writing.
    ///
    /// Handler writes are buffered without claiming; enforcer writes claim.
    fn open(&self) -> Result<MutexGuard<'_, Buffered>, WriteError> {
        let mut buffered = self.lock();
        if buffered.sealed {
            return Err(WriteError::Closed);
        }
        match self.origin {
            WriterOrigin::Enforcer => self.claim(&mut buffered)?,
            WriterOrigin::Handler => {
                if let Some(owner) = self.owner().filter(|o| *o != WriterOrigin::Handler) {
                    return Err(WriteError::Superseded { owner });
                }
            }
        }
        Ok(buffered)
    }

    /// Commit the buffered response on behalf of this writer's origin.
    ///
    /// Fails with [`WriteError::Superseded`] if the other origin committed first.
    pub fn commit(&self) -> Result<(), WriteError> {
        let mut buffered = self.lock();
        self.claim(&mut buffered)
    }

    /// Set the response status. Only the first call is recorded.
    pub fn write_header(&self, status: StatusCode) -> Result<(), WriteError> {
        let mut buffered = self.open()?;
        match buffered.status {
            Some(existing) => {
                tracing::debug!(
                    existing = existing.as_u16(),
                    ignored = status.as_u16(),
                    "Superfluous write_header call"
                );
            }
            None => buffered.status = Some(status),
        }
        Ok(())
    }

    /// Set a response header.
    pub fn insert_header(&self, name: HeaderName, value: HeaderValue) -> Result<(), WriteError> {
        let mut buffered = self.open()?;
        buffered.headers.insert(name, value);
        Ok(())
    }

    /// Append to the body. Implies status 200 if none was set.
    pub fn write(&self, data: impl AsRef<[u8]>) -> Result<usize, WriteError> {
        let data = data.as_ref();
        let mut buffered = self.open()?;
        buffered.status.get_or_insert(StatusCode::OK);
        buffered.body.extend_from_slice(data);
        buffered.bytes_written += data.len() as u64;
        Ok(data.len())
    }

    /// Write a complete JSON response.
    pub fn write_json<T: Serialize + ?Sized>(
        &self,
        status: StatusCode,
        value: &T,
    ) -> Result<(), WriteError> {
        let body = serde_json::to_vec(value)?;
        self.insert_header(CONTENT_TYPE, HeaderValue::from_static("application/json"))?;
        self.write_header(status)?;
        self.write(body)?;
        Ok(())
    }

    /// Write a complete plain-text response.
    pub fn write_text(&self, status: StatusCode, text: &str) -> Result<(), WriteError> {
        self.insert_header(
            CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        )?;
        self.write_header(status)?;
        self.write(text)?;
        Ok(())
    }

    /// Snapshot of the recorded status and byte count.
    pub fn record(&self) -> ResponseRecord {
        let buffered = self.lock();
        ResponseRecord {
            status: buffered.status.unwrap_or(StatusCode::OK),
            bytes_written: buffered.bytes_written,
        }
    }

    /// Copy of the body written so far.
    pub fn body_snapshot(&self) -> Vec<u8> {
        self.lock().body.clone()
    }

    /// Seal the sink and turn its contents into the transport response.
    pub fn finish(&self) -> Response {
        let mut buffered = self.lock();
        buffered.sealed = true;

        let mut response = Response::new(Body::from(std::mem::take(&mut buffered.body)));
        *response.status_mut() = buffered.status.unwrap_or(StatusCode::OK);
        *response.headers_mut() = std::mem::take(&mut buffered.headers);
        response
    }
}
