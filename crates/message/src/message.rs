use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;

use crate::types::{
    DeadLetterReason, DeliveryMode, MessagePriority, MessageStatus, MessageType,
};
use crate::{now_ms, MessageId, INVALID_MESSAGE_ID};

#[derive(Debug, Clone, Default)]
pub struct MessageHeader {
    pub id: MessageId,
    pub message_type: MessageType,
    pub priority: MessagePriority,
    pub delivery: DeliveryMode,
    /// Enqueue timestamp in ms; the tiebreaker for equal-priority ordering.
    pub timestamp: u64,
    /// Absolute expiry in ms; 0 means the message never expires.
    pub expire_time: u64,
    pub retry_count: u32,
    pub max_retries: u32,
    pub next_retry_time: u64,
    pub dead_letter_reason: DeadLetterReason,
    /// Name of the queue a dead-lettered message originally lived in.
    pub original_queue: String,
    pub source_id: String,
    pub target_id: String,
    pub correlation_id: String,
    /// Out-of-band string headers. Keys `Compressed` and `Encrypted` are
    /// owned by the codec pipeline; `partition_key` steers shard routing.
    pub properties: HashMap<String, String>,
}

/// An externally owned byte region referenced without copying.
///
/// Cloning shares the region; the deallocator (when present) runs exactly
/// once, when the last clone drops.
#[derive(Clone)]
pub struct ExternalBuf {
    inner: Arc<ExternalInner>,
}

struct ExternalInner {
    ptr: *const u8,
    len: usize,
    dealloc: Option<Box<dyn FnOnce(*const u8, usize) + Send>>,
}

// Safety: the constructor contract requires the region to be valid for the
// buffer's lifetime and safe to read from any thread.
unsafe impl Send for ExternalInner {}
unsafe impl Sync for ExternalInner {}

impl Drop for ExternalInner {
    fn drop(&mut self) {
        if let Some(dealloc) = self.dealloc.take() {
            dealloc(self.ptr, self.len);
        }
    }
}

impl ExternalBuf {
    /// Wrap a raw region.
    ///
    /// # Safety
    /// `ptr` must stay valid and immutable for the lifetime of the buffer
    /// and every clone of it, and must be safe to read from any thread.
    /// `dealloc`, when provided, must be safe to call exactly once with
    /// `(ptr, len)`.
    pub unsafe fn from_raw(
        ptr: *const u8,
        len: usize,
        dealloc: Option<Box<dyn FnOnce(*const u8, usize) + Send>>,
    ) -> Self {
        ExternalBuf {
            inner: Arc::new(ExternalInner { ptr, len, dealloc }),
        }
    }

    /// Wrap a vector, taking ownership. The allocation is freed when the
    /// last clone drops; no user deallocator is involved.
    pub fn from_vec(data: Vec<u8>) -> Self {
        let boxed = data.into_boxed_slice();
        let len = boxed.len();
        let addr = Box::into_raw(boxed) as *mut u8 as usize;
        let dealloc: Box<dyn FnOnce(*const u8, usize) + Send> = Box::new(move |_, _| {
            // Safety: reconstructs the box leaked above, exactly once.
            unsafe {
                drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(
                    addr as *mut u8,
                    len,
                )));
            }
        });
        // Safety: the leaked box stays valid until the deallocator runs.
        unsafe { ExternalBuf::from_raw(addr as *const u8, len, Some(dealloc)) }
    }

    pub fn as_slice(&self) -> &[u8] {
        // Safety: upheld by the from_raw contract.
        unsafe { std::slice::from_raw_parts(self.inner.ptr, self.inner.len) }
    }

    pub fn len(&self) -> usize {
        self.inner.len
    }

    pub fn is_empty(&self) -> bool {
        self.inner.len == 0
    }
}

impl std::fmt::Debug for ExternalBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalBuf")
            .field("len", &self.inner.len)
            .field("owned", &self.inner.dealloc.is_some())
            .finish()
    }
}

/// Message payload: an owned buffer, or a zero-copy reference to external
/// memory.
#[derive(Debug, Clone)]
pub enum MessagePayload {
    Owned(Bytes),
    External(ExternalBuf),
}

impl Default for MessagePayload {
    fn default() -> Self {
        MessagePayload::Owned(Bytes::new())
    }
}

impl MessagePayload {
    pub fn as_slice(&self) -> &[u8] {
        match self {
            MessagePayload::Owned(bytes) => bytes,
            MessagePayload::External(buf) => buf.as_slice(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            MessagePayload::Owned(bytes) => bytes.len(),
            MessagePayload::External(buf) => buf.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy out as an owned `Bytes`. Cheap for the owned variant.
    pub fn to_bytes(&self) -> Bytes {
        match self {
            MessagePayload::Owned(bytes) => bytes.clone(),
            MessagePayload::External(buf) => Bytes::copy_from_slice(buf.as_slice()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Message {
    pub header: MessageHeader,
    pub payload: MessagePayload,
    pub status: MessageStatus,
    pub created_time: u64,
    pub last_modified_time: u64,
}

impl Message {
    pub fn new(message_type: MessageType, payload: impl Into<Bytes>) -> Self {
        let now = now_ms();
        Message {
            header: MessageHeader {
                id: INVALID_MESSAGE_ID,
                message_type,
                timestamp: now,
                max_retries: 3,
                ..Default::default()
            },
            payload: MessagePayload::Owned(payload.into()),
            status: MessageStatus::Pending,
            created_time: now,
            last_modified_time: now,
        }
    }

    pub fn text(body: impl Into<String>) -> Self {
        Message::new(MessageType::Text, body.into().into_bytes())
    }

    pub fn binary(data: impl Into<Bytes>) -> Self {
        Message::new(MessageType::Binary, data)
    }

    pub fn json(value: &serde_json::Value) -> Self {
        Message::new(MessageType::Json, value.to_string().into_bytes())
    }

    pub fn external(message_type: MessageType, buf: ExternalBuf) -> Self {
        let mut message = Message::new(message_type, Bytes::new());
        message.payload = MessagePayload::External(buf);
        message
    }

    pub fn with_priority(mut self, priority: MessagePriority) -> Self {
        self.header.priority = priority;
        self
    }

    pub fn with_delivery(mut self, delivery: DeliveryMode) -> Self {
        self.header.delivery = delivery;
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.header.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_expire_time(mut self, expire_time_ms: u64) -> Self {
        self.header.expire_time = expire_time_ms;
        self
    }

    pub fn is_expired(&self, now: u64) -> bool {
        self.header.expire_time != 0 && now > self.header.expire_time
    }

    pub fn can_retry(&self) -> bool {
        self.header.retry_count < self.header.max_retries
    }

    pub fn touch(&mut self) {
        self.last_modified_time = now_ms();
    }

    /// UTF-8 view of the payload, replacing invalid sequences.
    pub fn payload_string(&self) -> String {
        String::from_utf8_lossy(self.payload.as_slice()).into_owned()
    }
}
