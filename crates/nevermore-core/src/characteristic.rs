//! Characteristic wrappers.
//!
//! A [`Characteristic`] owns one [`CharacteristicHandle`] and keeps the last
//! value seen on it, when that value arrived, and the last error. What the
//! wrapper may do with its handle is fixed at construction by [`Access`]:
//!
//! - [`Access::ReadOnly`]: `read()`
//! - [`Access::Notify`]: `read()`, `subscribe()`, `unsubscribe()`, and
//!   `write()` when the characteristic also accepts writes
//! - [`Access::Writeable`]: `read()`, `write()`
//!
//! Using an operation the access does not grant fails with
//! [`Error::CapabilityMissing`]. Every failed operation is also recorded in
//! `last_error` and leaves the value untouched.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::StreamExt;
use time::OffsetDateTime;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use nevermore_types::{
    OperationError, ParseResult, PhysicalValue, ScalarFormat, SlotSnapshot, SlotValue,
};

use crate::error::{Error, Result};
use crate::transport::{CharacteristicHandle, SharedTransport, bounded};

/// Payload decoder bound at construction.
pub type Decoder<T> = Arc<dyn Fn(&[u8]) -> ParseResult<T> + Send + Sync>;

/// Payload encoder bound at construction.
pub type Encoder<T> = Arc<dyn Fn(&T) -> Vec<u8> + Send + Sync>;

/// Decoder for a single scalar quantity.
pub fn scalar_decoder(format: ScalarFormat) -> Decoder<PhysicalValue> {
    Arc::new(move |data: &[u8]| format.decode(data))
}

/// Encoder for a single scalar quantity.
pub fn scalar_encoder(format: ScalarFormat) -> Encoder<PhysicalValue> {
    Arc::new(move |value: &PhysicalValue| format.encode(*value))
}

/// What a characteristic wrapper may do with its handle.
pub enum Access<T> {
    /// Read only.
    ReadOnly,
    /// Read and subscribe, and write when `encode` is set.
    Notify {
        /// Encoder for characteristics that also accept writes.
        encode: Option<Encoder<T>>,
    },
    /// Read and write.
    Writeable {
        /// Value encoder.
        encode: Encoder<T>,
    },
}

impl<T> Access<T> {
    /// Notify access without writes.
    pub fn notify() -> Self {
        Access::Notify { encode: None }
    }

    fn encoder(&self) -> Option<&Encoder<T>> {
        match self {
            Access::ReadOnly => None,
            Access::Notify { encode } => encode.as_ref(),
            Access::Writeable { encode } => Some(encode),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Access::ReadOnly => "read-only",
            Access::Notify { .. } => "notify",
            Access::Writeable { .. } => "writeable",
        }
    }
}

/// Per-operation transport timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationTimeouts {
    /// Bound on reads, including descriptor reads.
    pub read: Duration,
    /// Bound on writes and notification (un)registration.
    pub write: Duration,
}

struct CharacteristicState<T> {
    value: Option<T>,
    last_update: Option<OffsetDateTime>,
    last_error: Option<OperationError>,
    subscribed: bool,
}

impl<T> Default for CharacteristicState<T> {
    fn default() -> Self {
        Self {
            value: None,
            last_update: None,
            last_error: None,
            subscribed: false,
        }
    }
}

impl<T> CharacteristicState<T> {
    fn set_value(&mut self, value: T) {
        self.value = Some(value);
        self.last_update = Some(OffsetDateTime::now_utc());
        self.last_error = None;
    }
}

/// Counts one in-flight operation until dropped, even if it is cancelled.
struct Busy<'a>(&'a AtomicUsize);

impl<'a> Busy<'a> {
    fn enter(count: &'a AtomicUsize) -> Self {
        count.fetch_add(1, Ordering::SeqCst);
        Self(count)
    }
}

impl Drop for Busy<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct BusyFlags {
    reading: AtomicUsize,
    writing: AtomicUsize,
    subscribing: AtomicUsize,
}

/// A discovered characteristic and its last known state.
pub struct Characteristic<T> {
    name: &'static str,
    handle: CharacteristicHandle,
    transport: SharedTransport,
    decode: Decoder<T>,
    access: Access<T>,
    timeouts: OperationTimeouts,
    state: Arc<RwLock<CharacteristicState<T>>>,
    busy: BusyFlags,
    notification_task: Mutex<Option<JoinHandle<()>>>,
}

impl<T> std::fmt::Debug for Characteristic<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Characteristic")
            .field("name", &self.name)
            .field("uuid", &self.handle.uuid)
            .field("access", &self.access.label())
            .finish_non_exhaustive()
    }
}

impl<T> Characteristic<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Wrap a discovered handle.
    pub fn new(
        name: &'static str,
        handle: CharacteristicHandle,
        transport: SharedTransport,
        timeouts: OperationTimeouts,
        decode: Decoder<T>,
        access: Access<T>,
    ) -> Self {
        Self {
            name,
            handle,
            transport,
            decode,
            access,
            timeouts,
            state: Arc::new(RwLock::new(CharacteristicState::default())),
            busy: BusyFlags::default(),
            notification_task: Mutex::new(None),
        }
    }

    /// Slot name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Characteristic UUID.
    pub fn uuid(&self) -> Uuid {
        self.handle.uuid
    }

    /// The owned transport handle.
    pub fn handle(&self) -> &CharacteristicHandle {
        &self.handle
    }

    /// Whether this characteristic supports notifications.
    pub fn can_notify(&self) -> bool {
        matches!(self.access, Access::Notify { .. })
    }

    /// Whether this characteristic accepts writes.
    pub fn can_write(&self) -> bool {
        self.access.encoder().is_some()
    }

    /// Last value read, written or notified.
    pub async fn value(&self) -> Option<T> {
        self.state.read().await.value.clone()
    }

    /// When the value last changed.
    pub async fn last_update(&self) -> Option<OffsetDateTime> {
        self.state.read().await.last_update
    }

    /// Last recorded error.
    pub async fn last_error(&self) -> Option<OperationError> {
        self.state.read().await.last_error.clone()
    }

    /// Whether a notification subscription is live.
    pub async fn is_subscribed(&self) -> bool {
        self.state.read().await.subscribed
    }

    /// Whether a read is in flight.
    pub fn is_reading(&self) -> bool {
        self.busy.reading.load(Ordering::SeqCst) > 0
    }

    /// Whether a write is in flight.
    pub fn is_writing(&self) -> bool {
        self.busy.writing.load(Ordering::SeqCst) > 0
    }

    /// Whether a subscribe or unsubscribe is in flight.
    pub fn is_subscribing(&self) -> bool {
        self.busy.subscribing.load(Ordering::SeqCst) > 0
    }

    async fn record_error(&self, err: Error) -> Error {
        warn!(slot = self.name, uuid = %self.handle.uuid, error = %err, "Characteristic operation failed");
        self.state.write().await.last_error = Some(err.to_operation_error());
        err
    }

    /// Record `err` without logging it again. A later successful read or
    /// notification clears it.
    pub(crate) async fn keep_error(&self, err: &Error) {
        self.state.write().await.last_error = Some(err.to_operation_error());
    }

    fn transport_error(&self, operation: &'static str, err: Error) -> Error {
        match err {
            Error::Bluetooth(e) => Error::operation_failed(operation, self.handle.uuid, e.to_string()),
            other => other,
        }
    }

    /// Read and decode the current value.
    ///
    /// On failure the cached value is left as it was.
    pub async fn read(&self) -> Result<T> {
        let _busy = Busy::enter(&self.busy.reading);
        let bytes = match bounded(
            "read",
            self.timeouts.read,
            self.transport.read(&self.handle),
        )
        .await
        {
            Ok(bytes) => bytes,
            Err(e) => return Err(self.record_error(self.transport_error("read", e)).await),
        };
        let value = match (self.decode)(&bytes) {
            Ok(value) => value,
            Err(e) => return Err(self.record_error(e.into()).await),
        };
        debug!(slot = self.name, len = bytes.len(), "Read characteristic");
        self.state.write().await.set_value(value.clone());
        Ok(value)
    }

    /// Encode and write `value`.
    ///
    /// On success the cached value becomes `value` itself; nothing is read
    /// back from the peripheral.
    pub async fn write(&self, value: T) -> Result<()> {
        let Some(encode) = self.access.encoder() else {
            return Err(Error::capability_missing(format!(
                "{} is {} and does not accept writes",
                self.name,
                self.access.label()
            )));
        };
        let _busy = Busy::enter(&self.busy.writing);
        let bytes = encode(&value);
        if let Err(e) = bounded(
            "write",
            self.timeouts.write,
            self.transport.write(&self.handle, &bytes),
        )
        .await
        {
            return Err(self.record_error(self.transport_error("write", e)).await);
        }
        debug!(slot = self.name, len = bytes.len(), "Wrote characteristic");
        self.state.write().await.set_value(value);
        Ok(())
    }

    /// Start receiving notifications. Subscribing twice is a no-op.
    ///
    /// Each notification decodes its payload and replaces the cached value.
    pub async fn subscribe(&self) -> Result<()> {
        if !self.can_notify() {
            return Err(Error::capability_missing(format!(
                "{} is {} and cannot notify",
                self.name,
                self.access.label()
            )));
        }
        let _busy = Busy::enter(&self.busy.subscribing);
        let mut task = self.notification_task.lock().await;
        if task.is_some() {
            return Ok(());
        }

        let mut stream = match bounded(
            "subscribe",
            self.timeouts.write,
            self.transport.start_notifications(&self.handle),
        )
        .await
        {
            Ok(stream) => stream,
            Err(e) => return Err(self.record_error(self.transport_error("subscribe", e)).await),
        };

        let state = Arc::clone(&self.state);
        let decode = Arc::clone(&self.decode);
        let name = self.name;
        *task = Some(tokio::spawn(async move {
            while let Some(bytes) = stream.next().await {
                match decode(&bytes) {
                    Ok(value) => state.write().await.set_value(value),
                    Err(e) => {
                        warn!(slot = name, error = %e, "Dropping malformed notification");
                        state.write().await.last_error = Some(Error::from(e).to_operation_error());
                    }
                }
            }
            debug!(slot = name, "Notification stream ended");
        }));
        self.state.write().await.subscribed = true;
        debug!(slot = self.name, "Subscribed to notifications");
        Ok(())
    }

    /// Stop receiving notifications. Unsubscribing while unsubscribed is a
    /// no-op success.
    ///
    /// The listener is detached before notifications are disabled, so no
    /// value arrives after this returns even if disabling fails.
    pub async fn unsubscribe(&self) -> Result<()> {
        let _busy = Busy::enter(&self.busy.subscribing);
        let Some(task) = self.notification_task.lock().await.take() else {
            return Ok(());
        };
        task.abort();
        self.state.write().await.subscribed = false;

        if let Err(e) = bounded(
            "unsubscribe",
            self.timeouts.write,
            self.transport.stop_notifications(&self.handle),
        )
        .await
        {
            return Err(self.record_error(self.transport_error("unsubscribe", e)).await);
        }
        debug!(slot = self.name, "Unsubscribed from notifications");
        Ok(())
    }

    /// Tear down any live subscription before the wrapper is dropped.
    pub async fn teardown(&self) {
        if let Err(e) = self.unsubscribe().await {
            warn!(slot = self.name, error = %e, "Failed to stop notifications during teardown");
        }
    }
}

impl<T> Characteristic<T>
where
    T: Clone + Send + Sync + Into<SlotValue> + 'static,
{
    /// Point-in-time view of this characteristic.
    pub async fn snapshot(&self) -> SlotSnapshot {
        let state = self.state.read().await;
        SlotSnapshot {
            value: state.value.clone().map(Into::into),
            last_update: state.last_update,
            error: state.last_error.clone(),
            subscribed: state.subscribed,
        }
    }
}

impl<T> Drop for Characteristic<T> {
    fn drop(&mut self) {
        if let Some(task) = self.notification_task.get_mut().take() {
            warn!(
                slot = self.name,
                "Characteristic dropped while subscribed; aborting listener"
            );
            task.abort();
        }
    }
}
