//! GATT services exposed by a Nevermore controller.
//!
//! Each typed service discovers its own characteristics from a
//! [`ServiceHandle`]. Discovery never fails as a whole: a slot whose
//! characteristic is absent, or whose setup errors, is left `None` and the
//! remaining slots are still filled.

mod environmental;
mod fan;
mod servo;

pub use environmental::EnvironmentalSensing;
pub use fan::{Fan, is_power_override_label};
pub use servo::Servo;

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;
use uuid::Uuid;

use nevermore_types::{ServiceKind, ServiceSnapshot, SlotValue};

use crate::characteristic::{Access, Characteristic, Decoder, OperationTimeouts};
use crate::error::{Error, Result};
use crate::transport::{CharacteristicHandle, ServiceHandle, SharedTransport, bounded};

/// Everything a service needs to build its characteristics.
#[derive(Clone)]
pub struct DiscoveryContext {
    /// Transport the characteristics talk through.
    pub transport: SharedTransport,
    /// Timeouts bound to every characteristic.
    pub timeouts: OperationTimeouts,
}

impl DiscoveryContext {
    fn wrap<T>(
        &self,
        name: &'static str,
        handle: CharacteristicHandle,
        decode: Decoder<T>,
        access: Access<T>,
    ) -> Characteristic<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        Characteristic::new(
            name,
            handle,
            self.transport.clone(),
            self.timeouts,
            decode,
            access,
        )
    }

    /// Characteristics of `service`, optionally filtered by UUID. A failed
    /// enumeration is logged and treated as empty.
    async fn characteristics(
        &self,
        service: &ServiceHandle,
        uuid: Option<Uuid>,
    ) -> Vec<CharacteristicHandle> {
        match bounded(
            "discover characteristics",
            self.timeouts.read,
            self.transport.characteristics(service, uuid),
        )
        .await
        {
            Ok(handles) => handles,
            Err(e) => {
                warn!(service = %service.uuid, error = %e, "Failed to enumerate characteristics");
                Vec::new()
            }
        }
    }
}

/// Group handles by UUID, keeping discovery order within each group.
fn bucket_by_uuid(handles: Vec<CharacteristicHandle>) -> HashMap<Uuid, Vec<CharacteristicHandle>> {
    let mut buckets: HashMap<Uuid, Vec<CharacteristicHandle>> = HashMap::new();
    for handle in handles {
        buckets.entry(handle.uuid).or_default().push(handle);
    }
    buckets
}

/// Subscribe and then read once, logging failures.
///
/// A subscription alone does not guarantee an immediate notification.
async fn activate<T>(characteristic: &Characteristic<T>)
where
    T: Clone + Send + Sync + 'static,
{
    let subscribed = characteristic.subscribe().await;
    prime(characteristic).await;
    // The read clears errors, but the subscription is still down.
    if let Err(e) = subscribed {
        warn!(slot = characteristic.name(), error = %e, "Subscribe during discovery failed");
        characteristic.keep_error(&e).await;
    }
}

/// Read once, logging failure.
async fn prime<T>(characteristic: &Characteristic<T>)
where
    T: Clone + Send + Sync + 'static,
{
    if let Err(e) = characteristic.read().await {
        warn!(slot = characteristic.name(), error = %e, "Initial read failed");
    }
}

/// Record one slot in a service snapshot.
async fn snapshot_slot<T>(
    snapshot: &mut ServiceSnapshot,
    name: &'static str,
    slot: &Option<Characteristic<T>>,
) where
    T: Clone + Send + Sync + Into<SlotValue> + 'static,
{
    let value = match slot {
        Some(c) => Some(c.snapshot().await),
        None => None,
    };
    snapshot.slots.insert(name.to_string(), value);
}

/// Validate and clamp a percentage command input to `[0, 100]`.
///
/// # Errors
///
/// Returns [`Error::InvalidValue`] for NaN.
pub fn clamp_percent(value: f64) -> Result<f64> {
    if value.is_nan() {
        return Err(Error::InvalidValue("percentage is NaN".to_string()));
    }
    Ok(value.clamp(0.0, 100.0))
}

/// A discovered primary service.
///
/// Cloning shares the same characteristics.
#[derive(Debug, Clone)]
pub enum Service {
    /// Environmental Sensing.
    Environmental(Arc<EnvironmentalSensing>),
    /// Fan.
    Fan(Arc<Fan>),
    /// Servo.
    Servo(Arc<Servo>),
    /// A service that is recorded as present but not decoded.
    Present(ServiceKind),
}

impl Service {
    /// Run discovery for `kind` on a found service.
    pub async fn discover(kind: ServiceKind, ctx: &DiscoveryContext, handle: &ServiceHandle) -> Self {
        match kind {
            ServiceKind::EnvironmentalSensing => {
                Service::Environmental(Arc::new(EnvironmentalSensing::discover(ctx, handle).await))
            }
            ServiceKind::Fan => Service::Fan(Arc::new(Fan::discover(ctx, handle).await)),
            ServiceKind::Servo => Service::Servo(Arc::new(Servo::discover(ctx, handle).await)),
            other => Service::Present(other),
        }
    }

    /// Which service this is.
    pub fn kind(&self) -> ServiceKind {
        match self {
            Service::Environmental(_) => ServiceKind::EnvironmentalSensing,
            Service::Fan(_) => ServiceKind::Fan,
            Service::Servo(_) => ServiceKind::Servo,
            Service::Present(kind) => *kind,
        }
    }

    /// Slots the peripheral did not expose.
    pub fn missing(&self) -> Vec<&'static str> {
        match self {
            Service::Environmental(s) => s.missing(),
            Service::Fan(s) => s.missing(),
            Service::Servo(s) => s.missing(),
            Service::Present(_) => Vec::new(),
        }
    }

    /// Point-in-time view of every slot.
    pub async fn snapshot(&self) -> ServiceSnapshot {
        match self {
            Service::Environmental(s) => s.snapshot().await,
            Service::Fan(s) => s.snapshot().await,
            Service::Servo(s) => s.snapshot().await,
            Service::Present(kind) => ServiceSnapshot::new(*kind),
        }
    }

    /// Stop every live subscription.
    pub async fn teardown(&self) {
        match self {
            Service::Environmental(s) => s.teardown().await,
            Service::Fan(s) => s.teardown().await,
            Service::Servo(s) => s.teardown().await,
            Service::Present(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_percent() {
        assert_eq!(clamp_percent(120.0).unwrap(), 100.0);
        assert_eq!(clamp_percent(-5.0).unwrap(), 0.0);
        assert_eq!(clamp_percent(42.5).unwrap(), 42.5);
        assert_eq!(clamp_percent(f64::INFINITY).unwrap(), 100.0);
        assert!(matches!(clamp_percent(f64::NAN), Err(Error::InvalidValue(_))));
    }

    #[test]
    fn test_bucket_preserves_order() {
        let handle = |uuid, index| CharacteristicHandle {
            device_id: "d".into(),
            service: Uuid::nil(),
            uuid,
            index,
        };
        let a = Uuid::from_u128(1);
        let b = Uuid::from_u128(2);
        let buckets = bucket_by_uuid(vec![handle(a, 0), handle(b, 1), handle(a, 2), handle(a, 3)]);
        let indices: Vec<_> = buckets[&a].iter().map(|h| h.index).collect();
        assert_eq!(indices, vec![0, 2, 3]);
        assert_eq!(buckets[&b].len(), 1);
    }
}
