//! Servo (vent flap) service.

use std::sync::Arc;

use tracing::{debug, warn};

use nevermore_types::scalar::PERCENTAGE_16;
use nevermore_types::uuids;
use nevermore_types::{PhysicalValue, ServiceKind, ServiceSnapshot, ServoRange};

use super::{DiscoveryContext, activate, clamp_percent, prime, snapshot_slot};
use crate::characteristic::{Access, Characteristic, Encoder, scalar_decoder, scalar_encoder};
use crate::error::{Error, Result};
use crate::transport::ServiceHandle;

/// Servo position and its PWM range.
#[derive(Debug)]
pub struct Servo {
    /// Position in percent of the range; notified and writeable.
    pub position: Option<Characteristic<PhysicalValue>>,
    /// PWM range the position maps onto.
    pub range: Option<Characteristic<ServoRange>>,
}

impl Servo {
    pub(crate) async fn discover(ctx: &DiscoveryContext, service: &ServiceHandle) -> Self {
        let position: Option<Characteristic<PhysicalValue>> = ctx
            .characteristics(service, Some(uuids::SERVO_POSITION))
            .await
            .into_iter()
            .next()
            .map(|handle| {
                ctx.wrap(
                    "position",
                    handle,
                    scalar_decoder(PERCENTAGE_16),
                    Access::Notify {
                        encode: Some(scalar_encoder(PERCENTAGE_16)),
                    },
                )
            });
        if let Some(position) = &position {
            activate(position).await;
        }

        let encode: Encoder<ServoRange> = Arc::new(|range: &ServoRange| range.to_bytes());
        let range: Option<Characteristic<ServoRange>> = ctx
            .characteristics(service, Some(uuids::SERVO_RANGE))
            .await
            .into_iter()
            .next()
            .map(|handle| {
                ctx.wrap(
                    "range",
                    handle,
                    Arc::new(ServoRange::from_bytes),
                    Access::Writeable { encode },
                )
            });
        if let Some(range) = &range {
            prime(range).await;
        }

        let servo = Self { position, range };
        debug!(missing = ?servo.missing(), "Servo discovered");
        servo
    }

    /// Slots the peripheral did not expose.
    pub fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.position.is_none() {
            missing.push("position");
        }
        if self.range.is_none() {
            missing.push("range");
        }
        missing
    }

    /// Move the servo to `percent` of its range, clamped to `[0, 100]`.
    ///
    /// The position is read back after the write; a failed read-back is
    /// logged only.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapabilityMissing`] if the position characteristic
    /// was not discovered, [`Error::InvalidValue`] for NaN, or the write
    /// error.
    pub async fn set_position(&self, percent: f64) -> Result<()> {
        let Some(position) = &self.position else {
            return Err(Error::capability_missing("servo position"));
        };
        let percent = clamp_percent(percent)?;
        position.write(Some(percent)).await?;
        if let Err(e) = position.read().await {
            warn!(error = %e, "Servo position read-back failed");
        }
        Ok(())
    }

    /// Set the PWM range. Both ends are clamped to `[0, 100]`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapabilityMissing`] if the range characteristic was
    /// not discovered, [`Error::InvalidValue`] for NaN, or the write error.
    pub async fn set_range(&self, start: f64, end: f64) -> Result<()> {
        let Some(range) = &self.range else {
            return Err(Error::capability_missing("servo range"));
        };
        let value = ServoRange {
            start: Some(clamp_percent(start)?),
            end: Some(clamp_percent(end)?),
        };
        range.write(value).await
    }

    pub(crate) async fn snapshot(&self) -> ServiceSnapshot {
        let mut snapshot = ServiceSnapshot::new(ServiceKind::Servo);
        snapshot_slot(&mut snapshot, "position", &self.position).await;
        snapshot_slot(&mut snapshot, "range", &self.range).await;
        snapshot
    }

    pub(crate) async fn teardown(&self) {
        if let Some(position) = &self.position {
            position.teardown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::characteristic::OperationTimeouts;
    use crate::mock::{MockCharacteristic, MockPeripheral, MockTransport};
    use crate::transport::{DeviceHandle, GattTransport, SharedTransport};

    const ID: &str = "servo-1";

    async fn discover(peripheral: MockPeripheral) -> (Arc<MockTransport>, Servo) {
        let mock = Arc::new(MockTransport::new().with_device(peripheral));
        let transport: SharedTransport = mock.clone();
        let server = transport
            .connect(&DeviceHandle {
                id: ID.into(),
                name: None,
            })
            .await
            .unwrap();
        let handle = transport
            .primary_service(&server, uuids::SERVO_SERVICE)
            .await
            .unwrap()
            .unwrap();
        let ctx = DiscoveryContext {
            transport,
            timeouts: OperationTimeouts {
                read: Duration::from_secs(1),
                write: Duration::from_secs(1),
            },
        };
        let servo = Servo::discover(&ctx, &handle).await;
        (mock, servo)
    }

    #[tokio::test]
    async fn test_discovery() {
        let (mock, servo) = discover(MockPeripheral::nevermore(ID)).await;
        assert!(servo.missing().is_empty());
        assert_eq!(mock.active_notifications(ID), 1);

        let position = servo.position.as_ref().unwrap();
        assert!(position.can_notify());
        assert!(position.can_write());
        assert_eq!(position.value().await, Some(Some(50.0)));
        assert_eq!(
            servo.range.as_ref().unwrap().value().await,
            Some(ServoRange {
                start: Some(0.0),
                end: Some(100.0),
            })
        );
    }

    #[tokio::test]
    async fn test_set_position_clamps() {
        let (mock, servo) = discover(MockPeripheral::nevermore(ID)).await;

        servo.set_position(120.0).await.unwrap();
        assert_eq!(
            mock.writes(ID),
            vec![(uuids::SERVO_POSITION, vec![0x10, 0x27])]
        );
        assert_eq!(
            servo.position.as_ref().unwrap().value().await,
            Some(Some(100.0))
        );

        servo.set_position(-5.0).await.unwrap();
        assert_eq!(mock.writes(ID)[1], (uuids::SERVO_POSITION, vec![0, 0]));
    }

    #[tokio::test]
    async fn test_set_position_notifies_subscribers() {
        let (mock, servo) = discover(MockPeripheral::nevermore(ID)).await;
        mock.notify(ID, uuids::SERVO_POSITION, 2500u16.to_le_bytes().to_vec());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(
            servo.position.as_ref().unwrap().value().await,
            Some(Some(25.0))
        );
    }

    #[tokio::test]
    async fn test_set_range() {
        let (mock, servo) = discover(MockPeripheral::nevermore(ID)).await;
        servo.set_range(10.0, 250.0).await.unwrap();

        let mut expected = 1000u16.to_le_bytes().to_vec();
        expected.extend_from_slice(&10_000u16.to_le_bytes());
        assert_eq!(mock.writes(ID), vec![(uuids::SERVO_RANGE, expected)]);
        assert!(matches!(
            servo.set_range(f64::NAN, 50.0).await,
            Err(Error::InvalidValue(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_range() {
        let peripheral = MockPeripheral::new(ID, "Nevermore").service(
            uuids::SERVO_SERVICE,
            vec![MockCharacteristic::new(uuids::SERVO_POSITION, vec![0, 0]).notify()],
        );
        let (_, servo) = discover(peripheral).await;
        assert_eq!(servo.missing(), vec!["range"]);
        assert!(matches!(
            servo.set_range(0.0, 100.0).await,
            Err(Error::CapabilityMissing { .. })
        ));
        servo.set_position(30.0).await.unwrap();
    }

    #[tokio::test]
    async fn test_teardown() {
        let (mock, servo) = discover(MockPeripheral::nevermore(ID)).await;
        servo.teardown().await;
        assert_eq!(mock.active_notifications(ID), 0);
        assert!(!servo.position.as_ref().unwrap().is_subscribed().await);
    }
}
