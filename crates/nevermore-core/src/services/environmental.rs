//! Environmental Sensing service.

use std::sync::Arc;

use tracing::debug;

use nevermore_types::scalar::{HUMIDITY, PRESSURE, ScalarFormat, TEMPERATURE, VOC_INDEX, VOC_RAW};
use nevermore_types::uuids;
use nevermore_types::{EnvironmentalData, PhysicalValue, ServiceKind, ServiceSnapshot};

use super::{DiscoveryContext, activate, bucket_by_uuid, snapshot_slot};
use crate::characteristic::{Access, Characteristic, scalar_decoder};
use crate::transport::{CharacteristicHandle, ServiceHandle};

type Scalar = Option<Characteristic<PhysicalValue>>;

/// Intake, exhaust and MCU sensors plus the aggregate that carries them all.
///
/// The controller exposes several characteristics per standard UUID; they
/// are told apart only by discovery order (intake, exhaust, then MCU).
#[derive(Debug)]
pub struct EnvironmentalSensing {
    /// Intake air temperature.
    pub temperature_intake: Scalar,
    /// Exhaust air temperature.
    pub temperature_exhaust: Scalar,
    /// Controller MCU temperature.
    pub temperature_mcu: Scalar,
    /// Intake relative humidity.
    pub humidity_intake: Scalar,
    /// Exhaust relative humidity.
    pub humidity_exhaust: Scalar,
    /// Intake pressure.
    pub pressure_intake: Scalar,
    /// Exhaust pressure.
    pub pressure_exhaust: Scalar,
    /// Intake VOC index.
    pub voc_index_intake: Scalar,
    /// Exhaust VOC index.
    pub voc_index_exhaust: Scalar,
    /// Intake raw VOC.
    pub voc_raw_intake: Scalar,
    /// Exhaust raw VOC.
    pub voc_raw_exhaust: Scalar,
    /// All of the above in one notification.
    pub aggregate: Option<Characteristic<EnvironmentalData>>,
}

impl EnvironmentalSensing {
    pub(crate) async fn discover(ctx: &DiscoveryContext, service: &ServiceHandle) -> Self {
        let mut buckets = bucket_by_uuid(ctx.characteristics(service, None).await);
        let mut group = |uuid| buckets.remove(&uuid).unwrap_or_default().into_iter();

        let mut temperature = group(uuids::TEMPERATURE);
        let mut humidity = group(uuids::HUMIDITY);
        let mut pressure = group(uuids::PRESSURE);
        let mut voc_index = group(uuids::VOC_INDEX);
        let mut voc_raw = group(uuids::VOC_RAW);
        let aggregate: Option<Characteristic<EnvironmentalData>> =
            group(uuids::ENV_AGGREGATE).next().map(|handle| {
                ctx.wrap(
                    "aggregate",
                    handle,
                    Arc::new(EnvironmentalData::from_bytes),
                    Access::notify(),
                )
            });
        if let Some(aggregate) = &aggregate {
            activate(aggregate).await;
        }

        let sensor = |name, format: ScalarFormat, handle: Option<CharacteristicHandle>| {
            handle.map(|h| ctx.wrap(name, h, scalar_decoder(format), Access::ReadOnly))
        };

        let service = Self {
            temperature_intake: sensor("temperature_intake", TEMPERATURE, temperature.next()),
            temperature_exhaust: sensor("temperature_exhaust", TEMPERATURE, temperature.next()),
            temperature_mcu: sensor("temperature_mcu", TEMPERATURE, temperature.next()),
            humidity_intake: sensor("humidity_intake", HUMIDITY, humidity.next()),
            humidity_exhaust: sensor("humidity_exhaust", HUMIDITY, humidity.next()),
            pressure_intake: sensor("pressure_intake", PRESSURE, pressure.next()),
            pressure_exhaust: sensor("pressure_exhaust", PRESSURE, pressure.next()),
            voc_index_intake: sensor("voc_index_intake", VOC_INDEX, voc_index.next()),
            voc_index_exhaust: sensor("voc_index_exhaust", VOC_INDEX, voc_index.next()),
            voc_raw_intake: sensor("voc_raw_intake", VOC_RAW, voc_raw.next()),
            voc_raw_exhaust: sensor("voc_raw_exhaust", VOC_RAW, voc_raw.next()),
            aggregate,
        };
        debug!(missing = ?service.missing(), "Environmental sensing discovered");
        service
    }

    fn scalars(&self) -> [(&'static str, &Scalar); 11] {
        [
            ("temperature_intake", &self.temperature_intake),
            ("temperature_exhaust", &self.temperature_exhaust),
            ("temperature_mcu", &self.temperature_mcu),
            ("humidity_intake", &self.humidity_intake),
            ("humidity_exhaust", &self.humidity_exhaust),
            ("pressure_intake", &self.pressure_intake),
            ("pressure_exhaust", &self.pressure_exhaust),
            ("voc_index_intake", &self.voc_index_intake),
            ("voc_index_exhaust", &self.voc_index_exhaust),
            ("voc_raw_intake", &self.voc_raw_intake),
            ("voc_raw_exhaust", &self.voc_raw_exhaust),
        ]
    }

    /// Slots the peripheral did not expose.
    pub fn missing(&self) -> Vec<&'static str> {
        let mut missing: Vec<_> = self
            .scalars()
            .into_iter()
            .filter(|(_, slot)| slot.is_none())
            .map(|(name, _)| name)
            .collect();
        if self.aggregate.is_none() {
            missing.push("aggregate");
        }
        missing
    }

    /// Read every individual sensor once.
    ///
    /// Failures are recorded on each characteristic and do not stop the
    /// remaining reads.
    pub async fn refresh(&self) {
        for (_, slot) in self.scalars() {
            if let Some(c) = slot {
                let _ = c.read().await;
            }
        }
    }

    /// Latest aggregate reading, if one has arrived.
    pub async fn latest(&self) -> Option<EnvironmentalData> {
        match &self.aggregate {
            Some(c) => c.value().await,
            None => None,
        }
    }

    pub(crate) async fn snapshot(&self) -> ServiceSnapshot {
        let mut snapshot = ServiceSnapshot::new(ServiceKind::EnvironmentalSensing);
        for (name, slot) in self.scalars() {
            snapshot_slot(&mut snapshot, name, slot).await;
        }
        snapshot_slot(&mut snapshot, "aggregate", &self.aggregate).await;
        snapshot
    }

    pub(crate) async fn teardown(&self) {
        if let Some(aggregate) = &self.aggregate {
            aggregate.teardown().await;
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

    const ID: &str = "env-1";

    async fn discover(peripheral: MockPeripheral) -> (Arc<MockTransport>, EnvironmentalSensing) {
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
            .primary_service(&server, uuids::ENVIRONMENTAL_SENSING_SERVICE)
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
        let service = EnvironmentalSensing::discover(&ctx, &handle).await;
        (mock, service)
    }

    #[tokio::test]
    async fn test_full_discovery() {
        let (mock, env) = discover(MockPeripheral::nevermore(ID)).await;
        assert!(env.missing().is_empty());
        assert_eq!(mock.active_notifications(ID), 1);

        let latest = env.latest().await.unwrap();
        assert_eq!(latest.temperature_intake, Some(21.5));
        assert_eq!(latest.pressure_intake, Some(101_325.0));
        assert!(env.aggregate.as_ref().unwrap().is_subscribed().await);
    }

    #[tokio::test]
    async fn test_slots_assigned_in_discovery_order() {
        let (_, env) = discover(MockPeripheral::nevermore(ID)).await;
        env.refresh().await;

        assert_eq!(
            env.temperature_intake.as_ref().unwrap().name(),
            "temperature_intake"
        );
        assert_eq!(
            env.temperature_intake.as_ref().unwrap().value().await,
            Some(Some(21.5))
        );
        assert_eq!(
            env.temperature_exhaust.as_ref().unwrap().value().await,
            Some(Some(28.75))
        );
        assert_eq!(
            env.temperature_mcu.as_ref().unwrap().value().await,
            Some(Some(45.0))
        );
        assert_eq!(
            env.voc_raw_exhaust.as_ref().unwrap().value().await,
            Some(Some(29_500.0))
        );
    }

    #[tokio::test]
    async fn test_missing_slots_are_absent_not_errors() {
        let peripheral = MockPeripheral::new(ID, "Nevermore").service(
            uuids::ENVIRONMENTAL_SENSING_SERVICE,
            vec![
                MockCharacteristic::new(uuids::TEMPERATURE, 2000i16.to_le_bytes().to_vec()),
                MockCharacteristic::new(uuids::HUMIDITY, 5000u16.to_le_bytes().to_vec()),
            ],
        );
        let (_, env) = discover(peripheral).await;

        assert!(env.temperature_intake.is_some());
        assert!(env.temperature_exhaust.is_none());
        assert!(env.temperature_mcu.is_none());
        assert!(env.humidity_intake.is_some());
        assert!(env.aggregate.is_none());
        assert!(env.latest().await.is_none());

        let missing = env.missing();
        assert_eq!(missing.len(), 10);
        assert!(missing.contains(&"temperature_exhaust"));
        assert!(missing.contains(&"aggregate"));
    }

    #[tokio::test]
    async fn test_aggregate_notification_updates_snapshot() {
        let (mock, env) = discover(MockPeripheral::nevermore(ID)).await;
        let update = EnvironmentalData {
            temperature_intake: Some(30.0),
            ..env.latest().await.unwrap()
        };
        mock.notify(ID, uuids::ENV_AGGREGATE, update.to_bytes());
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(env.latest().await.unwrap().temperature_intake, Some(30.0));
        let snapshot = env.snapshot().await;
        assert_eq!(snapshot.slots.len(), 12);
        assert!(snapshot.slot("aggregate").unwrap().subscribed);
    }

    #[tokio::test]
    async fn test_teardown_releases_subscription() {
        let (mock, env) = discover(MockPeripheral::nevermore(ID)).await;
        env.teardown().await;
        assert_eq!(mock.active_notifications(ID), 0);
    }
}
