//! Fan service.
//!
//! The fan exposes several Percentage8 characteristics (passive, automatic,
//! kick-start and override power). Only the override is writeable by the
//! client, and the only thing that tells it apart is its User Description
//! descriptor.

use std::sync::Arc;

use tracing::{debug, warn};

use nevermore_types::scalar::PERCENTAGE_8;
use nevermore_types::uuids;
use nevermore_types::{FanPowerTacho, PhysicalValue, ServiceKind, ServiceSnapshot};

use super::{DiscoveryContext, activate, clamp_percent, prime, snapshot_slot};
use crate::characteristic::{Access, Characteristic, scalar_decoder, scalar_encoder};
use crate::error::{Error, Result};
use crate::transport::{CharacteristicHandle, ServiceHandle, bounded};

/// Whether a User Description names the power override characteristic.
///
/// The kick-start override shares the word "Override" and must not match.
pub fn is_power_override_label(text: &str) -> bool {
    text.contains("Override") && !text.contains("Kick-start")
}

/// Fan power, tachometer and the power override.
#[derive(Debug)]
pub struct Fan {
    /// Current power and tachometer, notified.
    pub aggregate: Option<Characteristic<FanPowerTacho>>,
    /// Power override in percent; `None` hands control back to the
    /// controller.
    pub power_override: Option<Characteristic<PhysicalValue>>,
}

impl Fan {
    pub(crate) async fn discover(ctx: &DiscoveryContext, service: &ServiceHandle) -> Self {
        let aggregate: Option<Characteristic<FanPowerTacho>> = ctx
            .characteristics(service, Some(uuids::FAN_POWER_TACHO_AGGREGATE))
            .await
            .into_iter()
            .next()
            .map(|handle| {
                ctx.wrap(
                    "aggregate",
                    handle,
                    Arc::new(FanPowerTacho::from_bytes),
                    Access::notify(),
                )
            });
        if let Some(aggregate) = &aggregate {
            activate(aggregate).await;
        }

        let mut power_override = None;
        for handle in ctx
            .characteristics(service, Some(uuids::PERCENTAGE_8))
            .await
        {
            if !describes_override(ctx, &handle).await {
                continue;
            }
            let characteristic = ctx.wrap(
                "power_override",
                handle,
                scalar_decoder(PERCENTAGE_8),
                Access::Writeable {
                    encode: scalar_encoder(PERCENTAGE_8),
                },
            );
            prime(&characteristic).await;
            power_override = Some(characteristic);
            break;
        }

        let fan = Self {
            aggregate,
            power_override,
        };
        debug!(missing = ?fan.missing(), "Fan discovered");
        fan
    }

    /// Slots the peripheral did not expose.
    pub fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.aggregate.is_none() {
            missing.push("aggregate");
        }
        if self.power_override.is_none() {
            missing.push("power_override");
        }
        missing
    }

    /// Latest power and tachometer reading.
    pub async fn latest(&self) -> Option<FanPowerTacho> {
        match &self.aggregate {
            Some(c) => c.value().await,
            None => None,
        }
    }

    /// Force the fan to `percent`, or release the override with `None`.
    ///
    /// The value is clamped to `[0, 100]`. After the write the aggregate is
    /// read back so callers see the new power without waiting for a
    /// notification; a failed read-back is logged and does not fail the
    /// command.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapabilityMissing`] if the override was not
    /// discovered, [`Error::InvalidValue`] for NaN, or the write error.
    pub async fn set_power_override(&self, percent: Option<f64>) -> Result<()> {
        let Some(power_override) = &self.power_override else {
            return Err(Error::capability_missing("fan power override"));
        };
        let value = percent.map(clamp_percent).transpose()?;
        power_override.write(value).await?;

        if let Some(aggregate) = &self.aggregate
            && let Err(e) = aggregate.read().await
        {
            warn!(error = %e, "Fan aggregate read-back failed");
        }
        Ok(())
    }

    pub(crate) async fn snapshot(&self) -> ServiceSnapshot {
        let mut snapshot = ServiceSnapshot::new(ServiceKind::Fan);
        snapshot_slot(&mut snapshot, "aggregate", &self.aggregate).await;
        snapshot_slot(&mut snapshot, "power_override", &self.power_override).await;
        snapshot
    }

    pub(crate) async fn teardown(&self) {
        if let Some(aggregate) = &self.aggregate {
            aggregate.teardown().await;
        }
    }
}

/// Read the User Description of `handle` and test it against
/// [`is_power_override_label`]. Characteristics whose descriptors cannot be
/// read are skipped.
async fn describes_override(ctx: &DiscoveryContext, handle: &CharacteristicHandle) -> bool {
    let descriptors = match bounded(
        "discover descriptors",
        ctx.timeouts.read,
        ctx.transport.descriptors(handle),
    )
    .await
    {
        Ok(descriptors) => descriptors,
        Err(e) => {
            debug!(index = handle.index, error = %e, "Skipping characteristic without descriptors");
            return false;
        }
    };

    for descriptor in descriptors
        .iter()
        .filter(|d| d.uuid == uuids::USER_DESCRIPTION)
    {
        match bounded(
            "read descriptor",
            ctx.timeouts.read,
            ctx.transport.read_descriptor(descriptor),
        )
        .await
        {
            Ok(bytes) => {
                let text = String::from_utf8_lossy(&bytes);
                if is_power_override_label(&text) {
                    debug!(index = handle.index, description = %text, "Found fan power override");
                    return true;
                }
            }
            Err(e) => {
                debug!(index = handle.index, error = %e, "Failed to read user description");
            }
        }
    }
    false
}
