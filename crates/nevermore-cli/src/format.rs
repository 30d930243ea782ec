//! Output formatting utilities for text and JSON output.

use std::fmt::Write as _;

use anyhow::Result;
use nevermore_types::{
    DeviceSnapshot, EnvironmentalData, PhysicalValue, ServiceKind, SlotSnapshot, SlotValue,
};

/// Unit suffix for a slot, derived from its name.
fn unit_for(slot: &str) -> &'static str {
    if slot.starts_with("temperature") {
        " °C"
    } else if slot.starts_with("humidity") || slot == "position" || slot.starts_with("power") {
        " %"
    } else if slot.starts_with("pressure") {
        " Pa"
    } else {
        ""
    }
}

/// Format a physical value, `n/a` when unknown.
pub fn format_value(value: PhysicalValue, unit: &str) -> String {
    match value {
        Some(v) => format!("{:.2}{}", v, unit),
        None => "n/a".to_string(),
    }
}

fn format_environmental(data: &EnvironmentalData) -> String {
    format!(
        "intake {} / {}, exhaust {} / {}, VOC {} -> {}",
        format_value(data.temperature_intake, " °C"),
        format_value(data.humidity_intake, " %"),
        format_value(data.temperature_exhaust, " °C"),
        format_value(data.humidity_exhaust, " %"),
        format_value(data.voc_index_intake, ""),
        format_value(data.voc_index_exhaust, ""),
    )
}

/// Format one slot value for display.
pub fn format_slot_value(slot: &str, value: &SlotValue) -> String {
    match value {
        SlotValue::Scalar(None) if slot == "power_override" => "off".to_string(),
        SlotValue::Scalar(v) => format_value(*v, unit_for(slot)),
        SlotValue::Environmental(data) => format_environmental(data),
        SlotValue::FanPowerTacho(fan) => format!(
            "{} at {} RPM",
            format_value(fan.power, " %"),
            format_value(fan.tachometer, "")
        ),
        SlotValue::FanAggregate(fan) => format!(
            "{} at {} RPM (override {}, passive {}, automatic {})",
            format_value(fan.power, " %"),
            format_value(fan.tachometer, ""),
            format_value(fan.power_override, " %"),
            format_value(fan.power_passive, " %"),
            format_value(fan.power_automatic, " %"),
        ),
        SlotValue::ThermalLimit(limit) => format!(
            "{} to {}",
            format_value(limit.lower, " °C"),
            format_value(limit.upper, " °C")
        ),
        SlotValue::ServoRange(range) => format!(
            "{} to {}",
            format_value(range.start, " %"),
            format_value(range.end, " %")
        ),
    }
}

fn format_slot(slot: &str, snapshot: Option<&SlotSnapshot>) -> String {
    let Some(snapshot) = snapshot else {
        return "(not exposed)".to_string();
    };
    let mut out = match &snapshot.value {
        Some(value) => format_slot_value(slot, value),
        None => "(no value)".to_string(),
    };
    if snapshot.subscribed {
        out.push_str(" [live]");
    }
    if let Some(error) = &snapshot.error {
        let _ = write!(out, " (error: {})", error);
    }
    out
}

/// Format a device snapshot as indented text.
pub fn format_snapshot_text(snapshot: &DeviceSnapshot) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} ({}) - {}",
        snapshot.name.as_deref().unwrap_or("Unknown"),
        snapshot.id,
        snapshot.state
    );
    if let Some(error) = &snapshot.error {
        let _ = writeln!(out, "  Last error: {}", error);
    }
    if snapshot.services.is_empty() {
        let _ = writeln!(out, "  No services discovered");
    }
    for (kind, service) in &snapshot.services {
        if service.slots.is_empty() {
            let _ = writeln!(out, "  {:<24} (present)", kind.to_string());
            continue;
        }
        let _ = writeln!(out, "  {}", kind);
        for (name, slot) in &service.slots {
            let _ = writeln!(out, "    {:<22} {}", name, format_slot(name, slot.as_ref()));
        }
    }
    out
}

/// Format a device snapshot as JSON.
pub fn format_snapshot_json(snapshot: &DeviceSnapshot) -> Result<String> {
    Ok(serde_json::to_string_pretty(snapshot)? + "\n")
}

fn live_value<'a>(snapshot: &'a DeviceSnapshot, kind: ServiceKind, slot: &str) -> Option<&'a SlotValue> {
    snapshot
        .service(kind)
        .and_then(|service| service.slot(slot))
        .and_then(|slot| slot.value.as_ref())
}

/// One-line summary for watch mode.
pub fn format_watch_line(snapshot: &DeviceSnapshot) -> String {
    let mut parts = Vec::new();
    if let Some(SlotValue::Environmental(data)) =
        live_value(snapshot, ServiceKind::EnvironmentalSensing, "aggregate")
    {
        parts.push(format_environmental(data));
    }
    if let Some(value @ SlotValue::FanPowerTacho(_)) = live_value(snapshot, ServiceKind::Fan, "aggregate") {
        parts.push(format!("fan {}", format_slot_value("aggregate", value)));
    }
    if let Some(SlotValue::Scalar(position)) = live_value(snapshot, ServiceKind::Servo, "position") {
        parts.push(format!("servo {}", format_value(*position, " %")));
    }
    if parts.is_empty() {
        format!("{}: no readings", snapshot.id)
    } else {
        parts.join(" | ")
    }
}

/// Compact single-line JSON for watch mode.
pub fn format_watch_json(snapshot: &DeviceSnapshot) -> Result<String> {
    Ok(serde_json::to_string(snapshot)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nevermore_types::{ConnectionState, FanPowerTacho, ServiceSnapshot};

    fn slot(value: SlotValue, subscribed: bool) -> Option<SlotSnapshot> {
        Some(SlotSnapshot {
            value: Some(value),
            subscribed,
            ..Default::default()
        })
    }

    fn sample() -> DeviceSnapshot {
        let mut fan = ServiceSnapshot::new(ServiceKind::Fan);
        fan.slots.insert(
            "aggregate".into(),
            slot(
                SlotValue::FanPowerTacho(FanPowerTacho {
                    power: Some(50.0),
                    tachometer: Some(1200.0),
                }),
                true,
            ),
        );
        fan.slots
            .insert("power_override".into(), slot(SlotValue::Scalar(None), false));

        let mut servo = ServiceSnapshot::new(ServiceKind::Servo);
        servo
            .slots
            .insert("position".into(), slot(SlotValue::Scalar(Some(25.0)), true));
        servo.slots.insert("range".into(), None);

        DeviceSnapshot {
            id: "AA:BB:CC:DD:EE:FF".into(),
            name: Some("Nevermore".into()),
            state: ConnectionState::Connected,
            error: None,
            services: [
                (ServiceKind::Fan, fan),
                (ServiceKind::Servo, servo),
                (ServiceKind::Cooler, ServiceSnapshot::new(ServiceKind::Cooler)),
            ]
            .into_iter()
            .collect(),
        }
    }

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(Some(21.5), " °C"), "21.50 °C");
        assert_eq!(format_value(None, " %"), "n/a");
    }

    #[test]
    fn test_format_slot_value() {
        assert_eq!(
            format_slot_value("temperature_intake", &SlotValue::Scalar(Some(21.5))),
            "21.50 °C"
        );
        assert_eq!(
            format_slot_value("power_override", &SlotValue::Scalar(None)),
            "off"
        );
        assert_eq!(
            format_slot_value("power_override", &SlotValue::Scalar(Some(75.0))),
            "75.00 %"
        );
    }

    #[test]
    fn test_format_snapshot_text() {
        let text = format_snapshot_text(&sample());
        assert!(text.starts_with("Nevermore (AA:BB:CC:DD:EE:FF) - connected"));
        assert!(text.contains("50.00 % at 1200.00 RPM [live]"));
        assert!(text.contains("off"));
        assert!(text.contains("(not exposed)"));
        assert!(text.contains("(present)"));
    }

    #[test]
    fn test_format_watch_line() {
        let line = format_watch_line(&sample());
        assert_eq!(line, "fan 50.00 % at 1200.00 RPM | servo 25.00 %");

        let empty = DeviceSnapshot {
            services: Default::default(),
            ..sample()
        };
        assert_eq!(format_watch_line(&empty), "AA:BB:CC:DD:EE:FF: no readings");
    }

    #[test]
    fn test_format_snapshot_json() {
        let json = format_snapshot_json(&sample()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["state"], "connected");
        assert_eq!(value["id"], "AA:BB:CC:DD:EE:FF");
    }
}
