//! Set command implementation.

use anyhow::{Context, Result};

use crate::cli::{DeviceSetting, PowerOverride, RequestArgs};
use crate::config::Config;
use crate::util::{ctrl_c_token, open_manager, request_connected};

/// Describe the change for progress output.
fn describe_setting_change(setting: &DeviceSetting) -> String {
    match setting {
        DeviceSetting::FanOverride {
            power: PowerOverride(Some(percent)),
        } => format!("Setting fan power override to {:.0}%", percent),
        DeviceSetting::FanOverride {
            power: PowerOverride(None),
        } => "Clearing fan power override".to_string(),
        DeviceSetting::ServoPosition { percent } => {
            format!("Moving servo to {:.0}%", percent)
        }
        DeviceSetting::ServoRange { start, end } => {
            format!("Setting servo range to {:.0}%..{:.0}%", start, end)
        }
    }
}

pub async fn cmd_set(
    request: &RequestArgs,
    setting: DeviceSetting,
    quiet: bool,
    config: &Config,
) -> Result<()> {
    let manager = open_manager(config, request).await?;
    let device = request_connected(&manager, ctrl_c_token(), quiet).await?;

    if !quiet {
        eprintln!("{}...", describe_setting_change(&setting));
    }
    let result = match setting {
        DeviceSetting::FanOverride { power } => device.set_power_override(power.0).await,
        DeviceSetting::ServoPosition { percent } => device.set_servo_position(percent).await,
        DeviceSetting::ServoRange { start, end } => device.set_servo_range(start, end).await,
    };
    manager.disconnect_all().await;
    result.context("Failed to apply setting")?;

    if !quiet {
        eprintln!("Done.");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_setting_change() {
        assert_eq!(
            describe_setting_change(&DeviceSetting::FanOverride {
                power: PowerOverride(Some(60.0))
            }),
            "Setting fan power override to 60%"
        );
        assert_eq!(
            describe_setting_change(&DeviceSetting::FanOverride {
                power: PowerOverride(None)
            }),
            "Clearing fan power override"
        );
        assert_eq!(
            describe_setting_change(&DeviceSetting::ServoRange {
                start: 10.0,
                end: 90.0
            }),
            "Setting servo range to 10%..90%"
        );
    }
}
