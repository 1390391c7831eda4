// Action validation ahead of any device interaction.
use crate::agent_engine::state::{Action, Region, VerifyKind};
use crate::device::adb::{keycode, KEYCODES};

pub const MAX_WAIT_SECONDS: f64 = 30.0;
pub const MAX_SWIPE_MS: u64 = 10_000;

fn check_pct(name: &str, value: f64) -> Result<(), String> {
    if value.is_finite() && (0.0..=100.0).contains(&value) {
        Ok(())
    } else {
        Err(format!("{name} must be within 0-100, got {value}"))
    }
}

fn check_region(region: &Region) -> Result<(), String> {
    check_pct("region.x1_pct", region.x1_pct)?;
    check_pct("region.y1_pct", region.y1_pct)?;
    check_pct("region.x2_pct", region.x2_pct)?;
    check_pct("region.y2_pct", region.y2_pct)?;
    if region.x1_pct >= region.x2_pct || region.y1_pct >= region.y2_pct {
        return Err("region must satisfy x1 < x2 and y1 < y2".into());
    }
    Ok(())
}

/// Rejects actions the executor must not send to the device.
pub fn validate_action(action: &Action) -> Result<(), String> {
    match action {
        Action::Tap { x_pct, y_pct } => {
            check_pct("x_pct", *x_pct)?;
            check_pct("y_pct", *y_pct)
        }
        Action::Type { text } => {
            if text.is_empty() {
                Err("type requires non-empty text".into())
            } else {
                Ok(())
            }
        }
        Action::PressKey { key_name } => {
            if key_name.trim().is_empty() {
                Err("press_key requires a key name".into())
            } else if keycode(key_name).is_none() {
                let known: Vec<&str> = KEYCODES.iter().map(|(n, _)| *n).collect();
                Err(format!("unknown key '{key_name}', use one of: {}", known.join(", ")))
            } else {
                Ok(())
            }
        }
        Action::Swipe {
            x1_pct,
            y1_pct,
            x2_pct,
            y2_pct,
            duration_ms,
        } => {
            check_pct("x1_pct", *x1_pct)?;
            check_pct("y1_pct", *y1_pct)?;
            check_pct("x2_pct", *x2_pct)?;
            check_pct("y2_pct", *y2_pct)?;
            if *duration_ms == 0 || *duration_ms > MAX_SWIPE_MS {
                return Err(format!("swipe duration must be 1-{MAX_SWIPE_MS} ms, got {duration_ms}"));
            }
            Ok(())
        }
        Action::Wait { seconds } => {
            if seconds.is_finite() && *seconds > 0.0 && *seconds <= MAX_WAIT_SECONDS {
                Ok(())
            } else {
                Err(format!("wait must be within (0, {MAX_WAIT_SECONDS}] seconds, got {seconds}"))
            }
        }
        Action::Verify {
            kind,
            target,
            expected,
            region,
        } => {
            if target.trim().is_empty() {
                return Err("verify requires a target".into());
            }
            if *kind == VerifyKind::Color {
                let Some(region) = region else {
                    return Err("color verification requires a region".into());
                };
                check_region(region)?;
                if expected.as_deref().map(str::trim).unwrap_or_default().is_empty() {
                    return Err("color verification requires an expected color".into());
                }
            }
            Ok(())
        }
        Action::Complete { .. } => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinates_must_be_percentages() {
        assert!(validate_action(&Action::Tap { x_pct: 50.0, y_pct: 100.0 }).is_ok());
        assert!(validate_action(&Action::Tap { x_pct: 101.0, y_pct: 5.0 }).is_err());
        assert!(validate_action(&Action::Tap { x_pct: -1.0, y_pct: 5.0 }).is_err());
    }

    #[test]
    fn empty_text_and_key_are_rejected() {
        assert!(validate_action(&Action::Type { text: String::new() }).is_err());
        assert!(validate_action(&Action::PressKey { key_name: " ".into() }).is_err());
    }

    #[test]
    fn key_name_must_be_known() {
        assert!(validate_action(&Action::PressKey { key_name: "Enter".into() }).is_ok());
        let err = validate_action(&Action::PressKey { key_name: "hyperspace".into() }).unwrap_err();
        assert!(err.contains("unknown key 'hyperspace'"));
        assert!(err.contains("back"));
    }

    #[test]
    fn wait_is_bounded() {
        assert!(validate_action(&Action::Wait { seconds: 0.0 }).is_err());
        assert!(validate_action(&Action::Wait { seconds: 30.0 }).is_ok());
        assert!(validate_action(&Action::Wait { seconds: 31.0 }).is_err());
    }

    #[test]
    fn swipe_duration_is_bounded() {
        let swipe = |duration_ms| Action::Swipe {
            x1_pct: 50.0,
            y1_pct: 80.0,
            x2_pct: 50.0,
            y2_pct: 20.0,
            duration_ms,
        };
        assert!(validate_action(&swipe(300)).is_ok());
        assert!(validate_action(&swipe(0)).is_err());
        assert!(validate_action(&swipe(20_000)).is_err());
    }

    #[test]
    fn color_verify_needs_region_and_expectation() {
        let region = Region {
            x1_pct: 0.0,
            y1_pct: 0.0,
            x2_pct: 10.0,
            y2_pct: 5.0,
        };
        let verify = |expected: Option<&str>, region: Option<Region>| Action::Verify {
            kind: VerifyKind::Color,
            target: "highlighter icon".into(),
            expected: expected.map(String::from),
            region,
        };
        assert!(validate_action(&verify(Some("red"), Some(region))).is_ok());
        assert!(validate_action(&verify(None, Some(region))).is_err());
        assert!(validate_action(&verify(Some("red"), None)).is_err());
        let inverted = Region { x1_pct: 10.0, x2_pct: 0.0, ..region };
        assert!(validate_action(&verify(Some("red"), Some(inverted))).is_err());
    }
}
