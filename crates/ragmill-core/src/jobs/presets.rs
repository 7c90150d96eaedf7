//! Fixed catalogue of common schedule shapes.

use serde::Serialize;

/// A named shortcut for creating a common schedule
#[derive(Debug, Clone, Serialize)]
pub struct Preset {
    pub name: &'static str,
    pub description: &'static str,
    #[serde(flatten)]
    pub spec: PresetSpec,
}

/// Schedule shape behind a preset
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PresetSpec {
    Cron {
        #[serde(skip_serializing_if = "Option::is_none")]
        hour: Option<u32>,
        minute: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        day_of_week: Option<&'static str>,
    },
    Interval {
        #[serde(skip_serializing_if = "is_zero")]
        hours: u64,
        #[serde(skip_serializing_if = "is_zero")]
        minutes: u64,
    },
    /// Expands to one cron job per (hour, minute) pair with derived ids
    Multiple { schedules: &'static [(u32, u32)] },
}

fn is_zero(n: &u64) -> bool {
    *n == 0
}

const PRESETS: &[Preset] = &[
    Preset {
        name: "daily_2am",
        description: "Daily at 2:00 AM",
        spec: PresetSpec::Cron {
            hour: Some(2),
            minute: 0,
            day_of_week: None,
        },
    },
    Preset {
        name: "weekly_sunday_1am",
        description: "Weekly on Sunday at 1:00 AM",
        spec: PresetSpec::Cron {
            hour: Some(1),
            minute: 0,
            day_of_week: Some("sun"),
        },
    },
    Preset {
        name: "hourly",
        description: "Every hour",
        spec: PresetSpec::Interval {
            hours: 1,
            minutes: 0,
        },
    },
    Preset {
        name: "every_30_minutes",
        description: "Every 30 minutes",
        spec: PresetSpec::Interval {
            hours: 0,
            minutes: 30,
        },
    },
    Preset {
        name: "twice_daily",
        description: "Twice daily (6 AM and 6 PM)",
        spec: PresetSpec::Multiple {
            schedules: &[(6, 0), (18, 0)],
        },
    },
];

/// The full catalogue, in display order
pub fn catalogue() -> &'static [Preset] {
    PRESETS
}

/// Look up a preset by name
pub fn find(name: &str) -> Option<&'static Preset> {
    PRESETS.iter().find(|p| p.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalogue_names() {
        let names: Vec<&str> = catalogue().iter().map(|p| p.name).collect();
        assert_eq!(
            names,
            vec![
                "daily_2am",
                "weekly_sunday_1am",
                "hourly",
                "every_30_minutes",
                "twice_daily"
            ]
        );
    }

    #[test]
    fn test_find() {
        assert!(find("hourly").is_some());
        assert!(find("never_heard_of_it").is_none());
    }

    #[test]
    fn test_twice_daily_expands_to_two_schedules() {
        let preset = find("twice_daily").unwrap();
        match preset.spec {
            PresetSpec::Multiple { schedules } => {
                assert_eq!(schedules, &[(6, 0), (18, 0)]);
            }
            _ => panic!("twice_daily must be a multiple preset"),
        }
    }
}
