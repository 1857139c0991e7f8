use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::bot::{BotConfig, MapLogSettings};
use crate::capture::CaptureSettings;
use crate::error::ConfigError;
use crate::vision::{CalibrationReport, ClassRule, PerceptionSettings, PositionSettings, VitalsSettings};

/// The `settings.json` document. Every field has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Case-insensitive regex matched against window titles.
    pub window_pattern: String,
    pub capture: CaptureSettings,
    pub perception: PerceptionSettings,
    pub vitals: VitalsSettings,
    pub position: PositionSettings,
    pub bot: BotConfig,
    pub map_log: MapLogSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            window_pattern: "dungeon|delve".into(),
            capture: CaptureSettings::default(),
            perception: PerceptionSettings::default(),
            vitals: VitalsSettings::default(),
            position: PositionSettings::default(),
            bot: BotConfig::default(),
            map_log: MapLogSettings::default(),
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let settings: Settings = serde_json::from_str(&text)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Defaults when the file does not exist; any other problem is reported.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        match Self::load(path) {
            Err(ConfigError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            other => other,
        }
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }

    /// Fold an accepted calibration into the vitals section.
    pub fn apply_calibration(&mut self, report: &CalibrationReport) {
        if report.health.is_some() {
            self.vitals.health = report.health;
        }
        if report.mana.is_some() {
            self.vitals.mana = report.mana;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if let Err(e) = regex::RegexBuilder::new(&self.window_pattern).case_insensitive(true).build() {
            return invalid(format!("window_pattern: {}", e));
        }
        if !matches!(self.perception.kernel, 3 | 5) {
            return invalid(format!("perception.kernel must be 3 or 5, got {}", self.perception.kernel));
        }
        let classes: [(&str, &ClassRule); 5] = [
            ("enemy", &self.perception.classes.enemy),
            ("stair", &self.perception.classes.stair),
            ("portal", &self.perception.classes.portal),
            ("obstacle", &self.perception.classes.obstacle),
            ("player", &self.perception.classes.player),
        ];
        for (name, rule) in classes {
            if let Some(i) = rule.ranges.iter().position(|r| !r.is_well_formed()) {
                return invalid(format!("perception.classes.{}.ranges[{}] is not a valid HSV range", name, i));
            }
            if let Some(a) = rule.aspect {
                if a.min > a.max {
                    return invalid(format!("perception.classes.{}.aspect: min > max", name));
                }
            }
        }
        if self.bot.heal_threshold > 100 || self.bot.mana_threshold > 100 {
            return invalid("bot thresholds must be within 0..=100".into());
        }
        if let Some(s) = self.bot.spells.iter().find(|s| s.min_mana_pct > 100) {
            return invalid(format!("spell {}: min_mana_pct must be within 0..=100", s.name));
        }
        if self.bot.tick_ms == 0 {
            return invalid("bot.tick_ms must be non-zero".into());
        }
        if self.capture.attempt_timeout_ms == 0 {
            return invalid("capture.attempt_timeout_ms must be non-zero".into());
        }
        if self.vitals.bands.iter().any(|b| b.pct > 100) {
            return invalid("vitals.bands: pct must be within 0..=100".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Rect;
    use crate::vision::vitals::{BarColor, CalibrationRegion};
    use crate::vision::ClassTable;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let s = Settings::load_or_default(&dir.path().join("settings.json")).unwrap();
        assert_eq!(s, Settings::default());
    }

    #[test]
    fn partial_document_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{
                "window_pattern": "my game",
                "bot": { "heal_threshold": 65, "cooldowns": { "attack": 1200 }, "keys": { "food": "f5" } },
                "perception": { "kernel": 5, "classes": { "enemy": { "ranges": [[[0,100,100],[8,255,255]]], "min_area": 60 } } }
            }"#,
        )
        .unwrap();
        let s = Settings::load(&path).unwrap();
        assert_eq!(s.window_pattern, "my game");
        assert_eq!(s.bot.heal_threshold, 65);
        assert_eq!(s.bot.cooldowns.attack, 1200);
        assert_eq!(s.bot.cooldowns.heal, 2000);
        assert_eq!(s.bot.keys.food.as_deref(), Some("f5"));
        assert_eq!(s.bot.keys.attack, "1");
        assert_eq!(s.perception.kernel, 5);
        assert_eq!(s.perception.classes.enemy.min_area, 60);
        assert!(s.perception.classes.enemy.aspect.is_none());
        assert_eq!(s.perception.classes.stair, ClassTable::default().stair);
        assert_eq!(s.capture.attempt_timeout_ms, 750);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        std::fs::write(&path, r#"{ "perception": { "kernel": 4 } }"#).unwrap();
        assert!(matches!(Settings::load(&path), Err(ConfigError::Invalid(_))));

        std::fs::write(&path, r#"{ "bot": { "tick_ms": 0 } }"#).unwrap();
        assert!(matches!(Settings::load(&path), Err(ConfigError::Invalid(_))));

        std::fs::write(&path, r#"{ "bot": { "mana_threshold": 120 } }"#).unwrap();
        assert!(matches!(Settings::load(&path), Err(ConfigError::Invalid(_))));

        std::fs::write(&path, r#"{ "perception": { "classes": { "portal": { "ranges": [[[150,0,0],[120,255,255]]], "min_area": 1 } } } }"#)
            .unwrap();
        assert!(matches!(Settings::load(&path), Err(ConfigError::Invalid(_))));

        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(Settings::load(&path), Err(ConfigError::Parse(_))));
        assert!(matches!(Settings::load_or_default(&path), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn calibration_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let mut s = Settings::default();
        let report = CalibrationReport {
            health: Some(CalibrationRegion { rect: Rect::new(10, 10, 200, 6), color: BarColor::Red }),
            mana: None,
            ..Default::default()
        };
        s.apply_calibration(&report);
        s.save(&path).unwrap();

        let back = Settings::load(&path).unwrap();
        assert_eq!(back.vitals.health, report.health);
        assert!(back.vitals.mana.is_none());
        assert_eq!(back, s);
    }
}
