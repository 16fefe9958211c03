//! Build target: microcontroller family and board, with the few board facts
//! validators need (default bus pins, valid GPIO range).
use std::fmt;

use serde::Serialize;

use crate::value::ConfigValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Platform {
    Esp32,
    Esp8266,
}

impl Platform {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "ESP32" => Some(Platform::Esp32),
            "ESP8266" => Some(Platform::Esp8266),
            _ => None,
        }
    }
    /// PlatformIO `platform =` value.
    pub fn pio_platform(self) -> &'static str {
        match self {
            Platform::Esp32 => "espressif32",
            Platform::Esp8266 => "espressif8266",
        }
    }
    pub fn max_gpio(self) -> i64 {
        match self {
            Platform::Esp32 => 39,
            Platform::Esp8266 => 17,
        }
    }
    pub fn default_i2c_pins(self) -> (i64, i64) {
        match self {
            Platform::Esp32 => (21, 22),
            Platform::Esp8266 => (4, 5),
        }
    }
    pub fn define(self) -> &'static str {
        match self {
            Platform::Esp32 => "USE_ESP32",
            Platform::Esp8266 => "USE_ESP8266",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Platform::Esp32 => "ESP32",
            Platform::Esp8266 => "ESP8266",
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Target {
    pub name: String,
    pub platform: Option<Platform>,
    pub board: Option<String>,
}

impl Target {
    /// Reads the target out of a raw (unvalidated) `esphome:` block. Bad
    /// values are left unset here; the core schema reports them properly.
    pub fn preload(core: Option<&ConfigValue>) -> Self {
        let Some(core) = core else { return Self::default() };
        Self {
            name: core.get("name").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
            platform: core.get("platform").and_then(|v| v.as_str()).and_then(Platform::parse),
            board: core.get("board").and_then(|v| v.as_str()).map(str::to_string),
        }
    }

    /// Board-specific named pins such as `D1` on NodeMCU boards.
    pub fn board_pin_alias(&self, alias: &str) -> Option<i64> {
        const ESP8266_D_PINS: [(&str, i64); 9] = [
            ("D0", 16),
            ("D1", 5),
            ("D2", 4),
            ("D3", 0),
            ("D4", 2),
            ("D5", 14),
            ("D6", 12),
            ("D7", 13),
            ("D8", 15),
        ];
        const ESP32_ALIASES: [(&str, i64); 4] = [("LED", 2), ("SDA", 21), ("SCL", 22), ("TX", 1)];
        let alias = alias.to_ascii_uppercase();
        let table: &[(&str, i64)] = match self.platform? {
            Platform::Esp8266 => &ESP8266_D_PINS,
            Platform::Esp32 => &ESP32_ALIASES,
        };
        table.iter().find(|(name, _)| *name == alias).map(|(_, pin)| *pin)
    }
}
