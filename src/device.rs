//! Light device capability.
//!
//! The orchestrator talks to fixtures through the [`LightReader`] and
//! [`LightWriter`] traits; everything behind them (bridge protocol,
//! transport, retries) belongs to the surrounding service. Light id 0
//! addresses the device's all-lights group rather than a single
//! fixture.

use crate::lights::LightSet;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::warn;

/// How long a restore write fades in.
const RESTORE_FADE: Duration = Duration::from_millis(400);

/// How long to wait after restore writes for the fade to land.
const RESTORE_SETTLE: Duration = Duration::from_millis(500);

/// A color in CIE xy space. Coordinates are clamped to [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color {
    x: f64,
    y: f64,
}

impl Color {
    pub const RED: Color = Color { x: 0.675, y: 0.322 };
    pub const GREEN: Color = Color { x: 0.4091, y: 0.518 };
    pub const BLUE: Color = Color { x: 0.167, y: 0.04 };
    pub const YELLOW: Color = Color { x: 0.4325, y: 0.5007 };
    pub const MAGENTA: Color = Color { x: 0.3824, y: 0.1601 };
    pub const CYAN: Color = Color { x: 0.1684, y: 0.3951 };
    pub const PURPLE: Color = Color { x: 0.2451, y: 0.0974 };
    pub const WHITE: Color = Color { x: 0.3848, y: 0.3629 };
    pub const PINK: Color = Color { x: 0.3944, y: 0.2087 };
    pub const ORANGE: Color = Color { x: 0.6225, y: 0.3685 };

    pub fn new(x: f64, y: f64) -> Self {
        Self {
            x: x.clamp(0.0, 1.0),
            y: y.clamp(0.0, 1.0),
        }
    }

    pub fn x(&self) -> f64 {
        self.x
    }

    pub fn y(&self) -> f64 {
        self.y
    }
}

/// Color and brightness for one light. Both fields optional; neither
/// present means the light is off.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ColorBrightness {
    pub color: Option<Color>,
    pub brightness: Option<u8>,
}

impl ColorBrightness {
    pub fn new(color: Color, brightness: u8) -> Self {
        Self {
            color: Some(color),
            brightness: Some(brightness),
        }
    }

    /// Converts to the properties that reproduce this state, with an
    /// optional fade. A state with neither color nor brightness
    /// becomes a plain "off".
    pub fn to_properties(&self, transition: Option<Duration>) -> LightProperties {
        if self.color.is_none() && self.brightness.is_none() {
            return LightProperties {
                on: Some(false),
                transition,
                ..LightProperties::default()
            };
        }
        LightProperties {
            on: Some(true),
            color: self.color,
            brightness: self.brightness,
            transition,
        }
    }
}

/// The wire-visible state of a light. Fields left `None` are not
/// changed by a write and not reported by a read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LightProperties {
    pub on: Option<bool>,
    pub color: Option<Color>,
    pub brightness: Option<u8>,
    pub transition: Option<Duration>,
}

/// Color and brightness keyed by light id. Id 0, where present,
/// applies to every light in a candidate set.
pub type LightColors = BTreeMap<u32, ColorBrightness>;

/// Reads the state of individual lights.
#[async_trait]
pub trait LightReader: Send + Sync {
    async fn get_light(&self, id: u32) -> Result<LightProperties>;
}

/// Updates the state of individual lights. Id 0 addresses the
/// all-lights group.
#[async_trait]
pub trait LightWriter: Send + Sync {
    async fn set_light(&self, id: u32, properties: &LightProperties) -> Result<()>;
}

/// A device that can both read and update lights.
pub trait LightDevice: LightReader + LightWriter {}

impl<T: LightReader + LightWriter> LightDevice for T {}

/// Reads the current color and brightness of every light in `set`.
///
/// A light that reports off records an empty [`ColorBrightness`]. A
/// light that fails to read is logged and skipped; the remaining
/// lights are still sampled. Snapshotting `All` yields an empty
/// snapshot since there is nothing to enumerate.
pub async fn snapshot(reader: &dyn LightReader, set: &LightSet) -> LightColors {
    let mut result = LightColors::new();
    let (ids, _) = set.to_ordered_ids();
    for id in ids {
        match reader.get_light(id).await {
            Ok(properties) => {
                let mut state = ColorBrightness::default();
                if properties.on == Some(true) {
                    state.color = properties.color;
                    state.brightness = properties.brightness;
                }
                result.insert(id, state);
            }
            Err(err) => {
                warn!("Failed to read light {}: {}", id, err);
            }
        }
    }
    result
}

/// Writes a snapshot back to the lights it was taken from, fading
/// each light in over 400ms and then waiting for the fade to land.
/// Write failures are logged; the remaining lights are still written.
pub async fn restore(writer: &dyn LightWriter, colors: &LightColors) {
    for (id, state) in colors {
        let properties = state.to_properties(Some(RESTORE_FADE));
        if let Err(err) = writer.set_light(*id, &properties).await {
            warn!("Failed to restore light {}: {}", id, err);
        }
    }
    tokio::time::sleep(RESTORE_SETTLE).await;
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory device for tests. Records every write and serves
    /// reads from a preset state table.
    pub struct FakeDevice {
        state: Mutex<HashMap<u32, LightProperties>>,
        writes: Mutex<Vec<(u32, LightProperties)>>,
        failing: Mutex<std::collections::HashSet<u32>>,
    }

    impl FakeDevice {
        pub fn new() -> Self {
            Self {
                state: Mutex::new(HashMap::new()),
                writes: Mutex::new(Vec::new()),
                failing: Mutex::new(std::collections::HashSet::new()),
            }
        }

        pub fn preset(&self, id: u32, properties: LightProperties) {
            self.state.lock().unwrap().insert(id, properties);
        }

        pub fn fail_light(&self, id: u32) {
            self.failing.lock().unwrap().insert(id);
        }

        pub fn writes(&self) -> Vec<(u32, LightProperties)> {
            self.writes.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LightReader for FakeDevice {
        async fn get_light(&self, id: u32) -> Result<LightProperties> {
            if self.failing.lock().unwrap().contains(&id) {
                anyhow::bail!("light {} unreachable", id);
            }
            Ok(self
                .state
                .lock()
                .unwrap()
                .get(&id)
                .cloned()
                .unwrap_or_default())
        }
    }

    #[async_trait]
    impl LightWriter for FakeDevice {
        async fn set_light(&self, id: u32, properties: &LightProperties) -> Result<()> {
            if self.failing.lock().unwrap().contains(&id) {
                anyhow::bail!("light {} unreachable", id);
            }
            self.writes.lock().unwrap().push((id, properties.clone()));
            self.state.lock().unwrap().insert(id, properties.clone());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::FakeDevice;
    use super::*;
    use crate::lights::LightSet;

    fn on(color: Color, brightness: u8) -> LightProperties {
        LightProperties {
            on: Some(true),
            color: Some(color),
            brightness: Some(brightness),
            transition: None,
        }
    }

    #[tokio::test]
    async fn snapshot_captures_on_and_off_lights() {
        let device = FakeDevice::new();
        device.preset(1, on(Color::RED, 200));
        device.preset(2, LightProperties {
            on: Some(false),
            color: Some(Color::BLUE),
            brightness: Some(50),
            transition: None,
        });
        let colors = snapshot(&device, &LightSet::new([1, 2])).await;
        assert_eq!(
            Some(&ColorBrightness::new(Color::RED, 200)),
            colors.get(&1)
        );
        // Off lights record no color so restore turns them back off.
        assert_eq!(Some(&ColorBrightness::default()), colors.get(&2));
    }

    #[tokio::test]
    async fn snapshot_skips_unreachable_lights() {
        let device = FakeDevice::new();
        device.preset(1, on(Color::GREEN, 10));
        device.fail_light(2);
        device.preset(3, on(Color::WHITE, 255));
        let colors = snapshot(&device, &LightSet::new([1, 2, 3])).await;
        assert_eq!(2, colors.len());
        assert!(colors.contains_key(&1));
        assert!(colors.contains_key(&3));
    }

    #[tokio::test]
    async fn snapshot_of_all_is_empty() {
        let device = FakeDevice::new();
        let colors = snapshot(&device, &LightSet::All).await;
        assert!(colors.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn restore_writes_with_fade() {
        let device = FakeDevice::new();
        let mut colors = LightColors::new();
        colors.insert(1, ColorBrightness::new(Color::RED, 128));
        colors.insert(2, ColorBrightness::default());
        restore(&device, &colors).await;

        let writes = device.writes();
        assert_eq!(2, writes.len());
        assert_eq!(1, writes[0].0);
        assert_eq!(Some(true), writes[0].1.on);
        assert_eq!(Some(Duration::from_millis(400)), writes[0].1.transition);
        assert_eq!(2, writes[1].0);
        assert_eq!(Some(false), writes[1].1.on);
    }

    #[tokio::test(start_paused = true)]
    async fn restore_continues_past_write_errors() {
        let device = FakeDevice::new();
        device.fail_light(1);
        let mut colors = LightColors::new();
        colors.insert(1, ColorBrightness::new(Color::RED, 128));
        colors.insert(2, ColorBrightness::new(Color::BLUE, 10));
        restore(&device, &colors).await;

        let writes = device.writes();
        assert_eq!(1, writes.len());
        assert_eq!(2, writes[0].0);
    }
}
