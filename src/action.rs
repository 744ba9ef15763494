//! Actions that operate lights.

use crate::device::{LightColors, LightWriter};
use crate::exec::Execution;
use crate::lights::LightSet;
use async_trait::async_trait;
use serde_json::Value;

/// Something a program does to a set of lights.
///
/// `used_lights` is the closure from a candidate set to the lights
/// the action will actually touch. Implementations must satisfy two
/// axioms the schedulers depend on:
///
/// 1. `used_lights(used_lights(a)) == used_lights(a)`
/// 2. if `a` is a subset of `b` then `used_lights(a)` is a subset of
///    `used_lights(b)`
#[async_trait]
pub trait Action: Send + Sync {
    /// Performs the action on exactly the lights in `lights`. Device
    /// failures are recorded on the execution; the action keeps going
    /// for the remaining lights.
    async fn execute(&self, device: &dyn LightWriter, lights: &LightSet, execution: &Execution);

    /// The lights this action will use given an initial set.
    fn used_lights(&self, lights: &LightSet) -> LightSet;

    /// A serializable form of this action for the schedule store.
    /// `Null` means the action cannot be persisted.
    fn encode(&self) -> Value {
        Value::Null
    }
}

/// Turns each light to a fixed color and brightness.
///
/// The entry for light id 0, when present, applies to every light in
/// the candidate set; otherwise only the listed lights are used.
#[derive(Debug, Clone, PartialEq)]
pub struct StaticAction {
    colors: LightColors,
}

impl StaticAction {
    pub fn new(colors: LightColors) -> Self {
        Self { colors }
    }

    /// An action that applies one state to every candidate light.
    pub fn uniform(state: crate::device::ColorBrightness) -> Self {
        let mut colors = LightColors::new();
        colors.insert(0, state);
        Self { colors }
    }

    /// Rebuilds an action from its [`Action::encode`] payload.
    pub fn decode(payload: &Value) -> anyhow::Result<Self> {
        let kind = payload.get("kind").and_then(Value::as_str);
        anyhow::ensure!(kind == Some("static"), "not a static action payload");
        let colors = payload
            .get("colors")
            .ok_or_else(|| anyhow::anyhow!("static action payload missing colors"))?;
        Ok(Self::new(serde_json::from_value(colors.clone())?))
    }
}

#[async_trait]
impl Action for StaticAction {
    async fn execute(&self, device: &dyn LightWriter, lights: &LightSet, execution: &Execution) {
        let global = self.colors.get(&0).map(|state| state.to_properties(None));
        let (ids, is_all) = lights.to_ordered_ids();
        if is_all {
            let properties = global
                .expect("executing on all lights requires an every-light entry");
            if let Err(err) = device.set_light(0, &properties).await {
                execution.set_error(err);
            }
            return;
        }
        for id in ids {
            let properties = match &global {
                Some(properties) => properties.clone(),
                None => self
                    .colors
                    .get(&id)
                    .copied()
                    .unwrap_or_default()
                    .to_properties(None),
            };
            if let Err(err) = device.set_light(id, &properties).await {
                execution.set_error(err);
            }
        }
    }

    fn used_lights(&self, lights: &LightSet) -> LightSet {
        if self.colors.contains_key(&0) {
            return lights.clone();
        }
        LightSet::new(self.colors.keys().copied()).intersect(lights)
    }

    fn encode(&self) -> Value {
        serde_json::json!({ "kind": "static", "colors": self.colors })
    }
}

/// Computes the brightnesses a group of lights should take when they
/// blink. `magnitude` is between -255 and 255; positive prefers
/// blinking brighter, negative prefers dimmer. The direction most of
/// the lights can move wins, with the preferred direction breaking
/// ties.
pub fn blink(brights: &[u8], magnitude: i32) -> Vec<u8> {
    assert!(
        (-255..=255).contains(&magnitude),
        "magnitude must be between -255 and 255"
    );
    let up_preferred = magnitude >= 0;
    let magnitude = magnitude.abs();
    let magnitude128 = magnitude.min(128);
    let down_threshold = magnitude128;
    let up_threshold = 256 - magnitude128;
    let is_down = |x: i32| x >= down_threshold;
    let is_up = |x: i32| x < up_threshold;
    let go_down = move |x: i32| (x - magnitude).max(0);
    let go_up = move |x: i32| (x + magnitude).min(255);

    let up_count = brights.iter().filter(|&&b| is_up(b as i32)).count();
    let down_count = brights.iter().filter(|&&b| is_down(b as i32)).count();

    let (test, positive, negative): (
        &dyn Fn(i32) -> bool,
        &dyn Fn(i32) -> i32,
        &dyn Fn(i32) -> i32,
    ) = if up_count > down_count || (up_count == down_count && up_preferred) {
        (&is_up, &go_up, &go_down)
    } else {
        (&is_down, &go_down, &go_up)
    };

    brights
        .iter()
        .map(|&b| {
            let x = b as i32;
            let moved = if test(x) { positive(x) } else { negative(x) };
            moved as u8
        })
        .collect()
}
