/// Collaborator interfaces the switch is driven through.
///
/// The switch never performs I/O itself. Device access, solar events,
/// scheduling and the clock are all supplied by the host, which also
/// serializes every call into the switch.

use chrono::{DateTime, FixedOffset, NaiveDate};

use crate::color::{ColorMode, LightColor, Rgb};
use crate::command::ServiceCall;

/// Last reported state of one light.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LightState {
    /// Raw state string: "on", "off", "unavailable", ...
    pub state: String,
    pub xy_color: Option<(f64, f64)>,
    pub color_temp: Option<u32>,
    pub rgb_color: Option<Rgb>,
}

impl LightState {
    pub fn is_on(&self) -> bool {
        self.state == "on"
    }

    /// The reported color in the unit of `mode`, if the light reports one.
    pub fn color(&self, mode: ColorMode) -> Option<LightColor> {
        match mode {
            ColorMode::Xy => self.xy_color.map(|(x, y)| LightColor::Xy(x, y)),
            ColorMode::Mired => self.color_temp.map(LightColor::Mired),
            ColorMode::Rgb => self.rgb_color.map(LightColor::Rgb),
        }
    }
}

/// A turn-on command with color and optional brightness/transition.
#[derive(Debug, Clone, PartialEq)]
pub struct LightCommand {
    pub color: LightColor,
    pub brightness: Option<u8>,
    /// Seconds.
    pub transition: Option<f64>,
}

/// Device query + command. Failures are the host's concern: an unreachable
/// light is simply "not on" and has no state.
pub trait Lights {
    fn state(&self, entity_id: &str) -> Option<LightState>;
    fn is_on(&self, entity_id: &str) -> bool {
        self.state(entity_id).is_some_and(|s| s.is_on())
    }
    fn turn_on(&self, entity_id: &str, command: &LightCommand);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolarEvent {
    Sunrise,
    Sunset,
}

impl std::fmt::Display for SolarEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SolarEvent::Sunrise => f.write_str("sunrise"),
            SolarEvent::Sunset => f.write_str("sunset"),
        }
    }
}

/// Sunrise/sunset could not be determined for a date.
#[derive(Debug)]
pub struct SolarError {
    pub event: SolarEvent,
    pub date: NaiveDate,
    pub reason: String,
}

impl std::fmt::Display for SolarError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "no {} for {}: {}", self.event, self.date, self.reason)
    }
}

impl std::error::Error for SolarError {}

pub trait SolarEvents {
    fn event_date(
        &self,
        event: SolarEvent,
        date: NaiveDate,
    ) -> Result<DateTime<FixedOffset>, SolarError>;
}

/// Fires whenever the wall-clock second of the minute is in `seconds`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimePattern {
    pub seconds: Vec<u32>,
}

/// Opaque handle to a registered timer or listener. Not `Clone`: giving it
/// back through `Scheduler::unsubscribe` is the only way to release it.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct Subscription(u64);

impl Subscription {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Registrations deliver `FluxEvent`s back to whoever dispatches into the switch.
pub trait Scheduler {
    fn register_periodic(&mut self, pattern: TimePattern) -> Subscription;
    fn register_state_transition(
        &mut self,
        entity_ids: &[String],
        from_state: &str,
        to_state: &str,
    ) -> Subscription;
    fn unsubscribe(&mut self, subscription: Subscription);
}

pub trait Clock {
    fn now(&self) -> DateTime<FixedOffset>;
}

/// Everything a switch needs from its environment.
pub trait Host: Lights + SolarEvents + Scheduler + Clock {}

impl<T: Lights + SolarEvents + Scheduler + Clock> Host for T {}

/// Input to `FluxSwitch::handle`.
#[derive(Debug, Clone, PartialEq)]
pub enum FluxEvent {
    /// Periodic timer fired at this time.
    Tick(DateTime<FixedOffset>),
    /// A watched light made the registered state transition.
    StateChanged(String),
    /// A service call from the user or an automation.
    Service(ServiceCall),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reported_color_follows_mode() {
        let s = LightState {
            state: "on".into(),
            xy_color: Some((0.5, 0.4)),
            color_temp: Some(300),
            rgb_color: None,
        };
        assert!(s.is_on());
        assert_eq!(s.color(ColorMode::Xy), Some(LightColor::Xy(0.5, 0.4)));
        assert_eq!(s.color(ColorMode::Mired), Some(LightColor::Mired(300)));
        assert_eq!(s.color(ColorMode::Rgb), None);
    }

    #[test]
    fn only_on_counts_as_on() {
        for state in ["off", "unavailable", "ON", ""] {
            let s = LightState { state: state.into(), ..Default::default() };
            assert!(!s.is_on(), "{state:?} should not be on");
        }
    }

    struct OneLight(LightState);

    impl Lights for OneLight {
        fn state(&self, entity_id: &str) -> Option<LightState> {
            (entity_id == "light.desk").then(|| self.0.clone())
        }

        fn turn_on(&self, _entity_id: &str, _command: &LightCommand) {}
    }

    #[test]
    fn is_on_comes_from_state() {
        let lights = OneLight(LightState { state: "on".into(), ..Default::default() });
        assert!(lights.is_on("light.desk"));
        assert!(!lights.is_on("light.missing"));
        let lights = OneLight(LightState { state: "off".into(), ..Default::default() });
        assert!(!lights.is_on("light.desk"));
    }
}
