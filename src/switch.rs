/// Flux switch: the on/off state machine that ties the circadian engine,
/// the update gate and the host together.
///
///   OFF --turn_on--> ON     forced update of every light, then timers registered
///   ON  --tick-----> ON     periodic update, gated per light
///   ON  --force----> ON     forced update of some/all lights, then gated pass
///   ON  --turn_off-> OFF    timer and listener released
///
/// `last_color` is written exactly once per cycle, after every light has been
/// looked at, so the gate always compares against the previous cycle's color.

use chrono::{DateTime, FixedOffset};

use crate::circadian::{self, Interpolation};
use crate::color::{ColorMode, FluxColor, LightColor};
use crate::command::ServiceCall;
use crate::config::SwitchConfig;
use crate::gate;
use crate::host::{
    FluxEvent, Host, LightCommand, LightState, SolarError, SolarEvent, Subscription, TimePattern,
};

/// Color computed for one cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Target {
    pub interpolation: Interpolation,
    pub color: FluxColor,
}

pub struct FluxSwitch<H> {
    config: SwitchConfig,
    host: H,
    last_color: Option<LightColor>,
    tracker: Option<Subscription>,
    turn_on_trigger: Option<Subscription>,
}

impl<H: Host> FluxSwitch<H> {
    pub fn new(config: SwitchConfig, host: H) -> Self {
        Self {
            config,
            host,
            last_color: None,
            tracker: None,
            turn_on_trigger: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    /// True while the periodic timer is registered.
    pub fn is_on(&self) -> bool {
        self.tracker.is_some()
    }

    pub fn last_color(&self) -> Option<LightColor> {
        self.last_color
    }

    /// Sunrise, or the configured start time on `now`'s day.
    fn find_start_time(&self, now: DateTime<FixedOffset>) -> Result<DateTime<FixedOffset>, SolarError> {
        match self.config.start_time {
            Some(start) => Ok(circadian::at_wall_clock(now, start)),
            None => self.host.event_date(SolarEvent::Sunrise, now.date_naive()),
        }
    }

    /// Interpolate the target color for `now`.
    pub fn target(&self, now: DateTime<FixedOffset>) -> Result<Target, SolarError> {
        let sunset = self.host.event_date(SolarEvent::Sunset, now.date_naive())?;
        let sunrise = self.find_start_time(now)?;
        let stop_time = circadian::at_wall_clock(now, self.config.stop_time);

        let interpolation =
            circadian::compute(now, sunrise, sunset, stop_time, self.config.colortemps);
        Ok(Target {
            interpolation,
            color: FluxColor::from_kelvin(interpolation.kelvin),
        })
    }

    /// Brightness to send with a color: the configured override, else the
    /// color's own. RGB mode never sends brightness.
    fn brightness(&self, color: &FluxColor) -> Option<u8> {
        match self.config.mode {
            ColorMode::Rgb => None,
            _ => Some(self.config.brightness.unwrap_or(color.brightness)),
        }
    }

    /// Push `command` to every configured light that passes the gate, then
    /// remember its color as the last one set.
    fn apply(&mut self, command: &LightCommand) {
        let mode = self.config.mode;
        let last = self.last_color;
        for light in &self.config.lights {
            let state = self.host.state(light).filter(LightState::is_on);
            let on = state.is_some();
            let current = state.and_then(|s| s.color(mode));
            if gate::should_update(on, current.as_ref(), last.as_ref()) {
                self.host.turn_on(light, command);
            } else if on {
                log::debug!("{}: skipping {light}, color changed since last update", self.config.name);
            } else {
                log::debug!("{}: skipping {light}, not on", self.config.name);
            }
        }
        self.last_color = Some(command.color);
    }

    fn log_cycle(&self, target: &Target, command: &LightCommand, now: DateTime<FixedOffset>) {
        let brightness = command
            .brightness
            .map_or_else(|| "unchanged".to_string(), |b| b.to_string());
        log::info!(
            "{}: lights updated to {} brightness:{}, {}% of {} cycle complete at {}",
            self.config.name,
            command.color,
            brightness,
            (target.interpolation.percentage * 100.0).round(),
            target.interpolation.phase,
            now.format("%H:%M:%S"),
        );
    }

    /// Periodic update at the host's current time.
    pub fn update(&mut self) -> Result<Target, SolarError> {
        let now = self.host.now();
        self.update_at(now)
    }

    /// Periodic update: only lights that pass the gate are written.
    pub fn update_at(&mut self, now: DateTime<FixedOffset>) -> Result<Target, SolarError> {
        let target = self.target(now)?;
        let brightness = if self.config.disable_brightness_adjust {
            None
        } else {
            self.brightness(&target.color)
        };
        let command = LightCommand {
            color: target.color.to_light_color(self.config.mode),
            brightness,
            transition: Some(self.config.transition),
        };
        self.apply(&command);
        self.log_cycle(&target, &command, now);
        Ok(target)
    }

    /// Forced update: every light in `entity_ids` (default: all configured)
    /// that is on gets the current color immediately, whatever its history.
    /// The usual gated pass over all configured lights follows.
    pub fn force_update(&mut self, entity_ids: Option<&[String]>) -> Result<Target, SolarError> {
        let now = self.host.now();
        let targets: Vec<String> = entity_ids.unwrap_or(&self.config.lights).to_vec();
        log::info!("{}: forced update for {targets:?}", self.config.name);

        let target = self.target(now)?;
        let forced = LightCommand {
            color: target.color.to_light_color(self.config.mode),
            brightness: self.brightness(&target.color),
            transition: None,
        };
        for light in &targets {
            if self.host.state(light).is_some_and(|s| s.is_on()) {
                log::debug!("{}: forcing {light} to {}", self.config.name, forced.color);
                self.host.turn_on(light, &forced);
            } else {
                log::debug!("{}: not forcing {light}, not on", self.config.name);
            }
        }

        let gated = LightCommand {
            transition: Some(self.config.transition),
            ..forced
        };
        self.apply(&gated);
        self.log_cycle(&target, &gated, now);
        Ok(target)
    }

    /// Forced update of every light, then start the periodic timer and, when
    /// configured, the listener for lights being switched on. Calling it while
    /// already on only repeats the forced update.
    pub fn turn_on(&mut self) -> Result<(), SolarError> {
        self.force_update(None)?;

        if self.is_on() {
            return Ok(());
        }

        let pattern = TimePattern {
            seconds: vec![0, self.config.interval],
        };
        self.tracker = Some(self.host.register_periodic(pattern));
        if self.config.init_on_turn_on {
            self.turn_on_trigger =
                Some(self.host.register_state_transition(&self.config.lights, "off", "on"));
        }
        log::info!("{}: turned on", self.config.name);
        Ok(())
    }

    /// Release the timer and listener. Safe to call when already off.
    pub fn turn_off(&mut self) {
        let was_on = self.is_on();
        if let Some(tracker) = self.tracker.take() {
            self.host.unsubscribe(tracker);
        }
        if let Some(trigger) = self.turn_on_trigger.take() {
            self.host.unsubscribe(trigger);
        }
        if was_on {
            log::info!("{}: turned off", self.config.name);
        }
    }

    /// Dispatch one event. Timer and listener events arriving after
    /// `turn_off` are dropped; service calls are always honoured.
    pub fn handle(&mut self, event: FluxEvent) -> Result<(), SolarError> {
        match event {
            FluxEvent::Tick(now) => {
                if !self.is_on() {
                    log::debug!("{}: dropping tick, switch is off", self.config.name);
                    return Ok(());
                }
                self.update_at(now).map(drop)
            }
            FluxEvent::StateChanged(entity_id) => {
                if self.turn_on_trigger.is_none() {
                    log::debug!("{}: ignoring state change of {entity_id}", self.config.name);
                    return Ok(());
                }
                log::info!("{}: {entity_id} turned on, initializing", self.config.name);
                self.force_update(Some(std::slice::from_ref(&entity_id))).map(drop)
            }
            FluxEvent::Service(call) => match call {
                ServiceCall::Update => self.update().map(drop),
                ServiceCall::ForceUpdate(ids) => self.force_update(ids.as_deref()).map(drop),
                ServiceCall::TurnOn => self.turn_on(),
                ServiceCall::TurnOff => {
                    self.turn_off();
                    Ok(())
                }
                ServiceCall::Status => {
                    let last = self
                        .last_color
                        .map_or_else(|| "none".to_string(), |c| c.to_string());
                    log::info!(
                        "{}: {}, mode {}, last color {last}, lights {:?}",
                        self.config.name,
                        if self.is_on() { "on" } else { "off" },
                        self.config.mode,
                        self.config.lights,
                    );
                    Ok(())
                }
            },
        }
    }
}
