/// Home Assistant REST adapter: light state/commands and sunrise/sunset.
///
///   GET  /api/states/<entity_id>        → light state, sun.sun attributes
///   POST /api/services/light/turn_on    → color command
///
/// Calls are blocking (ureq). Failures are logged and reported to the switch
/// as "light not on" / "no state"; only solar lookups surface as errors.

use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, FixedOffset, Local, NaiveDate};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::color::{LightColor, Rgb};
use crate::config::HassConfig;
use crate::host::{LightCommand, LightState, Lights, SolarError, SolarEvent, SolarEvents};

const SUN_ENTITY: &str = "sun.sun";

#[derive(Debug)]
pub enum HassError {
    Http(ureq::Error),
    Decode(String),
}

impl std::fmt::Display for HassError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HassError::Http(e) => write!(f, "request failed: {e}"),
            HassError::Decode(msg) => write!(f, "unexpected response: {msg}"),
        }
    }
}

impl std::error::Error for HassError {}

impl From<ureq::Error> for HassError {
    fn from(e: ureq::Error) -> Self {
        HassError::Http(e)
    }
}

/// `/api/states/<entity_id>` response body (the parts we read).
#[derive(Debug, Clone, Deserialize)]
pub struct EntityState {
    pub entity_id: String,
    pub state: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

#[derive(Clone)]
pub struct HassClient {
    agent: ureq::Agent,
    base_url: String,
    token: String,
}

impl HassClient {
    pub fn new(config: &HassConfig) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(StdDuration::from_secs(config.timeout_s)))
            .build()
            .into();
        Self {
            agent,
            base_url: config.url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        }
    }

    fn auth(&self) -> String {
        format!("Bearer {}", self.token)
    }

    pub fn entity_state(&self, entity_id: &str) -> Result<EntityState, HassError> {
        let url = format!("{}/api/states/{entity_id}", self.base_url);
        let body: String = self
            .agent
            .get(&url)
            .header("Authorization", self.auth())
            .header("Accept", "application/json")
            .call()?
            .body_mut()
            .read_to_string()?;
        serde_json::from_str(&body).map_err(|e| HassError::Decode(format!("{entity_id}: {e}")))
    }

    pub fn call_service(&self, domain: &str, service: &str, data: &Value) -> Result<(), HassError> {
        let url = format!("{}/api/services/{domain}/{service}", self.base_url);
        self.agent
            .post(&url)
            .header("Authorization", self.auth())
            .header("Content-Type", "application/json")
            .send(data.to_string())?;
        Ok(())
    }
}

fn number_list(value: Option<&Value>) -> Option<Vec<f64>> {
    value?.as_array()?.iter().map(Value::as_f64).collect()
}

/// Pull the color attributes we compare against out of an entity state.
pub fn light_state_from(entity: &EntityState) -> LightState {
    let attrs = &entity.attributes;
    let xy_color = number_list(attrs.get("xy_color")).and_then(|v| match v[..] {
        [x, y] => Some((x, y)),
        _ => None,
    });
    let color_temp = attrs
        .get("color_temp")
        .and_then(Value::as_f64)
        .map(|m| m.round() as u32);
    let rgb_color = number_list(attrs.get("rgb_color")).and_then(|v| match v[..] {
        [r, g, b] => Some(Rgb {
            r: r.clamp(0.0, 255.0) as u8,
            g: g.clamp(0.0, 255.0) as u8,
            b: b.clamp(0.0, 255.0) as u8,
        }),
        _ => None,
    });
    LightState {
        state: entity.state.clone(),
        xy_color,
        color_temp,
        rgb_color,
    }
}

/// JSON body for `light.turn_on`.
pub fn turn_on_body(entity_id: &str, command: &LightCommand) -> Value {
    let mut body = json!({ "entity_id": entity_id });
    match command.color {
        LightColor::Xy(x, y) => body["xy_color"] = json!([x, y]),
        LightColor::Mired(m) => body["color_temp"] = json!(m),
        LightColor::Rgb(rgb) => body["rgb_color"] = json!([rgb.r, rgb.g, rgb.b]),
    }
    if let Some(brightness) = command.brightness {
        body["brightness"] = json!(brightness);
    }
    if let Some(transition) = command.transition {
        body["transition"] = json!(transition);
    }
    body
}

/// Move an event time by whole days so it falls on `date`. Sunrise and
/// sunset drift by a few minutes a day, which is close enough here.
pub fn shift_to_date(event: DateTime<FixedOffset>, date: NaiveDate) -> DateTime<FixedOffset> {
    let days = (date - event.date_naive()).num_days();
    event + Duration::days(days)
}

/// Read `next_rising` / `next_setting` from a `sun.sun` state, in local time.
pub fn sun_event(entity: &EntityState, event: SolarEvent) -> Result<DateTime<FixedOffset>, String> {
    let key = match event {
        SolarEvent::Sunrise => "next_rising",
        SolarEvent::Sunset => "next_setting",
    };
    let raw = entity
        .attributes
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| format!("{} has no {key}", entity.entity_id))?;
    let parsed = DateTime::parse_from_rfc3339(raw).map_err(|e| format!("{key} {raw:?}: {e}"))?;
    Ok(parsed.with_timezone(&Local).fixed_offset())
}

impl Lights for HassClient {
    fn state(&self, entity_id: &str) -> Option<LightState> {
        match self.entity_state(entity_id) {
            Ok(entity) => Some(light_state_from(&entity)),
            Err(e) => {
                log::warn!("Could not read {entity_id}: {e}");
                None
            }
        }
    }

    fn turn_on(&self, entity_id: &str, command: &LightCommand) {
        let body = turn_on_body(entity_id, command);
        log::debug!("light.turn_on {body}");
        if let Err(e) = self.call_service("light", "turn_on", &body) {
            log::warn!("Could not update {entity_id}: {e}");
        }
    }
}

impl SolarEvents for HassClient {
    fn event_date(
        &self,
        event: SolarEvent,
        date: NaiveDate,
    ) -> Result<DateTime<FixedOffset>, SolarError> {
        let fail = |reason: String| SolarError { event, date, reason };
        let sun = self
            .entity_state(SUN_ENTITY)
            .map_err(|e| fail(e.to_string()))?;
        let next = sun_event(&sun, event).map_err(fail)?;
        Ok(shift_to_date(next, date))
    }
}
