use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, FixedOffset, NaiveDate};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::Duration;

use fluxpp::command::{self, ServiceCall};
use fluxpp::config::{self, Config};
use fluxpp::hass::HassClient;
use fluxpp::host::{
    Clock, FluxEvent, Host, LightCommand, LightState, Lights, Scheduler, SolarError, SolarEvent,
    SolarEvents, Subscription, TimePattern,
};
use fluxpp::scheduler::{SystemClock, TokioScheduler};
use fluxpp::switch::FluxSwitch;

/// Home Assistant for devices and the sun, tokio for timers, local clock.
struct DaemonHost {
    hass: HassClient,
    scheduler: TokioScheduler<HassClient>,
}

impl Lights for DaemonHost {
    fn state(&self, entity_id: &str) -> Option<LightState> {
        self.hass.state(entity_id)
    }

    fn turn_on(&self, entity_id: &str, command: &LightCommand) {
        self.hass.turn_on(entity_id, command)
    }
}

impl SolarEvents for DaemonHost {
    fn event_date(
        &self,
        event: SolarEvent,
        date: NaiveDate,
    ) -> Result<DateTime<FixedOffset>, SolarError> {
        self.hass.event_date(event, date)
    }
}

impl Scheduler for DaemonHost {
    fn register_periodic(&mut self, pattern: TimePattern) -> Subscription {
        self.scheduler.register_periodic(pattern)
    }

    fn register_state_transition(
        &mut self,
        entity_ids: &[String],
        from_state: &str,
        to_state: &str,
    ) -> Subscription {
        self.scheduler
            .register_state_transition(entity_ids, from_state, to_state)
    }

    fn unsubscribe(&mut self, subscription: Subscription) {
        self.scheduler.unsubscribe(subscription)
    }
}

impl Clock for DaemonHost {
    fn now(&self) -> DateTime<FixedOffset> {
        SystemClock.now()
    }
}

/// Runs on a blocking thread: every call into a switch goes through here,
/// one event at a time. Returns once all strong senders are dropped.
fn run_dispatcher<H: Host>(mut switch: FluxSwitch<H>, mut events: UnboundedReceiver<FluxEvent>) {
    while let Some(event) = events.blocking_recv() {
        if let Err(e) = switch.handle(event) {
            log::error!("{}: {e}", switch.name());
        }
    }
    switch.turn_off();
    log::debug!("{}: dispatcher stopped", switch.name());
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    log::info!("fluxpp v{} starting...", env!("CARGO_PKG_VERSION"));

    let path = PathBuf::from(config::config_file_path());
    let cfg = match Config::load(&path) {
        Ok(cfg) => cfg,
        Err(e) => {
            log::error!("Config error: {e}");
            std::process::exit(1);
        }
    };
    let switch_cfgs = match cfg.switch_configs() {
        Ok(s) => s,
        Err(e) => {
            log::error!("Config error: {e}");
            std::process::exit(1);
        }
    };
    log::info!("Home Assistant at {}", cfg.hass.url);

    let hass = HassClient::new(&cfg.hass);
    let poll_interval = Duration::from_secs(cfg.hass.poll_interval_s.max(1));
    let runtime = tokio::runtime::Handle::current();

    let mut senders: HashMap<String, UnboundedSender<FluxEvent>> = HashMap::new();
    let mut dispatchers = Vec::new();
    for switch_cfg in switch_cfgs {
        let slug = command::slugify(&switch_cfg.name);
        let (tx, rx) = mpsc::unbounded_channel();
        let host = DaemonHost {
            hass: hass.clone(),
            scheduler: TokioScheduler::new(runtime.clone(), hass.clone(), &tx, poll_interval),
        };
        log::info!(
            "Switch {} ({} lights, mode {}): services {slug}_update, {slug}_force_update",
            switch_cfg.name,
            switch_cfg.lights.len(),
            switch_cfg.mode,
        );
        let switch = FluxSwitch::new(switch_cfg, host);
        dispatchers.push(tokio::task::spawn_blocking(move || run_dispatcher(switch, rx)));

        let _ = tx.send(FluxEvent::Service(ServiceCall::TurnOn));
        senders.insert(slug, tx);
    }

    let mut slugs: Vec<String> = senders.keys().cloned().collect();
    slugs.sort();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match command::parse(&line, &slugs) {
                        Some(cmd) => {
                            if let Some(tx) = senders.get(&cmd.switch) {
                                log::debug!("Service call {cmd:?}");
                                let _ = tx.send(FluxEvent::Service(cmd.call));
                            }
                        }
                        None => log::warn!("Unknown command {:?}. Services: {}", line.trim(), slugs
                            .iter()
                            .map(|s| format!("{s}_{{update,force_update,turn_on,turn_off,status}}"))
                            .collect::<Vec<_>>()
                            .join(", ")),
                    }
                }
                Ok(None) => {
                    log::debug!("Console closed, running until interrupted");
                    stdin_open = false;
                }
                Err(e) => {
                    log::warn!("Console read failed: {e}");
                    stdin_open = false;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                log::info!("Interrupted, shutting down");
                break;
            }
        }
    }

    for tx in senders.values() {
        let _ = tx.send(FluxEvent::Service(ServiceCall::TurnOff));
    }
    drop(senders);
    for dispatcher in dispatchers {
        if let Err(e) = dispatcher.await {
            log::error!("Dispatcher panicked: {e}");
        }
    }
    log::info!("Stopped");
}
