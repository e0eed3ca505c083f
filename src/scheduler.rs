/// tokio-backed scheduler: wall-clock time patterns and state-transition polling.
///
/// Every registration is a spawned task that sends `FluxEvent`s into the
/// switch's dispatch channel. Tasks only hold a weak sender, so they never
/// keep a dispatcher alive on their own; `unsubscribe` aborts the task.

use std::collections::HashMap;

use chrono::{DateTime, Duration, FixedOffset, Local, Timelike};
use tokio::runtime::Handle;
use tokio::sync::mpsc::{UnboundedSender, WeakUnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Duration as TokioDuration, MissedTickBehavior};

use crate::host::{Clock, FluxEvent, Lights, Scheduler, Subscription, TimePattern};

/// Local wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<FixedOffset> {
        Local::now().fixed_offset()
    }
}

impl TimePattern {
    /// First whole second strictly after `after` whose second-of-minute is in
    /// the pattern. None if no listed second can ever match (all >= 60).
    pub fn next_after(&self, after: DateTime<FixedOffset>) -> Option<DateTime<FixedOffset>> {
        let mut candidate = after.with_nanosecond(0)? + Duration::seconds(1);
        for _ in 0..60 {
            if self.seconds.contains(&candidate.second()) {
                return Some(candidate);
            }
            candidate += Duration::seconds(1);
        }
        None
    }
}

pub struct TokioScheduler<L> {
    runtime: Handle,
    lights: L,
    events: WeakUnboundedSender<FluxEvent>,
    poll_interval: TokioDuration,
    tasks: HashMap<u64, JoinHandle<()>>,
    next_id: u64,
}

impl<L> TokioScheduler<L>
where
    L: Lights + Clone + Send + 'static,
{
    pub fn new(
        runtime: Handle,
        lights: L,
        events: &UnboundedSender<FluxEvent>,
        poll_interval: TokioDuration,
    ) -> Self {
        Self {
            runtime,
            lights,
            events: events.downgrade(),
            poll_interval,
            tasks: HashMap::new(),
            next_id: 0,
        }
    }

    fn track(&mut self, task: JoinHandle<()>) -> Subscription {
        self.next_id += 1;
        self.tasks.insert(self.next_id, task);
        Subscription::new(self.next_id)
    }
}

/// Send on a weak channel. False once the dispatcher is gone.
fn emit(events: &WeakUnboundedSender<FluxEvent>, event: FluxEvent) -> bool {
    match events.upgrade() {
        Some(tx) => tx.send(event).is_ok(),
        None => false,
    }
}

async fn run_time_pattern(pattern: TimePattern, events: WeakUnboundedSender<FluxEvent>) {
    loop {
        let now = SystemClock.now();
        let Some(next) = pattern.next_after(now) else {
            log::warn!("Time pattern {:?} never matches, timer stopped", pattern.seconds);
            return;
        };
        sleep((next - now).to_std().unwrap_or_default()).await;
        if !emit(&events, FluxEvent::Tick(SystemClock.now())) {
            return;
        }
    }
}

async fn watch_transitions<L>(
    lights: L,
    entity_ids: Vec<String>,
    from_state: String,
    to_state: String,
    poll_interval: TokioDuration,
    events: WeakUnboundedSender<FluxEvent>,
) where
    L: Lights + Clone + Send + 'static,
{
    let mut ticker = interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_seen: HashMap<String, String> = HashMap::new();

    loop {
        ticker.tick().await;

        let lights = lights.clone();
        let ids = entity_ids.clone();
        let snapshot = tokio::task::spawn_blocking(move || {
            ids.into_iter()
                .map(|id| {
                    let state = lights.state(&id).map(|s| s.state);
                    (id, state)
                })
                .collect::<Vec<_>>()
        })
        .await;
        let snapshot = match snapshot {
            Ok(s) => s,
            Err(e) => {
                log::warn!("State poll failed: {e}");
                continue;
            }
        };

        for (id, state) in snapshot {
            // Unreachable lights keep their last known state.
            let Some(state) = state else { continue };
            let previous = last_seen.insert(id.clone(), state.clone());
            if previous.as_deref() == Some(from_state.as_str()) && state == to_state {
                log::debug!("{id}: {from_state} → {to_state}");
                if !emit(&events, FluxEvent::StateChanged(id)) {
                    return;
                }
            }
        }
    }
}

impl<L> Scheduler for TokioScheduler<L>
where
    L: Lights + Clone + Send + 'static,
{
    fn register_periodic(&mut self, pattern: TimePattern) -> Subscription {
        log::debug!("Registering timer at seconds {:?}", pattern.seconds);
        let task = self.runtime.spawn(run_time_pattern(pattern, self.events.clone()));
        self.track(task)
    }

    fn register_state_transition(
        &mut self,
        entity_ids: &[String],
        from_state: &str,
        to_state: &str,
    ) -> Subscription {
        log::debug!("Watching {entity_ids:?} for {from_state} → {to_state}");
        let task = self.runtime.spawn(watch_transitions(
            self.lights.clone(),
            entity_ids.to_vec(),
            from_state.to_string(),
            to_state.to_string(),
            self.poll_interval,
            self.events.clone(),
        ));
        self.track(task)
    }

    fn unsubscribe(&mut self, subscription: Subscription) {
        if let Some(task) = self.tasks.remove(&subscription.id()) {
            task.abort();
        }
    }
}

impl<L> Drop for TokioScheduler<L> {
    fn drop(&mut self) {
        for (_, task) in self.tasks.drain() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{LightCommand, LightState};
    use chrono::TimeZone;
    use std::sync::{Arc, Mutex};
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    #[derive(Clone, Default)]
    struct FakeLights(Arc<Mutex<HashMap<String, String>>>);

    impl FakeLights {
        fn set(&self, id: &str, state: &str) {
            self.0.lock().unwrap().insert(id.into(), state.into());
        }
    }

    impl Lights for FakeLights {
        fn state(&self, entity_id: &str) -> Option<LightState> {
            let states = self.0.lock().unwrap();
            states.get(entity_id).map(|s| LightState {
                state: s.clone(),
                ..Default::default()
            })
        }

        fn turn_on(&self, _entity_id: &str, _command: &LightCommand) {}
    }

    fn at(h: u32, m: u32, s: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2024, 6, 10, h, m, s)
            .unwrap()
    }

    #[test]
    fn next_match_in_same_minute() {
        let p = TimePattern { seconds: vec![0, 30] };
        assert_eq!(p.next_after(at(12, 0, 10)), Some(at(12, 0, 30)));
        assert_eq!(p.next_after(at(12, 0, 30)), Some(at(12, 1, 0)));
        let just_after = at(12, 0, 29) + Duration::milliseconds(999);
        assert_eq!(p.next_after(just_after), Some(at(12, 0, 30)));
    }

    #[test]
    fn seconds_past_a_minute_never_match() {
        // interval = 180 → only second 0 fires, once per minute.
        let p = TimePattern { seconds: vec![0, 180] };
        assert_eq!(p.next_after(at(23, 59, 45)), Some(at(0, 0, 0) + Duration::days(1)));
        let never = TimePattern { seconds: vec![60, 180] };
        assert_eq!(never.next_after(at(12, 0, 0)), None);
    }

    #[tokio::test]
    async fn transition_poller_reports_off_to_on() {
        let lights = FakeLights::default();
        lights.set("light.a", "off");
        lights.set("light.b", "on");
        let (tx, mut rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(watch_transitions(
            lights.clone(),
            vec!["light.a".into(), "light.b".into()],
            "off".into(),
            "on".into(),
            TokioDuration::from_millis(10),
            tx.downgrade(),
        ));

        sleep(TokioDuration::from_millis(50)).await;
        assert!(rx.try_recv().is_err(), "already-on light must not fire");

        lights.set("light.a", "on");
        let event = timeout(TokioDuration::from_secs(2), rx.recv()).await.unwrap();
        assert_eq!(event, Some(FluxEvent::StateChanged("light.a".into())));
        task.abort();
    }

    #[tokio::test]
    async fn unsubscribe_stops_the_poller() {
        let lights = FakeLights::default();
        lights.set("light.a", "off");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut scheduler =
            TokioScheduler::new(Handle::current(), lights.clone(), &tx, TokioDuration::from_millis(10));

        let sub = scheduler.register_state_transition(&["light.a".to_string()], "off", "on");
        sleep(TokioDuration::from_millis(50)).await;
        scheduler.unsubscribe(sub);
        assert!(scheduler.tasks.is_empty());

        lights.set("light.a", "on");
        sleep(TokioDuration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn dropped_dispatcher_ends_the_task() {
        let lights = FakeLights::default();
        lights.set("light.a", "off");
        let (tx, rx) = mpsc::unbounded_channel();
        let weak = tx.downgrade();
        drop(tx);
        drop(rx);

        let task = tokio::spawn(watch_transitions(
            lights.clone(),
            vec!["light.a".into()],
            "off".into(),
            "on".into(),
            TokioDuration::from_millis(5),
            weak,
        ));
        sleep(TokioDuration::from_millis(20)).await;
        lights.set("light.a", "on");
        timeout(TokioDuration::from_secs(2), task).await.unwrap().unwrap();
    }
}
