use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::client::MygrenClient;
use crate::modes::{self, HvacAction, HvacMode};
use crate::overlay::WriteOverlay;
use crate::protocol::{ControlKey, wire_bool};
use crate::telemetry::Snapshot;
use crate::{Error, Result};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Consecutive poll failures before the pump is reported unavailable.
const AVAILABILITY_THRESHOLD: u32 = 3;

/// What subscribers see: the latest good telemetry with pending writes
/// layered in, plus availability bookkeeping. The last good snapshot is
/// kept through an outage; `available` tells hosts not to trust it.
#[derive(Debug, Clone, Default)]
pub struct PumpState {
    pub telemetry: Option<Arc<Snapshot>>,
    pub available: bool,
    pub consecutive_failures: u32,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl PumpState {
    pub fn snapshot(&self) -> Option<&Snapshot> {
        self.telemetry.as_deref()
    }

    pub fn mode(&self) -> Option<HvacMode> {
        self.telemetry.as_deref().map(modes::current_mode)
    }

    pub fn action(&self) -> Option<HvacAction> {
        self.telemetry.as_deref().map(modes::current_action)
    }

    pub fn selectable_modes(&self) -> Vec<HvacMode> {
        self.telemetry
            .as_deref()
            .map(modes::selectable_modes)
            .unwrap_or_default()
    }
}

pub struct CoordinatorBuilder {
    client: MygrenClient,
    poll_interval: Duration,
}

impl CoordinatorBuilder {
    pub fn new(client: MygrenClient) -> Self {
        Self {
            client,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Spawn the poll task and hand back the shared handle. The first
    /// poll runs immediately. Must be called from within a tokio
    /// runtime.
    pub fn start(self) -> Coordinator {
        let (state_tx, _) = watch::channel(PumpState::default());
        let (refresh_tx, refresh_rx) = watch::channel(0u32);

        let inner = Arc::new(Inner {
            client: self.client,
            state_tx,
            refresh_tx,
            cancel: CancellationToken::new(),
            shared: Mutex::new(Shared {
                snapshot: None,
                overlay: WriteOverlay::new(),
                consecutive_failures: 0,
                last_success: None,
                last_error: None,
                warned_programs: HashSet::new(),
            }),
            task: Mutex::new(None),
        });

        let task = tokio::spawn(poll_task(inner.clone(), refresh_rx, self.poll_interval));
        *inner.task.lock().expect("task mutex poisoned") = Some(task);

        Coordinator { inner }
    }
}

/// Shared poller for one heat pump.
///
/// One background task fetches telemetry on a fixed cadence and fans the
/// resulting [`PumpState`] out to any number of subscribers. Writes go
/// through the optimistic overlay, so their effect is visible before the
/// device round-trip completes. Cheaply cloneable.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

struct Inner {
    client: MygrenClient,
    state_tx: watch::Sender<PumpState>,
    refresh_tx: watch::Sender<u32>,
    cancel: CancellationToken,
    shared: Mutex<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

struct Shared {
    snapshot: Option<Arc<Snapshot>>,
    overlay: WriteOverlay,
    consecutive_failures: u32,
    last_success: Option<DateTime<Utc>>,
    last_error: Option<String>,
    warned_programs: HashSet<String>,
}

impl Inner {
    /// Rebuild the published state from the shared fields. Caller holds
    /// the lock.
    fn publish(&self, shared: &Shared) {
        let telemetry = shared
            .snapshot
            .as_ref()
            .map(|snapshot| Arc::new(shared.overlay.merge(snapshot)));
        let state = PumpState {
            telemetry,
            available: shared.last_success.is_some()
                && shared.consecutive_failures < AVAILABILITY_THRESHOLD,
            consecutive_failures: shared.consecutive_failures,
            last_success: shared.last_success,
            last_error: shared.last_error.clone(),
        };
        let _ = self.state_tx.send_replace(state);
    }
}

impl Coordinator {
    pub fn builder(client: MygrenClient) -> CoordinatorBuilder {
        CoordinatorBuilder::new(client)
    }

    /// Current published state.
    pub fn state(&self) -> PumpState {
        self.inner.state_tx.borrow().clone()
    }

    /// Watch stream of published states. Dropping the receiver detaches
    /// the subscriber; the poll cadence does not change either way.
    pub fn subscribe(&self) -> watch::Receiver<PumpState> {
        self.inner.state_tx.subscribe()
    }

    pub fn client(&self) -> &MygrenClient {
        &self.inner.client
    }

    /// Ask the poll task for an immediate refresh without waiting for
    /// the result. Requests arriving while a poll is already on the wire
    /// collapse into it.
    pub fn request_refresh(&self) {
        self.inner.refresh_tx.send_modify(|n| *n = n.wrapping_add(1));
    }

    /// Force a refresh and wait for the state published by the poll that
    /// answers it.
    pub async fn refresh(&self) -> Result<PumpState> {
        if self.inner.cancel.is_cancelled() {
            return Err(Error::Detached);
        }
        let mut state_rx = self.inner.state_tx.subscribe();
        self.request_refresh();
        tokio::select! {
            _ = self.inner.cancel.cancelled() => Err(Error::Detached),
            changed = state_rx.changed() => {
                changed.map_err(|_| Error::Detached)?;
                let state = state_rx.borrow().clone();
                Ok(state)
            }
        }
    }

    /// Stop the poll task and wait for it to exit. A poll already on the
    /// wire finishes or times out, but its result is not published.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let task = self.inner.task.lock().expect("task mutex poisoned").take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                warn!(error = %err, "poll task join failed");
            }
        }
        debug!("coordinator stopped");
    }

    // -- Control writes --

    /// Write one controllable leaf.
    ///
    /// The new value is visible to subscribers before the network call
    /// resolves; the device has the final word through the confirmation
    /// cycle. A rejected write is rolled back before the error returns.
    pub async fn write(&self, key: ControlKey, value: Value) -> Result<()> {
        if self.inner.cancel.is_cancelled() {
            return Err(Error::Detached);
        }

        let telemetry_key = key.telemetry_key();
        {
            let mut shared = self.inner.shared.lock().expect("state mutex poisoned");
            shared.overlay.apply(telemetry_key, value.clone());
            self.inner.publish(&shared);
        }

        match self.inner.client.put_control(key, value).await {
            Ok(_) => {
                self.request_refresh();
                Ok(())
            }
            Err(err) => {
                let mut shared = self.inner.shared.lock().expect("state mutex poisoned");
                shared.overlay.revert(telemetry_key);
                self.inner.publish(&shared);
                Err(err)
            }
        }
    }

    /// Change the HVAC mode by switching to the first available program
    /// that realizes it. Exactly one write goes out; modes the device
    /// does not currently offer are rejected.
    pub async fn set_mode(&self, mode: HvacMode) -> Result<()> {
        let program = {
            let shared = self.inner.shared.lock().expect("state mutex poisoned");
            let snapshot = shared.snapshot.as_ref().ok_or(Error::UnsupportedMode(mode))?;
            modes::program_for_mode(snapshot, mode)
                .map(str::to_string)
                .ok_or(Error::UnsupportedMode(mode))?
        };
        debug!(mode = %mode, program = %program, "changing mode");
        self.write(ControlKey::Program, Value::from(program)).await
    }

    /// Switch the running program directly. The identifier must be in
    /// the device's current capability list.
    pub async fn set_program(&self, program: &str) -> Result<()> {
        let offered = {
            let shared = self.inner.shared.lock().expect("state mutex poisoned");
            shared
                .snapshot
                .as_ref()
                .is_some_and(|s| s.available_programs().iter().any(|p| p == program))
        };
        if !offered {
            return Err(Error::UnknownProgram(program.to_string()));
        }
        self.write(ControlKey::Program, Value::from(program)).await
    }

    pub async fn set_hot_water_target(&self, celsius: i64) -> Result<()> {
        self.write(ControlKey::HotWaterTarget, Value::from(celsius))
            .await
    }

    pub async fn set_hot_water_enabled(&self, on: bool) -> Result<()> {
        self.write(ControlKey::HotWaterEnabled, wire_bool(on)).await
    }

    pub async fn set_hot_water_scheduler_enabled(&self, on: bool) -> Result<()> {
        self.write(ControlKey::HotWaterSchedulerEnabled, wire_bool(on))
            .await
    }

    /// Set the equithermal curve number (1-9).
    pub async fn set_heating_curve(&self, curve: i64) -> Result<()> {
        self.write(ControlKey::HeatingCurve, Value::from(curve)).await
    }

    /// Set the equithermal curve shift (-5 to +5).
    pub async fn set_curve_shift(&self, shift: i64) -> Result<()> {
        self.write(ControlKey::CurveShift, Value::from(shift)).await
    }

    /// Set the manual program output temperature.
    pub async fn set_manual_temperature(&self, celsius: i64) -> Result<()> {
        self.write(ControlKey::ManualTemperature, Value::from(celsius))
            .await
    }

    /// Set the comfort (interior target) temperature.
    pub async fn set_comfort_temperature(&self, celsius: i64) -> Result<()> {
        self.write(ControlKey::ComfortTemperature, Value::from(celsius))
            .await
    }

    pub async fn set_program_scheduler_enabled(&self, on: bool) -> Result<()> {
        self.write(ControlKey::ProgramSchedulerEnabled, wire_bool(on))
            .await
    }

    pub async fn set_heat_pump_enabled(&self, on: bool) -> Result<()> {
        self.write(ControlKey::HeatPumpEnabled, wire_bool(on)).await
    }

    pub async fn set_tariff_watch(&self, on: bool) -> Result<()> {
        self.write(ControlKey::TariffWatch, wire_bool(on)).await
    }
}

async fn poll_task(
    inner: Arc<Inner>,
    mut refresh_rx: watch::Receiver<u32>,
    poll_interval: Duration,
) {
    let mut interval = tokio::time::interval(poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = inner.cancel.cancelled() => break,
            _ = refresh_rx.changed() => {}
            _ = interval.tick() => {}
        }

        poll_once(&inner).await;

        // Refreshes that raced in while the poll was on the wire were
        // answered by it; mark them seen so they do not fire again.
        refresh_rx.borrow_and_update();
    }

    debug!("poll task exited");
}

async fn poll_once(inner: &Inner) {
    debug!("polling telemetry");
    let result = inner.client.telemetry().await.and_then(Snapshot::parse);

    // A poll that lost the teardown race must not publish.
    if inner.cancel.is_cancelled() {
        return;
    }

    match result {
        Ok(snapshot) => {
            let mut shared = inner.shared.lock().expect("state mutex poisoned");
            shared.overlay.reconcile(&snapshot);
            warn_unmapped(&mut shared.warned_programs, &snapshot);
            shared.snapshot = Some(Arc::new(snapshot));
            shared.consecutive_failures = 0;
            shared.last_success = Some(Utc::now());
            shared.last_error = None;
            inner.publish(&shared);
        }
        Err(err) => {
            let mut shared = inner.shared.lock().expect("state mutex poisoned");
            shared.consecutive_failures += 1;
            shared.last_error = Some(err.to_string());
            if shared.consecutive_failures == AVAILABILITY_THRESHOLD {
                warn!(
                    error = %err,
                    failures = shared.consecutive_failures,
                    "pump marked unavailable"
                );
            } else {
                debug!(
                    error = %err,
                    failures = shared.consecutive_failures,
                    "poll failed"
                );
            }
            inner.publish(&shared);
        }
    }
}

fn warn_unmapped(warned: &mut HashSet<String>, snapshot: &Snapshot) {
    for program in modes::unmapped_programs(snapshot) {
        if warned.insert(program.to_string()) {
            warn!(program = %program, "program has no mode mapping, ignoring");
        }
    }
}
