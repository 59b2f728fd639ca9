//! The single-owner event engine.
//!
//! One tokio task owns every piece of mutable state: the operating mode,
//! the crash workflow, the location resolver, and the guard-disconnection
//! flag. Three producer families feed one mpsc queue — transport frames
//! and link events, countdown/cue timers, and user commands — and the
//! engine drains it strictly in order, so races (for example a cancel
//! against tick-exhaustion auto-proceed) resolve deterministically to
//! whichever command was enqueued first, with the loser degrading to an
//! idempotent no-op.
//!
//! Timers never mutate state directly: ticker and cue tasks send
//! generation-stamped messages back through the queue, and messages from a
//! torn-down session are discarded. Device-fix completions re-enter the
//! same way. Every processed command publishes an immutable
//! [`EngineSnapshot`] over a watch channel.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::VisorConfig;
use crate::crash::{CrashEffect, CrashWorkflow, CUE_PULSES};
use crate::error::{Result, VisorError};
use crate::location::LocationResolver;
use crate::protocol;
use crate::sinks::{Collaborators, ExecutionToken};
use crate::types::{
    Coordinate, DecodedEvent, EngineSnapshot, GpsSample, InboundFrame, LinkEvent, OperatingMode,
    ResolvedLocation,
};

/// Stable notification ids. One crash session is live at a time, so a
/// constant countdown id gives replace-in-place semantics.
const COUNTDOWN_NOTIFICATION_ID: &str = "visor.crash.countdown";
const PROMPT_NOTIFICATION_ID: &str = "visor.crash.prompt";
const HELMET_NOTIFICATION_ID: &str = "visor.guard.helmet-left-behind";
const THEFT_NOTIFICATION_ID: &str = "visor.guard.theft";

/// Commands drained by the engine task, in enqueue order.
#[derive(Debug)]
enum Command {
    /// Raw transport payload; dropped and logged when not valid UTF-8.
    RawFrame(Vec<u8>),
    /// A decoded-ready inbound frame.
    Frame(InboundFrame),
    /// Transport link-state transition.
    Link(LinkEvent),
    /// Explicit user mode selection.
    SetMode(OperatingMode),
    /// User cancels the crash countdown.
    CancelCrash,
    /// User proceeds with the crash alert immediately.
    ProceedCrash,
    /// Countdown tick, stamped with the session generation.
    Tick { generation: u64 },
    /// Cue pulse, stamped with the session generation.
    CuePulse { generation: u64 },
    /// Completion of a one-shot device location fix.
    DeviceFix(Option<Coordinate>),
    /// Host application resumed to the foreground.
    Foregrounded,
    /// Host application was backgrounded.
    Backgrounded,
    /// Stop the engine task.
    Shutdown,
}

/// Cloneable handle for feeding the engine and observing its state.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<Command>,
    snapshot_rx: watch::Receiver<EngineSnapshot>,
}

impl EngineHandle {
    /// Deliver one raw transport notification payload.
    ///
    /// # Errors
    ///
    /// Returns [`VisorError::EngineClosed`] when the engine has stopped.
    pub async fn raw_frame(&self, payload: Vec<u8>) -> Result<()> {
        self.send(Command::RawFrame(payload)).await
    }

    /// Deliver one inbound text frame.
    ///
    /// # Errors
    ///
    /// Returns [`VisorError::EngineClosed`] when the engine has stopped.
    pub async fn frame(&self, text: impl Into<String>) -> Result<()> {
        self.send(Command::Frame(InboundFrame::new(text))).await
    }

    /// Report that the transport link is established.
    ///
    /// # Errors
    ///
    /// Returns [`VisorError::EngineClosed`] when the engine has stopped.
    pub async fn link_established(&self) -> Result<()> {
        self.send(Command::Link(LinkEvent::Established)).await
    }

    /// Report that the transport link dropped.
    ///
    /// # Errors
    ///
    /// Returns [`VisorError::EngineClosed`] when the engine has stopped.
    pub async fn link_lost(&self, reason: Option<String>) -> Result<()> {
        self.send(Command::Link(LinkEvent::Lost { reason })).await
    }

    /// Select the operating mode. The mode is captured now for the guard
    /// disconnection handler and written to the sensor unit.
    ///
    /// # Errors
    ///
    /// Returns [`VisorError::EngineClosed`] when the engine has stopped.
    pub async fn set_mode(&self, mode: OperatingMode) -> Result<()> {
        self.send(Command::SetMode(mode)).await
    }

    /// Cancel an armed crash countdown.
    ///
    /// # Errors
    ///
    /// Returns [`VisorError::EngineClosed`] when the engine has stopped.
    pub async fn cancel_crash(&self) -> Result<()> {
        self.send(Command::CancelCrash).await
    }

    /// Proceed with the crash alert without waiting for the countdown.
    ///
    /// # Errors
    ///
    /// Returns [`VisorError::EngineClosed`] when the engine has stopped.
    pub async fn proceed_crash(&self) -> Result<()> {
        self.send(Command::ProceedCrash).await
    }

    /// Report that the host application resumed to the foreground.
    ///
    /// # Errors
    ///
    /// Returns [`VisorError::EngineClosed`] when the engine has stopped.
    pub async fn foregrounded(&self) -> Result<()> {
        self.send(Command::Foregrounded).await
    }

    /// Report that the host application was backgrounded.
    ///
    /// # Errors
    ///
    /// Returns [`VisorError::EngineClosed`] when the engine has stopped.
    pub async fn backgrounded(&self) -> Result<()> {
        self.send(Command::Backgrounded).await
    }

    /// Stop the engine task.
    ///
    /// # Errors
    ///
    /// Returns [`VisorError::EngineClosed`] when the engine has stopped.
    pub async fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown).await
    }

    /// Subscribe to engine state snapshots.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<EngineSnapshot> {
        self.snapshot_rx.clone()
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| VisorError::EngineClosed)
    }
}

/// The event engine. Construct with [`Engine::new`], then drive it with
/// [`Engine::run`] on a dedicated task.
pub struct Engine {
    config: VisorConfig,
    collaborators: Collaborators,
    rx: mpsc::Receiver<Command>,
    tx: mpsc::Sender<Command>,
    snapshot_tx: watch::Sender<EngineSnapshot>,

    mode: OperatingMode,
    link_up: bool,
    /// Set once the guard handler ran for the current disconnection;
    /// cleared when the link is re-established.
    disconnect_handled: bool,
    foregrounded: bool,
    crash: CrashWorkflow,
    resolver: LocationResolver,
    grant: Option<ExecutionToken>,
    timers: Vec<JoinHandle<()>>,
}

impl Engine {
    /// Create an engine and its handle.
    #[must_use]
    pub fn new(config: VisorConfig, collaborators: Collaborators) -> (Self, EngineHandle) {
        let (tx, rx) = mpsc::channel(64);
        let (snapshot_tx, snapshot_rx) = watch::channel(EngineSnapshot::default());
        let countdown_ticks = config.countdown_ticks;

        let engine = Self {
            config,
            collaborators,
            rx,
            tx: tx.clone(),
            snapshot_tx,
            mode: OperatingMode::Off,
            link_up: false,
            disconnect_handled: false,
            foregrounded: true,
            crash: CrashWorkflow::new(countdown_ticks),
            resolver: LocationResolver::new(),
            grant: None,
            timers: Vec::new(),
        };
        let handle = EngineHandle { tx, snapshot_rx };
        (engine, handle)
    }

    /// Drain the command queue until shutdown.
    pub async fn run(mut self) {
        debug!("engine started");
        while let Some(command) = self.rx.recv().await {
            if matches!(command, Command::Shutdown) {
                break;
            }
            self.handle(command);
            self.publish_snapshot();
        }
        self.stop_timers();
        debug!("engine stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::RawFrame(payload) => match protocol::frame_from_bytes(&payload) {
                Ok(frame) => self.handle_frame(&frame),
                Err(err) => warn!(error = %err, len = payload.len(), "dropping inbound frame"),
            },
            Command::Frame(frame) => self.handle_frame(&frame),
            Command::Link(event) => self.handle_link(event),
            Command::SetMode(mode) => self.handle_set_mode(mode),
            Command::CancelCrash => {
                let effects = self.crash.cancel();
                self.apply(&effects);
            }
            Command::ProceedCrash => {
                let effects = self.crash.proceed_now();
                self.apply(&effects);
            }
            Command::Tick { generation } => {
                let effects = self.crash.tick(generation);
                self.apply(&effects);
            }
            Command::CuePulse { generation } => {
                if self.crash.session().is_some_and(|s| s.generation == generation) {
                    self.collaborators.cue.pulse();
                }
            }
            Command::DeviceFix(coordinate) => {
                if let Some(coordinate) = coordinate {
                    self.resolver.record_device_fix(GpsSample {
                        coordinate,
                        captured_at: Utc::now(),
                    });
                }
            }
            Command::Foregrounded => {
                self.foregrounded = true;
                let effects = self.crash.foreground_resumed();
                self.apply(&effects);
            }
            Command::Backgrounded => self.foregrounded = false,
            Command::Shutdown => unreachable!("handled by the run loop"),
        }
    }

    fn handle_frame(&mut self, frame: &InboundFrame) {
        match protocol::decode(frame, self.mode) {
            DecodedEvent::CrashSignal => {
                info!("crash signal decoded");
                let effects = self.crash.trigger(Utc::now(), self.foregrounded);
                if effects.is_empty() {
                    debug!("crash signal ignored, countdown already armed");
                }
                self.apply(&effects);
            }
            DecodedEvent::TheftSignal { raw } => self.handle_theft(&raw, frame),
            DecodedEvent::Gps(sample) => {
                self.resolver
                    .record_link_sample(sample, self.mode == OperatingMode::Guard);
            }
            DecodedEvent::Unrecognized => {
                // Dropped, but retained verbatim in the diagnostic log.
                debug!(frame = %frame.text, "unrecognized frame dropped");
            }
        }
    }

    fn handle_link(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Established => {
                self.link_up = true;
                self.disconnect_handled = false;
                info!("transport link established");
            }
            LinkEvent::Lost { reason } => {
                self.link_up = false;
                info!(reason = reason.as_deref().unwrap_or("unknown"), "transport link lost");
                if self.disconnect_handled {
                    return;
                }
                self.disconnect_handled = true;
                // The mode captured at the last explicit selection decides
                // whether this disconnection is a loss event.
                if self.mode == OperatingMode::Guard {
                    self.emit_helmet_left_behind();
                }
            }
        }
    }

    fn handle_set_mode(&mut self, mode: OperatingMode) {
        self.mode = mode;
        info!(mode = mode.wire_token(), "operating mode selected");
        let payload = protocol::mode_command(mode, self.config.max_write_len);
        if let Err(err) = self.collaborators.transport.send(&payload) {
            // Non-fatal status; never tears down an in-progress session.
            warn!(error = %err, "failed to write mode command");
        }
    }

    fn handle_theft(&mut self, raw: &str, frame: &InboundFrame) {
        let embedded = protocol::extract_coordinate(raw);
        if let Some(coordinate) = embedded {
            // An embedded coordinate is a decoded sample like any other.
            self.resolver.record_link_sample(
                GpsSample {
                    coordinate,
                    captured_at: frame.received_at,
                },
                self.mode == OperatingMode::Guard,
            );
        }

        let location = embedded
            .map(|c| ResolvedLocation::fix(c, "embedded in theft message"))
            .or_else(|| {
                self.resolver
                    .last_guard()
                    .map(|s| ResolvedLocation::fix(s.coordinate, "last guard-mode location"))
            })
            .or_else(|| {
                self.resolver
                    .last_link()
                    .map(|s| ResolvedLocation::fix(s.coordinate, "last decoded GPS sample"))
            })
            .unwrap_or_else(ResolvedLocation::unavailable);

        let body = if location.is_placeholder() {
            "Possible theft signal received from your helmet".to_string()
        } else {
            let coordinate = location.coordinate_or_origin();
            format!(
                "Possible theft near {:.4}, {:.4}",
                coordinate.latitude, coordinate.longitude
            )
        };
        let detail = format!("theft signal: {raw}");

        warn!(%raw, "theft signal decoded");
        self.collaborators
            .alerts
            .submit(crate::types::AlertRecord::possible_theft(location, detail));
        self.collaborators.notifications.post_or_replace(
            THEFT_NOTIFICATION_ID,
            "Possible theft",
            &body,
            false,
        );
    }

    fn emit_helmet_left_behind(&mut self) {
        let (location, detail) = self.resolver.best().map_or_else(
            || {
                (
                    ResolvedLocation::unavailable(),
                    "link lost in guard mode; no GPS data received",
                )
            },
            |sample| {
                (
                    ResolvedLocation::fix(sample.coordinate, "last known GPS fix"),
                    "link lost in guard mode; using last known GPS fix",
                )
            },
        );

        let body = if location.is_placeholder() {
            "Your helmet disconnected while guarded".to_string()
        } else {
            let coordinate = location.coordinate_or_origin();
            format!(
                "Your helmet disconnected while guarded, last seen near {:.4}, {:.4}",
                coordinate.latitude, coordinate.longitude
            )
        };

        warn!(detail, "guard-mode disconnection");
        self.collaborators.alerts.submit(
            crate::types::AlertRecord::helmet_left_behind(location, detail),
        );
        self.collaborators.notifications.post_or_replace(
            HELMET_NOTIFICATION_ID,
            "Helmet left behind?",
            &body,
            false,
        );
    }

    fn apply(&mut self, effects: &[CrashEffect]) {
        for effect in effects {
            match effect {
                CrashEffect::AcquireGrant => {
                    if self.grant.is_none() {
                        self.grant = Some(self.collaborators.execution.acquire());
                    }
                }
                CrashEffect::ReleaseGrant => {
                    if let Some(token) = self.grant.take() {
                        self.collaborators.execution.release(token);
                    }
                }
                CrashEffect::RequestDeviceFix => self.request_device_fix(),
                CrashEffect::StartCue { generation } => self.start_cue(*generation),
                CrashEffect::StartTicker { generation } => self.start_ticker(*generation),
                CrashEffect::StopTimers => self.stop_timers(),
                CrashEffect::ShowPrompt => {
                    self.collaborators.notifications.post_or_replace(
                        PROMPT_NOTIFICATION_ID,
                        "Crash detected",
                        "Are you OK? Cancel if this is a false alarm.",
                        true,
                    );
                }
                CrashEffect::DismissPrompt => {
                    self.collaborators.notifications.withdraw(PROMPT_NOTIFICATION_ID);
                }
                CrashEffect::PostCountdown { remaining } => {
                    self.collaborators.notifications.post_or_replace(
                        COUNTDOWN_NOTIFICATION_ID,
                        "Crash detected",
                        &format!("Emergency alert in {remaining}"),
                        true,
                    );
                }
                CrashEffect::WithdrawCountdown => {
                    self.collaborators
                        .notifications
                        .withdraw(COUNTDOWN_NOTIFICATION_ID);
                }
                CrashEffect::EmitCrashAlert => self.emit_crash_alert(),
            }
        }
    }

    fn request_device_fix(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.collaborators.location.request_fix(reply_tx);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            if let Ok(coordinate) = reply_rx.await {
                let _ = tx.send(Command::DeviceFix(coordinate)).await;
            }
        });
    }

    fn start_ticker(&mut self, generation: u64) {
        let tx = self.tx.clone();
        let period = self.config.tick_period();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await; // the first interval tick is immediate
            loop {
                ticker.tick().await;
                if tx.send(Command::Tick { generation }).await.is_err() {
                    break;
                }
            }
        });
        self.timers.push(handle);
    }

    fn start_cue(&mut self, generation: u64) {
        let tx = self.tx.clone();
        let period = self.config.cue_period();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            // Self-stops after the fixed pulse budget.
            for _ in 0..CUE_PULSES {
                ticker.tick().await;
                if tx.send(Command::CuePulse { generation }).await.is_err() {
                    break;
                }
            }
        });
        self.timers.push(handle);
    }

    fn stop_timers(&mut self) {
        for handle in self.timers.drain(..) {
            handle.abort();
        }
    }

    fn emit_crash_alert(&mut self) {
        let location = self.resolver.best().map_or_else(
            ResolvedLocation::unavailable,
            |sample| ResolvedLocation::fix(sample.coordinate, "best available fix"),
        );
        let detail = if location.is_placeholder() {
            "crash detected; no location fix available"
        } else {
            "crash detected"
        };

        let alert = crate::types::AlertRecord::crash_detected(location.clone(), detail);
        let created_at = alert.created_at;
        warn!(alert_id = %alert.id, "crash alert emitted");
        self.collaborators.alerts.submit(alert);

        // Emergency follow-ups run on their own task after fixed delays;
        // they no longer feed back into engine state.
        let contact = Arc::clone(&self.collaborators.contact);
        let caller = Arc::clone(&self.collaborators.caller);
        let phone = self.config.emergency_contact.clone();
        let auto_call = self.config.auto_call_emergency;
        let number = self.config.emergency_number.clone();
        let contact_delay = self.config.contact_delay();
        let call_delay = self.config.auto_call_delay();

        let stamp = created_at
            .with_timezone(&self.config.timezone)
            .format("%Y-%m-%d %H:%M:%S %Z")
            .to_string();
        let message = if location.is_placeholder() {
            format!("Crash detected at {stamp}. Location unavailable.")
        } else {
            let coordinate = location.coordinate_or_origin();
            format!(
                "Crash detected at {stamp}. Location: {:.4}, {:.4}",
                coordinate.latitude, coordinate.longitude
            )
        };

        tokio::spawn(async move {
            tokio::time::sleep(contact_delay).await;
            if let Some(phone) = phone {
                contact.notify(&phone, &message);
            }
            if auto_call {
                tokio::time::sleep(call_delay).await;
                caller.dial(&number);
            }
        });
    }

    fn publish_snapshot(&self) {
        let snapshot = EngineSnapshot {
            mode: self.mode,
            link_up: self.link_up,
            crash: self.crash.snapshot(),
        };
        self.snapshot_tx.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }
}
