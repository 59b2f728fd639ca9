//! Crash countdown state machine.
//!
//! States: `Idle → Armed → {Cancelled, Proceeded} → Idle`. The machine is
//! pure: transitions return the list of [`CrashEffect`]s to execute, and
//! the engine owns the side effects (timers, sinks, grants). This keeps
//! every transition unit-testable without a runtime.
//!
//! Invariants:
//! - at most one session is live; a crash signal while Armed is ignored
//!   entirely (no new countdown, no duplicate alert);
//! - each Armed episode carries a fresh generation id, and ticks from a
//!   stale generation are discarded, so no tick is processed after the
//!   machine returns to Idle;
//! - the extended-execution grant is acquired at Idle→Armed and released
//!   exactly once on leaving Armed.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::types::CrashSnapshot;

/// Countdown length in ticks.
pub const DEFAULT_COUNTDOWN_TICKS: u8 = 10;

/// Number of haptic/audio cue pulses per Armed episode. The cue fires at
/// twice the tick frequency, spanning the same window as the countdown,
/// and self-stops after this many pulses.
pub const CUE_PULSES: u32 = 20;

/// A live crash countdown. Exists only while the machine is Armed.
#[derive(Debug)]
pub struct CrashSession {
    /// Session id, also used to scope the countdown notification.
    pub id: Uuid,
    /// Generation stamped into timer messages for stale-tick discard.
    pub generation: u64,
    /// When the countdown was armed (UTC).
    pub started_at: DateTime<Utc>,
    /// Ticks remaining; starts at the configured count, decrements by
    /// exactly 1 per tick.
    pub remaining_ticks: u8,
    /// The urgent prompt could not be surfaced yet (host backgrounded)
    /// and is owed on foreground resume.
    prompt_pending: bool,
}

/// Side effects requested by a transition, executed in order by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrashEffect {
    /// Acquire the extended-execution grant for the Armed episode.
    AcquireGrant,
    /// Release the extended-execution grant.
    ReleaseGrant,
    /// Request a one-shot device location fix (fire-and-forget).
    RequestDeviceFix,
    /// Start the repeating cue loop for this generation.
    StartCue {
        /// Session generation the cue pulses are stamped with.
        generation: u64,
    },
    /// Start the countdown ticker for this generation.
    StartTicker {
        /// Session generation the ticks are stamped with.
        generation: u64,
    },
    /// Stop the ticker and cue loop immediately.
    StopTimers,
    /// Surface the urgent, user-dismissible prompt.
    ShowPrompt,
    /// Dismiss a still-open prompt.
    DismissPrompt,
    /// Re-issue the session's countdown notification with a new count,
    /// replacing the previous one (stable id, at most one live).
    PostCountdown {
        /// Remaining ticks to display.
        remaining: u8,
    },
    /// Withdraw the countdown notification.
    WithdrawCountdown,
    /// Resolve the best-available location, emit the crash alert and
    /// schedule the emergency-contact follow-ups.
    EmitCrashAlert,
}

/// The crash workflow state machine.
#[derive(Debug)]
pub struct CrashWorkflow {
    session: Option<CrashSession>,
    countdown_ticks: u8,
    next_generation: u64,
}

impl CrashWorkflow {
    /// Create an idle workflow with the given countdown length.
    #[must_use]
    pub const fn new(countdown_ticks: u8) -> Self {
        Self {
            session: None,
            countdown_ticks,
            next_generation: 0,
        }
    }

    /// Whether a countdown is currently running.
    #[must_use]
    pub const fn is_armed(&self) -> bool {
        self.session.is_some()
    }

    /// The live session, if any.
    #[must_use]
    pub const fn session(&self) -> Option<&CrashSession> {
        self.session.as_ref()
    }

    /// Snapshot of the live session for state publication.
    #[must_use]
    pub fn snapshot(&self) -> Option<CrashSnapshot> {
        self.session.as_ref().map(|s| CrashSnapshot {
            session_id: s.id,
            started_at: s.started_at,
            remaining_ticks: s.remaining_ticks,
        })
    }

    /// Idle→Armed on a crash signal.
    ///
    /// Returns no effects when already Armed: repeated triggers are
    /// ignored entirely. `foregrounded` decides whether the urgent prompt
    /// is surfaced now or deferred until foreground resume.
    pub fn trigger(&mut self, now: DateTime<Utc>, foregrounded: bool) -> Vec<CrashEffect> {
        if self.session.is_some() {
            return Vec::new();
        }

        let generation = self.next_generation;
        self.next_generation += 1;
        self.session = Some(CrashSession {
            id: Uuid::new_v4(),
            generation,
            started_at: now,
            remaining_ticks: self.countdown_ticks,
            prompt_pending: !foregrounded,
        });

        let mut effects = vec![
            CrashEffect::AcquireGrant,
            CrashEffect::RequestDeviceFix,
            CrashEffect::StartCue { generation },
            CrashEffect::StartTicker { generation },
        ];
        if foregrounded {
            effects.push(CrashEffect::ShowPrompt);
        }
        effects
    }

    /// One countdown tick. Ticks from a stale generation are discarded,
    /// which makes cancellation effective before any further tick runs.
    pub fn tick(&mut self, generation: u64) -> Vec<CrashEffect> {
        let Some(session) = self.session.as_mut() else {
            return Vec::new();
        };
        if session.generation != generation || session.remaining_ticks == 0 {
            return Vec::new();
        }

        session.remaining_ticks -= 1;
        let remaining = session.remaining_ticks;

        let mut effects = vec![CrashEffect::PostCountdown { remaining }];
        if remaining == 0 {
            effects.extend(self.proceed_effects());
        }
        effects
    }

    /// Armed→Cancelled on explicit user cancel. A no-op when Idle (the
    /// session may already have been torn down by a racing transition).
    pub fn cancel(&mut self) -> Vec<CrashEffect> {
        if self.session.take().is_none() {
            return Vec::new();
        }
        vec![
            CrashEffect::StopTimers,
            CrashEffect::WithdrawCountdown,
            CrashEffect::DismissPrompt,
            CrashEffect::ReleaseGrant,
        ]
    }

    /// Armed→Proceeded on explicit user "proceed now". A no-op when Idle.
    pub fn proceed_now(&mut self) -> Vec<CrashEffect> {
        if self.session.is_none() {
            return Vec::new();
        }
        self.proceed_effects()
    }

    /// Surface a deferred prompt on host foreground resume. The prompt is
    /// owed at most once per session and is not re-sent.
    pub fn foreground_resumed(&mut self) -> Vec<CrashEffect> {
        match self.session.as_mut() {
            Some(session) if session.prompt_pending => {
                session.prompt_pending = false;
                vec![CrashEffect::ShowPrompt]
            }
            _ => Vec::new(),
        }
    }

    fn proceed_effects(&mut self) -> Vec<CrashEffect> {
        self.session = None;
        vec![
            CrashEffect::EmitCrashAlert,
            CrashEffect::DismissPrompt,
            CrashEffect::StopTimers,
            CrashEffect::ReleaseGrant,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn armed_workflow() -> (CrashWorkflow, u64) {
        let mut workflow = CrashWorkflow::new(DEFAULT_COUNTDOWN_TICKS);
        let effects = workflow.trigger(Utc::now(), true);
        let generation = workflow.session().unwrap().generation;
        assert!(effects.contains(&CrashEffect::StartTicker { generation }));
        (workflow, generation)
    }

    #[test]
    fn test_trigger_arms_and_requests_everything() {
        let mut workflow = CrashWorkflow::new(10);
        let effects = workflow.trigger(Utc::now(), true);

        assert!(workflow.is_armed());
        assert_eq!(workflow.session().unwrap().remaining_ticks, 10);
        assert_eq!(
            effects,
            vec![
                CrashEffect::AcquireGrant,
                CrashEffect::RequestDeviceFix,
                CrashEffect::StartCue { generation: 0 },
                CrashEffect::StartTicker { generation: 0 },
                CrashEffect::ShowPrompt,
            ]
        );
    }

    #[test]
    fn test_duplicate_trigger_is_ignored_entirely() {
        let (mut workflow, _) = armed_workflow();
        let session_id = workflow.session().unwrap().id;

        assert!(workflow.trigger(Utc::now(), true).is_empty());
        assert_eq!(workflow.session().unwrap().id, session_id);
    }

    #[test]
    fn test_prompt_deferred_while_backgrounded() {
        let mut workflow = CrashWorkflow::new(10);
        let effects = workflow.trigger(Utc::now(), false);
        assert!(!effects.contains(&CrashEffect::ShowPrompt));

        // Surfaced once on resume, not re-sent.
        assert_eq!(workflow.foreground_resumed(), vec![CrashEffect::ShowPrompt]);
        assert!(workflow.foreground_resumed().is_empty());
    }

    #[test]
    fn test_tick_sequence_counts_down_and_proceeds() {
        let (mut workflow, generation) = armed_workflow();

        let mut posted = Vec::new();
        let mut terminal = Vec::new();
        for _ in 0..10 {
            for effect in workflow.tick(generation) {
                match effect {
                    CrashEffect::PostCountdown { remaining } => posted.push(remaining),
                    other => terminal.push(other),
                }
            }
        }

        assert_eq!(posted, vec![9, 8, 7, 6, 5, 4, 3, 2, 1, 0]);
        assert_eq!(
            terminal,
            vec![
                CrashEffect::EmitCrashAlert,
                CrashEffect::DismissPrompt,
                CrashEffect::StopTimers,
                CrashEffect::ReleaseGrant,
            ]
        );
        assert!(!workflow.is_armed());
    }

    #[test]
    fn test_stale_generation_tick_is_discarded() {
        let (mut workflow, generation) = armed_workflow();
        assert!(workflow.tick(generation + 1).is_empty());
        assert_eq!(workflow.session().unwrap().remaining_ticks, 10);
    }

    #[test]
    fn test_tick_after_cancel_is_a_no_op() {
        let (mut workflow, generation) = armed_workflow();
        let effects = workflow.cancel();
        assert_eq!(
            effects,
            vec![
                CrashEffect::StopTimers,
                CrashEffect::WithdrawCountdown,
                CrashEffect::DismissPrompt,
                CrashEffect::ReleaseGrant,
            ]
        );
        assert!(!workflow.is_armed());
        assert!(workflow.tick(generation).is_empty());
    }

    #[test]
    fn test_cancel_when_idle_is_idempotent() {
        let mut workflow = CrashWorkflow::new(10);
        assert!(workflow.cancel().is_empty());
        assert!(workflow.proceed_now().is_empty());
    }

    #[test]
    fn test_proceed_now_short_circuits_countdown() {
        let (mut workflow, generation) = armed_workflow();
        workflow.tick(generation);
        workflow.tick(generation);

        let effects = workflow.proceed_now();
        assert_eq!(effects[0], CrashEffect::EmitCrashAlert);
        assert!(!workflow.is_armed());

        // The racing auto-proceed path is now a no-op.
        assert!(workflow.tick(generation).is_empty());
        assert!(workflow.proceed_now().is_empty());
    }

    #[test]
    fn test_new_session_gets_fresh_generation() {
        let (mut workflow, first_generation) = armed_workflow();
        workflow.cancel();
        workflow.trigger(Utc::now(), true);
        let second_generation = workflow.session().unwrap().generation;
        assert_ne!(first_generation, second_generation);

        // Ticks from the torn-down session do not touch the new one.
        assert!(workflow.tick(first_generation).is_empty());
        assert_eq!(workflow.session().unwrap().remaining_ticks, 10);
    }

    #[test]
    fn test_snapshot_reflects_session() {
        let (mut workflow, generation) = armed_workflow();
        workflow.tick(generation);
        let snapshot = workflow.snapshot().unwrap();
        assert_eq!(snapshot.remaining_ticks, 9);

        workflow.cancel();
        assert!(workflow.snapshot().is_none());
    }
}
