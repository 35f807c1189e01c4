//! The task-progression engine.
//!
//! Wires the screen sensor and the instruction generator into one ordered
//! instruction stream. All session state lives behind a mutex in
//! [`Session`]; the async flows take the lock only for atomic transitions
//! and never hold it across an await. Consumers observe the session
//! through a watch channel of [`SessionSnapshot`]s and drive it with the
//! intent methods (`start`, `next`, `refresh`, `ask`, `revise`,
//! `return_to`, `reset`).

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use image::RgbaImage;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::state::{
    ChangeDecision, CheckSettlement, CheckTicket, GENERATION_BUDGET, Preview, Session,
    SessionSnapshot,
};
use crate::classify::classify;
use crate::config::Settings;
use crate::coords::{Coordinate, parse_coordinates};
use crate::frame::{Frame, FramePair};
use crate::generator::{CheckRequest, HelpRequest, InstructionSource, LocateRequest, StepRequest};
use crate::sensor::ScreenSensor;
use crate::snapshot::{self, SnapshotOptions};

/// Grace window after a rewind during which change events are ignored, so
/// the rewind's own visual change is not reconciled.
const REWIND_GRACE: Duration = Duration::from_secs(2);

struct Inner {
    session: Mutex<Session>,
    source: Arc<dyn InstructionSource>,
    sensor: Arc<dyn ScreenSensor>,
    snapshots: watch::Sender<SessionSnapshot>,
    os_name: String,
    snapshot_options: SnapshotOptions,
    cursor: RgbaImage,
}

impl Inner {
    fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self) {
        // Send while still holding the session lock so two publishes
        // cannot reorder and leave the channel on the older snapshot.
        let session = self.session();
        self.snapshots.send_replace(session.snapshot());
    }
}

/// Clears an in-flight flag on every exit path of a flow.
struct FlowGuard {
    inner: Arc<Inner>,
    clear: fn(&mut Session),
}

impl FlowGuard {
    fn generating(inner: &Arc<Inner>) -> Self {
        Self {
            inner: Arc::clone(inner),
            clear: Session::finish_generation,
        }
    }

    fn answering(inner: &Arc<Inner>) -> Self {
        Self {
            inner: Arc::clone(inner),
            clear: Session::end_follow_up,
        }
    }
}

impl Drop for FlowGuard {
    fn drop(&mut self) {
        (self.clear)(&mut self.inner.session());
        self.inner.publish();
    }
}

/// Orchestrates the sensor and the generator into a strictly ordered
/// instruction sequence for one goal.
#[derive(Clone)]
pub struct TaskEngine {
    inner: Arc<Inner>,
}

impl TaskEngine {
    /// Build an engine over a generator and a sensor. The pointer glyph
    /// for previews is loaded once here.
    pub async fn new(
        source: Arc<dyn InstructionSource>,
        sensor: Arc<dyn ScreenSensor>,
        settings: &Settings,
    ) -> Self {
        let cursor = match &settings.snapshot.cursor_asset {
            Some(path) => snapshot::load_cursor(path).await,
            None => snapshot::builtin_cursor(),
        };
        let (snapshots, _) = watch::channel(SessionSnapshot::default());
        Self {
            inner: Arc::new(Inner {
                session: Mutex::new(Session::new()),
                source,
                sensor,
                snapshots,
                os_name: settings.os_name(),
                snapshot_options: settings.snapshot.options(),
                cursor,
            }),
        }
    }

    /// Watch the session. The receiver always holds the latest snapshot.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.snapshots.subscribe()
    }

    pub fn set_goal(&self, goal: impl Into<String>) {
        self.inner.session().set_goal(goal.into());
        self.inner.publish();
    }

    /// Request the first instruction for the goal.
    pub async fn start(&self) {
        self.generate().await;
    }

    /// Advance to the next instruction, treating the current one as done.
    /// Any in-flight completion check is voided first.
    pub async fn next(&self) {
        let (current, steps) = {
            let mut session = self.inner.session();
            if session.budget_exceeded() {
                return;
            }
            let steps = session.instructions().len();
            let current = session.current().map(|i| i.text.clone());
            session.cancel_checks();
            (current, steps)
        };
        if let Some(step) = current {
            info!(target: "analytics", step = %step, steps, "instruction_completed");
        }
        self.inner.publish();
        self.generate().await;
    }

    /// Drop the current instruction and generate a replacement.
    pub async fn refresh(&self) {
        {
            let mut session = self.inner.session();
            if session.budget_exceeded() {
                return;
            }
            session.pop_current();
            session.cancel_checks();
        }
        self.inner.publish();
        self.generate().await;
    }

    /// Rewind so `index` becomes the current instruction. Change
    /// detection pauses briefly around the jump.
    pub fn return_to(&self, index: usize) {
        if !self.inner.session().rewind(index) {
            return;
        }
        self.inner.sensor.pause(REWIND_GRACE);
        self.inner.publish();
    }

    /// Queue a revision message and regenerate; the new instruction
    /// replaces the one the user pushed back on.
    pub async fn revise(&self, message: impl Into<String>) {
        let message = message.into();
        if message.is_empty() || self.inner.session().budget_exceeded() {
            return;
        }
        self.inner.session().queue_revision(message);
        self.generate().await;
    }

    /// Ask a question about the current instruction. The streamed answer
    /// lands on the instruction's follow-up list, full text each time.
    pub async fn ask(&self, question: impl Into<String>) {
        let question = question.into();
        if question.is_empty() || self.inner.session().budget_exceeded() {
            return;
        }
        info!(target: "analytics", %question, "follow_up_asked");

        let (goal, instruction) = {
            let mut session = self.inner.session();
            let instruction = session.begin_follow_up(&question);
            (session.goal().to_string(), instruction)
        };
        self.inner.publish();
        let _guard = FlowGuard::answering(&self.inner);

        let pair = match self.inner.sensor.capture().await {
            Ok(pair) => pair,
            Err(err) => {
                warn!(%err, "frame capture failed, dropping follow-up");
                self.inner.session().rollback_follow_up();
                self.inner.publish();
                return;
            }
        };

        let (updates, mut stream) = mpsc::unbounded_channel::<String>();
        let streamer = {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move {
                while let Some(answer) = stream.recv().await {
                    inner.session().update_follow_up_answer(&answer);
                    inner.publish();
                }
            })
        };

        let request = HelpRequest {
            goal,
            frame: pair.scaled,
            question: question.clone(),
            instruction,
        };
        let result = self.inner.source.help(request, updates).await;
        // Let queued snapshots land before the final answer does.
        let _ = streamer.await;
        match result {
            Ok(answer) => {
                self.inner.session().update_follow_up_answer(&answer);
                info!(target: "analytics", %question, "follow_up_answered");
            }
            Err(err) => {
                warn!(%err, "help request failed, rolling back follow-up");
                self.inner.session().rollback_follow_up();
            }
        }
        self.inner.publish();
    }

    /// Abandon the session: stop watching, clear everything.
    pub fn reset(&self) {
        self.inner.sensor.stop();
        self.inner.session().reset();
        self.inner.publish();
    }

    // ── Generation flow ─────────────────────────────────────────────────

    async fn generate(&self) {
        let admitted = self.inner.session().begin_generation();
        if !admitted {
            return;
        }
        self.inner.publish();
        let _guard = FlowGuard::generating(&self.inner);

        let pair = match self.inner.sensor.capture().await {
            Ok(pair) => pair,
            Err(err) => {
                warn!(%err, "frame capture failed, aborting generation");
                return;
            }
        };

        let (goal, completed_steps, follow_up) = {
            let mut session = self.inner.session();
            let follow_up = session.take_revision();
            (session.goal().to_string(), session.step_texts(), follow_up)
        };
        if follow_up.is_some() {
            // The questioned instruction was spliced out.
            self.inner.publish();
        }

        let request = StepRequest {
            goal,
            os_name: self.inner.os_name.clone(),
            frame: pair.scaled.clone(),
            completed_steps,
            follow_up,
        };
        let text = match self.inner.source.step(request).await {
            Ok(text) => text,
            Err(err) => {
                warn!(%err, "instruction generation failed");
                String::new()
            }
        };
        let text = text.trim().to_string();

        let record = self
            .inner
            .session()
            .record_generation(pair.scaled.clone(), &text);
        self.inner.publish();
        if record.budget_spent {
            warn!(budget = GENERATION_BUDGET, "generation budget exhausted");
            info!(target: "analytics", "budget_exceeded");
        }
        if record.appended {
            debug!(instruction = %text, "instruction appended");
        }

        self.attach_preview_if_located(&text, &pair).await;

        if self.inner.session().arm_watching(&text) {
            self.start_watching();
        }
    }

    /// Free-form instructions get a coordinate lookup and, when the
    /// locator points somewhere, a cropped preview on the instruction.
    async fn attach_preview_if_located(&self, text: &str, pair: &FramePair) {
        self.inner.session().begin_preview();
        self.inner.publish();

        if !text.is_empty() && classify(text).wants_coordinates() {
            let request = LocateRequest {
                instruction: text.to_string(),
                frame: pair.full.clone(),
            };
            match self.inner.source.locate(request).await {
                Ok(answer) => {
                    if let Some(coord) = parse_coordinates(&answer) {
                        self.build_preview(coord, pair);
                    } else {
                        debug!(answer = %answer, "locator gave no usable coordinate");
                    }
                }
                Err(err) => warn!(%err, "coordinate lookup failed, skipping preview"),
            }
        }

        self.inner.session().end_preview();
        self.inner.publish();
    }

    fn build_preview(&self, coord: Coordinate, pair: &FramePair) {
        let Some(image) = snapshot::coordinate_snapshot(
            pair.full.image(),
            coord,
            self.inner.snapshot_options,
            &self.inner.cursor,
        ) else {
            return;
        };
        match snapshot::encode_png(&image) {
            Ok(png) => {
                let preview = Preview {
                    png: Arc::new(png),
                    width: image.width(),
                    height: image.height(),
                };
                if self.inner.session().attach_preview(preview) {
                    self.inner.publish();
                }
            }
            Err(err) => debug!(%err, "preview encoding failed"),
        }
    }

    // ── Change reconciliation ───────────────────────────────────────────

    /// Subscribe to sensor change events and feed them into
    /// reconciliation. The task ends when the sensor stops.
    fn start_watching(&self) {
        let mut changes = self.inner.sensor.watch();
        let engine = self.clone();
        tokio::spawn(async move {
            while let Some(frame) = changes.recv().await {
                engine.handle_change(frame);
            }
            debug!("change stream closed");
        });
    }

    /// One change event. Admission claims the check cycle in the same
    /// state transition that decides stash-vs-admit, so events arriving
    /// while a check is in flight coalesce into the stash instead of
    /// starting a second checker call.
    fn handle_change(&self, frame: Frame) {
        let decision = self.inner.session().note_change(frame);
        self.inner.publish();
        if let ChangeDecision::Admit { ticket, frame } = decision {
            let engine = self.clone();
            tokio::spawn(async move { engine.run_checks(ticket, frame).await });
        }
    }

    /// Check cycles for one admitted frame, continuing into stashed
    /// frames until a cycle completes, goes idle, or goes stale.
    async fn run_checks(&self, mut ticket: CheckTicket, mut frame: Frame) {
        loop {
            let request = CheckRequest {
                description: ticket.description.clone(),
                before: ticket.baseline.clone(),
                after: frame.clone(),
            };
            match self.inner.source.check(request).await {
                Ok(completed) => {
                    let settlement = self.inner.session().settle_check(ticket.version, completed);
                    match settlement {
                        CheckSettlement::Stale => return,
                        CheckSettlement::Completed { text, steps } => {
                            if !text.is_empty() {
                                info!(target: "analytics", step = %text, steps, "auto_completed");
                            }
                            self.inner.publish();
                            return;
                        }
                        CheckSettlement::Cancelled | CheckSettlement::Idle => {
                            self.inner.publish();
                            return;
                        }
                        CheckSettlement::Recheck {
                            ticket: next,
                            frame: next_frame,
                        } => {
                            self.inner.publish();
                            ticket = next;
                            frame = next_frame;
                        }
                    }
                }
                Err(err) => {
                    if self.inner.session().fail_check(ticket.version) {
                        warn!(%err, "completion check failed");
                        self.inner.publish();
                    }
                    return;
                }
            }
        }
    }
}
