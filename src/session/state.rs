//! Session state machine.
//!
//! Every mutation of a running session goes through a transition method
//! here. The engine serializes transitions behind a mutex and never holds
//! the lock across a suspension point, so each method is one atomic
//! check-and-set. The in-flight booleans, the check version counter, and
//! the one-slot mailboxes are the whole concurrency story; the methods
//! only encode who may proceed and what a settled result may still touch.

use std::fmt;
use std::sync::Arc;

use crate::classify::{self, InstructionKind};
use crate::frame::Frame;
use crate::generator::FollowUpContext;

/// Hard ceiling on instruction generations per session.
pub const GENERATION_BUDGET: u32 = 150;

/// One step shown to the user.
#[derive(Debug, Clone)]
pub struct Instruction {
    pub text: String,
    /// Attached at most once, never replaced.
    pub preview: Option<Preview>,
    pub follow_ups: Vec<FollowUp>,
}

impl Instruction {
    fn new(text: String) -> Self {
        Self {
            text,
            preview: None,
            follow_ups: Vec::new(),
        }
    }
}

/// A question asked against the current instruction, with its streamed
/// answer. An empty answer means the stream has not produced text yet.
#[derive(Debug, Clone)]
pub struct FollowUp {
    pub question: String,
    pub answer: String,
}

/// Encoded preview image attached to an instruction.
#[derive(Clone)]
pub struct Preview {
    pub png: Arc<Vec<u8>>,
    pub width: u32,
    pub height: u32,
}

impl fmt::Debug for Preview {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Preview")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.png.len())
            .finish()
    }
}

/// Immutable view of the session published after every settled mutation.
#[derive(Debug, Clone, Default)]
pub struct SessionSnapshot {
    pub goal: String,
    pub instructions: Vec<Instruction>,
    pub instruction_count: usize,
    pub generating: bool,
    pub answering: bool,
    pub analyzing: bool,
    pub loading_preview: bool,
    pub generation_count: u32,
    pub auto_complete_count: u32,
    pub budget_exceeded: bool,
}

/// Outcome of recording one generation.
#[derive(Debug)]
pub struct GenerationRecord {
    pub appended: bool,
    /// True exactly when this generation spent the last budget slot.
    pub budget_spent: bool,
}

/// What to do with an incoming change frame.
#[derive(Debug)]
pub enum ChangeDecision {
    /// A check is outstanding; the frame was stashed (latest wins).
    Stash,
    /// The guards ended the cycle before the checker was consulted.
    Ignore,
    /// No check outstanding; this frame claimed the cycle.
    Admit { ticket: CheckTicket, frame: Frame },
}

/// Inputs captured at the start of a check cycle.
#[derive(Debug)]
pub struct CheckTicket {
    pub version: u64,
    pub description: String,
    pub baseline: Frame,
}

/// How a finished check settles.
#[derive(Debug)]
pub enum CheckSettlement {
    /// A newer cycle superseded this one; the result is void.
    Stale,
    /// The step completed and the auto-complete signal fired.
    Completed { text: String, steps: usize },
    /// The step completed, but a cancellation got there first.
    Cancelled,
    /// Not complete, and a frame was stashed meanwhile; a fresh cycle was
    /// opened for it under the same transition.
    Recheck { ticket: CheckTicket, frame: Frame },
    /// Not complete, nothing stashed.
    Idle,
}

/// The mutable aggregate behind one user goal.
#[derive(Debug, Default)]
pub struct Session {
    goal: String,
    instructions: Vec<Instruction>,
    /// Tracks history length through pops and truncations; never re-derived.
    instruction_count: usize,
    /// Generations requested over the whole session, popped ones included.
    generation_count: u32,
    /// Frame the current instruction was generated against.
    last_frame: Option<Frame>,
    /// Queued revision message, consumed by the next generation.
    pending_revision: Option<String>,

    generating: bool,
    checking: bool,
    analyzing: bool,
    answering: bool,
    loading_preview: bool,
    check_version: u64,
    cancel_requested: bool,
    pending_frame: Option<Frame>,
    watching: bool,
    auto_complete_count: u32,
    budget_announced: bool,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_goal(&mut self, goal: String) {
        self.goal = goal;
    }

    pub fn goal(&self) -> &str {
        &self.goal
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn current(&self) -> Option<&Instruction> {
        self.instructions.last()
    }

    pub fn budget_exceeded(&self) -> bool {
        self.generation_count >= GENERATION_BUDGET
    }

    // ── Generation flow ─────────────────────────────────────────────────

    /// Admit a generation flow. Rejected while one is already in flight or
    /// once the budget is spent; rejected triggers are dropped, not queued.
    pub fn begin_generation(&mut self) -> bool {
        if self.budget_exceeded() || self.generating {
            return false;
        }
        self.generating = true;
        true
    }

    /// Consume the queued revision message if the session has the context
    /// to splice it: the questioned instruction is popped so the
    /// regenerated one will take its place. Without a baseline frame or a
    /// current instruction the message stays queued.
    pub fn take_revision(&mut self) -> Option<FollowUpContext> {
        if let Some(frame) = self.last_frame.clone()
            && let Some(previous) = self.instructions.last().map(|i| i.text.clone())
            && let Some(message) = self.pending_revision.take()
        {
            self.instructions.pop();
            self.instruction_count = self.instruction_count.saturating_sub(1);
            return Some(FollowUpContext {
                previous_frame: frame,
                previous_instruction: previous,
                message,
            });
        }
        None
    }

    /// Texts of all prior instructions, oldest first.
    pub fn step_texts(&self) -> Vec<String> {
        self.instructions.iter().map(|i| i.text.clone()).collect()
    }

    /// Record a finished generation: the baseline frame moves, one budget
    /// slot burns, and non-empty text joins the history.
    pub fn record_generation(&mut self, frame: Frame, text: &str) -> GenerationRecord {
        self.last_frame = Some(frame);
        self.generation_count += 1;
        let budget_spent = self.budget_exceeded() && !self.budget_announced;
        if budget_spent {
            self.budget_announced = true;
        }
        let appended = !text.is_empty();
        if appended {
            self.instruction_count += 1;
            self.instructions.push(Instruction::new(text.to_string()));
        }
        GenerationRecord {
            appended,
            budget_spent,
        }
    }

    pub fn begin_preview(&mut self) {
        self.loading_preview = true;
    }

    pub fn end_preview(&mut self) {
        self.loading_preview = false;
    }

    /// Attach a preview to the newest instruction, unless it has one.
    pub fn attach_preview(&mut self, preview: Preview) -> bool {
        match self.instructions.last_mut() {
            Some(instruction) if instruction.preview.is_none() => {
                instruction.preview = Some(preview);
                true
            }
            _ => false,
        }
    }

    /// Set the change-detection latch if this instruction warrants
    /// watching. Returns whether the caller should start the sensor watch.
    pub fn arm_watching(&mut self, text: &str) -> bool {
        if self.watching || text.is_empty() || classify::classify(text) == InstructionKind::Done {
            return false;
        }
        self.watching = true;
        true
    }

    /// Drop-guard cleanup for the generation flow; runs on every exit path.
    pub fn finish_generation(&mut self) {
        self.generating = false;
        self.loading_preview = false;
    }

    // ── Change reconciliation ───────────────────────────────────────────

    /// React to a change frame from the sensor. While a check is
    /// outstanding, frames coalesce into the one-slot stash; otherwise the
    /// frame claims the cycle here, in the same transition, so a second
    /// event cannot be admitted alongside it.
    pub fn note_change(&mut self, frame: Frame) -> ChangeDecision {
        self.analyzing = true;
        if self.checking {
            self.pending_frame = Some(frame);
            return ChangeDecision::Stash;
        }
        match self.open_check() {
            Some(ticket) => ChangeDecision::Admit { ticket, frame },
            None => ChangeDecision::Ignore,
        }
    }

    /// Open a check cycle: bump the version, clear the cancel flag, apply
    /// the guards. `None` means the cycle ended before the checker was
    /// consulted.
    fn open_check(&mut self) -> Option<CheckTicket> {
        self.check_version += 1;
        self.cancel_requested = false;
        let version = self.check_version;

        let current = match self.instructions.last() {
            Some(instruction) if !self.generating => instruction.text.clone(),
            _ => {
                self.analyzing = false;
                return None;
            }
        };
        // A completed goal has nothing left to check.
        if classify::classify(&current) == InstructionKind::Done {
            self.analyzing = false;
            return None;
        }
        self.checking = true;
        let Some(baseline) = self.last_frame.clone() else {
            self.checking = false;
            self.analyzing = false;
            return None;
        };
        Some(CheckTicket {
            version,
            description: classify::step_description(&current),
            baseline,
        })
    }

    /// Settle a successful checker call against the current version.
    pub fn settle_check(&mut self, version: u64, completed: bool) -> CheckSettlement {
        if version != self.check_version {
            return CheckSettlement::Stale;
        }
        self.checking = false;
        let pending = self.pending_frame.take();
        if completed {
            self.analyzing = false;
            if self.cancel_requested {
                return CheckSettlement::Cancelled;
            }
            let text = self
                .instructions
                .last()
                .map(|i| i.text.clone())
                .unwrap_or_default();
            self.auto_complete_count += 1;
            CheckSettlement::Completed {
                text,
                steps: self.instructions.len(),
            }
        } else if let Some(frame) = pending {
            // Re-admission happens inside this same transition, so a change
            // event cannot slip a second cycle in between.
            match self.open_check() {
                Some(ticket) => CheckSettlement::Recheck { ticket, frame },
                None => CheckSettlement::Idle,
            }
        } else {
            self.analyzing = false;
            CheckSettlement::Idle
        }
    }

    /// Settle a failed checker call. `false` means a newer cycle already
    /// owns the state and nothing was touched. A stashed frame stays
    /// stashed; the next not-completed settlement or change event picks
    /// it up.
    pub fn fail_check(&mut self, version: u64) -> bool {
        if version != self.check_version {
            return false;
        }
        self.checking = false;
        self.analyzing = false;
        true
    }

    /// Void any in-flight or stashed check immediately. The in-flight
    /// checker call keeps running; its result dies on the version check.
    pub fn cancel_checks(&mut self) {
        self.check_version += 1;
        self.cancel_requested = true;
        self.pending_frame = None;
        self.checking = false;
        self.analyzing = false;
    }

    // ── Navigation ──────────────────────────────────────────────────────

    /// Drop the newest instruction (refresh).
    pub fn pop_current(&mut self) -> bool {
        if self.instructions.pop().is_some() {
            self.instruction_count = self.instruction_count.saturating_sub(1);
            true
        } else {
            false
        }
    }

    /// Rewind so `index` becomes the newest instruction, clearing every
    /// in-flight flag. The version counter is not bumped.
    pub fn rewind(&mut self, index: usize) -> bool {
        if self.budget_exceeded() || index >= self.instructions.len() {
            return false;
        }
        self.generating = false;
        self.checking = false;
        self.analyzing = false;
        self.answering = false;
        self.loading_preview = false;
        self.pending_frame = None;
        self.instructions.truncate(index + 1);
        self.instruction_count = self.instructions.len();
        true
    }

    /// Wipe the session back to its initial state. The version counter
    /// moves past any outstanding check so a result landing after the
    /// reset stays void.
    pub fn reset(&mut self) {
        let version = self.check_version + 1;
        *self = Self::default();
        self.check_version = version;
    }

    // ── Follow-ups ──────────────────────────────────────────────────────

    /// Optimistically record a follow-up question on the newest
    /// instruction. Returns the instruction text for the help request; an
    /// empty history yields an empty text and records nothing.
    pub fn begin_follow_up(&mut self, question: &str) -> String {
        self.answering = true;
        if let Some(instruction) = self.instructions.last_mut() {
            instruction.follow_ups.push(FollowUp {
                question: question.to_string(),
                answer: String::new(),
            });
            instruction.text.clone()
        } else {
            String::new()
        }
    }

    /// Replace the newest follow-up's answer with the latest streamed
    /// full text.
    pub fn update_follow_up_answer(&mut self, answer: &str) {
        if let Some(instruction) = self.instructions.last_mut()
            && let Some(follow_up) = instruction.follow_ups.last_mut()
        {
            follow_up.answer = answer.to_string();
        }
    }

    /// Remove the optimistic entry after a failed help call.
    pub fn rollback_follow_up(&mut self) {
        if let Some(instruction) = self.instructions.last_mut() {
            instruction.follow_ups.pop();
        }
    }

    pub fn end_follow_up(&mut self) {
        self.answering = false;
    }

    /// Queue a revision message for the next generation; a second queued
    /// message overwrites the first.
    pub fn queue_revision(&mut self, message: String) {
        self.pending_revision = Some(message);
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            goal: self.goal.clone(),
            instructions: self.instructions.clone(),
            instruction_count: self.instruction_count,
            generating: self.generating,
            answering: self.answering,
            analyzing: self.analyzing,
            loading_preview: self.loading_preview,
            generation_count: self.generation_count,
            auto_complete_count: self.auto_complete_count,
            budget_exceeded: self.budget_exceeded(),
        }
    }
}
