//! The instruction-generator seam.
//!
//! Four logical operations over a stateless vision-capable model: produce
//! the next step, answer a follow-up, check step completion between two
//! frames, and locate an instruction's on-screen target. [`http::HttpSource`]
//! is the wire implementation; the engine only sees this trait.

pub mod http;
pub mod prompts;
pub mod sse;
pub mod types;

pub use http::HttpSource;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::frame::Frame;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("generator answered with status {0}")]
    Status(reqwest::StatusCode),
    #[error("could not encode frame: {0}")]
    Encode(#[from] image::ImageError),
}

/// Context spliced into a step request after a follow-up, so the regenerated
/// instruction replaces the one the user questioned.
#[derive(Debug, Clone)]
pub struct FollowUpContext {
    pub previous_frame: Frame,
    pub previous_instruction: String,
    pub message: String,
}

/// Inputs for the `step` operation.
#[derive(Debug, Clone)]
pub struct StepRequest {
    pub goal: String,
    pub os_name: String,
    pub frame: Frame,
    pub completed_steps: Vec<String>,
    pub follow_up: Option<FollowUpContext>,
}

/// Inputs for the `help` operation.
#[derive(Debug, Clone)]
pub struct HelpRequest {
    pub goal: String,
    pub frame: Frame,
    pub question: String,
    pub instruction: String,
}

/// Inputs for the `check` operation.
#[derive(Debug, Clone)]
pub struct CheckRequest {
    pub description: String,
    pub before: Frame,
    pub after: Frame,
}

/// Inputs for the `coordinates` operation.
#[derive(Debug, Clone)]
pub struct LocateRequest {
    pub instruction: String,
    pub frame: Frame,
}

/// A stateless instruction source.
///
/// Implementations surface transport failures as errors; each engine flow
/// decides how to degrade. `step` is expected to absorb transient failures
/// by retrying before giving up.
#[async_trait]
pub trait InstructionSource: Send + Sync {
    /// Produce the next instruction.
    async fn step(&self, request: StepRequest) -> Result<String, SourceError>;

    /// Produce a streamed answer to a follow-up question. Every item sent
    /// through `updates` is the full answer so far, not a delta; the return
    /// value is the final answer.
    async fn help(
        &self,
        request: HelpRequest,
        updates: mpsc::UnboundedSender<String>,
    ) -> Result<String, SourceError>;

    /// Decide whether the described step happened between two frames.
    async fn check(&self, request: CheckRequest) -> Result<bool, SourceError>;

    /// Locate the instruction's target. Answers `"x,y"` in the normalized
    /// 0 to 999 space, or any other text to mean "no coordinate found".
    async fn locate(&self, request: LocateRequest) -> Result<String, SourceError>;
}
