pub mod engine;
pub mod state;

pub use engine::TaskEngine;
pub use state::{
    FollowUp, GENERATION_BUDGET, Instruction, Preview, Session, SessionSnapshot,
};
