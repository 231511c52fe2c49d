//! Structured message reconstruction.
//!
//! - `builder`: the per-turn event state machine
//! - `correlator`: call/result matching by id and sandbox lifecycle
//! - `normalize`: control-markup stripping for streamed text
//! - `usage`: running usage totals for one message

mod builder;
mod correlator;
mod normalize;
mod usage;

pub use builder::{raw_content, MessageBuilder, Step, GROUNDING_TOOL_NAME, INTERRUPTED_CONTENT};
pub use correlator::{Correlator, SandboxState};
pub use normalize::{collapse_blank_lines, normalize_text, strip_control_markup};
pub use usage::UsageAccumulator;
