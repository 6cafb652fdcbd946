//! The core agent loop of LocalForge.
//!
//! One user turn follows a **Call → Act → Observe** cycle:
//!
//! 1. **Call** the model with the working history and the tool specs
//! 2. **Forward** every streamed event to the caller while accumulating the
//!    assistant's text and tool calls
//! 3. **If tool calls**: run them in order, append results, loop back to 1
//! 4. **If text only**: the turn is over
//!
//! The loop also stops on a model error or when the iteration ceiling is hit.

pub mod confirmation;
pub mod loop_runner;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod transcript;
pub mod turn;

pub use confirmation::{ConfirmationPolicy, confirmation_message};
pub use loop_runner::{AgentLoop, PENDING_CONFIRMATION};
pub use transcript::{INTERRUPTED_TOOL_RESULT, Transcript};
pub use turn::{TurnAccumulator, record_tool_result, tool_message};
