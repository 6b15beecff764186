//! Output Poller — the background loop that advances dispatched tasks by
//! capturing terminal output, detecting stabilization, and posting results
//! back to the task's channel.

mod poller;
mod post;

pub use poller::{ends_with_shell_prompt, OutputPoller};
pub use post::{post_task_result, INLINE_LIMIT};
