//! Shared worker shell: the session-ordering and concurrency core.
//!
//! Every worker binary runs the same loop — connect, receive, dispatch to
//! bounded concurrent tasks, settle in the task, drain on signal. Session
//! ordering itself is the bus's job; this shell only promises never to
//! reorder locally (one receive loop, no per-session prefetch).

pub mod shell;
pub mod shutdown;

pub use shell::{run_worker, MessageProcessor, ShellOptions};
pub use shutdown::ShutdownSignal;
