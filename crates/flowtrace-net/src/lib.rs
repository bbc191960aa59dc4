//! Raw-socket network I/O for the flowtrace probing engine (component C3):
//! a sender, a sniffer, a per-probe timer wheel and global send pacing.
//!
//! This crate knows nothing about traceroute or MDA; it moves bytes and
//! schedules timers. [`flowtrace_core`](../flowtrace_core/index.html) builds
//! the algorithms on top.

pub mod error;
pub mod pacing;
pub mod privilege;
pub mod sender;
pub mod sniffer;
pub mod timer;

pub use error::{NetError, Result};
pub use pacing::{parse_min_inter_send, Pacer};
pub use privilege::Privilege;
pub use sender::RawSender;
pub use sniffer::RawSniffer;
pub use timer::{TimerId, TimerWheel};
