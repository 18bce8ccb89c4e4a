//! cwkeyer - a cwdaemon-compatible Morse keyer relay.
//!
//! Text sent to a UDP port is keyed as Morse code, either unit by unit on
//! a serial keyer device or by handing it to hamlib's `rigctl`.
//!
//! This crate provides:
//! - A Morse table and lazy encoder
//! - A classifier for cwdaemon text and ESC control messages
//! - Serial and rig-control keying drivers
//! - A single-threaded daemon loop that keys messages strictly in order
//!
//! # Example
//!
//! ```rust
//! use cwkeyer::message::{classify, Message};
//! use cwkeyer::morse::render;
//!
//! match classify(b"SOS\n") {
//!     Message::Text(text) => assert_eq!(render(text), "... --- ... "),
//!     _ => unreachable!(),
//! }
//! ```

pub mod config;
pub mod daemon;
pub mod echo;
pub mod keyer;
pub mod listener;
pub mod message;
pub mod metrics;
pub mod morse;
pub mod stats;

pub use config::{Config, KeyerMode, RigctlConfig};
pub use daemon::{Daemon, DaemonError};
pub use echo::Diagnostics;
pub use keyer::{Backend, KeyError, KeyOutcome, RigctlKeyer, SerialKeyer};
pub use listener::{Datagram, ListenError, Listener, LocalInput};
pub use message::{Directive, Message, classify};
pub use morse::{Encoded, MorseCode, Symbol, encode, lookup};
pub use stats::{KeyerStats, StatsSummary};
