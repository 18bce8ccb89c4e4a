//! The keyer's event loop.
//!
//! One loop, one thread: wait until the socket (or local input) has a
//! message, classify it, key it to completion, and only then wait again.
//! A message that arrives while another is being keyed waits in the
//! socket's receive buffer, so messages go out in arrival order and never
//! overlap. Shutdown is the one event that can cut a message short: it is
//! watched while keying and takes effect at the next unit boundary.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::echo::Diagnostics;
use crate::keyer::{Backend, KeyError, KeyOutcome};
use crate::listener::{Datagram, ListenError, Listener, LocalInput};
use crate::message::{Directive, Message, classify};
use crate::stats::KeyerStats;

/// Errors that stop the daemon.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error(transparent)]
    Listen(#[from] ListenError),

    #[error(transparent)]
    Key(#[from] KeyError),
}

/// A running keyer: message sources, the keying backend, and the echo.
#[derive(Debug)]
pub struct Daemon {
    listener: Listener,
    local_input: Option<LocalInput>,
    backend: Backend,
    echo: Diagnostics,
    stats: Arc<KeyerStats>,
    stats_interval: Option<Duration>,
}

impl Daemon {
    pub fn new(listener: Listener, backend: Backend, echo: Diagnostics) -> Self {
        Self {
            listener,
            local_input: None,
            backend,
            echo,
            stats: Arc::new(KeyerStats::new()),
            stats_interval: None,
        }
    }

    /// Also accept messages from a local stream.
    pub fn with_local_input(mut self, input: LocalInput) -> Self {
        self.local_input = Some(input);
        self
    }

    /// Share an existing statistics collector.
    pub fn with_stats(mut self, stats: Arc<KeyerStats>) -> Self {
        self.stats = stats;
        self
    }

    /// Log a statistics summary this often.
    pub fn with_stats_interval(mut self, interval: Duration) -> Self {
        self.stats_interval = (!interval.is_zero()).then_some(interval);
        self
    }

    pub fn stats(&self) -> &Arc<KeyerStats> {
        &self.stats
    }

    /// Run until `shutdown` turns true or a fatal error occurs.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), DaemonError> {
        info!("Keyer ready ({})", self.backend.describe());

        let mut ticker = self.stats_interval.map(|period| {
            let start = tokio::time::Instant::now() + period;
            let mut interval = tokio::time::interval_at(start, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        loop {
            let local_open = self.local_input.is_some();

            let datagram = tokio::select! {
                _ = shutdown_requested(&mut shutdown) => {
                    info!("Shutting down");
                    return Ok(());
                }

                datagram = self.listener.receive() => datagram?,

                input = read_local(&mut self.local_input), if local_open => {
                    match input? {
                        Some(datagram) => datagram,
                        None => {
                            info!("Local input closed");
                            self.local_input = None;
                            continue;
                        }
                    }
                }

                _ = tick(&mut ticker), if ticker.is_some() => {
                    info!("\n{}", self.stats.summary());
                    continue;
                }
            };

            tokio::select! {
                handled = self.handle_datagram(&datagram) => handled?,

                _ = shutdown_requested(&mut shutdown) => {
                    info!("Shutting down, abandoning the message in flight");
                    return Ok(());
                }
            }
        }
    }

    /// Process one message to completion.
    pub async fn handle_datagram(&mut self, datagram: &Datagram) -> Result<(), DaemonError> {
        self.stats.record_datagram(datagram.len());

        match classify(datagram.as_bytes()) {
            Message::Empty => {
                self.stats.record_empty();
                debug!("Ignoring empty datagram");
            }
            Message::Control { body, directive } => {
                self.stats.record_control();
                self.echo.control(body);
                self.handle_directive(&directive).await?;
            }
            Message::Text(text) => {
                match datagram.source() {
                    Some(from) => debug!("Keying {} bytes from {}", text.len(), from),
                    None => debug!("Keying {} bytes from local input", text.len()),
                }
                let outcome = self
                    .backend
                    .send_text(text, &mut self.echo, &self.stats)
                    .await?;
                if outcome == KeyOutcome::Reset {
                    info!("Message reset before completion");
                }
            }
        }

        Ok(())
    }

    async fn handle_directive(&mut self, directive: &Directive<'_>) -> Result<(), DaemonError> {
        match directive {
            Directive::Abort => {
                debug!("Abort requested");
                self.stats.record_abort();
                self.backend.abort().await?;
            }
            Directive::Unknown { .. } => {
                warn!("Ignoring {}", directive);
                self.stats.record_unknown_directive();
            }
        }
        Ok(())
    }
}

/// Resolves once shutdown is requested or its sender is gone.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|&stop| stop).await;
}

async fn read_local(input: &mut Option<LocalInput>) -> Result<Option<Datagram>, ListenError> {
    match input {
        Some(input) => input.read().await,
        None => std::future::pending().await,
    }
}

async fn tick(ticker: &mut Option<tokio::time::Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
