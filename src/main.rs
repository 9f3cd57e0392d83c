//! Area Window Server - scenario replay
//!
//! Drives the input dispatch core from a TOML scenario: displays, users,
//! windows and simulated clients are built up front, then the scenario's
//! timed steps are replayed in real time while client replies and ack
//! timeouts are delivered as they fall due.

use anyhow::{Context, Result};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use area_ws::config::Config;
use area_ws::ipc::FramedMessage;
use area_ws::replay::{ReplayServer, Scenario, SimulatedClients, TimedStep};
use area_ws::ws::ClientId;

/// A framed reply on its way back from a simulated client task
type ReplyFrame = (ClientId, Vec<u8>);

/// Replay state: the server plus everything scheduled against it
struct ReplayApp {
    server: ReplayServer,
    clients: SimulatedClients,
    /// Remaining steps, in time order
    script: VecDeque<TimedStep>,
    /// Client tasks that have not delivered their reply yet
    outstanding_replies: usize,
    start: Instant,
}

impl ReplayApp {
    fn new(scenario: &Scenario, ack_delay: Option<Duration>) -> Result<Self> {
        Ok(Self {
            server: scenario.build(ack_delay)?,
            clients: scenario.simulated_clients(),
            script: scenario.timeline().into(),
            outstanding_replies: 0,
            start: Instant::now(),
        })
    }

    fn is_finished(&self) -> bool {
        self.script.is_empty() && self.outstanding_replies == 0 && self.server.next_ack_deadline().is_none()
    }

    /// Hand everything the server sent to the simulated clients. Each reply
    /// is sent back by its own task once the client's latency has passed.
    fn spawn_client_replies(&mut self, reply_tx: &mpsc::UnboundedSender<ReplyFrame>) -> Result<()> {
        let messages = self.server.transport_mut().take();
        for scheduled in self.clients.replies_for(&messages) {
            let frame = FramedMessage::new(&scheduled.reply)
                .context("Failed to encode client reply")?
                .encode();
            let tx = reply_tx.clone();
            self.outstanding_replies += 1;
            tokio::spawn(async move {
                sleep(scheduled.delay).await;
                let _ = tx.send((scheduled.client, frame));
            });
        }
        Ok(())
    }

    fn next_step_at(&self) -> Option<Instant> {
        self.script
            .front()
            .map(|step| self.start + Duration::from_millis(step.at_ms))
    }

    fn run_step(&mut self) -> Result<()> {
        let Some(timed) = self.script.pop_front() else {
            return Ok(());
        };
        debug!("t={}ms: {:?}", timed.at_ms, timed.step);
        timed
            .step
            .apply(&mut self.server)
            .with_context(|| format!("Step at {}ms failed", timed.at_ms))
    }

    fn deliver_reply(&mut self, client: ClientId, buf: &[u8]) {
        self.outstanding_replies = self.outstanding_replies.saturating_sub(1);
        let Some((payload, _)) = FramedMessage::split_frame(buf) else {
            warn!("Truncated reply frame from client {}", client);
            return;
        };
        match FramedMessage::decode_client_reply(payload) {
            Ok(reply) => {
                info!("<- client {}: {:?}", client, reply);
                self.server.handle_client_reply(client, reply);
            }
            Err(e) => warn!("Malformed reply from client {}: {}", client, e),
        }
    }

    /// Replay until the script is exhausted and nothing is left in flight
    async fn run(&mut self) -> Result<()> {
        info!("Replaying {} steps", self.script.len());
        let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<ReplyFrame>();
        self.spawn_client_replies(&reply_tx)?;

        while !self.is_finished() {
            let idle = Instant::now() + Duration::from_secs(3600);
            let step_at = self.next_step_at();
            let deadline = self.server.next_ack_deadline().map(Instant::from_std);

            tokio::select! {
                _ = sleep_until(step_at.unwrap_or(idle)), if step_at.is_some() => {
                    self.run_step()?;
                }
                Some((client, frame)) = reply_rx.recv(), if self.outstanding_replies > 0 => {
                    self.deliver_reply(client, &frame);
                }
                _ = sleep_until(deadline.unwrap_or(idle)), if deadline.is_some() => {
                    let fired = self.server.check_ack_timeouts(std::time::Instant::now());
                    if fired > 0 {
                        warn!("{} ack timeout(s) fired", fired);
                    }
                }
            }

            self.spawn_client_replies(&reply_tx)?;
        }

        info!(
            "Replay finished after {:?}, {} messages sent",
            self.start.elapsed(),
            self.server.transport().sent()
        );
        Ok(())
    }
}

fn print_usage() {
    eprintln!("Usage: area-ws <scenario.toml>");
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("Failed to load config, using defaults: {:#}", e);
        Config::default()
    });

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.filter)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = std::env::args().collect();
    let Some(path) = args.get(1).map(PathBuf::from) else {
        print_usage();
        std::process::exit(2);
    };

    info!("Starting Area window server replay of {:?}", path);

    let scenario = Scenario::load(&path)?;
    let ack_delay = config.dispatch.ack_timeout();
    match ack_delay {
        Some(delay) => info!("Ack timeout: {:?}", delay),
        None => info!("Ack timeout: unbounded"),
    }
    let mut app = ReplayApp::new(&scenario, ack_delay)?;

    // Set up signal handling for graceful shutdown
    let (shutdown_tx, mut shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())
            .context("Failed to register SIGTERM handler")?;
        let mut sigint = signal(SignalKind::interrupt())
            .context("Failed to register SIGINT handler")?;

        let tx = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down gracefully");
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, shutting down gracefully");
                }
            }
            let _ = tx.send(()).await;
        });
    }
    drop(shutdown_tx);

    tokio::select! {
        result = app.run() => {
            if let Err(e) = result {
                error!("Replay failed: {:#}", e);
                return Err(e);
            }
        }
        Some(()) = shutdown_rx.recv() => {
            info!("Shutdown signal received, stopping replay");
        }
    }

    info!("Area window server replay exiting");
    Ok(())
}
