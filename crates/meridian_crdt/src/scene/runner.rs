//! # Scene Runner
//!
//! Runs a scene script on its own thread and connects it to the host by
//! message passing.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────┐   HostRequest (bytes)   ┌──────────────────────────┐
//! │ scene thread             │ ──────────────────────▶ │ host worker thread       │
//! │  TickLoop                │                         │  SceneHost               │
//! │  SceneScript::update     │ ◀────────────────────── │  engine, bridge, gate    │
//! └──────────────────────────┘   response (bytes)      └──────────────────────────┘
//! ```
//!
//! Only immutable byte batches cross the boundary. The scene thread never
//! touches the engine or the store.
//!
//! Stopping is cooperative: the tick in flight completes, no further tick
//! starts.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::{error, info, warn};

use super::config::SceneConfig;
use super::host::SceneHost;
use super::tick::{TickLoop, TickStats};
use crate::bridge::EntityStore;
use crate::error::{SceneError, SceneResult};

/// Script code running inside the scene thread.
pub trait SceneScript: Send + 'static {
    /// Called once before the first tick with the current state snapshot.
    /// Returns the first batch to send.
    fn on_start(&mut self, initial_state: &[u8]) -> Vec<u8>;

    /// Called every tick with the previous response. Returns the next batch.
    fn update(&mut self, dt: Duration, inbound: &[u8]) -> Vec<u8>;
}

/// Requests serviced by the host worker.
pub enum HostRequest {
    /// Reconcile a batch and reply with the response batch.
    SceneBatch {
        /// Encoded scene batch.
        bytes: Vec<u8>,
        /// Reply channel.
        reply: Sender<SceneResult<Vec<u8>>>,
    },
    /// Reply with the current state snapshot.
    Snapshot {
        /// Reply channel.
        reply: Sender<SceneResult<Vec<u8>>>,
    },
    /// Stop the worker.
    Shutdown,
}

/// Cloneable handle for talking to a host worker.
#[derive(Clone)]
pub struct SceneLink {
    requests: Sender<HostRequest>,
}

impl SceneLink {
    /// Sends a scene batch and waits for the response batch.
    ///
    /// # Errors
    ///
    /// [`SceneError::Disconnected`] if the worker is gone, otherwise the
    /// host's own error for this batch.
    pub fn call(&self, bytes: Vec<u8>) -> SceneResult<Vec<u8>> {
        let (reply, response) = bounded(1);
        self.request(HostRequest::SceneBatch { bytes, reply }, &response)
    }

    /// Fetches the current state snapshot.
    ///
    /// # Errors
    ///
    /// As [`SceneLink::call`].
    pub fn snapshot(&self) -> SceneResult<Vec<u8>> {
        let (reply, response) = bounded(1);
        self.request(HostRequest::Snapshot { reply }, &response)
    }

    fn request(&self, request: HostRequest, response: &Receiver<SceneResult<Vec<u8>>>) -> SceneResult<Vec<u8>> {
        self.requests.send(request).map_err(|_| SceneError::Disconnected)?;
        response.recv().map_err(|_| SceneError::Disconnected)?
    }
}

/// Host worker thread owning a [`SceneHost`].
pub struct HostWorker<S: EntityStore + 'static> {
    requests: Sender<HostRequest>,
    thread: JoinHandle<SceneHost<S>>,
}

impl<S: EntityStore + 'static> HostWorker<S> {
    /// Moves `host` onto a worker thread.
    ///
    /// # Errors
    ///
    /// [`SceneError::Thread`] if the thread cannot be spawned.
    pub fn spawn(mut host: SceneHost<S>, channel_capacity: usize) -> SceneResult<(Self, SceneLink)> {
        let (requests, inbox) = bounded::<HostRequest>(channel_capacity);

        let thread = thread::Builder::new()
            .name("meridian-host".into())
            .spawn(move || {
                for request in inbox {
                    match request {
                        HostRequest::SceneBatch { bytes, reply } => {
                            let result = host.handle_scene_batch(&bytes);
                            if let Err(err) = &result {
                                warn!(%err, "scene batch failed");
                            }
                            // Caller may have gone away; nothing to do then
                            let _ = reply.send(result);
                        }
                        HostRequest::Snapshot { reply } => {
                            let _ = reply.send(host.snapshot());
                        }
                        HostRequest::Shutdown => break,
                    }
                }
                host
            })
            .map_err(|err| SceneError::Thread(err.to_string()))?;

        let link = SceneLink {
            requests: requests.clone(),
        };
        Ok((Self { requests, thread }, link))
    }

    /// Stops the worker and hands the host back.
    ///
    /// # Errors
    ///
    /// [`SceneError::Thread`] if the worker panicked.
    pub fn shutdown(self) -> SceneResult<SceneHost<S>> {
        // A full queue still drains; a gone worker needs no message
        let _ = self.requests.send(HostRequest::Shutdown);
        self.thread
            .join()
            .map_err(|_| SceneError::Thread("host worker panicked".into()))
    }
}

/// Starts scene threads.
pub struct SceneRunner {
    config: SceneConfig,
}

impl SceneRunner {
    /// Creates a runner for `config`.
    ///
    /// # Errors
    ///
    /// [`SceneError::Config`] if the config does not validate.
    pub fn new(config: SceneConfig) -> SceneResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Returns the runner's config.
    #[inline]
    #[must_use]
    pub const fn config(&self) -> &SceneConfig {
        &self.config
    }

    /// Spawns `script` on a new scene thread talking through `link`.
    ///
    /// # Errors
    ///
    /// [`SceneError::Thread`] if the thread cannot be spawned.
    pub fn start<T: SceneScript>(&self, mut script: T, link: SceneLink) -> SceneResult<SceneHandle> {
        let running = Arc::new(AtomicBool::new(true));
        let tick_rate = self.config.tick_rate;
        let thread_running = Arc::clone(&running);
        let thread_link = link.clone();

        let thread = thread::Builder::new()
            .name("meridian-scene".into())
            .spawn(move || {
                let result = run_scene(&mut script, &thread_link, tick_rate, &thread_running);
                thread_running.store(false, Ordering::Release);
                if let Err(err) = &result {
                    error!(%err, "scene loop ended with error");
                }
                result
            })
            .map_err(|err| SceneError::Thread(err.to_string()))?;

        info!(tick_rate, "scene started");
        Ok(SceneHandle {
            running,
            thread,
            link,
        })
    }
}

fn run_scene<T: SceneScript>(
    script: &mut T,
    link: &SceneLink,
    tick_rate: u32,
    running: &AtomicBool,
) -> SceneResult<TickStats> {
    let initial_state = link.snapshot()?;
    let mut inbound = exchange(link, script.on_start(&initial_state))?;

    let mut tick_loop = TickLoop::new(tick_rate);
    while running.load(Ordering::Acquire) {
        let (start, dt) = tick_loop.wait();
        let outbound = script.update(dt, &inbound);
        inbound = exchange(link, outbound)?;
        tick_loop.record(start);
    }

    Ok(*tick_loop.stats())
}

/// Sends one batch. Only a lost host ends the scene; a rejected batch is
/// logged and the script sees an empty response.
fn exchange(link: &SceneLink, outbound: Vec<u8>) -> SceneResult<Vec<u8>> {
    match link.call(outbound) {
        Err(SceneError::Disconnected) => Err(SceneError::Disconnected),
        Err(err) => {
            warn!(%err, "scene batch rejected, continuing with an empty response");
            Ok(Vec::new())
        }
        ok => ok,
    }
}

/// Handle to a running scene thread.
pub struct SceneHandle {
    running: Arc<AtomicBool>,
    thread: JoinHandle<SceneResult<TickStats>>,
    link: SceneLink,
}

impl SceneHandle {
    /// Returns true until the scene loop has exited.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Fetches the current state snapshot from the host.
    ///
    /// # Errors
    ///
    /// [`SceneError::Disconnected`] if the host worker is gone.
    pub fn snapshot(&self) -> SceneResult<Vec<u8>> {
        self.link.snapshot()
    }

    /// Stops the scene after the tick in flight and waits for the thread.
    ///
    /// # Errors
    ///
    /// The error that ended the scene loop, or [`SceneError::Thread`] if
    /// the script panicked.
    pub fn stop(self) -> SceneResult<TickStats> {
        self.running.store(false, Ordering::Release);
        let stats = self
            .thread
            .join()
            .map_err(|_| SceneError::Thread("scene script panicked".into()))??;

        info!(ticks = stats.total_ticks, late = stats.late_ticks, "scene stopped");
        Ok(stats)
    }
}
