//! The fixed-tick game loop and server startup.
//!
//! One dedicated `simulation` thread owns the [`ServerContext`] and runs [`Server::tick`] at a
//! fixed rate. Each tick it:
//!
//! 1. closes idle connections when the purge interval has passed,
//! 2. registers new connections and dispatches every received message,
//! 3. tears down connections that closed since the last tick,
//! 4. answers pending console commands,
//! 5. advances the world by the elapsed game time,
//! 6. dumps message statistics when configured.
//!
//! Ticks that overrun their budget are followed immediately by the next one. There is no catch-up.
//! Shutdown is cooperative: the flag is checked before each tick, so a running tick always
//! completes.

use crate::accounts::CredentialStore;
use crate::clock::{GameTimer, TimeSource};
use crate::config::{ConfigError, ServerSettings};
use crate::connection::{ConnectionId, DisconnectNotifier, DisconnectQueue};
use crate::console::{self, ConsoleRequest};
use crate::content::GameData;
use crate::context::ServerContext;
use crate::dispatch::{DispatchError, MessageProcessor};
use crate::network::{NetEvent, NetworkServer};
use log::{debug, error, info, warn};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

/// Cooperative stop signal shared by every thread and task of a server.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        if !self.flag.swap(true, Ordering::AcqRel) {
            info!("Shutdown requested");
        }
        self.notify.notify_waiters();
    }

    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Resolves once shutdown has been requested.
    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_requested() {
                return;
            }
            notified.await;
        }
    }
}

/// Time left to sleep after a tick that took `elapsed`, or `None` if the tick overran.
pub fn sleep_budget(target: Duration, elapsed: Duration) -> Option<Duration> {
    target.checked_sub(elapsed).filter(|budget| !budget.is_zero())
}

/// Paces a step function at a fixed tick rate measured on a [`TimeSource`].
pub struct GameLoop {
    target: Duration,
    clock: Arc<dyn TimeSource>,
    shutdown: ShutdownHandle,
}

impl GameLoop {
    pub fn new(target: Duration, clock: Arc<dyn TimeSource>, shutdown: ShutdownHandle) -> Self {
        Self {
            target,
            clock,
            shutdown,
        }
    }

    /// Calls `step` with the game time elapsed since the previous call until shutdown is
    /// requested. Returns the number of ticks run.
    pub fn run<F: FnMut(u64)>(&self, mut step: F) -> u64 {
        let mut ticks = 0;
        let mut last = self.clock.current_tick();

        while !self.shutdown.is_requested() {
            let start = self.clock.current_tick();
            step(start.saturating_sub(last));
            last = start;
            ticks += 1;

            let elapsed = Duration::from_millis(self.clock.current_tick().saturating_sub(start));
            match sleep_budget(self.target, elapsed) {
                Some(budget) => thread::sleep(budget),
                None => debug!("Tick {} overran its budget by {:?}", ticks, elapsed - self.target),
            }
        }
        ticks
    }
}

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to bind {addr}: {source}")]
    Bind { addr: String, source: io::Error },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("incomplete dispatch table: {0}")]
    Dispatch(#[from] DispatchError),
    #[error("failed to spawn the simulation thread: {0}")]
    Thread(io::Error),
}

/// Everything the simulation thread owns.
pub struct Server {
    ctx: ServerContext,
    processor: MessageProcessor,
    events: mpsc::UnboundedReceiver<NetEvent>,
    console: mpsc::UnboundedReceiver<ConsoleRequest>,
    disconnects: Arc<DisconnectQueue>,
    last_purge: u64,
    last_stats_dump: u64,
}

impl Server {
    pub fn new(
        ctx: ServerContext,
        processor: MessageProcessor,
        events: mpsc::UnboundedReceiver<NetEvent>,
        console: mpsc::UnboundedReceiver<ConsoleRequest>,
        disconnects: Arc<DisconnectQueue>,
    ) -> Self {
        let now = ctx.now();
        Self {
            ctx,
            processor,
            events,
            console,
            disconnects,
            last_purge: now,
            last_stats_dump: now,
        }
    }

    pub fn context(&self) -> &ServerContext {
        &self.ctx
    }

    pub fn processor(&self) -> &MessageProcessor {
        &self.processor
    }

    /// Runs one iteration of the simulation.
    pub fn tick(&mut self, delta_ms: u64) {
        let now = self.ctx.now();

        if now.saturating_sub(self.last_purge) >= self.ctx.settings.purge_interval_ms {
            self.last_purge = now;
            let idle = self.ctx.prune_idle();
            if !idle.is_empty() {
                debug!("Purged {} idle connections", idle.len());
            }
        }

        self.pump_network();

        for conn in self.disconnects.drain() {
            self.ctx.teardown(conn);
        }

        self.pump_console();
        self.ctx.world.update(now, delta_ms, &mut self.ctx.sessions);
        self.dump_stats(now);
    }

    fn pump_network(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            match event {
                NetEvent::Connected(handle) => {
                    self.ctx.register_connection(handle);
                }
                NetEvent::Received { id, data } => {
                    let Some(connection) = self.ctx.connections.get(id) else {
                        debug!("Dropping message from unregistered connection {}", id);
                        continue;
                    };
                    if connection.handle.is_closed() {
                        debug!("Dropping message from closed connection {}", id);
                        continue;
                    }
                    self.ctx.touch(id);
                    self.processor.dispatch(&mut self.ctx, id, &data);
                }
            }
        }
    }

    fn pump_console(&mut self) {
        while let Ok(request) = self.console.try_recv() {
            info!("Console: {}", request.line);
            let result = console::execute(&mut self.ctx, self.processor.stats(), &request.line);
            // The console may have stopped waiting.
            let _ = request.reply.send(result);
        }
    }

    fn dump_stats(&mut self, now: u64) {
        let Some(path) = self.ctx.settings.stats_file.as_deref() else {
            return;
        };
        if now.saturating_sub(self.last_stats_dump) < self.ctx.settings.stats_dump_rate_ms {
            return;
        }
        self.last_stats_dump = now;
        if let Err(e) = self.processor.stats().write_to(path) {
            warn!("Failed to write statistics to {}: {}", path.display(), e);
        }
    }

    /// Closes and tears down every remaining connection, saving all characters.
    pub fn shutdown(&mut self) {
        let open: Vec<ConnectionId> = self
            .ctx
            .connections
            .iter()
            .map(|connection| connection.handle.id())
            .collect();
        for conn in &open {
            if let Some(handle) = self.ctx.connections.handle(*conn) {
                handle.close();
            }
        }
        for conn in self.disconnects.drain().into_iter().chain(open) {
            self.ctx.teardown(conn);
        }
        self.dump_stats(u64::MAX);
        info!("Server state saved");
    }
}

/// A started server. Dropping it does not stop anything; call [`stop`](Self::stop).
pub struct RunningServer {
    local_addr: SocketAddr,
    shutdown: ShutdownHandle,
    console: mpsc::UnboundedSender<ConsoleRequest>,
    simulation: thread::JoinHandle<()>,
    network: JoinHandle<()>,
}

impl RunningServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Sender for console commands, answered by the simulation thread.
    pub fn console(&self) -> mpsc::UnboundedSender<ConsoleRequest> {
        self.console.clone()
    }

    /// Requests shutdown and waits for the simulation thread and the accept loop to finish.
    pub async fn stop(self) {
        self.shutdown.request();

        let simulation = self.simulation;
        match tokio::task::spawn_blocking(move || simulation.join()).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => error!("Simulation thread panicked"),
            Err(e) => error!("Failed to join the simulation thread: {}", e),
        }
        if let Err(e) = self.network.await {
            error!("Network task failed: {}", e);
        }
        info!("Server stopped");
    }
}

/// Validates everything, binds the listener and starts the network tasks and the simulation
/// thread. Must be called from within a tokio runtime.
pub async fn start(
    settings: ServerSettings,
    store: Arc<dyn CredentialStore>,
    content: GameData,
) -> Result<RunningServer, StartupError> {
    settings.validate()?;
    content.validate()?;
    let processor = MessageProcessor::from_handlers();
    processor.verify()?;

    let notifier = Arc::new(DisconnectNotifier::new());
    let disconnects = Arc::new(DisconnectQueue::new());
    let queue = Arc::clone(&disconnects);
    notifier.subscribe(Arc::new(move |id| {
        queue.push(id);
    }));

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let network = NetworkServer::bind(
        &settings.bind_address,
        notifier,
        events_tx,
        settings.max_frame_size,
    )
    .await
    .map_err(|source| StartupError::Bind {
        addr: settings.bind_address.clone(),
        source,
    })?;
    let local_addr = network.local_addr();

    let shutdown = ShutdownHandle::new();
    let clock: Arc<dyn TimeSource> = Arc::new(GameTimer::new());
    let tick = settings.tick_duration();
    let ctx = ServerContext::new(
        settings,
        Arc::clone(&clock),
        store,
        Arc::new(content),
        shutdown.clone(),
    );
    let (console_tx, console_rx) = mpsc::unbounded_channel();
    let mut server = Server::new(ctx, processor, events_rx, console_rx, disconnects);
    let game_loop = GameLoop::new(tick, clock, shutdown.clone());

    let simulation = thread::Builder::new()
        .name("simulation".into())
        .spawn(move || {
            info!("Simulation running at {:?} per tick", tick);
            let ticks = game_loop.run(|delta| server.tick(delta));
            server.shutdown();
            info!("Simulation stopped after {} ticks", ticks);
        })
        .map_err(StartupError::Thread)?;
    let network = tokio::spawn(network.run(shutdown.clone()));

    info!("Server listening on {}", local_addr);
    Ok(RunningServer {
        local_addr,
        shutdown,
        console: console_tx,
        simulation,
        network,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::connection::tests::test_handle;
    use crate::context::tests::received;
    use shared::packets::{Login, Message, Ping};
    use shared::protocol::GameMessage;
    use shared::ServerPacket;

    struct Harness {
        server: Server,
        clock: Arc<ManualClock>,
        notifier: Arc<DisconnectNotifier>,
        events: mpsc::UnboundedSender<NetEvent>,
        console: mpsc::UnboundedSender<ConsoleRequest>,
    }

    fn harness() -> Harness {
        let clock = Arc::new(ManualClock::new(0));
        let store = Arc::new(crate::accounts::AccountStore::in_memory());
        let notifier = Arc::new(DisconnectNotifier::new());
        let disconnects = Arc::new(DisconnectQueue::new());
        let queue = Arc::clone(&disconnects);
        notifier.subscribe(Arc::new(move |id| {
            queue.push(id);
        }));

        let ctx = ServerContext::new(
            ServerSettings::default(),
            clock.clone(),
            store,
            Arc::new(GameData::demo()),
            ShutdownHandle::new(),
        );
        let (events, events_rx) = mpsc::unbounded_channel();
        let (console, console_rx) = mpsc::unbounded_channel();
        Harness {
            server: Server::new(
                ctx,
                MessageProcessor::from_handlers(),
                events_rx,
                console_rx,
                disconnects,
            ),
            clock,
            notifier,
            events,
            console,
        }
    }

    fn login(name: &str) -> Vec<u8> {
        Login {
            name: name.to_string(),
            password: "secret".to_string(),
        }
        .encode()
        .unwrap()
    }

    #[test]
    fn test_sleep_budget() {
        let target = Duration::from_millis(5);
        assert_eq!(
            sleep_budget(target, Duration::from_millis(2)),
            Some(Duration::from_millis(3))
        );
        assert_eq!(sleep_budget(target, Duration::from_millis(5)), None);
        assert_eq!(sleep_budget(target, Duration::from_millis(9)), None);
    }

    #[test]
    fn test_shutdown_before_first_tick_runs_nothing() {
        let shutdown = ShutdownHandle::new();
        shutdown.request();
        let game_loop = GameLoop::new(
            Duration::from_millis(1),
            Arc::new(ManualClock::new(0)),
            shutdown,
        );
        assert_eq!(game_loop.run(|_| panic!("no tick expected")), 0);
    }

    #[test]
    fn test_loop_passes_elapsed_game_time() {
        let clock = Arc::new(ManualClock::new(100));
        let shutdown = ShutdownHandle::new();
        let game_loop = GameLoop::new(Duration::ZERO, clock.clone(), shutdown.clone());

        let mut deltas = Vec::new();
        let ticks = game_loop.run(|delta| {
            deltas.push(delta);
            clock.advance(7);
            if deltas.len() == 3 {
                shutdown.request();
            }
        });
        assert_eq!(ticks, 3);
        assert_eq!(deltas, vec![0, 7, 7]);
    }

    #[tokio::test]
    async fn test_shutdown_wakes_waiters() {
        let shutdown = ShutdownHandle::new();
        let waiter = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { shutdown.wait().await }
        });
        shutdown.request();
        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();
        // Already requested resolves at once.
        shutdown.wait().await;
    }

    #[test]
    fn test_tick_registers_and_dispatches() {
        let mut h = harness();
        h.server
            .ctx
            .admission
            .create_account("alice", "secret", "a@example.com")
            .unwrap();

        let (handle, mut rx) = test_handle(1, &h.notifier);
        h.events.send(NetEvent::Connected(handle)).unwrap();
        h.events
            .send(NetEvent::Received {
                id: 1,
                data: login("alice"),
            })
            .unwrap();
        h.server.tick(0);

        let packets = received(&mut rx);
        assert_eq!(packets[0], ServerPacket::LoginSuccessful);
        assert!(h.server.ctx.admission.is_online("alice"));
        assert_eq!(h.server.processor().stats().total_calls(), 1);
    }

    #[test]
    fn test_messages_from_unknown_connections_are_dropped() {
        let mut h = harness();
        h.events
            .send(NetEvent::Received {
                id: 9,
                data: Ping.encode().unwrap(),
            })
            .unwrap();
        h.server.tick(0);
        assert_eq!(h.server.processor().stats().total_calls(), 0);
    }

    #[test]
    fn test_closed_connection_is_torn_down_next_tick() {
        let mut h = harness();
        h.server
            .ctx
            .admission
            .create_account("alice", "secret", "a@example.com")
            .unwrap();
        let (handle, _rx) = test_handle(1, &h.notifier);
        h.events.send(NetEvent::Connected(handle.clone())).unwrap();
        h.events
            .send(NetEvent::Received {
                id: 1,
                data: login("alice"),
            })
            .unwrap();
        h.server.tick(0);

        handle.close();
        handle.close();
        h.server.tick(0);
        assert!(h.server.context().connections.is_empty());
        assert!(!h.server.ctx.admission.is_online("alice"));

        // A fresh connection can take the name again.
        let (handle, mut rx) = test_handle(2, &h.notifier);
        h.events.send(NetEvent::Connected(handle)).unwrap();
        h.events
            .send(NetEvent::Received {
                id: 2,
                data: login("alice"),
            })
            .unwrap();
        h.server.tick(0);
        assert_eq!(received(&mut rx)[0], ServerPacket::LoginSuccessful);
    }

    #[test]
    fn test_purge_runs_on_interval() {
        let mut h = harness();
        let (handle, _rx) = test_handle(1, &h.notifier);
        h.events.send(NetEvent::Connected(handle.clone())).unwrap();
        h.server.tick(0);

        // Idle long enough, but the purge interval has not passed yet.
        h.clock.set(h.server.ctx.settings.idle_timeout_ms + 1);
        h.server.tick(0);
        assert!(!handle.is_closed());

        h.clock.set(h.server.ctx.settings.purge_interval_ms);
        h.server.tick(0);
        assert!(handle.is_closed());
        assert!(h.server.context().connections.is_empty());
    }

    #[test]
    fn test_frames_from_a_purged_connection_are_not_dispatched() {
        let mut h = harness();
        h.server
            .ctx
            .admission
            .create_account("alice", "secret", "a@example.com")
            .unwrap();
        let (handle, mut rx) = test_handle(1, &h.notifier);
        h.events.send(NetEvent::Connected(handle.clone())).unwrap();
        h.server.tick(0);

        // The purge in this tick closes the connection before its late login is pumped.
        h.clock.set(h.server.ctx.settings.purge_interval_ms);
        h.events
            .send(NetEvent::Received {
                id: 1,
                data: login("alice"),
            })
            .unwrap();
        h.server.tick(0);

        assert!(handle.is_closed());
        assert_eq!(h.server.processor().stats().total_calls(), 0);
        assert!(!h.server.ctx.admission.is_online("alice"));
        assert!(h.server.context().sessions.is_empty());
        assert!(received(&mut rx).is_empty());
    }

    #[test]
    fn test_console_requests_are_answered() {
        let mut h = harness();
        let (reply, mut response) = tokio::sync::oneshot::channel();
        h.console
            .send(ConsoleRequest {
                line: "connections".to_string(),
                reply,
            })
            .unwrap();
        h.server.tick(0);
        assert_eq!(
            response.try_recv().unwrap(),
            "0 connections, 0 sessions, 0 in the world"
        );
    }

    #[test]
    fn test_shutdown_saves_everyone() {
        let mut h = harness();
        h.server
            .ctx
            .admission
            .create_account("alice", "secret", "a@example.com")
            .unwrap();
        let (handle, _rx) = test_handle(1, &h.notifier);
        h.events.send(NetEvent::Connected(handle.clone())).unwrap();
        h.events
            .send(NetEvent::Received {
                id: 1,
                data: login("alice"),
            })
            .unwrap();
        h.server.tick(0);

        h.server.shutdown();
        assert!(handle.is_closed());
        assert!(h.server.context().connections.is_empty());
        assert_eq!(h.server.ctx.admission.online_count(), 0);
    }

    #[test]
    fn test_wrong_password_is_answered() {
        let mut h = harness();
        let (handle, mut rx) = test_handle(1, &h.notifier);
        h.events.send(NetEvent::Connected(handle)).unwrap();
        h.events
            .send(NetEvent::Received {
                id: 1,
                data: login("nobody"),
            })
            .unwrap();
        h.server.tick(0);
        assert_eq!(
            received(&mut rx),
            vec![ServerPacket::LoginUnsuccessful {
                message: GameMessage::LoginInvalidNamePassword
            }]
        );
    }
}
