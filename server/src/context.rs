//! The server context.
//!
//! Everything the simulation thread mutates lives in one [`ServerContext`] that is passed to the
//! dispatch table, every handler and the console. There is no global state.

use crate::accounts::CredentialStore;
use crate::admission::AdmissionControl;
use crate::clock::TimeSource;
use crate::config::ServerSettings;
use crate::connection::{ConnectionHandle, ConnectionId, ConnectionRegistry};
use crate::content::GameData;
use crate::game_loop::ShutdownHandle;
use crate::session::{AccountState, SessionRegistry, User};
use crate::world::World;
use log::{error, info, warn};
use shared::protocol::{StatType, WireEnum};
use shared::{Body, ServerPacket};
use std::sync::Arc;

pub struct ServerContext {
    pub settings: ServerSettings,
    pub clock: Arc<dyn TimeSource>,
    pub connections: ConnectionRegistry,
    pub sessions: SessionRegistry,
    pub world: World,
    pub content: Arc<GameData>,
    pub admission: Arc<AdmissionControl>,
    pub store: Arc<dyn CredentialStore>,
    /// Current message of the day; empty when disabled
    pub motd: String,
    pub shutdown: ShutdownHandle,
}

impl ServerContext {
    pub fn new(
        settings: ServerSettings,
        clock: Arc<dyn TimeSource>,
        store: Arc<dyn CredentialStore>,
        content: Arc<GameData>,
        shutdown: ShutdownHandle,
    ) -> Self {
        let admission = Arc::new(AdmissionControl::new(Arc::clone(&store), content.start));
        let world = World::new(
            Arc::clone(&content),
            settings.world_seed,
            settings.position_sync_rate_ms,
        );
        let motd = settings.motd().unwrap_or_default().to_string();

        Self {
            connections: ConnectionRegistry::new(settings.max_connections),
            sessions: SessionRegistry::new(),
            settings,
            clock,
            world,
            content,
            admission,
            store,
            motd,
            shutdown,
        }
    }

    pub fn now(&self) -> u64 {
        self.clock.current_tick()
    }

    /// Registers a freshly accepted connection. Refused connections are closed straight away.
    pub fn register_connection(&mut self, handle: ConnectionHandle) -> bool {
        let now = self.now();
        if self.connections.register(handle.clone(), now) {
            return true;
        }
        handle.close();
        false
    }

    pub fn touch(&mut self, conn: ConnectionId) {
        let now = self.now();
        self.connections.touch(conn, now);
    }

    /// Closes every connection that has been silent for longer than the idle timeout. Their
    /// teardown happens when the disconnect queue is drained.
    pub fn prune_idle(&mut self) -> Vec<ConnectionId> {
        let idle = self
            .connections
            .idle(self.now(), self.settings.idle_timeout_ms);
        for conn in &idle {
            if let Some(handle) = self.connections.handle(*conn).filter(|h| !h.is_closed()) {
                info!("Closing idle connection {} ({})", conn, handle.addr());
                handle.close();
            }
        }
        idle
    }

    /// Removes every trace of a connection: its session, its user from the map, the saved
    /// character and the reserved account name. Returns false if there was nothing to tear down.
    pub fn teardown(&mut self, conn: ConnectionId) -> bool {
        let connection = self.connections.remove(conn);
        let state = self.sessions.remove(conn);
        if connection.is_none() && state.is_none() {
            return false;
        }

        match state {
            Some(AccountState::Playing(user)) => {
                self.world.remove_user(conn, &user);
                if let Err(e) = self.store.save_character(&user.account, &user.to_record()) {
                    error!("Failed to save character `{}`: {}", user.name, e);
                }
                self.admission.release(&user.account);
                info!("User `{}` logged out", user.name);
            }
            Some(AccountState::Pending(pending)) => {
                self.admission.release(pending.account());
                info!("Account `{}` logged out before selecting", pending.account());
            }
            None => {}
        }

        if let Some(connection) = connection {
            connection.handle.close();
        }
        info!("Connection {} torn down", conn);
        true
    }

    pub fn send_to(&self, conn: ConnectionId, packet: &ServerPacket) -> bool {
        self.connections
            .handle(conn)
            .is_some_and(|handle| handle.send(packet))
    }

    /// Puts a freshly selected user on its map and sends it everything the client needs to draw
    /// the world and its character.
    pub fn enter_world(&mut self, conn: ConnectionId) -> bool {
        let Some(user) = self.sessions.user_mut(conn) else {
            warn!("Connection {} entered the world without a user", conn);
            return false;
        };

        if self.world.map(user.map).is_none() {
            let start = self.content.start;
            warn!(
                "User `{}` was saved on unknown map {}, moving to the start",
                user.name, user.map
            );
            user.map = start.map;
            user.body = Body::new(start.x, start.y);
        }
        if !self.world.add_user(conn, user) {
            return false;
        }
        let map = user.map;

        let snapshot = self.world.entity_packets(map, &self.sessions, conn);
        let Some(user) = self.sessions.user(conn) else {
            return false;
        };
        for packet in &snapshot {
            user.send(packet);
        }
        send_character_state(user, &self.content);
        true
    }
}

/// Stats, vitals, cash, inventory and equipment of a user, sent once after entering the world.
fn send_character_state(user: &User, content: &GameData) {
    for stat in StatType::ALL {
        user.send(&ServerPacket::SetStat {
            stat: *stat,
            value: user.total_stat(*stat, content),
        });
    }
    user.send(&ServerPacket::SetStatPoints {
        points: user.stat_points,
    });
    user.send(&ServerPacket::SetHpMp {
        hp: user.hp,
        mp: user.mp,
    });
    user.send(&ServerPacket::SetCash { cash: user.cash });
    for (slot, stack) in user.inventory.iter() {
        user.send(&ServerPacket::SetInventorySlot {
            slot,
            item: Some(stack.into()),
        });
    }
    for (slot, template) in user.equipment.iter() {
        user.send(&ServerPacket::SetEquipmentSlot {
            slot,
            item: Some(template),
        });
    }
}
