//! Maps and the per-tick world simulation.
//!
//! The world owns every map and the dynamic entities on it (NPCs, ground items, teleporters) plus
//! the set of connections standing on each map. User state itself lives in the
//! [`SessionRegistry`]; the world borrows it for the duration of a call.

use crate::connection::{ConnectionHandle, ConnectionId};
use crate::content::{GameData, MapData};
use crate::inventory::ItemStack;
use crate::session::{SessionRegistry, User};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::protocol::{EntityKind, StatType};
use shared::{Body, ServerPacket, PLAYER_SIZE};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Center of an entity whose top-left corner is at `(x, y)`.
pub fn entity_center(x: f32, y: f32) -> (f32, f32) {
    (x + PLAYER_SIZE / 2.0, y + PLAYER_SIZE / 2.0)
}

#[derive(Debug, Clone)]
pub struct Npc {
    pub index: u16,
    pub name: String,
    pub x: f32,
    pub y: f32,
    pub health: Option<i32>,
    pub max_health: Option<i32>,
    pub shop: Option<u16>,
    pub dialog: Option<u16>,
    pub respawn_ms: u64,
    pub cash: u32,
    /// Set while the NPC is dead
    pub respawn_at: Option<u64>,
}

impl Npc {
    pub fn is_alive(&self) -> bool {
        self.respawn_at.is_none()
    }

    pub fn center(&self) -> (f32, f32) {
        entity_center(self.x, self.y)
    }

    fn create_packet(&self) -> ServerPacket {
        ServerPacket::CreateEntity {
            index: self.index,
            kind: EntityKind::Npc,
            name: self.name.clone(),
            x: self.x,
            y: self.y,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GroundItem {
    pub index: u16,
    pub stack: ItemStack,
    pub name: String,
    pub x: f32,
    pub y: f32,
}

impl GroundItem {
    pub fn center(&self) -> (f32, f32) {
        entity_center(self.x, self.y)
    }

    fn create_packet(&self) -> ServerPacket {
        ServerPacket::CreateEntity {
            index: self.index,
            kind: EntityKind::Item,
            name: self.name.clone(),
            x: self.x,
            y: self.y,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Teleporter {
    pub index: u16,
    pub x: f32,
    pub y: f32,
    pub target_map: u16,
    pub target_x: f32,
    pub target_y: f32,
    pub notify: bool,
}

impl Teleporter {
    pub fn center(&self) -> (f32, f32) {
        entity_center(self.x, self.y)
    }
}

/// Outcome of a hit on an NPC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NpcHit {
    pub killed: bool,
    pub cash: u32,
}

#[derive(Debug)]
pub struct Map {
    pub id: u16,
    pub name: String,
    pub width: f32,
    pub floor_y: f32,
    occupants: BTreeMap<ConnectionId, ConnectionHandle>,
    npcs: BTreeMap<u16, Npc>,
    items: BTreeMap<u16, GroundItem>,
    teleporters: BTreeMap<u16, Teleporter>,
    next_index: u16,
    free_indices: Vec<u16>,
}

impl Map {
    fn new(data: &MapData, content: &GameData) -> Self {
        let mut map = Self {
            id: data.id,
            name: data.name.clone(),
            width: data.width,
            floor_y: data.floor_y,
            occupants: BTreeMap::new(),
            npcs: BTreeMap::new(),
            items: BTreeMap::new(),
            teleporters: BTreeMap::new(),
            next_index: 0,
            free_indices: Vec::new(),
        };

        for spawn in &data.npcs {
            if let Some(index) = map.allocate_index() {
                map.npcs.insert(
                    index,
                    Npc {
                        index,
                        name: spawn.name.clone(),
                        x: spawn.x,
                        y: spawn.y,
                        health: spawn.health,
                        max_health: spawn.health,
                        shop: spawn.shop,
                        dialog: spawn.dialog,
                        respawn_ms: spawn.respawn_ms,
                        cash: spawn.cash,
                        respawn_at: None,
                    },
                );
            }
        }

        for spawn in &data.teleporters {
            if let Some(index) = map.allocate_index() {
                map.teleporters.insert(
                    index,
                    Teleporter {
                        index,
                        x: spawn.x,
                        y: spawn.y,
                        target_map: spawn.target_map,
                        target_x: spawn.target_x,
                        target_y: spawn.target_y,
                        notify: spawn.notify,
                    },
                );
            }
        }

        for spawn in &data.items {
            let stack = ItemStack {
                template: spawn.template,
                amount: spawn.amount,
            };
            map.add_item(content, stack, spawn.x, spawn.y);
        }

        map
    }

    pub fn allocate_index(&mut self) -> Option<u16> {
        if let Some(index) = self.free_indices.pop() {
            return Some(index);
        }
        let index = self.next_index;
        self.next_index = self.next_index.checked_add(1)?;
        Some(index)
    }

    fn release_index(&mut self, index: u16) {
        self.free_indices.push(index);
    }

    fn has_free_index(&self) -> bool {
        !self.free_indices.is_empty() || self.next_index < u16::MAX
    }

    /// Sends a packet to everyone on the map. The payload is encoded once.
    pub fn send(&self, packet: &ServerPacket) {
        self.send_except(packet, None);
    }

    pub fn send_except(&self, packet: &ServerPacket, exclude: Option<ConnectionId>) {
        let payload = match packet.encode() {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Dropping {:?} to map {}: {}", packet.id(), self.id, e);
                return;
            }
        };

        for (conn, handle) in &self.occupants {
            if Some(*conn) != exclude {
                handle.send_raw(payload.clone());
            }
        }
    }

    pub fn has_occupant(&self, conn: ConnectionId) -> bool {
        self.occupants.contains_key(&conn)
    }

    pub fn occupant_count(&self) -> usize {
        self.occupants.len()
    }

    pub fn npc(&self, index: u16) -> Option<&Npc> {
        self.npcs.get(&index)
    }

    pub fn npcs(&self) -> impl Iterator<Item = &Npc> {
        self.npcs.values()
    }

    pub fn item(&self, index: u16) -> Option<&GroundItem> {
        self.items.get(&index)
    }

    pub fn items(&self) -> impl Iterator<Item = &GroundItem> {
        self.items.values()
    }

    pub fn teleporter(&self, index: u16) -> Option<&Teleporter> {
        self.teleporters.get(&index)
    }

    /// Places an item stack on the ground and announces it.
    pub fn add_item(
        &mut self,
        content: &GameData,
        stack: ItemStack,
        x: f32,
        y: f32,
    ) -> Option<u16> {
        let name = content
            .item(stack.template)
            .map(|template| template.name.clone())
            .unwrap_or_default();
        let index = self.allocate_index()?;
        let item = GroundItem {
            index,
            stack,
            name,
            x,
            y,
        };
        self.send(&item.create_packet());
        self.items.insert(index, item);
        Some(index)
    }

    /// Removes a ground item and announces its removal.
    pub fn take_item(&mut self, index: u16) -> Option<GroundItem> {
        let item = self.items.remove(&index)?;
        self.release_index(index);
        self.send(&ServerPacket::RemoveEntity { index });
        Some(item)
    }

    fn respawn_npcs(&mut self, now: u64) {
        let mut respawned = Vec::new();
        for npc in self.npcs.values_mut() {
            if matches!(npc.respawn_at, Some(at) if now >= at) {
                npc.respawn_at = None;
                npc.health = npc.max_health;
                respawned.push(npc.create_packet());
            }
        }
        for packet in respawned {
            self.send(&packet);
        }
    }
}

pub struct World {
    maps: BTreeMap<u16, Map>,
    content: Arc<GameData>,
    rng: StdRng,
    position_sync_ms: u64,
    last_position_sync: u64,
}

impl World {
    pub fn new(content: Arc<GameData>, seed: u64, position_sync_ms: u64) -> Self {
        let maps = content
            .maps
            .iter()
            .map(|data| (data.id, Map::new(data, &content)))
            .collect::<BTreeMap<_, _>>();
        info!("World loaded with {} maps", maps.len());

        Self {
            maps,
            content,
            rng: StdRng::seed_from_u64(seed),
            position_sync_ms,
            last_position_sync: 0,
        }
    }

    pub fn map(&self, id: u16) -> Option<&Map> {
        self.maps.get(&id)
    }

    pub fn map_mut(&mut self, id: u16) -> Option<&mut Map> {
        self.maps.get_mut(&id)
    }

    pub fn maps(&self) -> impl Iterator<Item = &Map> {
        self.maps.values()
    }

    pub fn send_to_map(&self, map: u16, packet: &ServerPacket) {
        match self.maps.get(&map) {
            Some(map) => map.send(packet),
            None => warn!("Tried to send {:?} to unknown map {}", packet.id(), map),
        }
    }

    /// Inclusive random roll from the world RNG.
    pub fn roll(&mut self, min: i32, max: i32) -> i32 {
        if max <= min {
            return min;
        }
        self.rng.gen_range(min..=max)
    }

    /// `CreateEntity` packets describing everything on `map` except the `exclude` user.
    pub fn entity_packets(
        &self,
        map: u16,
        sessions: &SessionRegistry,
        exclude: ConnectionId,
    ) -> Vec<ServerPacket> {
        let Some(map) = self.maps.get(&map) else {
            return Vec::new();
        };

        let mut packets: Vec<ServerPacket> = map
            .occupants
            .keys()
            .filter(|conn| **conn != exclude)
            .filter_map(|conn| sessions.user(*conn))
            .map(|user| ServerPacket::CreateEntity {
                index: user.index,
                kind: EntityKind::User,
                name: user.name.clone(),
                x: user.body.x,
                y: user.body.y,
            })
            .collect();

        packets.extend(map.npcs.values().filter(|npc| npc.is_alive()).map(Npc::create_packet));
        packets.extend(map.items.values().map(GroundItem::create_packet));
        packets.extend(map.teleporters.values().map(|teleporter| {
            ServerPacket::CreateEntity {
                index: teleporter.index,
                kind: EntityKind::Teleporter,
                name: String::new(),
                x: teleporter.x,
                y: teleporter.y,
            }
        }));
        packets
    }

    /// Puts the user on its map: assigns an entity index, announces it to the map and tells the
    /// user where it is.
    pub fn add_user(&mut self, conn: ConnectionId, user: &mut User) -> bool {
        let Some(map) = self.maps.get_mut(&user.map) else {
            warn!("User `{}` is on unknown map {}", user.name, user.map);
            return false;
        };
        if map.has_occupant(conn) {
            warn!("User `{}` added to map {} twice", user.name, map.id);
            return false;
        }
        let Some(index) = map.allocate_index() else {
            warn!("Map {} has no free entity index for `{}`", map.id, user.name);
            return false;
        };

        user.index = index;
        let create = ServerPacket::CreateEntity {
            index,
            kind: EntityKind::User,
            name: user.name.clone(),
            x: user.body.x,
            y: user.body.y,
        };
        map.send(&create);
        map.occupants.insert(conn, user.connection.clone());

        user.send(&ServerPacket::SetMap { map: map.id });
        user.send(&ServerPacket::SetUserIndex { index });
        user.send(&create);
        debug!("User `{}` entered map {} as {}", user.name, map.id, index);
        true
    }

    pub fn remove_user(&mut self, conn: ConnectionId, user: &User) -> bool {
        let Some(map) = self.maps.get_mut(&user.map) else {
            return false;
        };
        if map.occupants.remove(&conn).is_none() {
            return false;
        }

        map.release_index(user.index);
        map.send(&ServerPacket::RemoveEntity { index: user.index });
        debug!("User `{}` left map {}", user.name, map.id);
        true
    }

    /// Moves a user to another map. Asking for the map the user is already on is a caller bug;
    /// it is logged and skipped. When the target map is unknown or full the user stays where it
    /// is.
    pub fn change_user_map(
        &mut self,
        conn: ConnectionId,
        user: &mut User,
        target: u16,
        x: f32,
        y: f32,
    ) -> bool {
        if user.map == target {
            warn!(
                "User `{}` asked to change to map {} it is already on",
                user.name, target
            );
            return false;
        }
        let Some(map) = self.maps.get(&target) else {
            warn!("User `{}` asked to change to unknown map {}", user.name, target);
            return false;
        };
        if !map.has_free_index() {
            warn!("Map {} has no free entity index for `{}`", target, user.name);
            return false;
        }

        self.remove_user(conn, user);
        user.map = target;
        user.body = Body::new(x, y);
        user.shopping = None;
        user.chat = None;
        user.position_dirty = true;
        self.add_user(conn, user)
    }

    /// Nearest living, attackable NPC in front of `body` within `range`.
    pub fn find_attack_target(&self, map: u16, body: &Body, range: f32) -> Option<u16> {
        let map = self.maps.get(&map)?;
        let (cx, _) = body.center();

        map.npcs
            .values()
            .filter(|npc| npc.is_alive() && npc.health.is_some())
            .filter(|npc| {
                let (nx, _) = npc.center();
                if body.facing_left {
                    nx <= cx
                } else {
                    nx >= cx
                }
            })
            .map(|npc| {
                let (nx, ny) = npc.center();
                (npc.index, body.distance_to(nx, ny))
            })
            .filter(|(_, distance)| *distance <= range)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(index, _)| index)
    }

    /// Applies damage to an NPC, announcing the hit and, if it dies, its removal.
    pub fn damage_npc(&mut self, map: u16, index: u16, damage: i32, now: u64) -> Option<NpcHit> {
        let map = self.maps.get_mut(&map)?;
        let npc = map.npcs.get_mut(&index)?;
        if !npc.is_alive() {
            return None;
        }
        let health = npc.health.as_mut()?;

        *health -= damage;
        let killed = *health <= 0;
        if killed {
            npc.respawn_at = Some(now + npc.respawn_ms);
        }
        let cash = if killed { npc.cash } else { 0 };
        let name = npc.name.clone();

        map.send(&ServerPacket::CharDamage { index, damage });
        if killed {
            info!("NPC `{}` ({}) on map {} was killed", name, index, map.id);
            map.send(&ServerPacket::RemoveEntity { index });
        }
        Some(NpcHit { killed, cash })
    }

    /// Advances every user's body, expires buffs, broadcasts positions when due and respawns NPCs.
    pub fn update(&mut self, now: u64, delta_ms: u64, sessions: &mut SessionRegistry) {
        let dt = delta_ms as f32 / 1000.0;
        let sync_due = now.saturating_sub(self.last_position_sync) >= self.position_sync_ms;
        let mut broadcasts = Vec::new();

        for (_, user) in sessions.users_mut() {
            let Some(map) = self.maps.get(&user.map) else {
                continue;
            };

            let was_moving = user.body.is_moving();
            user.body.step(dt, map.width, map.floor_y);
            if was_moving && !user.body.is_moving() {
                user.position_dirty = true;
            }

            if user.expire_buffs(now) {
                let value = user.total_stat(StatType::Str, &self.content);
                user.send(&ServerPacket::SetStat {
                    stat: StatType::Str,
                    value,
                });
            }

            if sync_due && (user.position_dirty || user.body.is_moving()) {
                user.position_dirty = false;
                broadcasts.push((
                    user.map,
                    ServerPacket::SetCharacterPosition {
                        index: user.index,
                        x: user.body.x,
                        y: user.body.y,
                        vel_x: user.body.vel_x,
                        vel_y: user.body.vel_y,
                    },
                ));
            }
        }

        if sync_due {
            self.last_position_sync = now;
        }
        for (map, packet) in broadcasts {
            self.send_to_map(map, &packet);
        }

        for map in self.maps.values_mut() {
            map.respawn_npcs(now);
        }
    }
}
