//! Per-connection login state and the playing [`User`].
//!
//! A connection with no entry in the [`SessionRegistry`] is unauthenticated. After a granted login
//! it holds a [`AccountState::Pending`] account, and after character selection a
//! [`AccountState::Playing`] user. Handlers look the user up with [`SessionRegistry::user_mut`]
//! and do nothing when it is absent.

use crate::accounts::{CharacterRecord, Stats};
use crate::admission::PendingAccount;
use crate::connection::{ConnectionHandle, ConnectionId};
use crate::content::GameData;
use crate::inventory::{Equipment, Inventory};
use shared::protocol::{SkillType, StatType};
use shared::{Body, ServerPacket};
use std::collections::HashMap;

/// Whom the user is shopping with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShoppingState {
    pub shop: u16,
    /// Entity index of the shopkeeper
    pub npc: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatState {
    pub npc: u16,
    pub dialog: u16,
    pub page: usize,
}

/// A temporary strength bonus from the Strengthen skill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Buff {
    pub amount: u16,
    pub expires_at: u64,
}

#[derive(Debug)]
pub struct User {
    pub account: String,
    pub name: String,
    pub connection: ConnectionHandle,
    pub map: u16,
    /// Entity index on the current map; only meaningful while the user is on a map
    pub index: u16,
    pub body: Body,
    pub stats: Stats,
    pub stat_points: u16,
    pub hp: u16,
    pub mp: u16,
    pub cash: u32,
    pub inventory: Inventory,
    pub equipment: Equipment,
    pub shopping: Option<ShoppingState>,
    pub chat: Option<ChatState>,
    /// Tick at which each skill becomes usable again
    pub cooldowns: HashMap<SkillType, u64>,
    pub strengthen: Option<Buff>,
    /// Set when the body changed in a way the map has not been told about yet
    pub position_dirty: bool,
}

impl User {
    pub fn from_record(
        account: &str,
        record: CharacterRecord,
        connection: ConnectionHandle,
    ) -> Self {
        Self {
            account: account.to_string(),
            name: record.name,
            connection,
            map: record.map,
            index: 0,
            body: Body::new(record.x, record.y),
            stats: record.stats,
            stat_points: record.stat_points,
            hp: record.hp,
            mp: record.mp,
            cash: record.cash,
            inventory: record.inventory,
            equipment: record.equipment,
            shopping: None,
            chat: None,
            cooldowns: HashMap::new(),
            strengthen: None,
            position_dirty: true,
        }
    }

    pub fn to_record(&self) -> CharacterRecord {
        CharacterRecord {
            name: self.name.clone(),
            map: self.map,
            x: self.body.x,
            y: self.body.y,
            stats: self.stats,
            stat_points: self.stat_points,
            hp: self.hp,
            mp: self.mp,
            cash: self.cash,
            inventory: self.inventory.clone(),
            equipment: self.equipment.clone(),
        }
    }

    pub fn send(&self, packet: &ServerPacket) -> bool {
        self.connection.send(packet)
    }

    /// Base stat plus equipment bonuses and the strength buff.
    pub fn total_stat(&self, stat: StatType, content: &GameData) -> u16 {
        let equipped: u16 = self
            .equipment
            .iter()
            .filter_map(|(_, template)| content.item(template))
            .map(|item| item.bonus(stat))
            .sum();
        let buff = match (stat, self.strengthen) {
            (StatType::Str, Some(buff)) => buff.amount,
            _ => 0,
        };
        self.stats.get(stat).saturating_add(equipped).saturating_add(buff)
    }

    pub fn max_hp(&self, content: &GameData) -> u16 {
        self.total_stat(StatType::MaxHp, content)
    }

    pub fn max_mp(&self, content: &GameData) -> u16 {
        self.total_stat(StatType::MaxMp, content)
    }

    /// Clamps HP/MP to the current maximums, for example after unequipping a bonus item.
    pub fn clamp_vitals(&mut self, content: &GameData) {
        self.hp = self.hp.min(self.max_hp(content));
        self.mp = self.mp.min(self.max_mp(content));
    }

    pub fn skill_ready(&self, skill: SkillType, now: u64) -> bool {
        self.cooldowns.get(&skill).map_or(true, |ready_at| now >= *ready_at)
    }

    /// Drops the strength buff once it has run out. Returns true if it expired.
    pub fn expire_buffs(&mut self, now: u64) -> bool {
        match self.strengthen {
            Some(buff) if now >= buff.expires_at => {
                self.strengthen = None;
                true
            }
            _ => false,
        }
    }
}

#[derive(Debug)]
pub enum AccountState {
    Pending(PendingAccount),
    Playing(Box<User>),
}

impl AccountState {
    pub fn account(&self) -> &str {
        match self {
            Self::Pending(pending) => pending.account(),
            Self::Playing(user) => &user.account,
        }
    }
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    states: HashMap<ConnectionId, AccountState>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_state(&self, conn: ConnectionId) -> bool {
        self.states.contains_key(&conn)
    }

    pub fn state(&self, conn: ConnectionId) -> Option<&AccountState> {
        self.states.get(&conn)
    }

    /// Records a granted login. A connection that already has login state is refused and the
    /// pending account handed back.
    pub fn begin_login(
        &mut self,
        conn: ConnectionId,
        pending: PendingAccount,
    ) -> Result<(), PendingAccount> {
        if self.states.contains_key(&conn) {
            return Err(pending);
        }
        self.states.insert(conn, AccountState::Pending(pending));
        Ok(())
    }

    pub fn pending_mut(&mut self, conn: ConnectionId) -> Option<&mut PendingAccount> {
        match self.states.get_mut(&conn) {
            Some(AccountState::Pending(pending)) => Some(pending),
            _ => None,
        }
    }

    /// Replaces a pending account with its playing user.
    pub fn promote(&mut self, conn: ConnectionId, user: User) -> bool {
        match self.states.get_mut(&conn) {
            Some(state @ AccountState::Pending(_)) => {
                *state = AccountState::Playing(Box::new(user));
                true
            }
            _ => false,
        }
    }

    pub fn user(&self, conn: ConnectionId) -> Option<&User> {
        match self.states.get(&conn) {
            Some(AccountState::Playing(user)) => Some(&**user),
            _ => None,
        }
    }

    pub fn user_mut(&mut self, conn: ConnectionId) -> Option<&mut User> {
        match self.states.get_mut(&conn) {
            Some(AccountState::Playing(user)) => Some(&mut **user),
            _ => None,
        }
    }

    pub fn find_user_by_name(&self, name: &str) -> Option<ConnectionId> {
        self.users()
            .find(|(_, user)| user.name.eq_ignore_ascii_case(name))
            .map(|(conn, _)| conn)
    }

    pub fn remove(&mut self, conn: ConnectionId) -> Option<AccountState> {
        self.states.remove(&conn)
    }

    pub fn users(&self) -> impl Iterator<Item = (ConnectionId, &User)> {
        self.states.iter().filter_map(|(conn, state)| match state {
            AccountState::Playing(user) => Some((*conn, &**user)),
            AccountState::Pending(_) => None,
        })
    }

    pub fn users_mut(&mut self) -> impl Iterator<Item = (ConnectionId, &mut User)> {
        self.states.iter_mut().filter_map(|(conn, state)| match state {
            AccountState::Playing(user) => Some((*conn, &mut **user)),
            AccountState::Pending(_) => None,
        })
    }

    pub fn user_count(&self) -> usize {
        self.users().count()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
