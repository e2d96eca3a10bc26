//! Attacks, skills and stat raising.

use super::{send_message, send_vitals};
use crate::connection::ConnectionId;
use crate::context::ServerContext;
use crate::dispatch::HandlerError;
use crate::session::Buff;
use log::{debug, info};
use shared::packets::{Attack, Message, RaiseStat, UseSkill};
use shared::protocol::{GameMessage, SkillType, StatType};
use shared::{BitReader, ServerPacket};

/// Swings at the nearest attackable NPC in front of the user. Damage is rolled between the
/// user's strength and twice that.
pub fn attack(
    ctx: &mut ServerContext,
    conn: ConnectionId,
    reader: &mut BitReader<'_>,
) -> Result<(), HandlerError> {
    Attack::read_body(reader)?;
    let now = ctx.now();
    let Some(user) = ctx.sessions.user_mut(conn) else {
        return Ok(());
    };

    ctx.world.send_to_map(
        user.map,
        &ServerPacket::CharAttack {
            attacker: user.index,
        },
    );

    let Some(target) = ctx
        .world
        .find_attack_target(user.map, &user.body, ctx.content.attack_range)
    else {
        return Ok(());
    };

    let strength = i32::from(user.total_stat(StatType::Str, &ctx.content));
    let damage = ctx.world.roll(strength, strength * 2).max(1);
    let Some(hit) = ctx.world.damage_npc(user.map, target, damage, now) else {
        return Ok(());
    };

    debug!("User `{}` hit NPC {} for {}", user.name, target, damage);
    if hit.killed && hit.cash > 0 {
        user.cash = user.cash.saturating_add(hit.cash);
        user.send(&ServerPacket::SetCash { cash: user.cash });
    }
    Ok(())
}

pub fn use_skill(
    ctx: &mut ServerContext,
    conn: ConnectionId,
    reader: &mut BitReader<'_>,
) -> Result<(), HandlerError> {
    let msg = UseSkill::read_body(reader)?;
    let now = ctx.now();
    let Some(user) = ctx.sessions.user_mut(conn) else {
        return Ok(());
    };
    let Some(skill) = ctx.content.skill(msg.skill) else {
        info!("User `{}` used unknown skill {:?}", user.name, msg.skill);
        return Ok(());
    };

    if !user.skill_ready(msg.skill, now) {
        send_message(user, GameMessage::SkillOnCooldown);
        return Ok(());
    }
    if user.mp < skill.mp_cost {
        send_message(user, GameMessage::NotEnoughMana);
        return Ok(());
    }

    user.mp -= skill.mp_cost;
    user.cooldowns.insert(msg.skill, now + skill.cooldown_ms);
    match msg.skill {
        SkillType::Heal => {
            user.hp = user
                .hp
                .saturating_add(skill.power)
                .min(user.max_hp(&ctx.content));
        }
        SkillType::Strengthen => {
            user.strengthen = Some(Buff {
                amount: skill.power,
                expires_at: now + skill.duration_ms,
            });
            user.send(&ServerPacket::SetStat {
                stat: StatType::Str,
                value: user.total_stat(StatType::Str, &ctx.content),
            });
        }
    }

    send_vitals(user);
    ctx.world.send_to_map(
        user.map,
        &ServerPacket::SkillUsed {
            index: user.index,
            skill: msg.skill,
        },
    );
    Ok(())
}

/// Spends one stat point on a base stat.
pub fn raise_stat(
    ctx: &mut ServerContext,
    conn: ConnectionId,
    reader: &mut BitReader<'_>,
) -> Result<(), HandlerError> {
    let msg = RaiseStat::read_body(reader)?;
    let Some(user) = ctx.sessions.user_mut(conn) else {
        return Ok(());
    };
    if user.stat_points == 0 {
        send_message(user, GameMessage::NoStatPoints);
        return Ok(());
    }
    let Some(raised) = user.stats.get(msg.stat).checked_add(1) else {
        return Ok(());
    };

    user.stats.set(msg.stat, raised);
    user.stat_points -= 1;
    user.send(&ServerPacket::SetStat {
        stat: msg.stat,
        value: user.total_stat(msg.stat, &ctx.content),
    });
    user.send(&ServerPacket::SetStatPoints {
        points: user.stat_points,
    });
    Ok(())
}
