//! Walking, jumping and using world objects.

use super::in_range;
use crate::connection::ConnectionId;
use crate::context::ServerContext;
use crate::dispatch::HandlerError;
use log::{info, warn};
use shared::packets::{Jump, Message, MoveLeft, MoveRight, MoveStop, UseWorld};
use shared::{BitReader, Body, Heading, ServerPacket};

fn set_heading(ctx: &mut ServerContext, conn: ConnectionId, heading: Heading) {
    if let Some(user) = ctx.sessions.user_mut(conn) {
        user.body.set_heading(heading);
        user.position_dirty = true;
    }
}

pub fn move_left(
    ctx: &mut ServerContext,
    conn: ConnectionId,
    reader: &mut BitReader<'_>,
) -> Result<(), HandlerError> {
    MoveLeft::read_body(reader)?;
    set_heading(ctx, conn, Heading::Left);
    Ok(())
}

pub fn move_right(
    ctx: &mut ServerContext,
    conn: ConnectionId,
    reader: &mut BitReader<'_>,
) -> Result<(), HandlerError> {
    MoveRight::read_body(reader)?;
    set_heading(ctx, conn, Heading::Right);
    Ok(())
}

pub fn move_stop(
    ctx: &mut ServerContext,
    conn: ConnectionId,
    reader: &mut BitReader<'_>,
) -> Result<(), HandlerError> {
    MoveStop::read_body(reader)?;
    set_heading(ctx, conn, Heading::Stopped);
    Ok(())
}

pub fn jump(
    ctx: &mut ServerContext,
    conn: ConnectionId,
    reader: &mut BitReader<'_>,
) -> Result<(), HandlerError> {
    Jump::read_body(reader)?;
    if let Some(user) = ctx.sessions.user_mut(conn) {
        if user.body.jump() {
            user.position_dirty = true;
        }
    }
    Ok(())
}

/// Uses a world object. Teleporters are the only usable kind.
pub fn use_world(
    ctx: &mut ServerContext,
    conn: ConnectionId,
    reader: &mut BitReader<'_>,
) -> Result<(), HandlerError> {
    let msg = UseWorld::read_body(reader)?;
    let Some(user) = ctx.sessions.user_mut(conn) else {
        return Ok(());
    };
    let Some(map) = ctx.world.map(user.map) else {
        return Ok(());
    };
    let Some(teleporter) = map.teleporter(msg.entity).cloned() else {
        info!(
            "User `{}` tried to use entity {} which is not usable",
            user.name, msg.entity
        );
        return Ok(());
    };
    if !in_range(
        &user.body,
        teleporter.center(),
        ctx.content.interaction_range,
    ) {
        info!(
            "User `{}` is too far away to use entity {}",
            user.name, msg.entity
        );
        return Ok(());
    }

    if teleporter.notify {
        map.send(&ServerPacket::UseEntity {
            used: teleporter.index,
            user: user.index,
        });
    }

    if teleporter.target_map == user.map {
        user.body = Body::new(teleporter.target_x, teleporter.target_y);
        user.position_dirty = true;
    } else if !ctx.world.change_user_map(
        conn,
        user,
        teleporter.target_map,
        teleporter.target_x,
        teleporter.target_y,
    ) {
        warn!(
            "User `{}` could not be moved to map {}",
            user.name, teleporter.target_map
        );
    }
    Ok(())
}
