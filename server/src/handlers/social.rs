//! Chat and emotes.

use super::send_message;
use crate::connection::ConnectionId;
use crate::context::ServerContext;
use crate::dispatch::HandlerError;
use log::debug;
use shared::packets::{Message, Say, SendEmoticon};
use shared::protocol::GameMessage;
use shared::{BitReader, ServerPacket};

const TELL_COMMAND: &str = "/tell ";

/// Says something to everyone on the map, or whispers with `/tell <name> <text>`.
pub fn say(
    ctx: &mut ServerContext,
    conn: ConnectionId,
    reader: &mut BitReader<'_>,
) -> Result<(), HandlerError> {
    let msg = Say::read_body(reader)?;
    let Some(user) = ctx.sessions.user(conn) else {
        return Ok(());
    };
    let text = msg.text.trim();
    if text.is_empty() {
        return Ok(());
    }

    if let Some(rest) = text.strip_prefix(TELL_COMMAND) {
        let (target, whisper) = rest
            .trim_start()
            .split_once(' ')
            .map(|(target, whisper)| (target, whisper.trim()))
            .unwrap_or((rest.trim(), ""));
        if whisper.is_empty() {
            return Ok(());
        }
        let Some(recipient) = ctx
            .sessions
            .find_user_by_name(target)
            .and_then(|target| ctx.sessions.user(target))
        else {
            send_message(user, GameMessage::UserNotOnline);
            return Ok(());
        };

        debug!("`{}` whispers to `{}`", user.name, recipient.name);
        recipient.send(&ServerPacket::Chat {
            text: format!("{} whispers: {}", user.name, whisper),
        });
        user.send(&ServerPacket::Chat {
            text: format!("You whisper to {}: {}", recipient.name, whisper),
        });
        return Ok(());
    }

    ctx.world.send_to_map(
        user.map,
        &ServerPacket::Chat {
            text: format!("{}: {}", user.name, text),
        },
    );
    Ok(())
}

pub fn emoticon(
    ctx: &mut ServerContext,
    conn: ConnectionId,
    reader: &mut BitReader<'_>,
) -> Result<(), HandlerError> {
    let msg = SendEmoticon::read_body(reader)?;
    if let Some(user) = ctx.sessions.user(conn) {
        ctx.world.send_to_map(
            user.map,
            &ServerPacket::Emote {
                index: user.index,
                emoticon: msg.emoticon,
            },
        );
    }
    Ok(())
}
