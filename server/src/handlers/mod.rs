//! One handler per client opcode.
//!
//! Every handler has the same shape: decode the body, look up the playing user (or whatever state
//! the opcode needs) and return quietly when it is missing, resolve the map or entity the message
//! refers to, apply the effect, then reply. Client mistakes are logged at `info` at most.

mod account;
mod combat;
mod items;
mod movement;
mod npc;
mod social;

use crate::dispatch::Handler;
use crate::session::User;
use shared::protocol::{ClientPacketId, GameMessage};
use shared::{Body, ServerPacket};

/// The handler for an opcode. `None` would mark an opcode as deliberately unhandled.
pub fn handler_for(id: ClientPacketId) -> Option<Handler> {
    use ClientPacketId::*;

    let handler: Handler = match id {
        Attack => combat::attack,
        BuyFromShop => npc::buy_from_shop,
        CreateNewAccount => account::create_new_account,
        DropInventoryItem => items::drop_inventory_item,
        Emoticon => social::emoticon,
        EndNpcChatDialog => npc::end_chat_dialog,
        GetEquipmentItemInfo => items::get_equipment_item_info,
        GetInventoryItemInfo => items::get_inventory_item_info,
        Jump => movement::jump,
        Login => account::login,
        MoveLeft => movement::move_left,
        MoveRight => movement::move_right,
        MoveStop => movement::move_stop,
        PickupItem => items::pickup_item,
        Ping => account::ping,
        RaiseStat => combat::raise_stat,
        Say => social::say,
        SelectAccountCharacter => account::select_account_character,
        SelectNpcChatDialogResponse => npc::select_chat_dialog_response,
        SellInventoryToShop => npc::sell_inventory_to_shop,
        SetUdpPort => account::set_udp_port,
        StartNpcChatDialog => npc::start_chat_dialog,
        StartShopping => npc::start_shopping,
        UnequipItem => items::unequip_item,
        UseInventoryItem => items::use_inventory_item,
        UseSkill => combat::use_skill,
        UseWorld => movement::use_world,
    };
    Some(handler)
}

fn in_range(body: &Body, (x, y): (f32, f32), range: f32) -> bool {
    body.distance_to(x, y) <= range
}

fn send_message(user: &User, message: GameMessage) {
    user.send(&ServerPacket::SendMessage { message });
}

fn send_inventory_slot(user: &User, slot: u8) {
    user.send(&ServerPacket::SetInventorySlot {
        slot,
        item: user.inventory.get(slot).map(Into::into),
    });
}

fn send_vitals(user: &User) {
    user.send(&ServerPacket::SetHpMp {
        hp: user.hp,
        mp: user.mp,
    });
}
