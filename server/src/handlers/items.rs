//! Inventory, equipment and ground items.

use super::{in_range, send_inventory_slot, send_message, send_vitals};
use crate::connection::ConnectionId;
use crate::content::{GameData, ItemTemplate};
use crate::context::ServerContext;
use crate::dispatch::HandlerError;
use crate::inventory::{Inventory, ItemStack, MAX_STACK};
use crate::session::User;
use log::{info, warn};
use shared::packets::{
    DropInventoryItem, GetEquipmentItemInfo, GetInventoryItemInfo, Message, PickupItem,
    UnequipItem, UseInventoryItem,
};
use shared::protocol::{GameMessage, StatType, WireEnum};
use shared::{BitReader, ServerPacket};

fn send_stats(user: &User, content: &GameData) {
    for stat in StatType::ALL {
        user.send(&ServerPacket::SetStat {
            stat: *stat,
            value: user.total_stat(*stat, content),
        });
    }
}

fn send_item_info(user: &User, template: &ItemTemplate) {
    user.send(&ServerPacket::ItemInfo {
        name: template.name.clone(),
        description: template.description.clone(),
        value: template.value,
        hp: template.hp,
        mp: template.mp,
    });
}

pub fn pickup_item(
    ctx: &mut ServerContext,
    conn: ConnectionId,
    reader: &mut BitReader<'_>,
) -> Result<(), HandlerError> {
    let msg = PickupItem::read_body(reader)?;
    let Some(user) = ctx.sessions.user_mut(conn) else {
        return Ok(());
    };
    let Some(map) = ctx.world.map_mut(user.map) else {
        return Ok(());
    };
    let Some(item) = map.item(msg.entity) else {
        info!(
            "User `{}` tried to pick up {}, which is not an item",
            user.name, msg.entity
        );
        return Ok(());
    };
    if !in_range(&user.body, item.center(), ctx.content.pickup_range) {
        info!(
            "User `{}` is too far away to pick up item {}",
            user.name, msg.entity
        );
        send_message(user, GameMessage::TooFarAway);
        return Ok(());
    }
    if user.inventory.capacity_for(item.stack.template) == 0 {
        send_message(user, GameMessage::InventoryFull);
        return Ok(());
    }

    let Some(item) = map.take_item(msg.entity) else {
        return Ok(());
    };
    let (leftover, changed) = user.inventory.add(item.stack.template, item.stack.amount);
    for slot in changed {
        send_inventory_slot(user, slot);
    }
    if leftover > 0 {
        let rest = ItemStack {
            template: item.stack.template,
            amount: leftover,
        };
        map.add_item(&ctx.content, rest, item.x, item.y);
    }
    Ok(())
}

/// Drops a whole inventory stack at the user's feet.
pub fn drop_inventory_item(
    ctx: &mut ServerContext,
    conn: ConnectionId,
    reader: &mut BitReader<'_>,
) -> Result<(), HandlerError> {
    let msg = DropInventoryItem::read_body(reader)?;
    let Some(user) = ctx.sessions.user_mut(conn) else {
        return Ok(());
    };
    if !Inventory::is_valid_slot(msg.slot) {
        info!("User `{}` dropped from invalid slot {}", user.name, msg.slot);
        return Ok(());
    }
    let Some(map) = ctx.world.map_mut(user.map) else {
        return Ok(());
    };
    let Some(stack) = user.inventory.remove(msg.slot, MAX_STACK) else {
        return Ok(());
    };

    if map
        .add_item(&ctx.content, stack, user.body.x, user.body.y)
        .is_none()
    {
        warn!("Map {} is full, returning dropped item to `{}`", map.id, user.name);
        user.inventory.add(stack.template, stack.amount);
    }
    send_inventory_slot(user, msg.slot);
    Ok(())
}

/// Equips equipment and consumes potions.
pub fn use_inventory_item(
    ctx: &mut ServerContext,
    conn: ConnectionId,
    reader: &mut BitReader<'_>,
) -> Result<(), HandlerError> {
    let msg = UseInventoryItem::read_body(reader)?;
    let Some(user) = ctx.sessions.user_mut(conn) else {
        return Ok(());
    };
    let Some(stack) = user.inventory.get(msg.slot) else {
        return Ok(());
    };
    let Some(template) = ctx.content.item(stack.template) else {
        warn!(
            "User `{}` holds unknown item template {}",
            user.name, stack.template
        );
        return Ok(());
    };

    if let Some(slot) = template.equip {
        let previous = user.equipment.get(slot);
        // The old piece needs somewhere to go unless the new one frees its slot.
        let freed = stack.amount == 1;
        if let Some(previous) = previous {
            if !freed && user.inventory.capacity_for(previous) == 0 {
                send_message(user, GameMessage::InventoryFull);
                return Ok(());
            }
        }

        user.inventory.remove(msg.slot, 1);
        user.equipment.set(slot, Some(template.id));
        send_inventory_slot(user, msg.slot);
        if let Some(previous) = previous {
            let (_, changed) = user.inventory.add(previous, 1);
            for changed in changed {
                send_inventory_slot(user, changed);
            }
        }
        user.send(&ServerPacket::SetEquipmentSlot {
            slot,
            item: Some(template.id),
        });
        send_stats(user, &ctx.content);
        user.clamp_vitals(&ctx.content);
        send_vitals(user);
    } else if template.is_usable() {
        user.inventory.remove(msg.slot, 1);
        user.hp = user
            .hp
            .saturating_add(template.hp)
            .min(user.max_hp(&ctx.content));
        user.mp = user
            .mp
            .saturating_add(template.mp)
            .min(user.max_mp(&ctx.content));
        send_inventory_slot(user, msg.slot);
        send_vitals(user);
    } else {
        info!("User `{}` tried to use `{}`", user.name, template.name);
        send_message(user, GameMessage::CannotEquip);
    }
    Ok(())
}

pub fn unequip_item(
    ctx: &mut ServerContext,
    conn: ConnectionId,
    reader: &mut BitReader<'_>,
) -> Result<(), HandlerError> {
    let msg = UnequipItem::read_body(reader)?;
    let Some(user) = ctx.sessions.user_mut(conn) else {
        return Ok(());
    };
    let Some(template) = user.equipment.get(msg.slot) else {
        return Ok(());
    };
    if user.inventory.capacity_for(template) == 0 {
        send_message(user, GameMessage::InventoryFull);
        return Ok(());
    }

    user.equipment.set(msg.slot, None);
    let (_, changed) = user.inventory.add(template, 1);
    for slot in changed {
        send_inventory_slot(user, slot);
    }
    user.send(&ServerPacket::SetEquipmentSlot {
        slot: msg.slot,
        item: None,
    });
    send_stats(user, &ctx.content);
    user.clamp_vitals(&ctx.content);
    send_vitals(user);
    Ok(())
}

pub fn get_inventory_item_info(
    ctx: &mut ServerContext,
    conn: ConnectionId,
    reader: &mut BitReader<'_>,
) -> Result<(), HandlerError> {
    let msg = GetInventoryItemInfo::read_body(reader)?;
    let Some(user) = ctx.sessions.user(conn) else {
        return Ok(());
    };
    if let Some(template) = user
        .inventory
        .get(msg.slot)
        .and_then(|stack| ctx.content.item(stack.template))
    {
        send_item_info(user, template);
    }
    Ok(())
}

pub fn get_equipment_item_info(
    ctx: &mut ServerContext,
    conn: ConnectionId,
    reader: &mut BitReader<'_>,
) -> Result<(), HandlerError> {
    let msg = GetEquipmentItemInfo::read_body(reader)?;
    let Some(user) = ctx.sessions.user(conn) else {
        return Ok(());
    };
    if let Some(template) = user
        .equipment
        .get(msg.slot)
        .and_then(|template| ctx.content.item(template))
    {
        send_item_info(user, template);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::context::tests::received;
    use crate::handlers::tests::{playing, send};
    use shared::packets::{
        DropInventoryItem, GetEquipmentItemInfo, GetInventoryItemInfo, PickupItem, SlotItem,
        UnequipItem, UseInventoryItem,
    };
    use shared::protocol::{EquipmentSlot, GameMessage, StatType};
    use shared::{Body, ServerPacket};

    #[test]
    fn test_pickup_in_range() {
        let (mut server, mut processor, mut rx) = playing();
        // The town's ground potion is entity 4 at x = 650.
        send(&mut server, &mut processor, 1, PickupItem { entity: 4 });
        assert_eq!(
            received(&mut rx),
            vec![ServerPacket::SendMessage {
                message: GameMessage::TooFarAway
            }]
        );

        server.ctx.sessions.user_mut(1).unwrap().body = Body::new(640.0, 518.0);
        send(&mut server, &mut processor, 1, PickupItem { entity: 4 });

        let packets = received(&mut rx);
        assert!(packets.contains(&ServerPacket::RemoveEntity { index: 4 }));
        assert!(packets.contains(&ServerPacket::SetInventorySlot {
            slot: 0,
            item: Some(SlotItem {
                template: 0,
                amount: 2
            })
        }));
        assert!(server.ctx.world.map(1).unwrap().item(4).is_none());

        // Gone now.
        send(&mut server, &mut processor, 1, PickupItem { entity: 4 });
        assert!(received(&mut rx).is_empty());
    }

    #[test]
    fn test_drop_puts_stack_on_the_ground() {
        let (mut server, mut processor, mut rx) = playing();
        server
            .ctx
            .sessions
            .user_mut(1)
            .unwrap()
            .inventory
            .add(1, 3);

        send(&mut server, &mut processor, 1, DropInventoryItem { slot: 0 });
        let packets = received(&mut rx);
        assert!(packets.contains(&ServerPacket::SetInventorySlot {
            slot: 0,
            item: None
        }));
        assert!(packets.iter().any(|packet| matches!(
            packet,
            ServerPacket::CreateEntity { name, .. } if name == "Mana Potion"
        )));
        assert!(server
            .ctx
            .world
            .map(1)
            .unwrap()
            .items()
            .any(|item| item.stack.template == 1 && item.stack.amount == 3));

        send(&mut server, &mut processor, 1, DropInventoryItem { slot: 0 });
        send(&mut server, &mut processor, 1, DropInventoryItem { slot: 200 });
        assert!(received(&mut rx).is_empty());
    }

    #[test]
    fn test_potion_restores_hp() {
        let (mut server, mut processor, mut rx) = playing();
        let user = server.ctx.sessions.user_mut(1).unwrap();
        user.inventory.add(0, 2);
        user.hp = 10;

        send(&mut server, &mut processor, 1, UseInventoryItem { slot: 0 });
        let user = server.ctx.sessions.user(1).unwrap();
        assert_eq!(user.hp, 35);
        assert_eq!(user.inventory.get(0).unwrap().amount, 1);
        assert!(received(&mut rx).contains(&ServerPacket::SetHpMp { hp: 35, mp: 50 }));
    }

    #[test]
    fn test_equip_and_unequip() {
        let (mut server, mut processor, mut rx) = playing();
        server
            .ctx
            .sessions
            .user_mut(1)
            .unwrap()
            .inventory
            .add(2, 1);

        send(&mut server, &mut processor, 1, UseInventoryItem { slot: 0 });
        let user = server.ctx.sessions.user(1).unwrap();
        assert_eq!(user.equipment.get(EquipmentSlot::Weapon), Some(2));
        assert!(user.inventory.is_empty());
        let packets = received(&mut rx);
        assert!(packets.contains(&ServerPacket::SetEquipmentSlot {
            slot: EquipmentSlot::Weapon,
            item: Some(2)
        }));
        assert!(packets.contains(&ServerPacket::SetStat {
            stat: StatType::Str,
            value: 4
        }));

        send(
            &mut server,
            &mut processor,
            1,
            GetEquipmentItemInfo {
                slot: EquipmentSlot::Weapon,
            },
        );
        assert!(matches!(
            received(&mut rx).as_slice(),
            [ServerPacket::ItemInfo { name, value: 40, .. }] if name == "Wooden Sword"
        ));

        send(
            &mut server,
            &mut processor,
            1,
            UnequipItem {
                slot: EquipmentSlot::Weapon,
            },
        );
        let user = server.ctx.sessions.user(1).unwrap();
        assert_eq!(user.equipment.get(EquipmentSlot::Weapon), None);
        assert_eq!(user.inventory.get(0).unwrap().template, 2);
    }

    #[test]
    fn test_swapping_equipment_returns_old_piece() {
        let (mut server, mut processor, _rx) = playing();
        let user = server.ctx.sessions.user_mut(1).unwrap();
        user.inventory.add(3, 1);
        user.equipment.set(EquipmentSlot::Body, Some(3));
        user.inventory.add(0, 1);

        // Slot 0 holds a vest, slot 1 a potion.
        send(&mut server, &mut processor, 1, UseInventoryItem { slot: 0 });
        let user = server.ctx.sessions.user(1).unwrap();
        assert_eq!(user.equipment.get(EquipmentSlot::Body), Some(3));
        assert_eq!(user.inventory.get(0).unwrap().template, 3);
        assert_eq!(user.inventory.get(1).unwrap().template, 0);
    }

    #[test]
    fn test_item_info_for_empty_slot_sends_nothing() {
        let (mut server, mut processor, mut rx) = playing();
        send(&mut server, &mut processor, 1, GetInventoryItemInfo { slot: 5 });
        assert!(received(&mut rx).is_empty());
    }
}
