//! Shops and NPC chat dialogs.

use super::{in_range, send_inventory_slot, send_message};
use crate::connection::ConnectionId;
use crate::content::DialogPage;
use crate::context::ServerContext;
use crate::dispatch::HandlerError;
use crate::inventory::MAX_STACK;
use crate::session::{ChatState, ShoppingState, User};
use crate::world::{Npc, World};
use log::info;
use shared::packets::{
    BuyFromShop, EndNpcChatDialog, Message, SelectNpcChatDialogResponse, SellInventoryToShop,
    StartNpcChatDialog, StartShopping,
};
use shared::protocol::GameMessage;
use shared::{BitReader, ServerPacket};

/// The living NPC `index` on the user's map, if it is within `range`.
fn reachable_npc<'w>(user: &User, world: &'w World, index: u16, range: f32) -> Option<&'w Npc> {
    world
        .map(user.map)?
        .npc(index)
        .filter(|npc| npc.is_alive() && in_range(&user.body, npc.center(), range))
}

/// The shop the user is browsing. Walking away from the shopkeeper closes it.
fn current_shop(user: &mut User, world: &World, range: f32) -> Option<u16> {
    let shopping = user.shopping?;
    if reachable_npc(user, world, shopping.npc, range).is_none() {
        user.shopping = None;
        user.send(&ServerPacket::StopShopping);
        return None;
    }
    Some(shopping.shop)
}

fn send_page(user: &User, npc: u16, page: &DialogPage) {
    user.send(&ServerPacket::StartChatDialog {
        npc,
        text: page.text.clone(),
        responses: page
            .responses
            .iter()
            .map(|response| response.text.clone())
            .collect(),
    });
}

pub fn start_shopping(
    ctx: &mut ServerContext,
    conn: ConnectionId,
    reader: &mut BitReader<'_>,
) -> Result<(), HandlerError> {
    let msg = StartShopping::read_body(reader)?;
    let Some(user) = ctx.sessions.user_mut(conn) else {
        return Ok(());
    };
    let Some((shop_id, center)) = ctx
        .world
        .map(user.map)
        .and_then(|map| map.npc(msg.entity))
        .filter(|npc| npc.is_alive())
        .and_then(|npc| npc.shop.map(|shop| (shop, npc.center())))
    else {
        info!(
            "User `{}` tried to shop at entity {}, which is not a shopkeeper",
            user.name, msg.entity
        );
        return Ok(());
    };
    if !in_range(&user.body, center, ctx.content.interaction_range) {
        send_message(user, GameMessage::TooFarAway);
        return Ok(());
    }
    let Some(shop) = ctx.content.shop(shop_id) else {
        return Ok(());
    };

    let items = shop
        .items
        .iter()
        .filter_map(|id| ctx.content.item(*id))
        .map(|template| (template.id, template.value))
        .collect();
    user.shopping = Some(ShoppingState {
        shop: shop_id,
        npc: msg.entity,
    });
    user.send(&ServerPacket::StartShopping {
        shop: shop_id,
        items,
    });
    Ok(())
}

pub fn buy_from_shop(
    ctx: &mut ServerContext,
    conn: ConnectionId,
    reader: &mut BitReader<'_>,
) -> Result<(), HandlerError> {
    let msg = BuyFromShop::read_body(reader)?;
    let Some(user) = ctx.sessions.user_mut(conn) else {
        return Ok(());
    };
    let Some(shop_id) = current_shop(user, &ctx.world, ctx.content.interaction_range) else {
        return Ok(());
    };
    let Some(template) = ctx
        .content
        .shop(shop_id)
        .and_then(|shop| shop.items.get(msg.slot as usize))
        .and_then(|id| ctx.content.item(*id))
    else {
        info!(
            "User `{}` tried to buy from empty shop slot {}",
            user.name, msg.slot
        );
        return Ok(());
    };

    let amount = msg.amount.min(MAX_STACK);
    if amount == 0 {
        return Ok(());
    }
    let cost = template.value.saturating_mul(u32::from(amount));
    if user.cash < cost {
        send_message(user, GameMessage::NotEnoughCash);
        return Ok(());
    }
    if user.inventory.capacity_for(template.id) < u32::from(amount) {
        send_message(user, GameMessage::InventoryFull);
        return Ok(());
    }

    user.cash -= cost;
    let (_, changed) = user.inventory.add(template.id, amount);
    for slot in changed {
        send_inventory_slot(user, slot);
    }
    user.send(&ServerPacket::SetCash { cash: user.cash });
    Ok(())
}

/// Sells items back for half their value.
pub fn sell_inventory_to_shop(
    ctx: &mut ServerContext,
    conn: ConnectionId,
    reader: &mut BitReader<'_>,
) -> Result<(), HandlerError> {
    let msg = SellInventoryToShop::read_body(reader)?;
    let Some(user) = ctx.sessions.user_mut(conn) else {
        return Ok(());
    };
    if current_shop(user, &ctx.world, ctx.content.interaction_range).is_none() {
        return Ok(());
    }
    let Some(template) = user
        .inventory
        .get(msg.slot)
        .and_then(|stack| ctx.content.item(stack.template))
    else {
        return Ok(());
    };
    let Some(sold) = user.inventory.remove(msg.slot, msg.amount) else {
        return Ok(());
    };

    let price = (template.value / 2).saturating_mul(u32::from(sold.amount));
    user.cash = user.cash.saturating_add(price);
    send_inventory_slot(user, msg.slot);
    user.send(&ServerPacket::SetCash { cash: user.cash });
    Ok(())
}

pub fn start_chat_dialog(
    ctx: &mut ServerContext,
    conn: ConnectionId,
    reader: &mut BitReader<'_>,
) -> Result<(), HandlerError> {
    let msg = StartNpcChatDialog::read_body(reader)?;
    let Some(user) = ctx.sessions.user_mut(conn) else {
        return Ok(());
    };
    let Some(npc) = reachable_npc(user, &ctx.world, msg.npc, ctx.content.interaction_range)
    else {
        info!("User `{}` cannot talk to entity {}", user.name, msg.npc);
        return Ok(());
    };
    let Some((dialog_id, page)) = npc.dialog.and_then(|id| {
        ctx.content
            .dialog(id)
            .and_then(|dialog| dialog.pages.first())
            .map(|page| (id, page))
    }) else {
        info!("User `{}` tried to chat with silent NPC `{}`", user.name, npc.name);
        return Ok(());
    };

    user.chat = Some(ChatState {
        npc: msg.npc,
        dialog: dialog_id,
        page: 0,
    });
    send_page(user, msg.npc, page);
    Ok(())
}

pub fn select_chat_dialog_response(
    ctx: &mut ServerContext,
    conn: ConnectionId,
    reader: &mut BitReader<'_>,
) -> Result<(), HandlerError> {
    let msg = SelectNpcChatDialogResponse::read_body(reader)?;
    let Some(user) = ctx.sessions.user_mut(conn) else {
        return Ok(());
    };
    let Some(chat) = user.chat else {
        return Ok(());
    };
    if reachable_npc(user, &ctx.world, chat.npc, ctx.content.interaction_range).is_none() {
        user.chat = None;
        user.send(&ServerPacket::EndChatDialog);
        return Ok(());
    }
    let Some(dialog) = ctx.content.dialog(chat.dialog) else {
        return Ok(());
    };
    let Some(response) = dialog
        .pages
        .get(chat.page)
        .and_then(|page| page.responses.get(msg.response as usize))
    else {
        info!(
            "User `{}` chose invalid dialog response {}",
            user.name, msg.response
        );
        return Ok(());
    };

    match response.next.and_then(|next| dialog.pages.get(next).map(|page| (next, page))) {
        Some((next, page)) => {
            user.chat = Some(ChatState { page: next, ..chat });
            send_page(user, chat.npc, page);
        }
        None => {
            user.chat = None;
            user.send(&ServerPacket::EndChatDialog);
        }
    }
    Ok(())
}

pub fn end_chat_dialog(
    ctx: &mut ServerContext,
    conn: ConnectionId,
    reader: &mut BitReader<'_>,
) -> Result<(), HandlerError> {
    EndNpcChatDialog::read_body(reader)?;
    if let Some(user) = ctx.sessions.user_mut(conn) {
        user.chat = None;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::context::tests::{received, TestServer};
    use crate::dispatch::MessageProcessor;
    use crate::handlers::tests::{playing, send};
    use shared::packets::{
        BuyFromShop, EndNpcChatDialog, SelectNpcChatDialogResponse, SellInventoryToShop,
        SlotItem, StartNpcChatDialog, StartShopping,
    };
    use shared::protocol::GameMessage;
    use shared::{Body, ServerPacket};
    use tokio::sync::mpsc::UnboundedReceiver;

    const SHOPKEEPER: u16 = 0;
    const ELDER: u16 = 1;

    /// `alice` standing next to the shopkeeper with the shop open.
    fn shopping() -> (TestServer, MessageProcessor, UnboundedReceiver<Vec<u8>>) {
        let (mut server, mut processor, mut rx) = playing();
        server.ctx.sessions.user_mut(1).unwrap().body = Body::new(280.0, 518.0);
        send(
            &mut server,
            &mut processor,
            1,
            StartShopping { entity: SHOPKEEPER },
        );
        received(&mut rx);
        (server, processor, rx)
    }

    #[test]
    fn test_start_shopping_lists_items() {
        let (mut server, mut processor, mut rx) = playing();
        send(
            &mut server,
            &mut processor,
            1,
            StartShopping { entity: SHOPKEEPER },
        );
        assert_eq!(
            received(&mut rx),
            vec![ServerPacket::SendMessage {
                message: GameMessage::TooFarAway
            }]
        );

        server.ctx.sessions.user_mut(1).unwrap().body = Body::new(280.0, 518.0);
        send(
            &mut server,
            &mut processor,
            1,
            StartShopping { entity: SHOPKEEPER },
        );
        let packets = received(&mut rx);
        assert!(matches!(
            packets.as_slice(),
            [ServerPacket::StartShopping { shop: 0, items }]
                if items.len() == 5 && items[2] == (2, 40)
        ));

        // The elder has no shop.
        send(&mut server, &mut processor, 1, StartShopping { entity: ELDER });
        assert!(received(&mut rx).is_empty());
    }

    #[test]
    fn test_buy_and_sell() {
        let (mut server, mut processor, mut rx) = shopping();

        send(
            &mut server,
            &mut processor,
            1,
            BuyFromShop { slot: 0, amount: 3 },
        );
        assert_eq!(
            received(&mut rx),
            vec![
                ServerPacket::SetInventorySlot {
                    slot: 0,
                    item: Some(SlotItem {
                        template: 0,
                        amount: 3
                    })
                },
                ServerPacket::SetCash { cash: 70 }
            ]
        );

        send(
            &mut server,
            &mut processor,
            1,
            SellInventoryToShop { slot: 0, amount: 2 },
        );
        let user = server.ctx.sessions.user(1).unwrap();
        assert_eq!(user.cash, 80);
        assert_eq!(user.inventory.get(0).unwrap().amount, 1);

        send(
            &mut server,
            &mut processor,
            1,
            BuyFromShop { slot: 4, amount: 2 },
        );
        assert!(received(&mut rx).contains(&ServerPacket::SendMessage {
            message: GameMessage::NotEnoughCash
        }));
    }

    #[test]
    fn test_walking_away_closes_shop() {
        let (mut server, mut processor, mut rx) = shopping();
        server.ctx.sessions.user_mut(1).unwrap().body = Body::new(1000.0, 518.0);

        send(
            &mut server,
            &mut processor,
            1,
            BuyFromShop { slot: 0, amount: 1 },
        );
        assert_eq!(received(&mut rx), vec![ServerPacket::StopShopping]);
        let user = server.ctx.sessions.user(1).unwrap();
        assert!(user.shopping.is_none());
        assert!(user.inventory.is_empty());
    }

    #[test]
    fn test_buying_without_a_shop_does_nothing() {
        let (mut server, mut processor, mut rx) = playing();
        send(
            &mut server,
            &mut processor,
            1,
            BuyFromShop { slot: 0, amount: 1 },
        );
        assert!(received(&mut rx).is_empty());
        assert_eq!(server.ctx.sessions.user(1).unwrap().cash, 100);
    }

    #[test]
    fn test_chat_dialog_pages() {
        let (mut server, mut processor, mut rx) = playing();
        server.ctx.sessions.user_mut(1).unwrap().body = Body::new(480.0, 518.0);

        send(
            &mut server,
            &mut processor,
            1,
            StartNpcChatDialog { npc: ELDER },
        );
        assert!(matches!(
            received(&mut rx).as_slice(),
            [ServerPacket::StartChatDialog { npc: ELDER, responses, .. }] if responses.len() == 2
        ));

        send(
            &mut server,
            &mut processor,
            1,
            SelectNpcChatDialogResponse { response: 0 },
        );
        assert!(matches!(
            received(&mut rx).as_slice(),
            [ServerPacket::StartChatDialog { responses, .. }]
                if responses == &vec!["Thanks.".to_string()]
        ));
        assert_eq!(server.ctx.sessions.user(1).unwrap().chat.unwrap().page, 1);

        send(
            &mut server,
            &mut processor,
            1,
            SelectNpcChatDialogResponse { response: 7 },
        );
        assert!(received(&mut rx).is_empty());

        send(
            &mut server,
            &mut processor,
            1,
            SelectNpcChatDialogResponse { response: 0 },
        );
        assert_eq!(received(&mut rx), vec![ServerPacket::EndChatDialog]);
        assert!(server.ctx.sessions.user(1).unwrap().chat.is_none());
    }

    #[test]
    fn test_end_chat_dialog_clears_state() {
        let (mut server, mut processor, _rx) = playing();
        server.ctx.sessions.user_mut(1).unwrap().body = Body::new(480.0, 518.0);
        send(
            &mut server,
            &mut processor,
            1,
            StartNpcChatDialog { npc: ELDER },
        );
        assert!(server.ctx.sessions.user(1).unwrap().chat.is_some());

        send(&mut server, &mut processor, 1, EndNpcChatDialog);
        assert!(server.ctx.sessions.user(1).unwrap().chat.is_none());
    }
}
