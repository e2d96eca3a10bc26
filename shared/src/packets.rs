//! Message layouts for both directions.
//!
//! Every client message is a small struct implementing [`Message`], so a server handler can
//! decode exactly the payload it expects from a reader already positioned past the opcode.
//! [`ClientPacket`] wraps them for code that needs the whole message, such as the test client.
//! Server messages are a single [`ServerPacket`] enum.

use crate::bitstream::{BitReader, BitWriter};
use crate::error::{DecodeError, EncodeError};
use crate::protocol::*;

/// A client-to-server message body with a fixed opcode.
pub trait Message: Sized {
    const ID: ClientPacketId;

    fn write_body(&self, writer: &mut BitWriter) -> Result<(), EncodeError>;

    fn read_body(reader: &mut BitReader<'_>) -> Result<Self, DecodeError>;

    /// Encodes the opcode followed by the body.
    fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let mut writer = BitWriter::new();
        writer.write_enum(Self::ID);
        self.write_body(&mut writer)?;
        Ok(writer.into_bytes())
    }
}

macro_rules! unit_message {
    ($($name:ident),+ $(,)?) => {
        $(
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
            pub struct $name;

            impl Message for $name {
                const ID: ClientPacketId = ClientPacketId::$name;

                fn write_body(&self, _writer: &mut BitWriter) -> Result<(), EncodeError> {
                    Ok(())
                }

                fn read_body(_reader: &mut BitReader<'_>) -> Result<Self, DecodeError> {
                    Ok($name)
                }
            }
        )+
    };
}

unit_message!(Attack, EndNpcChatDialog, Jump, MoveLeft, MoveRight, MoveStop, Ping);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuyFromShop {
    pub slot: u8,
    pub amount: u8,
}

impl Message for BuyFromShop {
    const ID: ClientPacketId = ClientPacketId::BuyFromShop;

    fn write_body(&self, writer: &mut BitWriter) -> Result<(), EncodeError> {
        writer.write_u8(self.slot);
        writer.write_u8(self.amount);
        Ok(())
    }

    fn read_body(reader: &mut BitReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            slot: reader.read_u8()?,
            amount: reader.read_u8()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateNewAccount {
    pub name: String,
    pub password: String,
    pub email: String,
}

impl Message for CreateNewAccount {
    const ID: ClientPacketId = ClientPacketId::CreateNewAccount;

    fn write_body(&self, writer: &mut BitWriter) -> Result<(), EncodeError> {
        writer.write_string(&self.name, MAX_NAME_LENGTH)?;
        writer.write_string(&self.password, MAX_PASSWORD_LENGTH)?;
        writer.write_string(&self.email, MAX_EMAIL_LENGTH)
    }

    fn read_body(reader: &mut BitReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            name: reader.read_string(MAX_NAME_LENGTH)?,
            password: reader.read_string(MAX_PASSWORD_LENGTH)?,
            email: reader.read_string(MAX_EMAIL_LENGTH)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropInventoryItem {
    pub slot: u8,
}

impl Message for DropInventoryItem {
    const ID: ClientPacketId = ClientPacketId::DropInventoryItem;

    fn write_body(&self, writer: &mut BitWriter) -> Result<(), EncodeError> {
        writer.write_u8(self.slot);
        Ok(())
    }

    fn read_body(reader: &mut BitReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            slot: reader.read_u8()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendEmoticon {
    pub emoticon: Emoticon,
}

impl Message for SendEmoticon {
    const ID: ClientPacketId = ClientPacketId::Emoticon;

    fn write_body(&self, writer: &mut BitWriter) -> Result<(), EncodeError> {
        writer.write_enum(self.emoticon);
        Ok(())
    }

    fn read_body(reader: &mut BitReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            emoticon: reader.read_enum()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetEquipmentItemInfo {
    pub slot: EquipmentSlot,
}

impl Message for GetEquipmentItemInfo {
    const ID: ClientPacketId = ClientPacketId::GetEquipmentItemInfo;

    fn write_body(&self, writer: &mut BitWriter) -> Result<(), EncodeError> {
        writer.write_enum(self.slot);
        Ok(())
    }

    fn read_body(reader: &mut BitReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            slot: reader.read_enum()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetInventoryItemInfo {
    pub slot: u8,
}

impl Message for GetInventoryItemInfo {
    const ID: ClientPacketId = ClientPacketId::GetInventoryItemInfo;

    fn write_body(&self, writer: &mut BitWriter) -> Result<(), EncodeError> {
        writer.write_u8(self.slot);
        Ok(())
    }

    fn read_body(reader: &mut BitReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            slot: reader.read_u8()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Login {
    pub name: String,
    pub password: String,
}

impl Message for Login {
    const ID: ClientPacketId = ClientPacketId::Login;

    fn write_body(&self, writer: &mut BitWriter) -> Result<(), EncodeError> {
        writer.write_string(&self.name, MAX_NAME_LENGTH)?;
        writer.write_string(&self.password, MAX_PASSWORD_LENGTH)
    }

    fn read_body(reader: &mut BitReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            name: reader.read_string(MAX_NAME_LENGTH)?,
            password: reader.read_string(MAX_PASSWORD_LENGTH)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PickupItem {
    pub entity: u16,
}

impl Message for PickupItem {
    const ID: ClientPacketId = ClientPacketId::PickupItem;

    fn write_body(&self, writer: &mut BitWriter) -> Result<(), EncodeError> {
        writer.write_u16(self.entity);
        Ok(())
    }

    fn read_body(reader: &mut BitReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            entity: reader.read_u16()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaiseStat {
    pub stat: StatType,
}

impl Message for RaiseStat {
    const ID: ClientPacketId = ClientPacketId::RaiseStat;

    fn write_body(&self, writer: &mut BitWriter) -> Result<(), EncodeError> {
        writer.write_enum(self.stat);
        Ok(())
    }

    fn read_body(reader: &mut BitReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            stat: reader.read_enum()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Say {
    pub text: String,
}

impl Message for Say {
    const ID: ClientPacketId = ClientPacketId::Say;

    fn write_body(&self, writer: &mut BitWriter) -> Result<(), EncodeError> {
        writer.write_string(&self.text, MAX_SAY_LENGTH)
    }

    fn read_body(reader: &mut BitReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            text: reader.read_string(MAX_SAY_LENGTH)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectAccountCharacter {
    pub index: u8,
}

impl Message for SelectAccountCharacter {
    const ID: ClientPacketId = ClientPacketId::SelectAccountCharacter;

    fn write_body(&self, writer: &mut BitWriter) -> Result<(), EncodeError> {
        writer.write_u8(self.index);
        Ok(())
    }

    fn read_body(reader: &mut BitReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            index: reader.read_u8()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectNpcChatDialogResponse {
    pub response: u8,
}

impl Message for SelectNpcChatDialogResponse {
    const ID: ClientPacketId = ClientPacketId::SelectNpcChatDialogResponse;

    fn write_body(&self, writer: &mut BitWriter) -> Result<(), EncodeError> {
        writer.write_u8(self.response);
        Ok(())
    }

    fn read_body(reader: &mut BitReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            response: reader.read_u8()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SellInventoryToShop {
    pub slot: u8,
    pub amount: u8,
}

impl Message for SellInventoryToShop {
    const ID: ClientPacketId = ClientPacketId::SellInventoryToShop;

    fn write_body(&self, writer: &mut BitWriter) -> Result<(), EncodeError> {
        writer.write_u8(self.slot);
        writer.write_u8(self.amount);
        Ok(())
    }

    fn read_body(reader: &mut BitReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            slot: reader.read_u8()?,
            amount: reader.read_u8()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetUdpPort {
    pub port: u16,
}

impl Message for SetUdpPort {
    const ID: ClientPacketId = ClientPacketId::SetUdpPort;

    fn write_body(&self, writer: &mut BitWriter) -> Result<(), EncodeError> {
        writer.write_u16(self.port);
        Ok(())
    }

    fn read_body(reader: &mut BitReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            port: reader.read_u16()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartNpcChatDialog {
    pub npc: u16,
}

impl Message for StartNpcChatDialog {
    const ID: ClientPacketId = ClientPacketId::StartNpcChatDialog;

    fn write_body(&self, writer: &mut BitWriter) -> Result<(), EncodeError> {
        writer.write_u16(self.npc);
        Ok(())
    }

    fn read_body(reader: &mut BitReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            npc: reader.read_u16()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartShopping {
    pub entity: u16,
}

impl Message for StartShopping {
    const ID: ClientPacketId = ClientPacketId::StartShopping;

    fn write_body(&self, writer: &mut BitWriter) -> Result<(), EncodeError> {
        writer.write_u16(self.entity);
        Ok(())
    }

    fn read_body(reader: &mut BitReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            entity: reader.read_u16()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnequipItem {
    pub slot: EquipmentSlot,
}

impl Message for UnequipItem {
    const ID: ClientPacketId = ClientPacketId::UnequipItem;

    fn write_body(&self, writer: &mut BitWriter) -> Result<(), EncodeError> {
        writer.write_enum(self.slot);
        Ok(())
    }

    fn read_body(reader: &mut BitReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            slot: reader.read_enum()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UseInventoryItem {
    pub slot: u8,
}

impl Message for UseInventoryItem {
    const ID: ClientPacketId = ClientPacketId::UseInventoryItem;

    fn write_body(&self, writer: &mut BitWriter) -> Result<(), EncodeError> {
        writer.write_u8(self.slot);
        Ok(())
    }

    fn read_body(reader: &mut BitReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            slot: reader.read_u8()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UseSkill {
    pub skill: SkillType,
}

impl Message for UseSkill {
    const ID: ClientPacketId = ClientPacketId::UseSkill;

    fn write_body(&self, writer: &mut BitWriter) -> Result<(), EncodeError> {
        writer.write_enum(self.skill);
        Ok(())
    }

    fn read_body(reader: &mut BitReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            skill: reader.read_enum()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UseWorld {
    pub entity: u16,
}

impl Message for UseWorld {
    const ID: ClientPacketId = ClientPacketId::UseWorld;

    fn write_body(&self, writer: &mut BitWriter) -> Result<(), EncodeError> {
        writer.write_u16(self.entity);
        Ok(())
    }

    fn read_body(reader: &mut BitReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            entity: reader.read_u16()?,
        })
    }
}

macro_rules! client_packets {
    ($($variant:ident($body:ident)),+ $(,)?) => {
        /// Any client message, tagged by its opcode.
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub enum ClientPacket {
            $($variant($body)),+
        }

        impl ClientPacket {
            pub fn id(&self) -> ClientPacketId {
                match self {
                    $(Self::$variant(_) => <$body as Message>::ID),+
                }
            }

            pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
                match self {
                    $(Self::$variant(body) => body.encode()),+
                }
            }

            pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
                let mut reader = BitReader::new(data);
                let id: ClientPacketId = reader.read_enum()?;
                match id {
                    $(ClientPacketId::$variant => {
                        Ok(Self::$variant($body::read_body(&mut reader)?))
                    })+
                }
            }
        }

        $(
            impl From<$body> for ClientPacket {
                fn from(body: $body) -> Self {
                    Self::$variant(body)
                }
            }
        )+
    };
}

client_packets! {
    Attack(Attack),
    BuyFromShop(BuyFromShop),
    CreateNewAccount(CreateNewAccount),
    DropInventoryItem(DropInventoryItem),
    Emoticon(SendEmoticon),
    EndNpcChatDialog(EndNpcChatDialog),
    GetEquipmentItemInfo(GetEquipmentItemInfo),
    GetInventoryItemInfo(GetInventoryItemInfo),
    Jump(Jump),
    Login(Login),
    MoveLeft(MoveLeft),
    MoveRight(MoveRight),
    MoveStop(MoveStop),
    PickupItem(PickupItem),
    Ping(Ping),
    RaiseStat(RaiseStat),
    Say(Say),
    SelectAccountCharacter(SelectAccountCharacter),
    SelectNpcChatDialogResponse(SelectNpcChatDialogResponse),
    SellInventoryToShop(SellInventoryToShop),
    SetUdpPort(SetUdpPort),
    StartNpcChatDialog(StartNpcChatDialog),
    StartShopping(StartShopping),
    UnequipItem(UnequipItem),
    UseInventoryItem(UseInventoryItem),
    UseSkill(UseSkill),
    UseWorld(UseWorld),
}

/// An item stack as shown in an inventory slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotItem {
    pub template: u16,
    pub amount: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ServerPacket {
    LoginSuccessful,
    LoginUnsuccessful {
        message: GameMessage,
    },
    CreateAccountResult {
        success: bool,
        message: GameMessage,
    },
    AccountCharacters {
        names: Vec<String>,
    },
    Ping,
    Chat {
        text: String,
    },
    SendMessage {
        message: GameMessage,
    },
    SetMap {
        map: u16,
    },
    SetUserIndex {
        index: u16,
    },
    CreateEntity {
        index: u16,
        kind: EntityKind,
        name: String,
        x: f32,
        y: f32,
    },
    RemoveEntity {
        index: u16,
    },
    SetCharacterPosition {
        index: u16,
        x: f32,
        y: f32,
        vel_x: f32,
        vel_y: f32,
    },
    Emote {
        index: u16,
        emoticon: Emoticon,
    },
    CharAttack {
        attacker: u16,
    },
    CharDamage {
        index: u16,
        damage: i32,
    },
    UseEntity {
        used: u16,
        user: u16,
    },
    SetStat {
        stat: StatType,
        value: u16,
    },
    SetStatPoints {
        points: u16,
    },
    SetHpMp {
        hp: u16,
        mp: u16,
    },
    SetCash {
        cash: u32,
    },
    SetInventorySlot {
        slot: u8,
        item: Option<SlotItem>,
    },
    SetEquipmentSlot {
        slot: EquipmentSlot,
        item: Option<u16>,
    },
    ItemInfo {
        name: String,
        description: String,
        value: u32,
        hp: u16,
        mp: u16,
    },
    StartShopping {
        shop: u16,
        items: Vec<(u16, u32)>,
    },
    StopShopping,
    StartChatDialog {
        npc: u16,
        text: String,
        responses: Vec<String>,
    },
    EndChatDialog,
    SkillUsed {
        index: u16,
        skill: SkillType,
    },
}

impl ServerPacket {
    pub fn id(&self) -> ServerPacketId {
        match self {
            Self::LoginSuccessful => ServerPacketId::LoginSuccessful,
            Self::LoginUnsuccessful { .. } => ServerPacketId::LoginUnsuccessful,
            Self::CreateAccountResult { .. } => ServerPacketId::CreateAccountResult,
            Self::AccountCharacters { .. } => ServerPacketId::AccountCharacters,
            Self::Ping => ServerPacketId::Ping,
            Self::Chat { .. } => ServerPacketId::Chat,
            Self::SendMessage { .. } => ServerPacketId::SendMessage,
            Self::SetMap { .. } => ServerPacketId::SetMap,
            Self::SetUserIndex { .. } => ServerPacketId::SetUserIndex,
            Self::CreateEntity { .. } => ServerPacketId::CreateEntity,
            Self::RemoveEntity { .. } => ServerPacketId::RemoveEntity,
            Self::SetCharacterPosition { .. } => ServerPacketId::SetCharacterPosition,
            Self::Emote { .. } => ServerPacketId::Emote,
            Self::CharAttack { .. } => ServerPacketId::CharAttack,
            Self::CharDamage { .. } => ServerPacketId::CharDamage,
            Self::UseEntity { .. } => ServerPacketId::UseEntity,
            Self::SetStat { .. } => ServerPacketId::SetStat,
            Self::SetStatPoints { .. } => ServerPacketId::SetStatPoints,
            Self::SetHpMp { .. } => ServerPacketId::SetHpMp,
            Self::SetCash { .. } => ServerPacketId::SetCash,
            Self::SetInventorySlot { .. } => ServerPacketId::SetInventorySlot,
            Self::SetEquipmentSlot { .. } => ServerPacketId::SetEquipmentSlot,
            Self::ItemInfo { .. } => ServerPacketId::ItemInfo,
            Self::StartShopping { .. } => ServerPacketId::StartShopping,
            Self::StopShopping => ServerPacketId::StopShopping,
            Self::StartChatDialog { .. } => ServerPacketId::StartChatDialog,
            Self::EndChatDialog => ServerPacketId::EndChatDialog,
            Self::SkillUsed { .. } => ServerPacketId::SkillUsed,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let mut w = BitWriter::new();
        w.write_enum(self.id());

        match self {
            Self::LoginSuccessful
            | Self::Ping
            | Self::StopShopping
            | Self::EndChatDialog => {}
            Self::LoginUnsuccessful { message } | Self::SendMessage { message } => {
                w.write_enum(*message);
            }
            Self::CreateAccountResult { success, message } => {
                w.write_bool(*success);
                w.write_enum(*message);
            }
            Self::AccountCharacters { names } => {
                w.write_list_len(names.len())?;
                for name in names {
                    w.write_string(name, MAX_NAME_LENGTH)?;
                }
            }
            Self::Chat { text } => w.write_string(text, MAX_CHAT_LENGTH)?,
            Self::SetMap { map } => w.write_u16(*map),
            Self::SetUserIndex { index } | Self::RemoveEntity { index } => w.write_u16(*index),
            Self::CreateEntity {
                index,
                kind,
                name,
                x,
                y,
            } => {
                w.write_u16(*index);
                w.write_enum(*kind);
                w.write_string(name, MAX_NAME_LENGTH)?;
                w.write_f32(*x);
                w.write_f32(*y);
            }
            Self::SetCharacterPosition {
                index,
                x,
                y,
                vel_x,
                vel_y,
            } => {
                w.write_u16(*index);
                w.write_f32(*x);
                w.write_f32(*y);
                w.write_f32(*vel_x);
                w.write_f32(*vel_y);
            }
            Self::Emote { index, emoticon } => {
                w.write_u16(*index);
                w.write_enum(*emoticon);
            }
            Self::CharAttack { attacker } => w.write_u16(*attacker),
            Self::CharDamage { index, damage } => {
                w.write_u16(*index);
                w.write_i32(*damage);
            }
            Self::UseEntity { used, user } => {
                w.write_u16(*used);
                w.write_u16(*user);
            }
            Self::SetStat { stat, value } => {
                w.write_enum(*stat);
                w.write_u16(*value);
            }
            Self::SetStatPoints { points } => w.write_u16(*points),
            Self::SetHpMp { hp, mp } => {
                w.write_u16(*hp);
                w.write_u16(*mp);
            }
            Self::SetCash { cash } => w.write_u32(*cash),
            Self::SetInventorySlot { slot, item } => {
                w.write_u8(*slot);
                w.write_bool(item.is_some());
                if let Some(item) = item {
                    w.write_u16(item.template);
                    w.write_u8(item.amount);
                }
            }
            Self::SetEquipmentSlot { slot, item } => {
                w.write_enum(*slot);
                w.write_bool(item.is_some());
                if let Some(template) = item {
                    w.write_u16(*template);
                }
            }
            Self::ItemInfo {
                name,
                description,
                value,
                hp,
                mp,
            } => {
                w.write_string(name, MAX_NAME_LENGTH)?;
                w.write_string(description, MAX_DESCRIPTION_LENGTH)?;
                w.write_u32(*value);
                w.write_u16(*hp);
                w.write_u16(*mp);
            }
            Self::StartShopping { shop, items } => {
                w.write_u16(*shop);
                w.write_list_len(items.len())?;
                for (template, price) in items {
                    w.write_u16(*template);
                    w.write_u32(*price);
                }
            }
            Self::StartChatDialog {
                npc,
                text,
                responses,
            } => {
                w.write_u16(*npc);
                w.write_string(text, MAX_CHAT_LENGTH)?;
                w.write_list_len(responses.len())?;
                for response in responses {
                    w.write_string(response, MAX_SAY_LENGTH)?;
                }
            }
            Self::SkillUsed { index, skill } => {
                w.write_u16(*index);
                w.write_enum(*skill);
            }
        }

        Ok(w.into_bytes())
    }

    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        let mut r = BitReader::new(data);
        let id: ServerPacketId = r.read_enum()?;

        let packet = match id {
            ServerPacketId::LoginSuccessful => Self::LoginSuccessful,
            ServerPacketId::LoginUnsuccessful => Self::LoginUnsuccessful {
                message: r.read_enum()?,
            },
            ServerPacketId::CreateAccountResult => Self::CreateAccountResult {
                success: r.read_bool()?,
                message: r.read_enum()?,
            },
            ServerPacketId::AccountCharacters => {
                let count = r.read_list_len()?;
                let mut names = Vec::with_capacity(count);
                for _ in 0..count {
                    names.push(r.read_string(MAX_NAME_LENGTH)?);
                }
                Self::AccountCharacters { names }
            }
            ServerPacketId::Ping => Self::Ping,
            ServerPacketId::Chat => Self::Chat {
                text: r.read_string(MAX_CHAT_LENGTH)?,
            },
            ServerPacketId::SendMessage => Self::SendMessage {
                message: r.read_enum()?,
            },
            ServerPacketId::SetMap => Self::SetMap { map: r.read_u16()? },
            ServerPacketId::SetUserIndex => Self::SetUserIndex {
                index: r.read_u16()?,
            },
            ServerPacketId::CreateEntity => Self::CreateEntity {
                index: r.read_u16()?,
                kind: r.read_enum()?,
                name: r.read_string(MAX_NAME_LENGTH)?,
                x: r.read_f32()?,
                y: r.read_f32()?,
            },
            ServerPacketId::RemoveEntity => Self::RemoveEntity {
                index: r.read_u16()?,
            },
            ServerPacketId::SetCharacterPosition => Self::SetCharacterPosition {
                index: r.read_u16()?,
                x: r.read_f32()?,
                y: r.read_f32()?,
                vel_x: r.read_f32()?,
                vel_y: r.read_f32()?,
            },
            ServerPacketId::Emote => Self::Emote {
                index: r.read_u16()?,
                emoticon: r.read_enum()?,
            },
            ServerPacketId::CharAttack => Self::CharAttack {
                attacker: r.read_u16()?,
            },
            ServerPacketId::CharDamage => Self::CharDamage {
                index: r.read_u16()?,
                damage: r.read_i32()?,
            },
            ServerPacketId::UseEntity => Self::UseEntity {
                used: r.read_u16()?,
                user: r.read_u16()?,
            },
            ServerPacketId::SetStat => Self::SetStat {
                stat: r.read_enum()?,
                value: r.read_u16()?,
            },
            ServerPacketId::SetStatPoints => Self::SetStatPoints {
                points: r.read_u16()?,
            },
            ServerPacketId::SetHpMp => Self::SetHpMp {
                hp: r.read_u16()?,
                mp: r.read_u16()?,
            },
            ServerPacketId::SetCash => Self::SetCash {
                cash: r.read_u32()?,
            },
            ServerPacketId::SetInventorySlot => {
                let slot = r.read_u8()?;
                let item = if r.read_bool()? {
                    Some(SlotItem {
                        template: r.read_u16()?,
                        amount: r.read_u8()?,
                    })
                } else {
                    None
                };
                Self::SetInventorySlot { slot, item }
            }
            ServerPacketId::SetEquipmentSlot => {
                let slot = r.read_enum()?;
                let item = if r.read_bool()? {
                    Some(r.read_u16()?)
                } else {
                    None
                };
                Self::SetEquipmentSlot { slot, item }
            }
            ServerPacketId::ItemInfo => Self::ItemInfo {
                name: r.read_string(MAX_NAME_LENGTH)?,
                description: r.read_string(MAX_DESCRIPTION_LENGTH)?,
                value: r.read_u32()?,
                hp: r.read_u16()?,
                mp: r.read_u16()?,
            },
            ServerPacketId::StartShopping => {
                let shop = r.read_u16()?;
                let count = r.read_list_len()?;
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push((r.read_u16()?, r.read_u32()?));
                }
                Self::StartShopping { shop, items }
            }
            ServerPacketId::StopShopping => Self::StopShopping,
            ServerPacketId::StartChatDialog => {
                let npc = r.read_u16()?;
                let text = r.read_string(MAX_CHAT_LENGTH)?;
                let count = r.read_list_len()?;
                let mut responses = Vec::with_capacity(count);
                for _ in 0..count {
                    responses.push(r.read_string(MAX_SAY_LENGTH)?);
                }
                Self::StartChatDialog {
                    npc,
                    text,
                    responses,
                }
            }
            ServerPacketId::EndChatDialog => Self::EndChatDialog,
            ServerPacketId::SkillUsed => Self::SkillUsed {
                index: r.read_u16()?,
                skill: r.read_enum()?,
            },
        };

        Ok(packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitstream::bits_for_value;

    #[test]
    fn test_login_payload_layout() {
        let bytes = Login {
            name: "alice".to_string(),
            password: "correct".to_string(),
        }
        .encode()
        .unwrap();

        // 5 opcode bits, two 5-bit length prefixes, 12 characters, rounded up to whole bytes.
        let bits = 5 + 2 * bits_for_value(30) as usize + 12 * 8;
        assert_eq!(bytes.len(), bits.div_ceil(8));

        let mut reader = BitReader::new(&bytes);
        assert_eq!(
            reader.read_enum::<ClientPacketId>().unwrap(),
            ClientPacketId::Login
        );
        let login = Login::read_body(&mut reader).unwrap();
        assert_eq!(login.name, "alice");
        assert_eq!(login.password, "correct");
    }

    #[test]
    fn test_client_packets_decode_to_what_was_sent() {
        let packets: Vec<ClientPacket> = vec![
            Attack.into(),
            BuyFromShop { slot: 3, amount: 12 }.into(),
            CreateNewAccount {
                name: "bob".to_string(),
                password: "hunter2".to_string(),
                email: "bob@example.com".to_string(),
            }
            .into(),
            SendEmoticon {
                emoticon: Emoticon::Heartbreak,
            }
            .into(),
            GetEquipmentItemInfo {
                slot: EquipmentSlot::Helmet,
            }
            .into(),
            RaiseStat {
                stat: StatType::MaxMp,
            }
            .into(),
            Say {
                text: "hello there".to_string(),
            }
            .into(),
            SetUdpPort { port: 50_123 }.into(),
            UseSkill {
                skill: SkillType::Heal,
            }
            .into(),
            UseWorld { entity: 7 }.into(),
        ];

        for packet in packets {
            let bytes = packet.encode().unwrap();
            assert_eq!(ClientPacket::decode(&bytes).unwrap(), packet);
        }
    }

    #[test]
    fn test_server_packets_decode_to_what_was_sent() {
        let packets = vec![
            ServerPacket::LoginUnsuccessful {
                message: GameMessage::LoginUserAlreadyOnline,
            },
            ServerPacket::AccountCharacters {
                names: vec!["alice".to_string(), "alt".to_string()],
            },
            ServerPacket::CreateEntity {
                index: 4,
                kind: EntityKind::Npc,
                name: "Shopkeeper".to_string(),
                x: 120.5,
                y: 518.0,
            },
            ServerPacket::SetInventorySlot {
                slot: 35,
                item: Some(SlotItem {
                    template: 2,
                    amount: 99,
                }),
            },
            ServerPacket::SetInventorySlot { slot: 0, item: None },
            ServerPacket::SetEquipmentSlot {
                slot: EquipmentSlot::Weapon,
                item: Some(1),
            },
            ServerPacket::StartShopping {
                shop: 0,
                items: vec![(0, 10), (1, 250)],
            },
            ServerPacket::StartChatDialog {
                npc: 3,
                text: "Welcome, traveller.".to_string(),
                responses: vec!["Who are you?".to_string(), "Goodbye.".to_string()],
            },
            ServerPacket::CharDamage {
                index: 9,
                damage: -5,
            },
            ServerPacket::EndChatDialog,
        ];

        for packet in packets {
            let bytes = packet.encode().unwrap();
            assert_eq!(ServerPacket::decode(&bytes).unwrap(), packet);
        }
    }

    #[test]
    fn test_undefined_opcode_is_malformed() {
        let mut writer = BitWriter::new();
        writer.write_bits(31, ClientPacketId::bits());
        let bytes = writer.into_bytes();
        assert_eq!(
            ClientPacket::decode(&bytes),
            Err(DecodeError::InvalidEnum {
                name: "ClientPacketId",
                value: 31
            })
        );
    }

    #[test]
    fn test_undefined_stat_is_malformed() {
        let mut writer = BitWriter::new();
        writer.write_enum(ClientPacketId::RaiseStat);
        writer.write_bits(7, StatType::bits());
        let bytes = writer.into_bytes();
        assert!(matches!(
            ClientPacket::decode(&bytes),
            Err(DecodeError::InvalidEnum {
                name: "StatType",
                ..
            })
        ));
    }

    #[test]
    fn test_overlong_say_is_rejected_before_sending() {
        let packet = Say {
            text: "x".repeat(MAX_SAY_LENGTH + 1),
        };
        assert_eq!(
            packet.encode(),
            Err(EncodeError::StringTooLong {
                len: MAX_SAY_LENGTH + 1,
                max: MAX_SAY_LENGTH
            })
        );
    }

    #[test]
    fn test_overlong_name_is_rejected_on_receipt() {
        let mut writer = BitWriter::new();
        writer.write_enum(ClientPacketId::Login);
        writer.write_bits(31, bits_for_value(MAX_NAME_LENGTH as u32));
        let bytes = writer.into_bytes();
        assert_eq!(
            ClientPacket::decode(&bytes),
            Err(DecodeError::StringTooLong {
                len: 31,
                max: MAX_NAME_LENGTH
            })
        );
    }

    #[test]
    fn test_truncated_payload_is_malformed() {
        let bytes = BuyFromShop { slot: 1, amount: 2 }.encode().unwrap();
        assert!(matches!(
            ClientPacket::decode(&bytes[..1]),
            Err(DecodeError::UnexpectedEnd { .. })
        ));
    }
}
