//! Enumerated wire types and protocol limits.

use serde::{Deserialize, Serialize};

use crate::bitstream::bits_for_count;

pub const MAX_NAME_LENGTH: usize = 30;
pub const MAX_PASSWORD_LENGTH: usize = 30;
pub const MAX_EMAIL_LENGTH: usize = 60;
pub const MAX_SAY_LENGTH: usize = 255;
pub const MAX_CHAT_LENGTH: usize = 300;
pub const MAX_DESCRIPTION_LENGTH: usize = 200;

/// An enumeration that travels as its index in the minimal number of bits.
pub trait WireEnum: Sized + Copy + 'static {
    const NAME: &'static str;
    /// Every defined value, ordered by wire index.
    const ALL: &'static [Self];

    fn to_index(self) -> u32;

    fn from_index(index: u32) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }

    fn bits() -> u8 {
        bits_for_count(Self::ALL.len() as u32)
    }
}

macro_rules! wire_enum {
    ($(#[$meta:meta])* pub enum $name:ident { $($(#[$vmeta:meta])* $variant:ident),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[repr(u8)]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $name {
            pub const COUNT: u32 = [$($name::$variant),+].len() as u32;
        }

        impl WireEnum for $name {
            const NAME: &'static str = stringify!($name);
            const ALL: &'static [Self] = &[$($name::$variant),+];

            fn to_index(self) -> u32 {
                self as u32
            }
        }
    };
}

wire_enum! {
    /// Opcodes of messages sent by the client. Order defines the wire value.
    pub enum ClientPacketId {
        Attack,
        BuyFromShop,
        CreateNewAccount,
        DropInventoryItem,
        Emoticon,
        EndNpcChatDialog,
        GetEquipmentItemInfo,
        GetInventoryItemInfo,
        Jump,
        Login,
        MoveLeft,
        MoveRight,
        MoveStop,
        PickupItem,
        Ping,
        RaiseStat,
        Say,
        SelectAccountCharacter,
        SelectNpcChatDialogResponse,
        SellInventoryToShop,
        SetUdpPort,
        StartNpcChatDialog,
        StartShopping,
        UnequipItem,
        UseInventoryItem,
        UseSkill,
        UseWorld,
    }
}

wire_enum! {
    /// Opcodes of messages sent by the server.
    pub enum ServerPacketId {
        LoginSuccessful,
        LoginUnsuccessful,
        CreateAccountResult,
        AccountCharacters,
        Ping,
        Chat,
        SendMessage,
        SetMap,
        SetUserIndex,
        CreateEntity,
        RemoveEntity,
        SetCharacterPosition,
        Emote,
        CharAttack,
        CharDamage,
        UseEntity,
        SetStat,
        SetStatPoints,
        SetHpMp,
        SetCash,
        SetInventorySlot,
        SetEquipmentSlot,
        ItemInfo,
        StartShopping,
        StopShopping,
        StartChatDialog,
        EndChatDialog,
        SkillUsed,
    }
}

wire_enum! {
    /// Canned messages the client renders in its own language.
    pub enum GameMessage {
        LoginInvalidNamePassword,
        LoginUserAlreadyOnline,
        LoginServerError,
        CreateAccountSuccessful,
        CreateAccountNameInUse,
        CreateAccountInvalidName,
        CreateAccountInvalidPassword,
        CreateAccountInvalidEmail,
        CreateAccountServerError,
        InvalidAccountCharacter,
        InventoryFull,
        NotEnoughCash,
        TooFarAway,
        NotEnoughMana,
        SkillOnCooldown,
        NoStatPoints,
        CannotEquip,
        UserNotOnline,
    }
}

impl GameMessage {
    pub fn text(self) -> &'static str {
        match self {
            Self::LoginInvalidNamePassword => "Invalid account name or password.",
            Self::LoginUserAlreadyOnline => "That account is already logged in.",
            Self::LoginServerError => "The server could not process the login.",
            Self::CreateAccountSuccessful => "Account created.",
            Self::CreateAccountNameInUse => "That account name is already in use.",
            Self::CreateAccountInvalidName => "Invalid account name.",
            Self::CreateAccountInvalidPassword => "Invalid password.",
            Self::CreateAccountInvalidEmail => "Invalid email address.",
            Self::CreateAccountServerError => "The server could not create the account.",
            Self::InvalidAccountCharacter => "Invalid character selection.",
            Self::InventoryFull => "Your inventory is full.",
            Self::NotEnoughCash => "You cannot afford that.",
            Self::TooFarAway => "You are too far away.",
            Self::NotEnoughMana => "Not enough mana.",
            Self::SkillOnCooldown => "That skill is not ready yet.",
            Self::NoStatPoints => "You have no stat points to spend.",
            Self::CannotEquip => "That item cannot be equipped.",
            Self::UserNotOnline => "No such user is online.",
        }
    }
}

wire_enum! {
    pub enum Emoticon {
        Ellipsis,
        Exclamation,
        Heartbreak,
        Question,
    }
}

wire_enum! {
    pub enum StatType {
        Str,
        Agi,
        Int,
        Defence,
        MaxHp,
        MaxMp,
    }
}

wire_enum! {
    pub enum SkillType {
        Heal,
        Strengthen,
    }
}

wire_enum! {
    pub enum EquipmentSlot {
        Body,
        Weapon,
        Helmet,
    }
}

wire_enum! {
    /// What a dynamic map entity is, so the client knows how to present it.
    pub enum EntityKind {
        User,
        Npc,
        Item,
        Teleporter,
    }
}
