//! Static game content: items, shops, NPC dialogs, maps and skills.
//!
//! Content is loaded from a TOML file at startup, or taken from [`GameData::demo`] when no file is
//! configured. It never changes while the server runs.

use crate::config::{load_toml, ConfigError};
use serde::{Deserialize, Serialize};
use shared::protocol::{EquipmentSlot, SkillType, StatType};
use std::collections::HashSet;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatBonus {
    pub stat: StatType,
    pub amount: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemTemplate {
    pub id: u16,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub value: u32,
    /// HP restored when used
    #[serde(default)]
    pub hp: u16,
    /// MP restored when used
    #[serde(default)]
    pub mp: u16,
    #[serde(default)]
    pub equip: Option<EquipmentSlot>,
    #[serde(default)]
    pub bonuses: Vec<StatBonus>,
}

impl ItemTemplate {
    pub fn is_usable(&self) -> bool {
        self.equip.is_none() && (self.hp > 0 || self.mp > 0)
    }

    pub fn bonus(&self, stat: StatType) -> u16 {
        self.bonuses
            .iter()
            .filter(|bonus| bonus.stat == stat)
            .map(|bonus| bonus.amount)
            .sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shop {
    pub id: u16,
    pub name: String,
    pub items: Vec<u16>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogResponse {
    pub text: String,
    /// Page shown after choosing this response; the dialog ends when unset.
    #[serde(default)]
    pub next: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogPage {
    pub text: String,
    #[serde(default)]
    pub responses: Vec<DialogResponse>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dialog {
    pub id: u16,
    pub pages: Vec<DialogPage>,
}

fn default_respawn_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NpcSpawn {
    pub name: String,
    pub x: f32,
    pub y: f32,
    /// NPCs without health cannot be attacked.
    #[serde(default)]
    pub health: Option<i32>,
    #[serde(default)]
    pub shop: Option<u16>,
    #[serde(default)]
    pub dialog: Option<u16>,
    #[serde(default = "default_respawn_ms")]
    pub respawn_ms: u64,
    /// Cash given to the user who lands the killing blow
    #[serde(default)]
    pub cash: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemSpawn {
    pub template: u16,
    pub amount: u8,
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeleporterSpawn {
    pub x: f32,
    pub y: f32,
    pub target_map: u16,
    pub target_x: f32,
    pub target_y: f32,
    /// Broadcast a `UseEntity` to the map when used
    #[serde(default = "default_true")]
    pub notify: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapData {
    pub id: u16,
    pub name: String,
    pub width: f32,
    pub floor_y: f32,
    #[serde(default)]
    pub npcs: Vec<NpcSpawn>,
    #[serde(default)]
    pub items: Vec<ItemSpawn>,
    #[serde(default)]
    pub teleporters: Vec<TeleporterSpawn>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StartPosition {
    pub map: u16,
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillData {
    pub skill: SkillType,
    pub mp_cost: u16,
    pub cooldown_ms: u64,
    /// HP healed, or strength added
    pub power: u16,
    /// How long a timed effect lasts
    #[serde(default)]
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameData {
    pub start: StartPosition,
    #[serde(default)]
    pub items: Vec<ItemTemplate>,
    #[serde(default)]
    pub shops: Vec<Shop>,
    #[serde(default)]
    pub dialogs: Vec<Dialog>,
    pub maps: Vec<MapData>,
    #[serde(default)]
    pub skills: Vec<SkillData>,
    /// Maximum distance for shops, NPC chat and world objects
    pub interaction_range: f32,
    pub pickup_range: f32,
    pub attack_range: f32,
}

impl GameData {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data: Self = load_toml(path)?;
        data.validate()?;
        Ok(data)
    }

    pub fn item(&self, id: u16) -> Option<&ItemTemplate> {
        self.items.iter().find(|item| item.id == id)
    }

    pub fn shop(&self, id: u16) -> Option<&Shop> {
        self.shops.iter().find(|shop| shop.id == id)
    }

    pub fn dialog(&self, id: u16) -> Option<&Dialog> {
        self.dialogs.iter().find(|dialog| dialog.id == id)
    }

    pub fn map(&self, id: u16) -> Option<&MapData> {
        self.maps.iter().find(|map| map.id == id)
    }

    pub fn skill(&self, skill: SkillType) -> Option<&SkillData> {
        self.skills.iter().find(|data| data.skill == skill)
    }

    /// Checks that every reference in the content resolves.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: String| Err(ConfigError::Invalid(message));

        let mut ids = HashSet::new();
        for item in &self.items {
            if !ids.insert(item.id) {
                return invalid(format!("duplicate item id {}", item.id));
            }
        }

        if self.map(self.start.map).is_none() {
            return invalid(format!("start map {} does not exist", self.start.map));
        }

        for shop in &self.shops {
            if shop.items.len() > u8::MAX as usize {
                return invalid(format!("shop {} sells too many items", shop.id));
            }
            if let Some(missing) = shop.items.iter().find(|id| self.item(**id).is_none()) {
                return invalid(format!("shop {} sells unknown item {}", shop.id, missing));
            }
        }

        for dialog in &self.dialogs {
            if dialog.pages.is_empty() {
                return invalid(format!("dialog {} has no pages", dialog.id));
            }
            for page in &dialog.pages {
                for response in &page.responses {
                    if matches!(response.next, Some(next) if next >= dialog.pages.len()) {
                        return invalid(format!(
                            "dialog {} response `{}` points past the last page",
                            dialog.id, response.text
                        ));
                    }
                }
            }
        }

        for map in &self.maps {
            for npc in &map.npcs {
                if matches!(npc.shop, Some(shop) if self.shop(shop).is_none()) {
                    return invalid(format!("NPC `{}` uses an unknown shop", npc.name));
                }
                if matches!(npc.dialog, Some(dialog) if self.dialog(dialog).is_none()) {
                    return invalid(format!("NPC `{}` uses an unknown dialog", npc.name));
                }
            }
            for spawn in &map.items {
                if self.item(spawn.template).is_none() {
                    return invalid(format!(
                        "map {} spawns unknown item {}",
                        map.id, spawn.template
                    ));
                }
            }
            for teleporter in &map.teleporters {
                if self.map(teleporter.target_map).is_none() {
                    return invalid(format!(
                        "map {} teleports to unknown map {}",
                        map.id, teleporter.target_map
                    ));
                }
            }
        }

        Ok(())
    }

    /// A small two-map world used when no content file is configured.
    pub fn demo() -> Self {
        let item = |id: u16, name: &str, description: &str, value: u32| ItemTemplate {
            id,
            name: name.to_string(),
            description: description.to_string(),
            value,
            hp: 0,
            mp: 0,
            equip: None,
            bonuses: Vec::new(),
        };

        let items = vec![
            ItemTemplate {
                hp: 25,
                ..item(0, "Healing Potion", "Restores 25 HP.", 10)
            },
            ItemTemplate {
                mp: 25,
                ..item(1, "Mana Potion", "Restores 25 MP.", 12)
            },
            ItemTemplate {
                equip: Some(EquipmentSlot::Weapon),
                bonuses: vec![StatBonus {
                    stat: StatType::Str,
                    amount: 3,
                }],
                ..item(2, "Wooden Sword", "A practice blade.", 40)
            },
            ItemTemplate {
                equip: Some(EquipmentSlot::Body),
                bonuses: vec![StatBonus {
                    stat: StatType::Defence,
                    amount: 2,
                }],
                ..item(3, "Leather Vest", "Better than nothing.", 35)
            },
            ItemTemplate {
                equip: Some(EquipmentSlot::Helmet),
                bonuses: vec![StatBonus {
                    stat: StatType::MaxHp,
                    amount: 10,
                }],
                ..item(4, "Iron Cap", "Keeps the rain off.", 60)
            },
        ];

        let maps = vec![
            MapData {
                id: 1,
                name: "Town".to_string(),
                width: 1600.0,
                floor_y: 550.0,
                npcs: vec![
                    NpcSpawn {
                        name: "Shopkeeper".to_string(),
                        x: 300.0,
                        y: 518.0,
                        health: None,
                        shop: Some(0),
                        dialog: None,
                        respawn_ms: default_respawn_ms(),
                        cash: 0,
                    },
                    NpcSpawn {
                        name: "Elder".to_string(),
                        x: 500.0,
                        y: 518.0,
                        health: None,
                        shop: None,
                        dialog: Some(0),
                        respawn_ms: default_respawn_ms(),
                        cash: 0,
                    },
                    NpcSpawn {
                        name: "Training Dummy".to_string(),
                        x: 800.0,
                        y: 518.0,
                        health: Some(30),
                        shop: None,
                        dialog: None,
                        respawn_ms: 5_000,
                        cash: 5,
                    },
                ],
                items: vec![ItemSpawn {
                    template: 0,
                    amount: 2,
                    x: 650.0,
                    y: 518.0,
                }],
                teleporters: vec![TeleporterSpawn {
                    x: 1500.0,
                    y: 518.0,
                    target_map: 2,
                    target_x: 100.0,
                    target_y: 518.0,
                    notify: true,
                }],
            },
            MapData {
                id: 2,
                name: "Fields".to_string(),
                width: 2400.0,
                floor_y: 550.0,
                npcs: vec![NpcSpawn {
                    name: "Slime".to_string(),
                    x: 900.0,
                    y: 518.0,
                    health: Some(60),
                    shop: None,
                    dialog: None,
                    respawn_ms: 15_000,
                    cash: 20,
                }],
                items: Vec::new(),
                teleporters: vec![TeleporterSpawn {
                    x: 40.0,
                    y: 518.0,
                    target_map: 1,
                    target_x: 1400.0,
                    target_y: 518.0,
                    notify: true,
                }],
            },
        ];

        Self {
            start: StartPosition {
                map: 1,
                x: 100.0,
                y: 518.0,
            },
            items,
            shops: vec![Shop {
                id: 0,
                name: "General Store".to_string(),
                items: vec![0, 1, 2, 3, 4],
            }],
            dialogs: vec![Dialog {
                id: 0,
                pages: vec![
                    DialogPage {
                        text: "Welcome to town, traveller.".to_string(),
                        responses: vec![
                            DialogResponse {
                                text: "What is there to do here?".to_string(),
                                next: Some(1),
                            },
                            DialogResponse {
                                text: "Goodbye.".to_string(),
                                next: None,
                            },
                        ],
                    },
                    DialogPage {
                        text: "The shopkeeper sells supplies. The fields lie to the east."
                            .to_string(),
                        responses: vec![DialogResponse {
                            text: "Thanks.".to_string(),
                            next: None,
                        }],
                    },
                ],
            }],
            maps,
            skills: vec![
                SkillData {
                    skill: SkillType::Heal,
                    mp_cost: 10,
                    cooldown_ms: 3_000,
                    power: 20,
                    duration_ms: 0,
                },
                SkillData {
                    skill: SkillType::Strengthen,
                    mp_cost: 15,
                    cooldown_ms: 20_000,
                    power: 5,
                    duration_ms: 10_000,
                },
            ],
            interaction_range: 96.0,
            pickup_range: 64.0,
            attack_range: 64.0,
        }
    }
}
