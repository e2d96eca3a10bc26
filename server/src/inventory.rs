//! Character inventory and equipment.

use serde::{Deserialize, Serialize};
use shared::packets::SlotItem;
use shared::protocol::{EquipmentSlot, WireEnum};

pub const INVENTORY_SIZE: usize = 36;
pub const MAX_STACK: u8 = 99;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemStack {
    pub template: u16,
    pub amount: u8,
}

impl From<ItemStack> for SlotItem {
    fn from(stack: ItemStack) -> Self {
        SlotItem {
            template: stack.template,
            amount: stack.amount,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    slots: Vec<Option<ItemStack>>,
}

impl Default for Inventory {
    fn default() -> Self {
        Self {
            slots: vec![None; INVENTORY_SIZE],
        }
    }
}

impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, slot: u8) -> Option<ItemStack> {
        self.slots.get(slot as usize).copied().flatten()
    }

    pub fn is_valid_slot(slot: u8) -> bool {
        (slot as usize) < INVENTORY_SIZE
    }

    /// How many of `template` could be added without anything left over.
    pub fn capacity_for(&self, template: u16) -> u32 {
        self.slots
            .iter()
            .map(|slot| match slot {
                Some(stack) if stack.template == template => (MAX_STACK - stack.amount) as u32,
                Some(_) => 0,
                None => MAX_STACK as u32,
            })
            .sum()
    }

    /// Adds items, topping up existing stacks before using empty slots.
    /// Returns the amount that did not fit and the slots that changed.
    pub fn add(&mut self, template: u16, amount: u8) -> (u8, Vec<u8>) {
        let mut remaining = amount;
        let mut changed = Vec::new();

        for (index, slot) in self.slots.iter_mut().enumerate() {
            if remaining == 0 {
                break;
            }
            if let Some(stack) = slot {
                if stack.template == template && stack.amount < MAX_STACK {
                    let moved = remaining.min(MAX_STACK - stack.amount);
                    stack.amount += moved;
                    remaining -= moved;
                    changed.push(index as u8);
                }
            }
        }

        for (index, slot) in self.slots.iter_mut().enumerate() {
            if remaining == 0 {
                break;
            }
            if slot.is_none() {
                let moved = remaining.min(MAX_STACK);
                *slot = Some(ItemStack {
                    template,
                    amount: moved,
                });
                remaining -= moved;
                changed.push(index as u8);
            }
        }

        (remaining, changed)
    }

    /// Takes up to `amount` items out of a slot, returning what was taken.
    pub fn remove(&mut self, slot: u8, amount: u8) -> Option<ItemStack> {
        let entry = self.slots.get_mut(slot as usize)?;
        let stack = entry.as_mut()?;
        let taken = amount.min(stack.amount);
        if taken == 0 {
            return None;
        }

        stack.amount -= taken;
        let template = stack.template;
        if stack.amount == 0 {
            *entry = None;
        }

        Some(ItemStack {
            template,
            amount: taken,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (u8, ItemStack)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.map(|stack| (index as u8, stack)))
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }
}

/// Equipped item templates, one per [`EquipmentSlot`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Equipment {
    slots: [Option<u16>; 3],
}

impl Equipment {
    pub fn get(&self, slot: EquipmentSlot) -> Option<u16> {
        self.slots[slot.to_index() as usize]
    }

    /// Puts `template` into `slot`, returning whatever was there before.
    pub fn set(&mut self, slot: EquipmentSlot, template: Option<u16>) -> Option<u16> {
        std::mem::replace(&mut self.slots[slot.to_index() as usize], template)
    }

    pub fn iter(&self) -> impl Iterator<Item = (EquipmentSlot, u16)> + '_ {
        EquipmentSlot::ALL
            .iter()
            .filter_map(|slot| self.get(*slot).map(|template| (*slot, template)))
    }
}
