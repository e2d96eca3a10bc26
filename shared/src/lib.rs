//! Protocol definitions shared by the server and its clients.
//!
//! The wire codec lives in [`bitstream`], the enumerated wire types in [`protocol`] and the
//! message layouts in [`packets`]. Character movement constants and the [`Body`] used by the
//! server simulation are kept here so a client can predict movement with the same numbers.

pub mod bitstream;
pub mod error;
pub mod packets;
pub mod protocol;

use serde::{Deserialize, Serialize};

pub use bitstream::{BitReader, BitWriter};
pub use error::{DecodeError, EncodeError};
pub use packets::{ClientPacket, Message, ServerPacket};

pub const GRAVITY: f32 = 980.0;
pub const PLAYER_SPEED: f32 = 300.0;
pub const JUMP_VELOCITY: f32 = -400.0;
pub const PLAYER_SIZE: f32 = 32.0;

/// Horizontal intent of a character, set by the movement opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Heading {
    Left,
    Right,
    #[default]
    Stopped,
}

/// The physical state of a character on a map.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Body {
    pub x: f32,
    pub y: f32,
    pub vel_x: f32,
    pub vel_y: f32,
    pub on_ground: bool,
    pub heading: Heading,
    /// Last horizontal direction moved in; attacks go this way.
    pub facing_left: bool,
}

impl Body {
    pub fn new(x: f32, y: f32) -> Self {
        Self {
            x,
            y,
            vel_x: 0.0,
            vel_y: 0.0,
            on_ground: true,
            heading: Heading::Stopped,
            facing_left: false,
        }
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + PLAYER_SIZE / 2.0, self.y + PLAYER_SIZE / 2.0)
    }

    pub fn distance_to(&self, x: f32, y: f32) -> f32 {
        let (cx, cy) = self.center();
        ((cx - x).powi(2) + (cy - y).powi(2)).sqrt()
    }

    pub fn set_heading(&mut self, heading: Heading) {
        self.heading = heading;
        match heading {
            Heading::Left => self.facing_left = true,
            Heading::Right => self.facing_left = false,
            Heading::Stopped => {}
        }
    }

    pub fn jump(&mut self) -> bool {
        if !self.on_ground {
            return false;
        }
        self.vel_y = JUMP_VELOCITY;
        self.on_ground = false;
        true
    }

    /// Advances the body by `dt` seconds inside a map of the given width whose floor is at
    /// `floor_y`.
    pub fn step(&mut self, dt: f32, map_width: f32, floor_y: f32) {
        self.vel_x = match self.heading {
            Heading::Left => -PLAYER_SPEED,
            Heading::Right => PLAYER_SPEED,
            Heading::Stopped => 0.0,
        };

        if !self.on_ground {
            self.vel_y += GRAVITY * dt;
        }

        self.x += self.vel_x * dt;
        self.y += self.vel_y * dt;

        self.x = self.x.clamp(0.0, (map_width - PLAYER_SIZE).max(0.0));

        if self.y + PLAYER_SIZE >= floor_y {
            self.y = floor_y - PLAYER_SIZE;
            self.vel_y = 0.0;
            self.on_ground = true;
        }

        if self.y <= 0.0 {
            self.y = 0.0;
            self.vel_y = 0.0;
        }
    }

    pub fn is_moving(&self) -> bool {
        self.vel_x != 0.0 || self.vel_y != 0.0 || !self.on_ground
    }
}
