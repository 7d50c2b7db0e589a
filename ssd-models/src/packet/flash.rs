// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

use std::sync::Arc;

use ssd_engine::types::AccessType;
use ssd_track::entity::Entity;
use ssd_track::tag::{Tag, Tagged};
use ssd_track::{create_tag, warn};

use super::{AttrKey, Packet};

/// NAND command set.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FlashCommand {
    Read,
    Program,
    Erase,
}

impl std::fmt::Display for FlashCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            FlashCommand::Read => write!(f, "READ"),
            FlashCommand::Program => write!(f, "PROGRAM"),
            FlashCommand::Erase => write!(f, "ERASE"),
        }
    }
}

/// NAND 5-dimensional addressing.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct FlashAddress {
    pub plane: u8,
    pub block: u16,
    /// WordLine
    pub wl: u8,
    /// String Select Line
    pub ssl: u8,
    pub page: u16,
}

impl FlashAddress {
    #[must_use]
    pub fn new(plane: u8, block: u16, wl: u8, ssl: u8, page: u16) -> Self {
        Self {
            plane,
            block,
            wl,
            ssl,
            page,
        }
    }
}

impl std::fmt::Display for FlashAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "P{}B{}W{}S{}Pg{}",
            self.plane, self.block, self.wl, self.ssl, self.page
        )
    }
}

/// A NAND command, optionally wrapping the host request it was derived from.
#[derive(Clone, Debug)]
pub struct FlashPacket {
    created_by: Arc<Entity>,
    tag: Tag,

    pub flash_command: FlashCommand,
    pub flash_address: FlashAddress,
    pub data_size: u32,
    pub index: i32,
    /// Flash channel chosen by the controller.
    pub channel: u32,

    pub origin: Option<Box<Packet>>,
}

impl FlashPacket {
    /// A bare flash command with no origin packet.
    #[must_use]
    pub fn new(created_by: &Arc<Entity>, flash_command: FlashCommand) -> Self {
        Self {
            created_by: created_by.clone(),
            tag: create_tag!(created_by),
            flash_command,
            flash_address: FlashAddress::default(),
            data_size: 0,
            index: -1,
            channel: 0,
            origin: None,
        }
    }

    /// Wrap a host request, inheriting its index and payload size.
    #[must_use]
    pub fn wrap(created_by: &Arc<Entity>, flash_command: FlashCommand, origin: Packet) -> Self {
        let index = origin.attribute("index") as i32;
        let data_size = origin.payload_bytes() as u32;
        Self {
            created_by: created_by.clone(),
            tag: create_tag!(created_by),
            flash_command,
            flash_address: FlashAddress::default(),
            data_size,
            index,
            channel: 0,
            origin: Some(Box::new(origin)),
        }
    }

    #[must_use]
    pub fn command(&self) -> AccessType {
        match self.flash_command {
            FlashCommand::Read => AccessType::Read,
            FlashCommand::Program | FlashCommand::Erase => AccessType::Write,
        }
    }

    pub fn set_command(&mut self, command: AccessType) {
        self.flash_command = match command {
            AccessType::Read => FlashCommand::Read,
            AccessType::Write => FlashCommand::Program,
        };
    }

    /// A linearised form of the 5-tuple address for routing and display.
    #[must_use]
    pub fn linear_address(&self) -> u32 {
        ((self.flash_address.plane as u32) << 20)
            | ((self.flash_address.block as u32) << 8)
            | ((self.flash_address.wl as u32) << 4)
            | ((self.flash_address.ssl as u32) << 2)
            | self.flash_address.page as u32
    }

    pub fn set_linear_address(&mut self, address: u32) {
        self.flash_address = FlashAddress {
            plane: ((address >> 20) & 0xF) as u8,
            block: ((address >> 8) & 0xFFF) as u16,
            wl: ((address >> 4) & 0xF) as u8,
            ssl: ((address >> 2) & 0x3) as u8,
            page: (address & 0x3) as u16,
        };
    }

    #[must_use]
    pub fn data(&self) -> i32 {
        match &self.origin {
            Some(origin) => origin.data(),
            None => 0,
        }
    }

    pub fn set_data(&mut self, data: i32) {
        if let Some(origin) = self.origin.as_mut() {
            origin.set_data(data);
        }
    }

    #[must_use]
    pub fn attribute(&self, name: &str) -> f64 {
        match AttrKey::parse(name) {
            AttrKey::Index => self.index as f64,
            AttrKey::DataByte => self.data_size as f64,
            AttrKey::Other => match name {
                "plane" => self.flash_address.plane as f64,
                "block" => self.flash_address.block as f64,
                "wl" | "wordline" => self.flash_address.wl as f64,
                "ssl" => self.flash_address.ssl as f64,
                "page" => self.flash_address.page as f64,
                "data_size" => self.data_size as f64,
                "channel" => self.channel as f64,
                _ => match &self.origin {
                    Some(origin) => origin.attribute(name),
                    None => {
                        warn!(self.created_by ; "unknown attribute '{name}', returning 0.0");
                        0.0
                    }
                },
            },
        }
    }

    pub fn set_attribute(&mut self, name: &str, value: f64) {
        match AttrKey::parse(name) {
            AttrKey::Index => self.index = value as i32,
            AttrKey::DataByte => self.data_size = value as u32,
            AttrKey::Other => match name {
                "plane" => self.flash_address.plane = value as u8,
                "block" => self.flash_address.block = value as u16,
                "wl" | "wordline" => self.flash_address.wl = value as u8,
                "ssl" => self.flash_address.ssl = value as u8,
                "page" => self.flash_address.page = value as u16,
                "data_size" => self.data_size = value as u32,
                "channel" => self.channel = value as u32,
                _ => match self.origin.as_mut() {
                    Some(origin) => origin.set_attribute(name, value),
                    None => {
                        warn!(self.created_by ; "unknown attribute '{name}', ignoring set");
                    }
                },
            },
        }
    }
}

impl std::fmt::Display for FlashPacket {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "FlashCmd: {}, Addr: {}, Size: {}B, Index: {}",
            self.flash_command, self.flash_address, self.data_size, self.index
        )
    }
}

impl Tagged for FlashPacket {
    fn tag(&self) -> Tag {
        self.tag
    }
}
