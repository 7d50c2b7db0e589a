// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

use std::collections::HashMap;
use std::sync::Arc;

use ssd_engine::types::AccessType;
use ssd_track::entity::Entity;
use ssd_track::tag::{Tag, Tagged};
use ssd_track::{create_tag, warn};

use super::AttrKey;

/// A plain host request.
#[derive(Clone, Debug)]
pub struct GenericPacket {
    created_by: Arc<Entity>,
    tag: Tag,

    pub command: AccessType,
    pub address: u32,
    pub data: i32,
    pub databyte: u8,
    pub index: i32,

    /// Late-bound attributes that are not hot enough for a field.
    extra: HashMap<String, f64>,
}

impl GenericPacket {
    #[must_use]
    pub fn new(
        created_by: &Arc<Entity>,
        command: AccessType,
        address: u32,
        data: i32,
        databyte: u8,
    ) -> Self {
        Self {
            created_by: created_by.clone(),
            tag: create_tag!(created_by),
            command,
            address,
            data,
            databyte,
            index: -1,
            extra: HashMap::new(),
        }
    }

    #[must_use]
    pub fn attribute(&self, name: &str) -> f64 {
        match AttrKey::parse(name) {
            AttrKey::Index => self.index as f64,
            AttrKey::DataByte => self.databyte as f64,
            AttrKey::Other => match name {
                "address" => self.address as f64,
                "data" => self.data as f64,
                _ => match self.extra.get(name) {
                    Some(value) => *value,
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
            AttrKey::DataByte => self.databyte = value as u8,
            AttrKey::Other => match name {
                "address" => self.address = value as u32,
                "data" => self.data = value as i32,
                _ => {
                    self.extra.insert(String::from(name), value);
                }
            },
        }
    }
}

impl std::fmt::Display for GenericPacket {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "cmd: {}, addr: {:x}, data: {}, databyte: {}",
            self.command, self.address, self.data, self.databyte
        )
    }
}

impl Tagged for GenericPacket {
    fn tag(&self) -> Tag {
        self.tag
    }
}
