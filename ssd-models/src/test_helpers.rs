// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

use std::sync::Arc;

use ssd_engine::types::AccessType;
use ssd_track::entity::Entity;

use crate::packet::{GenericPacket, Packet};

/// A read request with the index attribute already assigned.
#[must_use]
pub fn create_read(created_by: &Arc<Entity>, address: u32, databyte: u8, index: i32) -> Packet {
    let mut packet = GenericPacket::new(created_by, AccessType::Read, address, 0, databyte);
    packet.index = index;
    Packet::Generic(packet)
}

/// A write request with the index attribute already assigned.
#[must_use]
pub fn create_write(
    created_by: &Arc<Entity>,
    address: u32,
    data: i32,
    databyte: u8,
    index: i32,
) -> Packet {
    let mut packet = GenericPacket::new(created_by, AccessType::Write, address, data, databyte);
    packet.index = index;
    Packet::Generic(packet)
}
