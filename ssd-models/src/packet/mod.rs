// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! The packet model.
//!
//! Everything that moves through the storage stack is a [`Packet`]: a tagged
//! variant over the plain host request ([`GenericPacket`]), the PCIe
//! transport wrapper ([`PciePacket`]) and the NAND command wrapper
//! ([`FlashPacket`]). Wrappers carry their origin packet and hand it back
//! when the transport layer is peeled off.
//!
//! Cross-component metadata travels in the attribute bag: the hot names
//! (`index`, `databyte`) are plain typed fields, anything else lands in a
//! side map on the leaf packet. Wrappers delegate names they do not
//! recognise to their origin.

mod generic;
mod flash;
mod pcie;

use ssd_engine::traits::{Routable, SimObject, TotalBytes};
use ssd_engine::types::AccessType;
use ssd_track::tag::{Tag, Tagged};

pub use flash::{FlashAddress, FlashCommand, FlashPacket};
pub use generic::GenericPacket;
pub use pcie::{CrcScheme, PcieGeneration, PciePacket, TlpHeader, TlpType};

/// The hot attribute names get a fixed key; everything else is late-bound.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum AttrKey {
    Index,
    DataByte,
    Other,
}

impl AttrKey {
    fn parse(name: &str) -> Self {
        match name {
            "index" => AttrKey::Index,
            "databyte" => AttrKey::DataByte,
            _ => AttrKey::Other,
        }
    }
}

/// A packet travelling through the simulated storage stack.
#[derive(Clone, Debug)]
pub enum Packet {
    Generic(GenericPacket),
    Pcie(PciePacket),
    Flash(FlashPacket),
}

impl Packet {
    /// The command this packet carries.
    #[must_use]
    pub fn command(&self) -> AccessType {
        match self {
            Packet::Generic(p) => p.command,
            Packet::Pcie(p) => p.command(),
            Packet::Flash(p) => p.command(),
        }
    }

    pub fn set_command(&mut self, command: AccessType) {
        match self {
            Packet::Generic(p) => p.command = command,
            Packet::Pcie(p) => p.set_command(command),
            Packet::Flash(p) => p.set_command(command),
        }
    }

    /// The address this packet targets. Wrappers report their transport
    /// address (TLP address, linearised flash address).
    #[must_use]
    pub fn address(&self) -> u32 {
        match self {
            Packet::Generic(p) => p.address,
            Packet::Pcie(p) => p.tlp_header.address,
            Packet::Flash(p) => p.linear_address(),
        }
    }

    pub fn set_address(&mut self, address: u32) {
        match self {
            Packet::Generic(p) => p.address = address,
            Packet::Pcie(p) => p.tlp_header.address = address,
            Packet::Flash(p) => p.set_linear_address(address),
        }
    }

    /// The number of payload bytes this packet carries.
    #[must_use]
    pub fn payload_bytes(&self) -> usize {
        match self {
            Packet::Generic(p) => p.databyte as usize,
            Packet::Pcie(p) => p.data_payload_size as usize,
            Packet::Flash(p) => p.data_size as usize,
        }
    }

    /// Read a named attribute. Unknown names on a leaf packet return `0.0`
    /// with a warning; wrappers delegate them to their origin.
    #[must_use]
    pub fn attribute(&self, name: &str) -> f64 {
        match self {
            Packet::Generic(p) => p.attribute(name),
            Packet::Pcie(p) => p.attribute(name),
            Packet::Flash(p) => p.attribute(name),
        }
    }

    pub fn set_attribute(&mut self, name: &str, value: f64) {
        match self {
            Packet::Generic(p) => p.set_attribute(name, value),
            Packet::Pcie(p) => p.set_attribute(name, value),
            Packet::Flash(p) => p.set_attribute(name, value),
        }
    }

    /// The in-flight identifier assigned by the index allocator.
    #[must_use]
    pub fn index(&self) -> i32 {
        self.attribute("index") as i32
    }

    /// Write through to the data word of the underlying request.
    pub fn set_data(&mut self, data: i32) {
        match self {
            Packet::Generic(p) => p.data = data,
            Packet::Pcie(p) => p.set_data(data),
            Packet::Flash(p) => p.set_data(data),
        }
    }

    /// The data word of the underlying request.
    #[must_use]
    pub fn data(&self) -> i32 {
        match self {
            Packet::Generic(p) => p.data,
            Packet::Pcie(p) => p.data(),
            Packet::Flash(p) => p.data(),
        }
    }

    /// Peel a transport wrapper off, recovering the origin packet. A packet
    /// with no origin is returned unchanged.
    #[must_use]
    pub fn unwrap_origin(self) -> Packet {
        match self {
            Packet::Generic(p) => Packet::Generic(p),
            Packet::Pcie(mut p) => match p.origin.take() {
                Some(origin) => *origin,
                None => Packet::Pcie(p),
            },
            Packet::Flash(mut p) => match p.origin.take() {
                Some(origin) => *origin,
                None => Packet::Flash(p),
            },
        }
    }
}

impl std::fmt::Display for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Packet::Generic(p) => p.fmt(f),
            Packet::Pcie(p) => p.fmt(f),
            Packet::Flash(p) => p.fmt(f),
        }
    }
}

impl Tagged for Packet {
    fn tag(&self) -> Tag {
        match self {
            Packet::Generic(p) => p.tag(),
            Packet::Pcie(p) => p.tag(),
            Packet::Flash(p) => p.tag(),
        }
    }
}

impl TotalBytes for Packet {
    fn total_bytes(&self) -> usize {
        match self {
            Packet::Generic(p) => p.databyte as usize,
            // On the link the framed size is what occupies the wire
            Packet::Pcie(p) => p.total_packet_size as usize,
            Packet::Flash(p) => p.data_size as usize,
        }
    }
}

impl Routable for Packet {
    fn destination(&self) -> u64 {
        self.address() as u64
    }

    fn access_type(&self) -> AccessType {
        self.command()
    }
}

impl SimObject for Packet {}
