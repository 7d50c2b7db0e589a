// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

use std::sync::Arc;

use ssd_engine::types::AccessType;
use ssd_track::entity::Entity;
use ssd_track::tag::{Tag, Tagged};
use ssd_track::{create_tag, warn};

use super::{AttrKey, Packet};

/// PCIe generations with their raw transfer rates.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum PcieGeneration {
    Gen1,
    Gen2,
    Gen3,
    Gen4,
    Gen5,
    Gen6,
    Gen7,
}

impl PcieGeneration {
    /// Raw transfer rate in GT/s.
    #[must_use]
    pub fn speed_gt_per_sec(&self) -> f64 {
        match self {
            PcieGeneration::Gen1 => 2.5,
            PcieGeneration::Gen2 => 5.0,
            PcieGeneration::Gen3 => 8.0,
            PcieGeneration::Gen4 => 16.0,
            PcieGeneration::Gen5 => 32.0,
            PcieGeneration::Gen6 => 64.0,
            PcieGeneration::Gen7 => 128.0,
        }
    }

    /// Effective per-lane rate in Gbps after encoding overhead: 8b/10b below
    /// Gen3, 128b/130b from Gen3.
    #[must_use]
    pub fn link_speed_gbps(&self) -> f64 {
        let gt = self.speed_gt_per_sec();
        if *self >= PcieGeneration::Gen3 {
            gt * 128.0 / 130.0
        } else {
            gt * 8.0 / 10.0
        }
    }

    /// The CRC/FEC scheme this generation protects the link with.
    #[must_use]
    pub fn crc_scheme(&self) -> &'static CrcScheme {
        match self {
            PcieGeneration::Gen1 => &CrcScheme {
                scheme_name: "LCRC32",
                overhead_percent: 2.0,
                processing_delay_ns: 50.0,
                error_detection_rate: 1e-12,
                retry_probability: 1e-3,
                crc_bits: 32,
                has_fec: false,
                adaptive_crc: false,
                ml_prediction: false,
            },
            PcieGeneration::Gen2 => &CrcScheme {
                scheme_name: "LCRC32+",
                overhead_percent: 1.8,
                processing_delay_ns: 45.0,
                error_detection_rate: 1e-13,
                retry_probability: 8e-4,
                crc_bits: 32,
                has_fec: false,
                adaptive_crc: false,
                ml_prediction: false,
            },
            PcieGeneration::Gen3 => &CrcScheme {
                scheme_name: "128b130b",
                overhead_percent: 1.5,
                processing_delay_ns: 30.0,
                error_detection_rate: 1e-15,
                retry_probability: 1e-4,
                crc_bits: 32,
                has_fec: false,
                adaptive_crc: false,
                ml_prediction: false,
            },
            PcieGeneration::Gen4 => &CrcScheme {
                scheme_name: "Enhanced CRC",
                overhead_percent: 1.3,
                processing_delay_ns: 25.0,
                error_detection_rate: 1e-16,
                retry_probability: 5e-5,
                crc_bits: 32,
                has_fec: false,
                adaptive_crc: false,
                ml_prediction: false,
            },
            PcieGeneration::Gen5 => &CrcScheme {
                scheme_name: "FEC+CRC",
                overhead_percent: 4.0,
                processing_delay_ns: 20.0,
                error_detection_rate: 1e-17,
                retry_probability: 1e-5,
                crc_bits: 64,
                has_fec: true,
                adaptive_crc: false,
                ml_prediction: false,
            },
            PcieGeneration::Gen6 => &CrcScheme {
                scheme_name: "Advanced FEC",
                overhead_percent: 3.2,
                processing_delay_ns: 15.0,
                error_detection_rate: 1e-18,
                retry_probability: 5e-6,
                crc_bits: 64,
                has_fec: true,
                adaptive_crc: true,
                ml_prediction: false,
            },
            PcieGeneration::Gen7 => &CrcScheme {
                scheme_name: "AI-FEC",
                overhead_percent: 2.5,
                processing_delay_ns: 5.0,
                error_detection_rate: 1e-19,
                retry_probability: 1e-6,
                crc_bits: 128,
                has_fec: true,
                adaptive_crc: true,
                ml_prediction: true,
            },
        }
    }

    /// Transaction tags are 8 bits below Gen3 and 10 bits from Gen3.
    #[must_use]
    pub fn max_tag(&self) -> u16 {
        if *self >= PcieGeneration::Gen3 {
            1024
        } else {
            256
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            PcieGeneration::Gen1 => "PCIe Gen1",
            PcieGeneration::Gen2 => "PCIe Gen2",
            PcieGeneration::Gen3 => "PCIe Gen3",
            PcieGeneration::Gen4 => "PCIe Gen4",
            PcieGeneration::Gen5 => "PCIe Gen5",
            PcieGeneration::Gen6 => "PCIe Gen6",
            PcieGeneration::Gen7 => "PCIe Gen7",
        }
    }

    /// Parse the numeric form used in configuration files.
    #[must_use]
    pub fn from_number(generation: u8) -> Option<Self> {
        match generation {
            1 => Some(PcieGeneration::Gen1),
            2 => Some(PcieGeneration::Gen2),
            3 => Some(PcieGeneration::Gen3),
            4 => Some(PcieGeneration::Gen4),
            5 => Some(PcieGeneration::Gen5),
            6 => Some(PcieGeneration::Gen6),
            7 => Some(PcieGeneration::Gen7),
            _ => None,
        }
    }
}

/// CRC scheme characteristics of one PCIe generation.
#[derive(Clone, Debug)]
pub struct CrcScheme {
    pub scheme_name: &'static str,
    /// CRC overhead as a percentage of header + payload.
    pub overhead_percent: f64,
    /// CRC calculation/verification delay.
    pub processing_delay_ns: f64,
    /// Error detection capability.
    pub error_detection_rate: f64,
    /// Probability of a retry due to CRC failure.
    pub retry_probability: f64,
    pub crc_bits: u32,
    pub has_fec: bool,
    /// Dynamic CRC strength adjustment.
    pub adaptive_crc: bool,
    /// Machine-learning based error prediction.
    pub ml_prediction: bool,
}

/// Transaction Layer Packet types.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TlpType {
    MemoryRead,
    MemoryWrite,
}

/// PCIe TLP header.
#[derive(Copy, Clone, Debug)]
pub struct TlpHeader {
    pub tlp_type: TlpType,
    /// TLP format: 0 selects the 3DW header, anything else 4DW.
    pub format: u8,
    /// Data payload length in DW.
    pub length: u16,
    pub requester_id: u16,
    /// Transaction tag; bounded by
    /// [`max_tag`](PcieGeneration::max_tag).
    pub tag: u16,
    pub completer_id: u16,
    pub address: u32,
}

impl Default for TlpHeader {
    fn default() -> Self {
        Self {
            tlp_type: TlpType::MemoryRead,
            format: 0,
            length: 1,
            requester_id: 0,
            tag: 0,
            completer_id: 0,
            address: 0,
        }
    }
}

impl TlpHeader {
    /// TLP header size in bytes: 3DW (12 bytes) or 4DW (16 bytes).
    #[must_use]
    pub fn header_size(&self) -> u32 {
        if self.format == 0 {
            12
        } else {
            16
        }
    }
}

/// A TLP on the link, wrapping the request it transports.
#[derive(Clone, Debug)]
pub struct PciePacket {
    created_by: Arc<Entity>,
    tag: Tag,

    pub tlp_header: TlpHeader,
    pub generation: PcieGeneration,
    pub lanes: u8,
    /// Actual data size in bytes.
    pub data_payload_size: u32,
    /// Including headers and CRC overhead.
    pub total_packet_size: u32,

    pub crc_error_injected: bool,
    pub retry_count: u32,

    pub origin: Option<Box<Packet>>,
}

impl PciePacket {
    /// Wrap a packet for transport over the link.
    #[must_use]
    pub fn wrap(
        created_by: &Arc<Entity>,
        origin: Packet,
        generation: PcieGeneration,
        lanes: u8,
    ) -> Self {
        let mut tlp_header = TlpHeader {
            tlp_type: match origin.command() {
                AccessType::Read => TlpType::MemoryRead,
                AccessType::Write => TlpType::MemoryWrite,
            },
            requester_id: 0x0100,
            completer_id: 0x0200,
            address: origin.address(),
            ..TlpHeader::default()
        };

        let mut data_payload_size = origin.payload_bytes() as u32;
        if data_payload_size == 0 {
            data_payload_size = 64;
        }
        tlp_header.length = ((data_payload_size + 3) / 4) as u16;
        tlp_header.tag = (origin.attribute("index") as u16) % generation.max_tag();

        let mut packet = Self {
            created_by: created_by.clone(),
            tag: create_tag!(created_by),
            tlp_header,
            generation,
            lanes,
            data_payload_size,
            total_packet_size: 0,
            crc_error_injected: false,
            retry_count: 0,
            origin: Some(Box::new(origin)),
        };
        packet.calculate_packet_size();
        packet
    }

    /// Recompute `total_packet_size` from header, payload and CRC overhead.
    pub fn calculate_packet_size(&mut self) {
        let scheme = self.generation.crc_scheme();
        let base_size = self.tlp_header.header_size() + self.data_payload_size;
        let crc_overhead = (base_size as f64 * scheme.overhead_percent / 100.0) as u32;
        self.total_packet_size = base_size + crc_overhead;
    }

    #[must_use]
    pub fn command(&self) -> AccessType {
        match self.tlp_header.tlp_type {
            TlpType::MemoryRead => AccessType::Read,
            TlpType::MemoryWrite => AccessType::Write,
        }
    }

    pub fn set_command(&mut self, command: AccessType) {
        self.tlp_header.tlp_type = match command {
            AccessType::Read => TlpType::MemoryRead,
            AccessType::Write => TlpType::MemoryWrite,
        };
    }

    /// Link transmission time of this TLP in ns across all lanes.
    #[must_use]
    pub fn transmission_time_ns(&self) -> f64 {
        let effective_bandwidth_gbps = self.generation.link_speed_gbps() * self.lanes as f64;
        let bytes_per_ns = effective_bandwidth_gbps / 8.0;
        self.total_packet_size as f64 / bytes_per_ns
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
            AttrKey::DataByte => self.data_payload_size as f64,
            AttrKey::Index => match &self.origin {
                Some(origin) => origin.attribute("index"),
                None => {
                    warn!(self.created_by ; "unknown attribute 'index', returning 0.0");
                    0.0
                }
            },
            AttrKey::Other => match name {
                "lanes" => self.lanes as f64,
                "tag" => self.tlp_header.tag as f64,
                "total_size" => self.total_packet_size as f64,
                "crc_overhead" => self.generation.crc_scheme().overhead_percent,
                "retry_count" => self.retry_count as f64,
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
            AttrKey::DataByte => {
                self.data_payload_size = value as u32;
                self.calculate_packet_size();
            }
            AttrKey::Index => {
                if let Some(origin) = self.origin.as_mut() {
                    origin.set_attribute("index", value);
                }
                self.tlp_header.tag = (value as u16) % self.generation.max_tag();
            }
            AttrKey::Other => match name {
                "lanes" => self.lanes = value as u8,
                "tag" => self.tlp_header.tag = value as u16,
                "retry_count" => self.retry_count = value as u32,
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

impl std::fmt::Display for PciePacket {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let tlp_str = match self.tlp_header.tlp_type {
            TlpType::MemoryRead => "MRd",
            TlpType::MemoryWrite => "MWr",
        };
        write!(
            f,
            "{} x{}, TLP: {}, Tag: {}, Addr: 0x{:x}, Size: {}B, Retries: {}",
            self.generation.name(),
            self.lanes,
            tlp_str,
            self.tlp_header.tag,
            self.tlp_header.address,
            self.total_packet_size,
            self.retry_count
        )
    }
}

impl Tagged for PciePacket {
    fn tag(&self) -> Tag {
        self.tag
    }
}
