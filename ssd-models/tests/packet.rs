// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

use ssd_engine::test_helpers::start_test;
use ssd_engine::traits::TotalBytes;
use ssd_engine::types::AccessType;
use ssd_models::packet::{
    FlashCommand, FlashPacket, GenericPacket, Packet, PcieGeneration, PciePacket,
};

#[test]
fn generic_attribute_bag() {
    let engine = start_test(file!());
    let top = engine.top();

    let mut packet = Packet::Generic(GenericPacket::new(top, AccessType::Write, 0x40, 7, 64));

    // Hot names are typed fields
    assert_eq!(packet.attribute("databyte"), 64.0);
    packet.set_attribute("index", 5.0);
    assert_eq!(packet.attribute("index"), 5.0);
    assert_eq!(packet.index(), 5);

    // Known rare names
    assert_eq!(packet.attribute("address"), 0x40 as f64);
    assert_eq!(packet.attribute("data"), 7.0);

    // Late-bound names land in the side map
    packet.set_attribute("queue_depth", 32.0);
    assert_eq!(packet.attribute("queue_depth"), 32.0);

    // Unknown names read as 0.0
    assert_eq!(packet.attribute("no_such_attribute"), 0.0);
}

#[test]
fn wrappers_delegate_to_origin() {
    let engine = start_test(file!());
    let top = engine.top();

    let mut origin = GenericPacket::new(top, AccessType::Read, 0x1234, 0, 64);
    origin.index = 9;
    let origin = Packet::Generic(origin);

    let flash = FlashPacket::wrap(top, FlashCommand::Read, origin);
    assert_eq!(flash.index, 9);
    let packet = Packet::Flash(flash);

    // Wrapper fields take precedence, unknown names delegate
    assert_eq!(packet.attribute("index"), 9.0);
    assert_eq!(packet.attribute("address"), 0x1234 as f64);

    let origin = packet.unwrap_origin();
    assert_eq!(origin.address(), 0x1234);
    assert_eq!(origin.command(), AccessType::Read);
}

#[test]
fn pcie_packet_size_and_tag() {
    let engine = start_test(file!());
    let top = engine.top();

    let mut origin = GenericPacket::new(top, AccessType::Write, 0x1000, 0, 64);
    origin.index = 300;
    let mut pcie = PciePacket::wrap(top, Packet::Generic(origin), PcieGeneration::Gen3, 8);

    // Gen3 supports 10-bit tags so the index fits unmasked
    assert_eq!(pcie.tlp_header.tag, 300);
    assert!(pcie.tlp_header.tag < PcieGeneration::Gen3.max_tag());

    // 3DW header + payload + 1.5% CRC overhead
    pcie.set_attribute("databyte", 4096.0);
    assert_eq!(pcie.total_packet_size, 12 + 4096 + 61);

    // The framed size is what occupies the wire
    let packet = Packet::Pcie(pcie);
    assert_eq!(packet.total_bytes(), 4169);
}

#[test]
fn pcie_tag_wraps_below_gen3() {
    let engine = start_test(file!());
    let top = engine.top();

    let mut origin = GenericPacket::new(top, AccessType::Read, 0, 0, 64);
    origin.index = 300;
    let pcie = PciePacket::wrap(top, Packet::Generic(origin), PcieGeneration::Gen1, 1);

    // Gen1 tags are 8 bits
    assert_eq!(pcie.tlp_header.tag, 300 % 256);
    assert!(pcie.tlp_header.tag < PcieGeneration::Gen1.max_tag());
}

#[test]
fn generation_table() {
    assert_eq!(PcieGeneration::Gen1.crc_scheme().scheme_name, "LCRC32");
    assert_eq!(PcieGeneration::Gen3.crc_scheme().processing_delay_ns, 30.0);
    assert_eq!(PcieGeneration::Gen5.crc_scheme().overhead_percent, 4.0);
    assert!(PcieGeneration::Gen5.crc_scheme().has_fec);
    assert!(PcieGeneration::Gen7.crc_scheme().ml_prediction);

    // Encoding-aware link speeds
    assert_eq!(PcieGeneration::Gen1.link_speed_gbps(), 2.5 * 0.8);
    let gen3 = PcieGeneration::Gen3.link_speed_gbps();
    assert!((gen3 - 8.0 * 128.0 / 130.0).abs() < 1e-9);
}
