// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

use std::rc::Rc;

use ssd_engine::engine::Engine;
use ssd_engine::port::{InPort, OutPort};
use ssd_engine::run_simulation;
use ssd_engine::test_helpers::start_test;
use ssd_models::error::{ErrorKind, ErrorLog};
use ssd_models::flash::{
    FlashConfig, FlashController, FlashTiming, NandConfig, NandFlash, PageState,
};
use ssd_models::packet::{FlashAddress, FlashCommand, FlashPacket, Packet};
use ssd_models::test_helpers::{create_read, create_write};
use ssd_models::PS_CLOCK_GHZ;

fn deterministic_nand_config() -> NandConfig {
    NandConfig {
        num_planes: 2,
        blocks_per_plane: 8,
        wordlines_per_block: 2,
        program_failure_prob: 0.0,
        erase_failure_prob: 0.0,
        wearout_failure_prob: 0.0,
        max_pe_cycles: 10,
        ..NandConfig::default()
    }
}

fn build_nand(
    engine: &mut Engine,
    config: NandConfig,
    error_log: ErrorLog,
) -> (Rc<NandFlash>, OutPort<Packet>, InPort<Packet>) {
    let clock = engine.clock_ghz(PS_CLOCK_GHZ);
    let top = engine.top();
    let nand = NandFlash::new_and_register(engine, &clock, top, "nand", config, error_log).unwrap();

    let mut driver = OutPort::new(top, "driver");
    driver.connect(nand.port_rx()).unwrap();
    let release_recv = InPort::new(top, "release_recv");
    nand.connect_port_release_tx(release_recv.state()).unwrap();

    (nand, driver, release_recv)
}

fn flash_command(
    engine: &Engine,
    command: FlashCommand,
    addr: FlashAddress,
    data_size: u32,
) -> Packet {
    let mut packet = FlashPacket::new(engine.top(), command);
    packet.flash_address = addr;
    packet.data_size = data_size;
    Packet::Flash(packet)
}

/// Erase, program, then a second program of the same page
/// is a device error; the counters show one erase, one successful program
/// and one failed program.
#[test]
fn program_before_erase_rule() {
    let mut engine = start_test(file!());
    let error_log = ErrorLog::new();
    let (nand, driver, release_recv) = build_nand(
        &mut engine,
        deterministic_nand_config(),
        error_log.clone(),
    );

    let addr = FlashAddress::new(0, 3, 0, 0, 0);
    let erase = flash_command(&engine, FlashCommand::Erase, addr, 0);
    let program1 = flash_command(&engine, FlashCommand::Program, addr, 64);
    let program2 = flash_command(&engine, FlashCommand::Program, addr, 64);

    engine.spawn(async move {
        driver.put(erase)?.await;
        let _ = release_recv.get()?.await;
        driver.put(program1)?.await;
        let _ = release_recv.get()?.await;
        driver.put(program2)?.await;
        let _ = release_recv.get()?.await;
        Ok(())
    });

    run_simulation!(engine);

    let stats = nand.stats();
    assert_eq!(stats.total_erases, 1);
    assert_eq!(stats.total_programs, 2);
    assert_eq!(stats.failed_programs, 1);
    assert_eq!(nand.block_erase_count(0, 3), 1);
    assert_eq!(nand.page_state(&addr), PageState::Programmed);
    assert_eq!(error_log.count_of(ErrorKind::DeviceError), 1);
}

/// Reading a clean page returns the erased 0xFF pattern into the origin
/// request; a programmed page keeps the written data.
#[test]
fn clean_page_reads_erased_pattern() {
    let mut engine = start_test(file!());
    let error_log = ErrorLog::new();
    let (nand, driver, release_recv) = build_nand(
        &mut engine,
        deterministic_nand_config(),
        error_log.clone(),
    );
    let top = engine.top().clone();

    engine.spawn(async move {
        let addr = FlashAddress::new(0, 0, 0, 0, 0);

        let origin = create_read(&top, 0x40, 64, 1);
        let mut packet = FlashPacket::wrap(&top, FlashCommand::Read, origin);
        packet.flash_address = addr;
        driver.put(Packet::Flash(packet))?.await;

        let response = release_recv.get()?.await;
        assert_eq!(response.data(), 0xFF);

        // Program the page with a data word, then read it back unchanged
        let origin = create_write(&top, 0x40, 0x5A5, 64, 2);
        let mut packet = FlashPacket::wrap(&top, FlashCommand::Program, origin);
        packet.flash_address = addr;
        driver.put(Packet::Flash(packet))?.await;
        let _ = release_recv.get()?.await;

        let origin = create_read(&top, 0x40, 64, 3);
        let mut packet = FlashPacket::wrap(&top, FlashCommand::Read, origin);
        packet.flash_address = addr;
        // A read carries its own data word; the model must not overwrite it
        packet.set_data(0x5A5);
        driver.put(Packet::Flash(packet))?.await;
        let response = release_recv.get()?.await;
        assert_eq!(response.data(), 0x5A5);
        Ok(())
    });

    run_simulation!(engine);
    assert_eq!(nand.stats().total_reads, 2);
    assert_eq!(nand.stats().total_programs, 1);
}

#[test]
fn read_timing_includes_io_transfer() {
    let mut engine = start_test(file!());
    let error_log = ErrorLog::new();
    let (nand, driver, release_recv) = build_nand(
        &mut engine,
        deterministic_nand_config(),
        error_log.clone(),
    );

    let read = flash_command(
        &engine,
        FlashCommand::Read,
        FlashAddress::new(0, 0, 0, 0, 0),
        64,
    );
    engine.spawn(async move {
        driver.put(read)?.await;
        let _ = release_recv.get()?.await;
        Ok(())
    });

    run_simulation!(engine);

    // tR 25us + 64B over an 8-bit 100MHz bus (640ns), with +-5% Gaussian
    // jitter
    let nominal_ns = 25_000.0 + 640.0;
    let elapsed_ns = engine.time_now_ns();
    assert!(elapsed_ns > 0.75 * nominal_ns && elapsed_ns < 1.25 * nominal_ns);
    assert_eq!(nand.stats().total_reads, 1);
}

#[test]
fn erase_failure_marks_block_bad() {
    let mut engine = start_test(file!());
    let error_log = ErrorLog::new();
    let mut config = deterministic_nand_config();
    config.erase_failure_prob = 1.0;
    let (nand, driver, release_recv) = build_nand(&mut engine, config, error_log.clone());

    let addr = FlashAddress::new(1, 2, 0, 0, 0);
    let erase = flash_command(&engine, FlashCommand::Erase, addr, 0);
    let read = flash_command(&engine, FlashCommand::Read, addr, 64);

    engine.spawn(async move {
        driver.put(erase)?.await;
        let _ = release_recv.get()?.await;
        // A bad block rejects further access: no response comes back
        driver.put(read)?.await;
        Ok(())
    });

    run_simulation!(engine);

    let stats = nand.stats();
    assert_eq!(stats.failed_erases, 1);
    assert_eq!(stats.bad_block_count, 1);
    assert_eq!(stats.rejected_commands, 1);
    assert!(nand.is_bad_block(1, 2));
    assert_eq!(error_log.count_of(ErrorKind::DeviceError), 2);
}

#[test]
fn out_of_range_address_is_rejected() {
    let mut engine = start_test(file!());
    let error_log = ErrorLog::new();
    let (nand, driver, _release_recv) = build_nand(
        &mut engine,
        deterministic_nand_config(),
        error_log.clone(),
    );

    let bogus = flash_command(
        &engine,
        FlashCommand::Read,
        FlashAddress::new(7, 0, 0, 0, 0),
        64,
    );
    engine.spawn(async move {
        driver.put(bogus)?.await;
        Ok(())
    });

    run_simulation!(engine);

    assert_eq!(nand.stats().rejected_commands, 1);
    assert_eq!(error_log.count_of(ErrorKind::AddressOutOfBounds), 1);
}

fn small_flash_config(num_channels: u32) -> FlashConfig {
    FlashConfig {
        num_channels,
        dies_per_channel: 1,
        command_queue_depth: 4,
        pages_per_block: 4,
        blocks_per_die: 2,
        enable_wear_leveling: false,
        ..FlashConfig::default()
    }
}

fn controller_nand_config() -> NandConfig {
    NandConfig {
        num_planes: 1,
        blocks_per_plane: 2,
        wordlines_per_block: 1,
        program_failure_prob: 0.0,
        erase_failure_prob: 0.0,
        wearout_failure_prob: 0.0,
        timing: FlashTiming {
            t_r_ns: 100.0,
            t_prog_ns: 200.0,
            t_erase_ns: 500.0,
            ..FlashTiming::default()
        },
        ..NandConfig::default()
    }
}

fn build_controller(
    engine: &mut Engine,
    num_channels: u32,
) -> (
    Rc<FlashController>,
    Vec<Rc<NandFlash>>,
    OutPort<Packet>,
    InPort<Packet>,
) {
    let clock = engine.clock_ghz(PS_CLOCK_GHZ);
    let top = engine.top();
    let error_log = ErrorLog::new();

    let controller = FlashController::new_and_register(
        engine,
        &clock,
        top,
        "flash_ctrl",
        small_flash_config(num_channels),
    )
    .unwrap();

    let mut nands = Vec::new();
    for channel in 0..num_channels as usize {
        let nand = NandFlash::new_and_register(
            engine,
            &clock,
            top,
            format!("nand{channel}").as_str(),
            controller_nand_config(),
            error_log.clone(),
        )
        .unwrap();
        controller
            .connect_port_flash_tx_i(channel, nand.port_rx())
            .unwrap();
        nand.connect_port_release_tx(controller.port_flash_rx_i(channel))
            .unwrap();
        nands.push(nand);
    }

    let mut driver = OutPort::new(top, "driver");
    driver.connect(controller.port_rx()).unwrap();
    let done_recv = InPort::new(top, "done_recv");
    controller.connect_port_tx(done_recv.state()).unwrap();

    (controller, nands, driver, done_recv)
}

/// Logical addresses are mapped to physical pages on first touch and reuse
/// the mapping afterwards.
#[test]
fn address_map_is_monotonic() {
    let mut engine = start_test(file!());
    let (controller, nands, driver, done_recv) = build_controller(&mut engine, 1);
    let top = engine.top().clone();

    engine.spawn(async move {
        for index in 0..3 {
            driver.put(create_read(&top, 0x40, 64, index))?.await;
            let response = done_recv.get()?.await;
            // The origin request comes back upstream
            assert_eq!(response.address(), 0x40);
        }
        driver.put(create_read(&top, 0x80, 64, 3))?.await;
        let _ = done_recv.get()?.await;
        Ok(())
    });

    run_simulation!(engine);

    // Two distinct logical pages were touched
    assert_eq!(controller.num_mapped(), 2);
    assert_eq!(nands[0].stats().total_reads, 4);
    let stats = controller.stats();
    assert_eq!(stats.total_commands, 4);
    assert_eq!(stats.completed_commands, 4);
    assert_eq!(stats.read_commands, 4);
}

/// Physical pages fill one channel before spilling into the next.
#[test]
fn commands_spread_across_channels() {
    let mut engine = start_test(file!());
    let (controller, nands, driver, done_recv) = build_controller(&mut engine, 2);
    let top = engine.top().clone();

    // pages_per_channel = blocks_per_die(2) * pages_per_block(4) = 8
    engine.spawn(async move {
        for index in 0..10 {
            driver
                .put(create_read(&top, index as u32 * 0x40, 64, index))?
                .await;
            let _ = done_recv.get()?.await;
        }
        Ok(())
    });

    run_simulation!(engine);

    let stats = controller.stats();
    assert_eq!(stats.total_commands, 10);
    assert_eq!(stats.channels[0].total_operations, 8);
    assert_eq!(stats.channels[1].total_operations, 2);
    assert_eq!(nands[0].stats().total_reads, 8);
    assert_eq!(nands[1].stats().total_reads, 2);
}

/// Erase commands maintain the controller's wear counters.
#[test]
fn erase_counters_track_wear() {
    let mut engine = start_test(file!());
    let (controller, nands, driver, done_recv) = build_controller(&mut engine, 1);
    let top = engine.top().clone();

    engine.spawn(async move {
        let mut erase = FlashPacket::new(&top, FlashCommand::Erase);
        erase.flash_address = FlashAddress::new(0, 1, 0, 0, 0);
        driver.put(Packet::Flash(erase))?.await;
        let _ = done_recv.get()?.await;
        Ok(())
    });

    run_simulation!(engine);

    assert_eq!(controller.stats().erase_commands, 1);
    assert_eq!(controller.erase_count_spread(), (0, 1));
    assert_eq!(nands[0].stats().total_erases, 1);
    assert_eq!(nands[0].block_erase_count(0, 1), 1);
}
