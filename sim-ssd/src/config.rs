// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! JSON configuration loading.
//!
//! The file mirrors the sections of the simulator: `host_system`,
//! `traffic_generator`, `cache`, `dram`, `flash`, `pcie` and `simulation`.
//! Every field has a default so a minimal file only needs what it changes.
//! Unknown enum strings fall back to their default with a warning; malformed
//! values are fatal configuration errors.

use serde::Deserialize;

use ssd_models::cache::{AllocationPolicy, CacheConfig, ReplacementPolicy, WritePolicy};
use ssd_models::dram::{DramConfig, MemoryType, RefreshScheme, SpeedGrade};
use ssd_models::flash::{FlashConfig, NandConfig};
use ssd_models::host::HostConfig;
use ssd_models::ns_to_ticks;
use ssd_models::packet::PcieGeneration;
use ssd_models::pcie::PcieLinkConfig;
use ssd_models::ssd::SsdTopConfig;
use ssd_models::traffic_gen::{TrafficConfig, TrafficPattern, WorkloadTemplate};

#[derive(Deserialize, Default, Debug)]
#[serde(default)]
pub struct SimConfigFile {
    pub host_system: HostSection,
    pub traffic_generator: TrafficSection,
    pub cache: CacheSection,
    pub dram: DramSection,
    pub flash: FlashSection,
    pub pcie: PcieSection,
    pub simulation: SimulationSection,
}

#[derive(Deserialize, Debug)]
#[serde(default)]
pub struct HostSection {
    pub max_index: u32,
    pub debug_enable: bool,
}

impl Default for HostSection {
    fn default() -> Self {
        Self {
            max_index: 64,
            debug_enable: false,
        }
    }
}

/// Traffic options. The workload template is applied first; every field
/// that is present in the file then overrides the template's choice.
#[derive(Deserialize, Debug)]
#[serde(default)]
pub struct TrafficSection {
    pub workload_template: String,
    pub traffic_pattern: Option<String>,
    pub interval_ns: Option<f64>,
    pub locality_percentage: Option<u32>,
    pub write_percentage: Option<u32>,
    pub databyte_value: Option<u8>,
    pub num_transactions: usize,
    pub start_address: u32,
    pub end_address: u32,
    pub address_increment: u32,
    pub burst_size: Option<u32>,
    pub burst_interval_ns: Option<f64>,
    pub idle_time_ns: Option<f64>,
    pub delay_mean_ns: Option<f64>,
    pub delay_stddev_ns: Option<f64>,
    pub poisson_rate: Option<f64>,
    pub max_outstanding: usize,
}

impl Default for TrafficSection {
    fn default() -> Self {
        Self {
            workload_template: String::from("CUSTOM"),
            traffic_pattern: None,
            interval_ns: None,
            locality_percentage: None,
            write_percentage: None,
            databyte_value: None,
            num_transactions: 1000,
            start_address: 0,
            end_address: 0xFFFF,
            address_increment: 0x40,
            burst_size: None,
            burst_interval_ns: None,
            idle_time_ns: None,
            delay_mean_ns: None,
            delay_stddev_ns: None,
            poisson_rate: None,
            max_outstanding: 0,
        }
    }
}

#[derive(Deserialize, Debug)]
#[serde(default)]
pub struct CacheSection {
    pub size_kb: usize,
    pub line_size: usize,
    pub associativity: usize,
    pub replacement_policy: String,
    pub write_policy: String,
    pub allocation_policy: String,
    pub hit_latency_ns: f64,
    pub miss_latency_ns: f64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            size_kb: 32,
            line_size: 64,
            associativity: 4,
            replacement_policy: String::from("LRU"),
            write_policy: String::from("WRITE_BACK"),
            allocation_policy: String::from("WRITE_ALLOCATE"),
            hit_latency_ns: 1.0,
            miss_latency_ns: 10.0,
        }
    }
}

#[derive(Deserialize, Debug)]
#[serde(default)]
pub struct DramSection {
    pub memory_type: String,
    pub speed_grade: String,
    pub page_size: u32,
    pub burst_length: u32,
    pub auto_precharge: bool,
    pub refresh_enable: bool,
    pub refresh_scheme: Option<String>,
    pub num_banks: u32,
    pub num_bank_groups: u32,
    pub num_ranks: u32,
}

impl Default for DramSection {
    fn default() -> Self {
        Self {
            memory_type: String::from("DDR4"),
            speed_grade: String::from("DDR4_3200"),
            page_size: 1024,
            burst_length: 8,
            auto_precharge: true,
            refresh_enable: true,
            refresh_scheme: None,
            num_banks: 8,
            num_bank_groups: 1,
            num_ranks: 1,
        }
    }
}

#[derive(Deserialize, Debug)]
#[serde(default)]
pub struct FlashSection {
    pub num_channels: u32,
    pub dies_per_channel: u32,
    pub command_queue_depth: usize,
    pub page_size_kb: u32,
    pub pages_per_block: u32,
    pub blocks_per_die: u32,
    pub enable_wear_leveling: bool,
}

impl Default for FlashSection {
    fn default() -> Self {
        Self {
            num_channels: 4,
            dies_per_channel: 2,
            command_queue_depth: 16,
            page_size_kb: 16,
            pages_per_block: 128,
            blocks_per_die: 1024,
            enable_wear_leveling: true,
        }
    }
}

#[derive(Deserialize, Debug)]
#[serde(default)]
pub struct PcieSection {
    pub generation: u8,
    pub lanes: u8,
    pub congestion_threshold: f64,
    pub max_congestion_delay_ns: f64,
    pub enable_crc_simulation: bool,
}

impl Default for PcieSection {
    fn default() -> Self {
        Self {
            generation: 3,
            lanes: 8,
            congestion_threshold: 0.8,
            max_congestion_delay_ns: 1000.0,
            enable_crc_simulation: true,
        }
    }
}

#[derive(Deserialize, Default, Debug)]
#[serde(default)]
pub struct SimulationSection {
    /// Bound the simulated time; otherwise the run drains naturally.
    pub simulation_time_sec: Option<f64>,
    /// Overrides the traffic generator's transaction count.
    pub num_transactions: Option<usize>,
    pub seed: u64,
}

fn parse_pattern(name: &str) -> TrafficPattern {
    match name {
        "CONSTANT" => TrafficPattern::Constant,
        "BURST" => TrafficPattern::Burst,
        "POISSON" => TrafficPattern::Poisson,
        "EXPONENTIAL" => TrafficPattern::Exponential,
        "NORMAL" => TrafficPattern::Normal,
        other => {
            log::warn!("unknown traffic pattern '{other}', defaulting to CONSTANT");
            TrafficPattern::Constant
        }
    }
}

fn parse_template(name: &str) -> WorkloadTemplate {
    match name {
        "CUSTOM" => WorkloadTemplate::Custom,
        "DATABASE" => WorkloadTemplate::Database,
        "WEB_SERVER" => WorkloadTemplate::WebServer,
        "ML_INFERENCE" => WorkloadTemplate::MlInference,
        "IOT_SENSORS" => WorkloadTemplate::IotSensors,
        "STREAMING" => WorkloadTemplate::Streaming,
        other => {
            log::warn!("unknown workload template '{other}', defaulting to CUSTOM");
            WorkloadTemplate::Custom
        }
    }
}

fn parse_replacement_policy(name: &str) -> ReplacementPolicy {
    match name {
        "FIFO" => ReplacementPolicy::Fifo,
        "RANDOM" => ReplacementPolicy::Random,
        "LFU" => ReplacementPolicy::Lfu,
        "LRU" => ReplacementPolicy::Lru,
        other => {
            log::warn!("unknown replacement policy '{other}', defaulting to LRU");
            ReplacementPolicy::Lru
        }
    }
}

fn parse_write_policy(name: &str) -> WritePolicy {
    match name {
        "WRITE_THROUGH" => WritePolicy::WriteThrough,
        "WRITE_AROUND" => WritePolicy::WriteAround,
        "WRITE_BACK" => WritePolicy::WriteBack,
        other => {
            log::warn!("unknown write policy '{other}', defaulting to WRITE_BACK");
            WritePolicy::WriteBack
        }
    }
}

fn parse_allocation_policy(name: &str) -> AllocationPolicy {
    match name {
        "NO_WRITE_ALLOCATE" => AllocationPolicy::NoWriteAllocate,
        "WRITE_ALLOCATE" => AllocationPolicy::WriteAllocate,
        other => {
            log::warn!("unknown allocation policy '{other}', defaulting to WRITE_ALLOCATE");
            AllocationPolicy::WriteAllocate
        }
    }
}

fn parse_memory_type(name: &str) -> MemoryType {
    match name {
        "DDR4" => MemoryType::Ddr4,
        "DDR5" => MemoryType::Ddr5,
        "LPDDR5" => MemoryType::Lpddr5,
        other => {
            log::warn!("unknown memory type '{other}', defaulting to DDR4");
            MemoryType::Ddr4
        }
    }
}

fn parse_speed_grade(name: &str) -> SpeedGrade {
    match name {
        "DDR4_2400" => SpeedGrade::Ddr4_2400,
        "DDR4_2666" => SpeedGrade::Ddr4_2666,
        "DDR4_3200" => SpeedGrade::Ddr4_3200,
        "DDR4_4266" => SpeedGrade::Ddr4_4266,
        "DDR5_4800" => SpeedGrade::Ddr5_4800,
        "DDR5_5600" => SpeedGrade::Ddr5_5600,
        "DDR5_6400" => SpeedGrade::Ddr5_6400,
        "DDR5_8400" => SpeedGrade::Ddr5_8400,
        "LPDDR5_5500" => SpeedGrade::Lpddr5_5500,
        "LPDDR5_6400" => SpeedGrade::Lpddr5_6400,
        "LPDDR5_7500" => SpeedGrade::Lpddr5_7500,
        "LPDDR5_8533" => SpeedGrade::Lpddr5_8533,
        other => {
            log::warn!("unknown speed grade '{other}', defaulting to DDR4_3200");
            SpeedGrade::Ddr4_3200
        }
    }
}

fn parse_refresh_scheme(name: &str) -> RefreshScheme {
    match name {
        "ALL_BANK_REFRESH" => RefreshScheme::AllBank,
        "SAME_BANK_REFRESH" => RefreshScheme::SameBank,
        "PER_BANK_REFRESH" => RefreshScheme::PerBank,
        "DISTRIBUTED_REFRESH" => RefreshScheme::Distributed,
        "REFRESH_MANAGEMENT_UNIT" => RefreshScheme::RefreshManagementUnit,
        other => {
            log::warn!("unknown refresh scheme '{other}', defaulting to ALL_BANK_REFRESH");
            RefreshScheme::AllBank
        }
    }
}

impl SimConfigFile {
    /// Build the host-side configuration.
    pub fn host_config(&self) -> HostConfig {
        let section = &self.traffic_generator;
        let mut traffic = TrafficConfig::default().with_template(parse_template(
            &section.workload_template,
        ));

        if let Some(pattern) = &section.traffic_pattern {
            traffic.pattern = parse_pattern(pattern);
        }
        if let Some(interval_ns) = section.interval_ns {
            traffic.interval_ticks = ns_to_ticks(interval_ns);
        }
        if let Some(locality) = section.locality_percentage {
            traffic.locality_percentage = locality;
        }
        if let Some(writes) = section.write_percentage {
            traffic.write_percentage = writes;
        }
        if let Some(databyte) = section.databyte_value {
            traffic.databyte_value = databyte;
        }
        if let Some(burst_size) = section.burst_size {
            traffic.burst_size = burst_size;
        }
        if let Some(burst_interval_ns) = section.burst_interval_ns {
            traffic.burst_interval_ticks = ns_to_ticks(burst_interval_ns);
        }
        if let Some(idle_time_ns) = section.idle_time_ns {
            traffic.idle_time_ticks = ns_to_ticks(idle_time_ns);
        }
        if let Some(delay_mean_ns) = section.delay_mean_ns {
            traffic.delay_mean_ns = delay_mean_ns;
        }
        if let Some(delay_stddev_ns) = section.delay_stddev_ns {
            traffic.delay_stddev_ns = delay_stddev_ns;
        }
        if let Some(poisson_rate) = section.poisson_rate {
            traffic.poisson_rate = poisson_rate;
        }
        traffic.num_transactions = self
            .simulation
            .num_transactions
            .unwrap_or(section.num_transactions);
        traffic.start_address = section.start_address;
        traffic.end_address = section.end_address;
        traffic.address_increment = section.address_increment;
        traffic.max_outstanding = section.max_outstanding;
        traffic.seed = self.simulation.seed;

        HostConfig {
            max_index: self.host_system.max_index,
            traffic,
            ..HostConfig::default()
        }
    }

    /// Build the device configuration.
    pub fn ssd_config(&self) -> SsdTopConfig {
        let cache = CacheConfig {
            size_kb: self.cache.size_kb,
            line_size: self.cache.line_size,
            associativity: self.cache.associativity,
            replacement_policy: parse_replacement_policy(&self.cache.replacement_policy),
            write_policy: parse_write_policy(&self.cache.write_policy),
            allocation_policy: parse_allocation_policy(&self.cache.allocation_policy),
            hit_latency_ticks: ns_to_ticks(self.cache.hit_latency_ns),
            miss_latency_ticks: ns_to_ticks(self.cache.miss_latency_ns),
            seed: self.simulation.seed,
        };

        let dram = DramConfig {
            memory_type: parse_memory_type(&self.dram.memory_type),
            speed_grade: parse_speed_grade(&self.dram.speed_grade),
            num_banks: self.dram.num_banks,
            num_bank_groups: self.dram.num_bank_groups,
            num_ranks: self.dram.num_ranks,
            page_size: self.dram.page_size,
            burst_length: self.dram.burst_length,
            auto_precharge: self.dram.auto_precharge,
            refresh_enable: self.dram.refresh_enable,
            refresh_scheme: self
                .dram
                .refresh_scheme
                .as_deref()
                .map(parse_refresh_scheme),
            timing_override: None,
        };

        let flash = FlashConfig {
            num_channels: self.flash.num_channels,
            dies_per_channel: self.flash.dies_per_channel,
            command_queue_depth: self.flash.command_queue_depth,
            page_size_kb: self.flash.page_size_kb,
            pages_per_block: self.flash.pages_per_block,
            blocks_per_die: self.flash.blocks_per_die,
            enable_wear_leveling: self.flash.enable_wear_leveling,
        };

        let nand = NandConfig {
            num_planes: self.flash.dies_per_channel as usize,
            blocks_per_plane: self.flash.blocks_per_die as usize,
            seed: self.simulation.seed,
            ..NandConfig::default()
        };

        SsdTopConfig {
            cache,
            dram,
            flash,
            nand,
            ..SsdTopConfig::default()
        }
    }

    /// Build the PCIe link configuration; an out-of-range generation is a
    /// fatal configuration error.
    pub fn pcie_config(&self) -> Result<PcieLinkConfig, String> {
        let generation = PcieGeneration::from_number(self.pcie.generation)
            .ok_or_else(|| format!("unsupported PCIe generation {}", self.pcie.generation))?;
        Ok(PcieLinkConfig {
            generation,
            lanes: self.pcie.lanes,
            congestion_threshold: self.pcie.congestion_threshold,
            max_congestion_delay_ns: self.pcie.max_congestion_delay_ns,
            enable_crc_simulation: self.pcie.enable_crc_simulation,
            enable_congestion_model: true,
            seed: self.simulation.seed,
        })
    }
}
