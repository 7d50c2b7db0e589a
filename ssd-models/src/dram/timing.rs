// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! DRAM timing presets.
//!
//! A `(MemoryType, SpeedGrade)` pair maps to a concrete [`DramTiming`]
//! record. All values are in picosecond ticks of the storage clock.

/// Memory technology types.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum MemoryType {
    #[default]
    Ddr4,
    Ddr5,
    Lpddr5,
}

impl std::fmt::Display for MemoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            MemoryType::Ddr4 => write!(f, "DDR4"),
            MemoryType::Ddr5 => write!(f, "DDR5"),
            MemoryType::Lpddr5 => write!(f, "LPDDR5"),
        }
    }
}

/// Refresh schemes for different memory types.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum RefreshScheme {
    /// Traditional refresh - all banks refreshed together (DDR4)
    #[default]
    AllBank,
    /// Same bank group refresh (DDR5/LPDDR5 optimisation)
    SameBank,
    /// Individual bank refresh (DDR5/LPDDR5 fine-grained)
    PerBank,
    /// Distributed refresh across time (LPDDR5 power optimisation)
    Distributed,
    /// RMU-based refresh (DDR5 advanced)
    RefreshManagementUnit,
}

impl std::fmt::Display for RefreshScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            RefreshScheme::AllBank => write!(f, "ALL_BANK"),
            RefreshScheme::SameBank => write!(f, "SAME_BANK"),
            RefreshScheme::PerBank => write!(f, "PER_BANK"),
            RefreshScheme::Distributed => write!(f, "DISTRIBUTED"),
            RefreshScheme::RefreshManagementUnit => write!(f, "RMU"),
        }
    }
}

/// Speed grades for the supported memory types.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SpeedGrade {
    Ddr4_2400,
    Ddr4_2666,
    Ddr4_3200,
    Ddr4_4266,

    Ddr5_4800,
    Ddr5_5600,
    Ddr5_6400,
    Ddr5_8400,

    Lpddr5_5500,
    Lpddr5_6400,
    Lpddr5_7500,
    Lpddr5_8533,
}

impl SpeedGrade {
    /// Whether this grade belongs to the given memory type.
    #[must_use]
    pub fn is_valid_for(&self, memory_type: MemoryType) -> bool {
        matches!(
            (memory_type, self),
            (
                MemoryType::Ddr4,
                SpeedGrade::Ddr4_2400
                    | SpeedGrade::Ddr4_2666
                    | SpeedGrade::Ddr4_3200
                    | SpeedGrade::Ddr4_4266
            ) | (
                MemoryType::Ddr5,
                SpeedGrade::Ddr5_4800
                    | SpeedGrade::Ddr5_5600
                    | SpeedGrade::Ddr5_6400
                    | SpeedGrade::Ddr5_8400
            ) | (
                MemoryType::Lpddr5,
                SpeedGrade::Lpddr5_5500
                    | SpeedGrade::Lpddr5_6400
                    | SpeedGrade::Lpddr5_7500
                    | SpeedGrade::Lpddr5_8533
            )
        )
    }

    /// The default grade for each memory type.
    #[must_use]
    pub fn default_for(memory_type: MemoryType) -> Self {
        match memory_type {
            MemoryType::Ddr4 => SpeedGrade::Ddr4_3200,
            MemoryType::Ddr5 => SpeedGrade::Ddr5_4800,
            MemoryType::Lpddr5 => SpeedGrade::Lpddr5_6400,
        }
    }
}

impl std::fmt::Display for SpeedGrade {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let name = match self {
            SpeedGrade::Ddr4_2400 => "DDR4-2400",
            SpeedGrade::Ddr4_2666 => "DDR4-2666",
            SpeedGrade::Ddr4_3200 => "DDR4-3200",
            SpeedGrade::Ddr4_4266 => "DDR4-4266",
            SpeedGrade::Ddr5_4800 => "DDR5-4800",
            SpeedGrade::Ddr5_5600 => "DDR5-5600",
            SpeedGrade::Ddr5_6400 => "DDR5-6400",
            SpeedGrade::Ddr5_8400 => "DDR5-8400",
            SpeedGrade::Lpddr5_5500 => "LPDDR5-5500",
            SpeedGrade::Lpddr5_6400 => "LPDDR5-6400",
            SpeedGrade::Lpddr5_7500 => "LPDDR5-7500",
            SpeedGrade::Lpddr5_8533 => "LPDDR5-8533",
        };
        write!(f, "{name}")
    }
}

/// DRAM timing parameters in picosecond ticks.
#[derive(Clone, Debug)]
pub struct DramTiming {
    /// CAS latency.
    pub t_cl: u64,
    /// RAS to CAS delay.
    pub t_rcd: u64,
    /// Row precharge time.
    pub t_rp: u64,
    /// Row active minimum.
    pub t_ras: u64,
    /// Write recovery time.
    pub t_wr: u64,
    /// Refresh cycle time.
    pub t_rfc: u64,
    /// Average refresh interval.
    pub t_refi: u64,
    /// Burst duration.
    pub t_burst: u64,

    // Bank group specific timings (DDR5/LPDDR5)
    /// CAS to CAS delay across bank groups.
    pub t_ccd_l: u64,
    /// CAS to CAS delay within a bank group.
    pub t_ccd_s: u64,
    /// RAS to RAS delay across bank groups.
    pub t_rrd_l: u64,
    /// RAS to RAS delay within a bank group.
    pub t_rrd_s: u64,

    // Refresh scheme specific timings
    pub refresh_scheme: RefreshScheme,
    /// All-bank refresh cycle time.
    pub t_rfc_ab: u64,
    /// Same-bank refresh cycle time.
    pub t_rfc_sb: u64,
    /// Per-bank refresh cycle time.
    pub t_rfc_pb: u64,
    /// Per-bank refresh interval.
    pub t_refi_pb: u64,
    /// Number of rows refreshed per operation.
    pub refresh_granularity: u32,
}

impl Default for DramTiming {
    fn default() -> Self {
        Self::create(MemoryType::Ddr4, SpeedGrade::Ddr4_3200)
    }
}

impl DramTiming {
    /// Create the timing record for a memory type and speed grade.
    ///
    /// An invalid combination falls back to the type's default grade.
    #[must_use]
    pub fn create(memory_type: MemoryType, grade: SpeedGrade) -> Self {
        let grade = if grade.is_valid_for(memory_type) {
            grade
        } else {
            let fallback = SpeedGrade::default_for(memory_type);
            log::warn!("invalid speed grade {grade} for {memory_type}, using {fallback}");
            fallback
        };

        match memory_type {
            MemoryType::Ddr4 => Self::create_ddr4(grade),
            MemoryType::Ddr5 => Self::create_ddr5(grade),
            MemoryType::Lpddr5 => Self::create_lpddr5(grade),
        }
    }

    fn create_ddr4(grade: SpeedGrade) -> Self {
        let (t_cl, t_rcd, t_rp, t_ras, t_burst) = match grade {
            // DDR4-2400 (1200 MHz, 0.833 ns cycle)
            SpeedGrade::Ddr4_2400 => (15_000, 15_000, 15_000, 35_000, 3_330),
            // DDR4-2666 (1333 MHz, 0.75 ns cycle)
            SpeedGrade::Ddr4_2666 => (13_500, 13_500, 13_500, 31_500, 3_000),
            // DDR4-4266 (2133 MHz, 0.468 ns cycle)
            SpeedGrade::Ddr4_4266 => (13_000, 13_000, 13_000, 30_000, 1_870),
            // DDR4-3200 (1600 MHz, 0.625 ns cycle)
            _ => (14_000, 14_000, 14_000, 32_000, 2_500),
        };

        Self {
            t_cl,
            t_rcd,
            t_rp,
            t_ras,
            t_burst,
            t_wr: 15_000,
            // 350 ns for 8Gb chips
            t_rfc: 350_000,
            // 7.8 us refresh interval
            t_refi: 7_800_000,
            // DDR4 has no bank groups, both CCD values match
            t_ccd_l: 4_000,
            t_ccd_s: 4_000,
            t_rrd_l: 6_000,
            t_rrd_s: 4_000,
            refresh_scheme: RefreshScheme::AllBank,
            t_rfc_ab: 350_000,
            t_rfc_sb: 350_000,
            t_rfc_pb: 60_000,
            // tREFI / 16
            t_refi_pb: 488_000,
            refresh_granularity: 8192,
        }
    }

    fn create_ddr5(grade: SpeedGrade) -> Self {
        let (t_cl, t_rcd, t_rp, t_ras, t_burst) = match grade {
            // DDR5-5600 (2800 MHz, 0.357 ns cycle)
            SpeedGrade::Ddr5_5600 => (9_000, 9_000, 9_000, 23_000, 1_430),
            // DDR5-6400 (3200 MHz, 0.3125 ns cycle)
            SpeedGrade::Ddr5_6400 => (8_000, 8_000, 8_000, 21_000, 1_250),
            // DDR5-8400 (4200 MHz, 0.238 ns cycle)
            SpeedGrade::Ddr5_8400 => (7_000, 7_000, 7_000, 18_000, 950),
            // DDR5-4800 (2400 MHz, 0.417 ns cycle)
            _ => (10_000, 10_000, 10_000, 25_000, 1_670),
        };

        Self {
            t_cl,
            t_rcd,
            t_rp,
            t_ras,
            t_burst,
            t_wr: 12_000,
            // 295 ns for 16Gb chips
            t_rfc: 295_000,
            // 3.9 us refresh interval
            t_refi: 3_900_000,
            t_ccd_l: 6_000,
            t_ccd_s: 4_000,
            t_rrd_l: 6_000,
            t_rrd_s: 4_000,
            refresh_scheme: RefreshScheme::SameBank,
            t_rfc_ab: 295_000,
            t_rfc_sb: 100_000,
            t_rfc_pb: 50_000,
            t_refi_pb: 244_000,
            refresh_granularity: 16_384,
        }
    }

    fn create_lpddr5(grade: SpeedGrade) -> Self {
        let (t_cl, t_rcd, t_rp, t_ras, t_burst) = match grade {
            // LPDDR5-5500 (2750 MHz, 0.364 ns cycle)
            SpeedGrade::Lpddr5_5500 => (8_000, 8_000, 8_000, 18_000, 1_450),
            // LPDDR5-7500 (3750 MHz, 0.267 ns cycle)
            SpeedGrade::Lpddr5_7500 => (6_000, 6_000, 6_000, 14_000, 1_070),
            // LPDDR5-8533 (4266 MHz, 0.234 ns cycle)
            SpeedGrade::Lpddr5_8533 => (5_000, 5_000, 5_000, 13_000, 940),
            // LPDDR5-6400 (3200 MHz, 0.3125 ns cycle)
            _ => (7_000, 7_000, 7_000, 16_000, 1_250),
        };

        Self {
            t_cl,
            t_rcd,
            t_rp,
            t_ras,
            t_burst,
            t_wr: 10_000,
            // Mobile optimised refresh
            t_rfc: 180_000,
            t_refi: 3_900_000,
            t_ccd_l: 5_000,
            t_ccd_s: 3_000,
            t_rrd_l: 5_000,
            t_rrd_s: 3_000,
            refresh_scheme: RefreshScheme::Distributed,
            t_rfc_ab: 180_000,
            t_rfc_sb: 90_000,
            t_rfc_pb: 30_000,
            t_refi_pb: 244_000,
            refresh_granularity: 16_384,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_presets() {
        let ddr4 = DramTiming::create(MemoryType::Ddr4, SpeedGrade::Ddr4_3200);
        assert_eq!(ddr4.t_cl, 14_000);
        assert_eq!(ddr4.t_ras, 32_000);
        assert_eq!(ddr4.t_burst, 2_500);
        assert_eq!(ddr4.t_rfc, 350_000);
        assert_eq!(ddr4.t_refi, 7_800_000);
        assert_eq!(ddr4.refresh_scheme, RefreshScheme::AllBank);

        let ddr5 = DramTiming::create(MemoryType::Ddr5, SpeedGrade::Ddr5_4800);
        assert_eq!(ddr5.t_cl, 10_000);
        assert_eq!(ddr5.t_ras, 25_000);
        assert_eq!(ddr5.t_rfc, 295_000);
        assert_eq!(ddr5.t_refi, 3_900_000);
        assert_eq!(ddr5.t_ccd_s, 4_000);
        assert_eq!(ddr5.t_ccd_l, 6_000);

        let lp = DramTiming::create(MemoryType::Lpddr5, SpeedGrade::Lpddr5_6400);
        assert_eq!(lp.t_cl, 7_000);
        assert_eq!(lp.t_ras, 16_000);
        assert_eq!(lp.t_rfc, 180_000);
        assert_eq!(lp.t_refi, 3_900_000);
    }

    #[test]
    fn invalid_grade_falls_back() {
        let timing = DramTiming::create(MemoryType::Ddr4, SpeedGrade::Ddr5_4800);
        // Fell back to DDR4-3200
        assert_eq!(timing.t_cl, 14_000);
        assert_eq!(timing.refresh_scheme, RefreshScheme::AllBank);
    }
}
