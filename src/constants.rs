//! Constants for SI table processing and the scan loop

/// Well-known PIDs (EN 13818-1 / EN 300468 / A/65)
pub const PID_PAT: u16 = 0x0000;
pub const PID_NIT_ST: u16 = 0x0010;
pub const PID_SDT_BAT_ST: u16 = 0x0011;
pub const PID_VCT: u16 = 0x1FFB;

/// Table ids handled by the scanner
pub const TABLE_PAT: u8 = 0x00;
pub const TABLE_PMT: u8 = 0x02;
pub const TABLE_NIT_ACT: u8 = 0x40;
pub const TABLE_NIT_OTH: u8 = 0x41;
pub const TABLE_SDT_ACT: u8 = 0x42;
pub const TABLE_SDT_OTH: u8 = 0x46;
pub const TABLE_VCT_TERR: u8 = 0xC8;
pub const TABLE_VCT_CABLE: u8 = 0xC9;

/// One demux read returns at most one full section
pub const SECTION_BUF_SIZE: usize = 4096;

/// Simultaneously open demux filters; surplus filters queue.
pub const MAX_RUNNING_FILTERS: usize = 27;

/// Poll slice for the filter pump
pub const POLL_SLICE_MS: u64 = 25;

/// Raw copies kept per filter for bit-majority recovery of bad sections
pub const GARBAGE_RING_LEN: usize = 4;

/// Per-service channel caps
pub const AUDIO_CHAN_MAX: usize = 32;
pub const AC3_CHAN_MAX: usize = 32;
pub const SUBTITLES_MAX: usize = 32;
pub const CA_SYSTEM_ID_MAX: usize = 16;

/// Frequency tolerance when deciding two carriers are the same physical one
pub const FREQ_TOLERANCE_SAT_KHZ: u32 = 2_000; // satellite frequencies are kHz
pub const FREQ_TOLERANCE_HZ: u32 = 750_000;

/// Signal/lock poll interval while waiting on the frontend
pub const FRONTEND_POLL_MS: u64 = 50;
