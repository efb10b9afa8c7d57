//! Frontend tuning-parameter types shared by the descriptor decoders,
//! the catalog and the tuner boundary.
//!
//! Every enum that a delivery-system descriptor can leave unspecified
//! carries an `Auto` variant; `Auto` is the sentinel the catalog treats as
//! "matches anything" and the value `mark_auto_retry` resets to.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ScanType {
    Terrestrial,
    Cable,
    Satellite,
    Atsc,
}

impl ScanType {
    pub fn name(self) -> &'static str {
        match self {
            ScanType::Terrestrial => "TERRESTRIAL",
            ScanType::Cable => "CABLE",
            ScanType::Satellite => "SATELLITE",
            ScanType::Atsc => "TERRCABLE_ATSC",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DeliverySystem {
    DvbT,
    DvbT2,
    DvbC,
    DvbC2,
    DvbS,
    DvbS2,
    Atsc,
    AtscCable,
}

impl DeliverySystem {
    /// 2nd-generation systems need explicit driver support (FE_CAN_2G).
    pub fn is_second_gen(self) -> bool {
        matches!(self, DeliverySystem::DvbT2 | DeliverySystem::DvbC2 | DeliverySystem::DvbS2)
    }

    pub fn scan_type(self) -> ScanType {
        match self {
            DeliverySystem::DvbT | DeliverySystem::DvbT2 => ScanType::Terrestrial,
            DeliverySystem::DvbC | DeliverySystem::DvbC2 => ScanType::Cable,
            DeliverySystem::DvbS | DeliverySystem::DvbS2 => ScanType::Satellite,
            DeliverySystem::Atsc | DeliverySystem::AtscCable => ScanType::Atsc,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Modulation {
    Qpsk,
    Psk8,
    Qam16,
    Qam32,
    Qam64,
    Qam128,
    Qam256,
    Vsb8,
    Vsb16,
    Auto,
}

impl Modulation {
    pub fn name(self) -> &'static str {
        match self {
            Modulation::Qpsk => "QPSK",
            Modulation::Psk8 => "8PSK",
            Modulation::Qam16 => "QAM16",
            Modulation::Qam32 => "QAM32",
            Modulation::Qam64 => "QAM64",
            Modulation::Qam128 => "QAM128",
            Modulation::Qam256 => "QAM256",
            Modulation::Vsb8 => "8VSB",
            Modulation::Vsb16 => "16VSB",
            Modulation::Auto => "AUTO",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CodeRate {
    None,
    Fec1_2,
    Fec2_3,
    Fec3_4,
    Fec3_5,
    Fec4_5,
    Fec5_6,
    Fec7_8,
    Fec8_9,
    Fec9_10,
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum GuardInterval {
    G1_4,
    G1_8,
    G1_16,
    G1_32,
    G1_64,
    G1_128,
    G19_128,
    G19_256,
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TransmissionMode {
    M1k,
    M2k,
    M4k,
    M8k,
    M16k,
    M32k,
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Hierarchy {
    None,
    H1,
    H2,
    H4,
    Auto,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub enum Polarization {
    #[default]
    Horizontal,
    Vertical,
    CircularLeft,
    CircularRight,
}

impl Polarization {
    pub fn name(self) -> &'static str {
        match self {
            Polarization::Horizontal => "H",
            Polarization::Vertical => "V",
            Polarization::CircularLeft => "L",
            Polarization::CircularRight => "R",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Rolloff {
    R35,
    R25,
    R20,
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Inversion {
    Off,
    On,
    Auto,
}

/// Frontend status bits as reported by the hardware (or its emulation).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeStatus {
    pub signal: bool,
    pub carrier: bool,
    pub lock: bool,
}

impl FeStatus {
    pub fn has_any_signal(&self) -> bool {
        self.signal || self.carrier
    }
}

/// What the attached frontend advertises. Candidates outside these ranges
/// are skipped, never retried.
#[derive(Debug, Clone)]
pub struct TunerCapabilities {
    pub name: String,
    pub delivery_systems: Vec<DeliverySystem>,
    /// Hz, except satellite frontends: kHz (intermediate frequency)
    pub frequency_min: u32,
    pub frequency_max: u32,
    pub symbol_rate_min: u32,
    pub symbol_rate_max: u32,
    /// DVB-T2/C2/S2 capable
    pub can_second_gen: bool,
    /// inversion setting the hardware wants when unknown
    pub inversion: Inversion,
}

impl TunerCapabilities {
    pub fn supports(&self, scan_type: ScanType) -> bool {
        self.delivery_systems.iter().any(|d| d.scan_type() == scan_type)
    }

    pub fn frequency_in_range(&self, f: u32) -> bool {
        f >= self.frequency_min && f <= self.frequency_max
    }

    pub fn symbol_rate_in_range(&self, sr: u32) -> bool {
        sr >= self.symbol_rate_min && sr <= self.symbol_rate_max
    }
}
