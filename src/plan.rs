//! Channel-plan boundary: which frequencies a blind scan walks.
//!
//! The scan loop only ever asks three questions per channel index (base
//! offset, step width and the permitted offset sequence), so the tables
//! here are a representative trim of the full per-country rasters. A
//! satellite scan takes an explicit seed list instead; there is no
//! synthesized raster for it.

use thiserror::Error;

use crate::frontend::{Modulation, ScanType};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown country code '{0}'")]
    UnknownCountry(String),
    #[error("no {1:?} channel plan for country '{0}'; supply a seed list")]
    NoPlan(String, ScanType),
    #[error("scan type {0:?} not supported by frontend '{1}'")]
    UnsupportedScanType(ScanType, String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum ChannelList {
    EuropeTerr,
    FranceTerr,
    BritainTerr,
    AustraliaTerr,
    EuropeCable,
    FinlandCable,
    AtscVsbAir,
    AtscQamCable,
}

impl ChannelList {
    pub fn channel_max(self) -> u32 {
        match self {
            ChannelList::EuropeTerr
            | ChannelList::FranceTerr
            | ChannelList::BritainTerr
            | ChannelList::AustraliaTerr => 69,
            ChannelList::EuropeCable | ChannelList::FinlandCable => 94,
            ChannelList::AtscVsbAir => 69,
            ChannelList::AtscQamCable => 78,
        }
    }

    /// Base frequency the channel raster counts from; `None` marks a
    /// hole in the raster (channel unused in this plan).
    pub fn base_offset(self, channel: u32) -> Option<u32> {
        match self {
            ChannelList::EuropeTerr | ChannelList::AustraliaTerr => match channel {
                5..=12 => Some(142_500_000),
                21..=69 => Some(306_000_000),
                _ => None,
            },
            ChannelList::FranceTerr | ChannelList::BritainTerr => match channel {
                21..=69 => Some(306_000_000),
                _ => None,
            },
            ChannelList::EuropeCable | ChannelList::FinlandCable => match channel {
                1..=94 => Some(106_000_000),
                _ => None,
            },
            ChannelList::AtscVsbAir => match channel {
                2..=4 => Some(45_000_000),
                5..=6 => Some(49_000_000),
                7..=13 => Some(135_000_000),
                14..=69 => Some(389_000_000),
                _ => None,
            },
            ChannelList::AtscQamCable => match channel {
                2..=4 => Some(45_000_000),
                5..=6 => Some(49_000_000),
                7..=13 => Some(135_000_000),
                14..=78 => Some(39_000_000),
                _ => None,
            },
        }
    }

    pub fn freq_step(self, channel: u32) -> u32 {
        match self {
            ChannelList::EuropeTerr | ChannelList::AustraliaTerr if channel <= 12 => 7_000_000,
            ChannelList::EuropeTerr
            | ChannelList::FranceTerr
            | ChannelList::BritainTerr
            | ChannelList::AustraliaTerr
            | ChannelList::EuropeCable
            | ChannelList::FinlandCable => 8_000_000,
            ChannelList::AtscVsbAir | ChannelList::AtscQamCable => 6_000_000,
        }
    }

    pub fn bandwidth(self, channel: u32) -> u32 {
        match self {
            ChannelList::AtscVsbAir | ChannelList::AtscQamCable => 6_000_000,
            _ => self.freq_step(channel),
        }
    }

    /// The permitted frequency-offset sequence; index walks 0.. and
    /// `None` ends the offset loop. The sequences here are per-plan,
    /// not per-channel.
    pub fn freq_offset(self, _channel: u32, index: u32) -> Option<i32> {
        let seq: &[i32] = match self {
            ChannelList::FranceTerr | ChannelList::BritainTerr => &[0, 166_667, -166_667],
            ChannelList::AustraliaTerr => &[0, 125_000],
            ChannelList::FinlandCable => &[0, 250_000],
            _ => &[0],
        };
        seq.get(index as usize).copied()
    }

    pub fn scan_type(self) -> ScanType {
        match self {
            ChannelList::EuropeTerr
            | ChannelList::FranceTerr
            | ChannelList::BritainTerr
            | ChannelList::AustraliaTerr => ScanType::Terrestrial,
            ChannelList::EuropeCable | ChannelList::FinlandCable => ScanType::Cable,
            ChannelList::AtscVsbAir | ChannelList::AtscQamCable => ScanType::Atsc,
        }
    }
}

/// Center frequency for a channel index, offsets not yet applied.
pub fn channel_to_frequency(channel: u32, list: ChannelList) -> Option<u32> {
    list.base_offset(channel).map(|base| base + channel * list.freq_step(channel))
}

/// Resolves a country code to the channel plan for the requested scan
/// technology. Unknown codes are a configuration error, not a retryable
/// condition.
pub fn country_plan(code: &str, scan_type: ScanType) -> Result<ChannelList, ConfigError> {
    let cc = code.to_ascii_uppercase();
    let known = [
        "DE", "AT", "CH", "ES", "IT", "NL", "BE", "SE", "NO", "DK", "PL", "CZ", "FR", "GB", "AU",
        "FI", "US", "CA", "TW",
    ];
    if !known.contains(&cc.as_str()) {
        return Err(ConfigError::UnknownCountry(code.to_string()));
    }
    match scan_type {
        ScanType::Terrestrial => match cc.as_str() {
            "FR" => Ok(ChannelList::FranceTerr),
            "GB" => Ok(ChannelList::BritainTerr),
            "AU" => Ok(ChannelList::AustraliaTerr),
            "US" | "CA" | "TW" => Err(ConfigError::NoPlan(cc, scan_type)),
            _ => Ok(ChannelList::EuropeTerr),
        },
        ScanType::Cable => match cc.as_str() {
            "FI" => Ok(ChannelList::FinlandCable),
            "US" | "CA" | "TW" => Err(ConfigError::NoPlan(cc, scan_type)),
            _ => Ok(ChannelList::EuropeCable),
        },
        ScanType::Atsc => match cc.as_str() {
            "US" | "CA" | "TW" => Ok(ChannelList::AtscVsbAir),
            _ => Err(ConfigError::NoPlan(cc, scan_type)),
        },
        ScanType::Satellite => Err(ConfigError::NoPlan(cc, scan_type)),
    }
}

/// The DVB-C symbol rates worth blind-trying, most common first.
/// Index order matters: the scan loop walks them in sequence.
pub fn dvbc_symbolrate(index: u32) -> Option<u32> {
    // 8MHz, rolloff 0.15 -> symbolrate <= 6956521
    const RATES: [u32; 18] = [
        6_900_000, 6_875_000, 6_956_500, 6_956_000, 6_952_000, 6_950_000, 6_790_000, 6_811_000,
        6_250_000, 6_111_000,
        // 7MHz
        6_086_000, 5_900_000, 5_483_000,
        // 6MHz
        5_217_000, 5_156_000, 5_000_000, 4_000_000, 3_450_000,
    ];
    RATES.get(index as usize).copied()
}

pub const DVBC_SYMBOLRATE_MAX_INDEX: u32 = 17;

/// Theoretical symbol-rate ceiling for a channel raster width
/// (rolloff 0.15).
pub fn max_dvbc_srate(step: u32) -> u32 {
    (step as f64 / 1.15) as u32
}

/// Cable modulation loop, probability order.
pub fn dvbc_modulation(index: u32) -> Modulation {
    match index {
        0 => Modulation::Qam64,
        1 => Modulation::Qam256,
        2 => Modulation::Qam128,
        _ => Modulation::Auto,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uhf_channel_frequencies() {
        // E21 = 474 MHz, E69 = 858 MHz
        assert_eq!(channel_to_frequency(21, ChannelList::EuropeTerr), Some(474_000_000));
        assert_eq!(channel_to_frequency(69, ChannelList::EuropeTerr), Some(858_000_000));
        // VHF band uses the 7 MHz raster
        assert_eq!(channel_to_frequency(5, ChannelList::EuropeTerr), Some(177_500_000));
        // raster hole between VHF and UHF
        assert_eq!(channel_to_frequency(13, ChannelList::EuropeTerr), None);
    }

    #[test]
    fn atsc_channel_frequencies() {
        assert_eq!(channel_to_frequency(2, ChannelList::AtscVsbAir), Some(57_000_000));
        assert_eq!(channel_to_frequency(7, ChannelList::AtscVsbAir), Some(177_000_000));
        assert_eq!(channel_to_frequency(14, ChannelList::AtscVsbAir), Some(473_000_000));
    }

    #[test]
    fn offset_sequences_terminate() {
        assert_eq!(ChannelList::FranceTerr.freq_offset(21, 0), Some(0));
        assert_eq!(ChannelList::FranceTerr.freq_offset(21, 2), Some(-166_667));
        assert_eq!(ChannelList::FranceTerr.freq_offset(21, 3), None);
        assert_eq!(ChannelList::EuropeTerr.freq_offset(21, 1), None);
    }

    #[test]
    fn country_resolution() {
        assert_eq!(
            country_plan("de", ScanType::Terrestrial).unwrap(),
            ChannelList::EuropeTerr
        );
        assert_eq!(country_plan("FI", ScanType::Cable).unwrap(), ChannelList::FinlandCable);
        assert_eq!(country_plan("us", ScanType::Atsc).unwrap(), ChannelList::AtscVsbAir);
        assert!(matches!(
            country_plan("XX", ScanType::Terrestrial),
            Err(ConfigError::UnknownCountry(_))
        ));
        assert!(matches!(
            country_plan("DE", ScanType::Satellite),
            Err(ConfigError::NoPlan(_, _))
        ));
    }

    #[test]
    fn symbolrate_table_respects_bandwidth_ceiling() {
        assert_eq!(dvbc_symbolrate(0), Some(6_900_000));
        assert_eq!(dvbc_symbolrate(18), None);
        assert!(dvbc_symbolrate(0).unwrap() <= max_dvbc_srate(8_000_000));
        assert!(dvbc_symbolrate(13).unwrap() <= max_dvbc_srate(6_000_000));
    }
}
