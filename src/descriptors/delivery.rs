//! Delivery-system descriptor decoding (EN 300468 6.2.13, 6.2.16 and the
//! extension forms). Each decoder turns one fixed bit-packed record into a
//! plain struct; enum fields outside their defined range decode to the
//! AUTO sentinel instead of failing.

use log::{info, warn};

use super::{bcd32, get_u16, get_u32};
use crate::frontend::{
    CodeRate, DeliverySystem, GuardInterval, Hierarchy, Modulation, Polarization, Rolloff,
    TransmissionMode,
};

#[derive(Debug, Clone, PartialEq)]
pub struct SatelliteDelivery {
    /// kHz
    pub frequency: u32,
    pub orbital_position: u16,
    pub west_east: bool,
    pub polarization: Polarization,
    pub rolloff: Rolloff,
    pub delsys: DeliverySystem,
    pub modulation: Modulation,
    pub symbolrate: u32,
    pub coderate: CodeRate,
}

/// 300468 6.2.13.2. Frequency is BCD GHz with the decimal point after the
/// third digit, so ×10 yields kHz.
pub fn satellite(p: &[u8]) -> Option<SatelliteDelivery> {
    if p.len() < 11 {
        return None;
    }
    let frequency = 10 * bcd32(p[0], p[1], p[2], p[3]);
    let orbital_position = get_u16(&p[4..]);
    let west_east = p[6] & 0x80 != 0;
    let polarization = match (p[6] & 0x60) >> 5 {
        0 => Polarization::Horizontal,
        1 => Polarization::Vertical,
        2 => Polarization::CircularLeft,
        _ => Polarization::CircularRight,
    };
    let rolloff = match (p[6] & 0x18) >> 3 {
        0 => Rolloff::R35,
        1 => Rolloff::R25,
        2 => Rolloff::R20,
        _ => {
            warn!("reserved rolloff value 3 found");
            Rolloff::Auto
        }
    };
    let mut delsys =
        if p[6] & 0x04 != 0 { DeliverySystem::DvbS2 } else { DeliverySystem::DvbS };
    let modulation = match p[6] & 0x03 {
        1 => Modulation::Qpsk,
        2 => Modulation::Psk8,
        3 => Modulation::Qam16,
        _ => Modulation::Auto,
    };
    let symbolrate = 10 * bcd32(p[7], p[8], p[9], p[10] & 0xF0);
    let coderate = inner_fec(p[10] & 0x0F);

    // some NITs are broken: 1st-generation record with parameters only
    // a 2nd-generation carrier can have
    if modulation == Modulation::Psk8
        || rolloff == Rolloff::R25
        || rolloff == Rolloff::R20
        || coderate == CodeRate::Fec9_10
        || coderate == CodeRate::Fec3_5
    {
        if delsys == DeliverySystem::DvbS {
            info!("fixing broken NIT, setting modulation system to DVB-S2");
        }
        delsys = DeliverySystem::DvbS2;
    }

    Some(SatelliteDelivery {
        frequency,
        orbital_position,
        west_east,
        polarization,
        rolloff,
        delsys,
        modulation,
        symbolrate,
        coderate,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct CableDelivery {
    /// Hz
    pub frequency: u32,
    pub modulation: Modulation,
    pub symbolrate: u32,
    pub coderate: CodeRate,
}

/// 300468 6.2.13.1. Frequency is BCD MHz with the decimal point after the
/// fourth digit, so ×100 yields Hz.
pub fn cable(p: &[u8]) -> Option<CableDelivery> {
    if p.len() < 11 {
        return None;
    }
    let frequency = 100 * bcd32(p[0], p[1], p[2], p[3]);
    let modulation = match p[6] {
        1 => Modulation::Qam16,
        2 => Modulation::Qam32,
        3 => Modulation::Qam64,
        4 => Modulation::Qam128,
        5 => Modulation::Qam256,
        _ => {
            info!("undefined cable modulation");
            Modulation::Auto
        }
    };
    let symbolrate = 10 * bcd32(p[7], p[8], p[9], p[10] & 0xF0);
    let coderate = inner_fec(p[10] & 0x0F);
    Some(CableDelivery { frequency, modulation, symbolrate, coderate })
}

#[derive(Debug, Clone, PartialEq)]
pub struct TerrestrialDelivery {
    /// Hz; zero means "see other frequencies"
    pub center_frequency: u32,
    pub bandwidth: u32,
    pub priority: bool,
    pub time_slicing: bool,
    pub mpe_fec: bool,
    pub modulation: Modulation,
    pub hierarchy: Hierarchy,
    pub coderate: CodeRate,
    pub coderate_lp: CodeRate,
    pub guard: GuardInterval,
    pub transmission: TransmissionMode,
    pub other_frequency_flag: bool,
}

/// 300468 6.2.13.4. Center frequency is a raw 32-bit value in 10 Hz steps.
pub fn terrestrial(p: &[u8]) -> Option<TerrestrialDelivery> {
    if p.len() < 7 {
        return None;
    }
    let center_frequency = 10u32.wrapping_mul(get_u32(p));
    let bandwidth = match p[4] >> 5 {
        0 => 8_000_000,
        1 => 7_000_000,
        2 => 6_000_000,
        3 => 5_000_000,
        _ => {
            info!("undefined bandwidth value found");
            8_000_000
        }
    };
    let priority = (p[4] >> 4) & 0x1 != 0;
    let time_slicing = (p[4] >> 3) & 0x1 == 0;
    let mpe_fec = (p[4] >> 2) & 0x1 == 0;
    let modulation = match p[5] >> 6 {
        0 => Modulation::Qpsk,
        1 => Modulation::Qam16,
        2 => Modulation::Qam64,
        _ => {
            info!("undefined constellation value found");
            Modulation::Auto
        }
    };
    let hierarchy = match (p[5] >> 3) & 0x7 {
        0 | 4 => Hierarchy::None,
        1 | 5 => Hierarchy::H1,
        2 | 6 => Hierarchy::H2,
        _ => Hierarchy::H4,
    };
    let coderate = terr_fec(p[5] & 0x7);
    let mut coderate_lp = terr_fec((p[6] >> 5) & 0x7);
    if hierarchy == Hierarchy::None {
        coderate_lp = CodeRate::None;
    }
    let guard = match (p[6] >> 3) & 0x3 {
        0 => GuardInterval::G1_32,
        1 => GuardInterval::G1_16,
        2 => GuardInterval::G1_8,
        _ => GuardInterval::G1_4,
    };
    let transmission = match (p[6] >> 1) & 0x3 {
        0 => TransmissionMode::M2k,
        1 => TransmissionMode::M8k,
        2 => TransmissionMode::M4k,
        _ => {
            info!("undefined transmission mode");
            TransmissionMode::Auto
        }
    };
    let other_frequency_flag = p[6] & 0x01 != 0;
    Some(TerrestrialDelivery {
        center_frequency,
        bandwidth,
        priority,
        time_slicing,
        mpe_fec,
        modulation,
        hierarchy,
        coderate,
        coderate_lp,
        guard,
        transmission,
        other_frequency_flag,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct T2Cell {
    pub cell_id: u16,
    /// center frequencies, Hz; more than one only under TFS
    pub centers: Vec<u32>,
    /// (cell id extension, transposer frequency Hz)
    pub transposers: Vec<(u8, u32)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct T2Extended {
    pub siso_miso: bool,
    pub bandwidth: u32,
    pub guard: GuardInterval,
    pub transmission: TransmissionMode,
    pub other_frequency_flag: bool,
    pub tfs: bool,
    pub cells: Vec<T2Cell>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct T2Delivery {
    pub plp_id: u8,
    pub system_id: u16,
    pub extended: Option<T2Extended>,
}

/// 300468 6.4.6.3 (extension tag 0x04). The short form carries only
/// plp_id and T2_system_id.
pub fn t2(c: &[u8]) -> Option<T2Delivery> {
    if c.len() < 3 {
        return None;
    }
    let plp_id = c[0];
    let system_id = get_u16(&c[1..]);
    if c.len() < 5 {
        return Some(T2Delivery { plp_id, system_id, extended: None });
    }

    let siso_miso = (c[3] >> 6) == 1;
    let bandwidth = match (c[3] >> 2) & 0xF {
        0 => 8_000_000,
        1 => 7_000_000,
        2 => 6_000_000,
        3 => 5_000_000,
        4 => 10_000_000,
        5 => 1_712_000,
        _ => 8_000_000,
    };
    let guard = match (c[4] >> 5) & 0x7 {
        0 => GuardInterval::G1_32,
        1 => GuardInterval::G1_16,
        2 => GuardInterval::G1_8,
        3 => GuardInterval::G1_4,
        4 => GuardInterval::G1_128,
        5 => GuardInterval::G19_128,
        6 => GuardInterval::G19_256,
        _ => GuardInterval::Auto,
    };
    let transmission = match (c[4] >> 2) & 0x7 {
        0 => TransmissionMode::M2k,
        1 => TransmissionMode::M8k,
        2 => TransmissionMode::M4k,
        3 => TransmissionMode::M1k,
        4 => TransmissionMode::M16k,
        5 => TransmissionMode::M32k,
        _ => TransmissionMode::Auto,
    };
    let other_frequency_flag = (c[4] >> 1) & 0x1 != 0;
    let tfs = c[4] & 0x1 != 0;

    let mut cells = Vec::new();
    let mut i = 5;
    while i + 2 <= c.len() {
        let cell_id = get_u16(&c[i..]);
        i += 2;
        let mut centers = Vec::new();
        if tfs {
            if i >= c.len() {
                break;
            }
            let mut loop_len = c[i] as usize;
            i += 1;
            while loop_len >= 4 && i + 4 <= c.len() {
                centers.push(10 * get_u32(&c[i..]));
                i += 4;
                loop_len -= 4;
            }
        } else {
            if i + 4 > c.len() {
                break;
            }
            centers.push(10 * get_u32(&c[i..]));
            i += 4;
        }
        if i >= c.len() {
            cells.push(T2Cell { cell_id, centers, transposers: Vec::new() });
            break;
        }
        let mut subcell_len = c[i] as usize;
        i += 1;
        let mut transposers = Vec::new();
        while subcell_len >= 5 && i + 5 <= c.len() {
            transposers.push((c[i], 10 * get_u32(&c[i + 1..])));
            i += 5;
            subcell_len -= 5;
        }
        cells.push(T2Cell { cell_id, centers, transposers });
    }

    Some(T2Delivery {
        plp_id,
        system_id,
        extended: Some(T2Extended {
            siso_miso,
            bandwidth,
            guard,
            transmission,
            other_frequency_flag,
            tfs,
            cells,
        }),
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct C2Delivery {
    pub plp_id: u8,
    pub data_slice_id: u8,
    /// Hz, raw 32 bit (not BCD)
    pub frequency: u32,
    /// 0 = data slice, 1 = C2 system center, 2 = static data slice
    pub frequency_type: u8,
    pub guard: GuardInterval,
}

/// 300468 6.4.6.1 (extension tag 0x0D).
pub fn c2(c: &[u8]) -> Option<C2Delivery> {
    if c.len() < 7 {
        return None;
    }
    let plp_id = c[0];
    let data_slice_id = c[1];
    let frequency = get_u32(&c[2..]);
    let frequency_type = match (c[6] & 0xC0) >> 6 {
        t @ 0..=2 => t,
        _ => 0,
    };
    let guard = match c[6] & 0x07 {
        0 => GuardInterval::G1_128,
        1 => GuardInterval::G1_64,
        _ => GuardInterval::G1_128,
    };
    Some(C2Delivery { plp_id, data_slice_id, frequency, frequency_type, guard })
}

fn inner_fec(code: u8) -> CodeRate {
    match code {
        1 => CodeRate::Fec1_2,
        2 => CodeRate::Fec2_3,
        3 => CodeRate::Fec3_4,
        4 => CodeRate::Fec5_6,
        5 => CodeRate::Fec7_8,
        6 => CodeRate::Fec8_9,
        7 => CodeRate::Fec3_5,
        8 => CodeRate::Fec4_5,
        9 => CodeRate::Fec9_10,
        15 => CodeRate::None,
        _ => {
            info!("undefined inner fec {code}");
            CodeRate::Auto
        }
    }
}

fn terr_fec(code: u8) -> CodeRate {
    match code {
        0 => CodeRate::Fec1_2,
        1 => CodeRate::Fec2_3,
        2 => CodeRate::Fec3_4,
        3 => CodeRate::Fec5_6,
        4 => CodeRate::Fec7_8,
        _ => {
            info!("undefined terrestrial coderate {code}");
            CodeRate::Auto
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn satellite_bcd_scaling() {
        // 1175.0000 GHz-notation BCD -> 11_750_000 kHz
        let mut p = vec![0x01, 0x17, 0x50, 0x00];
        p.extend_from_slice(&[0x00, 0xC0]); // orbital 0x00C0 = 19.2E
        p.push(0b0_01_00_0_01); // east, vertical, rolloff .35, DVB-S, QPSK
        p.extend_from_slice(&[0x02, 0x75, 0x00, 0x03]); // sr 27500, fec 3/4
        let d = satellite(&p).unwrap();
        assert_eq!(d.frequency, 11_750_000);
        assert_eq!(d.polarization, Polarization::Vertical);
        assert_eq!(d.delsys, DeliverySystem::DvbS);
        assert_eq!(d.modulation, Modulation::Qpsk);
        assert_eq!(d.symbolrate, 27_500_000);
        assert_eq!(d.coderate, CodeRate::Fec3_4);
    }

    #[test]
    fn satellite_broken_nit_upgrades_to_s2() {
        let mut p = vec![0x01, 0x17, 0x50, 0x00, 0x00, 0xC0];
        p.push(0b0_00_00_0_10); // claims DVB-S but 8PSK
        p.extend_from_slice(&[0x02, 0x20, 0x00, 0x09]); // fec 9/10
        let d = satellite(&p).unwrap();
        assert_eq!(d.delsys, DeliverySystem::DvbS2);
    }

    #[test]
    fn cable_bcd_scaling() {
        // same BCD digits as the satellite case, cable scale: x100 -> Hz
        let p = [0x01, 0x17, 0x50, 0x00, 0xFF, 0xF1, 0x03, 0x00, 0x69, 0x00, 0x02];
        let d = cable(&p).unwrap();
        assert_eq!(d.frequency, 117_500_000);
        assert_eq!(d.modulation, Modulation::Qam64);
        assert_eq!(d.symbolrate, 6_900_000);
        assert_eq!(d.coderate, CodeRate::Fec2_3);
    }

    #[test]
    fn terrestrial_record() {
        let f10 = 47_400_000u32; // 474 MHz in 10 Hz units
        let mut p = f10.to_be_bytes().to_vec();
        p.push(0b001_0_0_0_00); // 7 MHz, prio 0
        p.push(0b01_000_001); // QAM16, hierarchy none, fec 2/3
        p.push(0b000_01_01_0); // lp 1/2, guard 1/16, 8k, no other freq
        let d = terrestrial(&p).unwrap();
        assert_eq!(d.center_frequency, 474_000_000);
        assert_eq!(d.bandwidth, 7_000_000);
        assert_eq!(d.modulation, Modulation::Qam16);
        assert_eq!(d.coderate, CodeRate::Fec2_3);
        assert_eq!(d.coderate_lp, CodeRate::None); // forced by hierarchy none
        assert_eq!(d.guard, GuardInterval::G1_16);
        assert_eq!(d.transmission, TransmissionMode::M8k);
        assert!(!d.other_frequency_flag);
    }

    #[test]
    fn t2_short_form() {
        let d = t2(&[0x03, 0x12, 0x34]).unwrap();
        assert_eq!(d.plp_id, 3);
        assert_eq!(d.system_id, 0x1234);
        assert!(d.extended.is_none());
    }

    #[test]
    fn t2_extended_with_subcells() {
        let mut c = vec![0x01, 0x00, 0x2A];
        c.push(0b00_0000_00); // SISO, 8 MHz
        c.push(0b010_001_1_0); // guard 1/8, 8k mode, other freq, no tfs
        c.extend_from_slice(&[0x00, 0x05]); // cell id 5
        c.extend_from_slice(&(50_600_000u32).to_be_bytes()); // 506 MHz
        c.push(5); // subcell loop: one entry
        c.push(0x01);
        c.extend_from_slice(&(57_800_000u32).to_be_bytes()); // 578 MHz
        let d = t2(&c).unwrap();
        let ext = d.extended.unwrap();
        assert!(ext.other_frequency_flag);
        assert_eq!(ext.cells.len(), 1);
        assert_eq!(ext.cells[0].cell_id, 5);
        assert_eq!(ext.cells[0].centers, vec![506_000_000]);
        assert_eq!(ext.cells[0].transposers, vec![(1, 578_000_000)]);
    }

    #[test]
    fn c2_raw_frequency() {
        let mut c = vec![0x02, 0x07];
        c.extend_from_slice(&(730_000_000u32).to_be_bytes());
        c.push(0b01_001_000); // system center, 6MHz fft, guard 1/128
        let d = c2(&c).unwrap();
        assert_eq!(d.frequency, 730_000_000);
        assert_eq!(d.frequency_type, 1);
        assert_eq!(d.guard, GuardInterval::G1_128);
    }
}
