//! ATSC PSIP records: the VCT channel entry (A/65 table 6.4) and the two
//! PSIP descriptors the scan consumes.

use std::io::Cursor;

use bitstream_io::{BigEndian, BitRead, BitReader};
use log::warn;

/// Service types carried in the VCT channel record.
pub const ATSC_ANALOG_TELEVISION: u8 = 0x01;
pub const ATSC_DIGITAL_TELEVISION: u8 = 0x02;
pub const ATSC_RADIO: u8 = 0x03;
pub const ATSC_DATA: u8 = 0x04;

/// Stream types referenced by the service location descriptor.
pub const STREAM_TYPE_MPEG2_VIDEO: u8 = 0x02;
pub const STREAM_TYPE_ATSC_AC3: u8 = 0x81;

pub const VCT_CHANNEL_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq)]
pub struct VctChannel {
    /// 7 UTF-16 code units, trailing NULs stripped
    pub short_name: String,
    pub major_channel_number: u16,
    pub minor_channel_number: u16,
    pub modulation_mode: u8,
    /// deprecated, usually 0
    pub carrier_frequency: u32,
    pub channel_tsid: u16,
    pub program_number: u16,
    pub access_controlled: bool,
    pub hidden: bool,
    pub service_type: u8,
    pub source_id: u16,
    pub descriptors_length: usize,
}

/// Reads one 32-byte channel record. The caller advances by
/// `VCT_CHANNEL_LEN + descriptors_length`.
pub fn read_vct_channel(b: &[u8]) -> Option<VctChannel> {
    if b.len() < VCT_CHANNEL_LEN {
        return None;
    }
    let mut r = BitReader::endian(Cursor::new(b), BigEndian);
    let mut units = [0u16; 7];
    for u in &mut units {
        *u = r.read::<16, u16>().ok()?;
    }
    let short_name: String = char::decode_utf16(units.into_iter().take_while(|&u| u != 0))
        .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect();

    r.skip(4).ok()?; // reserved
    let major_channel_number = r.read::<10, u16>().ok()?;
    let minor_channel_number = r.read::<10, u16>().ok()?;
    let modulation_mode = r.read::<8, u8>().ok()?;
    let carrier_frequency = r.read::<32, u32>().ok()?;
    let channel_tsid = r.read::<16, u16>().ok()?;
    let program_number = r.read::<16, u16>().ok()?;
    r.skip(2).ok()?; // ETM_location
    let access_controlled = r.read_bit().ok()?;
    let hidden = r.read_bit().ok()?;
    r.skip(2).ok()?;
    let _hide_guide = r.read_bit().ok()?;
    r.skip(3).ok()?;
    let service_type = r.read::<6, u8>().ok()?;
    let source_id = r.read::<16, u16>().ok()?;
    r.skip(6).ok()?;
    let descriptors_length = r.read::<10, u16>().ok()? as usize;

    Some(VctChannel {
        short_name,
        major_channel_number,
        minor_channel_number,
        modulation_mode,
        carrier_frequency,
        channel_tsid,
        program_number,
        access_controlled,
        hidden,
        service_type,
        source_id,
        descriptors_length,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceLocationElement {
    pub stream_type: u8,
    pub elementary_pid: u16,
    pub lang: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceLocation {
    pub pcr_pid: u16,
    pub elements: Vec<ServiceLocationElement>,
}

/// A/65 service location descriptor (tag 0xA1), payload after tag+length.
pub fn service_location(p: &[u8]) -> Option<ServiceLocation> {
    if p.len() < 3 {
        return None;
    }
    let pcr_pid = u16::from_be_bytes([p[0] & 0x1F, p[1]]);
    let count = p[2] as usize;
    let mut elements = Vec::with_capacity(count);
    let mut i = 3;
    for _ in 0..count {
        if i + 6 > p.len() {
            break;
        }
        let lang: String =
            p[i + 3..i + 6].iter().filter(|b| b.is_ascii_alphabetic()).map(|&b| b as char).collect();
        elements.push(ServiceLocationElement {
            stream_type: p[i],
            elementary_pid: u16::from_be_bytes([p[i + 1] & 0x1F, p[i + 2]]),
            lang,
        });
        i += 6;
    }
    Some(ServiceLocation { pcr_pid, elements })
}

/// A/65 extended channel name descriptor (tag 0xA0): multiple strings of
/// multiple segments; only uncompressed segments are supported.
pub fn extended_channel_name(p: &[u8]) -> Option<String> {
    let num_str = *p.first()? as usize;
    let mut name = String::new();
    let mut i = 1;
    for _ in 0..num_str {
        if i + 4 > p.len() {
            break;
        }
        let num_seg = p[i + 3] as usize;
        i += 4; // skip language code
        for _ in 0..num_seg {
            if i + 3 > p.len() {
                break;
            }
            let compression_type = p[i];
            let num_bytes = p[i + 2] as usize;
            if i + 3 + num_bytes > p.len() {
                break;
            }
            match compression_type {
                0x00 => {
                    name.extend(p[i + 3..i + 3 + num_bytes].iter().map(|&b| b as char));
                }
                _ => warn!("compressed strings are not supported yet"),
            }
            i += 3 + num_bytes;
        }
    }
    if name.is_empty() { None } else { Some(name) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_channel() -> Vec<u8> {
        use bitstream_io::{BitWrite, BitWriter};
        let mut out = Vec::new();
        {
            let mut w = BitWriter::endian(&mut out, BigEndian);
            for c in ['K', 'A', 'B', 'C', '\0', '\0', '\0'] {
                w.write::<16, u16>(c as u16).unwrap();
            }
            w.write::<4, u8>(0xF).unwrap(); // reserved
            w.write::<10, u16>(7).unwrap(); // major
            w.write::<10, u16>(1).unwrap(); // minor
            w.write::<8, u8>(0x04).unwrap(); // modulation mode
            w.write::<32, u32>(0).unwrap(); // carrier (deprecated)
            w.write::<16, u16>(0x0801).unwrap(); // channel TSID
            w.write::<16, u16>(3).unwrap(); // program number
            w.write::<2, u8>(0).unwrap(); // ETM
            w.write_bit(false).unwrap(); // access controlled
            w.write_bit(false).unwrap(); // hidden
            w.write::<2, u8>(0x3).unwrap();
            w.write_bit(false).unwrap(); // hide guide
            w.write::<3, u8>(0x7).unwrap();
            w.write::<6, u8>(ATSC_DIGITAL_TELEVISION).unwrap();
            w.write::<16, u16>(0x00A5).unwrap(); // source id
            w.write::<6, u8>(0x3F).unwrap();
            w.write::<10, u16>(0).unwrap(); // descriptors length
        }
        out
    }

    #[test]
    fn vct_channel_round_trip() {
        let b = build_channel();
        assert_eq!(b.len(), VCT_CHANNEL_LEN);
        let ch = read_vct_channel(&b).unwrap();
        assert_eq!(ch.short_name, "KABC");
        assert_eq!(ch.major_channel_number, 7);
        assert_eq!(ch.minor_channel_number, 1);
        assert_eq!(ch.channel_tsid, 0x0801);
        assert_eq!(ch.program_number, 3);
        assert!(!ch.hidden);
        assert_eq!(ch.service_type, ATSC_DIGITAL_TELEVISION);
        assert_eq!(ch.descriptors_length, 0);
    }

    #[test]
    fn service_location_elements() {
        let p = [
            0xE0 | 0x01, 0x31, // pcr pid 0x131
            2,    // two elements
            STREAM_TYPE_MPEG2_VIDEO, 0xE1, 0x31, 0, 0, 0,
            STREAM_TYPE_ATSC_AC3, 0xE1, 0x34, b'e', b'n', b'g',
        ];
        let loc = service_location(&p).unwrap();
        assert_eq!(loc.pcr_pid, 0x131);
        assert_eq!(loc.elements.len(), 2);
        assert_eq!(loc.elements[0].elementary_pid, 0x131);
        assert_eq!(loc.elements[1].lang, "eng");
    }

    #[test]
    fn extended_name_uncompressed() {
        let p = [
            1, // one string
            b'e', b'n', b'g', 1, // one segment
            0x00, 0x00, 4, b'A', b'B', b'C', b'7',
        ];
        assert_eq!(extended_channel_name(&p).as_deref(), Some("ABC7"));
    }
}
