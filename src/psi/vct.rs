// psi/vct.rs
//! ATSC Virtual Channel Table (A/65), terrestrial and cable variants.

use log::info;

use super::section::Section;
use crate::constants::{TABLE_VCT_CABLE, TABLE_VCT_TERR};
use crate::descriptors::atsc::{self, VCT_CHANNEL_LEN, VctChannel};

#[derive(Debug, Clone)]
pub struct VctSection {
    pub table_id: u8,
    pub transport_stream_id: u16,
    pub version: u8,
    pub channels: Vec<VctEntry>,
}

#[derive(Debug, Clone)]
pub struct VctEntry {
    pub channel: VctChannel,
    pub location: Option<atsc::ServiceLocation>,
    pub extended_name: Option<String>,
}

/// A/65 table 6.4 / 6.8. Data-only channels are dropped here; everything
/// else is handed to the catalog layer.
pub fn parse_vct(sec: &Section) -> anyhow::Result<VctSection> {
    if sec.table_id != TABLE_VCT_TERR && sec.table_id != TABLE_VCT_CABLE {
        anyhow::bail!("not VCT");
    }
    let b = sec.body;
    if b.len() < 2 {
        anyhow::bail!("VCT body too short");
    }
    // b[0] = protocol_version
    let num_channels = b[1] as usize;
    let mut channels = Vec::with_capacity(num_channels);
    let mut idx = 2;

    for _ in 0..num_channels {
        let Some(ch) = atsc::read_vct_channel(&b[idx.min(b.len())..]) else { break };
        let desc_start = idx + VCT_CHANNEL_LEN;
        let desc_end = (desc_start + ch.descriptors_length).min(b.len());
        idx = desc_start + ch.descriptors_length;

        match ch.service_type {
            atsc::ATSC_ANALOG_TELEVISION | atsc::ATSC_DIGITAL_TELEVISION | atsc::ATSC_RADIO => {}
            _ => {
                info!("skipping data/unknown VCT service '{}'", ch.short_name);
                continue;
            }
        }

        let mut location = None;
        let mut extended_name = None;
        for d in crate::descriptors::parse_descriptor_loop(&b[desc_start.min(b.len())..desc_end]) {
            match d {
                crate::descriptors::Descriptor::AtscServiceLocation(l) => location = Some(l),
                crate::descriptors::Descriptor::AtscExtendedChannelName(n) => {
                    extended_name = Some(n)
                }
                _ => {}
            }
        }

        channels.push(VctEntry { channel: ch, location, extended_name });
    }

    Ok(VctSection {
        table_id: sec.table_id,
        transport_stream_id: sec.table_id_ext,
        version: sec.version,
        channels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::psi::section::testing::build_section;
    use bitstream_io::{BigEndian, BitWrite, BitWriter};

    fn channel(name: &str, major: u16, minor: u16, prog: u16, service_type: u8) -> Vec<u8> {
        let mut out = Vec::new();
        let mut w = BitWriter::endian(&mut out, BigEndian);
        let mut units: Vec<u16> = name.encode_utf16().collect();
        units.resize(7, 0);
        for u in units {
            w.write::<16, u16>(u).unwrap();
        }
        w.write::<4, u8>(0xF).unwrap();
        w.write::<10, u16>(major).unwrap();
        w.write::<10, u16>(minor).unwrap();
        w.write::<8, u8>(0x04).unwrap();
        w.write::<32, u32>(0).unwrap();
        w.write::<16, u16>(0x0901).unwrap();
        w.write::<16, u16>(prog).unwrap();
        w.write::<2, u8>(0).unwrap();
        w.write_bit(false).unwrap();
        w.write_bit(false).unwrap(); // hidden
        w.write::<2, u8>(3).unwrap();
        w.write_bit(false).unwrap();
        w.write::<3, u8>(7).unwrap();
        w.write::<6, u8>(service_type).unwrap();
        w.write::<16, u16>(1).unwrap();
        w.write::<6, u8>(0x3F).unwrap();
        w.write::<10, u16>(0).unwrap();
        drop(w);
        out
    }

    #[test]
    fn keeps_tv_and_radio_skips_data() {
        let mut body = vec![0x00, 3];
        body.extend_from_slice(&channel("WXYZ", 7, 1, 3, atsc::ATSC_DIGITAL_TELEVISION));
        body.extend_from_slice(&channel("DATA", 7, 2, 4, atsc::ATSC_DATA));
        body.extend_from_slice(&channel("WJR", 7, 3, 5, atsc::ATSC_RADIO));
        let raw = build_section(0xC8, 0x0901, 0, 0, 0, &body);
        let vct = parse_vct(&Section::parse(&raw).unwrap()).unwrap();

        assert_eq!(vct.channels.len(), 2);
        assert_eq!(vct.channels[0].channel.short_name, "WXYZ");
        assert_eq!(vct.channels[0].channel.major_channel_number, 7);
        assert_eq!(vct.channels[1].channel.short_name, "WJR");
    }
}
