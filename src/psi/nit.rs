// psi/nit.rs
//! Network Information Table parsing plus application of its
//! delivery-system payload onto a transponder record.

use log::trace;

use super::section::Section;
use crate::constants::{TABLE_NIT_ACT, TABLE_NIT_OTH};
use crate::descriptors::{Descriptor, parse_descriptor_loop};
use crate::frontend::{DeliverySystem, Modulation, ScanType};
use crate::types::{NetworkChange, Transponder};

#[derive(Debug, Clone)]
pub struct NitSection {
    pub table_id: u8,
    pub network_id: u16,
    pub network_name: Option<String>,
    pub network_changes: Vec<NetworkChange>,
    pub transports: Vec<NitTransport>,
}

#[derive(Debug, Clone)]
pub struct NitTransport {
    pub transport_stream_id: u16,
    pub original_network_id: u16,
    pub descriptors: Vec<Descriptor>,
}

/// EN 300468 5.2.1. Both the actual (0x40) and other (0x41) variants.
pub fn parse_nit(sec: &Section) -> anyhow::Result<NitSection> {
    if sec.table_id != TABLE_NIT_ACT && sec.table_id != TABLE_NIT_OTH {
        anyhow::bail!("not NIT");
    }

    let b = sec.body;
    if b.len() < 4 {
        anyhow::bail!("NIT body too short");
    }

    let net_desc_len = (((b[0] & 0x0F) as usize) << 8) | b[1] as usize;
    if 2 + net_desc_len > b.len() {
        anyhow::bail!("truncated network descriptors");
    }

    let mut network_name = None;
    let mut network_changes = Vec::new();
    for d in parse_descriptor_loop(&b[2..2 + net_desc_len]) {
        match d {
            Descriptor::NetworkName(name) if !name.is_empty() => network_name = Some(name),
            Descriptor::NetworkChangeNotify(mut changes) => network_changes.append(&mut changes),
            _ => {}
        }
    }

    // skip over transport_stream_loop_length
    let mut idx = 2 + net_desc_len + 2;
    let mut transports = Vec::new();
    while idx + 6 <= b.len() {
        let transport_stream_id = u16::from_be_bytes([b[idx], b[idx + 1]]);
        let original_network_id = u16::from_be_bytes([b[idx + 2], b[idx + 3]]);
        let desc_len = (((b[idx + 4] & 0x0F) as usize) << 8) | b[idx + 5] as usize;
        idx += 6;
        if idx + desc_len > b.len() {
            break; // graceful exit on malformed len
        }
        transports.push(NitTransport {
            transport_stream_id,
            original_network_id,
            descriptors: parse_descriptor_loop(&b[idx..idx + desc_len]),
        });
        idx += desc_len;
    }

    Ok(NitSection {
        table_id: sec.table_id,
        network_id: sec.table_id_ext,
        network_name,
        network_changes,
        transports,
    })
}

/// Folds a transport loop's descriptors into `draft`. Delivery systems
/// not matching the running scan are ignored (cable descriptors in a
/// satellite NIT and the like), as are 2nd-generation records when the
/// hardware cannot tune them anyway.
pub fn apply_transport_descriptors(
    draft: &mut Transponder,
    descs: &[Descriptor],
    scan_type: ScanType,
    allow_second_gen: bool,
) {
    for d in descs {
        match d {
            Descriptor::SatelliteDelivery(sat) if scan_type == ScanType::Satellite => {
                draft.scan_type = ScanType::Satellite;
                draft.source = 0x43;
                let p = &mut draft.params;
                p.delsys = sat.delsys;
                p.frequency = sat.frequency;
                p.orbital_position = sat.orbital_position;
                p.west_east = sat.west_east;
                p.polarization = sat.polarization;
                p.rolloff = sat.rolloff;
                p.modulation = sat.modulation;
                p.symbolrate = sat.symbolrate;
                p.coderate = sat.coderate;
            }
            Descriptor::CableDelivery(cab) if scan_type == ScanType::Cable => {
                draft.scan_type = ScanType::Cable;
                draft.source = 0x44;
                let p = &mut draft.params;
                p.delsys = DeliverySystem::DvbC;
                p.frequency = cab.frequency;
                p.modulation = cab.modulation;
                p.symbolrate = cab.symbolrate;
                p.coderate = cab.coderate;
            }
            Descriptor::TerrestrialDelivery(ter) if scan_type == ScanType::Terrestrial => {
                draft.scan_type = ScanType::Terrestrial;
                draft.source = 0x5A;
                {
                    let p = &mut draft.params;
                    p.delsys = DeliverySystem::DvbT;
                    p.bandwidth = ter.bandwidth;
                    p.modulation = ter.modulation;
                    p.hierarchy = ter.hierarchy;
                    p.coderate = ter.coderate;
                    p.coderate_lp = ter.coderate_lp;
                    p.guard = ter.guard;
                    p.transmission = ter.transmission;
                    p.other_frequency_flag = ter.other_frequency_flag;
                }
                if ter.center_frequency > 0 {
                    if !ter.other_frequency_flag {
                        draft.params.frequency = ter.center_frequency;
                    } else {
                        draft.add_frequency(0, ter.center_frequency);
                    }
                }
            }
            Descriptor::T2Delivery(t2) if scan_type == ScanType::Terrestrial && allow_second_gen => {
                draft.scan_type = ScanType::Terrestrial;
                draft.source = 0x04;
                {
                    let p = &mut draft.params;
                    p.delsys = DeliverySystem::DvbT2;
                    p.modulation = Modulation::Auto;
                    p.plp_id = t2.plp_id;
                    p.system_id = t2.system_id;
                }
                if let Some(ext) = &t2.extended {
                    {
                        let p = &mut draft.params;
                        p.bandwidth = ext.bandwidth;
                        p.guard = ext.guard;
                        p.transmission = ext.transmission;
                        p.other_frequency_flag = ext.other_frequency_flag;
                        p.tfs = ext.tfs;
                    }
                    for cell in &ext.cells {
                        if ext.tfs {
                            // the TS hops across all TFS center frequencies
                            for &f in &cell.centers {
                                draft.add_frequency(cell.cell_id, f);
                            }
                        } else if let Some(&center) = cell.centers.first() {
                            if center > 0 {
                                if !ext.other_frequency_flag {
                                    draft.params.frequency = center;
                                } else {
                                    draft.add_frequency(cell.cell_id, center);
                                }
                            }
                        }
                        let center = cell.centers.first().copied().unwrap_or(0);
                        for &(cell_ext, f) in &cell.transposers {
                            draft.add_transposer(cell.cell_id, cell_ext, center, f);
                        }
                    }
                }
            }
            Descriptor::C2Delivery(c2) if scan_type == ScanType::Cable && allow_second_gen => {
                draft.scan_type = ScanType::Cable;
                draft.source = 0x0D;
                let p = &mut draft.params;
                p.delsys = DeliverySystem::DvbC2;
                p.frequency = c2.frequency;
                p.plp_id = c2.plp_id;
                p.data_slice_id = c2.data_slice_id;
                p.guard = c2.guard;
            }
            Descriptor::FrequencyList(freqs) if scan_type == ScanType::Terrestrial => {
                for &f in freqs {
                    draft.add_frequency(0, f);
                }
            }
            Descriptor::LogicalChannels(lcs) => {
                for lc in lcs {
                    let svc = draft.service_mut(lc.service_id);
                    svc.visible = lc.visible;
                    svc.logical_channel = lc.number as u32;
                }
            }
            Descriptor::S2SatelliteDelivery => {
                // two carriers on the same frequency; recognized, unused
            }
            other => trace!("NIT transport descriptor unused here: {other:?}"),
        }
    }

    // a mux announcing neither a center frequency nor alternates would be
    // untunable; force the other-frequency path then
    if draft.params.frequency == 0 && !draft.params.other_frequency_flag {
        draft.params.other_frequency_flag = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::psi::section::testing::build_section;

    pub(crate) fn nit_body(net_descs: &[u8], transports: &[(u16, u16, Vec<u8>)]) -> Vec<u8> {
        let mut b = Vec::new();
        b.extend_from_slice(&(0xF000u16 | net_descs.len() as u16).to_be_bytes());
        b.extend_from_slice(net_descs);
        let mut loop_bytes = Vec::new();
        for (tsid, onid, descs) in transports {
            loop_bytes.extend_from_slice(&tsid.to_be_bytes());
            loop_bytes.extend_from_slice(&onid.to_be_bytes());
            loop_bytes.extend_from_slice(&(0xF000u16 | descs.len() as u16).to_be_bytes());
            loop_bytes.extend_from_slice(descs);
        }
        b.extend_from_slice(&(0xF000u16 | loop_bytes.len() as u16).to_be_bytes());
        b.extend_from_slice(&loop_bytes);
        b
    }

    fn terr_delivery_desc(freq_hz: u32) -> Vec<u8> {
        let mut d = vec![0x5A, 7];
        d.extend_from_slice(&(freq_hz / 10).to_be_bytes());
        d.push(0b000_0_0_0_00); // 8 MHz
        d.push(0b01_000_001); // QAM16, no hierarchy, fec 2/3
        d.push(0b000_01_01_0); // guard 1/16, 8k
        d
    }

    #[test]
    fn parses_network_and_transport_loops() {
        let mut net = vec![0x40, 4];
        net.extend_from_slice(b"Antv");
        let body = nit_body(&net, &[(0x0101, 0x2001, terr_delivery_desc(498_000_000))]);
        let raw = build_section(0x40, 0x3001, 1, 0, 0, &body);
        let sec = Section::parse(&raw).unwrap();
        let nit = parse_nit(&sec).unwrap();

        assert_eq!(nit.network_id, 0x3001);
        assert_eq!(nit.network_name.as_deref(), Some("Antv"));
        assert_eq!(nit.transports.len(), 1);
        let tr = &nit.transports[0];
        assert_eq!(tr.transport_stream_id, 0x0101);
        assert_eq!(tr.original_network_id, 0x2001);

        let mut draft = Transponder::new(0, ScanType::Terrestrial, Default::default());
        apply_transport_descriptors(&mut draft, &tr.descriptors, ScanType::Terrestrial, true);
        assert_eq!(draft.params.frequency, 498_000_000);
        assert_eq!(draft.params.delsys, DeliverySystem::DvbT);
        assert_eq!(draft.params.modulation, Modulation::Qam16);
    }

    #[test]
    fn foreign_technology_descriptors_are_ignored() {
        // satellite record inside a terrestrial scan changes nothing
        let mut sat = vec![0x43, 11];
        sat.extend_from_slice(&[0x01, 0x17, 0x50, 0x00, 0x00, 0xC0, 0x21]);
        sat.extend_from_slice(&[0x02, 0x75, 0x00, 0x03]);
        let body = nit_body(&[], &[(1, 1, sat)]);
        let raw = build_section(0x40, 1, 0, 0, 0, &body);
        let sec = Section::parse(&raw).unwrap();
        let nit = parse_nit(&sec).unwrap();

        let mut draft = Transponder::new(0, ScanType::Terrestrial, Default::default());
        apply_transport_descriptors(
            &mut draft,
            &nit.transports[0].descriptors,
            ScanType::Terrestrial,
            true,
        );
        assert_eq!(draft.params.frequency, 0);
        // untunable draft falls back to the other-frequency path
        assert!(draft.params.other_frequency_flag);
    }

    #[test]
    fn other_frequency_flag_routes_center_to_alternates() {
        let mut d = terr_delivery_desc(498_000_000);
        *d.last_mut().unwrap() |= 0x01; // other_frequency_flag
        let body = nit_body(&[], &[(1, 1, d)]);
        let raw = build_section(0x40, 1, 0, 0, 0, &body);
        let nit = parse_nit(&Section::parse(&raw).unwrap()).unwrap();

        let mut draft = Transponder::new(0, ScanType::Terrestrial, Default::default());
        apply_transport_descriptors(
            &mut draft,
            &nit.transports[0].descriptors,
            ScanType::Terrestrial,
            true,
        );
        assert_eq!(draft.params.frequency, 0);
        assert!(draft.knows_frequency(498_000_000));
    }
}
