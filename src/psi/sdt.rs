// psi/sdt.rs
//! Service Description Table (actual 0x42 / other 0x46).

use log::warn;

use super::section::Section;
use crate::constants::{TABLE_SDT_ACT, TABLE_SDT_OTH};
use crate::descriptors::{Descriptor, ServiceNames, parse_descriptor_loop};
use crate::types::RunningStatus;

#[derive(Debug, Clone)]
pub struct SdtSection {
    pub table_id: u8,
    pub transport_stream_id: u16,
    pub original_network_id: u16,
    pub version: u8,
    pub entries: Vec<SdtServiceEntry>,
}

#[derive(Debug, Clone)]
pub struct SdtServiceEntry {
    pub service_id: u16,
    pub running: RunningStatus,
    pub scrambled: bool,
    pub names: Option<ServiceNames>,
    pub ca_ids: Vec<u16>,
}

/// EN 300468 5.2.3.
pub fn parse_sdt(sec: &Section) -> anyhow::Result<SdtSection> {
    if sec.table_id != TABLE_SDT_ACT && sec.table_id != TABLE_SDT_OTH {
        anyhow::bail!("not SDT");
    }
    let b = sec.body;
    if b.len() < 3 {
        anyhow::bail!("SDT body too short");
    }
    let original_network_id = u16::from_be_bytes([b[0], b[1]]);

    let mut idx = 3; // skip original network id + reserved byte
    let mut entries = Vec::new();
    while idx + 5 <= b.len() {
        let service_id = u16::from_be_bytes([b[idx], b[idx + 1]]);
        let running = RunningStatus::from_wire((b[idx + 3] >> 5) & 0x7);
        let scrambled = (b[idx + 3] >> 4) & 0x1 != 0;
        let desc_len = (((b[idx + 3] & 0x0F) as usize) << 8) | b[idx + 4] as usize;
        idx += 5;
        if idx + desc_len > b.len() || desc_len == 0 {
            warn!(
                "section too short: service_id == 0x{service_id:02x}, \
                 descriptors_loop_len == {desc_len}"
            );
            break;
        }

        let mut names = None;
        let mut ca_ids = Vec::new();
        for d in parse_descriptor_loop(&b[idx..idx + desc_len]) {
            match d {
                Descriptor::ServiceNames(n) => names = Some(n),
                Descriptor::CaIdentifiers(ids) => ca_ids.extend(ids),
                _ => {}
            }
        }
        entries.push(SdtServiceEntry { service_id, running, scrambled, names, ca_ids });
        idx += desc_len;
    }

    Ok(SdtSection {
        table_id: sec.table_id,
        transport_stream_id: sec.table_id_ext,
        original_network_id,
        version: sec.version,
        entries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::psi::section::testing::build_section;

    pub(crate) fn sdt_body(onid: u16, services: &[(u16, u8, bool, Vec<u8>)]) -> Vec<u8> {
        let mut b = onid.to_be_bytes().to_vec();
        b.push(0xFF);
        for (sid, running, scrambled, descs) in services {
            b.extend_from_slice(&sid.to_be_bytes());
            b.push(0xFC);
            let hi = (running << 5) | ((*scrambled as u8) << 4) | ((descs.len() >> 8) as u8 & 0x0F);
            b.push(hi);
            b.push(descs.len() as u8);
            b.extend_from_slice(descs);
        }
        b
    }

    pub(crate) fn service_desc(provider: &[u8], name: &[u8]) -> Vec<u8> {
        let mut d = vec![0x48, (3 + provider.len() + name.len()) as u8, 0x01];
        d.push(provider.len() as u8);
        d.extend_from_slice(provider);
        d.push(name.len() as u8);
        d.extend_from_slice(name);
        d
    }

    #[test]
    fn reads_status_and_names() {
        let descs = service_desc(b"SRG SSR", b"SRF 1");
        let body = sdt_body(0x2282, &[(0x6E01, 4, true, descs)]);
        let raw = build_section(0x42, 0x0451, 2, 0, 0, &body);
        let sdt = parse_sdt(&Section::parse(&raw).unwrap()).unwrap();

        assert_eq!(sdt.transport_stream_id, 0x0451);
        assert_eq!(sdt.original_network_id, 0x2282);
        let e = &sdt.entries[0];
        assert_eq!(e.service_id, 0x6E01);
        assert_eq!(e.running, RunningStatus::Running);
        assert!(e.scrambled);
        let names = e.names.as_ref().unwrap();
        assert_eq!(names.provider.as_deref(), Some("SRG SSR"));
        assert_eq!(names.name.as_deref(), Some("SRF 1"));
    }

    #[test]
    fn ca_identifier_list_collected() {
        let mut descs = service_desc(b"P", b"N");
        descs.extend_from_slice(&[0x53, 4, 0x06, 0x04, 0x18, 0x33]);
        let body = sdt_body(1, &[(7, 4, false, descs)]);
        let raw = build_section(0x42, 1, 0, 0, 0, &body);
        let sdt = parse_sdt(&Section::parse(&raw).unwrap()).unwrap();
        assert_eq!(sdt.entries[0].ca_ids, vec![0x0604, 0x1833]);
    }
}
