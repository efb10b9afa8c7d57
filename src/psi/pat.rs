use log::info;

use super::section::Section;
use crate::constants::TABLE_PAT;

/// ─────────── PAT ───────────
#[derive(Debug, Clone)]
pub struct PatSection {
    pub transport_stream_id: u16,
    pub version: u8,
    /// PID announced for the NIT (service id 0 entry), if any
    pub network_pid: Option<u16>,
    pub entries: Vec<PatEntry>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PatEntry {
    pub service_id: u16,
    pub pmt_pid: u16,
}

/// EN 13818-1 table 2-25.
pub fn parse_pat(sec: &Section) -> anyhow::Result<PatSection> {
    if sec.table_id != TABLE_PAT {
        anyhow::bail!("not PAT");
    }

    let b = sec.body;
    let mut entries = Vec::new();
    let mut network_pid = None;
    let mut idx = 0;
    while idx + 4 <= b.len() {
        let service_id = u16::from_be_bytes([b[idx], b[idx + 1]]);
        let pid = (((b[idx + 2] & 0x1F) as u16) << 8) | b[idx + 3] as u16;
        idx += 4;
        if service_id == 0 {
            if pid != 0x0010 {
                info!("network_PID = {pid} (transport_stream_id {})", sec.table_id_ext);
            }
            network_pid = Some(pid);
        } else {
            entries.push(PatEntry { service_id, pmt_pid: pid });
        }
    }

    Ok(PatSection {
        transport_stream_id: sec.table_id_ext,
        version: sec.version,
        network_pid,
        entries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::psi::section::testing::build_section;

    pub(crate) fn pat_body(entries: &[(u16, u16)]) -> Vec<u8> {
        let mut b = Vec::new();
        for &(sid, pid) in entries {
            b.extend_from_slice(&sid.to_be_bytes());
            b.extend_from_slice(&(0xE000 | pid).to_be_bytes());
        }
        b
    }

    #[test]
    fn splits_network_pid_from_programs() {
        let body = pat_body(&[(0, 0x0010), (1, 0x0100), (2, 0x0110)]);
        let raw = build_section(0x00, 0x04D2, 3, 0, 0, &body);
        let sec = Section::parse(&raw).unwrap();
        let pat = parse_pat(&sec).unwrap();
        assert_eq!(pat.transport_stream_id, 0x04D2);
        assert_eq!(pat.network_pid, Some(0x0010));
        assert_eq!(
            pat.entries,
            vec![
                PatEntry { service_id: 1, pmt_pid: 0x0100 },
                PatEntry { service_id: 2, pmt_pid: 0x0110 },
            ]
        );
    }

    #[test]
    fn rejects_foreign_table_id() {
        let raw = build_section(0x42, 1, 0, 0, 0, &pat_body(&[(1, 0x100)]));
        let sec = Section::parse(&raw).unwrap();
        assert!(parse_pat(&sec).is_err());
    }
}
