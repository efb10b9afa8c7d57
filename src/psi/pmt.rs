//! PMT parsing: elementary streams classified into the service model.

use log::{debug, trace};

use super::section::Section;
use crate::constants::TABLE_PMT;
use crate::descriptors::{Descriptor, parse_descriptor_loop};
use crate::types::Service;

// stream types we map (EN 13818-1 table 2-29 + ATSC A/52b)
const ST_MPEG1_VIDEO: u8 = 0x01;
const ST_MPEG2_VIDEO: u8 = 0x02;
const ST_MPEG1_AUDIO: u8 = 0x03;
const ST_MPEG2_AUDIO: u8 = 0x04;
const ST_PRIVATE_DATA: u8 = 0x06;
const ST_AAC_ADTS: u8 = 0x0F;
const ST_AAC_LATM: u8 = 0x11;
const ST_H264: u8 = 0x1B;
const ST_HEVC: u8 = 0x24;
const ST_ATSC_AC3: u8 = 0x81;

#[derive(Debug, Clone, Default)]
pub struct PmtStream {
    pub pid: u16,
    pub stream_type: u8,
    pub lang: String,
}

#[derive(Debug, Clone, Default)]
pub struct PmtSection {
    pub service_id: u16,
    pub version: u8,
    pub pcr_pid: u16,
    pub ca_ids: Vec<u16>,
    pub video: Option<PmtStream>,
    pub audio: Vec<PmtStream>,
    pub ac3: Vec<PmtStream>,
    pub teletext_pid: Option<u16>,
    pub subtitles: Vec<crate::types::SubtitleTrack>,
}

/// EN 13818-1 table 2-33.
pub fn parse_pmt(sec: &Section) -> anyhow::Result<PmtSection> {
    if sec.table_id != TABLE_PMT {
        anyhow::bail!("not PMT");
    }
    let b = sec.body;
    if b.len() < 4 {
        anyhow::bail!("PMT body too short");
    }

    let mut pmt = PmtSection {
        service_id: sec.table_id_ext,
        version: sec.version,
        pcr_pid: (((b[0] & 0x1F) as u16) << 8) | b[1] as u16,
        ..Default::default()
    };

    let prog_info_len = (((b[2] & 0x0F) as usize) << 8) | b[3] as usize;
    let mut idx = 4;
    // program info loop may announce CA systems for the whole service
    for d in parse_descriptor_loop(&b[idx..(idx + prog_info_len).min(b.len())]) {
        match d {
            Descriptor::CaSystem(id) => pmt.ca_ids.push(id),
            Descriptor::CaIdentifiers(ids) => pmt.ca_ids.extend(ids),
            _ => {}
        }
    }
    idx += prog_info_len;

    while idx + 5 <= b.len() {
        let stream_type = b[idx];
        let pid = (((b[idx + 1] & 0x1F) as u16) << 8) | b[idx + 2] as u16;
        let es_len = (((b[idx + 3] & 0x0F) as usize) << 8) | b[idx + 4] as usize;
        let es_end = (idx + 5 + es_len).min(b.len());
        let es_descs = parse_descriptor_loop(&b[idx + 5..es_end]);

        let lang = es_descs
            .iter()
            .find_map(|d| match d {
                Descriptor::Iso639Languages(langs) => langs.first().cloned(),
                _ => None,
            })
            .unwrap_or_default();

        match stream_type {
            ST_MPEG1_VIDEO | ST_MPEG2_VIDEO | ST_H264 | ST_HEVC => {
                trace!("  VIDEO     : PID {pid} (stream type 0x{stream_type:x})");
                if pmt.video.is_none() {
                    pmt.video = Some(PmtStream { pid, stream_type, lang });
                }
            }
            ST_MPEG1_AUDIO | ST_MPEG2_AUDIO | ST_AAC_ADTS | ST_AAC_LATM => {
                trace!("  AUDIO     : PID {pid} (stream type 0x{stream_type:x})");
                pmt.audio.push(PmtStream { pid, stream_type, lang });
            }
            ST_PRIVATE_DATA => {
                // teletext, DVB subtitles and (E-)AC-3 all ride on 0x06;
                // the descriptors say which one this PID is
                if es_descs.iter().any(|d| matches!(d, Descriptor::Teletext)) {
                    trace!("  TELETEXT  : PID {pid}");
                    pmt.teletext_pid = Some(pid);
                } else if let Some(Descriptor::Subtitling(tracks)) =
                    es_descs.iter().find(|d| matches!(d, Descriptor::Subtitling(_)))
                {
                    trace!("  SUBTITLING: PID {pid}");
                    if tracks.is_empty() {
                        pmt.subtitles.push(crate::types::SubtitleTrack { pid, ..Default::default() });
                    }
                    for t in tracks {
                        let mut t = t.clone();
                        t.pid = pid;
                        pmt.subtitles.push(t);
                    }
                } else if es_descs
                    .iter()
                    .any(|d| matches!(d, Descriptor::Ac3 | Descriptor::EnhancedAc3))
                {
                    trace!("  AC3       : PID {pid}");
                    pmt.ac3.push(PmtStream { pid, stream_type, lang });
                } else {
                    trace!("  unknown private data: PID 0x{pid:04x}");
                }
            }
            ST_ATSC_AC3 => {
                trace!("  AC-3 per ATSC A/52B : PID {pid}");
                pmt.ac3.push(PmtStream { pid, stream_type, lang });
            }
            other => {
                trace!("  OTHER     : PID {pid} TYPE 0x{other:02x}");
            }
        }

        // per-ES CA descriptors count for the service too
        for d in &es_descs {
            if let Descriptor::CaSystem(id) = d {
                pmt.ca_ids.push(*id);
            }
        }

        idx += 5 + es_len;
    }

    debug!(
        "sid={} pcr_pid 0x{:04x}, vpid 0x{:04x}, {} audio / {} ac3",
        pmt.service_id,
        pmt.pcr_pid,
        pmt.video.as_ref().map_or(0, |v| v.pid),
        pmt.audio.len(),
        pmt.ac3.len(),
    );
    Ok(pmt)
}

impl PmtSection {
    /// Folds this PMT into the service record; fields another table
    /// already filled are left alone.
    pub fn apply_to(&self, s: &mut Service) {
        s.pcr_pid = self.pcr_pid;
        if let Some(v) = &self.video {
            if s.video_pid == 0 {
                s.video_pid = v.pid;
                s.video_stream_type = v.stream_type;
            }
        }
        for a in &self.audio {
            if s.audio.iter().all(|t| t.pid != a.pid) {
                if let Some(track) = s.push_audio(a.pid, a.stream_type) {
                    track.lang = a.lang.clone();
                }
            }
        }
        for a in &self.ac3 {
            if s.ac3.iter().all(|t| t.pid != a.pid) {
                if let Some(track) = s.push_ac3(a.pid, a.stream_type) {
                    track.lang = a.lang.clone();
                }
            }
        }
        if let Some(tt) = self.teletext_pid {
            s.teletext_pid = tt;
        }
        for t in &self.subtitles {
            if s.subtitles.iter().all(|have| have.pid != t.pid) {
                s.push_subtitle(t.clone());
            }
        }
        for &id in &self.ca_ids {
            s.add_ca_id(id);
        }
        if !self.ca_ids.is_empty() {
            s.scrambled = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptors::{DESC_AC3, DESC_ISO639_LANGUAGE, DESC_SUBTITLING, DESC_TELETEXT};
    use crate::psi::section::testing::build_section;

    fn es(stream_type: u8, pid: u16, descs: &[u8]) -> Vec<u8> {
        let mut v = vec![stream_type];
        v.extend_from_slice(&(0xE000 | pid).to_be_bytes());
        v.extend_from_slice(&(0xF000 | descs.len() as u16).to_be_bytes());
        v.extend_from_slice(descs);
        v
    }

    fn pmt_section(body: &[u8]) -> Vec<u8> {
        build_section(0x02, 0x0001, 0, 0, 0, body)
    }

    #[test]
    fn classifies_streams_by_type_and_descriptor() {
        let mut body = Vec::new();
        body.extend_from_slice(&(0xE000u16 | 0x0111).to_be_bytes()); // pcr
        body.extend_from_slice(&0xF000u16.to_be_bytes()); // no prog info
        body.extend_from_slice(&es(0x02, 0x0111, &[])); // mpeg2 video
        let lang = [DESC_ISO639_LANGUAGE, 4, b'd', b'e', b'u', 0];
        body.extend_from_slice(&es(0x03, 0x0112, &lang)); // mpeg audio, german
        body.extend_from_slice(&es(0x06, 0x0113, &[DESC_TELETEXT, 2, 0, 0]));
        let sub = {
            let mut d = vec![DESC_SUBTITLING, 8];
            d.extend_from_slice(b"fin");
            d.extend_from_slice(&[0x10, 0x00, 0x01, 0x00, 0x02]);
            d
        };
        body.extend_from_slice(&es(0x06, 0x0114, &sub));
        body.extend_from_slice(&es(0x06, 0x0115, &[DESC_AC3, 1, 0]));

        let raw = pmt_section(&body);
        let sec = Section::parse(&raw).unwrap();
        let pmt = parse_pmt(&sec).unwrap();

        assert_eq!(pmt.pcr_pid, 0x0111);
        assert_eq!(pmt.video.as_ref().unwrap().pid, 0x0111);
        assert_eq!(pmt.audio.len(), 1);
        assert_eq!(pmt.audio[0].lang, "deu");
        assert_eq!(pmt.teletext_pid, Some(0x0113));
        assert_eq!(pmt.subtitles.len(), 1);
        assert_eq!(pmt.subtitles[0].pid, 0x0114);
        assert_eq!(pmt.subtitles[0].lang, "fin");
        assert_eq!(pmt.ac3.len(), 1);
        assert_eq!(pmt.ac3[0].pid, 0x0115);
    }

    #[test]
    fn program_info_ca_marks_service_scrambled() {
        let mut body = Vec::new();
        body.extend_from_slice(&(0xE000u16 | 0x0100).to_be_bytes());
        let ca = [0x09, 4, 0x06, 0x04, 0xE0, 0x66]; // CA descriptor, system 0x0604
        body.extend_from_slice(&(0xF000u16 | ca.len() as u16).to_be_bytes());
        body.extend_from_slice(&ca);
        body.extend_from_slice(&es(0x1B, 0x0101, &[]));

        let raw = pmt_section(&body);
        let sec = Section::parse(&raw).unwrap();
        let pmt = parse_pmt(&sec).unwrap();
        assert_eq!(pmt.ca_ids, vec![0x0604]);

        let mut svc = Service::new(1);
        pmt.apply_to(&mut svc);
        assert!(svc.scrambled);
        assert_eq!(svc.video_pid, 0x0101);
        assert_eq!(svc.ca_ids, vec![0x0604]);
    }
}
