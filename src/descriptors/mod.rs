//! Descriptor tag/length/value dispatch and the individual decoders that
//! are not delivery-system or ATSC specific.
//!
//! Every known tag maps to one variant of [`Descriptor`]; unknown tags are
//! skipped by their length, which keeps the loop forward compatible. A
//! zero length field means the rest of the loop is garbage and parsing
//! stops there without reporting an error upward.

pub mod atsc;
pub mod delivery;

use chrono::{DateTime, Utc};
use log::{debug, trace, warn};

use crate::chars::decode_text;
use crate::types::{NetworkChange, NetworkChangeEvent, SubtitleTrack};

// EN 300468 6.1 (plus the NorDig logical channel and A/65 PSIP tags)
pub const DESC_CA: u8 = 0x09;
pub const DESC_ISO639_LANGUAGE: u8 = 0x0A;
pub const DESC_NETWORK_NAME: u8 = 0x40;
pub const DESC_SATELLITE_DELIVERY: u8 = 0x43;
pub const DESC_CABLE_DELIVERY: u8 = 0x44;
pub const DESC_SERVICE: u8 = 0x48;
pub const DESC_CA_IDENTIFIER: u8 = 0x53;
pub const DESC_TELETEXT: u8 = 0x56;
pub const DESC_SUBTITLING: u8 = 0x59;
pub const DESC_TERRESTRIAL_DELIVERY: u8 = 0x5A;
pub const DESC_FREQUENCY_LIST: u8 = 0x62;
pub const DESC_AC3: u8 = 0x6A;
pub const DESC_ENHANCED_AC3: u8 = 0x7A;
pub const DESC_S2_SATELLITE_DELIVERY: u8 = 0x79;
pub const DESC_EXTENSION: u8 = 0x7F;
pub const DESC_LOGICAL_CHANNEL: u8 = 0x83;
pub const DESC_ATSC_EXT_CHANNEL_NAME: u8 = 0xA0;
pub const DESC_ATSC_SERVICE_LOCATION: u8 = 0xA1;

// 300468 6.4: descriptor_tag_extension values we act on
pub const EXT_T2_DELIVERY: u8 = 0x04;
pub const EXT_NETWORK_CHANGE_NOTIFY: u8 = 0x07;
pub const EXT_C2_DELIVERY: u8 = 0x0D;

/// Name control codes, ETR211 4.6.1
const CC_EMPHASIS_ON: u8 = 0x86;
const CC_EMPHASIS_OFF: u8 = 0x87;
const CC_CR_LF: u8 = 0x8A;
const UTF8_CC_START: u8 = 0xE0;

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceNames {
    pub service_type: u8,
    pub provider: Option<String>,
    pub provider_short: Option<String>,
    pub name: Option<String>,
    pub name_short: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogicalChannel {
    pub service_id: u16,
    pub visible: bool,
    pub number: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Descriptor {
    ServiceNames(ServiceNames),
    CaSystem(u16),
    CaIdentifiers(Vec<u16>),
    Iso639Languages(Vec<String>),
    Subtitling(Vec<SubtitleTrack>),
    Teletext,
    Ac3,
    EnhancedAc3,
    NetworkName(String),
    FrequencyList(Vec<u32>),
    SatelliteDelivery(delivery::SatelliteDelivery),
    S2SatelliteDelivery,
    CableDelivery(delivery::CableDelivery),
    TerrestrialDelivery(delivery::TerrestrialDelivery),
    T2Delivery(delivery::T2Delivery),
    C2Delivery(delivery::C2Delivery),
    LogicalChannels(Vec<LogicalChannel>),
    NetworkChangeNotify(Vec<NetworkChange>),
    AtscServiceLocation(atsc::ServiceLocation),
    AtscExtendedChannelName(String),
    Unknown(u8),
}

/// Walks one descriptor loop. Truncated or zero-length entries end the
/// loop early; whatever decoded before that is returned.
pub fn parse_descriptor_loop(buf: &[u8]) -> Vec<Descriptor> {
    let mut out = Vec::new();
    let mut idx = 0;
    while idx + 2 <= buf.len() {
        let tag = buf[idx];
        let len = buf[idx + 1] as usize;
        if len == 0 {
            debug!("descriptor_tag == 0x{tag:02x}, len is 0");
            break;
        }
        if idx + 2 + len > buf.len() {
            debug!("descriptor 0x{tag:02x} overruns its loop, stopping");
            break;
        }
        out.push(decode_one(tag, &buf[idx + 2..idx + 2 + len]));
        idx += 2 + len;
    }
    out
}

fn decode_one(tag: u8, p: &[u8]) -> Descriptor {
    match tag {
        DESC_SERVICE => Descriptor::ServiceNames(service_names(p)),
        DESC_CA => match ca_system(p) {
            Some(id) => Descriptor::CaSystem(id),
            None => Descriptor::Unknown(tag),
        },
        DESC_CA_IDENTIFIER => Descriptor::CaIdentifiers(ca_identifiers(p)),
        DESC_ISO639_LANGUAGE => Descriptor::Iso639Languages(iso639_languages(p)),
        DESC_SUBTITLING => Descriptor::Subtitling(subtitling(p)),
        DESC_TELETEXT => Descriptor::Teletext,
        DESC_AC3 => Descriptor::Ac3,
        DESC_ENHANCED_AC3 => Descriptor::EnhancedAc3,
        DESC_NETWORK_NAME => Descriptor::NetworkName(decode_text(p)),
        DESC_FREQUENCY_LIST => Descriptor::FrequencyList(frequency_list(p)),
        DESC_SATELLITE_DELIVERY => match delivery::satellite(p) {
            Some(d) => Descriptor::SatelliteDelivery(d),
            None => Descriptor::Unknown(tag),
        },
        DESC_S2_SATELLITE_DELIVERY => {
            // two transponders on one frequency; nothing to do with it yet
            trace!("S2 satellite delivery system descriptor (skipped)");
            Descriptor::S2SatelliteDelivery
        }
        DESC_CABLE_DELIVERY => match delivery::cable(p) {
            Some(d) => Descriptor::CableDelivery(d),
            None => Descriptor::Unknown(tag),
        },
        DESC_TERRESTRIAL_DELIVERY => match delivery::terrestrial(p) {
            Some(d) => Descriptor::TerrestrialDelivery(d),
            None => Descriptor::Unknown(tag),
        },
        DESC_EXTENSION => extension(p),
        DESC_LOGICAL_CHANNEL => Descriptor::LogicalChannels(logical_channels(p)),
        DESC_ATSC_SERVICE_LOCATION => match atsc::service_location(p) {
            Some(d) => Descriptor::AtscServiceLocation(d),
            None => Descriptor::Unknown(tag),
        },
        DESC_ATSC_EXT_CHANNEL_NAME => match atsc::extended_channel_name(p) {
            Some(n) => Descriptor::AtscExtendedChannelName(n),
            None => Descriptor::Unknown(tag),
        },
        other => {
            trace!("skip descriptor 0x{other:02x}");
            Descriptor::Unknown(other)
        }
    }
}

/// 6.2.16 extension descriptor: the first payload byte selects the real
/// format.
fn extension(p: &[u8]) -> Descriptor {
    let Some((&ext, content)) = p.split_first() else { return Descriptor::Unknown(DESC_EXTENSION) };
    match ext {
        EXT_T2_DELIVERY => match delivery::t2(content) {
            Some(d) => Descriptor::T2Delivery(d),
            None => Descriptor::Unknown(DESC_EXTENSION),
        },
        EXT_C2_DELIVERY => match delivery::c2(content) {
            Some(d) => Descriptor::C2Delivery(d),
            None => Descriptor::Unknown(DESC_EXTENSION),
        },
        EXT_NETWORK_CHANGE_NOTIFY => Descriptor::NetworkChangeNotify(network_change_notify(content)),
        _ => Descriptor::Unknown(DESC_EXTENSION),
    }
}

/// 6.2.33 service descriptor. Characters between emphasis-on/off marks
/// form the short name variant; all visible characters form the full
/// name. Control codes never reach the charset conversion.
fn service_names(p: &[u8]) -> ServiceNames {
    let service_type = *p.first().unwrap_or(&0);

    let (provider, provider_short, rest) = split_name_field(p.get(1..).unwrap_or(&[]));
    let (name, name_short, _) = split_name_field(rest);

    ServiceNames { service_type, provider, provider_short, name, name_short }
}

/// One length-prefixed name: returns (full, short, remainder).
fn split_name_field(p: &[u8]) -> (Option<String>, Option<String>, &[u8]) {
    let Some((&len, rest)) = p.split_first() else { return (None, None, &[]) };
    let len = (len as usize).min(rest.len());
    let (raw, remainder) = rest.split_at(len);

    let is_utf8 = raw.first() == Some(&0x15);
    let mut full = Vec::with_capacity(raw.len());
    let mut short = Vec::new();
    let mut emphasis = false;
    let mut i = 0;
    while i < raw.len() {
        let b = raw[i];
        match b {
            CC_EMPHASIS_ON => emphasis = true,
            CC_EMPHASIS_OFF => emphasis = false,
            CC_CR_LF => {}
            0x80..=0x85 | 0x88 | 0x89 | 0x8B..=0x9F => {} // reserved / user area
            UTF8_CC_START if is_utf8 && i + 1 < raw.len() => {
                // in UTF-8 fields the emphasis marks are two-byte forms
                match raw[i + 1] {
                    CC_EMPHASIS_ON => {
                        emphasis = true;
                        i += 1;
                    }
                    CC_EMPHASIS_OFF => {
                        emphasis = false;
                        i += 1;
                    }
                    _ => {
                        if emphasis {
                            short.push(b);
                        }
                        full.push(b);
                    }
                }
            }
            _ => {
                if emphasis {
                    short.push(b);
                }
                full.push(b);
            }
        }
        i += 1;
    }

    let decode = |bytes: &[u8]| {
        if bytes.is_empty() {
            return None;
        }
        let s = decode_text(bytes);
        if s.is_empty() { None } else { Some(s) }
    };
    (decode(&full), decode(&short), remainder)
}

/// CA descriptor inside a PMT: only the system id matters here.
fn ca_system(p: &[u8]) -> Option<u16> {
    if p.len() < 4 {
        return None;
    }
    Some(get_u16(p))
}

/// 6.2.5 CA identifier descriptor: a plain list of system ids.
fn ca_identifiers(p: &[u8]) -> Vec<u16> {
    p.chunks_exact(2).map(get_u16).collect()
}

/// 6.2.18: groups of ISO_639_language_code + audio_type.
fn iso639_languages(p: &[u8]) -> Vec<String> {
    p.chunks_exact(4)
        .map(|c| c[..3].iter().filter(|b| b.is_ascii_graphic()).map(|&b| b as char).collect())
        .collect()
}

/// 6.2.41 subtitling descriptor: 8 bytes per entry.
fn subtitling(p: &[u8]) -> Vec<SubtitleTrack> {
    p.chunks_exact(8)
        .map(|c| SubtitleTrack {
            pid: 0, // filled by the PMT walk, the descriptor has no PID
            lang: c[..3].iter().filter(|b| b.is_ascii_graphic()).map(|&b| b as char).collect(),
            subtitling_type: c[3],
            composition_page_id: get_u16(&c[4..]),
            ancillary_page_id: get_u16(&c[6..]),
        })
        .collect()
}

/// 6.2.17 frequency list descriptor. coding_type selects the scale:
/// 1 = BCD satellite (×10 → kHz), 2 = BCD cable (×100 → Hz),
/// 3 = raw 32 bit in 10 Hz steps.
fn frequency_list(p: &[u8]) -> Vec<u32> {
    let Some((&head, entries)) = p.split_first() else { return Vec::new() };
    let coding_type = head & 0x03;
    entries
        .chunks_exact(4)
        .filter_map(|c| {
            let f = match coding_type {
                1 => 10 * bcd32(c[0], c[1], c[2], c[3]),
                2 => 100 * bcd32(c[0], c[1], c[2], c[3]),
                3 => 10u32.wrapping_mul(get_u32(c)),
                _ => 0,
            };
            (f != 0).then_some(f)
        })
        .collect()
}

/// NorDig logical channel descriptor: service_id, visible flag, 14-bit
/// channel number, repeating.
fn logical_channels(p: &[u8]) -> Vec<LogicalChannel> {
    p.chunks_exact(4)
        .map(|c| LogicalChannel {
            service_id: get_u16(c),
            visible: c[2] & 0x80 != 0,
            number: u16::from_be_bytes([c[2] & 0x3F, c[3]]),
        })
        .collect()
}

/// 6.4.9 network change notify: per-cell loops of scheduled changes.
fn network_change_notify(c: &[u8]) -> Vec<NetworkChange> {
    let mut out = Vec::new();
    let mut i = 0;
    while i + 3 <= c.len() {
        let cell_id = get_u16(&c[i..]);
        let mut loop_len = c[i + 2] as usize;
        i += 3;
        let mut events = Vec::new();
        while loop_len >= 12 && i + 12 <= c.len() {
            let change_id = c[i];
            let version = c[i + 1];
            let start_time = mjd_bcd_to_utc(get_u16(&c[i + 2..]), &c[i + 4..i + 7]);
            let duration_secs = bcd_time(&c[i + 7..i + 10]);
            let receiver_category = c[i + 10] >> 5;
            let invariant_present = (c[i + 10] >> 4) & 0x1 != 0;
            let change_type = c[i + 10] & 0xF;
            let message_id = c[i + 11];
            i += 12;
            loop_len -= 12;
            let invariant_ts = if invariant_present {
                if i + 4 > c.len() || loop_len < 4 {
                    warn!("network change notify: truncated invariant_ts record");
                    break;
                }
                let tsid = get_u16(&c[i..]);
                let onid = get_u16(&c[i + 2..]);
                i += 4;
                loop_len -= 4;
                Some((tsid, onid))
            } else {
                None
            };
            events.push(NetworkChangeEvent {
                change_id,
                version,
                start_time,
                duration_secs,
                receiver_category,
                change_type,
                message_id,
                invariant_ts,
            });
        }
        out.push(NetworkChange { cell_id, events });
    }
    out
}

/// 300468 annex C: modified julian date + 3 BCD bytes of hh:mm:ss.
fn mjd_bcd_to_utc(mjd: u16, hms: &[u8]) -> DateTime<Utc> {
    // unix epoch is MJD 40587
    let days = mjd as i64 - 40587;
    let secs = days * 86_400 + bcd_time(hms) as i64;
    DateTime::<Utc>::from_timestamp(secs, 0).unwrap_or_default()
}

fn bcd_time(t: &[u8]) -> u32 {
    let d = |b: u8| ((b >> 4) * 10 + (b & 0xF)) as u32;
    d(t[0]) * 3600 + d(t[1]) * 60 + d(t[2])
}

pub(crate) fn bcd32(b0: u8, b1: u8, b2: u8, b3: u8) -> u32 {
    let d = |b: u8| ((b >> 4) as u32 * 10 + (b & 0xF) as u32);
    d(b0) * 1_000_000 + d(b1) * 10_000 + d(b2) * 100 + d(b3)
}

pub(crate) fn get_u16(p: &[u8]) -> u16 {
    u16::from_be_bytes([p[0], p[1]])
}

pub(crate) fn get_u32(p: &[u8]) -> u32 {
    u32::from_be_bytes([p[0], p[1], p[2], p[3]])
}
