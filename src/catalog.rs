//! The owned collection of discovered transponders.
//!
//! Two identity channels: physical (frequency within a per-technology
//! tolerance, polarization for satellite) and logical (the
//! original-network-id / network-id / transport-stream-id triple, usable
//! once PAT and NIT have been read). A transponder lives in exactly one
//! of the pending and scanned sets at any time.

use log::{debug, info, trace};

use crate::constants::{FREQ_TOLERANCE_HZ, FREQ_TOLERANCE_SAT_KHZ};
use crate::frontend::{CodeRate, DeliverySystem, GuardInterval, Hierarchy, Modulation, Polarization, Rolloff, ScanType, TransmissionMode};
use crate::types::{Pilot, Transponder};

/// Different NITs list the same carrier with slightly different
/// frequencies, so equality is a tolerance window, not a key.
pub fn is_nearly_same_frequency(f1: u32, f2: u32, scan_type: ScanType) -> bool {
    if f1 == f2 {
        return true;
    }
    let diff = f1.abs_diff(f2);
    let near = match scan_type {
        ScanType::Satellite => diff < FREQ_TOLERANCE_SAT_KHZ,
        _ => diff < FREQ_TOLERANCE_HZ,
    };
    if near {
        debug!("f1 = {f1} is same TP as f2 = {f2} (diff={diff})");
    }
    near
}

fn differs<T: PartialEq + Copy>(a: T, b: T, auto_allowed: bool, auto: T) -> bool {
    a != b && (!auto_allowed || (a != auto && b != auto))
}

/// Deep parameter comparison. With `auto_allowed`, a parameter that is
/// AUTO on either side is never grounds for calling the records
/// different; that keeps an AUTO-result re-scan from being treated as a
/// fresh carrier forever.
pub fn is_different_deep(a: &Transponder, b: &Transponder, auto_allowed: bool) -> bool {
    if a.scan_type != b.scan_type {
        return true;
    }
    if !is_nearly_same_frequency(a.params.frequency, b.params.frequency, a.scan_type) {
        return true;
    }
    let (pa, pb) = (&a.params, &b.params);
    match a.scan_type {
        ScanType::Terrestrial => {
            differs(pa.modulation, pb.modulation, auto_allowed, Modulation::Auto)
                || differs(pa.bandwidth, pb.bandwidth, auto_allowed, 8_000_000)
                || differs(pa.coderate, pb.coderate, auto_allowed, CodeRate::Auto)
                || differs(pa.hierarchy, pb.hierarchy, auto_allowed, Hierarchy::Auto)
                || differs(pa.coderate_lp, pb.coderate_lp, auto_allowed, CodeRate::Auto)
                || differs(pa.transmission, pb.transmission, auto_allowed, TransmissionMode::Auto)
                || differs(pa.guard, pb.guard, auto_allowed, GuardInterval::Auto)
                || differs(pa.delsys, pb.delsys, auto_allowed, DeliverySystem::DvbT)
                || differs(pa.plp_id, pb.plp_id, auto_allowed, 0)
                || differs(pa.system_id, pb.system_id, auto_allowed, 0)
        }
        ScanType::Atsc => differs(pa.modulation, pb.modulation, auto_allowed, Modulation::Auto),
        ScanType::Cable => {
            differs(pa.modulation, pb.modulation, auto_allowed, Modulation::Auto)
                || pa.symbolrate != pb.symbolrate
                || differs(pa.coderate, pb.coderate, auto_allowed, CodeRate::Auto)
                || differs(pa.delsys, pb.delsys, auto_allowed, DeliverySystem::DvbC)
                || differs(pa.plp_id, pb.plp_id, auto_allowed, 0)
                || differs(pa.system_id, pb.system_id, auto_allowed, 0)
        }
        ScanType::Satellite => {
            pa.symbolrate != pb.symbolrate
                || pa.delsys != pb.delsys
                || pa.polarization != pb.polarization
                || differs(pa.coderate, pb.coderate, auto_allowed, CodeRate::Auto)
                || differs(pa.rolloff, pb.rolloff, auto_allowed, Rolloff::Auto)
                || differs(pa.modulation, pb.modulation, auto_allowed, Modulation::Qpsk)
        }
    }
}

/// Copies everything `src` knows onto `dest`: tuning parameters, ids,
/// network name, the whole alternate-frequency tree and the service
/// list. Services replace the previous list (never append) so repeated
/// NIT passes do not pile up duplicates; fields `src` knows nothing
/// about are left standing.
pub fn merge(dest: &mut Transponder, src: &Transponder) {
    dest.params = src.params.clone();
    dest.scan_type = src.scan_type;
    dest.network_pid = src.network_pid;
    dest.network_id = src.network_id;
    dest.original_network_id = src.original_network_id;
    dest.transport_stream_id = src.transport_stream_id;
    dest.source = src.source;
    if src.network_name.is_some() {
        dest.network_name = src.network_name.clone();
    }
    if !src.frequencies.is_empty() {
        dest.frequencies = src.frequencies.clone();
    }
    if !src.services.is_empty() {
        dest.services = src.services.clone();
    }
    if !src.network_changes.is_empty() {
        dest.network_changes = src.network_changes.clone();
    }
}

/// After a failed tuning attempt: ask the hardware to auto-detect on the
/// retry instead of insisting on parameters that did not lock.
pub fn mark_auto_retry(t: &mut Transponder) {
    let p = &mut t.params;
    if p.delsys != DeliverySystem::DvbS2 {
        p.modulation = Modulation::Auto;
    }
    p.pilot = Pilot::Auto;
    p.coderate = CodeRate::Auto;
    p.guard = GuardInterval::Auto;
    p.rolloff = Rolloff::Auto;
    p.transmission = TransmissionMode::Auto;
    t.source = 0; // want update by NIT again
}

#[derive(Debug, Default)]
pub struct TransponderCatalog {
    /// candidates not yet tuned
    pending: Vec<Transponder>,
    /// tuned (or given up on) exactly once, never re-tuned
    scanned: Vec<Transponder>,
}

impl TransponderCatalog {
    pub fn pending(&self) -> &[Transponder] {
        &self.pending
    }

    pub fn scanned(&self) -> &[Transponder] {
        &self.scanned
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Takes the next candidate out of the pending set. The caller owns
    /// it until `promote`.
    pub fn next_candidate(&mut self) -> Option<Transponder> {
        if self.pending.is_empty() { None } else { Some(self.pending.remove(0)) }
    }

    /// Frequency-tolerance lookup across scanned then pending. Satellite
    /// additionally requires matching polarization.
    pub fn find_by_frequency(
        &self,
        frequency: u32,
        scan_type: ScanType,
        polarization: Polarization,
    ) -> Option<&Transponder> {
        if frequency < 1 {
            return None;
        }
        let matches = |t: &&Transponder| {
            if scan_type == ScanType::Satellite && t.params.polarization != polarization {
                return false;
            }
            is_nearly_same_frequency(t.params.frequency, frequency, scan_type)
        };
        self.scanned.iter().find(matches).or_else(|| self.pending.iter().find(matches))
    }

    pub fn is_scanned_frequency(
        &self,
        frequency: u32,
        scan_type: ScanType,
        polarization: Polarization,
    ) -> bool {
        self.scanned.iter().any(|t| {
            (scan_type != ScanType::Satellite || t.params.polarization == polarization)
                && is_nearly_same_frequency(t.params.frequency, frequency, scan_type)
        })
    }

    /// Logical identity lookup: onid + tsid preferred, nid + tsid as the
    /// fallback. A zero transport stream id never matches anything.
    pub fn find_by_ids_mut(
        &mut self,
        original_network_id: u16,
        network_id: u16,
        transport_stream_id: u16,
    ) -> Option<&mut Transponder> {
        if transport_stream_id == 0 {
            return None;
        }
        // split into two passes to keep the borrow checker and the
        // priority order (onid first) both happy
        if original_network_id != 0 {
            let hit = |t: &Transponder| {
                t.original_network_id == original_network_id
                    && t.transport_stream_id == transport_stream_id
            };
            if self.scanned.iter().any(|t| hit(t)) {
                return self.scanned.iter_mut().find(|t| hit(t));
            }
            if self.pending.iter().any(|t| hit(t)) {
                return self.pending.iter_mut().find(|t| hit(t));
            }
        }
        if network_id != 0 {
            let hit = |t: &Transponder| {
                t.network_id == network_id && t.transport_stream_id == transport_stream_id
            };
            if self.scanned.iter().any(|t| hit(t)) {
                return self.scanned.iter_mut().find(|t| hit(t));
            }
            if self.pending.iter().any(|t| hit(t)) {
                return self.pending.iter_mut().find(|t| hit(t));
            }
        }
        None
    }

    /// Queues a new candidate unless an entry with the same frequency and
    /// polarization is already pending or scanned. Returns the index into
    /// the pending set when inserted.
    pub fn alloc(
        &mut self,
        frequency: u32,
        scan_type: ScanType,
        polarization: Polarization,
    ) -> Option<usize> {
        if frequency > 0 && self.find_by_frequency(frequency, scan_type, polarization).is_some() {
            return None;
        }
        self.pending.push(Transponder::new(frequency, scan_type, polarization));
        Some(self.pending.len() - 1)
    }

    pub fn push_candidate(&mut self, t: Transponder) {
        self.pending.push(t);
    }

    pub fn pending_mut(&mut self, idx: usize) -> &mut Transponder {
        &mut self.pending[idx]
    }

    /// Moves a candidate into the scanned set. Idempotent: a second
    /// record within frequency tolerance is dropped rather than added.
    pub fn promote(&mut self, t: Transponder) {
        let known = self.scanned.iter().any(|st| {
            (t.scan_type != ScanType::Satellite
                || st.params.polarization == t.params.polarization)
                && is_nearly_same_frequency(st.params.frequency, t.params.frequency, t.scan_type)
        });
        if known {
            trace!("promote: {} already scanned", t.summary());
            return;
        }
        self.scanned.push(t);
    }

    /// Used by the blind-scan loop: skip a parameter combination when a
    /// NIT pass already announced this carrier (source stamped with the
    /// originating table id).
    pub fn is_known_initial(&self, test: &Transponder, auto_allowed: bool) -> bool {
        for t in &self.pending {
            let from_nit = (t.source >> 8) == 0x40 || (t.source >> 8) == 0x41;
            let same = match test.scan_type {
                ScanType::Terrestrial | ScanType::Cable => {
                    t.scan_type == test.scan_type
                        && is_nearly_same_frequency(
                            t.params.frequency,
                            test.params.frequency,
                            t.scan_type,
                        )
                }
                ScanType::Atsc => {
                    t.scan_type == test.scan_type
                        && is_nearly_same_frequency(
                            t.params.frequency,
                            test.params.frequency,
                            t.scan_type,
                        )
                        && t.params.modulation == test.params.modulation
                }
                ScanType::Satellite => !is_different_deep(test, t, auto_allowed),
            };
            if same {
                return from_nit;
            }
        }
        false
    }

    /// Coalesces records that turned out to denote the same transport
    /// stream once PAT/NIT filled in the id triple. The earliest record
    /// survives; a missing terrestrial frequency is backfilled.
    pub fn dedupe_by_ids(&mut self) {
        loop {
            let dup = find_id_duplicate(&self.scanned, &self.scanned)
                .map(|(keep, drop)| (Set::Scanned, keep, Set::Scanned, drop))
                .or_else(|| {
                    find_id_duplicate(&self.scanned, &self.pending)
                        .map(|(keep, drop)| (Set::Scanned, keep, Set::Pending, drop))
                })
                .or_else(|| {
                    find_id_duplicate(&self.pending, &self.pending)
                        .map(|(keep, drop)| (Set::Pending, keep, Set::Pending, drop))
                });
            let Some((keep_set, keep, drop_set, drop)) = dup else { return };

            let removed = match drop_set {
                Set::Scanned => self.scanned.remove(drop),
                Set::Pending => self.pending.remove(drop),
            };
            let kept = match keep_set {
                Set::Scanned => &mut self.scanned[keep],
                Set::Pending => &mut self.pending[keep],
            };
            if kept.scan_type == ScanType::Terrestrial && kept.params.frequency == 0 {
                kept.params.frequency = removed.params.frequency;
            }
            info!("deleting duplicate transponder {}", removed.summary());
        }
    }
}

enum Set {
    Pending,
    Scanned,
}

fn same_ids(a: &Transponder, b: &Transponder) -> bool {
    if a.transport_stream_id != b.transport_stream_id {
        return false;
    }
    if a.network_id != b.network_id {
        return false;
    }
    if a.original_network_id != 0 && b.original_network_id != 0 {
        return a.original_network_id == b.original_network_id;
    }
    true
}

fn find_id_duplicate(keep_in: &[Transponder], drop_in: &[Transponder]) -> Option<(usize, usize)> {
    let same_slice = std::ptr::eq(keep_in.as_ptr(), drop_in.as_ptr());
    for (i, a) in keep_in.iter().enumerate() {
        if a.transport_stream_id == 0 {
            continue;
        }
        for (j, b) in drop_in.iter().enumerate() {
            if same_slice && j <= i {
                continue;
            }
            if same_ids(a, b) {
                return Some((i, j));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terr(freq: u32) -> Transponder {
        Transponder::new(freq, ScanType::Terrestrial, Polarization::Horizontal)
    }

    #[test]
    fn terrestrial_tolerance_window() {
        let mut cat = TransponderCatalog::default();
        assert!(cat.alloc(474_000_000, ScanType::Terrestrial, Polarization::Horizontal).is_some());
        // 300 kHz off: same carrier
        assert!(cat.alloc(474_300_000, ScanType::Terrestrial, Polarization::Horizontal).is_none());
        // 1 MHz off: a different one
        assert!(cat.alloc(475_000_000, ScanType::Terrestrial, Polarization::Horizontal).is_some());
        assert_eq!(cat.pending().len(), 2);
    }

    #[test]
    fn tolerance_is_symmetric() {
        for (a, b) in [(474_000_000u32, 474_749_999u32), (474_749_999, 474_000_000)] {
            assert!(is_nearly_same_frequency(a, b, ScanType::Terrestrial));
        }
        assert!(!is_nearly_same_frequency(474_000_000, 474_750_000, ScanType::Terrestrial));
    }

    #[test]
    fn satellite_needs_matching_polarization() {
        let mut cat = TransponderCatalog::default();
        cat.alloc(11_750_000, ScanType::Satellite, Polarization::Horizontal);
        // same frequency, other polarization: distinct transponder
        assert!(cat.alloc(11_750_500, ScanType::Satellite, Polarization::Vertical).is_some());
        assert!(cat.alloc(11_750_500, ScanType::Satellite, Polarization::Horizontal).is_none());
    }

    #[test]
    fn id_lookup_prefers_onid_then_nid() {
        let mut cat = TransponderCatalog::default();
        let mut a = terr(474_000_000);
        a.network_id = 0x3001;
        a.transport_stream_id = 0x0101;
        let mut b = terr(490_000_000);
        b.original_network_id = 0x2001;
        b.network_id = 0x3001;
        b.transport_stream_id = 0x0101;
        cat.promote(a);
        cat.promote(b);

        let hit = cat.find_by_ids_mut(0x2001, 0, 0x0101).unwrap();
        assert_eq!(hit.params.frequency, 490_000_000);
        let hit = cat.find_by_ids_mut(0, 0x3001, 0x0101).unwrap();
        assert_eq!(hit.params.frequency, 474_000_000);
        assert!(cat.find_by_ids_mut(0x2001, 0x3001, 0).is_none());
    }

    #[test]
    fn promote_is_idempotent() {
        let mut cat = TransponderCatalog::default();
        cat.promote(terr(474_000_000));
        cat.promote(terr(474_200_000));
        assert_eq!(cat.scanned().len(), 1);
    }

    #[test]
    fn auto_never_causes_mismatch() {
        let mut a = terr(474_000_000);
        let mut b = terr(474_100_000);
        a.params.modulation = Modulation::Qam64;
        b.params.modulation = Modulation::Auto;
        a.params.guard = GuardInterval::G1_8;
        b.params.guard = GuardInterval::Auto;
        assert!(!is_different_deep(&a, &b, true));
        // strict comparison does see the difference
        assert!(is_different_deep(&a, &b, false));
        // a real conflict is a mismatch either way
        b.params.modulation = Modulation::Qam256;
        assert!(is_different_deep(&a, &b, true));
    }

    #[test]
    fn merge_replaces_services() {
        let mut dest = terr(474_000_000);
        dest.service_mut(1).service_name = Some("old".into());
        dest.service_mut(2);

        let mut src = terr(474_000_000);
        src.network_id = 0x3001;
        src.transport_stream_id = 7;
        src.add_frequency(3, 490_000_000);
        src.service_mut(1).service_name = Some("new".into());

        merge(&mut dest, &src);
        assert_eq!(dest.network_id, 0x3001);
        assert_eq!(dest.services.len(), 1);
        assert_eq!(dest.services[0].service_name.as_deref(), Some("new"));
        assert!(dest.knows_frequency(490_000_000));
    }

    #[test]
    fn auto_retry_resets_parameters() {
        let mut t = terr(474_000_000);
        t.params.modulation = Modulation::Qam64;
        t.params.coderate = CodeRate::Fec2_3;
        t.params.guard = GuardInterval::G1_4;
        t.params.transmission = TransmissionMode::M8k;
        t.source = 0x405A;
        mark_auto_retry(&mut t);
        assert_eq!(t.params.modulation, Modulation::Auto);
        assert_eq!(t.params.coderate, CodeRate::Auto);
        assert_eq!(t.params.guard, GuardInterval::Auto);
        assert_eq!(t.params.transmission, TransmissionMode::Auto);
        assert_eq!(t.source, 0);
    }

    #[test]
    fn dedupe_coalesces_equal_id_triples() {
        let mut cat = TransponderCatalog::default();
        let mut a = terr(0);
        a.network_id = 1;
        a.transport_stream_id = 0x0101;
        let mut b = terr(474_000_000);
        b.network_id = 1;
        b.transport_stream_id = 0x0101;
        cat.scanned.push(a);
        cat.scanned.push(b);
        cat.dedupe_by_ids();
        assert_eq!(cat.scanned().len(), 1);
        // surviving record got the frequency backfilled
        assert_eq!(cat.scanned()[0].params.frequency, 474_000_000);
    }

    #[test]
    fn candidate_never_in_both_sets() {
        let mut cat = TransponderCatalog::default();
        cat.alloc(474_000_000, ScanType::Terrestrial, Polarization::Horizontal);
        let t = cat.next_candidate().unwrap();
        assert!(!cat.has_pending());
        cat.promote(t);
        assert_eq!(cat.scanned().len(), 1);
        // same carrier re-announced by a NIT: must not re-enter pending
        assert!(cat.alloc(474_100_000, ScanType::Terrestrial, Polarization::Horizontal).is_none());
    }
}
