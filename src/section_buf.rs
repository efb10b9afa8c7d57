//! Section filter state: per-(pid, table id, extension) assembly tracking
//! and the round-robin pool that keeps at most a fixed number of demux
//! filters open at once.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use bytes::Bytes;
use log::{debug, info, trace, warn};

use crate::constants::{
    MAX_RUNNING_FILTERS, SECTION_BUF_SIZE, TABLE_NIT_ACT, TABLE_NIT_OTH, TABLE_PAT, TABLE_PMT,
    TABLE_SDT_ACT, TABLE_SDT_OTH,
};
use crate::crc32::GarbageRing;
use crate::frontend::ScanType;
use crate::psi::Section;
use crate::tuner::{FilterHandle, FilterKey, Tuner};

/// Minimum table repetition rates in seconds (ETR211 4.4.1/4.4.2 and
/// 13818-1 C.9); the filter timeout is derived from these.
pub fn repetition_rate(scan_type: ScanType, table_id: u8) -> u64 {
    match scan_type {
        ScanType::Cable | ScanType::Satellite => match table_id {
            TABLE_PAT | TABLE_PMT => 1,
            TABLE_SDT_ACT => 2,
            TABLE_NIT_ACT | TABLE_NIT_OTH | TABLE_SDT_OTH => 10,
            _ => {
                debug!("table id 0x{table_id:02X} no repetition rate defined");
                30
            }
        },
        ScanType::Terrestrial => match table_id {
            TABLE_PAT | TABLE_PMT => 1,
            TABLE_SDT_ACT => 2,
            TABLE_NIT_ACT | TABLE_NIT_OTH | TABLE_SDT_OTH => 12,
            _ => {
                debug!("table id 0x{table_id:02X} no repetition rate defined");
                30
            }
        },
        ScanType::Atsc => match table_id {
            TABLE_PAT | TABLE_PMT => 1,
            // no published repetition-rate floor for PSIP tables
            _ => 5,
        },
    }
}

/// Timeout for one filter: one spare second plus the repetition rate,
/// doubled in long-timeout mode.
pub fn filter_timeout(scan_type: ScanType, table_id: u8, long_timeout: bool) -> Duration {
    let rate = repetition_rate(scan_type, table_id);
    Duration::from_secs(1 + if long_timeout { 2 * rate } else { rate })
}

/// One tracked (extension, version, bitmap) triple. Segmented tables get
/// one of these per extension value observed.
#[derive(Debug)]
struct SegmentState {
    table_id_ext: u16,
    version: u8,
    section_done: [u8; 32],
    complete: bool,
}

impl SegmentState {
    fn new(table_id_ext: u16, version: u8) -> Self {
        SegmentState { table_id_ext, version, section_done: [0; 32], complete: false }
    }

    fn reset(&mut self, version: u8) {
        self.version = version;
        self.section_done = [0; 32];
        self.complete = false;
    }

    fn get_bit(&self, bit: u8) -> bool {
        self.section_done[bit as usize / 8] >> (bit % 8) & 1 != 0
    }

    fn set_bit(&mut self, bit: u8) {
        self.section_done[bit as usize / 8] |= 1 << (bit % 8);
    }
}

/// What feeding one raw section did to the filter state.
#[derive(Debug)]
pub enum FeedResult {
    /// table id of the section does not belong to this filter
    WrongTable,
    /// CRC or framing failure; a majority-vote reconstruction is handed
    /// back when enough damaged copies agree
    Garbage(Option<Bytes>),
    AlreadySeen,
    /// fresh section; `filter_complete` means every announced section
    /// number of a non-segmented table has now been seen
    New { filter_complete: bool },
}

pub struct SectionFilter {
    pub pid: u16,
    pub table_id: u8,
    /// fixed extension scope, or None to bind to whatever arrives
    pub table_id_ext: Option<u16>,
    /// segmented tables (NIT-other) span many extension values and only
    /// ever finish by timeout
    pub segmented: bool,
    pub timeout: Duration,
    segments: Vec<SegmentState>,
    garbage: GarbageRing,
}

impl SectionFilter {
    pub fn new(
        pid: u16,
        table_id: u8,
        table_id_ext: Option<u16>,
        segmented: bool,
        timeout: Duration,
    ) -> Self {
        SectionFilter { pid, table_id, table_id_ext, segmented, timeout, segments: Vec::new(), garbage: GarbageRing::default() }
    }

    pub fn complete(&self) -> bool {
        !self.segmented && self.segments.iter().any(|s| s.complete)
    }

    pub fn feed(&mut self, raw: &[u8]) -> FeedResult {
        let sec = match Section::parse(&raw[..raw.len().min(SECTION_BUF_SIZE)]) {
            Ok(sec) => sec,
            Err(e) => {
                debug!(
                    "pid 0x{:04x} table 0x{:02x}: {e}, keeping copy for recovery",
                    self.pid, self.table_id
                );
                self.garbage.push(Bytes::copy_from_slice(raw));
                return FeedResult::Garbage(self.garbage.recover());
            }
        };

        if sec.table_id != self.table_id {
            return FeedResult::WrongTable;
        }
        if let Some(want) = self.table_id_ext {
            if !self.segmented && sec.table_id_ext != want {
                return FeedResult::WrongTable;
            }
        }

        // locate (or create) the per-extension assembly state
        let idx = match self.segments.iter().position(|s| s.table_id_ext == sec.table_id_ext) {
            Some(i) => i,
            None if self.segmented || self.segments.is_empty() => {
                self.segments.push(SegmentState::new(sec.table_id_ext, sec.version));
                self.segments.len() - 1
            }
            None => {
                // non-segmented table switched extension: discontinuity,
                // restart accumulation under the new scope
                debug!(
                    "table_id_ext changed 0x{:04x} -> 0x{:04x}",
                    self.segments[0].table_id_ext, sec.table_id_ext
                );
                self.segments[0] = SegmentState::new(sec.table_id_ext, sec.version);
                0
            }
        };
        let seg = &mut self.segments[idx];

        if seg.version != sec.version {
            debug!("section version_number changed {} -> {}", seg.version, sec.version);
            seg.reset(sec.version);
        }

        if seg.get_bit(sec.section_number) {
            return FeedResult::AlreadySeen;
        }
        seg.set_bit(sec.section_number);
        trace!(
            "pid 0x{:04x} tid 0x{:02x} ext 0x{:04x} section {}/{} version {}",
            self.pid, sec.table_id, sec.table_id_ext, sec.section_number, sec.last_section,
            sec.version
        );

        seg.complete = (0..=sec.last_section).all(|i| seg.get_bit(i));

        // segmented tables never report completion on their own: the
        // number of extension values is unknown, the timeout decides
        FeedResult::New { filter_complete: self.complete() }
    }
}

struct ActiveFilter {
    filter: SectionFilter,
    handle: FilterHandle,
    started: Instant,
}

/// One freshly accepted (validated, not yet interpreted) section.
pub struct TableEvent {
    pub pid: u16,
    pub table_id: u8,
    pub raw: Bytes,
}

/// Keeps at most `MAX_RUNNING_FILTERS` demux filters open; the rest wait
/// and start opportunistically as slots free up.
#[derive(Default)]
pub struct FilterPool {
    running: Vec<ActiveFilter>,
    waiting: VecDeque<SectionFilter>,
}

impl FilterPool {
    pub fn add(&mut self, tuner: &mut dyn Tuner, filter: SectionFilter) {
        if self.running.len() >= MAX_RUNNING_FILTERS {
            trace!("too much filters, queuing pid 0x{:04x}", filter.pid);
            self.waiting.push_back(filter);
            return;
        }
        self.start(tuner, filter);
    }

    fn start(&mut self, tuner: &mut dyn Tuner, filter: SectionFilter) {
        let key = FilterKey { pid: filter.pid, table_id: filter.table_id };
        match tuner.open_filter(key) {
            Ok(handle) => {
                trace!("start filter pid 0x{:04x} table_id 0x{:02x}", filter.pid, filter.table_id);
                self.running.push(ActiveFilter { filter, handle, started: Instant::now() });
            }
            Err(e) => {
                if self.running.is_empty() {
                    warn!("could not open demux: {e}; dropping filter");
                } else {
                    self.waiting.push_back(filter);
                }
            }
        }
    }

    pub fn idle(&self) -> bool {
        self.running.is_empty() && self.waiting.is_empty()
    }

    /// One poll slice: drains pending sections from every running filter,
    /// retires filters that completed or timed out, and promotes waiting
    /// filters into free slots. Returns the freshly accepted sections.
    pub fn pump(&mut self, tuner: &mut dyn Tuner) -> Vec<TableEvent> {
        let mut events = Vec::new();
        let now = Instant::now();
        let mut i = 0;
        while i < self.running.len() {
            let af = &mut self.running[i];
            // one section per filter per slice keeps the scheduling fair
            if let Some(raw) = tuner.read_section(af.handle) {
                match af.filter.feed(&raw) {
                    FeedResult::New { .. } => {
                        events.push(TableEvent {
                            pid: af.filter.pid,
                            table_id: af.filter.table_id,
                            raw,
                        });
                    }
                    FeedResult::Garbage(Some(recovered)) => {
                        info!(
                            "recovered damaged section on pid 0x{:04x} by majority vote",
                            af.filter.pid
                        );
                        if let FeedResult::New { .. } = af.filter.feed(&recovered) {
                            events.push(TableEvent {
                                pid: af.filter.pid,
                                table_id: af.filter.table_id,
                                raw: recovered,
                            });
                        }
                    }
                    FeedResult::Garbage(None)
                    | FeedResult::AlreadySeen
                    | FeedResult::WrongTable => {}
                }
            }

            let expired = now.duration_since(af.started) > af.filter.timeout;
            if af.filter.complete() || expired {
                let af = self.running.swap_remove(i);
                if af.filter.complete() {
                    trace!("filter success: pid 0x{:04x}", af.filter.pid);
                } else if !af.filter.segmented && af.filter.segments.is_empty() {
                    info!(
                        "no data from table 0x{:02x} on pid 0x{:04x} after {} seconds",
                        af.filter.table_id,
                        af.filter.pid,
                        af.filter.timeout.as_secs()
                    );
                }
                tuner.close_filter(af.handle);
                if let Some(next) = self.waiting.pop_front() {
                    self.start(tuner, next);
                }
            } else {
                i += 1;
            }
        }
        events
    }

    /// Drops every filter immediately (cancellation path).
    pub fn clear(&mut self, tuner: &mut dyn Tuner) {
        for af in self.running.drain(..) {
            tuner.close_filter(af.handle);
        }
        self.waiting.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::psi::section::testing::build_section;

    fn filter() -> SectionFilter {
        SectionFilter::new(0x10, 0x40, None, false, Duration::from_secs(10))
    }

    #[test]
    fn completes_only_after_all_sections_regardless_of_order() {
        let mut f = filter();
        let body = [0u8; 8];
        for (n, expect_done) in [(1u8, false), (0, false), (2, true)] {
            let raw = build_section(0x40, 0x1001, 5, n, 2, &body);
            match f.feed(&raw) {
                FeedResult::New { filter_complete } => assert_eq!(filter_complete, expect_done),
                other => panic!("unexpected {other:?}"),
            }
        }
        assert!(f.complete());
    }

    #[test]
    fn version_change_clears_marked_sections() {
        let mut f = filter();
        let body = [0u8; 8];
        for n in [1u8, 2] {
            f.feed(&build_section(0x40, 0x1001, 5, n, 2, &body));
        }
        // same section numbers, new version: accumulation restarts
        match f.feed(&build_section(0x40, 0x1001, 6, 0, 2, &body)) {
            FeedResult::New { filter_complete } => assert!(!filter_complete),
            other => panic!("unexpected {other:?}"),
        }
        assert!(!f.complete());
        f.feed(&build_section(0x40, 0x1001, 6, 1, 2, &body));
        f.feed(&build_section(0x40, 0x1001, 6, 2, 2, &body));
        assert!(f.complete());
    }

    #[test]
    fn duplicate_sections_are_reported_as_seen() {
        let mut f = filter();
        let raw = build_section(0x40, 0x1001, 5, 0, 1, &[0; 4]);
        assert!(matches!(f.feed(&raw), FeedResult::New { .. }));
        assert!(matches!(f.feed(&raw), FeedResult::AlreadySeen));
    }

    #[test]
    fn segmented_filters_never_self_complete() {
        let mut f = SectionFilter::new(0x10, 0x41, None, true, Duration::from_secs(10));
        for ext in [0x2001u16, 0x2002, 0x2003] {
            let raw = build_section(0x41, ext, 1, 0, 0, &[0; 6]);
            match f.feed(&raw) {
                FeedResult::New { filter_complete } => assert!(!filter_complete),
                other => panic!("unexpected {other:?}"),
            }
        }
        assert!(!f.complete());
        assert_eq!(f.segments.len(), 3);
    }

    #[test]
    fn damaged_sections_go_to_garbage_and_can_recover() {
        let mut f = filter();
        let good = build_section(0x40, 0x1001, 1, 0, 0, &[0xAB; 10]);
        for flip in [3usize, 9, 15] {
            let mut bad = good.clone();
            bad[flip] ^= 0x01;
            match f.feed(&bad) {
                FeedResult::Garbage(rec) => {
                    if flip == 15 {
                        // third disjoint-error copy: vote succeeds
                        assert_eq!(rec.as_deref(), Some(&good[..]));
                    } else {
                        assert!(rec.is_none());
                    }
                }
                other => panic!("unexpected {other:?}"),
            }
        }
        assert!(!f.complete());
    }

    #[test]
    fn repetition_rates_match_the_standard_floor() {
        assert_eq!(repetition_rate(ScanType::Cable, TABLE_PAT), 1);
        assert_eq!(repetition_rate(ScanType::Terrestrial, TABLE_NIT_ACT), 12);
        assert_eq!(repetition_rate(ScanType::Satellite, TABLE_NIT_OTH), 10);
        assert_eq!(
            filter_timeout(ScanType::Terrestrial, TABLE_NIT_ACT, true),
            Duration::from_secs(25)
        );
    }
}
