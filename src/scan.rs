//! The discovery engine: walks the candidate space, tunes, reads the
//! signaling tables and grows the catalog breadth-first until no
//! undiscovered transponder remains.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, trace, warn};

use crate::catalog::{self, TransponderCatalog};
use crate::constants::{
    FRONTEND_POLL_MS, PID_PAT, PID_SDT_BAT_ST, PID_VCT, POLL_SLICE_MS, TABLE_NIT_ACT,
    TABLE_NIT_OTH, TABLE_PAT, TABLE_PMT, TABLE_SDT_ACT, TABLE_VCT_CABLE, TABLE_VCT_TERR,
};
use crate::frontend::{DeliverySystem, Modulation, Polarization, ScanType};
use crate::plan::{self, ChannelList, ConfigError};
use crate::psi::nit::apply_transport_descriptors;
use crate::psi::{self, Section};
use crate::section_buf::{FilterPool, SectionFilter, TableEvent, filter_timeout};
use crate::tuner::Tuner;
use crate::types::{AtscMode, RunningStatus, ScanFlags, Transponder, TuningParams};

/// How long to wait for any signal/carrier indication, per delivery
/// system. Milliseconds, multiplied by the operator's timeout factor.
fn carrier_timeout(delsys: DeliverySystem) -> Duration {
    Duration::from_millis(match delsys {
        DeliverySystem::DvbT | DeliverySystem::DvbT2 => 2000,
        DeliverySystem::DvbS | DeliverySystem::DvbS2 => 2000,
        DeliverySystem::DvbC | DeliverySystem::DvbC2 => 1500,
        _ => 3000,
    })
}

fn lock_timeout(delsys: DeliverySystem) -> Duration {
    Duration::from_millis(match delsys {
        DeliverySystem::DvbT | DeliverySystem::DvbT2 => 4000,
        DeliverySystem::DvbS | DeliverySystem::DvbS2 => 3000,
        DeliverySystem::DvbC | DeliverySystem::DvbC2 => 3000,
        _ => 8000,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TuneOutcome {
    Locked,
    NoSignal,
    /// outside hardware capabilities; not worth a retry
    Skipped,
}

pub struct ScanOrchestrator<T: Tuner> {
    tuner: T,
    flags: ScanFlags,
    catalog: TransponderCatalog,
    pool: FilterPool,
    cancel: Arc<AtomicBool>,
    /// PMT filters already spawned for the current transponder
    pmt_spawned: HashSet<u16>,
    /// test hook: collapses the signal/lock waits
    wait_cap: Option<Duration>,
}

impl<T: Tuner> ScanOrchestrator<T> {
    pub fn new(tuner: T, flags: ScanFlags, cancel: Arc<AtomicBool>) -> Self {
        ScanOrchestrator {
            tuner,
            flags,
            catalog: TransponderCatalog::default(),
            pool: FilterPool::default(),
            cancel,
            pmt_spawned: HashSet::new(),
            wait_cap: None,
        }
    }

    #[cfg(test)]
    fn with_wait_cap(mut self, cap: Duration) -> Self {
        self.wait_cap = Some(cap);
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Runs the whole discovery. Cancellation is not an error: whatever
    /// was found so far comes back as the (partial) result.
    pub fn run(mut self) -> anyhow::Result<TransponderCatalog> {
        let caps = self.tuner.capabilities();
        if !caps.supports(self.flags.scan_type) {
            return Err(ConfigError::UnsupportedScanType(
                self.flags.scan_type,
                caps.name.clone(),
            )
            .into());
        }

        info!("starting {} scan", self.flags.scan_type.name());
        let seeds = std::mem::take(&mut self.flags.initial_transponders);
        if seeds.is_empty() {
            if self.flags.scan_type == ScanType::Satellite {
                return Err(ConfigError::NoPlan("satellite".into(), ScanType::Satellite).into());
            }
            self.blind_sweep();
        } else {
            info!("updating transponder list from {} supplied entries..", seeds.len());
            for t in seeds {
                self.catalog.push_candidate(t);
            }
        }

        // breadth-first closure: every NIT read may queue new candidates
        while let Some(candidate) = self.catalog.next_candidate() {
            if self.cancelled() {
                info!("interrupted, flushing partial results");
                self.catalog.promote(candidate);
                break;
            }
            self.process_candidate(candidate);
        }

        self.catalog.dedupe_by_ids();
        Ok(self.catalog)
    }

    /// ---- blind scan loop ----
    /// Enumerates generation x modulation x channel x offset x symbol
    /// rate with the per-technology loops disabled where they make no
    /// sense. Each locked carrier gets an immediate PAT/NIT lookup so
    /// later channels can skip transponders the network already told us
    /// about.
    fn blind_sweep(&mut self) {
        let list = self.flags.channel_list;
        let scan_type = self.flags.scan_type;
        let can_2g = self.tuner.capabilities().can_second_gen;

        let generations: &[DeliverySystem] = match scan_type {
            ScanType::Terrestrial if can_2g => &[DeliverySystem::DvbT, DeliverySystem::DvbT2],
            ScanType::Terrestrial => &[DeliverySystem::DvbT],
            ScanType::Cable => &[DeliverySystem::DvbC],
            ScanType::Atsc => &[DeliverySystem::Atsc],
            ScanType::Satellite => return,
        };

        let modulations: Vec<Modulation> = match scan_type {
            ScanType::Atsc => match self.flags.atsc_mode {
                AtscMode::Vsb => vec![Modulation::Vsb8],
                AtscMode::Qam => vec![Modulation::Qam256],
                AtscMode::Both => vec![Modulation::Vsb8, Modulation::Qam256],
            },
            ScanType::Cable if self.flags.cable_no_auto_qam => {
                (0..3).map(plan::dvbc_modulation).collect()
            }
            _ => vec![Modulation::Auto],
        };

        let sr_max = if scan_type == ScanType::Cable { plan::DVBC_SYMBOLRATE_MAX_INDEX } else { 0 };

        for &delsys in generations {
            info!("Scanning {delsys:?}...");
            for &modulation in &modulations {
                // ATSC air and cable use different rasters
                let list = match (scan_type, modulation) {
                    (ScanType::Atsc, Modulation::Qam256) => ChannelList::AtscQamCable,
                    _ => list,
                };
                for channel in 0..=list.channel_max() {
                    let mut offs = 0;
                    while let Some(offset) = list.freq_offset(channel, offs) {
                        offs += 1;
                        let Some(base) = plan::channel_to_frequency(channel, list) else { continue };
                        let f = base.saturating_add_signed(offset);

                        for sr_idx in 0..=sr_max {
                            if self.cancelled() {
                                return;
                            }
                            if self.try_blind_candidate(delsys, modulation, list, channel, f, sr_idx)
                            {
                                break; // locked: no point trying more symbol rates here
                            }
                        }
                    }
                }
            }
        }
    }

    /// One parameter combination of the sweep. Returns true on lock.
    fn try_blind_candidate(
        &mut self,
        delsys: DeliverySystem,
        modulation: Modulation,
        list: ChannelList,
        channel: u32,
        f: u32,
        sr_idx: u32,
    ) -> bool {
        let scan_type = self.flags.scan_type;
        let mut params = TuningParams::auto(delsys);
        params.frequency = f;
        params.bandwidth = list.bandwidth(channel);
        params.inversion = self.tuner.capabilities().inversion;

        match scan_type {
            ScanType::Cable => {
                let Some(sr) = plan::dvbc_symbolrate(sr_idx) else { return false };
                if sr > plan::max_dvbc_srate(list.freq_step(channel)) {
                    return false; // beyond what this raster width can carry
                }
                params.symbolrate = sr;
                params.modulation = modulation;
            }
            ScanType::Atsc => {
                params.modulation = modulation;
                params.delsys = if modulation == Modulation::Qam256 {
                    DeliverySystem::AtscCable
                } else {
                    DeliverySystem::Atsc
                };
            }
            _ => {}
        }

        let mut test = Transponder::new(f, scan_type, Polarization::Horizontal);
        test.params = params;

        if self.catalog.is_known_initial(&test, false) {
            info!("{}: skipped (already known transponder)", f / 1000);
            return false;
        }

        info!("{}: trying {}", f / 1000, test.summary());
        if self.tune_once(&mut test) != TuneOutcome::Locked {
            return false;
        }

        // some terrestrial frontends silently toggle T <-> T2; trust the
        // driver's answer over the request
        if scan_type == ScanType::Terrestrial {
            if let Some(actual) = self.tuner.delivery_system() {
                if actual != test.params.delsys {
                    debug!("wrong delsys: skip over");
                    return true;
                }
            }
        }

        info!("        signal ok: {}", test.summary());
        if scan_type == ScanType::Atsc {
            // PSIP lookup happens in the service scan pass
            if self.catalog.find_by_frequency(f, scan_type, Polarization::Horizontal).is_none() {
                self.catalog.push_candidate(test);
            }
            return true;
        }

        // immediate PAT + NIT(actual) read: ids now, cross-references now
        if self.initial_table_lookup(&mut test) {
            if self.catalog.find_by_frequency(f, scan_type, Polarization::Horizontal).is_none() {
                self.catalog.push_candidate(test);
            }
        } else {
            info!("        deleting ({})", test.summary());
        }
        true
    }

    /// First-contact table read on a freshly locked carrier: PAT alone
    /// (transport stream id, NIT pid), then NIT actual.
    fn initial_table_lookup(&mut self, current: &mut Transponder) -> bool {
        trace!("        initial PAT lookup..");
        let pat_seen = self.run_table(current, PID_PAT, TABLE_PAT, None, false, false);
        if !pat_seen {
            return false; // doesn't look like a valid tp
        }

        if let Some(actual) = self.tuner.delivery_system() {
            current.params.delsys = actual;
        }

        trace!("        initial NIT lookup..");
        self.run_table(current, current.network_pid, TABLE_NIT_ACT, None, false, false);
        true
    }

    /// ---- per-candidate processing ----
    fn process_candidate(&mut self, mut t: Transponder) {
        if t.scan_type != self.flags.scan_type {
            // cable descriptors in a satellite NIT and the like
            t.last_tuning_failed = true;
            self.catalog.promote(t);
            return;
        }

        info!("tune to: {}{}", t.summary(), if t.last_tuning_failed { " (no signal)" } else { "" });
        let locked = self.tune_with_retries(&mut t);
        if locked {
            self.scan_tables(&mut t);
        } else {
            info!("----------no signal----------");
        }
        self.catalog.promote(t);
        self.catalog.dedupe_by_ids();
    }

    /// One tuning attempt, then exactly one more with everything reset
    /// to AUTO; afterwards the alternate-frequency tree is walked the
    /// same way. A later NIT pass may still resurrect the candidate.
    fn tune_with_retries(&mut self, t: &mut Transponder) -> bool {
        match self.tune_once(t) {
            TuneOutcome::Locked => return true,
            TuneOutcome::Skipped => return false,
            TuneOutcome::NoSignal => {
                catalog::mark_auto_retry(t);
                if self.tune_once(t) == TuneOutcome::Locked {
                    return true;
                }
            }
        }

        if !t.params.other_frequency_flag {
            return false;
        }
        // single-frequency networks: retry on each announced cell and
        // transposer that nobody scanned yet
        let mut alternates = Vec::new();
        for cell in &t.frequencies {
            alternates.push(cell.frequency);
            alternates.extend(cell.transposers.iter().map(|tr| tr.frequency));
        }
        for f in alternates {
            if f == 0 || self.cancelled() {
                continue;
            }
            if self.catalog.is_scanned_frequency(f, t.scan_type, t.params.polarization) {
                continue;
            }
            info!("retrying with center frequency = {f}");
            t.params.frequency = f;
            if self.tune_once(t) == TuneOutcome::Locked {
                return true;
            }
        }
        false
    }

    fn tune_once(&mut self, t: &mut Transponder) -> TuneOutcome {
        let caps = self.tuner.capabilities();
        if t.params.delsys.is_second_gen() && !caps.can_second_gen {
            info!("\t{}: skipped (no driver support)", t.params.frequency);
            return TuneOutcome::Skipped;
        }
        if !caps.frequency_in_range(t.params.frequency) {
            info!("\t skipped: (freq {} unsupported by driver)", t.params.frequency);
            return TuneOutcome::Skipped;
        }
        if matches!(t.scan_type, ScanType::Cable | ScanType::Satellite)
            && !caps.symbol_rate_in_range(t.params.symbolrate)
        {
            info!("\t skipped: (srate {} unsupported by driver)", t.params.symbolrate);
            return TuneOutcome::Skipped;
        }

        if let Err(e) = self.tuner.set_params(&t.params, t.scan_type) {
            warn!("setting frontend parameters failed: {e}");
            return TuneOutcome::Skipped;
        }

        let mult = self.flags.tuning_timeout_mult.max(1);
        let signal_deadline = self.wait(carrier_timeout(t.params.delsys) * mult);
        let mut status = self.tuner.read_status();
        while !status.has_any_signal() && Instant::now() < signal_deadline {
            thread::sleep(Duration::from_millis(FRONTEND_POLL_MS));
            status = self.tuner.read_status();
        }
        if !status.has_any_signal() {
            t.last_tuning_failed = true;
            t.locks_with_params = false;
            return TuneOutcome::NoSignal;
        }

        let lock_deadline = self.wait(lock_timeout(t.params.delsys) * mult);
        while !status.lock && Instant::now() < lock_deadline {
            thread::sleep(Duration::from_millis(FRONTEND_POLL_MS));
            status = self.tuner.read_status();
        }
        if status.lock {
            t.last_tuning_failed = false;
            t.locks_with_params = true;
            TuneOutcome::Locked
        } else {
            t.last_tuning_failed = true;
            t.locks_with_params = false;
            TuneOutcome::NoSignal
        }
    }

    fn wait(&self, nominal: Duration) -> Instant {
        Instant::now() + self.wait_cap.map_or(nominal, |cap| nominal.min(cap))
    }

    /// Full table scan of a locked transponder. First PAT alone (pins
    /// the transport stream id and the NIT pid), then everything else in
    /// parallel, slowest filters first.
    fn scan_tables(&mut self, current: &mut Transponder) {
        self.pmt_spawned.clear();

        match self.flags.scan_type {
            ScanType::Atsc => {
                let mode = self.flags.atsc_mode;
                if matches!(mode, AtscMode::Vsb | AtscMode::Both) {
                    self.add_filter(PID_VCT, TABLE_VCT_TERR, None, false);
                }
                if matches!(mode, AtscMode::Qam | AtscMode::Both) {
                    self.add_filter(PID_VCT, TABLE_VCT_CABLE, None, false);
                }
                self.add_filter(PID_PAT, TABLE_PAT, None, false);
                self.pump_until_idle(current, true);
            }
            _ => {
                self.run_table(current, PID_PAT, TABLE_PAT, None, false, false);

                self.add_filter(current.network_pid, TABLE_NIT_ACT, None, false);
                if self.flags.get_other_nits {
                    // one NIT-other per foreign network, all on this pid
                    self.add_filter(current.network_pid, TABLE_NIT_OTH, None, true);
                }
                self.add_filter(PID_SDT_BAT_ST, TABLE_SDT_ACT, None, false);
                self.add_filter(PID_PAT, TABLE_PAT, None, false);
                self.pump_until_idle(current, true);
            }
        }
    }

    fn add_filter(
        &mut self,
        pid: u16,
        table_id: u8,
        table_id_ext: Option<u16>,
        segmented: bool,
    ) {
        let timeout =
            filter_timeout(self.flags.scan_type, table_id, self.flags.long_filter_timeout);
        let filter = SectionFilter::new(pid, table_id, table_id_ext, segmented, timeout);
        self.pool.add(&mut self.tuner, filter);
    }

    /// Opens one filter and pumps until it (and everything it spawned)
    /// finishes. Returns whether any section of that table arrived.
    fn run_table(
        &mut self,
        current: &mut Transponder,
        pid: u16,
        table_id: u8,
        table_id_ext: Option<u16>,
        segmented: bool,
        spawn_pmts: bool,
    ) -> bool {
        self.add_filter(pid, table_id, table_id_ext, segmented);
        self.pump_until_idle(current, spawn_pmts) > 0
    }

    /// The cooperative poll loop: drain sections, dispatch them, honor
    /// cancellation between slices. Returns the number of dispatched
    /// sections.
    fn pump_until_idle(&mut self, current: &mut Transponder, spawn_pmts: bool) -> usize {
        let mut dispatched = 0;
        while !self.pool.idle() {
            if self.cancelled() {
                self.pool.clear(&mut self.tuner);
                break;
            }
            let events = self.pool.pump(&mut self.tuner);
            if events.is_empty() {
                thread::sleep(Duration::from_millis(POLL_SLICE_MS));
                continue;
            }
            for ev in events {
                dispatched += 1;
                self.dispatch(current, ev, spawn_pmts);
            }
        }
        dispatched
    }

    fn dispatch(&mut self, current: &mut Transponder, ev: TableEvent, spawn_pmts: bool) {
        // the pool only forwards CRC-clean sections; a parse error here
        // means the table body itself is inconsistent
        let sec = match Section::parse(&ev.raw) {
            Ok(sec) => sec,
            Err(e) => {
                warn!("section re-parse failed on pid 0x{:04x}: {e}", ev.pid);
                return;
            }
        };
        match ev.table_id {
            TABLE_PAT => match psi::parse_pat(&sec) {
                Ok(pat) => self.handle_pat(current, &pat, spawn_pmts),
                Err(e) => warn!("PAT: {e}"),
            },
            TABLE_PMT => match psi::parse_pmt(&sec) {
                Ok(pmt) => {
                    trace!("PMT 0x{:04x} for service {}", ev.pid, pmt.service_id);
                    pmt.apply_to(current.service_mut(pmt.service_id));
                }
                Err(e) => warn!("PMT: {e}"),
            },
            TABLE_NIT_ACT | TABLE_NIT_OTH => match psi::parse_nit(&sec) {
                Ok(nit) => self.handle_nit(current, &nit),
                Err(e) => warn!("NIT: {e}"),
            },
            TABLE_SDT_ACT => match psi::parse_sdt(&sec) {
                Ok(sdt) => self.handle_sdt(current, &sdt),
                Err(e) => warn!("SDT: {e}"),
            },
            TABLE_VCT_TERR | TABLE_VCT_CABLE => match psi::parse_vct(&sec) {
                Ok(vct) => self.handle_vct(current, &vct),
                Err(e) => warn!("VCT: {e}"),
            },
            other => trace!("unhandled table 0x{other:02x}"),
        }
    }

    fn handle_pat(&mut self, current: &mut Transponder, pat: &psi::PatSection, spawn_pmts: bool) {
        trace!("PAT (xxxx:xxxx:{})", pat.transport_stream_id);
        if current.transport_stream_id != pat.transport_stream_id {
            info!(
                "        {} : updating transport_stream_id: -> ({}:{}:{})",
                current.summary(),
                current.original_network_id,
                current.network_id,
                pat.transport_stream_id
            );
            current.transport_stream_id = pat.transport_stream_id;
        }
        if let Some(pid) = pat.network_pid {
            current.network_pid = pid;
        }

        for entry in &pat.entries {
            // the SDT might have created the service already
            let svc = current.service_mut(entry.service_id);
            svc.pmt_pid = entry.pmt_pid;
            svc.transport_stream_id = pat.transport_stream_id;
            if spawn_pmts && self.pmt_spawned.insert(entry.pmt_pid) {
                self.add_filter(entry.pmt_pid, TABLE_PMT, Some(entry.service_id), false);
            }
        }
    }

    fn handle_nit(&mut self, current: &mut Transponder, nit: &psi::NitSection) {
        let actual = nit.table_id == TABLE_NIT_ACT;
        trace!("{}: (xxxx:{}:xxxx)", if actual { "NIT(act)" } else { "NIT(oth)" }, nit.network_id);

        if actual {
            if current.network_id != nit.network_id {
                info!(
                    "        {} : updating network_id -> ({}:{}:{})",
                    current.summary(),
                    current.original_network_id,
                    nit.network_id,
                    current.transport_stream_id
                );
                current.network_id = nit.network_id;
            }
            if nit.network_name.is_some() {
                current.network_name = nit.network_name.clone();
            }
            if !nit.network_changes.is_empty() {
                current.network_changes = nit.network_changes.clone();
            }
        }

        for tr in &nit.transports {
            trace!(
                "        {}: ({}:{}:{})",
                if actual { "NIT(act)" } else { "NIT(oth)" },
                tr.original_network_id,
                nit.network_id,
                tr.transport_stream_id
            );

            let mut draft = Transponder::new(0, self.flags.scan_type, Polarization::Horizontal);
            draft.scan_type = current.scan_type;
            draft.network_pid = current.network_pid;
            draft.network_id = nit.network_id;
            draft.original_network_id = tr.original_network_id;
            draft.transport_stream_id = tr.transport_stream_id;
            if actual
                && current.original_network_id == tr.original_network_id
                && current.transport_stream_id == tr.transport_stream_id
            {
                // updating the carrier we are parked on: current settings
                // are the best default
                draft.params = current.params.clone();
            }
            apply_transport_descriptors(
                &mut draft,
                &tr.descriptors,
                self.flags.scan_type,
                self.tuner.capabilities().can_second_gen,
            );
            draft.source |= (nit.table_id as u16) << 8;

            if self.is_current(current, tr.original_network_id, nit.network_id, tr.transport_stream_id)
            {
                update_from_nit(current, &mut draft, actual);
                continue;
            }

            if let Some(known) = self.catalog.find_by_ids_mut(
                tr.original_network_id,
                nit.network_id,
                tr.transport_stream_id,
            ) {
                update_from_nit(known, &mut draft, actual);
                continue;
            }

            // not known by ids: EXPAND step. Only carriers of the active
            // technology become candidates.
            if draft.scan_type != self.flags.scan_type {
                continue;
            }
            let matches_current = draft.params.frequency > 0
                && current.scan_type == draft.scan_type
                && catalog::is_nearly_same_frequency(
                    current.params.frequency,
                    draft.params.frequency,
                    draft.scan_type,
                );
            if matches_current {
                info!("        already known: ({}), but not found by pids", draft.summary());
                continue;
            }
            match self.catalog.alloc(
                draft.params.frequency,
                draft.scan_type,
                draft.params.polarization,
            ) {
                Some(idx) => {
                    if draft.scan_type == ScanType::Satellite {
                        draft.params.pilot = crate::types::Pilot::Auto;
                    }
                    info!("        new transponder: ({}) 0x{:04X}", draft.summary(), draft.source);
                    catalog::merge(self.catalog.pending_mut(idx), &draft);
                }
                None => {
                    info!("        already known: ({}), but not found by pids", draft.summary())
                }
            }
        }
    }

    fn is_current(&self, current: &Transponder, onid: u16, nid: u16, tsid: u16) -> bool {
        if tsid == 0 || current.transport_stream_id != tsid {
            return false;
        }
        (onid != 0 && current.original_network_id == onid)
            || (nid != 0 && current.network_id == nid)
            || current.original_network_id == 0
    }

    fn handle_sdt(&mut self, current: &mut Transponder, sdt: &psi::SdtSection) {
        trace!("SDT(actual TS, transport_stream_id {})", sdt.transport_stream_id);
        if current.original_network_id == 0 {
            current.original_network_id = sdt.original_network_id;
        }

        for entry in &sdt.entries {
            let svc = current.service_mut(entry.service_id);
            svc.running = entry.running;
            svc.scrambled |= entry.scrambled;
            for &id in &entry.ca_ids {
                svc.add_ca_id(id);
            }
            if let Some(names) = &entry.names {
                svc.service_type = names.service_type;
                // names, once learned, stay; later tables only fill gaps
                if svc.service_name.is_none() {
                    svc.service_name = names.name.clone();
                }
                if svc.service_short_name.is_none() {
                    svc.service_short_name = names.name_short.clone();
                }
                if svc.provider_name.is_none() {
                    svc.provider_name = names.provider.clone();
                }
                if svc.provider_short_name.is_none() {
                    svc.provider_short_name = names.provider_short.clone();
                }
            }
        }
    }

    fn handle_vct(&mut self, current: &mut Transponder, vct: &psi::VctSection) {
        trace!("ATSC VCT, table_id {}, tsid {}", vct.table_id, vct.transport_stream_id);
        current.source = 0x4000 | vct.table_id as u16;
        let mut pseudo_id = 0xFFFFu16;

        for entry in &vct.channels {
            let ch = &entry.channel;
            let program = if ch.program_number == 0 {
                // inactive channel: keep it addressable anyway
                pseudo_id -= 1;
                pseudo_id
            } else {
                ch.program_number
            };

            let svc = current.service_mut(program);
            if svc.service_name.is_none() {
                svc.service_name = entry
                    .extended_name
                    .clone()
                    .or_else(|| (!ch.short_name.is_empty()).then(|| ch.short_name.clone()));
            }
            svc.logical_channel =
                ((ch.major_channel_number as u32) << 10) | ch.minor_channel_number as u32;
            svc.visible = !ch.hidden;
            svc.running = if ch.hidden { RunningStatus::NotRunning } else { RunningStatus::Running };
            svc.scrambled |= ch.access_controlled;
            svc.service_type = ch.service_type;

            if let Some(loc) = &entry.location {
                svc.pcr_pid = loc.pcr_pid;
                for el in &loc.elements {
                    use crate::descriptors::atsc::{STREAM_TYPE_ATSC_AC3, STREAM_TYPE_MPEG2_VIDEO};
                    match el.stream_type {
                        STREAM_TYPE_MPEG2_VIDEO => {
                            svc.video_pid = el.elementary_pid;
                            svc.video_stream_type = el.stream_type;
                        }
                        STREAM_TYPE_ATSC_AC3 => {
                            if svc.ac3.iter().all(|t| t.pid != el.elementary_pid) {
                                if let Some(track) = svc.push_ac3(el.elementary_pid, el.stream_type)
                                {
                                    track.lang = el.lang.clone();
                                }
                            }
                        }
                        other => warn!("unhandled stream_type: 0x{other:02X}"),
                    }
                }
            }

            info!(
                " Channel number: {}:{}. Name: '{}'",
                ch.major_channel_number,
                ch.minor_channel_number,
                svc.service_name.as_deref().unwrap_or("")
            );
        }
    }
}

/// A known carrier gets rewritten from NIT-actual only while its record
/// still has auto-detected holes or never locked with what it has;
/// NIT-other is too unreliable to update anything.
fn update_from_nit(known: &mut Transponder, draft: &mut Transponder, actual: bool) {
    if known.original_network_id == 0 && draft.original_network_id != 0 {
        info!(
            "        updating original_network_id -> ({}:{}:{})",
            draft.original_network_id, known.network_id, known.transport_stream_id
        );
        known.original_network_id = draft.original_network_id;
    }
    if !actual {
        return;
    }
    if draft.params.other_frequency_flag {
        draft.params.frequency = known.params.frequency;
    }
    if catalog::is_different_deep(known, draft, false)
        && (!known.locks_with_params || known.params.has_auto())
    {
        info!("        updating transponder: ({}) 0x{:04X}", known.summary(), known.source);
        catalog::merge(known, draft);
        info!("        to ({}) 0x{:04X}", known.summary(), known.source);
    }
}

/// Library entry point: runs a scan against any tuner implementation.
pub fn run_scan<T: Tuner>(
    tuner: T,
    flags: ScanFlags,
    cancel: Arc<AtomicBool>,
) -> anyhow::Result<TransponderCatalog> {
    ScanOrchestrator::new(tuner, flags, cancel).run()
}
