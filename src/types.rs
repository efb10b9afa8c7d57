//! Data model: transponders, services, alternate frequencies and the
//! flags value steering a scan run.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::chars::Charset;
use crate::constants::{AC3_CHAN_MAX, AUDIO_CHAN_MAX, CA_SYSTEM_ID_MAX, PID_NIT_ST, SUBTITLES_MAX};
use crate::frontend::{
    CodeRate, DeliverySystem, GuardInterval, Hierarchy, Inversion, Modulation, Polarization,
    Rolloff, ScanType, TransmissionMode,
};
use crate::plan::ChannelList;

/// Pilot tones (satellite 2nd generation only).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Pilot {
    On,
    Off,
    Auto,
}

/// The tunable parameter block. Copied wholesale between records when a
/// NIT pass supplies better data for an already known carrier.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TuningParams {
    /// unit Hz, except satellite: kHz
    pub frequency: u32,
    pub symbolrate: u32,
    /// Hz
    pub bandwidth: u32,
    pub delsys: DeliverySystem,
    pub modulation: Modulation,
    pub polarization: Polarization,
    pub coderate: CodeRate,
    pub coderate_lp: CodeRate,
    pub guard: GuardInterval,
    pub transmission: TransmissionMode,
    pub hierarchy: Hierarchy,
    pub rolloff: Rolloff,
    pub inversion: Inversion,
    pub pilot: Pilot,
    /// DVB-T2 / DVB-C2
    pub plp_id: u8,
    pub system_id: u16,
    /// DVB-C2 data slice
    pub data_slice_id: u8,
    /// satellite only: 0x0000..0x1800, west_east in bit form
    pub orbital_position: u16,
    pub west_east: bool,
    pub other_frequency_flag: bool,
    pub tfs: bool,
}

impl TuningParams {
    /// Everything auto-detectable left at its AUTO sentinel.
    pub fn auto(delsys: DeliverySystem) -> Self {
        TuningParams {
            frequency: 0,
            symbolrate: 0,
            bandwidth: 0,
            delsys,
            modulation: Modulation::Auto,
            polarization: Polarization::Horizontal,
            coderate: CodeRate::Auto,
            coderate_lp: CodeRate::Auto,
            guard: GuardInterval::Auto,
            transmission: TransmissionMode::Auto,
            hierarchy: Hierarchy::Auto,
            rolloff: Rolloff::Auto,
            inversion: Inversion::Auto,
            pilot: Pilot::Auto,
            plp_id: 0,
            system_id: 0,
            data_slice_id: 0,
            orbital_position: 0,
            west_east: false,
            other_frequency_flag: false,
            tfs: false,
        }
    }

    /// True while anything the hardware could still auto-detect is left
    /// at its sentinel; such a record deserves an update from the NIT.
    pub fn has_auto(&self) -> bool {
        match self.delsys {
            DeliverySystem::DvbT2 => {
                self.transmission == TransmissionMode::Auto || self.guard == GuardInterval::Auto
            }
            DeliverySystem::DvbT => {
                self.coderate == CodeRate::Auto
                    || self.modulation == Modulation::Auto
                    || self.transmission == TransmissionMode::Auto
                    || self.guard == GuardInterval::Auto
            }
            DeliverySystem::DvbC | DeliverySystem::DvbC2 => self.modulation == Modulation::Auto,
            DeliverySystem::DvbS2 => {
                self.rolloff == Rolloff::Auto
                    || self.coderate == CodeRate::Auto
                    || self.modulation == Modulation::Auto
            }
            DeliverySystem::DvbS => {
                self.coderate == CodeRate::Auto || self.modulation == Modulation::Auto
            }
            DeliverySystem::Atsc | DeliverySystem::AtscCable => self.modulation == Modulation::Auto,
        }
    }
}

/// An alternate center frequency announced for the same logical mux
/// (SFN cell or time-frequency-slicing arrangement), possibly with
/// transposers of its own. Transposer entries keep their list empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FrequencyItem {
    pub cell_id: u16,
    pub frequency: u32,
    pub transposers: Vec<FrequencyItem>,
}

impl FrequencyItem {
    pub fn new(cell_id: u16, frequency: u32) -> Self {
        FrequencyItem { cell_id, frequency, transposers: Vec::new() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunningStatus {
    Undefined,
    NotRunning,
    StartsSoon,
    Pausing,
    Running,
    OffAir,
}

impl RunningStatus {
    pub fn from_wire(v: u8) -> Self {
        match v {
            1 => RunningStatus::NotRunning,
            2 => RunningStatus::StartsSoon,
            3 => RunningStatus::Pausing,
            4 => RunningStatus::Running,
            5 => RunningStatus::OffAir,
            _ => RunningStatus::Undefined,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AudioTrack {
    pub pid: u16,
    pub stream_type: u8,
    /// ISO-639, empty until a language descriptor names it
    pub lang: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SubtitleTrack {
    pub pid: u16,
    pub lang: String,
    pub subtitling_type: u8,
    pub composition_page_id: u16,
    pub ancillary_page_id: u16,
}

/// One broadcast service on a transponder. Created by whichever of
/// PAT / SDT / VCT references it first; later tables fill the gaps but a
/// name, once set, is never overwritten.
#[derive(Debug, Clone, Serialize)]
pub struct Service {
    pub service_id: u16,
    pub transport_stream_id: u16,
    pub service_type: u8,
    pub pmt_pid: u16,
    pub pcr_pid: u16,
    pub video_pid: u16,
    pub video_stream_type: u8,
    pub audio: Vec<AudioTrack>,
    pub ac3: Vec<AudioTrack>,
    pub subtitles: Vec<SubtitleTrack>,
    pub teletext_pid: u16,
    pub ca_ids: Vec<u16>,
    pub provider_name: Option<String>,
    pub provider_short_name: Option<String>,
    pub service_name: Option<String>,
    pub service_short_name: Option<String>,
    pub scrambled: bool,
    pub visible: bool,
    pub logical_channel: u32,
    pub running: RunningStatus,
}

impl Service {
    pub fn new(service_id: u16) -> Self {
        Service {
            service_id,
            transport_stream_id: 0,
            service_type: 0,
            pmt_pid: 0,
            pcr_pid: 0,
            video_pid: 0,
            video_stream_type: 0,
            audio: Vec::new(),
            ac3: Vec::new(),
            subtitles: Vec::new(),
            teletext_pid: 0,
            ca_ids: Vec::new(),
            provider_name: None,
            provider_short_name: None,
            service_name: None,
            service_short_name: None,
            scrambled: false,
            visible: true,
            logical_channel: 0,
            running: RunningStatus::Undefined,
        }
    }

    pub fn push_audio(&mut self, pid: u16, stream_type: u8) -> Option<&mut AudioTrack> {
        if self.audio.len() >= AUDIO_CHAN_MAX {
            log::warn!("more than {AUDIO_CHAN_MAX} audio channels, truncating");
            return None;
        }
        self.audio.push(AudioTrack { pid, stream_type, lang: String::new() });
        self.audio.last_mut()
    }

    pub fn push_ac3(&mut self, pid: u16, stream_type: u8) -> Option<&mut AudioTrack> {
        if self.ac3.len() >= AC3_CHAN_MAX {
            log::warn!("more than {AC3_CHAN_MAX} ac3 channels, truncating");
            return None;
        }
        self.ac3.push(AudioTrack { pid, stream_type, lang: String::new() });
        self.ac3.last_mut()
    }

    pub fn push_subtitle(&mut self, track: SubtitleTrack) {
        if self.subtitles.len() < SUBTITLES_MAX {
            self.subtitles.push(track);
        }
    }

    /// Accumulates a CA system id, deduplicated and capped.
    pub fn add_ca_id(&mut self, ca_id: u16) {
        if self.ca_ids.contains(&ca_id) {
            return;
        }
        if self.ca_ids.len() >= CA_SYSTEM_ID_MAX {
            log::warn!("too many CA system ids, dropping 0x{ca_id:04x}");
            return;
        }
        self.ca_ids.push(ca_id);
    }

    /// TV / radio classification per the DVB service type field;
    /// ATSC services are pre-classified by the VCT decoder.
    pub fn is_tv(&self) -> bool {
        matches!(self.service_type, 0x01 | 0x11 | 0x16 | 0x19 | 0x1F) || self.video_pid != 0
    }

    pub fn is_radio(&self) -> bool {
        self.video_pid == 0 && (!self.audio.is_empty() || !self.ac3.is_empty())
    }
}

/// Network-change-notify schedule entry (one change on one cell).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkChangeEvent {
    pub change_id: u8,
    pub version: u8,
    pub start_time: DateTime<Utc>,
    pub duration_secs: u32,
    pub receiver_category: u8,
    pub change_type: u8,
    pub message_id: u8,
    /// (tsid, onid) staying invariant across the change, if announced
    pub invariant_ts: Option<(u16, u16)>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkChange {
    pub cell_id: u16,
    pub events: Vec<NetworkChangeEvent>,
}

/// One tunable carrier and everything learned about it.
#[derive(Debug, Clone, Serialize)]
pub struct Transponder {
    pub params: TuningParams,
    pub scan_type: ScanType,
    /// alternate center frequencies; the primary one lives in `params`
    pub frequencies: Vec<FrequencyItem>,
    pub services: Vec<Service>,
    /// PID carrying the NIT, from the PAT entry with service id 0
    pub network_pid: u16,
    pub network_id: u16,
    pub original_network_id: u16,
    pub transport_stream_id: u16,
    pub network_name: Option<String>,
    pub network_changes: Vec<NetworkChange>,
    /// which table/descriptor stamped the parameters, for diagnostics
    pub source: u16,
    /// the hardware locked with the current parameter set
    pub locks_with_params: bool,
    pub last_tuning_failed: bool,
}

impl Transponder {
    pub fn new(frequency: u32, scan_type: ScanType, polarization: Polarization) -> Self {
        let delsys = match scan_type {
            ScanType::Terrestrial => DeliverySystem::DvbT,
            ScanType::Cable => DeliverySystem::DvbC,
            ScanType::Satellite => DeliverySystem::DvbS,
            ScanType::Atsc => DeliverySystem::Atsc,
        };
        let mut params = TuningParams::auto(delsys);
        params.frequency = frequency;
        params.polarization = polarization;
        let frequencies =
            if frequency > 0 { vec![FrequencyItem::new(0, frequency)] } else { Vec::new() };
        Transponder {
            params,
            scan_type,
            frequencies,
            services: Vec::new(),
            network_pid: PID_NIT_ST,
            network_id: 0,
            original_network_id: 0,
            transport_stream_id: 0,
            network_name: None,
            network_changes: Vec::new(),
            source: 0,
            locks_with_params: false,
            last_tuning_failed: false,
        }
    }

    pub fn find_service(&self, service_id: u16) -> Option<&Service> {
        self.services.iter().find(|s| s.service_id == service_id)
    }

    /// Service ids are unique within one transponder; returns the existing
    /// record or appends a fresh one.
    pub fn service_mut(&mut self, service_id: u16) -> &mut Service {
        if let Some(i) = self.services.iter().position(|s| s.service_id == service_id) {
            return &mut self.services[i];
        }
        self.services.push(Service::new(service_id));
        self.services.last_mut().unwrap()
    }

    /// True if `f` already appears anywhere in the alternate frequency
    /// tree (cells or their transposers).
    pub fn knows_frequency(&self, f: u32) -> bool {
        self.frequencies
            .iter()
            .any(|p| p.frequency == f || p.transposers.iter().any(|t| t.frequency == f))
    }

    pub fn add_frequency(&mut self, cell_id: u16, f: u32) {
        if f == 0 {
            return;
        }
        for p in &mut self.frequencies {
            if p.frequency == f || p.transposers.iter().any(|t| t.frequency == f) {
                p.cell_id = cell_id;
                return;
            }
        }
        self.frequencies.push(FrequencyItem::new(cell_id, f));
    }

    pub fn add_transposer(&mut self, cell_id: u16, cell_ext: u8, center: u32, f: u32) {
        let cell = match self.frequencies.iter_mut().find(|p| p.cell_id == cell_id) {
            Some(c) => c,
            None => {
                self.frequencies.push(FrequencyItem::new(cell_id, center));
                self.frequencies.last_mut().unwrap()
            }
        };
        if let Some(t) = cell.transposers.iter_mut().find(|t| t.frequency == f) {
            t.cell_id = cell_ext as u16;
        } else {
            cell.transposers.push(FrequencyItem::new(cell_ext as u16, f));
        }
    }

    /// One-line form for log output, e.g.
    /// `QAM64 f = 474000 kHz B8 DvbT (8468:12290:257)`.
    pub fn summary(&self) -> String {
        let ids = format!(
            "({}:{}:{})",
            self.original_network_id, self.network_id, self.transport_stream_id
        );
        match self.scan_type {
            ScanType::Terrestrial => format!(
                "{:<8} f = {} kHz B{} {:?} {ids}",
                self.params.modulation.name(),
                self.params.frequency / 1000,
                self.params.bandwidth / 1_000_000,
                self.params.delsys,
            ),
            ScanType::Cable => format!(
                "{:<8} f = {} kHz S{} {ids}",
                self.params.modulation.name(),
                self.params.frequency / 1000,
                self.params.symbolrate / 1000,
            ),
            ScanType::Satellite => format!(
                "{:?} f = {} kHz {} SR {} {ids}",
                self.params.delsys,
                self.params.frequency,
                self.params.polarization.name(),
                self.params.symbolrate / 1000,
            ),
            ScanType::Atsc => format!(
                "{:<8} f = {} kHz {ids}",
                self.params.modulation.name(),
                self.params.frequency / 1000,
            ),
        }
    }
}

/// Which service classes make it into the output.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ServiceFilter {
    pub tv: bool,
    pub radio: bool,
    pub other: bool,
}

impl Default for ServiceFilter {
    fn default() -> Self {
        ServiceFilter { tv: true, radio: true, other: false }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OutputFormat {
    TuningList,
    Json,
}

/// ATSC sub-mode: over-the-air 8VSB, cable QAM, or both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AtscMode {
    Vsb,
    Qam,
    Both,
}

/// Everything the operator chose, threaded through the orchestrator.
#[derive(Debug, Clone)]
pub struct ScanFlags {
    pub scan_type: ScanType,
    pub channel_list: ChannelList,
    pub atsc_mode: AtscMode,
    pub charset: Charset,
    pub service_filter: ServiceFilter,
    pub include_encrypted: bool,
    /// also harvest NIT-other (slow, adds foreign-network transponders)
    pub get_other_nits: bool,
    /// blind-scan the cable modulation loop instead of QAM_AUTO
    pub cable_no_auto_qam: bool,
    /// multiplies every carrier/lock timeout; 1..=3
    pub tuning_timeout_mult: u32,
    /// double section filter timeouts (weak signal mode)
    pub long_filter_timeout: bool,
    pub output: OutputFormat,
    /// pre-supplied candidates; empty means synthesize them from the
    /// channel plan (satellite scans always need this list)
    pub initial_transponders: Vec<Transponder>,
}

impl Default for ScanFlags {
    fn default() -> Self {
        ScanFlags {
            scan_type: ScanType::Terrestrial,
            channel_list: ChannelList::EuropeTerr,
            atsc_mode: AtscMode::Vsb,
            charset: Charset::default(),
            service_filter: ServiceFilter::default(),
            include_encrypted: false,
            get_other_nits: false,
            cable_no_auto_qam: false,
            tuning_timeout_mult: 1,
            long_filter_timeout: false,
            output: OutputFormat::TuningList,
            initial_transponders: Vec::new(),
        }
    }
}
