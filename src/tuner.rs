//! The frontend/demux boundary. The scan core only ever talks to this
//! trait; real hardware and recorded-log replays are interchangeable
//! behind it.

use bytes::Bytes;

use crate::frontend::{DeliverySystem, FeStatus, ScanType, TunerCapabilities};
use crate::types::TuningParams;

/// A demux section filter key: every filter matches one (pid, table id)
/// pair; table-extension scoping happens in software.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FilterKey {
    pub pid: u16,
    pub table_id: u8,
}

pub type FilterHandle = u32;

pub trait Tuner {
    fn capabilities(&self) -> &TunerCapabilities;

    /// Applies the parameter set. An error here is a hardware fault, not
    /// "no signal"; absence of signal shows up in `read_status`.
    fn set_params(&mut self, params: &TuningParams, scan_type: ScanType) -> anyhow::Result<()>;

    fn read_status(&mut self) -> FeStatus;

    /// What the driver actually tuned. Some frontends silently toggle
    /// between generations (DVB-T vs. T2), so the answer can differ from
    /// the requested delivery system.
    fn delivery_system(&mut self) -> Option<DeliverySystem>;

    fn open_filter(&mut self, key: FilterKey) -> anyhow::Result<FilterHandle>;

    /// Non-blocking; one complete section per call when data is pending.
    fn read_section(&mut self, handle: FilterHandle) -> Option<Bytes>;

    fn close_filter(&mut self, handle: FilterHandle);
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::{HashMap, VecDeque};
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::frontend::Inversion;

    /// Scripted tuner: a set of carriers, each with lock behavior and
    /// canned sections per filter key.
    pub struct ScriptedCarrier {
        /// Hz (or kHz for satellite scripts)
        pub frequency: u32,
        pub locks: bool,
        pub sections: HashMap<FilterKey, Vec<Bytes>>,
    }

    pub struct ScriptedTuner {
        caps: TunerCapabilities,
        carriers: Vec<ScriptedCarrier>,
        tuned: Option<usize>,
        /// frequency -> number of set_params calls; shared so tests keep
        /// a handle after the orchestrator consumes the tuner
        pub tune_counts: Arc<Mutex<HashMap<u32, u32>>>,
        open: HashMap<FilterHandle, VecDeque<Bytes>>,
        next_handle: FilterHandle,
        pub current_delsys: Option<DeliverySystem>,
    }

    impl ScriptedTuner {
        pub fn new(carriers: Vec<ScriptedCarrier>) -> Self {
            ScriptedTuner {
                caps: TunerCapabilities {
                    name: "scripted".into(),
                    delivery_systems: vec![
                        DeliverySystem::DvbT,
                        DeliverySystem::DvbT2,
                        DeliverySystem::DvbC,
                        DeliverySystem::DvbS,
                        DeliverySystem::DvbS2,
                        DeliverySystem::Atsc,
                    ],
                    frequency_min: 0,
                    frequency_max: u32::MAX,
                    symbol_rate_min: 0,
                    symbol_rate_max: u32::MAX,
                    can_second_gen: true,
                    inversion: Inversion::Auto,
                },
                carriers,
                tuned: None,
                tune_counts: Arc::default(),
                open: HashMap::new(),
                next_handle: 0,
                current_delsys: None,
            }
        }

        pub fn with_caps(mut self, f: impl FnOnce(&mut TunerCapabilities)) -> Self {
            f(&mut self.caps);
            self
        }

        fn carrier_for(&self, f: u32) -> Option<usize> {
            self.carriers
                .iter()
                .position(|c| c.frequency.abs_diff(f) < 100_000)
        }
    }

    impl Tuner for ScriptedTuner {
        fn capabilities(&self) -> &TunerCapabilities {
            &self.caps
        }

        fn set_params(&mut self, params: &TuningParams, _scan_type: ScanType) -> anyhow::Result<()> {
            *self.tune_counts.lock().unwrap().entry(params.frequency).or_default() += 1;
            self.tuned = self.carrier_for(params.frequency);
            self.current_delsys = Some(params.delsys);
            self.open.clear();
            Ok(())
        }

        fn read_status(&mut self) -> FeStatus {
            match self.tuned {
                Some(i) if self.carriers[i].locks => {
                    FeStatus { signal: true, carrier: true, lock: true }
                }
                _ => FeStatus::default(),
            }
        }

        fn delivery_system(&mut self) -> Option<DeliverySystem> {
            self.current_delsys
        }

        fn open_filter(&mut self, key: FilterKey) -> anyhow::Result<FilterHandle> {
            let sections = self
                .tuned
                .and_then(|i| self.carriers[i].sections.get(&key))
                .cloned()
                .unwrap_or_default();
            let handle = self.next_handle;
            self.next_handle += 1;
            self.open.insert(handle, sections.into());
            Ok(handle)
        }

        fn read_section(&mut self, handle: FilterHandle) -> Option<Bytes> {
            self.open.get_mut(&handle)?.pop_front()
        }

        fn close_filter(&mut self, handle: FilterHandle) {
            self.open.remove(&handle);
        }
    }
}
