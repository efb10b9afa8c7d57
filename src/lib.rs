// src/lib.rs
pub mod scanner {
    //! Library facade: configure a [`ScanFlags`], bring any [`Tuner`]
    //! binding, get back the discovered catalog.

    pub use crate::catalog::TransponderCatalog;
    pub use crate::frontend::{ScanType, TunerCapabilities};
    pub use crate::output::{write_json_report, write_tuning_list};
    pub use crate::scan::run_scan;
    pub use crate::tuner::{FilterKey, Tuner};
    pub use crate::types::{OutputFormat, ScanFlags, Service, Transponder};
}

pub mod bits;
pub mod catalog;
pub mod chars;
pub mod constants;
pub mod crc32;
pub mod descriptors;
pub mod frontend;
pub mod output;
pub mod plan;
pub mod psi;
pub mod scan;
pub mod section_buf;
pub mod tuner;
pub mod types;
