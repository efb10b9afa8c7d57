pub mod nit;
pub mod pat;
pub mod pmt;
pub mod sdt;
pub mod section;
pub mod vct;

pub use nit::{NitSection, parse_nit};
pub use pat::{PatSection, parse_pat};
pub use pmt::{PmtSection, parse_pmt};
pub use sdt::{SdtSection, parse_sdt};
pub use section::Section;
pub use vct::{VctSection, parse_vct};
