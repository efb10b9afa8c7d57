use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context;
use bytes::Bytes;
use clap::Parser;
use serde::Deserialize;

use channel_scanner::chars::Charset;
use channel_scanner::frontend::{
    DeliverySystem, FeStatus, Inversion, ScanType, TunerCapabilities,
};
use channel_scanner::plan::country_plan;
use channel_scanner::scanner::{ScanFlags, Tuner, run_scan, write_json_report, write_tuning_list};
use channel_scanner::tuner::{FilterHandle, FilterKey};
use channel_scanner::types::{AtscMode, OutputFormat, TuningParams};

#[derive(Parser)]
#[clap(about = "Discover broadcast services without initial tuning data")]
struct Opt {
    /// Scan technology: terrestrial | cable | atsc
    #[clap(short = 'f', long, default_value = "terrestrial")]
    scan_type: String,

    /// ISO 3166 country code selecting the channel plan
    #[clap(short, long, default_value = "DE")]
    country: String,

    /// ATSC sub-mode: vsb | qam | both
    #[clap(long, default_value = "vsb")]
    atsc_mode: String,

    /// Output character set for service names
    #[clap(short = 'C', long, default_value = "UTF-8")]
    charset: String,

    /// Emit the JSON report instead of the tuning list
    #[clap(long, default_value_t = false)]
    json: bool,

    /// Also harvest NIT-other (slow)
    #[clap(long, default_value_t = false)]
    other_nits: bool,

    /// Include encrypted services in the output
    #[clap(long, default_value_t = false)]
    encrypted: bool,

    /// Multiply the carrier/lock timeouts (1..3)
    #[clap(long, default_value_t = 1)]
    tuning_timeout: u32,

    /// Double all section filter timeouts (weak signal)
    #[clap(long, default_value_t = false)]
    long_timeout: bool,

    /// Recorded scan log to run against (this build's frontend binding;
    /// a hardware backend plugs in through the same trait)
    #[clap(long)]
    replay: std::path::PathBuf,

    /// -v info, -vv debug, -vvv trace
    #[clap(short, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> anyhow::Result<()> {
    let opt = Opt::parse();

    let level = match opt.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::from_default_env().filter_level(level).init();

    let scan_type = match opt.scan_type.to_ascii_lowercase().as_str() {
        "t" | "terrestrial" => ScanType::Terrestrial,
        "c" | "cable" => ScanType::Cable,
        "a" | "atsc" => ScanType::Atsc,
        "s" | "satellite" => ScanType::Satellite,
        other => anyhow::bail!("unknown scan type '{other}'"),
    };
    let channel_list = country_plan(&opt.country, scan_type)?;

    let flags = ScanFlags {
        scan_type,
        channel_list,
        atsc_mode: match opt.atsc_mode.as_str() {
            "qam" => AtscMode::Qam,
            "both" => AtscMode::Both,
            _ => AtscMode::Vsb,
        },
        charset: Charset::new(&opt.charset),
        include_encrypted: opt.encrypted,
        get_other_nits: opt.other_nits,
        tuning_timeout_mult: opt.tuning_timeout.clamp(1, 3),
        long_filter_timeout: opt.long_timeout,
        output: if opt.json { OutputFormat::Json } else { OutputFormat::TuningList },
        ..Default::default()
    };

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || cancel.store(true, Ordering::Relaxed))?;
    }

    let tuner = ReplayTuner::load(&opt.replay)
        .with_context(|| format!("loading replay log {}", opt.replay.display()))?;

    let catalog = run_scan(tuner, flags.clone(), cancel)?;

    match flags.output {
        OutputFormat::Json => print!("{}", write_json_report(&catalog, &flags)),
        OutputFormat::TuningList => print!("{}", write_tuning_list(&catalog, &flags)),
    }
    Ok(())
}

// ---- recorded-log replay backend ----
// A JSON dump of one earlier scan: which carriers locked and which
// sections each demux filter produced (hex strings, keyed "pid/table").

#[derive(Deserialize)]
struct ReplayCarrier {
    frequency: u32,
    locks: bool,
    #[serde(default)]
    sections: HashMap<String, Vec<String>>,
}

#[derive(Deserialize)]
struct ReplayLog {
    #[serde(default = "default_name")]
    frontend_name: String,
    #[serde(default)]
    can_second_gen: bool,
    carriers: Vec<ReplayCarrier>,
}

fn default_name() -> String {
    "replay".into()
}

struct ReplayTuner {
    caps: TunerCapabilities,
    carriers: Vec<(u32, bool, HashMap<FilterKey, Vec<Bytes>>)>,
    tuned: Option<usize>,
    delsys: Option<DeliverySystem>,
    open: HashMap<FilterHandle, Vec<Bytes>>,
    next_handle: FilterHandle,
}

impl ReplayTuner {
    fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let log: ReplayLog = serde_json::from_reader(std::fs::File::open(path)?)?;
        let mut carriers = Vec::new();
        for c in log.carriers {
            let mut sections = HashMap::new();
            for (key, hexes) in c.sections {
                let (pid, table_id) = key
                    .split_once('/')
                    .context("section key must be 'pid/table_id'")?;
                let key = FilterKey {
                    pid: parse_num(pid)?,
                    table_id: parse_num(table_id)? as u8,
                };
                let mut secs = Vec::new();
                for hex in hexes {
                    secs.push(Bytes::from(unhex(&hex)?));
                }
                sections.insert(key, secs);
            }
            carriers.push((c.frequency, c.locks, sections));
        }
        Ok(ReplayTuner {
            caps: TunerCapabilities {
                name: log.frontend_name,
                delivery_systems: vec![
                    DeliverySystem::DvbT,
                    DeliverySystem::DvbT2,
                    DeliverySystem::DvbC,
                    DeliverySystem::Atsc,
                    DeliverySystem::AtscCable,
                ],
                frequency_min: 0,
                frequency_max: u32::MAX,
                symbol_rate_min: 0,
                symbol_rate_max: u32::MAX,
                can_second_gen: log.can_second_gen,
                inversion: Inversion::Auto,
            },
            carriers,
            tuned: None,
            delsys: None,
            open: HashMap::new(),
            next_handle: 0,
        })
    }
}

fn parse_num(s: &str) -> anyhow::Result<u16> {
    let s = s.trim();
    Ok(match s.strip_prefix("0x") {
        Some(hex) => u16::from_str_radix(hex, 16)?,
        None => s.parse()?,
    })
}

fn unhex(s: &str) -> anyhow::Result<Vec<u8>> {
    let clean: String = s.chars().filter(|c| !c.is_whitespace()).collect();
    anyhow::ensure!(clean.len() % 2 == 0, "odd hex length");
    (0..clean.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&clean[i..i + 2], 16).map_err(Into::into))
        .collect()
}

impl Tuner for ReplayTuner {
    fn capabilities(&self) -> &TunerCapabilities {
        &self.caps
    }

    fn set_params(&mut self, params: &TuningParams, _scan_type: ScanType) -> anyhow::Result<()> {
        self.tuned = self
            .carriers
            .iter()
            .position(|(f, _, _)| f.abs_diff(params.frequency) < 100_000);
        self.delsys = Some(params.delsys);
        self.open.clear();
        Ok(())
    }

    fn read_status(&mut self) -> FeStatus {
        match self.tuned {
            Some(i) if self.carriers[i].1 => FeStatus { signal: true, carrier: true, lock: true },
            _ => FeStatus::default(),
        }
    }

    fn delivery_system(&mut self) -> Option<DeliverySystem> {
        self.delsys
    }

    fn open_filter(&mut self, key: FilterKey) -> anyhow::Result<FilterHandle> {
        let mut sections = self
            .tuned
            .and_then(|i| self.carriers[i].2.get(&key))
            .cloned()
            .unwrap_or_default();
        sections.reverse(); // pop from the back in arrival order
        let handle = self.next_handle;
        self.next_handle += 1;
        self.open.insert(handle, sections);
        Ok(handle)
    }

    fn read_section(&mut self, handle: FilterHandle) -> Option<Bytes> {
        self.open.get_mut(&handle)?.pop()
    }

    fn close_filter(&mut self, handle: FilterHandle) {
        self.open.remove(&handle);
    }
}
