//! Output writers over the finished catalog: a plain tuning-list text
//! format and a machine-readable JSON report. Both apply the operator's
//! service filters; neither knows anything about how the data was found.

use std::fmt::Write as _;

use serde::Serialize;

use crate::catalog::TransponderCatalog;
use crate::frontend::ScanType;
use crate::types::{ScanFlags, Service, Transponder};

fn service_selected(svc: &Service, flags: &ScanFlags) -> bool {
    if svc.scrambled && !flags.include_encrypted {
        return false;
    }
    let f = flags.service_filter;
    (f.tv && svc.is_tv())
        || (f.radio && svc.is_radio())
        || (f.other && !svc.is_tv() && !svc.is_radio())
}

/// One transponder line in initial-tuning-data style, e.g.
/// `T 474000000 8MHz AUTO AUTO AUTO AUTO AUTO AUTO`.
fn tuning_line(t: &Transponder) -> String {
    let p = &t.params;
    match t.scan_type {
        ScanType::Terrestrial => format!(
            "T {} {}MHz {:?} {:?} {:?} {:?} {:?}",
            p.frequency,
            p.bandwidth / 1_000_000,
            p.coderate,
            p.modulation,
            p.transmission,
            p.guard,
            p.hierarchy,
        ),
        ScanType::Cable => {
            format!("C {} {} {:?} {:?}", p.frequency, p.symbolrate, p.coderate, p.modulation)
        }
        ScanType::Satellite => format!(
            "S {} {} {} {:?} {:?} {:?}",
            p.frequency,
            p.polarization.name(),
            p.symbolrate,
            p.coderate,
            p.rolloff,
            p.modulation,
        ),
        ScanType::Atsc => format!("A {} {:?}", p.frequency, p.modulation),
    }
}

/// Writes the human-consumable tuning list: one transponder header line,
/// then its selected services.
pub fn write_tuning_list(catalog: &TransponderCatalog, flags: &ScanFlags) -> String {
    let mut out = String::new();
    for t in catalog.scanned() {
        if t.last_tuning_failed || t.services.is_empty() {
            continue;
        }
        let _ = writeln!(out, "{}", tuning_line(t));
        for svc in &t.services {
            if !service_selected(svc, flags) {
                continue;
            }
            let _ = writeln!(
                out,
                "\t{};{};{};{}",
                svc.service_name.as_deref().unwrap_or("(null)"),
                svc.provider_name.as_deref().unwrap_or(""),
                svc.service_id,
                svc.logical_channel,
            );
        }
    }
    out
}

#[derive(Serialize)]
struct ServiceJson<'a> {
    service_id: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    provider: Option<&'a str>,
    pmt_pid: u16,
    video_pid: u16,
    audio_pids: Vec<u16>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    ca_ids: Vec<u16>,
    scrambled: bool,
    #[serde(skip_serializing_if = "is_zero")]
    logical_channel: u32,
}

fn is_zero(v: &u32) -> bool {
    *v == 0
}

#[derive(Serialize)]
struct TransponderJson<'a> {
    #[serde(flatten)]
    params: &'a crate::types::TuningParams,
    original_network_id: u16,
    network_id: u16,
    transport_stream_id: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    network_name: Option<&'a str>,
    services: Vec<ServiceJson<'a>>,
}

#[derive(Serialize)]
struct ReportJson<'a> {
    scan_time: String,
    transponders: Vec<TransponderJson<'a>>,
}

/// Machine-readable report for everything that carried services.
pub fn write_json_report(catalog: &TransponderCatalog, flags: &ScanFlags) -> String {
    let transponders = catalog
        .scanned()
        .iter()
        .filter(|t| !t.services.is_empty())
        .map(|t| TransponderJson {
            params: &t.params,
            original_network_id: t.original_network_id,
            network_id: t.network_id,
            transport_stream_id: t.transport_stream_id,
            network_name: t.network_name.as_deref(),
            services: t
                .services
                .iter()
                .filter(|svc| service_selected(svc, flags))
                .map(|svc| ServiceJson {
                    service_id: svc.service_id,
                    name: svc.service_name.as_deref(),
                    provider: svc.provider_name.as_deref(),
                    pmt_pid: svc.pmt_pid,
                    video_pid: svc.video_pid,
                    audio_pids: svc.audio.iter().map(|a| a.pid).collect(),
                    ca_ids: svc.ca_ids.clone(),
                    scrambled: svc.scrambled,
                    logical_channel: svc.logical_channel,
                })
                .collect(),
        })
        .collect();

    let rep = ReportJson { scan_time: chrono::Utc::now().to_rfc3339(), transponders };
    serde_json::to_string_pretty(&rep)
        .unwrap_or_else(|_| "{\"error\": \"JSON serialization failed\"}".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::Polarization;

    fn catalog_with_services() -> TransponderCatalog {
        let mut cat = TransponderCatalog::default();
        let mut t = Transponder::new(474_000_000, ScanType::Terrestrial, Polarization::Horizontal);
        t.params.bandwidth = 8_000_000;
        {
            let svc = t.service_mut(1);
            svc.service_name = Some("Free TV".into());
            svc.video_pid = 0x100;
        }
        {
            let svc = t.service_mut(2);
            svc.service_name = Some("Pay TV".into());
            svc.video_pid = 0x200;
            svc.scrambled = true;
        }
        cat.promote(t);
        cat
    }

    #[test]
    fn encrypted_services_respect_the_flag() {
        let cat = catalog_with_services();
        let mut flags = ScanFlags::default();
        let out = write_tuning_list(&cat, &flags);
        assert!(out.contains("Free TV"));
        assert!(!out.contains("Pay TV"));

        flags.include_encrypted = true;
        let out = write_tuning_list(&cat, &flags);
        assert!(out.contains("Pay TV"));
    }

    #[test]
    fn json_report_carries_ids() {
        let cat = catalog_with_services();
        let mut flags = ScanFlags::default();
        flags.include_encrypted = true;
        let json = write_json_report(&cat, &flags);
        let v: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v["transponders"][0]["frequency"], 474_000_000);
        assert_eq!(v["transponders"][0]["services"][0]["service_id"], 1);
    }

    #[test]
    fn failed_transponders_stay_out_of_the_list() {
        let mut cat = TransponderCatalog::default();
        let mut t = Transponder::new(490_000_000, ScanType::Terrestrial, Polarization::Horizontal);
        t.last_tuning_failed = true;
        t.service_mut(1).service_name = Some("ghost".into());
        cat.promote(t);
        let out = write_tuning_list(&cat, &ScanFlags::default());
        assert!(out.is_empty());
    }
}
