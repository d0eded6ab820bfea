// 📤 CSV Export - human-readable dump of the payment ledger
//
// Columns for both exports: member_id,display_name,period,paid

use anyhow::{Context, Result};
use serde::Serialize;
use std::io::Write;
use std::path::Path;

use crate::ledger::Ledger;
use crate::period::PeriodId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportRow {
    pub member_id: String,
    pub display_name: String,
    pub period: PeriodId,
    pub paid: bool,
}

/// One row per billing identity for `period`
pub fn status_rows(ledger: &Ledger, period: PeriodId) -> Vec<ExportRow> {
    ledger
        .status_for(period)
        .into_iter()
        .map(|s| ExportRow {
            member_id: s.member_id,
            display_name: s.display_name,
            period,
            paid: s.paid,
        })
        .collect()
}

/// Every recorded entry, sorted by member id then period
pub fn ledger_rows(ledger: &Ledger) -> Vec<ExportRow> {
    let mut rows: Vec<ExportRow> = ledger
        .members()
        .flat_map(|m| {
            m.history().into_iter().map(move |(period, paid)| ExportRow {
                member_id: m.id.clone(),
                display_name: m.display_name.clone(),
                period,
                paid,
            })
        })
        .collect();
    rows.sort_by(|a, b| (&a.member_id, a.period).cmp(&(&b.member_id, b.period)));
    rows
}

pub fn write_rows<W: Write>(writer: W, rows: &[ExportRow]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    for row in rows {
        wtr.serialize(row).context("Failed to serialize export row")?;
    }
    wtr.flush().context("Failed to flush CSV writer")?;
    Ok(())
}

pub fn export_to_path(path: &Path, rows: &[ExportRow]) -> Result<usize> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create export file {}", path.display()))?;
    write_rows(file, rows)?;
    Ok(rows.len())
}

pub fn to_csv_string(rows: &[ExportRow]) -> Result<String> {
    let mut buf = Vec::new();
    write_rows(&mut buf, rows)?;
    String::from_utf8(buf).context("CSV output was not UTF-8")
}
