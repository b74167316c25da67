//! Append-only attendance ledger, one record per identity per day.
//!
//! Persisted as CSV with the fixed header `NAME,DATE,TIME`. Header names
//! are matched case-insensitively on read and written in upper case; any
//! other header layout is rejected. Names are re-normalized on read so
//! hand-edited rows compare equal to the labels the pipeline produces.

use crate::persist::write_atomic;
use crate::types::IdentityLabel;
use chrono::{NaiveDate, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

const COLUMNS: [&str; 3] = ["NAME", "DATE", "TIME"];

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("unrecognized ledger columns {found:?}, expected NAME,DATE,TIME")]
    UnrecognizedColumns { found: Vec<String> },
    #[error("csv: {0}")]
    Csv(#[from] csv::Error),
    #[error("io: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    #[serde(rename = "NAME")]
    pub name: IdentityLabel,
    #[serde(rename = "DATE")]
    pub date: NaiveDate,
    #[serde(rename = "TIME")]
    pub time: NaiveTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkOutcome {
    /// A new record was appended and persisted.
    Marked,
    /// The identity already has a record for that day; nothing changed.
    AlreadyPresent,
}

#[derive(Debug)]
pub struct AttendanceLedger {
    path: PathBuf,
    records: Vec<AttendanceRecord>,
}

impl AttendanceLedger {
    /// Read the ledger at `path`; a missing or zero-length file is an empty ledger.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();
        let empty = match std::fs::metadata(&path) {
            Ok(meta) => meta.len() == 0,
            Err(e) if e.kind() == io::ErrorKind::NotFound => true,
            Err(e) => return Err(e.into()),
        };
        if empty {
            tracing::debug!(path = %path.display(), "no ledger yet; starting empty");
            return Ok(Self { path, records: Vec::new() });
        }

        // Only headers are trimmed: a label may end in a space.
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::Headers)
            .from_path(&path)?;

        let found: Vec<String> = reader.headers()?.iter().map(|h| h.to_uppercase()).collect();
        if found != COLUMNS {
            return Err(LedgerError::UnrecognizedColumns { found });
        }
        let canonical = csv::StringRecord::from(COLUMNS.to_vec());

        let mut records = Vec::new();
        for row in reader.records() {
            let mut record: AttendanceRecord = row?.deserialize(Some(&canonical))?;
            record.name = IdentityLabel::normalize(record.name.as_str());
            records.push(record);
        }

        tracing::debug!(path = %path.display(), records = records.len(), "loaded ledger");
        Ok(Self { path, records })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> &[AttendanceRecord] {
        &self.records
    }

    pub fn records_on(&self, day: NaiveDate) -> impl Iterator<Item = &AttendanceRecord> {
        self.records.iter().filter(move |r| r.date == day)
    }

    pub fn contains(&self, identity: &IdentityLabel, day: NaiveDate) -> bool {
        self.records.iter().any(|r| &r.name == identity && r.date == day)
    }

    /// Record `identity` present on `day` at `time` unless already recorded.
    ///
    /// The first mark of the day wins; later marks never change its time.
    /// Times are stored to whole seconds.
    pub fn mark(
        &mut self,
        identity: &IdentityLabel,
        day: NaiveDate,
        time: NaiveTime,
    ) -> Result<MarkOutcome, LedgerError> {
        if self.contains(identity, day) {
            tracing::info!(%identity, %day, "already marked present today");
            return Ok(MarkOutcome::AlreadyPresent);
        }

        let time = time.with_nanosecond(0).unwrap_or(time);
        self.records.push(AttendanceRecord {
            name: identity.clone(),
            date: day,
            time,
        });
        if let Err(e) = self.save() {
            self.records.pop();
            return Err(e);
        }

        tracing::info!(%identity, %day, %time, "marked present");
        Ok(MarkOutcome::Marked)
    }

    fn save(&self) -> Result<(), LedgerError> {
        write_atomic(&self.path, |w| {
            let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(w);
            writer.write_record(COLUMNS)?;
            for record in &self.records {
                writer.serialize(record)?;
            }
            writer.flush()
        })?;
        Ok(())
    }
}
