//! Attendance join.
//!
//! Reads an attendance CSV (one row per attendee per meeting), normalizes
//! each row's date to a calendar date, groups rows by date, and left-joins
//! the groups onto the document records:
//!
//! - every document record yields exactly one output row;
//! - a record with no attendance gets an empty `attendees` list;
//! - attendance for dates with no record is dropped;
//! - rows whose date cannot be parsed are excluded, logged, and counted.
//!
//! The merged CSV carries the summaries columns plus `attendees`, a JSON
//! array with one object per attendee.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

use crate::config::AttendanceConfig;
use crate::models::{AttendanceGroup, AttendanceRecord, AttendeeFields, DocumentRecord, MergedRecord};
use crate::store::{record_fields, scan_records, COLUMNS};

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y_%m_%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%m/%d/%y",
    "%m-%d-%Y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%B %d %Y",
    "%b %d %Y",
    "%d %B %Y",
    "%d %b %Y",
];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

/// Normalize a date cell to a calendar date. Time and offset are dropped.
///
/// Four-digit-year formats reject years before 1000 so that `1/15/73`
/// falls through to the two-digit-year form.
pub fn normalize_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let plausible = |date: NaiveDate| {
        use chrono::Datelike;
        date.year() >= 1000
    };

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.date_naive());
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            if plausible(dt.date()) {
                return Some(dt.date());
            }
        }
    }
    DATE_FORMATS
        .iter()
        .filter_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
        .find(|date| plausible(*date))
}

/// Read attendance rows, keeping the configured attendee columns (or every
/// column other than the date column when none are configured).
pub fn read_attendance(path: &Path, config: &AttendanceConfig) -> Result<Vec<AttendanceRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("Failed to open attendance CSV: {}", path.display()))?;

    let headers = reader.headers()?.clone();
    let Some(date_idx) = headers.iter().position(|h| h == config.date_column) else {
        bail!(
            "Attendance CSV {} has no '{}' column",
            path.display(),
            config.date_column
        );
    };

    let field_columns: Vec<(usize, String)> = if config.fields.is_empty() {
        headers
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != date_idx)
            .map(|(i, h)| (i, h.to_string()))
            .collect()
    } else {
        config
            .fields
            .iter()
            .map(|field| {
                headers
                    .iter()
                    .position(|h| h == field)
                    .map(|i| (i, field.clone()))
                    .ok_or_else(|| {
                        anyhow::anyhow!("Attendance CSV {} has no '{}' column", path.display(), field)
                    })
            })
            .collect::<Result<_>>()?
    };

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result?;
        let fields: AttendeeFields = field_columns
            .iter()
            .map(|(i, name)| (name.clone(), record.get(*i).unwrap_or_default().to_string()))
            .collect();
        rows.push(AttendanceRecord {
            date_raw: record.get(date_idx).unwrap_or_default().to_string(),
            fields,
        });
    }
    Ok(rows)
}

/// Attendance grouped by normalized date, plus the rows that could not be dated.
#[derive(Debug, Default)]
pub struct Grouped {
    pub groups: Vec<AttendanceGroup>,
    pub excluded: Vec<AttendanceRecord>,
}

pub fn group_by_date(rows: Vec<AttendanceRecord>) -> Grouped {
    let mut by_date: BTreeMap<NaiveDate, Vec<AttendeeFields>> = BTreeMap::new();
    let mut excluded = Vec::new();

    for row in rows {
        match normalize_date(&row.date_raw) {
            Some(date) => by_date.entry(date).or_default().push(row.fields),
            None => {
                warn!(date = %row.date_raw, "unparseable attendance date; row excluded from join");
                excluded.push(row);
            }
        }
    }

    Grouped {
        groups: by_date
            .into_iter()
            .map(|(date, attendees)| AttendanceGroup { date, attendees })
            .collect(),
        excluded,
    }
}

/// Left-outer join of records with attendance groups. Output order follows
/// `records`; groups sharing a date are concatenated.
pub fn join(records: &[DocumentRecord], groups: &[AttendanceGroup]) -> Vec<MergedRecord> {
    let mut by_date: BTreeMap<NaiveDate, Vec<AttendeeFields>> = BTreeMap::new();
    for group in groups {
        by_date
            .entry(group.date)
            .or_default()
            .extend(group.attendees.iter().cloned());
    }

    records
        .iter()
        .map(|record| MergedRecord {
            record: record.clone(),
            attendees: by_date.get(&record.date).cloned().unwrap_or_default(),
        })
        .collect()
}

/// Write merged rows: the summaries columns plus a JSON `attendees` column.
pub fn write_merged(path: &Path, rows: &[MergedRecord]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create merged CSV: {}", path.display()))?;

    writer.write_record(COLUMNS.iter().copied().chain(std::iter::once("attendees")))?;
    for row in rows {
        let mut fields = record_fields(&row.record);
        fields.push(serde_json::to_string(&row.attendees)?);
        writer.write_record(&fields)?;
    }
    writer.flush()?;
    Ok(())
}

/// Counts from one join run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JoinReport {
    pub records: usize,
    pub with_attendance: usize,
    pub attendance_rows: usize,
    /// Attendance rows whose date could not be parsed.
    pub excluded_rows: usize,
    /// Summaries rows that could not be read, and so were not joined.
    pub excluded_summaries: usize,
}

impl JoinReport {
    pub fn has_exclusions(&self) -> bool {
        self.excluded_rows > 0 || self.excluded_summaries > 0
    }
}

/// Read the summaries and attendance tables, join them, and write the merged CSV.
pub fn run_join(
    summaries_csv: &Path,
    attendance_csv: &Path,
    merged_csv: &Path,
    config: &AttendanceConfig,
) -> Result<JoinReport> {
    if !summaries_csv.exists() {
        bail!("Summaries CSV does not exist: {}", summaries_csv.display());
    }
    let stored = scan_records(summaries_csv)?;
    let records = stored.records;
    let rows = read_attendance(attendance_csv, config)?;
    let attendance_rows = rows.len();

    let grouped = group_by_date(rows);
    let merged = join(&records, &grouped.groups);
    write_merged(merged_csv, &merged)?;

    let report = JoinReport {
        records: merged.len(),
        with_attendance: merged.iter().filter(|m| !m.attendees.is_empty()).count(),
        attendance_rows,
        excluded_rows: grouped.excluded.len(),
        excluded_summaries: stored.malformed,
    };
    info!(
        records = report.records,
        with_attendance = report.with_attendance,
        excluded = report.excluded_rows,
        excluded_summaries = report.excluded_summaries,
        output = %merged_csv.display(),
        "join complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FinalSummary, RecordStatus};
    use tempfile::TempDir;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn record(date: NaiveDate) -> DocumentRecord {
        DocumentRecord {
            date,
            source_filename: format!("{}.pdf", date),
            status: RecordStatus::Ok,
            flags: Vec::new(),
            chunk_count: 1,
            failed_chunks: Vec::new(),
            source_sha256: String::new(),
            summary: FinalSummary {
                synopsis: "Met.".into(),
                detail: "Met.".into(),
                key_notes: vec!["Met".into()],
            },
        }
    }

    fn attendee(date: &str, name: &str) -> AttendanceRecord {
        AttendanceRecord {
            date_raw: date.to_string(),
            fields: [("Name".to_string(), name.to_string())].into_iter().collect(),
        }
    }

    #[test]
    fn test_normalize_date_formats() {
        let expected = Some(d(1973, 1, 15));
        for raw in [
            "1973-01-15",
            "1973_01_15",
            "1/15/1973",
            "01/15/1973",
            "1/15/73",
            "January 15, 1973",
            "Jan 15, 1973",
            "15 January 1973",
            "1973-01-15T19:30:00",
            "1973-01-15 19:30",
            "1973-01-15T19:30:00-05:00",
            "  1973-01-15  ",
        ] {
            assert_eq!(normalize_date(raw), expected, "failed on {:?}", raw);
        }
        assert_eq!(normalize_date("sometime in 1973"), None);
        assert_eq!(normalize_date(""), None);
        assert_eq!(normalize_date("1973-02-30"), None);
    }

    #[test]
    fn test_group_by_date_excludes_unparseable() {
        let grouped = group_by_date(vec![
            attendee("1973-01-15", "Hall"),
            attendee("January 15, 1973", "Moore"),
            attendee("unknown", "Price"),
        ]);
        assert_eq!(grouped.groups.len(), 1);
        assert_eq!(grouped.groups[0].attendees.len(), 2);
        assert_eq!(grouped.excluded.len(), 1);
        assert_eq!(grouped.excluded[0].fields["Name"], "Price");
    }

    #[test]
    fn test_join_is_left_outer_and_complete() {
        let records = vec![record(d(1973, 1, 15)), record(d(1973, 2, 12)), record(d(1973, 3, 5))];
        let grouped = group_by_date(vec![
            attendee("1973-01-15", "Hall"),
            attendee("1973-01-15", "Moore"),
            attendee("1973-03-05", "Price"),
            attendee("1974-06-01", "Orphan"),
        ]);
        let merged = join(&records, &grouped.groups);

        assert_eq!(merged.len(), 3);
        assert_eq!(merged[0].attendees.len(), 2);
        assert_eq!(merged[1].record.date, d(1973, 2, 12));
        assert!(merged[1].attendees.is_empty());
        assert_eq!(merged[2].attendees[0]["Name"], "Price");
    }

    #[test]
    fn test_groups_with_same_date_concatenated() {
        let groups = vec![
            AttendanceGroup {
                date: d(1973, 1, 15),
                attendees: vec![attendee("", "Hall").fields],
            },
            AttendanceGroup {
                date: d(1973, 1, 15),
                attendees: vec![attendee("", "Moore").fields],
            },
        ];
        let merged = join(&[record(d(1973, 1, 15))], &groups);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].attendees.len(), 2);
    }

    #[test]
    fn test_read_attendance_field_selection() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("attendance.csv");
        std::fs::write(
            &path,
            "Date,Name,Role,Notes\n1973-01-15,Hall,Chair,late\n1/15/1973,Moore,Member,\n",
        )
        .unwrap();

        let all = read_attendance(&path, &AttendanceConfig::default()).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].fields.len(), 3);
        assert_eq!(all[1].date_raw, "1/15/1973");

        let config = AttendanceConfig {
            fields: vec!["Name".into(), "Role".into()],
            ..Default::default()
        };
        let picked = read_attendance(&path, &config).unwrap();
        assert_eq!(picked[0].fields.keys().collect::<Vec<_>>(), vec!["Name", "Role"]);

        let missing = AttendanceConfig {
            date_column: "Meeting Date".into(),
            fields: Vec::new(),
        };
        assert!(read_attendance(&path, &missing).is_err());
    }

    #[test]
    fn test_write_merged_empty_attendees_serialized() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("merged.csv");
        let merged = join(&[record(d(1973, 2, 12))], &[]);
        write_merged(&path, &merged).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(headers.get(headers.len() - 1), Some("attendees"));
        let row = reader.records().next().unwrap().unwrap();
        assert_eq!(row.get(0), Some("1973-02-12"));
        assert_eq!(row.get(row.len() - 1), Some("[]"));
    }

    #[test]
    fn test_run_join_counts_unreadable_summaries_rows() {
        let tmp = TempDir::new().unwrap();
        let summaries = tmp.path().join("summaries.csv");
        let attendance = tmp.path().join("attendance.csv");
        let merged = tmp.path().join("merged.csv");
        std::fs::write(
            &summaries,
            format!(
                "{}\n1973-01-15,a.pdf,ok,,1,,s,d,n,x\n15th of January,b.pdf,ok,,1,,s,d,n,x\n",
                COLUMNS.join(",")
            ),
        )
        .unwrap();
        std::fs::write(&attendance, "Date,Name\n1/15/1973,Hall\n").unwrap();

        let report =
            run_join(&summaries, &attendance, &merged, &AttendanceConfig::default()).unwrap();
        assert_eq!(report.records, 1);
        assert_eq!(report.with_attendance, 1);
        assert_eq!(report.excluded_rows, 0);
        assert_eq!(report.excluded_summaries, 1);
        assert!(report.has_exclusions());
    }
}
