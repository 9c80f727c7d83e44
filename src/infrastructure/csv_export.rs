//! CSV rendering of a deduped snapshot.
//!
//! Columns are `email` followed by every field name observed across the
//! entries, sorted. Entries lacking a field get an empty cell.

use csv::WriterBuilder;

use crate::domain::services::{observed_field_names, DedupedEntry};
use crate::infrastructure::sync_error::{SyncError, SyncResult};

pub fn render_csv(entries: &[DedupedEntry]) -> SyncResult<String> {
    let columns: Vec<String> = observed_field_names(entries).into_iter().collect();

    let mut writer = WriterBuilder::new().from_writer(Vec::new());
    writer.write_record(std::iter::once("email").chain(columns.iter().map(String::as_str)))?;

    for entry in entries {
        let row = std::iter::once(entry.email.as_str()).chain(
            columns
                .iter()
                .map(|column| entry.fields.get(column).map_or("", String::as_str)),
        );
        writer.write_record(row)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| SyncError::Io(std::io::Error::new(e.error().kind(), e.to_string())))?;
    String::from_utf8(bytes).map_err(|e| SyncError::Decode(format!("CSV output is not UTF-8: {e}")))
}
