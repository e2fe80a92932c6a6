use crate::error::{AppError, AppResult};
use crate::features::report::aggregator::{COLUMNS, Report};
use std::io::Write;
use std::path::Path;

/// Writes the header line and one record per row, in report order.
/// An empty report still produces the header.
pub fn write_csv<W: Write>(report: &Report, writer: W) -> Result<(), csv::Error> {
    let mut csv_writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(writer);
    csv_writer.write_record(COLUMNS)?;
    for row in &report.rows {
        csv_writer.serialize(row)?;
    }
    csv_writer.flush()?;
    Ok(())
}

pub fn to_csv_string(report: &Report) -> AppResult<String> {
    let mut buffer = Vec::new();
    write_csv(report, &mut buffer)
        .map_err(|err| AppError::generic(format!("Failed to render CSV: {err}")))?;
    String::from_utf8(buffer)
        .map_err(|err| AppError::generic(format!("Rendered CSV is not UTF-8: {err}")))
}

pub fn write_csv_file(report: &Report, path: &Path) -> AppResult<()> {
    let file = std::fs::File::create(path).map_err(|err| {
        AppError::generic(format!("Failed to create {}: {err}", path.display()))
    })?;
    write_csv(report, file)
        .map_err(|err| AppError::generic(format!("Failed to write {}: {err}", path.display())))
}
