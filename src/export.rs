//! Download artifacts for a reviewed record: a one-row workbook and the two
//! processed photos, all named after the card holder.

use rust_xlsxwriter::{Format, Workbook, XlsxError};
use serde::Deserialize;
use tracing::debug;

use crate::error::StoreError;
use crate::schema::{ExtractedIdentity, COLUMNS};
use crate::session::{ExportInput, Side};

/// Worksheet name used for every workbook this service writes.
pub const SHEET_NAME: &str = "Datos";

const XLSX_MIME: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
const JPEG_MIME: &str = "image/jpeg";

/// One of the three downloadable files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Artifact {
    Workbook,
    Front,
    Back,
}

/// A file ready to be sent to the browser.
#[derive(Debug, Clone)]
pub struct ExportFile {
    pub file_name: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

/// Build one artifact for a reviewed session.
pub fn build_artifact(
    input: &ExportInput<'_>,
    artifact: Artifact,
) -> Result<ExportFile, StoreError> {
    let name = input.record.safe_name();
    let file = match artifact {
        Artifact::Workbook => ExportFile {
            file_name: format!("Datos_{}.xlsx", name),
            content_type: XLSX_MIME,
            bytes: record_workbook(input.record)?,
        },
        Artifact::Front => image_file(Side::Front, &name, &input.front.jpeg),
        Artifact::Back => image_file(Side::Back, &name, &input.back.jpeg),
    };
    debug!("Built export {} ({} bytes)", file.file_name, file.bytes.len());
    Ok(file)
}

fn image_file(side: Side, name: &str, jpeg: &[u8]) -> ExportFile {
    ExportFile {
        file_name: format!("{}_{}.jpg", side.label(), name),
        content_type: JPEG_MIME,
        bytes: jpeg.to_vec(),
    }
}

/// A single-sheet workbook holding the header row and this record.
pub fn record_workbook(record: &ExtractedIdentity) -> Result<Vec<u8>, StoreError> {
    let headers: Vec<String> = COLUMNS.iter().map(|c| c.to_string()).collect();
    let rows = vec![record.row().to_vec()];
    let mut workbook = build_workbook(&headers, &rows)?;
    Ok(workbook.save_to_buffer()?)
}

/// Lay out a header row plus data rows on the `Datos` sheet.
pub fn build_workbook(headers: &[String], rows: &[Vec<String>]) -> Result<Workbook, XlsxError> {
    let mut workbook = Workbook::new();
    let bold = Format::new().set_bold();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(SHEET_NAME)?;

    for (col, header) in headers.iter().enumerate() {
        let col = col as u16;
        worksheet.write_string_with_format(0, col, header, &bold)?;
        worksheet.set_column_width(col, 20)?;
    }
    for (i, row) in rows.iter().enumerate() {
        let row_num = i as u32 + 1;
        for (col, value) in row.iter().enumerate() {
            if !value.is_empty() {
                worksheet.write_string(row_num, col as u16, value)?;
            }
        }
    }
    Ok(workbook)
}
