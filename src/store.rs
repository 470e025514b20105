//! Durable store for the desktop workflow.
//!
//! Every saved record is appended to one cumulative workbook, and the two
//! photos go into a folder named after the card holder. The workbook is read
//! back and rewritten in full on each save, after the photos are on disk. If
//! it cannot be read or written (typically because it is open in a
//! spreadsheet program) the save fails and the session keeps its record for a
//! retry.

use std::path::{Path, PathBuf};

use calamine::{open_workbook, Data, Reader, Xlsx};
use tracing::{info, warn};

use crate::error::StoreError;
use crate::export::build_workbook;
use crate::schema::COLUMNS;
use crate::session::ExportInput;

/// Rows already stored in a workbook.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoredSheet {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct DiskStore {
    workbook_path: PathBuf,
    output_dir: PathBuf,
}

impl DiskStore {
    pub fn new(workbook_path: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            workbook_path: workbook_path.into(),
            output_dir: output_dir.into(),
        }
    }

    pub fn workbook_path(&self) -> &Path {
        &self.workbook_path
    }

    /// Write both photos, then append the record to the workbook.
    /// Returns the folder the photos were written to.
    ///
    /// The row is appended last: a failed save leaves the workbook untouched,
    /// so retrying never duplicates the record.
    pub fn save(&self, input: &ExportInput<'_>) -> Result<PathBuf, StoreError> {
        let mut sheet = if self.workbook_path.exists() {
            read_sheet(&self.workbook_path)?
        } else {
            StoredSheet::default()
        };

        let name = input.record.safe_name();
        let folder = self.output_dir.join(&name);
        std::fs::create_dir_all(&folder).map_err(|source| StoreError::Io {
            path: folder.clone(),
            source,
        })?;

        write_file(&folder.join(format!("anverso_{}.jpg", name)), &input.front.jpeg)?;
        write_file(&folder.join(format!("reverso_{}.jpg", name)), &input.back.jpeg)?;
        info!("Saved photos to {:?}", folder);

        let headers: Vec<&str> = COLUMNS.to_vec();
        let values = input.record.row();
        append_aligned(&mut sheet, &headers, &values);

        let mut workbook = build_workbook(&sheet.headers, &sheet.rows)?;
        workbook
            .save(&self.workbook_path)
            .map_err(|e| StoreError::WorkbookLocked {
                path: self.workbook_path.clone(),
                reason: e.to_string(),
            })?;
        info!(
            "Appended record to {:?} ({} rows)",
            self.workbook_path,
            sheet.rows.len()
        );

        Ok(folder)
    }
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    std::fs::write(path, bytes).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Read the first worksheet of an existing workbook. First row = headers.
pub fn read_sheet(path: &Path) -> Result<StoredSheet, StoreError> {
    let locked = |reason: String| StoreError::WorkbookLocked {
        path: path.to_path_buf(),
        reason,
    };

    let mut workbook: Xlsx<_> =
        open_workbook(path).map_err(|e: calamine::XlsxError| locked(e.to_string()))?;
    let range = match workbook.worksheet_range_at(0) {
        Some(range) => range.map_err(|e| locked(e.to_string()))?,
        None => {
            warn!("Workbook {:?} has no sheets, starting fresh", path);
            return Ok(StoredSheet::default());
        }
    };

    let mut rows = range
        .rows()
        .map(|row| row.iter().map(cell_to_string).collect::<Vec<_>>());
    let headers = match rows.next() {
        Some(headers) => headers,
        None => return Ok(StoredSheet::default()),
    };
    let rows = rows
        .filter(|values| values.iter().any(|v| !v.is_empty()))
        .collect();

    Ok(StoredSheet { headers, rows })
}

/// Append `values` (labelled by `headers`) to `sheet`, matching columns by
/// name. Columns the sheet does not have yet are added at the end.
pub fn append_aligned(sheet: &mut StoredSheet, headers: &[&str], values: &[String]) {
    for header in headers {
        if !sheet.headers.iter().any(|h| h == header) {
            sheet.headers.push(header.to_string());
        }
    }

    let width = sheet.headers.len();
    for row in sheet.rows.iter_mut() {
        row.resize(width, String::new());
    }

    let mut row = vec![String::new(); width];
    for (header, value) in headers.iter().zip(values) {
        if let Some(idx) = sheet.headers.iter().position(|h| h == header) {
            row[idx] = value.clone();
        }
    }
    sheet.rows.push(row);
}

/// Convert a calamine cell to a string representation.
fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => {
            // Whole numbers come back as floats; keep them digit-only (ID numbers)
            if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
                format!("{}", *f as i64)
            } else {
                format!("{}", f)
            }
        }
        Data::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_prep::ProcessedImage;
    use crate::schema::{ContactInfo, ExtractedIdentity, IdentityFields};

    fn record(surname: &str, id_number: &str) -> ExtractedIdentity {
        ExtractedIdentity::new(
            IdentityFields {
                id_number: id_number.to_string(),
                surname: surname.to_string(),
                given_names: "LUIS".to_string(),
                ..Default::default()
            },
            ContactInfo {
                email: "luis@example.ec".to_string(),
                ..Default::default()
            },
        )
    }

    fn photo() -> ProcessedImage {
        ProcessedImage {
            width: 1,
            height: 1,
            jpeg: vec![0xFF, 0xD8, 0xFF],
        }
    }

    #[test]
    fn test_save_appends_rows_and_writes_photos() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::new(dir.path().join("firmas.xlsx"), dir.path());
        let (front, back) = (photo(), photo());

        let first = record("MORA", "1712345678");
        let folder = store
            .save(&ExportInput {
                record: &first,
                front: &front,
                back: &back,
            })
            .unwrap();
        assert_eq!(folder, dir.path().join("MORA_LUIS"));
        assert!(folder.join("anverso_MORA_LUIS.jpg").exists());
        assert_eq!(
            std::fs::read(folder.join("reverso_MORA_LUIS.jpg")).unwrap(),
            vec![0xFF, 0xD8, 0xFF]
        );

        let second = record("VERA", "0912345678");
        store
            .save(&ExportInput {
                record: &second,
                front: &front,
                back: &back,
            })
            .unwrap();

        let sheet = read_sheet(store.workbook_path()).unwrap();
        assert_eq!(sheet.headers, COLUMNS.to_vec());
        assert_eq!(sheet.rows.len(), 2);
        assert_eq!(sheet.rows[0][0], "1712345678");
        assert_eq!(sheet.rows[1][2], "VERA");
    }

    #[test]
    fn test_unreadable_workbook_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("firmas.xlsx");
        std::fs::write(&path, b"not a workbook").unwrap();
        let store = DiskStore::new(&path, dir.path());
        let (front, back) = (photo(), photo());
        let rec = record("MORA", "1712345678");

        let err = store
            .save(&ExportInput {
                record: &rec,
                front: &front,
                back: &back,
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::WorkbookLocked { .. }));
        // Nothing else was written
        assert!(!dir.path().join("MORA_LUIS").exists());
        assert_eq!(std::fs::read(&path).unwrap(), b"not a workbook");
    }

    #[test]
    fn test_failed_photo_write_does_not_append() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::new(dir.path().join("firmas.xlsx"), dir.path());
        let (front, back) = (photo(), photo());
        let rec = record("MORA", "1712345678");
        let input = ExportInput {
            record: &rec,
            front: &front,
            back: &back,
        };

        // A plain file where the photo folder should go
        let blocker = dir.path().join("MORA_LUIS");
        std::fs::write(&blocker, b"x").unwrap();
        let err = store.save(&input).unwrap_err();
        assert!(matches!(err, StoreError::Io { .. }));
        assert!(!store.workbook_path().exists());

        std::fs::remove_file(&blocker).unwrap();
        store.save(&input).unwrap();
        let sheet = read_sheet(store.workbook_path()).unwrap();
        assert_eq!(sheet.rows.len(), 1);
    }

    #[test]
    fn test_append_aligns_by_header() {
        let mut sheet = StoredSheet {
            headers: vec!["Apellidos".to_string(), "Notas".to_string()],
            rows: vec![vec!["MORA".to_string(), "vip".to_string()]],
        };
        append_aligned(
            &mut sheet,
            &["Cédula", "Apellidos"],
            &["1712345678".to_string(), "VERA".to_string()],
        );
        assert_eq!(sheet.headers, vec!["Apellidos", "Notas", "Cédula"]);
        assert_eq!(sheet.rows[0], vec!["MORA", "vip", ""]);
        assert_eq!(sheet.rows[1], vec!["VERA", "", "1712345678"]);
    }

    #[test]
    fn test_cell_to_string() {
        assert_eq!(cell_to_string(&Data::Float(1712345678.0)), "1712345678");
        assert_eq!(cell_to_string(&Data::Float(1.5)), "1.5");
        assert_eq!(cell_to_string(&Data::Empty), "");
        assert_eq!(cell_to_string(&Data::String("SI".to_string())), "SI");
    }
}
