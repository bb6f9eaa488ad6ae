use std::path::Path;

use calamine::{DataType, Range, Reader, Xlsx, open_workbook};

use crate::error::{Result, ToolError};

/// Reads a sheet as rows of display strings, anchored at `A1` so that row
/// and column indices match the sheet's own coordinates.
pub fn read_sheet(path: &Path, name: &str) -> Result<Vec<Vec<String>>> {
    let mut workbook: Xlsx<_> = open_workbook(path)?;
    let range = read_required_sheet(&mut workbook, path, name)?;
    Ok(range_to_strings(&range))
}

fn read_required_sheet<R: std::io::Read + std::io::Seek>(
    workbook: &mut Xlsx<R>,
    path: &Path,
    name: &str,
) -> Result<Range<DataType>> {
    let range_result = workbook
        .worksheet_range(name)
        .ok_or_else(|| ToolError::MissingSheet {
            workbook: path.to_path_buf(),
            sheet: name.to_string(),
        })?;
    let range = range_result.map_err(ToolError::from)?;
    Ok(range)
}

fn range_to_strings(range: &Range<DataType>) -> Vec<Vec<String>> {
    let Some((top, left)) = range.start() else {
        return Vec::new();
    };
    let width = left as usize + range.width();

    let mut rows = vec![vec![String::new(); width]; top as usize];
    for row in range.rows() {
        let mut cells = vec![String::new(); left as usize];
        cells.extend(row.iter().map(|cell| cell_to_string(Some(cell))));
        rows.push(cells);
    }
    rows
}

fn cell_to_string(cell: Option<&DataType>) -> String {
    match cell {
        Some(DataType::String(value)) => value.clone(),
        Some(DataType::Float(value)) => value.to_string(),
        Some(DataType::Int(value)) => value.to_string(),
        Some(DataType::Bool(value)) => value.to_string(),
        Some(DataType::Empty) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_xlsxwriter::Workbook;
    use tempfile::tempdir;

    #[test]
    fn anchors_rows_at_a1() {
        let dir = tempdir().expect("temporary directory");
        let path = dir.path().join("sparse.xlsx");
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.set_name("Data").expect("sheet named");
        sheet.write_string(1, 2, "x").expect("string written");
        sheet.write_number(2, 1, 1.5).expect("number written");
        workbook.save(&path).expect("workbook saved");

        let rows = read_sheet(&path, "Data").expect("sheet read");
        assert_eq!(
            rows,
            vec![
                vec!["", "", ""],
                vec!["", "", "x"],
                vec!["", "1.5", ""],
            ]
        );
    }

    #[test]
    fn missing_sheet_is_reported() {
        let dir = tempdir().expect("temporary directory");
        let path = dir.path().join("book.xlsx");
        let mut workbook = Workbook::new();
        workbook.add_worksheet();
        workbook.save(&path).expect("workbook saved");

        assert!(matches!(
            read_sheet(&path, "GasData"),
            Err(ToolError::MissingSheet { .. })
        ));
    }
}
