//! In-place overlay of tabular content onto one sheet of an existing xlsx
//! package.
//!
//! The worksheet part of the target sheet is rewritten, `workbook.xml` is
//! flagged for a full recalculation on open, and a calculation chain that
//! refers to replaced formulas is dropped. Every other part (other sheets,
//! charts, shared strings, styles) is copied over with its compressed bytes
//! untouched.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{Read, Seek, Write};
use std::path::Path;

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use tracing::{debug, instrument};
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{Result, ToolError};
use crate::model::{CellGrid, CellValue, SheetOverlay};

const WORKBOOK_PART: &str = "xl/workbook.xml";
const WORKBOOK_RELS_PART: &str = "xl/_rels/workbook.xml.rels";
const WORKBOOK_DIR: &str = "xl";
const CONTENT_TYPES_PART: &str = "[Content_Types].xml";
const CALC_CHAIN_TYPE: &str = "/calcChain";

/// `workbook.xml` children that follow `<calcPr>` in schema order.
const AFTER_CALC_PR: [&[u8]; 9] = [
    b"oleSize",
    b"customWorkbookViews",
    b"pivotCaches",
    b"smartTagPr",
    b"smartTagTypes",
    b"webPublishing",
    b"fileRecoveryPr",
    b"webPublishObjects",
    b"extLst",
];

const MAX_ROWS: usize = 1_048_576;
const MAX_COLUMNS: usize = 16_384;

/// Writes the overlay grid into its sheet, starting at `A1`, and returns the
/// number of non-empty cells written.
///
/// Grid cells replace existing cells at the same reference while keeping
/// their style; empty grid cells clear them. Existing cells outside the grid
/// are left as they are. The sheet must already exist in the workbook.
///
/// The workbook is flagged for a full recalculation on open. When a replaced
/// cell held a formula the calculation chain is dropped as well.
///
/// The package is rebuilt in a temporary file next to the workbook and
/// renamed over it, so a failure leaves the previous workbook in place.
#[instrument(
    level = "debug",
    skip_all,
    fields(workbook = %overlay.workbook.display(), sheet = %overlay.sheet_name)
)]
pub fn overlay_sheet(overlay: &SheetOverlay) -> Result<usize> {
    let path = overlay.workbook.as_path();
    if !path.is_file() {
        return Err(ToolError::MissingInput(path.to_path_buf()));
    }

    let mut archive = ZipArchive::new(File::open(path)?)?;
    let workbook = read_part(&mut archive, WORKBOOK_PART)?;
    let rels = read_part(&mut archive, WORKBOOK_RELS_PART)?;
    let sheet_part = locate_sheet_part(&workbook, &rels, &overlay.sheet_name)?.ok_or_else(|| {
        ToolError::MissingSheet {
            workbook: path.to_path_buf(),
            sheet: overlay.sheet_name.clone(),
        }
    })?;
    let original = read_part(&mut archive, &sheet_part)?;
    let sheet = overlay_sheet_xml(&original, &overlay.grid)?;
    let written = sheet.written;
    debug!(part = %sheet_part, cells = written, "sheet part rewritten");

    let mut edits = PartEdits::new();
    edits.insert(sheet_part, Some(sheet.xml));
    if let Some(patched) = force_full_calc(&workbook)? {
        edits.insert(WORKBOOK_PART.to_string(), Some(patched));
    }
    if sheet.formulas_removed {
        if let Some((rel_id, chain_part)) = calc_chain(&rels)? {
            let types = read_part(&mut archive, CONTENT_TYPES_PART)?;
            let override_name = format!("/{chain_part}");
            edits.insert(
                CONTENT_TYPES_PART.to_string(),
                Some(drop_elements(&types, b"Override", |tag| {
                    Ok(attribute(tag, b"PartName")?.as_deref() == Some(override_name.as_str()))
                })?),
            );
            edits.insert(
                WORKBOOK_RELS_PART.to_string(),
                Some(drop_elements(&rels, b"Relationship", |tag| {
                    Ok(attribute(tag, b"Id")?.as_deref() == Some(rel_id.as_str()))
                })?),
            );
            debug!(part = %chain_part, "calculation chain dropped");
            edits.insert(chain_part, None);
        }
    }

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut staged = tempfile::Builder::new()
        .prefix(".simsheet-")
        .suffix(".tmp")
        .tempfile_in(dir)?;
    staged
        .as_file()
        .set_permissions(fs::metadata(path)?.permissions())?;

    {
        let mut writer = ZipWriter::new(staged.as_file_mut());
        for index in 0..archive.len() {
            let entry = archive.by_index_raw(index)?;
            match edits.get(entry.name()) {
                Some(Some(bytes)) => {
                    let options = SimpleFileOptions::default()
                        .compression_method(CompressionMethod::Deflated);
                    writer.start_file(entry.name().to_string(), options)?;
                    writer.write_all(bytes)?;
                }
                Some(None) => {}
                None => writer.raw_copy_file(entry)?,
            }
        }
        writer.finish()?;
    }
    drop(archive);

    staged.persist(path).map_err(|err| err.error)?;
    Ok(written)
}

/// Parts replaced (`Some`) or removed (`None`) when the package is rebuilt.
type PartEdits = BTreeMap<String, Option<Vec<u8>>>;

fn locate_sheet_part(workbook: &[u8], rels: &[u8], sheet_name: &str) -> Result<Option<String>> {
    let Some(rel_id) = workbook_sheets(workbook)?
        .into_iter()
        .find(|(name, _)| name == sheet_name)
        .map(|(_, rel_id)| rel_id)
    else {
        return Ok(None);
    };

    let target = relationship_target(rels, &rel_id)?.ok_or_else(|| {
        ToolError::InvalidWorkbook(format!("sheet '{sheet_name}' points at unknown relationship {rel_id}"))
    })?;
    Ok(Some(resolve_part(WORKBOOK_DIR, &target)))
}

fn read_part<R: Read + Seek>(archive: &mut ZipArchive<R>, name: &str) -> Result<Vec<u8>> {
    let mut entry = archive.by_name(name).map_err(|err| match err {
        ZipError::FileNotFound => ToolError::InvalidWorkbook(format!("missing part {name}")),
        other => ToolError::from(other),
    })?;
    let mut bytes = Vec::with_capacity(entry.size() as usize);
    entry.read_to_end(&mut bytes)?;
    Ok(bytes)
}

/// `(sheet name, relationship id)` for every `<sheet>` in `workbook.xml`.
fn workbook_sheets(xml: &[u8]) -> Result<Vec<(String, String)>> {
    let mut sheets = Vec::new();
    for event in read_events(xml)? {
        let (Event::Start(tag) | Event::Empty(tag)) = event else {
            continue;
        };
        if tag.local_name().as_ref() != b"sheet" {
            continue;
        }
        let mut name = None;
        let mut rel_id = None;
        for attr in tag.attributes() {
            let attr = attr.map_err(quick_xml::Error::from)?;
            let value = attr.unescape_value()?.into_owned();
            match (attr.key.prefix().is_some(), attr.key.local_name().as_ref()) {
                (false, b"name") => name = Some(value),
                (true, b"id") => rel_id = Some(value),
                _ => {}
            }
        }
        if let (Some(name), Some(rel_id)) = (name, rel_id) {
            sheets.push((name, rel_id));
        }
    }
    Ok(sheets)
}

fn relationship_target(xml: &[u8], rel_id: &str) -> Result<Option<String>> {
    for event in read_events(xml)? {
        let (Event::Start(tag) | Event::Empty(tag)) = event else {
            continue;
        };
        if tag.local_name().as_ref() != b"Relationship" {
            continue;
        }
        let mut id = None;
        let mut target = None;
        for attr in tag.attributes() {
            let attr = attr.map_err(quick_xml::Error::from)?;
            match attr.key.as_ref() {
                b"Id" => id = Some(attr.unescape_value()?.into_owned()),
                b"Target" => target = Some(attr.unescape_value()?.into_owned()),
                _ => {}
            }
        }
        if id.as_deref() == Some(rel_id) {
            return Ok(target);
        }
    }
    Ok(None)
}

/// Relationship id and part name of the workbook's calculation chain.
fn calc_chain(rels: &[u8]) -> Result<Option<(String, String)>> {
    for event in read_events(rels)? {
        let (Event::Start(tag) | Event::Empty(tag)) = event else {
            continue;
        };
        if tag.local_name().as_ref() != b"Relationship" {
            continue;
        }
        let is_chain = attribute(&tag, b"Type")?
            .is_some_and(|kind| kind.ends_with(CALC_CHAIN_TYPE));
        if !is_chain {
            continue;
        }
        if let (Some(id), Some(target)) = (attribute(&tag, b"Id")?, attribute(&tag, b"Target")?) {
            return Ok(Some((id, resolve_part(WORKBOOK_DIR, &target))));
        }
    }
    Ok(None)
}

/// Sets `fullCalcOnLoad="1"` on the `<calcPr>` of `workbook.xml`, adding the
/// element when it is missing. Returns `None` when the flag is already set.
pub(crate) fn force_full_calc(xml: &[u8]) -> Result<Option<Vec<u8>>> {
    let mut events = read_events(xml)?;
    let existing = events.iter().position(|event| {
        matches!(event, Event::Start(tag) | Event::Empty(tag) if tag.local_name().as_ref() == b"calcPr")
    });

    match existing {
        Some(index) => {
            let replacement = match &events[index] {
                Event::Empty(tag) => full_calc_tag(tag)?.map(Event::Empty),
                Event::Start(tag) => full_calc_tag(tag)?.map(Event::Start),
                _ => None,
            };
            let Some(replacement) = replacement else {
                return Ok(None);
            };
            events[index] = replacement;
        }
        None => {
            let root = events.iter().find_map(|event| match event {
                Event::Start(tag) => Some(PartNames::from_tag(tag)),
                _ => None,
            });
            let names = root.ok_or_else(|| {
                ToolError::InvalidWorkbook("workbook part has no root element".into())
            })?;
            let at = calc_pr_position(&events).ok_or_else(|| {
                ToolError::InvalidWorkbook("unterminated workbook element".into())
            })?;
            let mut calc = BytesStart::new(names.name("calcPr"));
            calc.push_attribute(("fullCalcOnLoad", "1"));
            events.insert(at, Event::Empty(calc));
        }
    }

    let mut writer = Writer::new(Vec::with_capacity(xml.len() + 32));
    for event in &events {
        writer.write_event(event)?;
    }
    Ok(Some(writer.into_inner()))
}

/// Index where a missing `<calcPr>` belongs among the root's children.
fn calc_pr_position(events: &[Event<'static>]) -> Option<usize> {
    let mut depth = 0usize;
    for (index, event) in events.iter().enumerate() {
        match event {
            Event::Start(tag) | Event::Empty(tag) => {
                let local = tag.local_name();
                if depth == 1 && AFTER_CALC_PR.iter().any(|name| *name == local.as_ref()) {
                    return Some(index);
                }
                if matches!(event, Event::Start(_)) {
                    depth += 1;
                }
            }
            Event::End(_) => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(index);
                }
            }
            _ => {}
        }
    }
    None
}

fn full_calc_tag(tag: &BytesStart<'_>) -> Result<Option<BytesStart<'static>>> {
    if matches!(attribute(tag, b"fullCalcOnLoad")?.as_deref(), Some("1" | "true")) {
        return Ok(None);
    }
    let mut calc = BytesStart::new(String::from_utf8_lossy(tag.name().as_ref()).into_owned());
    for attr in tag.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        if attr.key.as_ref() != b"fullCalcOnLoad" {
            calc.push_attribute(attr);
        }
    }
    calc.push_attribute(("fullCalcOnLoad", "1"));
    Ok(Some(calc))
}

/// Copies an XML part without the empty `local` elements `selected` picks.
fn drop_elements<F>(xml: &[u8], local: &[u8], mut selected: F) -> Result<Vec<u8>>
where
    F: FnMut(&BytesStart<'_>) -> Result<bool>,
{
    let mut writer = Writer::new(Vec::with_capacity(xml.len()));
    for event in read_events(xml)? {
        if let Event::Empty(tag) = &event {
            if tag.local_name().as_ref() == local && selected(tag)? {
                continue;
            }
        }
        writer.write_event(event)?;
    }
    Ok(writer.into_inner())
}

/// Resolves a relationship target against the directory of its source part.
fn resolve_part(base_dir: &str, target: &str) -> String {
    let joined = match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None => format!("{base_dir}/{target}"),
    };
    let mut segments: Vec<&str> = Vec::new();
    for segment in joined.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    segments.join("/")
}

fn read_events(xml: &[u8]) -> Result<Vec<Event<'static>>> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut events = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Eof => break,
            event => events.push(event.into_owned()),
        }
        buf.clear();
    }
    Ok(events)
}

/// Element names carrying the namespace prefix of a part's root element when
/// it uses one.
struct PartNames {
    prefix: String,
}

impl PartNames {
    fn from_tag(tag: &BytesStart<'_>) -> Self {
        let prefix = tag
            .name()
            .prefix()
            .map(|prefix| format!("{}:", String::from_utf8_lossy(prefix.as_ref())))
            .unwrap_or_default();
        Self { prefix }
    }

    fn name(&self, local: &str) -> String {
        format!("{}{local}", self.prefix)
    }
}

struct RowXml {
    start: BytesStart<'static>,
    /// Cell events keyed by zero-based column.
    cells: BTreeMap<u32, Vec<Event<'static>>>,
}

/// A worksheet part after the grid has been laid over it.
pub(crate) struct SheetRewrite {
    pub(crate) xml: Vec<u8>,
    /// Non-empty grid cells written.
    pub(crate) written: usize,
    /// At least one replaced cell held a formula.
    pub(crate) formulas_removed: bool,
}

/// Rewrites the `<sheetData>` of a worksheet part with the grid laid over it.
pub(crate) fn overlay_sheet_xml(xml: &[u8], grid: &CellGrid) -> Result<SheetRewrite> {
    if grid.height() > MAX_ROWS || grid.width() > MAX_COLUMNS {
        return Err(ToolError::InvalidWorkbook(format!(
            "{}x{} grid exceeds the sheet size limit",
            grid.height(),
            grid.width()
        )));
    }

    let events = read_events(xml)?;
    let (start, open_tag, self_closing) = events
        .iter()
        .enumerate()
        .find_map(|(index, event)| match event {
            Event::Start(tag) if tag.local_name().as_ref() == b"sheetData" => {
                Some((index, tag.clone(), false))
            }
            Event::Empty(tag) if tag.local_name().as_ref() == b"sheetData" => {
                Some((index, tag.clone(), true))
            }
            _ => None,
        })
        .ok_or_else(|| ToolError::InvalidWorkbook("worksheet has no sheetData".into()))?;
    let end = if self_closing {
        start
    } else {
        events[start + 1..]
            .iter()
            .position(|event| {
                matches!(event, Event::End(tag) if tag.local_name().as_ref() == b"sheetData")
            })
            .map(|offset| start + 1 + offset)
            .ok_or_else(|| ToolError::InvalidWorkbook("unterminated sheetData".into()))?
    };

    let names = PartNames::from_tag(&open_tag);
    let mut rows = if self_closing {
        BTreeMap::new()
    } else {
        parse_rows(&events[start + 1..end])?
    };
    let (written, formulas_removed) = lay_grid(&mut rows, grid, &names)?;

    let mut writer = Writer::new(Vec::with_capacity(xml.len() + grid.cell_count() * 32));
    for event in &events[..start] {
        match event {
            Event::Empty(tag) if tag.local_name().as_ref() == b"dimension" => {
                let name = String::from_utf8_lossy(tag.name().as_ref()).into_owned();
                let mut dimension = BytesStart::new(name);
                dimension.push_attribute(("ref", dimension_ref(&rows).as_str()));
                writer.write_event(Event::Empty(dimension))?;
            }
            other => writer.write_event(other)?,
        }
    }

    if rows.is_empty() {
        writer.write_event(Event::Empty(open_tag.clone()))?;
    } else {
        writer.write_event(Event::Start(open_tag.clone()))?;
        for (number, row) in &rows {
            write_row(&mut writer, *number, row)?;
        }
        writer.write_event(Event::End(BytesEnd::new(names.name("sheetData"))))?;
    }

    for event in &events[end + 1..] {
        writer.write_event(event)?;
    }
    Ok(SheetRewrite {
        xml: writer.into_inner(),
        written,
        formulas_removed,
    })
}

fn parse_rows(events: &[Event<'static>]) -> Result<BTreeMap<u32, RowXml>> {
    let mut rows = BTreeMap::new();
    let mut current: Option<(u32, RowXml)> = None;
    let mut cell: Option<(u32, Vec<Event<'static>>)> = None;
    let mut last_row = 0;
    let mut next_col = 0;

    for event in events {
        if let Some((col, mut cell_events)) = cell.take() {
            cell_events.push(event.clone());
            if matches!(event, Event::End(tag) if tag.local_name().as_ref() == b"c") {
                let (_, row) = current
                    .as_mut()
                    .ok_or_else(|| ToolError::InvalidWorkbook("cell outside a row".into()))?;
                row.cells.insert(col, cell_events);
            } else {
                cell = Some((col, cell_events));
            }
            continue;
        }

        match event {
            Event::Start(tag) | Event::Empty(tag) if tag.local_name().as_ref() == b"row" => {
                let number = match attribute(tag, b"r")? {
                    Some(value) => value.parse::<u32>().map_err(|_| {
                        ToolError::InvalidWorkbook(format!("invalid row number '{value}'"))
                    })?,
                    None => last_row + 1,
                };
                last_row = number;
                next_col = 0;
                let row = RowXml {
                    start: tag.clone(),
                    cells: BTreeMap::new(),
                };
                if matches!(event, Event::Empty(_)) {
                    rows.insert(number, row);
                } else {
                    current = Some((number, row));
                }
            }
            Event::End(tag) if tag.local_name().as_ref() == b"row" => {
                if let Some((number, row)) = current.take() {
                    rows.insert(number, row);
                }
            }
            Event::Start(tag) | Event::Empty(tag) if tag.local_name().as_ref() == b"c" => {
                let col = match attribute(tag, b"r")? {
                    Some(reference) => parse_cell_ref(&reference).map(|(_, col)| col).ok_or_else(
                        || ToolError::InvalidWorkbook(format!("invalid cell reference '{reference}'")),
                    )?,
                    None => next_col,
                };
                next_col = col + 1;
                if matches!(event, Event::Empty(_)) {
                    let (_, row) = current
                        .as_mut()
                        .ok_or_else(|| ToolError::InvalidWorkbook("cell outside a row".into()))?;
                    row.cells.insert(col, vec![event.clone()]);
                } else {
                    cell = Some((col, vec![event.clone()]));
                }
            }
            _ => {}
        }
    }

    if current.is_some() || cell.is_some() {
        return Err(ToolError::InvalidWorkbook("unterminated row in sheetData".into()));
    }
    Ok(rows)
}

/// Lays the grid over the parsed rows. Returns the number of non-empty cells
/// written and whether any replaced cell held a formula.
fn lay_grid(
    rows: &mut BTreeMap<u32, RowXml>,
    grid: &CellGrid,
    names: &PartNames,
) -> Result<(usize, bool)> {
    let mut written = 0;
    let mut formulas_removed = false;
    for (row_index, values) in grid.rows().iter().enumerate() {
        let number = row_index as u32 + 1;
        for (col_index, value) in values.iter().enumerate() {
            let col = col_index as u32;
            let existing = rows.get(&number).and_then(|row| row.cells.get(&col));
            // An empty grid cell clears whatever the template holds there.
            if value.is_empty() && existing.is_none() {
                continue;
            }
            let style = match existing {
                Some(events) => {
                    formulas_removed |= has_formula(events);
                    cell_style(events)?
                }
                None => None,
            };
            let events = cell_events(names, number, col, value, style.as_deref())?;
            rows.entry(number)
                .or_insert_with(|| RowXml {
                    start: BytesStart::new(names.name("row")),
                    cells: BTreeMap::new(),
                })
                .cells
                .insert(col, events);
            if !value.is_empty() {
                written += 1;
            }
        }
    }
    Ok((written, formulas_removed))
}

fn has_formula(events: &[Event<'static>]) -> bool {
    events.iter().any(|event| {
        matches!(event, Event::Start(tag) | Event::Empty(tag) if tag.local_name().as_ref() == b"f")
    })
}

fn cell_style(events: &[Event<'static>]) -> Result<Option<String>> {
    match events.first() {
        Some(Event::Start(tag) | Event::Empty(tag)) => attribute(tag, b"s"),
        _ => Ok(None),
    }
}

fn cell_events(
    names: &PartNames,
    row: u32,
    col: u32,
    value: &CellValue,
    style: Option<&str>,
) -> Result<Vec<Event<'static>>> {
    let cell_name = names.name("c");
    let mut start = BytesStart::new(cell_name.clone());
    start.push_attribute(("r", cell_ref(row, col).as_str()));
    if let Some(style) = style {
        start.push_attribute(("s", style));
    }

    let mut events = Vec::with_capacity(7);
    match value {
        CellValue::Empty => return Ok(vec![Event::Empty(start)]),
        CellValue::Number(number) => {
            let text = number.to_string();
            events.push(Event::Start(start));
            events.push(Event::Start(BytesStart::new(names.name("v"))));
            events.push(Event::Text(BytesText::new(&text).into_owned()));
            events.push(Event::End(BytesEnd::new(names.name("v"))));
        }
        CellValue::Text(text) => {
            if let Some(bad) = text.chars().find(|ch| !is_xml_char(*ch)) {
                return Err(ToolError::InvalidWorkbook(format!(
                    "cell {} contains character U+{:04X} that cannot be stored",
                    cell_ref(row, col),
                    bad as u32
                )));
            }
            start.push_attribute(("t", "inlineStr"));
            let mut text_tag = BytesStart::new(names.name("t"));
            if text.trim() != text {
                text_tag.push_attribute(("xml:space", "preserve"));
            }
            events.push(Event::Start(start));
            events.push(Event::Start(BytesStart::new(names.name("is"))));
            events.push(Event::Start(text_tag));
            events.push(Event::Text(BytesText::new(text).into_owned()));
            events.push(Event::End(BytesEnd::new(names.name("t"))));
            events.push(Event::End(BytesEnd::new(names.name("is"))));
        }
    }
    events.push(Event::End(BytesEnd::new(cell_name)));
    Ok(events)
}

fn write_row(writer: &mut Writer<Vec<u8>>, number: u32, row: &RowXml) -> Result<()> {
    let name = String::from_utf8_lossy(row.start.name().as_ref()).into_owned();
    let mut start = BytesStart::new(name.clone());
    start.push_attribute(("r", number.to_string().as_str()));
    for attr in row.start.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        // spans is only a load hint and goes stale once cells are added.
        if matches!(attr.key.as_ref(), b"r" | b"spans") {
            continue;
        }
        start.push_attribute(attr);
    }

    if row.cells.is_empty() {
        writer.write_event(Event::Empty(start))?;
        return Ok(());
    }
    writer.write_event(Event::Start(start))?;
    for events in row.cells.values() {
        for event in events {
            writer.write_event(event)?;
        }
    }
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

fn attribute(tag: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>> {
    for attr in tag.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        if attr.key.as_ref() == key {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

fn dimension_ref(rows: &BTreeMap<u32, RowXml>) -> String {
    let mut bounds: Option<(u32, u32, u32, u32)> = None;
    for (&number, row) in rows {
        let (Some(&first), Some(&last)) = (row.cells.keys().next(), row.cells.keys().next_back())
        else {
            continue;
        };
        bounds = Some(match bounds {
            None => (number, first, number, last),
            Some((top, left, bottom, right)) => {
                (top.min(number), left.min(first), bottom.max(number), right.max(last))
            }
        });
    }
    match bounds {
        None => "A1".to_string(),
        Some((top, left, bottom, right)) if top == bottom && left == right => cell_ref(top, left),
        Some((top, left, bottom, right)) => {
            format!("{}:{}", cell_ref(top, left), cell_ref(bottom, right))
        }
    }
}

fn is_xml_char(ch: char) -> bool {
    matches!(ch, '\t' | '\n' | '\r' | '\u{20}'..='\u{D7FF}' | '\u{E000}'..='\u{FFFD}' | '\u{10000}'..='\u{10FFFF}')
}

/// Column letters for a zero-based column index (`0` is `A`).
pub(crate) fn column_name(col: u32) -> String {
    let mut letters = Vec::new();
    let mut remaining = col + 1;
    while remaining > 0 {
        let digit = (remaining - 1) % 26;
        letters.push(char::from(b'A' + digit as u8));
        remaining = (remaining - 1) / 26;
    }
    letters.iter().rev().collect()
}

/// `A1`-style reference for a one-based row and zero-based column.
pub(crate) fn cell_ref(row: u32, col: u32) -> String {
    format!("{}{row}", column_name(col))
}

/// Parses an `A1`-style reference into a one-based row and zero-based column.
pub(crate) fn parse_cell_ref(reference: &str) -> Option<(u32, u32)> {
    let split = reference.find(|ch: char| ch.is_ascii_digit())?;
    let (letters, digits) = reference.split_at(split);
    if letters.is_empty() || !letters.chars().all(|ch| ch.is_ascii_uppercase()) {
        return None;
    }
    let col = letters
        .bytes()
        .try_fold(0u32, |acc, byte| {
            acc.checked_mul(26)?.checked_add(u32::from(byte - b'A') + 1)
        })?;
    let row = digits.parse::<u32>().ok()?;
    Some((row, col - 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(rows: &[&[&str]]) -> CellGrid {
        CellGrid::new(
            rows.iter()
                .map(|row| {
                    row.iter()
                        .map(|cell| match cell.parse::<f64>() {
                            _ if cell.is_empty() => CellValue::Empty,
                            Ok(number) => CellValue::Number(number),
                            Err(_) => CellValue::Text(cell.to_string()),
                        })
                        .collect()
                })
                .collect(),
        )
    }

    fn overlay(xml: &str, rows: &[&[&str]]) -> (String, usize) {
        let sheet = overlay_sheet_xml(xml.as_bytes(), &grid(rows)).expect("overlaid");
        (String::from_utf8(sheet.xml).expect("utf-8 output"), sheet.written)
    }

    const EMPTY_SHEET: &str = concat!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
        r#"<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">"#,
        r#"<dimension ref="A1"/><sheetData/><pageMargins left="0.7"/></worksheet>"#
    );

    #[test]
    fn fills_an_empty_sheet_from_a1() {
        let (xml, written) = overlay(EMPTY_SHEET, &[&["1", "2", "x"], &["4", "", "y z"]]);
        assert_eq!(written, 5);
        assert!(xml.contains(r#"<dimension ref="A1:C2"/>"#));
        assert!(xml.contains(
            r#"<row r="1"><c r="A1"><v>1</v></c><c r="B1"><v>2</v></c><c r="C1" t="inlineStr"><is><t>x</t></is></c></row>"#
        ));
        assert!(xml.contains(
            r#"<row r="2"><c r="A2"><v>4</v></c><c r="C2" t="inlineStr"><is><t>y z</t></is></c></row>"#
        ));
        assert!(xml.ends_with(r#"</sheetData><pageMargins left="0.7"/></worksheet>"#));
        assert!(xml.starts_with(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#));
    }

    #[test]
    fn replaces_overlapping_cells_and_keeps_the_rest() {
        let sheet = concat!(
            r#"<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">"#,
            r#"<dimension ref="A1:E3"/><sheetData>"#,
            r#"<row r="1" spans="1:5" ht="20" customHeight="1">"#,
            r#"<c r="A1" s="3" t="s"><v>0</v></c><c r="E1" t="s"><v>1</v></c></row>"#,
            r#"<row r="3"><c r="B3"><f>SUM(A1:A2)</f><v>0</v></c></row>"#,
            r#"</sheetData></worksheet>"#
        );
        let (xml, written) = overlay(sheet, &[&["7"], &["8"]]);
        assert_eq!(written, 2);
        assert!(xml.contains(
            r#"<row r="1" ht="20" customHeight="1"><c r="A1" s="3"><v>7</v></c><c r="E1" t="s"><v>1</v></c></row>"#
        ));
        assert!(xml.contains(r#"<row r="2"><c r="A2"><v>8</v></c></row>"#));
        assert!(xml.contains(r#"<row r="3"><c r="B3"><f>SUM(A1:A2)</f><v>0</v></c></row>"#));
        assert!(xml.contains(r#"<dimension ref="A1:E3"/>"#));
    }

    #[test]
    fn replaced_formula_cells_lose_their_formula() {
        let sheet = concat!(
            r#"<worksheet><sheetData><row r="1"><c r="A1"><f>1+1</f><v>2</v></c></row>"#,
            r#"</sheetData></worksheet>"#
        );
        let (xml, _) = overlay(sheet, &[&["label"]]);
        assert!(!xml.contains("<f>"));
        assert!(xml.contains(r#"<c r="A1" t="inlineStr"><is><t>label</t></is></c>"#));
    }

    #[test]
    fn keeps_the_namespace_prefix() {
        let sheet = concat!(
            r#"<x:worksheet xmlns:x="http://schemas.openxmlformats.org/spreadsheetml/2006/main">"#,
            r#"<x:sheetData></x:sheetData></x:worksheet>"#
        );
        let (xml, _) = overlay(sheet, &[&["5"]]);
        assert!(xml.contains(
            r#"<x:sheetData><x:row r="1"><x:c r="A1"><x:v>5</x:v></x:c></x:row></x:sheetData>"#
        ));
    }

    #[test]
    fn escapes_text_and_preserves_edge_whitespace() {
        let (xml, _) = overlay(EMPTY_SHEET, &[&[" a<b "]]);
        assert!(xml.contains(r#"<t xml:space="preserve"> a&lt;b </t>"#));
    }

    #[test]
    fn rejects_control_characters() {
        let result = overlay_sheet_xml(EMPTY_SHEET.as_bytes(), &grid(&[&["bell\u{7}"]]));
        assert!(matches!(result, Err(ToolError::InvalidWorkbook(_))));
    }

    #[test]
    fn rejects_worksheets_without_sheet_data() {
        let result = overlay_sheet_xml(b"<worksheet/>", &grid(&[&["1"]]));
        assert!(matches!(result, Err(ToolError::InvalidWorkbook(_))));
    }

    #[test]
    fn cells_without_references_follow_their_neighbours() {
        let sheet = r#"<worksheet><sheetData><row><c><v>1</v></c><c><v>2</v></c></row></sheetData></worksheet>"#;
        let (xml, _) = overlay(sheet, &[&["9"]]);
        assert!(xml.contains(r#"<row r="1"><c r="A1"><v>9</v></c><c><v>2</v></c></row>"#));
    }

    #[test]
    fn empty_grid_cells_clear_template_cells() {
        let sheet = concat!(
            r#"<worksheet><sheetData>"#,
            r#"<row r="2"><c r="A2" s="4" t="inlineStr"><is><t>placeholder</t></is></c></row>"#,
            r#"</sheetData></worksheet>"#
        );
        let (xml, written) = overlay(sheet, &[&["1", "2"], &["", "4"]]);
        assert_eq!(written, 3);
        assert!(xml.contains(r#"<row r="2"><c r="A2" s="4"/><c r="B2"><v>4</v></c></row>"#));
        assert!(!xml.contains("placeholder"));
    }

    #[test]
    fn reports_replaced_formulas() {
        let sheet = concat!(
            r#"<worksheet><sheetData><row r="1"><c r="A1"><v>1</v></c>"#,
            r#"<c r="B1"><f>A1*2</f><v>2</v></c></row></sheetData></worksheet>"#
        );
        let kept = overlay_sheet_xml(sheet.as_bytes(), &grid(&[&["5"]])).expect("overlaid");
        assert!(!kept.formulas_removed);

        let cleared = overlay_sheet_xml(sheet.as_bytes(), &grid(&[&["5", ""]])).expect("overlaid");
        assert!(cleared.formulas_removed);
        assert!(!String::from_utf8(cleared.xml).expect("utf-8 output").contains("<f>"));
    }

    #[test]
    fn sets_full_calc_on_an_existing_calc_pr() {
        let workbook = concat!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
            "\n",
            r#"<workbook><sheets><sheet name="Data" sheetId="1" r:id="rId1"/></sheets>"#,
            r#"<calcPr calcId="124519"/></workbook>"#
        );
        let patched = force_full_calc(workbook.as_bytes())
            .expect("patched")
            .expect("flag added");
        assert_eq!(
            String::from_utf8(patched).expect("utf-8 output"),
            workbook.replace(
                r#"<calcPr calcId="124519"/>"#,
                r#"<calcPr calcId="124519" fullCalcOnLoad="1"/>"#
            )
        );
    }

    #[test]
    fn leaves_workbooks_already_flagged_for_full_calc() {
        let workbook = br#"<workbook><calcPr calcId="1" fullCalcOnLoad="1"/></workbook>"#;
        assert_eq!(force_full_calc(workbook).expect("checked"), None);
    }

    #[test]
    fn inserts_calc_pr_in_schema_order() {
        let workbook = concat!(
            r#"<x:workbook xmlns:x="main"><x:sheets/><x:definedNames/>"#,
            r#"<x:extLst><x:ext/></x:extLst></x:workbook>"#
        );
        let patched = force_full_calc(workbook.as_bytes())
            .expect("patched")
            .expect("element added");
        assert_eq!(
            String::from_utf8(patched).expect("utf-8 output"),
            concat!(
                r#"<x:workbook xmlns:x="main"><x:sheets/><x:definedNames/>"#,
                r#"<x:calcPr fullCalcOnLoad="1"/><x:extLst><x:ext/></x:extLst></x:workbook>"#
            )
        );

        let bare = force_full_calc(b"<workbook><sheets/></workbook>")
            .expect("patched")
            .expect("element added");
        assert_eq!(
            String::from_utf8(bare).expect("utf-8 output"),
            r#"<workbook><sheets/><calcPr fullCalcOnLoad="1"/></workbook>"#
        );
    }

    #[test]
    fn finds_and_unlinks_the_calc_chain() {
        let rels = concat!(
            r#"<Relationships><Relationship Id="rId1" Type="http://x/worksheet" Target="worksheets/sheet1.xml"/>"#,
            r#"<Relationship Id="rId9" Type="http://x/calcChain" Target="calcChain.xml"/></Relationships>"#
        );
        let (rel_id, part) = calc_chain(rels.as_bytes())
            .expect("parsed")
            .expect("chain present");
        assert_eq!((rel_id.as_str(), part.as_str()), ("rId9", "xl/calcChain.xml"));

        let unlinked = drop_elements(rels.as_bytes(), b"Relationship", |tag| {
            Ok(attribute(tag, b"Id")?.as_deref() == Some("rId9"))
        })
        .expect("filtered");
        assert_eq!(
            String::from_utf8(unlinked).expect("utf-8 output"),
            r#"<Relationships><Relationship Id="rId1" Type="http://x/worksheet" Target="worksheets/sheet1.xml"/></Relationships>"#
        );
        assert_eq!(calc_chain(b"<Relationships/>").expect("parsed"), None);
    }

    #[test]
    fn reads_sheet_relationships() {
        let workbook = br#"<workbook xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets><sheet name="Data" sheetId="1" r:id="rId1"/><sheet name="Gas &amp; More" sheetId="2" r:id="rId7"/></sheets></workbook>"#;
        let sheets = workbook_sheets(workbook).expect("parsed");
        assert_eq!(
            sheets,
            vec![
                ("Data".to_string(), "rId1".to_string()),
                ("Gas & More".to_string(), "rId7".to_string()),
            ]
        );

        let rels = br#"<Relationships><Relationship Id="rId7" Type="t" Target="worksheets/sheet2.xml"/></Relationships>"#;
        assert_eq!(
            relationship_target(rels, "rId7").expect("parsed"),
            Some("worksheets/sheet2.xml".to_string())
        );
        assert_eq!(relationship_target(rels, "rId1").expect("parsed"), None);
    }

    #[test]
    fn resolves_relative_and_absolute_targets() {
        assert_eq!(resolve_part("xl", "worksheets/sheet1.xml"), "xl/worksheets/sheet1.xml");
        assert_eq!(resolve_part("xl", "/xl/worksheets/sheet1.xml"), "xl/worksheets/sheet1.xml");
        assert_eq!(resolve_part("xl", "../xl/./worksheets/s.xml"), "xl/worksheets/s.xml");
    }

    #[test]
    fn converts_cell_references() {
        assert_eq!(column_name(0), "A");
        assert_eq!(column_name(25), "Z");
        assert_eq!(column_name(26), "AA");
        assert_eq!(column_name(16_383), "XFD");
        assert_eq!(cell_ref(12, 27), "AB12");
        assert_eq!(parse_cell_ref("AB12"), Some((12, 27)));
        assert_eq!(parse_cell_ref("XFD1048576"), Some((1_048_576, 16_383)));
        assert_eq!(parse_cell_ref("12"), None);
        assert_eq!(parse_cell_ref("a1"), None);
    }
}
