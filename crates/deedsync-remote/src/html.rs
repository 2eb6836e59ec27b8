use deedsync_core::{DocNumber, Partition, Record, RecordParser};
use regex_lite::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::RemoteError;

const MIN_CELLS: usize = 6;

/// Parses the registry's deed details page: the first `table.table`, whose
/// second row holds six cells (serial, property, dates, nature and value,
/// parties, document info).
pub struct HtmlTableParser {
    table: Selector,
    row: Selector,
    cell: Selector,
    market_value: Regex,
    consideration_value: Regex,
    registered: Regex,
    executed: Regex,
    presented: Regex,
    before_ward_block: Regex,
    extent_value: Regex,
    extent_unit: Regex,
    deed_type: Regex,
}

impl HtmlTableParser {
    /// # Errors
    /// Returns an error if a built-in selector or pattern fails to compile.
    pub fn new() -> Result<Self, RemoteError> {
        Ok(Self {
            table: selector("table.table")?,
            row: selector("tr")?,
            cell: selector("td")?,
            market_value: pattern(r"Mkt\.Value:Rs\.?\s*([\d,]+)")?,
            consideration_value: pattern(r"Cons\.Value:Rs\.?\s*([\d,]+)")?,
            registered: pattern(r"\(R\)\s*([\d-]+)")?,
            executed: pattern(r"\(E\)\s*([\d-]+)")?,
            presented: pattern(r"\(P\)\s*([\d-]+)")?,
            before_ward_block: pattern(r"(.*?)\s*W-B:")?,
            extent_value: pattern(r"EXTENT:\s*([\d\.]+)")?,
            extent_unit: pattern(r"EXTENT:\s*[\d\.]+\s*([A-Za-z\.]+)")?,
            deed_type: pattern(r"\d{4}\s+(.+?)\s+Mkt\.Value")?,
        })
    }

    fn money(regex: &Regex, text: &str) -> Option<u64> {
        let digits = first_capture(regex, text)?.replace(',', "");
        digits.parse().ok()
    }

    /// Village is the text before the ward-block marker, minus the
    /// `VILL/COL:` prefix, and the first non-empty side of a `/`.
    fn village(&self, description: &str) -> Option<String> {
        let Some(before) = first_capture(&self.before_ward_block, description) else {
            return non_empty(description);
        };
        let before = before.trim();
        let before = before.strip_prefix("VILL/COL:").map_or(before, str::trim);
        match before.split_once('/') {
            Some((left, right)) => non_empty(left).or_else(|| non_empty(right)),
            None => non_empty(before),
        }
    }
}

impl RecordParser for HtmlTableParser {
    fn parse(
        &self,
        raw: &str,
        partition: &Partition,
        doc_number: DocNumber,
        registration_year: i32,
    ) -> Option<Record> {
        let document = Html::parse_document(raw);
        let table = document.select(&self.table).next()?;
        let row = table.select(&self.row).nth(1)?;
        let cells: Vec<String> = row.select(&self.cell).map(cell_text).collect();
        if cells.len() < MIN_CELLS {
            return None;
        }

        let description = &cells[1];
        let dates = &cells[2];
        let nature = &cells[3];

        let mut record = Record::bare(partition.id.clone(), doc_number, registration_year);
        record.serial = non_empty(&cells[0]);
        record.property_description = non_empty(description);
        record.dates_text = non_empty(dates);
        record.nature_and_value = non_empty(nature);
        record.parties = non_empty(&cells[4]);
        record.doc_info = non_empty(&cells[5]);
        record.market_value = Self::money(&self.market_value, nature);
        record.consideration_value = Self::money(&self.consideration_value, nature);
        record.date_of_registration = first_capture(&self.registered, dates).map(str::to_string);
        record.date_of_execution = first_capture(&self.executed, dates).map(str::to_string);
        record.date_of_presentation = first_capture(&self.presented, dates).map(str::to_string);
        record.village = self.village(description);
        record.extent = first_capture(&self.extent_value, description).map(str::to_string);
        record.extent_unit = first_capture(&self.extent_unit, description).map(str::to_string);
        record.deed_type =
            first_capture(&self.deed_type, nature).and_then(|text| non_empty(text.trim()));
        Some(record)
    }
}

fn selector(css: &'static str) -> Result<Selector, RemoteError> {
    Selector::parse(css).map_err(|err| RemoteError::InvalidConfig(format!("selector {css}: {err}")))
}

fn pattern(source: &'static str) -> Result<Regex, RemoteError> {
    Regex::new(source).map_err(|err| RemoteError::InvalidConfig(format!("pattern {source}: {err}")))
}

fn first_capture<'t>(regex: &Regex, text: &'t str) -> Option<&'t str> {
    regex.captures(text)?.get(1).map(|found| found.as_str())
}

/// Visible text of a cell, whitespace-normalised.
fn cell_text(cell: ElementRef<'_>) -> String {
    cell.text().map(str::trim).filter(|part| !part.is_empty()).collect::<Vec<_>>().join(" ")
}

fn non_empty(text: &str) -> Option<String> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
