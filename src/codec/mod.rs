use anyhow::{Context, Result};
use csv::{QuoteStyle, Terminator, WriterBuilder};
use serde::Serialize;
use serde_json::Value;

use crate::model::Row;

pub mod fields;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rounding {
    /// Values in their natural string form.
    #[default]
    None,
    /// Naming-convention rounding used for scoring-engine outputs.
    ByFieldName,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CsvText {
    pub text: String,
    pub byte_len: usize,
}

/// Serialize rows to CSV. The header is the first row's keys; every row is rendered in
/// header order. Fields containing a comma, quote or line break are quoted with inner
/// quotes doubled. Lines are joined by `\n` without a trailing newline.
pub fn to_csv(rows: &[Row], rounding: Rounding) -> Result<CsvText> {
    let Some(first) = rows.first() else {
        return Ok(CsvText { text: String::new(), byte_len: 0 });
    };
    let header: Vec<&str> = first.keys().map(String::as_str).collect();

    let mut w = WriterBuilder::new()
        .quote_style(QuoteStyle::Necessary)
        .terminator(Terminator::Any(b'\n'))
        .from_writer(Vec::with_capacity(rows.len() * 64));
    w.write_record(&header).context("write csv header")?;
    for row in rows {
        let record = header.iter().map(|col| {
            let v = row.get(*col).unwrap_or(&Value::Null);
            match rounding {
                Rounding::None => render_value(v),
                Rounding::ByFieldName => render_value(&fields::round_for_field(col, v)),
            }
        });
        w.write_record(record).context("write csv row")?;
    }
    let mut bytes = w.into_inner().map_err(|e| anyhow::anyhow!("flush csv: {}", e.error()))?;
    if bytes.last() == Some(&b'\n') { bytes.pop(); }
    let text = String::from_utf8(bytes).context("csv output is not utf-8")?;
    let byte_len = text.len();
    Ok(CsvText { text, byte_len })
}

/// Column list of a row set as it appears in the CSV header.
pub fn columns(rows: &[Row]) -> Vec<String> {
    rows.first().map(|r| r.keys().cloned().collect()).unwrap_or_default()
}

fn render_value(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows(v: Value) -> Vec<Row> {
        v.as_array().unwrap().iter().map(|r| r.as_object().cloned().unwrap()).collect()
    }

    #[test]
    fn empty_input_is_empty_text() {
        let out = to_csv(&[], Rounding::ByFieldName).unwrap();
        assert_eq!(out.text, "");
        assert_eq!(out.byte_len, 0);
    }

    #[test]
    fn lone_null_field_is_written_as_quoted_empty() {
        let out = to_csv(&rows(json!([{"memo": "x"}, {"memo": null}])), Rounding::None).unwrap();
        assert_eq!(out.text, "memo\nx\n\"\"");
        // with a second column the null is a bare empty field
        let out = to_csv(&rows(json!([{"memo": null, "n": 1}])), Rounding::None).unwrap();
        assert_eq!(out.text, "memo,n\n,1");
    }

    #[test]
    fn rounds_spend_and_quotes_commas() {
        let out = to_csv(&rows(json!([{"Spend": 1234.567, "Name": "A,B"}])), Rounding::ByFieldName).unwrap();
        assert_eq!(out.text, "Spend,Name\n1234.57,\"A,B\"");
        assert_eq!(out.byte_len, out.text.len());
    }

    #[test]
    fn escapes_quotes_newlines_and_renders_nulls() {
        let input = rows(json!([
            {"id": 1, "note": "say \"hi\"", "memo": null, "ok": true},
            {"id": 2, "note": "line1\nline2", "ok": false}
        ]));
        let out = to_csv(&input, Rounding::None).unwrap();
        assert_eq!(out.text, "id,note,memo,ok\n1,\"say \"\"hi\"\"\",,true\n2,\"line1\nline2\",,false");
    }

    #[test]
    fn header_names_are_quoted_too() {
        let out = to_csv(&rows(json!([{"a,b": 1, "c": 2}])), Rounding::None).unwrap();
        assert_eq!(out.text, "\"a,b\",c\n1,2");
    }

    #[test]
    fn serialization_is_deterministic() {
        let input = rows(json!([{"Revenue": 10.005, "CTR": 0.333333, "Orders": 2.5, "label": "x"}]));
        let a = to_csv(&input, Rounding::ByFieldName).unwrap();
        let b = to_csv(&input, Rounding::ByFieldName).unwrap();
        assert_eq!(a, b);
        assert!(a.text.starts_with("Revenue,CTR,Orders,label\n"));
    }

    #[test]
    fn reader_reconstructs_values() {
        let input = rows(json!([
            {"name": "Acme, Inc.", "quote": "\"x\"", "n": 3, "blank": ""},
            {"name": "multi\nline", "quote": "plain", "n": 4.5, "blank": null}
        ]));
        let out = to_csv(&input, Rounding::None).unwrap();

        let mut rdr = csv::ReaderBuilder::new().from_reader(out.text.as_bytes());
        let header: Vec<String> = rdr.headers().unwrap().iter().map(str::to_string).collect();
        assert_eq!(header, columns(&input));
        let parsed: Vec<Vec<String>> = rdr.records().map(|r| r.unwrap().iter().map(str::to_string).collect()).collect();
        assert_eq!(parsed[0], vec!["Acme, Inc.", "\"x\"", "3", ""]);
        assert_eq!(parsed[1], vec!["multi\nline", "plain", "4.5", ""]);
    }
}
