//! GPS time series file reader
//!
//! Parses whitespace-delimited tables with a header row into a
//! `SampleTable`, keeping only the columns the input format names.
//! Rows with missing values are dropped rather than rejected.

use std::path::Path;

use crate::logging::{self, Source};
use crate::model::{InputFormat, QuakeError, Result, Sample, SampleTable};

/// Tokens treated as a missing value.
const MISSING_TOKENS: &[&str] = &["NaN", "nan", "NAN", "NA", "N/A", "-"];

/// Read and parse a time series file.
pub fn read_table(path: &Path, format: InputFormat, sample_interval_secs: f64) -> Result<SampleTable> {
    let text = std::fs::read_to_string(path)?;
    let source = path.display().to_string();
    let table = parse_table(&text, &source, format, sample_interval_secs)?;

    logging::debug(
        Source::Reader,
        None,
        &format!("{}: {} rows ({})", source, table.len(), format),
    );

    Ok(table)
}

/// Parse time series text. `source` is only used for messages.
pub fn parse_table(
    text: &str,
    source: &str,
    format: InputFormat,
    sample_interval_secs: f64,
) -> Result<SampleTable> {
    let mut lines = text
        .lines()
        .enumerate()
        .skip_while(|(_, line)| line.trim().is_empty());

    let (header_line, header) = lines
        .next()
        .ok_or_else(|| QuakeError::EmptyTable(source.to_string()))?;
    let header: Vec<&str> = header.split_whitespace().collect();

    let column_index = |name: &str| -> Result<usize> {
        header
            .iter()
            .position(|h| *h == name)
            .ok_or_else(|| QuakeError::MissingColumn(name.to_string()))
    };

    let time_idx = format.time_column().map(column_index).transpose()?;
    let component_names = format.component_columns();
    let component_idx = [
        column_index(component_names[0])?,
        column_index(component_names[1])?,
        column_index(component_names[2])?,
    ];

    let mut samples = Vec::new();
    let mut dropped = 0usize;

    for (line_no, line) in lines {
        // skip indices are relative to the header line
        if format.skip_lines().contains(&(line_no - header_line)) {
            continue;
        }
        if line.trim().is_empty() {
            continue;
        }

        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < header.len() {
            dropped += 1;
            continue;
        }

        let mut values = [0.0f64; 3];
        let mut missing = false;
        for (slot, &idx) in values.iter_mut().zip(component_idx.iter()) {
            match parse_field(fields[idx], line_no)? {
                Some(v) => *slot = v,
                None => missing = true,
            }
        }

        let time = match time_idx {
            Some(idx) => match parse_field(fields[idx], line_no)? {
                Some(t) => t,
                None => {
                    dropped += 1;
                    continue;
                }
            },
            None => samples.len() as f64 * sample_interval_secs,
        };

        if missing {
            dropped += 1;
            continue;
        }

        samples.push(Sample {
            time,
            north: values[0],
            east: values[1],
            up: values[2],
        });
    }

    if dropped > 0 {
        logging::debug(
            Source::Reader,
            None,
            &format!("{}: dropped {} incomplete rows", source, dropped),
        );
    }

    Ok(SampleTable {
        source: source.to_string(),
        format,
        component_names: component_names.map(String::from),
        samples,
    })
}

/// Parse one numeric field. `Ok(None)` means the value is missing.
fn parse_field(token: &str, line_no: usize) -> Result<Option<f64>> {
    if MISSING_TOKENS.contains(&token) {
        return Ok(None);
    }
    match token.parse::<f64>() {
        Ok(v) if v.is_nan() => Ok(None),
        Ok(v) => Ok(Some(v)),
        Err(_) => Err(QuakeError::Parse {
            line: line_no + 1,
            message: format!("'{}' is not a number", token),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REFORMATTED: &str = "\
sec-past-eq  n(cm)  e(cm)  u(cm)  sig
-2.0   0.10  -0.20  0.05  1
-1.0   0.00   0.10  NaN   1
 0.0   0.20   0.00  0.10  1
 1.0  41.00  -12.5  3.20  1
";

    const LC: &str = "\
Year DOY Seconds dNorth dEast dHeight
yyyy ddd s mm mm mm
2016 318 39600.0 1.0 2.0 3.0
2016 318 39600.1 1.5 2.5 3.5
2016 318 39600.2 2.0 3.0
2016 318 39600.3 2.5 3.5 4.5
";

    #[test]
    fn test_reformatted_uses_time_column_and_drops_missing() {
        let table = parse_table(REFORMATTED, "kaik.txt", InputFormat::Reformatted, 0.1).unwrap();
        assert_eq!(table.len(), 3, "the NaN row should be dropped");
        assert_eq!(table.samples[0].time, -2.0);
        assert_eq!(table.samples[2].time, 1.0);
        assert_eq!(table.samples[2].components(), [41.0, -12.5, 3.2]);
        assert_eq!(table.component_names[0], "n(cm)");
    }

    #[test]
    fn test_lc_skips_units_row_and_indexes_by_position() {
        let table = parse_table(LC, "x.2016.kaik.LC", InputFormat::Lc, 0.1).unwrap();
        assert_eq!(table.len(), 3, "units row skipped and short row dropped");
        assert_eq!(table.samples[0].components(), [1.0, 2.0, 3.0]);
        assert_eq!(table.samples[2].components(), [2.5, 3.5, 4.5]);
        // times follow kept-row position, not file line
        assert!((table.samples[2].time - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_missing_column_is_reported_by_name() {
        let err = parse_table("a b c\n1 2 3\n", "bad", InputFormat::Lc, 0.1).unwrap_err();
        match err {
            QuakeError::MissingColumn(name) => assert_eq!(name, "dNorth"),
            other => panic!("expected MissingColumn, got {:?}", other),
        }
    }

    #[test]
    fn test_garbage_value_is_parse_error_with_line() {
        let text = "sec-past-eq n(cm) e(cm) u(cm)\n0 1 2 3\n1 1 oops 3\n";
        let err = parse_table(text, "bad", InputFormat::Reformatted, 0.1).unwrap_err();
        match err {
            QuakeError::Parse { line, .. } => assert_eq!(line, 3),
            other => panic!("expected Parse, got {:?}", other),
        }
    }

    #[test]
    fn test_leading_blank_lines_before_header() {
        let text = "\n\nsec-past-eq n(cm) e(cm) u(cm)\n0 1 2 3\n";
        let table = parse_table(text, "t", InputFormat::Reformatted, 0.1).unwrap();
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_lc_units_row_skipped_after_leading_blank_lines() {
        let text = format!("\n\n{}", LC);
        let table = parse_table(&text, "x.2016.kaik.LC", InputFormat::Lc, 0.1).unwrap();
        assert_eq!(table.len(), 3, "units row is counted from the header, not the file start");
        assert_eq!(table.samples[0].components(), [1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_empty_input_is_error() {
        let err = parse_table("   \n", "empty", InputFormat::Lc, 0.1).unwrap_err();
        assert!(matches!(err, QuakeError::EmptyTable(_)));
    }

    #[test]
    fn test_read_table_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gps.2016.hanm.LC");
        std::fs::write(&path, LC).unwrap();
        let table = read_table(&path, InputFormat::Lc, 0.1).unwrap();
        assert_eq!(table.len(), 3);
        assert!(table.source.ends_with("gps.2016.hanm.LC"));
    }
}
