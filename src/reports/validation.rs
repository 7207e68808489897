use crate::core::error::{TaxError, TaxResult};
use crate::core::shared::models::{ReportKey, ReportType};
use crate::gateway::{FileUpload, UploadParameters};

pub const MIN_YEAR: i32 = 2000;
pub const MAX_YEAR: i32 = 2100;
pub const SPREADSHEET_EXTENSIONS: [&str; 2] = ["xls", "xlsx"];

/// Annual (0) and quarterly (1) submissions carry six statements, monthly (2) four.
pub fn required_file_count(date_type: i32) -> TaxResult<usize> {
    match date_type {
        0 | 1 => Ok(6),
        2 => Ok(4),
        other => Err(TaxError::Validation(format!(
            "Invalid dateType: {other}. Must be 0, 1 or 2"
        ))),
    }
}

pub fn validate_period_params(date_source: i32, date_type: i32, year: i32) -> TaxResult<()> {
    if !matches!(date_source, 0 | 1) {
        return Err(TaxError::Validation(format!(
            "Invalid dateSource: {date_source}. Must be 0 or 1"
        )));
    }
    required_file_count(date_type)?;
    if !(MIN_YEAR..=MAX_YEAR).contains(&year) {
        return Err(TaxError::Validation(format!(
            "Invalid year: {year}. Must be between {MIN_YEAR} and {MAX_YEAR}"
        )));
    }
    Ok(())
}

fn has_spreadsheet_extension(filename: &str) -> bool {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| {
            SPREADSHEET_EXTENSIONS
                .iter()
                .any(|allowed| ext.eq_ignore_ascii_case(allowed))
        })
        .unwrap_or(false)
}

pub fn validate_upload(params: UploadParameters, files: &[FileUpload]) -> TaxResult<()> {
    validate_period_params(params.date_source, params.date_type, params.year)?;

    let expected = required_file_count(params.date_type)?;
    if files.len() != expected {
        return Err(TaxError::Validation(format!(
            "dateType {} requires exactly {expected} files, got {}",
            params.date_type,
            files.len()
        )));
    }

    for file in files {
        if file.filename.trim().is_empty() {
            return Err(TaxError::Validation("Every file needs a filename".into()));
        }
        if !has_spreadsheet_extension(&file.filename) {
            return Err(TaxError::Validation(format!(
                "Invalid file type: {}. Only .xls and .xlsx files are allowed",
                file.filename
            )));
        }
        if file.bytes.is_empty() {
            return Err(TaxError::Validation(format!("File {} is empty", file.filename)));
        }
    }
    Ok(())
}

/// Reads the month or quarter out of `dateTime`. Accepts a bare number
/// ("3") or a dated form whose last segment is the period ("2024-03").
pub fn parse_period(report_type: ReportType, date_time: &str) -> TaxResult<Option<i32>> {
    if report_type == ReportType::Annual {
        return Ok(None);
    }
    let raw = date_time.trim();
    let last = raw.rsplit(['-', '/']).next().unwrap_or(raw);
    let trimmed = last.trim_start_matches(['Q', 'q']);
    trimmed.parse::<i32>().map(Some).map_err(|_| {
        TaxError::Validation(format!(
            "Invalid dateTime {date_time:?} for {report_type} report"
        ))
    })
}

pub fn report_key_for(
    tax_number: &str,
    report_type: ReportType,
    year: i32,
    date_time: &str,
) -> TaxResult<ReportKey> {
    let period = parse_period(report_type, date_time)?;
    ReportKey::new(tax_number, report_type, year, period)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files(count: usize, name: &str) -> Vec<FileUpload> {
        (0..count)
            .map(|i| FileUpload {
                filename: format!("{i}-{name}"),
                content_type: None,
                bytes: vec![1, 2, 3],
            })
            .collect()
    }

    fn params(date_type: i32) -> UploadParameters {
        UploadParameters {
            date_source: 0,
            date_type,
            year: 2024,
        }
    }

    #[test]
    fn test_file_counts_per_date_type() {
        assert!(validate_upload(params(0), &files(6, "a.xlsx")).is_ok());
        assert!(validate_upload(params(1), &files(6, "a.xls")).is_ok());
        assert!(validate_upload(params(2), &files(4, "a.XLSX")).is_ok());

        assert!(validate_upload(params(0), &files(5, "a.xlsx")).is_err());
        assert!(validate_upload(params(1), &files(4, "a.xlsx")).is_err());
        assert!(validate_upload(params(2), &files(6, "a.xlsx")).is_err());
    }

    #[test]
    fn test_rejects_non_spreadsheets() {
        let mut set = files(4, "a.xlsx");
        set[2].filename = "statement.csv".into();
        let err = validate_upload(params(2), &set).unwrap_err();
        assert!(err.message().contains("statement.csv"));

        let mut set = files(4, "a.xlsx");
        set[0].filename = "noextension".into();
        assert!(validate_upload(params(2), &set).is_err());
    }

    #[test]
    fn test_rejects_empty_file() {
        let mut set = files(4, "a.xlsx");
        set[3].bytes.clear();
        assert!(validate_upload(params(2), &set).is_err());
    }

    #[test]
    fn test_period_param_ranges() {
        assert!(validate_period_params(1, 2, 2100).is_ok());
        assert!(validate_period_params(2, 0, 2024).is_err());
        assert!(validate_period_params(0, 3, 2024).is_err());
        assert!(validate_period_params(0, 0, 1999).is_err());
        assert!(validate_period_params(0, 0, 2101).is_err());
    }

    #[test]
    fn test_parse_period() {
        assert_eq!(parse_period(ReportType::Annual, "whatever").unwrap(), None);
        assert_eq!(parse_period(ReportType::Monthly, "3").unwrap(), Some(3));
        assert_eq!(parse_period(ReportType::Monthly, "2024-03").unwrap(), Some(3));
        assert_eq!(parse_period(ReportType::Quarterly, "Q2").unwrap(), Some(2));
        assert!(parse_period(ReportType::Monthly, "March").is_err());
    }

    #[test]
    fn test_report_key_range_checked() {
        assert!(report_key_for("9111", ReportType::Monthly, 2024, "13").is_err());
        assert!(report_key_for("9111", ReportType::Quarterly, 2024, "5").is_err());
        let key = report_key_for("9111", ReportType::Monthly, 2024, "3").unwrap();
        assert_eq!(key.month(), Some(3));
    }
}
