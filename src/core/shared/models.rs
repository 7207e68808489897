use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::core::error::{TaxError, TaxResult};

pub use super::schema;

pub use super::schema::{channels, company_info, company_reports, report_transactions, users};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    #[serde(rename = "level_1")]
    Level1,
    #[serde(rename = "level_2")]
    Level2,
    Admin,
    TopLevelAdmin,
    System,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Level1 => "level_1",
            Self::Level2 => "level_2",
            Self::Admin => "admin",
            Self::TopLevelAdmin => "top_level_admin",
            Self::System => "system",
        }
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserRole {
    type Err = TaxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "level_1" => Ok(Self::Level1),
            "level_2" => Ok(Self::Level2),
            "admin" => Ok(Self::Admin),
            "top_level_admin" => Ok(Self::TopLevelAdmin),
            "system" => Ok(Self::System),
            other => Err(TaxError::Validation(format!("Unknown role: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReportType {
    #[default]
    Annual,
    Monthly,
    Quarterly,
}

impl ReportType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Annual => "annual",
            Self::Monthly => "monthly",
            Self::Quarterly => "quarterly",
        }
    }
}

impl fmt::Display for ReportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportType {
    type Err = TaxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "annual" => Ok(Self::Annual),
            "monthly" => Ok(Self::Monthly),
            "quarterly" => Ok(Self::Quarterly),
            other => Err(TaxError::Validation(format!(
                "Invalid report type: {other}. Expected annual, monthly or quarterly"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Upload,
    Download,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upload => "upload",
            Self::Download => "download",
        }
    }
}

/// Natural key of a stored report. `period` is the month for monthly
/// reports, the quarter for quarterly ones and 0 for annual reports.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReportKey {
    pub tax_number: String,
    pub report_type: ReportType,
    pub year: i32,
    pub period: i32,
}

impl ReportKey {
    pub fn new(
        tax_number: impl Into<String>,
        report_type: ReportType,
        year: i32,
        period: Option<i32>,
    ) -> TaxResult<Self> {
        let tax_number = tax_number.into();
        if tax_number.trim().is_empty() {
            return Err(TaxError::Validation("Tax number is required".into()));
        }
        let period = match report_type {
            ReportType::Annual => 0,
            ReportType::Monthly => match period {
                Some(m) if (1..=12).contains(&m) => m,
                _ => {
                    return Err(TaxError::Validation(
                        "Invalid month for monthly report".into(),
                    ))
                }
            },
            ReportType::Quarterly => match period {
                Some(q) if (1..=4).contains(&q) => q,
                _ => {
                    return Err(TaxError::Validation(
                        "Invalid quarter for quarterly report".into(),
                    ))
                }
            },
        };
        Ok(Self {
            tax_number,
            report_type,
            year,
            period,
        })
    }

    pub fn month(&self) -> Option<i32> {
        (self.report_type == ReportType::Monthly).then_some(self.period)
    }

    pub fn quarter(&self) -> Option<i32> {
        (self.report_type == ReportType::Quarterly).then_some(self.period)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Identifiable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: i32,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub role: String,
    pub is_admin: bool,
    pub is_top_level_admin: bool,
    pub first_level_channel_id: Option<i32>,
    pub channel_id: Option<i32>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn role(&self) -> Option<UserRole> {
        self.role.parse().ok()
    }

    pub fn has_role(&self, role: UserRole) -> bool {
        self.role == role.as_str()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub role: String,
    pub is_admin: bool,
    pub is_top_level_admin: bool,
    pub first_level_channel_id: Option<i32>,
    pub channel_id: Option<i32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, AsChangeset)]
#[diesel(table_name = users)]
pub struct UserChanges {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password_hash: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub role: Option<String>,
    pub is_admin: Option<bool>,
    pub is_top_level_admin: Option<bool>,
    pub first_level_channel_id: Option<i32>,
    pub channel_id: Option<i32>,
}

impl UserChanges {
    /// Diesel refuses to build an UPDATE without columns.
    pub fn is_empty(&self) -> bool {
        self.username.is_none()
            && self.email.is_none()
            && self.password_hash.is_none()
            && self.first_name.is_none()
            && self.last_name.is_none()
            && self.role.is_none()
            && self.is_admin.is_none()
            && self.is_top_level_admin.is_none()
            && self.first_level_channel_id.is_none()
            && self.channel_id.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Identifiable)]
#[diesel(table_name = channels)]
pub struct Channel {
    pub id: i32,
    pub channel_number: String,
    pub channel_name: String,
    pub channel_location: Option<String>,
    pub industry: Option<String>,
    pub contact_person: Option<String>,
    pub contact_number: Option<String>,
    pub email: Option<String>,
    pub website: Option<String>,
    pub app: Option<String>,
    pub official_account: Option<String>,
    pub douyin_account: Option<String>,
    pub balance: BigDecimal,
    pub admin_user_id: Option<i32>,
    pub registration_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Insertable)]
#[diesel(table_name = channels)]
pub struct NewChannel {
    pub channel_number: String,
    pub channel_name: String,
    pub channel_location: Option<String>,
    pub industry: Option<String>,
    pub contact_person: Option<String>,
    pub contact_number: Option<String>,
    pub email: Option<String>,
    pub website: Option<String>,
    pub app: Option<String>,
    pub official_account: Option<String>,
    pub douyin_account: Option<String>,
    #[serde(default)]
    pub balance: BigDecimal,
    pub admin_user_id: Option<i32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, AsChangeset)]
#[diesel(table_name = channels)]
pub struct ChannelChanges {
    pub channel_number: Option<String>,
    pub channel_name: Option<String>,
    pub channel_location: Option<String>,
    pub industry: Option<String>,
    pub contact_person: Option<String>,
    pub contact_number: Option<String>,
    pub email: Option<String>,
    pub website: Option<String>,
    pub app: Option<String>,
    pub official_account: Option<String>,
    pub douyin_account: Option<String>,
    pub admin_user_id: Option<i32>,
}

impl ChannelChanges {
    pub fn is_empty(&self) -> bool {
        self.channel_number.is_none()
            && self.channel_name.is_none()
            && self.channel_location.is_none()
            && self.industry.is_none()
            && self.contact_person.is_none()
            && self.contact_number.is_none()
            && self.email.is_none()
            && self.website.is_none()
            && self.app.is_none()
            && self.official_account.is_none()
            && self.douyin_account.is_none()
            && self.admin_user_id.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Identifiable)]
#[diesel(table_name = company_info)]
pub struct CompanyInfo {
    pub id: i32,
    pub company_name: String,
    pub tax_number: String,
    pub industry: Option<String>,
    pub registration_type: Option<String>,
    pub taxpayer_nature: Option<String>,
    pub index_standard_type: Option<String>,
    pub uploaded_files: serde_json::Value,
    pub upload_params: Option<serde_json::Value>,
    pub user_id: i32,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Insertable)]
#[diesel(table_name = company_info)]
pub struct NewCompanyInfo {
    pub company_name: String,
    pub tax_number: String,
    pub industry: Option<String>,
    pub registration_type: Option<String>,
    pub taxpayer_nature: Option<String>,
    pub index_standard_type: Option<String>,
    pub uploaded_files: serde_json::Value,
    pub upload_params: Option<serde_json::Value>,
    pub user_id: i32,
    pub status: String,
}

impl NewCompanyInfo {
    /// Stand-in row for a tax number that has reports but no upload yet.
    pub fn placeholder(tax_number: &str, user_id: i32) -> Self {
        Self {
            company_name: format!("Company {tax_number}"),
            tax_number: tax_number.to_string(),
            industry: None,
            registration_type: None,
            taxpayer_nature: None,
            index_standard_type: None,
            uploaded_files: serde_json::Value::Array(Vec::new()),
            upload_params: None,
            user_id,
            status: "placeholder".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Identifiable)]
#[diesel(table_name = company_reports)]
pub struct CompanyReport {
    pub id: i32,
    pub user_id: i32,
    pub company_tax_number: String,
    pub report_type: String,
    pub year: i32,
    pub month: Option<i32>,
    pub quarter: Option<i32>,
    #[serde(skip_serializing)]
    pub period: i32,
    pub report_data: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = company_reports)]
pub struct NewCompanyReport {
    pub user_id: i32,
    pub company_tax_number: String,
    pub report_type: String,
    pub year: i32,
    pub month: Option<i32>,
    pub quarter: Option<i32>,
    pub period: i32,
    pub report_data: serde_json::Value,
}

impl NewCompanyReport {
    pub fn from_key(key: &ReportKey, report_data: serde_json::Value, user_id: i32) -> Self {
        Self {
            user_id,
            company_tax_number: key.tax_number.clone(),
            report_type: key.report_type.as_str().to_string(),
            year: key.year,
            month: key.month(),
            quarter: key.quarter(),
            period: key.period,
            report_data,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Identifiable)]
#[diesel(table_name = report_transactions)]
pub struct ReportTransaction {
    pub id: i32,
    pub user_id: i32,
    pub channel_id: i32,
    pub report_id: Option<i32>,
    pub transaction_type: String,
    pub cost: BigDecimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = report_transactions)]
pub struct NewReportTransaction {
    pub user_id: i32,
    pub channel_id: i32,
    pub report_id: Option<i32>,
    pub transaction_type: String,
    pub cost: BigDecimal,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionStats {
    pub total_uploads: i64,
    pub total_downloads: i64,
    pub total_cost: BigDecimal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_key_period_rules() {
        let annual = ReportKey::new("9111", ReportType::Annual, 2024, Some(7)).unwrap();
        assert_eq!(annual.period, 0);
        assert_eq!(annual.month(), None);
        assert_eq!(annual.quarter(), None);

        let monthly = ReportKey::new("9111", ReportType::Monthly, 2024, Some(3)).unwrap();
        assert_eq!(monthly.month(), Some(3));
        assert_eq!(monthly.quarter(), None);

        let quarterly = ReportKey::new("9111", ReportType::Quarterly, 2024, Some(4)).unwrap();
        assert_eq!(quarterly.quarter(), Some(4));
    }

    #[test]
    fn test_report_key_rejects_out_of_range_period() {
        assert!(ReportKey::new("9111", ReportType::Monthly, 2024, None).is_err());
        assert!(ReportKey::new("9111", ReportType::Monthly, 2024, Some(13)).is_err());
        assert!(ReportKey::new("9111", ReportType::Quarterly, 2024, Some(0)).is_err());
        assert!(ReportKey::new("9111", ReportType::Quarterly, 2024, Some(5)).is_err());
        assert!(ReportKey::new(" ", ReportType::Annual, 2024, None).is_err());
    }

    #[test]
    fn test_role_round_trip_strings() {
        for role in [
            UserRole::Level1,
            UserRole::Level2,
            UserRole::Admin,
            UserRole::TopLevelAdmin,
            UserRole::System,
        ] {
            assert_eq!(role.as_str().parse::<UserRole>().unwrap(), role);
        }
        assert!("root".parse::<UserRole>().is_err());
    }

    #[test]
    fn test_report_type_serde_names() {
        let parsed: ReportType = serde_json::from_str("\"quarterly\"").unwrap();
        assert_eq!(parsed, ReportType::Quarterly);
        assert_eq!(ReportType::default(), ReportType::Annual);
    }
}
