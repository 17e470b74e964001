use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use thiserror::Error;

use crate::memory::Account;
use crate::model::UserId;
use crate::replay::ReplayEvent;

/// Errors that can occur when parsing csv rows
#[derive(Debug, Error)]
pub enum CsvError {
    #[error("failed to open events file: {0}")]
    Open(csv::Error),

    #[error("line {line}: failed to parse row: {source}")]
    Parse { line: usize, source: csv::Error },

    #[error("line {line}: unrecognized event type '{event}'")]
    UnrecognizedType { line: usize, event: String },

    #[error("line {line}: {event} missing {field}")]
    MissingField {
        line: usize,
        event: &'static str,
        field: &'static str,
    },
}

#[derive(Debug, Deserialize)]
struct InputRow {
    r#type: String,
    #[serde(rename = "ref")]
    reference: Option<String>,
    user: Option<UserId>,
    amount: Option<i64>,
    method: Option<String>,
    code: Option<String>,
    group: Option<String>,
    status: Option<String>,
}

#[derive(Debug, Serialize)]
struct OutputRow<'a> {
    user: UserId,
    group: &'a str,
    quota: i64,
    rebate_quota: i64,
    topup_count: i64,
}

fn required<T>(
    value: Option<T>,
    line: usize,
    event: &'static str,
    field: &'static str,
) -> Result<T, CsvError> {
    value.ok_or(CsvError::MissingField { line, event, field })
}

impl InputRow {
    fn into_event(self, line: usize) -> Result<ReplayEvent, CsvError> {
        match self.r#type.as_str() {
            "user" => Ok(ReplayEvent::User {
                user: required(self.user, line, "user", "user")?,
                group: self.group.unwrap_or_else(|| "default".to_string()),
                code: self.code.unwrap_or_default(),
            }),
            "order" => Ok(ReplayEvent::Order {
                reference: required(self.reference, line, "order", "ref")?,
                user: required(self.user, line, "order", "user")?,
                amount: required(self.amount, line, "order", "amount")?,
                method: required(self.method, line, "order", "method")?,
                promo_code: self.code.unwrap_or_default(),
            }),
            "notify" => Ok(ReplayEvent::Notify {
                reference: required(self.reference, line, "notify", "ref")?,
                status: self.status,
            }),
            "force" => Ok(ReplayEvent::Force {
                reference: required(self.reference, line, "force", "ref")?,
            }),
            other => Err(CsvError::UnrecognizedType {
                line,
                event: other.to_string(),
            }),
        }
    }
}

/// Read replay events from a csv file
pub fn read_events(
    path: &Path,
) -> Result<impl Iterator<Item = Result<ReplayEvent, CsvError>> + use<>, CsvError> {
    let reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(CsvError::Open)?;

    Ok(reader
        .into_deserialize::<InputRow>()
        .enumerate()
        .map(|(idx, result)| {
            let line = idx + 2; // 1-indexed, skip header
            let row = result.map_err(|source| CsvError::Parse { line, source })?;
            row.into_event(line)
        }))
}

/// write accounts to stdout in csv format
pub fn write_accounts(accounts: &[Account]) -> Result<(), csv::Error> {
    let stdout = io::stdout();
    let mut writer = csv::Writer::from_writer(stdout.lock());

    for account in accounts {
        writer.serialize(OutputRow {
            user: account.id,
            group: &account.group,
            quota: account.quota,
            rebate_quota: account.rebate_quota,
            topup_count: account.topup_count,
        })?;
    }

    writer.flush()?;
    Ok(())
}
