use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;

use crate::core::error::{TaxError, TaxResult};

pub const SUCCESS_STATUS: i64 = 200;

/// Validated `{status, msg, data}` reply.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteEnvelope {
    pub status: i64,
    pub msg: String,
    pub data: Value,
}

impl RemoteEnvelope {
    /// Parses a response body. Empty bodies, non-JSON bodies and bodies
    /// without a numeric `status` are malformed.
    pub fn parse(body: &str) -> TaxResult<Self> {
        if body.trim().is_empty() {
            return Err(TaxError::MalformedResponse(
                "Empty response received from API".into(),
            ));
        }
        let value: Value = serde_json::from_str(body).map_err(|e| {
            TaxError::MalformedResponse(format!("Invalid JSON response from API: {e}"))
        })?;
        let Value::Object(mut fields) = value else {
            return Err(TaxError::MalformedResponse(
                "Response is not a JSON object".into(),
            ));
        };

        let status = match fields.get("status") {
            Some(Value::Number(n)) => n.as_i64(),
            Some(Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        }
        .ok_or_else(|| TaxError::MalformedResponse("Response has no status field".into()))?;

        let msg = match fields.remove("msg") {
            Some(Value::String(s)) => s,
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };

        Ok(Self {
            status,
            msg,
            data: fields.remove("data").unwrap_or(Value::Null),
        })
    }

    /// Rejects any status other than 200 with the remote message.
    pub fn into_success(self, fallback: &str) -> TaxResult<Self> {
        if self.status == SUCCESS_STATUS {
            Ok(self)
        } else if self.msg.is_empty() {
            Err(TaxError::RemoteRejected(fallback.to_string()))
        } else {
            Err(TaxError::RemoteRejected(self.msg))
        }
    }
}

/// Accepts RFC 3339 as well as the remote's offset-less
/// `YYYY-MM-DDTHH:MM:SS[.fff]` form, which is taken as UTC.
pub fn parse_expiration_time(raw: &str) -> TaxResult<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    let naive = raw.split('+').next().unwrap_or(raw).trim_end_matches('Z');
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(naive, fmt).ok())
        .map(|dt| dt.and_utc())
        .ok_or_else(|| {
            TaxError::MalformedResponse(format!("Unrecognized expirationTime: {raw}"))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_parse_success_envelope() {
        let env = RemoteEnvelope::parse(r#"{"status":200,"msg":"ok","data":{"a":1}}"#).unwrap();
        assert_eq!(env.status, 200);
        assert_eq!(env.msg, "ok");
        assert_eq!(env.data["a"], 1);
    }

    #[test]
    fn test_status_as_string() {
        let env = RemoteEnvelope::parse(r#"{"status":"200"}"#).unwrap();
        assert_eq!(env.status, 200);
        assert_eq!(env.data, Value::Null);
    }

    #[test]
    fn test_malformed_bodies() {
        for body in ["", "   ", "<html>", "[1,2]", r#"{"msg":"no status"}"#] {
            let err = RemoteEnvelope::parse(body).unwrap_err();
            assert!(matches!(err, TaxError::MalformedResponse(_)), "{body}");
        }
    }

    #[test]
    fn test_non_200_is_rejected_with_remote_message() {
        let env = RemoteEnvelope::parse(r#"{"status":500,"msg":"taxpayer locked"}"#).unwrap();
        match env.into_success("Query failed") {
            Err(TaxError::RemoteRejected(msg)) => assert_eq!(msg, "taxpayer locked"),
            other => panic!("unexpected {other:?}"),
        }

        let env = RemoteEnvelope::parse(r#"{"status":401}"#).unwrap();
        match env.into_success("Query failed") {
            Err(TaxError::RemoteRejected(msg)) => assert_eq!(msg, "Query failed"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_expiration_time_formats() {
        let a = parse_expiration_time("2030-01-02T03:04:05.123+08:00").unwrap();
        assert_eq!(a.hour(), 19);
        assert_eq!(a.day(), 1);

        let b = parse_expiration_time("2030-01-02T03:04:05").unwrap();
        assert_eq!((b.day(), b.hour(), b.minute(), b.second()), (2, 3, 4, 5));

        let c = parse_expiration_time("2030-01-02T03:04:05.5").unwrap();
        assert_eq!(c.hour(), 3);

        assert!(parse_expiration_time("tomorrow").is_err());
    }
}
