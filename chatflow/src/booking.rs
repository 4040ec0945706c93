//! Booking API client.
//!
//! One call matters to the bot: look a contact up by phone number together
//! with their booked lessons.
//!
//! ```text
//! GET {api_url}/api/users?phone=<digits>&withLessons=true
//!   → { "user": { "name": ... } | null, "lessons": [ { "date": ..., "startTime": ... } ] }
//! ```

use chatflow_common::{BookingConfig, Error, Result};
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

/// Registered user as returned by the booking API.
#[derive(Debug, Clone, Deserialize)]
pub struct BookingUser {
    #[serde(default)]
    pub name: Option<String>,
    /// Fields the bot does not use
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// One booked lesson.
#[derive(Debug, Clone, Deserialize)]
pub struct Lesson {
    /// ISO date, ISO datetime, or Unix millis
    #[serde(default)]
    pub date: serde_json::Value,
    #[serde(default, rename = "startTime")]
    pub start_time: Option<String>,
}

/// Raw lookup response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserLookup {
    #[serde(default)]
    pub user: Option<BookingUser>,
    #[serde(default)]
    pub lessons: Option<Vec<Lesson>>,
}

/// The four business outcomes of a lookup.
#[derive(Debug)]
pub enum BookingOutcome {
    /// The API could not be reached or answered with an error
    Unavailable(Error),
    /// No user with this phone number
    NotRegistered,
    /// Registered, nothing booked
    NoLessons(BookingUser),
    /// Registered with booked lessons
    Lessons(BookingUser, Vec<Lesson>),
}

impl BookingOutcome {
    pub fn classify(result: Result<UserLookup>) -> Self {
        match result {
            Err(e) => Self::Unavailable(e),
            Ok(UserLookup { user: None, .. }) => Self::NotRegistered,
            Ok(UserLookup {
                user: Some(user),
                lessons,
            }) => match lessons {
                Some(lessons) if !lessons.is_empty() => Self::Lessons(user, lessons),
                _ => Self::NoLessons(user),
            },
        }
    }
}

/// HTTP client for the booking API.
pub struct BookingClient {
    client: Client,
    api_url: Option<String>,
}

impl BookingClient {
    pub fn new(config: &BookingConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            api_url: config
                .api_url
                .as_ref()
                .map(|u| u.trim_end_matches('/').to_string()),
        }
    }

    /// Client pointed at `api_url`, default timeouts.
    pub fn with_url(api_url: impl Into<String>) -> Self {
        Self::new(&BookingConfig {
            api_url: Some(api_url.into()),
            ..BookingConfig::default()
        })
    }

    /// Look up a contact and their lessons.
    pub async fn lookup(&self, phone: &str) -> Result<UserLookup> {
        let Some(api_url) = &self.api_url else {
            return Err(Error::Adapter("booking API URL is not configured".into()));
        };

        let url = format!("{api_url}/api/users");
        let resp = self
            .client
            .get(&url)
            .query(&[("phone", phone), ("withLessons", "true")])
            .send()
            .await
            .map_err(|e| Error::Adapter(format!("booking API unreachable: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Adapter(format!(
                "booking API error ({status}): {body}"
            )));
        }

        resp.json::<UserLookup>()
            .await
            .map_err(|e| Error::Adapter(format!("invalid booking API response: {e}")))
    }
}

/// Render a lesson date as `M/D/YYYY`. Unparseable dates are shown as sent.
pub fn format_lesson_date(date: &serde_json::Value) -> String {
    let parsed: Option<DateTime<Utc>> = match date {
        serde_json::Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        serde_json::Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|d| d.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                    .ok()
                    .map(|d| d.and_utc())
            })
            .or_else(|| {
                NaiveDate::parse_from_str(s, "%Y-%m-%d")
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
                    .map(|d| d.and_utc())
            }),
        _ => None,
    };

    match parsed {
        Some(d) => format!("{}/{}/{}", d.month(), d.day(), d.year()),
        None => match date {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Null => "TBD".to_string(),
            other => other.to_string(),
        },
    }
}

/// Render the booked-lessons message.
pub fn format_lessons(user: &BookingUser, lessons: &[Lesson]) -> String {
    let formatted = lessons
        .iter()
        .map(|lesson| {
            format!(
                "*Date: {}\n   Hour: {}",
                format_lesson_date(&lesson.date),
                lesson
                    .start_time
                    .as_deref()
                    .filter(|t| !t.is_empty())
                    .unwrap_or("TBD")
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    let name = user.name.as_deref().unwrap_or("there");
    format!("📚 *Hi {name} \n Your booked lessons:*\n\n{formatted}")
}
