//! Time-series sink for measurement records.
//!
//! Points are written to InfluxDB 1.x with second precision.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use influxdb::{Client, ReadQuery, Timestamp, WriteQuery};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use url::Url;

use super::error::Error;

/// One field value. Modem responses that parse as numbers become `Float`.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Float(f64),
    Text(String),
}

/// Field set of one point, keyed by label.
pub type Record = BTreeMap<String, FieldValue>;

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Point {
    pub measurement: String,
    #[serde(with = "time_format")]
    pub time: DateTime<Utc>,
    pub tags: BTreeMap<String, String>,
    pub fields: Record,
}

/// Destination of telemetry points.
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    /// Create the database if it does not exist yet.
    async fn ensure_database(&self, name: &str) -> Result<(), Error>;

    async fn write(&self, point: &Point) -> Result<(), Error>;
}

/// InfluxDB 1.x client.
pub struct InfluxSink {
    client: Client,
}

impl FieldValue {
    /// Coerce one response line: a finite float when it parses as one, the text otherwise.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().parse::<f64>() {
            Ok(v) if v.is_finite() => FieldValue::Float(v),
            _ => FieldValue::Text(raw.to_string()),
        }
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_string())
    }
}

impl Point {
    /// Create a point stamped with the current time truncated to seconds.
    pub fn new(measurement: &str, tags: &BTreeMap<String, String>, fields: Record) -> Self {
        Point {
            measurement: measurement.to_string(),
            time: Utc::now().trunc_subsecs(0),
            tags: tags.clone(),
            fields,
        }
    }

    /// Build the write query with second precision.
    ///
    /// Tags with empty values are omitted because InfluxDB rejects them.
    pub fn to_query(&self) -> WriteQuery {
        let mut query = WriteQuery::new(
            Timestamp::Seconds(self.time.timestamp().max(0) as u128),
            self.measurement.as_str(),
        );
        for (k, v) in self.tags.iter() {
            if v.is_empty() {
                continue;
            }
            query = query.add_tag(k.as_str(), v.as_str());
        }
        for (k, v) in self.fields.iter() {
            query = match v {
                FieldValue::Float(v) => query.add_field(k.as_str(), *v),
                FieldValue::Text(v) => query.add_field(k.as_str(), v.as_str()),
            };
        }
        query
    }
}

impl InfluxSink {
    /// `uri` is the server root such as `http://localhost:8086`; `db` is the target database.
    pub fn new(uri: &str, db: &str) -> Result<Self, Error> {
        if let Err(e) = Url::parse(uri) {
            return Err(Error::Config(format!("database URI {}: {}", uri, e)));
        }
        Ok(InfluxSink {
            client: Client::new(uri, db),
        })
    }
}

#[async_trait]
impl TelemetrySink for InfluxSink {
    async fn ensure_database(&self, name: &str) -> Result<(), Error> {
        const FN_NAME: &'static str = "InfluxSink::ensure_database";

        let name_quoted = name.replace('"', "\\\"");
        let query = ReadQuery::new(format!("CREATE DATABASE \"{}\"", name_quoted));
        if let Err(e) = self.client.query(query).await {
            return Err(Error::Database(e.to_string()));
        }
        info!("[{}] database {} ready", FN_NAME, name);
        Ok(())
    }

    async fn write(&self, point: &Point) -> Result<(), Error> {
        const FN_NAME: &'static str = "InfluxSink::write";

        debug!("[{}] {:?}", FN_NAME, point);
        if let Err(e) = self.client.query(point.to_query()).await {
            return Err(Error::TelemetryWriteFailed(e.to_string()));
        }
        Ok(())
    }
}

/// `YYYY-MM-DDTHH:MM:SSZ` representation of point times.
mod time_format {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer, de};

    const FORMAT: &'static str = "%Y-%m-%dT%H:%M:%SZ";

    pub fn serialize<S: Serializer>(time: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&time.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let s = String::deserialize(d)?;
        match NaiveDateTime::parse_from_str(&s, FORMAT) {
            Err(e) => Err(de::Error::custom(e)),
            Ok(t) => Ok(t.and_utc()),
        }
    }
}
