//! Filter trees of the filter nodes.
//!
//! The JSON form is `{"$and": [..]}`, `{"$or": [..]}` or
//! `{"$filter": {"funcName", "key", "parameter", "category"}}`. It is compiled once into a
//! [`Clause`] and evaluated against [`Record`]s, maps from lowercased field names to typed
//! [`FilterValue`]s. Coercions of the JSON parameter happen when a comparator runs; a value
//! that cannot be coerced makes the predicate false.

use std::{collections::BTreeMap, str::FromStr};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::error;

use crate::{
    channel_state::ChannelState,
    events::ChannelBalanceEvent,
    types::{ChannelSettings, Status, TagId},
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterClauses {
    #[serde(rename = "$and", default, skip_serializing_if = "Option::is_none")]
    pub and: Option<Vec<FilterClauses>>,
    #[serde(rename = "$or", default, skip_serializing_if = "Option::is_none")]
    pub or: Option<Vec<FilterClauses>>,
    #[serde(rename = "$filter", default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Filter>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Filter {
    pub func_name: String,
    pub key: String,
    #[serde(default)]
    pub parameter: Value,
    pub category: String,
}

impl FilterClauses {
    /// An unconfigured filter lets everything through.
    pub fn is_configured(&self) -> bool {
        self.filter
            .as_ref()
            .is_some_and(|filter| !filter.func_name.is_empty())
            || self.and.as_ref().is_some_and(|clauses| !clauses.is_empty())
            || self.or.as_ref().is_some_and(|clauses| !clauses.is_empty())
    }

    /// A `$filter` wins over `$and`, which wins over `$or`.
    pub fn compile(&self) -> Clause {
        if let Some(filter) = self.filter.as_ref().filter(|f| !f.func_name.is_empty()) {
            return Clause::Predicate(Predicate::new(filter));
        }
        if let Some(clauses) = &self.and {
            return Clause::And(clauses.iter().map(FilterClauses::compile).collect());
        }
        if let Some(clauses) = &self.or {
            return Clause::Or(clauses.iter().map(FilterClauses::compile).collect());
        }
        Clause::Empty
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Category {
    Number,
    String,
    Date,
    Boolean,
    Array,
    Duration,
    Enum,
    Tag,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "camelCase")]
pub enum Comparator {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    NotLike,
    Any,
    NotAny,
}

impl Category {
    fn supports(&self, comparator: Comparator) -> bool {
        let ordering = matches!(
            comparator,
            Comparator::Eq
                | Comparator::Neq
                | Comparator::Gt
                | Comparator::Gte
                | Comparator::Lt
                | Comparator::Lte
        );
        let equality = matches!(comparator, Comparator::Eq | Comparator::Neq);
        let like = matches!(comparator, Comparator::Like | Comparator::NotLike);
        let any = matches!(comparator, Comparator::Any | Comparator::NotAny);
        match self {
            Category::Number | Category::Duration | Category::Date => ordering,
            Category::String | Category::Enum => like,
            Category::Boolean => equality,
            Category::Array => equality || any,
            Category::Tag => any,
        }
    }
}

/// A field value of a filtered item.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Null,
    Number(f64),
    String(String),
    Date(DateTime<Utc>),
    Boolean(bool),
    Array(Vec<FilterValue>),
    /// Seconds
    Duration(f64),
    Enum(String),
    Tags(Vec<TagId>),
}

impl FilterValue {
    fn is_null(&self) -> bool {
        matches!(self, FilterValue::Null)
    }

    fn from_millis(millis: Option<u64>) -> Self {
        millis
            .and_then(|millis| DateTime::from_timestamp_millis(millis as i64))
            .map_or(FilterValue::Null, FilterValue::Date)
    }

    fn as_number(&self) -> Option<f64> {
        match self {
            FilterValue::Number(n) | FilterValue::Duration(n) => Some(*n),
            FilterValue::String(s) | FilterValue::Enum(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn as_text(&self) -> Option<String> {
        match self {
            FilterValue::String(s) | FilterValue::Enum(s) => Some(s.clone()),
            FilterValue::Number(n) | FilterValue::Duration(n) => Some(n.to_string()),
            FilterValue::Boolean(b) => Some(b.to_string()),
            _ => None,
        }
    }

    fn as_date(&self) -> Option<DateTime<Utc>> {
        match self {
            FilterValue::Date(date) => Some(*date),
            FilterValue::String(s) => parse_date(s),
            _ => None,
        }
    }

    /// Equality of an array element with a JSON element.
    fn matches_json(&self, other: &Value) -> bool {
        match (self, other) {
            (FilterValue::Number(n), other) => number_of(other) == Some(*n),
            (FilterValue::String(s) | FilterValue::Enum(s), Value::String(other)) => s == other,
            (FilterValue::Boolean(b), Value::Bool(other)) => b == other,
            _ => false,
        }
    }
}

pub type Record = BTreeMap<String, FilterValue>;

fn number_of(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(date) = DateTime::parse_from_rfc3339(s) {
        return Some(date.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|date| date.and_utc())
}

fn date_of(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_date(s),
        Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    }
}

fn tag_id_of(value: &Value) -> Option<TagId> {
    match value {
        Value::Object(object) => object
            .get("tagId")
            .or_else(|| object.get("value"))
            .and_then(tag_id_of),
        other => number_of(other).map(|n| n as TagId),
    }
}

/// Dates compare at minute granularity.
fn minute(date: DateTime<Utc>) -> i64 {
    date.timestamp().div_euclid(60)
}

fn order<T: PartialOrd>(comparator: Comparator, data: T, parameter: T) -> bool {
    match comparator {
        Comparator::Eq => data == parameter,
        Comparator::Neq => data != parameter,
        Comparator::Gt => data > parameter,
        Comparator::Gte => data >= parameter,
        Comparator::Lt => data < parameter,
        Comparator::Lte => data <= parameter,
        _ => false,
    }
}

/// Outcome when the data value, the parameter or both are null.
fn on_null(category: Category, comparator: Comparator, both: bool) -> bool {
    match (category, comparator) {
        (Category::Tag, Comparator::Any) => true,
        (Category::Tag, Comparator::NotAny) => false,
        (Category::Array, Comparator::Any | Comparator::NotAny) => both,
        (_, Comparator::Eq | Comparator::Gte | Comparator::Lte | Comparator::Like) => both,
        (_, Comparator::Neq | Comparator::NotLike) => !both,
        _ => false,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    key: String,
    category: String,
    func_name: String,
    parameter: Value,
}

impl Predicate {
    fn new(filter: &Filter) -> Self {
        Self {
            key: filter.key.to_lowercase(),
            category: filter.category.clone(),
            func_name: filter.func_name.clone(),
            parameter: filter.parameter.clone(),
        }
    }

    fn comparator(&self) -> Option<(Category, Comparator)> {
        let category = Category::from_str(&self.category).ok()?;
        let comparator = Comparator::from_str(&self.func_name).ok()?;
        category
            .supports(comparator)
            .then_some((category, comparator))
    }

    /// A record without the key passes.
    pub fn evaluate(&self, record: &Record) -> bool {
        let Some(data) = record.get(&self.key) else {
            return true;
        };
        let Some((category, comparator)) = self.comparator() else {
            error!(
                category = %self.category,
                func_name = %self.func_name,
                "unknown filter function, evaluating to false"
            );
            return false;
        };
        let (data_null, parameter_null) = (data.is_null(), self.parameter.is_null());
        if data_null || parameter_null {
            return on_null(category, comparator, data_null && parameter_null);
        }
        let result = match category {
            Category::Number | Category::Duration => data
                .as_number()
                .zip(number_of(&self.parameter))
                .map(|(data, parameter)| order(comparator, data, parameter)),
            Category::Date => data
                .as_date()
                .zip(date_of(&self.parameter))
                .map(|(data, parameter)| order(comparator, minute(data), minute(parameter))),
            Category::String | Category::Enum => {
                data.as_text()
                    .zip(text_of(&self.parameter))
                    .map(|(data, parameter)| {
                        let contains = data.to_lowercase().contains(&parameter.to_lowercase());
                        (comparator == Comparator::Like) == contains
                    })
            }
            Category::Boolean => match (data, &self.parameter) {
                (FilterValue::Boolean(data), Value::Bool(parameter)) => {
                    Some(order(comparator, data, parameter))
                }
                _ => None,
            },
            Category::Array => match (data, &self.parameter) {
                (FilterValue::Array(data), Value::Array(parameter)) => {
                    let contained =
                        |item: &FilterValue| parameter.iter().any(|p| item.matches_json(p));
                    Some(match comparator {
                        Comparator::Eq => data.iter().all(contained),
                        Comparator::Neq => !data.iter().all(contained),
                        Comparator::Any => data.iter().any(contained),
                        _ => !data.iter().any(contained),
                    })
                }
                _ => None,
            },
            Category::Tag => match (data, &self.parameter) {
                (FilterValue::Tags(data), Value::Array(parameter)) => parameter
                    .iter()
                    .map(tag_id_of)
                    .collect::<Option<Vec<_>>>()
                    .map(|tag_ids| {
                        let any = tag_ids.iter().any(|tag_id| data.contains(tag_id));
                        (comparator == Comparator::Any) == any
                    }),
                _ => None,
            },
        };
        result.unwrap_or_else(|| {
            error!(
                key = %self.key,
                %category,
                %comparator,
                "filter values cannot be compared, evaluating to false"
            );
            false
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    And(Vec<Clause>),
    Or(Vec<Clause>),
    Predicate(Predicate),
    /// Neither a predicate nor a group.
    Empty,
}

impl Clause {
    pub fn evaluate(&self, record: &Record) -> bool {
        match self {
            Clause::And(clauses) => clauses.iter().all(|clause| clause.evaluate(record)),
            Clause::Or(clauses) => clauses.iter().any(|clause| clause.evaluate(record)),
            Clause::Predicate(predicate) => predicate.evaluate(record),
            Clause::Empty => false,
        }
    }

    pub fn apply<'a>(&self, records: &'a [Record]) -> Vec<&'a Record> {
        records
            .iter()
            .filter(|record| self.evaluate(record))
            .collect()
    }
}

pub const CHANNEL_ID_KEY: &str = "channelid";

/// The channel id a record was built for.
pub fn record_channel_id(record: &Record) -> Option<u32> {
    match record.get(CHANNEL_ID_KEY) {
        Some(FilterValue::Number(n)) => Some(*n as u32),
        _ => None,
    }
}

pub fn channel_balance_event_record(event: &ChannelBalanceEvent) -> Record {
    BTreeMap::from([
        ("nodeid".to_string(), FilterValue::Number(event.node_id as f64)),
        (CHANNEL_ID_KEY.to_string(), FilterValue::Number(event.channel_id as f64)),
        ("source".to_string(), FilterValue::Enum(event.source.to_string())),
        ("inbound".to_string(), FilterValue::Boolean(event.inbound)),
        ("amountmsat".to_string(), FilterValue::Number(event.amount_msat as f64)),
        ("capacitymsat".to_string(), FilterValue::Number(event.capacity_msat as f64)),
        (
            "previouslocalbalancemsat".to_string(),
            FilterValue::Number(event.previous_local_balance_msat as f64),
        ),
        (
            "previousremotebalancemsat".to_string(),
            FilterValue::Number(event.previous_remote_balance_msat as f64),
        ),
        (
            "localbalancemsat".to_string(),
            FilterValue::Number(event.local_balance_msat as f64),
        ),
        (
            "remotebalancemsat".to_string(),
            FilterValue::Number(event.remote_balance_msat as f64),
        ),
        (
            "localbalancepermilli".to_string(),
            FilterValue::Number(event.local_balance_per_milli() as f64),
        ),
        ("timestamp".to_string(), FilterValue::from_millis(Some(event.timestamp))),
    ])
}

/// A channel as seen from one managed node.
pub fn channel_record(
    settings: &ChannelSettings,
    state: &ChannelState,
    tags: Vec<TagId>,
    peer_tags: Vec<TagId>,
) -> Record {
    let number = |n: u64| FilterValue::Number(n as f64);
    let gauge = if state.capacity_msat == 0 {
        0.0
    } else {
        state.local_balance_msat as f64 * 100.0 / state.capacity_msat as f64
    };
    let local = &state.local_routing_policy;
    let remote = &state.remote_routing_policy;
    BTreeMap::from([
        (CHANNEL_ID_KEY.to_string(), number(settings.channel_id as u64)),
        ("nodeid".to_string(), number(state.node_id as u64)),
        ("peernodeid".to_string(), number(state.remote_node_id as u64)),
        (
            "shortchannelid".to_string(),
            settings
                .short_channel_id
                .map_or(FilterValue::Null, |scid| FilterValue::String(scid.to_string())),
        ),
        (
            "channelpoint".to_string(),
            settings
                .channel_point
                .as_ref()
                .map_or(FilterValue::Null, |point| FilterValue::String(point.to_string())),
        ),
        ("status".to_string(), FilterValue::Enum(settings.status.to_string())),
        ("active".to_string(), FilterValue::Boolean(state.status == Status::Active)),
        ("private".to_string(), FilterValue::Boolean(settings.private)),
        ("initiator".to_string(), FilterValue::Boolean(state.initiator)),
        ("capacity".to_string(), number(settings.capacity_sat)),
        ("localbalance".to_string(), number(state.local_balance_msat / 1000)),
        ("remotebalance".to_string(), number(state.remote_balance_msat / 1000)),
        ("gauge".to_string(), FilterValue::Number(gauge)),
        (
            "unsettledbalance".to_string(),
            number(state.unsettled_balance_msat / 1000),
        ),
        (
            "pendingincominghtlccount".to_string(),
            number(state.pending_incoming_htlc_count as u64),
        ),
        (
            "pendingoutgoinghtlccount".to_string(),
            number(state.pending_outgoing_htlc_count as u64),
        ),
        ("feebase".to_string(), number(local.fee_base_msat)),
        ("feeratemillimsat".to_string(), number(local.fee_rate_milli_msat)),
        ("timelockdelta".to_string(), number(local.time_lock_delta as u64)),
        ("minhtlcmsat".to_string(), number(local.min_htlc_msat)),
        ("maxhtlcmsat".to_string(), number(local.max_htlc_msat)),
        ("disabled".to_string(), FilterValue::Boolean(local.disabled)),
        ("remotefeebase".to_string(), number(remote.fee_base_msat)),
        (
            "remotefeeratemillimsat".to_string(),
            number(remote.fee_rate_milli_msat),
        ),
        ("remotedisabled".to_string(), FilterValue::Boolean(remote.disabled)),
        (
            "fundingblockheight".to_string(),
            settings
                .funding_block_height
                .map_or(FilterValue::Null, |height| number(height as u64)),
        ),
        ("fundedon".to_string(), FilterValue::from_millis(settings.funded_on)),
        ("lifetime".to_string(), FilterValue::Duration(state.lifetime as f64)),
        ("tags".to_string(), FilterValue::Tags(tags)),
        ("peertags".to_string(), FilterValue::Tags(peer_tags)),
    ])
}
