//! Recurring transaction templates.

use super::NewSplit;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type ScheduleId = i64;

/// Days ahead of an occurrence at which it gets posted, unless overridden.
pub const DEFAULT_CREATE_DAYS_BEFORE: u32 = 30;

/// How often a schedule recurs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleFrequency {
    Weekly,
    #[default]
    Monthly,
    Quarterly,
    Annually,
}

impl ScheduleFrequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Quarterly => "quarterly",
            Self::Annually => "annually",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "weekly" => Some(Self::Weekly),
            "monthly" => Some(Self::Monthly),
            "quarterly" => Some(Self::Quarterly),
            "annually" => Some(Self::Annually),
            _ => None,
        }
    }
}

/// Where in each period an occurrence falls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleRule {
    /// Same offset into the period as the start date, clamped to the period end.
    NthDay,
    Begin,
    #[default]
    End,
    /// Month and day of the start date. Annual schedules only.
    Date,
}

impl ScheduleRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NthDay => "nth_day",
            Self::Begin => "begin",
            Self::End => "end",
            Self::Date => "date",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "nth_day" => Some(Self::NthDay),
            "begin" => Some(Self::Begin),
            "end" => Some(Self::End),
            "date" => Some(Self::Date),
            _ => None,
        }
    }
}

/// A stored schedule. `next_post_date` is the next occurrence not yet posted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledTransaction {
    pub scheduled_transaction_id: ScheduleId,
    pub tenant_id: Uuid,
    pub frequency: ScheduleFrequency,
    pub rule: ScheduleRule,
    pub start_date: NaiveDate,
    pub last_post_date: Option<NaiveDate>,
    pub next_post_date: NaiveDate,
    pub create_n_days_before: u32,
    pub description: Option<String>,
    pub split_templates: Vec<NewSplit>,
}

/// Input for creating a schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSchedule {
    #[serde(default)]
    pub frequency: ScheduleFrequency,
    #[serde(default)]
    pub rule: ScheduleRule,
    pub start_date: NaiveDate,
    #[serde(default = "default_create_days_before")]
    pub create_n_days_before: u32,
    pub description: Option<String>,
    pub split_templates: Vec<NewSplit>,
}

fn default_create_days_before() -> u32 {
    DEFAULT_CREATE_DAYS_BEFORE
}

impl NewSchedule {
    pub fn new(start_date: NaiveDate, description: impl Into<String>) -> Self {
        Self {
            frequency: ScheduleFrequency::default(),
            rule: ScheduleRule::default(),
            start_date,
            create_n_days_before: DEFAULT_CREATE_DAYS_BEFORE,
            description: Some(description.into()),
            split_templates: Vec::new(),
        }
    }

    pub fn every(mut self, frequency: ScheduleFrequency, rule: ScheduleRule) -> Self {
        self.frequency = frequency;
        self.rule = rule;
        self
    }

    pub fn days_before(mut self, days: u32) -> Self {
        self.create_n_days_before = days;
        self
    }

    pub fn split(mut self, split: NewSplit) -> Self {
        self.split_templates.push(split);
        self
    }
}
