//! Index queries
//!
//! A query names one index of a model and constrains its fields. Leading
//! equality and `In` conditions narrow the scanned key prefixes, the first
//! range condition bounds the iterator, and everything else is checked
//! against each decoded key.

use std::ops::Bound;

use chrono::NaiveDate;

use crate::topic::Topic;
use crate::value::Value;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Order {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operator {
    Eq(Value),
    Neq(Value),
    In(Vec<Value>),
    Range { from: Bound<Value>, to: Bound<Value> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub field: String,
    pub op: Operator,
}

/// Inclusive calendar interval restricting partitioned models.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateInterval {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateInterval {
    pub fn new(from: NaiveDate, to: NaiveDate) -> Self {
        Self { from, to }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.from <= date && date <= self.to
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexQuery {
    pub index: String,
    pub topics: Vec<Topic>,
    pub conditions: Vec<Condition>,
    pub interval: Option<DateInterval>,
    pub order: Order,
    pub offset: usize,
    /// Zero means unlimited.
    pub limit: usize,
}

impl IndexQuery {
    pub fn new(index: &str, topic: impl Into<Topic>) -> Self {
        Self {
            index: index.to_string(),
            topics: vec![topic.into()],
            conditions: Vec::new(),
            interval: None,
            order: Order::Asc,
            offset: 0,
            limit: 0,
        }
    }

    pub fn topic(mut self, topic: impl Into<Topic>) -> Self {
        let topic = topic.into();
        if !self.topics.contains(&topic) {
            self.topics.push(topic);
        }
        self
    }

    pub fn condition(mut self, field: &str, op: Operator) -> Self {
        self.conditions.push(Condition {
            field: field.to_string(),
            op,
        });
        self
    }

    pub fn eq(self, field: &str, value: impl Into<Value>) -> Self {
        self.condition(field, Operator::Eq(value.into()))
    }

    pub fn neq(self, field: &str, value: impl Into<Value>) -> Self {
        self.condition(field, Operator::Neq(value.into()))
    }

    pub fn in_values(self, field: &str, values: Vec<Value>) -> Self {
        self.condition(field, Operator::In(values))
    }

    pub fn gt(self, field: &str, value: impl Into<Value>) -> Self {
        self.range(field, Bound::Excluded(value.into()), Bound::Unbounded)
    }

    pub fn gte(self, field: &str, value: impl Into<Value>) -> Self {
        self.range(field, Bound::Included(value.into()), Bound::Unbounded)
    }

    pub fn lt(self, field: &str, value: impl Into<Value>) -> Self {
        self.range(field, Bound::Unbounded, Bound::Excluded(value.into()))
    }

    pub fn lte(self, field: &str, value: impl Into<Value>) -> Self {
        self.range(field, Bound::Unbounded, Bound::Included(value.into()))
    }

    /// Both ends included.
    pub fn between(self, field: &str, from: impl Into<Value>, to: impl Into<Value>) -> Self {
        self.range(field, Bound::Included(from.into()), Bound::Included(to.into()))
    }

    pub fn range(self, field: &str, from: Bound<Value>, to: Bound<Value>) -> Self {
        self.condition(field, Operator::Range { from, to })
    }

    pub fn interval(mut self, from: NaiveDate, to: NaiveDate) -> Self {
        self.interval = Some(DateInterval::new(from, to));
        self
    }

    pub fn order(mut self, order: Order) -> Self {
        self.order = order;
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Number of leading results any single source has to produce.
    pub fn window(&self) -> Option<usize> {
        if self.limit == 0 {
            None
        } else {
            Some(self.offset.saturating_add(self.limit))
        }
    }
}
