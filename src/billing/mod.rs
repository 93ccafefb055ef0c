//! Payment processors. Each one verifies and decodes its own webhook, then
//! funnels the external status through [`reconcile`] so every processor ends
//! up writing the same `{plan, status}` pair.

pub mod mercadopago;
pub mod rebill;
pub mod stripe;

use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

use crate::db::models::SubscriptionPatch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    Starter,
    Pro,
}

impl Plan {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starter => "starter",
            Self::Pro => "pro",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionStatus {
    Active,
    Canceled,
    PastDue,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Canceled => "canceled",
            Self::PastDue => "past_due",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Processor {
    Stripe,
    MercadoPago,
    Rebill,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Normalized {
    pub plan: Plan,
    pub status: SubscriptionStatus,
}

impl Normalized {
    const fn new(plan: Plan, status: SubscriptionStatus) -> Self {
        Self { plan, status }
    }

    pub fn patch(&self) -> SubscriptionPatch {
        SubscriptionPatch {
            plan: Some(self.plan.as_str().to_string()),
            status: Some(self.status.as_str().to_string()),
            ..SubscriptionPatch::default()
        }
    }
}

const PRO_ACTIVE: Normalized = Normalized::new(Plan::Pro, SubscriptionStatus::Active);
const PRO_PAST_DUE: Normalized = Normalized::new(Plan::Pro, SubscriptionStatus::PastDue);
const STARTER_ACTIVE: Normalized = Normalized::new(Plan::Starter, SubscriptionStatus::Active);
const STARTER_CANCELED: Normalized = Normalized::new(Plan::Starter, SubscriptionStatus::Canceled);

/// Map a processor's subscription status onto our plan and status.
pub fn reconcile(processor: Processor, external_status: &str) -> Normalized {
    match processor {
        Processor::Stripe => match external_status {
            "active" | "trialing" => PRO_ACTIVE,
            "past_due" => PRO_PAST_DUE,
            "canceled" | "unpaid" => STARTER_CANCELED,
            _ => PRO_ACTIVE,
        },
        Processor::MercadoPago => match external_status {
            "authorized" | "active" => PRO_ACTIVE,
            "cancelled" => STARTER_CANCELED,
            "paused" => PRO_PAST_DUE,
            _ => STARTER_ACTIVE,
        },
        Processor::Rebill => match external_status.to_lowercase().as_str() {
            "active" => PRO_ACTIVE,
            "cancelled" | "canceled" | "paused" | "finished" => STARTER_CANCELED,
            "defaulted" | "retrying" => PRO_PAST_DUE,
            _ => PRO_ACTIVE,
        },
    }
}

/// External references are our user ids; anything else is ignored.
pub fn parse_user_ref(raw: &str) -> Option<Uuid> {
    Uuid::parse_str(raw.trim()).ok()
}

pub(crate) fn from_unix(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}

pub(crate) fn from_rfc3339(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}
