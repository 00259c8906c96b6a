use std::time::Duration;

use async_trait::async_trait;
use chrono::{Datelike, Local, NaiveDateTime, NaiveTime, TimeDelta, Weekday};
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use crate::{
    Result, TrigflowError,
    model::NodeModel,
    runtime::{RunContext, TriggerContext, TriggerSender},
    triggers::{ResourceHandle, TriggerAdapter},
};

const EVENT_TYPE: &str = "timer";

/// When a timer fires next.
#[derive(Debug, Clone, PartialEq)]
pub enum Schedule {
    Interval(Duration),
    /// midnight on the first of the next month
    Monthly,
    /// `at` on any of `days`, local time
    SpecificTime {
        at: NaiveTime,
        days: Vec<Weekday>,
    },
}

impl Schedule {
    pub fn from_params(params: &Map<String, Value>) -> Result<Self> {
        let text = |key: &str| params.get(key).and_then(Value::as_str).unwrap_or_default();

        match params.get("scheduleType").and_then(Value::as_str).unwrap_or("Interval") {
            "Interval" => {
                let minutes = match text("schedule") {
                    "Every Minute" => 1,
                    "Every 5 Minutes" => 5,
                    "Every 15 Minutes" => 15,
                    "Every 30 Minutes" => 30,
                    "Hourly" => 60,
                    "Daily" => 24 * 60,
                    "Weekly" => 7 * 24 * 60,
                    "Monthly" => return Ok(Schedule::Monthly),
                    other => return Err(TrigflowError::Trigger(format!("Invalid schedule: {other}"))),
                };
                Ok(Schedule::Interval(Duration::from_secs(minutes * 60)))
            }
            "Specific Time" => {
                let at = NaiveTime::parse_from_str(text("specificTime"), "%H:%M")
                    .map_err(|_| TrigflowError::Trigger(format!("Invalid specificTime: {}", text("specificTime"))))?;
                let days: Vec<Weekday> = params
                    .get("specificDays")
                    .and_then(Value::as_array)
                    .map(|days| days.iter().filter_map(Value::as_str).filter_map(|d| d.parse().ok()).collect())
                    .unwrap_or_default();
                if days.is_empty() {
                    return Err(TrigflowError::Trigger("Specific Time schedule needs at least one day".to_string()));
                }
                Ok(Schedule::SpecificTime {
                    at,
                    days,
                })
            }
            other => Err(TrigflowError::Trigger(format!("Invalid scheduleType: {other}"))),
        }
    }

    /// Wait from `now` (local wall clock) until the next firing.
    pub fn next_delay(
        &self,
        now: NaiveDateTime,
    ) -> Duration {
        let millis = match self {
            Schedule::Interval(d) => return *d,
            Schedule::Monthly => {
                let (year, month) = if now.month() == 12 { (now.year() + 1, 1) } else { (now.year(), now.month() + 1) };
                chrono::NaiveDate::from_ymd_opt(year, month, 1)
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
                    .map(|next| (next - now).num_milliseconds())
                    .unwrap_or_else(|| TimeDelta::days(31).num_milliseconds())
            }
            Schedule::SpecificTime {
                at,
                days,
            } => {
                let mut target = now.date().and_time(*at);
                if target <= now {
                    target += TimeDelta::days(1);
                }
                for _ in 0..7 {
                    if days.contains(&target.weekday()) {
                        break;
                    }
                    target += TimeDelta::days(1);
                }
                (target - now).num_milliseconds()
            }
        };
        Duration::from_millis(millis.max(0) as u64)
    }
}

/// `trigger-timer`: fires on an interval or at a wall-clock time.
pub struct TimerTrigger;

async fn fire(
    sender: &TriggerSender,
    node_id: &str,
) -> Result<()> {
    sender
        .fire(json!({
            "type": EVENT_TYPE,
            "nodeId": node_id,
            "timestamp": chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        }))
        .await
}

#[async_trait]
impl TriggerAdapter for TimerTrigger {
    fn name(&self) -> &str {
        "trigger-timer"
    }

    async fn setup(
        &self,
        ctx: &TriggerContext,
        node: &NodeModel,
    ) -> Result<Option<ResourceHandle>> {
        if node.parameters.is_empty() {
            return Err(TrigflowError::Trigger("Timer trigger node is missing parameters".to_string()));
        }
        let schedule = Schedule::from_params(&node.parameters)?;
        let fire_on_start = node.parameters.get("fireOnStart").and_then(Value::as_str) == Some("Yes");

        let sender = ctx.sender();
        let node_id = node.id.clone();
        let workflow_id = ctx.workflow_id().to_string();
        info!(workflow_id, node_id, ?schedule, fire_on_start, "timer trigger set up");

        let task = ctx.runtime().spawn(async move {
            if fire_on_start {
                if let Err(e) = fire(&sender, &node_id).await {
                    warn!(workflow_id, node_id, error = %e, "timer could not fire");
                    return;
                }
            }
            loop {
                let wait = schedule.next_delay(Local::now().naive_local());
                debug!(workflow_id, node_id, wait_ms = wait.as_millis() as u64, "timer scheduled");
                tokio::time::sleep(wait).await;
                if let Err(e) = fire(&sender, &node_id).await {
                    warn!(workflow_id, node_id, error = %e, "timer could not fire");
                    break;
                }
            }
        });

        Ok(Some(ResourceHandle::from_task(format!("timer:{}", node.id), task)))
    }

    fn validate(
        &self,
        event: &Value,
        node: &NodeModel,
    ) -> bool {
        event.get("type").and_then(Value::as_str) == Some(EVENT_TYPE) && event.get("nodeId").and_then(Value::as_str) == Some(node.id.as_str())
    }

    async fn process(
        &self,
        event: &Value,
        _ctx: &RunContext,
    ) -> Result<Value> {
        Ok(json!({ "timestamp": event.get("timestamp").cloned().unwrap_or(Value::Null) }))
    }
}
