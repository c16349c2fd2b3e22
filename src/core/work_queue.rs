//! 基于租约的任务队列
//!
//! 按插入顺序选择第一个可领取的条目（queued，或 claimed 但租约已过期）；
//! 领取即设置 claimed + lease_until = now + lease + 领取者。过期的租约不改状态，
//! 仅在选择时视为可重新领取，类似消息队列的 visibility timeout。

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::ToolError;

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkStatus {
    Queued,
    Claimed,
    Done,
}

impl WorkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkStatus::Queued => "queued",
            WorkStatus::Claimed => "claimed",
            WorkStatus::Done => "done",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkItem {
    pub id: String,
    pub kind: String,
    pub payload: Value,
    pub status: WorkStatus,
    pub lease_until: Option<DateTime<Utc>>,
    pub claimed_by: Option<String>,
    pub result: Option<Value>,
}

impl WorkItem {
    fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.lease_until.map_or(true, |until| now > until)
    }

    fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            WorkStatus::Queued => true,
            WorkStatus::Claimed => self.lease_expired(now),
            WorkStatus::Done => false,
        }
    }

    fn take_lease(&mut self, claimant: &str, until: DateTime<Utc>) {
        self.status = WorkStatus::Claimed;
        self.lease_until = Some(until);
        self.claimed_by = Some(claimant.to_string());
    }
}

/// at + secs；秒数超出 i64 或结果超出可表示时间范围时返回 InvalidArgs
fn offset(at: DateTime<Utc>, secs: u64, arg: &str) -> Result<DateTime<Utc>, ToolError> {
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .and_then(|d| at.checked_add_signed(d))
        .ok_or_else(|| ToolError::InvalidArgs(format!("{arg} out of range: {secs}")))
}

/// 队首摘要
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrontSummary {
    pub id: String,
    pub kind: String,
    pub payload: Value,
    pub status: WorkStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueStatus {
    pub length: usize,
    pub front: Option<FrontSummary>,
    pub counts: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Default)]
pub struct WorkQueue {
    items: Vec<WorkItem>,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn new_id() -> String {
        uuid::Uuid::new_v4().simple().to_string()[..10].to_string()
    }

    /// 入队；payload 不是对象时按空对象处理
    pub fn enqueue(&mut self, kind: &str, payload: Value) -> Result<String, ToolError> {
        let kind = kind.trim();
        if kind.is_empty() {
            return Err(ToolError::InvalidArgs("missing kind".to_string()));
        }
        let payload = if payload.is_object() {
            payload
        } else {
            Value::Object(Default::default())
        };
        let id = Self::new_id();
        self.items.push(WorkItem {
            id: id.clone(),
            kind: kind.to_string(),
            payload,
            status: WorkStatus::Queued,
            lease_until: None,
            claimed_by: None,
            result: None,
        });
        tracing::debug!(id = %id, kind = %kind, "work item enqueued");
        Ok(id)
    }

    /// 领取第一个可领取的条目；没有可领取的返回 None
    pub fn next(
        &mut self,
        lease_secs: u64,
        now: DateTime<Utc>,
        claimant: &str,
    ) -> Result<Option<WorkItem>, ToolError> {
        let until = offset(now, lease_secs, "lease_sec")?;
        let Some(item) = self.items.iter_mut().find(|i| i.is_eligible(now)) else {
            return Ok(None);
        };
        item.take_lease(claimant, until);
        Ok(Some(item.clone()))
    }

    /// 领取指定条目；他人持有未过期租约时返回 LeaseConflict。
    /// 同一领取者重复领取视为不冲突，租约按本次 lease 重新计时。
    pub fn claim(
        &mut self,
        id: &str,
        lease_secs: u64,
        now: DateTime<Utc>,
        claimant: &str,
    ) -> Result<WorkItem, ToolError> {
        let until = offset(now, lease_secs, "lease_sec")?;
        let item = self.find_mut(id)?;
        match item.status {
            WorkStatus::Done => return Err(ToolError::AlreadyDone(id.to_string())),
            WorkStatus::Claimed
                if !item.lease_expired(now)
                    && item.claimed_by.as_deref().map_or(false, |c| c != claimant) =>
            {
                return Err(ToolError::LeaseConflict(id.to_string()));
            }
            _ => {}
        }
        item.take_lease(claimant, until);
        Ok(item.clone())
    }

    /// 在原到期时间上延长租约；非持有者返回 NotOwner，已过期返回 Expired
    pub fn extend(
        &mut self,
        id: &str,
        extra_secs: u64,
        now: DateTime<Utc>,
        claimant: &str,
    ) -> Result<WorkItem, ToolError> {
        let item = self.find_mut(id)?;
        if item.claimed_by.as_deref().map_or(false, |c| c != claimant) {
            return Err(ToolError::NotOwner(id.to_string()));
        }
        match item.lease_until {
            Some(until) if item.status == WorkStatus::Claimed && now <= until => {
                item.lease_until = Some(offset(until, extra_secs, "extend_sec")?);
                Ok(item.clone())
            }
            _ => Err(ToolError::Expired(id.to_string())),
        }
    }

    pub fn complete(&mut self, id: &str, result: Option<Value>) -> Result<WorkItem, ToolError> {
        let item = self.find_mut(id)?;
        item.status = WorkStatus::Done;
        item.lease_until = None;
        item.result = result;
        Ok(item.clone())
    }

    pub fn status(&self) -> QueueStatus {
        let mut counts = BTreeMap::new();
        for item in &self.items {
            *counts.entry(item.status.as_str().to_string()).or_insert(0) += 1;
        }
        QueueStatus {
            length: self.items.len(),
            front: self.items.first().map(|i| FrontSummary {
                id: i.id.clone(),
                kind: i.kind.clone(),
                payload: i.payload.clone(),
                status: i.status,
            }),
            counts,
        }
    }

    pub fn get(&self, id: &str) -> Option<&WorkItem> {
        self.items.iter().find(|i| i.id == id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn find_mut(&mut self, id: &str) -> Result<&mut WorkItem, ToolError> {
        self.items
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| ToolError::NotFound(format!("work item {id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn queue_with(n: usize) -> (WorkQueue, Vec<String>) {
        let mut q = WorkQueue::new();
        let ids = (0..n)
            .map(|i| q.enqueue(&format!("job{i}"), json!({"n": i})).unwrap())
            .collect();
        (q, ids)
    }

    #[test]
    fn test_next_claims_in_insertion_order() {
        let (mut q, ids) = queue_with(3);
        let item = q.next(180, t0(), "Grok").unwrap().unwrap();
        assert_eq!(item.id, ids[0]);
        assert_eq!(item.claimed_by.as_deref(), Some("Grok"));

        let status = q.status();
        assert_eq!(status.length, 3);
        assert_eq!(status.counts.get("queued"), Some(&2));
        assert_eq!(status.counts.get("claimed"), Some(&1));
        assert_eq!(status.front.unwrap().id, ids[0]);

        assert_eq!(q.next(180, t0(), "Claude").unwrap().unwrap().id, ids[1]);
    }

    #[test]
    fn test_expired_lease_is_reclaimable() {
        let (mut q, ids) = queue_with(1);
        let now = t0();
        q.next(10, now, "Grok").unwrap().unwrap();
        assert!(q.next(10, now + Duration::seconds(10), "Claude").unwrap().is_none());

        let later = now + Duration::seconds(11);
        let item = q.next(10, later, "Claude").unwrap().unwrap();
        assert_eq!(item.id, ids[0]);
        assert_eq!(item.claimed_by.as_deref(), Some("Claude"));
    }

    #[test]
    fn test_claim_conflicts_with_unexpired_foreign_lease() {
        let (mut q, ids) = queue_with(1);
        let now = t0();
        q.claim(&ids[0], 60, now, "Grok").unwrap();
        let err = q.claim(&ids[0], 60, now + Duration::seconds(5), "Claude").unwrap_err();
        assert_eq!(err, ToolError::LeaseConflict(ids[0].clone()));
        assert_eq!(err.code(), 423);

        // 同一领取者重复领取不冲突
        let again = q.claim(&ids[0], 60, now + Duration::seconds(5), "Grok").unwrap();
        assert_eq!(again.lease_until, Some(now + Duration::seconds(65)));

        // 过期后他人可领取
        let stolen = q.claim(&ids[0], 60, now + Duration::seconds(100), "Claude").unwrap();
        assert_eq!(stolen.claimed_by.as_deref(), Some("Claude"));
    }

    #[test]
    fn test_claim_unknown_id_is_not_found() {
        let (mut q, _) = queue_with(1);
        let err = q.claim("nope", 60, t0(), "Grok").unwrap_err();
        assert_eq!(err.code(), 404);
    }

    #[test]
    fn test_extend_rules() {
        let (mut q, ids) = queue_with(2);
        let now = t0();
        q.claim(&ids[0], 60, now, "Grok").unwrap();

        let err = q.extend(&ids[0], 30, now, "Claude").unwrap_err();
        assert_eq!(err, ToolError::NotOwner(ids[0].clone()));

        let item = q.extend(&ids[0], 30, now + Duration::seconds(10), "Grok").unwrap();
        assert_eq!(item.lease_until, Some(now + Duration::seconds(90)));

        let err = q.extend(&ids[0], 30, now + Duration::seconds(91), "Grok").unwrap_err();
        assert_eq!(err, ToolError::Expired(ids[0].clone()));

        // 从未领取的条目无租约可延长
        assert_eq!(
            q.extend(&ids[1], 30, now, "Grok").unwrap_err(),
            ToolError::Expired(ids[1].clone())
        );
    }

    #[test]
    fn test_oversized_lease_is_rejected_without_state_change() {
        let (mut q, ids) = queue_with(1);
        let now = t0();
        for secs in [10_000_000_000_000, u64::MAX] {
            let err = q.next(secs, now, "Grok").unwrap_err();
            assert_eq!(err.code(), 400);
            assert!(q.claim(&ids[0], secs, now, "Grok").is_err());
        }
        assert_eq!(q.get(&ids[0]).unwrap().status, WorkStatus::Queued);

        q.claim(&ids[0], 60, now, "Grok").unwrap();
        let err = q.extend(&ids[0], i64::MAX as u64, now, "Grok").unwrap_err();
        assert!(matches!(err, ToolError::InvalidArgs(_)));
        assert_eq!(q.get(&ids[0]).unwrap().lease_until, Some(now + Duration::seconds(60)));
    }

    #[test]
    fn test_completed_item_never_returned_again() {
        let (mut q, ids) = queue_with(2);
        let now = t0();
        let first = q.next(1, now, "Grok").unwrap().unwrap();
        q.complete(&first.id, Some(json!({"ok": true}))).unwrap();

        let far = now + Duration::days(1);
        assert_eq!(q.next(1, far, "Claude").unwrap().unwrap().id, ids[1]);
        assert!(q.next(1, far, "Gemini").unwrap().is_none());
        assert_eq!(q.get(&ids[0]).unwrap().status, WorkStatus::Done);
        assert_eq!(q.get(&ids[0]).unwrap().result, Some(json!({"ok": true})));
        assert!(matches!(q.claim(&ids[0], 1, far, "x"), Err(ToolError::AlreadyDone(_))));
    }

    #[test]
    fn test_enqueue_rejects_empty_kind_and_normalises_payload() {
        let mut q = WorkQueue::new();
        assert!(q.enqueue("  ", json!({})).is_err());
        let id = q.enqueue("scan_docs", json!([1, 2])).unwrap();
        assert_eq!(id.len(), 10);
        assert_eq!(q.get(&id).unwrap().payload, json!({}));
    }
}
