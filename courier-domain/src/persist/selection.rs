//! 清扫候选选择规则
//!
//! 内存实现直接调用；Postgres 实现以等价的 SQL 表达同一规则。
//!
use crate::inbox::InboxMessage;
use crate::outbox::OutboxMessage;
use crate::status::MessageStatus;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::time::Duration;

/// 参与清扫选择的行
pub(crate) trait SweepRow {
    fn row_id(&self) -> &str;
    fn status(&self) -> MessageStatus;
    fn retry_count(&self) -> u32;
    fn next_retry_time(&self) -> DateTime<Utc>;
    fn created_date(&self) -> DateTime<Utc>;
    fn partition(&self) -> Option<&str>;
}

/// 行当前是否可以被认领
pub(crate) fn is_due<R: SweepRow>(row: &R, now: DateTime<Utc>, max_retry_count: u32) -> bool {
    row.status().is_claimable()
        && row.next_retry_time() <= now
        && row.retry_count() <= max_retry_count
}

pub(crate) fn is_dead_letter<R: SweepRow>(row: &R, max_retry_count: u32) -> bool {
    row.status() == MessageStatus::Failed && row.retry_count() > max_retry_count
}

/// 选出本轮可认领的行
///
/// - 无分区的行彼此独立；
/// - 同分区按创建时间排队：遇到处理中或尚未到期的行，该分区其后的行本轮不再返回；
/// - 死信不阻塞所在分区。
pub(crate) fn select_candidates<'a, R, I>(
    rows: I,
    now: DateTime<Utc>,
    limit: usize,
    max_retry_count: u32,
) -> Vec<&'a R>
where
    R: SweepRow + 'a,
    I: IntoIterator<Item = &'a R>,
{
    let mut pending: Vec<&R> = rows
        .into_iter()
        .filter(|r| r.status() != MessageStatus::Processed)
        .collect();
    pending.sort_by(|a, b| {
        (a.partition(), a.created_date(), a.row_id()).cmp(&(
            b.partition(),
            b.created_date(),
            b.row_id(),
        ))
    });

    let mut blocked: HashSet<&str> = HashSet::new();
    let mut out = Vec::new();

    for row in pending {
        if out.len() >= limit {
            break;
        }
        if is_dead_letter(row, max_retry_count) {
            continue;
        }
        let due = is_due(row, now, max_retry_count);
        match row.partition() {
            Some(p) if blocked.contains(p) => continue,
            Some(p) if !due => {
                blocked.insert(p);
            }
            _ if due => out.push(row),
            _ => {}
        }
    }

    out
}

/// 同分区内是否还有排在 `row` 之前、未处理完且不是死信的行
///
/// 立即发送据此让出分区队首；无分区的行恒为 `false`。
pub(crate) fn has_pending_predecessor<'a, R, I>(rows: I, row: &R, max_retry_count: u32) -> bool
where
    R: SweepRow + 'a,
    I: IntoIterator<Item = &'a R>,
{
    let Some(partition) = row.partition() else {
        return false;
    };
    let key = (row.created_date(), row.row_id());
    rows.into_iter().any(|p| {
        p.partition() == Some(partition)
            && (p.created_date(), p.row_id()) < key
            && p.status() != MessageStatus::Processed
            && !is_dead_letter(p, max_retry_count)
    })
}

/// 超时判定的截止时间：`last_updated_date` 早于它的处理中行视为被遗弃
pub(crate) fn stale_before(now: DateTime<Utc>, processing_timeout: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(processing_timeout)
        .ok()
        .and_then(|d| now.checked_sub_signed(d))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

impl SweepRow for OutboxMessage {
    fn row_id(&self) -> &str {
        self.id()
    }
    fn status(&self) -> MessageStatus {
        self.send_status()
    }
    fn retry_count(&self) -> u32 {
        OutboxMessage::retry_count(self)
    }
    fn next_retry_time(&self) -> DateTime<Utc> {
        OutboxMessage::next_retry_time(self)
    }
    fn created_date(&self) -> DateTime<Utc> {
        OutboxMessage::created_date(self)
    }
    fn partition(&self) -> Option<&str> {
        self.sub_queue_prefix()
    }
}

impl SweepRow for InboxMessage {
    fn row_id(&self) -> &str {
        self.id()
    }
    fn status(&self) -> MessageStatus {
        self.consume_status()
    }
    fn retry_count(&self) -> u32 {
        InboxMessage::retry_count(self)
    }
    fn next_retry_time(&self) -> DateTime<Utc> {
        InboxMessage::next_retry_time(self)
    }
    fn created_date(&self) -> DateTime<Utc> {
        InboxMessage::created_date(self)
    }
    fn partition(&self) -> Option<&str> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[derive(Debug)]
    struct Row {
        id: &'static str,
        status: MessageStatus,
        retry: u32,
        next: DateTime<Utc>,
        created: DateTime<Utc>,
        partition: Option<&'static str>,
    }

    impl SweepRow for Row {
        fn row_id(&self) -> &str {
            self.id
        }
        fn status(&self) -> MessageStatus {
            self.status
        }
        fn retry_count(&self) -> u32 {
            self.retry
        }
        fn next_retry_time(&self) -> DateTime<Utc> {
            self.next
        }
        fn created_date(&self) -> DateTime<Utc> {
            self.created
        }
        fn partition(&self) -> Option<&str> {
            self.partition
        }
    }

    fn row(id: &'static str, status: MessageStatus, offset_secs: i64, p: Option<&'static str>, now: DateTime<Utc>) -> Row {
        Row {
            id,
            status,
            retry: 0,
            next: now - Duration::seconds(1),
            created: now + Duration::seconds(offset_secs),
            partition: p,
        }
    }

    #[test]
    fn partition_order_and_blocking() {
        let now = Utc::now();
        let mut waiting = row("a1", MessageStatus::Failed, -10, Some("a"), now);
        waiting.retry = 1;
        waiting.next = now + Duration::seconds(30);
        let rows = vec![
            row("b2", MessageStatus::New, -5, Some("b"), now),
            row("b1", MessageStatus::New, -8, Some("b"), now),
            waiting,
            row("a2", MessageStatus::New, -9, Some("a"), now),
            row("c1", MessageStatus::Processing, -7, Some("c"), now),
            row("c2", MessageStatus::New, -6, Some("c"), now),
            row("x", MessageStatus::New, -1, None, now),
            row("done", MessageStatus::Processed, -20, Some("b"), now),
        ];

        let ids: Vec<&str> = select_candidates(&rows, now, 10, 3)
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["x", "b1", "b2"]);
    }

    #[test]
    fn dead_letters_do_not_block_and_limit_applies() {
        let now = Utc::now();
        let mut dead = row("d1", MessageStatus::Failed, -10, Some("d"), now);
        dead.retry = 4;
        let rows = vec![
            dead,
            row("d2", MessageStatus::New, -9, Some("d"), now),
            row("d3", MessageStatus::New, -8, Some("d"), now),
        ];
        let ids: Vec<&str> = select_candidates(&rows, now, 1, 3)
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["d2"]);
    }

    #[test]
    fn predecessor_check_skips_processed_and_dead_rows() {
        let now = Utc::now();
        let mut dead = row("a0", MessageStatus::Failed, -30, Some("a"), now);
        dead.retry = 4;
        let mut rows = vec![
            dead,
            row("a1", MessageStatus::Processed, -20, Some("a"), now),
            row("b1", MessageStatus::New, -15, Some("b"), now),
        ];
        let incoming = row("a9", MessageStatus::New, 0, Some("a"), now);
        assert!(!has_pending_predecessor(&rows, &incoming, 3));

        let mut waiting = row("a2", MessageStatus::Failed, -10, Some("a"), now);
        waiting.retry = 1;
        waiting.next = now + Duration::seconds(60);
        rows.push(waiting);
        assert!(has_pending_predecessor(&rows, &incoming, 3));

        // 排在它之后的行不算
        let early = row("a00", MessageStatus::New, -40, Some("a"), now);
        assert!(!has_pending_predecessor(&rows, &early, 3));

        let free = row("x", MessageStatus::New, 0, None, now);
        assert!(!has_pending_predecessor(&rows, &free, 3));
    }

    #[test]
    fn stale_cutoff_is_now_minus_timeout() {
        let now = Utc::now();
        let cutoff = stale_before(now, std::time::Duration::from_secs(300));
        assert_eq!(now - cutoff, Duration::seconds(300));
    }
}
