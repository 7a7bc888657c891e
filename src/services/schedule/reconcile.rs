use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::db::models::{ScheduledStream, ScheduledStreamFields};
use crate::db::repository::ScheduledStreamRepository;
use crate::error::{AppError, AppResult};
use crate::services::schedule::RawScheduleEvent;

/// `(source id, start, streamer id)`: the identity of an occurrence across runs.
type OccurrenceKey = (String, DateTime<Utc>, String);

/// Changes needed to bring stored future occurrences in line with fetched events.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ReconcilePlan {
    /// `(stored id, new fields)`
    pub updates: Vec<(String, ScheduledStreamFields)>,
    pub inserts: Vec<ScheduledStreamFields>,
    /// Stored occurrences no source advertises anymore
    pub deletes: Vec<String>,
    /// Matched occurrences whose fields did not change
    pub unchanged: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub reset_deleted: u64,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub deleted: u64,
}

/// Stored occurrences reachable through either of their source ids.
///
/// Records live once in `records`; every index points into it, so a record
/// found through one key is the same record found through another.
struct StoredIndex<'a> {
    records: &'a [ScheduledStream],
    by_segment: HashMap<OccurrenceKey, usize>,
    by_calendar: HashMap<OccurrenceKey, usize>,
    /// Source id alone, for occurrences that moved or changed hands
    by_segment_id: HashMap<String, Vec<usize>>,
    by_calendar_id: HashMap<String, Vec<usize>>,
}

impl<'a> StoredIndex<'a> {
    fn new(records: &'a [ScheduledStream]) -> Self {
        let mut by_segment = HashMap::new();
        let mut by_calendar = HashMap::new();
        let mut by_segment_id: HashMap<String, Vec<usize>> = HashMap::new();
        let mut by_calendar_id: HashMap<String, Vec<usize>> = HashMap::new();

        for (index, record) in records.iter().enumerate() {
            if let Some(id) = &record.twitch_segment_id {
                by_segment
                    .entry((id.clone(), record.start_at, record.streamer_id.clone()))
                    .or_insert(index);
                by_segment_id.entry(id.clone()).or_default().push(index);
            }
            if let Some(id) = &record.calendar_event_id {
                by_calendar
                    .entry((id.clone(), record.start_at, record.streamer_id.clone()))
                    .or_insert(index);
                by_calendar_id.entry(id.clone()).or_default().push(index);
            }
        }

        StoredIndex {
            records,
            by_segment,
            by_calendar,
            by_segment_id,
            by_calendar_id,
        }
    }

    /// Full key, platform id first, calendar id as fallback.
    fn lookup(&self, event: &RawScheduleEvent) -> Option<usize> {
        let key = |id: &String| (id.clone(), event.start, event.streamer.id.clone());

        event
            .twitch_segment_id
            .as_ref()
            .and_then(|id| self.by_segment.get(&key(id)))
            .or_else(|| {
                event
                    .calendar_event_id
                    .as_ref()
                    .and_then(|id| self.by_calendar.get(&key(id)))
            })
            .copied()
    }

    /// First unclaimed record carrying one of the event's source ids, whatever
    /// its start time or streamer.
    fn lookup_by_source_id(&self, event: &RawScheduleEvent, claimed: &[bool]) -> Option<usize> {
        let unclaimed = |candidates: Option<&Vec<usize>>| {
            candidates.and_then(|indexes| indexes.iter().copied().find(|&i| !claimed[i]))
        };

        event
            .twitch_segment_id
            .as_ref()
            .and_then(|id| unclaimed(self.by_segment_id.get(id)))
            .or_else(|| {
                event
                    .calendar_event_id
                    .as_ref()
                    .and_then(|id| unclaimed(self.by_calendar_id.get(id)))
            })
    }
}

/// Compute the update/insert/delete plan. Pure; `stored` must hold only future records.
///
/// Events first claim the record with the same source id, start and streamer.
/// Events left over then claim an unclaimed record sharing a source id, which
/// covers rescheduled segments and calendar events credited to another
/// streamer. A record is claimed at most once; every record left unclaimed is
/// deleted, since no fetched event describes it anymore.
pub fn plan_changes(stored: &[ScheduledStream], events: &[RawScheduleEvent]) -> ReconcilePlan {
    let index = StoredIndex::new(stored);
    let mut claimed = vec![false; stored.len()];
    let mut plan = ReconcilePlan::default();

    let mut claim = |i: usize, fields: ScheduledStreamFields, claimed: &mut [bool]| {
        claimed[i] = true;
        let record = &index.records[i];
        if ScheduledStreamFields::from_stored(record) == fields {
            plan.unchanged += 1;
        } else {
            plan.updates.push((record.id.clone(), fields));
        }
    };

    let mut leftover = Vec::new();
    for event in events {
        match index.lookup(event) {
            Some(i) if !claimed[i] => claim(i, event.to_fields(), &mut claimed),
            _ => leftover.push(event),
        }
    }

    let mut inserts = Vec::new();
    for event in leftover {
        match index.lookup_by_source_id(event, &claimed) {
            Some(i) => claim(i, event.to_fields(), &mut claimed),
            None => inserts.push(event.to_fields()),
        }
    }
    plan.inserts = inserts;

    plan.deletes = stored
        .iter()
        .zip(&claimed)
        .filter(|(_, is_claimed)| !**is_claimed)
        .map(|(record, _)| record.id.clone())
        .collect();

    plan
}

/// Diff merged events against stored future occurrences and persist the result
/// in a single transaction. Nothing is written when any step fails.
pub async fn reconcile(
    pool: &SqlitePool,
    events: &[RawScheduleEvent],
    reset: bool,
    now: DateTime<Utc>,
) -> AppResult<ReconcileSummary> {
    let mut tx = pool.begin().await.map_err(AppError::Database)?;
    let mut summary = ReconcileSummary::default();

    if reset {
        summary.reset_deleted = ScheduledStreamRepository::delete_future(&mut tx, now).await?;
        tracing::info!("Removed {} existing scheduled streams", summary.reset_deleted);
    }

    let stored = ScheduledStreamRepository::list_future(&mut tx, now).await?;
    let plan = plan_changes(&stored, events);

    for (id, fields) in &plan.updates {
        ScheduledStreamRepository::update(&mut tx, id, fields).await?;
    }
    for fields in &plan.inserts {
        ScheduledStreamRepository::insert(&mut tx, fields).await?;
    }
    summary.deleted = ScheduledStreamRepository::delete_by_ids(&mut tx, &plan.deletes).await?;

    tx.commit().await.map_err(AppError::Database)?;

    summary.updated = plan.updates.len();
    summary.inserted = plan.inserts.len();
    summary.unchanged = plan.unchanged;
    Ok(summary)
}
