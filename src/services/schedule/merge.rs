use std::collections::HashMap;

use crate::services::schedule::RawScheduleEvent;

/// Merge calendar events into the platform events describing the same occurrence.
///
/// A calendar event is folded into the first overlapping platform event of its
/// best-ranked candidate streamer that has one; the platform event keeps its
/// fields and gains the calendar id. Calendar events without such a partner are
/// kept as standalone events. Candidate lists are dropped from the output.
pub fn merge_events(
    platform_events: Vec<RawScheduleEvent>,
    calendar_events: Vec<RawScheduleEvent>,
) -> Vec<RawScheduleEvent> {
    let mut merged = platform_events;

    let mut by_streamer: HashMap<String, Vec<usize>> = HashMap::new();
    for (index, event) in merged.iter().enumerate() {
        by_streamer
            .entry(event.streamer.id.clone())
            .or_default()
            .push(index);
    }

    let mut standalone = Vec::new();
    for mut calendar_event in calendar_events {
        let candidates = calendar_event.candidate_streamers.take().unwrap_or_default();

        let partner = candidates.iter().find_map(|candidate| {
            by_streamer
                .get(&candidate.streamer.id)?
                .iter()
                .copied()
                .find(|&i| merged[i].overlaps(&calendar_event))
        });

        match partner {
            Some(index) => {
                tracing::debug!(
                    "Calendar event {:?} merged into segment {:?} of {}",
                    calendar_event.calendar_event_id,
                    merged[index].twitch_segment_id,
                    merged[index].streamer.login
                );
                merged[index].calendar_event_id = calendar_event.calendar_event_id;
            }
            None => standalone.push(calendar_event),
        }
    }

    merged.extend(standalone);
    for event in merged.iter_mut() {
        event.candidate_streamers = None;
    }
    merged
}
