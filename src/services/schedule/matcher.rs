use regex::Regex;

use crate::db::models::Streamer;
use crate::services::calendar::CalendarEvent;
use crate::services::schedule::aliases::AliasGenerator;
use crate::services::schedule::{Candidate, RawScheduleEvent, StreamerRef};

lazy_static::lazy_static! {
    static ref TWITCH_CHANNEL_LINK: Regex =
        Regex::new(r"https?://(?:www\.)?twitch\.tv/(?P<twitch_login>[a-zA-Z0-9_]{4,25})")
            .expect("valid regex");
}

/// The channel link in the event location names the streamer.
pub const WEIGHT_LOCATION_LINK: u32 = 100;
/// The summary starts with one of the streamer's aliases.
pub const WEIGHT_SUMMARY_PREFIX: u32 = 50;
/// The summary mentions one of the streamer's aliases.
pub const WEIGHT_SUMMARY_CONTAINS: u32 = 10;

/// Associates calendar events with roster streamers by name.
pub struct StreamerMatcher {
    streamers: Vec<StreamerRef>,
    /// `(alias, index in streamers)`, longest alias first, then lexicographic,
    /// then roster order. An alias shared by several streamers belongs to the
    /// first one in roster order.
    aliases: Vec<(String, usize)>,
}

impl StreamerMatcher {
    pub fn new(streamers: &[Streamer], generator: &AliasGenerator) -> Self {
        let refs: Vec<StreamerRef> = streamers.iter().map(StreamerRef::from).collect();

        let mut aliases: Vec<(String, usize)> = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for (index, streamer) in streamers.iter().enumerate() {
            for alias in generator.generate(&streamer.name, &streamer.twitch_login) {
                if seen.insert(alias.clone()) {
                    aliases.push((alias, index));
                }
            }
        }
        aliases.sort_by(|(a, ai), (b, bi)| {
            b.chars()
                .count()
                .cmp(&a.chars().count())
                .then_with(|| a.cmp(b))
                .then_with(|| ai.cmp(bi))
        });

        StreamerMatcher {
            streamers: refs,
            aliases,
        }
    }

    /// Ranked candidates for a calendar event, highest weight first.
    ///
    /// Also returns the names found in the summary, in the order they were
    /// matched, for title cleanup.
    pub fn candidates(&self, event: &CalendarEvent) -> (Vec<Candidate>, Vec<String>) {
        let mut candidates: Vec<Candidate> = Vec::new();
        let mut names_in_summary: Vec<String> = Vec::new();
        let summary = event.summary.as_str();

        if let Some(login) = event
            .location
            .as_deref()
            .and_then(|l| TWITCH_CHANNEL_LINK.captures(l))
            .and_then(|c| c.name("twitch_login"))
            .map(|m| m.as_str())
        {
            if let Some(streamer) = self
                .streamers
                .iter()
                .find(|s| s.login.eq_ignore_ascii_case(login))
            {
                candidates.push(Candidate {
                    streamer: streamer.clone(),
                    weight: WEIGHT_LOCATION_LINK,
                });
                names_in_summary.push(streamer.name.clone());
                names_in_summary.push(streamer.login.clone());
            }
        }

        for (alias, index) in &self.aliases {
            if summary.starts_with(alias.as_str()) {
                add_candidate(&mut candidates, &self.streamers[*index], WEIGHT_SUMMARY_PREFIX);
                names_in_summary.push(alias.clone());
            }
        }

        if let Some((alias, index)) = self
            .aliases
            .iter()
            .find(|(alias, _)| summary.contains(alias.as_str()))
        {
            add_candidate(&mut candidates, &self.streamers[*index], WEIGHT_SUMMARY_CONTAINS);
            names_in_summary.push(alias.clone());
        }

        // Stable: equal weights keep their discovery order
        candidates.sort_by(|a, b| b.weight.cmp(&a.weight));

        (candidates, names_in_summary)
    }

    /// Resolve a calendar event into a schedule event carrying its candidates.
    /// `None` when no streamer matches.
    pub fn resolve(&self, event: &CalendarEvent) -> Option<RawScheduleEvent> {
        let (candidates, names_in_summary) = self.candidates(event);
        let winner = candidates.first()?.streamer.clone();

        Some(RawScheduleEvent {
            streamer: winner,
            title: clean_title(&event.summary, &names_in_summary),
            start: event.start,
            end: event.end,
            category: None,
            weekly: event.recurring_event_id.is_some(),
            twitch_segment_id: None,
            calendar_event_id: Some(event.id.clone()),
            candidate_streamers: Some(candidates),
        })
    }

    /// Resolve every calendar event, logging and dropping those without any match.
    pub fn resolve_all(&self, events: &[CalendarEvent]) -> Vec<RawScheduleEvent> {
        let mut resolved = Vec::with_capacity(events.len());
        for event in events {
            match self.resolve(event) {
                Some(e) => resolved.push(e),
                None => tracing::warn!(
                    "Unable to extract streamer from calendar event \"{}\" ({}): ignored",
                    event.summary,
                    event.id
                ),
            }
        }
        resolved
    }
}

fn add_candidate(candidates: &mut Vec<Candidate>, streamer: &StreamerRef, weight: u32) {
    if !candidates.iter().any(|c| c.streamer.id == streamer.id) {
        candidates.push(Candidate {
            streamer: streamer.clone(),
            weight,
        });
    }
}

/// Drop a leading streamer name followed by a separator (`Alice / Physics` becomes
/// `Physics`). The first name that matches wins; the summary is kept as is when
/// nothing would remain.
pub fn clean_title(summary: &str, names: &[String]) -> String {
    for name in names {
        let pattern = format!(r"^{}\s{{0,3}}[/:–—-]", regex::escape(name));
        let Ok(re) = Regex::new(&pattern) else {
            continue;
        };
        if let Some(m) = re.find(summary) {
            let rest = summary[m.end()..].trim();
            if rest.is_empty() {
                return summary.trim().to_string();
            }
            return rest.to_string();
        }
    }
    summary.trim().to_string()
}
