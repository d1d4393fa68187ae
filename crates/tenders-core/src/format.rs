//! Derived view construction: EAT localization, schedule status, text shortening.

use chrono::{DateTime, FixedOffset, TimeDelta, Utc};

use crate::dates::{eat, parse_date};
use crate::{StoredTender, TenderCandidate, TenderStatus, TenderView, DEFAULT_CURRENCY};

pub const TITLE_MAX_CHARS: usize = 100;
pub const DESCRIPTION_MAX_CHARS: usize = 200;
pub const ELLIPSIS: &str = "...";

/// Days at or below which an open tender counts as closing soon.
pub const CLOSING_SOON_DAYS: i64 = 7;

/// Build the view for a freshly extracted candidate.
pub fn format_candidate(candidate: &TenderCandidate, now: DateTime<Utc>) -> TenderView {
    let closing_date = candidate
        .closing_date_raw
        .as_deref()
        .and_then(parse_date)
        .map(|d| d.with_timezone(&eat()));
    let published_date = candidate
        .published_date_raw
        .as_deref()
        .and_then(parse_date)
        .map(|d| d.with_timezone(&eat()));
    let (days_remaining, status) = schedule(closing_date, now);

    TenderView {
        id: None,
        reference: candidate.reference.trim().to_string(),
        source: candidate.source,
        title: shorten(&candidate.title, TITLE_MAX_CHARS),
        description: candidate
            .description
            .as_deref()
            .map(|d| shorten(d, DESCRIPTION_MAX_CHARS)),
        procuring_entity: candidate.procuring_entity.clone(),
        procurement_method: candidate.procurement_method.clone(),
        category: candidate.category.clone(),
        value: candidate.value.clone(),
        currency: candidate
            .currency
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(DEFAULT_CURRENCY)
            .to_string(),
        document_url: candidate.document_url.clone(),
        closing_date,
        published_date,
        is_processed: false,
        created_at: None,
        updated_at: None,
        days_remaining,
        status,
        last_updated: now.with_timezone(&eat()),
        offline_available: true,
    }
}

/// Build the view for a stored row.
pub fn format_stored(record: &StoredTender, now: DateTime<Utc>) -> TenderView {
    let closing_date = record.closing_date.map(|d| d.with_timezone(&eat()));
    let (days_remaining, status) = schedule(closing_date, now);

    TenderView {
        id: Some(record.id),
        reference: record.reference.clone(),
        source: record.source,
        title: shorten(&record.title, TITLE_MAX_CHARS),
        description: record
            .description
            .as_deref()
            .map(|d| shorten(d, DESCRIPTION_MAX_CHARS)),
        procuring_entity: record.procuring_entity.clone(),
        procurement_method: record.procurement_method.clone(),
        category: record.category.clone(),
        value: record.value.clone(),
        currency: record.currency.clone(),
        document_url: record.document_url.clone(),
        closing_date,
        published_date: record.published_date.map(|d| d.with_timezone(&eat())),
        is_processed: record.is_processed,
        created_at: Some(record.created_at),
        updated_at: Some(record.updated_at),
        days_remaining,
        status,
        last_updated: now.with_timezone(&eat()),
        offline_available: true,
    }
}

fn schedule(
    closing_date: Option<DateTime<FixedOffset>>,
    now: DateTime<Utc>,
) -> (Option<i64>, TenderStatus) {
    let Some(closing) = closing_date else {
        return (None, TenderStatus::Unknown);
    };
    match days_until(closing, now) {
        Some(days) => (Some(days), status_for_days(days)),
        None => (None, TenderStatus::Unknown),
    }
}

/// Whole days from `now` to `closing`, floored: 12 hours ago is -1.
pub fn days_until(closing: DateTime<FixedOffset>, now: DateTime<Utc>) -> Option<i64> {
    let delta = closing.with_timezone(&Utc).signed_duration_since(now);
    let whole = delta.num_days();
    if delta < TimeDelta::try_days(whole)? {
        whole.checked_sub(1)
    } else {
        Some(whole)
    }
}

pub fn status_for_days(days: i64) -> TenderStatus {
    if days < 0 {
        TenderStatus::Closed
    } else if days <= CLOSING_SOON_DAYS {
        TenderStatus::ClosingSoon
    } else {
        TenderStatus::Open
    }
}

/// Collapse whitespace and cut at a word boundary so the result, marker
/// included, fits in `width` characters.
pub fn shorten(text: &str, width: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    let collapsed = words.join(" ");
    if collapsed.chars().count() <= width {
        return collapsed;
    }

    let budget = width.saturating_sub(ELLIPSIS.chars().count());
    let mut out = String::new();
    let mut out_len = 0usize;
    for word in &words {
        let word_len = word.chars().count();
        let sep = usize::from(!out.is_empty());
        if out_len + sep + word_len > budget {
            break;
        }
        if sep == 1 {
            out.push(' ');
        }
        out.push_str(word);
        out_len += sep + word_len;
    }
    if out.is_empty() {
        // First word alone is too long; break it.
        out = collapsed.chars().take(budget).collect();
    }
    out.push_str(ELLIPSIS);
    out
}
