//! Output formatting for event listings.

use meetupfinder_core::Event;

/// Truncate a string to a maximum length, adding ellipsis if needed
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else if max_len <= 3 {
        s.chars().take(max_len).collect()
    } else {
        let truncated: String = s.chars().take(max_len - 3).collect();
        format!("{}...", truncated)
    }
}

/// RSVP column: "12/40", or "12 going" when there is no limit
pub fn rsvp_display(event: &Event) -> String {
    if event.rsvp_limit == 0 {
        format!("{} going", event.rsvp_count)
    } else {
        format!("{}/{}", event.rsvp_count, event.rsvp_limit)
    }
}

/// One line of the event listing
pub fn event_line(event: &Event) -> String {
    format!(
        "{:<12}  {:<40}  {:<28}  {}",
        event.formatted_start(),
        truncate_string(&event.name, 40),
        truncate_string(&event.group_name, 28),
        rsvp_display(event)
    )
}
