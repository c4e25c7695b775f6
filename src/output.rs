//! Terminal rendering for the host simulation.

use crate::chat::ChatEvent;
use crate::conversation::machine::StateChange;
use crate::conversation::state::ConversationState;
use crate::gate::event::{EventKind, FrontEndEvent};
use crate::pipeline::types::StatsSnapshot;
use owo_colors::OwoColorize;
use std::time::Instant;

/// Seconds since `origin`, formatted as a log prefix.
fn stamp(origin: Instant, at: Instant) -> String {
    let elapsed = at.saturating_duration_since(origin);
    format!("{:>7.3}s", elapsed.as_secs_f64())
}

pub fn format_front_end_event(origin: Instant, event: &FrontEndEvent) -> String {
    format!("{} {}", stamp(origin, event.timestamp), event.kind)
}

pub fn render_front_end_event(origin: Instant, event: &FrontEndEvent) {
    let line = format_front_end_event(origin, event);
    match event.kind {
        EventKind::WakeStart { .. } | EventKind::VadStart => eprintln!("{}", line.cyan()),
        EventKind::CommandResult { .. } => eprintln!("{}", line.green()),
        _ => eprintln!("{}", line.dimmed()),
    }
}

pub fn format_state_change(change: &StateChange) -> String {
    format!("{} -> {} ({})", change.from, change.to, change.event)
}

pub fn render_state_change(origin: Instant, change: &StateChange) {
    let prefix = stamp(origin, Instant::now());
    let line = format_state_change(change);
    match change.to {
        ConversationState::Error => eprintln!("{} {}", prefix, line.red().bold()),
        ConversationState::Recording | ConversationState::Speaking => {
            eprintln!("{} {}", prefix, line.yellow())
        }
        _ => eprintln!("{} {}", prefix, line),
    }
}

/// One-line description of a chat event, or `None` for lifecycle events
/// already visible as state changes.
pub fn format_chat_event(event: &ChatEvent) -> Option<String> {
    match event {
        ChatEvent::Subtitle(text) => Some(format!("subtitle: {}", text)),
        ChatEvent::CustomerData(value) => Some(format!("data: {}", value)),
        ChatEvent::SpeechStarted | ChatEvent::SpeechStopped => None,
    }
}

pub fn render_chat_event(origin: Instant, event: &ChatEvent) {
    if let Some(line) = format_chat_event(event) {
        eprintln!("{} {}", stamp(origin, Instant::now()), line.magenta());
    }
}

/// Counter rows, in pipeline order.
pub fn stats_rows(stats: &StatsSnapshot) -> Vec<(&'static str, u64)> {
    vec![
        ("frames captured", stats.frames_captured),
        ("capture errors", stats.capture_errors),
        ("frames gated", stats.frames_gated),
        ("frames sent", stats.frames_sent),
        ("send errors", stats.send_errors),
        ("downlink accepted", stats.downlink_accepted),
        ("downlink dropped", stats.downlink_dropped),
        ("downlink oversized", stats.downlink_oversized),
        ("frames decoded", stats.frames_decoded),
        ("decode errors", stats.decode_errors),
        ("frames played", stats.frames_played),
        ("frames muted", stats.frames_muted),
        ("watchdog flushes", stats.watchdog_flushes),
    ]
}

pub fn render_stats(stats: &StatsSnapshot) {
    println!("{}", "Pipeline stats:".bold());
    for (label, value) in stats_rows(stats) {
        let is_fault = label.contains("error") || label.contains("dropped") || label.contains("oversized");
        if is_fault && value > 0 {
            println!("  {:<20} {}", label.dimmed(), value.red());
        } else {
            println!("  {:<20} {}", label.dimmed(), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::state::ConversationEvent;
    use std::time::Duration;

    #[test]
    fn test_front_end_event_stamp() {
        let origin = Instant::now();
        let event = FrontEndEvent::new(EventKind::VadEnd, origin + Duration::from_millis(1500));
        assert_eq!(format_front_end_event(origin, &event), "  1.500s VAD_END");
    }

    #[test]
    fn test_event_before_origin_clamps_to_zero() {
        let origin = Instant::now() + Duration::from_secs(1);
        let event = FrontEndEvent::new(EventKind::VadStart, Instant::now());
        assert!(format_front_end_event(origin, &event).starts_with("  0.000s"));
    }

    #[test]
    fn test_state_change_line() {
        let change = StateChange {
            from: ConversationState::Idle,
            to: ConversationState::Listening,
            event: ConversationEvent::WakeUp,
        };
        assert_eq!(format_state_change(&change), "IDLE -> LISTENING (WAKE_UP)");
    }

    #[test]
    fn test_chat_lifecycle_not_printed() {
        assert!(format_chat_event(&ChatEvent::SpeechStarted).is_none());
        assert_eq!(
            format_chat_event(&ChatEvent::Subtitle("hello".into())).as_deref(),
            Some("subtitle: hello")
        );
    }

    #[test]
    fn test_stats_rows_cover_every_counter() {
        let stats = StatsSnapshot {
            frames_sent: 7,
            ..Default::default()
        };
        let rows = stats_rows(&stats);
        assert_eq!(rows.len(), 13);
        assert!(rows.contains(&("frames sent", 7)));
    }
}
