use crate::item::{Item, Phase};
use parking_lot::Mutex;
use std::fmt;
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Whether an item is entering or leaving a phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Enter,
    Exit,
}

impl Transition {
    pub const fn label(self) -> &'static str {
        match self {
            Transition::Enter => "ENTRA",
            Transition::Exit => "SALE",
        }
    }
}

/// One line of the event log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageEvent {
    pub elapsed: Duration,
    pub item: Item,
    pub phase: Phase,
    pub transition: Transition,
}

impl fmt::Display for StageEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Tiempo {} Coche {} Incidencia {} Fase {} Estado {}",
            format_elapsed(self.elapsed),
            self.item.id,
            self.item.class.letter(),
            self.phase.number(),
            self.transition.label()
        )
    }
}

/// Render a duration truncated to milliseconds, e.g. `0s`, `250ms`, `5.01s`,
/// `1m2.5s`, `1h0m0s`
pub fn format_elapsed(elapsed: Duration) -> String {
    let total_ms = elapsed.as_millis();
    if total_ms == 0 {
        return "0s".to_string();
    }
    if total_ms < 1000 {
        return format!("{total_ms}ms");
    }

    let total_secs = total_ms / 1000;
    let millis = total_ms % 1000;
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    let mut out = String::new();
    if hours > 0 {
        out.push_str(&format!("{hours}h"));
    }
    if hours > 0 || minutes > 0 {
        out.push_str(&format!("{minutes}m"));
    }
    out.push_str(&seconds.to_string());
    if millis > 0 {
        let frac = format!("{millis:03}");
        out.push('.');
        out.push_str(frac.trim_end_matches('0'));
    }
    out.push('s');
    out
}

/// Destination for stage events
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &StageEvent);
}

/// Writes each event as one line on stdout
#[derive(Debug, Default)]
pub struct StdoutSink;

impl EventSink for StdoutSink {
    fn emit(&self, event: &StageEvent) {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        if let Err(e) = writeln!(out, "{event}") {
            tracing::warn!(error = %e, "failed to write event line");
        }
    }
}

/// Keeps events in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<StageEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<StageEvent> {
        self.events.lock().clone()
    }

    pub fn lines(&self) -> Vec<String> {
        self.events.lock().iter().map(ToString::to_string).collect()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: &StageEvent) {
        self.events.lock().push(*event);
    }
}

/// Run-relative event recorder shared by all stages
#[derive(Clone)]
pub struct EventLog {
    start: Instant,
    sink: Arc<dyn EventSink>,
}

impl EventLog {
    pub fn new(start: Instant, sink: Arc<dyn EventSink>) -> Self {
        Self { start, sink }
    }

    pub fn record(&self, item: Item, phase: Phase, transition: Transition) {
        let event = StageEvent {
            elapsed: self.start.elapsed(),
            item,
            phase,
            transition,
        };
        tracing::debug!(
            item = item.id,
            class = %item.class,
            phase = phase.number(),
            state = transition.label(),
            "stage event"
        );
        self.sink.emit(&event);
    }
}

impl fmt::Debug for EventLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLog").field("start", &self.start).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::Class;

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(Duration::ZERO), "0s");
        assert_eq!(format_elapsed(Duration::from_micros(999)), "0s");
        assert_eq!(format_elapsed(Duration::from_micros(250_900)), "250ms");
        assert_eq!(format_elapsed(Duration::from_secs(5)), "5s");
        assert_eq!(format_elapsed(Duration::from_millis(5_010)), "5.01s");
        assert_eq!(format_elapsed(Duration::from_millis(5_123)), "5.123s");
        assert_eq!(format_elapsed(Duration::from_millis(62_500)), "1m2.5s");
        assert_eq!(format_elapsed(Duration::from_secs(120)), "2m0s");
        assert_eq!(format_elapsed(Duration::from_secs(3600)), "1h0m0s");
        assert_eq!(format_elapsed(Duration::from_millis(3_723_004)), "1h2m3.004s");
    }

    #[test]
    fn test_event_line_format() {
        let event = StageEvent {
            elapsed: Duration::from_micros(3_002_900),
            item: Item::new(17, Class::B),
            phase: Phase::Repair,
            transition: Transition::Enter,
        };
        assert_eq!(
            event.to_string(),
            "Tiempo 3.002s Coche 17 Incidencia B Fase 2 Estado ENTRA"
        );

        let exit = StageEvent {
            transition: Transition::Exit,
            phase: Phase::Delivery,
            ..event
        };
        assert_eq!(
            exit.to_string(),
            "Tiempo 3.002s Coche 17 Incidencia B Fase 4 Estado SALE"
        );
    }

    #[test]
    fn test_memory_sink_collects() {
        let sink = Arc::new(MemorySink::new());
        let log = EventLog::new(Instant::now(), sink.clone());
        log.record(Item::new(1, Class::A), Phase::Reception, Transition::Enter);
        log.record(Item::new(1, Class::A), Phase::Reception, Transition::Exit);

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].transition, Transition::Enter);
        assert!(sink.lines()[1].ends_with("Coche 1 Incidencia A Fase 1 Estado SALE"));
    }
}
