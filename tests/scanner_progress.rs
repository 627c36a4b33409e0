use gs_worker::protocol::Progress;
use gs_worker::scanner::{ProgressScanner, ScanEvent, ScanMode};

fn progress(events: &[ScanEvent]) -> Vec<Progress> {
    events
        .iter()
        .filter_map(|e| match e {
            ScanEvent::Progress(p) => Some(*p),
            ScanEvent::PageCount(_) => None,
        })
        .collect()
}

#[test]
fn twelve_page_render_reports_thirteen_steps() {
    let mut s = ProgressScanner::new().unwrap();
    s.reset(ScanMode::Render);
    let mut events = Vec::new();
    events.extend(s.scan("GPL Ghostscript 10.02.1 (2023-11-01)"));
    events.extend(s.scan("Processing pages 1 through 12."));
    for p in 1..=12 {
        events.extend(s.scan(&format!("Page {p}")));
        events.extend(s.scan("Loading NimbusSans-Regular font from %rom%Resource/Font/..."));
    }

    let steps = progress(&events);
    assert_eq!(steps.len(), 13);
    assert_eq!(steps[0], Progress { current: 0, total: 12 });
    assert_eq!(steps[12], Progress { current: 12, total: 12 });
    assert!(steps.windows(2).all(|w| w[0].current <= w[1].current));
}

#[test]
fn current_never_exceeds_announced_total() {
    let mut s = ProgressScanner::new().unwrap();
    s.reset(ScanMode::Render);
    s.scan("Processing pages 1 through 5.");
    let events = s.scan("Page 20");
    assert_eq!(progress(&events), vec![Progress { current: 5, total: 5 }]);
}

#[test]
fn first_announced_range_wins() {
    let mut s = ProgressScanner::new().unwrap();
    s.reset(ScanMode::Render);
    s.scan("Processing pages 1 through 3.");
    assert!(s.scan("Processing pages 1 through 99.").is_empty());
    assert_eq!(s.snapshot().total, 3);
}

#[test]
fn bare_integer_counts_only_when_analyzing() {
    let mut s = ProgressScanner::new().unwrap();
    s.reset(ScanMode::Render);
    assert!(s.scan("7").is_empty());
    assert_eq!(s.page_count(), 0);

    s.reset(ScanMode::Analyze);
    assert_eq!(s.scan("7"), vec![ScanEvent::PageCount(7)]);
    assert!(s.scan("0").is_empty());
    assert_eq!(s.page_count(), 7);
}

#[test]
fn analyze_range_reports_page_count() {
    let mut s = ProgressScanner::new().unwrap();
    s.reset(ScanMode::Analyze);
    let events = s.scan("Processing pages 1 through 4.");
    assert!(events.contains(&ScanEvent::PageCount(4)));
    assert_eq!(s.page_count(), 4);
}

#[test]
fn reset_forgets_previous_operation() {
    let mut s = ProgressScanner::new().unwrap();
    s.reset(ScanMode::Render);
    s.scan("Processing pages 1 through 8.");
    s.scan("Page 8");
    s.reset(ScanMode::Render);
    assert_eq!(s.snapshot(), Progress::default());
    assert_eq!(
        progress(&s.scan("Processing pages 1 through 2.")),
        vec![Progress { current: 0, total: 2 }]
    );
}
