//! Recovers page progress from the engine's human-oriented diagnostic text.

use crate::protocol::Progress;
use anyhow::Result;
use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    /// Counting-only invocation; bare integer lines carry the page count.
    Analyze,
    Render,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanEvent {
    Progress(Progress),
    PageCount(u32),
}

#[derive(Debug, Clone)]
pub struct ProgressScanner {
    mode: ScanMode,
    total: u32,
    current: u32,
    page_count: u32,
    range_re: Regex,
    page_re: Regex,
    count_re: Regex,
}

impl ProgressScanner {
    pub fn new() -> Result<Self> {
        Ok(Self {
            mode: ScanMode::Render,
            total: 0,
            current: 0,
            page_count: 0,
            range_re: Regex::new(r"(?i)Processing pages? (\d+) through (\d+)")?,
            page_re: Regex::new(r"(?i)^Page (\d+)$")?,
            count_re: Regex::new(r"^(\d+)$")?,
        })
    }

    /// Starts a new operation; the engine reuses one channel across invocations.
    pub fn reset(&mut self, mode: ScanMode) {
        self.mode = mode;
        self.total = 0;
        self.current = 0;
        self.page_count = 0;
    }

    pub fn mode(&self) -> ScanMode {
        self.mode
    }

    pub fn snapshot(&self) -> Progress {
        Progress {
            current: self.current,
            total: self.total,
        }
    }

    /// Page count captured in analyze mode, 0 if none was seen.
    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    pub fn scan(&mut self, line: &str) -> Vec<ScanEvent> {
        let mut events = Vec::new();
        let line = line.trim_end();

        if let Some(caps) = self.range_re.captures(line) {
            if let Some(last) = caps.get(2).and_then(|m| m.as_str().parse::<u32>().ok()) {
                if self.total == 0 && last > 0 {
                    self.total = last;
                    self.current = 0;
                    events.push(ScanEvent::Progress(self.snapshot()));
                    if self.mode == ScanMode::Analyze {
                        self.page_count = last;
                        events.push(ScanEvent::PageCount(last));
                    }
                }
            }
        }

        if let Some(caps) = self.page_re.captures(line) {
            if let Some(page) = caps.get(1).and_then(|m| m.as_str().parse::<u32>().ok()) {
                self.current = if self.total > 0 { page.min(self.total) } else { page };
                events.push(ScanEvent::Progress(self.snapshot()));
            }
        }

        if self.mode == ScanMode::Analyze {
            if let Some(caps) = self.count_re.captures(line.trim()) {
                if let Some(n) = caps.get(1).and_then(|m| m.as_str().parse::<u32>().ok()) {
                    if n > 0 {
                        self.page_count = n;
                        events.push(ScanEvent::PageCount(n));
                    }
                }
            }
        }

        events
    }
}
