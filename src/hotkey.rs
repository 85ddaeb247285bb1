/// Push-to-talk hotkey.
///
/// A background thread reads key events in raw mode and flips atomic flags:
/// `triggered` after the hotkey (Esc) was tapped the configured number of
/// times within [`PRESS_WINDOW`], `interrupted` on Ctrl-C. The thread is
/// stopped and joined when the listener is dropped.
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::Result;
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};

use crate::error::Interrupted;

pub const PRESS_WINDOW: Duration = Duration::from_millis(500);
const POLL_INTERVAL: Duration = Duration::from_millis(50);

// ── Press counting ────────────────────────────────────────────────────────────

/// Counts taps that arrive close enough together.
#[derive(Debug)]
pub struct KeypressCounter {
    needed: u32,
    window: Duration,
    count: u32,
    last: Option<Instant>,
}

impl KeypressCounter {
    pub fn new(needed: u32, window: Duration) -> Self {
        Self { needed: needed.max(1), window, count: 0, last: None }
    }

    /// Record a tap; true when it completes the sequence.
    pub fn press(&mut self, at: Instant) -> bool {
        match self.last {
            Some(prev) if at.duration_since(prev) <= self.window => self.count += 1,
            _ => self.count = 1,
        }
        self.last = Some(at);
        if self.count >= self.needed {
            self.count = 0;
            self.last = None;
            return true;
        }
        false
    }
}

// ── Listener thread ───────────────────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct HotkeyFlags {
    pub triggered: Arc<AtomicBool>,
    pub interrupted: Arc<AtomicBool>,
}

impl HotkeyFlags {
    /// Read and reset the trigger flag.
    pub fn take_triggered(&self) -> bool {
        self.triggered.swap(false, Ordering::SeqCst)
    }

    pub fn interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Hotkey sequence tapped or Ctrl-C pressed.
    pub fn stop_requested(&self) -> bool {
        self.take_triggered() || self.interrupted()
    }
}

pub struct HotkeyListener {
    flags: HotkeyFlags,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl HotkeyListener {
    pub fn start(presses: u32) -> Result<Self> {
        enable_raw_mode()?;
        let flags = HotkeyFlags::default();
        let stop = Arc::new(AtomicBool::new(false));

        let thread_flags = flags.clone();
        let thread_stop = Arc::clone(&stop);
        let handle = std::thread::spawn(move || {
            let mut counter = KeypressCounter::new(presses, PRESS_WINDOW);
            while !thread_stop.load(Ordering::SeqCst) {
                match event::poll(POLL_INTERVAL) {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(e) => {
                        tracing::warn!(error = %e, "hotkey listener stopped");
                        break;
                    }
                }
                let Ok(Event::Key(key)) = event::read() else {
                    continue;
                };
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                match key.code {
                    KeyCode::Esc if counter.press(Instant::now()) => {
                        thread_flags.triggered.store(true, Ordering::SeqCst);
                    }
                    KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                        thread_flags.interrupted.store(true, Ordering::SeqCst);
                    }
                    _ => {}
                }
            }
        });

        Ok(Self { flags, stop, handle: Some(handle) })
    }

    pub fn flags(&self) -> &HotkeyFlags {
        &self.flags
    }
}

impl Drop for HotkeyListener {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        let _ = disable_raw_mode();
    }
}

/// Block until the hotkey sequence is tapped. Ctrl-C yields [`Interrupted`].
pub async fn wait_for_hotkey(presses: u32) -> Result<()> {
    let listener = HotkeyListener::start(presses)?;
    loop {
        if listener.flags().take_triggered() {
            return Ok(());
        }
        if listener.flags().interrupted() {
            return Err(Interrupted.into());
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}
