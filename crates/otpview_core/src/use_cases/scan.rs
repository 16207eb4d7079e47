//! On-screen QR acquisition.
//!
//! Two sides cooperate over an [`EventBus`]:
//! - [`ScanRequester`] runs in the requesting context. It checks capture
//!   permission, opens the scanner window and waits for one terminal event.
//! - [`ScanSession`] runs inside the scanner window. It repeatedly hides the
//!   window, captures the region underneath, tries to decode a QR code and
//!   re-shows the window, until a code is found or the session ends.
//!
//! Every session owns a liveness token. The first party to end the session
//! (the driver on success, the user on cancel, the window system on close)
//! wins, so exactly one terminal event is emitted per session.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::config::ScannerSettings;
use crate::entities::{ScanEvent, ScreenRegion, WindowEvent, WindowSize, WindowSpec};
use crate::error::Error;
use crate::ports::{EventBus, QrDecoder, ScanWindow, ScreenCapture, WindowFactory};
use crate::timing::ScanTimings;

/// Phase of the acquisition state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanPhase {
    #[default]
    Idle,
    /// Window visible, waiting for the next attempt
    Scanning,
    /// Window hidden, capture and decode in progress
    Capturing,
    /// Code delivered, success indicator showing
    Found,
    Cancelling,
    Closed,
}

/// How a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    Found(String),
    Cancelled,
    /// The window went away without a user decision
    Abandoned,
    /// Screen recording was refused after the session started
    PermissionDenied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum Ending {
    Found = 1,
    Cancelled = 2,
    Abandoned = 3,
    Denied = 4,
}

const LIVE: u8 = 0;

/// Liveness token shared by everything acting for one session
struct Liveness {
    state: AtomicU8,
    ended: Notify,
}

impl Liveness {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(LIVE),
            ended: Notify::new(),
        }
    }

    fn is_live(&self) -> bool {
        self.state.load(Ordering::SeqCst) == LIVE
    }

    /// End the session. Only the first caller succeeds.
    fn end(&self, ending: Ending) -> bool {
        let won = self
            .state
            .compare_exchange(LIVE, ending as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if won {
            self.ended.notify_waiters();
        }
        won
    }

    fn ending(&self) -> Option<Ending> {
        match self.state.load(Ordering::SeqCst) {
            1 => Some(Ending::Found),
            2 => Some(Ending::Cancelled),
            3 => Some(Ending::Abandoned),
            4 => Some(Ending::Denied),
            _ => None,
        }
    }

    async fn wait_ended(&self) {
        loop {
            let notified = self.ended.notified();
            if !self.is_live() {
                return;
            }
            notified.await;
        }
    }
}

struct Shared {
    liveness: Liveness,
    phase: watch::Sender<ScanPhase>,
}

impl Shared {
    /// Move to a non-terminal phase, unless the session already ended.
    ///
    /// The liveness check runs under the channel lock. Terminal phases are
    /// only published after the token is ended, so they are never overwritten.
    fn advance(&self, phase: ScanPhase) {
        let liveness = &self.liveness;
        self.phase.send_if_modified(|current| {
            if !liveness.is_live() {
                return false;
            }
            *current = phase;
            true
        });
    }

    /// Outcome of a session ended by someone other than the driver.
    ///
    /// A found code is only ever reported through the driver's own return.
    fn outcome(&self) -> ScanOutcome {
        match self.liveness.ending() {
            Some(Ending::Cancelled) => ScanOutcome::Cancelled,
            Some(Ending::Denied) => ScanOutcome::PermissionDenied,
            _ => ScanOutcome::Abandoned,
        }
    }

    /// End the session without a user decision.
    ///
    /// Still emits a cancellation so the requester is released.
    async fn end_unattended<B: EventBus>(&self, bus: &B, ending: Ending, reason: &str) -> bool {
        if !self.liveness.end(ending) {
            return false;
        }
        debug!(reason, "scan session ended");
        if let Err(e) = bus.emit(ScanEvent::Cancelled).await {
            debug!(error = %e, "could not deliver cancellation");
        }
        true
    }

    /// End the session because the window went away
    async fn abandon<B: EventBus>(&self, bus: &B, reason: &str) -> bool {
        let ended = self.end_unattended(bus, Ending::Abandoned, reason).await;
        if ended {
            self.phase.send_replace(ScanPhase::Closed);
        }
        ended
    }
}

/// Keeps the scanner window square.
///
/// A resize reporting the width that was last enforced is ignored, which
/// stops the feedback loop between our own resize and the resulting event.
#[derive(Debug, Default)]
pub struct SquareGuard {
    last_width: Option<u32>,
}

impl SquareGuard {
    /// Size to apply for an observed resize, if any
    pub fn correct(&mut self, size: WindowSize) -> Option<WindowSize> {
        if size.is_square() || self.last_width == Some(size.width) {
            return None;
        }
        self.last_width = Some(size.width);
        Some(WindowSize::square(size.width))
    }
}

enum Attempt {
    Found(String),
    Missed,
    /// Retrying cannot help
    Fatal(Error),
    /// Resolved after the session ended
    Stale,
}

struct ScanDriver<W, C, D, B> {
    window: Arc<W>,
    capture: Arc<C>,
    decoder: Arc<D>,
    bus: Arc<B>,
    shared: Arc<Shared>,
    timings: ScanTimings,
}

impl<W, C, D, B> ScanDriver<W, C, D, B>
where
    W: ScanWindow,
    C: ScreenCapture,
    D: QrDecoder,
    B: EventBus,
{
    async fn run(self) -> ScanOutcome {
        if !self.pause(self.timings.initial_delay).await {
            return self.shared.outcome();
        }

        let mut number: u32 = 0;
        loop {
            number += 1;

            let gone = match self.attempt(number).await {
                Attempt::Found(uri) => return self.finish(uri).await,
                Attempt::Stale => return self.shared.outcome(),
                Attempt::Fatal(Error::PermissionDenied) => return self.deny().await,
                Attempt::Fatal(e) => Some(e),
                Attempt::Missed => self.recover().await.err(),
            };

            if let Some(e) = gone {
                debug!(error = %e, "scanner window gone, stopping");
                self.shared.abandon(self.bus.as_ref(), "window gone").await;
                return self.shared.outcome();
            }

            if !self.pause(self.timings.retry_interval).await {
                return self.shared.outcome();
            }
        }
    }

    /// Sleep unless the session ends first. Returns whether it is still live.
    async fn pause(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(delay) => self.shared.liveness.is_live(),
            _ = self.shared.liveness.wait_ended() => false,
        }
    }

    async fn attempt(&self, number: u32) -> Attempt {
        self.shared.advance(ScanPhase::Capturing);

        // Not cancellable once started; the result is checked against the token
        let result = self.capture_and_decode().await;

        if !self.shared.liveness.is_live() {
            debug!(attempt = number, "discarding result of ended session");
            return Attempt::Stale;
        }

        match result {
            Ok(uri) => Attempt::Found(uri),
            Err(Error::QrNotFound) => {
                debug!(attempt = number, "no QR code under scanner");
                Attempt::Missed
            }
            Err(e) if !e.is_retryable() => Attempt::Fatal(e),
            Err(e) => {
                warn!(attempt = number, error = %e, "scan attempt failed");
                Attempt::Missed
            }
        }
    }

    async fn capture_and_decode(&self) -> Result<String, Error> {
        let position = self.window.outer_position().await?;
        let size = self.window.outer_size().await?;

        // The capture would otherwise pick up the overlay itself
        self.window.hide().await?;
        tokio::time::sleep(self.timings.settle_delay).await;

        let image = self
            .capture
            .capture_region(ScreenRegion::from_window(position, size))
            .await?;
        self.decoder.decode(&image).await
    }

    async fn recover(&self) -> Result<(), Error> {
        self.shared.advance(ScanPhase::Scanning);
        self.window.show().await?;
        self.window.set_focus().await
    }

    /// Screen recording was refused mid-session
    async fn deny(&self) -> ScanOutcome {
        let ended = self
            .shared
            .end_unattended(self.bus.as_ref(), Ending::Denied, "capture permission denied")
            .await;

        if ended {
            warn!("screen capture permission denied, ending scan");
            if let Err(e) = self.window.close().await {
                debug!(error = %e, "scanner window already closed");
            }
            self.shared.phase.send_replace(ScanPhase::Closed);
        }

        self.shared.outcome()
    }

    async fn finish(&self, uri: String) -> ScanOutcome {
        if !self.shared.liveness.end(Ending::Found) {
            return self.shared.outcome();
        }

        info!("QR code found");
        self.shared.phase.send_replace(ScanPhase::Found);

        if let Err(e) = self.bus.emit(ScanEvent::Found { uri: uri.clone() }).await {
            warn!(error = %e, "failed to deliver scan result");
        }
        if let Err(e) = self.window.show().await {
            debug!(error = %e, "could not show success indicator");
        }

        tokio::time::sleep(self.timings.success_dwell).await;

        if let Err(e) = self.window.close().await {
            debug!(error = %e, "scanner window already closed");
        }
        self.shared.phase.send_replace(ScanPhase::Closed);

        ScanOutcome::Found(uri)
    }
}

async fn watch_window<W, B>(
    window: Arc<W>,
    bus: Arc<B>,
    shared: Arc<Shared>,
    mut events: broadcast::Receiver<WindowEvent>,
) where
    W: ScanWindow,
    B: EventBus,
{
    let mut guard = SquareGuard::default();

    loop {
        let event = tokio::select! {
            _ = shared.liveness.wait_ended() => return,
            event = events.recv() => event,
        };

        match event {
            Ok(WindowEvent::Resized(size)) => {
                if let Some(square) = guard.correct(size) {
                    debug!(width = square.width, "squaring scanner window");
                    if let Err(e) = window.set_size(square).await {
                        debug!(error = %e, "failed to square scanner window");
                    }
                }
            }
            Ok(WindowEvent::Destroyed) => {
                shared.abandon(bus.as_ref(), "window destroyed").await;
                return;
            }
            Err(RecvError::Lagged(skipped)) => {
                debug!(skipped, "window events lagged");
            }
            Err(RecvError::Closed) => return,
        }
    }
}

/// Scan loop running inside the scanner window
pub struct ScanSession<W, B>
where
    W: ScanWindow + 'static,
    B: EventBus + 'static,
{
    window: Arc<W>,
    bus: Arc<B>,
    shared: Arc<Shared>,
    driver: Option<JoinHandle<ScanOutcome>>,
    watcher: Option<JoinHandle<()>>,
}

impl<W, B> ScanSession<W, B>
where
    W: ScanWindow + 'static,
    B: EventBus + 'static,
{
    /// Enter `Scanning`; the first attempt fires after `timings.initial_delay`.
    pub fn start<C, D>(
        window: Arc<W>,
        capture: Arc<C>,
        decoder: Arc<D>,
        bus: Arc<B>,
        timings: ScanTimings,
    ) -> Self
    where
        C: ScreenCapture + 'static,
        D: QrDecoder + 'static,
    {
        let (phase, _) = watch::channel(ScanPhase::Scanning);
        let shared = Arc::new(Shared {
            liveness: Liveness::new(),
            phase,
        });

        let events = window.events();
        let watcher = tokio::spawn(watch_window(
            window.clone(),
            bus.clone(),
            shared.clone(),
            events,
        ));

        let driver = ScanDriver {
            window: window.clone(),
            capture,
            decoder,
            bus: bus.clone(),
            shared: shared.clone(),
            timings,
        };
        let driver = tokio::spawn(driver.run());

        info!("scan session started");

        Self {
            window,
            bus,
            shared,
            driver: Some(driver),
            watcher: Some(watcher),
        }
    }

    pub fn phase(&self) -> ScanPhase {
        *self.shared.phase.borrow()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<ScanPhase> {
        self.shared.phase.subscribe()
    }

    pub fn is_live(&self) -> bool {
        self.shared.liveness.is_live()
    }

    /// Cancel on user request.
    ///
    /// Clears the pending attempt, emits the cancellation and closes the
    /// window. An attempt already in flight finishes but its result is
    /// dropped. Returns `false` if the session had already ended.
    pub async fn cancel(&self) -> bool {
        if !self.shared.liveness.end(Ending::Cancelled) {
            return false;
        }

        info!("scan cancelled");
        self.shared.phase.send_replace(ScanPhase::Cancelling);

        if let Err(e) = self.bus.emit(ScanEvent::Cancelled).await {
            warn!(error = %e, "failed to deliver cancellation");
        }
        if let Err(e) = self.window.close().await {
            debug!(error = %e, "scanner window already closed");
        }
        self.shared.phase.send_replace(ScanPhase::Closed);

        true
    }

    /// End the session because its window is being torn down externally
    pub async fn abandon(&self) -> bool {
        self.shared.abandon(self.bus.as_ref(), "torn down").await
    }

    /// Wait for the scan loop to stop and report how the session ended
    pub async fn wait(mut self) -> ScanOutcome {
        let outcome = match self.driver.take() {
            Some(driver) => driver.await.unwrap_or_else(|e| {
                warn!(error = %e, "scan driver failed");
                ScanOutcome::Abandoned
            }),
            None => self.shared.outcome(),
        };

        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }

        outcome
    }
}

impl<W, B> Drop for ScanSession<W, B>
where
    W: ScanWindow + 'static,
    B: EventBus + 'static,
{
    /// Dropping a live session stops its loop.
    ///
    /// The cancellation is delivered from a spawned task when a runtime is
    /// available; outside of one nothing is emitted.
    fn drop(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }

        if !self.shared.liveness.end(Ending::Abandoned) {
            return;
        }
        self.shared.phase.send_replace(ScanPhase::Closed);

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let bus = self.bus.clone();
                runtime.spawn(async move {
                    if let Err(e) = bus.emit(ScanEvent::Cancelled).await {
                        debug!(error = %e, "could not deliver cancellation");
                    }
                });
            }
            Err(_) => {
                debug!("scan session dropped outside a runtime, cancellation not delivered");
            }
        }
    }
}

// ============================================================================
// Requesting side
// ============================================================================

/// Opens the scanner window and collects its result
pub struct ScanRequester<F, C, B>
where
    F: WindowFactory,
    C: ScreenCapture,
    B: EventBus,
{
    factory: Arc<F>,
    capture: Arc<C>,
    bus: Arc<B>,
    spec: WindowSpec,
    scanning: Arc<AtomicBool>,
}

impl<F, C, B> ScanRequester<F, C, B>
where
    F: WindowFactory,
    C: ScreenCapture,
    B: EventBus,
{
    pub fn new(factory: Arc<F>, capture: Arc<C>, bus: Arc<B>, spec: WindowSpec) -> Self {
        Self {
            factory,
            capture,
            bus,
            spec,
            scanning: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn from_settings(
        factory: Arc<F>,
        capture: Arc<C>,
        bus: Arc<B>,
        settings: &ScannerSettings,
    ) -> Self {
        let spec = WindowSpec::scan_overlay(
            &settings.window_label,
            &settings.window_title,
            settings.window_size,
        );
        Self::new(factory, capture, bus, spec)
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::SeqCst)
    }

    /// Open the scanner window.
    ///
    /// Fails with [`Error::PermissionDenied`] before any window exists when
    /// screen recording is refused.
    #[instrument(skip(self), fields(label = %self.spec.label))]
    pub async fn start(&self) -> Result<PendingScan, Error> {
        if !self.capture.check_permission().await {
            debug!("requesting screen capture permission");
            if !self.capture.request_permission().await {
                warn!("screen capture permission denied");
                return Err(Error::PermissionDenied);
            }
        }

        // Subscribe first so a fast result cannot be missed
        let events = self.bus.subscribe();
        self.scanning.store(true, Ordering::SeqCst);

        if let Err(e) = self.factory.create(&self.spec).await {
            self.scanning.store(false, Ordering::SeqCst);
            warn!(error = %e, "failed to open scanner window");
            return Err(match e {
                Error::WindowCreation(_) => e,
                other => Error::WindowCreation(other.to_string()),
            });
        }

        info!("scanner window opened");

        Ok(PendingScan {
            events,
            scanning: self.scanning.clone(),
        })
    }
}

/// A scan in progress, seen from the requesting context
pub struct PendingScan {
    events: broadcast::Receiver<ScanEvent>,
    scanning: Arc<AtomicBool>,
}

impl PendingScan {
    /// Resolve with the first terminal event.
    ///
    /// Each session emits exactly one, so nothing further is awaited. The
    /// only session that emits none is one dropped outside a tokio runtime;
    /// waiting on it does not resolve.
    pub async fn outcome(mut self) -> Result<ScanOutcome, Error> {
        loop {
            match self.events.recv().await {
                Ok(ScanEvent::Found { uri }) => return Ok(ScanOutcome::Found(uri)),
                Ok(ScanEvent::Cancelled) => return Ok(ScanOutcome::Cancelled),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "missed scan events");
                }
                Err(RecvError::Closed) => {
                    return Err(Error::Transport("scan event channel closed".to_string()))
                }
            }
        }
    }
}

impl Drop for PendingScan {
    fn drop(&mut self) {
        self.scanning.store(false, Ordering::SeqCst);
    }
}
