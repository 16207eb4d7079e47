use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::entities::{
    Account, AccountId, ScanEvent, ScreenRegion, WindowEvent, WindowPosition, WindowSize,
    WindowSpec,
};
use crate::error::Error;

// ============================================================================
// Account Ports
// ============================================================================

/// OTP-management backend holding accounts and their current codes
#[async_trait]
pub trait AccountSource: Send + Sync {
    /// List all accounts together with their current codes
    async fn fetch_accounts(&self) -> Result<Vec<Account>, Error>;

    /// Delete an account on the backend
    async fn delete_account(&self, id: AccountId) -> Result<(), Error>;
}

// ============================================================================
// Acquisition Ports
// ============================================================================

/// Control surface of the scanner window, as seen from inside it
#[async_trait]
pub trait ScanWindow: Send + Sync {
    async fn outer_position(&self) -> Result<WindowPosition, Error>;

    async fn outer_size(&self) -> Result<WindowSize, Error>;

    async fn set_size(&self, size: WindowSize) -> Result<(), Error>;

    async fn hide(&self) -> Result<(), Error>;

    async fn show(&self) -> Result<(), Error>;

    async fn set_focus(&self) -> Result<(), Error>;

    async fn close(&self) -> Result<(), Error>;

    /// Resize and destruction notifications for this window
    fn events(&self) -> broadcast::Receiver<WindowEvent>;
}

/// Opens the scanner window from the requesting context
#[async_trait]
pub trait WindowFactory: Send + Sync {
    async fn create(&self, spec: &WindowSpec) -> Result<(), Error>;
}

/// Cross-window publish/subscribe channel
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Deliver an event to every current subscriber
    async fn emit(&self, event: ScanEvent) -> Result<(), Error>;

    fn subscribe(&self) -> broadcast::Receiver<ScanEvent>;
}

/// Rasterises screen regions
#[async_trait]
pub trait ScreenCapture: Send + Sync {
    /// Check whether screen recording is currently permitted
    async fn check_permission(&self) -> bool;

    /// Ask the OS for screen recording permission
    async fn request_permission(&self) -> bool;

    /// Capture a region as encoded image bytes.
    ///
    /// Fails with [`Error::PermissionDenied`] when recording is not allowed.
    async fn capture_region(&self, region: ScreenRegion) -> Result<Vec<u8>, Error>;
}

/// Extracts the payload of a QR code from an image
#[async_trait]
pub trait QrDecoder: Send + Sync {
    /// Returns [`Error::QrNotFound`] when the image holds no readable code
    async fn decode(&self, image: &[u8]) -> Result<String, Error>;
}
