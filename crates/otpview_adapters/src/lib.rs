pub mod accounts;
pub mod configuration;
pub mod events;
pub mod telemetry;

// Re-exports for convenience
pub use accounts::TwoFAuthAccountSource;
pub use events::BroadcastEventBus;
