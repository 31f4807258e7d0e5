//! Infrastructure layer: order ledger, catalog and stock stores, payment
//! orchestration, confirmation channels, reconciliation and notifications.

pub mod catalog;
pub mod channels;
pub mod config;
pub mod error;
pub mod inventory;
pub mod ledger;
pub mod notify;
pub mod orchestrator;
pub mod reconciler;


pub use channels::{ChannelReport, ConfirmationChannels, Disposition, WebhookAck, WebhookOutcome};
pub use config::{ConfigError, Settings};
pub use error::CheckoutError;
pub use notify::{LogNotifier, NotificationDispatcher, Notifier};
pub use orchestrator::{CheckoutSession, NewOrder, PaymentOrchestrator, PlacedOrder};
pub use reconciler::{Reconciler, ReconcileError};
