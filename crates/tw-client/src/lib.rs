//! # TW Client
//!
//! Client library for the TW data-integration server: a bidirectional
//! JSON-RPC 2.0 session over one persistent TCP connection, with a
//! stateful query model layered on top.
//!
//! The pieces, bottom up:
//! - [`transport`] — the raw TCP stream of concatenated JSON values;
//! - [`engine`] — the full-duplex RPC engine: response correlation for
//!   outbound calls plus inbound dispatch to registered methods;
//! - [`registry`] — the name → handler table, shared by application
//!   methods and the notification labels the library reserves;
//! - the handle-bound objects — [`view::View`], [`resultset::ResultSet`],
//!   [`prepared::PreparedQuery`], [`polled::PolledQuery`],
//!   [`subscription::Subscription`] and
//!   [`subscription::BatchSubscription`] — each obliged to release its
//!   server-side handle on disposal;
//! - [`client::TwClient`] — the facade owning the engine and the label
//!   counters.
//!
//! ```no_run
//! use tw_client::prelude::*;
//!
//! # async fn demo() -> TwResult<()> {
//! let client = TwClient::connect(("tw.example.org", 4004)).await?;
//! let rows = client
//!     .execute_query::<Vec<f64>>(QuerySpec::fol(
//!         "((x) s.t. (inflation 1995 1991 x))",
//!         "AP5",
//!     ))
//!     .await?;
//! while rows.move_next().await? {
//!     println!("{:?}", rows.current().await?);
//! }
//! rows.dispose().await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod polled;
pub mod prepared;
pub mod protocol;
pub mod registry;
pub mod resultset;
pub mod schedule;
pub mod subscription;
pub mod transport;
pub mod view;

pub mod prelude;

pub use client::{TwClient, TwClientBuilder};
pub use config::{ClientConfig, TimeoutConfig};
pub use error::{TwError, TwResult};
pub use polled::{PollObserver, PolledQuery, PolledQueryOptions};
pub use prepared::PreparedQuery;
pub use protocol::{
    ExecuteQueryResult, PollFailure, QueryLanguage, QuerySpec, RelDataElement, RelDataGroup,
    Restriction, RowsDelta, RuntimeMeasure, SignatureElement, TwType,
};
pub use resultset::ResultSet;
pub use schedule::{CalendarSpec, Schedule, ScheduleEntry};
pub use subscription::{BatchSubscription, Subscription, SubscriptionObserver};
pub use view::View;
