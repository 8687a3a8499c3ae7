//! Common imports for TW client applications.
//!
//! ```rust
//! use tw_client::prelude::*;
//! ```

pub use crate::client::{TwClient, TwClientBuilder};
pub use crate::config::ClientConfig;
pub use crate::error::{TwError, TwResult};
pub use crate::polled::{PollObserver, PolledQuery, PolledQueryOptions};
pub use crate::prepared::PreparedQuery;
pub use crate::protocol::{
    QueryLanguage, QuerySpec, Restriction, RowsDelta, RuntimeMeasure, SignatureElement, TwType,
};
pub use crate::registry::{FnHandler, MethodHandler, ParamSpec};
pub use crate::resultset::ResultSet;
pub use crate::schedule::{CalendarSpec, Schedule};
pub use crate::subscription::{BatchSubscription, Subscription, SubscriptionObserver};
pub use crate::view::View;
