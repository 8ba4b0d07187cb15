//! Ghoko Common Types
//!
//! Shared building blocks for the Ghoko webhook gateway:
//!
//! - [`error`] - the `GhokoError` taxonomy and shutdown error aggregation
//! - [`params`] - script parameter maps built from query strings and JSON bodies
//! - [`auth`] - shared-secret verification
//! - [`id`] - correlation id generation
//!
//! # Example
//!
//! ```
//! use ghoko_common::{AuthGate, ParamCollector, Params};
//!
//! let mut query = Params::from_query("secret=s3cr3t&ref=main");
//! let gate = AuthGate::new("s3cr3t");
//! assert!(gate.verify(&query));
//! query.remove("secret");
//!
//! let params = ParamCollector::build(query, Some(br#"{"pusher":"ci"}"#)).unwrap();
//! assert_eq!(params.get_str("pusher"), Some("ci"));
//! ```

pub mod auth;
pub mod error;
pub mod id;
pub mod params;

pub use auth::AuthGate;
pub use error::{GhokoError, Result, ShutdownErrors};
pub use id::{IdGenerator, ObjectIdGenerator};
pub use params::{ParamCollector, Params};
