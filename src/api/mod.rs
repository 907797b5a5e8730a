//! Backend access.
//!
//! One [`HttpClient`] carries every request; each domain wraps it with typed
//! calls. Reads go through the shared [`QueryCache`] and are de-duplicated by
//! key; writes go straight to the server and invalidate the tags they make
//! stale.

mod auth;
mod cache;
mod catalog;
mod client;
mod error;
mod lease;
mod models;
mod payment;
pub mod validation;

pub use auth::{AuthApi, Revalidation, SignupForm, SignupOutcome};
pub use cache::{CacheTag, QueryCache, QueryKey, QueryResult, QueryStatus, Subscription};
pub use catalog::CatalogApi;
pub use client::{Ack, ApiRequest, Domain, HttpClient};
pub use error::{ApiError, GENERIC_NETWORK_MESSAGE};
pub use lease::LeaseApi;
pub use models::{
    AuthPayload, Brand, Car, CarQuery, Lease, NewLease, Payment, PaymentIntent,
    PaymentIntentRequest, ProfileUpdate,
};
pub use payment::PaymentApi;
pub use validation::ValidationError;
