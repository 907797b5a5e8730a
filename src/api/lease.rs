//! Leases and payment history for the signed-in user.

use std::sync::Arc;

use super::cache::{CacheTag, QueryCache, QueryKey, QueryResult, Subscription};
use super::client::{ApiRequest, Domain, HttpClient};
use super::error::ApiError;
use super::models::{Lease, NewLease, Payment};
use super::validation;

#[derive(Clone)]
pub struct LeaseApi {
    http: Arc<HttpClient>,
    cache: QueryCache,
}

impl LeaseApi {
    pub fn new(http: Arc<HttpClient>, cache: QueryCache) -> Self {
        Self { http, cache }
    }

    pub fn leases_key(user_id: &str) -> QueryKey {
        QueryKey::new(CacheTag::Lease, "leases").param("userId", user_id)
    }

    pub fn lease_key(id: &str) -> QueryKey {
        QueryKey::new(CacheTag::Lease, "lease").param("id", id)
    }

    pub fn payments_key(user_id: &str) -> QueryKey {
        QueryKey::new(CacheTag::Payment, "payments").param("userId", user_id)
    }

    pub async fn leases(&self, user_id: &str) -> QueryResult<Vec<Lease>> {
        let http = self.http.clone();
        let request = ApiRequest::get(Domain::Lease, "/leases").query("userId", user_id);
        self.cache
            .fetch(&Self::leases_key(user_id), move || async move {
                http.send::<Vec<Lease>>(request).await
            })
            .await
    }

    pub async fn lease(&self, id: &str) -> QueryResult<Lease> {
        let http = self.http.clone();
        let request = ApiRequest::get(Domain::Lease, "/leases").segment(id);
        self.cache
            .fetch(&Self::lease_key(id), move || async move {
                http.send::<Lease>(request).await
            })
            .await
    }

    pub async fn payment_history(&self, user_id: &str) -> QueryResult<Vec<Payment>> {
        let http = self.http.clone();
        let request = ApiRequest::get(Domain::Lease, "/payments").query("userId", user_id);
        self.cache
            .fetch(&Self::payments_key(user_id), move || async move {
                http.send::<Vec<Payment>>(request).await
            })
            .await
    }

    pub fn subscribe_leases(&self, user_id: &str) -> Subscription {
        self.cache.subscribe(&Self::leases_key(user_id))
    }

    /// Create a lease. Every cached lease query is stale afterwards.
    pub async fn create_lease(&self, lease: &NewLease) -> Result<Lease, ApiError> {
        validation::required("Car", &lease.car_id)?;
        validation::required("User", &lease.user_id)?;
        validation::required("Start date", &lease.start_date)?;

        let request = ApiRequest::post(Domain::Lease, "/leases").json(lease)?;
        let created: Lease = self.http.send(request).await?;

        let invalidated = self.cache.invalidate(&[CacheTag::Lease]);
        tracing::info!(
            lease_id = %created.id,
            car_id = %created.car_id,
            invalidated,
            "Lease created"
        );
        Ok(created)
    }
}
