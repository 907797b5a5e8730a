use std::sync::Arc;

use super::cache::{CacheTag, QueryCache};
use super::client::{ApiRequest, Domain, HttpClient};
use super::error::ApiError;
use super::models::{PaymentIntent, PaymentIntentRequest};

#[derive(Clone)]
pub struct PaymentApi {
    http: Arc<HttpClient>,
    cache: QueryCache,
}

impl PaymentApi {
    pub fn new(http: Arc<HttpClient>, cache: QueryCache) -> Self {
        Self { http, cache }
    }

    /// Ask the backend for a payment intent. The returned client secret is
    /// handed to the payment provider's sheet; lease and payment listings are
    /// refetched on next access.
    pub async fn create_payment_intent(
        &self,
        request: &PaymentIntentRequest,
    ) -> Result<PaymentIntent, ApiError> {
        if request.amount == 0 {
            return Err(ApiError::InvalidRequest(
                "Payment amount must be positive".to_string(),
            ));
        }
        super::validation::required("Currency", &request.currency)?;

        let call = ApiRequest::post(Domain::Payment, "/create-payment-intent").json(request)?;
        let intent: PaymentIntent = self.http.send(call).await?;

        let invalidated = self.cache.invalidate(&[CacheTag::Lease, CacheTag::Payment]);
        tracing::info!(
            amount = request.amount,
            currency = %request.currency,
            invalidated,
            "Payment intent created"
        );
        Ok(intent)
    }
}
