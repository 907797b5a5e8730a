//! Public car catalog.

use std::sync::Arc;

use super::cache::{CacheTag, QueryCache, QueryKey, QueryResult, Subscription};
use super::client::{ApiRequest, Domain, HttpClient};
use super::models::{Brand, Car, CarQuery};

#[derive(Clone)]
pub struct CatalogApi {
    http: Arc<HttpClient>,
    cache: QueryCache,
}

impl CatalogApi {
    pub fn new(http: Arc<HttpClient>, cache: QueryCache) -> Self {
        Self { http, cache }
    }

    pub fn cars_key(query: &CarQuery) -> QueryKey {
        query
            .params()
            .into_iter()
            .fold(QueryKey::new(CacheTag::Catalog, "cars"), |key, (name, value)| {
                key.param(name, value)
            })
    }

    pub fn car_key(id: &str) -> QueryKey {
        QueryKey::new(CacheTag::Catalog, "car").param("id", id)
    }

    pub fn brands_key() -> QueryKey {
        QueryKey::new(CacheTag::Catalog, "brands")
    }

    pub async fn cars(&self, query: &CarQuery) -> QueryResult<Vec<Car>> {
        let http = self.http.clone();
        let request = Self::cars_request(query);
        self.cache
            .fetch(&Self::cars_key(query), move || async move {
                http.send::<Vec<Car>>(request).await
            })
            .await
    }

    /// User-initiated reload of a listing (pull to refresh, retry button).
    pub async fn refresh_cars(&self, query: &CarQuery) -> QueryResult<Vec<Car>> {
        let http = self.http.clone();
        let request = Self::cars_request(query);
        self.cache
            .refetch(&Self::cars_key(query), move || async move {
                http.send::<Vec<Car>>(request).await
            })
            .await
    }

    pub async fn car(&self, id: &str) -> QueryResult<Car> {
        let http = self.http.clone();
        let request = ApiRequest::get(Domain::Catalog, "/cars").segment(id);
        self.cache
            .fetch(&Self::car_key(id), move || async move {
                http.send::<Car>(request).await
            })
            .await
    }

    pub async fn brands(&self) -> QueryResult<Vec<Brand>> {
        let http = self.http.clone();
        let request = ApiRequest::get(Domain::Catalog, "/brands");
        self.cache
            .fetch(&Self::brands_key(), move || async move {
                http.send::<Vec<Brand>>(request).await
            })
            .await
    }

    fn cars_request(query: &CarQuery) -> ApiRequest {
        query
            .params()
            .into_iter()
            .fold(ApiRequest::get(Domain::Catalog, "/cars"), |req, (name, value)| {
                req.query(name, value)
            })
    }

    pub fn subscribe_cars(&self, query: &CarQuery) -> Subscription {
        self.cache.subscribe(&Self::cars_key(query))
    }
}
