//! REST API module for the study backend.
//!
//! This module provides the `HttpClient` transport, the `RequestGateway`
//! that every business call goes through, and the business endpoints.
//!
//! The API uses bearer token authentication; an expired access token is
//! renewed once through the refresh endpoint and the call replayed.

pub mod client;
pub mod endpoints;
pub mod error;
pub mod gateway;

pub use client::{ApiRequest, ApiResponse, ApiTransport, HttpClient};
pub use error::ApiError;
pub use gateway::{PendingRequest, RequestGateway};
