//! Tracking API backends for Flizo Copilot

pub mod demo;
pub mod http;

pub use demo::DemoTrackingApi;
pub use http::HttpTrackingApi;
