//! HTTP handlers for cla-service.

pub mod email_domain;
pub mod link;
pub mod manager;
pub mod metrics;
