pub mod busy_extractor;
pub mod generation;
pub mod ids;
pub mod reconciler;
pub mod request_builder;
pub mod schedule_service;
