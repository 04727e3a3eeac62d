//! HTTP facade for the evald evaluation service.

pub mod config;
pub mod web;
