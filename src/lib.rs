#![allow(async_fn_in_trait)]
pub mod bigquery;
pub mod catalog;
pub mod config;
pub mod cost_guard;
pub mod error;
pub mod export;
pub mod geometry;
pub mod report;
pub mod warehouse;
