//! Profile scraper library.
//!
//! An HTTP service that returns public profile metadata and a bounded list of
//! recent posts for a username, either by rendering the profile page in a
//! headless browser or by calling the public JSON endpoint.

// Allow raw string hashes for safety - they're harmless and prevent issues if content changes
#![allow(clippy::needless_raw_string_hashes)]

pub mod config;
pub mod constants;
pub mod fetcher;
pub mod rate_limit;
pub mod web;
