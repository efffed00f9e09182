//! Utility functions for common operations.
//!
//! This module provides reusable utilities for:
//!
//! - **URL handling**: API endpoint construction and an SSRF host policy for media downloads
//! - **HTML scanning**: media source discovery in article bodies
//!
//! # Examples
//!
//! ```
//! use feedsync::util::{media_sources, validate_url, HostPolicy};
//!
//! let html = r#"<p><img class="x" src="https://example.com/a.png"></p>"#;
//! assert_eq!(media_sources(html), vec!["https://example.com/a.png".to_string()]);
//!
//! assert!(validate_url("http://192.168.1.1/a.png", HostPolicy::PublicOnly).is_err());
//! ```

mod html;
mod url_validator;

pub use html::{complete_media_urls, complete_scheme_relative, media_sources};
pub use url_validator::{api_endpoint, validate_url, HostPolicy, UrlValidationError};
