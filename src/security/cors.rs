use axum::http::{header, HeaderValue, Method};
use log::{info, warn};
use tower_http::cors::{AllowOrigin, CorsLayer};

#[derive(Debug, Clone)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<Method>,
    pub allowed_headers: Vec<header::HeaderName>,
    pub allow_credentials: bool,
    pub max_age_secs: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![],
            allowed_methods: vec![
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::OPTIONS,
            ],
            allowed_headers: vec![
                header::CONTENT_TYPE,
                header::AUTHORIZATION,
                header::ACCEPT,
                header::ORIGIN,
            ],
            allow_credentials: true,
            max_age_secs: 3600,
        }
    }
}

impl CorsConfig {
    pub fn with_origins(mut self, origins: &[String]) -> Self {
        self.allowed_origins = origins
            .iter()
            .map(|o| o.trim().to_string())
            .filter(|o| !o.is_empty())
            .collect();
        self
    }

    pub fn build(self) -> CorsLayer {
        let origins: Vec<HeaderValue> = self
            .allowed_origins
            .iter()
            .filter_map(|o| match o.parse() {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!("Ignoring invalid CORS origin {o:?}");
                    None
                }
            })
            .collect();

        let mut cors = if origins.is_empty() {
            info!("No CORS origins configured, allowing localhost only");
            CorsLayer::new().allow_origin(AllowOrigin::predicate(|origin, _| {
                is_local_origin(origin)
            }))
        } else {
            info!("CORS configured with {} allowed origins", origins.len());
            CorsLayer::new().allow_origin(origins)
        };

        cors = cors
            .allow_methods(self.allowed_methods)
            .allow_headers(self.allowed_headers)
            .max_age(std::time::Duration::from_secs(self.max_age_secs));
        if self.allow_credentials {
            cors = cors.allow_credentials(true);
        }
        cors
    }
}

fn is_local_origin(origin: &HeaderValue) -> bool {
    let Ok(origin) = origin.to_str() else {
        return false;
    };
    let host = origin
        .trim_start_matches("http://")
        .trim_start_matches("https://");
    let host = host.split(':').next().unwrap_or_default();
    host == "localhost" || host == "127.0.0.1"
}

pub fn create_cors_layer(origins: &[String]) -> CorsLayer {
    CorsConfig::default().with_origins(origins).build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_origin_detection() {
        assert!(is_local_origin(&HeaderValue::from_static("http://localhost:3000")));
        assert!(is_local_origin(&HeaderValue::from_static("https://127.0.0.1")));
        assert!(!is_local_origin(&HeaderValue::from_static("https://localhost.evil.com")));
        assert!(!is_local_origin(&HeaderValue::from_static("https://example.com")));
    }

    #[test]
    fn test_blank_origins_are_dropped() {
        let config = CorsConfig::default().with_origins(&[
            " https://app.example.com ".to_string(),
            String::new(),
        ]);
        assert_eq!(config.allowed_origins, vec!["https://app.example.com"]);
    }
}
