use crate::http::{Destination, Request};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestCategory {
    Api,
    Navigation,
    Asset,
}

/// API prefixes win over the request destination, so a document request to
/// `/predict` is still treated as an API call.
pub fn classify(request: &Request, api_prefixes: &[String]) -> RequestCategory {
    let path = request.url.path();
    if api_prefixes.iter().any(|prefix| path.starts_with(prefix.as_str())) {
        RequestCategory::Api
    } else if request.destination == Destination::Document {
        RequestCategory::Navigation
    } else {
        RequestCategory::Asset
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::url;

    fn prefixes() -> Vec<String> {
        vec!["/predict".to_string()]
    }

    #[test]
    fn test_classify_api_by_path_prefix() {
        let request = Request::post_json(url("/predict"), &serde_json::json!({})).unwrap();
        assert_eq!(classify(&request, &prefixes()), RequestCategory::Api);
        assert_eq!(classify(&Request::navigate(url("/predict")), &prefixes()), RequestCategory::Api);
    }

    #[test]
    fn test_classify_navigation_and_assets() {
        assert_eq!(
            classify(&Request::navigate(url("/analysis.html")), &prefixes()),
            RequestCategory::Navigation
        );
        assert_eq!(
            classify(&Request::get(url("/static/css/style.css")), &prefixes()),
            RequestCategory::Asset
        );
        assert_eq!(classify(&Request::get(url("/predict")), &[]), RequestCategory::Asset);
    }
}
