use reqwest::Method;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use url::Url;

pub const CONTENT_TYPE: &str = "content-type";
pub const APPLICATION_JSON: &str = "application/json";

/// What the request is fetched for. Only full-document navigations get the
/// root-document fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Document,
    Other,
}

#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub destination: Destination,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl Request {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            destination: Destination::Other,
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// A top-level page load.
    pub fn navigate(url: Url) -> Self {
        Self {
            destination: Destination::Document,
            ..Self::get(url)
        }
    }

    pub fn post_json<T: Serialize>(url: Url, payload: &T) -> Result<Self, serde_json::Error> {
        let body = serde_json::to_vec(payload)?;
        let mut request = Self::new(Method::POST, url);
        request
            .headers
            .push((CONTENT_TYPE.to_string(), APPLICATION_JSON.to_string()));
        request.body = Some(body);
        Ok(request)
    }

    /// Only plain GET reads may have their responses stored.
    pub fn is_cacheable_read(&self) -> bool {
        self.method == Method::GET
    }

    pub fn is_same_origin(&self, origin: &Url) -> bool {
        self.url.origin() == origin.origin()
    }
}

/// Mirrors the browser's response types: `Basic` for same-origin reads,
/// `Cors` for cross-origin reads the server opted into, `Opaque` for
/// cross-origin responses whose content may not be inspected, and `Default`
/// for responses constructed locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    Basic,
    Cors,
    Opaque,
    Default,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub url: String,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub response_type: ResponseType,
}

impl Response {
    /// A locally synthesised JSON response.
    pub fn json<T: Serialize>(status: u16, value: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            url: String::new(),
            status,
            headers: vec![(CONTENT_TYPE.to_string(), APPLICATION_JSON.to_string())],
            body: serde_json::to_vec(value)?,
            response_type: ResponseType::Default,
        })
    }

    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Only complete same-origin responses may enter the dynamic tier.
    pub fn is_cacheable(&self) -> bool {
        self.status == 200 && self.response_type == ResponseType::Basic
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn parse_json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16, response_type: ResponseType) -> Response {
        Response {
            url: "http://localhost:5000/".into(),
            status,
            headers: vec![("Content-Type".into(), "text/html".into())],
            body: b"<html></html>".to_vec(),
            response_type,
        }
    }

    #[test]
    fn test_is_cacheable_requires_200_basic() {
        assert!(response(200, ResponseType::Basic).is_cacheable());
        assert!(!response(201, ResponseType::Basic).is_cacheable());
        assert!(!response(404, ResponseType::Basic).is_cacheable());
        assert!(!response(200, ResponseType::Opaque).is_cacheable());
        assert!(!response(200, ResponseType::Cors).is_cacheable());
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let r = response(200, ResponseType::Basic);
        assert_eq!(r.header("content-type"), Some("text/html"));
        assert_eq!(r.header("etag"), None);
    }

    #[test]
    fn test_post_json_sets_body_and_content_type() {
        let url = Url::parse("http://localhost:5000/predict").unwrap();
        let request = Request::post_json(url, &serde_json::json!({"model": "rf"})).unwrap();
        assert_eq!(request.method, Method::POST);
        assert!(!request.is_cacheable_read());
        assert_eq!(request.body.as_deref(), Some(br#"{"model":"rf"}"#.as_slice()));
    }

    #[test]
    fn test_same_origin() {
        let origin = Url::parse("http://localhost:5000/").unwrap();
        let local = Request::get(origin.join("/static/js/model.js").unwrap());
        let cdn = Request::get(Url::parse("https://cdn.plot.ly/plotly-2.32.0.min.js").unwrap());
        assert!(local.is_same_origin(&origin));
        assert!(!cdn.is_same_origin(&origin));
    }
}
