use crate::error::ServerError;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub body: String,
    pub headers: HashMap<String, String>,
}

impl Default for Response {
    fn default() -> Self {
        Response::new(200)
    }
}

impl Response {
    pub fn new(status: u16) -> Response {
        Response {
            status,
            headers: HashMap::new(),
            body: String::new(),
        }
    }

    pub fn status(&mut self, status: u16) -> &mut Self {
        self.status = status;
        self
    }

    pub fn body<T: AsRef<str>>(&mut self, body: T) -> &mut Self {
        self.body = body.as_ref().to_string();
        self
    }

    /// Sets a header, replacing any existing one whose name differs only
    /// in case.
    pub fn header<K: AsRef<str>, V: AsRef<str>>(&mut self, name: K, value: V) -> &mut Self {
        let name = name.as_ref();
        self.headers.retain(|key, _| !key.eq_ignore_ascii_case(name));
        self.headers.insert(name.to_string(), value.as_ref().to_string());
        self
    }

    /// Header lookup ignoring ASCII case.
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.get_header(name).is_some()
    }

    pub fn json<T: Serialize>(&mut self, value: &T) -> Result<&mut Self, ServerError> {
        let json_string = serde_json::to_string(value)
            .map_err(|e| ServerError::InternalError(format!("JSON serialization error: {}", e)))?;
        self.header("Content-Type", "application/json");
        self.body(json_string);
        Ok(self)
    }

    pub fn ok<T: Serialize>(data: &T) -> Result<Response, ServerError> {
        let mut response = Response::new(200);
        response.json(data)?;
        Ok(response)
    }

    pub fn created<T: Serialize>(data: &T) -> Result<Response, ServerError> {
        let mut response = Response::new(201);
        response.json(data)?;
        Ok(response)
    }

    pub fn no_content() -> Response {
        Response::new(204)
    }

    pub fn text<T: AsRef<str>>(content: T) -> Response {
        let mut response = Response::new(200);
        response
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(content);
        response
    }

    pub fn html<T: AsRef<str>>(content: T) -> Response {
        let mut response = Response::new(200);
        response
            .header("Content-Type", "text/html; charset=utf-8")
            .body(content);
        response
    }

    /// Standard reason phrase for a status code, e.g. `"Not Found"`.
    pub fn reason_phrase(status: u16) -> &'static str {
        ::http::StatusCode::from_u16(status)
            .ok()
            .and_then(|code| code.canonical_reason())
            .unwrap_or("Unknown")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lookup_ignores_case() {
        let response = Response::text("hi");
        assert_eq!(
            response.get_header("content-type"),
            Some("text/plain; charset=utf-8")
        );
        assert!(!response.has_header("Allow"));
    }

    #[test]
    fn header_replaces_other_casings() {
        let mut response = Response::html("<p>hi</p>");
        response.header("content-type", "text/plain");
        assert_eq!(response.headers.len(), 1);
        assert_eq!(response.get_header("Content-Type"), Some("text/plain"));
    }

    #[test]
    fn reason_phrases() {
        assert_eq!(Response::reason_phrase(404), "Not Found");
        assert_eq!(Response::reason_phrase(418), "I'm a teapot");
        assert_eq!(Response::reason_phrase(599), "Unknown");
    }
}
