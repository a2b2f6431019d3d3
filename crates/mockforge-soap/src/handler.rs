//! The SOAP [`RouteHandler`]: envelope parsing with `roxmltree`, operation
//! dispatch by `SOAPAction` header or envelope body element name, scripted
//! XML response bodies with template expansion.

use std::collections::HashMap;
use std::time::Instant;

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::extract::Request;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use mockforge_core::{Protocol, ProtocolDetail, RequestLogEntry, RequestLogger};
use tracing::{debug, warn};

use mockforge_core::TemplateContext;
use mockforge_http::RouteHandler;

const MAX_SOAP_BODY: usize = 2 * 1024 * 1024;

/// Serves every request to a mock's registered SOAP path, dispatching by
/// operation name to a templated XML response body.
pub struct SoapHandler {
    operations: HashMap<String, String>,
    wsdl: Option<String>,
    logger: RequestLogger,
}

impl SoapHandler {
    /// Build a handler over `operations` (operation name -> response body
    /// template) and an optional WSDL document served on a `?wsdl` query.
    pub fn new(operations: HashMap<String, String>, wsdl: Option<String>, logger: RequestLogger) -> Self {
        Self { operations, wsdl, logger }
    }

    /// Extract the operation name from the `SOAPAction` header, falling
    /// back to the first child element of `<soap:Body>`.
    fn operation_name(&self, headers: &HeaderMap, body: &str) -> Option<String> {
        if let Some(action) = headers.get("SOAPAction").and_then(|v| v.to_str().ok()) {
            let trimmed = action.trim().trim_matches('"');
            if !trimmed.is_empty() {
                let name = trimmed.rsplit('/').next().unwrap_or(trimmed);
                return Some(name.to_string());
            }
        }
        self.body_operation(body)
    }

    fn body_operation(&self, body: &str) -> Option<String> {
        let doc = roxmltree::Document::parse(body).ok()?;
        let envelope = doc.root_element();
        let body_el = envelope
            .children()
            .find(|n| n.is_element() && n.tag_name().name().eq_ignore_ascii_case("Body"))?;
        let op = body_el.children().find(|n| n.is_element())?;
        Some(op.tag_name().name().to_string())
    }

    fn fault(&self, code: &str, message: &str) -> Response {
        let xml = format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
<soap:Envelope xmlns:soap=\"http://schemas.xmlsoap.org/soap/envelope/\">\
<soap:Body><soap:Fault><faultcode>{code}</faultcode><faultstring>{message}</faultstring></soap:Fault></soap:Body>\
</soap:Envelope>"
        );
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(axum::http::header::CONTENT_TYPE, "text/xml; charset=utf-8")],
            xml,
        )
            .into_response()
    }
}

#[async_trait]
impl RouteHandler for SoapHandler {
    async fn handle(&self, req: Request<Body>) -> Response {
        let start = Instant::now();
        let query = req.uri().query().unwrap_or("").to_string();
        let method = req.method().to_string();
        let path = req.uri().path().to_string();
        if query.eq_ignore_ascii_case("wsdl") {
            let resp = match &self.wsdl {
                Some(wsdl) => (
                    [(axum::http::header::CONTENT_TYPE, "text/xml; charset=utf-8")],
                    wsdl.clone(),
                )
                    .into_response(),
                None => StatusCode::NOT_FOUND.into_response(),
            };
            return self
                .log_and_return(start, method, path, query, String::new(), resp)
                .await;
        }

        let headers = req.headers().clone();
        let body_bytes = match to_bytes(req.into_body(), MAX_SOAP_BODY).await {
            Ok(b) => b,
            Err(_) => {
                let resp = self.fault("soap:Client", "request body too large");
                return self
                    .log_and_return(start, method, path, query, String::new(), resp)
                    .await;
            }
        };
        let body = String::from_utf8_lossy(&body_bytes).to_string();

        let Some(operation) = self.operation_name(&headers, &body) else {
            warn!("soap request with no discoverable operation");
            let resp = self.fault("soap:Client", "unable to determine SOAP operation");
            return self
                .log_and_return(start, method, path, query, String::new(), resp)
                .await;
        };

        let Some(template) = self.operations.get(&operation) else {
            debug!(operation, "soap operation not configured");
            let resp = self.fault("soap:Client", &format!("unknown operation {operation}"));
            return self
                .log_and_return(start, method, path, query, operation, resp)
                .await;
        };

        let header_map: HashMap<String, String> = headers
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
            .collect();
        let ctx = TemplateContext::new(
            method.clone(),
            path.clone(),
            query.clone(),
            header_map,
            Some(body),
            HashMap::new(),
            None,
            None,
        );
        let expanded = ctx.expand(template);

        let resp = (
            StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, "text/xml; charset=utf-8")],
            expanded,
        )
            .into_response();
        self.log_and_return(start, method, path, query, operation, resp).await
    }
}

impl SoapHandler {
    async fn log_and_return(
        &self,
        start: Instant,
        method: String,
        path: String,
        query: String,
        operation: String,
        resp: Response,
    ) -> Response {
        let status = resp.status().as_u16();
        self.logger
            .log(RequestLogEntry {
                id: String::new(),
                timestamp: chrono::Utc::now(),
                protocol: Protocol::Soap,
                method,
                path,
                query,
                headers: HashMap::new(),
                body: None,
                remote_addr: None,
                matched_mock_id: operation.clone(),
                status,
                duration_ms: start.elapsed().as_millis() as u64,
                detail: Some(ProtocolDetail {
                    soap_operation: if operation.is_empty() { None } else { Some(operation) },
                    ..Default::default()
                }),
                near_misses: Vec::new(),
            })
            .await;
        resp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler() -> SoapHandler {
        let mut ops = HashMap::new();
        ops.insert(
            "GetStatus".to_string(),
            "<soap:Envelope xmlns:soap=\"http://schemas.xmlsoap.org/soap/envelope/\"><soap:Body><GetStatusResponse>ok</GetStatusResponse></soap:Body></soap:Envelope>".to_string(),
        );
        SoapHandler::new(ops, None, RequestLogger::new(100))
    }

    #[test]
    fn extracts_operation_from_soap_action_header() {
        let h = handler();
        let mut headers = HeaderMap::new();
        headers.insert("SOAPAction", "\"http://example.com/GetStatus\"".parse().unwrap());
        assert_eq!(h.operation_name(&headers, ""), Some("GetStatus".to_string()));
    }

    #[test]
    fn extracts_operation_from_envelope_body_when_header_absent() {
        let h = handler();
        let body = "<soap:Envelope xmlns:soap=\"http://schemas.xmlsoap.org/soap/envelope/\"><soap:Body><GetStatus/></soap:Body></soap:Envelope>";
        assert_eq!(h.operation_name(&HeaderMap::new(), body), Some("GetStatus".to_string()));
    }

    #[tokio::test]
    async fn unknown_operation_returns_a_soap_fault() {
        let h = handler();
        let req = Request::builder()
            .method("POST")
            .uri("/soap")
            .header("SOAPAction", "Unknown")
            .body(Body::from(
                "<soap:Envelope xmlns:soap=\"http://schemas.xmlsoap.org/soap/envelope/\"><soap:Body><Unknown/></soap:Body></soap:Envelope>",
            ))
            .unwrap();
        let resp = h.handle(req).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn configured_operation_expands_template_and_responds_ok() {
        let h = handler();
        let req = Request::builder()
            .method("POST")
            .uri("/soap")
            .header("SOAPAction", "GetStatus")
            .body(Body::empty())
            .unwrap();
        let resp = h.handle(req).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
