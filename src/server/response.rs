//! HTTP response builders shared by the gate and the dispatcher.

use bytes::Bytes;
use http_body_util::{combinators::BoxBody, BodyExt, Empty, Full};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::http::{Response, StatusCode};
use serde::Serialize;
use std::convert::Infallible;

pub type ResponseBody = BoxBody<Bytes, Infallible>;

pub const JSON_CONTENT_TYPE: &str = "application/json";
pub const SSE_CONTENT_TYPE: &str = "text/event-stream";

fn with_body(
    status: StatusCode,
    content_type: Option<&'static str>,
    body: ResponseBody,
) -> Response<ResponseBody> {
    let mut resp = Response::new(body);
    *resp.status_mut() = status;
    if let Some(content_type) = content_type {
        resp.headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    }
    resp
}

pub fn json_response<T: Serialize + ?Sized>(
    status: StatusCode,
    value: &T,
) -> Response<ResponseBody> {
    let body = serde_json::to_vec(value).unwrap_or_else(|_| b"{}".to_vec());
    with_body(
        status,
        Some(JSON_CONTENT_TYPE),
        Full::new(Bytes::from(body)).boxed(),
    )
}

pub fn text_response(status: StatusCode, text: &'static str) -> Response<ResponseBody> {
    with_body(
        status,
        Some("text/plain; charset=utf-8"),
        Full::new(Bytes::from_static(text.as_bytes())).boxed(),
    )
}

pub fn empty_response(status: StatusCode) -> Response<ResponseBody> {
    with_body(status, None, Empty::new().boxed())
}

/// Single-event SSE body carrying one JSON-RPC message.
pub fn sse_message_response<T: Serialize + ?Sized>(
    status: StatusCode,
    value: &T,
) -> Response<ResponseBody> {
    let data = serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string());
    let frame = format!("event: message\ndata: {data}\n\n");
    with_body(
        status,
        Some(SSE_CONTENT_TYPE),
        Full::new(Bytes::from(frame)).boxed(),
    )
}

pub fn sse_stream_response(body: ResponseBody) -> Response<ResponseBody> {
    let mut resp = with_body(StatusCode::OK, Some(SSE_CONTENT_TYPE), body);
    resp.headers_mut()
        .insert("cache-control", HeaderValue::from_static("no-cache"));
    resp
}
