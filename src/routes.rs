mod execute;
mod info;

pub use execute::*;
pub use info::*;

use actix_web::error::{InternalError, JsonPayloadError};
use actix_web::{HttpRequest, HttpResponse};
use serde::Serialize;

/// Uniform response body: `{success, data}` or `{success: false, message}`
#[derive(Serialize, Debug)]
pub struct Envelope<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

pub fn ok<T: Serialize>(data: T) -> HttpResponse {
    HttpResponse::Ok().json(Envelope {
        success: true,
        data: Some(data),
        message: None,
    })
}

pub fn bad_request(message: impl Into<String>) -> HttpResponse {
    let message = message.into();
    log::debug!("Rejected request: {message}");
    HttpResponse::BadRequest().json(Envelope::<()> {
        success: false,
        data: None,
        message: Some(message),
    })
}

pub fn json_error_handler(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    let response = HttpResponse::BadRequest().json(Envelope::<()> {
        success: false,
        data: None,
        message: Some(format!("Invalid request body: {err}")),
    });
    InternalError::from_response(err, response).into()
}
