use actix_web::{http::header, HttpResponse};
use serde::Serialize;

/// Success envelope shared by every JSON endpoint. Errors use
/// `{ "error": ... }`, see `AppError`.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub data: T,
    pub message: Option<String>,
}

pub fn ok<T: Serialize>(data: T) -> HttpResponse {
    HttpResponse::Ok().json(ApiResponse {
        data,
        message: None,
    })
}

pub fn ok_with<T: Serialize>(data: T, message: impl Into<String>) -> HttpResponse {
    HttpResponse::Ok().json(ApiResponse {
        data,
        message: Some(message.into()),
    })
}

pub fn created<T: Serialize>(data: T, message: impl Into<String>) -> HttpResponse {
    HttpResponse::Created().json(ApiResponse {
        data,
        message: Some(message.into()),
    })
}

pub fn csv_attachment(filename: &str, body: Vec<u8>) -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/csv; charset=utf-8")
        .insert_header((
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", filename),
        ))
        .body(body)
}
