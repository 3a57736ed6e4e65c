//! Maps a failed parse/resolve/run into the wire format spec.md §7
//! mandates: `ERROR:<row>,<col> : <message>`, one per line, as `text/plain`.

use actix_web::{HttpResponse, ResponseError};
use corevm::{CompileError, RuntimeError, WithSource};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    /// The request body didn't parse as a program at all — there's no
    /// source span to report, so this is rendered as a synthetic `0,0`.
    #[error("ERROR:0,0 : {0}")]
    Parse(String),
    #[error("{0}")]
    Resolve(#[from] WithSource<CompileError>),
    #[error("{0}")]
    Runtime(#[from] WithSource<RuntimeError>),
}

impl ResponseError for ServerError {
    fn error_response(&self) -> HttpResponse {
        HttpResponse::BadRequest()
            .content_type("text/plain; charset=utf-8")
            .body(self.to_string())
    }
}
