#![allow(dead_code)]

use serde::Deserialize;

/// Envelope around every backend response body.
#[derive(Debug, Deserialize)]
pub(crate) struct ResponseWrapperModel<T> {
    pub(crate) success: bool,
    pub(crate) data: Option<T>,
    pub(crate) error: Option<ResponseErrorModel>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ResponseErrorModel {
    pub(crate) code: Option<String>,
    pub(crate) message: Option<String>,
}
